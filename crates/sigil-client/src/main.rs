//! # sigil
//!
//! Terminal client for the Sigil relay chat.
//!
//! - `sigil keygen <name>` writes a passphrase-protected key pair
//! - `sigil chat` connects to a relay and reads slash commands from stdin

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::oneshot;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sigil_client::cli::{self, Input};
use sigil_client::keyfile::{read_key_file, write_key_pair};
use sigil_client::{
    spawn_session, transport, ClientConfig, ConfigError, LocalKeys, Message, OutgoingFile,
    Session, SessionCommand, SessionEvent,
};
use sigil_shared::{ConnectionStatus, CryptoEngine, PeerId, SealEngine};

#[derive(Parser)]
#[command(name = "sigil", version, about = "End-to-end encrypted relay chat")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a named key pair protected by a passphrase
    Keygen {
        /// Name bound to the key
        name: String,
        /// Directory for `<name>_public.asc` and `<name>_private.asc`
        #[arg(long, default_value = ".")]
        out: PathBuf,
        /// Passphrase (overrides SIGIL_PASSPHRASE)
        #[arg(long)]
        passphrase: Option<String>,
    },
    /// Connect to a relay and chat
    Chat {
        /// Relay address, host:port (overrides SIGIL_RELAY_ADDR)
        #[arg(long)]
        relay: Option<String>,
        /// Armored public key file (overrides SIGIL_PUBLIC_KEY)
        #[arg(long)]
        public: Option<PathBuf>,
        /// Armored private key file (overrides SIGIL_PRIVATE_KEY)
        #[arg(long)]
        private: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so they don't interleave with the chat on stdout
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,sigil_client=debug,sigil_shared=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ClientConfig::from_env();

    match cli.command {
        Command::Keygen {
            name,
            out,
            passphrase,
        } => keygen(&config, &name, &out, passphrase),
        Command::Chat {
            relay,
            public,
            private,
        } => chat(config, relay, public, private).await,
    }
}

fn keygen(
    config: &ClientConfig,
    name: &str,
    out: &Path,
    passphrase: Option<String>,
) -> anyhow::Result<()> {
    let passphrase = passphrase
        .or_else(|| config.passphrase.clone())
        .ok_or(ConfigError::Missing("SIGIL_PASSPHRASE"))?;

    let engine = SealEngine::new();
    let pair = engine.generate_key_pair(name, &passphrase)?;
    let fingerprint = engine.fingerprint(&engine.read_public_key(&pair.public_key)?);
    let (public_path, private_path) = write_key_pair(out, name, &pair)?;

    println!("Public key:  {}", public_path.display());
    println!("Private key: {}", private_path.display());
    println!("Fingerprint: {fingerprint}");
    Ok(())
}

async fn chat(
    mut config: ClientConfig,
    relay: Option<String>,
    public: Option<PathBuf>,
    private: Option<PathBuf>,
) -> anyhow::Result<()> {
    if let Some(relay) = relay {
        config.relay_addr = relay;
    }
    let public_path = public
        .or(config.public_key_path.clone())
        .ok_or(ConfigError::Missing("SIGIL_PUBLIC_KEY"))?;
    let private_path = private
        .or(config.private_key_path.clone())
        .ok_or(ConfigError::Missing("SIGIL_PRIVATE_KEY"))?;
    let passphrase = config
        .passphrase
        .clone()
        .ok_or(ConfigError::Missing("SIGIL_PASSPHRASE"))?;
    info!(?config, "Loaded configuration");

    let engine = SealEngine::new();
    let keys = LocalKeys::load(
        &engine,
        &read_key_file(&public_path)?,
        &read_key_file(&private_path)?,
        &passphrase,
    )?;
    println!("Key fingerprint: {}", engine.fingerprint(keys.public_key()));

    println!(
        "{}",
        cli::render_event(&SessionEvent::Presence(ConnectionStatus::Connecting))
    );
    let transport = transport::connect_tcp(&config.relay_addr, config.protocol.channel_capacity)
        .await
        .with_context(|| format!("Failed to connect to relay at {}", config.relay_addr))?;

    let (session, mut events) =
        Session::new(engine, keys, config.protocol.clone(), transport.channel);
    let (commands, session_task) = spawn_session(session, transport.events, 64);

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!("{}", cli::render_event(&event));
        }
    });

    println!("{}", cli::HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut open: Option<PeerId> = None;

    while let Some(line) = lines.next_line().await? {
        let input = match cli::parse_input(&line) {
            Ok(Some(input)) => input,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };

        let command = match input {
            Input::Quit => break,
            Input::Help => {
                println!("{}", cli::HELP);
                continue;
            }
            Input::Add(peer) => SessionCommand::RequestFriend(peer),
            Input::Accept(peer) => SessionCommand::AcceptFriend(peer),
            Input::Reject(peer) => SessionCommand::RejectFriend(peer),
            Input::Open(peer) => {
                open = Some(peer.clone());
                SessionCommand::OpenConversation(peer)
            }
            Input::Close => {
                open = None;
                SessionCommand::CloseConversation
            }
            Input::Msg { to, text } => SessionCommand::SendMessage { to, text },
            Input::Say(text) => match &open {
                Some(to) => SessionCommand::SendMessage {
                    to: to.clone(),
                    text,
                },
                None => {
                    eprintln!("No open conversation: /open <id> or /msg <id> <text>");
                    continue;
                }
            },
            Input::File { to, path } => match load_file(&path).await {
                Ok(file) => SessionCommand::SendFile { to, file },
                Err(e) => {
                    eprintln!("{e:#}");
                    continue;
                }
            },
            Input::Friends => {
                let (reply, rx) = oneshot::channel();
                send(&commands, SessionCommand::Friends(reply)).await?;
                for friend in rx.await? {
                    println!("{}", cli::render_friend(&friend));
                }
                continue;
            }
            Input::History(peer) => {
                match history(&commands, &peer).await? {
                    Ok(messages) => {
                        for (i, message) in messages.iter().enumerate() {
                            println!("{:>3}. {}", i + 1, cli::render_message(&peer, message));
                        }
                    }
                    Err(e) => eprintln!("{e}"),
                }
                continue;
            }
            Input::Save { peer, index, path } => {
                match history(&commands, &peer).await? {
                    Ok(messages) => match cli::attachment_at(&messages, index) {
                        Some(file) => match save_file(&path, &file.content).await {
                            Ok(()) => println!("Saved {} to {}", file.name, path.display()),
                            Err(e) => eprintln!("{e:#}"),
                        },
                        None => eprintln!("Entry {index} of {peer} is not a file"),
                    },
                    Err(e) => eprintln!("{e}"),
                }
                continue;
            }
        };

        send(&commands, command).await?;
    }

    let _ = commands.send(SessionCommand::Shutdown).await;
    session_task.await?;
    printer.abort();
    Ok(())
}

async fn send(
    commands: &tokio::sync::mpsc::Sender<SessionCommand>,
    command: SessionCommand,
) -> anyhow::Result<()> {
    commands
        .send(command)
        .await
        .map_err(|_| anyhow!("session task stopped"))
}

async fn history(
    commands: &tokio::sync::mpsc::Sender<SessionCommand>,
    peer: &PeerId,
) -> anyhow::Result<sigil_client::error::Result<Vec<Message>>> {
    let (reply, rx) = oneshot::channel();
    send(
        commands,
        SessionCommand::History {
            peer: peer.clone(),
            reply,
        },
    )
    .await?;
    Ok(rx.await?)
}

/// Write a received attachment. Existing files are left alone.
async fn save_file(path: &Path, content: &[u8]) -> anyhow::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(content)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

async fn load_file(path: &Path) -> anyhow::Result<OutgoingFile> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("Not a file path: {}", path.display()))?
        .to_string();
    let content = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    Ok(OutgoingFile::new(name, cli::guess_mime(path), content))
}
