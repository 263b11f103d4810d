//! The session task: one tokio task owns the [`Session`] and serialises
//! local commands, transport events and the typing timer.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

use sigil_shared::{CryptoEngine, PeerId};

use crate::channel::ChannelEvent;
use crate::error::Result;
use crate::events::FriendSummary;
use crate::files::OutgoingFile;
use crate::registry::Message;
use crate::session::Session;

/// Commands sent *to* the session task by the presentation layer.
#[derive(Debug)]
pub enum SessionCommand {
    RequestFriend(PeerId),
    AcceptFriend(PeerId),
    RejectFriend(PeerId),
    SendMessage {
        to: PeerId,
        text: String,
    },
    SendFile {
        to: PeerId,
        file: OutgoingFile,
    },
    /// The local user is composing a message to this peer.
    Typing(PeerId),
    OpenConversation(PeerId),
    CloseConversation,
    /// Request a snapshot of the friend list.
    Friends(oneshot::Sender<Vec<FriendSummary>>),
    History {
        peer: PeerId,
        reply: oneshot::Sender<Result<Vec<Message>>>,
    },
    Shutdown,
}

/// Spawn the session task. Returns the command sender and the task handle;
/// the task ends on `Shutdown`, when every command sender is dropped, or
/// once the session becomes unusable.
pub fn spawn_session<C: CryptoEngine>(
    session: Session<C>,
    channel_events: mpsc::UnboundedReceiver<ChannelEvent>,
    command_capacity: usize,
) -> (mpsc::Sender<SessionCommand>, JoinHandle<()>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(command_capacity);
    let task = tokio::spawn(run(session, cmd_rx, channel_events));
    (cmd_tx, task)
}

async fn run<C: CryptoEngine>(
    mut session: Session<C>,
    mut commands: mpsc::Receiver<SessionCommand>,
    mut channel_events: mpsc::UnboundedReceiver<ChannelEvent>,
) {
    let mut channel_open = true;

    loop {
        let typing_deadline = session.typing_deadline();

        tokio::select! {
            // --- Local commands ---
            cmd = commands.recv() => match cmd {
                Some(SessionCommand::Shutdown) | None => {
                    info!("Session shutting down");
                    break;
                }
                Some(cmd) => execute(&mut session, cmd).await,
            },

            // --- Relay traffic ---
            event = channel_events.recv(), if channel_open => match event {
                Some(event) => session.handle_channel_event(event),
                None => {
                    debug!("Transport finished");
                    channel_open = false;
                }
            },

            // --- Typing indicator expiry ---
            _ = wait_until(typing_deadline) => session.expire_typing(Instant::now()),
        }

        if session.is_unusable() {
            error!("Session unusable, stopping");
            break;
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn execute<C: CryptoEngine>(session: &mut Session<C>, cmd: SessionCommand) {
    let result = match cmd {
        SessionCommand::RequestFriend(peer) => session.request_friend(&peer).await,
        SessionCommand::AcceptFriend(peer) => session.accept_friend(&peer).await,
        SessionCommand::RejectFriend(peer) => session.reject_friend(&peer),
        SessionCommand::SendMessage { to, text } => session.send_message(&to, &text).await,
        SessionCommand::SendFile { to, file } => session.send_file(&to, file).await.map(|chunks| {
            debug!(peer = %to, chunks, "File sent");
        }),
        SessionCommand::Typing(peer) => session.send_typing(&peer).await,
        SessionCommand::OpenConversation(peer) => session.open_conversation(&peer),
        SessionCommand::CloseConversation => {
            session.close_conversation();
            Ok(())
        }
        SessionCommand::Friends(reply) => {
            let _ = reply.send(session.friend_summaries());
            Ok(())
        }
        SessionCommand::History { peer, reply } => {
            let _ = reply.send(session.history(&peer).map(<[Message]>::to_vec));
            Ok(())
        }
        SessionCommand::Shutdown => Ok(()),
    };

    if let Err(e) = result {
        session.report(e);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use sigil_shared::{Envelope, EnvelopeBody};

    use super::*;
    use crate::config::ProtocolConfig;
    use crate::error::SessionError;
    use crate::events::SessionEvent;
    use crate::registry::TrustState;
    use crate::testutil::{befriend, relay, test_config, TestPeer};

    const WAIT: Duration = Duration::from_secs(5);

    fn welcome(id: &str) -> Envelope {
        Envelope {
            from: None,
            to: None,
            body: EnvelopeBody::Welcome {
                user_id: PeerId::new(id),
            },
        }
    }

    #[tokio::test]
    async fn test_commands_and_snapshots() {
        let mut alice = TestPeer::new("AAA111");
        let mut bob = TestPeer::new("BBB222");
        befriend(&mut alice, &mut bob).await;
        let bob_id = bob.id();

        let TestPeer {
            session,
            mut outbox,
            mut events,
        } = alice;
        let (_channel_tx, channel_rx) = mpsc::unbounded_channel();
        let (commands, task) = spawn_session(session, channel_rx, 16);

        commands
            .send(SessionCommand::SendMessage {
                to: bob_id.clone(),
                text: "hello".into(),
            })
            .await
            .unwrap();
        let sent = timeout(WAIT, outbox.recv()).await.unwrap().unwrap();
        assert!(matches!(sent.body, EnvelopeBody::Message { .. }));

        let (reply, friends) = oneshot::channel();
        commands.send(SessionCommand::Friends(reply)).await.unwrap();
        let friends = friends.await.unwrap();
        assert_eq!(friends.len(), 1);
        assert_eq!(friends[0].trust, TrustState::Established);
        assert_eq!(friends[0].messages, 1);

        let (reply, history) = oneshot::channel();
        commands
            .send(SessionCommand::History {
                peer: bob_id.clone(),
                reply,
            })
            .await
            .unwrap();
        let history = history.await.unwrap().unwrap();
        assert_eq!(history[0].as_text(), Some("hello"));

        // local failures surface as events
        commands
            .send(SessionCommand::SendMessage {
                to: PeerId::new("ZZZ999"),
                text: "hi".into(),
            })
            .await
            .unwrap();
        loop {
            match timeout(WAIT, events.recv()).await.unwrap().unwrap() {
                SessionEvent::Error(SessionError::PeerNotReady(peer)) => {
                    assert_eq!(peer, PeerId::new("ZZZ999"));
                    break;
                }
                _ => continue,
            }
        }

        commands.send(SessionCommand::Shutdown).await.unwrap();
        timeout(WAIT, task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_typing_indicator_expires() {
        let config = ProtocolConfig {
            typing_timeout: Duration::from_millis(50),
            ..test_config()
        };
        let mut alice = TestPeer::with_config("AAA111", config.clone());
        let mut bob = TestPeer::with_config("BBB222", config);
        befriend(&mut alice, &mut bob).await;
        let alice_id = alice.id();

        bob.session.open_conversation(&alice_id).unwrap();
        alice.session.send_typing(&bob.id()).await.unwrap();
        let typing = alice.sent().remove(0);

        let TestPeer {
            session,
            mut events,
            ..
        } = bob;
        let (channel_tx, channel_rx) = mpsc::unbounded_channel();
        let (commands, task) = spawn_session(session, channel_rx, 16);

        channel_tx
            .send(ChannelEvent::Frame(relay(&alice_id, typing)))
            .unwrap();

        let started = timeout(WAIT, events.recv()).await.unwrap().unwrap();
        assert!(matches!(started, SessionEvent::TypingStarted { peer } if peer == alice_id));
        let stopped = timeout(WAIT, events.recv()).await.unwrap().unwrap();
        assert!(matches!(stopped, SessionEvent::TypingStopped { peer } if peer == alice_id));

        drop(commands);
        timeout(WAIT, task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_channel_events_drive_presence() {
        let peer = TestPeer::unwelcomed();
        let TestPeer {
            session,
            mut events,
            ..
        } = peer;
        let (channel_tx, channel_rx) = mpsc::unbounded_channel();
        let (commands, task) = spawn_session(session, channel_rx, 16);

        channel_tx.send(ChannelEvent::Opened).unwrap();
        channel_tx
            .send(ChannelEvent::Frame(welcome("AAA111")))
            .unwrap();
        channel_tx
            .send(ChannelEvent::Closed { code: Some(1000) })
            .unwrap();
        drop(channel_tx);

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(timeout(WAIT, events.recv()).await.unwrap().unwrap());
        }
        assert!(matches!(
            seen.as_slice(),
            [
                SessionEvent::Presence(sigil_shared::ConnectionStatus::Online),
                SessionEvent::Welcome { .. },
                SessionEvent::Presence(sigil_shared::ConnectionStatus::Offline { code: Some(1000) }),
            ]
        ));

        commands.send(SessionCommand::Shutdown).await.unwrap();
        timeout(WAIT, task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_second_welcome_stops_session() {
        let TestPeer {
            session,
            mut events,
            ..
        } = TestPeer::new("AAA111");
        let (channel_tx, channel_rx) = mpsc::unbounded_channel();
        let (commands, task) = spawn_session(session, channel_rx, 16);

        channel_tx
            .send(ChannelEvent::Frame(welcome("ZZZ999")))
            .unwrap();
        timeout(WAIT, task).await.unwrap().unwrap();

        assert!(matches!(
            timeout(WAIT, events.recv()).await.unwrap(),
            Some(SessionEvent::Fatal(SessionError::AlreadyWelcomed(_)))
        ));
        // the task dropped the session, and with it the event sender
        assert!(timeout(WAIT, events.recv()).await.unwrap().is_none());
        assert!(commands.send(SessionCommand::CloseConversation).await.is_err());
    }

    /// Inbound traffic keeps flowing while a large upload is parked on a
    /// full outbound queue.
    #[tokio::test]
    async fn test_upload_with_inbound_flood_over_transport() {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

        use crate::files::OutgoingFile;
        use crate::transport::connect_json_lines;

        let config = ProtocolConfig {
            chunk_size: 1024,
            channel_capacity: 16,
            ..test_config()
        };
        let mut alice = TestPeer::with_config("AAA111", config.clone());
        let mut bob = TestPeer::with_config("BBB222", config.clone());
        befriend(&mut alice, &mut bob).await;
        let bob_id = bob.id();

        let (client, relay_end) = tokio::io::duplex(8 * 1024);
        let transport = connect_json_lines(client, config.channel_capacity);
        let TestPeer { mut session, .. } = alice;
        session.channel = transport.channel;
        let (commands, task) = spawn_session(session, transport.events, 16);

        let (relay_read, mut relay_write) = tokio::io::split(relay_end);
        let typing = relay(&bob_id, Envelope::to(&PeerId::new("AAA111"), EnvelopeBody::Typing));
        let line = format!("{}\n", typing.to_json().unwrap());
        let flood = tokio::spawn(async move {
            for _ in 0..2_000 {
                relay_write.write_all(line.as_bytes()).await.unwrap();
            }
            relay_write
        });

        commands
            .send(SessionCommand::SendFile {
                to: bob_id.clone(),
                file: OutgoingFile::new("big.bin", "application/octet-stream", vec![42u8; 256 * 1024]),
            })
            .await
            .unwrap();

        let mut lines = BufReader::new(relay_read).lines();
        let reached_end = timeout(Duration::from_secs(20), async {
            let mut chunks = 0usize;
            while let Some(line) = lines.next_line().await.unwrap() {
                match Envelope::from_json(&line).unwrap().body {
                    EnvelopeBody::FileChunk { .. } => chunks += 1,
                    EnvelopeBody::FileEnd => return chunks,
                    _ => {}
                }
            }
            panic!("transport closed before FILE_END");
        })
        .await;
        let chunks = reached_end.expect("FILE_END reaches the relay");
        assert!(chunks > config.channel_capacity);

        let _relay_write = flood.await.unwrap();
        commands.send(SessionCommand::Shutdown).await.unwrap();
        timeout(WAIT, task).await.unwrap().unwrap();
    }
}
