//! Line-oriented chat front end: slash commands in, rendered events out.

use std::path::{Path, PathBuf};

use thiserror::Error;

use sigil_shared::{ConnectionStatus, PeerId, ProtocolError};

use crate::events::{FriendSummary, SessionEvent};
use crate::registry::{Direction, FileAttachment, Message, Payload};

pub const HELP: &str = "\
/add <id>          send a friend request
/accept <id>       accept a pending request
/reject <id>       reject a pending request
/open <id>         open a conversation (plain text goes there)
/close             close the open conversation
/msg <id> <text>   send a message
/file <id> <path>  send a file
/history <id>      show a conversation
/save <id> <n> <path>  save the file at position n of a conversation
/friends           list friends
/quit              exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Add(PeerId),
    Accept(PeerId),
    Reject(PeerId),
    Open(PeerId),
    Close,
    Msg { to: PeerId, text: String },
    File { to: PeerId, path: PathBuf },
    /// Text without a command, for the open conversation.
    Say(String),
    History(PeerId),
    Save {
        peer: PeerId,
        index: usize,
        path: PathBuf,
    },
    Friends,
    Help,
    Quit,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum InputError {
    #[error("Unknown command: {0} (try /help)")]
    Unknown(String),

    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error(transparent)]
    Peer(#[from] ProtocolError),
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse_input(line: &str) -> Result<Option<Input>, InputError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(command) = line.strip_prefix('/') else {
        return Ok(Some(Input::Say(line.to_string())));
    };

    let (name, rest) = match command.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (command, ""),
    };

    let input = match name {
        "add" => Input::Add(peer_arg(rest, "/add <id>")?),
        "accept" => Input::Accept(peer_arg(rest, "/accept <id>")?),
        "reject" => Input::Reject(peer_arg(rest, "/reject <id>")?),
        "open" => Input::Open(peer_arg(rest, "/open <id>")?),
        "history" => Input::History(peer_arg(rest, "/history <id>")?),
        "close" => Input::Close,
        "msg" => {
            let (to, text) = peer_and_rest(rest, "/msg <id> <text>")?;
            Input::Msg {
                to,
                text: text.to_string(),
            }
        }
        "file" => {
            let (to, path) = peer_and_rest(rest, "/file <id> <path>")?;
            Input::File {
                to,
                path: PathBuf::from(path),
            }
        }
        "save" => {
            const USAGE: &str = "/save <id> <n> <path>";
            let (peer, tail) = peer_and_rest(rest, USAGE)?;
            let (index, path) = tail
                .split_once(char::is_whitespace)
                .ok_or(InputError::Usage(USAGE))?;
            Input::Save {
                peer,
                index: index.parse().map_err(|_| InputError::Usage(USAGE))?,
                path: PathBuf::from(path.trim()),
            }
        }
        "friends" => Input::Friends,
        "help" => Input::Help,
        "quit" | "exit" => Input::Quit,
        other => return Err(InputError::Unknown(format!("/{other}"))),
    };
    Ok(Some(input))
}

fn peer_arg(rest: &str, usage: &'static str) -> Result<PeerId, InputError> {
    if rest.is_empty() {
        return Err(InputError::Usage(usage));
    }
    Ok(PeerId::parse(rest)?)
}

fn peer_and_rest<'a>(rest: &'a str, usage: &'static str) -> Result<(PeerId, &'a str), InputError> {
    match rest.split_once(char::is_whitespace) {
        Some((peer, tail)) if !tail.trim().is_empty() => Ok((PeerId::parse(peer)?, tail.trim())),
        _ => Err(InputError::Usage(usage)),
    }
}

/// Select the `n`th entry (1-based, as listed by /history) of a
/// conversation if it is a file.
pub fn attachment_at(history: &[Message], n: usize) -> Option<&FileAttachment> {
    match &history.get(n.checked_sub(1)?)?.payload {
        Payload::File(file) => Some(file),
        _ => None,
    }
}

/// MIME type from the file extension.
pub fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "txt" | "md" => "text/plain",
        "pdf" => "application/pdf",
        "json" => "application/json",
        "zip" => "application/zip",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}

pub fn render_message(peer: &PeerId, message: &Message) -> String {
    let time = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(message.timestamp)
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string());
    let who = match message.direction {
        Direction::Outbound => "me".to_string(),
        Direction::Inbound => peer.to_string(),
    };

    match &message.payload {
        Payload::File(file) => format!(
            "[{time}] {who} sent file {} ({}, {} bytes)",
            file.name, file.mime, file.size
        ),
        Payload::Text(_) | Payload::DecryptionFailed => {
            format!("[{time}] {who}: {}", message.as_text().unwrap_or_default())
        }
    }
}

pub fn render_friend(friend: &FriendSummary) -> String {
    let mut line = format!("{} [{}]", friend.id, friend.trust);
    if let Some(fingerprint) = &friend.fingerprint {
        line.push_str(&format!(" {fingerprint}"));
    }
    if friend.unread > 0 {
        line.push_str(&format!(" ({} unread)", friend.unread));
    }
    line
}

pub fn render_event(event: &SessionEvent) -> String {
    match event {
        SessionEvent::Welcome { id } => format!("Your id is {id}"),
        SessionEvent::Presence(ConnectionStatus::Connecting) => "Connecting...".to_string(),
        SessionEvent::Presence(ConnectionStatus::Online) => "Online".to_string(),
        SessionEvent::Presence(status @ ConnectionStatus::Offline { code }) => {
            if status.is_abnormal() {
                format!("Offline (connection lost, code {code:?})")
            } else {
                "Offline".to_string()
            }
        }
        SessionEvent::FriendRequest { from, has_key } => {
            if *has_key {
                format!("Friend request from {from}: /accept {from} or /reject {from}")
            } else {
                format!("Friend request from {from} without a key")
            }
        }
        SessionEvent::FriendRequestSent { to } => format!("Friend request sent to {to}"),
        SessionEvent::FriendEstablished { peer, fingerprint } => {
            format!("{peer} is now a friend (key {fingerprint})")
        }
        SessionEvent::MessageAppended { peer, message, .. } => render_message(peer, message),
        SessionEvent::TransferStarted {
            peer, name, size, ..
        } => {
            format!("Receiving {name} ({size} bytes) from {peer}")
        }
        SessionEvent::TransferFailed { peer, name, .. } => {
            format!("Transfer of {name} from {peer} failed")
        }
        SessionEvent::TypingStarted { peer } => format!("{peer} is typing..."),
        SessionEvent::TypingStopped { peer } => format!("{peer} stopped typing"),
        SessionEvent::ServerError { message } => format!("Relay: {message}"),
        SessionEvent::Error(e) => format!("Error: {e}"),
        SessionEvent::Fatal(e) => format!("Fatal: {e}. Restart the client."),
    }
}
