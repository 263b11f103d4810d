//! Chunked file transfer over the relay.
//!
//! The whole file is encrypted once and the armored ciphertext is sliced
//! into FILE_CHUNK frames. The receiver keeps at most one in-flight transfer
//! per sender and relies on the relay delivering chunks in order.
//!
//! Inbound transfers are bounded by `max_file_size`: an oversized FILE_START
//! is refused, and a transfer whose chunks outgrow the armored size of the
//! largest allowed file is dropped.

use std::collections::HashMap;

use bytes::Bytes;
use tracing::{debug, info, warn};
use uuid::Uuid;

use sigil_shared::{now_millis, CryptoEngine, Envelope, EnvelopeBody, PeerId};

use crate::error::{Result, SessionError};
use crate::events::SessionEvent;
use crate::registry::{Direction, FileAttachment, Message};
use crate::session::Session;

/// A file the local user wants to send.
#[derive(Debug, Clone)]
pub struct OutgoingFile {
    pub name: String,
    pub mime: String,
    pub content: Bytes,
}

impl OutgoingFile {
    pub fn new(name: impl Into<String>, mime: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            content: content.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }
}

/// Receive-side state between FILE_START and FILE_END.
#[derive(Debug, Clone)]
pub struct InFlightTransfer {
    /// Local handle carried by transfer events and logs.
    pub id: Uuid,
    pub file_name: String,
    /// Size announced in FILE_START. Informational only.
    pub declared_size: u64,
    pub mime_type: String,
    chunks: Vec<String>,
    received_bytes: usize,
}

impl InFlightTransfer {
    pub fn new(file_name: String, declared_size: u64, mime_type: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            file_name,
            declared_size,
            mime_type,
            chunks: Vec::new(),
            received_bytes: 0,
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Characters of armored ciphertext received so far.
    pub fn received_bytes(&self) -> usize {
        self.received_bytes
    }

    /// Concatenate the chunks in arrival order.
    pub fn assemble(&self) -> String {
        self.chunks.concat()
    }

    fn push(&mut self, chunk: String) {
        self.received_bytes += chunk.len();
        self.chunks.push(chunk);
    }
}

/// At most one in-flight transfer per sender.
#[derive(Debug, Default)]
pub struct TransferTable {
    transfers: HashMap<PeerId, InFlightTransfer>,
}

impl TransferTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a transfer from `peer`. Returns the transfer it replaced, if any.
    pub fn start(&mut self, peer: &PeerId, transfer: InFlightTransfer) -> Option<InFlightTransfer> {
        self.transfers.insert(peer.clone(), transfer)
    }

    /// Append a chunk and return the bytes received so far, or `None` if
    /// `peer` has no transfer in flight.
    pub fn push_chunk(&mut self, peer: &PeerId, chunk: String) -> Option<usize> {
        let transfer = self.transfers.get_mut(peer)?;
        transfer.push(chunk);
        Some(transfer.received_bytes)
    }

    /// Remove and return the transfer for `peer`.
    pub fn finish(&mut self, peer: &PeerId) -> Option<InFlightTransfer> {
        self.transfers.remove(peer)
    }

    pub fn get(&self, peer: &PeerId) -> Option<&InFlightTransfer> {
        self.transfers.get(peer)
    }

    pub fn is_active(&self, peer: &PeerId) -> bool {
        self.transfers.contains_key(peer)
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }
}

/// Slice armored text into pieces of at most `chunk_size` characters.
pub fn split_armored(text: &str, chunk_size: usize) -> Vec<&str> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::with_capacity(text.len() / chunk_size + 1);
    let mut start = 0;
    let mut count = 0;

    for (idx, _) in text.char_indices() {
        if count == chunk_size {
            chunks.push(&text[start..idx]);
            start = idx;
            count = 0;
        }
        count += 1;
    }
    if start < text.len() {
        chunks.push(&text[start..]);
    }
    chunks
}

impl<C: CryptoEngine> Session<C> {
    /// Encrypt `file` for `to` and stream it as FILE_START, FILE_CHUNK...,
    /// FILE_END. Returns the number of chunks sent.
    pub async fn send_file(&mut self, to: &PeerId, file: OutgoingFile) -> Result<usize> {
        self.ensure_usable()?;
        let recipient = self.registry.public_key(to)?;
        let size = file.size();
        if size > self.config.max_file_size {
            return Err(SessionError::FileTooLarge {
                size,
                max: self.config.max_file_size,
            });
        }

        let armored = self
            .engine
            .encrypt_and_sign(&file.content, recipient, &self.keys.private)?;
        let chunks = split_armored(&armored, self.config.chunk_size);

        info!(
            peer = %to,
            name = %file.name,
            size,
            chunks = chunks.len(),
            "Sending file"
        );

        self.channel
            .send(Envelope::to(
                to,
                EnvelopeBody::FileStart {
                    name: file.name.clone(),
                    size,
                    mime: file.mime.clone(),
                },
            ))
            .await?;

        let pacing = self.config.pacing_interval;
        for (i, chunk) in chunks.iter().enumerate() {
            self.channel
                .send(Envelope::to(
                    to,
                    EnvelopeBody::FileChunk {
                        chunk: (*chunk).to_string(),
                    },
                ))
                .await?;

            if pacing > 0 && i % pacing == 0 && !self.config.pacing_delay.is_zero() {
                tokio::time::sleep(self.config.pacing_delay).await;
            }
        }

        self.channel
            .send(Envelope::to(to, EnvelopeBody::FileEnd))
            .await?;

        let attachment = FileAttachment {
            name: file.name,
            mime: file.mime,
            size,
            content: file.content,
        };
        self.append_message(to, Message::file(Direction::Outbound, attachment, now_millis()));

        Ok(chunks.len())
    }

    /// Armored text a transfer may accumulate before it is dropped.
    fn max_inbound_armored(&self) -> usize {
        usize::try_from(self.config.max_file_size)
            .map(|max| self.engine.armored_len(max))
            .unwrap_or(usize::MAX)
    }

    pub(crate) fn on_file_start(&mut self, from: PeerId, name: String, size: u64, mime: String) {
        let transfer = InFlightTransfer::new(name, size, mime);
        let id = transfer.id;
        let name = transfer.file_name.clone();

        if size > self.config.max_file_size {
            // a refused FILE_START still ends whatever was in flight
            self.transfers.finish(&from);
            warn!(
                peer = %from,
                transfer = %id,
                size,
                max = self.config.max_file_size,
                "Refusing oversized FILE_START"
            );
            self.emit(SessionEvent::TransferFailed {
                peer: from,
                id,
                name,
            });
            return;
        }

        if let Some(replaced) = self.transfers.start(&from, transfer) {
            warn!(
                peer = %from,
                dropped = %replaced.id,
                name = %replaced.file_name,
                chunks = replaced.chunk_count(),
                "Incomplete transfer replaced by a new FILE_START"
            );
        }
        debug!(peer = %from, transfer = %id, name = %name, size, "Transfer started");
        self.emit(SessionEvent::TransferStarted {
            peer: from,
            id,
            name,
            size,
        });
    }

    pub(crate) fn on_file_chunk(&mut self, from: &PeerId, chunk: String) {
        let Some(received) = self.transfers.push_chunk(from, chunk) else {
            debug!(peer = %from, "FILE_CHUNK without a transfer in flight");
            return;
        };

        let limit = self.max_inbound_armored();
        if received <= limit {
            return;
        }
        if let Some(transfer) = self.transfers.finish(from) {
            warn!(
                peer = %from,
                transfer = %transfer.id,
                received,
                limit,
                "Transfer exceeds the file size limit, dropped"
            );
            self.emit(SessionEvent::TransferFailed {
                peer: from.clone(),
                id: transfer.id,
                name: transfer.file_name,
            });
        }
    }

    /// Reassemble and decrypt. The transfer is discarded whatever the outcome.
    pub(crate) fn on_file_end(&mut self, from: PeerId) -> Result<()> {
        let Some(transfer) = self.transfers.finish(&from) else {
            debug!(peer = %from, "FILE_END without a transfer in flight");
            return Ok(());
        };

        let armored = transfer.assemble();
        let decrypted = self.registry.public_key(&from).and_then(|key| {
            self.engine
                .decrypt_and_verify(&armored, &self.keys.private, key)
                .map_err(SessionError::from)
        });

        let content = match decrypted {
            Ok(content) => content,
            Err(e) => {
                debug!(peer = %from, transfer = %transfer.id, "Transfer failed to decrypt");
                self.emit(SessionEvent::TransferFailed {
                    peer: from,
                    id: transfer.id,
                    name: transfer.file_name,
                });
                return Err(e);
            }
        };

        if content.len() as u64 != transfer.declared_size {
            warn!(
                peer = %from,
                transfer = %transfer.id,
                declared = transfer.declared_size,
                actual = content.len(),
                "Received file size differs from FILE_START"
            );
        }
        info!(
            peer = %from,
            transfer = %transfer.id,
            name = %transfer.file_name,
            size = content.len(),
            "File received"
        );

        let attachment = FileAttachment {
            name: transfer.file_name,
            mime: transfer.mime_type,
            size: content.len() as u64,
            content: Bytes::from(content),
        };
        self.append_message(&from, Message::file(Direction::Inbound, attachment, now_millis()));
        Ok(())
    }
}
