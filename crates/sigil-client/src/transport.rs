//! Newline-delimited JSON envelopes over any byte stream.
//!
//! One background task owns the stream: it writes queued envelopes as one
//! JSON object per line and turns incoming lines into [`ChannelEvent`]s.
//!
//! Inbound events go through an unbounded queue. The session may be parked
//! on a full outbound queue, so the transport must never wait on it.

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use sigil_shared::constants::NORMAL_CLOSE_CODE;
use sigil_shared::Envelope;

use crate::channel::{ChannelEvent, EnvelopeChannel};

/// Handles to a running transport task.
pub struct Transport {
    /// Outbound half, handed to the session.
    pub channel: EnvelopeChannel,
    /// Lifecycle events and inbound frames.
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
    pub task: JoinHandle<()>,
}

/// Connect to the relay over TCP.
pub async fn connect_tcp(addr: &str, capacity: usize) -> io::Result<Transport> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    info!(addr, "Connected to relay");
    Ok(connect_json_lines(stream, capacity))
}

/// Run the JSON-lines protocol over `stream`.
pub fn connect_json_lines<S>(stream: S, capacity: usize) -> Transport
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (channel, outbound) = EnvelopeChannel::new(capacity);
    let (events_tx, events) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(stream, outbound, events_tx));

    Transport {
        channel,
        events,
        task,
    }
}

async fn run<S>(
    stream: S,
    mut outbound: mpsc::Receiver<Envelope>,
    events: mpsc::UnboundedSender<ChannelEvent>,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();

    if events.send(ChannelEvent::Opened).is_err() {
        return;
    }

    let close = loop {
        tokio::select! {
            envelope = outbound.recv() => match envelope {
                Some(envelope) => {
                    if let Err(e) = write_frame(&mut writer, &envelope).await {
                        warn!(error = %e, "Failed to write frame");
                        let _ = events.send(ChannelEvent::Failed(e.to_string()));
                        break None;
                    }
                }
                None => {
                    debug!("Envelope channel dropped, closing transport");
                    let _ = writer.shutdown().await;
                    break Some(NORMAL_CLOSE_CODE);
                }
            },

            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match Envelope::from_json(&line) {
                        Ok(envelope) => {
                            if events.send(ChannelEvent::Frame(envelope)).is_err() {
                                debug!("Event receiver dropped, closing transport");
                                break Some(NORMAL_CLOSE_CODE);
                            }
                        }
                        Err(e) => warn!(error = %e, "Skipping malformed frame"),
                    }
                }
                Ok(None) => {
                    info!("Relay closed the connection");
                    break Some(NORMAL_CLOSE_CODE);
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read frame");
                    let _ = events.send(ChannelEvent::Failed(e.to_string()));
                    break None;
                }
            },
        }
    };

    let _ = events.send(ChannelEvent::Closed { code: close });
}

async fn write_frame<W>(writer: &mut W, envelope: &Envelope) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let json = envelope
        .to_json()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}
