//! Byte-stream bridge driving an endpoint with tokio.
//!
//! Outbound: the endpoint hands raw strings to [`SocketBridge`], which queues
//! them for a writer task that frames and writes them in order.
//!
//! Inbound: [`pump`] reads frames and feeds them either straight to an
//! endpoint's `listener` (host role) or through a [`BridgeHook`] together
//! with the peer handle (embedded role).
//!
//! Endpoints are `!Send`, so `pump` must run on the endpoint's thread,
//! typically inside a `tokio::task::LocalSet`. The writer task is `Send`.

use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::net::UnixStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::endpoint::InvokeEndpoint;
use crate::error::InvokeError;
use crate::ipc::framing::{read_message, write_message};
use crate::transport::{BridgeHook, EmbeddedBridge, HostBridge, PeerHandle};

/// Transport that queues raw messages for a stream writer task.
///
/// Implements both role primitives, so the same type serves as the host's
/// bridge and as the peer handle given to an embedded endpoint.
#[derive(Debug, Clone)]
pub struct SocketBridge {
    outbound: UnboundedSender<String>,
}

impl SocketBridge {
    /// Spawn the writer task for `writer` and return the bridge feeding it.
    ///
    /// The task ends once every clone of the bridge is dropped, or on the
    /// first write error.
    pub fn spawn<W>(writer: W) -> (Self, JoinHandle<Result<()>>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound, queue) = mpsc::unbounded_channel();
        let handle = tokio::spawn(writer_loop(writer, queue));
        (Self { outbound }, handle)
    }

    /// Whether the writer task is still accepting messages.
    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }

    fn queue(&self, raw: &str) -> Result<()> {
        self.outbound
            .send(raw.to_string())
            .map_err(|_| anyhow!("Bridge writer has stopped"))
    }
}

impl HostBridge for SocketBridge {
    fn send_to_peer(&self, raw: &str) -> Result<()> {
        self.queue(raw)
    }
}

impl EmbeddedBridge for SocketBridge {
    fn send(&self, raw: &str) -> Result<()> {
        self.queue(raw)
    }
}

async fn writer_loop<W>(mut writer: W, mut queue: UnboundedReceiver<String>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(raw) = queue.recv().await {
        write_message(&mut writer, &raw).await?;
    }
    debug!("Bridge writer queue closed");
    Ok(())
}

/// Destination for inbound frames.
pub enum Inbound<'a> {
    /// Deliver directly to a connected endpoint.
    Endpoint(&'a InvokeEndpoint),
    /// Deliver through the bootstrap hook, offering `peer` on every frame.
    Hook {
        hook: &'a BridgeHook,
        peer: PeerHandle,
    },
}

/// Read frames from `reader` until the stream ends, returning how many
/// messages were delivered.
///
/// A call to a command with no handler fails only that frame: it is logged
/// and skipped, and the caller's entry on the other side stays pending.
///
/// # Errors
///
/// Returns an error if reading or framing fails.
pub async fn pump<R>(reader: &mut R, inbound: Inbound<'_>) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut delivered = 0;

    while let Some(raw) = read_message(reader).await? {
        let processed = match &inbound {
            Inbound::Endpoint(endpoint) => endpoint.listener(&raw),
            Inbound::Hook { hook, peer } => hook.deliver(&raw, Some(peer.clone())),
        };
        match processed {
            Ok(()) => delivered += 1,
            Err(InvokeError::UnknownCommand(command)) => {
                warn!(command = %command, "Skipping call to undefined command");
            }
            Err(err) => return Err(err).context("Inbound message processing failed"),
        }
    }

    debug!(delivered, "Bridge stream closed");
    Ok(delivered)
}

/// Convenience: wrap a [`SocketBridge`] as an embedded peer handle.
pub fn peer_handle(bridge: &SocketBridge) -> PeerHandle {
    Rc::new(bridge.clone())
}

/// Connect to a bridge socket with exponential backoff.
///
/// Retries with delays of 100ms, 200ms, 400ms, etc.
///
/// # Errors
///
/// Returns the last connection error if all attempts fail.
pub async fn connect_with_retry(socket_path: &Path, max_attempts: u32) -> Result<UnixStream> {
    let mut last_error = None;

    for attempt in 1..=max_attempts.max(1) {
        match UnixStream::connect(socket_path).await {
            Ok(stream) => {
                info!("Connected to bridge socket {}", socket_path.display());
                return Ok(stream);
            }
            Err(e) => {
                debug!(attempt, "Bridge socket not ready: {}", e);
                last_error = Some(e);
                if attempt < max_attempts {
                    let delay = Duration::from_millis(100 * (1 << (attempt - 1)));
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    Err(anyhow!(
        "Failed to connect to {}: {}",
        socket_path.display(),
        last_error.map(|e| e.to_string()).unwrap_or_default()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{CallId, Message};
    use serde_json::json;
    use tokio::io::{duplex, AsyncWriteExt, BufReader};
    use tokio::task::LocalSet;
    use tokio::time::timeout;

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_bridge_frames_queued_messages() {
        let (writer, reader) = duplex(64 * 1024);
        let (bridge, writer_task) = SocketBridge::spawn(writer);

        bridge.send_to_peer("one").unwrap();
        EmbeddedBridge::send(&bridge, "two").unwrap();
        drop(bridge);

        timeout(TEST_TIMEOUT, writer_task)
            .await
            .expect("Test timed out")
            .expect("Writer panicked")
            .expect("Writer failed");

        let mut reader = BufReader::new(reader);
        assert_eq!(read_message(&mut reader).await.unwrap().as_deref(), Some("one"));
        assert_eq!(read_message(&mut reader).await.unwrap().as_deref(), Some("two"));
        assert_eq!(read_message(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_pump_feeds_host_endpoint() {
        LocalSet::new()
            .run_until(async {
                let (outbound_writer, _outbound_reader) = duplex(64 * 1024);
                let (bridge, _writer_task) = SocketBridge::spawn(outbound_writer);
                let endpoint = InvokeEndpoint::host(Rc::new(bridge));

                let fired = Rc::new(std::cell::Cell::new(false));
                let flag = fired.clone();
                let id = endpoint
                    .bind("ping")
                    .unwrap()
                    .call_with(vec![], move |_| flag.set(true));

                let (mut inbound_writer, inbound_reader) = duplex(64 * 1024);
                let reply = Message::reply("ping", id, vec![json!("pong")]);
                write_message(&mut inbound_writer, &reply.encode().unwrap())
                    .await
                    .unwrap();
                drop(inbound_writer);

                let mut reader = BufReader::new(inbound_reader);
                let delivered = timeout(
                    TEST_TIMEOUT,
                    pump(&mut reader, Inbound::Endpoint(&endpoint)),
                )
                .await
                .expect("Test timed out")
                .expect("Pump failed");

                assert_eq!(delivered, 1);
                assert!(fired.get());
            })
            .await;
    }

    #[tokio::test]
    async fn test_pump_skips_unknown_command() {
        LocalSet::new()
            .run_until(async {
                let (outbound_writer, outbound_reader) = duplex(64 * 1024);
                let (bridge, _writer_task) = SocketBridge::spawn(outbound_writer);
                let endpoint = InvokeEndpoint::host(Rc::new(bridge));

                let pings = Rc::new(std::cell::Cell::new(0));
                let counter = pings.clone();
                endpoint
                    .define("ping", move |_, reply| {
                        counter.set(counter.get() + 1);
                        reply.send(vec![json!("pong")]);
                    })
                    .unwrap();

                let (mut inbound_writer, inbound_reader) = duplex(64 * 1024);
                for raw in [r#"{"command":"typo","id":1}"#, r#"{"command":"ping","id":2}"#] {
                    write_message(&mut inbound_writer, raw).await.unwrap();
                }
                drop(inbound_writer);

                let mut reader = BufReader::new(inbound_reader);
                let delivered = timeout(
                    TEST_TIMEOUT,
                    pump(&mut reader, Inbound::Endpoint(&endpoint)),
                )
                .await
                .expect("Test timed out")
                .expect("Pump failed");

                assert_eq!(delivered, 1);
                assert_eq!(pings.get(), 1);

                let mut replies = BufReader::new(outbound_reader);
                let raw = timeout(TEST_TIMEOUT, read_message(&mut replies))
                    .await
                    .expect("Test timed out")
                    .unwrap()
                    .expect("Missing reply");
                assert_eq!(
                    Message::decode(&raw).unwrap(),
                    Message::reply("ping", CallId::from(2), vec![json!("pong")])
                );
            })
            .await;
    }

    #[tokio::test]
    async fn test_pump_fails_on_broken_frame() {
        LocalSet::new()
            .run_until(async {
                let (outbound_writer, _outbound_reader) = duplex(64 * 1024);
                let (bridge, _writer_task) = SocketBridge::spawn(outbound_writer);
                let endpoint = InvokeEndpoint::host(Rc::new(bridge));

                let (mut inbound_writer, inbound_reader) = duplex(64 * 1024);
                inbound_writer
                    .write_all(b"Content-Length: 40\r\n\r\n{")
                    .await
                    .unwrap();
                drop(inbound_writer);

                let mut reader = BufReader::new(inbound_reader);
                let result = pump(&mut reader, Inbound::Endpoint(&endpoint)).await;
                assert!(result.is_err());
            })
            .await;
    }

    #[tokio::test]
    async fn test_connect_with_retry_gives_up() {
        let path = std::env::temp_dir().join(format!(
            "invoke-bridge-missing-{}.sock",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        let result = connect_with_retry(&path, 2).await;
        assert!(result.is_err());
    }
}
