//! Connection transport over TCP byte streams
//!
//! Every connection is split into a read side, owned by whoever drives the
//! session, and a write queue drained by a dedicated writer task. Reads hand
//! back whatever bytes are available; framing is left to the caller.

use crate::error::TransportError;
use log::{debug, error, warn};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

/// Bytes requested from the socket per read.
pub const READ_BUFFER_SIZE: usize = 1024;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    fn next() -> Self {
        ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Result of arming one read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadEvent {
    /// This many bytes were appended to the buffer.
    Data(usize),
    /// No more data will arrive on this connection.
    Closed,
}

/// Cloneable sending side of a connection.
///
/// Writes are queued and flushed in order by the connection's writer task.
#[derive(Debug, Clone)]
pub struct WriteHandle {
    id: ConnectionId,
    peer: SocketAddr,
    queue: mpsc::UnboundedSender<String>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl WriteHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Queues `data` for sending. Returns false once the connection is gone.
    pub fn write(&self, data: impl Into<String>) -> bool {
        if self.is_closed() {
            return false;
        }
        self.queue.send(data.into()).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow() || self.queue.is_closed()
    }

    /// Shuts both directions down. Safe to call more than once.
    pub fn teardown(&self) {
        if !self.shutdown.send_replace(true) {
            debug!("Tearing down connection {} to {}", self.id, self.peer);
        }
    }
}

/// Read side of a connection plus its text buffer.
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    reader: OwnedReadHalf,
    writer: WriteHandle,
    closed: watch::Receiver<bool>,
    buffer: String,
    /// Trailing bytes of a character cut in half by a read.
    partial_char: Vec<u8>,
}

impl Connection {
    fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        let id = ConnectionId::next();
        let (reader, write_half) = stream.into_split();
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, closed) = watch::channel(false);
        let shutdown = Arc::new(shutdown_tx);

        tokio::spawn(write_loop(
            write_half,
            queue_rx,
            shutdown.subscribe(),
            Arc::clone(&shutdown),
            peer,
        ));

        Connection {
            id,
            peer,
            reader,
            writer: WriteHandle {
                id,
                peer,
                queue: queue_tx,
                shutdown,
            },
            closed,
            buffer: String::new(),
            partial_char: Vec::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// A handle that can write to this connection from anywhere.
    pub fn writer(&self) -> WriteHandle {
        self.writer.clone()
    }

    /// Text received so far and not yet consumed by the caller.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut String {
        &mut self.buffer
    }

    pub fn is_torn_down(&self) -> bool {
        *self.closed.borrow()
    }

    /// Waits for one chunk of bytes and appends it to the buffer.
    ///
    /// Zero bytes mean the peer closed the stream; that and any read error
    /// tear the connection down.
    pub async fn request_more(&mut self) -> ReadEvent {
        if self.is_torn_down() {
            return ReadEvent::Closed;
        }

        let mut chunk = [0u8; READ_BUFFER_SIZE];
        let result = tokio::select! {
            result = self.reader.read(&mut chunk) => result,
            _ = self.closed.changed() => return ReadEvent::Closed,
        };

        match result {
            Ok(0) => {
                debug!("Connection {} closed by {}", self.id, self.peer);
                self.teardown();
                ReadEvent::Closed
            }
            Ok(len) => {
                append_utf8(&mut self.buffer, &mut self.partial_char, &chunk[..len]);
                ReadEvent::Data(len)
            }
            Err(source) => {
                let err = TransportError::Io {
                    peer: self.peer,
                    source,
                };
                warn!("Read failed on connection {}: {}", self.id, err);
                self.teardown();
                ReadEvent::Closed
            }
        }
    }

    /// Queues `data` for sending. Does nothing after teardown.
    pub fn write(&self, data: impl Into<String>) -> bool {
        self.writer.write(data)
    }

    pub fn teardown(&mut self) {
        self.writer.teardown();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.writer.teardown();
    }
}

/// Drains the write queue until teardown or a write fails.
async fn write_loop(
    mut half: OwnedWriteHalf,
    mut queue: mpsc::UnboundedReceiver<String>,
    mut closed: watch::Receiver<bool>,
    shutdown: Arc<watch::Sender<bool>>,
    peer: SocketAddr,
) {
    loop {
        if *closed.borrow() {
            break;
        }

        tokio::select! {
            biased;

            data = queue.recv() => {
                let Some(data) = data else { break };
                // write_all keeps going after partial writes
                if let Err(source) = half.write_all(data.as_bytes()).await {
                    let err = TransportError::Io { peer, source };
                    warn!("Write failed, dropping connection: {}", err);
                    shutdown.send_replace(true);
                    break;
                }
            }
            changed = closed.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    queue.close();
    if let Err(e) = half.shutdown().await {
        debug!("Shutdown of write half to {} failed: {}", peer, e);
    }
}

/// Appends `bytes` to `buffer`, holding back an incomplete trailing character.
fn append_utf8(buffer: &mut String, partial: &mut Vec<u8>, bytes: &[u8]) {
    partial.extend_from_slice(bytes);

    let valid = match std::str::from_utf8(partial) {
        Ok(text) => {
            buffer.push_str(text);
            partial.len()
        }
        Err(e) => {
            let valid = e.valid_up_to();
            buffer.push_str(&String::from_utf8_lossy(&partial[..valid]));
            match e.error_len() {
                // Invalid sequence in the middle: keep the session alive with a replacement.
                Some(bad) => {
                    buffer.push(char::REPLACEMENT_CHARACTER);
                    let consumed = valid + bad;
                    let rest = partial[consumed..].to_vec();
                    partial.clear();
                    append_utf8(buffer, partial, &rest);
                    return;
                }
                None => valid,
            }
        }
    };
    partial.drain(..valid);
}

/// Opens an outbound connection.
pub async fn connect(addr: &str) -> Result<Connection, TransportError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|source| TransportError::Connect {
            addr: addr.to_string(),
            source,
        })?;
    let peer = stream.peer_addr().map_err(|source| TransportError::Connect {
        addr: addr.to_string(),
        source,
    })?;
    Ok(Connection::new(stream, peer))
}

pub async fn bind(addr: &str) -> Result<TcpListener, TransportError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        })
}

/// Accepts connections forever, running `handler` on its own task for each.
///
/// Accepting never reads from the new connection; the handler decides when
/// to call [`Connection::request_more`]. Accept failures are logged and the
/// loop keeps going.
pub async fn accept_loop<F, Fut>(listener: TcpListener, handler: F)
where
    F: Fn(Connection) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Could not disable Nagle for {}: {}", peer, e);
                }
                let connection = Connection::new(stream, peer);
                debug!("Accepted connection {} from {}", connection.id(), peer);
                tokio::spawn(handler(connection));
            }
            Err(e) => {
                error!("Error accepting connection: {}", e);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
}
