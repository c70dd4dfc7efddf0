//! One accepted TCP stream with line-oriented reads and writes.

use std::{
    fmt, io,
    net::SocketAddr,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
    sync::{Mutex as AsyncMutex, watch},
    time::timeout,
};
use tracing::debug;

use crate::{
    config::DEFAULT_NAME,
    error::{RelayError, Result},
};

pub type ConnectionId = u64;

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// A chat participant's transport plus its display name.
///
/// The owning session holds the only strong reference for the connection's lifetime;
/// broadcasts borrow it briefly through registry snapshots. Reads are performed by the
/// session alone, while writes may come from any session fanning out a message, so the
/// write half sits behind its own lock and every line goes out in one `write_all`.
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    name: Mutex<String>,
    reader: AsyncMutex<BufReader<OwnedReadHalf>>,
    writer: AsyncMutex<Option<OwnedWriteHalf>>,
    closed: watch::Sender<bool>,
    departed: AtomicBool,
    write_timeout: Option<Duration>,
}

impl Connection {
    pub fn new(id: ConnectionId, stream: TcpStream, peer: SocketAddr) -> Self {
        let (reader, writer) = stream.into_split();
        let (closed, _) = watch::channel(false);
        Self {
            id,
            peer,
            name: Mutex::new(DEFAULT_NAME.to_string()),
            reader: AsyncMutex::new(BufReader::new(reader)),
            writer: AsyncMutex::new(Some(writer)),
            closed,
            departed: AtomicBool::new(false),
            write_timeout: None,
        }
    }

    /// Bounds every subsequent [`write_line`](Self::write_line).
    pub fn with_write_timeout(mut self, limit: Option<Duration>) -> Self {
        self.write_timeout = limit;
        self
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn name(&self) -> String {
        self.name
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_name(&self, name: &str) {
        *self.name.lock().unwrap_or_else(PoisonError::into_inner) = name.to_string();
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Reads the next line without its terminator.
    ///
    /// Returns `Ok(None)` on end of stream and as soon as [`close`](Self::close) is called,
    /// including while a read is already pending. Bytes that are not valid UTF-8 are
    /// replaced rather than failing the read.
    pub async fn read_line(&self) -> Result<Option<String>> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Ok(None);
        }

        let mut reader = self.reader.lock().await;
        let mut buf = Vec::new();
        let read = select! {
            _ = closed.wait_for(|closed| *closed) => return Ok(None),
            read = reader.read_until(b'\n', &mut buf) => read,
        };

        match read {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(
                String::from_utf8_lossy(&buf)
                    .trim_end_matches(LINE_ENDINGS)
                    .to_string(),
            )),
            Err(err) => Err(RelayError::Read(err)),
        }
    }

    /// Writes `text` followed by a newline.
    ///
    /// Any failure, including the write timeout elapsing, closes the connection and is
    /// reported as [`RelayError::Disconnected`]; the owning session notices the close and
    /// tears itself down.
    pub async fn write_line(&self, text: &str) -> Result<()> {
        if self.is_closed() {
            return Err(RelayError::Disconnected);
        }

        let mut encoded = Vec::with_capacity(text.len() + 1);
        encoded.extend_from_slice(text.as_bytes());
        encoded.push(b'\n');

        let mut writer = self.writer.lock().await;
        if self.is_closed() {
            writer.take();
            return Err(RelayError::Disconnected);
        }
        let Some(stream) = writer.as_mut() else {
            return Err(RelayError::Disconnected);
        };

        let write = async {
            stream.write_all(&encoded).await?;
            stream.flush().await
        };
        let outcome = match self.write_timeout {
            Some(limit) => timeout(limit, write)
                .await
                .unwrap_or_else(|_| Err(io::ErrorKind::TimedOut.into())),
            None => write.await,
        };

        if let Err(err) = outcome {
            debug!(conn = self.id, peer = %self.peer, error = ?err, "write failed");
            writer.take();
            drop(writer);
            self.close();
            return Err(RelayError::Disconnected);
        }
        Ok(())
    }

    /// Releases the transport and wakes any pending read. Safe to call any number of
    /// times from any task.
    pub fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        // A write in flight keeps the half until it finishes; later writes see the flag.
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }
        debug!(conn = self.id, peer = %self.peer, "connection closed");
    }

    /// Claims the right to announce this connection's departure. Only the first caller
    /// gets `true`.
    pub(crate) fn mark_departed(&self) -> bool {
        !self.departed.swap(true, Ordering::AcqRel)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("name", &self.name())
            .field("closed", &self.is_closed())
            .finish()
    }
}
