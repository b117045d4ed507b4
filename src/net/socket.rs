//! Shared handle to one accepted stream.
//!
//! # Responsibilities
//! - Split the stream into a single-reader half and a serialised writer half
//! - Wake pending reads and writes when the connection is closed
//! - Run close subscribers exactly once
//!
//! # Design Decisions
//! - Generic over any `AsyncRead + AsyncWrite` so in-memory pipes work in tests
//! - Bytes read past a message boundary can be pushed back with `unread`

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex as AsyncMutex};

/// Size of a single read from the underlying stream.
const READ_CHUNK_SIZE: usize = 8192;

/// How long `close` waits for an in-flight write before giving up on shutdown.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

type Reader = Box<dyn AsyncRead + Send + Unpin>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;
type CloseSubscriber = Box<dyn FnOnce() + Send>;

/// A connection shared between the read task and any number of writers.
pub struct Socket {
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    reader: AsyncMutex<Reader>,
    writer: AsyncMutex<Writer>,
    pending: Mutex<BytesMut>,
    closed: watch::Sender<bool>,
    subscribers: Mutex<Vec<CloseSubscriber>>,
}

impl Socket {
    /// Wrap an arbitrary duplex stream.
    pub fn new<S>(stream: S, local_addr: SocketAddr, remote_addr: SocketAddr) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::from_halves(Box::new(reader), Box::new(writer), local_addr, remote_addr)
    }

    /// Wrap an accepted TCP stream.
    pub fn from_tcp(stream: TcpStream) -> io::Result<Self> {
        let local_addr = stream.local_addr()?;
        let remote_addr = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();
        Ok(Self::from_halves(
            Box::new(reader),
            Box::new(writer),
            local_addr,
            remote_addr,
        ))
    }

    fn from_halves(
        reader: Reader,
        writer: Writer,
        local_addr: SocketAddr,
        remote_addr: SocketAddr,
    ) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            local_addr,
            remote_addr,
            reader: AsyncMutex::new(reader),
            writer: AsyncMutex::new(writer),
            pending: Mutex::new(BytesMut::new()),
            closed,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Read the next chunk of bytes.
    ///
    /// Returns `Ok(None)` once the peer has closed the stream or the socket
    /// was closed locally, including while the read is pending.
    pub async fn read(&self) -> io::Result<Option<Bytes>> {
        {
            let mut pending = lock(&self.pending);
            if !pending.is_empty() {
                return Ok(Some(pending.split().freeze()));
            }
        }

        if self.is_closed() {
            return Ok(None);
        }

        let mut reader = self.reader.lock().await;
        let mut buf = BytesMut::with_capacity(READ_CHUNK_SIZE);

        tokio::select! {
            result = reader.read_buf(&mut buf) => match result? {
                0 => Ok(None),
                _ => Ok(Some(buf.freeze())),
            },
            _ = wait_closed(self.closed.subscribe()) => Ok(None),
        }
    }

    /// Push bytes back so the next `read` returns them first.
    pub fn unread(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let mut pending = lock(&self.pending);
        let mut restored = BytesMut::with_capacity(bytes.len() + pending.len());
        restored.extend_from_slice(bytes);
        restored.extend_from_slice(&pending);
        *pending = restored;
    }

    /// Write all of `data` and flush it.
    ///
    /// Writes are serialised: a frame is never interleaved with another writer's bytes.
    /// Closing the socket wakes both a write in progress and writers still
    /// queued for the lock.
    pub async fn write(&self, data: &[u8]) -> io::Result<()> {
        if self.is_closed() {
            return Err(not_connected());
        }

        let write = async {
            let mut writer = self.writer.lock().await;
            writer.write_all(data).await?;
            writer.flush().await
        };

        tokio::select! {
            result = write => result,
            _ = wait_closed(self.closed.subscribe()) => Err(not_connected()),
        }
    }

    /// Close the connection.
    ///
    /// Idempotent. Pending reads and writes are woken, every `on_close`
    /// subscriber runs once and the write half is shut down.
    pub async fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }

        let subscribers = std::mem::take(&mut *lock(&self.subscribers));
        for subscriber in subscribers {
            subscriber();
        }

        match tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, self.writer.lock()).await {
            Ok(mut writer) => {
                if let Err(e) = writer.shutdown().await {
                    tracing::trace!(remote = %self.remote_addr, error = %e, "Shutdown after close failed");
                }
            }
            Err(_) => {
                tracing::debug!(remote = %self.remote_addr, "Writer busy during close, skipping shutdown");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the socket has been closed.
    pub async fn closed(&self) {
        wait_closed(self.closed.subscribe()).await;
    }

    /// Register a callback invoked once when the socket closes.
    ///
    /// Runs immediately if the socket is already closed.
    pub fn on_close<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut subscribers = lock(&self.subscribers);
        if self.is_closed() {
            drop(subscribers);
            callback();
            return;
        }
        subscribers.push(Box::new(callback));
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("local_addr", &self.local_addr)
            .field("remote_addr", &self.remote_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn wait_closed(mut closed: watch::Receiver<bool>) {
    loop {
        if *closed.borrow_and_update() {
            return;
        }
        if closed.changed().await.is_err() {
            return;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "socket is closed")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::DuplexStream;

    /// A socket backed by an in-memory pipe, plus the peer end of that pipe.
    pub(crate) fn pair(capacity: usize) -> (Arc<Socket>, DuplexStream) {
        let (local, remote) = tokio::io::duplex(capacity);
        let socket = Socket::new(
            local,
            "127.0.0.1:9000".parse().unwrap(),
            "127.0.0.1:50000".parse().unwrap(),
        );
        (Arc::new(socket), remote)
    }

    #[tokio::test]
    async fn reads_what_the_peer_writes() {
        let (socket, mut peer) = pair(1024);
        peer.write_all(b"hello").await.unwrap();

        let chunk = socket.read().await.unwrap().unwrap();
        assert_eq!(&chunk[..], b"hello");
    }

    #[tokio::test]
    async fn unread_bytes_come_back_first() {
        let (socket, mut peer) = pair(1024);
        peer.write_all(b"world").await.unwrap();
        socket.unread(b"hello ");

        let first = socket.read().await.unwrap().unwrap();
        assert_eq!(&first[..], b"hello ");
        let second = socket.read().await.unwrap().unwrap();
        assert_eq!(&second[..], b"world");
    }

    #[tokio::test]
    async fn peer_eof_reads_as_none() {
        let (socket, peer) = pair(1024);
        drop(peer);
        assert!(socket.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn close_wakes_a_pending_read() {
        let (socket, _peer) = pair(1024);
        let reader = Arc::clone(&socket);
        let pending = tokio::spawn(async move { reader.read().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        socket.close().await;

        let result = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .expect("read should be woken by close")
            .unwrap();
        assert!(result.unwrap().is_none());
    }

    #[tokio::test]
    async fn subscribers_run_exactly_once() {
        let (socket, _peer) = pair(1024);
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        socket.on_close(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        socket.close().await;
        socket.close().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let counter = Arc::clone(&calls);
        socket.on_close(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn close_wakes_writers_stuck_on_an_undrained_peer() {
        let (socket, _peer) = pair(1);

        let stuck = Arc::clone(&socket);
        let in_flight = tokio::spawn(async move { stuck.write(&[0u8; 64]).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let queued = Arc::clone(&socket);
        let waiting = tokio::spawn(async move { queued.write(b"next").await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        tokio::time::timeout(Duration::from_secs(3), socket.close())
            .await
            .expect("close should not wait on the stuck writer");

        for task in [in_flight, waiting] {
            let err = tokio::time::timeout(Duration::from_secs(1), task)
                .await
                .expect("writer should be woken by close")
                .unwrap()
                .unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        }
    }

    #[tokio::test]
    async fn write_after_close_fails() {
        let (socket, _peer) = pair(1024);
        socket.close().await;

        let err = socket.write(b"late").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }
}
