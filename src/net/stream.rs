use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::os::unix::io::{AsRawFd, RawFd};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

use crate::error::Error;
use crate::rt::io::watcher::Watcher;
use crate::rt::scheduler;
use crate::rt::slot::Slot;

/// The wire under a [`Stream`]: a plain TCP connection, or TLS over one.
enum Transport {
    Tcp(TcpStream),
    #[cfg(feature = "tls")]
    Tls(native_tls::TlsStream<TcpStream>),
}

impl Transport {
    /// The underlying TCP socket, for fd access and blocking-mode control.
    fn socket(&self) -> &TcpStream {
        match self {
            Transport::Tcp(stream) => stream,
            #[cfg(feature = "tls")]
            Transport::Tls(stream) => stream.get_ref(),
        }
    }
}

struct Inner {
    /// Cached so the watcher-map key survives the transport being closed.
    fd: RawFd,
    /// `None` once the stream has been closed.
    transport: RefCell<Option<Transport>>,
}

/// A request/response byte stream between this process and a remote peer.
///
/// Connecting blocks the calling thread (including name resolution and, for
/// TLS, the handshake); callers needing a non-blocking connect must layer it
/// above this type. Once connected, [`Stream::write_all`] and
/// [`Stream::read_all`] suspend the calling task and move bytes from the
/// scheduler's tick, at most [`IO_CHUNK`] per direction per tick.
///
/// A stream is owned by its watcher while an operation is in flight, and the
/// scheduler closes it on read completion, failure, or cancellation; user
/// code must not close a stream that is currently being watched. Handles are
/// cheap to clone and all clones observe the same socket.
///
/// [`IO_CHUNK`]: crate::rt::io::IO_CHUNK
#[derive(Clone)]
pub struct Stream {
    inner: Rc<Inner>,
}

impl Stream {
    /// Opens a TCP connection to `host:port`, blocking for at most `timeout`
    /// per resolved address. A zero timeout means no bound.
    ///
    /// If the host resolves to multiple addresses, each is attempted in
    /// order and the error from the last attempt is returned if none
    /// succeeds.
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, Error> {
        let socket = connect_socket(host, port, timeout)?;
        Ok(Stream::from_transport(Transport::Tcp(socket)))
    }

    /// Opens a TLS connection to `host:port`, blocking through the TCP
    /// connect and the handshake.
    ///
    /// With `verify` set, the peer certificate and peer name are verified
    /// and self-signed certificates are rejected; unset disables all of
    /// that.
    #[cfg(feature = "tls")]
    pub fn connect_tls(
        host: &str,
        port: u16,
        timeout: Duration,
        verify: bool,
    ) -> Result<Self, Error> {
        let socket = connect_socket(host, port, timeout)?;

        let connector = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(!verify)
            .danger_accept_invalid_hostnames(!verify)
            .build()
            .map_err(|e| Error::ConnectFailed(format!("TLS setup: {e}")))?;

        let stream = connector
            .connect(host, socket)
            .map_err(|e| Error::ConnectFailed(format!("TLS handshake with {host}: {e}")))?;

        Ok(Stream::from_transport(Transport::Tls(stream)))
    }

    fn from_transport(transport: Transport) -> Self {
        let fd = transport.socket().as_raw_fd();

        Stream {
            inner: Rc::new(Inner {
                fd,
                transport: RefCell::new(Some(transport)),
            }),
        }
    }

    /// Delivers all of `data` to the stream, suspending the calling task
    /// until the last byte is written.
    ///
    /// Empty data resolves immediately without suspending. On OS failure
    /// the stream is closed and the failure is raised at this suspension
    /// point; on success the stream stays open for the next operation.
    pub fn write_all(&self, data: Vec<u8>) -> WriteAll {
        WriteAll {
            stream: self.clone(),
            data: Some(data),
            slot: Slot::new(),
            registered: false,
        }
    }

    /// Reads the stream to EOF, suspending the calling task and resolving
    /// with all accumulated bytes. The stream is closed on completion.
    ///
    /// `max_bytes` must be positive; accumulating more than `max_bytes`
    /// fails the read with "Response too large" before completion.
    pub fn read_all(&self, max_bytes: usize) -> ReadAll {
        ReadAll {
            stream: self.clone(),
            max_bytes,
            slot: Slot::new(),
            registered: false,
        }
    }

    /// Whether the stream has been closed (by the scheduler or a peer
    /// failure).
    pub fn is_closed(&self) -> bool {
        self.inner.transport.borrow().is_none()
    }

    /// The stream's descriptor; stable across close so watcher-map keys
    /// stay meaningful.
    pub(crate) fn fd(&self) -> RawFd {
        self.inner.fd
    }

    /// Shuts the connection down and drops the transport. OS-level shutdown
    /// failures are suppressed; closing twice is a no-op.
    pub(crate) fn close(&self) {
        if let Some(transport) = self.inner.transport.borrow_mut().take() {
            match transport {
                Transport::Tcp(socket) => {
                    let _ = socket.shutdown(Shutdown::Both);
                }
                #[cfg(feature = "tls")]
                Transport::Tls(mut stream) => {
                    let _ = stream.shutdown();
                }
            }
        }
    }

    /// Switches the socket to non-blocking mode, as required before a
    /// watcher is installed.
    pub(crate) fn set_nonblocking(&self) -> io::Result<()> {
        match &*self.inner.transport.borrow() {
            Some(transport) => transport.socket().set_nonblocking(true),
            None => Err(closed()),
        }
    }

    /// Attempts one write on the transport.
    pub(crate) fn write(&self, buf: &[u8]) -> io::Result<usize> {
        match &mut *self.inner.transport.borrow_mut() {
            Some(Transport::Tcp(socket)) => socket.write(buf),
            #[cfg(feature = "tls")]
            Some(Transport::Tls(stream)) => stream.write(buf),
            None => Err(closed()),
        }
    }

    /// Attempts one read on the transport. `Ok(0)` is EOF.
    pub(crate) fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut *self.inner.transport.borrow_mut() {
            Some(Transport::Tcp(socket)) => socket.read(buf),
            #[cfg(feature = "tls")]
            Some(Transport::Tls(stream)) => stream.read(buf),
            None => Err(closed()),
        }
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("fd", &self.inner.fd)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "stream closed")
}

/// Blocking TCP connect with per-address timeout. Name resolution blocks.
fn connect_socket(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, Error> {
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|e| Error::ConnectFailed(format!("{host}:{port}: {e}")))?;

    let mut last_err = None;
    for addr in addrs {
        let attempt = if timeout.is_zero() {
            TcpStream::connect(addr)
        } else {
            TcpStream::connect_timeout(&addr, timeout)
        };

        match attempt {
            Ok(socket) => return Ok(socket),
            Err(e) => last_err = Some(e),
        }
    }

    Err(Error::ConnectFailed(match last_err {
        Some(e) => format!("{host}:{port}: {e}"),
        None => format!("{host}:{port}: no addresses resolved"),
    }))
}

/// Future returned by [`Stream::write_all`].
#[derive(Debug)]
pub struct WriteAll {
    stream: Stream,
    /// Taken when the watcher is installed.
    data: Option<Vec<u8>>,
    slot: Slot<()>,
    registered: bool,
}

impl Future for WriteAll {
    type Output = Result<(), Error>;

    fn poll(mut self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Self::Output> {
        let Some((scheduler, current)) = scheduler::context() else {
            return Poll::Ready(Err(Error::bug("write called outside of a task")));
        };

        if let Some(error) = current.take_throw() {
            return Poll::Ready(Err(error));
        }

        if let Some(result) = self.slot.take() {
            return Poll::Ready(result);
        }

        if !self.registered {
            let data = self.data.take().unwrap_or_default();
            if data.is_empty() {
                // Writing nothing is a no-op.
                return Poll::Ready(Ok(()));
            }

            if self.stream.is_closed() {
                return Poll::Ready(Err(Error::bug("write on a closed stream")));
            }
            if let Err(e) = self.stream.set_nonblocking() {
                return Poll::Ready(Err(Error::WriteFailed(e.to_string())));
            }

            let watcher = Watcher::new(self.stream.clone(), current.id, data, 0, self.slot.clone());
            if let Err(e) = scheduler.watch_write(watcher) {
                return Poll::Ready(Err(e));
            }

            self.registered = true;
        }

        Poll::Pending
    }
}

/// Future returned by [`Stream::read_all`].
#[derive(Debug)]
pub struct ReadAll {
    stream: Stream,
    max_bytes: usize,
    slot: Slot<Vec<u8>>,
    registered: bool,
}

impl Future for ReadAll {
    type Output = Result<Vec<u8>, Error>;

    fn poll(mut self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Self::Output> {
        let Some((scheduler, current)) = scheduler::context() else {
            return Poll::Ready(Err(Error::bug("read_all called outside of a task")));
        };

        if let Some(error) = current.take_throw() {
            return Poll::Ready(Err(error));
        }

        if let Some(result) = self.slot.take() {
            return Poll::Ready(result);
        }

        if !self.registered {
            if self.max_bytes == 0 {
                return Poll::Ready(Err(Error::bug("read_all requires a positive byte cap")));
            }

            if self.stream.is_closed() {
                return Poll::Ready(Err(Error::bug("read on a closed stream")));
            }
            if let Err(e) = self.stream.set_nonblocking() {
                return Poll::Ready(Err(Error::ReadFailed(e.to_string())));
            }

            let watcher = Watcher::new(
                self.stream.clone(),
                current.id,
                Vec::new(),
                self.max_bytes,
                self.slot.clone(),
            );
            if let Err(e) = scheduler.watch_read(watcher) {
                return Poll::Ready(Err(e));
            }

            self.registered = true;
        }

        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use super::*;
    use crate::rt::Runtime;

    /// Local listener plus a thread acting as the remote peer.
    fn with_peer<F>(peer: F) -> Stream
    where
        F: FnOnce(TcpStream) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("local addr");

        thread::spawn(move || {
            let (socket, _) = listener.accept().expect("accept");
            peer(socket);
        });

        Stream::connect(&addr.ip().to_string(), addr.port(), Duration::from_secs(5))
            .expect("connect")
    }

    #[test]
    fn write_all_delivers_every_byte() {
        let payload = vec![0xabu8; 100_000];
        let expected = payload.clone();

        let (echo_tx, echo_rx) = std::sync::mpsc::channel();
        let stream = with_peer(move |mut socket| {
            let mut received = Vec::new();
            socket.read_to_end(&mut received).expect("peer read");
            echo_tx.send(received).expect("send");
        });

        let rt = Runtime::new();
        rt.block_on(async move {
            stream.write_all(payload).await?;
            stream.close();
            Ok(())
        })
        .unwrap();

        assert_eq!(echo_rx.recv().expect("peer result"), expected);
    }

    #[test]
    fn read_all_accumulates_to_eof_and_closes() {
        let stream = with_peer(|mut socket| {
            socket.write_all(b"hello from the peer").expect("peer write");
            // Dropping the socket delivers EOF.
        });

        let rt = Runtime::new();
        let probe = stream.clone();
        let body = rt
            .block_on(async move { stream.read_all(1 << 20).await })
            .unwrap();

        assert_eq!(body, b"hello from the peer");
        assert!(probe.is_closed());
    }

    #[test]
    fn read_all_enforces_the_byte_cap() {
        let stream = with_peer(|mut socket| {
            socket.write_all(b"hello").expect("peer write");
        });

        let rt = Runtime::new();
        let probe = stream.clone();
        let out = rt.block_on(async move { stream.read_all(3).await });

        assert_eq!(out, Err(Error::ResponseTooLarge));
        assert!(probe.is_closed());
    }

    #[test]
    fn zero_cap_is_a_caller_bug() {
        let stream = with_peer(|_socket| {});

        let rt = Runtime::new();
        let out = rt.block_on(async move { stream.read_all(0).await });

        assert!(matches!(out, Err(Error::CallerBug(_))));
    }

    #[test]
    fn empty_write_is_a_noop() {
        let stream = with_peer(|mut socket| {
            let mut buf = Vec::new();
            let _ = socket.read_to_end(&mut buf);
        });

        let rt = Runtime::new();
        let probe = stream.clone();
        rt.block_on(async move { stream.write_all(Vec::new()).await })
            .unwrap();

        assert!(!probe.is_closed());
        probe.close();
    }

    #[test]
    fn write_then_read_round_trip() {
        let stream = with_peer(|mut socket| {
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).expect("peer read");
            assert_eq!(&buf, b"ping");
            socket.write_all(b"pong").expect("peer write");
        });

        let rt = Runtime::new();
        let body = rt
            .block_on(async move {
                stream.write_all(b"ping".to_vec()).await?;
                stream.read_all(1024).await
            })
            .unwrap();

        assert_eq!(body, b"pong");
    }
}
