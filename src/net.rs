//! Socket connection helpers.
//!
//! Grounded on the teacher's `server::stream`: a small `pin_project`-based
//! enum unifying TCP and Unix sockets behind one `AsyncRead`/`AsyncWrite`
//! type, and a dedicated connect function per transport. TLS is out of
//! scope (spec.md Non-goals) so there is no `native-tls` branch here.

use std::pin::Pin;
use std::task::{Context, Poll};

use log::warn;
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpStream, UnixStream};

use crate::errors::Error;
use crate::event::Clock;

/// How long a TCP/Unix connect may take before we log a warning — this time
/// is *not* charged against the connect timeout (spec.md §4.2).
const DNS_WARNING_THRESHOLD: std::time::Duration = std::time::Duration::from_millis(500);

pin_project! {
    /// A transport-agnostic socket, analogous to the teacher's `StreamInner`.
    #[project = StreamInnerProj]
    pub enum Stream {
        Tcp {
            #[pin]
            stream: TcpStream,
        },
        Unix {
            #[pin]
            stream: UnixStream,
        },
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.project() {
            StreamInnerProj::Tcp { stream } => stream.poll_read(cx, buf),
            StreamInnerProj::Unix { stream } => stream.poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.project() {
            StreamInnerProj::Tcp { stream } => stream.poll_write(cx, buf),
            StreamInnerProj::Unix { stream } => stream.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.project() {
            StreamInnerProj::Tcp { stream } => stream.poll_flush(cx),
            StreamInnerProj::Unix { stream } => stream.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.project() {
            StreamInnerProj::Tcp { stream } => stream.poll_shutdown(cx),
            StreamInnerProj::Unix { stream } => stream.poll_shutdown(cx),
        }
    }
}

impl Stream {
    /// Best-effort non-blocking write, used only for the `Terminate` message
    /// on drop (spec.md §6 `deinit`): the socket may not be writable at that
    /// moment, matching the teacher's `Drop for Server`'s own caveat about
    /// non-blocking shutdown.
    pub fn try_write(&self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Stream::Tcp { stream } => stream.try_write(buf),
            Stream::Unix { stream } => stream.try_write(buf),
        }
    }
}

/// Dial `host:port`, or a Unix socket at `<host>/.s.PGSQL.<port>` when `host`
/// starts with `/`, matching standard libpq and the teacher's
/// `create_unix_stream_inner`/`create_tcp_stream_inner` convention. Logs a
/// warning (not an error — the connect itself may still succeed) if the
/// dial takes longer than 500ms, without it counting against any timeout
/// the caller arms afterward.
pub async fn connect(host: &str, port: u16) -> Result<Stream, Error> {
    let started = Clock::now();

    let stream = if let Some(dir) = host.strip_prefix('/') {
        let path = format!("/{dir}/.s.PGSQL.{port}");
        UnixStream::connect(&path)
            .await
            .map(|stream| Stream::Unix { stream })
            .map_err(|err| Error::Io(format!("could not connect to unix socket {path}: {err}")))?
    } else {
        TcpStream::connect((host, port))
            .await
            .map(|stream| Stream::Tcp { stream })
            .map_err(|err| Error::Io(format!("could not connect to {host}:{port}: {err}")))?
    };

    let elapsed = started.elapsed();
    if elapsed > DNS_WARNING_THRESHOLD {
        warn!(
            "pgsql: DNS lookup took {}.{:03} s",
            elapsed.as_secs(),
            elapsed.subsec_millis()
        );
    }

    Ok(stream)
}
