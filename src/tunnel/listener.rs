// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt;
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};

/// Where a tunnel accepts clients: a TCP address or a Unix socket path.
///
/// Anything shaped like `host:port` is a TCP listen address; everything
/// else is treated as a filesystem path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindAddr {
    Tcp(String),
    Unix(PathBuf),
}

impl BindAddr {
    pub fn classify(s: &str) -> Self {
        if let Some((host, port)) = s.rsplit_once(':') {
            if !host.is_empty() && !host.contains('/') && port.parse::<u16>().is_ok() {
                return Self::Tcp(s.to_string());
            }
        }
        Self::Unix(PathBuf::from(s))
    }
}

impl fmt::Display for BindAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => f.write_str(addr),
            Self::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Listener with an explicit closed flag, so the accept loop can tell an
/// intentional shutdown from a failing socket.
pub struct ClosableListener {
    kind: ListenerKind,
    closed: AtomicBool,
}

enum ListenerKind {
    Tcp(TcpListener),
    Unix(UnixListener),
}

impl ClosableListener {
    /// Bind on `addr`. For Unix sockets a stale socket file is removed
    /// first and missing parent directories are created with mode 0700.
    pub async fn bind(addr: &BindAddr) -> io::Result<Self> {
        let kind = match addr {
            BindAddr::Tcp(addr) => ListenerKind::Tcp(TcpListener::bind(addr.as_str()).await?),
            BindAddr::Unix(path) => {
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
                create_socket_dir(path)?;
                ListenerKind::Unix(UnixListener::bind(path)?)
            }
        };
        Ok(Self {
            kind,
            closed: AtomicBool::new(false),
        })
    }

    /// Accept one client. Returns the stream and a label for the peer.
    pub async fn accept(&self) -> io::Result<(ClientStream, String)> {
        match &self.kind {
            ListenerKind::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                Ok((ClientStream::Tcp(stream), peer.to_string()))
            }
            ListenerKind::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok((ClientStream::Unix(stream), "unix".to_string()))
            }
        }
    }

    /// Mark the listener closed. Idempotent; the socket itself is released
    /// when the listener is dropped.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

fn create_socket_dir(path: &Path) -> io::Result<()> {
    let Some(dir) = path.parent() else {
        return Ok(());
    };
    if dir.as_os_str().is_empty() || dir.exists() {
        return Ok(());
    }
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)
}

/// An accepted client connection, TCP or Unix.
pub enum ClientStream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl AsyncRead for ClientStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ClientStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            Self::Unix(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_host_port_as_tcp() {
        assert_eq!(
            BindAddr::classify("127.0.0.1:5432"),
            BindAddr::Tcp("127.0.0.1:5432".to_string())
        );
        assert_eq!(
            BindAddr::classify("localhost:17007"),
            BindAddr::Tcp("localhost:17007".to_string())
        );
    }

    #[test]
    fn classify_paths_as_unix() {
        assert_eq!(
            BindAddr::classify("/tmp/metrics.sock"),
            BindAddr::Unix(PathBuf::from("/tmp/metrics.sock"))
        );
        assert_eq!(
            BindAddr::classify("relative/path.sock"),
            BindAddr::Unix(PathBuf::from("relative/path.sock"))
        );
        // a path with a colon but no valid port stays a path
        assert_eq!(
            BindAddr::classify("/tmp/odd:name"),
            BindAddr::Unix(PathBuf::from("/tmp/odd:name"))
        );
    }

    #[tokio::test]
    async fn bind_replaces_stale_unix_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.sock");
        std::fs::write(&path, "stale").unwrap();

        let addr = BindAddr::Unix(path.clone());
        let listener = ClosableListener::bind(&addr).await.unwrap();
        assert!(!listener.is_closed());

        // the stale regular file was replaced by a socket we can connect to
        let _client = UnixStream::connect(&path).await.unwrap();
    }

    #[tokio::test]
    async fn bind_creates_parent_directories_with_mode_0700() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("t.sock");
        let addr = BindAddr::Unix(path.clone());
        let _listener = ClosableListener::bind(&addr).await.unwrap();

        let mode = std::fs::metadata(path.parent().unwrap())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_observable() {
        let addr = BindAddr::Tcp("127.0.0.1:0".to_string());
        let listener = ClosableListener::bind(&addr).await.unwrap();
        assert!(!listener.is_closed());
        listener.close();
        listener.close();
        assert!(listener.is_closed());
    }
}
