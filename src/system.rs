//! System-wide tor service (Debian-style `/var/run/tor`).

use crate::clienv;
use crate::control::{authenticate, AuthCookie, AuthenticatedChannel, ControlEndpoint};
use crate::error::Result;
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemDaemon {
    pub socket_path: PathBuf,
    pub cookie_path: PathBuf,
}

impl Default for SystemDaemon {
    fn default() -> Self {
        Self {
            socket_path: clienv::system_socket_path(),
            cookie_path: clienv::system_cookie_path(),
        }
    }
}

impl SystemDaemon {
    pub fn new(socket_path: impl Into<PathBuf>, cookie_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            cookie_path: cookie_path.into(),
        }
    }

    /// Authenticate against the system service's control socket.
    pub async fn connect(&self) -> Result<AuthenticatedChannel> {
        debug!(
            socket = %self.socket_path.display(),
            cookie = %self.cookie_path.display(),
            "Using system tor"
        );
        let cookie = AuthCookie::read(&self.cookie_path).await?;
        authenticate(&ControlEndpoint::unix(&self.socket_path), &cookie).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn test_missing_cookie_fails_before_connecting() {
        let dir = tempfile::tempdir().unwrap();
        let system = SystemDaemon::new(dir.path().join("control"), dir.path().join("cookie"));

        let err = system.connect().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_connects_with_cookie_from_file() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::UnixListener;

        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("control");
        let cookie = dir.path().join("control.authcookie");
        std::fs::write(&cookie, [0xaa, 0x01]).unwrap();
        let listener = UnixListener::bind(&socket).unwrap();

        let server = tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = conn.read(&mut buf).await.unwrap();
            conn.write_all(b"250 OK\r\n").await.unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });

        let channel = SystemDaemon::new(&socket, &cookie).connect().await.unwrap();

        assert_eq!(channel.endpoint(), &ControlEndpoint::unix(&socket));
        assert_eq!(server.await.unwrap(), "AUTHENTICATE aa01\r\n");
    }
}
