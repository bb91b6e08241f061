//! Tor control port handshake
//!
//! Opens the control connection tor published and performs cookie
//! authentication. Nothing beyond `AUTHENTICATE` is spoken here; the
//! authenticated stream is handed back to the caller as is.

use crate::error::{Result, TorError};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::str::FromStr;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Status code tor prefixes a successful reply with
const SUCCESS_STATUS: &str = "250";

/// Where tor accepts control connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEndpoint {
    Tcp { host: String, port: u16 },
    Unix { path: PathBuf },
}

impl ControlEndpoint {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Self::Unix { path: path.into() }
    }

    pub fn port(&self) -> Option<u16> {
        match self {
            Self::Tcp { port, .. } => Some(*port),
            Self::Unix { .. } => None,
        }
    }

    /// Parse one line of a `ControlPortWriteToFile` file.
    ///
    /// Accepts `PORT=<host>:<port>`, `UNIX_PORT=<path>` or a bare
    /// `<host>:<port>`.
    fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();

        if let Some(path) = line.strip_prefix("UNIX_PORT=") {
            let path = path.trim();
            return (!path.is_empty()).then(|| Self::unix(path));
        }

        let addr = line.strip_prefix("PORT=").unwrap_or(line);
        let (host, port) = addr.rsplit_once(':')?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let port: u16 = port.parse().ok()?;

        if host.is_empty() || port == 0 {
            return None;
        }
        Some(Self::tcp(host, port))
    }
}

impl FromStr for ControlEndpoint {
    type Err = TorError;

    fn from_str(s: &str) -> Result<Self> {
        s.lines()
            .find_map(Self::parse_line)
            .ok_or_else(|| TorError::Config(format!("unrecognised control port descriptor: {:?}", s.trim())))
    }
}

impl fmt::Display for ControlEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } if host.contains(':') => write!(f, "[{}]:{}", host, port),
            Self::Tcp { host, port } => write!(f, "{}:{}", host, port),
            Self::Unix { path } => write!(f, "unix:{}", path.display()),
        }
    }
}

/// Secret tor writes next to its state; the content is never logged.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthCookie(Vec<u8>);

impl AuthCookie {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub async fn read(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        Ok(Self(bytes))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Debug for AuthCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthCookie(<{} bytes>)", self.0.len())
    }
}

/// The line sent to authenticate with `cookie`.
pub fn authenticate_command(cookie: &AuthCookie) -> String {
    format!("AUTHENTICATE {}\r\n", cookie.to_hex())
}

/// Transport to a control endpoint.
#[derive(Debug)]
pub enum ControlStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
}

impl ControlStream {
    pub async fn connect(endpoint: &ControlEndpoint) -> Result<Self> {
        debug!("Connecting to tor control port: {}", endpoint);

        match endpoint {
            ControlEndpoint::Tcp { host, port } => TcpStream::connect((host.as_str(), *port))
                .await
                .map(Self::Tcp)
                .map_err(|e| TorError::connection_failed(endpoint, e)),
            #[cfg(unix)]
            ControlEndpoint::Unix { path } => tokio::net::UnixStream::connect(path)
                .await
                .map(Self::Unix)
                .map_err(|e| TorError::connection_failed(endpoint, e)),
            #[cfg(not(unix))]
            ControlEndpoint::Unix { .. } => Err(TorError::connection_failed(
                endpoint,
                "unix sockets are not supported on this platform",
            )),
        }
    }
}

impl AsyncRead for ControlStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ControlStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// A control connection that has passed `AUTHENTICATE`.
#[derive(Debug)]
pub struct AuthenticatedChannel {
    endpoint: ControlEndpoint,
    stream: ControlStream,
}

impl AuthenticatedChannel {
    pub fn endpoint(&self) -> &ControlEndpoint {
        &self.endpoint
    }

    pub fn stream_mut(&mut self) -> &mut ControlStream {
        &mut self.stream
    }

    pub fn into_stream(self) -> ControlStream {
        self.stream
    }
}

/// Connect to `endpoint` and authenticate with `cookie`.
pub async fn authenticate(
    endpoint: &ControlEndpoint,
    cookie: &AuthCookie,
) -> Result<AuthenticatedChannel> {
    let mut stream = ControlStream::connect(endpoint).await?;
    handshake(&mut stream, endpoint, cookie).await?;
    info!("Authenticated with tor at {}", endpoint);

    Ok(AuthenticatedChannel {
        endpoint: endpoint.clone(),
        stream,
    })
}

/// Send `AUTHENTICATE` and classify the first thing that comes back.
///
/// A single read settles the attempt: data, end of stream (close) or an I/O
/// error, whichever tor produces first.
pub(crate) async fn handshake<S>(
    stream: &mut S,
    endpoint: &ControlEndpoint,
    cookie: &AuthCookie,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let command = authenticate_command(cookie);
    stream
        .write_all(command.as_bytes())
        .await
        .map_err(|e| TorError::connection_failed(endpoint, e))?;
    stream
        .flush()
        .await
        .map_err(|e| TorError::connection_failed(endpoint, e))?;
    debug!("AUTHENTICATE sent to {}, waiting for reply", endpoint);

    let mut buf = [0u8; 512];
    match stream.read(&mut buf).await {
        Ok(0) => Err(TorError::connection_failed(
            endpoint,
            "connection closed before a reply arrived",
        )),
        Ok(n) => {
            let reply = String::from_utf8_lossy(&buf[..n]);
            if reply.contains(SUCCESS_STATUS) {
                Ok(())
            } else {
                warn!("tor refused authentication: {}", reply.trim());
                Err(TorError::AuthRejected {
                    response: reply.trim().to_string(),
                })
            }
        }
        Err(e) => Err(TorError::connection_failed(endpoint, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    /// Accepts one connection, records the first line and answers with `reply`
    /// (or closes the socket when `reply` is `None`).
    async fn fake_control_port(reply: Option<&'static str>) -> (ControlEndpoint, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let task = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(socket);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            if let Some(reply) = reply {
                reader.get_mut().write_all(reply.as_bytes()).await.unwrap();
            }
            line
        });

        (ControlEndpoint::tcp("127.0.0.1", port), task)
    }

    #[test]
    fn test_authenticate_command_is_lowercase_hex() {
        let cookie = AuthCookie::new(vec![0x00, 0xAB, 0xff, 0x10]);
        assert_eq!(authenticate_command(&cookie), "AUTHENTICATE 00abff10\r\n");

        let all: Vec<u8> = (0..=255u8).collect();
        let cmd = authenticate_command(&AuthCookie::new(all.clone()));
        assert!(cmd.starts_with("AUTHENTICATE "));
        assert!(cmd.ends_with("\r\n"));
        let hex_part = &cmd["AUTHENTICATE ".len()..cmd.len() - 2];
        assert_eq!(hex_part, hex_part.to_lowercase());
        assert_eq!(hex::decode(hex_part).unwrap(), all);
    }

    #[test]
    fn test_cookie_debug_is_redacted() {
        let cookie = AuthCookie::new(b"supersecret".to_vec());
        let shown = format!("{:?}", cookie);
        assert!(!shown.contains("supersecret"));
        assert!(!shown.contains(&cookie.to_hex()));
    }

    #[test]
    fn test_parse_endpoint_formats() {
        assert_eq!(
            "PORT=127.0.0.1:9151\n".parse::<ControlEndpoint>().unwrap(),
            ControlEndpoint::tcp("127.0.0.1", 9151)
        );
        assert_eq!(
            "127.0.0.1:40123".parse::<ControlEndpoint>().unwrap(),
            ControlEndpoint::tcp("127.0.0.1", 40123)
        );
        assert_eq!(
            "PORT=[::1]:9051".parse::<ControlEndpoint>().unwrap(),
            ControlEndpoint::tcp("::1", 9051)
        );
        assert_eq!(
            "UNIX_PORT=/run/tor/control\n".parse::<ControlEndpoint>().unwrap(),
            ControlEndpoint::unix("/run/tor/control")
        );
    }

    #[test]
    fn test_parse_endpoint_rejects_garbage() {
        for bad in ["", "PORT=", "PORT=127.0.0.1", "PORT=127.0.0.1:abc", ":9051", "PORT=127.0.0.1:0"] {
            assert!(bad.parse::<ControlEndpoint>().is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_endpoint_display() {
        assert_eq!(ControlEndpoint::tcp("127.0.0.1", 9051).to_string(), "127.0.0.1:9051");
        assert_eq!(ControlEndpoint::tcp("::1", 9051).to_string(), "[::1]:9051");
        assert_eq!(ControlEndpoint::unix("/run/tor/control").to_string(), "unix:/run/tor/control");
        assert_eq!(ControlEndpoint::unix("/x").port(), None);
    }

    #[tokio::test]
    async fn test_authenticate_success() {
        let (endpoint, server) = fake_control_port(Some("250 OK\r\n")).await;
        let cookie = AuthCookie::new(vec![0xde, 0xad, 0xbe, 0xef]);

        let channel = authenticate(&endpoint, &cookie).await.unwrap();

        assert_eq!(channel.endpoint(), &endpoint);
        assert_eq!(server.await.unwrap(), "AUTHENTICATE deadbeef\r\n");
    }

    #[tokio::test]
    async fn test_authenticate_success_with_trailing_text() {
        let (endpoint, server) =
            fake_control_port(Some("650 NOTICE something\r\n250 OK\r\n650 STATUS_CLIENT more\r\n")).await;

        let result = authenticate(&endpoint, &AuthCookie::new(vec![1, 2, 3])).await;

        assert!(result.is_ok());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_authenticate_rejected() {
        let (endpoint, server) =
            fake_control_port(Some("515 Authentication failed: Wrong length on authentication cookie.\r\n"))
                .await;

        let err = authenticate(&endpoint, &AuthCookie::new(vec![1]))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::AuthRejected);
        assert!(err.to_string().contains("515"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_before_reply_is_connection_failure() {
        let (endpoint, server) = fake_control_port(None).await;

        let err = authenticate(&endpoint, &AuthCookie::new(vec![1]))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConnectionFailed);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = authenticate(&ControlEndpoint::tcp("127.0.0.1", port), &AuthCookie::new(vec![1]))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConnectionFailed);
    }

    #[tokio::test]
    async fn test_handshake_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(256);
        let endpoint = ControlEndpoint::tcp("127.0.0.1", 1);

        let server_task = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let n = server.read(&mut buf).await.unwrap();
            server.write_all(b"552 Unrecognized command\r\n").await.unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });

        let err = handshake(&mut client, &endpoint, &AuthCookie::new(vec![0x0f]))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::AuthRejected);
        assert_eq!(server_task.await.unwrap(), "AUTHENTICATE 0f\r\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_authenticate_over_unix_socket() {
        use tokio::net::UnixListener;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control");
        let listener = UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let _ = socket.read(&mut buf).await.unwrap();
            socket.write_all(b"250 OK\r\n").await.unwrap();
        });

        let channel = authenticate(&ControlEndpoint::unix(&path), &AuthCookie::new(vec![7]))
            .await
            .unwrap();

        assert_eq!(channel.endpoint().port(), None);
        server.await.unwrap();
    }
}
