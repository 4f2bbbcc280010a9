use crate::core::dsn::Server;
use crate::core::options::{ClientOption, Setting};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Byte stream to a single memcached server (TCP or Unix socket)
pub trait ServerIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ServerIo for T {}

pub type ServerStream = Box<dyn ServerIo>;

/// Socket level settings derived from the client's options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketSettings {
    pub connect_timeout: Duration,
    /// Bound on each request/response exchange once connected
    pub io_timeout: Duration,
    pub nodelay: bool,
    pub keepalive: bool,
    pub send_buffer_size: Option<usize>,
    pub recv_buffer_size: Option<usize>,
}

impl Default for SocketSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(1000),
            io_timeout: Duration::from_millis(1000),
            nodelay: false,
            keepalive: false,
            send_buffer_size: None,
            recv_buffer_size: None,
        }
    }
}

impl SocketSettings {
    pub fn from_options(options: &BTreeMap<ClientOption, Setting>) -> Self {
        let defaults = Self::default();
        let int = |option: ClientOption| options.get(&option).and_then(Setting::as_int);
        let flag = |option: ClientOption| options.get(&option).and_then(Setting::as_bool);
        let buffer = |option: ClientOption| int(option).filter(|size| *size > 0).map(|size| size as usize);
        let millis = |option: ClientOption| {
            int(option)
                .filter(|ms| *ms > 0)
                .map(|ms| Duration::from_millis(ms as u64))
        };

        Self {
            connect_timeout: millis(ClientOption::ConnectTimeout).unwrap_or(defaults.connect_timeout),
            io_timeout: millis(ClientOption::PollTimeout).unwrap_or(defaults.io_timeout),
            nodelay: flag(ClientOption::TcpNodelay).unwrap_or(defaults.nodelay),
            keepalive: flag(ClientOption::TcpKeepalive).unwrap_or(defaults.keepalive),
            send_buffer_size: buffer(ClientOption::SocketSendSize),
            recv_buffer_size: buffer(ClientOption::SocketRecvSize),
        }
    }
}

/// Open a connection to `server`, bounded by the configured connect timeout
pub async fn connect(server: &Server, settings: &SocketSettings) -> Result<ServerStream, TransportError> {
    if server.is_unix_socket() {
        return connect_unix(server, settings).await;
    }

    let address = server.address();
    let stream = match timeout(settings.connect_timeout, TcpStream::connect(&address)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(TransportError::ConnectionFailed(format!("{}: {}", address, e))),
        Err(_) => {
            return Err(TransportError::Timeout(format!(
                "Connection to {} timed out after {}ms",
                address,
                settings.connect_timeout.as_millis()
            )))
        }
    };

    tune_socket(&stream, settings);
    tracing::debug!("Connected to {}", address);
    Ok(Box::new(stream))
}

#[cfg(unix)]
async fn connect_unix(server: &Server, settings: &SocketSettings) -> Result<ServerStream, TransportError> {
    use tokio::net::UnixStream;

    match timeout(settings.connect_timeout, UnixStream::connect(&server.host)).await {
        Ok(Ok(stream)) => {
            tracing::debug!("Connected to socket {}", server.host);
            Ok(Box::new(stream))
        }
        Ok(Err(e)) => Err(TransportError::ConnectionFailed(format!("{}: {}", server.host, e))),
        Err(_) => Err(TransportError::Timeout(format!(
            "Connection to {} timed out after {}ms",
            server.host,
            settings.connect_timeout.as_millis()
        ))),
    }
}

#[cfg(not(unix))]
async fn connect_unix(server: &Server, _settings: &SocketSettings) -> Result<ServerStream, TransportError> {
    Err(TransportError::UnixSocketUnsupported(server.host.clone()))
}

/// Apply the socket options (best-effort)
fn tune_socket(stream: &TcpStream, settings: &SocketSettings) {
    let _ = stream.set_nodelay(settings.nodelay);

    let socket_ref = socket2::SockRef::from(stream);
    if settings.keepalive {
        let _ = socket_ref.set_keepalive(true);
    }
    if let Some(size) = settings.send_buffer_size {
        let _ = socket_ref.set_send_buffer_size(size);
    }
    if let Some(size) = settings.recv_buffer_size {
        let _ = socket_ref.set_recv_buffer_size(size);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("{0}")]
    Timeout(String),
    #[error("Unix sockets are not supported on this platform: {0}")]
    UnixSocketUnsupported(String),
}
