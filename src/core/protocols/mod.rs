use crate::core::client::Credentials;
use crate::core::transport::ServerStream;
use async_trait::async_trait;

pub mod ascii;
pub mod binary;

pub use ascii::AsciiHandshake;
pub use binary::BinaryHandshake;

/// Connection handshake spoken right after a server connection is opened
#[async_trait]
pub trait Handshake: Send + Sync {
    /// Authenticate the connection with SASL credentials
    async fn authenticate(
        &self,
        stream: &mut ServerStream,
        credentials: &Credentials,
    ) -> Result<(), ProtocolError>;

    /// Ask the server for its version string
    async fn version(&self, stream: &mut ServerStream) -> Result<String, ProtocolError>;

    /// Protocol name
    fn name(&self) -> &str;
}

/// Handshake matching the client's `binary_protocol` setting
pub fn handshake_for(binary_protocol: bool) -> Box<dyn Handshake> {
    if binary_protocol {
        Box::new(BinaryHandshake::new())
    } else {
        Box::new(AsciiHandshake::new())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Protocol parse error: {0}")]
    ParseError(String),
    #[error("Server returned status {status:#06x}: {message}")]
    Status { status: u16, message: String },
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl From<std::io::Error> for ProtocolError {
    fn from(e: std::io::Error) -> Self {
        ProtocolError::Io(e.to_string())
    }
}
