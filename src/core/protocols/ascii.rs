use super::{Handshake, ProtocolError};
use crate::core::client::Credentials;
use crate::core::transport::ServerStream;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Text protocol handshake
#[derive(Debug)]
pub struct AsciiHandshake {
    pub name: String,
}

impl AsciiHandshake {
    pub fn new() -> Self {
        Self {
            name: "ascii".to_string(),
        }
    }
}

impl Default for AsciiHandshake {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse the single line answer to `version`
pub fn parse_version_line(line: &str) -> Result<String, ProtocolError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if let Some(version) = line.strip_prefix("VERSION ") {
        return Ok(version.trim().to_string());
    }
    if let Some(message) = line
        .strip_prefix("SERVER_ERROR ")
        .or_else(|| line.strip_prefix("CLIENT_ERROR "))
    {
        return Err(ProtocolError::ParseError(message.to_string()));
    }
    Err(ProtocolError::ParseError(format!(
        "Unexpected response to version: {:?}",
        line
    )))
}

#[async_trait]
impl Handshake for AsciiHandshake {
    async fn authenticate(
        &self,
        _stream: &mut ServerStream,
        _credentials: &Credentials,
    ) -> Result<(), ProtocolError> {
        Err(ProtocolError::Unsupported(
            "SASL authentication requires the binary protocol".to_string(),
        ))
    }

    async fn version(&self, stream: &mut ServerStream) -> Result<String, ProtocolError> {
        stream.write_all(b"version\r\n").await?;
        stream.flush().await?;

        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(ProtocolError::Io("Connection closed by server".to_string()));
        }
        parse_version_line(&line)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
