use super::{Handshake, ProtocolError};
use crate::core::client::Credentials;
use crate::core::transport::ServerStream;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const HEADER_LEN: usize = 24;

/// Largest response body accepted during a handshake
pub const MAX_BODY_LEN: u32 = 1024 * 1024;

pub mod constants {
    pub const OK_STATUS: u16 = 0x0;
    pub const AUTH_ERROR: u16 = 0x20;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Version = 0x0b,
    StartAuth = 0x21,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Magic {
    Request = 0x80,
    Response = 0x81,
}

/// Fixed 24 byte binary protocol header
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    pub magic: u8,
    pub opcode: u8,
    pub key_length: u16,
    pub extras_length: u8,
    pub data_type: u8,
    pub vbucket_id_or_status: u16,
    pub total_body_length: u32,
    pub opaque: u32,
    pub cas: u64,
}

impl PacketHeader {
    pub fn request(opcode: Opcode, key_length: u16, total_body_length: u32) -> Self {
        Self {
            magic: Magic::Request as u8,
            opcode: opcode as u8,
            key_length,
            total_body_length,
            ..Default::default()
        }
    }

    pub async fn write<W: AsyncWrite + Unpin + ?Sized>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_u8(self.magic).await?;
        writer.write_u8(self.opcode).await?;
        writer.write_u16(self.key_length).await?;
        writer.write_u8(self.extras_length).await?;
        writer.write_u8(self.data_type).await?;
        writer.write_u16(self.vbucket_id_or_status).await?;
        writer.write_u32(self.total_body_length).await?;
        writer.write_u32(self.opaque).await?;
        writer.write_u64(self.cas).await?;
        Ok(())
    }

    pub async fn read<R: AsyncRead + Unpin + ?Sized>(reader: &mut R) -> std::io::Result<Self> {
        Ok(PacketHeader {
            magic: reader.read_u8().await?,
            opcode: reader.read_u8().await?,
            key_length: reader.read_u16().await?,
            extras_length: reader.read_u8().await?,
            data_type: reader.read_u8().await?,
            vbucket_id_or_status: reader.read_u16().await?,
            total_body_length: reader.read_u32().await?,
            opaque: reader.read_u32().await?,
            cas: reader.read_u64().await?,
        })
    }
}

/// Read one response packet, returning its value bytes on success
async fn read_response(stream: &mut ServerStream, opcode: Opcode) -> Result<Vec<u8>, ProtocolError> {
    let header = PacketHeader::read(stream).await?;
    if header.magic != Magic::Response as u8 {
        return Err(ProtocolError::ParseError(format!(
            "Unexpected magic byte {:#04x}",
            header.magic
        )));
    }
    if header.opcode != opcode as u8 {
        return Err(ProtocolError::ParseError(format!(
            "Expected opcode {:#04x}, got {:#04x}",
            opcode as u8, header.opcode
        )));
    }

    if header.total_body_length > MAX_BODY_LEN {
        return Err(ProtocolError::ParseError(format!(
            "Response body of {} bytes exceeds the {} byte limit",
            header.total_body_length, MAX_BODY_LEN
        )));
    }
    let mut body = vec![0u8; header.total_body_length as usize];
    stream.read_exact(&mut body).await?;

    let value_offset = header.extras_length as usize + header.key_length as usize;
    let value = body.get(value_offset..).unwrap_or_default().to_vec();

    if header.vbucket_id_or_status != constants::OK_STATUS {
        return Err(ProtocolError::Status {
            status: header.vbucket_id_or_status,
            message: String::from_utf8_lossy(&value).to_string(),
        });
    }
    Ok(value)
}

/// Binary protocol handshake
#[derive(Debug)]
pub struct BinaryHandshake {
    pub name: String,
}

impl BinaryHandshake {
    pub fn new() -> Self {
        Self {
            name: "binary".to_string(),
        }
    }
}

impl Default for BinaryHandshake {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Handshake for BinaryHandshake {
    async fn authenticate(
        &self,
        stream: &mut ServerStream,
        credentials: &Credentials,
    ) -> Result<(), ProtocolError> {
        let mechanism = "PLAIN";
        let payload = format!("\x00{}\x00{}", credentials.username, credentials.password);
        let header = PacketHeader::request(
            Opcode::StartAuth,
            mechanism.len() as u16,
            (mechanism.len() + payload.len()) as u32,
        );

        header.write(stream).await?;
        stream.write_all(mechanism.as_bytes()).await?;
        stream.write_all(payload.as_bytes()).await?;
        stream.flush().await?;

        read_response(stream, Opcode::StartAuth).await.map(|_| ())
    }

    async fn version(&self, stream: &mut ServerStream) -> Result<String, ProtocolError> {
        PacketHeader::request(Opcode::Version, 0, 0).write(stream).await?;
        stream.flush().await?;

        let value = read_response(stream, Opcode::Version).await?;
        Ok(String::from_utf8_lossy(&value).to_string())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
