//! Binary wire protocol between backup clients and the server.
//!
//! ```text
//! client -> server  [client_id(16)] [version(1)] [code(2)] [payload_size(4)] [payload]
//! server -> client  [version(1)] [code(2)] [payload_size(4)] [payload]
//! ```
//!
//! Integers are little-endian. Names and filenames travel in 255-byte
//! zero-padded fields, public keys in a 160-byte zero-padded field. The only
//! variable-length client payload is upload content, which is preceded by its
//! own 4-byte length; the decoder reads exactly that many bytes and never
//! past the end of a message.
//!
//! The header's `payload_size` is carried verbatim but the payload layout is
//! fixed by the code. Older clients fill it inconsistently, so the decoder
//! does not rely on it for client messages.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::constants::{
    CLIENT_HEADER_SIZE, CLIENT_ID_SIZE, MAX_ENCRYPTED_KEY_SIZE, NAME_SIZE,
    PUBLIC_KEY_SIZE, SERVER_HEADER_SIZE,
};
use crate::error::ProtocolError;
use crate::types::ClientId;

pub type PublicKeyField = [u8; PUBLIC_KEY_SIZE];

// ---------------------------------------------------------------------------
// Codes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ClientCode {
    Registration = 1100,
    PublicKey = 1101,
    UploadFile = 1103,
    FileCrcOk = 1104,
    FileCrcRetry = 1105,
    FileCrcGiveUp = 1106,
}

impl ClientCode {
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            1100 => Some(Self::Registration),
            1101 => Some(Self::PublicKey),
            1103 => Some(Self::UploadFile),
            1104 => Some(Self::FileCrcOk),
            1105 => Some(Self::FileCrcRetry),
            1106 => Some(Self::FileCrcGiveUp),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ServerCode {
    RegistrationSuccessful = 2100,
    RegistrationFailed = 2101,
    AesKey = 2102,
    UploadFileSuccessful = 2103,
    SuccessResponse = 2104,
}

impl ServerCode {
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            2100 => Some(Self::RegistrationSuccessful),
            2101 => Some(Self::RegistrationFailed),
            2102 => Some(Self::AesKey),
            2103 => Some(Self::UploadFileSuccessful),
            2104 => Some(Self::SuccessResponse),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHeader {
    pub client_id: ClientId,
    pub version: u8,
    pub code: ClientCode,
    pub payload_size: u32,
}

/// Every message a client can send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientPayload {
    Registration {
        name: String,
    },
    PublicKey {
        name: String,
        public_key: PublicKeyField,
    },
    UploadFile {
        client_id: ClientId,
        filename: String,
        content: Vec<u8>,
    },
    FileCrcOk {
        client_id: ClientId,
        filename: String,
    },
    FileCrcRetry {
        client_id: ClientId,
        filename: String,
    },
    FileCrcGiveUp {
        client_id: ClientId,
        filename: String,
    },
}

impl ClientPayload {
    pub fn code(&self) -> ClientCode {
        match self {
            Self::Registration { .. } => ClientCode::Registration,
            Self::PublicKey { .. } => ClientCode::PublicKey,
            Self::UploadFile { .. } => ClientCode::UploadFile,
            Self::FileCrcOk { .. } => ClientCode::FileCrcOk,
            Self::FileCrcRetry { .. } => ClientCode::FileCrcRetry,
            Self::FileCrcGiveUp { .. } => ClientCode::FileCrcGiveUp,
        }
    }

    /// Encoded payload length in bytes.
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::Registration { .. } => NAME_SIZE,
            Self::PublicKey { .. } => NAME_SIZE + PUBLIC_KEY_SIZE,
            Self::UploadFile { content, .. } => CLIENT_ID_SIZE + 4 + NAME_SIZE + content.len(),
            Self::FileCrcOk { .. } | Self::FileCrcRetry { .. } | Self::FileCrcGiveUp { .. } => {
                CLIENT_ID_SIZE + NAME_SIZE
            }
        }
    }

    fn encode_into(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        match self {
            Self::Registration { name } => put_padded(buf, "name", name.as_bytes(), NAME_SIZE),
            Self::PublicKey { name, public_key } => {
                put_padded(buf, "name", name.as_bytes(), NAME_SIZE)?;
                buf.put_slice(public_key);
                Ok(())
            }
            Self::UploadFile {
                client_id,
                filename,
                content,
            } => {
                if content.len() > u32::MAX as usize {
                    return Err(ProtocolError::FieldTooLong {
                        field: "content",
                        len: content.len(),
                        max: u32::MAX as usize,
                    });
                }
                buf.put_slice(client_id.as_bytes());
                buf.put_u32_le(content.len() as u32);
                put_padded(buf, "filename", filename.as_bytes(), NAME_SIZE)?;
                buf.put_slice(content);
                Ok(())
            }
            Self::FileCrcOk {
                client_id,
                filename,
            }
            | Self::FileCrcRetry {
                client_id,
                filename,
            }
            | Self::FileCrcGiveUp {
                client_id,
                filename,
            } => {
                buf.put_slice(client_id.as_bytes());
                put_padded(buf, "filename", filename.as_bytes(), NAME_SIZE)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientMessage {
    pub header: ClientHeader,
    pub payload: ClientPayload,
}

impl ClientMessage {
    /// Build a message whose header code and size match the payload.
    pub fn new(client_id: ClientId, version: u8, payload: ClientPayload) -> Self {
        let header = ClientHeader {
            client_id,
            version,
            code: payload.code(),
            payload_size: payload.encoded_len() as u32,
        };
        Self { header, payload }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = BytesMut::with_capacity(CLIENT_HEADER_SIZE + self.payload.encoded_len());
        buf.put_slice(self.header.client_id.as_bytes());
        buf.put_u8(self.header.version);
        buf.put_u16_le(self.header.code as u16);
        buf.put_u32_le(self.header.payload_size);
        self.payload.encode_into(&mut buf)?;
        Ok(buf.to_vec())
    }
}

/// Read and parse a client header.
pub async fn decode_header<R>(stream: &mut R) -> Result<ClientHeader, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let client_id = ClientId::from_bytes(read_array::<CLIENT_ID_SIZE, _>(stream).await?);
    let version = read_u8(stream).await?;
    let raw_code = read_u16(stream).await?;
    let payload_size = read_u32(stream).await?;

    let code = ClientCode::from_u16(raw_code).ok_or(ProtocolError::UnknownCode(raw_code))?;

    Ok(ClientHeader {
        client_id,
        version,
        code,
        payload_size,
    })
}

/// Read the payload that follows a header carrying `code`. Upload content
/// longer than `max_content` is rejected before anything is allocated.
pub async fn decode_payload<R>(
    code: ClientCode,
    stream: &mut R,
    max_content: usize,
) -> Result<ClientPayload, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let payload = match code {
        ClientCode::Registration => ClientPayload::Registration {
            name: read_name(stream, "name").await?,
        },
        ClientCode::PublicKey => {
            let name = read_name(stream, "name").await?;
            let public_key = read_array::<PUBLIC_KEY_SIZE, _>(stream).await?;
            ClientPayload::PublicKey { name, public_key }
        }
        ClientCode::UploadFile => {
            let client_id = ClientId::from_bytes(read_array::<CLIENT_ID_SIZE, _>(stream).await?);
            let content_size = read_u32(stream).await? as usize;
            if content_size > max_content {
                return Err(ProtocolError::Malformed(format!(
                    "content size {content_size} exceeds {max_content}"
                )));
            }
            let filename = read_name(stream, "filename").await?;
            let content = read_vec(stream, content_size).await?;
            ClientPayload::UploadFile {
                client_id,
                filename,
                content,
            }
        }
        ClientCode::FileCrcOk | ClientCode::FileCrcRetry | ClientCode::FileCrcGiveUp => {
            let client_id = ClientId::from_bytes(read_array::<CLIENT_ID_SIZE, _>(stream).await?);
            let filename = read_name(stream, "filename").await?;
            match code {
                ClientCode::FileCrcOk => ClientPayload::FileCrcOk {
                    client_id,
                    filename,
                },
                ClientCode::FileCrcRetry => ClientPayload::FileCrcRetry {
                    client_id,
                    filename,
                },
                _ => ClientPayload::FileCrcGiveUp {
                    client_id,
                    filename,
                },
            }
        }
    };

    Ok(payload)
}

/// Read one complete client message.
pub async fn read_client_message<R>(
    stream: &mut R,
    max_content: usize,
) -> Result<ClientMessage, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let header = decode_header(stream).await?;
    let payload = decode_payload(header.code, stream, max_content).await?;
    Ok(ClientMessage { header, payload })
}

pub async fn write_client_message<W>(stream: &mut W, message: &ClientMessage) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = message.encode()?;
    stream.write_all(&bytes).await?;
    stream.flush().await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

/// Every response the server can send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerPayload {
    RegistrationSuccessful {
        client_id: ClientId,
    },
    RegistrationFailed,
    AesKey {
        client_id: ClientId,
        encrypted_key: Vec<u8>,
    },
    UploadFileSuccessful {
        client_id: ClientId,
        content_size: u32,
        filename: String,
        checksum: u32,
    },
    SuccessResponse,
}

impl ServerPayload {
    pub fn code(&self) -> ServerCode {
        match self {
            Self::RegistrationSuccessful { .. } => ServerCode::RegistrationSuccessful,
            Self::RegistrationFailed => ServerCode::RegistrationFailed,
            Self::AesKey { .. } => ServerCode::AesKey,
            Self::UploadFileSuccessful { .. } => ServerCode::UploadFileSuccessful,
            Self::SuccessResponse => ServerCode::SuccessResponse,
        }
    }

    pub fn encoded_len(&self) -> usize {
        match self {
            Self::RegistrationSuccessful { .. } => CLIENT_ID_SIZE,
            Self::RegistrationFailed | Self::SuccessResponse => 0,
            Self::AesKey { encrypted_key, .. } => CLIENT_ID_SIZE + encrypted_key.len(),
            Self::UploadFileSuccessful { .. } => CLIENT_ID_SIZE + 4 + NAME_SIZE + 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerMessage {
    pub version: u8,
    pub payload: ServerPayload,
}

impl ServerMessage {
    pub fn new(version: u8, payload: ServerPayload) -> Self {
        Self { version, payload }
    }

    pub fn code(&self) -> ServerCode {
        self.payload.code()
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let payload_len = self.payload.encoded_len();
        let mut buf = BytesMut::with_capacity(SERVER_HEADER_SIZE + payload_len);
        buf.put_u8(self.version);
        buf.put_u16_le(self.code() as u16);
        buf.put_u32_le(payload_len as u32);

        match &self.payload {
            ServerPayload::RegistrationSuccessful { client_id } => {
                buf.put_slice(client_id.as_bytes());
            }
            ServerPayload::RegistrationFailed | ServerPayload::SuccessResponse => {}
            ServerPayload::AesKey {
                client_id,
                encrypted_key,
            } => {
                if encrypted_key.len() > MAX_ENCRYPTED_KEY_SIZE {
                    return Err(ProtocolError::FieldTooLong {
                        field: "encrypted_key",
                        len: encrypted_key.len(),
                        max: MAX_ENCRYPTED_KEY_SIZE,
                    });
                }
                buf.put_slice(client_id.as_bytes());
                buf.put_slice(encrypted_key);
            }
            ServerPayload::UploadFileSuccessful {
                client_id,
                content_size,
                filename,
                checksum,
            } => {
                buf.put_slice(client_id.as_bytes());
                buf.put_u32_le(*content_size);
                put_padded(&mut buf, "filename", filename.as_bytes(), NAME_SIZE)?;
                buf.put_u32_le(*checksum);
            }
        }

        Ok(buf.to_vec())
    }
}

/// Read one complete server message. Used by clients and tests.
pub async fn read_server_message<R>(stream: &mut R) -> Result<ServerMessage, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let version = read_u8(stream).await?;
    let raw_code = read_u16(stream).await?;
    let payload_size = read_u32(stream).await? as usize;
    let code = ServerCode::from_u16(raw_code).ok_or(ProtocolError::UnknownCode(raw_code))?;

    let expect_size = |expected: usize| {
        if payload_size == expected {
            Ok(())
        } else {
            Err(ProtocolError::Malformed(format!(
                "{code:?} payload is {payload_size} bytes, expected {expected}"
            )))
        }
    };

    let payload = match code {
        ServerCode::RegistrationSuccessful => {
            expect_size(CLIENT_ID_SIZE)?;
            ServerPayload::RegistrationSuccessful {
                client_id: ClientId::from_bytes(read_array::<CLIENT_ID_SIZE, _>(stream).await?),
            }
        }
        ServerCode::RegistrationFailed => {
            expect_size(0)?;
            ServerPayload::RegistrationFailed
        }
        ServerCode::AesKey => {
            if payload_size < CLIENT_ID_SIZE
                || payload_size - CLIENT_ID_SIZE > MAX_ENCRYPTED_KEY_SIZE
            {
                return Err(ProtocolError::Malformed(format!(
                    "AES key payload size {payload_size} out of range"
                )));
            }
            let client_id = ClientId::from_bytes(read_array::<CLIENT_ID_SIZE, _>(stream).await?);
            let encrypted_key = read_vec(stream, payload_size - CLIENT_ID_SIZE).await?;
            ServerPayload::AesKey {
                client_id,
                encrypted_key,
            }
        }
        ServerCode::UploadFileSuccessful => {
            expect_size(CLIENT_ID_SIZE + 4 + NAME_SIZE + 4)?;
            let client_id = ClientId::from_bytes(read_array::<CLIENT_ID_SIZE, _>(stream).await?);
            let content_size = read_u32(stream).await?;
            let filename = read_name(stream, "filename").await?;
            let checksum = read_u32(stream).await?;
            ServerPayload::UploadFileSuccessful {
                client_id,
                content_size,
                filename,
                checksum,
            }
        }
        ServerCode::SuccessResponse => {
            expect_size(0)?;
            ServerPayload::SuccessResponse
        }
    };

    Ok(ServerMessage { version, payload })
}

pub async fn write_server_message<W>(stream: &mut W, message: &ServerMessage) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = message.encode()?;
    stream.write_all(&bytes).await?;
    stream.flush().await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn put_padded(
    buf: &mut BytesMut,
    field: &'static str,
    value: &[u8],
    width: usize,
) -> Result<(), ProtocolError> {
    if value.len() > width {
        return Err(ProtocolError::FieldTooLong {
            field,
            len: value.len(),
            max: width,
        });
    }
    buf.put_slice(value);
    buf.put_bytes(0, width - value.len());
    Ok(())
}

/// Decode a zero-padded string field up to its first NUL.
fn parse_padded(field: &'static str, raw: &[u8]) -> Result<String, ProtocolError> {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8(raw[..end].to_vec())
        .map_err(|_| ProtocolError::Malformed(format!("{field} is not valid UTF-8")))
}

fn map_read_err(e: std::io::Error) -> ProtocolError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        ProtocolError::Truncated
    } else {
        ProtocolError::Io(e)
    }
}

async fn read_array<const N: usize, R>(stream: &mut R) -> Result<[u8; N], ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; N];
    stream.read_exact(&mut buf).await.map_err(map_read_err)?;
    Ok(buf)
}

async fn read_vec<R>(stream: &mut R, len: usize) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await.map_err(map_read_err)?;
    Ok(buf)
}

async fn read_u8<R: AsyncRead + Unpin>(stream: &mut R) -> Result<u8, ProtocolError> {
    stream.read_u8().await.map_err(map_read_err)
}

async fn read_u16<R: AsyncRead + Unpin>(stream: &mut R) -> Result<u16, ProtocolError> {
    stream.read_u16_le().await.map_err(map_read_err)
}

async fn read_u32<R: AsyncRead + Unpin>(stream: &mut R) -> Result<u32, ProtocolError> {
    stream.read_u32_le().await.map_err(map_read_err)
}

async fn read_name<R>(stream: &mut R, field: &'static str) -> Result<String, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let raw = read_array::<NAME_SIZE, _>(stream).await?;
    parse_padded(field, &raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MAX_CONTENT_SIZE;

    fn max_name(c: char) -> String {
        std::iter::repeat(c).take(NAME_SIZE).collect()
    }

    async fn client_roundtrip(message: ClientMessage) {
        let bytes = message.encode().unwrap();
        assert_eq!(bytes.len(), CLIENT_HEADER_SIZE + message.payload.encoded_len());

        let mut reader: &[u8] = &bytes;
        let decoded = read_client_message(&mut reader, MAX_CONTENT_SIZE).await.unwrap();
        assert_eq!(decoded, message);
        assert!(reader.is_empty(), "decoder left {} bytes", reader.len());
    }

    async fn server_roundtrip(message: ServerMessage) {
        let bytes = message.encode().unwrap();
        assert_eq!(bytes.len(), SERVER_HEADER_SIZE + message.payload.encoded_len());

        let mut reader: &[u8] = &bytes;
        let decoded = read_server_message(&mut reader).await.unwrap();
        assert_eq!(decoded, message);
        assert!(reader.is_empty());
    }

    #[tokio::test]
    async fn test_client_messages_roundtrip() {
        let id = ClientId::new();
        let mut public_key = [0u8; PUBLIC_KEY_SIZE];
        public_key.iter_mut().enumerate().for_each(|(i, b)| *b = i as u8);

        let payloads = vec![
            ClientPayload::Registration {
                name: "alice".to_string(),
            },
            ClientPayload::Registration { name: max_name('n') },
            ClientPayload::PublicKey {
                name: "alice".to_string(),
                public_key,
            },
            ClientPayload::UploadFile {
                client_id: id,
                filename: "notes.txt".to_string(),
                content: vec![0xAB; 4096],
            },
            ClientPayload::UploadFile {
                client_id: id,
                filename: max_name('f'),
                content: Vec::new(),
            },
            ClientPayload::FileCrcOk {
                client_id: id,
                filename: "notes.txt".to_string(),
            },
            ClientPayload::FileCrcRetry {
                client_id: id,
                filename: "notes.txt".to_string(),
            },
            ClientPayload::FileCrcGiveUp {
                client_id: id,
                filename: max_name('g'),
            },
        ];

        for payload in payloads {
            client_roundtrip(ClientMessage::new(id, 3, payload)).await;
        }
    }

    #[tokio::test]
    async fn test_server_messages_roundtrip() {
        let id = ClientId::new();
        let payloads = vec![
            ServerPayload::RegistrationSuccessful { client_id: id },
            ServerPayload::RegistrationFailed,
            ServerPayload::AesKey {
                client_id: id,
                encrypted_key: vec![0x5A; 128],
            },
            ServerPayload::UploadFileSuccessful {
                client_id: id,
                content_size: u32::MAX,
                filename: max_name('x'),
                checksum: 3_141_126_258,
            },
            ServerPayload::SuccessResponse,
        ];

        for payload in payloads {
            server_roundtrip(ServerMessage::new(3, payload)).await;
        }
    }

    #[test]
    fn test_header_layout() {
        let id = ClientId::from_bytes([0x11; CLIENT_ID_SIZE]);
        let msg = ClientMessage::new(
            id,
            3,
            ClientPayload::Registration {
                name: "bob".to_string(),
            },
        );
        let bytes = msg.encode().unwrap();

        assert_eq!(&bytes[..16], &[0x11; 16]);
        assert_eq!(bytes[16], 3);
        assert_eq!(&bytes[17..19], &1100u16.to_le_bytes());
        assert_eq!(&bytes[19..23], &(NAME_SIZE as u32).to_le_bytes());
        assert_eq!(&bytes[23..26], b"bob");
        assert!(bytes[26..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_server_header_layout() {
        let bytes = ServerMessage::new(3, ServerPayload::SuccessResponse)
            .encode()
            .unwrap();
        assert_eq!(bytes, vec![3, 0x38, 0x08, 0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_unknown_code_rejected() {
        let mut bytes = vec![0u8; CLIENT_ID_SIZE];
        bytes.push(3);
        bytes.extend_from_slice(&1102u16.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());

        let mut reader: &[u8] = &bytes;
        let err = decode_header(&mut reader).await.unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownCode(1102)));
    }

    #[tokio::test]
    async fn test_truncated_header() {
        let mut reader: &[u8] = &[0u8; 10];
        let err = decode_header(&mut reader).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated));
    }

    #[tokio::test]
    async fn test_truncated_upload_content() {
        let msg = ClientMessage::new(
            ClientId::new(),
            3,
            ClientPayload::UploadFile {
                client_id: ClientId::new(),
                filename: "a.bin".to_string(),
                content: vec![1; 64],
            },
        );
        let bytes = msg.encode().unwrap();

        let mut reader: &[u8] = &bytes[..bytes.len() - 1];
        let err = read_client_message(&mut reader, MAX_CONTENT_SIZE).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated));
    }

    #[tokio::test]
    async fn test_oversized_content_length_rejected_before_read() {
        let mut payload = vec![0u8; CLIENT_ID_SIZE];
        payload.extend_from_slice(&u32::MAX.to_le_bytes());
        payload.extend_from_slice(&[0u8; NAME_SIZE]);

        let mut reader: &[u8] = &payload;
        let err = decode_payload(ClientCode::UploadFile, &mut reader, MAX_CONTENT_SIZE)
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    fn upload_prefix(declared: u32) -> Vec<u8> {
        let mut payload = vec![0u8; CLIENT_ID_SIZE];
        payload.extend_from_slice(&declared.to_le_bytes());
        payload.extend_from_slice(&[0u8; NAME_SIZE]);
        payload
    }

    #[tokio::test]
    async fn test_content_limit_is_caller_supplied() {
        // 65 MiB declared, nothing behind it
        let payload = upload_prefix(65 * 1024 * 1024);

        let mut reader: &[u8] = &payload;
        let err = decode_payload(ClientCode::UploadFile, &mut reader, MAX_CONTENT_SIZE)
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));

        // a raised limit accepts the length and then runs out of bytes
        let mut reader: &[u8] = &payload;
        let err = decode_payload(ClientCode::UploadFile, &mut reader, 128 * 1024 * 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated));
    }

    #[tokio::test]
    async fn test_lowered_content_limit() {
        let mut payload = upload_prefix(16);
        payload.extend_from_slice(&[0xAA; 16]);

        let mut reader: &[u8] = &payload;
        let err = decode_payload(ClientCode::UploadFile, &mut reader, 15)
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));

        let mut reader: &[u8] = &payload;
        let decoded = decode_payload(ClientCode::UploadFile, &mut reader, 16)
            .await
            .unwrap();
        assert!(matches!(decoded, ClientPayload::UploadFile { ref content, .. } if content.len() == 16));
    }

    #[tokio::test]
    async fn test_decoder_does_not_read_past_message() {
        let first = ClientMessage::new(
            ClientId::new(),
            3,
            ClientPayload::FileCrcOk {
                client_id: ClientId::new(),
                filename: "a".to_string(),
            },
        );
        let mut bytes = first.encode().unwrap();
        bytes.extend_from_slice(b"next message");

        let mut reader: &[u8] = &bytes;
        assert_eq!(read_client_message(&mut reader, MAX_CONTENT_SIZE).await.unwrap(), first);
        assert_eq!(reader, b"next message");
    }

    #[tokio::test]
    async fn test_inconsistent_payload_size_is_tolerated() {
        let mut msg = ClientMessage::new(
            ClientId::new(),
            3,
            ClientPayload::FileCrcRetry {
                client_id: ClientId::new(),
                filename: "a".to_string(),
            },
        );
        msg.header.payload_size = 0;
        let bytes = msg.encode().unwrap();

        let mut reader: &[u8] = &bytes;
        assert_eq!(read_client_message(&mut reader, MAX_CONTENT_SIZE).await.unwrap(), msg);
    }

    #[tokio::test]
    async fn test_invalid_utf8_name() {
        let mut raw = vec![0xFF, 0xFE];
        raw.resize(NAME_SIZE, 0);
        let mut reader: &[u8] = &raw;
        let err = decode_payload(ClientCode::Registration, &mut reader, MAX_CONTENT_SIZE)
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn test_name_too_long() {
        let msg = ClientMessage::new(
            ClientId::nil(),
            3,
            ClientPayload::Registration {
                name: "x".repeat(NAME_SIZE + 1),
            },
        );
        let err = msg.encode().unwrap_err();
        assert!(matches!(err, ProtocolError::FieldTooLong { field: "name", .. }));
    }

    #[tokio::test]
    async fn test_server_fixed_size_mismatch() {
        let mut bytes = ServerMessage::new(3, ServerPayload::SuccessResponse)
            .encode()
            .unwrap();
        bytes[3] = 4;
        bytes.extend_from_slice(&[0u8; 4]);

        let mut reader: &[u8] = &bytes;
        let err = read_server_message(&mut reader).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn test_code_lookup() {
        assert_eq!(ClientCode::from_u16(1105), Some(ClientCode::FileCrcRetry));
        assert_eq!(ClientCode::from_u16(1102), None);
        assert_eq!(ServerCode::from_u16(2102), Some(ServerCode::AesKey));
        assert_eq!(ServerCode::from_u16(2105), None);
    }
}
