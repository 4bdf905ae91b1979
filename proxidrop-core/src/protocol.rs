use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::NearbyError;

/// Length prefix (4 bytes, big-endian) plus frame type byte.
const HEADER_LEN: usize = 5;
/// Upper bound on a declared frame body to protect against malicious peers.
pub const MAX_FRAME_LEN: usize = 5 * 1024 * 1024;

type Result<T> = std::result::Result<T, NearbyError>;

/// Outer (plaintext envelope) frame type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    ConnectionRequest = 0x01,
    ClientInit = 0x10,
    ServerInit = 0x11,
    ClientFinish = 0x12,
    HandshakeAlert = 0x13,
    /// AEAD ciphertext envelope; everything after the handshake travels here.
    Secure = 0x20,
    KeepAlive = 0x30,
    Disconnect = 0x31,
}

impl TryFrom<u8> for FrameType {
    type Error = NearbyError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(Self::ConnectionRequest),
            0x10 => Ok(Self::ClientInit),
            0x11 => Ok(Self::ServerInit),
            0x12 => Ok(Self::ClientFinish),
            0x13 => Ok(Self::HandshakeAlert),
            0x20 => Ok(Self::Secure),
            0x30 => Ok(Self::KeepAlive),
            0x31 => Ok(Self::Disconnect),
            other => Err(NearbyError::protocol(format!(
                "unknown frame type: 0x{other:02X}"
            ))),
        }
    }
}

impl From<FrameType> for u8 {
    fn from(ft: FrameType) -> u8 {
        ft as u8
    }
}

/// A fully decoded outer frame (type + payload).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub payload: Vec<u8>,
}

/// Attempts to decode one complete frame from the front of `buf`.
///
/// * `Ok(Some(frame))` — a full frame was present; its bytes have been consumed
///   from `buf`.
/// * `Ok(None)` — not enough bytes yet; `buf` is left untouched.  The caller
///   should read more data and try again.
/// * `Err(..)` — protocol violation (empty frame, oversized frame, unknown
///   frame type).  The caller should close the connection.
///
/// # Errors
///
/// Returns [`NearbyError::ProtocolError`] when the declared length is zero or
/// exceeds [`MAX_FRAME_LEN`], or when the frame type byte is unknown.
pub fn try_decode_frame(buf: &mut BytesMut) -> Result<Option<Frame>> {
    if buf.len() < 4 {
        return Ok(None);
    }

    // The length field counts the type byte plus the payload.
    let declared = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

    if declared < 1 {
        return Err(NearbyError::protocol("empty frame"));
    }
    if declared > MAX_FRAME_LEN {
        return Err(NearbyError::protocol(format!(
            "frame too large: {declared} bytes (max {MAX_FRAME_LEN})"
        )));
    }

    if buf.len() < 4 + declared {
        return Ok(None);
    }

    buf.advance(4);
    let mut body = buf.split_to(declared);
    let frame_type = FrameType::try_from(body[0])?;
    body.advance(1);

    Ok(Some(Frame {
        frame_type,
        payload: body.to_vec(),
    }))
}

/// Encodes a frame into `buf`.
///
/// Appends the 4-byte length, the frame type byte, and `payload`.
pub fn encode_frame(frame_type: FrameType, payload: &[u8], buf: &mut BytesMut) {
    buf.reserve(HEADER_LEN + payload.len());
    #[allow(clippy::cast_possible_truncation)] // frame bodies are bounded by MAX_FRAME_LEN
    buf.put_u32(payload.len() as u32 + 1);
    buf.put_u8(frame_type.into());
    buf.put_slice(payload);
}

/// Convenience wrapper that allocates and returns a new `BytesMut`.
#[must_use]
pub fn encode_frame_to_bytes(frame_type: FrameType, payload: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    encode_frame(frame_type, payload, &mut buf);
    buf
}

/// Encodes a serializable payload into a protocol frame stored in a new
/// [`BytesMut`].
///
/// # Errors
///
/// Returns [`NearbyError::ProtocolError`] if JSON serialization fails.
pub fn encode_payload_frame<T: Serialize>(frame_type: FrameType, payload: &T) -> Result<BytesMut> {
    let json = serde_json::to_vec(payload)
        .map_err(|e| NearbyError::protocol(format!("payload serialization failed: {e}")))?;
    Ok(encode_frame_to_bytes(frame_type, &json))
}

/// Decodes a frame's payload bytes into the requested type.
///
/// # Errors
///
/// Returns [`NearbyError::ProtocolError`] if the payload is not valid JSON or
/// does not match `T`.
pub fn decode_payload<T: for<'de> Deserialize<'de>>(payload: &[u8]) -> Result<T> {
    serde_json::from_slice(payload)
        .map_err(|e| NearbyError::protocol(format!("malformed payload: {e}")))
}

// ── Handshake payload types ─────────────────────────────────────────

/// Key-agreement suites a sender may commit to.
///
/// Only `P256Sha512` is implemented on the receive side; the variant list
/// matches what senders advertise in the wild so an unsupported suite is a
/// clean negotiation failure rather than a parse error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeCipher {
    P256Sha512,
    Curve25519Sha512,
}

/// Reason code carried in a [`FrameType::HandshakeAlert`] frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCode {
    BadVersion,
    BadNonce,
    BadHandshakeCipher,
    BadMessageType,
    BadMessageData,
    CommitmentMismatch,
}

/// Payload for [`FrameType::ConnectionRequest`] (sender → receiver).
///
/// Identifies the sending device before any cryptography happens. The
/// name is attacker-controlled until the PIN is verified; treat it as a
/// display string only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRequestPayload {
    pub device_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_model: Option<String>,
}

/// One cipher commitment inside a [`ClientInitPayload`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherCommitment {
    pub cipher: HandshakeCipher,
    /// Hex-encoded SHA-512 over the raw `ClientFinish` payload bytes the
    /// sender will transmit if this cipher is chosen.
    pub commitment_hex: String,
}

/// Payload for [`FrameType::ClientInit`] (sender → receiver).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInitPayload {
    pub version: u32,
    /// Hex-encoded 32-byte random nonce.
    pub nonce_hex: String,
    pub commitments: Vec<CipherCommitment>,
}

/// Payload for [`FrameType::ServerInit`] (receiver → sender).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInitPayload {
    pub version: u32,
    /// Hex-encoded 32-byte random nonce.
    pub nonce_hex: String,
    pub cipher: HandshakeCipher,
    /// Hex-encoded SEC1 ephemeral public key.
    pub public_key_hex: String,
}

/// Payload for [`FrameType::ClientFinish`] (sender → receiver).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientFinishPayload {
    /// Hex-encoded SEC1 ephemeral public key.
    pub public_key_hex: String,
}

/// Payload for [`FrameType::HandshakeAlert`] (either direction).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeAlertPayload {
    pub code: AlertCode,
    pub message: String,
}

// ── Inner protocol (inside the secure channel) ──────────────────────

/// Inner frame type codes. Inner frames are the plaintexts sealed into
/// [`FrameType::Secure`] envelopes: one type byte followed by the body,
/// no length prefix (the AEAD envelope already delimits them).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InnerFrameType {
    Introduction = 0x01,
    ConsentResponse = 0x02,
    PayloadChunk = 0x03,
    KeepAlive = 0x04,
    Disconnect = 0x05,
}

impl TryFrom<u8> for InnerFrameType {
    type Error = NearbyError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(Self::Introduction),
            0x02 => Ok(Self::ConsentResponse),
            0x03 => Ok(Self::PayloadChunk),
            0x04 => Ok(Self::KeepAlive),
            0x05 => Ok(Self::Disconnect),
            other => Err(NearbyError::protocol(format!(
                "unknown inner frame type: 0x{other:02X}"
            ))),
        }
    }
}

/// File entry as it appears on the wire, before validation.
///
/// Fields the protocol requires are still optional here so that a sender
/// omitting one yields [`NearbyError::RequiredFieldMissing`] instead of a
/// generic parse error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub payload_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl FileEntry {
    /// Validates the wire entry into a [`FileDescriptor`].
    ///
    /// # Errors
    ///
    /// Returns [`NearbyError::RequiredFieldMissing`] when the name is absent
    /// or empty, or the size is absent.
    pub fn validate(&self) -> Result<FileDescriptor> {
        let name = match self.name.as_deref() {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => return Err(NearbyError::missing("fileMetadata.name")),
        };
        let size_bytes = self
            .size_bytes
            .ok_or_else(|| NearbyError::missing("fileMetadata.size"))?;
        Ok(FileDescriptor {
            payload_id: self.payload_id,
            name,
            size_bytes,
            mime_type: self.mime_type.clone(),
        })
    }
}

/// A validated file announced in an introduction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    pub payload_id: u64,
    pub name: String,
    pub size_bytes: u64,
    pub mime_type: Option<String>,
}

/// Text entry as it appears on the wire, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEntry {
    pub payload_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

impl TextEntry {
    /// Validates the wire entry into a [`TextDescriptor`].
    ///
    /// # Errors
    ///
    /// Returns [`NearbyError::RequiredFieldMissing`] when the size is absent.
    pub fn validate(&self) -> Result<TextDescriptor> {
        let size_bytes = self
            .size_bytes
            .ok_or_else(|| NearbyError::missing("textMetadata.size"))?;
        Ok(TextDescriptor {
            payload_id: self.payload_id,
            title: self.title.clone().unwrap_or_default(),
            size_bytes,
        })
    }
}

/// A validated text body announced in an introduction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDescriptor {
    pub payload_id: u64,
    pub title: String,
    pub size_bytes: u64,
}

/// Payload for [`InnerFrameType::Introduction`] (sender → receiver).
///
/// A sender may split its introduction over several frames; the one with
/// `complete = true` closes negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntroductionPayload {
    pub transfer_id: String,
    #[serde(default)]
    pub files: Vec<FileEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<TextEntry>,
    pub complete: bool,
}

/// Payload for [`InnerFrameType::ConsentResponse`] (receiver → sender).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentResponsePayload {
    pub transfer_id: String,
    pub accept: bool,
}

/// Payload for [`InnerFrameType::KeepAlive`] (either direction).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepAlivePayload {
    pub ack: bool,
}

/// One slice of a payload's bytes. Encoded in binary, not JSON: the body
/// is bulk data and must not pay a hex/JSON expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadChunk {
    pub payload_id: u64,
    pub offset: u64,
    pub is_final: bool,
    pub data: Vec<u8>,
}

/// Chunk header: payload_id(8) + offset(8) + flags(1).
const CHUNK_HEADER_LEN: usize = 17;
const CHUNK_FLAG_FINAL: u8 = 0x01;

/// A decoded inner frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InnerFrame {
    Introduction(IntroductionPayload),
    ConsentResponse(ConsentResponsePayload),
    PayloadChunk(PayloadChunk),
    KeepAlive(KeepAlivePayload),
    Disconnect,
}

impl InnerFrame {
    /// Encodes this inner frame into its plaintext byte form.
    ///
    /// # Errors
    ///
    /// Returns [`NearbyError::ProtocolError`] if JSON serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        fn with_json<T: Serialize>(ft: InnerFrameType, body: &T) -> Result<Vec<u8>> {
            let json = serde_json::to_vec(body)
                .map_err(|e| NearbyError::protocol(format!("payload serialization failed: {e}")))?;
            let mut out = Vec::with_capacity(1 + json.len());
            out.push(ft as u8);
            out.extend_from_slice(&json);
            Ok(out)
        }

        match self {
            Self::Introduction(p) => with_json(InnerFrameType::Introduction, p),
            Self::ConsentResponse(p) => with_json(InnerFrameType::ConsentResponse, p),
            Self::KeepAlive(p) => with_json(InnerFrameType::KeepAlive, p),
            Self::Disconnect => Ok(vec![InnerFrameType::Disconnect as u8]),
            Self::PayloadChunk(c) => {
                let mut out = Vec::with_capacity(1 + CHUNK_HEADER_LEN + c.data.len());
                out.push(InnerFrameType::PayloadChunk as u8);
                out.extend_from_slice(&c.payload_id.to_be_bytes());
                out.extend_from_slice(&c.offset.to_be_bytes());
                out.push(if c.is_final { CHUNK_FLAG_FINAL } else { 0 });
                out.extend_from_slice(&c.data);
                Ok(out)
            }
        }
    }

    /// Decodes an inner frame from its plaintext byte form.
    ///
    /// # Errors
    ///
    /// Returns [`NearbyError::ProtocolError`] on an empty plaintext, an
    /// unknown type byte, a malformed JSON body, or a truncated chunk header.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (&type_byte, body) = bytes
            .split_first()
            .ok_or_else(|| NearbyError::protocol("empty inner frame"))?;

        match InnerFrameType::try_from(type_byte)? {
            InnerFrameType::Introduction => Ok(Self::Introduction(decode_payload(body)?)),
            InnerFrameType::ConsentResponse => Ok(Self::ConsentResponse(decode_payload(body)?)),
            InnerFrameType::KeepAlive => Ok(Self::KeepAlive(decode_payload(body)?)),
            InnerFrameType::Disconnect => Ok(Self::Disconnect),
            InnerFrameType::PayloadChunk => {
                if body.len() < CHUNK_HEADER_LEN {
                    return Err(NearbyError::protocol("truncated chunk header"));
                }
                let payload_id = u64::from_be_bytes(
                    body[0..8].try_into().expect("slice is exactly 8 bytes"),
                );
                let offset = u64::from_be_bytes(
                    body[8..16].try_into().expect("slice is exactly 8 bytes"),
                );
                let flags = body[16];
                Ok(Self::PayloadChunk(PayloadChunk {
                    payload_id,
                    offset,
                    is_final: flags & CHUNK_FLAG_FINAL != 0,
                    data: body[CHUNK_HEADER_LEN..].to_vec(),
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Given a frame with an empty payload, when encoded and decoded, then type and payload match.
    #[test]
    fn given_empty_payload_when_round_tripped_then_frame_matches() {
        let mut buf = encode_frame_to_bytes(FrameType::KeepAlive, &[]);
        let frame = try_decode_frame(&mut buf).unwrap().unwrap();
        assert_eq!(frame.frame_type, FrameType::KeepAlive);
        assert!(frame.payload.is_empty());
        assert!(buf.is_empty());
    }

    /// Given a frame with a JSON payload, when encoded and decoded, then type and payload match.
    #[test]
    fn given_json_payload_when_round_tripped_then_frame_matches() {
        let json = br#"{"device_name":"abc"}"#;
        let mut buf = encode_frame_to_bytes(FrameType::ConnectionRequest, json);
        let frame = try_decode_frame(&mut buf).unwrap().unwrap();
        assert_eq!(frame.frame_type, FrameType::ConnectionRequest);
        assert_eq!(frame.payload, json);
        assert!(buf.is_empty());
    }

    /// Given two frames back to back, when decoded, then both come out in order.
    #[test]
    fn given_two_frames_when_decoded_then_both_come_out_in_order() {
        let mut buf = encode_frame_to_bytes(FrameType::ClientInit, b"first");
        encode_frame(FrameType::ClientFinish, b"second", &mut buf);

        let f1 = try_decode_frame(&mut buf).unwrap().unwrap();
        let f2 = try_decode_frame(&mut buf).unwrap().unwrap();
        assert_eq!(f1.frame_type, FrameType::ClientInit);
        assert_eq!(f1.payload, b"first");
        assert_eq!(f2.frame_type, FrameType::ClientFinish);
        assert_eq!(f2.payload, b"second");
        assert!(try_decode_frame(&mut buf).unwrap().is_none());
    }

    /// Given a buffer with only a partial length prefix, when decoding, then None is returned and the buffer is untouched.
    #[test]
    fn given_partial_length_prefix_when_decoded_then_returns_none() {
        let full = encode_frame_to_bytes(FrameType::KeepAlive, b"{}");
        let mut buf = BytesMut::from(&full[..3]);
        assert!(try_decode_frame(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 3);
    }

    /// Given a complete header but truncated payload, when decoding, then None is returned and the buffer is untouched.
    #[test]
    fn given_truncated_payload_when_decoded_then_returns_none() {
        let payload = b"hello world";
        let full = encode_frame_to_bytes(FrameType::ServerInit, payload);
        let partial_len = HEADER_LEN + payload.len() / 2;
        let mut buf = BytesMut::from(&full[..partial_len]);
        assert!(try_decode_frame(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), partial_len);
    }

    /// Given a declared length of zero, when decoded, then an error is returned.
    #[test]
    fn given_zero_length_when_decoded_then_returns_error() {
        let mut buf = BytesMut::from(&[0u8, 0, 0, 0][..]);
        let err = try_decode_frame(&mut buf).unwrap_err();
        assert!(err.to_string().contains("empty frame"));
    }

    /// Given a declared length above the cap, when decoded, then an error is returned before buffering the body.
    #[test]
    fn given_oversized_length_when_decoded_then_returns_error() {
        let declared = (MAX_FRAME_LEN as u32) + 1;
        let mut buf = BytesMut::new();
        buf.put_u32(declared);
        let err = try_decode_frame(&mut buf).unwrap_err();
        assert!(err.to_string().contains("frame too large"));
    }

    /// Given an unknown frame type byte, when decoded, then an error is returned.
    #[test]
    fn given_unknown_frame_type_when_decoded_then_returns_error() {
        let mut buf = BytesMut::new();
        buf.put_u32(1);
        buf.put_u8(0xFE);
        let err = try_decode_frame(&mut buf).unwrap_err();
        assert!(err.to_string().contains("unknown frame type"));
    }

    /// Given every defined frame type code, when converted to u8 and back, then the original variant is preserved.
    #[test]
    fn given_all_frame_types_when_converted_to_u8_and_back_then_match() {
        let types = [
            (0x01, FrameType::ConnectionRequest),
            (0x10, FrameType::ClientInit),
            (0x11, FrameType::ServerInit),
            (0x12, FrameType::ClientFinish),
            (0x13, FrameType::HandshakeAlert),
            (0x20, FrameType::Secure),
            (0x30, FrameType::KeepAlive),
            (0x31, FrameType::Disconnect),
        ];
        for (code, expected) in types {
            let parsed = FrameType::try_from(code).unwrap();
            assert_eq!(parsed, expected);
            assert_eq!(u8::from(parsed), code);
        }
    }

    /// Given a ClientInitPayload, when encoded as a frame and decoded, then the payload round-trips.
    #[test]
    fn given_client_init_when_encoded_as_frame_then_round_trips() {
        let payload = ClientInitPayload {
            version: 1,
            nonce_hex: "00".repeat(32),
            commitments: vec![CipherCommitment {
                cipher: HandshakeCipher::P256Sha512,
                commitment_hex: "ab".repeat(64),
            }],
        };
        let mut buf = encode_payload_frame(FrameType::ClientInit, &payload).unwrap();
        let frame = try_decode_frame(&mut buf).unwrap().unwrap();
        assert_eq!(frame.frame_type, FrameType::ClientInit);
        let decoded: ClientInitPayload = decode_payload(&frame.payload).unwrap();
        assert_eq!(decoded, payload);
    }

    /// Given a HandshakeAlertPayload, when serialized, then the code uses snake_case.
    #[test]
    fn given_alert_payload_when_serialized_then_code_is_snake_case() {
        let payload = HandshakeAlertPayload {
            code: AlertCode::CommitmentMismatch,
            message: "commitment mismatch".into(),
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("commitment_mismatch"));
        let decoded: HandshakeAlertPayload = serde_json::from_slice(json.as_bytes()).unwrap();
        assert_eq!(decoded, payload);
    }

    /// Given invalid JSON bytes, when decoded as a payload, then a protocol error is returned.
    #[test]
    fn given_invalid_json_when_decoded_then_returns_protocol_error() {
        let err = decode_payload::<ConnectionRequestPayload>(b"not json").unwrap_err();
        assert!(matches!(err, NearbyError::ProtocolError(_)));
    }

    // ── Introduction validation ─────────────────────────────────────

    /// Given a complete file entry, when validated, then a descriptor is produced.
    #[test]
    fn given_complete_file_entry_when_validated_then_descriptor_produced() {
        let entry = FileEntry {
            payload_id: 7,
            name: Some("photo.jpg".into()),
            size_bytes: Some(1024),
            mime_type: Some("image/jpeg".into()),
        };
        let desc = entry.validate().unwrap();
        assert_eq!(desc.payload_id, 7);
        assert_eq!(desc.name, "photo.jpg");
        assert_eq!(desc.size_bytes, 1024);
    }

    /// Given a file entry without a name, when validated, then RequiredFieldMissing is returned.
    #[test]
    fn given_file_entry_without_name_when_validated_then_missing_field() {
        let entry = FileEntry {
            payload_id: 1,
            name: None,
            size_bytes: Some(10),
            mime_type: None,
        };
        let err = entry.validate().unwrap_err();
        assert!(matches!(err, NearbyError::RequiredFieldMissing(f) if f.contains("name")));
    }

    /// Given a file entry with an empty name, when validated, then RequiredFieldMissing is returned.
    #[test]
    fn given_file_entry_with_empty_name_when_validated_then_missing_field() {
        let entry = FileEntry {
            payload_id: 1,
            name: Some(String::new()),
            size_bytes: Some(10),
            mime_type: None,
        };
        assert!(entry.validate().is_err());
    }

    /// Given a file entry without a size, when validated, then RequiredFieldMissing is returned.
    #[test]
    fn given_file_entry_without_size_when_validated_then_missing_field() {
        let entry = FileEntry {
            payload_id: 1,
            name: Some("a.txt".into()),
            size_bytes: None,
            mime_type: None,
        };
        let err = entry.validate().unwrap_err();
        assert!(matches!(err, NearbyError::RequiredFieldMissing(f) if f.contains("size")));
    }

    /// Given a text entry without a size, when validated, then RequiredFieldMissing is returned.
    #[test]
    fn given_text_entry_without_size_when_validated_then_missing_field() {
        let entry = TextEntry {
            payload_id: 2,
            title: Some("link".into()),
            size_bytes: None,
        };
        assert!(entry.validate().is_err());
    }

    // ── Inner frame codec ───────────────────────────────────────────

    /// Given an introduction inner frame, when encoded and decoded, then it round-trips.
    #[test]
    fn given_introduction_inner_frame_when_round_tripped_then_matches() {
        let frame = InnerFrame::Introduction(IntroductionPayload {
            transfer_id: "xfer-1".into(),
            files: vec![FileEntry {
                payload_id: 1,
                name: Some("doc.pdf".into()),
                size_bytes: Some(2048),
                mime_type: None,
            }],
            text: None,
            complete: true,
        });
        let bytes = frame.encode().unwrap();
        assert_eq!(InnerFrame::decode(&bytes).unwrap(), frame);
    }

    /// Given a payload chunk, when encoded and decoded, then header fields and body match.
    #[test]
    fn given_payload_chunk_when_round_tripped_then_matches() {
        let frame = InnerFrame::PayloadChunk(PayloadChunk {
            payload_id: 42,
            offset: 65536,
            is_final: true,
            data: vec![0xAA; 300],
        });
        let bytes = frame.encode().unwrap();
        assert_eq!(InnerFrame::decode(&bytes).unwrap(), frame);
    }

    /// Given a chunk with an empty body, when round-tripped, then the empty body is preserved.
    #[test]
    fn given_empty_chunk_when_round_tripped_then_matches() {
        let frame = InnerFrame::PayloadChunk(PayloadChunk {
            payload_id: 9,
            offset: 0,
            is_final: false,
            data: Vec::new(),
        });
        let bytes = frame.encode().unwrap();
        assert_eq!(InnerFrame::decode(&bytes).unwrap(), frame);
    }

    /// Given a disconnect inner frame, when encoded, then it is a single type byte.
    #[test]
    fn given_disconnect_inner_frame_when_encoded_then_single_byte() {
        let bytes = InnerFrame::Disconnect.encode().unwrap();
        assert_eq!(bytes, vec![0x05]);
        assert_eq!(InnerFrame::decode(&bytes).unwrap(), InnerFrame::Disconnect);
    }

    /// Given an empty plaintext, when decoded as an inner frame, then an error is returned.
    #[test]
    fn given_empty_plaintext_when_decoded_then_returns_error() {
        assert!(InnerFrame::decode(&[]).is_err());
    }

    /// Given a truncated chunk header, when decoded, then an error is returned.
    #[test]
    fn given_truncated_chunk_header_when_decoded_then_returns_error() {
        let bytes = [InnerFrameType::PayloadChunk as u8, 0, 0, 0];
        let err = InnerFrame::decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("truncated chunk header"));
    }

    /// Given an unknown inner type byte, when decoded, then an error is returned.
    #[test]
    fn given_unknown_inner_type_when_decoded_then_returns_error() {
        let err = InnerFrame::decode(&[0x7E]).unwrap_err();
        assert!(err.to_string().contains("unknown inner frame type"));
    }
}
