//! Per-direction AEAD channel over the handshake-derived keys.
//!
//! Each direction runs ChaCha20-Poly1305 with its own key and its own
//! monotonically increasing sequence counter. The counter doubles as the
//! nonce, so a replayed or reordered envelope either fails the sequence
//! check or fails authentication. Both failures are terminal.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};

use crate::error::NearbyError;
use crate::handshake::SessionKeys;

/// One sealed message: the sender's sequence number plus the ciphertext.
///
/// Travels as the payload of a `Secure` frame: 8-byte big-endian sequence
/// followed by the ciphertext (which includes the 16-byte tag).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureEnvelope {
    pub seq: u64,
    pub ciphertext: Vec<u8>,
}

impl SecureEnvelope {
    /// Serializes the envelope into frame payload bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.ciphertext.len());
        out.extend_from_slice(&self.seq.to_be_bytes());
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Parses an envelope from frame payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`NearbyError::ProtocolError`] when the payload is shorter
    /// than the sequence header.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, NearbyError> {
        if bytes.len() < 8 {
            return Err(NearbyError::protocol("truncated secure envelope"));
        }
        let seq = u64::from_be_bytes(bytes[0..8].try_into().expect("slice is exactly 8 bytes"));
        Ok(Self {
            seq,
            ciphertext: bytes[8..].to_vec(),
        })
    }
}

/// An established secure channel.
///
/// `seal` and `open` each advance their own direction's counter; the first
/// sealed envelope of a direction carries sequence 1.
pub struct SecureChannel {
    send_cipher: ChaCha20Poly1305,
    recv_cipher: ChaCha20Poly1305,
    send_seq: u64,
    /// Highest sequence accepted so far on the receive direction.
    recv_seq: u64,
}

impl SecureChannel {
    /// Channel for the receiver role: sends with the server key, opens
    /// with the client key.
    #[must_use]
    pub fn responder(keys: &SessionKeys) -> Self {
        Self::new(&keys.server_key, &keys.client_key)
    }

    /// Channel for the sender role: the mirror of [`SecureChannel::responder`].
    #[must_use]
    pub fn initiator(keys: &SessionKeys) -> Self {
        Self::new(&keys.client_key, &keys.server_key)
    }

    fn new(send_key: &[u8; 32], recv_key: &[u8; 32]) -> Self {
        Self {
            send_cipher: ChaCha20Poly1305::new(Key::from_slice(send_key)),
            recv_cipher: ChaCha20Poly1305::new(Key::from_slice(recv_key)),
            send_seq: 0,
            recv_seq: 0,
        }
    }

    /// Encrypts `plaintext` under the next send sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`NearbyError::ProtocolError`] when the counter is exhausted
    /// and [`NearbyError::CryptoFailure`] when encryption fails.
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<SecureEnvelope, NearbyError> {
        let seq = self
            .send_seq
            .checked_add(1)
            .ok_or_else(|| NearbyError::protocol("send sequence exhausted"))?;

        let ciphertext = self
            .send_cipher
            .encrypt(Nonce::from_slice(&nonce_bytes(seq)), plaintext)
            .map_err(|_| NearbyError::CryptoFailure)?;

        self.send_seq = seq;
        Ok(SecureEnvelope { seq, ciphertext })
    }

    /// Authenticates and decrypts an envelope.
    ///
    /// The sequence must be strictly greater than the last accepted one;
    /// gaps are tolerated (the peer may have dropped its own frames), going
    /// backwards is not.
    ///
    /// # Errors
    ///
    /// Returns [`NearbyError::ProtocolError`] on a replayed or reordered
    /// sequence and [`NearbyError::CryptoFailure`] when authentication
    /// fails. Both end the connection.
    pub fn open(&mut self, envelope: &SecureEnvelope) -> Result<Vec<u8>, NearbyError> {
        if envelope.seq <= self.recv_seq {
            return Err(NearbyError::protocol("replayed or out-of-order sequence"));
        }

        let plaintext = self
            .recv_cipher
            .decrypt(Nonce::from_slice(&nonce_bytes(envelope.seq)), envelope.ciphertext.as_slice())
            .map_err(|_| NearbyError::CryptoFailure)?;

        self.recv_seq = envelope.seq;
        Ok(plaintext)
    }
}

/// Nonce layout: 4 zero bytes then the sequence, big-endian.
fn nonce_bytes(seq: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[4..].copy_from_slice(&seq.to_be_bytes());
    nonce
}
