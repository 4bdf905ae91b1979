//! Commitment-bound ECDH handshake.
//!
//! Three messages: `ClientInit` (nonce + cipher commitments), `ServerInit`
//! (our ephemeral key), `ClientFinish` (the sender's ephemeral key, which
//! must hash to the commitment sent in `ClientInit`). The commitment binds
//! the sender to its key before it sees ours, so a man in the middle cannot
//! choose keys after the fact; the derived PIN lets both humans confirm
//! they agreed on the same secret.
//!
//! Both roles live here. The receiver runs [`ResponderHandshake`];
//! [`InitiatorHandshake`] is the sending side of the same exchange and is
//! what the test suites drive against the responder.

use hkdf::Hkdf;
use p256::ecdh::{EphemeralSecret, SharedSecret};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::PublicKey;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256, Sha512};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::NearbyError;
use crate::protocol::{
    AlertCode, CipherCommitment, ClientFinishPayload, ClientInitPayload, HandshakeAlertPayload,
    HandshakeCipher, ServerInitPayload, decode_payload,
};

/// Protocol version spoken by this build.
pub const HANDSHAKE_VERSION: u32 = 1;
/// Required length of handshake nonces.
const NONCE_LEN: usize = 32;

const AUTH_LABEL: &[u8] = b"UKEY2 v1 auth";
const NEXT_LABEL: &[u8] = b"UKEY2 v1 next";
const KEY_SALT: &[u8] = b"proxidrop d2d";
const CLIENT_INFO: &[u8] = b"client";
const SERVER_INFO: &[u8] = b"server";

/// Per-direction AEAD keys produced by a completed handshake.
///
/// `client_key` protects sender → receiver traffic, `server_key` the
/// reverse. Wiped on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    pub client_key: [u8; 32],
    pub server_key: [u8; 32],
}

/// Everything a completed handshake hands to the caller.
pub struct CompletedHandshake {
    pub keys: SessionKeys,
    /// Four-digit code derived from the shared secret, shown to both
    /// humans for out-of-band comparison.
    pub pin: String,
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys")
            .field("client_key", &"<redacted>")
            .field("server_key", &"<redacted>")
            .finish()
    }
}

impl std::fmt::Debug for CompletedHandshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletedHandshake")
            .field("keys", &self.keys)
            .field("pin", &self.pin)
            .finish()
    }
}

/// A handshake rejection: the alert code to send back plus the error to
/// report locally.
#[derive(Debug)]
pub struct HandshakeFailure {
    pub code: AlertCode,
    pub error: NearbyError,
}

impl HandshakeFailure {
    fn new(code: AlertCode, error: NearbyError) -> Self {
        Self { code, error }
    }

    fn bad_data(msg: impl Into<String>) -> Self {
        Self::new(AlertCode::BadMessageData, NearbyError::protocol(msg))
    }

    /// The alert payload to send to the peer before closing.
    #[must_use]
    pub fn alert(&self) -> HandshakeAlertPayload {
        HandshakeAlertPayload {
            code: self.code,
            message: self.error.to_string(),
        }
    }
}

/// Receiver side of the handshake.
///
/// Created by [`ResponderHandshake::respond`] once a valid `ClientInit`
/// arrives; consumed by [`ResponderHandshake::finish`]. State is wiped on
/// drop either way.
#[derive(ZeroizeOnDrop)]
pub struct ResponderHandshake {
    #[zeroize(skip)]
    secret: EphemeralSecret,
    /// SHA-512 the sender committed to for its upcoming `ClientFinish`.
    commitment: [u8; 64],
    /// `client_init` bytes followed by `server_init` bytes; the HKDF info
    /// input binding derived keys to this exact exchange.
    transcript: Vec<u8>,
}

impl std::fmt::Debug for ResponderHandshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponderHandshake")
            .field("secret", &"<redacted>")
            .field("commitment", &self.commitment)
            .field("transcript", &self.transcript)
            .finish()
    }
}

impl ResponderHandshake {
    /// Validates a `ClientInit` payload and produces the `ServerInit`
    /// payload bytes to send back.
    ///
    /// # Errors
    ///
    /// Returns a [`HandshakeFailure`] naming the alert to emit when the
    /// message is malformed, the version is unsupported, the nonce has the
    /// wrong length, or no supported cipher commitment is present.
    pub fn respond(client_init: &[u8]) -> Result<(Self, Vec<u8>), HandshakeFailure> {
        let payload: ClientInitPayload = decode_payload(client_init)
            .map_err(|e| HandshakeFailure::bad_data(e.to_string()))?;

        if payload.version != HANDSHAKE_VERSION {
            return Err(HandshakeFailure::new(
                AlertCode::BadVersion,
                NearbyError::protocol(format!("unsupported handshake version: {}", payload.version)),
            ));
        }

        let nonce = hex::decode(&payload.nonce_hex)
            .map_err(|_| HandshakeFailure::new(AlertCode::BadNonce, NearbyError::protocol("nonce is not hex")))?;
        if nonce.len() != NONCE_LEN {
            return Err(HandshakeFailure::new(
                AlertCode::BadNonce,
                NearbyError::protocol(format!("nonce must be {NONCE_LEN} bytes, got {}", nonce.len())),
            ));
        }

        let commitment_hex = payload
            .commitments
            .iter()
            .find(|c| c.cipher == HandshakeCipher::P256Sha512)
            .map(|c| c.commitment_hex.as_str())
            .ok_or_else(|| {
                HandshakeFailure::new(
                    AlertCode::BadHandshakeCipher,
                    NearbyError::protocol("no p256_sha512 commitment offered"),
                )
            })?;

        let commitment: [u8; 64] = hex::decode(commitment_hex)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| HandshakeFailure::bad_data("commitment is not a 64-byte hex string"))?;

        let secret = EphemeralSecret::random(&mut OsRng);
        let public_key_hex = hex::encode(secret.public_key().to_encoded_point(false).as_bytes());

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let server_init = serde_json::to_vec(&ServerInitPayload {
            version: HANDSHAKE_VERSION,
            nonce_hex: hex::encode(nonce_bytes),
            cipher: HandshakeCipher::P256Sha512,
            public_key_hex,
        })
        .map_err(|e| HandshakeFailure::bad_data(format!("payload serialization failed: {e}")))?;

        let mut transcript = Vec::with_capacity(client_init.len() + server_init.len());
        transcript.extend_from_slice(client_init);
        transcript.extend_from_slice(&server_init);

        Ok((
            Self {
                secret,
                commitment,
                transcript,
            },
            server_init,
        ))
    }

    /// Verifies the `ClientFinish` payload against the commitment and
    /// derives the session keys and PIN.
    ///
    /// # Errors
    ///
    /// Returns [`AlertCode::CommitmentMismatch`] with
    /// [`NearbyError::CryptoFailure`] when the payload does not hash to the
    /// committed value, and [`AlertCode::BadMessageData`] when it cannot be
    /// parsed or carries an invalid public key.
    pub fn finish(self, client_finish: &[u8]) -> Result<CompletedHandshake, HandshakeFailure> {
        let digest = Sha512::digest(client_finish);
        if digest[..] != self.commitment[..] {
            return Err(HandshakeFailure::new(
                AlertCode::CommitmentMismatch,
                NearbyError::CryptoFailure,
            ));
        }

        let payload: ClientFinishPayload = decode_payload(client_finish)
            .map_err(|e| HandshakeFailure::bad_data(e.to_string()))?;

        let client_public = hex::decode(&payload.public_key_hex)
            .ok()
            .and_then(|b| PublicKey::from_sec1_bytes(&b).ok())
            .ok_or_else(|| {
                HandshakeFailure::new(AlertCode::BadMessageData, NearbyError::CryptoFailure)
            })?;

        let shared = self.secret.diffie_hellman(&client_public);
        let (keys, pin) = derive_session(&shared, &self.transcript)
            .map_err(|e| HandshakeFailure::new(AlertCode::BadMessageData, e))?;

        Ok(CompletedHandshake { keys, pin })
    }
}

/// Sender side of the handshake.
///
/// Pre-serializes its `ClientFinish` at [`InitiatorHandshake::start`] time
/// so the commitment in `ClientInit` always matches the bytes later sent.
#[derive(ZeroizeOnDrop)]
pub struct InitiatorHandshake {
    #[zeroize(skip)]
    secret: EphemeralSecret,
    client_init: Vec<u8>,
    client_finish: Vec<u8>,
}

impl InitiatorHandshake {
    /// Generates an ephemeral key and returns the `ClientInit` payload
    /// bytes to send.
    ///
    /// # Errors
    ///
    /// Returns [`NearbyError::ProtocolError`] if payload serialization fails.
    pub fn start() -> Result<(Self, Vec<u8>), NearbyError> {
        let secret = EphemeralSecret::random(&mut OsRng);
        let public_key_hex = hex::encode(secret.public_key().to_encoded_point(false).as_bytes());

        let client_finish = serde_json::to_vec(&ClientFinishPayload { public_key_hex })
            .map_err(|e| NearbyError::protocol(format!("payload serialization failed: {e}")))?;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let client_init = serde_json::to_vec(&ClientInitPayload {
            version: HANDSHAKE_VERSION,
            nonce_hex: hex::encode(nonce),
            commitments: vec![CipherCommitment {
                cipher: HandshakeCipher::P256Sha512,
                commitment_hex: hex::encode(Sha512::digest(&client_finish)),
            }],
        })
        .map_err(|e| NearbyError::protocol(format!("payload serialization failed: {e}")))?;

        Ok((
            Self {
                secret,
                client_init: client_init.clone(),
                client_finish,
            },
            client_init,
        ))
    }

    /// Processes the `ServerInit` payload; returns the `ClientFinish`
    /// payload bytes to send plus the completed handshake.
    ///
    /// # Errors
    ///
    /// Returns [`NearbyError::ProtocolError`] on a malformed or
    /// incompatible `ServerInit` and [`NearbyError::CryptoFailure`] on an
    /// invalid server public key.
    pub fn finish(self, server_init: &[u8]) -> Result<(Vec<u8>, CompletedHandshake), NearbyError> {
        let payload: ServerInitPayload = decode_payload(server_init)?;

        if payload.version != HANDSHAKE_VERSION {
            return Err(NearbyError::protocol(format!(
                "unsupported handshake version: {}",
                payload.version
            )));
        }
        if payload.cipher != HandshakeCipher::P256Sha512 {
            return Err(NearbyError::protocol("server chose an unsupported cipher"));
        }
        let nonce = hex::decode(&payload.nonce_hex)
            .map_err(|_| NearbyError::protocol("nonce is not hex"))?;
        if nonce.len() != NONCE_LEN {
            return Err(NearbyError::protocol(format!(
                "nonce must be {NONCE_LEN} bytes, got {}",
                nonce.len()
            )));
        }

        let server_public = hex::decode(&payload.public_key_hex)
            .ok()
            .and_then(|b| PublicKey::from_sec1_bytes(&b).ok())
            .ok_or(NearbyError::CryptoFailure)?;

        let shared = self.secret.diffie_hellman(&server_public);
        let mut transcript = Vec::with_capacity(self.client_init.len() + server_init.len());
        transcript.extend_from_slice(&self.client_init);
        transcript.extend_from_slice(server_init);

        let (keys, pin) = derive_session(&shared, &transcript)?;
        transcript.zeroize();

        Ok((self.client_finish.clone(), CompletedHandshake { keys, pin }))
    }
}

/// Runs the two HKDF stages over the ECDH output.
///
/// The shared secret is hashed once, then expanded twice against the
/// handshake transcript: the auth string feeds the PIN, the next secret
/// feeds the per-direction channel keys.
fn derive_session(shared: &SharedSecret, transcript: &[u8]) -> Result<(SessionKeys, String), NearbyError> {
    let ikm: Zeroizing<[u8; 32]> = Zeroizing::new(Sha256::digest(shared.raw_secret_bytes()).into());

    let auth = expand(AUTH_LABEL, &ikm[..], transcript)?;
    let next = expand(NEXT_LABEL, &ikm[..], transcript)?;
    let client_key = expand(KEY_SALT, &next[..], CLIENT_INFO)?;
    let server_key = expand(KEY_SALT, &next[..], SERVER_INFO)?;

    let pin = to_pin_string(&auth[..]);
    Ok((
        SessionKeys {
            client_key: *client_key,
            server_key: *server_key,
        },
        pin,
    ))
}

/// One HKDF-SHA256 extract-and-expand producing 32 bytes.
fn expand(salt: &[u8], ikm: &[u8], info: &[u8]) -> Result<Zeroizing<[u8; 32]>, NearbyError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = Zeroizing::new([0u8; 32]);
    hk.expand(info, &mut okm[..])
        .map_err(|_| NearbyError::CryptoFailure)?;
    Ok(okm)
}

/// Folds the auth string into a four-digit code.
///
/// Signed-byte polynomial hash modulo a prime, rendered zero-padded.
fn to_pin_string(auth: &[u8]) -> String {
    const MODULO: i64 = 9973;
    const MULTIPLIER: i64 = 31;

    let mut hash: i64 = 0;
    let mut multiplier: i64 = 1;
    for &byte in auth {
        hash = (hash + i64::from(byte as i8) * multiplier) % MODULO;
        multiplier = (multiplier * MULTIPLIER) % MODULO;
    }
    format!("{:04}", hash.abs())
}
