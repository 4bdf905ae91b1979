//! # proxidrop-core
//!
//! Shared building blocks for the proxidrop proximity-share receive protocol.
//!
//! This crate provides the foundational types and utilities used by
//! [`proxidrop-engine`] and the binary crate (`proxidrop-cli`).
//!
//! ## Responsibilities
//!
//! - **Protocol primitives** — frame format (length / type / payload), typed
//!   JSON payloads for the handshake and control messages, and the binary
//!   inner-frame codec used inside the secure channel.
//!
//! - **Handshake** — commitment-bound ECDH key agreement with per-direction
//!   key derivation and the human-verifiable PIN.
//!
//! - **Secure channel** — ChaCha20-Poly1305 sealing and opening with
//!   per-direction sequence counters.
//!
//! - **Transport traits** — byte-stream `Connection` / `Listener` /
//!   `ListenerFactory` contract implemented by the engine's TCP transport
//!   and by in-memory test doubles.
//!
//! - **Filesystem helpers** — filename sanitisation and collision rename
//!   strategy (e.g. `file (1).ext`) for received payloads.

pub mod channel;
pub mod error;
pub mod fsutil;
pub mod handshake;
pub mod protocol;
pub mod transport;
