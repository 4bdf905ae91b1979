//! # proxidrop-engine
//!
//! Runtime logic for the proxidrop proximity-share receiver, embedded into
//! the CLI shell.
//!
//! This crate provides:
//! - **Share manager**: owns visibility (bind/drop the listener), spawns one
//!   session task per accepted connection, and routes consent decisions
//! - **Transfer session state machine**: connection request → handshake →
//!   metadata → consent → transfer, ending in exactly one terminal state
//! - **Delegate contract**: the host application supplies consent prompts
//!   and receives outcome reports through [`delegate::ShareDelegate`]
//! - **TCP transport**: the production `Connection` / `Listener`
//!   implementation; tests drive it over loopback TCP

pub mod delegate;
pub mod manager;
pub mod session;
pub mod tcp;
