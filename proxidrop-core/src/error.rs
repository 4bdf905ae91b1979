use std::fmt;

use thiserror::Error;

/// Why a transfer ended without completing.
///
/// A cancellation is not a defect: the connection is torn down and the
/// outcome is reported, but nothing went *wrong* at the protocol level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The local user declined the transfer.
    UserDeclined,
    /// No consent decision arrived before the deadline.
    Timeout,
    /// The remote end disconnected before the transfer finished.
    RemoteDisconnect,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserDeclined => write!(f, "declined by user"),
            Self::Timeout => write!(f, "consent timed out"),
            Self::RemoteDisconnect => write!(f, "remote disconnected"),
        }
    }
}

/// Errors produced by the receive protocol.
///
/// Every variant is terminal for the connection it occurs on. There is no
/// retry path: the session reports the outcome once and tears down.
#[derive(Debug, Error)]
pub enum NearbyError {
    /// An underlying read, write, or filesystem operation failed.
    #[error("i/o failure")]
    InputOutput(#[from] std::io::Error),

    /// The remote end violated the wire protocol.
    #[error("protocol violation: {0}")]
    ProtocolError(String),

    /// A message omitted a field the protocol requires.
    #[error("required field missing: {0}")]
    RequiredFieldMissing(String),

    /// Key agreement, commitment verification, or AEAD opening failed.
    ///
    /// Deliberately carries no detail. Do not leak failure modes.
    #[error("cryptographic failure")]
    CryptoFailure,

    /// The transfer was cancelled before completion.
    #[error("transfer canceled: {0}")]
    Canceled(CancelReason),
}

impl NearbyError {
    /// Builds a [`NearbyError::ProtocolError`] from anything displayable.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolError(msg.into())
    }

    /// Builds a [`NearbyError::RequiredFieldMissing`] naming the field.
    pub fn missing(field: impl Into<String>) -> Self {
        Self::RequiredFieldMissing(field.into())
    }

    /// True for [`NearbyError::Canceled`], which ends a session without
    /// counting as a defect.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Canceled(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Given each cancel reason, when displayed, then the message names the cause.
    #[test]
    fn given_cancel_reasons_when_displayed_then_messages_name_cause() {
        assert_eq!(CancelReason::UserDeclined.to_string(), "declined by user");
        assert_eq!(CancelReason::Timeout.to_string(), "consent timed out");
        assert_eq!(
            CancelReason::RemoteDisconnect.to_string(),
            "remote disconnected"
        );
    }

    /// Given a canceled error, when queried, then it is classified as a cancellation.
    #[test]
    fn given_canceled_error_when_classified_then_is_cancellation() {
        assert!(NearbyError::Canceled(CancelReason::Timeout).is_cancellation());
        assert!(!NearbyError::CryptoFailure.is_cancellation());
        assert!(!NearbyError::protocol("x").is_cancellation());
    }

    /// Given an io::Error, when converted, then it becomes InputOutput.
    #[test]
    fn given_io_error_when_converted_then_becomes_input_output() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: NearbyError = io.into();
        assert!(matches!(err, NearbyError::InputOutput(_)));
    }

    /// Given a crypto failure, when displayed, then no detail is leaked.
    #[test]
    fn given_crypto_failure_when_displayed_then_message_is_generic() {
        assert_eq!(NearbyError::CryptoFailure.to_string(), "cryptographic failure");
    }
}
