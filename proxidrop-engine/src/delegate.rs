use std::path::PathBuf;

use proxidrop_core::error::NearbyError;
use proxidrop_core::protocol::{FileDescriptor, TextDescriptor};

/// Identity of the device on the other end of a connection.
///
/// The name and model are self-reported and unauthenticated; show them,
/// do not trust them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDeviceInfo {
    pub name: String,
    pub model: Option<String>,
    /// Transport-level peer address.
    pub peer: String,
}

/// Everything known about an offered transfer at consent time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferMetadata {
    pub transfer_id: String,
    pub files: Vec<FileDescriptor>,
    pub text: Option<TextDescriptor>,
    /// Handshake-derived code, shown so the user can compare it with the
    /// sender's screen before accepting.
    pub pin_code: String,
}

impl TransferMetadata {
    /// True when the transfer carries a text body and no files.
    #[must_use]
    pub fn is_text_only(&self) -> bool {
        self.files.is_empty() && self.text.is_some()
    }

    /// Declared size of all payloads combined.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        let files: u64 = self.files.iter().map(|f| f.size_bytes).sum();
        files + self.text.as_ref().map_or(0, |t| t.size_bytes)
    }
}

/// What a completed transfer delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSummary {
    pub transfer_id: String,
    /// Final paths of persisted files, post collision rename.
    pub stored_files: Vec<PathBuf>,
    /// Body of a received text payload, for the host to copy or open.
    pub text_body: Option<String>,
}

/// Host-application contract.
///
/// The engine drives the protocol; the delegate supplies policy and
/// presentation. Implementations must not block: `request_consent` is a
/// notification, and the decision comes back through the manager's
/// `SubmitConsent` command.
pub trait ShareDelegate: Send + Sync + 'static {
    /// A transfer's metadata is complete and needs a consent decision.
    ///
    /// Called at most once per session, and not at all when policy
    /// auto-accepts.
    fn request_consent(&self, metadata: &TransferMetadata, device: &RemoteDeviceInfo);

    /// The session reached a terminal state. Called exactly once per
    /// session, for completions, declines, cancellations, and failures
    /// alike.
    fn report_outcome(&self, transfer_id: &str, outcome: Result<TransferSummary, NearbyError>);

    /// Devices the host trusts enough to skip the consent prompt.
    fn is_remembered(&self, device_name: &str) -> bool {
        let _ = device_name;
        false
    }

    /// When true, text-only transfers are accepted without a prompt.
    fn auto_copy_text_enabled(&self) -> bool {
        false
    }

    /// The user asked, while accepting, to trust this device from now on.
    fn remember_device(&self, device_name: &str) {
        let _ = device_name;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(payload_id: u64, size: u64) -> FileDescriptor {
        FileDescriptor {
            payload_id,
            name: format!("f{payload_id}"),
            size_bytes: size,
            mime_type: None,
        }
    }

    /// Given a transfer with only a text body, when classified, then it is text-only.
    #[test]
    fn given_text_without_files_when_classified_then_text_only() {
        let metadata = TransferMetadata {
            transfer_id: "t".into(),
            files: Vec::new(),
            text: Some(TextDescriptor {
                payload_id: 1,
                title: "link".into(),
                size_bytes: 20,
            }),
            pin_code: "0000".into(),
        };
        assert!(metadata.is_text_only());
        assert_eq!(metadata.total_bytes(), 20);
    }

    /// Given files alongside text, when classified, then it is not text-only and sizes add up.
    #[test]
    fn given_files_and_text_when_classified_then_not_text_only() {
        let metadata = TransferMetadata {
            transfer_id: "t".into(),
            files: vec![file(1, 100), file(2, 50)],
            text: Some(TextDescriptor {
                payload_id: 3,
                title: String::new(),
                size_bytes: 7,
            }),
            pin_code: "0000".into(),
        };
        assert!(!metadata.is_text_only());
        assert_eq!(metadata.total_bytes(), 157);
    }
}
