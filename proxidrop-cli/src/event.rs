use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, mpsc};

use proxidrop_core::error::NearbyError;
use proxidrop_engine::delegate::{
    RemoteDeviceInfo, ShareDelegate, TransferMetadata, TransferSummary,
};
use proxidrop_engine::manager::ManagerEvent;

use crate::ui::print_prompt;

/// Consent request waiting for user input.
pub struct PendingConsent {
    pub transfer_id: String,
    pub device_name: String,
    pub pin_code: String,
    pub file_names: Vec<String>,
    pub text_title: Option<String>,
    pub total_bytes: u64,
}

/// Terminal-backed [`ShareDelegate`].
///
/// Consent requests are forwarded to the main prompt loop over a channel;
/// outcomes are printed directly. Remembered devices start from the
/// `--remember` flags and grow when the user answers `always`.
pub struct TerminalDelegate {
    pending_tx: mpsc::UnboundedSender<PendingConsent>,
    remembered: Mutex<HashSet<String>>,
    auto_copy_text: bool,
}

impl TerminalDelegate {
    pub fn new(
        pending_tx: mpsc::UnboundedSender<PendingConsent>,
        remembered: Vec<String>,
        auto_copy_text: bool,
    ) -> Self {
        Self {
            pending_tx,
            remembered: Mutex::new(remembered.into_iter().collect()),
            auto_copy_text,
        }
    }

    fn remembered(&self) -> MutexGuard<'_, HashSet<String>> {
        self.remembered.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ShareDelegate for TerminalDelegate {
    fn request_consent(&self, metadata: &TransferMetadata, device: &RemoteDeviceInfo) {
        let _ = self.pending_tx.send(PendingConsent {
            transfer_id: metadata.transfer_id.clone(),
            device_name: device.name.clone(),
            pin_code: metadata.pin_code.clone(),
            file_names: metadata.files.iter().map(|f| f.name.clone()).collect(),
            text_title: metadata.text.as_ref().map(|t| t.title.clone()),
            total_bytes: metadata.total_bytes(),
        });
    }

    fn report_outcome(&self, transfer_id: &str, outcome: Result<TransferSummary, NearbyError>) {
        match outcome {
            Ok(summary) => {
                println!("\n  🎉 Transfer {transfer_id} complete!");
                for path in &summary.stored_files {
                    println!("     Saved {}", path.display());
                }
                if let Some(text) = &summary.text_body {
                    println!("     Text: {text}");
                }
            }
            Err(e) if e.is_cancellation() => {
                println!("\n  🚫 Transfer {transfer_id}: {e}");
            }
            Err(e) => {
                println!("\n  ❌ Transfer {transfer_id} failed: {e}");
            }
        }
        print_prompt();
    }

    fn is_remembered(&self, device_name: &str) -> bool {
        self.remembered().contains(device_name)
    }

    fn auto_copy_text_enabled(&self) -> bool {
        self.auto_copy_text
    }

    fn remember_device(&self, device_name: &str) {
        self.remembered().insert(device_name.to_string());
    }
}

/// Spawns a task that listens for manager events and prints them.
pub fn spawn_event_printer(mut events_rx: broadcast::Receiver<ManagerEvent>) {
    tokio::spawn(async move {
        loop {
            match events_rx.recv().await {
                Ok(ManagerEvent::Visible { addr }) => {
                    println!("\n  ✔ Visible to senders on {addr}");
                    print_prompt();
                }
                Ok(ManagerEvent::Invisible) => {
                    println!("\n  ⏹ No longer visible");
                    print_prompt();
                }
                Ok(ManagerEvent::SessionStarted { session_id, peer }) => {
                    println!("\n  📡 Session #{session_id} — sender connected from {peer}");
                    print_prompt();
                }
                Ok(ManagerEvent::SessionEnded { session_id }) => {
                    println!("  👋 Session #{session_id} finished");
                    print_prompt();
                }
                Ok(ManagerEvent::Error { message }) => {
                    println!("\n  ❌ Manager error: {message}");
                    print_prompt();
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    println!("\n  ⚠ Missed {n} events");
                    print_prompt();
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delegate_with(remembered: Vec<String>, auto_copy: bool) -> TerminalDelegate {
        let (tx, _rx) = mpsc::unbounded_channel();
        TerminalDelegate::new(tx, remembered, auto_copy)
    }

    /// Given a --remember flag, when queried, then the device skips the prompt.
    #[test]
    fn given_remember_flag_when_queried_then_device_is_remembered() {
        let delegate = delegate_with(vec!["Pixel 9".into()], false);
        assert!(delegate.is_remembered("Pixel 9"));
        assert!(!delegate.is_remembered("Unknown"));
    }

    /// Given an `always` answer, when the device is remembered, then later queries skip the prompt.
    #[test]
    fn given_remember_device_call_when_queried_again_then_remembered() {
        let delegate = delegate_with(Vec::new(), false);
        assert!(!delegate.is_remembered("Laptop"));
        delegate.remember_device("Laptop");
        assert!(delegate.is_remembered("Laptop"));
    }

    /// Given the auto-copy flag, when queried, then text auto-accept is enabled.
    #[test]
    fn given_auto_copy_flag_when_queried_then_enabled() {
        assert!(delegate_with(Vec::new(), true).auto_copy_text_enabled());
        assert!(!delegate_with(Vec::new(), false).auto_copy_text_enabled());
    }
}
