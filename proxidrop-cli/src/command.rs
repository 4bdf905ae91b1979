use tokio::io::BufReader;
use tokio::sync::mpsc;

use proxidrop_engine::manager::{ConsentDecision, ManagerCmd};

use crate::event::PendingConsent;
use crate::ui::{format_size, read_line};

/// Handles a pending consent request by prompting the user to accept,
/// always accept, or decline.
pub async fn handle_pending_consent(
    consent: &PendingConsent,
    cmd_tx: &mpsc::Sender<ManagerCmd>,
    stdin: &mut BufReader<tokio::io::Stdin>,
) {
    println!();
    println!(
        "  📥 Incoming transfer from \"{name}\" ({size})",
        name = consent.device_name,
        size = format_size(consent.total_bytes),
    );
    for file_name in &consent.file_names {
        println!("     File: {file_name}");
    }
    if let Some(title) = &consent.text_title {
        println!("     Text: {title}");
    }
    println!("     PIN : {pin}  ← must match the sender's screen", pin = consent.pin_code);

    loop {
        print!("  [accept/always/decline] > ");
        let _ = std::io::Write::flush(&mut std::io::stdout());

        let Some(answer) = read_line(stdin).await else {
            return;
        };

        let decision = match answer.to_lowercase().as_str() {
            "accept" | "a" | "yes" | "y" => {
                println!("  ✅ Accepting transfer...");
                ConsentDecision {
                    accept: true,
                    remember: false,
                }
            }
            "always" => {
                println!(
                    "  ✅ Accepting and remembering \"{name}\"...",
                    name = consent.device_name
                );
                ConsentDecision {
                    accept: true,
                    remember: true,
                }
            }
            "decline" | "deny" | "d" | "no" | "n" => {
                println!("  🚫 Declining transfer.");
                ConsentDecision {
                    accept: false,
                    remember: false,
                }
            }
            _ => {
                println!("  Please type 'accept', 'always' or 'decline'.");
                continue;
            }
        };

        let _ = cmd_tx
            .send(ManagerCmd::SubmitConsent {
                transfer_id: consent.transfer_id.clone(),
                decision,
            })
            .await;
        return;
    }
}
