use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use proxidrop_core::transport::{Connection, Listener, ListenerFactory};

use crate::delegate::ShareDelegate;
use crate::session::{run_session, SessionConfig};

// ── Manager commands (host → manager) ───────────────────────────────

/// Commands sent by the host application to control the manager.
#[derive(Clone, Debug)]
pub enum ManagerCmd {
    /// Bind a listener on `addr` and start accepting sender connections.
    SetVisible { addr: String },
    /// Stop accepting new connections (drop the listener). Sessions
    /// already in flight keep running.
    SetInvisible,
    /// Resolve a pending consent prompt for the given transfer.
    SubmitConsent {
        transfer_id: String,
        decision: ConsentDecision,
    },
    /// Shut down the manager and abort all live sessions.
    ShutDown,
}

/// The host's answer to a consent prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsentDecision {
    pub accept: bool,
    /// Skip the prompt for this device from now on.
    pub remember: bool,
}

// ── Manager events (manager → host) ─────────────────────────────────

/// Events emitted by the manager for the host application to observe.
#[derive(Clone, Debug)]
pub enum ManagerEvent {
    /// The listener is bound and senders can connect on `addr`.
    Visible { addr: String },
    /// The listener has been dropped.
    Invisible,
    /// An inbound connection was accepted and a session spawned for it.
    SessionStarted { session_id: u64, peer: String },
    /// A session reached a terminal state. The outcome details go to the
    /// delegate; this event only tells the host the slot is free.
    SessionEnded { session_id: u64 },
    /// A non-fatal error occurred inside the manager.
    Error { message: String },
}

// ── Consent routing ─────────────────────────────────────────────────

/// Pending consent prompts, keyed by transfer id.
///
/// A session registers itself before prompting the delegate and parks on
/// the returned receiver; the manager resolves the entry when the host
/// submits a decision. One shared map behind one lock.
#[derive(Clone, Default)]
pub(crate) struct ConsentRegistry {
    inner: Arc<Mutex<HashMap<String, oneshot::Sender<ConsentDecision>>>>,
}

impl ConsentRegistry {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<ConsentDecision>>> {
        // A poisoning panic in a session task does not invalidate the map.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn register(&self, transfer_id: &str) -> oneshot::Receiver<ConsentDecision> {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(transfer_id.to_string(), tx);
        rx
    }

    pub(crate) fn remove(&self, transfer_id: &str) {
        self.lock().remove(transfer_id);
    }

    /// Delivers a decision to the waiting session. Returns `false` when no
    /// session is waiting under this transfer id.
    pub(crate) fn resolve(&self, transfer_id: &str, decision: ConsentDecision) -> bool {
        match self.lock().remove(transfer_id) {
            Some(tx) => tx.send(decision).is_ok(),
            None => false,
        }
    }
}

// ── Manager handle ──────────────────────────────────────────────────

/// Handle returned by [`ShareManager::start`]. Lets the host send
/// commands and subscribe to events.
pub struct ManagerHandle {
    pub cmd_tx: mpsc::Sender<ManagerCmd>,
    pub events_tx: broadcast::Sender<ManagerEvent>,
}

// ── Manager ─────────────────────────────────────────────────────────

/// Configuration shared by all sessions created by the manager.
#[derive(Clone, Debug)]
pub struct ManagerConfig {
    /// Human-readable name for this device, used in logs.
    pub device_name: String,
    /// Directory where received files are stored.
    pub receive_dir: PathBuf,
    /// How long a session waits for the host's consent decision.
    pub consent_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            device_name: "proxidrop".into(),
            receive_dir: PathBuf::from("/tmp/proxidrop"),
            consent_timeout: Duration::from_secs(60),
        }
    }
}

/// The proxidrop receive manager.
///
/// Owns visibility (the listener) and the registry of live sessions.
/// Each accepted connection gets its own session task that runs the
/// handshake, the consent gate, and the transfer strictly in sequence.
///
/// Generic over `F: ListenerFactory` so alternate transports can be
/// plugged in without changing the manager code.
pub struct ShareManager;

impl ShareManager {
    /// Spawn the manager event loop and return a handle to control it.
    ///
    /// The manager starts invisible — no listener is active until a
    /// [`ManagerCmd::SetVisible`] command arrives.
    pub fn start<F>(
        self,
        factory: F,
        config: ManagerConfig,
        delegate: Arc<dyn ShareDelegate>,
    ) -> ManagerHandle
    where
        F: ListenerFactory,
    {
        let (cmd_tx, cmd_rx) = mpsc::channel::<ManagerCmd>(32);
        let (events_tx, _) = broadcast::channel::<ManagerEvent>(128);

        let events = events_tx.clone();

        info!("Spawning share manager event loop");

        tokio::spawn(run_manager_loop::<F>(factory, config, delegate, cmd_rx, events));

        debug!("Share manager started successfully");
        ManagerHandle { cmd_tx, events_tx }
    }
}

/// The main manager event loop, extracted as a standalone async fn so that
/// the generic bounds don't infect `ShareManager` itself.
#[allow(clippy::too_many_lines)]
async fn run_manager_loop<F>(
    factory: F,
    config: ManagerConfig,
    delegate: Arc<dyn ShareDelegate>,
    mut cmd_rx: mpsc::Receiver<ManagerCmd>,
    events: broadcast::Sender<ManagerEvent>,
) where
    F: ListenerFactory,
{
    debug!("Share manager event loop running");

    let mut listener: Option<F::L> = None;
    let mut next_session_id: u64 = 1;
    let mut sessions: Vec<(u64, tokio::task::JoinHandle<()>)> = Vec::new();
    let consents = ConsentRegistry::default();
    let (done_tx, mut done_rx) = mpsc::channel::<u64>(32);

    loop {
        tokio::select! {
            biased;

            // ── Commands ────────────────────────────────────────
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ManagerCmd::SetVisible { addr }) => {
                        if listener.is_some() {
                            debug!("Already visible, ignoring SetVisible");
                            continue;
                        }
                        info!(addr = %addr, "Received SetVisible command");
                        match factory.bind(&addr).await {
                            Ok(l) => {
                                let bound_addr = l.local_addr();
                                info!(
                                    device = %config.device_name,
                                    addr = %bound_addr,
                                    "Visible to nearby senders"
                                );
                                listener = Some(l);
                                let _ = events.send(ManagerEvent::Visible {
                                    addr: bound_addr,
                                });
                            }
                            Err(e) => {
                                warn!(error = %e, "Failed to bind listener");
                                let _ = events.send(ManagerEvent::Error {
                                    message: e.to_string(),
                                });
                            }
                        }
                    }

                    Some(ManagerCmd::SetInvisible) => {
                        if listener.take().is_some() {
                            info!("No longer visible");
                            let _ = events.send(ManagerEvent::Invisible);
                        } else {
                            debug!("Already invisible, ignoring SetInvisible");
                        }
                    }

                    Some(ManagerCmd::SubmitConsent { transfer_id, decision }) => {
                        if consents.resolve(&transfer_id, decision) {
                            debug!(
                                transfer_id = %transfer_id,
                                accept = decision.accept,
                                "Consent decision routed to session"
                            );
                        } else {
                            debug!(
                                transfer_id = %transfer_id,
                                "No pending consent for transfer, ignoring"
                            );
                        }
                    }

                    Some(ManagerCmd::ShutDown) => {
                        info!("Received ShutDown command");
                        for (id, handle) in &sessions {
                            debug!(session_id = id, "Aborting session");
                            handle.abort();
                        }
                        break;
                    }

                    None => {
                        debug!("Command channel closed, shutting down");
                        break;
                    }
                }
            }

            // ── Session teardown ────────────────────────────────
            Some(session_id) = done_rx.recv() => {
                debug!(session_id, "Session task finished");
                sessions.retain(|(id, _)| *id != session_id);
            }

            // ── Accept inbound connections ───────────────────────
            result = async {
                if let Some(l) = listener.as_mut() {
                    l.accept().await
                } else {
                    std::future::pending().await
                }
            }, if listener.is_some() => {
                match result {
                    Ok(conn) => {
                        let peer = Connection::peer(&conn);
                        let sid = next_session_id;
                        next_session_id += 1;

                        info!(session_id = sid, peer = %peer, "Connection accepted");
                        let _ = events.send(ManagerEvent::SessionStarted {
                            session_id: sid,
                            peer,
                        });

                        let session_config = SessionConfig {
                            receive_dir: config.receive_dir.clone(),
                            consent_timeout: config.consent_timeout,
                        };
                        let handle = tokio::spawn(run_session(
                            conn,
                            sid,
                            session_config,
                            delegate.clone(),
                            consents.clone(),
                            events.clone(),
                            done_tx.clone(),
                        ));
                        sessions.push((sid, handle));
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        let _ = events.send(ManagerEvent::Error {
                            message: format!("{e}"),
                        });
                    }
                }
            }
        }
    }

    info!("Share manager event loop stopped");
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::net::TcpStream;

    use proxidrop_core::error::NearbyError;

    use super::*;
    use crate::delegate::{RemoteDeviceInfo, ShareDelegate, TransferMetadata, TransferSummary};
    use crate::tcp::TcpListenerFactory;

    /// Delegate that ignores everything, for manager-level tests.
    struct SilentDelegate;

    impl ShareDelegate for SilentDelegate {
        fn request_consent(&self, _metadata: &TransferMetadata, _device: &RemoteDeviceInfo) {}

        fn report_outcome(
            &self,
            _transfer_id: &str,
            _outcome: Result<TransferSummary, NearbyError>,
        ) {
        }
    }

    fn start_tcp_manager(
        config: ManagerConfig,
    ) -> (ManagerHandle, broadcast::Receiver<ManagerEvent>) {
        let manager = ShareManager;
        let handle = manager.start(TcpListenerFactory, config, Arc::new(SilentDelegate));
        let events_rx = handle.events_tx.subscribe();
        (handle, events_rx)
    }

    fn default_test_config() -> ManagerConfig {
        let dir = tempfile::tempdir().expect("tempdir");
        ManagerConfig {
            device_name: "TestDevice".into(),
            receive_dir: dir.path().to_path_buf(),
            consent_timeout: Duration::from_secs(5),
        }
    }

    /// Helper: wait for a specific event, with a timeout.
    async fn wait_for_event(
        rx: &mut broadcast::Receiver<ManagerEvent>,
        matches_fn: impl Fn(&ManagerEvent) -> bool,
    ) -> ManagerEvent {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Ok(ev) if matches_fn(&ev) => return ev,
                    Ok(_) => {}
                    Err(e) => panic!("event channel error: {e}"),
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    #[tokio::test]
    async fn when_set_visible_expect_visible_event() {
        let (handle, mut events_rx) = start_tcp_manager(default_test_config());

        handle
            .cmd_tx
            .send(ManagerCmd::SetVisible {
                addr: "127.0.0.1:0".into(),
            })
            .await
            .unwrap();

        let ev = wait_for_event(&mut events_rx, |e| {
            matches!(e, ManagerEvent::Visible { .. })
        })
        .await;

        assert!(matches!(ev, ManagerEvent::Visible { .. }));
        handle.cmd_tx.send(ManagerCmd::ShutDown).await.unwrap();
    }

    #[tokio::test]
    async fn when_set_invisible_expect_invisible_event() {
        let (handle, mut events_rx) = start_tcp_manager(default_test_config());

        handle
            .cmd_tx
            .send(ManagerCmd::SetVisible {
                addr: "127.0.0.1:0".into(),
            })
            .await
            .unwrap();

        wait_for_event(&mut events_rx, |e| {
            matches!(e, ManagerEvent::Visible { .. })
        })
        .await;

        handle.cmd_tx.send(ManagerCmd::SetInvisible).await.unwrap();

        let ev = wait_for_event(&mut events_rx, |e| {
            matches!(e, ManagerEvent::Invisible)
        })
        .await;

        assert!(matches!(ev, ManagerEvent::Invisible));
        handle.cmd_tx.send(ManagerCmd::ShutDown).await.unwrap();
    }

    #[tokio::test]
    async fn when_already_visible_then_second_set_visible_is_ignored() {
        let (handle, mut events_rx) = start_tcp_manager(default_test_config());

        handle
            .cmd_tx
            .send(ManagerCmd::SetVisible {
                addr: "127.0.0.1:0".into(),
            })
            .await
            .unwrap();

        wait_for_event(&mut events_rx, |e| {
            matches!(e, ManagerEvent::Visible { .. })
        })
        .await;

        // A second SetVisible must not rebind or emit a second event.
        handle
            .cmd_tx
            .send(ManagerCmd::SetVisible {
                addr: "127.0.0.1:0".into(),
            })
            .await
            .unwrap();
        handle.cmd_tx.send(ManagerCmd::SetInvisible).await.unwrap();

        let ev = tokio::time::timeout(Duration::from_secs(5), events_rx.recv())
            .await
            .expect("timed out")
            .unwrap();
        assert!(
            matches!(ev, ManagerEvent::Invisible),
            "expected Invisible directly after the ignored SetVisible, got {ev:?}"
        );

        handle.cmd_tx.send(ManagerCmd::ShutDown).await.unwrap();
    }

    #[tokio::test]
    async fn when_invisible_then_set_invisible_emits_nothing() {
        let (handle, mut events_rx) = start_tcp_manager(default_test_config());

        handle.cmd_tx.send(ManagerCmd::SetInvisible).await.unwrap();
        handle
            .cmd_tx
            .send(ManagerCmd::SetVisible {
                addr: "127.0.0.1:0".into(),
            })
            .await
            .unwrap();

        // The first event must be Visible, not a spurious Invisible.
        let ev = tokio::time::timeout(Duration::from_secs(5), events_rx.recv())
            .await
            .expect("timed out")
            .unwrap();
        assert!(matches!(ev, ManagerEvent::Visible { .. }));

        handle.cmd_tx.send(ManagerCmd::ShutDown).await.unwrap();
    }

    #[tokio::test]
    async fn when_bind_fails_expect_error_event() {
        let (handle, mut events_rx) = start_tcp_manager(default_test_config());

        handle
            .cmd_tx
            .send(ManagerCmd::SetVisible {
                addr: "999.999.999.999:0".into(),
            })
            .await
            .unwrap();

        let ev = wait_for_event(&mut events_rx, |e| matches!(e, ManagerEvent::Error { .. })).await;
        assert!(matches!(ev, ManagerEvent::Error { .. }));

        handle.cmd_tx.send(ManagerCmd::ShutDown).await.unwrap();
    }

    #[tokio::test]
    async fn when_client_connects_expect_session_started() {
        let (handle, mut events_rx) = start_tcp_manager(default_test_config());

        handle
            .cmd_tx
            .send(ManagerCmd::SetVisible {
                addr: "127.0.0.1:0".into(),
            })
            .await
            .unwrap();

        let ManagerEvent::Visible { addr } = wait_for_event(&mut events_rx, |e| {
            matches!(e, ManagerEvent::Visible { .. })
        })
        .await
        else {
            unreachable!()
        };

        // A raw TCP connection is enough to trigger session creation.
        let _client = TcpStream::connect(&addr).await.unwrap();

        let ev = wait_for_event(&mut events_rx, |e| {
            matches!(e, ManagerEvent::SessionStarted { .. })
        })
        .await;

        assert!(matches!(ev, ManagerEvent::SessionStarted { .. }));
        handle.cmd_tx.send(ManagerCmd::ShutDown).await.unwrap();
    }

    #[tokio::test]
    async fn when_consent_for_unknown_transfer_then_no_panic() {
        let (handle, _events_rx) = start_tcp_manager(default_test_config());

        handle
            .cmd_tx
            .send(ManagerCmd::SubmitConsent {
                transfer_id: "no-such-transfer".into(),
                decision: ConsentDecision {
                    accept: true,
                    remember: false,
                },
            })
            .await
            .unwrap();

        // Give the manager a moment to process.
        tokio::time::sleep(Duration::from_millis(50)).await;

        handle.cmd_tx.send(ManagerCmd::ShutDown).await.unwrap();
    }

    // ── Consent registry ────────────────────────────────────────────

    /// Given a registered transfer, when resolved, then the decision reaches the receiver.
    #[test]
    fn given_registered_transfer_when_resolved_then_decision_delivered() {
        let registry = ConsentRegistry::default();
        let mut rx = registry.register("xfer-1");

        let routed = registry.resolve(
            "xfer-1",
            ConsentDecision {
                accept: true,
                remember: true,
            },
        );
        assert!(routed);

        let decision = rx.try_recv().unwrap();
        assert!(decision.accept);
        assert!(decision.remember);
    }

    /// Given no registration, when resolving, then the decision is reported unrouted.
    #[test]
    fn given_unknown_transfer_when_resolved_then_reports_unrouted() {
        let registry = ConsentRegistry::default();
        let routed = registry.resolve(
            "missing",
            ConsentDecision {
                accept: false,
                remember: false,
            },
        );
        assert!(!routed);
    }

    /// Given a resolved transfer, when resolved again, then the second decision is unrouted.
    #[test]
    fn given_resolved_transfer_when_resolved_again_then_unrouted() {
        let registry = ConsentRegistry::default();
        let _rx = registry.register("xfer-1");
        let decision = ConsentDecision {
            accept: true,
            remember: false,
        };

        assert!(registry.resolve("xfer-1", decision));
        assert!(!registry.resolve("xfer-1", decision));
    }

    /// Given a removed registration, when awaited, then the receiver observes closure.
    #[test]
    fn given_removed_registration_when_awaited_then_receiver_closed() {
        let registry = ConsentRegistry::default();
        let mut rx = registry.register("xfer-1");
        registry.remove("xfer-1");
        assert!(rx.try_recv().is_err());
    }
}
