//! Per-connection transfer session.
//!
//! One task per accepted connection, driving the protocol strictly in
//! sequence: connection request, handshake, metadata, consent, transfer.
//! Every session ends in exactly one terminal state and reports its
//! outcome to the delegate exactly once.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use proxidrop_core::channel::{SecureChannel, SecureEnvelope};
use proxidrop_core::error::{CancelReason, NearbyError};
use proxidrop_core::fsutil::{sanitize_file_name, unique_destination};
use proxidrop_core::handshake::{HandshakeFailure, ResponderHandshake};
use proxidrop_core::protocol::{
    decode_payload, encode_frame_to_bytes, encode_payload_frame, try_decode_frame, AlertCode,
    ConnectionRequestPayload, ConsentResponsePayload, FileDescriptor, Frame, FrameType,
    HandshakeAlertPayload, InnerFrame, KeepAlivePayload, PayloadChunk, TextDescriptor,
};
use proxidrop_core::transport::Connection;

use crate::delegate::{RemoteDeviceInfo, ShareDelegate, TransferMetadata, TransferSummary};
use crate::manager::{ConsentDecision, ConsentRegistry, ManagerEvent};

/// Where a session currently is in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingHandshake,
    AwaitingMetadata,
    AwaitingConsent,
    Accepted,
    Declined,
    Transferring,
    Completed,
    Failed,
    Canceled,
}

impl SessionState {
    /// Terminal states admit no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Declined | Self::Completed | Self::Failed | Self::Canceled
        )
    }
}

/// Per-session slice of the manager configuration.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub receive_dir: PathBuf,
    pub consent_timeout: Duration,
}

/// Declared sizes are peer-controlled; cap the preallocation.
const MAX_TEXT_PREALLOC: usize = 64 * 1024;

enum SinkKind {
    File {
        file: fs::File,
        temp_path: PathBuf,
        final_path: PathBuf,
    },
    Text {
        buf: Vec<u8>,
    },
}

/// Write destination for one announced payload.
struct PayloadSink {
    declared: u64,
    received: u64,
    kind: SinkKind,
}

/// Runs a session to completion and performs the terminal bookkeeping:
/// outcome to the delegate, `SessionEnded` to the host, session id back
/// to the manager registry.
pub(crate) async fn run_session<C: Connection>(
    conn: C,
    session_id: u64,
    config: SessionConfig,
    delegate: Arc<dyn ShareDelegate>,
    consents: ConsentRegistry,
    events: broadcast::Sender<ManagerEvent>,
    done_tx: mpsc::Sender<u64>,
) {
    let peer = conn.peer();
    info!(session_id, peer = %peer, "Session started");

    let mut driver = SessionDriver::new(conn, config, delegate.clone(), consents.clone());
    let outcome = driver.run().await;

    let transfer_id = driver
        .transfer_id
        .clone()
        .unwrap_or_else(|| format!("session-{session_id}"));
    consents.remove(&transfer_id);

    if outcome.is_err() {
        driver.discard_partial_files().await;
    }

    match &outcome {
        Ok(summary) => {
            info!(session_id, files = summary.stored_files.len(), "Session completed");
        }
        Err(e) if e.is_cancellation() => info!(session_id, reason = %e, "Session canceled"),
        Err(e) => warn!(session_id, error = %e, "Session failed"),
    }

    delegate.report_outcome(&transfer_id, outcome);
    let _ = events.send(ManagerEvent::SessionEnded { session_id });
    let _ = done_tx.send(session_id).await;
}

/// Drives one connection through the receive protocol.
struct SessionDriver<C: Connection> {
    conn: C,
    peer: String,
    accum: BytesMut,
    state: SessionState,
    config: SessionConfig,
    delegate: Arc<dyn ShareDelegate>,
    consents: ConsentRegistry,
    channel: Option<SecureChannel>,
    device: Option<RemoteDeviceInfo>,
    transfer_id: Option<String>,
    pin: Option<String>,
    files: Vec<FileDescriptor>,
    text: Option<TextDescriptor>,
    sinks: HashMap<u64, PayloadSink>,
    stored_files: Vec<PathBuf>,
    text_body: Option<String>,
}

impl<C: Connection> SessionDriver<C> {
    fn new(
        conn: C,
        config: SessionConfig,
        delegate: Arc<dyn ShareDelegate>,
        consents: ConsentRegistry,
    ) -> Self {
        let peer = conn.peer();
        Self {
            conn,
            peer,
            accum: BytesMut::with_capacity(8192),
            state: SessionState::AwaitingHandshake,
            config,
            delegate,
            consents,
            channel: None,
            device: None,
            transfer_id: None,
            pin: None,
            files: Vec::new(),
            text: None,
            sinks: HashMap::new(),
            stored_files: Vec::new(),
            text_body: None,
        }
    }

    async fn run(&mut self) -> Result<TransferSummary, NearbyError> {
        let result = self.drive().await;
        match &result {
            Ok(_) => self.advance(SessionState::Completed),
            Err(NearbyError::Canceled(CancelReason::UserDeclined)) => {
                self.advance(SessionState::Declined);
            }
            Err(NearbyError::Canceled(_)) => self.advance(SessionState::Canceled),
            Err(_) => self.advance(SessionState::Failed),
        }
        result
    }

    async fn drive(&mut self) -> Result<TransferSummary, NearbyError> {
        let device = self.await_connection_request().await?;
        info!(peer = %self.peer, device = %device.name, "Sender identified");
        self.device = Some(device);

        self.perform_handshake().await?;
        self.advance(SessionState::AwaitingMetadata);

        self.collect_metadata().await?;
        self.advance(SessionState::AwaitingConsent);

        self.await_consent().await?;
        self.advance(SessionState::Accepted);

        self.open_sinks().await?;
        self.advance(SessionState::Transferring);

        self.receive_payloads().await?;

        let transfer_id = self
            .transfer_id
            .clone()
            .ok_or_else(|| NearbyError::protocol("metadata incomplete"))?;
        let summary = TransferSummary {
            transfer_id,
            stored_files: std::mem::take(&mut self.stored_files),
            text_body: self.text_body.take(),
        };

        if let Err(e) = self.send_frame(FrameType::Disconnect, &[]).await {
            debug!(peer = %self.peer, error = %e, "Failed to send disconnect");
        }
        if let Err(e) = self.conn.shutdown().await {
            debug!(peer = %self.peer, error = %e, "Failed to shut down connection");
        }

        Ok(summary)
    }

    fn advance(&mut self, next: SessionState) {
        debug_assert!(
            !self.state.is_terminal(),
            "no transitions out of a terminal state"
        );
        debug!(peer = %self.peer, from = ?self.state, to = ?next, "Session state change");
        self.state = next;
    }

    // ── Phase 1: connection request ─────────────────────────────────

    async fn await_connection_request(&mut self) -> Result<RemoteDeviceInfo, NearbyError> {
        let payload = self.expect_frame(FrameType::ConnectionRequest).await?;
        let request: ConnectionRequestPayload = decode_payload(&payload)?;
        if request.device_name.is_empty() {
            return Err(NearbyError::missing("connectionRequest.deviceName"));
        }
        Ok(RemoteDeviceInfo {
            name: request.device_name,
            model: request.device_model,
            peer: self.peer.clone(),
        })
    }

    // ── Phase 2: handshake ──────────────────────────────────────────

    async fn perform_handshake(&mut self) -> Result<(), NearbyError> {
        let client_init = self.expect_frame(FrameType::ClientInit).await?;
        let responder = match ResponderHandshake::respond(&client_init) {
            Ok((responder, server_init)) => {
                self.send_frame(FrameType::ServerInit, &server_init).await?;
                responder
            }
            Err(failure) => return Err(self.fail_handshake(failure).await),
        };

        let client_finish = self.expect_frame(FrameType::ClientFinish).await?;
        let completed = match responder.finish(&client_finish) {
            Ok(completed) => completed,
            Err(failure) => return Err(self.fail_handshake(failure).await),
        };

        debug!(peer = %self.peer, pin = %completed.pin, "Handshake complete");
        self.pin = Some(completed.pin);
        self.channel = Some(SecureChannel::responder(&completed.keys));
        Ok(())
    }

    /// Sends the alert the failure names, best effort, and surfaces the
    /// underlying error.
    async fn fail_handshake(&mut self, failure: HandshakeFailure) -> NearbyError {
        warn!(peer = %self.peer, code = ?failure.code, "Handshake rejected");
        match encode_payload_frame(FrameType::HandshakeAlert, &failure.alert()) {
            Ok(bytes) => {
                if let Err(e) = self.conn.write_all(&bytes).await {
                    debug!(peer = %self.peer, error = %e, "Failed to send handshake alert");
                }
            }
            Err(e) => debug!(peer = %self.peer, error = %e, "Failed to encode handshake alert"),
        }
        failure.error
    }

    // ── Phase 3: metadata ───────────────────────────────────────────

    async fn collect_metadata(&mut self) -> Result<(), NearbyError> {
        loop {
            let frame = self
                .read_inner()
                .await?
                .ok_or(NearbyError::Canceled(CancelReason::RemoteDisconnect))?;
            match frame {
                InnerFrame::Disconnect => {
                    return Err(NearbyError::Canceled(CancelReason::RemoteDisconnect));
                }
                InnerFrame::Introduction(intro) => {
                    match &self.transfer_id {
                        None => self.transfer_id = Some(intro.transfer_id.clone()),
                        Some(id) if *id != intro.transfer_id => {
                            return Err(NearbyError::protocol(
                                "introduction changed transfer id",
                            ));
                        }
                        Some(_) => {}
                    }

                    for entry in &intro.files {
                        self.files.push(entry.validate()?);
                    }
                    if let Some(text) = &intro.text {
                        if self.text.is_some() {
                            return Err(NearbyError::protocol(
                                "introduction announced a second text payload",
                            ));
                        }
                        self.text = Some(text.validate()?);
                    }

                    if intro.complete {
                        if self.files.is_empty() && self.text.is_none() {
                            return Err(NearbyError::missing("introduction.payloads"));
                        }
                        return Ok(());
                    }
                }
                other => {
                    return Err(NearbyError::protocol(format!(
                        "unexpected {} while awaiting metadata",
                        inner_frame_name(&other)
                    )));
                }
            }
        }
    }

    // ── Phase 4: consent ────────────────────────────────────────────

    async fn await_consent(&mut self) -> Result<(), NearbyError> {
        let metadata = self.metadata()?;
        let device = self
            .device
            .clone()
            .ok_or_else(|| NearbyError::protocol("device identity missing"))?;

        let auto_accept = self.delegate.is_remembered(&device.name)
            || (metadata.is_text_only() && self.delegate.auto_copy_text_enabled());

        let decision = if auto_accept {
            info!(peer = %self.peer, device = %device.name, "Consent auto-accepted by policy");
            ConsentDecision {
                accept: true,
                remember: false,
            }
        } else {
            let rx = self.consents.register(&metadata.transfer_id);
            self.delegate.request_consent(&metadata, &device);
            self.wait_for_decision(rx).await?
        };

        let response = ConsentResponsePayload {
            transfer_id: metadata.transfer_id,
            accept: decision.accept,
        };
        self.send_inner(&InnerFrame::ConsentResponse(response)).await?;

        if decision.accept {
            if decision.remember {
                self.delegate.remember_device(&device.name);
            }
            Ok(())
        } else {
            info!(peer = %self.peer, "Transfer declined");
            Err(NearbyError::Canceled(CancelReason::UserDeclined))
        }
    }

    async fn wait_for_decision(
        &mut self,
        mut rx: oneshot::Receiver<ConsentDecision>,
    ) -> Result<ConsentDecision, NearbyError> {
        enum Wake {
            Decision(ConsentDecision),
            DeciderGone,
            TimedOut,
            Inner(Option<InnerFrame>),
            Failed(NearbyError),
        }

        let deadline = tokio::time::sleep(self.config.consent_timeout);
        tokio::pin!(deadline);

        let wake = tokio::select! {
            biased;

            res = &mut rx => match res {
                Ok(decision) => Wake::Decision(decision),
                Err(_) => Wake::DeciderGone,
            },

            () = &mut deadline => Wake::TimedOut,

            inner = self.read_inner() => match inner {
                Ok(frame) => Wake::Inner(frame),
                Err(e) => Wake::Failed(e),
            },
        };

        match wake {
            Wake::Decision(decision) => Ok(decision),
            // A dropped decider counts as a decline.
            Wake::DeciderGone => Ok(ConsentDecision {
                accept: false,
                remember: false,
            }),
            Wake::TimedOut => {
                info!(peer = %self.peer, "Consent timed out");
                Err(NearbyError::Canceled(CancelReason::Timeout))
            }
            Wake::Inner(None | Some(InnerFrame::Disconnect)) => {
                Err(NearbyError::Canceled(CancelReason::RemoteDisconnect))
            }
            Wake::Inner(Some(frame)) => Err(NearbyError::protocol(format!(
                "unexpected {} while awaiting consent",
                inner_frame_name(&frame)
            ))),
            Wake::Failed(e) => Err(e),
        }
    }

    fn metadata(&self) -> Result<TransferMetadata, NearbyError> {
        let transfer_id = self
            .transfer_id
            .clone()
            .ok_or_else(|| NearbyError::protocol("metadata incomplete"))?;
        let pin_code = self
            .pin
            .clone()
            .ok_or_else(|| NearbyError::protocol("handshake incomplete"))?;
        Ok(TransferMetadata {
            transfer_id,
            files: self.files.clone(),
            text: self.text.clone(),
            pin_code,
        })
    }

    // ── Phase 5: transfer ───────────────────────────────────────────

    async fn open_sinks(&mut self) -> Result<(), NearbyError> {
        fs::create_dir_all(&self.config.receive_dir).await?;

        for file in &self.files {
            if self.sinks.contains_key(&file.payload_id) {
                return Err(NearbyError::protocol("duplicate payload id in introduction"));
            }
            let name = sanitize_file_name(&file.name);
            let final_path = unique_destination(&self.config.receive_dir, &name);
            let temp_path = temp_path_for(&final_path);
            let handle = fs::File::create(&temp_path).await?;
            self.sinks.insert(
                file.payload_id,
                PayloadSink {
                    declared: file.size_bytes,
                    received: 0,
                    kind: SinkKind::File {
                        file: handle,
                        temp_path,
                        final_path,
                    },
                },
            );
        }

        if let Some(text) = &self.text {
            if self.sinks.contains_key(&text.payload_id) {
                return Err(NearbyError::protocol("duplicate payload id in introduction"));
            }
            let capacity = usize::try_from(text.size_bytes)
                .unwrap_or(usize::MAX)
                .min(MAX_TEXT_PREALLOC);
            self.sinks.insert(
                text.payload_id,
                PayloadSink {
                    declared: text.size_bytes,
                    received: 0,
                    kind: SinkKind::Text {
                        buf: Vec::with_capacity(capacity),
                    },
                },
            );
        }

        Ok(())
    }

    async fn receive_payloads(&mut self) -> Result<(), NearbyError> {
        while !self.sinks.is_empty() {
            let frame = self
                .read_inner()
                .await?
                .ok_or(NearbyError::Canceled(CancelReason::RemoteDisconnect))?;
            match frame {
                InnerFrame::Disconnect => {
                    return Err(NearbyError::Canceled(CancelReason::RemoteDisconnect));
                }
                InnerFrame::PayloadChunk(chunk) => self.apply_chunk(chunk).await?,
                other => {
                    return Err(NearbyError::protocol(format!(
                        "unexpected {} during transfer",
                        inner_frame_name(&other)
                    )));
                }
            }
        }
        Ok(())
    }

    async fn apply_chunk(&mut self, chunk: PayloadChunk) -> Result<(), NearbyError> {
        let sink = self.sinks.get_mut(&chunk.payload_id).ok_or_else(|| {
            NearbyError::protocol(format!("chunk for unknown payload {}", chunk.payload_id))
        })?;

        if chunk.offset != sink.received {
            return Err(NearbyError::protocol(format!(
                "chunk offset {} does not match {} bytes received",
                chunk.offset, sink.received
            )));
        }

        let new_total = sink
            .received
            .checked_add(chunk.data.len() as u64)
            .ok_or_else(|| NearbyError::protocol("payload size overflow"))?;
        if new_total > sink.declared {
            return Err(NearbyError::protocol(format!(
                "payload {} exceeds its declared {} bytes",
                chunk.payload_id, sink.declared
            )));
        }

        match &mut sink.kind {
            SinkKind::File { file, .. } => file.write_all(&chunk.data).await?,
            SinkKind::Text { buf } => buf.extend_from_slice(&chunk.data),
        }
        sink.received = new_total;

        if chunk.is_final {
            if sink.received != sink.declared {
                return Err(NearbyError::protocol(format!(
                    "final chunk arrived at {} of {} declared bytes",
                    sink.received, sink.declared
                )));
            }
            if let Some(done) = self.sinks.remove(&chunk.payload_id) {
                self.finalize_sink(done).await?;
            }
        }

        Ok(())
    }

    async fn finalize_sink(&mut self, sink: PayloadSink) -> Result<(), NearbyError> {
        match sink.kind {
            SinkKind::File {
                mut file,
                temp_path,
                final_path,
            } => {
                file.flush().await?;
                drop(file);
                fs::rename(&temp_path, &final_path).await?;
                debug!(peer = %self.peer, path = %final_path.display(), "Payload persisted");
                self.stored_files.push(final_path);
            }
            SinkKind::Text { buf } => {
                let body = String::from_utf8(buf)
                    .map_err(|_| NearbyError::protocol("text payload is not valid UTF-8"))?;
                self.text_body = Some(body);
            }
        }
        Ok(())
    }

    /// Removes temp files for sinks that never completed.
    async fn discard_partial_files(&mut self) {
        for (_, sink) in self.sinks.drain() {
            if let SinkKind::File {
                file, temp_path, ..
            } = sink.kind
            {
                drop(file);
                if let Err(e) = fs::remove_file(&temp_path).await {
                    debug!(path = %temp_path.display(), error = %e, "Failed to remove partial file");
                }
            }
        }
    }

    // ── Frame plumbing ──────────────────────────────────────────────

    /// Reads the next outer frame, tolerating keep-alives. `Ok(None)`
    /// means the peer closed the connection.
    async fn read_frame(&mut self) -> Result<Option<Frame>, NearbyError> {
        loop {
            if let Some(frame) = try_decode_frame(&mut self.accum)? {
                if frame.frame_type == FrameType::KeepAlive {
                    debug!(peer = %self.peer, "Outer keep-alive");
                    continue;
                }
                return Ok(Some(frame));
            }
            let mut buf = [0u8; 8192];
            let n = self.conn.read(&mut buf).await.map_err(io_err)?;
            if n == 0 {
                return Ok(None);
            }
            self.accum.extend_from_slice(&buf[..n]);
        }
    }

    /// Reads one frame and requires it to be of `expected` type.
    ///
    /// A peer alert is surfaced as a protocol error carrying its message;
    /// any other unexpected type is answered with a `BadMessageType` alert.
    async fn expect_frame(&mut self, expected: FrameType) -> Result<Vec<u8>, NearbyError> {
        let frame = match self.read_frame().await? {
            None => return Err(NearbyError::Canceled(CancelReason::RemoteDisconnect)),
            Some(frame) => frame,
        };

        if frame.frame_type == expected {
            return Ok(frame.payload);
        }

        match frame.frame_type {
            FrameType::Disconnect => Err(NearbyError::Canceled(CancelReason::RemoteDisconnect)),
            FrameType::HandshakeAlert => {
                let alert: HandshakeAlertPayload = decode_payload(&frame.payload)?;
                warn!(peer = %self.peer, code = ?alert.code, "Peer aborted handshake");
                Err(NearbyError::protocol(format!(
                    "peer aborted handshake: {}",
                    alert.message
                )))
            }
            other => {
                let alert = HandshakeAlertPayload {
                    code: AlertCode::BadMessageType,
                    message: format!("expected {expected:?}, got {other:?}"),
                };
                match encode_payload_frame(FrameType::HandshakeAlert, &alert) {
                    Ok(bytes) => {
                        if let Err(e) = self.conn.write_all(&bytes).await {
                            debug!(peer = %self.peer, error = %e, "Failed to send handshake alert");
                        }
                    }
                    Err(e) => {
                        debug!(peer = %self.peer, error = %e, "Failed to encode handshake alert");
                    }
                }
                Err(NearbyError::protocol(format!(
                    "expected {expected:?} frame, got {other:?}"
                )))
            }
        }
    }

    /// Reads the next inner frame from the secure channel, answering
    /// keep-alives transparently. `Ok(None)` means the peer closed the
    /// connection; a `Disconnect` of either layer comes back as
    /// [`InnerFrame::Disconnect`].
    async fn read_inner(&mut self) -> Result<Option<InnerFrame>, NearbyError> {
        loop {
            let frame = match self.read_frame().await? {
                None => return Ok(None),
                Some(frame) => frame,
            };

            match frame.frame_type {
                FrameType::Disconnect => return Ok(Some(InnerFrame::Disconnect)),
                FrameType::Secure => {
                    let envelope = SecureEnvelope::from_bytes(&frame.payload)?;
                    let channel = self
                        .channel
                        .as_mut()
                        .ok_or_else(|| NearbyError::protocol("secure frame before handshake"))?;
                    let plaintext = channel.open(&envelope)?;
                    match InnerFrame::decode(&plaintext)? {
                        InnerFrame::KeepAlive(ka) if !ka.ack => {
                            self.send_inner(&InnerFrame::KeepAlive(KeepAlivePayload {
                                ack: true,
                            }))
                            .await?;
                        }
                        InnerFrame::KeepAlive(_) => {}
                        other => return Ok(Some(other)),
                    }
                }
                other => {
                    return Err(NearbyError::protocol(format!(
                        "unexpected plaintext {other:?} frame after handshake"
                    )));
                }
            }
        }
    }

    async fn send_frame(
        &mut self,
        frame_type: FrameType,
        payload: &[u8],
    ) -> Result<(), NearbyError> {
        let bytes = encode_frame_to_bytes(frame_type, payload);
        self.conn.write_all(&bytes).await.map_err(io_err)
    }

    async fn send_inner(&mut self, frame: &InnerFrame) -> Result<(), NearbyError> {
        let plaintext = frame.encode()?;
        let channel = self
            .channel
            .as_mut()
            .ok_or_else(|| NearbyError::protocol("secure channel not established"))?;
        let envelope = channel.seal(&plaintext)?;
        let bytes = encode_frame_to_bytes(FrameType::Secure, &envelope.to_bytes());
        self.conn.write_all(&bytes).await.map_err(io_err)
    }
}

fn io_err(e: anyhow::Error) -> NearbyError {
    NearbyError::InputOutput(std::io::Error::other(e))
}

fn inner_frame_name(frame: &InnerFrame) -> &'static str {
    match frame {
        InnerFrame::Introduction(_) => "introduction",
        InnerFrame::ConsentResponse(_) => "consent response",
        InnerFrame::PayloadChunk(_) => "payload chunk",
        InnerFrame::KeepAlive(_) => "keep-alive",
        InnerFrame::Disconnect => "disconnect",
    }
}

/// Hidden sibling the payload is written to until it completes.
fn temp_path_for(final_path: &Path) -> PathBuf {
    let name = final_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("payload");
    final_path.with_file_name(format!(".{name}.part"))
}
