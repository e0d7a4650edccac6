//! Identification session over a duplex connection
//!
//! One connection drives one [`IdentifySession`]. The handler queues for the
//! device lock, opens the reader, streams a notice per attempt and ends with
//! a result frame and a close code. Inbound frames are read while an attempt
//! is in flight, so a cancel or a hang-up takes effect without waiting for
//! the reader. The device is released on every path out.

use std::pin::pin;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use fpgate_core::{
    AttemptOutcome, CancellationToken, DeviceGuard, Error as CoreError, IdentifyOptions,
    IdentifySession, Reader, Scanner, SessionState,
};
use fpgate_types::SessionId;

use crate::channel::{Channel, Inbound};
use crate::protocol::{ClientCommand, CloseReason, Notification};

/// Who decides when the next attempt starts
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pacing {
    /// Attempts follow each other until the session ends
    #[default]
    Server,

    /// After a negative read, wait for `{"action": "identify"}`
    Client,
}

/// How a served connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub session: SessionId,
    pub state: SessionState,
    /// Identify calls dispatched
    pub attempts: u32,
    /// The client went away before the session ended
    pub disconnected: bool,
}

/// Serves identification sessions on duplex connections
pub struct SessionProtocolHandler<S: Scanner> {
    reader: Reader<S>,
    options: IdentifyOptions,
    pacing: Pacing,
}

impl<S: Scanner> Clone for SessionProtocolHandler<S> {
    fn clone(&self) -> Self {
        Self {
            reader: self.reader.clone(),
            options: self.options.clone(),
            pacing: self.pacing,
        }
    }
}

enum Admission {
    Granted(DeviceGuard),
    Refused(CoreError),
    Abandoned,
}

impl<S: Scanner> SessionProtocolHandler<S> {
    pub fn new(reader: Reader<S>, options: IdentifyOptions) -> Self {
        Self {
            reader,
            options,
            pacing: Pacing::default(),
        }
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn reader(&self) -> &Reader<S> {
        &self.reader
    }

    pub fn options(&self) -> &IdentifyOptions {
        &self.options
    }

    pub fn pacing(&self) -> Pacing {
        self.pacing
    }

    /// Run one identification session on `channel` until it ends.
    ///
    /// Never fails: device and protocol problems are reported to the client
    /// and reflected in the returned summary.
    pub async fn serve<C: Channel>(&self, channel: C) -> SessionSummary {
        let id = self.reader.next_session_id();
        let mut conn = Connection::new(channel);
        let mut session = IdentifySession::new(id, self.options.clone(), conn.cancel.clone());

        info!(session = %id, peer = %conn.channel.peer(), "Identify session started");

        let guard = match self.admit(id, &mut conn).await {
            Admission::Granted(guard) => guard,
            Admission::Refused(error) => {
                let (notice, reason) = match error {
                    CoreError::Busy { .. } => (Notification::Busy, CloseReason::Busy),
                    other => (Notification::device_failure(&other), CloseReason::Failed),
                };
                warn!(session = %id, "Device not granted: {}", notice);
                conn.finish(notice, reason).await;
                return conn.summary(id, SessionState::Failed(reason.reason().to_string()), 0);
            }
            Admission::Abandoned => {
                session.check_cancelled();
                conn.finish(Notification::Cancelled, CloseReason::Cancelled)
                    .await;
                return conn.summary(id, session.state().clone(), 0);
            }
        };

        let lease = match self.reader.open_with_guard(guard).await {
            Ok(lease) => lease,
            Err(error) => {
                conn.finish(Notification::device_failure(&error), CloseReason::Failed)
                    .await;
                return conn.summary(id, SessionState::Failed(error.to_string()), 0);
            }
        };

        let (notice, reason) = loop {
            conn.drain().await;
            conn.go_ahead = false;

            if session.check_cancelled() {
                break (Notification::Cancelled, CloseReason::Cancelled);
            }

            conn.notify(Notification::Progress {
                attempt: session.attempt() + 1,
                max: session.max_attempts(),
            })
            .await;

            let outcome = {
                let mut attempt = pin!(session.next_attempt(&lease));
                loop {
                    tokio::select! {
                        outcome = &mut attempt => break outcome,
                        frame = conn.recv(), if conn.alive => conn.handle(frame).await,
                    }
                }
            };

            match outcome {
                Ok(AttemptOutcome::NotIdentified { attempt, remaining }) => {
                    conn.notify(Notification::NotIdentified { attempt, remaining })
                        .await;
                    if self.pacing == Pacing::Client {
                        conn.await_go_ahead().await;
                    }
                }
                Ok(AttemptOutcome::Identified { identity, .. }) => {
                    break (Notification::Identified { identity }, CloseReason::Identified);
                }
                Ok(AttemptOutcome::Exhausted { attempts }) => {
                    conn.notify(Notification::NotIdentified {
                        attempt: attempts,
                        remaining: 0,
                    })
                    .await;
                    break (Notification::Exhausted { attempts }, CloseReason::Exhausted);
                }
                Ok(AttemptOutcome::Cancelled { .. }) => {
                    break (Notification::Cancelled, CloseReason::Cancelled);
                }
                Ok(AttemptOutcome::Failed { error, .. }) | Err(error) => {
                    break (Notification::device_failure(&error), CloseReason::Failed);
                }
            }
        };

        lease.release().await;
        conn.finish(notice, reason).await;

        let summary = conn.summary(id, session.state().clone(), session.attempt());
        info!(
            session = %id,
            state = summary.state.name(),
            attempts = summary.attempts,
            disconnected = summary.disconnected,
            "Identify session ended"
        );
        summary
    }

    /// Queue for the device lock, watching the connection meanwhile
    async fn admit<C: Channel>(&self, id: SessionId, conn: &mut Connection<C>) -> Admission {
        let lock = self.reader.lock();

        if let Some(guard) = lock.try_acquire(id) {
            return Admission::Granted(guard);
        }

        if let Some(holder) = lock.holder() {
            debug!(session = %id, %holder, "Waiting for the device");
        }
        conn.notify(Notification::Waiting).await;

        let mut wait = pin!(lock.acquire_within(id, self.reader.config().lock_wait));
        loop {
            tokio::select! {
                result = &mut wait => {
                    return match result {
                        Ok(guard) => Admission::Granted(guard),
                        Err(error) => Admission::Refused(error),
                    };
                }
                frame = conn.recv(), if conn.alive => conn.handle(frame).await,
            }

            if conn.cancel.is_cancelled() {
                return Admission::Abandoned;
            }
        }
    }
}

/// Connection state shared by every phase of a session
struct Connection<C> {
    channel: C,
    cancel: CancellationToken,
    alive: bool,
    disconnected: bool,
    go_ahead: bool,
}

impl<C: Channel> Connection<C> {
    fn new(channel: C) -> Self {
        Self {
            channel,
            cancel: CancellationToken::new(),
            alive: true,
            disconnected: false,
            go_ahead: false,
        }
    }

    /// Next inbound frame; never resolves once the connection is gone
    async fn recv(&mut self) -> Inbound {
        if !self.alive {
            return std::future::pending().await;
        }
        self.channel.recv().await
    }

    /// Handle frames that already arrived
    async fn drain(&mut self) {
        while let Some(frame) = self.recv().now_or_never() {
            self.handle(frame).await;
        }
    }

    /// Wait for the client to ask for the next attempt
    async fn await_go_ahead(&mut self) {
        while !self.go_ahead && self.alive && !self.cancel.is_cancelled() {
            let frame = self.recv().await;
            self.handle(frame).await;
        }
    }

    async fn handle(&mut self, frame: Inbound) {
        match frame {
            Inbound::Text(text) => match ClientCommand::decode(&text) {
                Ok(ClientCommand::Cancel) => {
                    debug!(peer = %self.channel.peer(), "Cancel requested");
                    self.cancel.cancel();
                }
                Ok(ClientCommand::Identify) => {
                    debug!(peer = %self.channel.peer(), "Identify requested");
                    self.go_ahead = true;
                }
                Err(error) => {
                    warn!(peer = %self.channel.peer(), "{}", error);
                    self.notify(error.into()).await;
                }
            },
            Inbound::Binary(data) => {
                warn!(peer = %self.channel.peer(), len = data.len(), "Binary frame ignored");
                self.notify(Notification::Malformed {
                    reason: "binary frames are not supported".into(),
                })
                .await;
            }
            Inbound::Closed => self.hang_up(),
        }
    }

    async fn notify(&mut self, notice: Notification) {
        if !self.alive {
            return;
        }

        if let Err(e) = self.channel.send_text(notice.to_text()).await {
            debug!(peer = %self.channel.peer(), "Send failed: {}", e);
            self.hang_up();
        }
    }

    /// Send the final notice and close
    async fn finish(&mut self, notice: Notification, reason: CloseReason) {
        self.notify(notice).await;

        if self.alive {
            self.alive = false;
            if let Err(e) = self.channel.close(reason.code(), reason.reason()).await {
                debug!(peer = %self.channel.peer(), "Close failed: {}", e);
            }
        }
    }

    fn hang_up(&mut self) {
        if self.alive {
            info!(peer = %self.channel.peer(), "Client disconnected");
        }
        self.alive = false;
        self.disconnected = true;
        self.cancel.cancel();
    }

    fn summary(&self, session: SessionId, state: SessionState, attempts: u32) -> SessionSummary {
        SessionSummary {
            session,
            state,
            attempts,
            disconnected: self.disconnected,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use fpgate_core::{DriverError, ReaderConfig, SimulatedScanner};

    use crate::channel::{MemoryChannel, MemoryPeer, Outbound};

    use super::*;

    fn handler(scanner: SimulatedScanner, options: IdentifyOptions) -> SessionProtocolHandler<SimulatedScanner> {
        SessionProtocolHandler::new(Reader::new(scanner, ReaderConfig::default()), options)
    }

    fn spawn_session(
        handler: &SessionProtocolHandler<SimulatedScanner>,
    ) -> (MemoryPeer, tokio::task::JoinHandle<SessionSummary>) {
        let (channel, peer) = MemoryChannel::pair("test");
        let handler = handler.clone();
        let task = tokio::spawn(async move { handler.serve(channel).await });
        (peer, task)
    }

    /// Every text frame until the close frame
    async fn transcript(peer: &mut MemoryPeer) -> (Vec<String>, Option<u16>) {
        let mut texts = Vec::new();
        while let Some(frame) = peer.recv().await {
            match frame {
                Outbound::Text(text) => texts.push(text),
                Outbound::Close { code, .. } => return (texts, Some(code)),
            }
        }
        (texts, None)
    }

    #[tokio::test]
    async fn test_server_paced_success() {
        let scanner = SimulatedScanner::new().with_reads([
            "<no identificado>",
            "<NO IDENTIFICADO>",
            "alice@example.com",
        ]);
        let handler = handler(scanner, IdentifyOptions::default());
        let (mut peer, task) = spawn_session(&handler);

        let (texts, code) = transcript(&mut peer).await;

        assert_eq!(
            texts,
            vec![
                "Attempt 1 of 5...",
                "No fingerprint match on attempt 1 (4 left), try again...",
                "Attempt 2 of 5...",
                "No fingerprint match on attempt 2 (3 left), try again...",
                "Attempt 3 of 5...",
                r#"{"user":"alice@example.com"}"#,
            ]
        );
        assert_eq!(code, Some(1000));

        let summary = task.await.unwrap();
        assert_eq!(summary.attempts, 3);
        assert_eq!(
            summary.state,
            SessionState::Succeeded(fpgate_types::Identity::new("alice@example.com"))
        );
        assert!(!summary.disconnected);
        assert!(!handler.reader().lock().is_held());
    }

    #[tokio::test]
    async fn test_exhausted_closes_with_4000() {
        let scanner = SimulatedScanner::new();
        let stats = scanner.stats();
        let handler = handler(scanner, IdentifyOptions::new(3));
        let (mut peer, task) = spawn_session(&handler);

        let (texts, code) = transcript(&mut peer).await;

        assert_eq!(texts.len(), 7);
        assert_eq!(
            texts[4..].to_vec(),
            vec![
                "Attempt 3 of 3...",
                "No fingerprint match on attempt 3 (0 left), try again...",
                "User not identified after 3 attempts.",
            ]
        );
        assert_eq!(code, Some(4000));
        assert_eq!(stats.identify_calls(), 3);
        assert_eq!(task.await.unwrap().state, SessionState::Exhausted);
    }

    #[tokio::test]
    async fn test_device_error_not_retried() {
        let scanner = SimulatedScanner::new()
            .with_fault(DriverError::Gallery("template store unreadable".into()));
        let stats = scanner.stats();
        let handler = handler(scanner, IdentifyOptions::default());
        let (mut peer, task) = spawn_session(&handler);

        let (texts, code) = transcript(&mut peer).await;

        assert_eq!(
            texts,
            vec![
                "Attempt 1 of 5...",
                "Device error: Enrolled gallery unavailable: template store unreadable",
            ]
        );
        assert_eq!(code, Some(1011));
        assert_eq!(stats.identify_calls(), 1);
        assert_eq!(stats.cleanup_calls(), 1);
        assert!(matches!(task.await.unwrap().state, SessionState::Failed(_)));
    }

    #[tokio::test]
    async fn test_client_paced_cancel_after_second_attempt() {
        let scanner = SimulatedScanner::new();
        let stats = scanner.stats();
        let handler = handler(scanner, IdentifyOptions::default()).with_pacing(Pacing::Client);
        let (mut peer, task) = spawn_session(&handler);

        assert_eq!(peer.recv_text().await.unwrap(), "Attempt 1 of 5...");
        assert_eq!(
            peer.recv_text().await.unwrap(),
            "No fingerprint match on attempt 1 (4 left), try again..."
        );

        peer.send_text(ClientCommand::Identify.encode()).unwrap();
        assert_eq!(peer.recv_text().await.unwrap(), "Attempt 2 of 5...");
        assert_eq!(
            peer.recv_text().await.unwrap(),
            "No fingerprint match on attempt 2 (3 left), try again..."
        );

        peer.send_text(ClientCommand::Cancel.encode()).unwrap();
        let (texts, code) = transcript(&mut peer).await;
        assert_eq!(texts, vec!["Scan cancelled."]);
        assert_eq!(code, Some(1000));

        let summary = task.await.unwrap();
        assert_eq!(summary.state, SessionState::Cancelled);
        assert_eq!(summary.attempts, 2);
        assert_eq!(stats.identify_calls(), 2);
        assert_eq!(stats.cleanup_calls(), 1);
    }

    #[tokio::test]
    async fn test_bad_messages_reported_without_side_effects() {
        let scanner = SimulatedScanner::new();
        let handler = handler(scanner, IdentifyOptions::default()).with_pacing(Pacing::Client);
        let (mut peer, task) = spawn_session(&handler);

        peer.recv_text().await.unwrap();
        peer.recv_text().await.unwrap();

        peer.send_text("not json").unwrap();
        let reply = peer.recv_text().await.unwrap();
        assert!(reply.starts_with("Malformed message:"), "{}", reply);

        peer.send_text(r#"{"action": "dance"}"#).unwrap();
        assert_eq!(peer.recv_text().await.unwrap(), "Unrecognized command: dance");

        peer.send_binary(vec![1, 2, 3]).unwrap();
        assert_eq!(
            peer.recv_text().await.unwrap(),
            "Malformed message: binary frames are not supported"
        );

        // Still on the second attempt
        peer.send_text(ClientCommand::Identify.encode()).unwrap();
        assert_eq!(peer.recv_text().await.unwrap(), "Attempt 2 of 5...");

        peer.recv_text().await.unwrap();
        peer.send_text(ClientCommand::Cancel.encode()).unwrap();
        transcript(&mut peer).await;

        assert_eq!(task.await.unwrap().attempts, 2);
    }

    #[tokio::test]
    async fn test_disconnect_during_attempt_releases_device() {
        let scanner = SimulatedScanner::new().with_delay(Duration::from_millis(200));
        let stats = scanner.stats();
        let handler = handler(scanner, IdentifyOptions::default());
        let (mut peer, task) = spawn_session(&handler);

        assert_eq!(peer.recv_text().await.unwrap(), "Attempt 1 of 5...");
        drop(peer);

        let summary = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("session did not end")
            .unwrap();

        assert_eq!(summary.state, SessionState::Cancelled);
        assert!(summary.disconnected);
        assert_eq!(summary.attempts, 1);
        assert_eq!(stats.identify_calls(), 1);
        assert_eq!(stats.cleanup_calls(), 1);
        assert!(!handler.reader().lock().is_held());
    }

    #[tokio::test]
    async fn test_waiting_notice_while_device_held() {
        let scanner = SimulatedScanner::new().with_reads(["bob@example.com"]);
        let handler = handler(scanner, IdentifyOptions::default());
        let held = handler
            .reader()
            .lock()
            .acquire(handler.reader().next_session_id())
            .await
            .unwrap();

        let (mut peer, task) = spawn_session(&handler);
        assert_eq!(
            peer.recv_text().await.unwrap(),
            "Reader busy, waiting for the device..."
        );

        drop(held);
        let (texts, code) = transcript(&mut peer).await;
        assert_eq!(texts, vec!["Attempt 1 of 5...", r#"{"user":"bob@example.com"}"#]);
        assert_eq!(code, Some(1000));
        assert_eq!(task.await.unwrap().attempts, 1);
    }

    #[tokio::test]
    async fn test_busy_when_lock_wait_expires() {
        let config = ReaderConfig {
            lock_wait: Some(Duration::from_millis(50)),
            ..ReaderConfig::default()
        };
        let scanner = SimulatedScanner::new();
        let stats = scanner.stats();
        let handler = SessionProtocolHandler::new(
            Reader::new(scanner, config),
            IdentifyOptions::default(),
        );
        let _held = handler
            .reader()
            .lock()
            .acquire(handler.reader().next_session_id())
            .await
            .unwrap();

        let (mut peer, task) = spawn_session(&handler);
        let (texts, code) = transcript(&mut peer).await;

        assert_eq!(
            texts,
            vec![
                "Reader busy, waiting for the device...",
                "Device busy, try again later.",
            ]
        );
        assert_eq!(code, Some(1013));
        assert_eq!(stats.init_calls(), 0);
        assert!(matches!(task.await.unwrap().state, SessionState::Failed(_)));
    }

    #[tokio::test]
    async fn test_cancel_while_queued() {
        let scanner = SimulatedScanner::new();
        let stats = scanner.stats();
        let handler = handler(scanner, IdentifyOptions::default());
        let _held = handler
            .reader()
            .lock()
            .acquire(handler.reader().next_session_id())
            .await
            .unwrap();

        let (mut peer, task) = spawn_session(&handler);
        peer.recv_text().await.unwrap();
        peer.send_text(ClientCommand::Cancel.encode()).unwrap();

        let (texts, code) = transcript(&mut peer).await;
        assert_eq!(texts, vec!["Scan cancelled."]);
        assert_eq!(code, Some(1000));

        let summary = task.await.unwrap();
        assert_eq!(summary.state, SessionState::Cancelled);
        assert_eq!(summary.attempts, 0);
        assert_eq!(stats.init_calls(), 0);
    }

    #[test]
    fn test_pacing_serde() {
        assert_eq!(Pacing::default(), Pacing::Server);
        assert_eq!(
            serde_json::from_str::<Pacing>(r#""client""#).unwrap(),
            Pacing::Client
        );
    }
}
