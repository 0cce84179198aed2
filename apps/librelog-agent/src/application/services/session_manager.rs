//! Session Manager
//!
//! Owns the ingest connection lifecycle: exchange credentials for a token,
//! open the stream, publish the live session, and recover when it dies.
//!
//! The current session is published on a `watch` channel. Each
//! [`ActiveSession`] carries its own cancellation token, so a handle held by
//! the pipeline becomes detectably stale the moment the session ends, even
//! before the manager publishes the next state.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::backoff::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{Ack, CredentialExchange, IngestChannel, IngestConnector, IngestError};
use crate::domain::session::{Credentials, SessionState};
use crate::infrastructure::metrics;

// =============================================================================
// Errors
// =============================================================================

/// Terminal failures of the session manager.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Authentication kept failing until the attempt limit.
    #[error("authentication failed after {attempts} attempts: {reason}")]
    AuthenticationFailed {
        /// Consecutive authentication failures.
        attempts: u32,
        /// Last failure reported.
        reason: String,
    },

    /// The reconnect policy ran out of attempts.
    #[error("gave up after {attempts} reconnect attempts: {reason}")]
    RetriesExhausted {
        /// Reconnect attempts made.
        attempts: u32,
        /// Last failure reported.
        reason: String,
    },
}

// =============================================================================
// Configuration
// =============================================================================

/// Session manager settings.
#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    /// Backoff between attempts.
    pub reconnect: ReconnectConfig,
    /// Consecutive authentication failures tolerated (0 = unlimited).
    pub max_auth_attempts: u32,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            max_auth_attempts: 3,
        }
    }
}

// =============================================================================
// Active Session
// =============================================================================

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// Send or receive failed, or the server closed the stream.
    TransportLost(String),
    /// The ingester refused the token.
    TokenRejected,
    /// Shutdown closed the session.
    Shutdown,
}

impl From<&IngestError> for SessionEnd {
    fn from(err: &IngestError) -> Self {
        match err {
            IngestError::TokenRejected | IngestError::Authentication(_) => Self::TokenRejected,
            IngestError::Transport(reason) | IngestError::Protocol(reason) => {
                Self::TransportLost(reason.clone())
            }
        }
    }
}

/// A connected ingest stream shared with the delivery pipeline.
pub struct ActiveSession {
    id: Uuid,
    generation: u64,
    channel: Mutex<Box<dyn IngestChannel>>,
    closed: CancellationToken,
    end: parking_lot::Mutex<Option<SessionEnd>>,
    acked: AtomicU64,
}

impl ActiveSession {
    pub(crate) fn new(generation: u64, channel: Box<dyn IngestChannel>) -> Self {
        Self {
            id: Uuid::new_v4(),
            generation,
            channel: Mutex::new(channel),
            closed: CancellationToken::new(),
            end: parking_lot::Mutex::new(None),
            acked: AtomicU64::new(0),
        }
    }

    /// Unique session identifier for log correlation.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Monotonic session number, starting at 1.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the session can still be used.
    #[must_use]
    pub fn is_live(&self) -> bool {
        !self.closed.is_cancelled()
    }

    /// Messages accepted on this session.
    #[must_use]
    pub fn acked(&self) -> u64 {
        self.acked.load(Ordering::Relaxed)
    }

    /// Send one frame and wait for the reply.
    ///
    /// Fails fast if the session was invalidated; an invalidation while the
    /// send is blocked also aborts it.
    ///
    /// # Errors
    ///
    /// Returns the channel error, or `Transport` if the session is closed.
    pub async fn send(&self, frame: String) -> Result<Ack, IngestError> {
        if !self.is_live() {
            return Err(IngestError::Transport("session closed".to_string()));
        }

        let mut channel = self.channel.lock().await;
        let result = tokio::select! {
            biased;
            () = self.closed.cancelled() => {
                Err(IngestError::Transport("session closed".to_string()))
            }
            result = channel.send(frame) => result,
        };

        if matches!(result, Ok(Ack::Accepted)) {
            self.acked.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Mark the session dead. The first reason recorded wins.
    pub fn invalidate(&self, reason: SessionEnd) {
        {
            let mut end = self.end.lock();
            if end.is_none() {
                *end = Some(reason);
            }
        }
        self.closed.cancel();
    }

    /// Wait until the session is invalidated.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    fn end_reason(&self) -> SessionEnd {
        self.end
            .lock()
            .clone()
            .unwrap_or_else(|| SessionEnd::TransportLost("session closed".to_string()))
    }

    async fn close(&self) {
        self.channel.lock().await.close().await;
    }
}

impl fmt::Debug for ActiveSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveSession")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .field("live", &self.is_live())
            .field("acked", &self.acked())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Session Status
// =============================================================================

/// Snapshot published on every state change.
#[derive(Debug, Clone, Default)]
pub struct SessionStatus {
    /// Current lifecycle state.
    pub state: SessionState,
    /// The live session while `Connected`.
    pub session: Option<Arc<ActiveSession>>,
    /// Reconnect attempts since the last healthy session.
    pub reconnect_attempts: u32,
}

impl SessionStatus {
    /// The session handle, if present and still live.
    #[must_use]
    pub fn live_session(&self) -> Option<Arc<ActiveSession>> {
        self.session.as_ref().filter(|s| s.is_live()).cloned()
    }
}

// =============================================================================
// Session Manager
// =============================================================================

/// Drives the session state machine until cancelled or out of retries.
pub struct SessionManager {
    config: SessionManagerConfig,
    credentials: Credentials,
    exchanger: Arc<dyn CredentialExchange>,
    connector: Arc<dyn IngestConnector>,
    status_tx: watch::Sender<SessionStatus>,
    generation: u64,
}

impl SessionManager {
    /// Create a session manager in the `Disconnected` state.
    #[must_use]
    pub fn new(
        config: SessionManagerConfig,
        credentials: Credentials,
        exchanger: Arc<dyn CredentialExchange>,
        connector: Arc<dyn IngestConnector>,
    ) -> Self {
        let (status_tx, _) = watch::channel(SessionStatus::default());
        Self {
            config,
            credentials,
            exchanger,
            connector,
            status_tx,
            generation: 0,
        }
    }

    /// Observe state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    /// Run the lifecycle loop.
    ///
    /// Returns `Ok(())` when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when the authentication or reconnect policy
    /// is exhausted. The published state is `Terminated` in every case.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), SessionError> {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());
        let mut auth_failures: u32 = 0;
        let mut next = SessionState::Authenticating;

        loop {
            if self.state() != next {
                self.transition(next, None, policy.attempt_count());
            }

            let attempt = tokio::select! {
                biased;
                () = cancel.cancelled() => return self.terminate(),
                attempt = self.establish() => attempt,
            };

            let failure = match attempt {
                Ok(session) => {
                    tracing::info!(
                        session_id = %session.id(),
                        generation = session.generation(),
                        "Ingest session established"
                    );
                    self.transition(SessionState::Connected, Some(Arc::clone(&session)), 0);

                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => {
                            session.invalidate(SessionEnd::Shutdown);
                            session.close().await;
                            return self.terminate();
                        }
                        () = session.closed() => {}
                    }

                    if session.acked() > 0 {
                        policy.reset();
                        auth_failures = 0;
                    }

                    match session.end_reason() {
                        SessionEnd::TokenRejected => {
                            tracing::warn!(
                                session_id = %session.id(),
                                "Session token rejected, reauthenticating"
                            );
                            self.transition(SessionState::Reauthenticating, None, 0);
                            session.close().await;
                            auth_failures += 1;
                            metrics::record_auth_failure();
                            if self.auth_exhausted(auth_failures) {
                                return Err(self.fail(SessionError::AuthenticationFailed {
                                    attempts: auth_failures,
                                    reason: IngestError::TokenRejected.to_string(),
                                }));
                            }
                            next = SessionState::Reauthenticating;
                            continue;
                        }
                        SessionEnd::TransportLost(reason) => {
                            tracing::warn!(
                                session_id = %session.id(),
                                reason = %reason,
                                "Ingest session lost"
                            );
                            self.transition(
                                SessionState::Disconnected,
                                None,
                                policy.attempt_count(),
                            );
                            session.close().await;
                            reason
                        }
                        SessionEnd::Shutdown => {
                            session.close().await;
                            return self.terminate();
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, state = %self.state(), "Session attempt failed");
                    self.transition(SessionState::Disconnected, None, policy.attempt_count());

                    if err.is_auth() {
                        auth_failures += 1;
                        metrics::record_auth_failure();
                        if self.auth_exhausted(auth_failures) {
                            return Err(self.fail(SessionError::AuthenticationFailed {
                                attempts: auth_failures,
                                reason: err.to_string(),
                            }));
                        }
                    }
                    err.to_string()
                }
            };

            let Some(delay) = policy.next_delay() else {
                return Err(self.fail(SessionError::RetriesExhausted {
                    attempts: policy.attempt_count(),
                    reason: failure,
                }));
            };

            let attempt = policy.attempt_count();
            metrics::record_reconnect();
            tracing::info!(
                attempt,
                delay_ms = delay.as_millis(),
                "Reconnecting to ingester"
            );
            self.status_tx
                .send_modify(|status| status.reconnect_attempts = attempt);

            tokio::select! {
                biased;
                () = cancel.cancelled() => return self.terminate(),
                () = tokio::time::sleep(delay) => {}
            }

            next = SessionState::Authenticating;
        }
    }

    async fn establish(&mut self) -> Result<Arc<ActiveSession>, IngestError> {
        let token = self.exchanger.exchange(&self.credentials).await?;
        tracing::debug!("Session token obtained");

        let channel = self.connector.connect(&token).await?;
        self.generation += 1;
        Ok(Arc::new(ActiveSession::new(self.generation, channel)))
    }

    const fn auth_exhausted(&self, failures: u32) -> bool {
        self.config.max_auth_attempts > 0 && failures >= self.config.max_auth_attempts
    }

    fn state(&self) -> SessionState {
        self.status_tx.borrow().state
    }

    fn transition(
        &self,
        next: SessionState,
        session: Option<Arc<ActiveSession>>,
        reconnect_attempts: u32,
    ) {
        let current = self.state();
        if !current.can_transition_to(next) {
            tracing::warn!(from = %current, to = %next, "Unexpected session transition");
        }
        tracing::debug!(from = %current, to = %next, "Session state change");

        metrics::set_session_state(next);
        self.status_tx.send_replace(SessionStatus {
            state: next,
            session,
            reconnect_attempts,
        });
    }

    fn terminate(&self) -> Result<(), SessionError> {
        if !self.state().is_terminal() {
            self.transition(SessionState::Terminated, None, 0);
        }
        tracing::info!("Session manager stopped");
        Ok(())
    }

    fn fail(&self, err: SessionError) -> SessionError {
        tracing::error!(error = %err, "Session manager giving up");
        self.transition(SessionState::Terminated, None, 0);
        err
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::application::ports::MockCredentialExchange;
    use crate::domain::session::SessionToken;

    /// Channel that answers from a script; an empty script means "accept".
    struct ScriptedChannel {
        replies: VecDeque<Result<Ack, IngestError>>,
    }

    #[async_trait]
    impl IngestChannel for ScriptedChannel {
        async fn send(&mut self, _frame: String) -> Result<Ack, IngestError> {
            self.replies.pop_front().unwrap_or(Ok(Ack::Accepted))
        }

        async fn close(&mut self) {}
    }

    /// Connector whose outcomes come from a script; extra calls succeed.
    struct ScriptedConnector {
        outcomes: parking_lot::Mutex<VecDeque<Result<(), IngestError>>>,
        connects: AtomicU64,
    }

    impl ScriptedConnector {
        fn new(outcomes: Vec<Result<(), IngestError>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: parking_lot::Mutex::new(outcomes.into()),
                connects: AtomicU64::new(0),
            })
        }
    }

    #[async_trait]
    impl IngestConnector for ScriptedConnector {
        async fn connect(
            &self,
            _token: &SessionToken,
        ) -> Result<Box<dyn IngestChannel>, IngestError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let outcome = self.outcomes.lock().pop_front().unwrap_or(Ok(()));
            outcome.map(|()| {
                Box::new(ScriptedChannel {
                    replies: VecDeque::new(),
                }) as Box<dyn IngestChannel>
            })
        }
    }

    fn config(max_auth_attempts: u32, max_attempts: u32) -> SessionManagerConfig {
        SessionManagerConfig {
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(40),
                multiplier: 2.0,
                jitter_factor: 0.0,
                max_attempts,
            },
            max_auth_attempts,
        }
    }

    fn credentials() -> Credentials {
        Credentials::new("acct-1", "pw").unwrap()
    }

    fn accepting_exchanger() -> Arc<MockCredentialExchange> {
        let mut exchanger = MockCredentialExchange::new();
        exchanger
            .expect_exchange()
            .returning(|_| Ok(SessionToken::new("tok-abc")));
        Arc::new(exchanger)
    }

    async fn wait_for_state(
        rx: &mut watch::Receiver<SessionStatus>,
        state: SessionState,
    ) -> SessionStatus {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                {
                    let status = rx.borrow_and_update();
                    if status.state == state {
                        return status.clone();
                    }
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn connects_and_publishes_session() {
        let connector = ScriptedConnector::new(vec![]);
        let manager = SessionManager::new(
            config(3, 0),
            credentials(),
            accepting_exchanger(),
            connector,
        );
        let mut rx = manager.subscribe();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(manager.run(cancel.clone()));

        let status = wait_for_state(&mut rx, SessionState::Connected).await;
        let session = status.live_session().unwrap();
        assert_eq!(session.generation(), 1);

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), Ok(()));
        assert!(!session.is_live());
        assert_eq!(rx.borrow().state, SessionState::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_credentials_exhaust_auth_attempts() {
        let mut exchanger = MockCredentialExchange::new();
        exchanger
            .expect_exchange()
            .times(3)
            .returning(|_| Err(IngestError::Authentication("invalid credentials".into())));

        let connector = ScriptedConnector::new(vec![]);
        let manager = SessionManager::new(
            config(3, 0),
            credentials(),
            Arc::new(exchanger),
            Arc::clone(&connector) as Arc<dyn IngestConnector>,
        );
        let rx = manager.subscribe();

        let result = manager.run(CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(SessionError::AuthenticationFailed { attempts: 3, .. })
        ));
        assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
        assert_eq!(rx.borrow().state, SessionState::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failures_retry_until_connected() {
        let connector = ScriptedConnector::new(vec![
            Err(IngestError::Transport("connection refused".into())),
            Err(IngestError::Transport("connection refused".into())),
        ]);
        let manager = SessionManager::new(
            config(3, 0),
            credentials(),
            accepting_exchanger(),
            Arc::clone(&connector) as Arc<dyn IngestConnector>,
        );
        let mut rx = manager.subscribe();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(manager.run(cancel.clone()));

        let status = wait_for_state(&mut rx, SessionState::Connected).await;
        assert_eq!(connector.connects.load(Ordering::SeqCst), 3);
        assert_eq!(status.session.unwrap().generation(), 1);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_limit_is_reported() {
        let connector = ScriptedConnector::new(
            (0..10)
                .map(|_| Err(IngestError::Transport("unreachable".into())))
                .collect(),
        );
        let manager = SessionManager::new(
            config(3, 2),
            credentials(),
            accepting_exchanger(),
            connector,
        );

        let result = manager.run(CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(SessionError::RetriesExhausted { attempts: 2, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn lost_session_is_replaced_with_new_generation() {
        let connector = ScriptedConnector::new(vec![]);
        let manager = SessionManager::new(
            config(3, 0),
            credentials(),
            accepting_exchanger(),
            connector,
        );
        let mut rx = manager.subscribe();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(manager.run(cancel.clone()));

        let first = wait_for_state(&mut rx, SessionState::Connected)
            .await
            .live_session()
            .unwrap();
        first.invalidate(SessionEnd::TransportLost("reset by peer".into()));

        wait_for_state(&mut rx, SessionState::Disconnected).await;
        let second = wait_for_state(&mut rx, SessionState::Connected)
            .await
            .live_session()
            .unwrap();

        assert!(!first.is_live());
        assert_eq!(second.generation(), 2);
        assert_ne!(first.id(), second.id());

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn token_rejection_reauthenticates() {
        let mut exchanger = MockCredentialExchange::new();
        exchanger
            .expect_exchange()
            .times(2..)
            .returning(|_| Ok(SessionToken::new("tok-abc")));

        let connector = ScriptedConnector::new(vec![]);
        let manager = SessionManager::new(
            config(3, 0),
            credentials(),
            Arc::new(exchanger),
            connector,
        );
        let mut rx = manager.subscribe();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(manager.run(cancel.clone()));

        let first = wait_for_state(&mut rx, SessionState::Connected)
            .await
            .live_session()
            .unwrap();
        first.invalidate(SessionEnd::TokenRejected);

        // Reauthentication needs no backoff, so the next session follows at once.
        let second = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                rx.changed().await.unwrap();
                if let Some(session) = rx.borrow_and_update().live_session() {
                    return session;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(second.generation(), 2);
        assert!(!first.is_live());

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn send_on_invalidated_session_fails_fast() {
        let session = ActiveSession::new(
            1,
            Box::new(ScriptedChannel {
                replies: VecDeque::new(),
            }),
        );
        assert_eq!(session.send("{}".into()).await, Ok(Ack::Accepted));
        assert_eq!(session.acked(), 1);

        session.invalidate(SessionEnd::TransportLost("gone".into()));
        session.invalidate(SessionEnd::TokenRejected);
        assert!(matches!(
            session.send("{}".into()).await,
            Err(IngestError::Transport(_))
        ));
        assert_eq!(
            session.end_reason(),
            SessionEnd::TransportLost("gone".into())
        );
    }

    #[test]
    fn session_end_from_ingest_error() {
        assert_eq!(
            SessionEnd::from(&IngestError::TokenRejected),
            SessionEnd::TokenRejected
        );
        assert_eq!(
            SessionEnd::from(&IngestError::Protocol("binary frame".into())),
            SessionEnd::TransportLost("binary frame".into())
        );
    }
}
