//! Session control operations, serialized per session id.
//!
//! Each session gets a lazily created slot holding its record, an
//! operation mutex, and a cancellation token. The mutex serializes
//! start/stop/restart; `force_restart` is the one sanctioned bypass,
//! implemented as a cancellation signal to the current lock holder
//! rather than a second lock path.

use crate::state::{ProviderStatus, SessionRecord, SessionState};
use chrono::Utc;
use courier_core::{
    config::SessionConfig,
    traits::{AuthChallenge, ProviderConnector},
    CourierError,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What `start` produced.
#[derive(Debug, Clone)]
pub enum StartOutcome {
    /// The session was already starting or connected; nothing was done.
    AlreadyActive(SessionState),
    /// A QR challenge was issued; render it for scanning.
    QrIssued { payload: String },
    /// The deployment pairs by phone; follow up with `submit_phone_code`.
    PhonePairing,
}

pub(crate) struct SessionSlot {
    pub(crate) record: Mutex<SessionRecord>,
    op_lock: Mutex<()>,
    cancel: Mutex<CancellationToken>,
    /// Epoch millis of the in-flight operation's start, 0 when idle.
    op_started_ms: AtomicI64,
}

impl SessionSlot {
    fn new(record: SessionRecord) -> Arc<Self> {
        Arc::new(Self {
            record: Mutex::new(record),
            op_lock: Mutex::new(()),
            cancel: Mutex::new(CancellationToken::new()),
            op_started_ms: AtomicI64::new(0),
        })
    }

    /// The token current operations should watch.
    pub(crate) async fn token(&self) -> CancellationToken {
        self.cancel.lock().await.clone()
    }

    /// Replace the slot token, returning the old one for cancellation.
    async fn swap_token(&self) -> CancellationToken {
        let mut guard = self.cancel.lock().await;
        std::mem::replace(&mut *guard, CancellationToken::new())
    }

    /// Serialize a control operation on this session.
    async fn lock_op(&self) -> OpGuard<'_> {
        let guard = self.op_lock.lock().await;
        self.op_started_ms
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
        OpGuard {
            slot: self,
            _guard: guard,
        }
    }

    /// How long the current operation has been running, if any.
    fn op_in_flight_for(&self) -> Option<Duration> {
        let started = self.op_started_ms.load(Ordering::SeqCst);
        if started == 0 {
            return None;
        }
        let elapsed_ms = (Utc::now().timestamp_millis() - started).max(0);
        Some(Duration::from_millis(elapsed_ms as u64))
    }
}

struct OpGuard<'a> {
    slot: &'a SessionSlot,
    _guard: MutexGuard<'a, ()>,
}

impl Drop for OpGuard<'_> {
    fn drop(&mut self) {
        self.slot.op_started_ms.store(0, Ordering::SeqCst);
    }
}

/// Single source of truth for session state.
pub struct SessionManager {
    pub(crate) connector: Arc<dyn ProviderConnector>,
    pub(crate) config: SessionConfig,
    /// Bound applied to every provider call made on behalf of a session.
    pub(crate) op_timeout: Duration,
    slots: Mutex<HashMap<String, Arc<SessionSlot>>>,
    /// Stopped sessions, retained for audit and restart.
    retired: Mutex<HashMap<String, SessionRecord>>,
}

impl SessionManager {
    pub fn new(
        connector: Arc<dyn ProviderConnector>,
        config: SessionConfig,
        op_timeout: Duration,
    ) -> Self {
        Self {
            connector,
            config,
            op_timeout,
            slots: Mutex::new(HashMap::new()),
            retired: Mutex::new(HashMap::new()),
        }
    }

    /// Start a session: request an auth challenge and move to the
    /// matching wait state. A no-op when the session is already starting
    /// or connected — the challenge is not re-requested.
    pub async fn start(
        &self,
        session_id: &str,
        account_id: &str,
    ) -> Result<StartOutcome, CourierError> {
        let slot = self.slot_or_create(session_id, account_id).await;
        let _op = slot.lock_op().await;

        {
            let record = slot.record.lock().await;
            if !record.state.can_begin_start() {
                debug!(
                    "start on {session_id} is a no-op in state {}",
                    record.state
                );
                return Ok(StartOutcome::AlreadyActive(record.state));
            }
        }

        self.begin_start(session_id, &slot).await
    }

    /// Request a phone pairing code. Only valid while the session is
    /// waiting for auth.
    pub async fn submit_phone_code(
        &self,
        session_id: &str,
        phone_number: &str,
    ) -> Result<String, CourierError> {
        let slot = self.require_slot(session_id, "pair").await?;
        let _op = slot.lock_op().await;

        {
            let record = slot.record.lock().await;
            if !matches!(
                record.state,
                SessionState::Starting | SessionState::AwaitingPhoneCode
            ) {
                return Err(CourierError::InvalidTransition {
                    from: record.state.to_string(),
                    op: "pair",
                });
            }
        }

        let token = slot.token().await;
        match self
            .guarded(
                &token,
                self.connector.request_pairing_code(session_id, phone_number),
            )
            .await
        {
            Ok(code) => {
                slot.record
                    .lock()
                    .await
                    .transition(SessionState::AwaitingPhoneCode);
                Ok(code)
            }
            Err(e @ CourierError::UnsupportedAuthMethod(_)) => {
                // Terminal for this deployment. Record it, but leave the
                // state alone — a QR challenge, if issued, stays valid.
                slot.record.lock().await.last_error = Some(e.to_string());
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Stop a session. Idempotent; the record is retained for audit and
    /// the per-session lock slot is reaped.
    pub async fn stop(&self, session_id: &str) -> Result<SessionState, CourierError> {
        let Some(slot) = self.live_slot(session_id).await else {
            return Ok(SessionState::Stopped);
        };
        let _op = slot.lock_op().await;

        let record = {
            let mut record = slot.record.lock().await;
            record.transition(SessionState::Stopped);
            record.clone()
        };

        // Kill the watchdog and anything else watching this session.
        slot.token().await.cancel();

        if let Err(e) = tokio::time::timeout(self.op_timeout, self.connector.close(session_id))
            .await
            .unwrap_or_else(|_| Err(CourierError::Connector("close timed out".into())))
        {
            warn!("provider close for {session_id} failed: {e}");
        }

        self.slots.lock().await.remove(session_id);
        self.retired
            .lock()
            .await
            .insert(session_id.to_string(), record);

        info!("session {session_id} stopped");
        Ok(SessionState::Stopped)
    }

    /// Re-enter the start flow from Stopped, Failed, or Ready.
    pub async fn restart(&self, session_id: &str) -> Result<StartOutcome, CourierError> {
        let slot = self.require_slot(session_id, "restart").await?;
        let _op = slot.lock_op().await;

        {
            let mut record = slot.record.lock().await;
            match record.state {
                SessionState::Stopped | SessionState::Failed | SessionState::Ready => {
                    record.retry_count += 1;
                }
                other => {
                    return Err(CourierError::InvalidTransition {
                        from: other.to_string(),
                        op: "restart",
                    })
                }
            }
        }

        self.begin_start(session_id, &slot).await
    }

    /// Operator escape hatch: interrupt whatever operation holds the
    /// session lock and re-enter the start flow. Unlike `restart`, this
    /// is allowed to cut an in-progress operation short — but only once
    /// that operation has been in flight longer than the configured
    /// stuck threshold.
    pub async fn force_restart(&self, session_id: &str) -> Result<StartOutcome, CourierError> {
        let slot = self.require_slot(session_id, "force-restart").await?;

        let threshold = Duration::from_secs(self.config.lock_stuck_timeout_secs);
        if let Some(elapsed) = slot.op_in_flight_for() {
            if elapsed < threshold {
                return Err(CourierError::SessionStart(format!(
                    "force-restart refused: in-flight operation has run {}s, stuck threshold is {}s",
                    elapsed.as_secs(),
                    threshold.as_secs()
                )));
            }
            warn!(
                "force-restart of {session_id}: interrupting operation in flight for {}s",
                elapsed.as_secs()
            );
        }

        // Cancel the current holder; new operations get a fresh token.
        slot.swap_token().await.cancel();

        let _op = slot.lock_op().await;
        slot.record.lock().await.retry_count += 1;
        self.begin_start(session_id, &slot).await
    }

    /// Apply a provider-originated status change.
    pub async fn handle_provider_status(
        &self,
        session_id: &str,
        status: ProviderStatus,
    ) -> Result<(), CourierError> {
        let Some(slot) = self.live_slot(session_id).await else {
            debug!("status {status:?} for unknown session {session_id}, ignoring");
            return Ok(());
        };

        match status {
            ProviderStatus::AuthOk => {
                let mut record = slot.record.lock().await;
                if matches!(
                    record.state,
                    SessionState::Starting
                        | SessionState::AwaitingQr
                        | SessionState::AwaitingPhoneCode
                ) {
                    record.transition(SessionState::Authenticated);
                }
            }
            ProviderStatus::SocketOk => {
                let mut record = slot.record.lock().await;
                if matches!(
                    record.state,
                    SessionState::Authenticated | SessionState::Reconnecting
                ) {
                    record.last_error = None;
                    record.transition(SessionState::Ready);
                }
            }
            ProviderStatus::Dropped => {
                let reconnecting = {
                    let mut record = slot.record.lock().await;
                    if record.state == SessionState::Ready {
                        record.transition(SessionState::Reconnecting);
                        true
                    } else {
                        false
                    }
                };
                if reconnecting {
                    warn!("session {session_id} dropped, reconnecting");
                    self.spawn_watchdog(session_id, slot.clone());
                }
            }
        }
        Ok(())
    }

    /// Whether the session currently accepts provider message events.
    pub async fn is_ingest_ready(&self, session_id: &str) -> bool {
        match self.live_slot(session_id).await {
            Some(slot) => slot.record.lock().await.state.accepts_events(),
            None => false,
        }
    }

    /// Current record for one session, live or retired.
    pub async fn snapshot(&self, session_id: &str) -> Option<SessionRecord> {
        if let Some(slot) = self.live_slot(session_id).await {
            return Some(slot.record.lock().await.clone());
        }
        self.retired.lock().await.get(session_id).cloned()
    }

    /// All known session records.
    pub async fn sessions(&self) -> Vec<SessionRecord> {
        let mut out = Vec::new();
        for slot in self.slots.lock().await.values() {
            out.push(slot.record.lock().await.clone());
        }
        out.extend(self.retired.lock().await.values().cloned());
        out
    }

    /// Stop every live session (shutdown path).
    pub async fn stop_all(&self) {
        let ids: Vec<String> = self.slots.lock().await.keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.stop(&id).await {
                warn!("stop of {id} during shutdown failed: {e}");
            }
        }
    }

    /// The Starting transition plus challenge request, shared by start,
    /// restart, and force-restart. Caller must hold the op lock.
    async fn begin_start(
        &self,
        session_id: &str,
        slot: &Arc<SessionSlot>,
    ) -> Result<StartOutcome, CourierError> {
        {
            let mut record = slot.record.lock().await;
            record.last_error = None;
            record.transition(SessionState::Starting);
        }
        info!("session {session_id} starting, requesting auth challenge");

        let token = slot.token().await;
        match self
            .guarded(&token, self.connector.request_auth_challenge(session_id))
            .await
        {
            Ok(AuthChallenge::Qr { payload }) => {
                slot.record.lock().await.transition(SessionState::AwaitingQr);
                Ok(StartOutcome::QrIssued { payload })
            }
            Ok(AuthChallenge::PhonePairing) => {
                slot.record
                    .lock()
                    .await
                    .transition(SessionState::AwaitingPhoneCode);
                Ok(StartOutcome::PhonePairing)
            }
            Err(e) => {
                if token.is_cancelled() {
                    // A force-restart took over; the record belongs to the
                    // new owner now.
                    return Err(CourierError::SessionStart(format!(
                        "start of {session_id} interrupted"
                    )));
                }
                let reason = e.to_string();
                slot.record.lock().await.fail(reason.clone());
                Err(CourierError::SessionStart(reason))
            }
        }
    }

    /// Bound a provider call by the op timeout and the slot token.
    pub(crate) async fn guarded<T>(
        &self,
        token: &CancellationToken,
        fut: impl Future<Output = Result<T, CourierError>>,
    ) -> Result<T, CourierError> {
        tokio::select! {
            _ = token.cancelled() => {
                Err(CourierError::Connector("operation interrupted".into()))
            }
            res = tokio::time::timeout(self.op_timeout, fut) => match res {
                Ok(r) => r,
                Err(_) => Err(CourierError::Connector(format!(
                    "provider call timed out after {}s",
                    self.op_timeout.as_secs()
                ))),
            },
        }
    }

    async fn live_slot(&self, session_id: &str) -> Option<Arc<SessionSlot>> {
        self.slots.lock().await.get(session_id).cloned()
    }

    /// Existing slot, or one resurrected from the retired map, or a
    /// fresh one — lock slots are created lazily on first start.
    async fn slot_or_create(&self, session_id: &str, account_id: &str) -> Arc<SessionSlot> {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get(session_id) {
            return slot.clone();
        }
        let record = self
            .retired
            .lock()
            .await
            .remove(session_id)
            .unwrap_or_else(|| SessionRecord::new(session_id, account_id));
        let slot = SessionSlot::new(record);
        slots.insert(session_id.to_string(), slot.clone());
        slot
    }

    /// Like `slot_or_create` but never invents a session: operations on
    /// ids that were never started are transition errors.
    async fn require_slot(
        &self,
        session_id: &str,
        op: &'static str,
    ) -> Result<Arc<SessionSlot>, CourierError> {
        if let Some(slot) = self.live_slot(session_id).await {
            return Ok(slot);
        }
        let retired = self.retired.lock().await.remove(session_id);
        match retired {
            Some(record) => {
                let mut slots = self.slots.lock().await;
                let slot = SessionSlot::new(record);
                slots.insert(session_id.to_string(), slot.clone());
                Ok(slot)
            }
            None => Err(CourierError::InvalidTransition {
                from: "unknown".to_string(),
                op,
            }),
        }
    }
}
