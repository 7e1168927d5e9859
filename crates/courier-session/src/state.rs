//! Session states and the per-session record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Starting,
    AwaitingQr,
    AwaitingPhoneCode,
    Authenticated,
    Ready,
    Reconnecting,
    Stopped,
    /// Terminal until an explicit restart.
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Starting => "starting",
            Self::AwaitingQr => "awaiting_qr",
            Self::AwaitingPhoneCode => "awaiting_phone_code",
            Self::Authenticated => "authenticated",
            Self::Ready => "ready",
            Self::Reconnecting => "reconnecting",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }

    /// Whether provider message events are accepted in this state.
    pub fn accepts_events(&self) -> bool {
        matches!(self, Self::Ready | Self::Authenticated)
    }

    /// States from which `start` actually does work; anywhere else it is
    /// a no-op that reports the current state.
    pub(crate) fn can_begin_start(&self) -> bool {
        matches!(self, Self::Uninitialized | Self::Stopped | Self::Failed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status changes pushed by the provider, fed in through the webhook
/// ingestor's internal transition hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderStatus {
    /// Auth handshake confirmed (QR scanned / code accepted).
    AuthOk,
    /// Provider confirms an active socket.
    SocketOk,
    /// Socket dropped unexpectedly.
    Dropped,
}

/// One session's bookkeeping record. Retained after stop for audit.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub account_id: String,
    pub state: SessionState,
    pub last_transition_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub retry_count: u32,
}

impl SessionRecord {
    pub(crate) fn new(session_id: &str, account_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            account_id: account_id.to_string(),
            state: SessionState::Uninitialized,
            last_transition_at: Utc::now(),
            last_error: None,
            retry_count: 0,
        }
    }

    pub(crate) fn transition(&mut self, next: SessionState) {
        if self.state != next {
            debug!("session {}: {} -> {}", self.session_id, self.state, next);
        }
        self.state = next;
        self.last_transition_at = Utc::now();
    }

    pub(crate) fn fail(&mut self, reason: impl Into<String>) {
        self.last_error = Some(reason.into());
        self.transition(SessionState::Failed);
    }
}
