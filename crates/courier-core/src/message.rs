use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which way a message travelled relative to the connected account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incoming => "incoming",
            Self::Outgoing => "outgoing",
        }
    }
}

/// Whether a record arrived through live webhook delivery or a history
/// backfill sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceVintage {
    Live,
    Backfill,
}

impl SourceVintage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Backfill => "backfill",
        }
    }
}

/// The normalized, provider-agnostic message record all downstream logic
/// operates on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalMessage {
    /// Provider-assigned id, unique within a session when present.
    pub message_id: Option<String>,
    pub session_id: String,
    pub chat_id: String,
    pub is_group: bool,
    /// Present iff `is_group`.
    pub group_id: Option<String>,
    pub group_name: Option<String>,
    /// Raw provider `to` address, kept as an alternate chat key for
    /// fallback queries.
    pub to_address: Option<String>,
    pub sender_id: String,
    pub direction: Direction,
    pub body: String,
    /// Single resolved event time (see the store's timestamp handling).
    pub occurred_at: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
    pub source_vintage: SourceVintage,
}

/// A user-configured group/keyword pair that triggers downstream action.
///
/// Created and removed by the external configuration layer; the pipeline
/// only reads these, apart from the rolling stats the evaluator maintains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorRule {
    pub rule_id: String,
    pub owner_id: String,
    pub group_id: Option<String>,
    /// Matched case-insensitively when `group_id` is unavailable.
    pub group_name: Option<String>,
    pub keywords: Vec<String>,
    pub is_active: bool,
    pub total_messages: i64,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Per-account dedup window policy.
///
/// Governs how far back an otherwise-identical `(chat, sender, body-hash)`
/// tuple still counts as a duplicate when no usable `message_id` exists.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DedupPolicy {
    pub refresh_mode: bool,
    pub duplicate_window_hours: i64,
}

impl Default for DedupPolicy {
    fn default() -> Self {
        Self {
            refresh_mode: false,
            duplicate_window_hours: 4,
        }
    }
}

impl DedupPolicy {
    /// The window actually applied: refresh mode shrinks it to one hour.
    pub fn effective_window_hours(&self) -> i64 {
        if self.refresh_mode {
            1
        } else {
            self.duplicate_window_hours
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_window_is_four_hours() {
        let policy = DedupPolicy::default();
        assert_eq!(policy.effective_window_hours(), 4);
    }

    #[test]
    fn refresh_mode_shrinks_window_to_one_hour() {
        let policy = DedupPolicy {
            refresh_mode: true,
            duplicate_window_hours: 4,
        };
        assert_eq!(policy.effective_window_hours(), 1);
    }
}
