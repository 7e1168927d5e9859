//! Idempotent message persistence.

use super::{parse_ts, ts, Store};
use chrono::Duration;
use courier_core::{
    ids::{usable_message_id, validate_identifier},
    message::{CanonicalMessage, DedupPolicy},
    CourierError,
};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

impl Store {
    /// Append a message idempotently. Returns whether a new row was
    /// inserted (`false` means the message was a duplicate and was
    /// discarded, not overwritten).
    ///
    /// Dedup key is the provider `message_id` when usable, enforced by
    /// the unique `(session_id, message_id)` index in a single
    /// insert-if-absent statement. Without one, a prior row with the same
    /// `(chat_id, sender_id, body_hash)` inside the policy window counts
    /// as the same message.
    pub async fn append_incoming(
        &self,
        msg: &CanonicalMessage,
        policy: &DedupPolicy,
    ) -> Result<bool, CourierError> {
        validate_identifier(&msg.chat_id)?;
        if let Some(ref mid) = msg.message_id {
            if mid.contains("[object") {
                return Err(CourierError::InvalidIdentifier(format!(
                    "stringified-object message id: {mid}"
                )));
            }
        }

        let hash = body_hash(&msg.body);

        if usable_message_id(msg.message_id.as_deref()) {
            return self.insert_row(msg, &hash).await;
        }

        // No usable id: fall back to content dedup inside the window.
        let cutoff = msg.occurred_at - Duration::hours(policy.effective_window_hours());
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM messages \
             WHERE session_id = ? AND chat_id = ? AND sender_id = ? AND body_hash = ? \
             AND COALESCE(timestamp, created_at) >= ?",
        )
        .bind(&msg.session_id)
        .bind(&msg.chat_id)
        .bind(&msg.sender_id)
        .bind(&hash)
        .bind(ts(&cutoff))
        .fetch_one(self.pool())
        .await
        .map_err(|e| CourierError::Store(format!("dedup lookup failed: {e}")))?;

        if count > 0 {
            debug!(
                "dropping id-less duplicate in {} from {} (window {}h)",
                msg.chat_id,
                msg.sender_id,
                policy.effective_window_hours()
            );
            return Ok(false);
        }

        self.insert_row(msg, &hash).await
    }

    /// Single insert-if-absent write. New rows always populate the
    /// canonical `timestamp` column; `created_at` stays NULL.
    async fn insert_row(&self, msg: &CanonicalMessage, hash: &str) -> Result<bool, CourierError> {
        let id = Uuid::new_v4().to_string();
        // An empty-string message id would collide across unrelated
        // messages under the unique index; store NULL instead.
        let message_id = msg
            .message_id
            .as_deref()
            .filter(|m| !m.trim().is_empty());

        let result = sqlx::query(
            "INSERT OR IGNORE INTO messages \
             (id, session_id, message_id, chat_id, is_group, group_id, group_name, \
              to_address, sender_id, direction, body, body_hash, timestamp, \
              ingested_at, source_vintage) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&msg.session_id)
        .bind(message_id)
        .bind(&msg.chat_id)
        .bind(msg.is_group)
        .bind(&msg.group_id)
        .bind(&msg.group_name)
        .bind(&msg.to_address)
        .bind(&msg.sender_id)
        .bind(msg.direction.as_str())
        .bind(&msg.body)
        .bind(hash)
        .bind(ts(&msg.occurred_at))
        .bind(ts(&msg.ingested_at))
        .bind(msg.source_vintage.as_str())
        .execute(self.pool())
        .await
        .map_err(|e| CourierError::Store(format!("insert failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    /// Total rows in the history, for the status surface.
    pub async fn message_count(&self) -> Result<i64, CourierError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages")
            .fetch_one(self.pool())
            .await
            .map_err(|e| CourierError::Store(format!("count failed: {e}")))?;
        Ok(count)
    }
}

/// Content hash for fallback dedup: SHA-256 of the lowercased,
/// whitespace-collapsed body, hex-encoded.
pub fn body_hash(body: &str) -> String {
    let normalized = body
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

/// The dedup identity of a message: its provider id when usable, else the
/// content tuple. The monitor evaluator keys emissions on this.
pub fn message_key(msg: &CanonicalMessage) -> String {
    if usable_message_id(msg.message_id.as_deref()) {
        msg.message_id.clone().unwrap_or_default()
    } else {
        format!("{}:{}:{}", msg.chat_id, msg.sender_id, body_hash(&msg.body))
    }
}

pub(super) fn row_occurred_at(
    timestamp: Option<&str>,
    created_at: Option<&str>,
    ingested_at: &str,
) -> chrono::DateTime<chrono::Utc> {
    timestamp
        .and_then(parse_ts)
        .or_else(|| created_at.and_then(parse_ts))
        .or_else(|| parse_ts(ingested_at))
        .unwrap_or_else(chrono::Utc::now)
}
