//! Time-range and chat-scoped reads.
//!
//! Older rows carry their event time in either `timestamp` or
//! `created_at`. Queries cover both columns with OR semantics instead of
//! inspecting each row to decide which field "is" the timestamp.

use super::messages::row_occurred_at;
use super::{parse_ts, ts, Store};
use chrono::{DateTime, Utc};
use courier_core::{
    message::{CanonicalMessage, Direction, SourceVintage},
    CourierError,
};
use sqlx::FromRow;
use tracing::debug;

const SELECT_COLUMNS: &str = "SELECT message_id, session_id, chat_id, is_group, group_id, \
     group_name, to_address, sender_id, direction, body, timestamp, created_at, \
     ingested_at, source_vintage FROM messages";

#[derive(FromRow)]
struct MessageRow {
    message_id: Option<String>,
    session_id: String,
    chat_id: String,
    is_group: bool,
    group_id: Option<String>,
    group_name: Option<String>,
    to_address: Option<String>,
    sender_id: String,
    direction: String,
    body: String,
    timestamp: Option<String>,
    created_at: Option<String>,
    ingested_at: String,
    source_vintage: String,
}

impl MessageRow {
    fn into_canonical(self) -> CanonicalMessage {
        let occurred_at = row_occurred_at(
            self.timestamp.as_deref(),
            self.created_at.as_deref(),
            &self.ingested_at,
        );
        let ingested_at = parse_ts(&self.ingested_at).unwrap_or(occurred_at);
        CanonicalMessage {
            message_id: self.message_id,
            session_id: self.session_id,
            chat_id: self.chat_id,
            is_group: self.is_group,
            group_id: self.group_id,
            group_name: self.group_name,
            to_address: self.to_address,
            sender_id: self.sender_id,
            direction: if self.direction == "outgoing" {
                Direction::Outgoing
            } else {
                Direction::Incoming
            },
            body: self.body,
            occurred_at,
            ingested_at,
            source_vintage: if self.source_vintage == "backfill" {
                SourceVintage::Backfill
            } else {
                SourceVintage::Live
            },
        }
    }
}

impl Store {
    /// Messages in a chat whose `timestamp` OR `created_at` falls inside
    /// `[start, end]`, ascending by the resolved event time.
    pub async fn query_range(
        &self,
        chat_id: &str,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
    ) -> Result<Vec<CanonicalMessage>, CourierError> {
        let sql = format!(
            "{SELECT_COLUMNS} \
             WHERE chat_id = ? \
             AND ((timestamp IS NOT NULL AND timestamp BETWEEN ? AND ?) \
               OR (created_at IS NOT NULL AND created_at BETWEEN ? AND ?)) \
             ORDER BY COALESCE(timestamp, created_at) ASC"
        );
        let rows: Vec<MessageRow> = sqlx::query_as(&sql)
            .bind(chat_id)
            .bind(ts(start))
            .bind(ts(end))
            .bind(ts(start))
            .bind(ts(end))
            .fetch_all(self.pool())
            .await
            .map_err(|e| CourierError::Store(format!("range query failed: {e}")))?;

        Ok(rows.into_iter().map(MessageRow::into_canonical).collect())
    }

    /// Range query with a recovery path: when the primary query finds
    /// nothing for a chat that does have history, retry with the window
    /// stretched by its own span and an OR across the alternate
    /// group-identifying keys — providers are inconsistent about which of
    /// `chat_id`, `group_id`, `group_name`, or the raw `to` address is
    /// populated on any given record.
    pub async fn query_range_with_fallback(
        &self,
        chat_id: &str,
        group_id: Option<&str>,
        group_name: Option<&str>,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
    ) -> Result<Vec<CanonicalMessage>, CourierError> {
        let primary = self.query_range(chat_id, start, end).await?;
        if !primary.is_empty() {
            return Ok(primary);
        }

        if !self.chat_has_history(chat_id, group_id, group_name).await? {
            return Ok(primary);
        }

        let span = *end - *start;
        let wide_start = *start - span;
        let wide_end = *end + span;
        debug!(
            "range query for {chat_id} came back empty despite history; \
             widening to [{}, {}] across alternate keys",
            ts(&wide_start),
            ts(&wide_end)
        );

        let sql = format!(
            "{SELECT_COLUMNS} \
             WHERE (chat_id = ? OR group_id = ? OR group_name = ? OR to_address = ?) \
             AND ((timestamp IS NOT NULL AND timestamp BETWEEN ? AND ?) \
               OR (created_at IS NOT NULL AND created_at BETWEEN ? AND ?)) \
             ORDER BY COALESCE(timestamp, created_at) ASC"
        );
        let rows: Vec<MessageRow> = sqlx::query_as(&sql)
            .bind(chat_id)
            .bind(group_id.unwrap_or(chat_id))
            .bind(group_name)
            .bind(chat_id)
            .bind(ts(&wide_start))
            .bind(ts(&wide_end))
            .bind(ts(&wide_start))
            .bind(ts(&wide_end))
            .fetch_all(self.pool())
            .await
            .map_err(|e| CourierError::Store(format!("fallback range query failed: {e}")))?;

        Ok(rows.into_iter().map(MessageRow::into_canonical).collect())
    }

    /// Whether any record matches any identifying key for this chat.
    pub async fn chat_has_history(
        &self,
        chat_id: &str,
        group_id: Option<&str>,
        group_name: Option<&str>,
    ) -> Result<bool, CourierError> {
        let (exists,): (i64,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM messages \
             WHERE chat_id = ? OR group_id = ? OR group_name = ? OR to_address = ?)",
        )
        .bind(chat_id)
        .bind(group_id.unwrap_or(chat_id))
        .bind(group_name)
        .bind(chat_id)
        .fetch_one(self.pool())
        .await
        .map_err(|e| CourierError::Store(format!("history check failed: {e}")))?;

        Ok(exists != 0)
    }
}
