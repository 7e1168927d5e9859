//! Provider payload normalization.
//!
//! Provider message payloads vary across client-library vintages: the
//! chat id may live in `chatId`, `from`, or `to` depending on direction;
//! the event time may be a unix `timestamp` or an RFC 3339 `createdAt`;
//! the text may be `body`, `text`, or a media `caption`. Everything is
//! flattened here into a [`CanonicalMessage`] so the rest of the pipeline
//! sees one shape.

use chrono::{DateTime, Utc};
use courier_core::{
    ids::validate_identifier,
    message::{CanonicalMessage, Direction, SourceVintage},
    CourierError,
};
use serde_json::Value;

/// Group chats carry the group server suffix on their identifier. This
/// is the authority on group-ness — payload flags go stale.
const GROUP_SUFFIX: &str = "@g.us";

/// Convert a raw provider message payload into a canonical record.
///
/// `InvalidIdentifier` errors mean the payload carried a malformed or
/// structured identifier and must be rejected outright; `Webhook` errors
/// mean the payload is unusable (no chat, no text) and should be dropped
/// by the caller.
pub fn canonicalize(
    session_id: &str,
    payload: &Value,
    vintage: SourceVintage,
) -> Result<CanonicalMessage, CourierError> {
    let from_me = payload
        .get("fromMe")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let chat_id = chat_identifier(payload, from_me)?;
    validate_identifier(&chat_id)?;
    let message_id = message_identifier(payload)?;

    let is_group = chat_id.ends_with(GROUP_SUFFIX);
    let group_name = string_field(payload, &["groupName", "chatName"]);

    let sender_id = if is_group {
        string_field(payload, &["author", "participant"])
            .ok_or_else(|| CourierError::Webhook("group message has no author".into()))?
    } else {
        string_field(payload, &["from"]).unwrap_or_else(|| chat_id.clone())
    };
    validate_identifier(&sender_id)?;

    let body = string_field(payload, &["body", "text", "caption"]).unwrap_or_default();
    if body.is_empty() {
        return Err(CourierError::Webhook("message has no text content".into()));
    }

    Ok(CanonicalMessage {
        message_id,
        session_id: session_id.to_string(),
        chat_id: chat_id.clone(),
        is_group,
        group_id: is_group.then(|| chat_id.clone()),
        group_name: if is_group { group_name } else { None },
        to_address: string_field(payload, &["to"]),
        sender_id,
        direction: if from_me {
            Direction::Outgoing
        } else {
            Direction::Incoming
        },
        body,
        occurred_at: resolve_occurred_at(payload),
        ingested_at: Utc::now(),
        source_vintage: vintage,
    })
}

/// The chat the message belongs to. For our own messages the chat is the
/// `to` side; for incoming it is `from`. An explicit `chatId` wins.
fn chat_identifier(payload: &Value, from_me: bool) -> Result<String, CourierError> {
    let keys: [&str; 3] = if from_me {
        ["chatId", "to", "from"]
    } else {
        ["chatId", "from", "to"]
    };
    for key in keys {
        match payload.get(key) {
            Some(Value::String(s)) => return Ok(s.clone()),
            // A structured identifier where a string belongs is the same
            // defect as its "[object Object]" stringification; there is
            // no confirmed field mapping to recover from it.
            Some(Value::Object(_)) => {
                return Err(CourierError::InvalidIdentifier(format!(
                    "structured {key} identifier"
                )))
            }
            _ => {}
        }
    }
    Err(CourierError::Webhook("payload has no chat identifier".into()))
}

fn message_identifier(payload: &Value) -> Result<Option<String>, CourierError> {
    match payload.get("id") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            if s.contains("[object") {
                Err(CourierError::InvalidIdentifier(format!(
                    "stringified-object message id: {s}"
                )))
            } else if s.trim().is_empty() {
                Ok(None)
            } else {
                Ok(Some(s.clone()))
            }
        }
        Some(Value::Object(_)) => Err(CourierError::InvalidIdentifier(
            "structured message id".into(),
        )),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(_) => Ok(None),
    }
}

/// Resolve the event time: unix `timestamp` first, the legacy RFC 3339
/// `createdAt` second, ingest time as the last resort.
fn resolve_occurred_at(payload: &Value) -> DateTime<Utc> {
    if let Some(secs) = payload.get("timestamp").and_then(Value::as_i64) {
        if let Some(dt) = DateTime::from_timestamp(secs, 0) {
            return dt;
        }
    }
    if let Some(raw) = payload.get("createdAt").and_then(Value::as_str) {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return dt.with_timezone(&Utc);
        }
    }
    Utc::now()
}

fn string_field(payload: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        payload
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}
