//! Rule matching over newly stored messages.
//!
//! The evaluator runs after a message lands in the store, for both live
//! and backfilled traffic. Emissions are guarded by the store's
//! (rule, message) table, so redelivered or re-backfilled messages never
//! fire a rule twice. The rolling stats write is fire-and-forget; it must
//! never hold up ingestion.

use courier_core::{
    message::{CanonicalMessage, MonitorRule},
    traits::EventSink,
    CourierError,
};
use courier_store::{message_key, Store};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct MonitorEvaluator {
    store: Store,
    sink: Arc<dyn EventSink>,
}

impl MonitorEvaluator {
    pub fn new(store: Store, sink: Arc<dyn EventSink>) -> Self {
        Self { store, sink }
    }

    /// Match a message against every active rule. Returns how many fresh
    /// emissions were published.
    pub async fn evaluate(&self, msg: &CanonicalMessage) -> Result<usize, CourierError> {
        if !msg.is_group {
            return Ok(0);
        }

        let rules = self.store.active_rules().await?;
        let key = message_key(msg);
        let mut emitted = 0;

        for rule in rules {
            if !rule_targets_group(&rule, msg) {
                continue;
            }
            let Some(keyword) = matching_keyword(&rule.keywords, &msg.body) else {
                continue;
            };

            // The emission record is the at-most-once guard; only the
            // first recording publishes.
            match self.store.record_emission(&rule.rule_id, &key).await {
                Ok(true) => {
                    debug!(
                        "rule {} matched '{keyword}' in {} (message {key})",
                        rule.rule_id, msg.chat_id
                    );
                    if let Err(e) = self.sink.on_rule_match(&rule, msg).await {
                        warn!("rule match publish for {} failed: {e}", rule.rule_id);
                    }
                    emitted += 1;

                    let store = self.store.clone();
                    let rule_id = rule.rule_id.clone();
                    tokio::spawn(async move {
                        if let Err(e) = store.bump_rule_stats(&rule_id).await {
                            debug!("rule stats update for {rule_id} failed: {e}");
                        }
                    });
                }
                Ok(false) => {
                    debug!("rule {} already emitted for message {key}", rule.rule_id);
                }
                Err(e) => warn!("emission guard for {} failed: {e}", rule.rule_id),
            }
        }

        Ok(emitted)
    }
}

/// Whether a rule's group target matches the message's group identity.
/// The id wins when both sides have one; the human-readable name is the
/// fallback, compared case-insensitively.
fn rule_targets_group(rule: &MonitorRule, msg: &CanonicalMessage) -> bool {
    if let (Some(rule_gid), Some(msg_gid)) = (&rule.group_id, &msg.group_id) {
        return rule_gid == msg_gid;
    }
    match (&rule.group_name, &msg.group_name) {
        (Some(rule_name), Some(msg_name)) => rule_name.eq_ignore_ascii_case(msg_name),
        _ => false,
    }
}

/// First keyword with a case-insensitive match in the body, if any.
fn matching_keyword<'a>(keywords: &'a [String], body: &str) -> Option<&'a str> {
    let body = body.to_lowercase();
    keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .find(|k| body.contains(&k.to_lowercase()))
}
