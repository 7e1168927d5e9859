//! Webhook ingestion — the single entrypoint for provider-pushed events.
//!
//! Provider delivery is at-least-once, so everything downstream of this
//! module tolerates redelivery; conversely this module never signals a
//! retry back to the provider — a failed store write retries locally and
//! then leans on redelivery as the backstop.

use crate::normalize::canonicalize;
use courier_core::{message::SourceVintage, traits::EventSink, CourierError};
use courier_monitor::MonitorEvaluator;
use courier_session::{ProviderStatus, SessionManager};
use courier_store::Store;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Store-write retry ladder before falling back on redelivery.
pub const RETRY_DELAYS_MS: [u64; 3] = [500, 1000, 2000];

/// What happened to a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// New message stored and fanned out downstream.
    Stored,
    /// Redelivery of a message already in the store.
    Duplicate,
    /// Session status change forwarded to the session manager.
    StatusForwarded,
    /// Accepted but intentionally not processed.
    Dropped(&'static str),
}

pub struct WebhookIngestor {
    sessions: Arc<SessionManager>,
    store: Store,
    evaluator: Arc<MonitorEvaluator>,
    sink: Arc<dyn EventSink>,
    /// HMAC secret; unsigned deliveries are accepted when unset.
    secret: Option<String>,
}

impl WebhookIngestor {
    pub fn new(
        sessions: Arc<SessionManager>,
        store: Store,
        evaluator: Arc<MonitorEvaluator>,
        sink: Arc<dyn EventSink>,
        secret: Option<String>,
    ) -> Self {
        Self {
            sessions,
            store,
            evaluator,
            sink,
            secret,
        }
    }

    /// Entry point for a raw webhook body as delivered by the provider.
    ///
    /// Signature failures are errors (the caller answers 401); malformed
    /// payloads are logged and dropped — the provider does not honor a
    /// retry signal, so failing them loudly buys nothing.
    pub async fn receive(
        &self,
        session_id: &str,
        account_id: &str,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<ReceiveOutcome, CourierError> {
        if let Some(ref secret) = self.secret {
            let Some(signature) = signature else {
                return Err(CourierError::Webhook("missing signature".into()));
            };
            if !verify_signature(secret, body, signature) {
                warn!("webhook signature mismatch for {session_id}");
                return Err(CourierError::Webhook("signature mismatch".into()));
            }
        }

        let event: Value = match serde_json::from_slice(body) {
            Ok(v) => v,
            Err(e) => {
                warn!("malformed webhook body for {session_id}: {e}");
                return Ok(ReceiveOutcome::Dropped("malformed payload"));
            }
        };

        self.dispatch(session_id, account_id, &event).await
    }

    /// Dispatch a parsed event envelope by its `event` kind.
    pub async fn dispatch(
        &self,
        session_id: &str,
        account_id: &str,
        event: &Value,
    ) -> Result<ReceiveOutcome, CourierError> {
        let kind = event.get("event").and_then(Value::as_str).unwrap_or("");

        match kind {
            "session.status" => {
                let status = event
                    .pointer("/payload/status")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                match parse_status(status) {
                    Some(status) => {
                        self.sessions
                            .handle_provider_status(session_id, status)
                            .await?;
                        Ok(ReceiveOutcome::StatusForwarded)
                    }
                    None => {
                        debug!("unknown session status '{status}' for {session_id}");
                        Ok(ReceiveOutcome::Dropped("unknown status"))
                    }
                }
            }
            "message.ack" => {
                debug!("ignoring delivery ack for {session_id}");
                Ok(ReceiveOutcome::Dropped("ack"))
            }
            kind if kind.starts_with("message") => match event.get("payload") {
                Some(payload) => self.ingest_message(session_id, account_id, payload).await,
                None => {
                    warn!("message event without payload for {session_id}");
                    Ok(ReceiveOutcome::Dropped("malformed payload"))
                }
            },
            other => {
                debug!("ignoring webhook event '{other}' for {session_id}");
                Ok(ReceiveOutcome::Dropped("unhandled event"))
            }
        }
    }

    async fn ingest_message(
        &self,
        session_id: &str,
        account_id: &str,
        payload: &Value,
    ) -> Result<ReceiveOutcome, CourierError> {
        // Events race session teardown; a not-ready session is a quiet
        // drop, not an error.
        if !self.sessions.is_ingest_ready(session_id).await {
            debug!("dropping message event for {session_id}: session not ready");
            return Ok(ReceiveOutcome::Dropped("session not ready"));
        }

        let msg = match canonicalize(session_id, payload, SourceVintage::Live) {
            Ok(msg) => msg,
            Err(e @ CourierError::InvalidIdentifier(_)) => return Err(e),
            Err(e) => {
                warn!("unusable message payload for {session_id}: {e}");
                return Ok(ReceiveOutcome::Dropped("malformed payload"));
            }
        };

        let policy = self.store.dedup_policy(account_id).await?;
        let Some(inserted) = self.append_with_retry(&msg, &policy).await? else {
            return Ok(ReceiveOutcome::Dropped("store write failed"));
        };

        if !inserted {
            debug!(
                "duplicate delivery of {} in {}",
                msg.message_id.as_deref().unwrap_or("<no id>"),
                msg.chat_id
            );
            return Ok(ReceiveOutcome::Duplicate);
        }

        // Downstream failures never bounce the delivery: the message is
        // durably stored, which is the contract that matters here.
        if let Err(e) = self.sink.publish(&msg).await {
            warn!("downstream publish failed for {}: {e}", msg.chat_id);
        }
        if let Err(e) = self.evaluator.evaluate(&msg).await {
            warn!("monitor evaluation failed for {}: {e}", msg.chat_id);
        }

        Ok(ReceiveOutcome::Stored)
    }

    /// Append with the bounded retry ladder. `Ok(None)` means every
    /// attempt failed and redelivery is the recovery path.
    async fn append_with_retry(
        &self,
        msg: &courier_core::message::CanonicalMessage,
        policy: &courier_core::message::DedupPolicy,
    ) -> Result<Option<bool>, CourierError> {
        let mut attempt = 0;
        loop {
            match self.store.append_incoming(msg, policy).await {
                Ok(inserted) => return Ok(Some(inserted)),
                Err(e @ CourierError::InvalidIdentifier(_)) => return Err(e),
                Err(e) => {
                    let Some(delay) = RETRY_DELAYS_MS.get(attempt) else {
                        warn!(
                            "store write for {} failed after {} attempts, \
                             relying on redelivery: {e}",
                            msg.chat_id,
                            attempt + 1
                        );
                        return Ok(None);
                    };
                    warn!("store write for {} failed, retrying in {delay}ms: {e}", msg.chat_id);
                    tokio::time::sleep(Duration::from_millis(*delay)).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Verify an HMAC-SHA256 webhook signature (hex, optional `sha256=`
/// prefix) over the raw body.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    type HmacSha256 = Hmac<Sha256>;
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);

    let hex_digest = signature.strip_prefix("sha256=").unwrap_or(signature);
    let Ok(bytes) = hex::decode(hex_digest) else {
        return false;
    };
    mac.verify_slice(&bytes).is_ok()
}

/// Sign a body the way the provider does. Exposed for callers that need
/// to produce test deliveries.
pub fn sign_body(secret: &str, body: &[u8]) -> String {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("hmac accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

fn parse_status(status: &str) -> Option<ProviderStatus> {
    match status {
        "auth_ok" | "authenticated" => Some(ProviderStatus::AuthOk),
        "socket_ok" | "connected" | "ready" => Some(ProviderStatus::SocketOk),
        "dropped" | "disconnected" => Some(ProviderStatus::Dropped),
        _ => None,
    }
}
