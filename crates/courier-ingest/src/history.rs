//! On-demand history backfill.
//!
//! Fetches a chat's history from the provider and writes it through the
//! same normalization and dedup path as live ingestion, so running a
//! backfill twice — or racing it against live traffic — is safe.

use crate::normalize::canonicalize;
use courier_core::{
    ids::validate_identifier,
    message::SourceVintage,
    traits::{EventSink, ProviderConnector},
    CourierError,
};
use courier_monitor::MonitorEvaluator;
use courier_session::SessionManager;
use courier_store::Store;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a backfill sweep did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BackfillReport {
    pub fetched: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub rejected: usize,
}

pub struct HistoryReconciler {
    connector: Arc<dyn ProviderConnector>,
    sessions: Arc<SessionManager>,
    store: Store,
    evaluator: Arc<MonitorEvaluator>,
    sink: Arc<dyn EventSink>,
}

impl HistoryReconciler {
    pub fn new(
        connector: Arc<dyn ProviderConnector>,
        sessions: Arc<SessionManager>,
        store: Store,
        evaluator: Arc<MonitorEvaluator>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            connector,
            sessions,
            store,
            evaluator,
            sink,
        }
    }

    /// Fetch up to `limit` historical messages for a chat and merge them
    /// into the store. Safe to repeat; per-record failures are counted,
    /// never fatal to the sweep.
    pub async fn sync_chat(
        &self,
        session_id: &str,
        account_id: &str,
        chat_id: &str,
        limit: u32,
    ) -> Result<BackfillReport, CourierError> {
        // Reject malformed chat ids before issuing a doomed provider call.
        validate_identifier(chat_id)?;

        if !self.sessions.is_ingest_ready(session_id).await {
            return Err(CourierError::Connector(format!(
                "session {session_id} is not connected"
            )));
        }

        let raw = self
            .connector
            .fetch_history(session_id, chat_id, limit)
            .await?;
        let policy = self.store.dedup_policy(account_id).await?;

        let mut report = BackfillReport {
            fetched: raw.len(),
            ..Default::default()
        };

        for payload in &raw {
            let msg = match canonicalize(session_id, payload, SourceVintage::Backfill) {
                Ok(msg) => msg,
                Err(e) => {
                    report.rejected += 1;
                    debug!("skipping history record for {chat_id}: {e}");
                    continue;
                }
            };

            match self.store.append_incoming(&msg, &policy).await {
                Ok(true) => {
                    report.inserted += 1;
                    if let Err(e) = self.sink.publish(&msg).await {
                        warn!("downstream publish of backfilled message failed: {e}");
                    }
                    if let Err(e) = self.evaluator.evaluate(&msg).await {
                        warn!("monitor evaluation of backfilled message failed: {e}");
                    }
                }
                Ok(false) => report.duplicates += 1,
                Err(e) => {
                    report.rejected += 1;
                    warn!("history write for {chat_id} failed: {e}");
                }
            }
        }

        info!(
            "history sync for {chat_id}: {} fetched, {} new, {} duplicate, {} rejected",
            report.fetched, report.inserted, report.duplicates, report.rejected
        );
        Ok(report)
    }
}
