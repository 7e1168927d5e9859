//! Reconnection watchdog: bounded exponential backoff after a socket drop.

use crate::manager::{SessionManager, SessionSlot};
use crate::state::SessionState;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

impl SessionManager {
    /// Spawn the reconnect loop for a session that just entered
    /// Reconnecting. The task dies on its own when the session leaves
    /// Reconnecting for any other reason (stop, force-restart) — either
    /// through the slot token or the state check each round.
    pub(crate) fn spawn_watchdog(&self, session_id: &str, slot: Arc<SessionSlot>) {
        let connector = Arc::clone(&self.connector);
        let max_attempts = self.config.reconnect_max_attempts;
        let cap = Duration::from_secs(self.config.reconnect_max_delay_secs);
        let mut delay = Duration::from_millis(self.config.reconnect_base_delay_ms);
        let op_timeout = self.op_timeout;
        let session_id = session_id.to_string();

        tokio::spawn(async move {
            let token = slot.token().await;

            for attempt in 1..=max_attempts {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("reconnect watchdog for {session_id} cancelled");
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }

                {
                    let record = slot.record.lock().await;
                    if record.state != SessionState::Reconnecting {
                        debug!(
                            "session {session_id} left reconnecting ({}), watchdog exiting",
                            record.state
                        );
                        return;
                    }
                }

                let result = tokio::select! {
                    _ = token.cancelled() => {
                        debug!("reconnect watchdog for {session_id} cancelled mid-call");
                        return;
                    }
                    res = tokio::time::timeout(op_timeout, connector.open_socket(&session_id)) => {
                        res.unwrap_or_else(|_| {
                            Err(courier_core::CourierError::Connector(format!(
                                "open_socket timed out after {}s",
                                op_timeout.as_secs()
                            )))
                        })
                    }
                };

                match result {
                    Ok(()) => {
                        let mut record = slot.record.lock().await;
                        if record.state == SessionState::Reconnecting {
                            record.last_error = None;
                            record.transition(SessionState::Ready);
                            info!("session {session_id} reconnected on attempt {attempt}");
                        }
                        return;
                    }
                    Err(e) => {
                        warn!(
                            "reconnect attempt {attempt}/{max_attempts} for {session_id} failed: {e}"
                        );
                        delay = (delay * 2).min(cap);
                    }
                }
            }

            let mut record = slot.record.lock().await;
            if record.state == SessionState::Reconnecting {
                record.fail("reconnect_exhausted");
                warn!("session {session_id} failed: reconnect attempts exhausted");
            }
        });
    }
}
