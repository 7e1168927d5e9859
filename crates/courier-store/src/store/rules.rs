//! Monitor rules, emission guard, and dedup policies.
//!
//! Rule CRUD is the surface for the external configuration layer; the
//! pipeline itself only reads rules and bumps rolling stats.

use super::{parse_ts, Store};
use courier_core::{
    message::{DedupPolicy, MonitorRule},
    CourierError,
};
use sqlx::FromRow;

#[derive(FromRow)]
struct RuleRow {
    rule_id: String,
    owner_id: String,
    group_id: Option<String>,
    group_name: Option<String>,
    keywords: String,
    is_active: bool,
    total_messages: i64,
    last_activity: Option<String>,
}

impl RuleRow {
    fn into_rule(self) -> MonitorRule {
        MonitorRule {
            rule_id: self.rule_id,
            owner_id: self.owner_id,
            group_id: self.group_id,
            group_name: self.group_name,
            keywords: serde_json::from_str(&self.keywords).unwrap_or_default(),
            is_active: self.is_active,
            total_messages: self.total_messages,
            last_activity: self.last_activity.as_deref().and_then(parse_ts),
        }
    }
}

impl Store {
    /// Create or update a rule, preserving its rolling stats.
    pub async fn upsert_rule(&self, rule: &MonitorRule) -> Result<(), CourierError> {
        let keywords = serde_json::to_string(&rule.keywords)?;
        sqlx::query(
            "INSERT INTO monitor_rules \
             (rule_id, owner_id, group_id, group_name, keywords, is_active) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(rule_id) DO UPDATE SET \
             owner_id = excluded.owner_id, group_id = excluded.group_id, \
             group_name = excluded.group_name, keywords = excluded.keywords, \
             is_active = excluded.is_active",
        )
        .bind(&rule.rule_id)
        .bind(&rule.owner_id)
        .bind(&rule.group_id)
        .bind(&rule.group_name)
        .bind(&keywords)
        .bind(rule.is_active)
        .execute(self.pool())
        .await
        .map_err(|e| CourierError::Store(format!("rule upsert failed: {e}")))?;
        Ok(())
    }

    pub async fn set_rule_active(&self, rule_id: &str, active: bool) -> Result<bool, CourierError> {
        let result = sqlx::query("UPDATE monitor_rules SET is_active = ? WHERE rule_id = ?")
            .bind(active)
            .bind(rule_id)
            .execute(self.pool())
            .await
            .map_err(|e| CourierError::Store(format!("rule update failed: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_rule(&self, rule_id: &str) -> Result<bool, CourierError> {
        let result = sqlx::query("DELETE FROM monitor_rules WHERE rule_id = ?")
            .bind(rule_id)
            .execute(self.pool())
            .await
            .map_err(|e| CourierError::Store(format!("rule delete failed: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    /// All rules the evaluator should consider.
    pub async fn active_rules(&self) -> Result<Vec<MonitorRule>, CourierError> {
        let rows: Vec<RuleRow> = sqlx::query_as(
            "SELECT rule_id, owner_id, group_id, group_name, keywords, is_active, \
             total_messages, last_activity \
             FROM monitor_rules WHERE is_active = 1",
        )
        .fetch_all(self.pool())
        .await
        .map_err(|e| CourierError::Store(format!("rule query failed: {e}")))?;
        Ok(rows.into_iter().map(RuleRow::into_rule).collect())
    }

    /// Record that a rule matched a message. Returns `true` only for the
    /// first recording of a given (rule, message) pair — the at-most-once
    /// guard for downstream emissions.
    pub async fn record_emission(
        &self,
        rule_id: &str,
        message_key: &str,
    ) -> Result<bool, CourierError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO monitor_emissions (rule_id, message_key) VALUES (?, ?)",
        )
        .bind(rule_id)
        .bind(message_key)
        .execute(self.pool())
        .await
        .map_err(|e| CourierError::Store(format!("emission record failed: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    /// Bump a rule's rolling stats. Callers treat failures as
    /// log-and-continue; this write never gates ingestion.
    pub async fn bump_rule_stats(&self, rule_id: &str) -> Result<(), CourierError> {
        sqlx::query(
            "UPDATE monitor_rules \
             SET total_messages = total_messages + 1, last_activity = datetime('now') \
             WHERE rule_id = ?",
        )
        .bind(rule_id)
        .execute(self.pool())
        .await
        .map_err(|e| CourierError::Store(format!("rule stats update failed: {e}")))?;
        Ok(())
    }

    /// The dedup policy for an account, falling back to defaults when the
    /// account has no override row.
    pub async fn dedup_policy(&self, account_id: &str) -> Result<DedupPolicy, CourierError> {
        let row: Option<(bool, i64)> = sqlx::query_as(
            "SELECT refresh_mode, duplicate_window_hours FROM account_policies \
             WHERE account_id = ?",
        )
        .bind(account_id)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| CourierError::Store(format!("policy query failed: {e}")))?;

        Ok(match row {
            Some((refresh_mode, duplicate_window_hours)) => DedupPolicy {
                refresh_mode,
                duplicate_window_hours,
            },
            None => DedupPolicy::default(),
        })
    }

    pub async fn set_dedup_policy(
        &self,
        account_id: &str,
        policy: &DedupPolicy,
    ) -> Result<(), CourierError> {
        sqlx::query(
            "INSERT INTO account_policies (account_id, refresh_mode, duplicate_window_hours) \
             VALUES (?, ?, ?) \
             ON CONFLICT(account_id) DO UPDATE SET \
             refresh_mode = excluded.refresh_mode, \
             duplicate_window_hours = excluded.duplicate_window_hours",
        )
        .bind(account_id)
        .bind(policy.refresh_mode)
        .bind(policy.duplicate_window_hours)
        .execute(self.pool())
        .await
        .map_err(|e| CourierError::Store(format!("policy upsert failed: {e}")))?;
        Ok(())
    }
}
