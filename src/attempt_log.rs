//! Append-only record of every scoring decision, for post-hoc audit of why
//! a candidate was or wasn't sent. Degrades to log-only when no database is
//! configured — the agent never blocks a decision on log persistence.

use serde::Serialize;
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStatus {
    Sent,
    DryRun,
    PolicySkip,
    GapSkip,
    Throttled,
    Error,
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AttemptStatus::Sent => "sent",
            AttemptStatus::DryRun => "dry_run",
            AttemptStatus::PolicySkip => "policy_skip",
            AttemptStatus::GapSkip => "gap_skip",
            AttemptStatus::Throttled => "throttled",
            AttemptStatus::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub chain_id: u64,
    pub borrower: String,
    pub status: AttemptStatus,
    pub reason: String,
    pub tx_hash: Option<String>,
    pub snapshot: Value,
}

#[derive(Clone)]
pub enum AttemptLog {
    Postgres(PgPool),
    LogOnly,
}

impl AttemptLog {
    pub async fn connect(database_url: Option<&str>) -> Self {
        let Some(url) = database_url else {
            tracing::warn!("no DATABASE_URL configured, attempt log is log-only");
            return AttemptLog::LogOnly;
        };
        match PgPoolOptions::new().max_connections(5).connect(url).await {
            Ok(pool) => {
                if let Err(err) = Self::ensure_schema(&pool).await {
                    tracing::error!(error = %err, "failed to provision attempt_log schema, falling back to log-only");
                    return AttemptLog::LogOnly;
                }
                AttemptLog::Postgres(pool)
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to connect attempt log database, falling back to log-only");
                AttemptLog::LogOnly
            }
        }
    }

    async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS attempt_log (
                id BIGSERIAL PRIMARY KEY,
                chain_id BIGINT NOT NULL,
                borrower TEXT NOT NULL,
                status TEXT NOT NULL,
                reason TEXT NOT NULL,
                tx_hash TEXT,
                snapshot JSONB NOT NULL,
                observed_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
        )
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn record(&self, attempt: &AttemptRecord) {
        match self {
            AttemptLog::LogOnly => {
                tracing::info!(
                    chain_id = attempt.chain_id,
                    borrower = %attempt.borrower,
                    status = %attempt.status,
                    reason = %attempt.reason,
                    tx_hash = ?attempt.tx_hash,
                    "attempt"
                );
            }
            AttemptLog::Postgres(pool) => {
                let result = sqlx::query(
                    "INSERT INTO attempt_log (chain_id, borrower, status, reason, tx_hash, snapshot)
                     VALUES ($1, $2, $3, $4, $5, $6)",
                )
                .bind(attempt.chain_id as i64)
                .bind(&attempt.borrower)
                .bind(attempt.status.to_string())
                .bind(&attempt.reason)
                .bind(&attempt.tx_hash)
                .bind(&attempt.snapshot)
                .execute(pool)
                .await;

                if let Err(err) = result {
                    tracing::error!(error = %err, "failed to persist attempt log row");
                }
            }
        }
    }

    /// Count of non-dry-run, non-error rows for a borrower within the last `hours`,
    /// used to cross-check the in-memory throttle store against durable state.
    pub async fn recent_send_count(&self, chain_id: u64, borrower: &str, hours: i64) -> Option<i64> {
        let AttemptLog::Postgres(pool) = self else {
            return None;
        };
        let row: Result<PgRow, _> = sqlx::query(
            "SELECT COUNT(*) AS c FROM attempt_log
             WHERE chain_id = $1 AND borrower = $2 AND status = 'sent'
               AND observed_at > now() - ($3 || ' hours')::interval",
        )
        .bind(chain_id as i64)
        .bind(borrower)
        .bind(hours.to_string())
        .fetch_one(pool)
        .await;

        match row {
            Ok(row) => row.try_get::<i64, _>("c").ok(),
            Err(err) => {
                tracing::warn!(error = %err, "attempt log count query failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display_uses_stable_identifiers() {
        assert_eq!(AttemptStatus::Sent.to_string(), "sent");
        assert_eq!(AttemptStatus::DryRun.to_string(), "dry_run");
        assert_eq!(AttemptStatus::PolicySkip.to_string(), "policy_skip");
        assert_eq!(AttemptStatus::GapSkip.to_string(), "gap_skip");
        assert_eq!(AttemptStatus::Throttled.to_string(), "throttled");
        assert_eq!(AttemptStatus::Error.to_string(), "error");
    }

    #[tokio::test]
    async fn log_only_mode_never_panics_on_record() {
        let log = AttemptLog::LogOnly;
        log.record(&AttemptRecord {
            chain_id: 1,
            borrower: "0xabc".into(),
            status: AttemptStatus::PolicySkip,
            reason: "hf-above-max".into(),
            tx_hash: None,
            snapshot: serde_json::json!({"borrower": "0xabc"}),
        })
        .await;
        assert!(log.recent_send_count(1, "0xabc", 1).await.is_none());
    }
}
