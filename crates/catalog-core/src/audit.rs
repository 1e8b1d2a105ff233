//! Durable, transaction-scoped audit trail.
//!
//! Unlike a sidecar log file, every [`crate::model::AuditEvent`] is written
//! to the `audit_events` table inside the same database transaction as the
//! mutation it describes — a write that commits without its audit row never
//! happens, and an audit row never appears without its write.

use crate::errors::Result;
use crate::model::AuditEvent;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool, Transaction, Sqlite};

/// Sink for audit events. The default implementation writes within an
/// already-open transaction so callers control atomicity with their own
/// mutation; `AuditSink::record` is called from inside the Store's
/// transaction scope, never on a standalone connection.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, tx: &mut Transaction<'_, Sqlite>, event: &AuditEvent) -> Result<()>;

    async fn recent(&self, pool: &SqlitePool, limit: usize) -> Result<Vec<AuditEvent>>;
}

pub struct SqliteAuditSink;

#[async_trait]
impl AuditSink for SqliteAuditSink {
    async fn record(&self, tx: &mut Transaction<'_, Sqlite>, event: &AuditEvent) -> Result<()> {
        let metadata = serde_json::to_string(&event.metadata).map_err(|e| crate::errors::CoreError::internal(e.to_string()))?;
        sqlx::query(
            "INSERT INTO audit_events \
             (timestamp, actor, action, subject_type, subject_id, before, after, severity, metadata) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(event.timestamp.to_rfc3339())
        .bind(&event.actor)
        .bind(&event.action)
        .bind(&event.subject_type)
        .bind(&event.subject_id)
        .bind(event.before.as_ref().map(|v| v.to_string()))
        .bind(event.after.as_ref().map(|v| v.to_string()))
        .bind(serde_json::to_string(&event.severity).unwrap_or_default())
        .bind(metadata)
        .execute(&mut **tx)
        .await?;

        tracing::debug!(actor = %event.actor, action = %event.action, subject = %event.subject_id, "audit event recorded");
        Ok(())
    }

    async fn recent(&self, pool: &SqlitePool, limit: usize) -> Result<Vec<AuditEvent>> {
        let rows = sqlx::query(
            "SELECT timestamp, actor, action, subject_type, subject_id, before, after, severity, metadata \
             FROM audit_events ORDER BY id DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(pool)
        .await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let ts: String = row.try_get("timestamp")?;
            let before: Option<String> = row.try_get("before")?;
            let after: Option<String> = row.try_get("after")?;
            let severity: String = row.try_get("severity")?;
            let metadata: String = row.try_get("metadata")?;

            events.push(AuditEvent {
                timestamp: chrono::DateTime::parse_from_rfc3339(&ts)
                    .map_err(|e| crate::errors::CoreError::internal(e.to_string()))?
                    .with_timezone(&chrono::Utc),
                actor: row.try_get("actor")?,
                action: row.try_get("action")?,
                subject_type: row.try_get("subject_type")?,
                subject_id: row.try_get("subject_id")?,
                before: before.and_then(|s| serde_json::from_str(&s).ok()),
                after: after.and_then(|s| serde_json::from_str(&s).ok()),
                severity: serde_json::from_str(&severity).unwrap_or(crate::model::AuditSeverity::Info),
                metadata: serde_json::from_str(&metadata).unwrap_or_default(),
            });
        }
        events.reverse();
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AuditSeverity;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        sqlx::query(
            "CREATE TABLE audit_events (\
                id INTEGER PRIMARY KEY AUTOINCREMENT, \
                timestamp TEXT NOT NULL, \
                actor TEXT NOT NULL, \
                action TEXT NOT NULL, \
                subject_type TEXT NOT NULL, \
                subject_id TEXT NOT NULL, \
                before TEXT, \
                after TEXT, \
                severity TEXT NOT NULL, \
                metadata TEXT NOT NULL)",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool
    }

    #[tokio::test]
    async fn record_and_read_back_in_order() {
        let pool = setup_pool().await;
        let sink = SqliteAuditSink;

        let mut tx = pool.begin().await.unwrap();
        let event = AuditEvent::new("alice", "quarantine.approve", "skill", "alice/tool", AuditSeverity::Info);
        sink.record(&mut tx, &event).await.unwrap();
        tx.commit().await.unwrap();

        let recent = sink.recent(&pool, 10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].actor, "alice");
        assert_eq!(recent[0].action, "quarantine.approve");
    }

    #[tokio::test]
    async fn rolled_back_transaction_leaves_no_audit_row() {
        let pool = setup_pool().await;
        let sink = SqliteAuditSink;

        let mut tx = pool.begin().await.unwrap();
        let event = AuditEvent::new("bob", "install.authorize", "skill", "bob/tool", AuditSeverity::Warning);
        sink.record(&mut tx, &event).await.unwrap();
        tx.rollback().await.unwrap();

        let recent = sink.recent(&pool, 10).await.unwrap();
        assert!(recent.is_empty());
    }
}
