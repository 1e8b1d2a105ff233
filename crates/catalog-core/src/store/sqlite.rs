//! `sqlx`-backed SQLite implementation of [`Store`], the runtime's own
//! storage backend choice. A future Postgres implementation is a drop-in
//! behind the same trait, the pluggable-backend shape the corpus already
//! uses for its job storage and vector store traits.

use super::{Store, StoreHealth, StoreTransaction};
use crate::errors::{CoreError, Result};
use crate::model::{
    Category, QuarantineRecord, QuarantineStatus, ScanFinding, Skill, Source, SourceKind, SkillVersion, TrustTier,
};
use async_trait::async_trait;
use sqlx::{sqlite::SqlitePoolOptions, Row, SqlitePool};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

pub struct SqliteStore {
    pool: SqlitePool,
    degraded: AtomicBool,
}

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS skills (
    id TEXT PRIMARY KEY,
    author TEXT NOT NULL,
    name TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    description TEXT NOT NULL,
    tags TEXT NOT NULL,
    category TEXT NOT NULL,
    trust_tier TEXT NOT NULL,
    quality_score REAL NOT NULL,
    risk_score REAL NOT NULL,
    security_passed INTEGER NOT NULL,
    source_id TEXT NOT NULL,
    raw_body BLOB NOT NULL,
    parsed_metadata TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    last_scan_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_skills_author ON skills(author);
CREATE INDEX IF NOT EXISTS idx_skills_trust_tier ON skills(trust_tier);
CREATE INDEX IF NOT EXISTS idx_skills_quality_score ON skills(quality_score);
CREATE INDEX IF NOT EXISTS idx_skills_risk_score ON skills(risk_score);
CREATE INDEX IF NOT EXISTS idx_skills_visibility ON skills(security_passed, trust_tier);

CREATE TABLE IF NOT EXISTS skill_versions (
    skill_id TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    semver TEXT,
    recorded_at TEXT NOT NULL,
    metadata TEXT,
    PRIMARY KEY (skill_id, content_hash)
);

CREATE TABLE IF NOT EXISTS sources (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    identifier TEXT NOT NULL,
    verified INTEGER NOT NULL,
    default_trust TEXT NOT NULL,
    last_sync_cursor TEXT,
    last_sync_at TEXT,
    consecutive_failures INTEGER NOT NULL,
    degraded INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS scan_findings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    skill_id TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    category TEXT NOT NULL,
    severity TEXT NOT NULL,
    confidence REAL NOT NULL,
    locator TEXT NOT NULL,
    snippet_hash TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_findings_skill ON scan_findings(skill_id, content_hash);

CREATE TABLE IF NOT EXISTS quarantine_records (
    skill_id TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    status TEXT NOT NULL,
    approvals TEXT NOT NULL,
    required_approvals INTEGER NOT NULL,
    assigned_reviewer TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (skill_id, content_hash)
);

CREATE TABLE IF NOT EXISTS audit_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    actor TEXT NOT NULL,
    action TEXT NOT NULL,
    subject_type TEXT NOT NULL,
    subject_id TEXT NOT NULL,
    before TEXT,
    after TEXT,
    severity TEXT NOT NULL,
    metadata TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS cache_generations (
    keyspace TEXT PRIMARY KEY,
    generation INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS cache_entries (
    keyspace TEXT NOT NULL,
    key TEXT NOT NULL,
    value BLOB NOT NULL,
    generation INTEGER NOT NULL,
    expires_at TEXT NOT NULL,
    PRIMARY KEY (keyspace, key)
);
"#;

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await?;

        sqlx::query(DDL).execute(&pool).await?;

        Ok(Self { pool, degraded: AtomicBool::new(false) })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Marks the store degraded-lexical-only. Called by the Search Service
    /// bootstrap when the in-process vector index fails to rebuild from
    /// the canonical tables; the core still boots successfully.
    pub fn mark_degraded(&self) {
        self.degraded.store(true, Ordering::Relaxed);
        tracing::error!("vector index rebuild failed on open; continuing in degraded lexical-only mode");
    }

    fn row_to_skill(row: &sqlx::sqlite::SqliteRow) -> Result<Skill> {
        let tags_json: String = row.try_get("tags")?;
        let parsed_metadata_json: String = row.try_get("parsed_metadata")?;
        let category: String = row.try_get("category")?;
        let trust_tier: String = row.try_get("trust_tier")?;
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;
        let last_scan_at: Option<String> = row.try_get("last_scan_at")?;

        Ok(Skill {
            author: row.try_get("author")?,
            name: row.try_get("name")?,
            content_hash: row.try_get("content_hash")?,
            description: row.try_get("description")?,
            tags: serde_json::from_str(&tags_json).unwrap_or_default(),
            category: Category::from_str(&category).unwrap_or(Category::Other),
            trust_tier: parse_trust_tier(&trust_tier),
            quality_score: row.try_get("quality_score")?,
            risk_score: row.try_get("risk_score")?,
            security_passed: row.try_get::<i64, _>("security_passed")? != 0,
            source_id: row.try_get("source_id")?,
            raw_body: row.try_get("raw_body")?,
            parsed_metadata: serde_json::from_str(&parsed_metadata_json).unwrap_or_default(),
            created_at: parse_ts(&created_at)?,
            updated_at: parse_ts(&updated_at)?,
            last_scan_at: last_scan_at.map(|s| parse_ts(&s)).transpose()?,
        })
    }
}

fn parse_ts(s: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| CoreError::internal(e.to_string()))
}

fn parse_trust_tier(s: &str) -> TrustTier {
    match s {
        "verified" => TrustTier::Verified,
        "curated" => TrustTier::Curated,
        "community" => TrustTier::Community,
        "experimental" => TrustTier::Experimental,
        "local" => TrustTier::Local,
        _ => TrustTier::Unknown,
    }
}

fn parse_source_kind(s: &str) -> SourceKind {
    match s {
        "registry" => SourceKind::Registry,
        "git-host-org" => SourceKind::GitHostOrg,
        "git-host-repo" => SourceKind::GitHostRepo,
        "local-fs" => SourceKind::LocalFs,
        _ => SourceKind::WebhookIngest,
    }
}

fn parse_quarantine_status(s: &str) -> QuarantineStatus {
    match s {
        "pending" => QuarantineStatus::Pending,
        "under-review" => QuarantineStatus::UnderReview,
        "approved" => QuarantineStatus::Approved,
        "rejected" => QuarantineStatus::Rejected,
        _ => QuarantineStatus::Expired,
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn begin(&self) -> Result<StoreTransaction<'_>> {
        Ok(StoreTransaction { tx: self.pool.begin().await? })
    }

    async fn health(&self) -> StoreHealth {
        if self.degraded.load(Ordering::Relaxed) {
            StoreHealth::DegradedLexicalOnly
        } else {
            StoreHealth::Healthy
        }
    }

    async fn upsert_skill(&self, tx: &mut StoreTransaction<'_>, skill: &Skill) -> Result<()> {
        sqlx::query(
            "INSERT INTO skills (id, author, name, content_hash, description, tags, category, trust_tier, \
             quality_score, risk_score, security_passed, source_id, raw_body, parsed_metadata, created_at, updated_at, last_scan_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET content_hash=excluded.content_hash, description=excluded.description, \
             tags=excluded.tags, category=excluded.category, trust_tier=excluded.trust_tier, \
             quality_score=excluded.quality_score, risk_score=excluded.risk_score, \
             security_passed=excluded.security_passed, raw_body=excluded.raw_body, \
             parsed_metadata=excluded.parsed_metadata, updated_at=excluded.updated_at, last_scan_at=excluded.last_scan_at",
        )
        .bind(skill.id())
        .bind(&skill.author)
        .bind(&skill.name)
        .bind(&skill.content_hash)
        .bind(&skill.description)
        .bind(serde_json::to_string(&skill.tags).unwrap_or_default())
        .bind(skill.category.to_string())
        .bind(skill.trust_tier.to_string())
        .bind(skill.quality_score)
        .bind(skill.risk_score)
        .bind(skill.security_passed as i64)
        .bind(&skill.source_id)
        .bind(&skill.raw_body)
        .bind(serde_json::to_string(&skill.parsed_metadata).unwrap_or_default())
        .bind(skill.created_at.to_rfc3339())
        .bind(skill.updated_at.to_rfc3339())
        .bind(skill.last_scan_at.map(|t| t.to_rfc3339()))
        .execute(&mut *tx.tx)
        .await?;
        Ok(())
    }

    async fn get_skill(&self, id: &str) -> Result<Option<Skill>> {
        let row = sqlx::query("SELECT * FROM skills WHERE id = ?").bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::row_to_skill).transpose()
    }

    async fn list_skills_by_source(&self, source_id: &str) -> Result<Vec<Skill>> {
        let rows = sqlx::query("SELECT * FROM skills WHERE source_id = ? ORDER BY name").bind(source_id).fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_skill).collect()
    }

    async fn list_all_skills(&self) -> Result<Vec<Skill>> {
        let rows = sqlx::query("SELECT * FROM skills ORDER BY id").fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_skill).collect()
    }

    async fn record_version(&self, tx: &mut StoreTransaction<'_>, version: &SkillVersion) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO skill_versions (skill_id, content_hash, semver, recorded_at, metadata) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&version.skill_id)
        .bind(&version.content_hash)
        .bind(&version.semver)
        .bind(version.recorded_at.to_rfc3339())
        .bind(version.metadata.as_ref().map(|m| serde_json::to_string(m).unwrap_or_default()))
        .execute(&mut *tx.tx)
        .await?;
        Ok(())
    }

    async fn has_version(&self, skill_id: &str, content_hash: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM skill_versions WHERE skill_id = ? AND content_hash = ?")
            .bind(skill_id)
            .bind(content_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn prune_versions(&self, tx: &mut StoreTransaction<'_>, skill_id: &str, retain: usize) -> Result<()> {
        sqlx::query(
            "DELETE FROM skill_versions WHERE skill_id = ? AND content_hash NOT IN \
             (SELECT content_hash FROM skill_versions WHERE skill_id = ? ORDER BY recorded_at DESC LIMIT ?)",
        )
        .bind(skill_id)
        .bind(skill_id)
        .bind(retain as i64)
        .execute(&mut *tx.tx)
        .await?;
        Ok(())
    }

    async fn upsert_source(&self, tx: &mut StoreTransaction<'_>, source: &Source) -> Result<()> {
        sqlx::query(
            "INSERT INTO sources (id, kind, identifier, verified, default_trust, last_sync_cursor, last_sync_at, consecutive_failures, degraded) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET verified=excluded.verified, last_sync_cursor=excluded.last_sync_cursor, \
             last_sync_at=excluded.last_sync_at, consecutive_failures=excluded.consecutive_failures, degraded=excluded.degraded",
        )
        .bind(&source.id)
        .bind(format!("{:?}", source.kind).to_lowercase())
        .bind(&source.identifier)
        .bind(source.verified as i64)
        .bind(source.default_trust.to_string())
        .bind(&source.last_sync_cursor)
        .bind(source.last_sync_at.map(|t| t.to_rfc3339()))
        .bind(source.consecutive_failures as i64)
        .bind(source.degraded as i64)
        .execute(&mut *tx.tx)
        .await?;
        Ok(())
    }

    async fn get_source(&self, id: &str) -> Result<Option<Source>> {
        let row = sqlx::query("SELECT * FROM sources WHERE id = ?").bind(id).fetch_optional(&self.pool).await?;
        let Some(row) = row else { return Ok(None) };
        Ok(Some(row_to_source(&row)?))
    }

    async fn list_sources(&self) -> Result<Vec<Source>> {
        let rows = sqlx::query("SELECT * FROM sources ORDER BY id").fetch_all(&self.pool).await?;
        rows.iter().map(row_to_source).collect()
    }

    async fn record_findings(&self, tx: &mut StoreTransaction<'_>, findings: &[ScanFinding]) -> Result<()> {
        for finding in findings {
            sqlx::query(
                "INSERT INTO scan_findings (skill_id, content_hash, category, severity, confidence, locator, snippet_hash) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&finding.skill_id)
            .bind(&finding.content_hash)
            .bind(serde_json::to_string(&finding.category).unwrap_or_default())
            .bind(serde_json::to_string(&finding.severity).unwrap_or_default())
            .bind(finding.confidence)
            .bind(&finding.locator)
            .bind(&finding.snippet_hash)
            .execute(&mut *tx.tx)
            .await?;
        }
        Ok(())
    }

    async fn upsert_quarantine(&self, tx: &mut StoreTransaction<'_>, record: &QuarantineRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO quarantine_records (skill_id, content_hash, status, approvals, required_approvals, assigned_reviewer, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(skill_id, content_hash) DO UPDATE SET status=excluded.status, approvals=excluded.approvals, \
             assigned_reviewer=excluded.assigned_reviewer, updated_at=excluded.updated_at",
        )
        .bind(&record.skill_id)
        .bind(&record.content_hash)
        .bind(serde_json::to_string(&record.status).unwrap_or_default())
        .bind(serde_json::to_string(&record.approvals).unwrap_or_default())
        .bind(record.required_approvals as i64)
        .bind(&record.assigned_reviewer)
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .execute(&mut *tx.tx)
        .await?;
        Ok(())
    }

    async fn get_quarantine(&self, skill_id: &str) -> Result<Option<QuarantineRecord>> {
        let row = sqlx::query("SELECT * FROM quarantine_records WHERE skill_id = ? ORDER BY created_at DESC LIMIT 1")
            .bind(skill_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_quarantine).transpose()
    }

    async fn list_non_terminal_quarantine(&self) -> Result<Vec<QuarantineRecord>> {
        let rows = sqlx::query("SELECT * FROM quarantine_records WHERE status IN ('pending', 'under-review')")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_quarantine).collect()
    }

    async fn bump_cache_generation(&self, tx: &mut StoreTransaction<'_>, keyspace: &str) -> Result<i64> {
        sqlx::query(
            "INSERT INTO cache_generations (keyspace, generation) VALUES (?, 1) \
             ON CONFLICT(keyspace) DO UPDATE SET generation = generation + 1",
        )
        .bind(keyspace)
        .execute(&mut *tx.tx)
        .await?;

        let row = sqlx::query("SELECT generation FROM cache_generations WHERE keyspace = ?")
            .bind(keyspace)
            .fetch_one(&mut *tx.tx)
            .await?;
        Ok(row.try_get("generation")?)
    }

    async fn cache_generation(&self, keyspace: &str) -> Result<i64> {
        let row = sqlx::query("SELECT generation FROM cache_generations WHERE keyspace = ?")
            .bind(keyspace)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.try_get("generation")).transpose()?.unwrap_or(0))
    }

    async fn cache_get(&self, keyspace: &str, key: &str) -> Result<Option<(Vec<u8>, i64, chrono::DateTime<chrono::Utc>)>> {
        let row = sqlx::query("SELECT value, generation, expires_at FROM cache_entries WHERE keyspace = ? AND key = ?")
            .bind(keyspace)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else { return Ok(None) };
        let value: Vec<u8> = row.try_get("value")?;
        let generation: i64 = row.try_get("generation")?;
        let expires_at: String = row.try_get("expires_at")?;
        Ok(Some((value, generation, parse_ts(&expires_at)?)))
    }

    async fn cache_put(&self, keyspace: &str, key: &str, value: &[u8], generation: i64, expires_at: chrono::DateTime<chrono::Utc>) -> Result<()> {
        sqlx::query(
            "INSERT INTO cache_entries (keyspace, key, value, generation, expires_at) VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(keyspace, key) DO UPDATE SET value=excluded.value, generation=excluded.generation, expires_at=excluded.expires_at",
        )
        .bind(keyspace)
        .bind(key)
        .bind(value)
        .bind(generation)
        .bind(expires_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_source(row: &sqlx::sqlite::SqliteRow) -> Result<Source> {
    let kind: String = row.try_get("kind")?;
    let default_trust: String = row.try_get("default_trust")?;
    let last_sync_at: Option<String> = row.try_get("last_sync_at")?;
    Ok(Source {
        id: row.try_get("id")?,
        kind: parse_source_kind(&kind),
        identifier: row.try_get("identifier")?,
        verified: row.try_get::<i64, _>("verified")? != 0,
        default_trust: parse_trust_tier(&default_trust),
        last_sync_cursor: row.try_get("last_sync_cursor")?,
        last_sync_at: last_sync_at.map(|s| parse_ts(&s)).transpose()?,
        consecutive_failures: row.try_get::<i64, _>("consecutive_failures")? as u32,
        degraded: row.try_get::<i64, _>("degraded")? != 0,
    })
}

fn row_to_quarantine(row: &sqlx::sqlite::SqliteRow) -> Result<QuarantineRecord> {
    let status: String = row.try_get("status")?;
    let approvals_json: String = row.try_get("approvals")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    Ok(QuarantineRecord {
        skill_id: row.try_get("skill_id")?,
        content_hash: row.try_get("content_hash")?,
        status: parse_quarantine_status(&status),
        approvals: serde_json::from_str(&approvals_json).unwrap_or_default(),
        required_approvals: row.try_get::<i64, _>("required_approvals")? as u32,
        assigned_reviewer: row.try_get("assigned_reviewer")?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    async fn store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:").await.unwrap()
    }

    fn sample_skill() -> Skill {
        let now = chrono::Utc::now();
        Skill {
            author: "alice".into(),
            name: "commit-formatter".into(),
            content_hash: "abc123".into(),
            description: "formats commits".into(),
            tags: vec!["git".into()],
            category: Category::Automation,
            trust_tier: TrustTier::Community,
            quality_score: 70.0,
            risk_score: 0.0,
            security_passed: true,
            source_id: "src-1".into(),
            raw_body: b"body".to_vec(),
            parsed_metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
            last_scan_at: Some(now),
        }
    }

    #[tokio::test]
    async fn upsert_and_fetch_skill_round_trips() {
        let store = store().await;
        let skill = sample_skill();
        let mut tx = store.begin().await.unwrap();
        store.upsert_skill(&mut tx, &skill).await.unwrap();
        tx.commit().await.unwrap();

        let fetched = store.get_skill("alice/commit-formatter").await.unwrap().unwrap();
        assert_eq!(fetched.content_hash, "abc123");
        assert_eq!(fetched.category, Category::Automation);
        assert!(fetched.security_passed);
    }

    #[tokio::test]
    async fn rolled_back_skill_insert_is_not_visible() {
        let store = store().await;
        let skill = sample_skill();
        let mut tx = store.begin().await.unwrap();
        store.upsert_skill(&mut tx, &skill).await.unwrap();
        tx.rollback().await.unwrap();

        assert!(store.get_skill("alice/commit-formatter").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cache_generation_bump_is_monotonic() {
        let store = store().await;
        let mut tx = store.begin().await.unwrap();
        let g1 = store.bump_cache_generation(&mut tx, "search").await.unwrap();
        let g2 = store.bump_cache_generation(&mut tx, "search").await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(g2, g1 + 1);
    }

    #[tokio::test]
    async fn quarantine_round_trip_and_listing() {
        let store = store().await;
        let record = QuarantineRecord::new("alice/tool", "hash1", 1);
        let mut tx = store.begin().await.unwrap();
        store.upsert_quarantine(&mut tx, &record).await.unwrap();
        tx.commit().await.unwrap();

        let fetched = store.get_quarantine("alice/tool").await.unwrap().unwrap();
        assert_eq!(fetched.status, QuarantineStatus::Pending);

        let pending = store.list_non_terminal_quarantine().await.unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn version_retention_prunes_oldest() {
        let store = store().await;
        for i in 0..5 {
            let version = SkillVersion {
                skill_id: "alice/tool".into(),
                content_hash: format!("hash-{i}"),
                semver: None,
                recorded_at: chrono::Utc::now() + chrono::Duration::seconds(i),
                metadata: None,
            };
            let mut tx = store.begin().await.unwrap();
            store.record_version(&mut tx, &version).await.unwrap();
            tx.commit().await.unwrap();
        }

        let mut tx = store.begin().await.unwrap();
        store.prune_versions(&mut tx, "alice/tool", 2).await.unwrap();
        tx.commit().await.unwrap();

        assert!(store.has_version("alice/tool", "hash-4").await.unwrap());
        assert!(store.has_version("alice/tool", "hash-3").await.unwrap());
        assert!(!store.has_version("alice/tool", "hash-0").await.unwrap());
    }
}
