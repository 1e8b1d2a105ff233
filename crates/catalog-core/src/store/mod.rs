//! Store (C1): typed repositories over Skill, SkillVersion, Source,
//! ScanFinding, QuarantineRecord, CacheEntry, and AuditEvent, all mutating
//! through a single durable transaction scope.

pub mod sqlite;

use crate::errors::Result;
use crate::model::{QuarantineRecord, ScanFinding, Skill, SkillVersion, Source};
use async_trait::async_trait;
use sqlx::{Sqlite, Transaction};

/// Degraded-mode annotation returned alongside a successfully-opened store
/// when the auxiliary lexical/vector indexes could not be rebuilt. The
/// canonical tables remain fully authoritative; the degraded flag tells
/// callers (chiefly the Search Service) to fall back to a narrower mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreHealth {
    Healthy,
    DegradedLexicalOnly,
}

/// A unit of work: one or more repository calls that commit or abort
/// together. Callers obtain one via [`Store::begin`], perform mutations,
/// and call [`StoreTransaction::commit`] (or let it drop to roll back).
pub struct StoreTransaction<'a> {
    pub(crate) tx: Transaction<'a, Sqlite>,
}

impl<'a> StoreTransaction<'a> {
    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<StoreTransaction<'_>>;

    async fn health(&self) -> StoreHealth;

    async fn upsert_skill(&self, tx: &mut StoreTransaction<'_>, skill: &Skill) -> Result<()>;
    async fn get_skill(&self, id: &str) -> Result<Option<Skill>>;
    async fn list_skills_by_source(&self, source_id: &str) -> Result<Vec<Skill>>;

    /// Streams every catalog entry in a stable order, used to rebuild the
    /// lexical and vector indexes when the Search Service opens.
    async fn list_all_skills(&self) -> Result<Vec<Skill>>;

    async fn record_version(&self, tx: &mut StoreTransaction<'_>, version: &SkillVersion) -> Result<()>;
    async fn has_version(&self, skill_id: &str, content_hash: &str) -> Result<bool>;
    async fn prune_versions(&self, tx: &mut StoreTransaction<'_>, skill_id: &str, retain: usize) -> Result<()>;

    async fn upsert_source(&self, tx: &mut StoreTransaction<'_>, source: &Source) -> Result<()>;
    async fn get_source(&self, id: &str) -> Result<Option<Source>>;
    async fn list_sources(&self) -> Result<Vec<Source>>;

    async fn record_findings(&self, tx: &mut StoreTransaction<'_>, findings: &[ScanFinding]) -> Result<()>;

    async fn upsert_quarantine(&self, tx: &mut StoreTransaction<'_>, record: &QuarantineRecord) -> Result<()>;
    async fn get_quarantine(&self, skill_id: &str) -> Result<Option<QuarantineRecord>>;
    async fn list_non_terminal_quarantine(&self) -> Result<Vec<QuarantineRecord>>;

    /// Bump a cache keyspace's generation counter atomically with the
    /// calling mutation, invalidating every entry written under the
    /// previous generation.
    async fn bump_cache_generation(&self, tx: &mut StoreTransaction<'_>, keyspace: &str) -> Result<i64>;
    async fn cache_generation(&self, keyspace: &str) -> Result<i64>;
    async fn cache_get(&self, keyspace: &str, key: &str) -> Result<Option<(Vec<u8>, i64, chrono::DateTime<chrono::Utc>)>>;
    async fn cache_put(&self, keyspace: &str, key: &str, value: &[u8], generation: i64, expires_at: chrono::DateTime<chrono::Utc>) -> Result<()>;
}
