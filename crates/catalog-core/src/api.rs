//! CatalogEngine: the single facade external callers drive. Composes the
//! Store, Cache, Search Service, Recommender, and the stateless Parser /
//! Scanner / Quality / Trust / Quarantine / Indexer functions behind the
//! eight operations the catalog exposes.

use crate::audit::{AuditSink, SqliteAuditSink};
use crate::cache::{Cache, Keyspace};
use crate::config::{CoreConfig, QuarantineConfig, ScannerConfig};
use crate::embeddings::EmbeddingProvider;
use crate::errors::{CoreError, Result};
use crate::indexer::{self, SyncSummary};
use crate::install::{self, InstallManifest};
use crate::model::{AuditEvent, Caller, CodebaseContext, QuarantineStatus, ScanReport, Skill, Source, SourceKind};
use crate::parser;
use crate::quarantine;
use crate::recommend::{RecommendResponse, Recommender};
use crate::scanner;
use crate::search::{RankingHint, SearchFilter, SearchResponse, SearchService};
use crate::source_fetch;
use crate::store::Store;
use crate::vector_store::VectorStore;
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;

/// The three review actions a privileged caller can take on a pending
/// quarantine record.
pub enum QuarantineDecision {
    AssignReviewer(String),
    Approve,
    Reject(String),
}

pub struct CatalogEngine {
    store: Arc<dyn Store>,
    search: Arc<SearchService>,
    recommender: Recommender,
    scanner_config: ScannerConfig,
    quarantine_config: QuarantineConfig,
    git_cache_root: std::path::PathBuf,
}

impl CatalogEngine {
    pub fn new(
        config: &CoreConfig,
        store: Arc<dyn Store>,
        vector_store: Arc<dyn VectorStore>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        git_cache_root: impl Into<std::path::PathBuf>,
    ) -> Result<Self> {
        let cache = Arc::new(Cache::new(store.clone(), config.cache));
        let search = Arc::new(SearchService::new(store.clone(), cache, vector_store, embedder, config.fusion)?);
        let recommender = Recommender::new(store.clone(), search.clone());

        Ok(Self {
            store,
            search,
            recommender,
            scanner_config: config.scanner.clone(),
            quarantine_config: config.quarantine.clone(),
            git_cache_root: git_cache_root.into(),
        })
    }

    /// Rebuild the lexical/semantic indexes from everything currently in
    /// the Store. Callers run this once at startup, before serving traffic.
    pub async fn warm_up(&self) -> Result<()> {
        self.search.rebuild().await
    }

    pub async fn search(&self, query: &str, filter: &SearchFilter, k: usize, hint: RankingHint, caller: &Caller) -> Result<SearchResponse> {
        self.search.search(query, filter, k, hint, caller).await
    }

    pub async fn recommend(&self, context: &CodebaseContext, installed_ids: &[String], limit: usize) -> Result<RecommendResponse> {
        self.recommender.recommend(context, installed_ids, limit).await
    }

    pub async fn get_skill(&self, id: &str, caller: &Caller) -> Result<Skill> {
        let skill = self.store.get_skill(id).await?.ok_or_else(|| CoreError::NotFound(id.to_string()))?;
        if !caller.is_privileged() && !skill.is_publicly_visible() {
            return Err(CoreError::NotFound(id.to_string()));
        }
        Ok(skill)
    }

    /// Parse and scan a bundle without persisting it, so a caller can
    /// preview whether a draft would pass, be reviewed, or be blocked.
    pub fn validate_bundle(&self, raw: &[u8]) -> Result<ScanReport> {
        let parsed = parser::parse(raw)?;
        Ok(scanner::scan(&parsed, &self.scanner_config))
    }

    pub async fn authorize_install(&self, id: &str, caller: &Caller) -> Result<InstallManifest> {
        install::authorize_install(self.store.as_ref(), &self.scanner_config, id, caller).await
    }

    /// Ingest every bundle under `root` as a `local-fs` source, then
    /// rebuild the search indexes so new skills become findable.
    pub async fn index_local(&self, root: impl AsRef<Path>, caller: &Caller) -> Result<SyncSummary> {
        if !caller.is_privileged() {
            return Err(CoreError::PolicyDenied("only privileged callers may index local sources".into()));
        }

        let root = root.as_ref();
        let source_id = format!("local-fs:{}", root.display());
        let mut source = self
            .store
            .get_source(&source_id)
            .await?
            .unwrap_or_else(|| Source {
                id: source_id.clone(),
                kind: SourceKind::LocalFs,
                identifier: root.to_string_lossy().into_owned(),
                verified: false,
                default_trust: crate::model::TrustTier::Local,
                last_sync_cursor: None,
                last_sync_at: None,
                consecutive_failures: 0,
                degraded: false,
            });

        let fetcher = source_fetch::fetcher_for(source.kind, &self.git_cache_root)
            .ok_or_else(|| CoreError::internal("local-fs source has no fetcher"))?;

        let summary = indexer::sync_source(self.store.as_ref(), fetcher.as_ref(), &self.scanner_config, &self.quarantine_config, &mut source).await?;

        let mut tx = self.store.begin().await?;
        self.store.upsert_source(&mut tx, &source).await?;
        tx.commit().await?;

        self.search.rebuild().await?;
        Ok(summary)
    }

    pub async fn sync_source(&self, source_id: &str, caller: &Caller) -> Result<SyncSummary> {
        if !caller.is_privileged() {
            return Err(CoreError::PolicyDenied("only privileged callers may trigger a source sync".into()));
        }

        let mut source = self.store.get_source(source_id).await?.ok_or_else(|| CoreError::NotFound(source_id.to_string()))?;
        let fetcher = source_fetch::fetcher_for(source.kind, &self.git_cache_root)
            .ok_or_else(|| CoreError::PolicyDenied(format!("source kind {:?} has no pull-side fetcher", source.kind)))?;

        let summary = indexer::sync_source(self.store.as_ref(), fetcher.as_ref(), &self.scanner_config, &self.quarantine_config, &mut source).await?;

        let mut tx = self.store.begin().await?;
        self.store.upsert_source(&mut tx, &source).await?;
        tx.commit().await?;

        self.search.rebuild().await?;
        Ok(summary)
    }

    /// Apply a reviewer decision to a pending quarantine record. Approval
    /// flips the underlying skill's `security_passed` flag so it becomes
    /// visible to non-privileged callers again, all in one transaction
    /// with the audit event and cache invalidation.
    pub async fn review_quarantine(&self, skill_id: &str, caller: &Caller, decision: QuarantineDecision) -> Result<AuditEvent> {
        let mut record = self.store.get_quarantine(skill_id).await?.ok_or_else(|| CoreError::NotFound(skill_id.to_string()))?;

        let event = match decision {
            QuarantineDecision::AssignReviewer(reviewer) => quarantine::assign_reviewer(&mut record, caller, reviewer)?,
            QuarantineDecision::Approve => quarantine::approve(&mut record, caller)?,
            QuarantineDecision::Reject(reason) => quarantine::reject(&mut record, caller, reason)?,
        };

        let mut tx = self.store.begin().await?;
        self.store.upsert_quarantine(&mut tx, &record).await?;

        if record.status == QuarantineStatus::Approved {
            if let Some(mut skill) = self.store.get_skill(skill_id).await? {
                skill.security_passed = true;
                skill.updated_at = Utc::now();
                self.store.upsert_skill(&mut tx, &skill).await?;
            }
        }

        SqliteAuditSink.record(&mut tx.tx, &event).await?;
        for keyspace in [Keyspace::Search, Keyspace::Recommend, Keyspace::SkillDetail, Keyspace::Compare] {
            self.store.bump_cache_generation(&mut tx, keyspace.as_str()).await?;
        }
        tx.commit().await?;

        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Caller, CallerRole, Category, QuarantineRecord, TrustTier};
    use crate::store::sqlite::SqliteStore;
    use crate::vector_store::InMemoryVectorStore;
    use std::collections::HashMap;

    fn reviewer() -> Caller {
        Caller { id: "reviewer-1".into(), role: CallerRole::Reviewer }
    }

    fn blocked_skill() -> Skill {
        let now = Utc::now();
        Skill {
            author: "mallory".into(),
            name: "bad-tool".into(),
            content_hash: "hash-1".into(),
            description: "does something shady".into(),
            tags: vec![],
            category: Category::Automation,
            trust_tier: TrustTier::Unknown,
            quality_score: 10.0,
            risk_score: 90.0,
            security_passed: false,
            source_id: "src-1".into(),
            raw_body: b"---\nname: bad-tool\ndescription: does something shady\n---\nbody".to_vec(),
            parsed_metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
            last_scan_at: Some(now),
        }
    }

    async fn engine_with(skill: Skill) -> (CatalogEngine, Arc<dyn Store>) {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::connect("sqlite::memory:").await.unwrap());
        let mut tx = store.begin().await.unwrap();
        store.upsert_skill(&mut tx, &skill).await.unwrap();
        tx.commit().await.unwrap();

        let config = CoreConfig::default();
        let vector_store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let engine = CatalogEngine::new(&config, store.clone(), vector_store, None, std::env::temp_dir()).unwrap();
        engine.warm_up().await.unwrap();
        (engine, store)
    }

    #[tokio::test]
    async fn get_skill_hides_security_failed_skill_from_public_caller() {
        let (engine, _store) = engine_with(blocked_skill()).await;
        let err = engine.get_skill("mallory/bad-tool", &Caller::public()).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn get_skill_is_visible_to_privileged_caller() {
        let (engine, _store) = engine_with(blocked_skill()).await;
        let skill = engine.get_skill("mallory/bad-tool", &reviewer()).await.unwrap();
        assert_eq!(skill.id(), "mallory/bad-tool");
    }

    #[tokio::test]
    async fn validate_bundle_reports_a_scan_without_persisting() {
        let (engine, store) = engine_with(blocked_skill()).await;
        let raw = b"---\nname: clean-tool\ndescription: harmless helper\n---\nJust prints text.";
        let report = engine.validate_bundle(raw).unwrap();
        assert!(report.risk_score >= 0.0);
        assert!(store.get_skill("nobody/clean-tool").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn approving_quarantine_restores_public_visibility() {
        let (engine, store) = engine_with(blocked_skill()).await;

        let record = QuarantineRecord::new("mallory/bad-tool", "hash-1", 1);
        let mut tx = store.begin().await.unwrap();
        store.upsert_quarantine(&mut tx, &record).await.unwrap();
        tx.commit().await.unwrap();

        engine.review_quarantine("mallory/bad-tool", &reviewer(), QuarantineDecision::Approve).await.unwrap();

        let skill = engine.get_skill("mallory/bad-tool", &Caller::public()).await.unwrap();
        assert!(skill.security_passed);
    }

    /// Reproduces S3: a record requiring two approvals must accumulate them
    /// durably across separate `review_quarantine` calls — a lone reviewer
    /// approving once must not be lost before the second reviewer approves.
    #[tokio::test]
    async fn partial_approvals_persist_across_calls_until_threshold_is_met() {
        let (engine, store) = engine_with(blocked_skill()).await;

        let record = QuarantineRecord::new("mallory/bad-tool", "hash-1", 2);
        let mut tx = store.begin().await.unwrap();
        store.upsert_quarantine(&mut tx, &record).await.unwrap();
        tx.commit().await.unwrap();

        let r1 = Caller { id: "r1".into(), role: CallerRole::Reviewer };
        let r3 = Caller { id: "r3".into(), role: CallerRole::Reviewer };

        engine.review_quarantine("mallory/bad-tool", &r1, QuarantineDecision::Approve).await.unwrap();

        let after_first = store.get_quarantine("mallory/bad-tool").await.unwrap().unwrap();
        assert_eq!(after_first.approvals, vec!["r1".to_string()]);
        assert_eq!(after_first.status, QuarantineStatus::Pending);

        let still_hidden = engine.get_skill("mallory/bad-tool", &Caller::public()).await;
        assert!(matches!(still_hidden, Err(CoreError::NotFound(_))));

        engine.review_quarantine("mallory/bad-tool", &r3, QuarantineDecision::Approve).await.unwrap();

        let after_second = store.get_quarantine("mallory/bad-tool").await.unwrap().unwrap();
        assert_eq!(after_second.status, QuarantineStatus::Approved);
        assert_eq!(after_second.approvals.len(), 2);

        let skill = engine.get_skill("mallory/bad-tool", &Caller::public()).await.unwrap();
        assert!(skill.security_passed);
    }

    #[tokio::test]
    async fn index_local_denies_non_privileged_callers() {
        let (engine, _store) = engine_with(blocked_skill()).await;
        let err = engine.index_local(std::env::temp_dir(), &Caller::public()).await.unwrap_err();
        assert!(matches!(err, CoreError::PolicyDenied(_)));
    }
}
