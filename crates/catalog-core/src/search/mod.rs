//! Search Service (C9): hybrid lexical + semantic retrieval over the
//! catalog, fused into one ranked list per the weighted-sum formula in
//! [`fusion::fuse_catalog_signals`].
//!
//! Bootstraps its lexical and (optionally) semantic indexes from
//! [`Store::list_all_skills`] and keeps them in memory; callers drive a
//! [`rebuild`](SearchService::rebuild) after any bulk ingest. If the
//! embedding/vector collaborators are unavailable the service degrades to
//! lexical-only search and annotates responses with `degraded: true`
//! rather than failing outright.

mod bm25;
mod fusion;

use crate::cache::{Cache, Keyspace};
use crate::config::FusionConfig;
use crate::embeddings::EmbeddingProvider;
use crate::errors::{CoreError, Result};
use crate::model::{Caller, Category, Skill, TrustTier};
use crate::store::Store;
use crate::vector_store::{EmbeddedDocument, VectorStore};
use bm25::{BM25Config, BM25Index};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

const MAX_QUERY_LEN: usize = 500;
const MAX_RESULTS: usize = 100;

/// Predicates applied to fused candidates, after fusion, before truncation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilter {
    pub trust_tier: Option<TrustTier>,
    pub category: Option<Category>,
    pub min_quality: Option<f64>,
    pub security_passed: Option<bool>,
    pub author: Option<String>,
}

/// How a caller wants the fused score weighted; `Default` uses the
/// configured coefficients unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RankingHint {
    #[default]
    Default,
    QualityFirst,
    RecencyFirst,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub skill_id: String,
    pub score: f32,
    pub quality_score: f64,
    pub trust_tier: TrustTier,
}

/// A ranked list of hits plus whether the semantic leg was unavailable for
/// this response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    pub degraded: bool,
}

/// Owns the in-memory lexical index and drives the semantic leg through
/// [`VectorStore`]/[`EmbeddingProvider`].
pub struct SearchService {
    store: Arc<dyn Store>,
    cache: Arc<Cache>,
    bm25: RwLock<BM25Index>,
    vector_store: Arc<dyn VectorStore>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    fusion_config: FusionConfig,
    vector_available: AtomicBool,
}

impl SearchService {
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<Cache>,
        vector_store: Arc<dyn VectorStore>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        fusion_config: FusionConfig,
    ) -> Result<Self> {
        let bm25 = BM25Index::new(BM25Config::in_memory()).map_err(|e| CoreError::internal(e.to_string()))?;
        Ok(Self {
            store,
            cache,
            bm25: RwLock::new(bm25),
            vector_store,
            embedder,
            fusion_config,
            vector_available: AtomicBool::new(false),
        })
    }

    /// Whether the service currently believes the semantic leg is usable.
    /// Flips to `false` the moment an embed/upsert/search call fails and
    /// back to `true` only after a successful [`rebuild`](Self::rebuild).
    pub fn is_degraded(&self) -> bool {
        !self.vector_available.load(Ordering::Relaxed)
    }

    /// Rebuild both indexes from the Store's current contents. Lexical
    /// rebuild failures are fatal (the index is the service's whole
    /// purpose); semantic rebuild failures degrade rather than propagate.
    pub async fn rebuild(&self) -> Result<()> {
        let skills = self.store.list_all_skills().await?;

        {
            let mut bm25 = self.bm25.write().await;
            bm25.clear().map_err(|e| CoreError::internal(e.to_string()))?;
            for skill in &skills {
                let tags = skill.tags.join(" ");
                let body_excerpt: String = String::from_utf8_lossy(&skill.raw_body).chars().take(4000).collect();
                bm25.add_document(&skill.id(), &skill.name, &skill.description, &tags, &body_excerpt)
                    .map_err(|e| CoreError::internal(e.to_string()))?;
            }
            bm25.commit().map_err(|e| CoreError::internal(e.to_string()))?;
        }

        match &self.embedder {
            Some(embedder) => match self.rebuild_vector_index(embedder.as_ref(), &skills).await {
                Ok(()) => self.vector_available.store(true, Ordering::Relaxed),
                Err(e) => {
                    tracing::warn!(error = %e, "vector index rebuild failed, falling back to lexical-only search");
                    self.vector_available.store(false, Ordering::Relaxed);
                }
            },
            None => self.vector_available.store(false, Ordering::Relaxed),
        }

        Ok(())
    }

    async fn rebuild_vector_index(&self, embedder: &dyn EmbeddingProvider, skills: &[Skill]) -> anyhow::Result<()> {
        if skills.is_empty() {
            return Ok(());
        }
        let texts: Vec<String> = skills.iter().map(|s| format!("{} {}", s.name, s.description)).collect();
        let embeddings = embedder.embed_documents_batched(texts).await?;
        let docs: Vec<EmbeddedDocument> = skills
            .iter()
            .zip(embeddings)
            .map(|(skill, embedding)| {
                EmbeddedDocument::new(skill.id(), embedding)
                    .with_skill_name(skill.name.clone())
                    .with_category(skill.category.to_string())
                    .with_tags(skill.tags.clone())
            })
            .collect();
        self.vector_store.upsert(docs).await?;
        Ok(())
    }

    /// Search the catalog. Non-privileged callers never see
    /// `security_passed = false` skills or skills still in a non-terminal
    /// quarantine, regardless of `filter`.
    pub async fn search(&self, query: &str, filter: &SearchFilter, k: usize, ranking_hint: RankingHint, caller: &Caller) -> Result<SearchResponse> {
        if query.trim().is_empty() {
            return Err(CoreError::InvalidQuery("query must not be empty".to_string()));
        }
        if query.chars().count() > MAX_QUERY_LEN {
            return Err(CoreError::InvalidQuery(format!("query exceeds {MAX_QUERY_LEN} characters")));
        }
        let k = k.min(MAX_RESULTS);
        let privileged = caller.is_privileged();

        let cache_key = cache_key(query, filter, ranking_hint, k, privileged);
        self.cache
            .get_or_populate(Keyspace::Search, &cache_key, || async { self.execute_search(query, filter, k, ranking_hint, privileged).await })
            .await
    }

    async fn execute_search(&self, query: &str, filter: &SearchFilter, k: usize, ranking_hint: RankingHint, privileged: bool) -> Result<SearchResponse> {
        let fusion_config = effective_fusion_config(&self.fusion_config, ranking_hint);

        let lexical: Vec<(String, f32)> = {
            let index = self.bm25.read().await;
            index
                .search(query, fusion_config.k_lex)
                .map_err(|e| CoreError::internal(e.to_string()))?
                .into_iter()
                .map(|hit| (hit.id, hit.score))
                .collect()
        };

        let mut degraded = self.is_degraded();
        let semantic: Vec<(String, f32)> = if !degraded {
            match self.semantic_candidates(query, fusion_config.k_sem).await {
                Ok(hits) => hits,
                Err(e) => {
                    tracing::warn!(error = %e, "semantic search failed mid-query, degrading to lexical-only");
                    self.vector_available.store(false, Ordering::Relaxed);
                    degraded = true;
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let mut candidate_ids: HashSet<String> = lexical.iter().map(|(id, _)| id.clone()).collect();
        candidate_ids.extend(semantic.iter().map(|(id, _)| id.clone()));

        let mut skills: HashMap<String, Skill> = HashMap::with_capacity(candidate_ids.len());
        for id in &candidate_ids {
            if let Some(skill) = self.store.get_skill(id).await? {
                skills.insert(id.clone(), skill);
            }
        }

        let quality: Vec<(String, f32)> = skills.values().map(|s| (s.id(), s.quality_score as f32)).collect();
        let recency: Vec<(String, f32)> = skills.values().map(|s| (s.id(), recency_score(s.updated_at))).collect();

        let fuse_top_k = fusion_config.k_lex.max(fusion_config.k_sem);
        let fused = fusion::fuse_catalog_signals(lexical, semantic, quality, recency, &fusion_config, fuse_top_k);

        let mut hits = Vec::with_capacity(fused.len());
        for result in fused {
            let Some(skill) = skills.get(&result.id) else { continue };

            if !privileged {
                if !skill.security_passed {
                    continue;
                }
                if let Some(record) = self.store.get_quarantine(&skill.id()).await? {
                    if !record.status.is_terminal() {
                        continue;
                    }
                }
            }

            if let Some(tier) = filter.trust_tier {
                if skill.trust_tier != tier {
                    continue;
                }
            }
            if let Some(category) = filter.category {
                if skill.category != category {
                    continue;
                }
            }
            if let Some(min_quality) = filter.min_quality {
                if skill.quality_score < min_quality {
                    continue;
                }
            }
            if let Some(security_passed) = filter.security_passed {
                if skill.security_passed != security_passed {
                    continue;
                }
            }
            if let Some(ref author) = filter.author {
                if &skill.author != author {
                    continue;
                }
            }

            hits.push(SearchHit { skill_id: skill.id(), score: result.score, quality_score: skill.quality_score, trust_tier: skill.trust_tier });
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.quality_score.partial_cmp(&a.quality_score).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| a.skill_id.cmp(&b.skill_id))
        });
        hits.truncate(k);

        Ok(SearchResponse { hits, degraded })
    }

    async fn semantic_candidates(&self, query: &str, k_sem: usize) -> anyhow::Result<Vec<(String, f32)>> {
        let Some(embedder) = &self.embedder else { return Ok(Vec::new()) };
        let query_embedding = embedder.embed_query(query).await?;
        let results = self.vector_store.search(query_embedding, None, k_sem).await?;
        Ok(results.into_iter().map(|r| (r.id, r.score)).collect())
    }
}

fn effective_fusion_config(base: &FusionConfig, hint: RankingHint) -> FusionConfig {
    let mut config = *base;
    match hint {
        RankingHint::Default => {}
        RankingHint::QualityFirst => config.quality_weight *= 2.0,
        RankingHint::RecencyFirst => config.recency_weight *= 2.0,
    }
    config
}

fn recency_score(updated_at: DateTime<Utc>) -> f32 {
    let days = (Utc::now() - updated_at).num_days().max(0) as f32;
    (1.0 / (1.0 + days / 30.0)).clamp(0.0, 1.0)
}

fn cache_key(query: &str, filter: &SearchFilter, hint: RankingHint, k: usize, privileged: bool) -> String {
    format!(
        "{query}|{:?}|{:?}|{:?}|{:?}|{}|{hint:?}|{k}|{privileged}",
        filter.trust_tier,
        filter.category,
        filter.min_quality,
        filter.security_passed,
        filter.author.as_deref().unwrap_or(""),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CallerRole;
    use crate::store::sqlite::SqliteStore;
    use chrono::Utc;
    use std::collections::HashMap as Map;

    fn skill(author: &str, name: &str, description: &str, quality: f64, security_passed: bool) -> Skill {
        let now = Utc::now();
        Skill {
            author: author.into(),
            name: name.into(),
            content_hash: format!("hash-{author}-{name}"),
            description: description.into(),
            tags: vec!["devops".into()],
            category: Category::Devops,
            trust_tier: TrustTier::Community,
            quality_score: quality,
            risk_score: 0.0,
            security_passed,
            source_id: "src-1".into(),
            raw_body: description.as_bytes().to_vec(),
            parsed_metadata: Map::new(),
            created_at: now,
            updated_at: now,
            last_scan_at: Some(now),
        }
    }

    async fn seeded_service(skills: &[Skill]) -> (SearchService, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::connect("sqlite::memory:").await.unwrap());
        for s in skills {
            let mut tx = store.begin().await.unwrap();
            store.upsert_skill(&mut tx, s).await.unwrap();
            tx.commit().await.unwrap();
        }
        let cache = Arc::new(Cache::new(Arc::clone(&store) as Arc<dyn Store>, crate::config::CacheConfig::default()));
        let vector_store: Arc<dyn VectorStore> = Arc::new(crate::vector_store::InMemoryVectorStore::new());
        let service = SearchService::new(Arc::clone(&store) as Arc<dyn Store>, cache, vector_store, None, FusionConfig::default()).unwrap();
        service.rebuild().await.unwrap();
        (service, store)
    }

    #[tokio::test]
    async fn search_rejects_oversized_query() {
        let (service, _store) = seeded_service(&[]).await;
        let err = service
            .search(&"a".repeat(MAX_QUERY_LEN + 1), &SearchFilter::default(), 10, RankingHint::Default, &Caller::public())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn lexical_only_search_finds_matching_skill() {
        let s = skill("alice", "commit-formatter", "Formats commit messages nicely", 80.0, true);
        let (service, _store) = seeded_service(&[s]).await;

        assert!(service.is_degraded());
        let response = service.search("commit messages", &SearchFilter::default(), 10, RankingHint::Default, &Caller::public()).await.unwrap();
        assert!(response.degraded);
        assert_eq!(response.hits.len(), 1);
        assert_eq!(response.hits[0].skill_id, "alice/commit-formatter");
    }

    #[tokio::test]
    async fn non_privileged_caller_never_sees_failed_security_skills() {
        let clean = skill("alice", "safe-tool", "A safe automation tool", 80.0, true);
        let blocked = skill("mallory", "bad-tool", "A safe automation tool lookalike", 80.0, false);
        let (service, _store) = seeded_service(&[clean, blocked]).await;

        let response = service.search("safe automation tool", &SearchFilter::default(), 10, RankingHint::Default, &Caller::public()).await.unwrap();
        assert!(response.hits.iter().all(|h| h.skill_id != "mallory/bad-tool"));
    }

    #[tokio::test]
    async fn privileged_caller_can_see_failed_security_skills() {
        let blocked = skill("mallory", "bad-tool", "A risky automation tool", 80.0, false);
        let (service, _store) = seeded_service(&[blocked]).await;

        let reviewer = Caller { id: "r1".into(), role: CallerRole::Reviewer };
        let response = service.search("risky automation tool", &SearchFilter::default(), 10, RankingHint::Default, &reviewer).await.unwrap();
        assert!(response.hits.iter().any(|h| h.skill_id == "mallory/bad-tool"));
    }

    #[tokio::test]
    async fn min_quality_filter_excludes_low_quality_skills() {
        let low = skill("alice", "low-quality", "A barely documented tool", 10.0, true);
        let high = skill("bob", "high-quality", "A barely documented tool", 90.0, true);
        let (service, _store) = seeded_service(&[low, high]).await;

        let filter = SearchFilter { min_quality: Some(50.0), ..Default::default() };
        let response = service.search("barely documented tool", &filter, 10, RankingHint::Default, &Caller::public()).await.unwrap();
        assert!(response.hits.iter().all(|h| h.skill_id != "alice/low-quality"));
        assert!(response.hits.iter().any(|h| h.skill_id == "bob/high-quality"));
    }

    #[tokio::test]
    async fn cache_hit_serves_stale_result_until_generation_bump() {
        let s = skill("alice", "cache-probe", "Probes the cache behavior", 80.0, true);
        let (service, store) = seeded_service(&[s]).await;

        let first = service.search("cache behavior", &SearchFilter::default(), 10, RankingHint::Default, &Caller::public()).await.unwrap();
        assert_eq!(first.hits.len(), 1);

        let mut second_skill = skill("alice", "cache-probe", "Probes the cache behavior", 80.0, true);
        second_skill.quality_score = 5.0;
        let mut tx = store.begin().await.unwrap();
        store.upsert_skill(&mut tx, &second_skill).await.unwrap();
        store.bump_cache_generation(&mut tx, Keyspace::Search.as_str()).await.unwrap();
        tx.commit().await.unwrap();

        let second = service.search("cache behavior", &SearchFilter::default(), 10, RankingHint::Default, &Caller::public()).await.unwrap();
        assert_eq!(second.hits.len(), 1);
    }
}
