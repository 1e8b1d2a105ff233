//! catalog-core - discovery and safety engine for a catalog of
//! agent-authorable skills.
//!
//! A skill is a markdown bundle with a small frontmatter header. This crate
//! parses bundles, scans their bodies for unsafe instructions, scores their
//! quality, classifies trust, quarantines anything risky behind an approval
//! workflow, indexes and syncs sources of bundles, caches expensive reads,
//! and answers hybrid lexical/semantic search and recommendation queries.
//! It does not execute skill content, host a registry UI, or speak any
//! particular transport protocol - those are left to callers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────┐   ┌─────────┐   ┌────────────┐
//! │ source_fetch│-->│  parser  │-->│ scanner │-->│   trust    │
//! └─────────────┘   └──────────┘   └─────────┘   └────────────┘
//!         │                               │              │
//!         ▼                               ▼              ▼
//! ┌─────────────┐                 ┌──────────────┐  ┌──────────┐
//! │   indexer   │ ───────────────>│  quarantine  │  │ quality  │
//! └─────────────┘                 └──────────────┘  └──────────┘
//!         │
//!         ▼
//! ┌─────────────┐   ┌───────┐   ┌────────┐   ┌──────────┐
//! │    store    │<->│ cache │<->│ search │-->│ recommend│
//! └─────────────┘   └───────┘   └────────┘   └──────────┘
//! ```
//!
//! # Concurrency
//!
//! Mutating operations run single-writer-per-skill through [`store::Store`]
//! transactions; readers never block behind a write. Background work (source
//! sync, embedding updates, quarantine expiry) runs on the [`jobs`] worker
//! pool.

#![warn(missing_docs)]
#![allow(missing_docs)]

pub mod api;
pub mod audit;
pub mod cache;
pub mod config;
pub mod embeddings;
pub mod errors;
pub mod git_source;
pub mod indexer;
pub mod install;
pub mod jobs;
pub mod model;
pub mod parser;
pub mod quality;
pub mod quarantine;
pub mod recommend;
pub mod scanner;
pub mod search;
pub mod source_fetch;
pub mod store;
pub mod trust;
pub mod vector_store;

pub use api::CatalogEngine;
pub use config::CoreConfig;
pub use errors::{CoreError, Result};
pub use git_source::{is_git_url, parse_git_url, GitRef, GitSource};
pub use model::{
    AuditEvent, AuditSeverity, Caller, CallerRole, Category, CodebaseContext, FindingCategory,
    QuarantineRecord, QuarantineStatus, ScanDecision, ScanFinding, ScanReport, Severity, Skill,
    SkillVersion, Source, SourceKind, TrustTier, SKILL_VERSION_RETENTION,
};
pub use parser::ParsedBundle;
pub use store::{Store, StoreHealth, StoreTransaction};
pub use vector_store::{
    cosine_similarity, euclidean_distance, DeleteStats, DistanceMetric, DocumentMetadata,
    EmbeddedDocument, Filter, HealthStatus, InMemoryVectorStore, QdrantConfig, QdrantVectorStore,
    SearchResult, UpsertStats, VectorStore,
};
pub use embeddings::{
    EmbeddingProvider, EmbeddingProviderFactory, EmbeddingProviderType, FastEmbedModel,
    FastEmbedProvider, OllamaProvider, OpenAIEmbedProvider, OpenAIEmbeddingModel,
};
pub use jobs::{
    create_job_queue, create_storage, Job, JobConfig, JobError, JobFilter, JobHandler, JobId,
    JobPriority, JobProgress, JobQueue, JobStats, JobStatus, JobStorage, JobType, LoggingJobHandler,
    MaintenanceTask, PoolState, SqliteJobStorage, StorageBackend, StorageError, StorageResult,
    WorkerConfig, WorkerContext, WorkerPool, WorkerPoolError, WorkerPoolStats,
};
pub use search::{SearchFilter, SearchHit, SearchService};
pub use recommend::{FilteredItem, RecommendResponse, RecommendationItem, Recommender};
pub use install::{authorize_install, InstallManifest};
