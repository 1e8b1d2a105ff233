//! Job types and data structures
//!
//! Defines the background job types driving source sync, reindexing, and
//! maintenance sweeps (including the quarantine reaper).

use std::collections::HashMap;
use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique job identifier
pub type JobId = Uuid;

/// Job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Job is queued and waiting to be processed
    Pending,
    /// Job is currently being processed
    Running,
    /// Job completed successfully
    Completed,
    /// Job failed (may be retried)
    Failed,
    /// Job was cancelled
    Cancelled,
    /// Job exceeded max retries and is dead
    Dead,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Dead => write!(f, "dead"),
        }
    }
}

/// Job priority levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl Default for JobPriority {
    fn default() -> Self {
        Self::Normal
    }
}

/// Types of background jobs supported
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobType {
    /// Sync one configured source: fetch -> parse -> scan -> score ->
    /// classify -> (quarantine) -> store commit -> cache invalidation.
    SourceSync {
        source_id: String,
    },

    /// Re-index a single already-stored skill (e.g. after a scanner rule
    /// bundle upgrade) without re-fetching it from its source.
    SkillIndexing {
        skill_id: String,
    },

    /// Reindex all skills across all sources
    FullReindex,

    /// Recompute embeddings for a set of skills
    EmbeddingUpdate {
        skill_ids: Vec<String>,
    },

    /// Periodic maintenance sweep
    Maintenance {
        task: MaintenanceTask,
    },

    /// Custom job type for extensibility
    Custom {
        name: String,
        payload: serde_json::Value,
    },
}

/// Maintenance tasks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceTask {
    /// Remove completed jobs older than threshold
    CleanupCompletedJobs { older_than_days: u32 },
    /// Remove dead jobs
    CleanupDeadJobs,
    /// Vacuum database (SQLite only)
    VacuumDatabase,
    /// Re-queue orphaned jobs
    RequeueOrphaned,
    /// Sweep quarantine records past their TTL
    QuarantineReap,
}

/// A background job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier
    pub id: JobId,

    /// Job type and payload
    pub job_type: JobType,

    /// Current status
    pub status: JobStatus,

    /// Job priority
    pub priority: JobPriority,

    /// Number of attempts made
    pub attempts: u32,

    /// Maximum retry attempts
    pub max_attempts: u32,

    /// When the job was created
    pub created_at: DateTime<Utc>,

    /// When the job was last updated
    pub updated_at: DateTime<Utc>,

    /// When the job should run (for delayed jobs)
    pub scheduled_at: Option<DateTime<Utc>>,

    /// When the job started running
    pub started_at: Option<DateTime<Utc>>,

    /// When the job completed
    pub completed_at: Option<DateTime<Utc>>,

    /// Worker ID processing this job
    pub worker_id: Option<String>,

    /// Error message if failed
    pub error: Option<String>,

    /// Job result (if completed)
    pub result: Option<serde_json::Value>,

    /// Arbitrary metadata
    pub metadata: HashMap<String, String>,
}

impl Job {
    /// Create a new job
    pub fn new(job_type: JobType) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            job_type,
            status: JobStatus::Pending,
            priority: JobPriority::Normal,
            attempts: 0,
            max_attempts: 3,
            created_at: now,
            updated_at: now,
            scheduled_at: None,
            started_at: None,
            completed_at: None,
            worker_id: None,
            error: None,
            result: None,
            metadata: HashMap::new(),
        }
    }

    /// Create a source sync job
    pub fn source_sync(source_id: impl Into<String>) -> Self {
        Self::new(JobType::SourceSync { source_id: source_id.into() })
    }

    /// Create a skill indexing job
    pub fn skill_indexing(skill_id: impl Into<String>) -> Self {
        Self::new(JobType::SkillIndexing { skill_id: skill_id.into() })
    }

    /// Set job priority
    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set max attempts
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    /// Schedule job for later
    pub fn scheduled_at(mut self, when: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(when);
        self
    }

    /// Schedule job after a delay
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.scheduled_at = Some(Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default());
        self
    }

    /// Add metadata
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Check if job can be retried
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts && self.status == JobStatus::Failed
    }

    /// Check if job is terminal (won't change state)
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Cancelled | JobStatus::Dead)
    }

    /// Get time since creation
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }

    /// Get execution duration (if completed)
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

/// Job progress update
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobProgress {
    /// Job ID
    pub job_id: JobId,

    /// Progress percentage (0-100)
    pub percentage: u8,

    /// Current step description
    pub step: String,

    /// Additional details
    pub details: Option<String>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl JobProgress {
    pub fn new(job_id: JobId, percentage: u8, step: impl Into<String>) -> Self {
        Self {
            job_id,
            percentage: percentage.min(100),
            step: step.into(),
            details: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Job statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobStats {
    /// Total jobs in queue
    pub total: usize,

    /// Jobs by status
    pub by_status: HashMap<String, usize>,

    /// Average execution time (ms)
    pub avg_execution_ms: u64,

    /// Success rate (0.0-1.0)
    pub success_rate: f32,

    /// Jobs processed in last hour
    pub throughput_per_hour: usize,

    /// Current active workers
    pub active_workers: usize,
}
