//! Domain entities for the skill catalog: skills, sources, scan findings,
//! quarantine records, and the other rows the Store persists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Trust tier assigned to a skill, controlling visibility and install strictness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustTier {
    Verified,
    Curated,
    Community,
    Experimental,
    Unknown,
    Local,
}

impl std::fmt::Display for TrustTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Verified => "verified",
            Self::Curated => "curated",
            Self::Community => "community",
            Self::Experimental => "experimental",
            Self::Unknown => "unknown",
            Self::Local => "local",
        };
        write!(f, "{s}")
    }
}

/// Closed category enum. New members only arrive through an explicit migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Automation,
    DataProcessing,
    Devops,
    Documentation,
    Testing,
    Security,
    Productivity,
    Integration,
    Other,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Automation => "automation",
            Self::DataProcessing => "data-processing",
            Self::Devops => "devops",
            Self::Documentation => "documentation",
            Self::Testing => "testing",
            Self::Security => "security",
            Self::Productivity => "productivity",
            Self::Integration => "integration",
            Self::Other => "other",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Category {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "automation" => Self::Automation,
            "data-processing" => Self::DataProcessing,
            "devops" => Self::Devops,
            "documentation" => Self::Documentation,
            "testing" => Self::Testing,
            "security" => Self::Security,
            "productivity" => Self::Productivity,
            "integration" => Self::Integration,
            _ => Self::Other,
        })
    }
}

/// The canonical catalog entity. Primary key is `author/name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub author: String,
    pub name: String,
    pub content_hash: String,
    pub description: String,
    pub tags: Vec<String>,
    pub category: Category,
    pub trust_tier: TrustTier,
    pub quality_score: f64,
    pub risk_score: f64,
    pub security_passed: bool,
    pub source_id: String,
    pub raw_body: Vec<u8>,
    pub parsed_metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_scan_at: Option<DateTime<Utc>>,
}

impl Skill {
    /// `author/name`, the primary key used throughout the catalog.
    pub fn id(&self) -> String {
        format!("{}/{}", self.author, self.name)
    }

    /// Whether the skill may be surfaced to a non-privileged caller.
    pub fn is_publicly_visible(&self) -> bool {
        self.security_passed
    }
}

/// Append-only version history, pruned to the most recent `K` per skill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillVersion {
    pub skill_id: String,
    pub content_hash: String,
    pub semver: Option<String>,
    pub recorded_at: DateTime<Utc>,
    pub metadata: Option<HashMap<String, String>>,
}

pub const SKILL_VERSION_RETENTION: usize = 50;

/// Provenance record for a skill's origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    Registry,
    GitHostOrg,
    GitHostRepo,
    LocalFs,
    WebhookIngest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub kind: SourceKind,
    pub identifier: String,
    pub verified: bool,
    pub default_trust: TrustTier,
    pub last_sync_cursor: Option<String>,
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Consecutive sync failures; `degraded` once this crosses the configured threshold.
    pub consecutive_failures: u32,
    pub degraded: bool,
}

/// Category of a scanner finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FindingCategory {
    Jailbreak,
    AiDefense,
    PrivEscalation,
    SocialEngineering,
    PromptLeak,
    Exfiltration,
    SensitivePath,
    SuspiciousCode,
    UrlReputation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Weight contributed per unit confidence toward `risk_score`.
    pub fn weight(self) -> f64 {
        match self {
            Severity::Info => 0.0,
            Severity::Low => 5.0,
            Severity::Medium => 15.0,
            Severity::High => 30.0,
            Severity::Critical => 60.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanFinding {
    pub skill_id: String,
    pub content_hash: String,
    pub category: FindingCategory,
    pub severity: Severity,
    pub confidence: f64,
    pub locator: String,
    pub snippet_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanDecision {
    Pass,
    Review,
    Block,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub findings: Vec<ScanFinding>,
    pub risk_score: f64,
    pub decision: ScanDecision,
}

impl ScanReport {
    pub fn has_unresolved_critical_or_high(&self) -> bool {
        self.findings
            .iter()
            .any(|f| matches!(f.severity, Severity::Critical | Severity::High))
    }
}

/// Quarantine state machine status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuarantineStatus {
    Pending,
    UnderReview,
    Approved,
    Rejected,
    Expired,
}

impl QuarantineStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Expired)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantineRecord {
    pub skill_id: String,
    pub content_hash: String,
    pub status: QuarantineStatus,
    pub approvals: Vec<String>,
    pub required_approvals: u32,
    pub assigned_reviewer: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QuarantineRecord {
    pub fn new(skill_id: impl Into<String>, content_hash: impl Into<String>, required_approvals: u32) -> Self {
        let now = Utc::now();
        Self {
            skill_id: skill_id.into(),
            content_hash: content_hash.into(),
            status: QuarantineStatus::Pending,
            approvals: Vec::new(),
            required_approvals,
            assigned_reviewer: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Audit severities, independent from scanner `Severity` since audit events
/// cover operator/process events, not content findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Append-only record of a mutation. Written within the same transaction as
/// the mutation it describes (write-ahead) so it is durable before commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: String,
    pub subject_type: String,
    pub subject_id: String,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub severity: AuditSeverity,
    pub metadata: HashMap<String, String>,
}

impl AuditEvent {
    pub fn new(
        actor: impl Into<String>,
        action: impl Into<String>,
        subject_type: impl Into<String>,
        subject_id: impl Into<String>,
        severity: AuditSeverity,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            actor: actor.into(),
            action: action.into(),
            subject_type: subject_type.into(),
            subject_id: subject_id.into(),
            before: None,
            after: None,
            severity,
            metadata: HashMap::new(),
        }
    }

    pub fn with_before(mut self, value: serde_json::Value) -> Self {
        self.before = Some(value);
        self
    }

    pub fn with_after(mut self, value: serde_json::Value) -> Self {
        self.after = Some(value);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Caller identity + role, consumed from an external auth collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub id: String,
    pub role: CallerRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallerRole {
    Public,
    Reviewer,
    Operator,
}

impl Caller {
    pub fn public() -> Self {
        Self { id: "anonymous".to_string(), role: CallerRole::Public }
    }

    pub fn is_privileged(&self) -> bool {
        !matches!(self.role, CallerRole::Public)
    }
}

/// Structured summary produced by an external code analyzer, consumed
/// unmodified by the Recommender.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodebaseContext {
    pub languages: Vec<String>,
    pub frameworks: Vec<String>,
    pub dependencies: Vec<String>,
    pub file_patterns: Vec<String>,
}
