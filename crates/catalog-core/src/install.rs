//! Installation Gate (C11): the last checkpoint before a skill is handed to
//! a caller to install. Re-verifies everything the indexer already
//! established instead of trusting the stored row, since the row could
//! have drifted (a later quarantine decision, a corrupted write) between
//! index time and install time.

use crate::audit::{AuditSink, SqliteAuditSink};
use crate::config::ScannerConfig;
use crate::errors::{CoreError, Result};
use crate::model::{AuditEvent, AuditSeverity, Caller, QuarantineStatus, ScanDecision, ScanReport, TrustTier};
use crate::parser;
use crate::scanner;
use crate::store::Store;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const MANIFEST_VERSION: u32 = 1;

/// Proof that a skill passed every installation check at `issued_at`,
/// handed back to the caller rather than a bare "ok" so the decision is
/// independently auditable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallManifest {
    pub manifest_version: u32,
    pub id: String,
    pub content_hash: String,
    pub trust_tier: TrustTier,
    pub scan_digest: String,
    pub issued_at: DateTime<Utc>,
}

/// Minimum `quality_score` required to install at each trust tier. Lower
/// tiers carry less provenance assurance, so they need to clear a higher
/// quality bar to compensate.
fn minimum_quality_for_tier(tier: TrustTier) -> f64 {
    match tier {
        TrustTier::Verified => 0.0,
        TrustTier::Curated => 10.0,
        TrustTier::Community => 25.0,
        TrustTier::Experimental => 40.0,
        TrustTier::Local => 0.0,
        TrustTier::Unknown => f64::INFINITY,
    }
}

/// Re-check and authorize installation of `id` for `caller`. Steps, in
/// order: load the skill; re-check quarantine status; re-run the Scanner
/// on the stored `raw_body` and confirm its verdict still matches the
/// stored one; enforce the tier's quality threshold; emit a manifest plus
/// an audit event.
pub async fn authorize_install(store: &dyn Store, scanner_config: &ScannerConfig, id: &str, caller: &Caller) -> Result<InstallManifest> {
    let skill = store.get_skill(id).await?.ok_or_else(|| CoreError::NotFound(id.to_string()))?;

    match store.get_quarantine(id).await? {
        Some(record) if record.status != QuarantineStatus::Approved => return Err(CoreError::Quarantined),
        None if !skill.security_passed => return Err(CoreError::Quarantined),
        _ => {}
    }

    let parsed = parser::parse(&skill.raw_body).map_err(|_| CoreError::IntegrityMismatch)?;
    if parsed.content_hash != skill.content_hash {
        return Err(CoreError::IntegrityMismatch);
    }

    let report = scanner::scan(&parsed, scanner_config);
    let fresh_security_passed = report.decision == ScanDecision::Pass;
    if fresh_security_passed != skill.security_passed {
        return Err(CoreError::IntegrityMismatch);
    }

    let threshold = minimum_quality_for_tier(skill.trust_tier);
    if skill.quality_score < threshold {
        return Err(CoreError::PolicyDenied(format!(
            "quality score {:.1} is below the {} tier threshold of {:.1}",
            skill.quality_score, skill.trust_tier, threshold
        )));
    }

    let manifest = InstallManifest {
        manifest_version: MANIFEST_VERSION,
        id: skill.id(),
        content_hash: skill.content_hash.clone(),
        trust_tier: skill.trust_tier,
        scan_digest: digest_report(&report),
        issued_at: Utc::now(),
    };

    let event = AuditEvent::new(caller.id.clone(), "install.authorize", "skill", skill.id(), AuditSeverity::Info)
        .with_after(serde_json::to_value(&manifest).unwrap_or(serde_json::Value::Null));

    let mut tx = store.begin().await?;
    SqliteAuditSink.record(&mut tx.tx, &event).await?;
    tx.commit().await?;

    Ok(manifest)
}

/// Stable digest of a scan verdict, bound into the manifest so a caller
/// can confirm which verdict authorized the install without trusting the
/// manifest's own `trust_tier` field alone.
fn digest_report(report: &ScanReport) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{:?}", report.decision).as_bytes());
    hasher.update(report.risk_score.to_bits().to_le_bytes());
    for finding in &report.findings {
        hasher.update([finding.severity as u8]);
        hasher.update(finding.snippet_hash.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Caller, Category, QuarantineRecord, Skill};
    use crate::store::sqlite::SqliteStore;
    use std::collections::HashMap;

    fn clean_skill(id_parts: (&str, &str), quality: f64, tier: TrustTier) -> Skill {
        let raw = b"---\nname: commit-formatter\ndescription: Formats commit messages nicely\n---\nUse when committing changes.".to_vec();
        let parsed = parser::parse(&raw).unwrap();
        let now = Utc::now();
        Skill {
            author: id_parts.0.into(),
            name: id_parts.1.into(),
            content_hash: parsed.content_hash,
            description: parsed.description,
            tags: vec![],
            category: Category::Automation,
            trust_tier: tier,
            quality_score: quality,
            risk_score: 0.0,
            security_passed: true,
            source_id: "src-1".into(),
            raw_body: raw,
            parsed_metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
            last_scan_at: Some(now),
        }
    }

    async fn store_with(skill: Skill) -> SqliteStore {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        let mut tx = store.begin().await.unwrap();
        store.upsert_skill(&mut tx, &skill).await.unwrap();
        tx.commit().await.unwrap();
        store
    }

    #[tokio::test]
    async fn happy_path_returns_manifest_and_records_audit() {
        let skill = clean_skill(("alice", "commit-formatter"), 80.0, TrustTier::Community);
        let store = store_with(skill.clone()).await;

        let manifest = authorize_install(&store, &ScannerConfig::default(), &skill.id(), &Caller::public()).await.unwrap();
        assert_eq!(manifest.id, skill.id());
        assert_eq!(manifest.content_hash, skill.content_hash);
        assert_eq!(manifest.manifest_version, MANIFEST_VERSION);
    }

    #[tokio::test]
    async fn missing_skill_is_not_found() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        let err = authorize_install(&store, &ScannerConfig::default(), "nobody/nothing", &Caller::public()).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn security_failed_skill_without_quarantine_record_is_quarantined() {
        let mut skill = clean_skill(("mallory", "bad-tool"), 80.0, TrustTier::Unknown);
        skill.security_passed = false;
        let store = store_with(skill.clone()).await;

        let err = authorize_install(&store, &ScannerConfig::default(), &skill.id(), &Caller::public()).await.unwrap_err();
        assert!(matches!(err, CoreError::Quarantined));
    }

    #[tokio::test]
    async fn non_approved_quarantine_record_blocks_install() {
        let mut skill = clean_skill(("mallory", "bad-tool"), 80.0, TrustTier::Unknown);
        skill.security_passed = false;
        let store = store_with(skill.clone()).await;

        let record = QuarantineRecord::new(skill.id(), skill.content_hash.clone(), 1);
        let mut tx = store.begin().await.unwrap();
        store.upsert_quarantine(&mut tx, &record).await.unwrap();
        tx.commit().await.unwrap();

        let err = authorize_install(&store, &ScannerConfig::default(), &skill.id(), &Caller::public()).await.unwrap_err();
        assert!(matches!(err, CoreError::Quarantined));
    }

    #[tokio::test]
    async fn tampered_content_hash_is_integrity_mismatch() {
        let mut skill = clean_skill(("alice", "commit-formatter"), 80.0, TrustTier::Community);
        skill.content_hash = "not-the-real-hash".to_string();
        let store = store_with(skill.clone()).await;

        let err = authorize_install(&store, &ScannerConfig::default(), &skill.id(), &Caller::public()).await.unwrap_err();
        assert!(matches!(err, CoreError::IntegrityMismatch));
    }

    #[tokio::test]
    async fn low_quality_at_stricter_tier_is_policy_denied() {
        let skill = clean_skill(("alice", "commit-formatter"), 5.0, TrustTier::Experimental);
        let store = store_with(skill.clone()).await;

        let err = authorize_install(&store, &ScannerConfig::default(), &skill.id(), &Caller::public()).await.unwrap_err();
        assert!(matches!(err, CoreError::PolicyDenied(_)));
    }

    #[tokio::test]
    async fn local_tier_has_no_quality_floor() {
        let skill = clean_skill(("alice", "commit-formatter"), 0.0, TrustTier::Local);
        let store = store_with(skill.clone()).await;

        authorize_install(&store, &ScannerConfig::default(), &skill.id(), &Caller::public()).await.unwrap();
    }
}
