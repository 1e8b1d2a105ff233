//! Quarantine Manager (C6): state machine and approval workflow for
//! flagged skills.

use crate::errors::QuarantineError;
use crate::model::{AuditEvent, AuditSeverity, Caller, QuarantineRecord, QuarantineStatus, ScanReport};

/// Required approval count per §3's QuarantineRecord invariant: any skill
/// with at least one Critical finding needs two reviewers, else one.
pub fn required_approvals(report: &ScanReport, critical: u32, default: u32) -> u32 {
    let has_critical = report
        .findings
        .iter()
        .any(|f| matches!(f.severity, crate::model::Severity::Critical));
    if has_critical {
        critical
    } else {
        default
    }
}

/// Open a new quarantine record in `pending` for a skill whose scan
/// resulted in `review` or `block`.
pub fn open(skill_id: impl Into<String>, content_hash: impl Into<String>, required: u32) -> QuarantineRecord {
    QuarantineRecord::new(skill_id, content_hash, required)
}

/// Assign a reviewer, moving `pending -> under-review`. Returns the audit
/// event the caller must persist in the same transaction as the record
/// update.
pub fn assign_reviewer(
    record: &mut QuarantineRecord,
    caller: &Caller,
    reviewer: impl Into<String>,
) -> Result<AuditEvent, QuarantineError> {
    require_privileged(caller)?;
    if record.status != QuarantineStatus::Pending {
        return Err(QuarantineError::InvalidTransition { from: record.status, to: QuarantineStatus::UnderReview });
    }

    let reviewer = reviewer.into();
    record.assigned_reviewer = Some(reviewer.clone());
    record.status = QuarantineStatus::UnderReview;
    record.updated_at = chrono::Utc::now();

    Ok(AuditEvent::new(caller.id.clone(), "quarantine.assign_reviewer", "quarantine_record", record.skill_id.clone(), AuditSeverity::Info)
        .with_metadata("reviewer", reviewer))
}

/// Record an approval. Always accepts and mutates `record` in place — the
/// caller persists it durably on every call, not only once the threshold
/// is met, so approvals from separate reviewers accumulate across calls
/// instead of being discarded whenever the count falls short. Transitions
/// to `approved` once the required approval count is met; returns `Err`
/// only for a genuine failure (permission, already-terminal record), never
/// for an approval that was recorded but didn't clear the threshold.
pub fn approve(record: &mut QuarantineRecord, caller: &Caller) -> Result<AuditEvent, QuarantineError> {
    require_privileged(caller)?;
    if record.status.is_terminal() {
        return Err(QuarantineError::InvalidTransition { from: record.status, to: QuarantineStatus::Approved });
    }
    if !record.approvals.contains(&caller.id) {
        record.approvals.push(caller.id.clone());
    }
    record.updated_at = chrono::Utc::now();

    let event = AuditEvent::new(caller.id.clone(), "quarantine.approve", "quarantine_record", record.skill_id.clone(), AuditSeverity::Info)
        .with_metadata("approvals", record.approvals.len().to_string())
        .with_metadata("required", record.required_approvals.to_string());

    if record.approvals.len() as u32 >= record.required_approvals {
        record.status = QuarantineStatus::Approved;
        Ok(event.with_after(serde_json::json!({ "status": "approved" })))
    } else {
        Ok(event)
    }
}

/// Reject the record. Terminal; requires a single reviewer with reject
/// permission (any privileged caller in this implementation).
pub fn reject(record: &mut QuarantineRecord, caller: &Caller, justification: impl Into<String>) -> Result<AuditEvent, QuarantineError> {
    require_privileged(caller)?;
    if record.status.is_terminal() {
        return Err(QuarantineError::InvalidTransition { from: record.status, to: QuarantineStatus::Rejected });
    }
    record.status = QuarantineStatus::Rejected;
    record.updated_at = chrono::Utc::now();

    Ok(AuditEvent::new(caller.id.clone(), "quarantine.reject", "quarantine_record", record.skill_id.clone(), AuditSeverity::Warning)
        .with_metadata("justification", justification.into()))
}

/// Expire a record past its TTL. Called only by the background reaper, not
/// by caller-facing operations, so no `Caller` permission check applies.
pub fn expire(record: &mut QuarantineRecord) -> Option<AuditEvent> {
    if record.status.is_terminal() {
        return None;
    }
    record.status = QuarantineStatus::Expired;
    record.updated_at = chrono::Utc::now();
    Some(AuditEvent::new("system.reaper", "quarantine.expire", "quarantine_record", record.skill_id.clone(), AuditSeverity::Info))
}

/// Whether a pending/under-review record has aged past its TTL.
pub fn is_expired(record: &QuarantineRecord, ttl_days: i64, now: chrono::DateTime<chrono::Utc>) -> bool {
    !record.status.is_terminal() && (now - record.created_at).num_days() >= ttl_days
}

fn require_privileged(caller: &Caller) -> Result<(), QuarantineError> {
    if caller.is_privileged() {
        Ok(())
    } else {
        Err(QuarantineError::PermissionDenied)
    }
}

/// Background expiry sweep, structured as a job the shared worker pool
/// (`crate::jobs::worker`) drives on a `Maintenance`-flavored schedule
/// rather than a bespoke timer loop, per the Quarantine Manager's reaper
/// design note.
pub mod reaper {
    use super::*;
    use crate::jobs::{Job, JobError, JobHandler, MaintenanceTask, WorkerContext};
    use async_trait::async_trait;

    /// Collaborator the reaper drives; implemented by the Store in
    /// production, hand-stubbed in tests.
    #[async_trait]
    pub trait QuarantineStore: Send + Sync {
        async fn pending_and_under_review(&self) -> Result<Vec<QuarantineRecord>, crate::errors::CoreError>;
        async fn persist_expired(&self, records: &[QuarantineRecord]) -> Result<(), crate::errors::CoreError>;
    }

    pub struct ReaperHandler<S: QuarantineStore> {
        store: S,
        ttl_days: i64,
    }

    impl<S: QuarantineStore> ReaperHandler<S> {
        pub fn new(store: S, ttl_days: i64) -> Self {
            Self { store, ttl_days }
        }
    }

    #[async_trait]
    impl<S: QuarantineStore> JobHandler for ReaperHandler<S> {
        async fn handle(&self, _job: &Job, _ctx: &WorkerContext) -> Result<serde_json::Value, JobError> {
            let now = chrono::Utc::now();
            let mut records = self
                .store
                .pending_and_under_review()
                .await
                .map_err(|e| JobError::Execution(e.to_string()))?;

            let mut expired = Vec::new();
            for record in &mut records {
                if is_expired(record, self.ttl_days, now) {
                    if expire(record).is_some() {
                        expired.push(record.clone());
                    }
                }
            }

            if !expired.is_empty() {
                self.store
                    .persist_expired(&expired)
                    .await
                    .map_err(|e| JobError::Execution(e.to_string()))?;
            }

            Ok(serde_json::json!({ "expired_count": expired.len() }))
        }

        fn can_handle(&self, job_type: &crate::jobs::JobType) -> bool {
            matches!(job_type, crate::jobs::JobType::Maintenance { task: MaintenanceTask::QuarantineReap })
        }

        fn name(&self) -> &str {
            "quarantine_reaper"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Caller, CallerRole, FindingCategory, ScanDecision, ScanFinding, Severity};

    fn privileged() -> Caller {
        Caller { id: "reviewer-1".into(), role: CallerRole::Reviewer }
    }

    fn critical_report() -> ScanReport {
        ScanReport {
            findings: vec![ScanFinding {
                skill_id: "a/b".into(),
                content_hash: "h".into(),
                category: FindingCategory::Jailbreak,
                severity: Severity::Critical,
                confidence: 0.9,
                locator: "l".into(),
                snippet_hash: "s".into(),
            }],
            risk_score: 60.0,
            decision: ScanDecision::Block,
        }
    }

    #[test]
    fn critical_finding_requires_two_approvals() {
        assert_eq!(required_approvals(&critical_report(), 2, 1), 2);
    }

    #[test]
    fn non_critical_requires_one_approval() {
        let report = ScanReport { findings: vec![], risk_score: 10.0, decision: ScanDecision::Review };
        assert_eq!(required_approvals(&report, 2, 1), 1);
    }

    #[test]
    fn public_caller_cannot_assign_reviewer() {
        let mut record = open("a/b", "hash", 1);
        let public = Caller::public();
        assert!(matches!(assign_reviewer(&mut record, &public, "r1"), Err(QuarantineError::PermissionDenied)));
    }

    #[test]
    fn full_approval_flow_reaches_terminal_state() {
        let mut record = open("a/b", "hash", 2);
        assign_reviewer(&mut record, &privileged(), "reviewer-1").unwrap();

        let first = approve(&mut record, &Caller { id: "r1".into(), role: CallerRole::Reviewer });
        assert!(first.is_ok());
        assert_eq!(record.approvals.len(), 1);
        assert_eq!(record.status, QuarantineStatus::UnderReview);

        approve(&mut record, &Caller { id: "r2".into(), role: CallerRole::Reviewer }).unwrap();
        assert_eq!(record.status, QuarantineStatus::Approved);
    }

    #[test]
    fn terminal_states_reject_further_transitions() {
        let mut record = open("a/b", "hash", 1);
        approve(&mut record, &privileged()).unwrap();
        assert!(matches!(
            reject(&mut record, &privileged(), "too late"),
            Err(QuarantineError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn expiry_only_applies_to_non_terminal_records() {
        let mut pending = open("a/b", "hash", 1);
        let past = pending.created_at - chrono::Duration::days(31);
        pending.created_at = past;
        assert!(is_expired(&pending, 30, chrono::Utc::now()));
        assert!(expire(&mut pending).is_some());
        assert_eq!(pending.status, QuarantineStatus::Expired);

        let mut approved = open("a/b", "hash", 1);
        approve(&mut approved, &privileged()).unwrap();
        assert!(expire(&mut approved).is_none());
    }
}
