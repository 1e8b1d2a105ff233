//! Trust Classifier (C5): a pure mapping `(source, scan_report) -> trust_tier`.

use crate::model::{ScanDecision, ScanReport, Source, SourceKind, TrustTier};

/// Assigns a trust tier from source provenance and scanner verdict. Pure:
/// no I/O, no clock reads, same inputs always produce the same tier.
pub fn classify(source: &Source, report: &ScanReport) -> TrustTier {
    if report.decision != ScanDecision::Pass {
        return TrustTier::Unknown;
    }

    if source.kind == SourceKind::LocalFs {
        return TrustTier::Local;
    }

    if source.verified {
        return TrustTier::Verified;
    }

    match source.kind {
        SourceKind::Registry => TrustTier::Curated,
        SourceKind::GitHostRepo => TrustTier::Community,
        SourceKind::GitHostOrg | SourceKind::WebhookIngest => TrustTier::Experimental,
        SourceKind::LocalFs => unreachable!("handled above"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ScanDecision, ScanReport};

    fn source(kind: SourceKind, verified: bool) -> Source {
        Source {
            id: "src".into(),
            kind,
            identifier: "example".into(),
            verified,
            default_trust: TrustTier::Unknown,
            last_sync_cursor: None,
            last_sync_at: None,
            consecutive_failures: 0,
            degraded: false,
        }
    }

    fn report(decision: ScanDecision) -> ScanReport {
        ScanReport { findings: vec![], risk_score: 0.0, decision }
    }

    #[test]
    fn local_fs_is_always_local_tier_on_pass() {
        let tier = classify(&source(SourceKind::LocalFs, false), &report(ScanDecision::Pass));
        assert_eq!(tier, TrustTier::Local);
    }

    #[test]
    fn non_pass_decision_is_unknown_regardless_of_source() {
        let tier = classify(&source(SourceKind::Registry, true), &report(ScanDecision::Block));
        assert_eq!(tier, TrustTier::Unknown);
    }

    #[test]
    fn verified_source_with_pass_is_verified() {
        let tier = classify(&source(SourceKind::GitHostOrg, true), &report(ScanDecision::Pass));
        assert_eq!(tier, TrustTier::Verified);
    }

    #[test]
    fn unverified_registry_with_pass_is_curated() {
        let tier = classify(&source(SourceKind::Registry, false), &report(ScanDecision::Pass));
        assert_eq!(tier, TrustTier::Curated);
    }

    #[test]
    fn unverified_git_repo_with_pass_is_community() {
        let tier = classify(&source(SourceKind::GitHostRepo, false), &report(ScanDecision::Pass));
        assert_eq!(tier, TrustTier::Community);
    }

    #[test]
    fn unverified_org_or_webhook_with_pass_is_experimental() {
        assert_eq!(classify(&source(SourceKind::GitHostOrg, false), &report(ScanDecision::Pass)), TrustTier::Experimental);
        assert_eq!(classify(&source(SourceKind::WebhookIngest, false), &report(ScanDecision::Pass)), TrustTier::Experimental);
    }

    #[test]
    fn classification_is_pure() {
        let src = source(SourceKind::Registry, true);
        let rep = report(ScanDecision::Pass);
        assert_eq!(classify(&src, &rep), classify(&src, &rep));
    }
}
