//! Quality Scorer (C4): deterministic, pure scoring of a parsed skill on
//! five weighted dimensions, returning a value in `[0, 100]`.

use crate::parser::ParsedBundle;
use chrono::{DateTime, Utc};

const DOCUMENTATION_WEIGHT: f64 = 0.25;
const IMPLEMENTATION_WEIGHT: f64 = 0.25;
const EXAMPLES_WEIGHT: f64 = 0.20;
const MAINTENANCE_WEIGHT: f64 = 0.15;
const FRESHNESS_WEIGHT: f64 = 0.15;

/// Signals the Quality Scorer needs beyond what the parsed bundle carries:
/// timestamps from the Store row and a coarse notion of source activity.
pub struct QualitySignals {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub source_last_activity: Option<DateTime<Utc>>,
}

/// Score a parsed skill on the five weighted dimensions described in the
/// component design. Deterministic and pure: same inputs, same score.
pub fn score(parsed: &ParsedBundle, signals: &QualitySignals) -> f64 {
    let documentation = documentation_score(parsed);
    let implementation = implementation_depth_score(parsed);
    let examples = examples_score(parsed);
    let maintenance = maintenance_score(signals);
    let freshness = freshness_score(signals);

    let total = documentation * DOCUMENTATION_WEIGHT
        + implementation * IMPLEMENTATION_WEIGHT
        + examples * EXAMPLES_WEIGHT
        + maintenance * MAINTENANCE_WEIGHT
        + freshness * FRESHNESS_WEIGHT;

    total.clamp(0.0, 100.0)
}

/// Presence and length of description, plus sub-doc links found in the body.
fn documentation_score(parsed: &ParsedBundle) -> f64 {
    let description_score = (parsed.description.len() as f64 / 200.0).min(1.0) * 60.0;
    let link_count = parsed.body.matches("](").count().min(5) as f64;
    let link_score = link_count / 5.0 * 40.0;
    description_score + link_score
}

/// Body length bucketed, as a stand-in for "presence of scripts/resources" —
/// a longer body correlates with more implementation substance, saturating
/// so pathologically long bodies don't dominate the score.
fn implementation_depth_score(parsed: &ParsedBundle) -> f64 {
    let len = parsed.body.len() as f64;
    (len / 3000.0 * 100.0).min(100.0)
}

/// Fenced code blocks and distinct languages used.
fn examples_score(parsed: &ParsedBundle) -> f64 {
    let mut languages = std::collections::HashSet::new();
    let mut count = 0usize;
    let mut in_fence = false;

    for line in parsed.body.lines() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("```") {
            if !in_fence {
                in_fence = true;
                count += 1;
                if !rest.is_empty() {
                    languages.insert(rest.to_string());
                }
            } else {
                in_fence = false;
            }
        }
    }

    let count_score = (count as f64 / 5.0).min(1.0) * 70.0;
    let lang_score = (languages.len() as f64 / 3.0).min(1.0) * 30.0;
    count_score + lang_score
}

/// `updated_at` recency relative to the source's own last activity: a skill
/// kept in step with its source scores higher than one that has drifted.
fn maintenance_score(signals: &QualitySignals) -> f64 {
    let Some(source_activity) = signals.source_last_activity else {
        return 50.0;
    };
    let drift_days = (source_activity - signals.updated_at).num_days().abs() as f64;
    (100.0 - drift_days).clamp(0.0, 100.0)
}

/// Age since `created_at`, inverted and saturating: newer skills score
/// higher, but the penalty flattens out rather than going to zero.
fn freshness_score(signals: &QualitySignals) -> f64 {
    let age_days = (Utc::now() - signals.created_at).num_days().max(0) as f64;
    (100.0 - (age_days / 3.0)).clamp(10.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use chrono::Duration;

    fn signals(created_days_ago: i64, drift_days: i64) -> QualitySignals {
        let now = Utc::now();
        let created_at = now - Duration::days(created_days_ago);
        QualitySignals {
            created_at,
            updated_at: now,
            source_last_activity: Some(now - Duration::days(drift_days)),
        }
    }

    #[test]
    fn richer_bundle_scores_higher_than_sparse_one() {
        let sparse = parse(b"---\nname: a\ndescription: x\n---\nhi").unwrap();
        let rich_body = format!(
            "---\nname: b\ndescription: {}\n---\n{}",
            "a".repeat(200),
            "```rust\nfn main() {}\n```\n".repeat(5)
        );
        let rich = parse(rich_body.as_bytes()).unwrap();

        let signals = signals(1, 0);
        let sparse_score = score(&sparse, &signals);
        let rich_score = score(&rich, &signals);
        assert!(rich_score > sparse_score);
    }

    #[test]
    fn score_stays_within_bounds() {
        let parsed = parse(b"---\nname: a\ndescription: d\n---\nbody").unwrap();
        let s = score(&parsed, &signals(10_000, 10_000));
        assert!((0.0..=100.0).contains(&s));
    }

    #[test]
    fn scoring_is_deterministic() {
        let parsed = parse(b"---\nname: a\ndescription: d\n---\nbody text here").unwrap();
        let signals = signals(5, 2);
        assert_eq!(score(&parsed, &signals), score(&parsed, &signals));
    }
}
