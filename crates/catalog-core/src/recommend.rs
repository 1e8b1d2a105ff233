//! Recommender (C10): proactively surfaces catalog skills relevant to a
//! caller's codebase rather than waiting for them to search, reusing the
//! Search Service for retrieval and layering overlap suppression and
//! framework-affinity boosting on top.

use crate::errors::Result;
use crate::model::{Caller, CodebaseContext, Skill, TrustTier};
use crate::search::{RankingHint, SearchFilter, SearchService};
use crate::store::Store;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

const CANDIDATE_POOL: usize = 50;
const OVERLAP_THRESHOLD: f32 = 0.6;
const FRAMEWORK_BOOST: f32 = 0.1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationItem {
    pub skill_id: String,
    pub score: f32,
    pub quality_score: f64,
    pub trust_tier: TrustTier,
    pub reason: String,
}

/// A candidate the overlap pass dropped in favor of a higher-ranked
/// near-duplicate, reported rather than silently discarded so a caller can
/// see why a skill it expected is absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilteredItem {
    pub skill_id: String,
    pub reason: String,
}

/// Ranked recommendations plus the overlap-suppressed candidates that
/// didn't make the cut.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RecommendResponse {
    pub items: Vec<RecommendationItem>,
    pub filtered: Vec<FilteredItem>,
}

pub struct Recommender {
    store: Arc<dyn Store>,
    search: Arc<SearchService>,
}

impl Recommender {
    pub fn new(store: Arc<dyn Store>, search: Arc<SearchService>) -> Self {
        Self { store, search }
    }

    pub async fn recommend(&self, context: &CodebaseContext, installed_ids: &[String], limit: usize) -> Result<RecommendResponse> {
        let query = synthesize_query(context);
        if query.trim().is_empty() {
            return Ok(RecommendResponse::default());
        }

        let filter = SearchFilter { security_passed: Some(true), ..SearchFilter::default() };
        let response = self
            .search
            .search(&query, &filter, CANDIDATE_POOL, RankingHint::Default, &Caller::public())
            .await?;

        let installed: HashSet<&str> = installed_ids.iter().map(String::as_str).collect();

        let mut candidates = Vec::new();
        for hit in &response.hits {
            if installed.contains(hit.skill_id.as_str()) {
                continue;
            }
            if let Some(skill) = self.store.get_skill(&hit.skill_id).await? {
                candidates.push((hit.score, skill));
            }
        }

        let boosted = apply_framework_boost(candidates, &context.frameworks);
        let (survivors, filtered) = suppress_overlap(boosted);

        let mut items: Vec<RecommendationItem> = survivors
            .into_iter()
            .map(|(score, skill)| {
                let reason = build_reason(&skill, &context.frameworks);
                RecommendationItem {
                    skill_id: skill.id(),
                    score,
                    quality_score: skill.quality_score,
                    trust_tier: skill.trust_tier,
                    reason,
                }
            })
            .collect();

        items.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        items.truncate(limit);
        Ok(RecommendResponse { items, filtered })
    }
}

fn synthesize_query(context: &CodebaseContext) -> String {
    context
        .languages
        .iter()
        .chain(context.frameworks.iter())
        .chain(context.dependencies.iter())
        .cloned()
        .collect::<Vec<_>>()
        .join(" ")
}

fn apply_framework_boost(candidates: Vec<(f32, Skill)>, frameworks: &[String]) -> Vec<(f32, Skill)> {
    let frameworks: HashSet<String> = frameworks.iter().map(|f| f.to_lowercase()).collect();
    candidates
        .into_iter()
        .map(|(score, skill)| {
            let tags: HashSet<String> = skill.tags.iter().map(|t| t.to_lowercase()).collect();
            if tags.intersection(&frameworks).next().is_some() {
                (score + FRAMEWORK_BOOST, skill)
            } else {
                (score, skill)
            }
        })
        .collect()
}

/// Among skills whose trigger phrases overlap (Jaccard similarity over
/// description words) or whose `(tags, category)` match exactly, keep only
/// the highest-scoring one: surfacing near-duplicate skills for the same
/// trigger wastes the caller's limited recommendation slots. Suppressed
/// candidates are returned alongside the survivors rather than dropped, so
/// a caller can see what was filtered and why.
fn suppress_overlap(mut candidates: Vec<(f32, Skill)>) -> (Vec<(f32, Skill)>, Vec<FilteredItem>) {
    candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut kept: Vec<(f32, Skill)> = Vec::new();
    let mut filtered: Vec<FilteredItem> = Vec::new();
    'candidates: for (score, skill) in candidates {
        let trigger_words = trigger_phrases(&skill);
        for (_, kept_skill) in &kept {
            if exact_overlap(&skill, kept_skill) || jaccard(&trigger_words, &trigger_phrases(kept_skill)) >= OVERLAP_THRESHOLD {
                filtered.push(FilteredItem { skill_id: skill.id(), reason: "trigger-overlap".to_string() });
                continue 'candidates;
            }
        }
        kept.push((score, skill));
    }
    (kept, filtered)
}

fn trigger_phrases(skill: &Skill) -> HashSet<String> {
    skill
        .description
        .to_lowercase()
        .split_whitespace()
        .filter(|w| w.len() > 3)
        .map(str::to_string)
        .collect()
}

fn exact_overlap(a: &Skill, b: &Skill) -> bool {
    a.category == b.category && a.tags == b.tags
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f32;
    let union = a.union(b).count() as f32;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

fn build_reason(skill: &Skill, frameworks: &[String]) -> String {
    let tags: HashSet<String> = skill.tags.iter().map(|t| t.to_lowercase()).collect();
    let matched = frameworks.iter().find(|f| tags.contains(&f.to_lowercase()));
    match matched {
        Some(framework) => format!("matches your {} usage", framework),
        None => format!("high-quality {} skill ({:.0}/100)", skill.category, skill.quality_score),
    }
}
