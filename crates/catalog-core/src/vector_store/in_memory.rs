//! In-memory vector store implementation
//!
//! This is the default backend that stores all vectors in memory.
//! Suitable for development, testing, and small-to-medium workloads.
//!
//! # Features
//!
//! - Zero external dependencies
//! - Fast for small datasets (<10k documents)
//! - Thread-safe with RwLock
//! - Supports all filter operations
//! - Cosine, Euclidean, and Dot Product distance metrics
//!
//! # Limitations
//!
//! - All data is lost on process restart (no persistence)
//! - Memory usage grows linearly with documents
//! - O(n) search complexity (no indexing)
//! - Not suitable for >100k documents

use super::{
    cosine_similarity, euclidean_distance, DeleteStats, DistanceMetric, EmbeddedDocument, Filter,
    HealthStatus, SearchResult, UpsertStats, VectorStore,
};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Instant;

/// In-memory vector store implementation
///
/// Stores documents in a HashMap protected by RwLock for thread-safety.
/// Uses brute-force similarity search (suitable for small datasets).
pub struct InMemoryVectorStore {
    /// Document storage: id -> document
    documents: RwLock<HashMap<String, EmbeddedDocument>>,

    /// Distance metric to use for similarity
    distance_metric: DistanceMetric,

    /// Expected vector dimensions (for validation)
    dimensions: Option<usize>,
}

impl InMemoryVectorStore {
    /// Create a new in-memory vector store with default settings
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            distance_metric: DistanceMetric::Cosine,
            dimensions: None,
        }
    }

    /// Create with a specific distance metric
    pub fn with_metric(metric: DistanceMetric) -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            distance_metric: metric,
            dimensions: None,
        }
    }

    /// Create with expected dimensions for validation
    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            distance_metric: DistanceMetric::Cosine,
            dimensions: Some(dimensions),
        }
    }

    /// Create with both metric and dimensions
    pub fn with_config(metric: DistanceMetric, dimensions: usize) -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            distance_metric: metric,
            dimensions: Some(dimensions),
        }
    }

    /// Calculate similarity between two vectors based on configured metric
    fn calculate_similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        match self.distance_metric {
            DistanceMetric::Cosine => cosine_similarity(a, b),
            DistanceMetric::Euclidean => {
                // Convert distance to similarity (0 distance = 1 similarity)
                let dist = euclidean_distance(a, b);
                1.0 / (1.0 + dist)
            }
            DistanceMetric::DotProduct => {
                // Dot product directly (assumes normalized vectors)
                a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
            }
        }
    }

    /// Validate document dimensions
    fn validate_dimensions(&self, embedding: &[f32]) -> Result<()> {
        if let Some(expected) = self.dimensions {
            if embedding.len() != expected {
                anyhow::bail!(
                    "Embedding dimension mismatch: expected {}, got {}",
                    expected,
                    embedding.len()
                );
            }
        }
        Ok(())
    }

    /// Get current document count (sync version for internal use)
    fn document_count(&self) -> usize {
        self.documents.read().unwrap().len()
    }

    /// Clear all documents
    pub fn clear(&self) {
        let mut docs = self.documents.write().unwrap();
        docs.clear();
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, documents: Vec<EmbeddedDocument>) -> Result<UpsertStats> {
        let start = Instant::now();
        let mut inserted = 0;
        let mut updated = 0;

        // Validate all documents first
        for doc in &documents {
            self.validate_dimensions(&doc.embedding)?;
        }

        // Insert/update documents
        let mut store = self.documents.write().unwrap();
        for doc in documents {
            if store.contains_key(&doc.id) {
                updated += 1;
            } else {
                inserted += 1;
            }
            store.insert(doc.id.clone(), doc);
        }

        Ok(UpsertStats::new(inserted, updated, start.elapsed().as_millis() as u64))
    }

    async fn search(
        &self,
        query_embedding: Vec<f32>,
        filter: Option<Filter>,
        top_k: usize,
    ) -> Result<Vec<SearchResult>> {
        self.validate_dimensions(&query_embedding)?;

        let store = self.documents.read().unwrap();

        // Calculate similarity for all documents
        let mut scored: Vec<(f32, &EmbeddedDocument)> = store
            .values()
            .filter(|doc| {
                // Apply metadata filter
                filter
                    .as_ref()
                    .map_or(true, |f| f.matches(&doc.metadata))
            })
            .map(|doc| {
                let score = self.calculate_similarity(&query_embedding, &doc.embedding);
                (score, doc)
            })
            .filter(|(score, _)| {
                // Apply min_score filter
                filter
                    .as_ref()
                    .and_then(|f| f.min_score)
                    .map_or(true, |min| *score >= min)
            })
            .collect();

        // Sort by descending score
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        // Take top_k and convert to SearchResult
        let results: Vec<SearchResult> = scored
            .into_iter()
            .take(top_k)
            .map(|(score, doc)| SearchResult::from_document(doc, score))
            .collect();

        Ok(results)
    }

    async fn delete(&self, ids: Vec<String>) -> Result<DeleteStats> {
        let start = Instant::now();
        let mut deleted = 0;
        let mut not_found = 0;

        let mut store = self.documents.write().unwrap();
        for id in &ids {
            if store.remove(id).is_some() {
                deleted += 1;
            } else {
                not_found += 1;
            }
        }

        Ok(DeleteStats::new(deleted, not_found, start.elapsed().as_millis() as u64))
    }

    async fn get(&self, ids: Vec<String>) -> Result<Vec<EmbeddedDocument>> {
        let store = self.documents.read().unwrap();
        let results: Vec<EmbeddedDocument> = ids
            .iter()
            .filter_map(|id| store.get(id).cloned())
            .collect();
        Ok(results)
    }

    async fn count(&self, filter: Option<Filter>) -> Result<usize> {
        let store = self.documents.read().unwrap();
        let count = match filter {
            Some(f) if !f.is_empty() => store.values().filter(|doc| f.matches(&doc.metadata)).count(),
            _ => store.len(),
        };
        Ok(count)
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        let start = Instant::now();
        let count = self.document_count();
        let latency = start.elapsed().as_millis() as u64;

        Ok(HealthStatus::healthy("in_memory", latency).with_document_count(count))
    }

    fn backend_name(&self) -> &'static str {
        "in_memory"
    }

    fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }
}
