//! Lexical retrieval using Tantivy.
//!
//! Provides BM25 keyword search over `(name, description, tags, body)`
//! fields with per-field boosts, complementing the dense vector search in
//! [`crate::vector_store`].

use anyhow::{Context, Result};
use std::path::PathBuf;
use tantivy::{
    collector::TopDocs,
    doc,
    query::QueryParser,
    schema::{Field, Schema, Value, STORED, TEXT},
    Index, IndexReader, IndexWriter, TantivyDocument,
};

/// Field boosts from the hybrid-search design: name counts three times as
/// much as body text, description and tags twice.
const NAME_BOOST: tantivy::Score = 3.0;
const DESCRIPTION_BOOST: tantivy::Score = 2.0;
const TAGS_BOOST: tantivy::Score = 2.0;
const BODY_BOOST: tantivy::Score = 1.0;

#[derive(Debug, Clone)]
pub struct BM25Config {
    /// Directory for index storage (None = RAM)
    pub index_dir: Option<PathBuf>,
    pub k1: f32,
    pub b: f32,
    pub num_threads: usize,
    pub heap_size: usize,
}

impl Default for BM25Config {
    fn default() -> Self {
        Self {
            index_dir: None,
            k1: 1.2,
            b: 0.75,
            num_threads: 1,
            heap_size: 50_000_000,
        }
    }
}

impl BM25Config {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn persistent(path: impl Into<PathBuf>) -> Self {
        Self { index_dir: Some(path.into()), ..Default::default() }
    }
}

/// A single hit from a lexical search.
#[derive(Debug, Clone)]
pub struct BM25SearchResult {
    /// Skill id (`author/name`)
    pub id: String,
    pub score: f32,
}

/// In-process (or on-disk) lexical index over the skill catalog.
pub struct BM25Index {
    index: Index,
    reader: IndexReader,
    writer: Option<IndexWriter>,
    id_field: Field,
    name_field: Field,
    description_field: Field,
    tags_field: Field,
    body_field: Field,
    config: BM25Config,
}

impl BM25Index {
    pub fn new(config: BM25Config) -> Result<Self> {
        let mut schema_builder = Schema::builder();

        let id_field = schema_builder.add_text_field("id", STORED);
        let name_field = schema_builder.add_text_field("name", TEXT | STORED);
        let description_field = schema_builder.add_text_field("description", TEXT);
        let tags_field = schema_builder.add_text_field("tags", TEXT);
        let body_field = schema_builder.add_text_field("body", TEXT);

        let schema = schema_builder.build();

        let index = if let Some(ref dir) = config.index_dir {
            std::fs::create_dir_all(dir).context("failed to create index directory")?;
            Index::create_in_dir(dir, schema).context("failed to create index in directory")?
        } else {
            Index::create_in_ram(schema)
        };

        let reader = index
            .reader_builder()
            .reload_policy(tantivy::ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .context("failed to create index reader")?;

        let writer = index.writer(config.heap_size).context("failed to create index writer")?;

        Ok(Self { index, reader, writer: Some(writer), id_field, name_field, description_field, tags_field, body_field, config })
    }

    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let index = Index::open_in_dir(&path).context("failed to open index")?;

        let schema = index.schema();
        let id_field = schema.get_field("id").context("missing id field")?;
        let name_field = schema.get_field("name").context("missing name field")?;
        let description_field = schema.get_field("description").context("missing description field")?;
        let tags_field = schema.get_field("tags").context("missing tags field")?;
        let body_field = schema.get_field("body").context("missing body field")?;

        let reader = index
            .reader_builder()
            .reload_policy(tantivy::ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .context("failed to create index reader")?;

        Ok(Self {
            index,
            reader,
            writer: None,
            id_field,
            name_field,
            description_field,
            tags_field,
            body_field,
            config: BM25Config::persistent(&path),
        })
    }

    /// Index one skill. `body` is an excerpt, not the full raw bundle, to
    /// keep the heap footprint bounded for large catalogs.
    pub fn add_document(&mut self, id: &str, name: &str, description: &str, tags: &str, body: &str) -> Result<()> {
        let writer = self.writer.as_mut().context("index not writable")?;

        let doc = doc!(
            self.id_field => id,
            self.name_field => name,
            self.description_field => description,
            self.tags_field => tags,
            self.body_field => body,
        );

        writer.add_document(doc).context("failed to add document")?;
        Ok(())
    }

    pub fn commit(&mut self) -> Result<()> {
        if let Some(ref mut writer) = self.writer {
            writer.commit().context("failed to commit")?;
            self.reader.reload().context("failed to reload reader")?;
        }
        Ok(())
    }

    pub fn clear(&mut self) -> Result<()> {
        if let Some(ref mut writer) = self.writer {
            writer.delete_all_documents().context("failed to clear index")?;
            writer.commit().context("failed to commit clear")?;
            self.reader.reload().context("failed to reload reader")?;
        }
        Ok(())
    }

    /// Search across all four fields with the name/description/tags/body
    /// boosts baked into the query parser.
    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<BM25SearchResult>> {
        let searcher = self.reader.searcher();

        let mut query_parser = QueryParser::for_index(
            &self.index,
            vec![self.name_field, self.description_field, self.tags_field, self.body_field],
        );
        query_parser.set_field_boost(self.name_field, NAME_BOOST);
        query_parser.set_field_boost(self.description_field, DESCRIPTION_BOOST);
        query_parser.set_field_boost(self.tags_field, TAGS_BOOST);
        query_parser.set_field_boost(self.body_field, BODY_BOOST);

        let parsed_query = query_parser.parse_query(query).context("failed to parse query")?;

        let top_docs = searcher.search(&parsed_query, &TopDocs::with_limit(top_k)).context("search failed")?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let retrieved_doc: TantivyDocument = searcher.doc(doc_address).context("failed to retrieve document")?;
            let id = retrieved_doc.get_first(self.id_field).and_then(|v| v.as_str()).unwrap_or("").to_string();
            results.push(BM25SearchResult { id, score });
        }

        Ok(results)
    }

    pub fn document_count(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    pub fn config(&self) -> &BM25Config {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(index: &mut BM25Index) {
        index
            .add_document(
                "alice/commit-formatter",
                "commit-formatter",
                "Formats commit messages nicely",
                "git automation",
                "Use when committing changes to normalize the commit message.",
            )
            .unwrap();
        index
            .add_document(
                "bob/k8s-pods",
                "k8s-pods",
                "List and inspect kubernetes pods",
                "kubernetes devops",
                "Run this to list pods in the current namespace.",
            )
            .unwrap();
        index.commit().unwrap();
    }

    #[test]
    fn create_index_starts_empty() {
        let index = BM25Index::new(BM25Config::in_memory()).unwrap();
        assert_eq!(index.document_count(), 0);
    }

    #[test]
    fn search_finds_matching_skill_by_name() {
        let mut index = BM25Index::new(BM25Config::in_memory()).unwrap();
        sample(&mut index);

        let results = index.search("pods", 10).unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].id, "bob/k8s-pods");
    }

    #[test]
    fn search_finds_matching_skill_by_description() {
        let mut index = BM25Index::new(BM25Config::in_memory()).unwrap();
        sample(&mut index);

        let results = index.search("commit messages", 10).unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].id, "alice/commit-formatter");
    }

    #[test]
    fn clear_removes_all_documents() {
        let mut index = BM25Index::new(BM25Config::in_memory()).unwrap();
        sample(&mut index);
        assert_eq!(index.document_count(), 2);

        index.clear().unwrap();
        assert_eq!(index.document_count(), 0);
    }

    #[test]
    fn search_on_empty_index_returns_nothing() {
        let index = BM25Index::new(BM25Config::in_memory()).unwrap();
        let results = index.search("anything", 10).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn name_field_outranks_body_only_matches() {
        let mut index = BM25Index::new(BM25Config::in_memory()).unwrap();
        index.add_document("a/kubernetes", "kubernetes", "short desc", "", "unrelated body").unwrap();
        index.add_document("b/other", "other", "short desc", "", "mentions kubernetes once in the body").unwrap();
        index.commit().unwrap();

        let results = index.search("kubernetes", 10).unwrap();
        assert_eq!(results[0].id, "a/kubernetes");
    }
}
