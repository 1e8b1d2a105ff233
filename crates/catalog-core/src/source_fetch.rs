//! Fetch collaborators for the Indexer (C7): given a [`Source`], list its
//! candidate bundle items in stable order and read their raw bytes.
//!
//! Two backends mirror the two non-local [`SourceKind`] families the store
//! persists: a git-backed fetcher for `git-host-org`/`git-host-repo`
//! sources (cloning with `git2`, the same crate the corpus vendors for
//! static linking), and a filesystem walker (`walkdir`, also already a
//! corpus dependency) for `local-fs` sources. `registry` and
//! `webhook-ingest` sources are expected to push bundles through
//! `index_local` rather than being pulled, so no fetcher is required for
//! them here.

use crate::errors::SyncError;
use crate::model::{Source, SourceKind};
use async_trait::async_trait;
use git2::Repository;
use std::path::{Path, PathBuf};

/// Lists and reads bundle items for a configured source. Items are
/// identified relative to the source root so `(source_id, item_id)`
/// together form a stable key the Indexer can diff against
/// `Source.last_sync_cursor`.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Candidate item identifiers, already sorted lexicographically per
    /// the Indexer's stable-ordering requirement.
    async fn list_items(&self, source: &Source) -> Result<Vec<String>, SyncError>;

    /// Raw bytes of one item.
    async fn fetch_item(&self, source: &Source, item_id: &str) -> Result<Vec<u8>, SyncError>;
}

fn is_bundle_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("md")
}

/// Walks a local directory tree for `.md` bundle files. `source.identifier`
/// is the root directory.
pub struct LocalFsFetcher;

#[async_trait]
impl SourceFetcher for LocalFsFetcher {
    async fn list_items(&self, source: &Source) -> Result<Vec<String>, SyncError> {
        let root = PathBuf::from(&source.identifier);
        let mut items: Vec<String> = walkdir::WalkDir::new(&root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_bundle_file(e.path()))
            .filter_map(|e| e.path().strip_prefix(&root).ok().map(|p| p.to_string_lossy().into_owned()))
            .collect();
        items.sort();
        Ok(items)
    }

    async fn fetch_item(&self, source: &Source, item_id: &str) -> Result<Vec<u8>, SyncError> {
        let path = PathBuf::from(&source.identifier).join(item_id);
        std::fs::read(&path).map_err(|e| SyncError::FetchFailed {
            source: source.id.clone(),
            item: item_id.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Clones (or reuses a cached clone of) a git host org/repo and walks it
/// for `.md` bundle files. `source.identifier` is a `git2`-cloneable URL.
pub struct GitSourceFetcher {
    cache_root: PathBuf,
}

impl GitSourceFetcher {
    pub fn new(cache_root: PathBuf) -> Self {
        Self { cache_root }
    }

    fn repo_dir(&self, source: &Source) -> PathBuf {
        self.cache_root.join(sanitize(&source.id))
    }

    fn ensure_cloned(&self, source: &Source) -> Result<Repository, SyncError> {
        let dir = self.repo_dir(source);
        let unavailable = |e: git2::Error| SyncError::SourceUnavailable(format!("{}: {e}", source.id));

        if dir.join(".git").exists() {
            let repo = Repository::open(&dir).map_err(unavailable)?;
            let mut remote = repo.find_remote("origin").map_err(unavailable)?;
            remote.fetch(&["refs/heads/*:refs/remotes/origin/*"], None, None).map_err(unavailable)?;
            Ok(repo)
        } else {
            std::fs::create_dir_all(&dir).map_err(|e| SyncError::SourceUnavailable(e.to_string()))?;
            Repository::clone(&source.identifier, &dir).map_err(unavailable)
        }
    }
}

#[async_trait]
impl SourceFetcher for GitSourceFetcher {
    async fn list_items(&self, source: &Source) -> Result<Vec<String>, SyncError> {
        let repo = self.ensure_cloned(source)?;
        let root = repo.workdir().ok_or_else(|| SyncError::SourceUnavailable(source.id.clone()))?.to_path_buf();
        let mut items: Vec<String> = walkdir::WalkDir::new(&root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_bundle_file(e.path()) && !e.path().components().any(|c| c.as_os_str() == ".git"))
            .filter_map(|e| e.path().strip_prefix(&root).ok().map(|p| p.to_string_lossy().into_owned()))
            .collect();
        items.sort();
        Ok(items)
    }

    async fn fetch_item(&self, source: &Source, item_id: &str) -> Result<Vec<u8>, SyncError> {
        let dir = self.repo_dir(source);
        std::fs::read(dir.join(item_id)).map_err(|e| SyncError::FetchFailed {
            source: source.id.clone(),
            item: item_id.to_string(),
            reason: e.to_string(),
        })
    }
}

fn sanitize(id: &str) -> String {
    id.chars().map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' }).collect()
}

/// Picks the fetcher appropriate to a source's kind. `registry` and
/// `webhook-ingest` sources have no pull-side fetcher; callers route
/// those through `index_local` instead.
pub fn fetcher_for(kind: SourceKind, git_cache_root: &Path) -> Option<Box<dyn SourceFetcher>> {
    match kind {
        SourceKind::LocalFs => Some(Box::new(LocalFsFetcher)),
        SourceKind::GitHostOrg | SourceKind::GitHostRepo => Some(Box::new(GitSourceFetcher::new(git_cache_root.to_path_buf()))),
        SourceKind::Registry | SourceKind::WebhookIngest => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TrustTier;

    fn local_source(dir: &Path) -> Source {
        Source {
            id: "local-1".into(),
            kind: SourceKind::LocalFs,
            identifier: dir.to_string_lossy().into_owned(),
            verified: false,
            default_trust: TrustTier::Local,
            last_sync_cursor: None,
            last_sync_at: None,
            consecutive_failures: 0,
            degraded: false,
        }
    }

    #[tokio::test]
    async fn local_fetcher_lists_md_files_in_sorted_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.md"), b"---\nname: b\ndescription: d\n---\nbody").unwrap();
        std::fs::write(dir.path().join("a.md"), b"---\nname: a\ndescription: d\n---\nbody").unwrap();
        std::fs::write(dir.path().join("ignore.txt"), b"not a bundle").unwrap();

        let fetcher = LocalFsFetcher;
        let source = local_source(dir.path());
        let items = fetcher.list_items(&source).await.unwrap();
        assert_eq!(items, vec!["a.md".to_string(), "b.md".to_string()]);
    }

    #[tokio::test]
    async fn local_fetcher_reads_item_bytes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), b"hello").unwrap();
        let fetcher = LocalFsFetcher;
        let source = local_source(dir.path());
        let bytes = fetcher.fetch_item(&source, "a.md").await.unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[test]
    fn fetcher_for_registry_and_webhook_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(fetcher_for(SourceKind::Registry, tmp.path()).is_none());
        assert!(fetcher_for(SourceKind::WebhookIngest, tmp.path()).is_none());
        assert!(fetcher_for(SourceKind::LocalFs, tmp.path()).is_some());
    }
}
