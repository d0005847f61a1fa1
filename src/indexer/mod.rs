use crate::db::GraphStore;
use crate::error::{Error, Result};
use crate::model::{IndexReport, IndexedFile};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

pub mod batch;
pub mod builtins;
pub mod parse;
pub mod python;
pub mod scan;

pub struct Indexer {
    repo_root: PathBuf,
    store: Arc<GraphStore>,
    scan_options: scan::ScanOptions,
}

impl Indexer {
    pub fn new(repo_root: PathBuf, store: Arc<GraphStore>) -> Self {
        Self::new_with_options(repo_root, store, scan::ScanOptions::default())
    }

    pub fn new_with_options(
        repo_root: PathBuf,
        store: Arc<GraphStore>,
        scan_options: scan::ScanOptions,
    ) -> Self {
        let repo_root = std::fs::canonicalize(&repo_root).unwrap_or(repo_root);
        Self {
            repo_root,
            store,
            scan_options,
        }
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Resolve `path` against the repository root and canonicalize it.
    pub fn resolve_path(&self, path: &Path) -> Result<PathBuf> {
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.repo_root.join(path)
        };
        std::fs::canonicalize(&joined).map_err(|source| Error::Io {
            file: joined,
            source,
        })
    }

    /// Upsert the File node, parse and extract one file.
    pub fn index_file(&self, path: &Path) -> Result<IndexedFile> {
        let abs_path = self.resolve_path(path)?;
        let file = abs_path.display().to_string();
        tracing::debug!(file = %file, "indexing file");
        self.store
            .merge_node(crate::model::NodeKey::File { path: &file }, None)?;
        let parsed = parse::read_and_parse(&abs_path)?;
        python::extract_entities(&self.store, &parsed, &file)
    }

    /// Re-run parse and extraction for one file.
    pub fn extract(&self, path: &Path) -> Result<IndexedFile> {
        let abs_path = self.resolve_path(path)?;
        let file = abs_path.display().to_string();
        let parsed = parse::read_and_parse(&abs_path)?;
        python::extract_entities(&self.store, &parsed, &file)?;
        Ok(IndexedFile::ok(file))
    }

    /// Parse one file without touching the store; returns its named node count.
    pub fn parse(&self, path: &Path) -> Result<usize> {
        let abs_path = self.resolve_path(path)?;
        Ok(parse::read_and_parse(&abs_path)?.node_count())
    }

    /// Ingest every Python file of the repository. Never fails: per-file
    /// problems end up in the report's `skipped` list.
    pub fn index_repository(&self) -> IndexReport {
        let start = Instant::now();
        if !self.repo_root.is_dir() {
            tracing::error!(
                root = %self.repo_root.display(),
                "repository root is not a readable directory"
            );
            return IndexReport::default();
        }
        let files = scan::scan_repo(&self.repo_root, self.scan_options);
        tracing::info!(
            root = %self.repo_root.display(),
            files = files.len(),
            "indexing repository"
        );
        let report = batch::run_batches(&files, |path| self.index_file(path));
        tracing::info!(
            indexed = report.indexed_files,
            skipped = report.skipped.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "repository indexed"
        );
        report
    }
}
