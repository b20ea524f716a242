//! Directory indexing.
//!
//! Walks a directory tree on a blocking thread, then feeds every matching
//! file through [`KnowledgeStore::add_text`] with the file path as `source`.

use crate::document::{IndexReport, source_metadata};
use crate::store::KnowledgeStore;
use kiln_core::KnowledgeError;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Directory names never descended into.
const SKIPPED_DIRS: &[&str] = &[".git", "target", "node_modules"];

impl KnowledgeStore {
    /// Index every allow-listed file under `path` (or `path` itself when it
    /// names a file).
    ///
    /// Unreadable and non-UTF-8 files are skipped with a warning. Fails with
    /// [`KnowledgeError::NotFound`] when `path` does not exist, leaving the
    /// store unchanged.
    pub async fn index_directory(&self, path: &Path) -> Result<IndexReport, KnowledgeError> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(KnowledgeError::NotFound(path.to_path_buf()));
        }

        let root = path.to_path_buf();
        let extensions = self.extensions.clone();
        let files = tokio::task::spawn_blocking(move || collect_files(&root, &extensions))
            .await
            .map_err(|e| KnowledgeError::Storage(format!("Directory walk failed: {e}")))?;
        debug!(path = %path.display(), files = files.len(), "Collected files to index");

        let mut report = IndexReport::default();
        for file in files {
            let content = match tokio::fs::read_to_string(&file).await {
                Ok(content) => content,
                Err(e) => {
                    warn!(file = %file.display(), error = %e, "Skipping unreadable file");
                    report.files_skipped += 1;
                    continue;
                }
            };

            match self
                .add_text(&content, source_metadata(file.display().to_string()))
                .await
            {
                Ok(added) => {
                    report.files_indexed += 1;
                    report.chunks_added += added.ids.len();
                    report.chunks_skipped += added.skipped;
                }
                Err(e) => {
                    warn!(file = %file.display(), error = %e, "Skipping file: nothing could be stored");
                    report.files_skipped += 1;
                }
            }
        }

        info!(
            path = %path.display(),
            files = report.files_indexed,
            chunks = report.chunks_added,
            skipped = report.files_skipped,
            chunks_skipped = report.chunks_skipped,
            "Indexing complete"
        );
        Ok(report)
    }
}

/// Regular files under `root` with an allow-listed extension, in walk order
/// (sorted by file name within each directory).
pub fn collect_files(root: &Path, extensions: &[String]) -> Vec<PathBuf> {
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || !SKIPPED_DIRS.iter().any(|d| entry.file_name() == *d)
        });

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable directory entry");
                continue;
            }
        };
        if entry.file_type().is_file() && has_allowed_extension(entry.path(), extensions) {
            files.push(entry.into_path());
        }
    }
    files
}

fn has_allowed_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)))
}
