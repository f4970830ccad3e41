//! Corpus enumeration.

use std::{
  path::{Path, PathBuf},
  time::Instant,
};

use async_trait::async_trait;
use ignore::WalkBuilder;
use tracing::{debug, warn};

use crate::domain::{config::IndexConfig, item::ItemRef};

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
  #[error("Corpus root {0} does not exist or is not a directory")]
  MissingRoot(PathBuf),
  #[error("Corpus enumeration failed: {0}")]
  Walk(String),
}

/// Produces the ordered list of items that make up one run
#[async_trait]
pub trait DocumentSource: Send + Sync {
  async fn list(&self) -> Result<Vec<ItemRef>, SourceError>;
}

/// Walks a directory tree, honouring `.gitignore` and hidden-file rules.
#[derive(Debug, Clone)]
pub struct DirectorySource {
  root: PathBuf,
  extensions: Vec<String>,
}

impl DirectorySource {
  pub fn new(root: impl Into<PathBuf>, extensions: Vec<String>) -> Self {
    let extensions = extensions
      .into_iter()
      .map(|e| e.trim_start_matches('.').to_lowercase())
      .collect();
    Self {
      root: root.into(),
      extensions,
    }
  }

  pub fn from_config(root: impl Into<PathBuf>, config: &IndexConfig) -> Self {
    Self::new(root, config.extensions.clone())
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Matching files under `root`, sorted, plus the number of entries the
  /// walk could not read
  fn scan(root: &Path, extensions: &[String]) -> (Vec<PathBuf>, usize) {
    let walker = WalkBuilder::new(root)
      .hidden(true)
      .git_ignore(true)
      .git_global(true)
      .git_exclude(true)
      .require_git(false)
      .build();

    let mut files = Vec::new();
    let mut unreadable = 0;
    for entry in walker {
      let entry = match entry {
        Ok(entry) => entry,
        Err(e) => {
          warn!(root = %root.display(), error = %e, "Skipping unreadable entry during corpus scan");
          unreadable += 1;
          continue;
        }
      };
      if !entry.file_type().is_some_and(|t| t.is_file()) {
        continue;
      }
      let path = entry.into_path();
      let matches = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)));
      if matches {
        files.push(path);
      }
    }

    files.sort();
    (files, unreadable)
  }
}

#[async_trait]
impl DocumentSource for DirectorySource {
  async fn list(&self) -> Result<Vec<ItemRef>, SourceError> {
    if !self.root.is_dir() {
      return Err(SourceError::MissingRoot(self.root.clone()));
    }

    let start = Instant::now();
    let root = self.root.clone();
    let extensions = self.extensions.clone();
    let (files, unreadable) = tokio::task::spawn_blocking(move || Self::scan(&root, &extensions))
      .await
      .map_err(|e| SourceError::Walk(e.to_string()))?;

    debug!(
      root = %self.root.display(),
      files = files.len(),
      unreadable,
      elapsed_ms = start.elapsed().as_millis(),
      "Corpus enumerated"
    );

    Ok(files.iter().map(|p| ItemRef::from_path(p)).collect())
  }
}
