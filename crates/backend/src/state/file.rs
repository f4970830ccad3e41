use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::trace;

use super::{StateError, StateStore};

/// One JSON file per entity under a base directory.
///
/// Writes go to a sibling temp file which is then renamed over the target,
/// so a crash mid-write leaves the previous document intact.
#[derive(Debug, Clone)]
pub struct FileStateStore {
  dir: PathBuf,
}

impl FileStateStore {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  fn path_for(&self, key: &str) -> PathBuf {
    self.dir.join(format!("{}.json", key))
  }
}

fn io_err(key: &str) -> impl FnOnce(std::io::Error) -> StateError + '_ {
  move |source| StateError::Io {
    key: key.to_string(),
    source,
  }
}

/// Make a rename inside `dir` durable
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> std::io::Result<()> {
  tokio::fs::File::open(dir).await?.sync_all().await
}

/// Directories cannot be opened for syncing here; the rename is as durable as it gets
#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> std::io::Result<()> {
  Ok(())
}

#[async_trait]
impl StateStore for FileStateStore {
  async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StateError> {
    let path = self.path_for(key);
    match tokio::fs::read(&path).await {
      Ok(bytes) => Ok(Some(bytes)),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(io_err(key)(e)),
    }
  }

  async fn save(&self, key: &str, bytes: Vec<u8>) -> Result<(), StateError> {
    let path = self.path_for(key);
    if let Some(parent) = path.parent() {
      tokio::fs::create_dir_all(parent).await.map_err(io_err(key))?;
    }

    let tmp = path.with_extension("json.tmp");
    let mut file = tokio::fs::File::create(&tmp).await.map_err(io_err(key))?;
    file.write_all(&bytes).await.map_err(io_err(key))?;
    file.sync_all().await.map_err(io_err(key))?;
    drop(file);

    tokio::fs::rename(&tmp, &path).await.map_err(io_err(key))?;
    if let Some(parent) = path.parent() {
      sync_dir(parent).await.map_err(io_err(key))?;
    }

    trace!(key, bytes = bytes.len(), "State document written");
    Ok(())
  }
}
