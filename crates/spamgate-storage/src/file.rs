//! File storage abstraction

use async_trait::async_trait;
use spamgate_common::config::StorageConfig;
use spamgate_common::{Error, Result};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Byte store addressed by relative paths
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Write a new file and return its path
    async fn store(&self, path: &str, data: &[u8]) -> Result<String>;

    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Swap in new contents for an existing file.
    /// Readers see either the old or the new contents, never a mix.
    async fn replace(&self, path: &str, data: &[u8]) -> Result<()>;

    async fn size(&self, path: &str) -> Result<u64>;
}

/// Local filesystem storage
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    /// Open the store configured for the service
    pub fn new(config: &StorageConfig) -> Result<Self> {
        Self::from_path(&config.path)
    }

    /// Open a store rooted at `path`, creating the directory if needed
    pub fn from_path(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path).map_err(io_error("create storage directory"))?;
        info!(path = %path.display(), "Initialized local file storage");

        Ok(Self {
            base_path: path.to_path_buf(),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resolve a relative path inside the store. Only plain components are
    /// accepted, so nothing can escape the base directory.
    fn full_path(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        if path.is_empty() || path.starts_with('\\') {
            return Err(Error::Storage(format!("Invalid storage path: {:?}", path)));
        }

        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                Component::ParentDir => {
                    return Err(Error::Storage(format!(
                        "Path traversal rejected: {:?}",
                        path
                    )))
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(Error::Storage(format!(
                        "Absolute path rejected: {:?}",
                        path
                    )))
                }
            }
        }

        Ok(self.base_path.join(relative))
    }

    /// Write `data` to a fresh file next to `target` and rename it into
    /// place. The temporary file is removed on failure.
    async fn write_atomic(target: &Path, data: &[u8]) -> Result<()> {
        let mut tmp_name = target.as_os_str().to_owned();
        tmp_name.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
        let tmp_path = PathBuf::from(tmp_name);

        let written = async {
            let mut file = fs::File::create(&tmp_path).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, target).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(io_error("write file")(e));
        }
        Ok(())
    }
}

/// Map an I/O error to a storage error, keeping not-found distinct
fn io_error(action: &'static str) -> impl Fn(std::io::Error) -> Error {
    move |e| Error::Storage(format!("Failed to {}: {}", action, e))
}

fn not_found_or<'a>(path: &'a str, action: &'static str) -> impl Fn(std::io::Error) -> Error + 'a {
    move |e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound(path.to_string())
        } else {
            io_error(action)(e)
        }
    }
}

#[async_trait]
impl FileStorage for LocalStorage {
    async fn store(&self, path: &str, data: &[u8]) -> Result<String> {
        let full_path = self.full_path(path)?;
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(io_error("create directory"))?;
        }

        Self::write_atomic(&full_path, data).await?;
        debug!(path = %path, size = data.len(), "Stored file");

        Ok(path.to_string())
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(path)?;
        let data = fs::read(&full_path)
            .await
            .map_err(not_found_or(path, "read file"))?;

        debug!(path = %path, size = data.len(), "Read file");
        Ok(data)
    }

    async fn replace(&self, path: &str, data: &[u8]) -> Result<()> {
        let full_path = self.full_path(path)?;
        fs::metadata(&full_path)
            .await
            .map_err(not_found_or(path, "stat file"))?;

        Self::write_atomic(&full_path, data).await?;
        debug!(path = %path, size = data.len(), "Replaced file");

        Ok(())
    }

    async fn size(&self, path: &str) -> Result<u64> {
        let full_path = self.full_path(path)?;
        let metadata = fs::metadata(&full_path)
            .await
            .map_err(not_found_or(path, "stat file"))?;

        Ok(metadata.len())
    }
}
