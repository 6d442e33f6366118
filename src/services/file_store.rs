// Raw byte access for uploaded files.
//
// Development reads from a local upload directory; other environments read
// from blob storage over HTTP. Callers only ever see a byte buffer.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use crate::api::middleware::AppError;

#[async_trait]
pub trait FileStore: Send + Sync {
    /// Load the bytes stored under `key`
    async fn read(&self, key: &str) -> Result<Vec<u8>, AppError>;

    /// Store `bytes` under `key`
    async fn write(&self, key: &str, bytes: &[u8]) -> Result<(), AppError>;

    fn name(&self) -> &'static str;
}

/// Files under a local root directory
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve `key` below the root, rejecting absolute paths and `..`
    fn resolve(&self, key: &str) -> Result<PathBuf, AppError> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if key.trim().is_empty() || escapes {
            return Err(AppError::Validation(format!("Invalid file path: {}", key)));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn read(&self, key: &str) -> Result<Vec<u8>, AppError> {
        let path = self.resolve(key)?;
        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => AppError::NotFound(format!("File not found: {}", key)),
            _ => AppError::Internal(format!("Failed to read {}: {}", path.display(), e)),
        })
    }

    async fn write(&self, key: &str, bytes: &[u8]) -> Result<(), AppError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::Internal(format!("Failed to create {}: {}", parent.display(), e)))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to write {}: {}", path.display(), e)))
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

/// Objects fetched from an HTTP blob endpoint as `{base_url}/{key}`
pub struct HttpBlobStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBlobStore {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key.trim_start_matches('/'))
    }
}

#[async_trait]
impl FileStore for HttpBlobStore {
    async fn read(&self, key: &str) -> Result<Vec<u8>, AppError> {
        let url = self.object_url(key);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::Connection(format!("Blob storage request failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::NotFound(format!("Blob not found: {}", key)));
        }
        if !status.is_success() {
            return Err(AppError::Connection(format!(
                "Blob storage returned {} for {}",
                status, key
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::Connection(format!("Failed to read blob body: {}", e)))?;
        Ok(bytes.to_vec())
    }

    async fn write(&self, key: &str, bytes: &[u8]) -> Result<(), AppError> {
        let url = self.object_url(key);
        let response = self
            .client
            .put(&url)
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| AppError::Connection(format!("Blob storage request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::Connection(format!(
                "Blob storage returned {} when writing {}",
                response.status(),
                key
            )));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "http-blob"
    }
}
