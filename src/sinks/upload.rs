use std::future::Future;
use std::path::{Component, Path, PathBuf};

use tracing::info;

use crate::error::UploadError;
use crate::provider::Artifact;

/// Publishes a finished artifact under `remote_key`.
///
/// Returns the public URL, or `None` when the uploader does not publish.
pub trait ArtifactUploader: Send + Sync {
    fn upload(
        &self,
        artifact: &Artifact,
        remote_key: &str,
    ) -> impl Future<Output = Result<Option<String>, UploadError>> + Send;
}

/// Keeps artifacts local. Job results carry no URL.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoUpload;

impl ArtifactUploader for NoUpload {
    async fn upload(&self, _artifact: &Artifact, _remote_key: &str) -> Result<Option<String>, UploadError> {
        Ok(None)
    }
}

/// Copies artifacts under a root directory and returns `file://` URLs.
#[derive(Debug, Clone)]
pub struct DirectoryUploader {
    root: PathBuf,
}

impl DirectoryUploader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn target(&self, remote_key: &str) -> Result<PathBuf, UploadError> {
        let key = Path::new(remote_key);
        let clean = !remote_key.is_empty()
            && key
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !clean {
            return Err(UploadError::InvalidKey(remote_key.to_string()));
        }
        Ok(self.root.join(key))
    }
}

impl ArtifactUploader for DirectoryUploader {
    async fn upload(&self, artifact: &Artifact, remote_key: &str) -> Result<Option<String>, UploadError> {
        let target = self.target(remote_key)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, &artifact.data).await?;
        let absolute = tokio::fs::canonicalize(&target).await?;
        let url = format!("file://{}", absolute.display());
        info!(key = remote_key, bytes = artifact.len(), %url, "artifact uploaded");
        Ok(Some(url))
    }
}
