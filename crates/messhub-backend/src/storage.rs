use async_trait::async_trait;
use reqwest::Method;

use crate::client::RestBackend;
use crate::error::BackendError;

/// Bucketed object storage with public read URLs.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Uploads (or overwrites) `path` in `bucket` and returns the stored key.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Storage`] when the backend rejects the upload.
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, BackendError>;

    /// # Errors
    ///
    /// Returns [`BackendError::InvalidUrl`] if the path cannot form a URL.
    fn public_url(&self, bucket: &str, path: &str) -> Result<String, BackendError>;
}

#[derive(serde::Deserialize)]
struct UploadResponse {
    #[serde(rename = "Key")]
    key: String,
}

#[async_trait]
impl ObjectStorage for RestBackend {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, BackendError> {
        let path = path.trim_start_matches('/');
        let url = self.endpoint(&format!("storage/v1/object/{bucket}/{path}"))?;
        let size = bytes.len();
        let request = self
            .request(Method::POST, url)
            .header("Content-Type", content_type)
            .header("x-upsert", "true")
            .body(bytes);

        let response = match self.send(request, "storage upload").await {
            Ok(response) => response,
            Err(BackendError::Api { status, message, .. }) => {
                return Err(BackendError::Storage(format!(
                    "upload to {bucket}/{path} rejected ({status}): {message}"
                )));
            }
            Err(other) => return Err(other),
        };
        let uploaded: UploadResponse = Self::read_json(response, "storage upload").await?;
        tracing::info!(bucket, path, size, "object uploaded");
        Ok(uploaded.key)
    }

    fn public_url(&self, bucket: &str, path: &str) -> Result<String, BackendError> {
        let path = path.trim_start_matches('/');
        self.endpoint(&format!("storage/v1/object/public/{bucket}/{path}"))
            .map(String::from)
    }
}
