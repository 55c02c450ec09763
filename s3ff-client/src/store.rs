use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, ETAG};

use crate::{ByteStream, CompletionRequest, RemoteError, UploadResult};

/// Object store operations reached through backend-signed URLs.
///
/// URLs are opaque capabilities: implementations must use them verbatim and
/// must not add credentials of their own.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload one part, returning the store's content tag verbatim
    async fn put_part(
        &self,
        upload_url: &str,
        size: u64,
        body: ByteStream,
    ) -> Result<String, RemoteError>;

    /// Submit the signed `CompleteMultipartUpload` request exactly as minted.
    ///
    /// The request must carry no `Content-Type` header: the store includes it
    /// in signature validation and rejects the assembly otherwise.
    async fn complete_upload(&self, request: &CompletionRequest) -> Result<(), RemoteError>;
}

/// [`ObjectStore`] over plain HTTP (S3, MinIO and compatible stores)
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    client: reqwest::Client,
}

impl HttpObjectStore {
    /// `client` must not carry a default `Content-Type` header
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn from_config(config: &crate::ClientConfig) -> UploadResult<Self> {
        Ok(Self::new(config.http_client()?))
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put_part(
        &self,
        upload_url: &str,
        size: u64,
        body: ByteStream,
    ) -> Result<String, RemoteError> {
        // Presigned part URLs refuse chunked transfer encoding.
        let response = self
            .client
            .put(upload_url)
            .header(CONTENT_LENGTH, size)
            .body(reqwest::Body::wrap_stream(body))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RemoteError::status(status.as_u16(), text));
        }

        let etag = response
            .headers()
            .get(ETAG)
            .ok_or_else(|| RemoteError::transport("store response has no ETag header"))?;
        etag.to_str()
            .map(str::to_owned)
            .map_err(|_| RemoteError::transport("store returned a non-ASCII ETag"))
    }

    async fn complete_upload(&self, request: &CompletionRequest) -> Result<(), RemoteError> {
        let mut http_request = self
            .client
            .post(&request.complete_url)
            .body(request.body.clone())
            .build()?;
        http_request.headers_mut().remove(CONTENT_TYPE);

        let response = self.client.execute(http_request).await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RemoteError::status(status.as_u16(), text));
        }

        // S3 can report a failed assembly inside a 200 response.
        let text = response.text().await.map_err(|e| {
            RemoteError::transport(format!("assembly response was cut short: {e}"))
        })?;
        if text.contains("<Error>") {
            return Err(RemoteError::status(status.as_u16(), text));
        }
        Ok(())
    }
}
