use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{
    ClientConfig, CompletionRequest, FieldId, MultipartUploadId, RemoteError, UploadResult,
    UploadSession, UploadSignature, UploadedPart,
};

/// The backend service that authorizes, certifies and records uploads.
///
/// Implementations only move data; all signing happens server side.
#[async_trait]
pub trait SigningBackend: Send + Sync {
    /// `POST {base}/upload-initialize/`
    async fn initialize(
        &self,
        field_id: &FieldId,
        file_name: &str,
        file_size: u64,
    ) -> Result<UploadSession, RemoteError>;

    /// `POST {base}/upload-complete/`
    async fn complete(
        &self,
        signature: &UploadSignature,
        upload_id: &MultipartUploadId,
        parts: &[UploadedPart],
    ) -> Result<CompletionRequest, RemoteError>;

    /// `POST {base}/finalize/`, returning the field value
    async fn finalize(&self, signature: &UploadSignature) -> Result<String, RemoteError>;
}

#[derive(Debug, Serialize)]
struct InitializeBody<'a> {
    field_id: &'a FieldId,
    file_name: &'a str,
    file_size: u64,
}

#[derive(Debug, Serialize)]
struct CompleteBody<'a> {
    upload_signature: &'a UploadSignature,
    upload_id: &'a MultipartUploadId,
    parts: &'a [UploadedPart],
}

#[derive(Debug, Serialize)]
struct FinalizeBody<'a> {
    upload_signature: &'a UploadSignature,
}

#[derive(Debug, Deserialize)]
struct FinalizeResponse {
    field_value: String,
}

/// [`SigningBackend`] speaking JSON over HTTP
#[derive(Debug, Clone)]
pub struct HttpSigningBackend {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpSigningBackend {
    pub fn new(client: reqwest::Client, config: ClientConfig) -> Self {
        Self { client, config }
    }

    pub fn from_config(config: ClientConfig) -> UploadResult<Self> {
        config.validate()?;
        let client = config.http_client()?;
        Ok(Self::new(client, config))
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, RemoteError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let url = self.config.endpoint(path);
        let mut request = self.client.post(&url).json(body);
        if let Some(token) = &self.config.auth_token {
            request = request.bearer_auth(token);
        }

        tracing::debug!(url = %url, "backend request");
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RemoteError::status(status.as_u16(), text));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| RemoteError::transport(format!("malformed response from {url}: {e}")))
    }
}

#[async_trait]
impl SigningBackend for HttpSigningBackend {
    async fn initialize(
        &self,
        field_id: &FieldId,
        file_name: &str,
        file_size: u64,
    ) -> Result<UploadSession, RemoteError> {
        let body = InitializeBody {
            field_id,
            file_name,
            file_size,
        };
        self.post("upload-initialize", &body).await
    }

    async fn complete(
        &self,
        signature: &UploadSignature,
        upload_id: &MultipartUploadId,
        parts: &[UploadedPart],
    ) -> Result<CompletionRequest, RemoteError> {
        let body = CompleteBody {
            upload_signature: signature,
            upload_id,
            parts,
        };
        self.post("upload-complete", &body).await
    }

    async fn finalize(&self, signature: &UploadSignature) -> Result<String, RemoteError> {
        let body = FinalizeBody {
            upload_signature: signature,
        };
        let response: FinalizeResponse = self.post("finalize", &body).await?;
        Ok(response.field_value)
    }
}
