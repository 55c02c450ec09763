use std::future::Future;
use std::sync::Arc;

use futures_util::TryStreamExt;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::progress::ProgressReporter;
use crate::source::rechunk;
use crate::{
    ByteStream, ClientConfig, FieldId, HttpObjectStore, HttpSigningBackend, NoopProgress,
    ObjectStore, PartSpec, ProgressEvent, ProgressSink, RemoteError, SigningBackend,
    UploadError, UploadOutcome, UploadResult, UploadSession, UploadSource, UploadState,
    UploadedPart,
};

/// Runs the four-phase signed multipart upload:
/// initialize → send parts → commit → finalize.
///
/// Phases run strictly one after another and parts are sent one at a time in
/// the order the backend listed them. Any failure ends the upload; nothing
/// is retried here (retries belong to the transport).
pub struct UploadClient {
    backend: Arc<dyn SigningBackend>,
    store: Arc<dyn ObjectStore>,
    progress: Arc<dyn ProgressSink>,
    chunk_size: Option<usize>,
}

impl UploadClient {
    pub fn new<B, S>(backend: B, store: S) -> Self
    where
        B: SigningBackend + 'static,
        S: ObjectStore + 'static,
    {
        Self {
            backend: Arc::new(backend),
            store: Arc::new(store),
            progress: Arc::new(NoopProgress),
            chunk_size: None,
        }
    }

    /// HTTP backend and store sharing one connection pool
    pub fn from_config(config: &ClientConfig) -> UploadResult<Self> {
        config.validate()?;
        let http = config.http_client()?;
        Ok(Self::new(
            HttpSigningBackend::new(http.clone(), config.clone()),
            HttpObjectStore::new(http),
        )
        .with_chunk_size(config.chunk_size))
    }

    /// Re-chunk part bodies to `bytes`, whatever chunking the source uses.
    ///
    /// This sets the granularity of `sending` progress events.
    pub fn with_chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = Some(bytes.max(1));
        self
    }

    /// Report progress to `sink`
    pub fn with_progress<P: ProgressSink + 'static>(mut self, sink: P) -> Self {
        self.progress = Arc::new(sink);
        self
    }

    /// Ask the backend to authorize an upload of `source` into `field_id`
    #[tracing::instrument(level = "debug", skip_all, fields(field_id = %field_id))]
    pub async fn initialize_upload(
        &self,
        source: &dyn UploadSource,
        field_id: &FieldId,
    ) -> UploadResult<UploadSession> {
        self.progress.on_progress(ProgressEvent::initializing());

        let session = self
            .backend
            .initialize(field_id, source.name(), source.size())
            .await
            .map_err(UploadError::request_rejected)?;

        if session.total_bytes() != source.size() {
            tracing::warn!(
                planned = session.total_bytes(),
                file_size = source.size(),
                "backend part plan does not cover the file exactly"
            );
        }
        tracing::debug!(
            upload_id = %session.upload_id,
            object_key = %session.object_key,
            parts = session.parts.len(),
            "upload session negotiated"
        );
        Ok(session)
    }

    /// Send every part of `source`, serially, in the order given.
    ///
    /// Part `i` covers the bytes after all parts listed before it. Stops at
    /// the first failed part; parts already in the store are left there.
    pub async fn upload_parts(
        &self,
        source: &dyn UploadSource,
        parts: &[PartSpec],
    ) -> UploadResult<Vec<UploadedPart>> {
        self.send_parts(source, parts, &CancellationToken::new())
            .await
    }

    #[tracing::instrument(level = "debug", skip_all, fields(parts = parts.len()))]
    async fn send_parts(
        &self,
        source: &dyn UploadSource,
        parts: &[PartSpec],
        cancel: &CancellationToken,
    ) -> UploadResult<Vec<UploadedPart>> {
        let reporter = Arc::new(ProgressReporter::new(self.progress.clone(), source.size()));
        let mut uploaded = Vec::with_capacity(parts.len());
        let mut offset = 0u64;

        for part in parts {
            if cancel.is_cancelled() {
                return Err(UploadError::Cancelled {
                    state: UploadState::Sending,
                });
            }

            let body = source
                .open_range(offset, part.size)
                .await
                .map_err(|e| {
                    UploadError::part_transfer_failed(part.part_number, RemoteError::transport(e.to_string()))
                })?;
            let body = match self.chunk_size {
                Some(chunk_size) => rechunk(body, chunk_size),
                None => body,
            };
            let body = track_progress(body, reporter.clone(), offset);

            let etag = self
                .store
                .put_part(&part.upload_url, part.size, body)
                .await
                .map_err(|e| UploadError::part_transfer_failed(part.part_number, e))?;

            offset += part.size;
            reporter.sent(offset);
            tracing::debug!(part_number = part.part_number, size = part.size, etag = %etag, "part stored");

            uploaded.push(UploadedPart {
                part_number: part.part_number,
                size: part.size,
                etag,
            });
        }

        Ok(uploaded)
    }

    /// Have the backend sign the completion, then submit it to the store.
    ///
    /// On success the object named by the session's key exists in the store.
    #[tracing::instrument(level = "debug", skip_all, fields(upload_id = %session.upload_id))]
    pub async fn complete_upload(
        &self,
        session: &UploadSession,
        parts: &[UploadedPart],
    ) -> UploadResult<()> {
        let mut ordered = parts.to_vec();
        ordered.sort_by_key(|p| p.part_number);

        let request = self
            .backend
            .complete(&session.upload_signature, &session.upload_id, &ordered)
            .await
            .map_err(UploadError::commit_rejected)?;

        self.store
            .complete_upload(&request)
            .await
            .map_err(UploadError::assembly_rejected)?;

        tracing::debug!(object_key = %session.object_key, "object assembled");
        Ok(())
    }

    /// Ask the backend to confirm the object and mint the field value.
    ///
    /// Fails unless [`complete_upload`](Self::complete_upload) succeeded first.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn finalize(&self, session: &UploadSession) -> UploadResult<String> {
        self.progress.on_progress(ProgressEvent::finalizing());

        self.backend
            .finalize(&session.upload_signature)
            .await
            .map_err(UploadError::finalize_rejected)
    }

    /// Upload `source` into `field_id` end to end
    pub async fn upload_file(
        &self,
        source: &dyn UploadSource,
        field_id: &FieldId,
    ) -> UploadResult<UploadOutcome> {
        self.upload_file_with_cancel(source, field_id, &CancellationToken::new())
            .await
    }

    /// Like [`upload_file`](Self::upload_file), abandoning the upload as soon as
    /// `cancel` fires.
    ///
    /// Cancellation drops the in-flight request and yields an `aborted`
    /// outcome. Parts already stored stay orphaned until the store's
    /// lifecycle rules remove them.
    pub async fn upload_file_with_cancel(
        &self,
        source: &dyn UploadSource,
        field_id: &FieldId,
        cancel: &CancellationToken,
    ) -> UploadResult<UploadOutcome> {
        let span = tracing::info_span!(
            "upload",
            field_id = %field_id,
            file_name = source.name(),
            file_size = source.size()
        );

        match self.run(source, field_id, cancel).instrument(span).await {
            Ok(value) => Ok(UploadOutcome::successful(value)),
            Err(UploadError::Cancelled { state }) => {
                tracing::info!(?state, "upload aborted");
                Ok(UploadOutcome::aborted())
            }
            Err(err) => Err(err),
        }
    }

    async fn run(
        &self,
        source: &dyn UploadSource,
        field_id: &FieldId,
        cancel: &CancellationToken,
    ) -> UploadResult<String> {
        let mut machine = StateMachine::new(cancel);

        let session = machine
            .step(UploadState::Initializing, self.initialize_upload(source, field_id))
            .await?;
        let parts = machine
            .step(UploadState::Sending, self.send_parts(source, &session.parts, cancel))
            .await?;
        machine
            .step(UploadState::Committing, self.complete_upload(&session, &parts))
            .await?;
        let value = machine
            .step(UploadState::Finalizing, self.finalize(&session))
            .await?;

        machine.transition(UploadState::Successful);
        tracing::info!(object_key = %session.object_key, "upload finished");
        Ok(value)
    }
}

/// Report `offset + bytes pulled so far` as the transport consumes the body
fn track_progress(body: ByteStream, reporter: Arc<ProgressReporter>, offset: u64) -> ByteStream {
    let mut sent = 0u64;
    Box::pin(body.inspect_ok(move |chunk| {
        sent += chunk.len() as u64;
        reporter.sent(offset + sent);
    }))
}

struct StateMachine<'a> {
    state: UploadState,
    cancel: &'a CancellationToken,
}

impl<'a> StateMachine<'a> {
    fn new(cancel: &'a CancellationToken) -> Self {
        Self {
            state: UploadState::Idle,
            cancel,
        }
    }

    fn transition(&mut self, next: UploadState) {
        tracing::debug!(from = ?self.state, to = ?next, "upload state");
        self.state = next;
    }

    /// Enter `next` and run its phase, unless cancelled first
    async fn step<T, F>(&mut self, next: UploadState, phase: F) -> UploadResult<T>
    where
        F: Future<Output = UploadResult<T>>,
    {
        debug_assert_eq!(self.state.next(), Some(next));
        self.transition(next);

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(UploadError::Cancelled { state: next }),
            result = phase => result,
        };

        match &result {
            Err(UploadError::Cancelled { .. }) => self.transition(UploadState::Aborted),
            Err(err) => {
                tracing::warn!(state = ?next, error = %err, "upload failed");
                self.transition(UploadState::Errored);
            }
            Ok(_) => {}
        }
        result
    }
}
