//! # s3ff-client: signed multipart uploads into object storage
//!
//! `s3ff-client` places a large file directly into an S3-compatible object
//! store while a backend signing service keeps control over which uploads
//! are valid and which field they belong to. The bulk payload never passes
//! through the application server.
//!
//! ## The protocol
//!
//! 1. **Initialize**: the backend authorizes the upload for a field and
//!    returns a signed session with one pre-signed URL per part.
//! 2. **Send**: each part is `PUT` to its URL, one at a time, in order; the
//!    store's `ETag` for every part is kept verbatim.
//! 3. **Commit**: the backend signs a `CompleteMultipartUpload` request for
//!    the collected tags, which is then submitted to the store *without a
//!    `Content-Type` header*.
//! 4. **Finalize**: the backend confirms the object exists and mints the
//!    value to store in the field.
//!
//! ## Quick Start
//!
//! ```no_run
//! use s3ff_client::{ClientConfig, FieldId, FileSource, UploadClient, UploadResult};
//!
//! # #[tokio::main]
//! # async fn main() -> UploadResult<()> {
//! let config = ClientConfig::new("https://example.com/api/s3-upload/");
//! let client = UploadClient::from_config(&config)?
//!     .with_progress(|event: s3ff_client::ProgressEvent| println!("{event:?}"));
//!
//! let file = FileSource::open("video.mp4").await?;
//! let outcome = client.upload_file(&file, &FieldId::from("core.Video.blob")).await?;
//! println!("store {:?} in the field", outcome.reference_value);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │   UploadClient   │  ← sequencing, progress, cancellation
//! ├────────┬─────────┤
//! │Signing │ Object  │  ← collaborators (HTTP, in-memory, custom)
//! │Backend │ Store   │
//! └────────┴─────────┘
//! ```

mod backend;
mod client;
mod config;
mod error;
mod memory;
mod planner;
mod progress;
mod source;
mod store;
mod types;

pub use backend::{HttpSigningBackend, SigningBackend};
pub use client::UploadClient;
pub use config::{ClientConfig, ENV_PREFIX};
pub use error::{RemoteError, UploadError, UploadResult};
pub use memory::{MemoryStorage, RecordedCall};
pub use planner::PartPlanner;
pub use progress::{NoopProgress, ProgressEvent, ProgressSink, UploadPhase};
pub use source::{BytesSource, FileSource, UploadSource};
pub use store::{HttpObjectStore, ObjectStore};
pub use types::{
    ByteStream, CompletionRequest, FieldId, MultipartUploadId, ObjectKey, PartSpec,
    UploadOutcome, UploadSession, UploadSignature, UploadState, UploadStatus, UploadedPart,
};

/// Re-export so callers can cancel without depending on tokio-util directly
pub use tokio_util::sync::CancellationToken;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        ClientConfig, FieldId, FileSource, UploadClient, UploadError, UploadOutcome,
        UploadResult, UploadSource,
    };
}
