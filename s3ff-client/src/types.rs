use bytes::Bytes;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// Stream of bytes for part bodies
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create from existing string
            pub fn from_string(id: String) -> Self {
                Self(id)
            }

            /// Get the inner string
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id!(
    /// Backend-defined upload destination, e.g. `app.Model.field`
    FieldId
);

string_id!(
    /// Opaque token binding one upload to one field; only the backend can read it
    UploadSignature
);

string_id!(
    /// Destination of the assembled object in the store
    ObjectKey
);

string_id!(
    /// Store-assigned multipart upload identifier
    MultipartUploadId
);

/// One slice of the file, as planned by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartSpec {
    /// 1-based ordinal
    pub part_number: u32,
    pub size: u64,
    /// Pre-signed, single-use destination for this slice
    pub upload_url: String,
}

/// Signed description of a multipart upload, returned by `upload-initialize`.
///
/// Immutable once received and owned by the upload that requested it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSession {
    pub upload_signature: UploadSignature,
    pub object_key: ObjectKey,
    pub upload_id: MultipartUploadId,
    pub parts: Vec<PartSpec>,
}

impl UploadSession {
    /// Sum of all planned part sizes
    pub fn total_bytes(&self) -> u64 {
        self.parts.iter().map(|p| p.size).sum()
    }
}

/// Proof that the store accepted one part
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedPart {
    pub part_number: u32,
    pub size: u64,
    /// Content tag returned by the store, kept verbatim (quotes included)
    pub etag: String,
}

/// Signed `CompleteMultipartUpload` request minted by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub complete_url: String,
    pub body: String,
}

/// Terminal status of an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Aborted,
    Successful,
    Error,
}

/// Result of an end-to-end upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadOutcome {
    /// Durable value to store in the field; absent unless successful
    #[serde(rename = "value")]
    pub reference_value: Option<String>,
    #[serde(rename = "state")]
    pub status: UploadStatus,
}

impl UploadOutcome {
    pub fn successful<S: Into<String>>(reference_value: S) -> Self {
        Self {
            reference_value: Some(reference_value.into()),
            status: UploadStatus::Successful,
        }
    }

    pub fn aborted() -> Self {
        Self {
            reference_value: None,
            status: UploadStatus::Aborted,
        }
    }

    pub fn errored() -> Self {
        Self {
            reference_value: None,
            status: UploadStatus::Error,
        }
    }

    pub fn is_successful(&self) -> bool {
        self.status == UploadStatus::Successful
    }
}

/// States of one upload run.
///
/// Transitions are strictly sequential; any failure jumps to `Errored` and
/// caller cancellation jumps to `Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    Idle,
    Initializing,
    Sending,
    Committing,
    Finalizing,
    Successful,
    Errored,
    Aborted,
}

impl UploadState {
    /// Successor on success; terminal states have none
    pub fn next(self) -> Option<UploadState> {
        match self {
            Self::Idle => Some(Self::Initializing),
            Self::Initializing => Some(Self::Sending),
            Self::Sending => Some(Self::Committing),
            Self::Committing => Some(Self::Finalizing),
            Self::Finalizing => Some(Self::Successful),
            Self::Successful | Self::Errored | Self::Aborted => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.next().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_advance_in_protocol_order() {
        let mut state = UploadState::Idle;
        let mut seen = vec![state];
        while let Some(next) = state.next() {
            seen.push(next);
            state = next;
        }
        assert_eq!(
            seen,
            vec![
                UploadState::Idle,
                UploadState::Initializing,
                UploadState::Sending,
                UploadState::Committing,
                UploadState::Finalizing,
                UploadState::Successful,
            ]
        );
        assert!(UploadState::Errored.is_terminal());
        assert!(UploadState::Aborted.is_terminal());
    }

    #[test]
    fn session_parses_initialize_response() {
        let session: UploadSession = serde_json::from_value(serde_json::json!({
            "upload_signature": "sig",
            "object_key": "uploads/a/file.bin",
            "upload_id": "mpu-1",
            "parts": [
                {"part_number": 1, "size": 3, "upload_url": "https://store/1"},
                {"part_number": 2, "size": 2, "upload_url": "https://store/2"}
            ]
        }))
        .unwrap();

        assert_eq!(session.upload_signature.as_str(), "sig");
        assert_eq!(session.parts.len(), 2);
        assert_eq!(session.total_bytes(), 5);
    }

    #[test]
    fn outcome_uses_external_field_names() {
        let json = serde_json::to_value(UploadOutcome::successful("uploads/a/file.bin")).unwrap();
        assert_eq!(json, serde_json::json!({"value": "uploads/a/file.bin", "state": "successful"}));

        let json = serde_json::to_value(UploadOutcome::aborted()).unwrap();
        assert_eq!(json, serde_json::json!({"value": null, "state": "aborted"}));
    }
}
