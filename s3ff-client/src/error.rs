use thiserror::Error;

use crate::UploadState;

/// Result type for upload operations
pub type UploadResult<T> = Result<T, UploadError>;

/// A single failed exchange with the signing backend or the object store.
///
/// `status` is the HTTP status when a response was received, `None` for
/// network failures and local read errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}", describe(.status, .message))]
pub struct RemoteError {
    pub status: Option<u16>,
    pub message: String,
}

fn describe(status: &Option<u16>, message: &str) -> String {
    match *status {
        Some(code) if message.is_empty() => format!("HTTP {code}"),
        Some(code) => format!("HTTP {code}: {message}"),
        None => message.to_string(),
    }
}

impl RemoteError {
    /// A non-2xx response
    pub fn status<S: Into<String>>(code: u16, body: S) -> Self {
        Self {
            status: Some(code),
            message: body.into(),
        }
    }

    /// No usable response (connection, timeout, decoding or local read failure)
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        Self {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for RemoteError {
    fn from(err: std::io::Error) -> Self {
        Self::transport(err.to_string())
    }
}

/// Errors that end an upload. None of them are retried by the client.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Upload initialization rejected: {source}")]
    RequestRejected {
        #[source]
        source: RemoteError,
    },

    #[error("Transfer of part {part_number} failed: {source}")]
    PartTransferFailed {
        part_number: u32,
        #[source]
        source: RemoteError,
    },

    #[error("Backend refused to certify uploaded parts: {source}")]
    CommitRejected {
        #[source]
        source: RemoteError,
    },

    #[error("Object store refused to assemble the upload: {source}")]
    AssemblyRejected {
        #[source]
        source: RemoteError,
    },

    #[error("Upload is not complete in the object store: {source}")]
    NotYetComplete {
        #[source]
        source: RemoteError,
    },

    #[error("Upload signature rejected: {source}")]
    InvalidSignature {
        #[source]
        source: RemoteError,
    },

    #[error("Upload cancelled while {state:?}")]
    Cancelled { state: UploadState },

    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl UploadError {
    pub fn request_rejected(source: RemoteError) -> Self {
        Self::RequestRejected { source }
    }

    pub fn part_transfer_failed(part_number: u32, source: RemoteError) -> Self {
        Self::PartTransferFailed {
            part_number,
            source,
        }
    }

    pub fn commit_rejected(source: RemoteError) -> Self {
        Self::CommitRejected { source }
    }

    pub fn assembly_rejected(source: RemoteError) -> Self {
        Self::AssemblyRejected { source }
    }

    /// Classify a failed finalize call.
    ///
    /// Authorization failures (401/403) mean the signature was refused;
    /// anything else means the object could not be confirmed.
    pub fn finalize_rejected(source: RemoteError) -> Self {
        match source.status {
            Some(401) | Some(403) => Self::InvalidSignature { source },
            _ => Self::NotYetComplete { source },
        }
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// The state the upload was in when this error ended it
    pub fn phase(&self) -> UploadState {
        match self {
            Self::RequestRejected { .. } => UploadState::Initializing,
            Self::PartTransferFailed { .. } => UploadState::Sending,
            Self::CommitRejected { .. } | Self::AssemblyRejected { .. } => UploadState::Committing,
            Self::NotYetComplete { .. } | Self::InvalidSignature { .. } => UploadState::Finalizing,
            Self::Cancelled { state } => *state,
            Self::Config { .. } | Self::Io { .. } => UploadState::Idle,
        }
    }

    /// Failing part for `PartTransferFailed`
    pub fn part_number(&self) -> Option<u32> {
        match self {
            Self::PartTransferFailed { part_number, .. } => Some(*part_number),
            _ => None,
        }
    }

    /// The collaborator failure behind a protocol error, if any
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            Self::RequestRejected { source }
            | Self::PartTransferFailed { source, .. }
            | Self::CommitRejected { source }
            | Self::AssemblyRejected { source }
            | Self::NotYetComplete { source }
            | Self::InvalidSignature { source } => Some(source),
            _ => None,
        }
    }
}
