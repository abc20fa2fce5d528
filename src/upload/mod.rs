//! Upload module
//!
//! Client-side state machine for uploading a video to a content item:
//! stage a file, send it, follow the portal's progress until the new video
//! reference is available, with cancel and metadata updates alongside.

use crate::portal::PortalError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod controller;
pub mod events;
pub mod poll;
pub mod session;
pub mod staging;

pub use controller::{
    CancelOutcome, ControllerOptions, PollOutcome, ResumeOutcome, RunOutcome, StartOutcome,
    UploadController,
};
pub use events::{Notice, SessionEvent};
pub use poll::{PollChain, PollPolicy};
pub use session::{ActionState, Episode, Phase, SessionSnapshot, UploadSession};
pub use staging::{FileConstraints, StagedFile};

/// Upload errors
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("No file staged for upload")]
    NoFileStaged,

    #[error("Unsupported file type '{0}'")]
    UnsupportedFileType(String),

    #[error("File too large: {size} bytes exceeds the {limit} byte limit")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("An upload is already in progress")]
    AlreadyUploading,

    #[error("Operation not allowed while {0}")]
    InvalidPhase(Phase),

    #[error("Upload request failed: {0}")]
    UploadFailed(#[source] PortalError),

    #[error("The {0} polling chain is already running")]
    AlreadyPolling(PollChain),

    #[error("Progress polling stalled: {0}")]
    PollStalled(String),

    #[error("New video reference unavailable: {0}")]
    ReferenceUnavailable(String),

    #[error("Cancel request failed: {0}")]
    CancelFailed(#[source] PortalError),

    #[error("Metadata update failed: {0}")]
    UpdateFailed(#[source] PortalError),
}

impl UploadError {
    /// Whether the error is a local validation failure (no request issued)
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            UploadError::NoFileStaged
                | UploadError::UnsupportedFileType(_)
                | UploadError::FileTooLarge { .. }
        )
    }
}

/// Video metadata sent with the upload and by metadata updates
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub status: String,
    pub category: String,
}

impl VideoMetadata {
    /// Split a comma-separated tag list, dropping blank entries.
    ///
    /// Entries are trimmed, unlike the portal's own form which sends each
    /// comma-separated piece verbatim.
    pub fn parse_tags(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(str::to_string)
            .collect()
    }
}
