//! Observable effects of the upload workflow
//!
//! The controller broadcasts a `SessionEvent` for every visible change so a
//! front end (the CLI progress bar, a test) can project it without polling
//! the session.

use super::session::Phase;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    PhaseChanged { from: Phase, to: Phase },
    Progress { percent: u8 },
    Stalled { reason: String },
    ReferenceReady { reference: String },
    Notice { notice: Notice },
}

/// Informational messages surfaced to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Notice {
    NoFileAdded,
    FileReplaced { previous: String },
    NothingToCancel,
    UploadCancelled,
    CancelNotAcknowledged,
    UploadAborted,
    UploadSucceeded,
    PendingVideoFound,
    MetadataUpdated,
    MetadataUpdateFailed,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::NoFileAdded => f.write_str("Please add a video file before uploading"),
            Notice::FileReplaced { previous } => {
                write!(f, "Replaced previously staged file {}", previous)
            }
            Notice::NothingToCancel => f.write_str("There is no upload in progress to cancel"),
            Notice::UploadCancelled => f.write_str("Upload cancelled"),
            Notice::CancelNotAcknowledged => {
                f.write_str("Upload cancelled locally; the portal did not confirm the cancel")
            }
            Notice::UploadAborted => f.write_str(
                "Upload aborted and the portal did not confirm the cancel; please add the file again",
            ),
            Notice::UploadSucceeded => f.write_str("Video uploaded successfully"),
            Notice::PendingVideoFound => {
                f.write_str("A previously uploaded video is ready to be attached")
            }
            Notice::MetadataUpdated => f.write_str("Video details updated"),
            Notice::MetadataUpdateFailed => f.write_str("Video details could not be updated"),
        }
    }
}
