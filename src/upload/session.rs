//! Upload session state machine
//!
//! `UploadSession` holds the whole client-side state of one content item's
//! upload workflow. Every mutation goes through a guarded transition, so
//! the navigation guard and progress invariants hold by construction:
//!
//! ```text
//!            stage              start               progress == 100
//!   Idle ─────────▶ FileStaged ──────▶ Uploading ───────────────────▶ Completed
//!                       ▲                 │  │
//!                       │   upload error  │  │ cancel
//!                       └──── Failed ◀────┘  ▼
//!                                        Cancelling ──▶ Cancelled
//! ```
//!
//! The session also owns the cancellation token of the current upload
//! episode, so a transition and the token it affects change under one lock.

use super::poll::PollChain;
use super::staging::StagedFile;
use super::UploadError;
use serde::Serialize;
use std::fmt;
use tokio_util::sync::CancellationToken;

/// Text shown when the user tries to leave while an upload is running
pub const LEAVE_WARNING: &str = "The file upload is still going on. If you leave the page now \
your upload will be cancelled. Are you sure you want to leave the page?";

/// Discrete state of the upload workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    FileStaged,
    Uploading,
    Cancelling,
    Cancelled,
    Completed,
    Failed,
}

impl Phase {
    /// An upload is in flight or being torn down
    pub fn is_active(self) -> bool {
        matches!(self, Phase::Uploading | Phase::Cancelling)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::FileStaged => "file_staged",
            Phase::Uploading => "uploading",
            Phase::Cancelling => "cancelling",
            Phase::Cancelled => "cancelled",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Which user actions are currently enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActionState {
    pub can_stage: bool,
    pub can_start: bool,
    pub can_update: bool,
    pub can_cancel: bool,
    pub show_progress: bool,
    pub can_attach: bool,
}

/// Point-in-time copy of the session for observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub item_id: String,
    pub phase: Phase,
    pub staged_file_count: usize,
    pub staged_file_name: Option<String>,
    pub progress_percent: u8,
    pub pending_video_url: Option<String>,
    pub navigation_guard_active: bool,
    pub poll_stall: Option<String>,
}

/// One upload attempt handed to the sender
#[derive(Debug, Clone)]
pub struct Episode {
    pub id: u64,
    pub file: StagedFile,
    pub token: CancellationToken,
}

/// Client-side state of one content item's upload workflow
#[derive(Debug, Clone)]
pub struct UploadSession {
    item_id: String,
    phase: Phase,
    staged: Option<StagedFile>,
    progress_percent: u8,
    pending_video_url: Option<String>,
    poll_stall: Option<String>,
    busy: bool,
    episode: u64,
    cancel_token: CancellationToken,
    transfer_dropped: bool,
    progress_polling: bool,
    reference_polling: bool,
}

impl UploadSession {
    pub fn new(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            phase: Phase::Idle,
            staged: None,
            progress_percent: 0,
            pending_video_url: None,
            poll_stall: None,
            busy: false,
            episode: 0,
            cancel_token: CancellationToken::new(),
            transfer_dropped: false,
            progress_polling: false,
            reference_polling: false,
        }
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn staged_file(&self) -> Option<&StagedFile> {
        self.staged.as_ref()
    }

    pub fn staged_file_count(&self) -> usize {
        usize::from(self.staged.is_some())
    }

    pub fn progress_percent(&self) -> u8 {
        self.progress_percent
    }

    pub fn pending_video_url(&self) -> Option<&str> {
        self.pending_video_url.as_deref()
    }

    pub fn poll_stall(&self) -> Option<&str> {
        self.poll_stall.as_deref()
    }

    /// True exactly while an upload is in flight
    pub fn navigation_guard_active(&self) -> bool {
        self.phase == Phase::Uploading
    }

    /// True while the upload request itself has not resolved
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Token of the current episode; cancelled once a cancel begins
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    fn new_episode(&mut self) -> u64 {
        self.episode += 1;
        self.cancel_token = CancellationToken::new();
        self.transfer_dropped = false;
        self.episode
    }

    /// Stage `file`, returning the file it replaced (last one wins)
    pub fn stage(&mut self, file: StagedFile) -> Result<Option<StagedFile>, UploadError> {
        if self.phase.is_active() {
            return Err(UploadError::InvalidPhase(self.phase));
        }
        let evicted = self.staged.replace(file);
        self.phase = Phase::FileStaged;
        Ok(evicted)
    }

    /// Enter `Uploading` for a fresh episode, returning what to send
    pub fn begin_upload(&mut self) -> Result<Episode, UploadError> {
        if self.busy || self.phase.is_active() {
            return Err(UploadError::AlreadyUploading);
        }
        let file = self.staged.clone().ok_or(UploadError::NoFileStaged)?;
        let id = self.new_episode();
        self.phase = Phase::Uploading;
        self.busy = true;
        self.progress_percent = 0;
        self.poll_stall = None;
        Ok(Episode {
            id,
            file,
            token: self.cancel_token.clone(),
        })
    }

    /// The portal accepted episode `id`'s upload request
    pub fn upload_accepted(&mut self, id: u64) {
        if id == self.episode {
            self.busy = false;
        }
    }

    /// Episode `id`'s upload request failed; the staged file is dropped so
    /// the user restages
    pub fn upload_failed(&mut self, id: u64) {
        if id != self.episode {
            return;
        }
        self.busy = false;
        match self.phase {
            Phase::Uploading => self.fail(),
            Phase::Cancelling => {
                self.staged = None;
                self.transfer_dropped = true;
            }
            _ => self.staged = None,
        }
    }

    /// Episode `id`'s upload request was dropped on cancel.
    ///
    /// While the cancel is still pending this is only recorded. If a
    /// rejected cancel already put the session back to `Uploading`, there
    /// is no transfer left to follow and the session fails.
    pub fn upload_dropped(&mut self, id: u64) {
        if id != self.episode {
            return;
        }
        self.busy = false;
        match self.phase {
            Phase::Cancelling => self.transfer_dropped = true,
            Phase::Uploading => self.fail(),
            _ => {}
        }
    }

    fn fail(&mut self) {
        self.phase = Phase::Failed;
        self.progress_percent = 0;
        self.staged = None;
        self.busy = false;
        self.poll_stall = None;
        self.transfer_dropped = false;
    }

    /// Adopt an upload the portal reports as already running.
    ///
    /// Returns false when the session was already `Uploading`; its episode
    /// and token are then left alone.
    pub fn resume_uploading(&mut self) -> bool {
        if self.phase == Phase::Uploading {
            return false;
        }
        self.new_episode();
        self.phase = Phase::Uploading;
        self.progress_percent = 0;
        self.poll_stall = None;
        true
    }

    /// Apply a progress report, returning the effective percentage.
    ///
    /// Ignored outside `Uploading`; never lowers the current value.
    pub fn record_progress(&mut self, percent: u8) -> Option<u8> {
        if self.phase != Phase::Uploading {
            return None;
        }
        self.progress_percent = self.progress_percent.max(percent.min(100));
        Some(self.progress_percent)
    }

    /// `Uploading → Completed`
    pub fn complete(&mut self) -> Result<(), UploadError> {
        if self.phase != Phase::Uploading {
            return Err(UploadError::InvalidPhase(self.phase));
        }
        self.phase = Phase::Completed;
        self.progress_percent = 100;
        self.staged = None;
        self.busy = false;
        self.poll_stall = None;
        Ok(())
    }

    pub fn mark_stalled(&mut self, reason: impl Into<String>) {
        self.poll_stall = Some(reason.into());
    }

    pub fn clear_stall(&mut self) {
        self.poll_stall = None;
    }

    /// `Uploading → Cancelling`, cancelling the episode's token
    pub fn begin_cancel(&mut self) -> Result<(), UploadError> {
        if self.phase != Phase::Uploading {
            return Err(UploadError::InvalidPhase(self.phase));
        }
        self.phase = Phase::Cancelling;
        self.cancel_token.cancel();
        Ok(())
    }

    /// `Cancelling → Cancelled`, back to a stageable state
    pub fn finish_cancel(&mut self) {
        self.phase = Phase::Cancelled;
        self.progress_percent = 0;
        self.staged = None;
        self.busy = false;
        self.poll_stall = None;
        self.transfer_dropped = false;
    }

    /// The portal refused the cancel, returning the resulting phase.
    ///
    /// `Cancelling → Uploading` with a fresh token when the transfer is
    /// still alive, `Cancelling → Failed` when its request was dropped.
    pub fn reject_cancel(&mut self) -> Phase {
        if self.phase == Phase::Cancelling {
            if self.transfer_dropped {
                self.fail();
            } else {
                self.cancel_token = CancellationToken::new();
                self.phase = Phase::Uploading;
            }
        }
        self.phase
    }

    /// Mark `chain` as running, rejecting a second concurrent chain
    pub fn begin_poll(&mut self, chain: PollChain) -> Result<(), UploadError> {
        let running = match chain {
            PollChain::Progress => &mut self.progress_polling,
            PollChain::Reference => &mut self.reference_polling,
        };
        if *running {
            return Err(UploadError::AlreadyPolling(chain));
        }
        *running = true;
        Ok(())
    }

    pub fn end_poll(&mut self, chain: PollChain) {
        match chain {
            PollChain::Progress => self.progress_polling = false,
            PollChain::Reference => self.reference_polling = false,
        }
    }

    pub fn is_polling(&self, chain: PollChain) -> bool {
        match chain {
            PollChain::Progress => self.progress_polling,
            PollChain::Reference => self.reference_polling,
        }
    }

    pub fn set_pending_video_url(&mut self, reference: impl Into<String>) {
        self.pending_video_url = Some(reference.into());
    }

    /// Hand the pending reference over for attachment, clearing it
    pub fn take_pending_video_url(&mut self) -> Option<String> {
        self.pending_video_url.take()
    }

    pub fn actions(&self) -> ActionState {
        let can_stage = !self.phase.is_active();
        ActionState {
            can_stage,
            can_start: can_stage && !self.busy && self.staged.is_some(),
            can_update: can_stage,
            can_cancel: self.phase == Phase::Uploading,
            show_progress: self.phase.is_active(),
            can_attach: self.pending_video_url.is_some(),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            item_id: self.item_id.clone(),
            phase: self.phase,
            staged_file_count: self.staged_file_count(),
            staged_file_name: self.staged.as_ref().map(|file| file.file_name.clone()),
            progress_percent: self.progress_percent,
            pending_video_url: self.pending_video_url.clone(),
            navigation_guard_active: self.navigation_guard_active(),
            poll_stall: self.poll_stall.clone(),
        }
    }
}

/// Normalize a raw progress report to an integer percentage
pub fn normalize_percent(raw: f64) -> u8 {
    if raw.is_nan() || raw <= 0.0 {
        return 0;
    }
    raw.ceil().min(100.0) as u8
}
