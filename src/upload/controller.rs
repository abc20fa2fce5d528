//! Upload session controller
//!
//! Drives one content item's [`UploadSession`] against a [`PortalBackend`]:
//!
//! - `resume` recovers a running upload or an unattached video on load
//! - `stage` / `start` validate and send a file
//! - `poll_progress` follows the portal until it reports 100%
//! - `fetch_new_reference` waits out the sentinel for the new video reference
//! - `cancel` and `update_metadata` run alongside
//!
//! # Example
//!
//! ```no_run
//! use knolx_uploadr::config::Config;
//! use knolx_uploadr::portal::PortalClient;
//! use knolx_uploadr::upload::{UploadController, VideoMetadata};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::for_portal("https://knolx.example.com", "csrf-token");
//! let client = PortalClient::new(&config.portal)?;
//! let controller = UploadController::new("5a1b2c3d", client, &config);
//!
//! controller.resume().await;
//! controller.stage("talk.mp4").await?;
//! let outcome = controller.run(&VideoMetadata::default()).await?;
//! println!("{:?}", outcome);
//! # Ok(())
//! # }
//! ```

use super::events::{Notice, SessionEvent};
use super::poll::{PollChain, PollPolicy};
use super::session::{
    normalize_percent, ActionState, Phase, SessionSnapshot, UploadSession, LEAVE_WARNING,
};
use super::staging::{FileConstraints, StagedFile};
use super::{UploadError, VideoMetadata};
use crate::config::Config;
use crate::metrics;
use crate::portal::PortalBackend;
use parking_lot::Mutex;
use std::path::Path;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Capacity of the event channel; slow observers skip ahead
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Workflow tuning, usually derived from [`Config`]
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub constraints: FileConstraints,
    pub progress_policy: PollPolicy,
    pub reference_policy: PollPolicy,
    pub reference_sentinel: String,
    pub embed_url_prefix: String,
    /// Reset to `Cancelled` even when the portal rejects a cancel
    pub optimistic_cancel: bool,
}

impl ControllerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            constraints: FileConstraints::from_config(&config.upload),
            progress_policy: PollPolicy::from(&config.upload.progress_poll),
            reference_policy: PollPolicy::from(&config.upload.reference_poll),
            reference_sentinel: config.upload.reference_sentinel.clone(),
            embed_url_prefix: config.upload.embed_url_prefix.clone(),
            optimistic_cancel: config.cancel.optimistic_reset,
        }
    }
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self::from_config(&Config::for_portal("http://localhost", ""))
    }
}

/// What `resume` found on the portal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// An upload is running; the session is now `Uploading`
    UploadInProgress,
    /// A finished upload was never attached
    PendingReference(String),
    Nothing,
}

/// How the upload request itself ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// The portal accepted the file; follow it with `poll_progress`
    Accepted,
    /// A cancel dropped the request before the portal answered
    Dropped,
}

/// How a progress chain ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Completed,
    Cancelled,
}

/// How a full upload run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { reference: String },
    Cancelled,
}

/// Result of a cancel request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// No upload was running; no request was sent
    NothingToCancel,
    Cancelled { acknowledged: bool },
}

/// Coordinates one content item's upload workflow
pub struct UploadController<B: PortalBackend> {
    backend: B,
    session: Mutex<UploadSession>,
    started_at: Mutex<Option<Instant>>,
    events: broadcast::Sender<SessionEvent>,
    options: ControllerOptions,
}

impl<B: PortalBackend> UploadController<B> {
    /// Create a controller for `item_id` configured from `config`
    pub fn new(item_id: impl Into<String>, backend: B, config: &Config) -> Self {
        Self::with_options(item_id, backend, ControllerOptions::from_config(config))
    }

    pub fn with_options(
        item_id: impl Into<String>,
        backend: B,
        options: ControllerOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            backend,
            session: Mutex::new(UploadSession::new(item_id)),
            started_at: Mutex::new(None),
            events,
            options,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Receive every event emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.lock().snapshot()
    }

    pub fn phase(&self) -> Phase {
        self.session.lock().phase()
    }

    pub fn actions(&self) -> ActionState {
        self.session.lock().actions()
    }

    pub fn navigation_guard_active(&self) -> bool {
        self.session.lock().navigation_guard_active()
    }

    /// Confirmation text to show before leaving, while the guard is up
    pub fn leave_warning(&self) -> Option<&'static str> {
        self.navigation_guard_active().then_some(LEAVE_WARNING)
    }

    fn item_id(&self) -> String {
        self.session.lock().item_id().to_string()
    }

    fn emit(&self, event: SessionEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    fn notify(&self, notice: Notice) {
        tracing::info!(notice = %notice, "Session notice");
        self.emit(SessionEvent::Notice { notice });
    }

    /// Apply `f` to the session, emitting a phase change if one happened
    fn transition<T>(&self, f: impl FnOnce(&mut UploadSession) -> T) -> T {
        let (from, to, value) = {
            let mut session = self.session.lock();
            let from = session.phase();
            let value = f(&mut session);
            (from, session.phase(), value)
        };
        if from != to {
            tracing::debug!(%from, %to, "Phase changed");
            self.emit(SessionEvent::PhaseChanged { from, to });
        }
        value
    }

    /// Claim `chain` for the caller until the returned guard drops
    fn claim_chain(&self, chain: PollChain) -> Result<ChainGuard<'_>, UploadError> {
        self.session.lock().begin_poll(chain)?;
        Ok(ChainGuard {
            session: &self.session,
            chain,
        })
    }

    /// Recover state on load.
    ///
    /// A running upload moves the session to `Uploading` (the caller then
    /// polls without re-sending a file); otherwise an unattached reference
    /// is surfaced without touching the phase. Query failures are logged
    /// and read as "nothing found".
    #[tracing::instrument(name = "upload.resume", skip(self))]
    pub async fn resume(&self) -> ResumeOutcome {
        let item_id = self.item_id();

        let (uploading, pending) = tokio::join!(
            self.backend.is_uploading(&item_id),
            self.backend.pending_reference(&item_id)
        );

        let uploading = uploading.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Could not check for a running upload");
            false
        });

        if uploading {
            if self.transition(UploadSession::resume_uploading) {
                *self.started_at.lock() = Some(Instant::now());
                tracing::info!("Resuming upload already in progress");
            }
            return ResumeOutcome::UploadInProgress;
        }

        match pending {
            Ok(Some(reference)) => {
                self.session.lock().set_pending_video_url(reference.clone());
                self.notify(Notice::PendingVideoFound);
                ResumeOutcome::PendingReference(reference)
            }
            Ok(None) => ResumeOutcome::Nothing,
            Err(e) => {
                tracing::warn!(error = %e, "Could not check for a pending video");
                ResumeOutcome::Nothing
            }
        }
    }

    /// Validate and stage a file, replacing any previously staged one
    pub async fn stage(&self, path: impl AsRef<Path>) -> Result<StagedFile, UploadError> {
        let file = StagedFile::from_path(path, &self.options.constraints).await?;
        self.stage_file(file.clone())?;
        Ok(file)
    }

    /// Stage an already validated file
    pub fn stage_file(&self, file: StagedFile) -> Result<(), UploadError> {
        let evicted = self.transition(|session| session.stage(file))?;
        if let Some(previous) = evicted {
            self.notify(Notice::FileReplaced {
                previous: previous.file_name,
            });
        }
        Ok(())
    }

    /// Send the staged file with `metadata`.
    ///
    /// Returns [`StartOutcome::Accepted`] once the portal accepted the
    /// request; the session stays `Uploading` until `poll_progress` sees
    /// 100%. Cancelling while the body is still streaming drops the request
    /// and returns [`StartOutcome::Dropped`].
    #[tracing::instrument(name = "upload.start", skip(self, metadata))]
    pub async fn start(&self, metadata: &VideoMetadata) -> Result<StartOutcome, UploadError> {
        let episode = match self.transition(UploadSession::begin_upload) {
            Ok(episode) => episode,
            Err(UploadError::NoFileStaged) => {
                self.notify(Notice::NoFileAdded);
                return Err(UploadError::NoFileStaged);
            }
            Err(e) => return Err(e),
        };

        *self.started_at.lock() = Some(Instant::now());
        metrics::record_upload("started");

        let item_id = self.item_id();
        let result = tokio::select! {
            result = self.backend.upload(&item_id, &episode.file, metadata) => Some(result),
            _ = episode.token.cancelled() => None,
        };

        match result {
            Some(Ok(())) => {
                self.session.lock().upload_accepted(episode.id);
                metrics::record_upload_accepted(episode.file.size_bytes);
                Ok(StartOutcome::Accepted)
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Upload request failed");
                self.transition(|session| session.upload_failed(episode.id));
                metrics::record_upload("failed");
                Err(UploadError::UploadFailed(e))
            }
            None => {
                tracing::info!("Upload request dropped after cancel");
                let phase = self.transition(|session| {
                    session.upload_dropped(episode.id);
                    session.phase()
                });
                if phase == Phase::Failed {
                    metrics::record_upload("failed");
                    self.notify(Notice::UploadAborted);
                }
                Ok(StartOutcome::Dropped)
            }
        }
    }

    /// Follow the portal's progress report until 100% or cancellation.
    ///
    /// Requests are strictly sequential and only one progress chain runs at
    /// a time; a second caller gets [`UploadError::AlreadyPolling`]. A failed
    /// request or an exhausted poll policy marks the session as stalled and
    /// returns [`UploadError::PollStalled`]; the session stays `Uploading`
    /// so the caller can retry or cancel.
    #[tracing::instrument(name = "upload.poll_progress", skip(self))]
    pub async fn poll_progress(&self) -> Result<PollOutcome, UploadError> {
        let (item_id, token) = {
            let mut session = self.session.lock();
            let token = session.cancel_token();
            if token.is_cancelled() {
                return Ok(PollOutcome::Cancelled);
            }
            if session.phase() != Phase::Uploading {
                return Err(UploadError::InvalidPhase(session.phase()));
            }
            session.begin_poll(PollChain::Progress)?;
            session.clear_stall();
            (session.item_id().to_string(), token)
        };
        let _chain = ChainGuard {
            session: &self.session,
            chain: PollChain::Progress,
        };

        let mut budget = self.options.progress_policy.budget();
        loop {
            if token.is_cancelled() || self.phase() != Phase::Uploading {
                return Ok(PollOutcome::Cancelled);
            }

            if let Err(limit) = budget.next_attempt() {
                return Err(self.stall("progress", limit.to_string()));
            }

            let report = self.backend.progress(&item_id).await;
            metrics::record_poll("progress", report.is_ok());

            let raw = match report {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(error = %e, attempt = budget.attempts(), "Progress request failed");
                    return Err(self.stall("progress", e.to_string()));
                }
            };

            // A response that raced a cancel is not applied
            if token.is_cancelled() {
                return Ok(PollOutcome::Cancelled);
            }

            let recorded = self.session.lock().record_progress(normalize_percent(raw));
            let Some(percent) = recorded else {
                return Ok(PollOutcome::Cancelled);
            };
            self.emit(SessionEvent::Progress { percent });

            if percent >= 100 {
                self.transition(UploadSession::complete)?;
                let started = self.started_at.lock().take();
                if let Some(started) = started {
                    metrics::record_upload_duration(started.elapsed().as_secs_f64());
                }
                metrics::record_upload("completed");
                self.notify(Notice::UploadSucceeded);
                return Ok(PollOutcome::Completed);
            }

            budget.pause(&token).await;
        }
    }

    fn stall(&self, chain: &str, reason: String) -> UploadError {
        self.session.lock().mark_stalled(reason.clone());
        metrics::record_poll_stall(chain);
        self.emit(SessionEvent::Stalled {
            reason: reason.clone(),
        });
        UploadError::PollStalled(reason)
    }

    /// Poll for the reference of the video produced by a completed upload.
    ///
    /// The sentinel answer means the portal is still finalizing and is
    /// retried; the first other non-empty answer becomes the pending video.
    #[tracing::instrument(name = "upload.fetch_new_reference", skip(self))]
    pub async fn fetch_new_reference(&self) -> Result<String, UploadError> {
        let _chain = self.claim_chain(PollChain::Reference)?;
        let item_id = self.item_id();
        let never_cancelled = CancellationToken::new();
        let mut budget = self.options.reference_policy.budget();

        loop {
            if let Err(limit) = budget.next_attempt() {
                metrics::record_poll_stall("reference");
                return Err(UploadError::ReferenceUnavailable(limit.to_string()));
            }

            let answer = self.backend.new_reference(&item_id).await;
            metrics::record_poll("reference", answer.is_ok());

            match answer {
                Ok(reference)
                    if reference.is_empty() || reference == self.options.reference_sentinel =>
                {
                    tracing::debug!(attempt = budget.attempts(), "New video reference not ready");
                }
                Ok(reference) => {
                    self.session.lock().set_pending_video_url(reference.clone());
                    self.emit(SessionEvent::ReferenceReady {
                        reference: reference.clone(),
                    });
                    tracing::info!(reference = %reference, "New video reference available");
                    return Ok(reference);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Could not fetch the new video reference");
                    metrics::record_poll_stall("reference");
                    return Err(UploadError::ReferenceUnavailable(e.to_string()));
                }
            }

            budget.pause(&never_cancelled).await;
        }
    }

    /// Start, follow and finalize one upload
    pub async fn run(&self, metadata: &VideoMetadata) -> Result<RunOutcome, UploadError> {
        match self.start(metadata).await? {
            StartOutcome::Accepted => self.follow().await,
            StartOutcome::Dropped => Ok(RunOutcome::Cancelled),
        }
    }

    /// Poll an upload that is already `Uploading` to its end
    pub async fn follow(&self) -> Result<RunOutcome, UploadError> {
        match self.poll_progress().await? {
            PollOutcome::Completed => {
                let reference = self.fetch_new_reference().await?;
                Ok(RunOutcome::Completed { reference })
            }
            PollOutcome::Cancelled => Ok(RunOutcome::Cancelled),
        }
    }

    /// Cancel the running upload.
    ///
    /// Outside `Uploading` this only surfaces a notice. Otherwise the cancel
    /// request is sent and, with the default optimistic reset, the session
    /// returns to a stageable `Cancelled` state whatever the portal answers.
    /// Without it a refusal keeps the upload running, unless its request was
    /// already dropped, in which case the session fails.
    #[tracing::instrument(name = "upload.cancel", skip(self))]
    pub async fn cancel(&self) -> Result<CancelOutcome, UploadError> {
        if self.transition(UploadSession::begin_cancel).is_err() {
            self.notify(Notice::NothingToCancel);
            return Ok(CancelOutcome::NothingToCancel);
        }

        let item_id = self.item_id();
        let result = self.backend.cancel(&item_id).await;
        metrics::record_cancel(result.is_ok());

        match result {
            Ok(()) => {
                self.transition(UploadSession::finish_cancel);
                metrics::record_upload("cancelled");
                self.notify(Notice::UploadCancelled);
                Ok(CancelOutcome::Cancelled { acknowledged: true })
            }
            Err(e) if self.options.optimistic_cancel => {
                tracing::warn!(error = %e, "Portal did not acknowledge cancel; resetting anyway");
                self.transition(UploadSession::finish_cancel);
                metrics::record_upload("cancelled");
                self.notify(Notice::CancelNotAcknowledged);
                Ok(CancelOutcome::Cancelled {
                    acknowledged: false,
                })
            }
            Err(e) => {
                if self.transition(UploadSession::reject_cancel) == Phase::Failed {
                    tracing::warn!(error = %e, "Portal rejected cancel after the upload request was dropped");
                    metrics::record_upload("failed");
                    self.notify(Notice::UploadAborted);
                } else {
                    tracing::warn!(error = %e, "Portal rejected cancel; upload continues");
                }
                Err(UploadError::CancelFailed(e))
            }
        }
    }

    /// Persist title, description, tags, category and status for the item
    #[tracing::instrument(name = "upload.update_metadata", skip(self, metadata))]
    pub async fn update_metadata(&self, metadata: &VideoMetadata) -> Result<(), UploadError> {
        let item_id = self.item_id();
        let result = self.backend.update_metadata(&item_id, metadata).await;
        metrics::record_metadata_update(result.is_ok());

        match result {
            Ok(()) => {
                self.notify(Notice::MetadataUpdated);
                Ok(())
            }
            Err(e) => {
                self.notify(Notice::MetadataUpdateFailed);
                Err(UploadError::UpdateFailed(e))
            }
        }
    }

    /// Embeddable URL for the pending video, clearing it from the session
    pub fn attach_pending_video(&self) -> Option<String> {
        let reference = self.session.lock().take_pending_video_url()?;
        Some(format!("{}{}", self.options.embed_url_prefix, reference))
    }
}

/// Clears a polling chain's running flag however the chain ends
struct ChainGuard<'a> {
    session: &'a Mutex<UploadSession>,
    chain: PollChain,
}

impl Drop for ChainGuard<'_> {
    fn drop(&mut self) {
        self.session.lock().end_poll(self.chain);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portal::PortalError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Scripted in-memory portal
    #[derive(Default)]
    struct FakePortal {
        uploading: bool,
        pending: Option<String>,
        upload_fails: bool,
        cancel_fails: bool,
        upload_delay: Duration,
        progress_delay: Duration,
        progress: Mutex<VecDeque<Result<f64, ()>>>,
        references: Mutex<VecDeque<String>>,
        upload_calls: AtomicUsize,
        progress_calls: AtomicUsize,
        reference_calls: AtomicUsize,
        cancel_calls: AtomicUsize,
    }

    impl FakePortal {
        fn with_progress(values: &[f64]) -> Self {
            Self {
                progress: Mutex::new(values.iter().map(|v| Ok(*v)).collect()),
                ..Default::default()
            }
        }

        fn with_references(self, values: &[&str]) -> Self {
            *self.references.lock() = values.iter().map(|v| v.to_string()).collect();
            self
        }
    }

    fn failure() -> PortalError {
        PortalError::Status {
            status: 500,
            body: "boom".into(),
        }
    }

    #[async_trait]
    impl PortalBackend for FakePortal {
        async fn upload(
            &self,
            _item_id: &str,
            _file: &StagedFile,
            _metadata: &VideoMetadata,
        ) -> Result<(), PortalError> {
            self.upload_calls.fetch_add(1, Ordering::SeqCst);
            if !self.upload_delay.is_zero() {
                tokio::time::sleep(self.upload_delay).await;
            }
            if self.upload_fails {
                return Err(failure());
            }
            Ok(())
        }

        async fn is_uploading(&self, _item_id: &str) -> Result<bool, PortalError> {
            Ok(self.uploading)
        }

        async fn pending_reference(&self, _item_id: &str) -> Result<Option<String>, PortalError> {
            Ok(self.pending.clone())
        }

        async fn progress(&self, _item_id: &str) -> Result<f64, PortalError> {
            self.progress_calls.fetch_add(1, Ordering::SeqCst);
            if !self.progress_delay.is_zero() {
                tokio::time::sleep(self.progress_delay).await;
            }
            match self.progress.lock().pop_front() {
                Some(Ok(value)) => Ok(value),
                Some(Err(())) => Err(failure()),
                None => Ok(100.0),
            }
        }

        async fn new_reference(&self, _item_id: &str) -> Result<String, PortalError> {
            self.reference_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .references
                .lock()
                .pop_front()
                .unwrap_or_else(|| "ref-default".to_string()))
        }

        async fn cancel(&self, _item_id: &str) -> Result<(), PortalError> {
            self.cancel_calls.fetch_add(1, Ordering::SeqCst);
            if self.cancel_fails {
                return Err(failure());
            }
            Ok(())
        }

        async fn update_metadata(
            &self,
            _item_id: &str,
            _metadata: &VideoMetadata,
        ) -> Result<(), PortalError> {
            Ok(())
        }
    }

    fn staged(name: &str) -> StagedFile {
        StagedFile {
            path: PathBuf::from(format!("/videos/{}", name)),
            file_name: name.to_string(),
            size_bytes: 2048,
        }
    }

    fn controller(portal: FakePortal) -> UploadController<FakePortal> {
        UploadController::with_options("session-1", portal, ControllerOptions::default())
    }

    #[tokio::test]
    async fn test_start_without_file_sends_nothing() {
        let controller = controller(FakePortal::default());
        let mut events = controller.subscribe();

        let result = controller.start(&VideoMetadata::default()).await;

        assert!(matches!(result, Err(UploadError::NoFileStaged)));
        assert_eq!(controller.backend().upload_calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::Notice {
                notice: Notice::NoFileAdded
            }
        );
    }

    #[tokio::test]
    async fn test_full_cycle_with_sentinel() {
        let portal = FakePortal::with_progress(&[10.0, 55.5, 100.0]).with_references(&[
            "No new video URL found",
            "No new video URL found",
            "abc123",
        ]);
        let controller = controller(portal);
        controller.stage_file(staged("talk.mp4")).unwrap();

        let outcome = controller.run(&VideoMetadata::default()).await.unwrap();

        assert_eq!(
            outcome,
            RunOutcome::Completed {
                reference: "abc123".into()
            }
        );
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.phase, Phase::Completed);
        assert_eq!(snapshot.progress_percent, 100);
        assert!(!snapshot.navigation_guard_active);
        assert_eq!(controller.backend().reference_calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            controller.attach_pending_video().as_deref(),
            Some("www.youtube.com/embed/abc123")
        );
        assert!(controller.attach_pending_video().is_none());
    }

    #[tokio::test]
    async fn test_upload_failure_resets_staging() {
        let portal = FakePortal {
            upload_fails: true,
            ..Default::default()
        };
        let controller = controller(portal);
        controller.stage_file(staged("talk.mp4")).unwrap();

        let result = controller.start(&VideoMetadata::default()).await;

        assert!(matches!(result, Err(UploadError::UploadFailed(_))));
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.phase, Phase::Failed);
        assert_eq!(snapshot.staged_file_count, 0);
        assert!(controller.actions().can_stage);
    }

    #[tokio::test]
    async fn test_second_start_rejected() {
        let controller = controller(FakePortal::default());
        controller.stage_file(staged("talk.mp4")).unwrap();
        controller.start(&VideoMetadata::default()).await.unwrap();

        let second = controller.start(&VideoMetadata::default()).await;

        assert!(matches!(second, Err(UploadError::AlreadyUploading)));
        assert_eq!(controller.backend().upload_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_progress_never_decreases() {
        let portal = FakePortal::with_progress(&[30.0, 20.0, 45.0, 100.0]);
        let controller = controller(portal);
        let mut events = controller.subscribe();
        controller.stage_file(staged("talk.mp4")).unwrap();
        controller.start(&VideoMetadata::default()).await.unwrap();

        controller.poll_progress().await.unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let SessionEvent::Progress { percent } = event {
                seen.push(percent);
            }
        }
        assert_eq!(seen, vec![30, 30, 45, 100]);
    }

    #[tokio::test]
    async fn test_poll_error_stalls_but_keeps_uploading() {
        let portal = FakePortal::default();
        *portal.progress.lock() = VecDeque::from(vec![Ok(20.0), Err(())]);
        let controller = controller(portal);
        controller.stage_file(staged("talk.mp4")).unwrap();
        controller.start(&VideoMetadata::default()).await.unwrap();

        let result = controller.poll_progress().await;

        assert!(matches!(result, Err(UploadError::PollStalled(_))));
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.phase, Phase::Uploading);
        assert!(snapshot.poll_stall.is_some());
        assert!(controller.actions().can_cancel);

        // Retry clears the stall and runs to completion
        assert_eq!(controller.poll_progress().await.unwrap(), PollOutcome::Completed);
        assert!(controller.snapshot().poll_stall.is_none());
    }

    #[tokio::test]
    async fn test_poll_policy_exhaustion_stalls() {
        let portal = FakePortal::with_progress(&[1.0, 2.0, 3.0, 4.0]);
        let options = ControllerOptions {
            progress_policy: PollPolicy::unbounded().with_max_attempts(2),
            ..ControllerOptions::default()
        };
        let controller = UploadController::with_options("session-1", portal, options);
        controller.stage_file(staged("talk.mp4")).unwrap();
        controller.start(&VideoMetadata::default()).await.unwrap();

        let result = controller.poll_progress().await;

        assert!(matches!(result, Err(UploadError::PollStalled(_))));
        assert_eq!(controller.backend().progress_calls.load(Ordering::SeqCst), 2);
        assert_eq!(controller.snapshot().progress_percent, 2);
    }

    #[tokio::test]
    async fn test_reference_policy_exhaustion() {
        let portal = FakePortal::default().with_references(&[
            "No new video URL found",
            "No new video URL found",
            "No new video URL found",
        ]);
        let options = ControllerOptions {
            reference_policy: PollPolicy::unbounded().with_max_attempts(3),
            ..ControllerOptions::default()
        };
        let controller = UploadController::with_options("session-1", portal, options);

        let result = controller.fetch_new_reference().await;

        assert!(matches!(result, Err(UploadError::ReferenceUnavailable(_))));
        assert!(controller.snapshot().pending_video_url.is_none());
    }

    #[tokio::test]
    async fn test_cancel_outside_uploading_is_noop() {
        let controller = controller(FakePortal::default());
        let outcome = controller.cancel().await.unwrap();

        assert_eq!(outcome, CancelOutcome::NothingToCancel);
        assert_eq!(controller.backend().cancel_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_failure_still_resets_by_default() {
        let portal = FakePortal {
            cancel_fails: true,
            ..Default::default()
        };
        let controller = controller(portal);
        controller.stage_file(staged("talk.mp4")).unwrap();
        controller.start(&VideoMetadata::default()).await.unwrap();

        let outcome = controller.cancel().await.unwrap();

        assert_eq!(
            outcome,
            CancelOutcome::Cancelled {
                acknowledged: false
            }
        );
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.phase, Phase::Cancelled);
        assert_eq!(snapshot.progress_percent, 0);
        assert!(controller.actions().can_stage);
        assert_eq!(controller.poll_progress().await.unwrap(), PollOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_strict_cancel_failure_keeps_uploading() {
        let portal = FakePortal {
            cancel_fails: true,
            ..Default::default()
        };
        let options = ControllerOptions {
            optimistic_cancel: false,
            ..ControllerOptions::default()
        };
        let controller = UploadController::with_options("session-1", portal, options);
        controller.stage_file(staged("talk.mp4")).unwrap();
        controller.start(&VideoMetadata::default()).await.unwrap();

        let result = controller.cancel().await;

        assert!(matches!(result, Err(UploadError::CancelFailed(_))));
        assert_eq!(controller.phase(), Phase::Uploading);
        assert!(controller.leave_warning().is_some());
        assert_eq!(controller.poll_progress().await.unwrap(), PollOutcome::Completed);
    }

    #[tokio::test]
    async fn test_resume_in_progress() {
        let portal = FakePortal {
            uploading: true,
            ..FakePortal::with_progress(&[80.0, 100.0])
        };
        let controller = controller(portal);

        assert_eq!(controller.resume().await, ResumeOutcome::UploadInProgress);
        assert!(controller.navigation_guard_active());

        let outcome = controller.follow().await.unwrap();
        assert!(matches!(outcome, RunOutcome::Completed { .. }));
        assert_eq!(controller.backend().upload_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_resume_pending_reference_keeps_phase() {
        let portal = FakePortal {
            pending: Some("xyz".into()),
            ..Default::default()
        };
        let controller = controller(portal);

        assert_eq!(
            controller.resume().await,
            ResumeOutcome::PendingReference("xyz".into())
        );
        assert_eq!(controller.phase(), Phase::Idle);
        assert!(controller.actions().can_attach);
    }

    #[tokio::test]
    async fn test_stage_replacement_notice() {
        let controller = controller(FakePortal::default());
        let mut events = controller.subscribe();
        controller.stage_file(staged("a.mp4")).unwrap();
        controller.stage_file(staged("b.mp4")).unwrap();

        let notices: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
            .filter_map(|event| match event {
                SessionEvent::Notice { notice } => Some(notice),
                _ => None,
            })
            .collect();
        assert_eq!(
            notices,
            vec![Notice::FileReplaced {
                previous: "a.mp4".into()
            }]
        );
        assert_eq!(controller.snapshot().staged_file_count, 1);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_poll_interval() {
        let portal = FakePortal::with_progress(&[10.0, 20.0]);
        let options = ControllerOptions {
            progress_policy: PollPolicy::unbounded().with_interval(Duration::from_secs(60)),
            ..ControllerOptions::default()
        };
        let controller = std::sync::Arc::new(UploadController::with_options(
            "session-1",
            portal,
            options,
        ));
        controller.stage_file(staged("talk.mp4")).unwrap();
        controller.start(&VideoMetadata::default()).await.unwrap();

        let poller = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.poll_progress().await })
        };
        while controller.backend().progress_calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        controller.cancel().await.unwrap();

        assert_eq!(poller.await.unwrap().unwrap(), PollOutcome::Cancelled);
        assert_eq!(controller.backend().progress_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_second_progress_chain_rejected() {
        let portal = FakePortal {
            progress_delay: Duration::from_millis(200),
            ..FakePortal::with_progress(&[40.0, 100.0])
        };
        let controller = std::sync::Arc::new(controller(portal));
        controller.stage_file(staged("talk.mp4")).unwrap();
        controller.start(&VideoMetadata::default()).await.unwrap();

        let first = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.poll_progress().await })
        };
        while controller.backend().progress_calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        let second = controller.poll_progress().await;

        assert!(matches!(
            second,
            Err(UploadError::AlreadyPolling(PollChain::Progress))
        ));
        assert_eq!(first.await.unwrap().unwrap(), PollOutcome::Completed);
        assert_eq!(controller.backend().progress_calls.load(Ordering::SeqCst), 2);
        assert!(!controller.session.lock().is_polling(PollChain::Progress));
    }

    #[tokio::test]
    async fn test_second_reference_chain_rejected() {
        let portal = FakePortal::default().with_references(&["No new video URL found", "abc123"]);
        let options = ControllerOptions {
            reference_policy: PollPolicy::unbounded().with_interval(Duration::from_millis(200)),
            ..ControllerOptions::default()
        };
        let controller =
            std::sync::Arc::new(UploadController::with_options("session-1", portal, options));

        let first = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.fetch_new_reference().await })
        };
        while controller.backend().reference_calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        assert!(matches!(
            controller.fetch_new_reference().await,
            Err(UploadError::AlreadyPolling(PollChain::Reference))
        ));
        assert_eq!(first.await.unwrap().unwrap(), "abc123");
        assert_eq!(controller.backend().reference_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stall_releases_progress_chain() {
        let portal = FakePortal::default();
        *portal.progress.lock() = VecDeque::from(vec![Err(())]);
        let controller = controller(portal);
        controller.stage_file(staged("talk.mp4")).unwrap();
        controller.start(&VideoMetadata::default()).await.unwrap();

        assert!(controller.poll_progress().await.is_err());
        assert!(!controller.session.lock().is_polling(PollChain::Progress));
    }

    #[tokio::test]
    async fn test_strict_cancel_rejected_after_dropped_transfer_fails() {
        let portal = FakePortal {
            cancel_fails: true,
            upload_delay: Duration::from_secs(5),
            ..Default::default()
        };
        let options = ControllerOptions {
            optimistic_cancel: false,
            ..ControllerOptions::default()
        };
        let controller =
            std::sync::Arc::new(UploadController::with_options("session-1", portal, options));
        controller.stage_file(staged("talk.mp4")).unwrap();

        let run = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.run(&VideoMetadata::default()).await })
        };
        while controller.backend().upload_calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        let result = controller.cancel().await;
        let outcome = tokio::time::timeout(Duration::from_secs(1), run)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert!(matches!(result, Err(UploadError::CancelFailed(_))));
        assert_eq!(outcome, RunOutcome::Cancelled);
        assert_eq!(controller.phase(), Phase::Failed);
        assert!(controller.leave_warning().is_none());
        assert!(controller.actions().can_stage);
        assert_eq!(controller.backend().progress_calls.load(Ordering::SeqCst), 0);
        assert_eq!(controller.poll_progress().await.unwrap(), PollOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_resume_while_uploading_keeps_token() {
        let portal = FakePortal {
            uploading: true,
            upload_delay: Duration::from_secs(5),
            ..Default::default()
        };
        let controller = std::sync::Arc::new(controller(portal));
        controller.stage_file(staged("talk.mp4")).unwrap();

        let start = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.start(&VideoMetadata::default()).await })
        };
        while controller.backend().upload_calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(controller.resume().await, ResumeOutcome::UploadInProgress);
        controller.cancel().await.unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(1), start)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(outcome, StartOutcome::Dropped);
        assert_eq!(controller.phase(), Phase::Cancelled);
    }
}
