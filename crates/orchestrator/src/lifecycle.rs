//! Owner of every generation request's state.
//!
//! Each request lives in a slot: a mutex around the record plus a `watch`
//! channel carrying its status. All transitions happen under the slot lock
//! and are checked against [`RequestStateMachine`]. Engine calls, upload
//! waits and tracker calls run on background drives with the lock released;
//! a drive carries a cancellation token and is bounded by a timeout.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use casegen_core::{
    Artifact, FailureKind, GenerationRequest, OutputFormat, RequestFailure, RequestStatus,
    SubmitRequest, SyncRecord, SyncState, UploadErrorKind, UploadState,
};
use chrono::{DateTime, Utc};
use events::{Event, EventBus};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracker::{IssueBatch, IssueTestCase, IssueTracker};
use uuid::Uuid;

use crate::engine::{GenerationEngine, GenerationInput};
use crate::error::{OrchestratorError, Result};
use crate::resources::DriveGuard;
use crate::state_machine::RequestStateMachine;
use crate::upload::UploadTracker;
use crate::validator::Validator;

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub max_feedback_rounds: u32,
    pub generation_timeout: Duration,
    pub upload_timeout: Duration,
    /// Bound on one format's push into the issue tracker
    pub sync_timeout: Duration,
    /// How long a settled request (and its upload) is kept after its last change
    pub retention: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_feedback_rounds: 3,
            generation_timeout: Duration::from_secs(120),
            upload_timeout: Duration::from_secs(600),
            sync_timeout: Duration::from_secs(300),
            retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl LifecycleConfig {
    pub fn with_max_feedback_rounds(mut self, max: u32) -> Self {
        self.max_feedback_rounds = max;
        self
    }

    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    pub fn with_upload_timeout(mut self, timeout: Duration) -> Self {
        self.upload_timeout = timeout;
        self
    }

    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }
}

struct SlotState {
    request: GenerationRequest,
    /// Token of the drive currently owning the request, if any
    drive: Option<CancellationToken>,
}

struct RequestSlot {
    state: Mutex<SlotState>,
    status: watch::Sender<RequestStatus>,
}

#[derive(Clone)]
pub struct Lifecycle {
    config: LifecycleConfig,
    validator: Validator,
    engine: Arc<dyn GenerationEngine>,
    uploads: UploadTracker,
    tracker: Option<Arc<dyn IssueTracker>>,
    requests: Arc<RwLock<HashMap<Uuid, Arc<RequestSlot>>>>,
    event_bus: Option<EventBus>,
}

impl Lifecycle {
    pub fn new(
        config: LifecycleConfig,
        engine: Arc<dyn GenerationEngine>,
        uploads: UploadTracker,
    ) -> Self {
        Self {
            config,
            validator: Validator::default(),
            engine,
            uploads,
            tracker: None,
            requests: Arc::new(RwLock::new(HashMap::new())),
            event_bus: None,
        }
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_tracker(mut self, tracker: Arc<dyn IssueTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn uploads(&self) -> &UploadTracker {
        &self.uploads
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    // =========================================================================
    // Inbound operations
    // =========================================================================

    /// Create a request and move it out of `Draft`.
    ///
    /// Returns once the request is `Generating` or `AwaitingUpload`, with the
    /// rest of the work running in the background. A submission that fails
    /// validation is kept as `Failed` and the validation error is returned.
    pub async fn submit(&self, submission: SubmitRequest) -> Result<GenerationRequest> {
        // An empty specification is rejected by the validator before tags or
        // the attachment are looked at.
        let tags = if submission.specification_text.trim().is_empty() {
            BTreeSet::new()
        } else {
            let tags = self.validator.parse_tags(&submission.compliance_tags)?;
            if let Some(file_id) = submission.file_ref {
                self.uploads.get(file_id).await?;
            }
            tags
        };

        let mut request = GenerationRequest::new(submission.specification_text, tags)
            .with_formats(submission.formats);
        if let Some(file_id) = submission.file_ref {
            request = request.with_attachment(file_id);
        }

        let id = request.id;
        let (status_tx, _) = watch::channel(request.status);
        let slot = Arc::new(RequestSlot {
            state: Mutex::new(SlotState {
                request,
                drive: None,
            }),
            status: status_tx,
        });

        self.requests.write().await.insert(id, Arc::clone(&slot));
        info!(request_id = %id, "Generation request created");
        self.emit(Event::RequestCreated { request_id: id });

        let mut state = slot.state.lock().await;
        self.transition(&slot, &mut state.request, RequestStatus::Validating)?;

        let verdict = self.validator.validate(
            &state.request.specification_text,
            &state.request.compliance_tags,
            state.request.has_attachment(),
        );
        if let Err(e) = verdict {
            warn!(request_id = %id, reason = %e, "Submission rejected");
            self.settle(
                &slot,
                &mut state,
                RequestStatus::Failed,
                Some(RequestFailure::new(FailureKind::Validation, e.to_string())),
            );
            return Err(e);
        }

        let next = match state.request.attachment_file_id {
            Some(file_id) => {
                let upload = self.uploads.get(file_id).await?;
                if upload.state == UploadState::Succeeded {
                    state.request.attached_document_ref = upload.result_ref;
                    RequestStatus::Generating
                } else {
                    RequestStatus::AwaitingUpload
                }
            }
            None => RequestStatus::Generating,
        };
        self.transition(&slot, &mut state.request, next)?;

        let cancel = CancellationToken::new();
        state.drive = Some(cancel.clone());
        let snapshot = state.request.clone();
        drop(state);

        self.spawn_drive(id, slot, cancel);
        Ok(snapshot)
    }

    pub async fn get(&self, id: Uuid) -> Result<GenerationRequest> {
        let slot = self.slot(id).await?;
        let state = slot.state.lock().await;
        Ok(state.request.clone())
    }

    /// Every request, oldest first.
    pub async fn list(&self) -> Vec<GenerationRequest> {
        let slots: Vec<Arc<RequestSlot>> = self.requests.read().await.values().cloned().collect();

        let mut requests = Vec::with_capacity(slots.len());
        for slot in slots {
            requests.push(slot.state.lock().await.request.clone());
        }
        requests.sort_by_key(|request| request.created_at);
        requests
    }

    /// Resolve once the request is out of every transitional state.
    pub async fn wait_until_settled(&self, id: Uuid) -> Result<GenerationRequest> {
        let slot = self.slot(id).await?;
        let mut rx = slot.status.subscribe();
        rx.wait_for(|status| !status.is_transitional())
            .await
            .map_err(|_| OrchestratorError::RequestNotFound(id))?;
        drop(rx);
        self.get(id).await
    }

    /// `ReadyForReview -> AwaitingFeedback`, guarded by the round limit.
    pub async fn begin_feedback(&self, id: Uuid) -> Result<GenerationRequest> {
        let slot = self.slot(id).await?;
        let mut state = slot.state.lock().await;
        self.open_feedback(&slot, &mut state)?;
        Ok(state.request.clone())
    }

    /// `AwaitingFeedback -> Regenerating` with the given feedback text.
    pub async fn submit_feedback(&self, id: Uuid, feedback: &str) -> Result<GenerationRequest> {
        let feedback = Self::feedback_text(feedback)?;
        let slot = self.slot(id).await?;
        let mut state = slot.state.lock().await;
        let cancel = self.start_regeneration(&slot, &mut state, feedback)?;
        let snapshot = state.request.clone();
        drop(state);

        self.spawn_drive(id, slot, cancel);
        Ok(snapshot)
    }

    /// Request feedback and submit its text in one step under the slot lock.
    pub async fn request_feedback(&self, id: Uuid, feedback: &str) -> Result<GenerationRequest> {
        let feedback = Self::feedback_text(feedback)?;
        let slot = self.slot(id).await?;
        let mut state = slot.state.lock().await;

        if state.request.status != RequestStatus::AwaitingFeedback {
            self.open_feedback(&slot, &mut state)?;
        }
        let cancel = self.start_regeneration(&slot, &mut state, feedback)?;
        let snapshot = state.request.clone();
        drop(state);

        self.spawn_drive(id, slot, cancel);
        Ok(snapshot)
    }

    /// Close a feedback prompt without regenerating. The round is not spent.
    pub async fn withdraw_feedback(&self, id: Uuid) -> Result<GenerationRequest> {
        let slot = self.slot(id).await?;
        let mut state = slot.state.lock().await;

        if state.request.status != RequestStatus::AwaitingFeedback {
            return Err(OrchestratorError::rejected("no feedback prompt is open"));
        }
        self.transition(&slot, &mut state.request, RequestStatus::ReadyForReview)?;
        Ok(state.request.clone())
    }

    /// `ReadyForReview -> Finalized`. Artifacts are frozen from here on.
    pub async fn accept(&self, id: Uuid) -> Result<GenerationRequest> {
        let slot = self.slot(id).await?;
        let mut state = slot.state.lock().await;

        if state.request.artifacts.is_empty() {
            return Err(OrchestratorError::rejected("request has no artifacts"));
        }
        self.transition(&slot, &mut state.request, RequestStatus::Finalized)?;
        info!(
            request_id = %id,
            formats = state.request.artifacts.len(),
            "Request finalized"
        );
        Ok(state.request.clone())
    }

    /// Cancel the in-flight drive and wait for the request to settle:
    /// a regeneration falls back to `ReadyForReview`, anything else fails.
    pub async fn cancel(&self, id: Uuid) -> Result<GenerationRequest> {
        let slot = self.slot(id).await?;
        {
            let mut state = slot.state.lock().await;
            let status = state.request.status;
            if !status.is_transitional() {
                return Err(OrchestratorError::rejected(format!(
                    "nothing to cancel in state {}",
                    status
                )));
            }

            info!(request_id = %id, status = %status, "Cancelling request drive");
            match state.drive.take() {
                Some(token) => token.cancel(),
                None => self.settle_cancelled(&slot, &mut state, status),
            }
        }
        self.wait_until_settled(id).await
    }

    /// Download a finalized artifact.
    pub async fn export(&self, id: Uuid, format: OutputFormat) -> Result<Artifact> {
        let slot = self.slot(id).await?;
        let state = slot.state.lock().await;

        if state.request.status != RequestStatus::Finalized {
            return Err(OrchestratorError::rejected("request not finalized"));
        }
        state
            .request
            .artifacts
            .get(&format)
            .cloned()
            .ok_or_else(|| OrchestratorError::rejected(format!("no {} artifact", format)))
    }

    /// Push one format's test cases into the issue tracker.
    ///
    /// Formats sync independently. A second call for a format whose sync is
    /// still running is rejected; the request's status never changes. Issues
    /// already filed for the format (by an earlier, partly failed push) are
    /// not filed again. The push runs on its own task, so it settles even
    /// when the caller goes away, and is bounded by the sync timeout.
    pub async fn sync(
        &self,
        id: Uuid,
        format: OutputFormat,
        project_key: &str,
    ) -> Result<SyncRecord> {
        let project_key = project_key.trim();
        if project_key.is_empty() {
            return Err(OrchestratorError::Validation(
                "missing project key".to_string(),
            ));
        }

        let tracker = self.tracker.clone().ok_or_else(|| {
            OrchestratorError::Unauthorized("issue tracker is not configured".to_string())
        })?;
        let slot = self.slot(id).await?;

        let (batch, filed) = {
            let mut state = slot.state.lock().await;
            if state.request.status != RequestStatus::Finalized {
                return Err(OrchestratorError::rejected("request not finalized"));
            }
            tracker.ensure_authorized()?;

            let artifact = state.request.artifacts.get(&format).ok_or_else(|| {
                OrchestratorError::rejected(format!("no {} artifact", format))
            })?;
            if state.request.sync_state(format) == SyncState::Syncing {
                return Err(OrchestratorError::rejected("sync already in progress"));
            }

            // Issues are filed in batch order, so recorded keys cover a prefix
            let filed: Vec<String> = state
                .request
                .tracker_sync_state
                .get(&format)
                .map(|record| record.issue_keys.clone())
                .unwrap_or_default();
            let mut batch = Self::issue_batch(project_key, artifact);
            let skip = filed.len().min(batch.test_cases.len());
            batch.test_cases.drain(..skip);

            if batch.test_cases.is_empty() {
                debug!(request_id = %id, format = %format, "Every test case already filed");
                return Ok(self.record_sync(
                    &mut state.request,
                    format,
                    SyncState::Synced,
                    filed,
                    None,
                ));
            }

            self.record_sync(
                &mut state.request,
                format,
                SyncState::Syncing,
                filed.clone(),
                None,
            );
            (batch, filed)
        };

        info!(
            request_id = %id,
            format = %format,
            project = %project_key,
            test_cases = batch.test_cases.len(),
            already_filed = filed.len(),
            "Syncing artifact to tracker"
        );

        let lifecycle = self.clone();
        let push = tokio::spawn(async move {
            let mut guard = DriveGuard::new(id, {
                let lifecycle = lifecycle.clone();
                move |request_id| lifecycle.spawn_abandon_sync(request_id, format)
            });
            let result = lifecycle
                .push_issues(&slot, tracker.as_ref(), format, batch, filed)
                .await;
            guard.mark_completed();
            result
        });

        push.await.map_err(|e| {
            error!(request_id = %id, format = %format, error = %e, "Sync task ended abnormally");
            OrchestratorError::sync_failed(format, "sync interrupted")
        })?
    }

    /// Evict settled requests that have been idle for longer than the
    /// retention window, then drop uploads no remaining request refers to.
    /// Returns the number of evicted requests.
    pub async fn prune(&self) -> usize {
        let now = Utc::now();
        let slots: Vec<(Uuid, Arc<RequestSlot>)> = self
            .requests
            .read()
            .await
            .iter()
            .map(|(id, slot)| (*id, Arc::clone(slot)))
            .collect();

        let mut candidates = Vec::new();
        let mut live_uploads = HashSet::new();
        for (id, slot) in slots {
            let state = slot.state.lock().await;
            if self.is_evictable(&state.request, now) {
                candidates.push((id, Arc::clone(&slot)));
            } else if let Some(file_id) = state.request.attachment_file_id {
                live_uploads.insert(file_id);
            }
        }

        let mut evicted = 0;
        {
            let mut requests = self.requests.write().await;
            for (id, slot) in candidates {
                // Re-checked under the map lock; a busy slot stays for the next sweep
                let still_evictable = match slot.state.try_lock() {
                    Ok(state) => self.is_evictable(&state.request, now),
                    Err(_) => false,
                };
                if still_evictable {
                    requests.remove(&id);
                    evicted += 1;
                } else if let Ok(state) = slot.state.try_lock() {
                    live_uploads.extend(state.request.attachment_file_id);
                }
            }
        }

        let uploads = self
            .uploads
            .prune(self.config.retention, &live_uploads)
            .await;
        if evicted > 0 || uploads > 0 {
            info!(requests = evicted, uploads, "Pruned settled work");
        }
        evicted
    }

    /// Run [`Lifecycle::prune`] every `every` until the runtime shuts down.
    pub fn spawn_pruner(&self, every: Duration) -> JoinHandle<()> {
        let lifecycle = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                lifecycle.prune().await;
            }
        })
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    fn transition(
        &self,
        slot: &RequestSlot,
        request: &mut GenerationRequest,
        to: RequestStatus,
    ) -> Result<()> {
        let from = request.status;
        RequestStateMachine::validate_transition(&from, &to)?;

        request.status = to;
        request.updated_at = Utc::now();

        info!(
            request_id = %request.id,
            from = %from,
            to = %to,
            "Request state transition"
        );
        self.emit(Event::RequestStatusChanged {
            request_id: request.id,
            from_status: from.as_str().to_string(),
            to_status: to.as_str().to_string(),
        });
        slot.status.send_replace(to);
        Ok(())
    }

    /// Move a request out of a drive-owned state and release the drive.
    fn settle(
        &self,
        slot: &RequestSlot,
        state: &mut SlotState,
        to: RequestStatus,
        failure: Option<RequestFailure>,
    ) {
        if let Some(failure) = failure {
            self.emit(Event::Error {
                message: failure.message.clone(),
                context: Some(format!("request {}", state.request.id)),
            });
            state.request.failure = Some(failure);
        }
        if let Err(e) = self.transition(slot, &mut state.request, to) {
            error!(request_id = %state.request.id, error = %e, "Failed to settle request");
        }
        if !to.is_transitional() {
            state.drive = None;
        }
    }

    fn settle_cancelled(&self, slot: &RequestSlot, state: &mut SlotState, from: RequestStatus) {
        match RequestStateMachine::cancelled_status(&from) {
            Some(RequestStatus::Failed) => self.settle(
                slot,
                state,
                RequestStatus::Failed,
                Some(RequestFailure::new(FailureKind::Cancelled, "cancelled by caller")),
            ),
            Some(to) => self.settle(slot, state, to, None),
            None => state.drive = None,
        }
    }

    fn open_feedback(&self, slot: &RequestSlot, state: &mut SlotState) -> Result<()> {
        RequestStateMachine::validate_transition(
            &state.request.status,
            &RequestStatus::AwaitingFeedback,
        )?;

        let max = self.config.max_feedback_rounds;
        if state.request.feedback_rounds_used >= max {
            info!(
                request_id = %state.request.id,
                used = state.request.feedback_rounds_used,
                "Feedback limit reached"
            );
            return Err(OrchestratorError::FeedbackLimitExceeded { max });
        }

        self.transition(slot, &mut state.request, RequestStatus::AwaitingFeedback)
    }

    fn start_regeneration(
        &self,
        slot: &RequestSlot,
        state: &mut SlotState,
        feedback: &str,
    ) -> Result<CancellationToken> {
        RequestStateMachine::validate_transition(
            &state.request.status,
            &RequestStatus::Regenerating,
        )?;

        let max = self.config.max_feedback_rounds;
        if state.request.feedback_rounds_used >= max {
            return Err(OrchestratorError::FeedbackLimitExceeded { max });
        }

        let round = state.request.record_feedback(feedback);
        self.transition(slot, &mut state.request, RequestStatus::Regenerating)?;
        self.emit(Event::FeedbackSubmitted {
            request_id: state.request.id,
            round,
            remaining: max.saturating_sub(round),
        });

        let cancel = CancellationToken::new();
        state.drive = Some(cancel.clone());
        Ok(cancel)
    }

    fn feedback_text(feedback: &str) -> Result<&str> {
        let feedback = feedback.trim();
        if feedback.is_empty() {
            return Err(OrchestratorError::Validation("empty feedback".to_string()));
        }
        Ok(feedback)
    }

    fn record_sync(
        &self,
        request: &mut GenerationRequest,
        format: OutputFormat,
        state: SyncState,
        issue_keys: Vec<String>,
        error: Option<String>,
    ) -> SyncRecord {
        let record = SyncRecord {
            state,
            issue_keys,
            error,
            updated_at: Some(Utc::now()),
        };
        request.tracker_sync_state.insert(format, record.clone());
        request.updated_at = Utc::now();

        self.emit(Event::SyncStatusChanged {
            request_id: request.id,
            format: format.as_str().to_string(),
            state: state.as_str().to_string(),
            issue_keys: record.issue_keys.clone(),
        });
        record
    }

    fn issue_batch(project_key: &str, artifact: &Artifact) -> IssueBatch {
        let test_cases = artifact
            .test_cases
            .iter()
            .map(|case| {
                let mut description = case.description.clone();
                if !case.steps.is_empty() {
                    description.push_str("\n\nSteps:");
                    for (n, step) in case.steps.iter().enumerate() {
                        description.push_str(&format!("\n{}. {}", n + 1, step));
                    }
                }
                if !case.expected_result.is_empty() {
                    description.push_str(&format!("\n\nExpected: {}", case.expected_result));
                }

                IssueTestCase {
                    summary: format!("{} {}", case.id, case.summary),
                    description,
                }
            })
            .collect();

        IssueBatch {
            project_key: project_key.to_string(),
            test_cases,
        }
    }

    // =========================================================================
    // Background drives
    // =========================================================================

    fn spawn_drive(&self, id: Uuid, slot: Arc<RequestSlot>, cancel: CancellationToken) {
        let lifecycle = self.clone();
        let on_abandon = {
            let lifecycle = self.clone();
            move |request_id| lifecycle.spawn_abandon(request_id)
        };

        tokio::spawn(async move {
            let mut guard = DriveGuard::new(id, on_abandon);
            lifecycle.drive(&slot, &cancel).await;
            guard.mark_completed();
        });
    }

    async fn drive(&self, slot: &RequestSlot, cancel: &CancellationToken) {
        let pending_upload = {
            let state = slot.state.lock().await;
            match state.request.status {
                RequestStatus::AwaitingUpload => state.request.attachment_file_id,
                RequestStatus::Generating | RequestStatus::Regenerating => None,
                other => {
                    debug!(request_id = %state.request.id, status = %other, "Nothing to drive");
                    return;
                }
            }
        };

        if let Some(file_id) = pending_upload {
            if !self.await_upload(slot, file_id, cancel).await {
                return;
            }
        }

        self.generate(slot, cancel).await;
    }

    /// Suspend until the attached upload is terminal. Returns whether the
    /// request moved on to `Generating`.
    async fn await_upload(
        &self,
        slot: &RequestSlot,
        file_id: Uuid,
        cancel: &CancellationToken,
    ) -> bool {
        let timeout = self.config.upload_timeout;
        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(OrchestratorError::Cancelled),
            waited = tokio::time::timeout(timeout, self.uploads.wait_terminal(file_id)) => {
                match waited {
                    Ok(result) => result,
                    Err(_) => Err(OrchestratorError::UploadTimeout { secs: timeout.as_secs() }),
                }
            }
        };

        let mut state = slot.state.lock().await;
        if state.request.status != RequestStatus::AwaitingUpload {
            return false;
        }

        match outcome {
            Ok(upload) if upload.state == UploadState::Succeeded => {
                debug!(request_id = %state.request.id, file_id = %file_id, "Attachment ready");
                state.request.attached_document_ref = upload.result_ref;
                self.settle(slot, &mut state, RequestStatus::Generating, None);
                true
            }
            Ok(upload) => {
                let kind = upload.error.unwrap_or(UploadErrorKind::Storage);
                let reason = OrchestratorError::Upload { kind }.to_string();
                self.settle(
                    slot,
                    &mut state,
                    RequestStatus::Failed,
                    Some(RequestFailure::new(FailureKind::Upload, reason)),
                );
                false
            }
            Err(OrchestratorError::Cancelled) => {
                self.settle_cancelled(slot, &mut state, RequestStatus::AwaitingUpload);
                false
            }
            Err(e) => {
                self.settle(
                    slot,
                    &mut state,
                    RequestStatus::Failed,
                    Some(RequestFailure::new(FailureKind::Upload, e.to_string())),
                );
                false
            }
        }
    }

    async fn generate(&self, slot: &RequestSlot, cancel: &CancellationToken) {
        let (phase, input) = {
            let state = slot.state.lock().await;
            let request = &state.request;
            let input = GenerationInput {
                specification_text: request.amended_specification(),
                compliance_tags: request.compliance_tags.clone(),
                attached_document: request.attached_document_ref.clone(),
                formats: request.requested_formats.clone(),
                feedback_round: request.feedback_rounds_used,
            };
            (request.status, input)
        };

        if !matches!(phase, RequestStatus::Generating | RequestStatus::Regenerating) {
            return;
        }

        let started = Instant::now();
        let timeout = self.config.generation_timeout;
        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(OrchestratorError::Cancelled),
            generated = tokio::time::timeout(timeout, self.engine.generate(&input)) => {
                match generated {
                    Ok(Ok(artifacts)) if artifacts.is_empty() => Err(OrchestratorError::Generation(
                        "engine returned no artifacts".to_string(),
                    )),
                    Ok(result) => result,
                    Err(_) => Err(OrchestratorError::GenerationTimeout { secs: timeout.as_secs() }),
                }
            }
        };

        let mut state = slot.state.lock().await;
        if state.request.status != phase {
            warn!(
                request_id = %state.request.id,
                expected = %phase,
                actual = %state.request.status,
                "Discarding generation result for a request that moved on"
            );
            return;
        }

        match outcome {
            Ok(artifacts) => {
                let formats: Vec<String> =
                    artifacts.keys().map(|f| f.as_str().to_string()).collect();
                self.install(slot, &mut state, artifacts);

                info!(
                    request_id = %state.request.id,
                    engine = %self.engine.name(),
                    formats = ?formats,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Artifacts installed"
                );
                self.emit(Event::ArtifactsInstalled {
                    request_id: state.request.id,
                    formats,
                    feedback_round: state.request.feedback_rounds_used,
                });
            }
            Err(OrchestratorError::Cancelled) => {
                self.settle_cancelled(slot, &mut state, phase);
            }
            Err(e) => {
                error!(request_id = %state.request.id, error = %e, "Generation failed");
                self.settle(
                    slot,
                    &mut state,
                    RequestStatus::Failed,
                    Some(RequestFailure::new(FailureKind::Generation, e.to_string())),
                );
            }
        }
    }

    /// Swap in the new artifact set and open review in one critical section,
    /// so readers see either the old set or the new one.
    fn install(
        &self,
        slot: &RequestSlot,
        state: &mut SlotState,
        artifacts: BTreeMap<OutputFormat, Artifact>,
    ) {
        state.request.install_artifacts(artifacts);
        state.request.failure = None;
        self.settle(slot, state, RequestStatus::ReadyForReview, None);
    }

    fn spawn_abandon(&self, id: Uuid) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let lifecycle = self.clone();
        handle.spawn(async move { lifecycle.abandon(id).await });
    }

    async fn abandon(&self, id: Uuid) {
        let Ok(slot) = self.slot(id).await else {
            return;
        };
        let mut state = slot.state.lock().await;
        if state.request.status.is_transitional() {
            self.settle(
                &slot,
                &mut state,
                RequestStatus::Failed,
                Some(RequestFailure::new(
                    FailureKind::Generation,
                    "generation interrupted",
                )),
            );
        }
    }

    /// File `batch` and record the outcome. `filed` holds the keys an earlier
    /// push already created for this format.
    async fn push_issues(
        &self,
        slot: &RequestSlot,
        tracker: &dyn IssueTracker,
        format: OutputFormat,
        batch: IssueBatch,
        mut filed: Vec<String>,
    ) -> Result<SyncRecord> {
        let timeout = self.config.sync_timeout;
        let outcome = tokio::time::timeout(timeout, tracker.create_issues(&batch)).await;

        let mut state = slot.state.lock().await;
        let failure = match outcome {
            Ok(Ok(issues)) => {
                filed.extend(issues.into_iter().map(|issue| issue.key));
                return Ok(self.record_sync(
                    &mut state.request,
                    format,
                    SyncState::Synced,
                    filed,
                    None,
                ));
            }
            Ok(Err(e)) => {
                let (created, cause) = e.into_partial();
                filed.extend(created.into_iter().map(|issue| issue.key));
                if cause.is_unauthorized() {
                    OrchestratorError::from(cause)
                } else {
                    OrchestratorError::sync_failed(format, cause.to_string())
                }
            }
            Err(_) => OrchestratorError::sync_failed(
                format,
                format!("tracker did not respond within {}s", timeout.as_secs()),
            ),
        };

        warn!(
            request_id = %state.request.id,
            format = %format,
            filed = filed.len(),
            error = %failure,
            "Tracker sync failed"
        );
        self.record_sync(
            &mut state.request,
            format,
            SyncState::SyncFailed,
            filed,
            Some(failure.to_string()),
        );
        Err(failure)
    }

    fn spawn_abandon_sync(&self, id: Uuid, format: OutputFormat) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let lifecycle = self.clone();
        handle.spawn(async move { lifecycle.abandon_sync(id, format).await });
    }

    async fn abandon_sync(&self, id: Uuid, format: OutputFormat) {
        let Ok(slot) = self.slot(id).await else {
            return;
        };
        let mut state = slot.state.lock().await;
        let filed = match state.request.tracker_sync_state.get(&format) {
            Some(record) if record.state == SyncState::Syncing => record.issue_keys.clone(),
            _ => return,
        };
        self.record_sync(
            &mut state.request,
            format,
            SyncState::SyncFailed,
            filed,
            Some("sync interrupted".to_string()),
        );
    }

    fn is_evictable(&self, request: &GenerationRequest, now: DateTime<Utc>) -> bool {
        let syncing = request
            .tracker_sync_state
            .values()
            .any(|record| record.state == SyncState::Syncing);
        let idle = (now - request.updated_at)
            .to_std()
            .is_ok_and(|idle| idle >= self.config.retention);
        request.status.is_terminal() && !syncing && idle
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn slot(&self, id: Uuid) -> Result<Arc<RequestSlot>> {
        self.requests
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(OrchestratorError::RequestNotFound(id))
    }

    fn emit(&self, event: Event) {
        if let Some(ref bus) = self.event_bus {
            bus.emit(event);
        }
    }
}
