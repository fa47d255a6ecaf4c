//! Chunked document transfer into the blob store.
//!
//! Each `begin_upload` creates one session and a background transfer. The
//! session snapshot lives behind a `watch` channel so the lifecycle can await
//! its terminal state; progress is also handed out once as a finite stream
//! that ends after the terminal item.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use casegen_core::{DocumentRef, UploadErrorKind, UploadSession, UploadState};
use chrono::Utc;
use events::{Event, EventBus};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch, RwLock};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};

const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
const DEFAULT_MAX_BYTES: u64 = 25 * 1024 * 1024;

// =============================================================================
// Document store
// =============================================================================

#[derive(Debug, Error)]
#[error("document store error: {0}")]
pub struct StoreError(pub String);

/// Opaque blob store the uploaded documents end up in.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Reserve a document and return its handle.
    async fn create(&self, file_name: &str, content_type: &str)
        -> std::result::Result<DocumentRef, StoreError>;

    async fn append(&self, document: &DocumentRef, chunk: Bytes)
        -> std::result::Result<(), StoreError>;

    /// Drop a document, finished or not.
    async fn discard(&self, document: &DocumentRef);

    async fn read(&self, document: &DocumentRef) -> Option<Bytes>;
}

#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn create(
        &self,
        file_name: &str,
        _content_type: &str,
    ) -> std::result::Result<DocumentRef, StoreError> {
        let document = DocumentRef(format!("mem://{}/{}", Uuid::new_v4(), file_name));
        self.documents
            .write()
            .await
            .insert(document.0.clone(), Vec::new());
        Ok(document)
    }

    async fn append(
        &self,
        document: &DocumentRef,
        chunk: Bytes,
    ) -> std::result::Result<(), StoreError> {
        let mut documents = self.documents.write().await;
        let buffer = documents
            .get_mut(document.as_str())
            .ok_or_else(|| StoreError(format!("unknown document {}", document)))?;
        buffer.extend_from_slice(&chunk);
        Ok(())
    }

    async fn discard(&self, document: &DocumentRef) {
        self.documents.write().await.remove(document.as_str());
    }

    async fn read(&self, document: &DocumentRef) -> Option<Bytes> {
        self.documents
            .read()
            .await
            .get(document.as_str())
            .map(|buffer| Bytes::from(buffer.clone()))
    }
}

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub chunk_size: usize,
    pub max_bytes: u64,
    pub allowed_content_types: Vec<String>,
    /// Pause between chunks; zero outside of throttled environments
    pub chunk_delay: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_bytes: DEFAULT_MAX_BYTES,
            allowed_content_types: vec!["application/pdf".to_string()],
            chunk_delay: Duration::ZERO,
        }
    }
}

impl UploadConfig {
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_allowed_content_types(mut self, types: Vec<String>) -> Self {
        self.allowed_content_types = types;
        self
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    fn accepts(&self, content_type: &str) -> bool {
        let content_type = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim();
        self.allowed_content_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(content_type))
    }
}

// =============================================================================
// Tracker
// =============================================================================

/// One item of an upload's progress stream. The stream ends right after the
/// first `Succeeded` or `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UploadUpdate {
    Progress { bytes_transferred: u64, percent: u8 },
    Succeeded { result_ref: DocumentRef },
    Failed { error: UploadErrorKind },
}

struct UploadEntry {
    session: watch::Sender<UploadSession>,
    progress: Option<mpsc::Receiver<UploadUpdate>>,
    cancel: CancellationToken,
}

#[derive(Clone)]
pub struct UploadTracker {
    config: UploadConfig,
    store: Arc<dyn DocumentStore>,
    entries: Arc<RwLock<HashMap<Uuid, UploadEntry>>>,
    event_bus: Option<EventBus>,
}

impl UploadTracker {
    pub fn new(config: UploadConfig, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            config,
            store,
            entries: Arc::new(RwLock::new(HashMap::new())),
            event_bus: None,
        }
    }

    pub fn in_memory(config: UploadConfig) -> Self {
        Self::new(config, Arc::new(MemoryDocumentStore::new()))
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Start transferring `content` for `owner_id`.
    ///
    /// Fails fast while the owner still has a non-terminal upload. Size and
    /// type violations produce a session that is already `Failed`.
    pub async fn begin_upload(
        &self,
        owner_id: Uuid,
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        content: Bytes,
    ) -> Result<UploadSession> {
        let file_name = file_name.into();
        let content_type = content_type.into();
        let mut session =
            UploadSession::new(owner_id, &file_name, &content_type, content.len() as u64);

        let rejection = if content.is_empty() {
            Some(UploadErrorKind::Empty)
        } else if content.len() as u64 > self.config.max_bytes {
            Some(UploadErrorKind::TooLarge)
        } else if !self.config.accepts(&content_type) {
            Some(UploadErrorKind::UnsupportedType)
        } else {
            None
        };

        let chunk_count = content.len().div_ceil(self.config.chunk_size);
        let (progress_tx, progress_rx) = mpsc::channel(chunk_count + 1);
        let cancel = CancellationToken::new();

        {
            let mut entries = self.entries.write().await;
            let busy = entries.values().any(|entry| {
                let existing = entry.session.borrow();
                existing.owner_id == owner_id && !existing.is_terminal()
            });
            if busy {
                warn!(owner_id = %owner_id, "Rejected concurrent upload");
                return Err(OrchestratorError::UploadRejected(
                    "upload already in progress".to_string(),
                ));
            }

            if let Some(kind) = rejection {
                session.fail(kind);
            }

            let (session_tx, _) = watch::channel(session.clone());
            entries.insert(
                session.file_id,
                UploadEntry {
                    session: session_tx,
                    progress: Some(progress_rx),
                    cancel: cancel.clone(),
                },
            );
        }

        if let Some(kind) = rejection {
            info!(
                file_id = %session.file_id,
                file_name = %file_name,
                error = %kind,
                "Upload rejected"
            );
            // Channel has room for the single terminal item
            let _ = progress_tx.try_send(UploadUpdate::Failed { error: kind });
            self.emit_finished(&session);
            return Ok(session);
        }

        info!(
            file_id = %session.file_id,
            owner_id = %owner_id,
            bytes = session.byte_size,
            "Upload started"
        );

        let tracker = self.clone();
        let file_id = session.file_id;
        tokio::spawn(async move {
            tracker
                .transfer(file_id, file_name, content_type, content, progress_tx, cancel)
                .await;
        });

        Ok(session)
    }

    async fn transfer(
        &self,
        file_id: Uuid,
        file_name: String,
        content_type: String,
        content: Bytes,
        progress: mpsc::Sender<UploadUpdate>,
        cancel: CancellationToken,
    ) {
        let document = match self.store.create(&file_name, &content_type).await {
            Ok(document) => document,
            Err(e) => {
                warn!(file_id = %file_id, error = %e, "Failed to reserve document");
                self.finish(file_id, Err(UploadErrorKind::Storage), &progress)
                    .await;
                return;
            }
        };

        let mut offset = 0usize;
        while offset < content.len() {
            if cancel.is_cancelled() {
                break;
            }

            let end = (offset + self.config.chunk_size).min(content.len());
            if let Err(e) = self.store.append(&document, content.slice(offset..end)).await {
                warn!(file_id = %file_id, error = %e, "Chunk write failed");
                self.store.discard(&document).await;
                self.finish(file_id, Err(UploadErrorKind::Storage), &progress)
                    .await;
                return;
            }
            offset = end;

            if let Some(snapshot) = self.update(file_id, |s| s.record_progress(offset as u64)).await
            {
                let percent = snapshot.percent();
                let _ = progress
                    .send(UploadUpdate::Progress {
                        bytes_transferred: snapshot.bytes_transferred,
                        percent,
                    })
                    .await;
                self.emit(Event::UploadProgress {
                    file_id,
                    owner_id: snapshot.owner_id,
                    bytes_transferred: snapshot.bytes_transferred,
                    percent,
                });
            }

            if self.config.chunk_delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.config.chunk_delay) => {}
                }
            }
        }

        if cancel.is_cancelled() {
            debug!(file_id = %file_id, "Upload cancelled mid-transfer");
            self.store.discard(&document).await;
            self.finish(file_id, Err(UploadErrorKind::Cancelled), &progress)
                .await;
            return;
        }

        self.finish(file_id, Ok(document), &progress).await;
    }

    async fn update(
        &self,
        file_id: Uuid,
        apply: impl FnOnce(&mut UploadSession),
    ) -> Option<UploadSession> {
        let entries = self.entries.read().await;
        let entry = entries.get(&file_id)?;
        entry.session.send_modify(apply);
        let snapshot = entry.session.borrow().clone();
        Some(snapshot)
    }

    async fn finish(
        &self,
        file_id: Uuid,
        outcome: std::result::Result<DocumentRef, UploadErrorKind>,
        progress: &mpsc::Sender<UploadUpdate>,
    ) {
        let (update, snapshot) = match outcome {
            Ok(document) => (
                UploadUpdate::Succeeded {
                    result_ref: document.clone(),
                },
                self.update(file_id, |s| s.succeed(document)).await,
            ),
            Err(kind) => (
                UploadUpdate::Failed { error: kind },
                self.update(file_id, |s| s.fail(kind)).await,
            ),
        };

        let _ = progress.send(update).await;

        if let Some(snapshot) = snapshot {
            info!(
                file_id = %file_id,
                state = %snapshot.state.as_str(),
                "Upload finished"
            );
            self.emit_finished(&snapshot);
        }
    }

    pub async fn get(&self, file_id: Uuid) -> Result<UploadSession> {
        let entries = self.entries.read().await;
        let entry = entries
            .get(&file_id)
            .ok_or(OrchestratorError::UploadNotFound(file_id))?;
        let snapshot = entry.session.borrow().clone();
        Ok(snapshot)
    }

    /// Hand out the progress stream. It can be taken once per session.
    pub async fn take_progress(&self, file_id: Uuid) -> Result<ReceiverStream<UploadUpdate>> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(&file_id)
            .ok_or(OrchestratorError::UploadNotFound(file_id))?;
        entry
            .progress
            .take()
            .map(ReceiverStream::new)
            .ok_or_else(|| OrchestratorError::rejected("progress stream already taken"))
    }

    /// Resolve once the session is `Succeeded` or `Failed`.
    pub async fn wait_terminal(&self, file_id: Uuid) -> Result<UploadSession> {
        let mut rx = {
            let entries = self.entries.read().await;
            entries
                .get(&file_id)
                .ok_or(OrchestratorError::UploadNotFound(file_id))?
                .session
                .subscribe()
        };

        let session = rx
            .wait_for(|session| session.is_terminal())
            .await
            .map_err(|_| OrchestratorError::UploadNotFound(file_id))?;
        Ok(UploadSession::clone(&session))
    }

    /// Stop an in-flight transfer. The session fails with `Cancelled`.
    pub async fn cancel(&self, file_id: Uuid) -> Result<UploadSession> {
        let session = self.get(file_id).await?;
        if session.is_terminal() {
            return Err(OrchestratorError::rejected(format!(
                "upload already {}",
                session.state.as_str()
            )));
        }

        info!(file_id = %file_id, "Cancelling upload");
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(&file_id) {
                entry.cancel.cancel();
            }
        }
        self.wait_terminal(file_id).await
    }

    /// Forget terminal sessions idle for at least `idle`, except those in
    /// `keep`, and discard their stored documents. Returns how many went.
    pub async fn prune(&self, idle: Duration, keep: &HashSet<Uuid>) -> usize {
        let now = Utc::now();
        let mut documents = Vec::new();
        let pruned = {
            let mut entries = self.entries.write().await;
            let before = entries.len();
            entries.retain(|file_id, entry| {
                let session = entry.session.borrow();
                let stale = session.is_terminal()
                    && !keep.contains(file_id)
                    && (now - session.updated_at)
                        .to_std()
                        .is_ok_and(|age| age >= idle);
                if stale {
                    documents.extend(session.result_ref.clone());
                }
                !stale
            });
            before - entries.len()
        };

        for document in &documents {
            self.store.discard(document).await;
        }
        if pruned > 0 {
            debug!(sessions = pruned, documents = documents.len(), "Pruned uploads");
        }
        pruned
    }

    fn emit(&self, event: Event) {
        if let Some(ref bus) = self.event_bus {
            bus.emit(event);
        }
    }

    fn emit_finished(&self, session: &UploadSession) {
        self.emit(Event::UploadFinished {
            file_id: session.file_id,
            owner_id: session.owner_id,
            success: session.state == UploadState::Succeeded,
            error: session.error.map(|kind| kind.to_string()),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn pdf(len: usize) -> Bytes {
        Bytes::from(vec![b'x'; len])
    }

    fn tracker(chunk_size: usize) -> UploadTracker {
        UploadTracker::in_memory(UploadConfig::default().with_chunk_size(chunk_size))
    }

    #[tokio::test]
    async fn test_upload_succeeds_with_progress() {
        let tracker = tracker(10);
        let session = tracker
            .begin_upload(Uuid::new_v4(), "srs.pdf", "application/pdf", pdf(25))
            .await
            .unwrap();

        let updates: Vec<_> = tracker
            .take_progress(session.file_id)
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(
            updates[..3],
            [
                UploadUpdate::Progress { bytes_transferred: 10, percent: 40 },
                UploadUpdate::Progress { bytes_transferred: 20, percent: 80 },
                UploadUpdate::Progress { bytes_transferred: 25, percent: 100 },
            ]
        );
        let Some(UploadUpdate::Succeeded { result_ref }) = updates.last() else {
            panic!("expected success, got {:?}", updates.last());
        };

        let stored = tracker.store().read(result_ref).await.unwrap();
        assert_eq!(stored.len(), 25);

        let done = tracker.wait_terminal(session.file_id).await.unwrap();
        assert_eq!(done.state, UploadState::Succeeded);
        assert_eq!(done.result_ref.as_ref(), Some(result_ref));
    }

    #[tokio::test]
    async fn test_progress_is_not_restartable() {
        let tracker = tracker(10);
        let session = tracker
            .begin_upload(Uuid::new_v4(), "srs.pdf", "application/pdf", pdf(5))
            .await
            .unwrap();

        let _stream = tracker.take_progress(session.file_id).await.unwrap();
        let err = tracker.take_progress(session.file_id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_second_upload_for_owner_rejected_while_in_flight() {
        let tracker = UploadTracker::in_memory(
            UploadConfig::default()
                .with_chunk_size(1)
                .with_chunk_delay(Duration::from_secs(1)),
        );
        let owner = Uuid::new_v4();

        tracker
            .begin_upload(owner, "a.pdf", "application/pdf", pdf(3))
            .await
            .unwrap();
        let err = tracker
            .begin_upload(owner, "b.pdf", "application/pdf", pdf(3))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "upload already in progress");

        // A different owner is unaffected
        assert!(tracker
            .begin_upload(Uuid::new_v4(), "c.pdf", "application/pdf", pdf(3))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_new_session_allowed_after_failure() {
        let tracker = tracker(10);
        let owner = Uuid::new_v4();

        let failed = tracker
            .begin_upload(owner, "notes.txt", "text/plain", pdf(3))
            .await
            .unwrap();
        assert_eq!(failed.state, UploadState::Failed);
        assert_eq!(failed.error, Some(UploadErrorKind::UnsupportedType));

        let retry = tracker
            .begin_upload(owner, "srs.pdf", "application/pdf", pdf(3))
            .await
            .unwrap();
        let done = tracker.wait_terminal(retry.file_id).await.unwrap();
        assert_eq!(done.state, UploadState::Succeeded);
    }

    #[tokio::test]
    async fn test_rejections() {
        let tracker = UploadTracker::in_memory(UploadConfig::default().with_max_bytes(4));

        let empty = tracker
            .begin_upload(Uuid::new_v4(), "a.pdf", "application/pdf", Bytes::new())
            .await
            .unwrap();
        assert_eq!(empty.error, Some(UploadErrorKind::Empty));

        let large = tracker
            .begin_upload(Uuid::new_v4(), "a.pdf", "application/pdf", pdf(5))
            .await
            .unwrap();
        assert_eq!(large.error, Some(UploadErrorKind::TooLarge));

        let updates: Vec<_> = tracker
            .take_progress(large.file_id)
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(
            updates,
            vec![UploadUpdate::Failed { error: UploadErrorKind::TooLarge }]
        );
    }

    #[tokio::test]
    async fn test_content_type_parameters_ignored() {
        let tracker = tracker(10);
        let session = tracker
            .begin_upload(Uuid::new_v4(), "a.pdf", "Application/PDF; charset=binary", pdf(3))
            .await
            .unwrap();
        assert_ne!(session.state, UploadState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_in_flight_upload() {
        let tracker = UploadTracker::in_memory(
            UploadConfig::default()
                .with_chunk_size(1)
                .with_chunk_delay(Duration::from_secs(5)),
        );
        let session = tracker
            .begin_upload(Uuid::new_v4(), "a.pdf", "application/pdf", pdf(10))
            .await
            .unwrap();

        let cancelled = tracker.cancel(session.file_id).await.unwrap();
        assert_eq!(cancelled.state, UploadState::Failed);
        assert_eq!(cancelled.error, Some(UploadErrorKind::Cancelled));
        assert!(cancelled.result_ref.is_none());

        let err = tracker.cancel(session.file_id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_prune_drops_settled_sessions_and_documents() {
        let store = Arc::new(MemoryDocumentStore::new());
        let tracker = UploadTracker::new(UploadConfig::default(), store.clone());

        let kept = tracker
            .begin_upload(Uuid::new_v4(), "a.pdf", "application/pdf", pdf(3))
            .await
            .unwrap();
        let dropped = tracker
            .begin_upload(Uuid::new_v4(), "b.pdf", "application/pdf", pdf(3))
            .await
            .unwrap();
        tracker.wait_terminal(kept.file_id).await.unwrap();
        tracker.wait_terminal(dropped.file_id).await.unwrap();
        assert_eq!(store.len().await, 2);

        // Nothing is old enough yet
        let keep = HashSet::from([kept.file_id]);
        assert_eq!(tracker.prune(Duration::from_secs(3600), &keep).await, 0);

        assert_eq!(tracker.prune(Duration::ZERO, &keep).await, 1);
        assert!(tracker.get(kept.file_id).await.is_ok());
        assert!(matches!(
            tracker.get(dropped.file_id).await,
            Err(OrchestratorError::UploadNotFound(_))
        ));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_upload() {
        let tracker = tracker(10);
        let id = Uuid::new_v4();
        assert!(matches!(
            tracker.get(id).await,
            Err(OrchestratorError::UploadNotFound(found)) if found == id
        ));
        assert!(tracker.wait_terminal(id).await.is_err());
    }

    #[tokio::test]
    async fn test_emits_upload_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let tracker = tracker(10).with_event_bus(bus);

        let session = tracker
            .begin_upload(Uuid::new_v4(), "a.pdf", "application/pdf", pdf(15))
            .await
            .unwrap();
        tracker.wait_terminal(session.file_id).await.unwrap();

        let mut kinds = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            kinds.push(envelope.event.kind());
        }
        assert_eq!(
            kinds,
            vec!["upload.progress", "upload.progress", "upload.finished"]
        );
    }
}
