use std::sync::{Arc, RwLock};
use std::time::Duration;

use events::EventBus;
use orchestrator::{GenerationEngine, Lifecycle, LifecycleConfig, UploadConfig, UploadTracker};
use tracker::{JiraIntegration, TrackerConfig};

use crate::config::AppConfig;
use crate::routes::sse::{EventBuffer, SharedEventBuffer, DEFAULT_EVENT_BUFFER_SIZE};

const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Lifecycle,
    pub uploads: UploadTracker,
    pub tracker: Arc<JiraIntegration>,
    pub event_bus: EventBus,
    pub event_buffer: SharedEventBuffer,
}

impl AppState {
    pub fn new(
        lifecycle_config: LifecycleConfig,
        upload_config: UploadConfig,
        engine: Arc<dyn GenerationEngine>,
        tracker_config: TrackerConfig,
    ) -> Self {
        let event_bus = EventBus::new();
        let event_buffer = Arc::new(RwLock::new(EventBuffer::new(DEFAULT_EVENT_BUFFER_SIZE)));

        let uploads = UploadTracker::in_memory(upload_config).with_event_bus(event_bus.clone());
        let tracker = Arc::new(JiraIntegration::new(tracker_config));
        let lifecycle = Lifecycle::new(lifecycle_config, engine, uploads.clone())
            .with_tracker(tracker.clone())
            .with_event_bus(event_bus.clone());

        Self {
            lifecycle,
            uploads,
            tracker,
            event_bus,
            event_buffer,
        }
    }

    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let engine = config.engine.build()?;

        Ok(Self::new(
            config.lifecycle.to_config(),
            config.upload.to_config(),
            engine,
            config.tracker.clone(),
        ))
    }

    /// Start the periodic eviction of settled requests and uploads.
    pub fn spawn_background_tasks(&self) {
        self.lifecycle.spawn_pruner(PRUNE_INTERVAL);
    }
}
