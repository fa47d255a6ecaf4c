use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use orchestrator::{GenerationEngine, HttpEngine, LifecycleConfig, TemplateEngine, UploadConfig};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};
use tracker::TrackerConfig;

pub const CONFIG_FILE: &str = "casegen.toml";

/// Everything `casegen serve` reads from `casegen.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSection,
    pub lifecycle: LifecycleSection,
    pub upload: UploadSection,
    pub engine: EngineSection,
    pub tracker: TrackerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleSection {
    pub max_feedback_rounds: u32,
    pub generation_timeout_secs: u64,
    pub upload_timeout_secs: u64,
    pub sync_timeout_secs: u64,
    /// Settled requests idle this long are dropped from memory
    pub retention_secs: u64,
}

impl Default for LifecycleSection {
    fn default() -> Self {
        let defaults = LifecycleConfig::default();
        Self {
            max_feedback_rounds: defaults.max_feedback_rounds,
            generation_timeout_secs: defaults.generation_timeout.as_secs(),
            upload_timeout_secs: defaults.upload_timeout.as_secs(),
            sync_timeout_secs: defaults.sync_timeout.as_secs(),
            retention_secs: defaults.retention.as_secs(),
        }
    }
}

impl LifecycleSection {
    pub fn to_config(&self) -> LifecycleConfig {
        LifecycleConfig::default()
            .with_max_feedback_rounds(self.max_feedback_rounds)
            .with_generation_timeout(Duration::from_secs(self.generation_timeout_secs))
            .with_upload_timeout(Duration::from_secs(self.upload_timeout_secs))
            .with_sync_timeout(Duration::from_secs(self.sync_timeout_secs))
            .with_retention(Duration::from_secs(self.retention_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSection {
    pub chunk_size: usize,
    pub max_bytes: u64,
    pub allowed_content_types: Vec<String>,
}

impl Default for UploadSection {
    fn default() -> Self {
        let defaults = UploadConfig::default();
        Self {
            chunk_size: defaults.chunk_size,
            max_bytes: defaults.max_bytes,
            allowed_content_types: defaults.allowed_content_types,
        }
    }
}

impl UploadSection {
    pub fn to_config(&self) -> UploadConfig {
        UploadConfig::default()
            .with_chunk_size(self.chunk_size)
            .with_max_bytes(self.max_bytes)
            .with_allowed_content_types(self.allowed_content_types.clone())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Built-in deterministic generator
    #[default]
    Template,
    /// Remote service at `engine.url`
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub kind: EngineKind,
    pub url: String,
    pub request_timeout_secs: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            kind: EngineKind::Template,
            url: "http://localhost:8090".to_string(),
            request_timeout_secs: 120,
        }
    }
}

impl EngineSection {
    pub fn build(&self) -> anyhow::Result<Arc<dyn GenerationEngine>> {
        match self.kind {
            EngineKind::Template => Ok(Arc::new(TemplateEngine::new())),
            EngineKind::Http => {
                if self.url.trim().is_empty() {
                    anyhow::bail!("engine.url must be set when engine.kind = \"http\"");
                }
                let engine = HttpEngine::new(self.url.clone())
                    .with_request_timeout(Duration::from_secs(self.request_timeout_secs))?;
                Ok(Arc::new(engine))
            }
        }
    }
}

impl AppConfig {
    /// Read `path`, falling back to defaults when the file does not exist.
    /// Tracker secrets are always overlaid from the environment.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let config: AppConfig = toml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            debug!(path = %path.display(), "Config loaded");
            config
        } else {
            info!(path = %path.display(), "Config file not found, using defaults");
            Self::default()
        };

        Ok(config.apply_env())
    }

    pub fn apply_env(mut self) -> Self {
        self.tracker = self.tracker.apply_env();
        self
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
