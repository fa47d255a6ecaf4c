pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod resources;
pub mod state_machine;
pub mod upload;
pub mod validator;

pub use engine::{GenerationEngine, GenerationInput, HttpEngine, TemplateEngine};
pub use error::{OrchestratorError, Result};
pub use lifecycle::{Lifecycle, LifecycleConfig};
pub use state_machine::RequestStateMachine;
pub use upload::{
    DocumentStore, MemoryDocumentStore, StoreError, UploadConfig, UploadTracker, UploadUpdate,
};
pub use validator::{validate, Validator};
