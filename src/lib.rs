// Infrastructure layer (shared components)
pub mod config;
pub mod error;
pub mod metrics;
pub mod storage;

// Domain layer (business logic)
pub mod generation;
pub mod template;
pub mod test_runner;
pub mod usage;

// Composition root
pub mod state;

pub use config::Settings;
pub use state::PromptCore;
pub use error::{CoreError, Result};
pub use generation::{
    GenerateOptions, GenerationBackend, GenerationOrchestrator, GenerationOutcome, RetryPolicy,
    StructuredOutcome,
};
pub use storage::{create_storage_backend, StorageBackend, StorageError};
pub use template::{Template, TemplateCache, TemplatePatch, TemplateStore, TemplateVersion};
pub use test_runner::TestRunner;
pub use usage::{MetricsCollector, TimeRange, UsageAggregate};
