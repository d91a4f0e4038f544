//! Composition root for the prompt core.
//!
//! Consumers (API routes, admin tooling) construct one [`PromptCore`]
//! at startup and share it; nothing in the crate holds hidden global
//! state.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Settings;
use crate::generation::{GenerationBackend, GenerationOrchestrator};
use crate::storage::{create_storage_backend, StorageBackend};
use crate::template::{create_template_store, TemplateStore};
use crate::test_runner::TestRunner;
use crate::usage::MetricsCollector;

/// Fully wired prompt core.
#[derive(Clone)]
pub struct PromptCore {
    pub settings: Arc<Settings>,
    pub store: Arc<TemplateStore>,
    pub collector: Arc<MetricsCollector>,
    pub orchestrator: Arc<GenerationOrchestrator>,
    pub test_runner: Arc<TestRunner>,
}

impl PromptCore {
    /// Wire the core from settings, a generation backend, and an
    /// optional PostgreSQL pool (required for the postgres storage
    /// backend).
    pub fn new(
        settings: Settings,
        backend: Arc<dyn GenerationBackend>,
        pool: Option<PgPool>,
    ) -> Self {
        let storage = create_storage_backend(&settings.storage, pool);
        Self::with_storage(settings, backend, storage)
    }

    /// Wire the core around an already constructed storage backend.
    pub fn with_storage(
        settings: Settings,
        backend: Arc<dyn GenerationBackend>,
        storage: Arc<dyn StorageBackend>,
    ) -> Self {
        let store = create_template_store(storage.clone(), &settings.cache);
        let collector = Arc::new(MetricsCollector::new(storage.clone()));
        let orchestrator = Arc::new(GenerationOrchestrator::new(
            store.clone(),
            backend.clone(),
            collector.clone(),
            settings.generation.clone(),
        ));
        let test_runner = Arc::new(TestRunner::new(storage, backend, &settings.generation));

        Self {
            settings: Arc::new(settings),
            store,
            collector,
            orchestrator,
            test_runner,
        }
    }
}
