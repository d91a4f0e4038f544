//! Transactional storage for templates, versions, usage metrics, and
//! test results.
//!
//! The [`StorageBackend`] trait abstracts the persistence layer so that
//! different implementations (memory, PostgreSQL) can be used
//! interchangeably; the factory selects one from configuration.

mod backend;
mod factory;
mod memory;
mod postgres;

pub use backend::{
    NewTestResult, NewUsageMetric, StorageBackend, StorageError, TestResult, UsageMetric,
};
pub use factory::create_storage_backend;
pub use memory::MemoryStorage;
pub use postgres::{connect_pool, PostgresStorage};
