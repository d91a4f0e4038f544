//! Backend trait for template and metric storage.
//!
//! This module defines the abstraction layer for the storage engine,
//! allowing different implementations (memory, PostgreSQL) to be used
//! interchangeably.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::template::{Template, TemplatePatch, TemplateVersion};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Template row is absent
    #[error("Template not found: {0}")]
    TemplateNotFound(Uuid),

    /// Template version row is absent
    #[error("Template version not found: {0}")]
    VersionNotFound(Uuid),

    /// Template name is already taken (names are unique regardless of
    /// active state)
    #[error("Template name already in use: {0}")]
    DuplicateName(String),

    /// PostgreSQL operation failed
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),
}

/// One usage metric row, written per concluded generation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageMetric {
    pub id: Uuid,
    pub template_id: Uuid,
    pub duration_ms: u64,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub success: bool,
    pub created_at: DateTime<Utc>,
}

/// Fields for a usage metric about to be persisted.
#[derive(Debug, Clone)]
pub struct NewUsageMetric {
    pub template_id: Uuid,
    pub duration_ms: u64,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub success: bool,
}

impl NewUsageMetric {
    /// Assign an id and timestamp, producing the row to store.
    pub fn into_metric(self) -> UsageMetric {
        UsageMetric {
            id: Uuid::new_v4(),
            template_id: self.template_id,
            duration_ms: self.duration_ms,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            success: self.success,
            created_at: Utc::now(),
        }
    }
}

/// One manual test invocation against a specific template version.
///
/// Keyed to a version, not a template, and excluded from aggregate
/// usage metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub id: Uuid,
    pub version_id: Uuid,
    pub input: String,
    pub output: String,
    pub duration_ms: u64,
    pub tokens_used: u32,
    pub author: String,
    pub created_at: DateTime<Utc>,
}

/// Fields for a test result about to be persisted.
#[derive(Debug, Clone)]
pub struct NewTestResult {
    pub version_id: Uuid,
    pub input: String,
    pub output: String,
    pub duration_ms: u64,
    pub tokens_used: u32,
    pub author: String,
}

impl NewTestResult {
    pub fn into_result(self) -> TestResult {
        TestResult {
            id: Uuid::new_v4(),
            version_id: self.version_id,
            input: self.input,
            output: self.output,
            duration_ms: self.duration_ms,
            tokens_used: self.tokens_used,
            author: self.author,
            created_at: Utc::now(),
        }
    }
}

/// Backend trait for template and metric storage.
///
/// # Thread Safety
///
/// Implementations must be thread-safe (`Send + Sync`) as they will be
/// shared across multiple async tasks.
///
/// # Atomicity
///
/// `create_template` and `update_template` write the template row and
/// its version snapshot in one transaction; either both succeed or
/// neither is visible. `delete_template` cascades through versions,
/// usage metrics, and test results. Concurrent `update_template` calls
/// on the same template must not interleave their field-merge and
/// version-insert.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Fetch a template by id, active or not.
    async fn get_template(&self, id: Uuid) -> Result<Option<Template>, StorageError>;

    /// Fetch the active template with the given name. Inactive
    /// templates are never returned.
    async fn get_active_template(&self, name: &str) -> Result<Option<Template>, StorageError>;

    /// List all templates regardless of active state.
    async fn list_templates(&self) -> Result<Vec<Template>, StorageError>;

    /// List templates carrying the given category label.
    async fn list_templates_by_category(
        &self,
        category: &str,
    ) -> Result<Vec<Template>, StorageError>;

    /// Insert a template together with its initial version snapshot.
    async fn create_template(
        &self,
        template: Template,
        author: &str,
    ) -> Result<Template, StorageError>;

    /// Merge a patch into a template and snapshot the resulting state
    /// as a new version.
    async fn update_template(
        &self,
        id: Uuid,
        patch: TemplatePatch,
        author: &str,
        change_notes: Option<String>,
    ) -> Result<Template, StorageError>;

    /// Delete a template and, transitively, its versions, usage
    /// metrics, and test results.
    async fn delete_template(&self, id: Uuid) -> Result<(), StorageError>;

    /// List a template's versions, newest first.
    async fn list_versions(&self, template_id: Uuid)
        -> Result<Vec<TemplateVersion>, StorageError>;

    /// Fetch a single version by id.
    async fn get_version(&self, version_id: Uuid)
        -> Result<Option<TemplateVersion>, StorageError>;

    /// Persist one usage metric row.
    async fn insert_usage_metric(
        &self,
        metric: NewUsageMetric,
    ) -> Result<UsageMetric, StorageError>;

    /// Fetch a template's usage metrics recorded at or after `since`,
    /// oldest first.
    async fn usage_metrics_since(
        &self,
        template_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<UsageMetric>, StorageError>;

    /// Persist one test result row.
    async fn insert_test_result(&self, result: NewTestResult)
        -> Result<TestResult, StorageError>;

    /// List a version's test results, newest first.
    async fn list_test_results(&self, version_id: Uuid) -> Result<Vec<TestResult>, StorageError>;
}
