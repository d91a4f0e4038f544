//! In-memory storage backend.
//!
//! This module provides a memory-based implementation of the
//! `StorageBackend` trait for tests and embedded use. All tables share
//! one lock, which makes the multi-row operations (create-with-version,
//! merge-update-with-snapshot, cascading delete) atomic and keeps
//! concurrent updates on the same template from interleaving.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::template::{Template, TemplatePatch, TemplateVersion};

use super::backend::{
    NewTestResult, NewUsageMetric, StorageBackend, StorageError, TestResult, UsageMetric,
};

#[derive(Default)]
struct Tables {
    templates: HashMap<Uuid, Template>,
    /// Insertion-ordered; newest-first views reverse this
    versions: Vec<TemplateVersion>,
    metrics: Vec<UsageMetric>,
    test_results: Vec<TestResult>,
}

/// In-memory storage backend.
pub struct MemoryStorage {
    tables: Mutex<Tables>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
        }
    }
}

fn snapshot_version(
    template: &Template,
    author: &str,
    change_notes: Option<String>,
    created_at: DateTime<Utc>,
) -> TemplateVersion {
    TemplateVersion {
        id: Uuid::new_v4(),
        template_id: template.id,
        body: template.body.clone(),
        temperature: template.temperature,
        created_at,
        author: author.to_string(),
        change_notes,
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn get_template(&self, id: Uuid) -> Result<Option<Template>, StorageError> {
        let tables = self.tables.lock().await;
        Ok(tables.templates.get(&id).cloned())
    }

    async fn get_active_template(&self, name: &str) -> Result<Option<Template>, StorageError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .templates
            .values()
            .find(|t| t.name == name && t.active)
            .cloned())
    }

    async fn list_templates(&self) -> Result<Vec<Template>, StorageError> {
        let tables = self.tables.lock().await;
        let mut templates: Vec<Template> = tables.templates.values().cloned().collect();
        templates.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(templates)
    }

    async fn list_templates_by_category(
        &self,
        category: &str,
    ) -> Result<Vec<Template>, StorageError> {
        let tables = self.tables.lock().await;
        let mut templates: Vec<Template> = tables
            .templates
            .values()
            .filter(|t| t.category.as_deref() == Some(category))
            .cloned()
            .collect();
        templates.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(templates)
    }

    async fn create_template(
        &self,
        template: Template,
        author: &str,
    ) -> Result<Template, StorageError> {
        let mut tables = self.tables.lock().await;

        if tables.templates.values().any(|t| t.name == template.name) {
            return Err(StorageError::DuplicateName(template.name));
        }

        let version = snapshot_version(&template, author, None, template.created_at);
        tables.templates.insert(template.id, template.clone());
        tables.versions.push(version);

        tracing::debug!(template = %template.name, id = %template.id, "Template created");

        Ok(template)
    }

    async fn update_template(
        &self,
        id: Uuid,
        patch: TemplatePatch,
        author: &str,
        change_notes: Option<String>,
    ) -> Result<Template, StorageError> {
        let mut tables = self.tables.lock().await;

        let mut template = tables
            .templates
            .get(&id)
            .cloned()
            .ok_or(StorageError::TemplateNotFound(id))?;

        patch.apply(&mut template);

        if tables
            .templates
            .values()
            .any(|t| t.id != id && t.name == template.name)
        {
            return Err(StorageError::DuplicateName(template.name));
        }

        let version = snapshot_version(&template, author, change_notes, template.updated_at);
        tables.templates.insert(id, template.clone());
        tables.versions.push(version);

        Ok(template)
    }

    async fn delete_template(&self, id: Uuid) -> Result<(), StorageError> {
        let mut tables = self.tables.lock().await;

        if tables.templates.remove(&id).is_none() {
            return Err(StorageError::TemplateNotFound(id));
        }

        // Cascade: versions, metrics, and the deleted versions' test results
        let removed_versions: Vec<Uuid> = tables
            .versions
            .iter()
            .filter(|v| v.template_id == id)
            .map(|v| v.id)
            .collect();
        tables.versions.retain(|v| v.template_id != id);
        tables.metrics.retain(|m| m.template_id != id);
        tables
            .test_results
            .retain(|r| !removed_versions.contains(&r.version_id));

        tracing::debug!(id = %id, versions = removed_versions.len(), "Template deleted");

        Ok(())
    }

    async fn list_versions(
        &self,
        template_id: Uuid,
    ) -> Result<Vec<TemplateVersion>, StorageError> {
        let tables = self.tables.lock().await;
        let mut versions: Vec<TemplateVersion> = tables
            .versions
            .iter()
            .filter(|v| v.template_id == template_id)
            .cloned()
            .collect();
        // Newest first; reverse insertion order breaks timestamp ties
        versions.reverse();
        versions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(versions)
    }

    async fn get_version(
        &self,
        version_id: Uuid,
    ) -> Result<Option<TemplateVersion>, StorageError> {
        let tables = self.tables.lock().await;
        Ok(tables.versions.iter().find(|v| v.id == version_id).cloned())
    }

    async fn insert_usage_metric(
        &self,
        metric: NewUsageMetric,
    ) -> Result<UsageMetric, StorageError> {
        let mut tables = self.tables.lock().await;

        if !tables.templates.contains_key(&metric.template_id) {
            return Err(StorageError::TemplateNotFound(metric.template_id));
        }

        let row = metric.into_metric();
        tables.metrics.push(row.clone());
        Ok(row)
    }

    async fn usage_metrics_since(
        &self,
        template_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<UsageMetric>, StorageError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .metrics
            .iter()
            .filter(|m| m.template_id == template_id && m.created_at >= since)
            .cloned()
            .collect())
    }

    async fn insert_test_result(
        &self,
        result: NewTestResult,
    ) -> Result<TestResult, StorageError> {
        let mut tables = self.tables.lock().await;

        if !tables.versions.iter().any(|v| v.id == result.version_id) {
            return Err(StorageError::VersionNotFound(result.version_id));
        }

        let row = result.into_result();
        tables.test_results.push(row.clone());
        Ok(row)
    }

    async fn list_test_results(&self, version_id: Uuid) -> Result<Vec<TestResult>, StorageError> {
        let tables = self.tables.lock().await;
        let mut results: Vec<TestResult> = tables
            .test_results
            .iter()
            .filter(|r| r.version_id == version_id)
            .cloned()
            .collect();
        results.reverse();
        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(results)
    }
}
