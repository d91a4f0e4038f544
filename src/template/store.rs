//! Template store with versioned CRUD and cache invalidation

use std::sync::Arc;

use uuid::Uuid;

use crate::config::CacheConfig;
use crate::error::{CoreError, Result};
use crate::storage::StorageBackend;

use super::cache::TemplateCache;
use super::types::{CreateTemplateRequest, Template, TemplatePatch, TemplateVersion};

/// Versioned template store.
///
/// Owns the storage backend and the read-through cache as an explicitly
/// injected pair; the application's composition root constructs exactly
/// one and shares it. Every successful write removes the affected cache
/// entry before returning, so a `resolve_active` call issued after a
/// write observes the store, never a stale value.
pub struct TemplateStore {
    storage: Arc<dyn StorageBackend>,
    cache: Arc<TemplateCache>,
}

impl TemplateStore {
    pub fn new(storage: Arc<dyn StorageBackend>, cache: Arc<TemplateCache>) -> Self {
        Self { storage, cache }
    }

    /// Resolve the active template with the given name through the cache.
    ///
    /// Fresh cache entries (positive or negative) are served without
    /// touching the store; anything else is read through and cached.
    pub async fn resolve_active(&self, name: &str) -> Result<Option<Template>> {
        if let Some(cached) = self.cache.get(name) {
            return Ok(cached);
        }

        // Sample the epoch first so an invalidation racing this read
        // keeps the result out of the cache
        let epoch = self.cache.epoch();
        let fetched = self.storage.get_active_template(name).await?;
        self.cache.store(name, fetched.clone(), epoch);
        Ok(fetched)
    }

    /// Fetch a template by id, active or not.
    pub async fn get(&self, id: Uuid) -> Result<Template> {
        self.storage
            .get_template(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("template {id}")))
    }

    /// Create a template; an initial version snapshot is written in the
    /// same transaction.
    pub async fn create(&self, request: CreateTemplateRequest, author: &str) -> Result<Template> {
        let template = request.into_template();
        template.validate()?;

        let created = self.storage.create_template(template, author).await?;

        // A negative lookup may already be cached under this name
        self.cache.invalidate(&created.name);

        tracing::info!(template = %created.name, id = %created.id, author = %author, "Template created");

        Ok(created)
    }

    /// Merge a partial update into a template and snapshot the result
    /// as a new version, atomically.
    ///
    /// Fields omitted from the patch are left unchanged. Not
    /// idempotent: identical payloads still append distinct versions.
    pub async fn update(
        &self,
        id: Uuid,
        patch: TemplatePatch,
        author: &str,
        change_notes: Option<String>,
    ) -> Result<Template> {
        let current = self.get(id).await?;

        // Validate the merged result up front; the backend re-merges
        // under its own lock
        let mut preview = current.clone();
        patch.apply(&mut preview);
        preview.validate()?;

        let updated = self
            .storage
            .update_template(id, patch, author, change_notes)
            .await?;

        self.cache.invalidate(&current.name);
        if updated.name != current.name {
            self.cache.invalidate(&updated.name);
        }

        tracing::info!(template = %updated.name, id = %id, author = %author, "Template updated");

        Ok(updated)
    }

    /// Delete a template and, transitively, its versions, usage
    /// metrics, and test results.
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let current = self.get(id).await?;

        self.storage.delete_template(id).await?;
        self.cache.invalidate(&current.name);

        tracing::info!(template = %current.name, id = %id, "Template deleted");

        Ok(())
    }

    /// List all templates regardless of active state.
    pub async fn list(&self) -> Result<Vec<Template>> {
        Ok(self.storage.list_templates().await?)
    }

    /// List templates carrying the given category label.
    pub async fn list_by_category(&self, category: &str) -> Result<Vec<Template>> {
        Ok(self.storage.list_templates_by_category(category).await?)
    }

    /// List a template's versions, newest first.
    pub async fn list_versions(&self, template_id: Uuid) -> Result<Vec<TemplateVersion>> {
        // Distinguish "no versions" from "no such template"
        self.get(template_id).await?;
        Ok(self.storage.list_versions(template_id).await?)
    }
}

/// Create an Arc-wrapped template store with its own cache.
pub fn create_template_store(
    storage: Arc<dyn StorageBackend>,
    cache_config: &CacheConfig,
) -> Arc<TemplateStore> {
    let cache = Arc::new(TemplateCache::new(cache_config));
    Arc::new(TemplateStore::new(storage, cache))
}
