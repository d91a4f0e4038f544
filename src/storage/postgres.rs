//! PostgreSQL storage backend.
//!
//! This module provides a persistent implementation of the
//! `StorageBackend` trait using PostgreSQL.
//!
//! Table structure:
//! - `prompt_templates` - Template rows; `name` carries a UNIQUE constraint
//! - `prompt_template_versions` - Append-only snapshots,
//!   `template_id REFERENCES prompt_templates ON DELETE CASCADE`
//! - `usage_metrics` - One row per concluded generation call,
//!   `template_id REFERENCES prompt_templates ON DELETE CASCADE`
//! - `test_results` - Manual test invocations,
//!   `version_id REFERENCES prompt_template_versions ON DELETE CASCADE`

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::template::{Template, TemplatePatch, TemplateVersion};

use super::backend::{
    NewTestResult, NewUsageMetric, StorageBackend, StorageError, TestResult, UsageMetric,
};

type TemplateRow = (
    Uuid,
    String,
    Option<String>,
    String,
    Option<f32>,
    Option<String>,
    bool,
    DateTime<Utc>,
    DateTime<Utc>,
);

type VersionRow = (
    Uuid,
    Uuid,
    String,
    Option<f32>,
    DateTime<Utc>,
    String,
    Option<String>,
);

type MetricRow = (Uuid, Uuid, i64, i32, i32, bool, DateTime<Utc>);

type TestResultRow = (Uuid, Uuid, String, String, i64, i32, String, DateTime<Utc>);

const SELECT_TEMPLATE: &str = "SELECT id, name, description, body, temperature, category, active, created_at, updated_at FROM prompt_templates";

const SELECT_VERSION: &str = "SELECT id, template_id, body, temperature, created_at, author, change_notes FROM prompt_template_versions";

fn template_from_row(row: TemplateRow) -> Template {
    let (id, name, description, body, temperature, category, active, created_at, updated_at) = row;
    Template {
        id,
        name,
        description,
        body,
        temperature,
        category,
        active,
        created_at,
        updated_at,
    }
}

fn version_from_row(row: VersionRow) -> TemplateVersion {
    let (id, template_id, body, temperature, created_at, author, change_notes) = row;
    TemplateVersion {
        id,
        template_id,
        body,
        temperature,
        created_at,
        author,
        change_notes,
    }
}

fn metric_from_row(row: MetricRow) -> UsageMetric {
    let (id, template_id, duration_ms, input_tokens, output_tokens, success, created_at) = row;
    UsageMetric {
        id,
        template_id,
        duration_ms: duration_ms as u64,
        input_tokens: input_tokens as u32,
        output_tokens: output_tokens as u32,
        success,
        created_at,
    }
}

fn test_result_from_row(row: TestResultRow) -> TestResult {
    let (id, version_id, input, output, duration_ms, tokens_used, author, created_at) = row;
    TestResult {
        id,
        version_id,
        input,
        output,
        duration_ms: duration_ms as u64,
        tokens_used: tokens_used as u32,
        author,
        created_at,
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23503"))
}

/// Create a PostgreSQL connection pool from storage configuration.
pub async fn connect_pool(config: &StorageConfig) -> Result<PgPool, StorageError> {
    let url = config.database_url.as_deref().unwrap_or_default();
    let pool = PgPoolOptions::new()
        .max_connections(config.pool_size)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
        .connect(url)
        .await?;

    tracing::info!(
        pool_size = config.pool_size,
        "PostgreSQL connection pool created"
    );

    Ok(pool)
}

/// PostgreSQL storage backend.
pub struct PostgresStorage {
    /// PostgreSQL connection pool
    pool: PgPool,
}

impl PostgresStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_version(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        template: &Template,
        author: &str,
        change_notes: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO prompt_template_versions (id, template_id, body, temperature, created_at, author, change_notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(template.id)
        .bind(&template.body)
        .bind(template.temperature)
        .bind(created_at)
        .bind(author)
        .bind(change_notes)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl StorageBackend for PostgresStorage {
    async fn get_template(&self, id: Uuid) -> Result<Option<Template>, StorageError> {
        let row: Option<TemplateRow> =
            sqlx::query_as(&format!("{SELECT_TEMPLATE} WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(template_from_row))
    }

    async fn get_active_template(&self, name: &str) -> Result<Option<Template>, StorageError> {
        let row: Option<TemplateRow> =
            sqlx::query_as(&format!("{SELECT_TEMPLATE} WHERE name = $1 AND active"))
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(template_from_row))
    }

    async fn list_templates(&self) -> Result<Vec<Template>, StorageError> {
        let rows: Vec<TemplateRow> =
            sqlx::query_as(&format!("{SELECT_TEMPLATE} ORDER BY name"))
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(template_from_row).collect())
    }

    async fn list_templates_by_category(
        &self,
        category: &str,
    ) -> Result<Vec<Template>, StorageError> {
        let rows: Vec<TemplateRow> =
            sqlx::query_as(&format!("{SELECT_TEMPLATE} WHERE category = $1 ORDER BY name"))
                .bind(category)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(template_from_row).collect())
    }

    async fn create_template(
        &self,
        template: Template,
        author: &str,
    ) -> Result<Template, StorageError> {
        let mut tx = self.pool.begin().await?;

        let insert = sqlx::query(
            r#"
            INSERT INTO prompt_templates (id, name, description, body, temperature, category, active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(template.id)
        .bind(&template.name)
        .bind(&template.description)
        .bind(&template.body)
        .bind(template.temperature)
        .bind(&template.category)
        .bind(template.active)
        .bind(template.created_at)
        .bind(template.updated_at)
        .execute(&mut *tx)
        .await;

        if let Err(e) = insert {
            if is_unique_violation(&e) {
                return Err(StorageError::DuplicateName(template.name));
            }
            return Err(e.into());
        }

        Self::insert_version(&mut tx, &template, author, None, template.created_at).await?;

        tx.commit().await?;

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
        let mut tx = self.pool.begin().await?;

        // Row lock keeps concurrent merges on the same template serialized
        let row: Option<TemplateRow> =
            sqlx::query_as(&format!("{SELECT_TEMPLATE} WHERE id = $1 FOR UPDATE"))
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;

        let mut template = row
            .map(template_from_row)
            .ok_or(StorageError::TemplateNotFound(id))?;

        patch.apply(&mut template);

        let update = sqlx::query(
            r#"
            UPDATE prompt_templates
            SET name = $1, description = $2, body = $3, temperature = $4, category = $5, active = $6, updated_at = $7
            WHERE id = $8
            "#,
        )
        .bind(&template.name)
        .bind(&template.description)
        .bind(&template.body)
        .bind(template.temperature)
        .bind(&template.category)
        .bind(template.active)
        .bind(template.updated_at)
        .bind(id)
        .execute(&mut *tx)
        .await;

        if let Err(e) = update {
            if is_unique_violation(&e) {
                return Err(StorageError::DuplicateName(template.name));
            }
            return Err(e.into());
        }

        Self::insert_version(
            &mut tx,
            &template,
            author,
            change_notes.as_deref(),
            template.updated_at,
        )
        .await?;

        tx.commit().await?;

        Ok(template)
    }

    async fn delete_template(&self, id: Uuid) -> Result<(), StorageError> {
        // Versions, usage metrics, and test results go with the
        // template via ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM prompt_templates WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::TemplateNotFound(id));
        }

        tracing::debug!(id = %id, "Template deleted");

        Ok(())
    }

    async fn list_versions(
        &self,
        template_id: Uuid,
    ) -> Result<Vec<TemplateVersion>, StorageError> {
        let rows: Vec<VersionRow> = sqlx::query_as(&format!(
            "{SELECT_VERSION} WHERE template_id = $1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(template_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(version_from_row).collect())
    }

    async fn get_version(
        &self,
        version_id: Uuid,
    ) -> Result<Option<TemplateVersion>, StorageError> {
        let row: Option<VersionRow> =
            sqlx::query_as(&format!("{SELECT_VERSION} WHERE id = $1"))
                .bind(version_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(version_from_row))
    }

    async fn insert_usage_metric(
        &self,
        metric: NewUsageMetric,
    ) -> Result<UsageMetric, StorageError> {
        let row = metric.into_metric();

        let insert = sqlx::query(
            r#"
            INSERT INTO usage_metrics (id, template_id, duration_ms, input_tokens, output_tokens, success, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(row.id)
        .bind(row.template_id)
        .bind(row.duration_ms as i64)
        .bind(row.input_tokens as i32)
        .bind(row.output_tokens as i32)
        .bind(row.success)
        .bind(row.created_at)
        .execute(&self.pool)
        .await;

        match insert {
            Ok(_) => Ok(row),
            Err(e) if is_foreign_key_violation(&e) => {
                Err(StorageError::TemplateNotFound(row.template_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn usage_metrics_since(
        &self,
        template_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<UsageMetric>, StorageError> {
        let rows: Vec<MetricRow> = sqlx::query_as(
            r#"
            SELECT id, template_id, duration_ms, input_tokens, output_tokens, success, created_at
            FROM usage_metrics
            WHERE template_id = $1 AND created_at >= $2
            ORDER BY created_at ASC
            "#,
        )
        .bind(template_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(metric_from_row).collect())
    }

    async fn insert_test_result(
        &self,
        result: NewTestResult,
    ) -> Result<TestResult, StorageError> {
        let row = result.into_result();

        let insert = sqlx::query(
            r#"
            INSERT INTO test_results (id, version_id, input, output, duration_ms, tokens_used, author, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(row.id)
        .bind(row.version_id)
        .bind(&row.input)
        .bind(&row.output)
        .bind(row.duration_ms as i64)
        .bind(row.tokens_used as i32)
        .bind(&row.author)
        .bind(row.created_at)
        .execute(&self.pool)
        .await;

        match insert {
            Ok(_) => Ok(row),
            Err(e) if is_foreign_key_violation(&e) => {
                Err(StorageError::VersionNotFound(row.version_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_test_results(&self, version_id: Uuid) -> Result<Vec<TestResult>, StorageError> {
        let rows: Vec<TestResultRow> = sqlx::query_as(
            r#"
            SELECT id, version_id, input, output, duration_ms, tokens_used, author, created_at
            FROM test_results
            WHERE version_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(version_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(test_result_from_row).collect())
    }
}
