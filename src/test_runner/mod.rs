//! Manual test invocations against specific template versions.
//!
//! Lets an author exercise an exact historical version body (not
//! necessarily the template's current one) with sample input. Each run
//! invokes the backend once, with no retry budget, and persists a
//! `TestResult` row keyed to the version. Test traffic never reaches
//! the usage metrics collector, so production statistics stay clean.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use uuid::Uuid;

use crate::config::GenerationConfig;
use crate::error::{CoreError, Result};
use crate::generation::{GenerationBackend, GenerationRequest, SamplingParams};
use crate::storage::{NewTestResult, StorageBackend, TestResult};
use crate::template::substitute_variables;

/// Runs ad-hoc, non-metered tests against template versions.
pub struct TestRunner {
    storage: Arc<dyn StorageBackend>,
    backend: Arc<dyn GenerationBackend>,
    default_temperature: f32,
}

impl TestRunner {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        backend: Arc<dyn GenerationBackend>,
        config: &GenerationConfig,
    ) -> Self {
        Self {
            storage,
            backend,
            default_temperature: config.default_temperature,
        }
    }

    /// Run one test against a specific version.
    ///
    /// Variables are substituted into the version's stored body, which
    /// rides as system instructions; `input` is the sample user prompt.
    pub async fn run_test(
        &self,
        version_id: Uuid,
        input: &str,
        variables: &HashMap<String, String>,
        author: &str,
    ) -> Result<TestResult> {
        let version = self
            .storage
            .get_version(version_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("template version {version_id}")))?;

        let rendered = substitute_variables(&version.body, variables);
        let request = GenerationRequest {
            prompt: input.to_string(),
            system: Some(rendered),
            params: SamplingParams {
                temperature: version.temperature.unwrap_or(self.default_temperature),
                max_tokens: None,
            },
        };

        let started = Instant::now();
        let output = self.backend.invoke(&request).await?;
        let duration_ms = started.elapsed().as_millis() as u64;

        let result = self
            .storage
            .insert_test_result(NewTestResult {
                version_id,
                input: input.to_string(),
                output: output.text.clone(),
                duration_ms,
                tokens_used: output.total_tokens(),
                author: author.to_string(),
            })
            .await?;

        tracing::info!(
            version_id = %version_id,
            author = %author,
            duration_ms,
            "Test run recorded"
        );

        Ok(result)
    }

    /// List recorded test results for a version, newest first.
    pub async fn list_results(&self, version_id: Uuid) -> Result<Vec<TestResult>> {
        Ok(self.storage.list_test_results(version_id).await?)
    }
}
