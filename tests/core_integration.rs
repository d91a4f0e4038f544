//! Cross-component integration tests
//!
//! These tests verify interactions between the template store, cache,
//! orchestrator, usage collector, and test runner against the memory
//! storage backend and a scripted generation backend, without requiring
//! PostgreSQL or a real model service.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use lumen_prompt_core::config::{GenerationConfig, Settings};
use lumen_prompt_core::generation::{
    BackendError, GenerateOptions, GenerationBackend, GenerationOutput, GenerationRequest,
    StreamEvent,
};
use lumen_prompt_core::storage::{MemoryStorage, StorageBackend};
use lumen_prompt_core::template::{CreateTemplateRequest, TemplatePatch};
use lumen_prompt_core::usage::TimeRange;
use lumen_prompt_core::{CoreError, PromptCore};

/// Generation backend stub driven by a scripted response list.
///
/// The last response repeats once the script runs out. Call instants
/// are recorded so tests can assert on backoff spacing.
struct ScriptedBackend {
    responses: Mutex<Vec<Result<String, String>>>,
    calls: Mutex<Vec<Instant>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    fn new(responses: Vec<Result<String, String>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses),
            calls: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn call_instants(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().clone()
    }

    fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn invoke(&self, request: &GenerationRequest) -> Result<GenerationOutput, BackendError> {
        self.calls.lock().unwrap().push(Instant::now());
        self.prompts.lock().unwrap().push(request.prompt.clone());

        let responses = self.responses.lock().unwrap();
        let index = (self.call_count() - 1).min(responses.len() - 1);
        match &responses[index] {
            Ok(text) => Ok(GenerationOutput {
                text: text.clone(),
                input_tokens: 10,
                output_tokens: 20,
            }),
            Err(message) => Err(BackendError::Request(message.clone())),
        }
    }
}

fn test_settings(base_delay_ms: u64) -> Settings {
    Settings {
        storage: Default::default(),
        cache: Default::default(),
        generation: GenerationConfig {
            base_delay_ms,
            ..Default::default()
        },
    }
}

struct TestEnvironment {
    core: PromptCore,
    backend: Arc<ScriptedBackend>,
    storage: Arc<MemoryStorage>,
}

fn create_test_environment(responses: Vec<Result<String, String>>) -> TestEnvironment {
    create_test_environment_with_delay(responses, 1)
}

fn create_test_environment_with_delay(
    responses: Vec<Result<String, String>>,
    base_delay_ms: u64,
) -> TestEnvironment {
    let backend = ScriptedBackend::new(responses);
    let storage = Arc::new(MemoryStorage::new());
    let core = PromptCore::with_storage(
        test_settings(base_delay_ms),
        backend.clone(),
        storage.clone(),
    );

    TestEnvironment {
        core,
        backend,
        storage,
    }
}

fn greet_request() -> CreateTemplateRequest {
    CreateTemplateRequest {
        name: "greet".to_string(),
        description: Some("Greeting prompt".to_string()),
        body: "Hello {{name}}, temperature {{t}}".to_string(),
        temperature: Some(0.4),
        category: Some("demo".to_string()),
        active: true,
    }
}

fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

// =============================================================================
// Template Store + Versioning Integration Tests
// =============================================================================

mod versioning_tests {
    use super::*;

    #[tokio::test]
    async fn test_create_snapshots_exactly_one_initial_version() {
        let env = create_test_environment(vec![Ok("unused".to_string())]);

        let template = env.core.store.create(greet_request(), "alice").await.unwrap();
        let versions = env.core.store.list_versions(template.id).await.unwrap();

        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].body, template.body);
        assert_eq!(versions[0].temperature, template.temperature);
        assert_eq!(versions[0].author, "alice");
    }

    #[tokio::test]
    async fn test_n_updates_produce_n_plus_one_versions_newest_first() {
        let env = create_test_environment(vec![Ok("unused".to_string())]);
        let template = env.core.store.create(greet_request(), "alice").await.unwrap();

        for i in 0..4 {
            let patch = TemplatePatch {
                body: Some(format!("Body revision {i}")),
                ..Default::default()
            };
            env.core
                .store
                .update(template.id, patch, "bob", Some(format!("revision {i}")))
                .await
                .unwrap();
        }

        let versions = env.core.store.list_versions(template.id).await.unwrap();
        assert_eq!(versions.len(), 5);
        assert_eq!(versions[0].body, "Body revision 3");
        assert_eq!(versions[4].body, "Hello {{name}}, temperature {{t}}");

        // Newest first
        for pair in versions.windows(2) {
            assert!(pair[0].created_at >= pair[1].created_at);
        }
    }

    #[tokio::test]
    async fn test_partial_update_preserves_unspecified_fields() {
        let env = create_test_environment(vec![Ok("unused".to_string())]);
        let template = env.core.store.create(greet_request(), "alice").await.unwrap();

        let patch = TemplatePatch {
            description: Some(Some("Updated description".to_string())),
            ..Default::default()
        };
        let updated = env
            .core
            .store
            .update(template.id, patch, "bob", None)
            .await
            .unwrap();

        // Template row keeps the untouched fields
        assert_eq!(updated.body, template.body);
        assert_eq!(updated.temperature, template.temperature);
        assert_eq!(updated.category, template.category);
        assert_eq!(updated.description.as_deref(), Some("Updated description"));

        // And so does the new version snapshot
        let versions = env.core.store.list_versions(template.id).await.unwrap();
        assert_eq!(versions[0].body, template.body);
        assert_eq!(versions[0].temperature, template.temperature);
    }

    #[tokio::test]
    async fn test_update_is_not_idempotent() {
        let env = create_test_environment(vec![Ok("unused".to_string())]);
        let template = env.core.store.create(greet_request(), "alice").await.unwrap();

        let patch = TemplatePatch {
            body: Some("Same body".to_string()),
            ..Default::default()
        };
        env.core
            .store
            .update(template.id, patch.clone(), "bob", None)
            .await
            .unwrap();
        env.core
            .store
            .update(template.id, patch, "bob", None)
            .await
            .unwrap();

        let versions = env.core.store.list_versions(template.id).await.unwrap();
        assert_eq!(versions.len(), 3);
        assert_ne!(versions[0].id, versions[1].id);
        assert_eq!(versions[0].body, versions[1].body);
    }

    #[tokio::test]
    async fn test_delete_cascades_through_versions_metrics_and_test_results() {
        let env = create_test_environment(vec![Ok("output".to_string())]);
        let template = env.core.store.create(greet_request(), "alice").await.unwrap();
        let version = env.core.store.list_versions(template.id).await.unwrap()[0].clone();

        // One generation call -> one usage metric
        let outcome = env
            .core
            .orchestrator
            .generate("greet", &vars(&[("name", "Ada")]), GenerateOptions::default())
            .await;
        assert!(outcome.success);
        tokio::time::sleep(Duration::from_millis(20)).await;

        // One manual test -> one test result
        env.core
            .test_runner
            .run_test(version.id, "sample input", &HashMap::new(), "alice")
            .await
            .unwrap();

        env.core.store.delete(template.id).await.unwrap();

        assert!(matches!(
            env.core.store.get(template.id).await,
            Err(CoreError::NotFound(_))
        ));
        assert!(env
            .storage
            .usage_metrics_since(template.id, chrono::Utc::now() - chrono::Duration::days(1))
            .await
            .unwrap()
            .is_empty());
        assert!(env
            .storage
            .list_test_results(version.id)
            .await
            .unwrap()
            .is_empty());
    }
}

// =============================================================================
// Cache Correctness Integration Tests
// =============================================================================

mod cache_tests {
    use super::*;

    #[tokio::test]
    async fn test_update_invalidates_before_returning() {
        let env = create_test_environment(vec![Ok("unused".to_string())]);
        let template = env.core.store.create(greet_request(), "alice").await.unwrap();

        // Prime the cache with the original body
        let resolved = env.core.store.resolve_active("greet").await.unwrap().unwrap();
        assert_eq!(resolved.body, "Hello {{name}}, temperature {{t}}");

        let patch = TemplatePatch {
            body: Some("Rewritten {{name}}".to_string()),
            ..Default::default()
        };
        env.core
            .store
            .update(template.id, patch, "bob", None)
            .await
            .unwrap();

        // The new body must be observable immediately, not after TTL expiry
        let resolved = env.core.store.resolve_active("greet").await.unwrap().unwrap();
        assert_eq!(resolved.body, "Rewritten {{name}}");
    }

    #[tokio::test]
    async fn test_deactivation_hides_template_from_generation_lookups() {
        let env = create_test_environment(vec![Ok("unused".to_string())]);
        let template = env.core.store.create(greet_request(), "alice").await.unwrap();
        env.core.store.resolve_active("greet").await.unwrap();

        let patch = TemplatePatch {
            active: Some(false),
            ..Default::default()
        };
        env.core
            .store
            .update(template.id, patch, "bob", None)
            .await
            .unwrap();

        assert!(env.core.store.resolve_active("greet").await.unwrap().is_none());
        // Still editable and fetchable by id
        assert!(env.core.store.get(template.id).await.is_ok());
    }
}

// =============================================================================
// Generation Orchestrator Integration Tests
// =============================================================================

mod generation_tests {
    use super::*;

    #[tokio::test]
    async fn test_substitution_leaves_unresolved_placeholders_literal() {
        let env = create_test_environment(vec![Ok("done".to_string())]);
        env.core.store.create(greet_request(), "alice").await.unwrap();

        let outcome = env
            .core
            .orchestrator
            .generate("greet", &vars(&[("name", "Ada")]), GenerateOptions::default())
            .await;

        assert!(outcome.success);
        assert_eq!(
            env.backend.last_prompt().as_deref(),
            Some("Hello Ada, temperature {{t}}")
        );
    }

    #[tokio::test]
    async fn test_retry_succeeds_on_third_attempt_with_increasing_backoff() {
        let env = create_test_environment_with_delay(
            vec![
                Err("first failure".to_string()),
                Err("second failure".to_string()),
                Ok("third attempt".to_string()),
            ],
            30,
        );
        env.core.store.create(greet_request(), "alice").await.unwrap();

        let outcome = env
            .core
            .orchestrator
            .generate("greet", &HashMap::new(), GenerateOptions::default())
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.text.as_deref(), Some("third attempt"));
        assert_eq!(env.backend.call_count(), 3);

        // Backoff doubles: the second gap is roughly twice the first
        let instants = env.backend.call_instants();
        let first_gap = instants[1] - instants[0];
        let second_gap = instants[2] - instants[1];
        assert!(first_gap >= Duration::from_millis(30));
        assert!(second_gap > first_gap);
    }

    #[tokio::test]
    async fn test_exhausted_retries_return_tagged_failure() {
        let env = create_test_environment(vec![Err("model offline".to_string())]);
        env.core.store.create(greet_request(), "alice").await.unwrap();

        let outcome = env
            .core
            .orchestrator
            .generate("greet", &HashMap::new(), GenerateOptions::default())
            .await;

        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("model offline"));
        assert_eq!(env.backend.call_count(), 3);
    }

    #[tokio::test]
    async fn test_structured_fallback_prefers_parsed_value_over_failure() {
        let schema = json!({
            "type": "object",
            "properties": {"count": {"type": "integer"}},
            "required": ["count"]
        });

        // JSON-parseable but schema-invalid on every attempt
        let env = create_test_environment(vec![Ok("{\"count\": \"three\"}".to_string())]);
        env.core.store.create(greet_request(), "alice").await.unwrap();

        let outcome = env
            .core
            .orchestrator
            .generate_structured(
                "greet",
                &HashMap::new(),
                GenerateOptions::default(),
                Some(&schema),
            )
            .await;

        assert!(outcome.success);
        assert!(!outcome.validated);
        assert_eq!(outcome.value.unwrap()["count"], "three");
        assert_eq!(env.backend.call_count(), 3);
    }

    #[tokio::test]
    async fn test_structured_parse_retry_augments_prompt() {
        let env = create_test_environment(vec![
            Ok("sure! here is your JSON".to_string()),
            Ok("```json\n{\"ok\": true}\n```".to_string()),
        ]);
        env.core.store.create(greet_request(), "alice").await.unwrap();

        let outcome = env
            .core
            .orchestrator
            .generate_structured("greet", &HashMap::new(), GenerateOptions::default(), None)
            .await;

        assert!(outcome.success);
        assert!(outcome.validated);
        assert_eq!(outcome.value.unwrap()["ok"], true);

        // The retried prompt carries the corrective instruction
        let last = env.backend.last_prompt().unwrap();
        assert!(last.contains("valid JSON"));
    }

    #[tokio::test]
    async fn test_generation_records_usage_metrics() {
        let env = create_test_environment(vec![Ok("done".to_string())]);
        let template = env.core.store.create(greet_request(), "alice").await.unwrap();

        let outcome = env
            .core
            .orchestrator
            .generate("greet", &HashMap::new(), GenerateOptions::default())
            .await;
        assert!(outcome.success);

        // The metric write is fire-and-forget; give its task a beat
        tokio::time::sleep(Duration::from_millis(20)).await;

        let aggregate = env
            .core
            .collector
            .aggregate(template.id, TimeRange::Day)
            .await
            .unwrap();
        assert_eq!(aggregate.total_calls, 1);
        assert_eq!(aggregate.success_rate, 100.0);
        assert_eq!(aggregate.total_tokens, 30);
    }

    #[tokio::test]
    async fn test_unknown_template_records_nothing() {
        let env = create_test_environment(vec![Ok("unused".to_string())]);

        let outcome = env
            .core
            .orchestrator
            .generate("missing", &HashMap::new(), GenerateOptions::default())
            .await;

        assert!(!outcome.success);
        assert_eq!(env.backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_streaming_yields_chunks_and_completion() {
        use futures::StreamExt;

        let env = create_test_environment(vec![Ok("streamed output".to_string())]);
        env.core.store.create(greet_request(), "alice").await.unwrap();

        let mut stream = env
            .core
            .orchestrator
            .generate_stream("greet", &HashMap::new(), GenerateOptions::default())
            .await
            .unwrap();

        let mut saw_chunk = false;
        let mut saw_done = false;
        while let Some(event) = stream.next().await {
            match event {
                StreamEvent::Chunk(_) => saw_chunk = true,
                StreamEvent::Done { text, .. } => {
                    assert_eq!(text, "streamed output");
                    saw_done = true;
                }
                StreamEvent::Error(e) => panic!("unexpected stream error: {e}"),
            }
        }
        assert!(saw_chunk);
        assert!(saw_done);
    }
}

// =============================================================================
// Usage Aggregation Integration Tests
// =============================================================================

mod usage_tests {
    use super::*;

    #[tokio::test]
    async fn test_aggregate_success_rate_and_average_duration() {
        let env = create_test_environment(vec![Ok("unused".to_string())]);
        let template = env.core.store.create(greet_request(), "alice").await.unwrap();

        for (duration, success) in [(100u64, true), (200, false), (300, true)] {
            env.core.collector.record(template.id, duration, 10, 20, success);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        let aggregate = env
            .core
            .collector
            .aggregate(template.id, TimeRange::Week)
            .await
            .unwrap();

        assert_eq!(aggregate.total_calls, 3);
        assert!((aggregate.success_rate - 66.67).abs() < 0.01);
        assert_eq!(aggregate.avg_duration_ms, 200.0);
        assert_eq!(aggregate.per_day.len(), 1);
        assert_eq!(aggregate.per_day[0].calls, 3);
    }

    #[tokio::test]
    async fn test_aggregate_with_no_rows_is_zero() {
        let env = create_test_environment(vec![Ok("unused".to_string())]);
        let template = env.core.store.create(greet_request(), "alice").await.unwrap();

        let aggregate = env
            .core
            .collector
            .aggregate(template.id, TimeRange::Month)
            .await
            .unwrap();

        assert_eq!(aggregate.total_calls, 0);
        assert_eq!(aggregate.success_rate, 0.0);
    }
}

// =============================================================================
// Test Runner Integration Tests
// =============================================================================

mod test_runner_tests {
    use super::*;

    #[tokio::test]
    async fn test_run_against_historical_version() {
        let env = create_test_environment(vec![Ok("test output".to_string())]);
        let template = env.core.store.create(greet_request(), "alice").await.unwrap();

        // Update, keeping the original version around
        let patch = TemplatePatch {
            body: Some("Newer body {{name}}".to_string()),
            ..Default::default()
        };
        env.core
            .store
            .update(template.id, patch, "bob", None)
            .await
            .unwrap();

        let versions = env.core.store.list_versions(template.id).await.unwrap();
        let original = versions.last().unwrap();
        assert_eq!(original.body, "Hello {{name}}, temperature {{t}}");

        let result = env
            .core
            .test_runner
            .run_test(
                original.id,
                "please greet",
                &vars(&[("name", "Ada")]),
                "alice",
            )
            .await
            .unwrap();

        assert_eq!(result.output, "test output");
        assert_eq!(result.version_id, original.id);
    }

    #[tokio::test]
    async fn test_runs_stay_out_of_usage_aggregates() {
        let env = create_test_environment(vec![Ok("test output".to_string())]);
        let template = env.core.store.create(greet_request(), "alice").await.unwrap();
        let version = env.core.store.list_versions(template.id).await.unwrap()[0].clone();

        env.core
            .test_runner
            .run_test(version.id, "input", &HashMap::new(), "alice")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let aggregate = env
            .core
            .collector
            .aggregate(template.id, TimeRange::Day)
            .await
            .unwrap();
        assert_eq!(aggregate.total_calls, 0);

        let results = env.core.test_runner.list_results(version.id).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_version_is_not_found() {
        let env = create_test_environment(vec![Ok("unused".to_string())]);

        let result = env
            .core
            .test_runner
            .run_test(Uuid::new_v4(), "input", &HashMap::new(), "alice")
            .await;
        assert!(matches!(result, Err(CoreError::NotFound(_))));
    }
}

// =============================================================================
// Concurrency Integration Tests
// =============================================================================

mod concurrency_tests {
    use super::*;

    #[tokio::test]
    async fn test_concurrent_resolves_and_updates() -> anyhow::Result<()> {
        let env = create_test_environment(vec![Ok("unused".to_string())]);
        let template = env.core.store.create(greet_request(), "alice").await?;
        let store = env.core.store.clone();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            let id = template.id;
            handles.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    let patch = TemplatePatch {
                        body: Some(format!("Concurrent body {i}")),
                        ..Default::default()
                    };
                    store.update(id, patch, "bob", None).await.map(|_| ())
                } else {
                    store.resolve_active("greet").await.map(|_| ())
                }
            }));
        }

        for handle in handles {
            handle.await??;
        }

        // Initial version plus one per update
        let versions = env.core.store.list_versions(template.id).await?;
        assert_eq!(versions.len(), 5);

        // The cache observes the store after the last write
        let resolved = env
            .core
            .store
            .resolve_active("greet")
            .await?
            .expect("template should resolve");
        assert!(resolved.body.starts_with("Concurrent body"));

        Ok(())
    }
}
