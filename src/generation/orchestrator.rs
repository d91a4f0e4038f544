//! Generation orchestrator.
//!
//! Ties the pieces together: resolve the template through the cache,
//! substitute variables, drive the backend with retry/backoff, recover
//! structured output, and record usage asynchronously. Results cross
//! this boundary as tagged outcome values: generation callers see a
//! success flag and a message, never an error type or a panic.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::Stream;
use serde_json::Value;
use tokio_stream::StreamExt;
use uuid::Uuid;

use crate::config::GenerationConfig;
use crate::error::{CoreError, Result};
use crate::metrics::{
    BACKEND_ERRORS_TOTAL, GENERATION_CALLS_TOTAL, GENERATION_LATENCY, GENERATION_RETRIES_TOTAL,
    STRUCTURED_FALLBACKS_TOTAL,
};
use crate::template::{substitute_variables, Template, TemplateStore};
use crate::usage::MetricsCollector;

use super::backend::{GenerationBackend, GenerationRequest, SamplingParams};
use super::retry::RetryPolicy;
use super::structured::{parse_structured, validate_against_schema};

/// Appended to the prompt when a structured response failed to parse.
const JSON_RETRY_INSTRUCTION: &str = "\n\nRespond with valid JSON only. Do not include code fences, explanations, or any text outside the JSON value.";

fn schema_retry_instruction(error: &str) -> String {
    format!(
        "\n\nThe previous response did not satisfy the required schema: {error}. Respond with valid JSON that satisfies the schema, with no text outside the JSON value."
    )
}

/// Per-call options supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Overrides the template's stored temperature
    pub temperature: Option<f32>,

    /// Maximum output tokens, passed through to the backend
    pub max_tokens: Option<u32>,

    /// System instructions sent alongside the prompt
    pub system: Option<String>,

    /// Aborts the call, including pending retries, once elapsed
    pub timeout: Option<Duration>,
}

/// Result of a plain-text generation call.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub success: bool,
    pub text: Option<String>,
    pub error: Option<String>,
    pub template_id: Option<Uuid>,
    pub duration_ms: u64,
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// Backend attempts actually made
    pub attempts: u32,
}

impl GenerationOutcome {
    fn failure(template_id: Option<Uuid>, error: String, duration_ms: u64, attempts: u32) -> Self {
        Self {
            success: false,
            text: None,
            error: Some(error),
            template_id,
            duration_ms,
            input_tokens: 0,
            output_tokens: 0,
            attempts,
        }
    }
}

/// Result of a structured generation call.
///
/// `success` with `validated == false` marks the documented fallback: a
/// value that parsed but never satisfied the schema within the retry
/// budget. Callers treat it as lower-confidence.
#[derive(Debug, Clone)]
pub struct StructuredOutcome {
    pub success: bool,
    pub value: Option<Value>,
    pub validated: bool,
    pub error: Option<String>,
    pub template_id: Option<Uuid>,
    pub duration_ms: u64,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub attempts: u32,
}

/// Events yielded by a streaming generation.
#[derive(Debug)]
pub enum StreamEvent {
    /// Incremental text chunk
    Chunk(String),
    /// Terminal success event carrying the full concatenated text
    Done { text: String, duration_ms: u64 },
    /// Terminal failure event; no further events follow
    Error(String),
}

pub type GenerationStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Accumulated state of a structured-generation drive.
struct StructuredDrive {
    value: Option<Value>,
    validated: bool,
    error: Option<String>,
    attempts: u32,
    input_tokens: u32,
    output_tokens: u32,
}

/// Rough token accounting for streamed text; backends report exact
/// counts only for non-streaming calls.
fn estimate_tokens(text: &str) -> u32 {
    (text.chars().count() as u32).div_ceil(4)
}

/// Drives generation calls against the backend.
pub struct GenerationOrchestrator {
    store: Arc<TemplateStore>,
    backend: Arc<dyn GenerationBackend>,
    collector: Arc<MetricsCollector>,
    config: GenerationConfig,
}

impl GenerationOrchestrator {
    pub fn new(
        store: Arc<TemplateStore>,
        backend: Arc<dyn GenerationBackend>,
        collector: Arc<MetricsCollector>,
        config: GenerationConfig,
    ) -> Self {
        Self {
            store,
            backend,
            collector,
            config,
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_config(&self.config)
    }

    fn effective_timeout(&self, options: &GenerateOptions) -> Option<Duration> {
        options.timeout.or_else(|| {
            (self.config.default_timeout_seconds > 0)
                .then(|| Duration::from_secs(self.config.default_timeout_seconds))
        })
    }

    /// Effective sampling parameters: caller override, then the
    /// template's stored temperature, then the configured default.
    fn sampling_params(&self, template: &Template, options: &GenerateOptions) -> SamplingParams {
        SamplingParams {
            temperature: options
                .temperature
                .or(template.temperature)
                .unwrap_or(self.config.default_temperature),
            max_tokens: options.max_tokens,
        }
    }

    /// Resolve the named template, reporting failures as caller-visible
    /// outcome errors rather than typed results.
    async fn resolve(&self, name: &str) -> std::result::Result<Template, String> {
        match self.store.resolve_active(name).await {
            Ok(Some(template)) => Ok(template),
            Ok(None) => Err(format!("template not found: {name}")),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Generate plain text from a named template.
    pub async fn generate(
        &self,
        name: &str,
        variables: &HashMap<String, String>,
        options: GenerateOptions,
    ) -> GenerationOutcome {
        let started = Instant::now();

        let template = match self.resolve(name).await {
            Ok(template) => template,
            Err(error) => {
                // No template resolved, so there is no id to attribute
                // a usage metric to
                GENERATION_CALLS_TOTAL.with_label_values(&["failure"]).inc();
                return GenerationOutcome::failure(None, error, elapsed_ms(started), 0);
            }
        };

        let request = GenerationRequest {
            prompt: substitute_variables(&template.body, variables),
            system: options.system.clone(),
            params: self.sampling_params(&template, &options),
        };

        let policy = self.retry_policy();
        let mut attempts = 0u32;

        // `None` means the caller's timeout elapsed before the retry
        // loop concluded
        let invocation = {
            let run = policy.run(|attempt| {
                attempts = attempt;
                let backend = Arc::clone(&self.backend);
                let request = request.clone();
                async move { backend.invoke(&request).await }
            });

            match self.effective_timeout(&options) {
                Some(limit) => tokio::time::timeout(limit, run).await.ok(),
                None => Some(run.await),
            }
        };

        let duration_ms = elapsed_ms(started);
        GENERATION_LATENCY.observe(started.elapsed().as_secs_f64());

        match invocation {
            Some(Ok(output)) => {
                self.collector.record(
                    template.id,
                    duration_ms,
                    output.input_tokens,
                    output.output_tokens,
                    true,
                );
                GENERATION_CALLS_TOTAL.with_label_values(&["success"]).inc();

                GenerationOutcome {
                    success: true,
                    text: Some(output.text),
                    error: None,
                    template_id: Some(template.id),
                    duration_ms,
                    input_tokens: output.input_tokens,
                    output_tokens: output.output_tokens,
                    attempts,
                }
            }
            Some(Err(e)) => {
                BACKEND_ERRORS_TOTAL.inc();
                self.collector.record(template.id, duration_ms, 0, 0, false);
                GENERATION_CALLS_TOTAL.with_label_values(&["failure"]).inc();
                tracing::warn!(template = %name, error = %e, "Generation failed after retries");

                GenerationOutcome::failure(Some(template.id), e.to_string(), duration_ms, attempts)
            }
            None => {
                self.collector.record(template.id, duration_ms, 0, 0, false);
                GENERATION_CALLS_TOTAL.with_label_values(&["timeout"]).inc();
                tracing::warn!(template = %name, duration_ms, "Generation timed out");

                GenerationOutcome::failure(
                    Some(template.id),
                    format!("generation timed out after {duration_ms}ms"),
                    duration_ms,
                    attempts,
                )
            }
        }
    }

    /// Generate structured (JSON) output from a named template.
    ///
    /// Parse and schema failures re-drive the whole generation with a
    /// corrective instruction appended to the prompt, sharing one
    /// attempt budget with backend failures. When the budget runs out
    /// but some response parsed, that value is returned with
    /// `validated == false` instead of a hard failure.
    pub async fn generate_structured(
        &self,
        name: &str,
        variables: &HashMap<String, String>,
        options: GenerateOptions,
        schema: Option<&Value>,
    ) -> StructuredOutcome {
        let started = Instant::now();

        let template = match self.resolve(name).await {
            Ok(template) => template,
            Err(error) => {
                GENERATION_CALLS_TOTAL.with_label_values(&["failure"]).inc();
                return StructuredOutcome {
                    success: false,
                    value: None,
                    validated: false,
                    error: Some(error),
                    template_id: None,
                    duration_ms: elapsed_ms(started),
                    input_tokens: 0,
                    output_tokens: 0,
                    attempts: 0,
                };
            }
        };

        let base_prompt = substitute_variables(&template.body, variables);
        let policy = self.retry_policy();

        let drive = {
            let run = self.drive_structured(&template, &base_prompt, &options, schema, &policy);

            match self.effective_timeout(&options) {
                Some(limit) => tokio::time::timeout(limit, run).await.ok(),
                None => Some(run.await),
            }
        };

        let duration_ms = elapsed_ms(started);
        GENERATION_LATENCY.observe(started.elapsed().as_secs_f64());

        let Some(drive) = drive else {
            self.collector.record(template.id, duration_ms, 0, 0, false);
            GENERATION_CALLS_TOTAL.with_label_values(&["timeout"]).inc();
            tracing::warn!(template = %name, duration_ms, "Structured generation timed out");

            return StructuredOutcome {
                success: false,
                value: None,
                validated: false,
                error: Some(format!("generation timed out after {duration_ms}ms")),
                template_id: Some(template.id),
                duration_ms,
                input_tokens: 0,
                output_tokens: 0,
                attempts: 0,
            };
        };

        let success = drive.value.is_some();
        if success && !drive.validated {
            // Fallback-over-failure: a plausible payload beats no payload
            STRUCTURED_FALLBACKS_TOTAL.inc();
            tracing::warn!(
                template = %name,
                attempts = drive.attempts,
                "Returning parsed but unvalidated structured output"
            );
        }

        self.collector.record(
            template.id,
            duration_ms,
            drive.input_tokens,
            drive.output_tokens,
            success,
        );
        let outcome_label = if success { "success" } else { "failure" };
        GENERATION_CALLS_TOTAL
            .with_label_values(&[outcome_label])
            .inc();

        StructuredOutcome {
            success,
            value: drive.value,
            validated: drive.validated,
            error: drive.error,
            template_id: Some(template.id),
            duration_ms,
            input_tokens: drive.input_tokens,
            output_tokens: drive.output_tokens,
            attempts: drive.attempts,
        }
    }

    /// The structured attempt loop, separated so a caller timeout can
    /// wrap it as one future.
    async fn drive_structured(
        &self,
        template: &Template,
        base_prompt: &str,
        options: &GenerateOptions,
        schema: Option<&Value>,
        policy: &RetryPolicy,
    ) -> StructuredDrive {
        let mut prompt = base_prompt.to_string();
        let mut last_parsed: Option<Value> = None;
        let mut last_error: Option<String> = None;
        let mut input_tokens = 0u32;
        let mut output_tokens = 0u32;
        let mut attempt = 1u32;

        loop {
            let request = GenerationRequest {
                prompt: prompt.clone(),
                system: options.system.clone(),
                params: self.sampling_params(template, options),
            };

            match self.backend.invoke(&request).await {
                Err(e) => {
                    BACKEND_ERRORS_TOTAL.inc();
                    last_error = Some(e.to_string());
                    // Backend failure: same prompt again
                }
                Ok(output) => {
                    input_tokens += output.input_tokens;
                    output_tokens += output.output_tokens;

                    match parse_structured(&output.text) {
                        Err(e) => {
                            last_error = Some(format!("failed to parse structured output: {e}"));
                            prompt = format!("{base_prompt}{JSON_RETRY_INSTRUCTION}");
                        }
                        Ok(value) => match schema {
                            None => {
                                return StructuredDrive {
                                    value: Some(value),
                                    validated: true,
                                    error: None,
                                    attempts: attempt,
                                    input_tokens,
                                    output_tokens,
                                };
                            }
                            Some(schema) => match validate_against_schema(schema, &value) {
                                Ok(()) => {
                                    return StructuredDrive {
                                        value: Some(value),
                                        validated: true,
                                        error: None,
                                        attempts: attempt,
                                        input_tokens,
                                        output_tokens,
                                    };
                                }
                                Err(message) => {
                                    prompt =
                                        format!("{base_prompt}{}", schema_retry_instruction(&message));
                                    last_parsed = Some(value);
                                    last_error = Some(message);
                                }
                            },
                        },
                    }
                }
            }

            if attempt >= policy.max_attempts {
                break;
            }

            let delay = policy.delay_for(attempt);
            tracing::warn!(
                attempt,
                max_attempts = policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                template = %template.name,
                "Structured generation attempt failed, backing off"
            );
            GENERATION_RETRIES_TOTAL.inc();
            tokio::time::sleep(delay).await;
            attempt += 1;
        }

        StructuredDrive {
            value: last_parsed,
            validated: false,
            error: last_error,
            attempts: attempt,
            input_tokens,
            output_tokens,
        }
    }

    /// Generate with incremental output.
    ///
    /// Retries apply only to establishing the stream; once chunks are
    /// flowing, a mid-stream failure is reported through a terminal
    /// [`StreamEvent::Error`] and is not retried.
    pub async fn generate_stream(
        &self,
        name: &str,
        variables: &HashMap<String, String>,
        options: GenerateOptions,
    ) -> Result<GenerationStream> {
        let started = Instant::now();

        let template = self
            .store
            .resolve_active(name)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("template {name}")))?;

        let request = GenerationRequest {
            prompt: substitute_variables(&template.body, variables),
            system: options.system.clone(),
            params: self.sampling_params(&template, &options),
        };

        let policy = self.retry_policy();
        let backend = Arc::clone(&self.backend);

        let acquired = policy
            .run(|_attempt| {
                let backend = Arc::clone(&backend);
                let request = request.clone();
                async move { backend.invoke_stream(&request).await }
            })
            .await;

        let mut inner = match acquired {
            Ok(stream) => stream,
            Err(e) => {
                BACKEND_ERRORS_TOTAL.inc();
                GENERATION_CALLS_TOTAL.with_label_values(&["failure"]).inc();
                self.collector
                    .record(template.id, elapsed_ms(started), 0, 0, false);
                return Err(CoreError::Backend(e));
            }
        };

        let collector = Arc::clone(&self.collector);
        let template_id = template.id;
        let prompt_tokens = estimate_tokens(&request.prompt);

        let stream = async_stream::stream! {
            let mut full_text = String::new();
            let mut failed = false;

            while let Some(item) = inner.next().await {
                match item {
                    Ok(chunk) => {
                        full_text.push_str(&chunk);
                        yield StreamEvent::Chunk(chunk);
                    }
                    Err(e) => {
                        failed = true;
                        yield StreamEvent::Error(e.to_string());
                        break;
                    }
                }
            }

            let duration_ms = elapsed_ms(started);
            let output_tokens = estimate_tokens(&full_text);
            collector.record(template_id, duration_ms, prompt_tokens, output_tokens, !failed);

            if failed {
                BACKEND_ERRORS_TOTAL.inc();
                GENERATION_CALLS_TOTAL.with_label_values(&["failure"]).inc();
            } else {
                GENERATION_CALLS_TOTAL.with_label_values(&["success"]).inc();
                yield StreamEvent::Done { text: full_text, duration_ms };
            }
        };

        Ok(Box::pin(stream))
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
