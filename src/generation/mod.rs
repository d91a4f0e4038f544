//! Generation orchestration.
//!
//! This module drives the external text-generation backend:
//! - A backend trait abstracting the model service ([`GenerationBackend`])
//! - A reusable retry policy with exponential backoff ([`RetryPolicy`])
//! - Structured-output recovery (fence stripping, JSON parsing, schema
//!   validation)
//! - The orchestrator tying templates, substitution, retries, and usage
//!   recording together

mod backend;
mod orchestrator;
mod retry;
mod structured;

pub use backend::{
    BackendError, GenerationBackend, GenerationOutput, GenerationRequest, SamplingParams,
    TextStream,
};
pub use orchestrator::{
    GenerateOptions, GenerationOrchestrator, GenerationOutcome, GenerationStream, StreamEvent,
    StructuredOutcome,
};
pub use retry::RetryPolicy;
pub use structured::{parse_structured, strip_wrappers, validate_against_schema};
