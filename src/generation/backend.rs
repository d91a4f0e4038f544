//! Backend trait for the external text-generation service.
//!
//! The orchestrator reaches the model through this seam: give it a
//! prompt plus sampling parameters, receive text or an error,
//! optionally incrementally.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;

/// Errors that can occur while invoking the generation backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The request failed (network, service error, refusal)
    #[error("Backend request failed: {0}")]
    Request(String),

    /// The stream broke after it was established
    #[error("Backend stream failed: {0}")]
    Stream(String),

    /// The backend is temporarily unavailable
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

/// Sampling parameters passed to the backend.
#[derive(Debug, Clone)]
pub struct SamplingParams {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

/// One generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// The resolved prompt text
    pub prompt: String,

    /// System instructions, if any
    pub system: Option<String>,

    /// Sampling parameters
    pub params: SamplingParams,
}

/// A completed generation with token accounting.
#[derive(Debug, Clone)]
pub struct GenerationOutput {
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl GenerationOutput {
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Incremental text chunks from a streaming invocation.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, BackendError>> + Send>>;

/// Backend trait for the text-generation service.
///
/// # Thread Safety
///
/// Implementations must be thread-safe (`Send + Sync`) as they will be
/// shared across multiple async tasks.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Run one generation to completion.
    async fn invoke(&self, request: &GenerationRequest) -> Result<GenerationOutput, BackendError>;

    /// Run one generation, yielding incremental text chunks.
    ///
    /// Backends without native streaming inherit this single-chunk
    /// adapter over [`invoke`](Self::invoke).
    async fn invoke_stream(&self, request: &GenerationRequest) -> Result<TextStream, BackendError> {
        let output = self.invoke(request).await?;
        Ok(Box::pin(futures::stream::once(async move {
            Ok(output.text)
        })))
    }
}
