//! Prometheus metrics for the prompt core.
//!
//! Operational process counters, distinct from the per-template
//! `UsageMetric` rows persisted by the usage collector:
//! - Generation metrics (calls by outcome, retries, latency)
//! - Template cache metrics (hits, misses)
//! - Usage recorder metrics (absorbed write failures)

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Encoder, Histogram,
    IntCounter, IntCounterVec, TextEncoder,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "lumen_prompt";

lazy_static! {
    // ============================================================================
    // Generation Metrics
    // ============================================================================

    /// Generation calls by outcome (success, failure, timeout)
    pub static ref GENERATION_CALLS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_generation_calls_total", METRIC_PREFIX),
        "Total generation calls",
        &["outcome"]
    ).unwrap();

    /// Backend retries across all generation calls
    pub static ref GENERATION_RETRIES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_generation_retries_total", METRIC_PREFIX),
        "Total generation retry attempts"
    ).unwrap();

    /// Generation call latency including retries
    pub static ref GENERATION_LATENCY: Histogram = register_histogram!(
        format!("{}_generation_latency_seconds", METRIC_PREFIX),
        "Generation call latency in seconds",
        vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    ).unwrap();

    /// Structured generations that fell back to an unvalidated value
    pub static ref STRUCTURED_FALLBACKS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_structured_fallbacks_total", METRIC_PREFIX),
        "Total structured generations returning a parsed but unvalidated value"
    ).unwrap();

    /// Backend invocation errors
    pub static ref BACKEND_ERRORS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_backend_errors_total", METRIC_PREFIX),
        "Total generation backend errors"
    ).unwrap();

    // ============================================================================
    // Template Cache Metrics
    // ============================================================================

    /// Template lookups served from the cache
    pub static ref CACHE_HITS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_cache_hits_total", METRIC_PREFIX),
        "Total template lookups served from the cache"
    ).unwrap();

    /// Template lookups that went to the store
    pub static ref CACHE_MISSES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_cache_misses_total", METRIC_PREFIX),
        "Total template lookups that missed the cache"
    ).unwrap();

    // ============================================================================
    // Usage Recorder Metrics
    // ============================================================================

    /// Usage metric writes that failed and were absorbed
    pub static ref USAGE_WRITE_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_usage_write_failures_total", METRIC_PREFIX),
        "Total usage metric writes that failed to persist"
    ).unwrap();
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_metrics() {
        // Initialize some metrics first (lazy_static requires first access)
        GENERATION_RETRIES_TOTAL.inc();

        let result = encode_metrics();
        assert!(result.is_ok());
        let output = result.unwrap();
        assert!(output.contains("lumen_prompt_generation_retries_total"));
    }

    #[test]
    fn test_generation_metrics() {
        GENERATION_CALLS_TOTAL.with_label_values(&["success"]).inc();
        GENERATION_CALLS_TOTAL.with_label_values(&["failure"]).inc();
        GENERATION_LATENCY.observe(0.5);
        STRUCTURED_FALLBACKS_TOTAL.inc();
        // Just verify no panics
    }

    #[test]
    fn test_cache_metrics() {
        CACHE_HITS_TOTAL.inc();
        CACHE_MISSES_TOTAL.inc();
        USAGE_WRITE_FAILURES_TOTAL.inc();
        // Just verify no panics
    }
}
