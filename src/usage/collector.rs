//! Asynchronous usage recorder and aggregator

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::metrics::USAGE_WRITE_FAILURES_TOTAL;
use crate::storage::{NewUsageMetric, StorageBackend, StorageError, UsageMetric};

/// Aggregation window, anchored at "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeRange {
    Day,
    Week,
    Month,
}

impl TimeRange {
    /// Start of the window relative to the given instant.
    pub fn since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            TimeRange::Day => now - Duration::days(1),
            TimeRange::Week => now - Duration::days(7),
            TimeRange::Month => now - Duration::days(30),
        }
    }
}

/// One calendar-day bucket of usage.
#[derive(Debug, Clone, Serialize)]
pub struct DailyUsage {
    pub date: NaiveDate,
    pub calls: u64,
    pub avg_duration_ms: f64,
    pub total_tokens: u64,
}

/// Reduced usage statistics for one template over a time range.
#[derive(Debug, Clone, Serialize)]
pub struct UsageAggregate {
    pub total_calls: u64,
    /// Percentage of successful calls; 0 when there were no calls
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    pub total_tokens: u64,
    pub per_day: Vec<DailyUsage>,
}

/// Records and aggregates per-call usage metrics.
pub struct MetricsCollector {
    storage: Arc<dyn StorageBackend>,
}

impl MetricsCollector {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// Record one concluded generation call.
    ///
    /// Fire-and-forget: the write happens on its own task, and a
    /// failure to persist is logged and counted, never surfaced to the
    /// generation caller.
    pub fn record(
        &self,
        template_id: Uuid,
        duration_ms: u64,
        input_tokens: u32,
        output_tokens: u32,
        success: bool,
    ) {
        let storage = Arc::clone(&self.storage);

        tokio::spawn(async move {
            let metric = NewUsageMetric {
                template_id,
                duration_ms,
                input_tokens,
                output_tokens,
                success,
            };

            if let Err(e) = storage.insert_usage_metric(metric).await {
                USAGE_WRITE_FAILURES_TOTAL.inc();
                tracing::warn!(
                    template_id = %template_id,
                    error = %e,
                    "Failed to persist usage metric"
                );
            }
        });
    }

    /// Aggregate a template's usage over the given range.
    pub async fn aggregate(
        &self,
        template_id: Uuid,
        range: TimeRange,
    ) -> Result<UsageAggregate, StorageError> {
        let since = range.since(Utc::now());
        let rows = self.storage.usage_metrics_since(template_id, since).await?;
        Ok(reduce_metrics(&rows))
    }
}

fn reduce_metrics(rows: &[UsageMetric]) -> UsageAggregate {
    let total_calls = rows.len() as u64;
    if total_calls == 0 {
        return UsageAggregate {
            total_calls: 0,
            success_rate: 0.0,
            avg_duration_ms: 0.0,
            total_tokens: 0,
            per_day: Vec::new(),
        };
    }

    let mut successes = 0u64;
    let mut duration_sum = 0u64;
    let mut total_tokens = 0u64;
    // BTreeMap keeps the series in calendar order
    let mut days: BTreeMap<NaiveDate, DailyUsage> = BTreeMap::new();

    for row in rows {
        if row.success {
            successes += 1;
        }
        duration_sum += row.duration_ms;
        let tokens = u64::from(row.input_tokens) + u64::from(row.output_tokens);
        total_tokens += tokens;

        let date = row.created_at.date_naive();
        let bucket = days.entry(date).or_insert_with(|| DailyUsage {
            date,
            calls: 0,
            avg_duration_ms: 0.0,
            total_tokens: 0,
        });
        bucket.calls += 1;
        // Running average, updated per row
        bucket.avg_duration_ms +=
            (row.duration_ms as f64 - bucket.avg_duration_ms) / bucket.calls as f64;
        bucket.total_tokens += tokens;
    }

    UsageAggregate {
        total_calls,
        success_rate: successes as f64 / total_calls as f64 * 100.0,
        avg_duration_ms: duration_sum as f64 / total_calls as f64,
        total_tokens,
        per_day: days.into_values().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::template::CreateTemplateRequest;

    fn metric(
        template_id: Uuid,
        duration_ms: u64,
        success: bool,
        created_at: DateTime<Utc>,
    ) -> UsageMetric {
        UsageMetric {
            id: Uuid::new_v4(),
            template_id,
            duration_ms,
            input_tokens: 10,
            output_tokens: 20,
            success,
            created_at,
        }
    }

    #[test]
    fn test_reduce_empty_is_all_zero() {
        let aggregate = reduce_metrics(&[]);
        assert_eq!(aggregate.total_calls, 0);
        assert_eq!(aggregate.success_rate, 0.0);
        assert_eq!(aggregate.avg_duration_ms, 0.0);
        assert!(aggregate.per_day.is_empty());
    }

    #[test]
    fn test_reduce_rates_and_averages() {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let rows = vec![
            metric(id, 100, true, now),
            metric(id, 200, false, now),
            metric(id, 300, true, now),
        ];

        let aggregate = reduce_metrics(&rows);
        assert_eq!(aggregate.total_calls, 3);
        assert!((aggregate.success_rate - 66.666).abs() < 0.01);
        assert_eq!(aggregate.avg_duration_ms, 200.0);
        assert_eq!(aggregate.total_tokens, 90);
    }

    #[test]
    fn test_reduce_buckets_by_calendar_day() {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let yesterday = now - Duration::days(1);
        let rows = vec![
            metric(id, 100, true, yesterday),
            metric(id, 300, true, yesterday),
            metric(id, 50, true, now),
        ];

        let aggregate = reduce_metrics(&rows);
        assert_eq!(aggregate.per_day.len(), 2);
        // Calendar order: yesterday first
        assert_eq!(aggregate.per_day[0].calls, 2);
        assert_eq!(aggregate.per_day[0].avg_duration_ms, 200.0);
        assert_eq!(aggregate.per_day[0].total_tokens, 60);
        assert_eq!(aggregate.per_day[1].calls, 1);
    }

    #[test]
    fn test_time_range_windows() {
        let now = Utc::now();
        assert_eq!(TimeRange::Day.since(now), now - Duration::days(1));
        assert_eq!(TimeRange::Week.since(now), now - Duration::days(7));
        assert_eq!(TimeRange::Month.since(now), now - Duration::days(30));
    }

    #[tokio::test]
    async fn test_record_is_fire_and_forget() {
        let storage = Arc::new(MemoryStorage::new());
        let template = storage
            .create_template(
                CreateTemplateRequest {
                    name: "greet".to_string(),
                    description: None,
                    body: "Hello".to_string(),
                    temperature: None,
                    category: None,
                    active: true,
                }
                .into_template(),
                "tester",
            )
            .await
            .unwrap();

        let collector = MetricsCollector::new(storage.clone());
        collector.record(template.id, 123, 10, 20, true);

        // The write happens on a background task
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let rows = storage
            .usage_metrics_since(template.id, Utc::now() - Duration::days(1))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].duration_ms, 123);
    }

    #[tokio::test]
    async fn test_record_failure_is_absorbed() {
        let storage = Arc::new(MemoryStorage::new());
        let collector = MetricsCollector::new(storage);

        // Unknown template: the insert fails, the caller never sees it
        collector.record(Uuid::new_v4(), 1, 0, 0, false);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn test_aggregate_over_storage() {
        let storage = Arc::new(MemoryStorage::new());
        let template = storage
            .create_template(
                CreateTemplateRequest {
                    name: "greet".to_string(),
                    description: None,
                    body: "Hello".to_string(),
                    temperature: None,
                    category: None,
                    active: true,
                }
                .into_template(),
                "tester",
            )
            .await
            .unwrap();

        for (duration, success) in [(100u64, true), (200, false), (300, true)] {
            storage
                .insert_usage_metric(NewUsageMetric {
                    template_id: template.id,
                    duration_ms: duration,
                    input_tokens: 10,
                    output_tokens: 20,
                    success,
                })
                .await
                .unwrap();
        }

        let collector = MetricsCollector::new(storage);
        let aggregate = collector
            .aggregate(template.id, TimeRange::Week)
            .await
            .unwrap();

        assert_eq!(aggregate.total_calls, 3);
        assert!((aggregate.success_rate - 66.666).abs() < 0.01);
        assert_eq!(aggregate.avg_duration_ms, 200.0);
    }
}
