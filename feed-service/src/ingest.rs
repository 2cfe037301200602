//! Fetch cycle
//!
//! One cycle is stateless: fetch the feed, normalize, insert what the
//! store has not seen. The unique `(indicator, indicator_type)` index is
//! the deduplication oracle; `ON CONFLICT DO NOTHING` makes re-runs
//! against the same feed data idempotent.

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::Utc;
use sqlx::PgPool;
use tracing::Instrument;

use crate::error::FetchResult;
use crate::feed::{Candidate, FeedClient};
use crate::telemetry::{self, FetchMetrics};

/// Outcome of a single fetch cycle
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub inserted: usize,
    pub duplicates: usize,
}

/// Run one fetch cycle against the feed and the store.
///
/// Failure aborts this cycle only; the caller's next tick retries with no
/// carried-over state.
pub async fn run_cycle(
    pool: &PgPool,
    client: &FeedClient,
    metrics: &FetchMetrics,
    source: &str,
) -> FetchResult<CycleReport> {
    let started = Instant::now();
    metrics.record_resources();

    let span = tracing::info_span!(
        "feed.pull.indicators",
        "feed.indicator.count" = tracing::field::Empty,
        "ingest.inserted" = tracing::field::Empty,
        "ingest.duplicates" = tracing::field::Empty,
    );

    let report = async {
        tracing::info!("📡 Fetching threats from upstream feed...");
        let candidates = client.fetch_recent().await?;
        tracing::info!("Extracted {} indicators", candidates.len());

        for (indicator_type, count) in count_by_type(&candidates) {
            metrics.record_fetched(&indicator_type, count);
        }

        let trace_id = telemetry::current_trace_id();

        let mut inserted = 0;
        let mut duplicates = 0;
        for candidate in &candidates {
            if insert_candidate(pool, candidate, source, trace_id.as_deref()).await? {
                tracing::info!(
                    "✅ Inserted: {} ({})",
                    candidate.indicator,
                    candidate.indicator_type
                );
                metrics.record_inserted(&candidate.indicator_type);
                inserted += 1;
            } else {
                duplicates += 1;
            }
        }

        let span = tracing::Span::current();
        span.record("feed.indicator.count", candidates.len() as i64);
        span.record("ingest.inserted", inserted as i64);
        span.record("ingest.duplicates", duplicates as i64);

        tracing::info!("🧠 {} new indicators, 💤 {} duplicates", inserted, duplicates);

        Ok(CycleReport {
            fetched: candidates.len(),
            inserted,
            duplicates,
        })
    }
    .instrument(span)
    .await;

    metrics.record_cycle(started.elapsed().as_secs_f64());
    report
}

/// Insert a candidate unless `(indicator, indicator_type)` already exists.
/// Returns whether a row was actually written.
async fn insert_candidate(
    pool: &PgPool,
    candidate: &Candidate,
    source: &str,
    trace_id: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO indicators (indicator, indicator_type, severity, first_seen, tags, source, trace_id, fetched_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (indicator, indicator_type) DO NOTHING
        "#,
    )
    .bind(&candidate.indicator)
    .bind(&candidate.indicator_type)
    .bind(&candidate.severity)
    .bind(candidate.first_seen)
    .bind(&candidate.tags)
    .bind(source)
    .bind(trace_id)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

fn count_by_type(candidates: &[Candidate]) -> BTreeMap<String, u64> {
    let mut counts = BTreeMap::new();
    for candidate in candidates {
        *counts.entry(candidate.indicator_type.clone()).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(value: &str, indicator_type: &str) -> Candidate {
        Candidate {
            indicator: value.to_string(),
            indicator_type: indicator_type.to_string(),
            severity: "unknown".to_string(),
            first_seen: Utc::now(),
            tags: Vec::new(),
        }
    }

    #[test]
    fn counts_group_by_type() {
        let candidates = vec![
            candidate("198.51.100.7", "ipv4"),
            candidate("198.51.100.8", "ipv4"),
            candidate("bad-host.example", "domain"),
        ];

        let counts = count_by_type(&candidates);
        assert_eq!(counts.get("ipv4"), Some(&2));
        assert_eq!(counts.get("domain"), Some(&1));
        assert_eq!(counts.len(), 2);
    }

    #[test]
    fn empty_cycle_report_is_all_zero() {
        let report = CycleReport::default();
        assert_eq!(report.fetched, 0);
        assert_eq!(report.inserted, 0);
        assert_eq!(report.duplicates, 0);
    }
}
