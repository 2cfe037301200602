//! Indicator model and filter translation

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// Hard cap on a single page of results, whatever the caller asks for
pub const MAX_PAGE_SIZE: i64 = 500;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Indicator {
    pub id: Uuid,
    pub indicator: String,
    pub indicator_type: String,
    pub severity: String,
    pub first_seen: DateTime<Utc>,
    pub tags: Vec<String>,
    pub source: String,
    pub trace_id: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

/// Optional filter parameters, AND-combined.
///
/// Unrecognized values are passed through as equality filters and simply
/// match nothing; they are never a request error.
#[derive(Debug, Deserialize, Default)]
pub struct IndicatorFilter {
    #[serde(rename = "type")]
    pub indicator_type: Option<String>,
    pub severity: Option<String>,
    pub tags: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub limit: Option<String>,
}

impl IndicatorFilter {
    /// Page size after applying the configured default and the hard cap.
    /// A non-numeric limit falls back to the default instead of erroring.
    pub fn effective_limit(&self, default_page_size: i64) -> i64 {
        self.limit
            .as_deref()
            .and_then(|raw| raw.trim().parse().ok())
            .unwrap_or(default_page_size)
            .clamp(1, MAX_PAGE_SIZE)
    }

    /// Parse the date-range parameters.
    ///
    /// Returns `None` when a date parameter is present but unparseable;
    /// the caller treats that as "matches nothing" rather than an error.
    pub fn date_range(&self) -> Option<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)> {
        let from = match &self.from {
            Some(raw) => Some(parse_date_param(raw)?),
            None => None,
        };
        let to = match &self.to {
            Some(raw) => Some(parse_date_param(raw)?),
            None => None,
        };
        Some((from, to))
    }
}

/// Accept RFC 3339 timestamps or bare `YYYY-MM-DD` dates
pub fn parse_date_param(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ndt| Utc.from_utc_datetime(&ndt))
}

impl Indicator {
    /// Query matching indicators, most recent first.
    ///
    /// NULL binds short-circuit their clause, so every filter is optional
    /// while the SQL stays a single prepared statement.
    pub async fn list(
        pool: &PgPool,
        filter: &IndicatorFilter,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Indicator>(
            r#"
            SELECT * FROM indicators
            WHERE ($1::text IS NULL OR indicator_type = $1)
              AND ($2::text IS NULL OR severity = $2)
              AND ($3::text IS NULL OR $3 = ANY(tags))
              AND ($4::timestamptz IS NULL OR first_seen >= $4)
              AND ($5::timestamptz IS NULL OR first_seen <= $5)
            ORDER BY first_seen DESC
            LIMIT $6
            "#,
        )
        .bind(&filter.indicator_type)
        .bind(&filter.severity)
        .bind(&filter.tags)
        .bind(from)
        .bind(to)
        .bind(limit)
        .fetch_all(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_defaults_to_page_size() {
        let filter = IndicatorFilter::default();
        assert_eq!(filter.effective_limit(20), 20);
    }

    #[test]
    fn limit_is_clamped_to_hard_cap() {
        let filter = IndicatorFilter {
            limit: Some("10000".to_string()),
            ..Default::default()
        };
        assert_eq!(filter.effective_limit(20), MAX_PAGE_SIZE);

        let filter = IndicatorFilter {
            limit: Some("0".to_string()),
            ..Default::default()
        };
        assert_eq!(filter.effective_limit(20), 1);
    }

    #[test]
    fn non_numeric_limit_falls_back_to_default() {
        let filter = IndicatorFilter {
            limit: Some("lots".to_string()),
            ..Default::default()
        };
        assert_eq!(filter.effective_limit(20), 20);
    }

    #[test]
    fn parses_rfc3339_timestamps() {
        let parsed = parse_date_param("2024-06-01T12:30:00Z").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-06-01T12:30:00+00:00");
    }

    #[test]
    fn parses_bare_dates_as_midnight_utc() {
        let parsed = parse_date_param("2024-06-01").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-06-01T00:00:00+00:00");
    }

    #[test]
    fn rejects_garbage_dates() {
        assert!(parse_date_param("yesterday").is_none());
        assert!(parse_date_param("06/01/2024").is_none());
    }

    #[test]
    fn invalid_date_param_collapses_range() {
        let filter = IndicatorFilter {
            from: Some("not-a-date".to_string()),
            ..Default::default()
        };
        assert!(filter.date_range().is_none());
    }

    #[test]
    fn absent_dates_are_open_ended() {
        let filter = IndicatorFilter::default();
        assert_eq!(filter.date_range(), Some((None, None)));
    }
}
