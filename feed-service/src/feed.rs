//! Upstream feed client
//!
//! HTTP client for the threat-intelligence "recent pulses" endpoint and
//! normalization of its payload into candidate records.

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;

use crate::config::Config;
use crate::error::{FetchError, FetchResult};
use crate::telemetry;

const API_KEY_HEADER: &str = "X-OTX-API-KEY";

/// Feed API client
pub struct FeedClient {
    http: reqwest::Client,
    feed_url: String,
    api_key: String,
    page_size: u32,
    max_pages: u32,
}

// Feed wire types. Everything is optional: a partially-filled pulse is
// normal feed behavior, not an error.

#[derive(Debug, Deserialize)]
pub struct FeedPage {
    #[serde(default)]
    pub results: Vec<Pulse>,
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Pulse {
    #[serde(default)]
    pub modified: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub indicators: Vec<PulseIndicator>,
}

#[derive(Debug, Deserialize)]
pub struct PulseIndicator {
    #[serde(default)]
    pub indicator: Option<String>,
    #[serde(default, rename = "type")]
    pub indicator_type: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
}

/// Normalized candidate record extracted from the feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub indicator: String,
    pub indicator_type: String,
    pub severity: String,
    pub first_seen: DateTime<Utc>,
    pub tags: Vec<String>,
}

impl FeedClient {
    pub fn new(config: &Config) -> FetchResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            feed_url: config.feed_url.clone(),
            api_key: config.feed_api_key.clone(),
            page_size: config.page_size,
            max_pages: config.max_pages,
        })
    }

    /// Fetch the feed's recent indicators, following `next` links up to
    /// the configured page bound.
    pub async fn fetch_recent(&self) -> FetchResult<Vec<Candidate>> {
        let mut candidates = Vec::new();
        let mut url = format!("{}?limit={}&page=1", self.feed_url, self.page_size);

        for _ in 0..self.max_pages.max(1) {
            let page = self.fetch_page(&url).await?;
            candidates.extend(extract_candidates(&page, Utc::now()));

            match page.next {
                Some(next) if !next.is_empty() => url = next,
                _ => break,
            }
        }

        Ok(candidates)
    }

    async fn fetch_page(&self, url: &str) -> FetchResult<FeedPage> {
        let mut headers = HeaderMap::new();
        if let Ok(key) = HeaderValue::from_str(&self.api_key) {
            headers.insert(API_KEY_HEADER, key);
        }
        telemetry::inject_trace_context(&mut headers);

        let response = self.http.get(url).headers(headers).send().await?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status()));
        }

        let body = response.text().await?;
        let page = serde_json::from_str(&body)?;
        Ok(page)
    }
}

/// Flatten a feed page into candidates.
///
/// Entries missing the indicator value or its type are skipped. A missing
/// pulse timestamp falls back to the fetch time.
pub fn extract_candidates(page: &FeedPage, fetched_at: DateTime<Utc>) -> Vec<Candidate> {
    let mut candidates = Vec::new();

    for pulse in &page.results {
        let first_seen = pulse
            .modified
            .as_deref()
            .and_then(parse_feed_timestamp)
            .unwrap_or(fetched_at);

        for entry in &pulse.indicators {
            let (Some(indicator), Some(indicator_type)) =
                (entry.indicator.as_deref(), entry.indicator_type.as_deref())
            else {
                continue;
            };

            let indicator = indicator.trim();
            let indicator_type = indicator_type.trim();
            if indicator.is_empty() || indicator_type.is_empty() {
                continue;
            }

            candidates.push(Candidate {
                indicator: indicator.to_string(),
                indicator_type: indicator_type.to_ascii_lowercase(),
                severity: normalize_severity(entry.severity.as_deref()),
                first_seen,
                tags: pulse.tags.clone(),
            });
        }
    }

    candidates
}

/// Pulse timestamps arrive either RFC 3339 or as a bare ISO datetime
/// without an offset; both are read as UTC.
fn parse_feed_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|ndt| Utc.from_utc_datetime(&ndt))
}

/// Map known severities case-insensitively; unknown text passes through
/// as-is, absent values become "unknown".
pub fn normalize_severity(raw: Option<&str>) -> String {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return "unknown".to_string();
    };

    match raw.to_ascii_lowercase().as_str() {
        "low" => "low".to_string(),
        "medium" | "med" => "medium".to_string(),
        "high" => "high".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_PAGE: &str = r#"{
        "count": 2,
        "next": null,
        "results": [
            {
                "name": "SSH bruteforce wave",
                "modified": "2024-06-01T08:15:00.000000",
                "tags": ["bruteforce", "ssh"],
                "indicators": [
                    {"indicator": "198.51.100.7", "type": "IPv4"},
                    {"indicator": "bad-host.example", "type": "domain", "severity": "High"},
                    {"indicator": null, "type": "IPv4"},
                    {"indicator": "10.0.0.1"}
                ]
            },
            {
                "tags": [],
                "indicators": [
                    {"indicator": "  ", "type": "URL"},
                    {"indicator": "https://evil.example/payload", "type": "URL"}
                ]
            }
        ]
    }"#;

    fn fetch_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap()
    }

    #[test]
    fn extracts_complete_entries_only() {
        let page: FeedPage = serde_json::from_str(SAMPLE_PAGE).unwrap();
        let candidates = extract_candidates(&page, fetch_time());

        let values: Vec<&str> = candidates.iter().map(|c| c.indicator.as_str()).collect();
        assert_eq!(
            values,
            vec!["198.51.100.7", "bad-host.example", "https://evil.example/payload"]
        );
    }

    #[test]
    fn types_are_lowercased() {
        let page: FeedPage = serde_json::from_str(SAMPLE_PAGE).unwrap();
        let candidates = extract_candidates(&page, fetch_time());

        assert_eq!(candidates[0].indicator_type, "ipv4");
        assert_eq!(candidates[2].indicator_type, "url");
    }

    #[test]
    fn pulse_timestamp_is_carried_onto_candidates() {
        let page: FeedPage = serde_json::from_str(SAMPLE_PAGE).unwrap();
        let candidates = extract_candidates(&page, fetch_time());

        assert_eq!(
            candidates[0].first_seen,
            Utc.with_ymd_and_hms(2024, 6, 1, 8, 15, 0).unwrap()
        );
    }

    #[test]
    fn missing_pulse_timestamp_falls_back_to_fetch_time() {
        let page: FeedPage = serde_json::from_str(SAMPLE_PAGE).unwrap();
        let candidates = extract_candidates(&page, fetch_time());

        // second pulse has no "modified"
        assert_eq!(candidates[2].first_seen, fetch_time());
    }

    #[test]
    fn pulse_tags_are_shared_by_its_indicators() {
        let page: FeedPage = serde_json::from_str(SAMPLE_PAGE).unwrap();
        let candidates = extract_candidates(&page, fetch_time());

        assert_eq!(candidates[0].tags, vec!["bruteforce", "ssh"]);
        assert!(candidates[2].tags.is_empty());
    }

    #[test]
    fn empty_feed_yields_no_candidates() {
        let page: FeedPage = serde_json::from_str(r#"{"results": []}"#).unwrap();
        assert!(extract_candidates(&page, fetch_time()).is_empty());
    }

    #[test]
    fn severity_normalization() {
        assert_eq!(normalize_severity(None), "unknown");
        assert_eq!(normalize_severity(Some("")), "unknown");
        assert_eq!(normalize_severity(Some("HIGH")), "high");
        assert_eq!(normalize_severity(Some("Med")), "medium");
        assert_eq!(normalize_severity(Some("low")), "low");
        // free-text fallback
        assert_eq!(normalize_severity(Some("Elevated")), "elevated");
    }

    #[test]
    fn rfc3339_timestamps_also_parse() {
        assert_eq!(
            parse_feed_timestamp("2024-06-01T08:15:00Z"),
            Some(Utc.with_ymd_and_hms(2024, 6, 1, 8, 15, 0).unwrap())
        );
        assert_eq!(parse_feed_timestamp("last tuesday"), None);
    }
}
