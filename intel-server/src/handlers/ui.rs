//! HTML table view
//!
//! Thin view over the same query path as the JSON API: display-level
//! mapping only (severity -> badge class, type -> icon glyph).

use axum::{
    extract::{Query, State},
    response::Html,
};

use crate::handlers::indicators::query_indicators;
use crate::models::{Indicator, IndicatorFilter};
use crate::AppState;

/// Render the indicator table.
///
/// A store failure renders an empty table instead of an error page so the
/// filter UI stays usable while the store recovers.
pub async fn index(
    State(state): State<AppState>,
    Query(filter): Query<IndicatorFilter>,
) -> Html<String> {
    state.metrics.record_request("/");

    let indicators = match query_indicators(&state, &filter).await {
        Ok(indicators) => indicators,
        Err(e) => {
            tracing::error!("Error fetching threat indicators for UI: {e}");
            Vec::new()
        }
    };

    Html(render_page(&filter, &indicators))
}

fn render_page(filter: &IndicatorFilter, indicators: &[Indicator]) -> String {
    let mut rows = String::new();
    for ind in indicators {
        rows.push_str(&render_row(ind));
    }
    if indicators.is_empty() {
        rows.push_str(r#"<tr><td colspan="6" class="empty">No indicators match the current filters</td></tr>"#);
    }

    format!(
        include_str!("../../static/index.html"),
        type_value = escape_html(filter.indicator_type.as_deref().unwrap_or("")),
        severity_value = escape_html(filter.severity.as_deref().unwrap_or("")),
        tags_value = escape_html(filter.tags.as_deref().unwrap_or("")),
        from_value = escape_html(filter.from.as_deref().unwrap_or("")),
        to_value = escape_html(filter.to.as_deref().unwrap_or("")),
        result_count = indicators.len(),
        rows = rows,
    )
}

fn render_row(ind: &Indicator) -> String {
    format!(
        r#"<tr>
  <td>{first_seen}</td>
  <td><span class="icon">{icon}</span> {indicator}</td>
  <td>{indicator_type}</td>
  <td><span class="badge badge-{badge}">{severity}</span></td>
  <td>{tags}</td>
  <td>{source}</td>
</tr>
"#,
        first_seen = ind.first_seen.format("%Y-%m-%d %H:%M:%S"),
        icon = type_icon(&ind.indicator_type),
        indicator = escape_html(&ind.indicator),
        indicator_type = escape_html(&ind.indicator_type),
        badge = severity_badge(&ind.severity),
        severity = escape_html(&ind.severity),
        tags = escape_html(&ind.tags.join(", ")),
        source = escape_html(&ind.source),
    )
}

/// Severity -> CSS badge class
pub fn severity_badge(severity: &str) -> &'static str {
    match severity.to_ascii_lowercase().as_str() {
        "high" | "critical" => "high",
        "medium" => "medium",
        "low" => "low",
        _ => "unknown",
    }
}

/// Indicator type -> icon glyph
pub fn type_icon(indicator_type: &str) -> &'static str {
    match indicator_type.to_ascii_lowercase().as_str() {
        "ipv4" | "ipv6" => "🌐",
        "domain" | "hostname" => "🔗",
        "url" | "uri" => "🧭",
        "email" => "✉️",
        t if t.starts_with("filehash") || t == "hash" || t == "md5" || t == "sha1" || t == "sha256" => "🧬",
        "file" | "filepath" => "📄",
        "malware" | "yara" => "🦠",
        "cve" => "🛡️",
        _ => "❓",
    }
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn sample_indicator() -> Indicator {
        Indicator {
            id: Uuid::new_v4(),
            indicator: "198.51.100.7".to_string(),
            indicator_type: "ipv4".to_string(),
            severity: "high".to_string(),
            first_seen: Utc::now(),
            tags: vec!["botnet".to_string(), "scanner".to_string()],
            source: "alienvault-otx".to_string(),
            trace_id: None,
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn badge_classes_cover_known_severities() {
        assert_eq!(severity_badge("high"), "high");
        assert_eq!(severity_badge("HIGH"), "high");
        assert_eq!(severity_badge("medium"), "medium");
        assert_eq!(severity_badge("low"), "low");
        assert_eq!(severity_badge("weird-text"), "unknown");
    }

    #[test]
    fn icons_cover_known_types() {
        assert_eq!(type_icon("ipv4"), "🌐");
        assert_eq!(type_icon("FileHash-SHA256".to_lowercase().as_str()), "🧬");
        assert_eq!(type_icon("bogus"), "❓");
    }

    #[test]
    fn rows_escape_html() {
        let mut ind = sample_indicator();
        ind.indicator = "<script>alert(1)</script>".to_string();
        let row = render_row(&ind);
        assert!(row.contains("&lt;script&gt;"));
        assert!(!row.contains("<script>"));
    }

    #[test]
    fn empty_result_renders_placeholder_row() {
        let page = render_page(&IndicatorFilter::default(), &[]);
        assert!(page.contains("No indicators match"));
    }

    #[test]
    fn page_echoes_filter_values_into_form() {
        let filter = IndicatorFilter {
            indicator_type: Some("domain".to_string()),
            severity: Some("high".to_string()),
            ..Default::default()
        };
        let page = render_page(&filter, &[sample_indicator()]);
        assert!(page.contains(r#"value="domain""#));
        assert!(page.contains(r#"value="high""#));
    }
}
