//! Indicator query handlers

use axum::{
    extract::{Query, State},
    Json,
};
use tracing::Instrument;

use crate::models::{Indicator, IndicatorFilter};
use crate::{AppResult, AppState};

/// List indicators matching the given filters, most recent first
pub async fn list(
    State(state): State<AppState>,
    Query(filter): Query<IndicatorFilter>,
) -> AppResult<Json<Vec<Indicator>>> {
    state.metrics.record_request("/api/v1/indicators");

    let indicators = query_indicators(&state, &filter).await?;
    Ok(Json(indicators))
}

/// Shared query path for the JSON API and the HTML view.
///
/// An unparseable date parameter matches nothing; unknown type/severity
/// values flow through as equality filters and return an empty set.
pub async fn query_indicators(
    state: &AppState,
    filter: &IndicatorFilter,
) -> AppResult<Vec<Indicator>> {
    let Some((from, to)) = filter.date_range() else {
        tracing::debug!("Unparseable date filter, returning empty result set");
        return Ok(Vec::new());
    };

    let limit = filter.effective_limit(state.config.page_size);

    let span = tracing::info_span!(
        "query_threats",
        "query.type" = filter.indicator_type.as_deref().unwrap_or("any"),
        "query.severity" = filter.severity.as_deref().unwrap_or("any"),
        "result.count" = tracing::field::Empty,
    );

    async {
        let indicators = Indicator::list(&state.pool, filter, from, to, limit).await?;

        tracing::Span::current().record("result.count", indicators.len() as i64);
        tracing::info!("Retrieved {} threat indicators", indicators.len());

        Ok(indicators)
    }
    .instrument(span)
    .await
}
