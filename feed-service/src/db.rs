//! Database module - PostgreSQL connection and schema

use sqlx::{postgres::PgPoolOptions, PgPool};

/// Create database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
}

/// Apply the indicator schema idempotently.
///
/// The fetcher and the web tier are independent processes; whichever
/// starts first creates the collection.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(SCHEMA_SQL)
        .execute(pool)
        .await?;

    tracing::info!("Database schema applied successfully");
    Ok(())
}

/// Database schema SQL
const SCHEMA_SQL: &str = r#"
-- Threat indicators (the single collection of record)
CREATE TABLE IF NOT EXISTS indicators (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    indicator TEXT NOT NULL,
    indicator_type TEXT NOT NULL,
    severity TEXT NOT NULL DEFAULT 'unknown',
    first_seen TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    tags TEXT[] NOT NULL DEFAULT '{}',
    source TEXT NOT NULL,
    trace_id TEXT,
    fetched_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

-- The dedup oracle: one row per (indicator, indicator_type)
CREATE UNIQUE INDEX IF NOT EXISTS idx_indicators_value_type ON indicators(indicator, indicator_type);

CREATE INDEX IF NOT EXISTS idx_indicators_first_seen ON indicators(first_seen);
CREATE INDEX IF NOT EXISTS idx_indicators_severity ON indicators(severity);
CREATE INDEX IF NOT EXISTS idx_indicators_type ON indicators(indicator_type);
"#;
