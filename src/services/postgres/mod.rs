//! PostgreSQL plan source and executor
//!
//! Explains run as `EXPLAIN (ANALYZE, BUFFERS, FORMAT JSON)` inside a
//! transaction that is always rolled back, so analyzing a write never
//! persists it. Execution honours the hints the analyzer derives from the
//! plan: read-only transactions, a local statement timeout and a cap on
//! retained rows.

pub mod named_params;

pub use named_params::{BoundQuery, bind_named};

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Postgres, Row, TypeInfo, ValueRef};
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::services::query_analyzer::{
    ExecutionError, ExecutionHints, PlanProvider, QueryExecutor, QueryParams, ResultRows,
};

/// Connections are opened on first use
pub fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect_lazy(&config.url)
}

#[derive(Clone)]
pub struct PgPlanSource {
    pool: PgPool,
    analyze: bool,
}

impl PgPlanSource {
    pub fn new(pool: PgPool, analyze: bool) -> Self {
        Self { pool, analyze }
    }

    fn explain_prefix(&self) -> &'static str {
        if self.analyze {
            "EXPLAIN (ANALYZE, BUFFERS, FORMAT JSON) "
        } else {
            "EXPLAIN (FORMAT JSON) "
        }
    }
}

#[async_trait]
impl PlanProvider for PgPlanSource {
    async fn explain(&self, query: &str, params: &QueryParams) -> Result<Value, ExecutionError> {
        let bound = bind_named(query, params)?;
        let sql = format!("{}{}", self.explain_prefix(), bound.sql);

        let mut tx = self.pool.begin().await.map_err(classify)?;
        let row = bind_values(sqlx::query(&sql), &bound.values)
            .fetch_one(&mut *tx)
            .await
            .map_err(classify)?;
        let document: Value = row.try_get(0).map_err(classify)?;

        // ANALYZE really ran the statement
        tx.rollback().await.map_err(classify)?;

        tracing::debug!("Explained query ({} bound parameters)", bound.values.len());
        Ok(document)
    }
}

#[async_trait]
impl QueryExecutor for PgPlanSource {
    async fn execute(
        &self,
        query: &str,
        params: &QueryParams,
        hints: &ExecutionHints,
    ) -> Result<ResultRows, ExecutionError> {
        let bound = bind_named(query, params)?;
        let mut tx = self.pool.begin().await.map_err(classify)?;

        if hints.read_only {
            sqlx::query("SET TRANSACTION READ ONLY").execute(&mut *tx).await.map_err(classify)?;
        }
        if let Some(timeout) = hints.statement_timeout {
            sqlx::query(&format!("SET LOCAL statement_timeout = {}", timeout.as_millis()))
                .execute(&mut *tx)
                .await
                .map_err(classify)?;
        }

        let query = bind_values(sqlx::query(&bound.sql), &bound.values);
        let rows = if hints.read_only {
            let fetched = query.fetch_all(&mut *tx).await.map_err(classify)?;
            rows_to_json(fetched, hints.fetch_size)
        } else {
            let done = query.execute(&mut *tx).await.map_err(classify)?;
            ResultRows::Count { affected: done.rows_affected() }
        };

        tx.commit().await.map_err(classify)?;
        Ok(rows)
    }
}

// ============================================================================
// Binding and decoding
// ============================================================================

fn bind_values<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    values: &'q [Value],
) -> Query<'q, Postgres, PgArguments> {
    for value in values {
        query = match value {
            Value::Null => query.bind(Option::<String>::None),
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => query.bind(i),
                None => query.bind(n.as_f64()),
            },
            Value::String(s) => query.bind(s.as_str()),
            other => query.bind(sqlx::types::Json(other)),
        };
    }
    query
}

fn rows_to_json(rows: Vec<PgRow>, fetch_size: Option<u64>) -> ResultRows {
    let total = rows.len() as u64;
    let columns: Vec<String> = rows
        .first()
        .map(|r| r.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();

    let keep = fetch_size.map_or(rows.len(), |n| rows.len().min(n as usize));
    let rows = rows.iter().take(keep).map(row_to_json).collect();

    ResultRows::Rows { columns, rows, total }
}

fn row_to_json(row: &PgRow) -> Value {
    let mut obj = Map::new();
    for (i, column) in row.columns().iter().enumerate() {
        obj.insert(column.name().to_string(), cell_to_json(row, i));
    }
    Value::Object(obj)
}

fn cell_to_json(row: &PgRow, i: usize) -> Value {
    let Ok(raw) = row.try_get_raw(i) else {
        return Value::Null;
    };
    if raw.is_null() {
        return Value::Null;
    }
    let type_name = raw.type_info().name().to_string();

    let decoded = match type_name.as_str() {
        "BOOL" => row.try_get::<bool, _>(i).map(Value::from),
        "INT2" => row.try_get::<i16, _>(i).map(Value::from),
        "INT4" => row.try_get::<i32, _>(i).map(Value::from),
        "INT8" => row.try_get::<i64, _>(i).map(Value::from),
        "FLOAT4" => row.try_get::<f32, _>(i).map(Value::from),
        "FLOAT8" => row.try_get::<f64, _>(i).map(Value::from),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => row.try_get::<String, _>(i).map(Value::from),
        "JSON" | "JSONB" => row.try_get::<Value, _>(i),
        "TIMESTAMPTZ" => row
            .try_get::<chrono::DateTime<chrono::Utc>, _>(i)
            .map(|t| Value::from(t.to_rfc3339())),
        "TIMESTAMP" => row
            .try_get::<chrono::NaiveDateTime, _>(i)
            .map(|t| Value::from(t.to_string())),
        "DATE" => row.try_get::<chrono::NaiveDate, _>(i).map(|d| Value::from(d.to_string())),
        _ => return Value::from(format!("<{}>", type_name)),
    };

    decoded.unwrap_or_else(|e| {
        tracing::debug!("Failed to decode column {} ({}): {}", i, type_name, e);
        Value::Null
    })
}

// ============================================================================
// Error classification
// ============================================================================

/// Map a driver error to the analyzer's taxonomy by SQLSTATE
pub fn classify(err: sqlx::Error) -> ExecutionError {
    match &err {
        sqlx::Error::Database(db) => {
            let message = db.message().to_string();
            match db.code().as_deref() {
                Some(code) => classify_sqlstate(code, message),
                None => ExecutionError::Database(message),
            }
        },
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Configuration(_) => ExecutionError::Connection(err.to_string()),
        _ => ExecutionError::Database(err.to_string()),
    }
}

pub fn classify_sqlstate(code: &str, message: String) -> ExecutionError {
    match code {
        "57014" => ExecutionError::Timeout(message),
        "40P01" | "55P03" | "40001" => ExecutionError::LockConflict(message),
        c if c.starts_with("42") => ExecutionError::Syntax(message),
        c if c.starts_with("08") => ExecutionError::Connection(message),
        _ => ExecutionError::Database(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlstate_classification() {
        let kind = |code: &str| classify_sqlstate(code, "msg".to_string()).kind();

        assert_eq!(kind("57014"), "timeout");
        assert_eq!(kind("40P01"), "lock_conflict");
        assert_eq!(kind("55P03"), "lock_conflict");
        assert_eq!(kind("40001"), "lock_conflict");
        assert_eq!(kind("42601"), "syntax");
        assert_eq!(kind("42P01"), "syntax");
        assert_eq!(kind("08006"), "connection");
        assert_eq!(kind("23505"), "database");
    }

    #[test]
    fn test_driver_errors_classified() {
        assert_eq!(classify(sqlx::Error::PoolTimedOut).kind(), "connection");
        assert_eq!(classify(sqlx::Error::RowNotFound).kind(), "database");
    }

    #[tokio::test]
    async fn test_lazy_pool_does_not_connect() {
        let config = DatabaseConfig::default();
        assert!(create_pool(&config).is_ok());
    }
}
