use crate::{config::DatabaseConfig, DatabaseError, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::info;

/// Connection pool for the relational store.
///
/// Every new connection gets the configured `statement_timeout` so a slow
/// batch commit can never outlive the distributed lock guarding its queue
/// drain. Schema lives in `migrations/` next to this crate.
#[derive(Clone)]
pub struct DatabasePool {
    pool: PgPool,
}

impl DatabasePool {
    /// Create a new database pool from config
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            statement_timeout_ms = config.statement_timeout_ms,
            "Connecting to database"
        );

        let timeout_sql = format!("SET statement_timeout = {}", config.statement_timeout_ms);
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .after_connect(move |conn, _meta| {
                let timeout_sql = timeout_sql.clone();
                Box::pin(async move {
                    sqlx::query(&timeout_sql).execute(conn).await?;
                    Ok(())
                })
            })
            .connect(&config.url)
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        info!("Database connection pool established");

        Ok(Self { pool })
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Migrations completed");
        Ok(())
    }

    /// Get the inner pool reference
    pub fn inner(&self) -> &PgPool {
        &self.pool
    }

    /// Open the short transaction a write-behind batch commits under.
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        let tx = self.pool.begin().await?;
        Ok(tx)
    }

    /// Check if the connection is healthy
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;
        Ok(())
    }

    /// Close the pool gracefully
    pub async fn close(&self) {
        info!("Closing database connection pool");
        self.pool.close().await;
    }
}
