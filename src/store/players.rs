//! Player datastore access

use crate::{
    config::DatabaseConfig,
    error::{PipelineError, Result},
    types::PlayerRecord,
};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Records lacking a processed image, and the two output-URL updates
#[async_trait]
pub trait PlayerStore: Send + Sync {
    /// Pending records ordered by player rank
    async fn pending_players(&self) -> Result<Vec<PlayerRecord>>;

    /// Set the output URL of every identifier to `{id}{suffix}`.
    ///
    /// Idempotent. Returns the number of rows touched.
    async fn set_output_urls(&self, ids: &[String], suffix: &str) -> Result<u64>;

    /// Clear the source URL of a record whose source is gone
    async fn clear_source_url(&self, id: &str) -> Result<()>;

    /// Release the underlying connections. No query may follow.
    async fn close(&self) -> Result<()>;
}

/// `PlayerStore` backed by the MySQL `players` table
#[derive(Clone)]
pub struct MySqlPlayerStore {
    pool: MySqlPool,
}

impl MySqlPlayerStore {
    /// Open a connection pool to the configured database
    #[instrument(skip(config), fields(host = %config.host, database = %config.name))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(config.password.expose_secret())
            .database(&config.name);

        let pool = MySqlPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .map_err(|e| PipelineError::database(format!("Failed to connect: {}", e)))?;

        info!("🗄️ Database connection established");
        Ok(Self { pool })
    }

    #[must_use]
    pub fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PlayerStore for MySqlPlayerStore {
    #[instrument(skip(self))]
    async fn pending_players(&self) -> Result<Vec<PlayerRecord>> {
        let rows = sqlx::query_as::<_, (String, String)>(
            r"
            SELECT CAST(p.id AS CHAR), p.profile_image_url_wpt
            FROM players AS p
            WHERE p.profile_image_url IS NULL AND p.profile_image_url_wpt IS NOT NULL
            ORDER BY p.`rank`
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PipelineError::database(format!("Failed to load pending players: {}", e)))?;

        debug!(count = rows.len(), "Pending players loaded");
        Ok(rows
            .into_iter()
            .map(|(id, source_url)| PlayerRecord { id, source_url })
            .collect())
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn set_output_urls(&self, ids: &[String], suffix: &str) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut touched = 0;
        for id in ids {
            let result = sqlx::query(
                r"
                UPDATE players AS p
                SET p.profile_image_url = ?
                WHERE p.id = ?
                ",
            )
            .bind(format!("{}{}", id, suffix))
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                PipelineError::database(format!("Failed to set output URL for '{}': {}", id, e))
            })?;
            touched += result.rows_affected();
        }
        tx.commit().await?;

        debug!(touched, "Output URLs updated");
        Ok(touched)
    }

    #[instrument(skip(self))]
    async fn clear_source_url(&self, id: &str) -> Result<()> {
        sqlx::query(
            r"
            UPDATE players AS p
            SET p.profile_image_url_wpt = NULL
            WHERE p.id = ?
            ",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            PipelineError::database(format!("Failed to clear source URL for '{}': {}", id, e))
        })?;
        Ok(())
    }

    /// Close the pool, waiting for in-flight queries
    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        debug!("Database pool closed");
        Ok(())
    }
}
