//! SQLite pool setup. Every connection comes up with WAL so transcript
//! reads do not block a turn's writes, foreign keys on for the
//! conversation/message/appointment links, and a busy timeout so the
//! follow-up sweep backs off instead of failing when a turn holds the
//! write lock.

use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;

pub type DbPool = sqlx::SqlitePool;

const BUSY_TIMEOUT_MS: u32 = 5_000;

#[derive(Clone, Copy, Debug)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self { max_connections: 5, acquire_timeout: Duration::from_secs(30) }
    }
}

impl PoolSettings {
    /// One shared connection. In-memory SQLite gives each connection its own
    /// database, so anything using `sqlite::memory:` needs this.
    pub fn single_connection() -> Self {
        Self { max_connections: 1, ..Self::default() }
    }
}

pub async fn connect(database_url: &str) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(database_url, PoolSettings::default()).await
}

pub async fn connect_with_settings(
    database_url: &str,
    settings: PoolSettings,
) -> Result<DbPool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(settings.max_connections.max(1))
        .acquire_timeout(settings.acquire_timeout)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query(&format!("PRAGMA busy_timeout = {BUSY_TIMEOUT_MS}"))
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect(database_url)
        .await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::{connect_with_settings, PoolSettings};

    #[tokio::test]
    async fn connections_come_up_with_the_expected_pragmas() {
        let pool = connect_with_settings("sqlite::memory:", PoolSettings::single_connection())
            .await
            .expect("connect");

        let foreign_keys = sqlx::query("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .expect("pragma query");
        assert_eq!(foreign_keys.get::<i64, _>(0), 1);

        let busy_timeout = sqlx::query("PRAGMA busy_timeout")
            .fetch_one(&pool)
            .await
            .expect("pragma query");
        assert_eq!(busy_timeout.get::<i64, _>(0), 5_000);

        pool.close().await;
    }
}
