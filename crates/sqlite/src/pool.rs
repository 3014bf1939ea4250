use std::str::FromStr;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

use crate::config::SqliteConfig;

/// Open a connection pool for `config`.
///
/// The database file is created if missing. In-memory databases live as long
/// as their connection, so they get a single connection that is never
/// recycled.
///
/// # Errors
///
/// Returns a [`sqlx::Error`] if the URL is invalid or the database cannot be
/// opened.
pub async fn connect(config: &SqliteConfig) -> Result<SqlitePool, sqlx::Error> {
    let mut options = SqliteConnectOptions::from_str(&config.url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool_options = if config.is_in_memory() {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        options = options.journal_mode(SqliteJournalMode::Wal);
        SqlitePoolOptions::new().max_connections(config.pool_size.max(1))
    };

    pool_options.connect_with(options).await
}
