//! CLI command implementations.

pub mod migrate;
pub mod seed;
pub mod sequences;
pub mod watch;

use secrecy::SecretString;
use sqlx::PgPool;

use partsflow_server::db;

/// Pool size used by one-shot maintenance commands.
const CLI_MAX_CONNECTIONS: u32 = 2;

/// Database URL from `PARTSFLOW_DATABASE_URL`, falling back to `DATABASE_URL`.
///
/// # Errors
///
/// Returns an error naming the variable if neither is set.
pub fn database_url() -> Result<SecretString, &'static str> {
    dotenvy::dotenv().ok();

    std::env::var("PARTSFLOW_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map(SecretString::from)
        .map_err(|_| "PARTSFLOW_DATABASE_URL")
}

/// Connect with the configured database URL.
///
/// # Errors
///
/// Returns an error if the URL is missing or the connection fails.
pub async fn connect() -> Result<PgPool, Box<dyn std::error::Error>> {
    let url = database_url().map_err(|var| format!("{var} not set"))?;
    tracing::info!("Connecting to database...");
    Ok(db::create_pool(&url, CLI_MAX_CONNECTIONS).await?)
}
