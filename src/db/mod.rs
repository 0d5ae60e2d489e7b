use sqlx::{postgres::PgPoolOptions, PgPool};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use url::Url;

use crate::services::secrets::{DatabaseCredentials, SecretsError, SecretsProvider};

pub mod results;

const DEFAULT_PORT: u16 = 5432;
const DEFAULT_DATABASE: &str = "mediapipeline";

/// Initialize PostgreSQL connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

/// Where the result store's connection settings come from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DatabaseSource {
    Url(String),
    /// Credentials held in a secret, with optional host/database overrides.
    Secret {
        reference: String,
        host: Option<String>,
        database: Option<String>,
    },
}

/// Connection settings for [`build_database_url`].
#[derive(Debug, Clone)]
pub struct DatabaseUrlConfig<'a> {
    pub host: &'a str,
    pub port: u16,
    pub username: &'a str,
    pub password: &'a str,
    pub database: &'a str,
}

/// Build a `postgresql://` URL. Username and password are percent-encoded.
pub fn build_database_url(config: &DatabaseUrlConfig<'_>) -> Result<String, ConnectError> {
    let mut url = Url::parse(&format!(
        "postgresql://{}:{}/{}",
        config.host, config.port, config.database
    ))
    .map_err(|e| ConnectError::InvalidUrl(e.to_string()))?;

    url.set_username(config.username)
        .map_err(|_| ConnectError::InvalidUrl("username rejected".into()))?;
    url.set_password(Some(config.password))
        .map_err(|_| ConnectError::InvalidUrl("password rejected".into()))?;

    Ok(url.into())
}

/// Process-lifetime cache of connection pools, opened lazily on first use.
/// Pools are keyed by source, so the same secret with different overrides
/// gets its own pool.
pub struct StoreConnector {
    secrets: Arc<dyn SecretsProvider>,
    pools: Mutex<HashMap<DatabaseSource, PgPool>>,
}

impl StoreConnector {
    pub fn new(secrets: Arc<dyn SecretsProvider>) -> Self {
        Self {
            secrets,
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached pool for `source`, connecting if needed.
    pub async fn pool(&self, source: &DatabaseSource) -> Result<PgPool, ConnectError> {
        let mut pools = self.pools.lock().await;
        if let Some(pool) = pools.get(source) {
            return Ok(pool.clone());
        }

        let url = self.resolve_url(source).await?;
        tracing::info!(source = %describe(source), "Opening database connection pool");
        let pool = init_pool(&url).await?;
        pools.insert(source.clone(), pool.clone());
        Ok(pool)
    }

    async fn resolve_url(&self, source: &DatabaseSource) -> Result<String, ConnectError> {
        match source {
            DatabaseSource::Url(url) => Ok(url.clone()),
            DatabaseSource::Secret {
                reference,
                host,
                database,
            } => {
                let raw = self.secrets.get_secret(reference).await?;
                let creds = DatabaseCredentials::parse(reference, &raw)?;
                let host = host
                    .as_deref()
                    .or(creds.host.as_deref())
                    .ok_or(ConnectError::MissingHost)?;

                build_database_url(&DatabaseUrlConfig {
                    host,
                    port: creds.port.unwrap_or(DEFAULT_PORT),
                    username: &creds.username,
                    password: &creds.password,
                    database: database.as_deref().unwrap_or(DEFAULT_DATABASE),
                })
            }
        }
    }
}

fn describe(source: &DatabaseSource) -> String {
    match source {
        DatabaseSource::Url(_) => "url".to_string(),
        DatabaseSource::Secret { reference, .. } => format!("secret:{reference}"),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error(transparent)]
    Secrets(#[from] SecretsError),

    #[error("Database host missing from both secret and override")]
    MissingHost,

    #[error("Invalid database URL: {0}")]
    InvalidUrl(String),

    #[error("Database connection failed: {0}")]
    Database(#[from] sqlx::Error),
}
