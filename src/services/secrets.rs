use async_trait::async_trait;
use serde::Deserialize;

/// Resolves secret values by reference.
#[async_trait]
pub trait SecretsProvider: Send + Sync {
    async fn get_secret(&self, reference: &str) -> Result<String, SecretsError>;
}

/// Resolves `env:NAME` from the process environment and `file:/path` from
/// disk. A reference without a scheme is treated as an environment variable.
#[derive(Debug, Default, Clone)]
pub struct EnvSecretsProvider;

#[async_trait]
impl SecretsProvider for EnvSecretsProvider {
    async fn get_secret(&self, reference: &str) -> Result<String, SecretsError> {
        if let Some(path) = reference.strip_prefix("file:") {
            return tokio::fs::read_to_string(path)
                .await
                .map(|value| value.trim_end().to_string())
                .map_err(|source| SecretsError::Read {
                    reference: reference.to_string(),
                    source,
                });
        }

        let name = reference.strip_prefix("env:").unwrap_or(reference);
        std::env::var(name).map_err(|_| SecretsError::NotFound(reference.to_string()))
    }
}

/// Database credentials as stored in a secret.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DatabaseCredentials {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

impl DatabaseCredentials {
    pub fn parse(reference: &str, raw: &str) -> Result<Self, SecretsError> {
        serde_json::from_str(raw).map_err(|source| SecretsError::Malformed {
            reference: reference.to_string(),
            source,
        })
    }
}

#[derive(Deserialize)]
struct ApiKeySecret {
    #[serde(rename = "OPENAI_API_KEY")]
    openai_api_key: Option<String>,
}

/// Resolve the LLM API key: the secret (JSON with `OPENAI_API_KEY`, or the
/// bare key) wins, then `fallback`.
pub async fn resolve_api_key(
    secrets: &dyn SecretsProvider,
    reference: Option<&str>,
    fallback: Option<&str>,
) -> Result<String, SecretsError> {
    if let Some(reference) = reference {
        let raw = secrets.get_secret(reference).await?;
        let from_secret = match serde_json::from_str::<ApiKeySecret>(&raw) {
            Ok(secret) => secret.openai_api_key,
            Err(_) if !raw.trim_start().starts_with('{') => Some(raw.trim().to_string()),
            Err(_) => None,
        };
        if let Some(key) = from_secret.filter(|key| !key.is_empty()) {
            return Ok(key);
        }
    }

    fallback
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .ok_or(SecretsError::MissingApiKey)
}

#[derive(Debug, thiserror::Error)]
pub enum SecretsError {
    #[error("Secret not found: {0}")]
    NotFound(String),

    #[error("Failed to read secret {reference}: {source}")]
    Read {
        reference: String,
        source: std::io::Error,
    },

    #[error("Secret {reference} is not valid JSON: {source}")]
    Malformed {
        reference: String,
        source: serde_json::Error,
    },

    #[error("API key not found in secret or environment")]
    MissingApiKey,
}
