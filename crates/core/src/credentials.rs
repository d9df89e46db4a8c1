use crate::error::ConfigError;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const API_KEY_VAR: &str = "XAI_API_KEY";
pub const DEFAULT_SECRETS_FILE: &str = "secrets.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Environment,
    SecretsFile,
}

#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

/// Uses `env_value` (the caller's read of [`API_KEY_VAR`]) when it is not
/// blank, otherwise the same key from `secrets_file`.
pub fn resolve_api_key_from(
    env_value: Option<String>,
    secrets_file: &Path,
) -> Result<(ApiKey, CredentialSource), ConfigError> {
    if let Some(key) = non_blank(env_value) {
        debug!(source = "environment", "api key resolved");
        return Ok((ApiKey(key), CredentialSource::Environment));
    }

    if let Some(key) = non_blank(read_secret(secrets_file, API_KEY_VAR)?) {
        debug!(source = %secrets_file.display(), "api key resolved");
        return Ok((ApiKey(key), CredentialSource::SecretsFile));
    }

    Err(ConfigError::MissingCredential {
        secrets_file: PathBuf::from(secrets_file),
    })
}

/// A missing file reads as no value; an unreadable or malformed one is an
/// error.
fn read_secret(path: &Path, key: &str) -> Result<Option<String>, ConfigError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::SecretsFile {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let table: toml::Table = raw.parse().map_err(|source| ConfigError::SecretsFormat {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(table
        .get(key)
        .and_then(|value| value.as_str())
        .map(str::to_string))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
}
