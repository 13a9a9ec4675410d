use serde::Deserialize;
use std::path::Path;

use crate::crypto::TokenCipher;

const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("{0} must be set")]
    MissingVar(&'static str),
    #[error("{0}")]
    Invalid(String),
}

/// What to do when an upload succeeds but link sharing fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShareFailurePolicy {
    /// Keep the file, log a warning and report the upload as successful.
    #[default]
    KeepPrivate,
    /// Delete the file again and report the upload as failed.
    DeleteObject,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStoreConfig {
    pub endpoint: String,
    #[serde(default = "default_region")]
    pub region: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Base for public object URLs. Defaults to `{endpoint}/{bucket}`.
    #[serde(default)]
    pub public_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriveConfig {
    pub folder_id: String,
    #[serde(default = "default_true")]
    pub share_with_link: bool,
    #[serde(default)]
    pub on_share_failure: ShareFailurePolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub object_store: ObjectStoreConfig,
    pub drive: DriveConfig,
    pub oauth: OAuthConfig,
    pub token_encryption_key: String,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

fn default_true() -> bool {
    true
}

fn default_http_timeout_secs() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

impl StorageConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: StorageConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source; `from_env` uses the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &'static str| optional(name).ok_or(ConfigError::MissingVar(name));

        let share_with_link = match optional("GOOGLE_DRIVE_SHARE_WITH_LINK") {
            Some(v) => parse_bool(&v).ok_or_else(|| {
                ConfigError::Invalid(format!("GOOGLE_DRIVE_SHARE_WITH_LINK is not a boolean: {}", v))
            })?,
            None => true,
        };
        let http_timeout_secs = match optional("STORAGE_HTTP_TIMEOUT_SECS") {
            Some(v) => v.parse().map_err(|_| {
                ConfigError::Invalid(format!("STORAGE_HTTP_TIMEOUT_SECS is not a number: {}", v))
            })?,
            None => DEFAULT_HTTP_TIMEOUT_SECS,
        };

        let config = StorageConfig {
            object_store: ObjectStoreConfig {
                endpoint: required("S3_ENDPOINT")?,
                region: optional("S3_REGION").unwrap_or_else(default_region),
                bucket: required("S3_BUCKET")?,
                access_key_id: required("S3_ACCESS_KEY_ID")?,
                secret_access_key: required("S3_SECRET_ACCESS_KEY")?,
                public_url: optional("S3_PUBLIC_URL"),
            },
            drive: DriveConfig {
                folder_id: required("GOOGLE_DRIVE_FOLDER_ID")?,
                share_with_link,
                on_share_failure: ShareFailurePolicy::default(),
            },
            oauth: OAuthConfig {
                client_id: required("GOOGLE_CLIENT_ID")?,
                client_secret: required("GOOGLE_CLIENT_SECRET")?,
                redirect_uri: required("GOOGLE_REDIRECT_URI")?,
            },
            token_encryption_key: required("TOKEN_ENCRYPTION_KEY")?,
            http_timeout_secs,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        let endpoint = &self.object_store.endpoint;
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return invalid("object_store.endpoint must be an http(s) URL");
        }
        if self.object_store.bucket.is_empty() {
            return invalid("object_store.bucket must not be empty");
        }
        if self.object_store.access_key_id.is_empty() || self.object_store.secret_access_key.is_empty() {
            return invalid("object_store credentials must not be empty");
        }
        if self.drive.folder_id.is_empty() {
            return invalid("drive.folder_id must not be empty");
        }
        if self.oauth.client_id.is_empty() || self.oauth.client_secret.is_empty() {
            return invalid("oauth client credentials must not be empty");
        }
        if self.oauth.redirect_uri.is_empty() {
            return invalid("oauth.redirect_uri must not be empty");
        }
        if self.http_timeout_secs == 0 {
            return invalid("http_timeout_secs must be positive");
        }
        self.token_cipher()?;
        Ok(())
    }

    pub fn token_cipher(&self) -> Result<TokenCipher, ConfigError> {
        TokenCipher::from_hex(&self.token_encryption_key)
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
