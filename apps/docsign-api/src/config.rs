//! Server configuration from the environment

use anyhow::{anyhow, Context, Result};
use docsign_core::SigningConfig;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub port: u16,
    pub database_url: String,
    pub blob_dir: PathBuf,
    /// Prefix of download links handed to clients
    pub public_base_url: String,
    pub url_signing_secret: String,
    pub signing: SigningConfig,
}

impl ApiConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup, falling back to defaults for missing keys
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let port = match lookup("PORT") {
            Some(raw) => raw.parse().with_context(|| format!("Invalid PORT: {}", raw))?,
            None => 3001,
        };

        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("docsign-api");
        let database_url = lookup("DATABASE_URL").unwrap_or_else(|| {
            format!("sqlite:{}/docsign.db?mode=rwc", data_dir.display())
        });
        let blob_dir = lookup("BLOB_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("blobs"));
        let public_base_url = lookup("PUBLIC_BASE_URL")
            .unwrap_or_else(|| format!("http://localhost:{}", port))
            .trim_end_matches('/')
            .to_string();
        let url_signing_secret = match lookup("URL_SIGNING_SECRET") {
            Some(secret) if !secret.is_empty() => secret,
            _ => {
                tracing::warn!("URL_SIGNING_SECRET not set, download links will not survive a restart");
                Uuid::new_v4().simple().to_string()
            }
        };

        let mut signing = SigningConfig::default();
        if let Some(raw) = lookup("RENDER_WIDTH") {
            signing.render_width = raw
                .parse()
                .with_context(|| format!("Invalid RENDER_WIDTH: {}", raw))?;
        }
        if let Some(raw) = lookup("SIGNED_URL_TTL_SECS") {
            signing.signed_url_ttl_secs = raw
                .parse()
                .with_context(|| format!("Invalid SIGNED_URL_TTL_SECS: {}", raw))?;
        }
        signing.validate().map_err(|e| anyhow!(e))?;

        Ok(Self {
            port,
            database_url,
            blob_dir,
            public_base_url,
            url_signing_secret,
            signing,
        })
    }
}

/// Get platform-specific data directory
mod dirs {
    use std::path::PathBuf;

    pub fn data_dir() -> Option<PathBuf> {
        #[cfg(target_os = "macos")]
        {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library/Application Support"))
        }
        #[cfg(target_os = "linux")]
        {
            std::env::var("XDG_DATA_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".local/share"))
                })
        }
        #[cfg(target_os = "windows")]
        {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        }
        #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
        {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ApiConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.port, 3001);
        assert_eq!(config.public_base_url, "http://localhost:3001");
        assert_eq!(config.signing, SigningConfig::default());
        assert!(!config.url_signing_secret.is_empty());
    }

    #[test]
    fn test_overrides() {
        let config = ApiConfig::from_lookup(lookup(&[
            ("PORT", "8080"),
            ("DATABASE_URL", "sqlite::memory:"),
            ("BLOB_DIR", "/tmp/blobs"),
            ("PUBLIC_BASE_URL", "https://sign.example.com/"),
            ("URL_SIGNING_SECRET", "s3cret"),
            ("RENDER_WIDTH", "800"),
            ("SIGNED_URL_TTL_SECS", "60"),
        ]))
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.blob_dir, PathBuf::from("/tmp/blobs"));
        assert_eq!(config.public_base_url, "https://sign.example.com");
        assert_eq!(config.url_signing_secret, "s3cret");
        assert_eq!(config.signing.render_width, 800.0);
        assert_eq!(config.signing.signed_url_ttl_secs, 60);
    }

    #[test]
    fn test_invalid_values_fail() {
        assert!(ApiConfig::from_lookup(lookup(&[("PORT", "http")])).is_err());
        assert!(ApiConfig::from_lookup(lookup(&[("RENDER_WIDTH", "0")])).is_err());
        assert!(ApiConfig::from_lookup(lookup(&[("SIGNED_URL_TTL_SECS", "-5")])).is_err());
    }
}
