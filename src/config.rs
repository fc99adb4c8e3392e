use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::models::Provider;

fn default_sync_timeout_secs() -> u64 {
    120
}

/// OAuth client settings for one provider.
///
/// `base_url` overrides the adapter's production endpoint; tests point it at
/// a local mock server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    pub base_url: Option<String>,
}

impl ProviderConfig {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }
}

/// Engine configuration, loadable from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub dbs: ProviderConfig,
    pub ocbc: ProviderConfig,
    pub uob: ProviderConfig,

    /// Overall budget for one sync invocation, in seconds.
    #[serde(default = "default_sync_timeout_secs")]
    pub sync_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dbs: ProviderConfig::default(),
            ocbc: ProviderConfig::default(),
            uob: ProviderConfig::default(),
            sync_timeout_secs: default_sync_timeout_secs(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("Failed to parse config TOML")
    }

    pub fn provider(&self, provider: Provider) -> &ProviderConfig {
        match provider {
            Provider::Dbs => &self.dbs,
            Provider::Ocbc => &self.ocbc,
            Provider::Uob => &self.uob,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_toml_with_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [dbs]
            client_id = "dbs-client"
            client_secret = "dbs-secret"
            "#,
        )
        .unwrap();

        assert_eq!(config.dbs.client_id, "dbs-client");
        assert!(config.ocbc.client_id.is_empty());
        assert_eq!(config.sync_timeout_secs, 120);
    }

    #[test]
    fn provider_lookup_is_total() {
        let config = EngineConfig::default();
        for provider in Provider::ALL {
            let _ = config.provider(provider);
        }
    }
}
