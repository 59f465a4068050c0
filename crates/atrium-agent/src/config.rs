//! Daemon configuration: provider endpoints and the model catalog.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use atrium_llm::ModelDescriptor;

/// One model provider endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// Provider key, matching `ModelDescriptor::provider`.
    pub name: String,
    /// Base URL of the provider's generate/health API.
    pub base_url: String,
    /// Environment variable holding the bearer token, if the provider
    /// needs one. The key itself never lives in the config file.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl ProviderConfig {
    /// Resolve the API key from the configured environment variable.
    #[must_use]
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
    }
}

/// Daemon configuration file (JSON).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtriumConfig {
    /// Provider endpoints to register backends for.
    pub providers: Vec<ProviderConfig>,
    /// Model catalog entries.
    pub models: Vec<ModelDescriptor>,
}

impl AtriumConfig {
    /// Load and parse a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        if config.providers.is_empty() {
            anyhow::bail!("config {} declares no providers", path.display());
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "providers": [
            { "name": "alpha", "baseUrl": "http://localhost:9100", "apiKeyEnv": "ALPHA_KEY" }
        ],
        "models": [
            {
                "id": "alpha-large",
                "displayName": "Alpha Large",
                "provider": "alpha",
                "capabilities": ["reasoning"],
                "contextWindow": 128000,
                "inputPricePerMtok": 3.0,
                "outputPricePerMtok": 15.0,
                "tier": "standard",
                "healthy": true
            }
        ]
    }"#;

    #[test]
    fn parses_a_sample_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = AtriumConfig::load(file.path()).unwrap();
        assert_eq!(config.providers.len(), 1);
        assert_eq!(config.providers[0].name, "alpha");
        assert_eq!(config.models[0].id, "alpha-large");
        assert_eq!(config.models[0].provider, "alpha");
    }

    #[test]
    fn empty_provider_list_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{ "providers": [], "models": [] }"#).unwrap();
        assert!(AtriumConfig::load(file.path()).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(AtriumConfig::load(Path::new("/nonexistent/atrium.json")).is_err());
    }
}
