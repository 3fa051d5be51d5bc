pub mod validation;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::provider::ProviderKind;

use self::validation::validate_config;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_base_path")]
    pub base_path: String,
    #[serde(default = "default_frontend_origin")]
    pub frontend_origin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_worker_threads: Option<usize>,
    #[serde(default = "default_http_pool_idle_timeout_secs")]
    pub http_pool_idle_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub http_use_env_proxy: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8001
}
fn default_base_path() -> String {
    "/api/v1".to_string()
}
fn default_frontend_origin() -> String {
    "http://localhost:3000".to_string()
}
fn default_http_pool_idle_timeout_secs() -> u64 {
    15
}
fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_path: default_base_path(),
            frontend_origin: default_frontend_origin(),
            runtime_worker_threads: None,
            http_pool_idle_timeout_secs: default_http_pool_idle_timeout_secs(),
            http_use_env_proxy: true,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn pool_idle_timeout(&self) -> Option<Duration> {
        (self.http_pool_idle_timeout_secs > 0)
            .then(|| Duration::from_secs(self.http_pool_idle_timeout_secs))
    }
}

/// One upstream provider. Only `name` and `kind` are required; the rest
/// falls back to the defaults of the provider family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(default)]
    pub kind: ProviderKind,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub proxy: Option<String>,
}

impl ProviderConfig {
    #[must_use]
    pub fn new(name: &str, kind: ProviderKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            base_url: None,
            api_key: None,
            api_key_env: None,
            timeout_secs: None,
            proxy: None,
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.kind.default_base_url())
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(
            self.timeout_secs
                .unwrap_or_else(|| self.kind.default_timeout_secs()),
        )
    }

    #[must_use]
    pub fn api_key_env(&self) -> &str {
        self.api_key_env
            .as_deref()
            .unwrap_or_else(|| self.kind.default_api_key_env())
    }

    /// Inline key first, then the environment. Blank values count as missing.
    #[must_use]
    pub fn resolve_api_key(&self) -> Option<String> {
        self.resolve_api_key_with(|name| std::env::var(name).ok())
    }

    fn resolve_api_key_with<F>(&self, lookup: F) -> Option<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.api_key
            .clone()
            .or_else(|| lookup(self.api_key_env()))
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
    }
}

fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig::new("openai", ProviderKind::OpenAi),
        ProviderConfig::new("google", ProviderKind::Google),
    ]
}

/// Fingerprint cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: u64,
    /// 0 disables expiry.
    #[serde(default)]
    pub ttl_secs: u64,
}

fn default_cache_max_entries() -> u64 {
    1024
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: default_cache_max_entries(),
            ttl_secs: 0,
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_secs > 0).then(|| Duration::from_secs(self.ttl_secs))
    }
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_title_temperature")]
    pub title_temperature: f64,
}

fn default_log_level() -> String {
    "INFO".to_string()
}
fn default_title_temperature() -> f64 {
    0.3
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            title_temperature: default_title_temperature(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            providers: default_providers(),
            cache: CacheConfig::default(),
            features: FeaturesConfig::default(),
        }
    }
}

impl AppConfig {
    /// Apply `LOG_LEVEL`, `PORT` and `FRONTEND_ORIGIN` from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] when `PORT` is not a valid port number.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_with(|name| std::env::var(name).ok())
    }

    fn apply_overrides_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("LOG_LEVEL").filter(|v| !v.trim().is_empty()) {
            self.features.log_level = level.trim().to_string();
        }
        if let Some(port) = lookup("PORT").filter(|v| !v.trim().is_empty()) {
            self.server.port = port.trim().parse().map_err(|_| {
                ConfigError::Validation(format!("PORT must be a port number, got '{port}'"))
            })?;
        }
        if let Some(origin) = lookup("FRONTEND_ORIGIN").filter(|v| !v.trim().is_empty()) {
            self.server.frontend_origin = origin.trim().to_string();
        }
        Ok(())
    }
}

/// Load configuration from a YAML file, apply environment overrides and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let mut config: AppConfig = serde_yaml::from_str(&contents)?;
    config.apply_env_overrides()?;
    validate_config(&config)?;
    Ok(config)
}

/// Like [`load_config`], but a missing file yields the built-in defaults.
///
/// # Errors
///
/// Same as [`load_config`], except that a missing file is not an error.
pub fn load_config_or_default(path: &str) -> Result<AppConfig, ConfigError> {
    match load_config(path) {
        Err(ConfigError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            let mut config = AppConfig::default();
            config.apply_env_overrides()?;
            validate_config(&config)?;
            Ok(config)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_example_config() {
        let config = serde_yaml::from_str::<AppConfig>(
            &std::fs::read_to_string("config.example.yaml").unwrap(),
        )
        .unwrap();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.server.port, 8001);
        assert_eq!(config.server.base_path, "/api/v1");
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers[1].kind, ProviderKind::Google);
        assert_eq!(config.cache.max_entries, 1024);
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config: AppConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.frontend_origin, "http://localhost:3000");
        assert!(config.server.http_use_env_proxy);
        assert_eq!(
            config
                .providers
                .iter()
                .map(|p| p.name.as_str())
                .collect::<Vec<_>>(),
            ["openai", "google"]
        );
        assert!(config.cache.enabled);
        assert!(config.cache.ttl().is_none());
        assert!((config.features.title_temperature - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn test_provider_defaults_follow_kind() {
        let google = ProviderConfig::new("google", ProviderKind::Google);
        assert_eq!(
            google.base_url(),
            "https://generativelanguage.googleapis.com/v1beta/openai"
        );
        assert_eq!(google.timeout(), Duration::from_secs(60));
        assert_eq!(google.api_key_env(), "GOOGLE_GENERATIVE_AI_API_KEY");

        let mut custom = ProviderConfig::new("local", ProviderKind::OpenAi);
        custom.base_url = Some("http://127.0.0.1:8080/v1".to_string());
        custom.timeout_secs = Some(5);
        assert_eq!(custom.base_url(), "http://127.0.0.1:8080/v1");
        assert_eq!(custom.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_resolve_api_key_prefers_inline_and_skips_blank() {
        let mut provider = ProviderConfig::new("openai", ProviderKind::OpenAi);
        let env = |name: &str| (name == "OPENAI_API_KEY").then(|| "sk-env".to_string());
        assert_eq!(provider.resolve_api_key_with(env), Some("sk-env".to_string()));

        provider.api_key = Some("sk-inline".to_string());
        assert_eq!(
            provider.resolve_api_key_with(env),
            Some("sk-inline".to_string())
        );

        provider.api_key = Some("   ".to_string());
        assert_eq!(provider.resolve_api_key_with(env), None);

        provider.api_key = None;
        assert_eq!(provider.resolve_api_key_with(|_| None), None);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        config
            .apply_overrides_with(|name| match name {
                "LOG_LEVEL" => Some("debug".to_string()),
                "PORT" => Some("9100".to_string()),
                "FRONTEND_ORIGIN" => Some("https://chat.example.com".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.features.log_level, "debug");
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.frontend_origin, "https://chat.example.com");

        let err = config
            .apply_overrides_with(|name| (name == "PORT").then(|| "http".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = load_config_or_default("does-not-exist.yaml");
        assert!(config.is_ok() || matches!(config, Err(ConfigError::Validation(_))));
        assert!(matches!(
            load_config("does-not-exist.yaml"),
            Err(ConfigError::Io(_))
        ));
    }
}
