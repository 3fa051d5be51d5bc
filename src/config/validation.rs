use std::collections::HashSet;

use super::{AppConfig, ConfigError};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_providers(config)?;
    validate_cache(config)?;
    validate_log_level(config)?;
    validate_title_temperature(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.port == 0 {
        return Err(validation_err("server.port must be greater than 0"));
    }
    if let Some(worker_threads) = server.runtime_worker_threads {
        if worker_threads == 0 {
            return Err(validation_err(
                "server.runtime_worker_threads must be greater than 0 when set",
            ));
        }
    }
    if !server.base_path.is_empty() && !server.base_path.starts_with('/') {
        return Err(validation_err("server.base_path must start with '/'"));
    }
    let origin = url::Url::parse(&server.frontend_origin).map_err(|err| {
        validation_err(format!(
            "server.frontend_origin is not a valid URL: {err}"
        ))
    })?;
    if !matches!(origin.scheme(), "http" | "https") {
        return Err(validation_err(
            "server.frontend_origin must use http:// or https://",
        ));
    }
    Ok(())
}

fn validate_providers(config: &AppConfig) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for provider in &config.providers {
        if provider.name.trim().is_empty() {
            return Err(validation_err("providers contains an entry with an empty name"));
        }
        if !seen.insert(provider.name.as_str()) {
            return Err(validation_err(format!(
                "Provider '{}' is configured more than once",
                provider.name
            )));
        }
        validate_http_url(&provider.name, "base_url", Some(provider.base_url()))?;
        validate_http_url(&provider.name, "proxy", provider.proxy.as_deref())?;
        if provider.timeout_secs == Some(0) {
            return Err(validation_err(format!(
                "Provider '{}': timeout_secs must be greater than 0 when set",
                provider.name
            )));
        }
    }
    Ok(())
}

fn validate_http_url(
    provider_name: &str,
    field_name: &str,
    value: Option<&str>,
) -> Result<(), ConfigError> {
    let Some(value) = value.map(str::trim) else {
        return Ok(());
    };
    if value.is_empty() {
        return Err(validation_err(format!(
            "Provider '{provider_name}': {field_name} cannot be empty when set"
        )));
    }
    let parsed = url::Url::parse(value).map_err(|err| {
        validation_err(format!(
            "Provider '{provider_name}': {field_name} is not a valid URL: {err}"
        ))
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(validation_err(format!(
            "Provider '{provider_name}': {field_name} must use http:// or https://"
        )));
    }
    Ok(())
}

fn validate_cache(config: &AppConfig) -> Result<(), ConfigError> {
    if config.cache.max_entries == 0 {
        return Err(validation_err("cache.max_entries must be greater than 0"));
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let valid_levels = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}

fn validate_title_temperature(config: &AppConfig) -> Result<(), ConfigError> {
    let temperature = config.features.title_temperature;
    if !(0.0..=2.0).contains(&temperature) {
        return Err(validation_err(
            "features.title_temperature must be between 0.0 and 2.0",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;
    use crate::provider::ProviderKind;

    fn make_valid_config() -> AppConfig {
        AppConfig::default()
    }

    #[test]
    fn test_valid_config() {
        let config = make_valid_config();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_zero_port() {
        let mut config = make_valid_config();
        config.server.port = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_invalid_runtime_worker_threads() {
        let mut config = make_valid_config();
        config.server.runtime_worker_threads = Some(0);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_invalid_frontend_origin() {
        let mut config = make_valid_config();
        config.server.frontend_origin = "localhost:3000".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_duplicate_provider_name() {
        let mut config = make_valid_config();
        config
            .providers
            .push(ProviderConfig::new("openai", ProviderKind::OpenAi));
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_empty_provider_name() {
        let mut config = make_valid_config();
        config.providers.push(ProviderConfig::new(" ", ProviderKind::OpenAi));
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_invalid_base_url() {
        let mut config = make_valid_config();
        config.providers[0].base_url = Some("ftp://example.com".to_string());
        assert!(validate_config(&config).is_err());
        config.providers[0].base_url = Some("not a url".to_string());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_invalid_proxy_url() {
        let mut config = make_valid_config();
        config.providers[0].proxy = Some(String::new());
        assert!(validate_config(&config).is_err());
        config.providers[0].proxy = Some("http://127.0.0.1:7890".to_string());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_zero_timeout() {
        let mut config = make_valid_config();
        config.providers[1].timeout_secs = Some(0);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_zero_cache_capacity() {
        let mut config = make_valid_config();
        config.cache.max_entries = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = make_valid_config();
        config.features.log_level = "VERBOSE".to_string();
        assert!(validate_config(&config).is_err());
        config.features.log_level = "warning".to_string();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_title_temperature_range() {
        let mut config = make_valid_config();
        config.features.title_temperature = 3.5;
        assert!(validate_config(&config).is_err());
    }
}
