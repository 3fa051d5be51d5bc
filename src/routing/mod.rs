use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::config::AppConfig;
use crate::error::RelayError;
use crate::provider::{ChatProvider, OpenAiCompatClient};

/// Static provider lookup table, built once at startup.
#[derive(Clone, Default)]
pub struct ProviderRouter {
    providers: FxHashMap<String, Arc<dyn ChatProvider>>,
    /// Configuration order, for stable listings.
    names: Vec<Arc<str>>,
}

impl ProviderRouter {
    /// Build a client for every configured provider whose API key resolves.
    ///
    /// Providers without a key, or whose client cannot be built, are logged
    /// and left out; requests naming them fail as not configured.
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        let mut router = Self::default();
        for provider in &config.providers {
            let Some(api_key) = provider.resolve_api_key() else {
                tracing::warn!(
                    provider = %provider.name,
                    env = provider.api_key_env(),
                    "API key not found, provider disabled"
                );
                continue;
            };
            match OpenAiCompatClient::from_config(provider, &api_key, &config.server) {
                Ok(client) => {
                    tracing::info!(
                        provider = %provider.name,
                        kind = %provider.kind,
                        base_url = provider.base_url(),
                        timeout_secs = provider.timeout().as_secs(),
                        "provider client initialized"
                    );
                    router.insert(Arc::new(client));
                }
                Err(err) => {
                    tracing::error!(
                        provider = %provider.name,
                        error = %err,
                        "failed to initialize provider client"
                    );
                }
            }
        }
        router
    }

    /// Build from explicit capability objects. A later entry with the same
    /// name replaces an earlier one.
    #[must_use]
    pub fn from_providers<I>(providers: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn ChatProvider>>,
    {
        let mut router = Self::default();
        for provider in providers {
            router.insert(provider);
        }
        router
    }

    fn insert(&mut self, provider: Arc<dyn ChatProvider>) {
        let name = provider.name().to_string();
        if self.providers.insert(name.clone(), provider).is_none() {
            self.names.push(Arc::from(name.as_str()));
        }
    }

    /// Look up a provider by name.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ProviderNotConfigured`] for unknown names.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn ChatProvider>, RelayError> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| RelayError::ProviderNotConfigured(name.to_string()))
    }

    #[must_use]
    pub fn configured_names(&self) -> &[Arc<str>] {
        &self.names
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use crate::provider::{CompletionRequest, ProviderChunkStream, ProviderKind};

    struct Named(&'static str);

    #[async_trait::async_trait]
    impl ChatProvider for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn endpoint(&self) -> &str {
            "http://test.invalid"
        }

        async fn open_stream(
            &self,
            _request: &CompletionRequest,
        ) -> Result<ProviderChunkStream, RelayError> {
            Err(RelayError::Unexpected("not used".to_string()))
        }

        async fn complete(
            &self,
            _request: &CompletionRequest,
        ) -> Result<Option<String>, RelayError> {
            Ok(None)
        }
    }

    #[test]
    fn test_resolve_known_and_unknown() {
        let router = ProviderRouter::from_providers([
            Arc::new(Named("openai")) as Arc<dyn ChatProvider>,
            Arc::new(Named("google")),
        ]);
        assert_eq!(router.resolve("google").unwrap().name(), "google");
        let err = router.resolve("xai").err().unwrap();
        assert!(matches!(err, RelayError::ProviderNotConfigured(ref name) if name == "xai"));
        let names: Vec<&str> = router.configured_names().iter().map(AsRef::as_ref).collect();
        assert_eq!(names, ["openai", "google"]);
    }

    #[test]
    fn test_duplicate_name_replaces_without_relisting() {
        let router = ProviderRouter::from_providers([
            Arc::new(Named("openai")) as Arc<dyn ChatProvider>,
            Arc::new(Named("openai")),
        ]);
        assert_eq!(router.configured_names().len(), 1);
    }

    #[test]
    fn test_from_config_skips_providers_without_keys() {
        let mut with_key = ProviderConfig::new("local", ProviderKind::OpenAi);
        with_key.api_key = Some("sk-test".to_string());
        with_key.base_url = Some("http://127.0.0.1:9/v1".to_string());
        let mut without_key = ProviderConfig::new("nokey", ProviderKind::Google);
        without_key.api_key_env = Some("AI_RELAY_TEST_UNSET_KEY_VARIABLE".to_string());

        let config = AppConfig {
            providers: vec![with_key, without_key],
            ..AppConfig::default()
        };
        let router = ProviderRouter::from_config(&config);
        assert!(router.resolve("local").is_ok());
        assert!(router.resolve("nokey").is_err());
        assert_eq!(router.configured_names().len(), 1);
    }
}
