use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::cache::FingerprintCache;
use crate::config::AppConfig;
use crate::routing::ProviderRouter;
use crate::util::format_request_seq_hex;

/// Shared application state accessible to all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub router: ProviderRouter,
    pub cache: Arc<FingerprintCache>,
    request_seq: AtomicU64,
}

impl AppState {
    #[must_use]
    pub fn new(config: AppConfig, router: ProviderRouter) -> Self {
        let cache = Arc::new(FingerprintCache::new(&config.cache));
        Self::with_cache(config, router, cache)
    }

    #[must_use]
    pub fn with_cache(
        config: AppConfig,
        router: ProviderRouter,
        cache: Arc<FingerprintCache>,
    ) -> Self {
        Self {
            config,
            router,
            cache,
            request_seq: AtomicU64::new(1),
        }
    }

    /// Build the router and cache from configuration.
    #[must_use]
    pub fn from_config(config: AppConfig) -> Self {
        let router = ProviderRouter::from_config(&config);
        Self::new(config, router)
    }

    /// Short id attached to the log lines of one request.
    #[must_use]
    pub fn next_request_id(&self) -> String {
        let seq = self.request_seq.fetch_add(1, Ordering::Relaxed);
        format_request_seq_hex("relay-", seq)
    }
}
