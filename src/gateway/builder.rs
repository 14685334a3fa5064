//! Builder for configuring gateway instances

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::Gateway;
use crate::cache::{CacheConfig, CacheStore, DirStore, ResponseCache};
use crate::config::{Config, SecretString, Secrets};
use crate::providers::{
    JitterSource, ProviderAdapter, ProviderRegistry, RegisteredProvider, ReqwestTransport,
    RetryPolicy, RoutingConfig, ThreadRngJitter, Transport,
};
use crate::types::ProviderKind;
use crate::{HuginnError, Result};

/// Main entry point for creating gateway instances.
pub struct Huginn;

impl Huginn {
    /// Create a new builder for configuring the gateway.
    pub fn builder() -> HuginnBuilder {
        HuginnBuilder::new()
    }
}

/// Builder for configuring gateway instances.
pub struct HuginnBuilder {
    adapters: Vec<ProviderAdapter>,
    transports: HashMap<ProviderKind, Arc<dyn Transport>>,
    policies: HashMap<ProviderKind, RetryPolicy>,
    transport: Option<Arc<dyn Transport>>,
    retry: RetryPolicy,
    routing: RoutingConfig,
    cache: CacheConfig,
    cache_store: Option<Arc<dyn CacheStore>>,
    jitter: Option<Arc<dyn JitterSource>>,
}

impl Default for HuginnBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HuginnBuilder {
    pub fn new() -> Self {
        Self {
            adapters: Vec::new(),
            transports: HashMap::new(),
            policies: HashMap::new(),
            transport: None,
            retry: RetryPolicy::default(),
            routing: RoutingConfig::default(),
            cache: CacheConfig::default(),
            cache_store: None,
            jitter: None,
        }
    }

    /// Configure the Gemini provider with its default endpoint and model.
    pub fn gemini(self, api_key: impl Into<SecretString>) -> Self {
        self.provider(ProviderAdapter::new(ProviderKind::Gemini, api_key))
    }

    /// Configure the DeepSeek provider with its default endpoint and model.
    pub fn deepseek(self, api_key: impl Into<SecretString>) -> Self {
        self.provider(ProviderAdapter::new(ProviderKind::DeepSeek, api_key))
    }

    /// Register a fully configured adapter, replacing one of the same kind.
    pub fn provider(mut self, adapter: ProviderAdapter) -> Self {
        let kind = adapter.kind();
        self.adapters.retain(|a| a.kind() != kind);
        self.adapters.push(adapter);
        self
    }

    /// Transport used by every provider without its own (default: reqwest).
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Transport for one provider only.
    pub fn provider_transport(mut self, kind: ProviderKind, transport: Arc<dyn Transport>) -> Self {
        self.transports.insert(kind, transport);
        self
    }

    /// Retry policy for every provider without its own.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn provider_retry_policy(mut self, kind: ProviderKind, policy: RetryPolicy) -> Self {
        self.policies.insert(kind, policy);
        self
    }

    pub fn routing(mut self, routing: RoutingConfig) -> Self {
        self.routing = routing;
        self
    }

    /// Provider used for requests without an explicit pin (default: Gemini).
    pub fn default_provider(mut self, kind: ProviderKind) -> Self {
        self.routing.default = kind;
        self
    }

    pub fn fallback(mut self, kind: ProviderKind) -> Self {
        self.routing.fallback = Some(kind);
        self
    }

    /// How long a provider stays out of default selection after a terminal
    /// backend failure.
    pub fn unhealthy_cooldown(mut self, cooldown: Duration) -> Self {
        self.routing.unhealthy_cooldown = cooldown;
        self
    }

    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.cache = config;
        self
    }

    /// Back the in-memory cache with a durable store.
    pub fn cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache_store = Some(store);
        self
    }

    /// Source of backoff jitter (default: thread-local RNG).
    pub fn jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Configure from loaded [`Config`] and [`Secrets`], reading API key
    /// environment variables from the process environment.
    pub fn from_config(config: &Config, secrets: &Secrets) -> Result<Self> {
        Self::from_config_with_env(config, secrets, &|name| std::env::var(name).ok())
    }

    /// [`from_config`](Self::from_config) with an injected environment.
    ///
    /// Providers that are enabled but have no resolvable key are skipped;
    /// [`build`](Self::build) fails with `NoProvider` if none remain.
    pub fn from_config_with_env(
        config: &Config,
        secrets: &Secrets,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        config.validate()?;

        let mut builder = Self::new()
            .routing(config.routing.clone())
            .retry_policy(config.retry.to_policy())
            .cache(config.cache.to_cache_config());

        if let Some(dir) = &config.cache.dir {
            let store = DirStore::open(dir).map_err(|e| {
                HuginnError::Configuration(format!("cache directory {dir:?}: {e}"))
            })?;
            builder = builder.cache_store(Arc::new(store));
        }

        for kind in ProviderKind::ALL {
            if !config.providers.is_enabled(kind) {
                debug!(provider = %kind, "provider disabled");
                continue;
            }
            let section = config.providers.get(kind);

            let Some((api_key, source)) = secrets.resolve_api_key(kind, config.routing.default, env)
            else {
                if section.is_some() {
                    warn!(provider = %kind, env = kind.api_key_env(), "no API key found, skipping provider");
                } else {
                    debug!(provider = %kind, "no API key found, skipping provider");
                }
                continue;
            };
            info!(provider = %kind, source = %source, "resolved API key");

            let mut settings = ProviderAdapter::new(kind, api_key).settings().clone();
            if let Some(section) = section {
                if let Some(base_url) = &section.base_url {
                    settings.base_url = base_url.trim_end_matches('/').to_string();
                }
                if let Some(max) = section.max_attachment_bytes {
                    settings.max_attachment_bytes = max;
                }
                if let Some(model) = &section.default_model {
                    settings.default_model = model.clone();
                }
            }
            let adapter = ProviderAdapter::with_settings(kind, settings);
            if !adapter.supports_model(adapter.default_model()) {
                return Err(HuginnError::Configuration(format!(
                    "providers.{kind}.default_model '{}' is not a {kind} model",
                    adapter.default_model()
                )));
            }

            builder = builder.provider(adapter);
            if section.is_some_and(|s| s.retry.is_some()) {
                builder = builder.provider_retry_policy(kind, config.retry_policy(kind));
            }
        }

        Ok(builder)
    }

    /// Build the gateway.
    pub fn build(self) -> Result<Gateway> {
        if self.adapters.is_empty() {
            return Err(HuginnError::NoProvider);
        }

        let default_transport = self
            .transport
            .unwrap_or_else(|| Arc::new(ReqwestTransport::new()));

        let mut registry = ProviderRegistry::new(self.routing.clone());
        for adapter in self.adapters {
            let kind = adapter.kind();
            let transport = self
                .transports
                .get(&kind)
                .cloned()
                .unwrap_or_else(|| Arc::clone(&default_transport));
            let policy = self
                .policies
                .get(&kind)
                .cloned()
                .unwrap_or_else(|| self.retry.clone());
            registry.register(RegisteredProvider::new(adapter, transport, policy));
        }

        if !registry.contains(self.routing.default) {
            warn!(
                provider = %self.routing.default,
                "default provider is not configured, selecting from the remaining providers"
            );
        }
        if let Some(fallback) = self.routing.fallback
            && !registry.contains(fallback)
        {
            warn!(provider = %fallback, "fallback provider is not configured, fallback disabled");
        }

        let mut cache = ResponseCache::new(self.cache);
        if let Some(store) = self.cache_store {
            cache = cache.with_store(store);
        }
        let jitter = self.jitter.unwrap_or_else(|| Arc::new(ThreadRngJitter));

        info!(providers = ?registry.kinds(), routing = ?self.routing, "gateway built");
        Ok(Gateway::new(registry, cache, jitter))
    }
}
