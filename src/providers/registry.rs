//! Provider registry with health tracking.
//!
//! The registry is populated once at startup and read concurrently for the
//! life of the gateway. Each entry pairs an adapter with its transport,
//! retry policy, and mutable health bookkeeping.
//!
//! # Selection
//!
//! ```text
//! request.provider = Some(p)  ──► p (healthy or not), UnknownProvider if absent
//! request.provider = None     ──► first healthy of [default, fallback, others...]
//!                                 AllProvidersUnavailable if every one is benched
//! ```
//!
//! A provider is benched by [`mark_unhealthy`](ProviderRegistry::mark_unhealthy)
//! for a cooldown window and becomes eligible again once it expires or on
//! the next successful call.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use super::adapter::ProviderAdapter;
use super::retry::RetryPolicy;
use super::routing::{ProviderLatency, RoutingConfig};
use super::transport::Transport;
use crate::error::{HuginnError, ProviderError, ProviderErrorKind, Result};
use crate::types::{CompletionRequest, CompletionResult, ProviderKind};

/// An adapter bound to its transport, retry policy and health state.
pub struct RegisteredProvider {
    adapter: ProviderAdapter,
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    unhealthy_until: Mutex<Option<Instant>>,
    latency: ProviderLatency,
}

impl RegisteredProvider {
    pub fn new(adapter: ProviderAdapter, transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self {
            adapter,
            transport,
            policy,
            unhealthy_until: Mutex::new(None),
            latency: ProviderLatency::with_default_alpha(),
        }
    }

    pub fn kind(&self) -> ProviderKind {
        self.adapter.kind()
    }

    pub fn adapter(&self) -> &ProviderAdapter {
        &self.adapter
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn latency(&self) -> &ProviderLatency {
        &self.latency
    }

    /// One attempt: build the wire request, send it, parse the response.
    ///
    /// Transport failures are remapped to `Timeout` or `ProviderUnavailable`;
    /// nothing raw escapes.
    pub async fn call(
        &self,
        request: &CompletionRequest,
        model: &str,
    ) -> std::result::Result<CompletionResult, ProviderError> {
        let kind = self.kind();
        let wire = self.adapter.build_wire_request(request, model)?;
        let start = Instant::now();
        let response = self.transport.send(wire).await.map_err(|e| {
            let error_kind = if e.timed_out {
                ProviderErrorKind::Timeout
            } else {
                ProviderErrorKind::ProviderUnavailable
            };
            ProviderError::new(error_kind, kind, e.message)
        })?;
        let completion = self.adapter.parse_wire_response(&response)?;
        let elapsed = start.elapsed();

        Ok(CompletionResult {
            text: completion.text,
            finish_reason: completion.finish_reason,
            provider: kind,
            model: completion.model.unwrap_or_else(|| model.to_string()),
            latency_ms: elapsed.as_millis() as u64,
            metadata: completion.metadata,
        })
    }

    fn unhealthy_until(&self) -> Option<Instant> {
        *self
            .unhealthy_until
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn set_unhealthy_until(&self, until: Option<Instant>) {
        *self
            .unhealthy_until
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = until;
    }

    pub fn is_healthy(&self) -> bool {
        self.unhealthy_until()
            .is_none_or(|until| Instant::now() >= until)
    }
}

impl std::fmt::Debug for RegisteredProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredProvider")
            .field("kind", &self.kind())
            .field("default_model", &self.adapter.default_model())
            .field("policy", &self.policy)
            .field("healthy", &self.is_healthy())
            .field("latency", &self.latency)
            .finish()
    }
}

/// Point-in-time health snapshot of one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderHealth {
    pub provider: ProviderKind,
    pub healthy: bool,
    /// Remaining cooldown when benched.
    pub unhealthy_for: Option<Duration>,
    pub average_latency: Option<Duration>,
}

/// Process-scoped table of configured providers.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<RegisteredProvider>>,
    routing: RoutingConfig,
}

impl ProviderRegistry {
    pub fn new(routing: RoutingConfig) -> Self {
        Self {
            providers: Vec::new(),
            routing,
        }
    }

    /// Add a provider, replacing any earlier registration of the same kind.
    pub fn register(&mut self, provider: RegisteredProvider) {
        let kind = provider.kind();
        self.providers.retain(|p| p.kind() != kind);
        debug!(provider = %kind, model = provider.adapter.default_model(), "registered provider");
        self.providers.push(Arc::new(provider));
    }

    pub fn routing(&self) -> &RoutingConfig {
        &self.routing
    }

    pub fn get(&self, kind: ProviderKind) -> Option<Arc<RegisteredProvider>> {
        self.providers.iter().find(|p| p.kind() == kind).cloned()
    }

    pub fn contains(&self, kind: ProviderKind) -> bool {
        self.providers.iter().any(|p| p.kind() == kind)
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Registered provider kinds, in registration order.
    pub fn kinds(&self) -> Vec<ProviderKind> {
        self.providers.iter().map(|p| p.kind()).collect()
    }

    /// The provider that serves `hint`, or the first healthy one in
    /// selection order when there is no hint.
    pub fn resolve(&self, hint: Option<ProviderKind>) -> Result<Arc<RegisteredProvider>> {
        if let Some(kind) = hint {
            return self.get(kind).ok_or(HuginnError::UnknownProvider(kind));
        }
        if self.providers.is_empty() {
            return Err(HuginnError::NoProvider);
        }

        let candidates: Vec<_> = self
            .routing
            .selection_order()
            .into_iter()
            .filter_map(|kind| self.get(kind))
            .collect();
        if let Some(healthy) = candidates.iter().find(|p| p.is_healthy()) {
            return Ok(Arc::clone(healthy));
        }

        Err(HuginnError::AllProvidersUnavailable {
            failures: candidates
                .iter()
                .map(|p| {
                    HuginnError::Provider(ProviderError::new(
                        ProviderErrorKind::ProviderUnavailable,
                        p.kind(),
                        "provider is cooling down after recent failures",
                    ))
                })
                .collect(),
        })
    }

    /// The configured fallback for `primary`, if it is registered, healthy
    /// and a different provider.
    pub fn fallback_for(&self, primary: ProviderKind) -> Option<Arc<RegisteredProvider>> {
        let kind = self.routing.fallback.filter(|&f| f != primary)?;
        self.get(kind).filter(|p| p.is_healthy())
    }

    /// Bench `kind` from default selection for `duration`.
    pub fn mark_unhealthy(&self, kind: ProviderKind, duration: Duration) {
        if let Some(provider) = self.get(kind) {
            info!(provider = %kind, cooldown_secs = duration.as_secs(), "marking provider unhealthy");
            provider.set_unhealthy_until(Some(Instant::now() + duration));
        }
    }

    /// Clear any cooldown on `kind`.
    pub fn mark_healthy(&self, kind: ProviderKind) {
        if let Some(provider) = self.get(kind)
            && provider.unhealthy_until().is_some()
        {
            debug!(provider = %kind, "provider healthy again");
            provider.set_unhealthy_until(None);
        }
    }

    /// Whether `kind` is registered and not cooling down.
    pub fn is_healthy(&self, kind: ProviderKind) -> bool {
        self.get(kind).is_some_and(|p| p.is_healthy())
    }

    pub fn health(&self) -> Vec<ProviderHealth> {
        let now = Instant::now();
        self.providers
            .iter()
            .map(|p| {
                let remaining = p
                    .unhealthy_until()
                    .and_then(|until| until.checked_duration_since(now))
                    .filter(|d| !d.is_zero());
                ProviderHealth {
                    provider: p.kind(),
                    healthy: remaining.is_none(),
                    unhealthy_for: remaining,
                    average_latency: p.latency.average(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::transport::{TransportError, WireRequest, WireResponse};
    use async_trait::async_trait;

    struct StaticTransport(std::result::Result<WireResponse, TransportError>);

    #[async_trait]
    impl Transport for StaticTransport {
        async fn send(
            &self,
            _request: WireRequest,
        ) -> std::result::Result<WireResponse, TransportError> {
            self.0.clone()
        }
    }

    fn provider(kind: ProviderKind) -> RegisteredProvider {
        let response = WireResponse::json(
            200,
            &serde_json::json!({"choices": [{"message": {"content": "ok"}, "finish_reason": "stop"}]}),
        );
        RegisteredProvider::new(
            ProviderAdapter::new(kind, "key"),
            Arc::new(StaticTransport(Ok(response))),
            RetryPolicy::default(),
        )
    }

    fn registry() -> ProviderRegistry {
        let mut registry =
            ProviderRegistry::new(RoutingConfig::new(ProviderKind::Gemini).fallback(ProviderKind::DeepSeek));
        registry.register(provider(ProviderKind::Gemini));
        registry.register(provider(ProviderKind::DeepSeek));
        registry
    }

    #[test]
    fn resolves_default_without_hint() {
        let registry = registry();
        assert_eq!(registry.resolve(None).unwrap().kind(), ProviderKind::Gemini);
    }

    #[test]
    fn resolves_pinned_provider() {
        let registry = registry();
        assert_eq!(
            registry.resolve(Some(ProviderKind::DeepSeek)).unwrap().kind(),
            ProviderKind::DeepSeek
        );
    }

    #[test]
    fn unknown_pin_is_an_error() {
        let mut registry = ProviderRegistry::new(RoutingConfig::default());
        registry.register(provider(ProviderKind::Gemini));
        assert_eq!(
            registry.resolve(Some(ProviderKind::DeepSeek)).unwrap_err(),
            HuginnError::UnknownProvider(ProviderKind::DeepSeek)
        );
    }

    #[test]
    fn empty_registry_has_no_provider() {
        let registry = ProviderRegistry::new(RoutingConfig::default());
        assert_eq!(registry.resolve(None).unwrap_err(), HuginnError::NoProvider);
    }

    #[test]
    fn register_replaces_same_kind() {
        let mut registry = registry();
        registry.register(provider(ProviderKind::Gemini));
        assert_eq!(registry.kinds(), vec![ProviderKind::DeepSeek, ProviderKind::Gemini]);
    }

    #[tokio::test(start_paused = true)]
    async fn unhealthy_default_is_skipped_until_cooldown_expires() {
        let registry = registry();
        registry.mark_unhealthy(ProviderKind::Gemini, Duration::from_secs(30));

        assert!(!registry.is_healthy(ProviderKind::Gemini));
        assert_eq!(registry.resolve(None).unwrap().kind(), ProviderKind::DeepSeek);
        // Still reachable when pinned.
        assert_eq!(
            registry.resolve(Some(ProviderKind::Gemini)).unwrap().kind(),
            ProviderKind::Gemini
        );

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(registry.is_healthy(ProviderKind::Gemini));
        assert_eq!(registry.resolve(None).unwrap().kind(), ProviderKind::Gemini);
    }

    #[tokio::test(start_paused = true)]
    async fn all_benched_reports_every_provider() {
        let registry = registry();
        registry.mark_unhealthy(ProviderKind::Gemini, Duration::from_secs(30));
        registry.mark_unhealthy(ProviderKind::DeepSeek, Duration::from_secs(30));

        match registry.resolve(None).unwrap_err() {
            HuginnError::AllProvidersUnavailable { failures } => assert_eq!(failures.len(), 2),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_requires_healthy_distinct_provider() {
        let registry = registry();
        assert_eq!(
            registry.fallback_for(ProviderKind::Gemini).unwrap().kind(),
            ProviderKind::DeepSeek
        );
        assert!(registry.fallback_for(ProviderKind::DeepSeek).is_none());

        registry.mark_unhealthy(ProviderKind::DeepSeek, Duration::from_secs(5));
        assert!(registry.fallback_for(ProviderKind::Gemini).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn mark_healthy_clears_cooldown() {
        let registry = registry();
        registry.mark_unhealthy(ProviderKind::Gemini, Duration::from_secs(30));
        let health = registry.health();
        assert_eq!(health[0].unhealthy_for, Some(Duration::from_secs(30)));

        registry.mark_healthy(ProviderKind::Gemini);
        assert!(registry.health()[0].healthy);
    }

    #[tokio::test]
    async fn call_maps_transport_errors() {
        let timed_out = RegisteredProvider::new(
            ProviderAdapter::new(ProviderKind::DeepSeek, "key"),
            Arc::new(StaticTransport(Err(TransportError::timeout("slow")))),
            RetryPolicy::default(),
        );
        let err = timed_out
            .call(&CompletionRequest::new("hi"), "deepseek-chat")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Timeout);

        let refused = RegisteredProvider::new(
            ProviderAdapter::new(ProviderKind::DeepSeek, "key"),
            Arc::new(StaticTransport(Err(TransportError::connection("refused")))),
            RetryPolicy::default(),
        );
        let err = refused
            .call(&CompletionRequest::new("hi"), "deepseek-chat")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::ProviderUnavailable);
        assert_eq!(err.provider, ProviderKind::DeepSeek);
    }

    #[tokio::test]
    async fn call_builds_unified_result() {
        let result = provider(ProviderKind::DeepSeek)
            .call(&CompletionRequest::new("hi"), "deepseek-chat")
            .await
            .unwrap();
        assert_eq!(result.text, "ok");
        assert_eq!(result.provider, ProviderKind::DeepSeek);
        assert_eq!(result.model, "deepseek-chat");
    }
}
