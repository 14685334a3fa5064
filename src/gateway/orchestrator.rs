//! The orchestrator: cache, in-flight dedup, provider selection, retries
//! and the single cross-provider fallback.
//!
//! ```text
//! submit(request)
//!   ├─ cache hit ────────────────────────────────► result
//!   └─ miss ─► begin_or_join(fingerprint)
//!        ├─ Joined ─► wait ─► owner's outcome (or re-contend if abandoned)
//!        └─ Owner  ─► resolve ─► validate ─► execute(primary)
//!                       └─ backend unavailable, unpinned, fallback set
//!                              ─► execute(fallback) once
//!                    ─► success: cache + complete / failure: abandon
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use crate::cache::{Claim, InFlightRegistry, JoinOutcome, ResponseCache};
use crate::error::{HuginnError, ProviderErrorKind, Result};
use crate::fingerprint::{Fingerprint, Route};
use crate::providers::{
    JitterSource, ProviderHealth, ProviderRegistry, RegisteredProvider, retry,
};
use crate::telemetry;
use crate::types::{CompletionRequest, CompletionResult};

struct Inner {
    registry: ProviderRegistry,
    cache: ResponseCache,
    inflight: InFlightRegistry,
    jitter: Arc<dyn JitterSource>,
    shutting_down: AtomicBool,
}

/// A built gateway. Cheap to clone; clones share the registry, cache and
/// in-flight table.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<Inner>,
}

impl Gateway {
    pub(crate) fn new(
        registry: ProviderRegistry,
        cache: ResponseCache,
        jitter: Arc<dyn JitterSource>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                cache,
                inflight: InFlightRegistry::new(),
                jitter,
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.inner.registry
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.inner.cache
    }

    pub fn in_flight(&self) -> &InFlightRegistry {
        &self.inner.inflight
    }

    pub fn health(&self) -> Vec<ProviderHealth> {
        self.inner.registry.health()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::Acquire)
    }

    /// The cache key `request` would be stored under.
    ///
    /// Unpinned requests are keyed by the configured default route, so a
    /// result served by the fallback is found again by the same request but
    /// never by one pinned to a provider. A missing model resolves to the
    /// route provider's default.
    pub fn fingerprint(&self, request: &CompletionRequest) -> Fingerprint {
        let registry = &self.inner.registry;
        let route = Route::of(request, registry.routing().default);
        let model = match &request.model {
            Some(model) => model.clone(),
            None => registry
                .get(route.provider())
                .map(|provider| provider.adapter().default_model().to_string())
                .unwrap_or_default(),
        };
        Fingerprint::compute(route, &model, request)
    }

    /// Complete `request`, from cache when possible.
    ///
    /// Concurrent submissions of the same request share one provider call
    /// and observe the same result or error. Failures are never cached.
    #[instrument(skip_all, fields(provider = ?request.provider, fingerprint = tracing::field::Empty))]
    pub async fn submit(&self, request: CompletionRequest) -> Result<CompletionResult> {
        if self.is_shutting_down() {
            return Err(HuginnError::ShuttingDown);
        }
        let fingerprint = self.fingerprint(&request);
        tracing::Span::current().record("fingerprint", fingerprint.as_str());

        loop {
            if let Some(hit) = self.inner.cache.lookup(&fingerprint).await {
                debug!("cache hit");
                return Ok(hit);
            }

            match self.inner.inflight.begin_or_join(&fingerprint) {
                Claim::Owner(guard) => {
                    // Another owner may have finished between lookup and claim.
                    if let Some(hit) = self.inner.cache.peek(&fingerprint).await {
                        guard.complete(hit.clone());
                        return Ok(hit);
                    }
                    return match self.dispatch(&request).await {
                        Ok(result) => {
                            self.inner
                                .cache
                                .insert(fingerprint.clone(), result.clone())
                                .await;
                            guard.complete(result.clone());
                            Ok(result)
                        }
                        Err(err) => {
                            guard.abandon(err.clone());
                            Err(err)
                        }
                    };
                }
                Claim::Joined(handle) => {
                    metrics::counter!(telemetry::INFLIGHT_JOINS_TOTAL).increment(1);
                    debug!("joining in-flight request");
                    match handle.wait().await {
                        JoinOutcome::Completed(outcome) => return outcome,
                        JoinOutcome::Abandoned => {
                            debug!("in-flight owner went away, re-contending");
                            if self.is_shutting_down() {
                                return Err(HuginnError::ShuttingDown);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Reject new submissions and wait for in-flight ones to drain.
    pub async fn shutdown(&self) {
        if !self.inner.shutting_down.swap(true, Ordering::AcqRel) {
            info!(in_flight = self.inner.inflight.len(), "gateway shutting down");
        }
        self.inner.inflight.wait_idle().await;
    }

    async fn dispatch(&self, request: &CompletionRequest) -> Result<CompletionResult> {
        let registry = &self.inner.registry;
        let primary = registry.resolve(request.provider)?;
        let model = primary_model(&primary, request)?;
        check_attachment(&primary, request)?;

        let primary_err = match self.run(&primary, request, &model).await {
            Ok(result) => return Ok(result),
            Err(err) => err,
        };

        if request.provider.is_some() || !primary_err.is_backend_unavailable() {
            return Err(primary_err);
        }
        let Some(fallback) = registry.fallback_for(primary.kind()) else {
            return Err(primary_err);
        };

        metrics::counter!(telemetry::FALLBACKS_TOTAL,
            "from" => primary.kind().as_str(),
            "to" => fallback.kind().as_str(),
        )
        .increment(1);
        warn!(
            from = %primary.kind(),
            to = %fallback.kind(),
            error = %primary_err,
            "primary provider unavailable, falling back"
        );

        let fallback_model = fallback_model(&fallback, request);
        let fallback_result = match check_attachment(&fallback, request) {
            Ok(()) => self.run(&fallback, request, &fallback_model).await,
            Err(err) => Err(err),
        };
        fallback_result.map_err(|fallback_err| HuginnError::AllProvidersUnavailable {
            failures: vec![primary_err, fallback_err],
        })
    }

    /// Run `request` against one provider under its retry policy and update
    /// its health.
    async fn run(
        &self,
        provider: &RegisteredProvider,
        request: &CompletionRequest,
        model: &str,
    ) -> Result<CompletionResult> {
        let kind = provider.kind();
        let start = Instant::now();
        let outcome = retry::execute(provider.policy(), kind, self.inner.jitter.as_ref(), move |_| {
            provider.call(request, model)
        })
        .await;
        let elapsed = start.elapsed();

        let status = if outcome.is_ok() { "ok" } else { "error" };
        metrics::counter!(telemetry::REQUESTS_TOTAL,
            "provider" => kind.as_str(),
            "status" => status,
        )
        .increment(1);
        metrics::histogram!(telemetry::REQUEST_DURATION_SECONDS, "provider" => kind.as_str())
            .record(elapsed.as_secs_f64());

        match outcome {
            Ok(mut result) => {
                self.inner.registry.mark_healthy(kind);
                provider.latency().record(elapsed);
                result.latency_ms = elapsed.as_millis() as u64;
                Ok(result)
            }
            Err(err) => {
                if benches_provider(&err) {
                    self.inner
                        .registry
                        .mark_unhealthy(kind, self.inner.registry.routing().unhealthy_cooldown);
                }
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("providers", &self.inner.registry.kinds())
            .field("routing", self.inner.registry.routing())
            .field("in_flight", &self.inner.inflight.len())
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}

fn primary_model(provider: &RegisteredProvider, request: &CompletionRequest) -> Result<String> {
    let adapter = provider.adapter();
    match &request.model {
        Some(model) if adapter.supports_model(model) => Ok(model.clone()),
        Some(model) => Err(HuginnError::UnsupportedModel {
            provider: provider.kind(),
            model: model.clone(),
        }),
        None => Ok(adapter.default_model().to_string()),
    }
}

/// A model named for the primary rarely exists on the fallback; use the
/// fallback's default unless it recognizes the requested one.
fn fallback_model(provider: &RegisteredProvider, request: &CompletionRequest) -> String {
    let adapter = provider.adapter();
    request
        .model
        .as_deref()
        .filter(|m| adapter.supports_model(m))
        .unwrap_or(adapter.default_model())
        .to_string()
}

fn check_attachment(provider: &RegisteredProvider, request: &CompletionRequest) -> Result<()> {
    let Some(attachment) = &request.attachment else {
        return Ok(());
    };
    let limit = provider.adapter().max_attachment_bytes();
    if attachment.len() > limit {
        return Err(HuginnError::RequestTooLarge {
            provider: provider.kind(),
            size: attachment.len(),
            limit,
        });
    }
    Ok(())
}

/// Terminal failures that take a provider out of default selection.
fn benches_provider(err: &HuginnError) -> bool {
    match err {
        HuginnError::Provider(e) => matches!(
            e.kind,
            ProviderErrorKind::AuthFailed | ProviderErrorKind::ProviderUnavailable
        ),
        HuginnError::RetriesExhausted { last, .. } => matches!(
            last.kind,
            ProviderErrorKind::AuthFailed
                | ProviderErrorKind::ProviderUnavailable
                | ProviderErrorKind::RateLimited
        ),
        _ => false,
    }
}
