//! Shared test doubles for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use huginn::providers::{FixedJitter, Transport, TransportError, WireRequest, WireResponse};
use huginn::{Huginn, HuginnBuilder, ProviderKind, RetryPolicy};

type Responder = dyn Fn(u32, &WireRequest) -> Result<WireResponse, TransportError> + Send + Sync;

/// Scripted transport that counts every call.
///
/// The responder receives the 1-based call number and the request.
pub struct MockTransport {
    calls: AtomicU32,
    delay: Duration,
    respond: Box<Responder>,
    requests: std::sync::Mutex<Vec<WireRequest>>,
}

impl MockTransport {
    pub fn new(
        respond: impl Fn(u32, &WireRequest) -> Result<WireResponse, TransportError>
        + Send
        + Sync
        + 'static,
    ) -> Arc<Self> {
        Self::with_delay(Duration::ZERO, respond)
    }

    /// Like [`new`](Self::new), but every call sleeps for `delay` first.
    pub fn with_delay(
        delay: Duration,
        respond: impl Fn(u32, &WireRequest) -> Result<WireResponse, TransportError>
        + Send
        + Sync
        + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            delay,
            respond: Box::new(respond),
            requests: std::sync::Mutex::new(Vec::new()),
        })
    }

    /// Always answer with `response`.
    pub fn always(response: WireResponse) -> Arc<Self> {
        Self::new(move |_, _| Ok(response.clone()))
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<WireRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: WireRequest) -> Result<WireResponse, TransportError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.respond)(n, &request)
    }
}

pub fn gemini_ok(text: &str) -> WireResponse {
    WireResponse::json(
        200,
        &serde_json::json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": text}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 5, "candidatesTokenCount": 2, "totalTokenCount": 7},
            "modelVersion": "gemini-1.5-flash-latest"
        }),
    )
}

pub fn deepseek_ok(text: &str) -> WireResponse {
    WireResponse::json(
        200,
        &serde_json::json!({
            "id": "cmpl-1",
            "model": "deepseek-chat",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": text},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}
        }),
    )
}

pub fn error_status(status: u16) -> WireResponse {
    WireResponse::json(
        status,
        &serde_json::json!({"error": {"message": "simulated failure", "status": "UNAVAILABLE"}}),
    )
}

/// Retry policy with no real waiting: tiny delays and no jitter.
pub fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new()
        .max_attempts(max_attempts)
        .base_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(5))
        .jitter_ratio(0.0)
}

/// Builder wired to mock transports for both providers, Gemini default and
/// DeepSeek fallback.
pub fn builder(gemini: Arc<MockTransport>, deepseek: Arc<MockTransport>) -> HuginnBuilder {
    Huginn::builder()
        .gemini("gemini-test-key")
        .deepseek("deepseek-test-key")
        .provider_transport(ProviderKind::Gemini, gemini)
        .provider_transport(ProviderKind::DeepSeek, deepseek)
        .default_provider(ProviderKind::Gemini)
        .fallback(ProviderKind::DeepSeek)
        .retry_policy(fast_policy(3))
        .jitter(Arc::new(FixedJitter(1.0)))
}
