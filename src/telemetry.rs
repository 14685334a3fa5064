//! Telemetry metric name constants.
//!
//! Centralised metric names for huginn operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `huginn_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `provider`: provider name ("gemini", "deepseek")
//! - `status`: outcome, "ok" or "error"
//! - `kind`: provider error kind (e.g. "rate_limited")

/// Total provider calls dispatched by the orchestrator (after retries).
///
/// Labels: `provider`, `status` ("ok" | "error").
pub const REQUESTS_TOTAL: &str = "huginn_requests_total";

/// Provider call duration in seconds, including retries.
///
/// Labels: `provider`.
pub const REQUEST_DURATION_SECONDS: &str = "huginn_request_duration_seconds";

/// Total retry attempts (not counting the initial request).
///
/// Labels: `provider`, `kind`.
pub const RETRIES_TOTAL: &str = "huginn_retries_total";

/// Total cross-provider fallbacks.
///
/// Labels: `from`, `to`.
pub const FALLBACKS_TOTAL: &str = "huginn_fallbacks_total";

/// Total response cache hits.
pub const CACHE_HITS_TOTAL: &str = "huginn_cache_hits_total";

/// Total response cache misses.
pub const CACHE_MISSES_TOTAL: &str = "huginn_cache_misses_total";

/// Persistent cache tier failures that were swallowed (fail-open).
///
/// Labels: `operation` ("get" | "put" | "delete").
pub const CACHE_STORE_ERRORS_TOTAL: &str = "huginn_cache_store_errors_total";

/// Submissions that joined an in-flight computation instead of calling a provider.
pub const INFLIGHT_JOINS_TOTAL: &str = "huginn_inflight_joins_total";
