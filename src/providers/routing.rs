//! Routing configuration and latency tracking.
//!
//! - [`RoutingConfig`]: default provider, optional fallback, and how long a
//!   failing provider is benched from default selection
//! - [`ProviderLatency`]: EWMA of per-provider call durations
//!
//! ```toml
//! [routing]
//! default = "gemini"
//! fallback = "deepseek"
//! unhealthy_cooldown_secs = 30
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Deserialize;

use crate::types::ProviderKind;

const DEFAULT_COOLDOWN_SECS: u64 = 30;

/// Provider selection for requests without an explicit pin.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Provider tried first.
    pub default: ProviderKind,
    /// Provider tried once when the default is unavailable.
    pub fallback: Option<ProviderKind>,
    /// How long a provider stays out of default selection after a terminal
    /// availability failure.
    #[serde(rename = "unhealthy_cooldown_secs", with = "secs")]
    pub unhealthy_cooldown: Duration,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default: ProviderKind::Gemini,
            fallback: None,
            unhealthy_cooldown: Duration::from_secs(DEFAULT_COOLDOWN_SECS),
        }
    }
}

impl RoutingConfig {
    pub fn new(default: ProviderKind) -> Self {
        Self {
            default,
            ..Self::default()
        }
    }

    pub fn fallback(mut self, provider: ProviderKind) -> Self {
        self.fallback = Some(provider);
        self
    }

    pub fn unhealthy_cooldown(mut self, cooldown: Duration) -> Self {
        self.unhealthy_cooldown = cooldown;
        self
    }

    /// Candidate order for unpinned requests: default, fallback, then every
    /// other known provider. No duplicates.
    pub fn selection_order(&self) -> Vec<ProviderKind> {
        let mut order = vec![self.default];
        if let Some(fallback) = self.fallback
            && fallback != self.default
        {
            order.push(fallback);
        }
        for kind in ProviderKind::ALL {
            if !order.contains(&kind) {
                order.push(kind);
            }
        }
        order
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

// ============================================================================
// EWMA latency tracking
// ============================================================================

/// Per-provider latency tracker using an exponentially weighted moving average.
///
/// Lock-free: the average is stored as `f64` bits in an atomic. Higher
/// `alpha` reacts faster to new observations; lower `alpha` is smoother.
pub struct ProviderLatency {
    ewma_micros: AtomicU64,
    alpha: f64,
    count: AtomicU64,
}

impl ProviderLatency {
    pub fn new(alpha: f64) -> Self {
        debug_assert!((0.0..=1.0).contains(&alpha), "alpha must be in [0.0, 1.0]");
        Self {
            ewma_micros: AtomicU64::new(0_f64.to_bits()),
            alpha,
            count: AtomicU64::new(0),
        }
    }

    pub fn with_default_alpha() -> Self {
        Self::new(0.2)
    }

    /// Fold one call duration into the average.
    ///
    /// Two racing first observations may both seed the average; the error
    /// washes out after a few more samples.
    pub fn record(&self, duration: Duration) {
        let sample = duration.as_micros() as f64;
        let first = self.count.load(Ordering::Relaxed) == 0;
        let alpha = self.alpha;
        let _ = self
            .ewma_micros
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                let next = if first {
                    sample
                } else {
                    alpha * sample + (1.0 - alpha) * f64::from_bits(bits)
                };
                Some(next.to_bits())
            });
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Current estimate, or `None` before the first observation.
    pub fn average(&self) -> Option<Duration> {
        if self.count.load(Ordering::Relaxed) == 0 {
            return None;
        }
        let micros = f64::from_bits(self.ewma_micros.load(Ordering::Relaxed));
        Some(Duration::from_micros(micros as u64))
    }

    pub fn observation_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for ProviderLatency {
    fn default() -> Self {
        Self::with_default_alpha()
    }
}

impl std::fmt::Debug for ProviderLatency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderLatency")
            .field("average", &self.average())
            .field("count", &self.observation_count())
            .finish()
    }
}
