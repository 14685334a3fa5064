//! Provider adapters and the machinery around them.
//!
//! - [`adapter`]: the closed [`ProviderAdapter`] variant set
//! - [`gemini`], [`deepseek`]: per-backend wire mapping
//! - [`transport`]: the injected HTTP seam
//! - [`retry`]: retry policy and executor
//! - [`registry`]: configured providers and their health
//! - [`routing`]: default/fallback selection and latency tracking

pub mod adapter;
pub mod deepseek;
pub mod gemini;
pub mod registry;
pub mod retry;
pub mod routing;
pub mod transport;

pub use adapter::{AdapterSettings, ProviderAdapter};
pub use deepseek::DeepSeekAdapter;
pub use gemini::GeminiAdapter;
pub use registry::{ProviderHealth, ProviderRegistry, RegisteredProvider};
pub use retry::{FixedJitter, JitterSource, RetryPolicy, ThreadRngJitter, execute};
pub use routing::{ProviderLatency, RoutingConfig};
pub use transport::{ReqwestTransport, Transport, TransportError, WireRequest, WireResponse};
