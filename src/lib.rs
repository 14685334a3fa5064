//! Huginn - LLM orchestration core
//!
//! Submit a prompt (optionally with a binary attachment such as a captured
//! image) and get back a normalized completion. Huginn picks a provider,
//! retries transient failures with jittered backoff, falls back once to an
//! alternate provider when the primary's backend is unavailable, and caches
//! successful results under a content fingerprint so identical requests,
//! including concurrent ones, cost at most one provider call.
//!
//! # Example
//!
//! ```rust,no_run
//! use huginn::{Attachment, CompletionRequest, Huginn, ProviderKind};
//!
//! #[tokio::main]
//! async fn main() -> huginn::Result<()> {
//!     let gateway = Huginn::builder()
//!         .gemini("your-gemini-key")
//!         .deepseek("your-deepseek-key")
//!         .default_provider(ProviderKind::Gemini)
//!         .fallback(ProviderKind::DeepSeek)
//!         .build()?;
//!
//!     let image = std::fs::read("capture.jpg").unwrap_or_default();
//!     let result = gateway
//!         .submit(
//!             CompletionRequest::new("describe image")
//!                 .attachment(Attachment::new("image/jpeg", image)),
//!         )
//!         .await?;
//!
//!     println!("[{}] {}", result.provider, result.text);
//!     gateway.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Configuration files
//!
//! ```rust,no_run
//! use huginn::{Config, HuginnBuilder, Secrets};
//!
//! # fn main() -> huginn::Result<()> {
//! let config = Config::load_or_default()?;
//! let secrets = Secrets::load()?;
//! let gateway = HuginnBuilder::from_config(&config, &secrets)?.build()?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod gateway;
pub mod providers;
pub mod telemetry;
pub mod types;

// Re-export main types at crate root
pub use cache::{CacheConfig, CacheStore};
pub use config::{Config, SecretString, Secrets};
pub use error::{HuginnError, ProviderError, ProviderErrorKind, Result};
pub use fingerprint::Fingerprint;
pub use gateway::{Gateway, Huginn, HuginnBuilder};
pub use providers::{RetryPolicy, RoutingConfig};

// Re-export all types
pub use types::{
    Attachment, Completion, CompletionRequest, CompletionResult, FinishReason, GenerationParams,
    ProviderKind,
};
