//! Configuration and secrets loading.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. Explicit path (CLI flag or caller-supplied)
//! 2. `~/.huginn/config.toml` (user)
//! 3. `/etc/huginn/config.toml` (system)
//!
//! Secrets are loaded separately with mandatory permission checks:
//! 1. `~/.huginn/secrets.toml` (user, must be 0600)
//! 2. `/etc/huginn/secrets.toml` (system, must be 0600)
//!
//! # API key resolution
//!
//! Keys are resolved once, at startup, per enabled provider:
//!
//! 1. `[<provider>] api_key` in the secrets file
//! 2. the provider's own environment variable (`GEMINI_API_KEY`, `DEEPSEEK_API_KEY`)
//! 3. the legacy `LLM_API_KEY`, for the configured default provider only
//!
//! Empty values count as unset. A provider left without a key is not
//! registered.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::cache::CacheConfig;
use crate::providers::{RetryPolicy, RoutingConfig};
use crate::types::ProviderKind;
use crate::{HuginnError, Result};

/// Single-key variable predating per-provider keys.
pub const LEGACY_API_KEY_ENV: &str = "LLM_API_KEY";

const CONFIG_DIR: &str = ".huginn";
const SYSTEM_DIR: &str = "/etc/huginn";
/// Upper bound on a configured backoff cap (one hour).
const MAX_RETRY_DELAY_MS: u64 = 60 * 60 * 1000;

// ============================================================================
// SecretString
// ============================================================================

/// An API key. Redacted in `Debug`/`Display` and deliberately not `Serialize`.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw key, for building request headers.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// ============================================================================
// Config
// ============================================================================

/// Gateway configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub cache: CacheSettings,
}

/// Per-provider sections. A missing section means "enabled with defaults".
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub gemini: Option<ProviderConfig>,
    #[serde(default)]
    pub deepseek: Option<ProviderConfig>,
}

impl ProvidersConfig {
    pub fn get(&self, kind: ProviderKind) -> Option<&ProviderConfig> {
        match kind {
            ProviderKind::Gemini => self.gemini.as_ref(),
            ProviderKind::DeepSeek => self.deepseek.as_ref(),
        }
    }

    pub fn is_enabled(&self, kind: ProviderKind) -> bool {
        self.get(kind).is_none_or(|p| p.enabled)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub max_attachment_bytes: Option<usize>,
    /// Overrides the global `[retry]` section for this provider.
    #[serde(default)]
    pub retry: Option<RetrySettings>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_model: None,
            base_url: None,
            max_attachment_bytes: None,
            retry: None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// `[retry]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ratio: f64,
    pub attempt_timeout_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            jitter_ratio: policy.jitter_ratio,
            attempt_timeout_secs: policy.attempt_timeout.as_secs(),
        }
    }
}

impl RetrySettings {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .max_attempts(self.max_attempts)
            .base_delay(Duration::from_millis(self.base_delay_ms))
            .max_delay(Duration::from_millis(self.max_delay_ms))
            .jitter_ratio(self.jitter_ratio)
            .attempt_timeout(Duration::from_secs(self.attempt_timeout_secs))
    }

    fn validate(&self, section: &str) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(HuginnError::Configuration(format!(
                "{section}.max_attempts must be at least 1"
            )));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(HuginnError::Configuration(format!(
                "{section}.base_delay_ms ({}) exceeds max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        if self.max_delay_ms > MAX_RETRY_DELAY_MS {
            return Err(HuginnError::Configuration(format!(
                "{section}.max_delay_ms must be at most {MAX_RETRY_DELAY_MS}"
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter_ratio) {
            return Err(HuginnError::Configuration(format!(
                "{section}.jitter_ratio must be within [0, 1], got {}",
                self.jitter_ratio
            )));
        }
        if self.attempt_timeout_secs == 0 {
            return Err(HuginnError::Configuration(format!(
                "{section}.attempt_timeout_secs must be positive"
            )));
        }
        Ok(())
    }
}

/// `[cache]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub ttl_secs: u64,
    pub max_entries: u64,
    /// Directory for the persistent tier. In-memory only when unset.
    pub dir: Option<PathBuf>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        let cache = CacheConfig::default();
        Self {
            ttl_secs: cache.ttl.as_secs(),
            max_entries: cache.max_entries,
            dir: None,
        }
    }
}

impl CacheSettings {
    pub fn to_cache_config(&self) -> CacheConfig {
        CacheConfig::new()
            .ttl(Duration::from_secs(self.ttl_secs))
            .max_entries(self.max_entries)
    }
}

impl Config {
    /// Load configuration from the standard locations.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_config_path(explicit_path)?;
        Self::load_from_file(&path)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            HuginnError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        Self::parse(&content).map_err(|e| match e {
            HuginnError::Configuration(msg) => HuginnError::Configuration(format!("{path:?}: {msg}")),
            other => other,
        })
    }

    /// Parse and validate a TOML document.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(|e| {
            HuginnError::Configuration(format!("Failed to parse config: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.retry.validate("retry")?;
        for kind in ProviderKind::ALL {
            if let Some(retry) = self.providers.get(kind).and_then(|p| p.retry.as_ref()) {
                retry.validate(&format!("providers.{kind}.retry"))?;
            }
        }
        if self.routing.fallback == Some(self.routing.default) {
            return Err(HuginnError::Configuration(
                "routing.fallback must differ from routing.default".to_string(),
            ));
        }
        if self.cache.max_entries == 0 {
            return Err(HuginnError::Configuration(
                "cache.max_entries must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Retry policy for `kind`: its own override, else the global section.
    pub fn retry_policy(&self, kind: ProviderKind) -> RetryPolicy {
        self.providers
            .get(kind)
            .and_then(|p| p.retry.as_ref())
            .unwrap_or(&self.retry)
            .to_policy()
    }

    /// Load from the standard locations, or use the defaults when no config
    /// file exists. A file that exists but fails to parse or validate is
    /// still an error.
    pub fn load_or_default() -> Result<Self> {
        Self::load_first_or_default(&Self::search_paths())
    }

    fn load_first_or_default(candidates: &[PathBuf]) -> Result<Self> {
        match candidates.iter().find(|path| path.exists()) {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::default()),
        }
    }

    fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::with_capacity(2);
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(CONFIG_DIR).join("config.toml"));
        }
        paths.push(Path::new(SYSTEM_DIR).join("config.toml"));
        paths
    }

    fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(path.to_path_buf());
            }
            return Err(HuginnError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        if let Some(path) = Self::search_paths().into_iter().find(|path| path.exists()) {
            return Ok(path);
        }

        Err(HuginnError::Configuration(
            "No config file found. Create ~/.huginn/config.toml or /etc/huginn/config.toml"
                .to_string(),
        ))
    }
}

// ============================================================================
// Secrets
// ============================================================================

/// Secrets file contents (API keys).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Secrets {
    #[serde(default)]
    pub gemini: Option<ApiKeySecret>,
    #[serde(default)]
    pub deepseek: Option<ApiKeySecret>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeySecret {
    pub api_key: SecretString,
}

/// Where a resolved API key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    SecretsFile,
    ProviderEnv,
    LegacyEnv,
}

impl fmt::Display for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KeySource::SecretsFile => "secrets file",
            KeySource::ProviderEnv => "provider environment variable",
            KeySource::LegacyEnv => LEGACY_API_KEY_ENV,
        })
    }
}

impl Secrets {
    /// Load secrets from the standard locations with permission checks.
    ///
    /// Returns empty secrets if no file exists (keys may come from env vars).
    pub fn load() -> Result<Self> {
        if let Some(home) = dirs::home_dir() {
            let user_secrets = home.join(CONFIG_DIR).join("secrets.toml");
            if user_secrets.exists() {
                return Self::load_from_file(&user_secrets);
            }
        }

        let system_secrets = Path::new(SYSTEM_DIR).join("secrets.toml");
        if system_secrets.exists() {
            return Self::load_from_file(&system_secrets);
        }

        Ok(Secrets::default())
    }

    /// Load one secrets file, rejecting group/world-readable files.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        Self::check_permissions(path)?;
        let content = fs::read_to_string(path).map_err(|e| {
            HuginnError::Configuration(format!("Failed to read secrets file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            HuginnError::Configuration(format!("Failed to parse secrets file {path:?}: {e}"))
        })
    }

    #[cfg(unix)]
    fn check_permissions(path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let metadata = fs::metadata(path).map_err(|e| {
            HuginnError::Configuration(format!("Failed to stat secrets file {path:?}: {e}"))
        })?;

        let mode = metadata.permissions().mode();
        if mode & 0o077 != 0 {
            return Err(HuginnError::Configuration(format!(
                "Secrets file {path:?} has insecure permissions {:o}. Must be 0600 or 0400.",
                mode & 0o777
            )));
        }

        Ok(())
    }

    #[cfg(not(unix))]
    fn check_permissions(_path: &Path) -> Result<()> {
        Ok(())
    }

    fn file_key(&self, kind: ProviderKind) -> Option<&SecretString> {
        match kind {
            ProviderKind::Gemini => self.gemini.as_ref(),
            ProviderKind::DeepSeek => self.deepseek.as_ref(),
        }
        .map(|s| &s.api_key)
        .filter(|k| !k.is_empty())
    }

    /// Resolve the API key for `kind`, reading environment variables through `env`.
    pub fn resolve_api_key(
        &self,
        kind: ProviderKind,
        default_provider: ProviderKind,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Option<(SecretString, KeySource)> {
        if let Some(key) = self.file_key(kind) {
            return Some((key.clone(), KeySource::SecretsFile));
        }

        let from_env = |name: &str| {
            env(name)
                .map(SecretString::from)
                .filter(|k| !k.is_empty())
        };
        if let Some(key) = from_env(kind.api_key_env()) {
            return Some((key, KeySource::ProviderEnv));
        }
        if kind == default_provider
            && let Some(key) = from_env(LEGACY_API_KEY_ENV)
        {
            return Some((key, KeySource::LegacyEnv));
        }
        None
    }

    /// [`resolve_api_key`](Self::resolve_api_key) against the process environment.
    pub fn resolve_api_key_from_env(
        &self,
        kind: ProviderKind,
        default_provider: ProviderKind,
    ) -> Option<(SecretString, KeySource)> {
        self.resolve_api_key(kind, default_provider, &|name| std::env::var(name).ok())
    }
}
