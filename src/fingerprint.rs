//! Request identity.
//!
//! A [`Fingerprint`] is a SHA-256 digest over the semantic content of a
//! request: route (pinned or default provider), resolved model, prompt,
//! attachment content hash, canonicalized parameters and idempotency key.
//! Each field is tagged and length-prefixed so adjacent fields cannot bleed
//! into each other, and floats are hashed by bit pattern. The hex digest is
//! stable across processes, so it can key a persistent store.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::{CompletionRequest, GenerationParams, ProviderKind};

/// How a request reaches its provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// Explicitly pinned; only this provider may serve it.
    Pinned(ProviderKind),
    /// Default selection from the configured default. Health skips and
    /// fallback may serve it from another provider.
    Default(ProviderKind),
}

impl Route {
    /// Route for `request` given the configured default provider.
    pub fn of(request: &CompletionRequest, default: ProviderKind) -> Self {
        match request.provider {
            Some(kind) => Self::Pinned(kind),
            None => Self::Default(default),
        }
    }

    pub fn provider(self) -> ProviderKind {
        match self {
            Self::Pinned(kind) | Self::Default(kind) => kind,
        }
    }
}

/// Deterministic identity of a logical request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint `request` sent along `route` to `model`.
    ///
    /// `model` is the resolved model name, so omitting the model and naming
    /// the route's default model are the same request. A pinned request never
    /// shares a fingerprint with an unpinned one; a request served by the
    /// fallback provider keeps the fingerprint of its original route.
    pub fn compute(route: Route, model: &str, request: &CompletionRequest) -> Self {
        let mut hasher = Sha256::new();
        match route {
            Route::Pinned(kind) => field(&mut hasher, b"pin", kind.as_str().as_bytes()),
            Route::Default(kind) => field(&mut hasher, b"route", kind.as_str().as_bytes()),
        }
        field(&mut hasher, b"model", model.as_bytes());
        field(&mut hasher, b"prompt", request.prompt.as_bytes());
        if let Some(attachment) = &request.attachment {
            field(&mut hasher, b"mime", attachment.mime_type.as_bytes());
            field(&mut hasher, b"attachment", &Sha256::digest(&attachment.data));
        }
        canonical_params(&mut hasher, &request.params);
        if let Some(key) = &request.idempotency_key {
            field(&mut hasher, b"idempotency", key.as_bytes());
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Wrap an already computed digest (e.g. read back from a store).
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn field(hasher: &mut Sha256, tag: &[u8], value: &[u8]) {
    hasher.update((tag.len() as u64).to_le_bytes());
    hasher.update(tag);
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value);
}

fn canonical_params(hasher: &mut Sha256, params: &GenerationParams) {
    if let Some(t) = params.temperature {
        field(hasher, b"temperature", &t.to_bits().to_le_bytes());
    }
    if let Some(n) = params.max_tokens {
        field(hasher, b"max_tokens", &n.to_le_bytes());
    }
    if let Some(p) = params.top_p {
        field(hasher, b"top_p", &p.to_bits().to_le_bytes());
    }
    if let Some(k) = params.top_k {
        field(hasher, b"top_k", &k.to_le_bytes());
    }
    for stop in &params.stop_sequences {
        field(hasher, b"stop", stop.as_bytes());
    }
}
