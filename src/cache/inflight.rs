//! At-most-one in-flight computation per fingerprint.
//!
//! The first caller for a fingerprint becomes the owner and receives an
//! [`InFlightGuard`]; everyone else receives a [`JoinHandle`] and awaits the
//! owner's outcome over a `watch` channel.
//!
//! ```text
//! begin_or_join(fp) ──► Owner(guard)  ──► guard.complete(ok) / guard.abandon(err)
//!                   └─► Joined(handle) ──► handle.wait() ──► Completed(outcome)
//!                                                       └─► Abandoned (owner dropped)
//! ```
//!
//! The registry entry is removed before the outcome is published, so a
//! failure is seen by current joiners only; the next caller starts fresh.
//! If the owner is dropped without publishing (its task was cancelled),
//! joiners observe [`JoinOutcome::Abandoned`] and race to become the next
//! owner.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::{Notify, watch};
use tracing::debug;

use crate::error::HuginnError;
use crate::fingerprint::Fingerprint;
use crate::types::CompletionResult;

/// What an owner publishes to its joiners.
pub type Outcome = Result<CompletionResult, HuginnError>;

struct Slot {
    id: u64,
    rx: watch::Receiver<Option<Outcome>>,
}

/// Registry of computations currently in flight.
#[derive(Default)]
pub struct InFlightRegistry {
    slots: Mutex<HashMap<Fingerprint, Slot>>,
    next_id: AtomicU64,
    idle: Notify,
}

/// Result of [`InFlightRegistry::begin_or_join`].
pub enum Claim<'a> {
    /// Caller must compute the result and publish it through the guard.
    Owner(InFlightGuard<'a>),
    /// Another caller is already computing it.
    Joined(JoinHandle),
}

/// How a join ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinOutcome {
    Completed(Outcome),
    /// The owner went away without publishing anything.
    Abandoned,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<Fingerprint, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Become the owner of `fingerprint`, or join the current owner.
    pub fn begin_or_join(&self, fingerprint: &Fingerprint) -> Claim<'_> {
        let mut slots = self.slots();
        if let Some(slot) = slots.get(fingerprint) {
            return Claim::Joined(JoinHandle {
                rx: slot.rx.clone(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        slots.insert(fingerprint.clone(), Slot { id, rx });
        Claim::Owner(InFlightGuard {
            registry: self,
            fingerprint: fingerprint.clone(),
            id,
            tx: Some(tx),
        })
    }

    /// Number of fingerprints currently being computed.
    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.slots().contains_key(fingerprint)
    }

    /// Resolve once no computation is in flight.
    pub async fn wait_idle(&self) {
        loop {
            // Register before checking so a release in between is not missed.
            let released = self.idle.notified();
            if self.is_empty() {
                return;
            }
            released.await;
        }
    }

    fn release(&self, fingerprint: &Fingerprint, id: u64) {
        let mut slots = self.slots();
        if slots.get(fingerprint).is_some_and(|slot| slot.id == id) {
            slots.remove(fingerprint);
        }
        let empty = slots.is_empty();
        drop(slots);
        if empty {
            self.idle.notify_waiters();
        }
    }
}

/// Ownership of one in-flight fingerprint.
///
/// Dropping the guard without calling [`complete`](Self::complete) or
/// [`abandon`](Self::abandon) releases the fingerprint and tells joiners
/// to retry.
pub struct InFlightGuard<'a> {
    registry: &'a InFlightRegistry,
    fingerprint: Fingerprint,
    id: u64,
    tx: Option<watch::Sender<Option<Outcome>>>,
}

impl InFlightGuard<'_> {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Publish a successful result to every joiner.
    pub fn complete(mut self, result: CompletionResult) {
        self.publish(Ok(result));
    }

    /// Publish a terminal failure to current joiners. Nothing is remembered:
    /// the next caller for this fingerprint starts a fresh computation.
    pub fn abandon(mut self, error: HuginnError) {
        self.publish(Err(error));
    }

    fn publish(&mut self, outcome: Outcome) {
        self.registry.release(&self.fingerprint, self.id);
        if let Some(tx) = self.tx.take() {
            tx.send_replace(Some(outcome));
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.tx.is_some() {
            debug!(fingerprint = %self.fingerprint, "in-flight owner dropped without a result");
            self.registry.release(&self.fingerprint, self.id);
            self.tx = None;
        }
    }
}

/// A joiner's view of someone else's computation.
///
/// Dropping the handle cancels only this caller's wait.
pub struct JoinHandle {
    rx: watch::Receiver<Option<Outcome>>,
}

impl JoinHandle {
    pub async fn wait(mut self) -> JoinOutcome {
        match self.rx.wait_for(Option::is_some).await {
            Ok(value) => match &*value {
                Some(outcome) => JoinOutcome::Completed(outcome.clone()),
                None => JoinOutcome::Abandoned,
            },
            Err(_) => JoinOutcome::Abandoned,
        }
    }
}
