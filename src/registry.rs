//! Correlation registry: matches asynchronous replies to waiting callers.
//!
//! Each outstanding request owns one entry holding the sending half of a
//! oneshot channel. Whoever removes the entry first (a reply, the waiting
//! caller on timeout, or the reaper) decides the outcome, so a resolve racing
//! an expiry can never deliver twice or resurrect a finished slot.

use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::{
    sync::oneshot,
    task::JoinHandle,
    time::{Instant, timeout_at},
};
use tracing::{debug, warn};

use crate::models::status::DeliveryResult;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Correlation id '{0}' already has an outstanding request")]
    DuplicateCorrelationId(String),

    #[error("Registry closed: replies can no longer be received")]
    Closed,
}

/// Deadline `timeout` from now, saturating at roughly thirty years.
pub fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365 * 30))
}

struct PendingRequest {
    sender: oneshot::Sender<DeliveryResult>,
    deadline: Instant,
}

/// Waiting side of a registered request.
#[derive(Debug)]
pub struct PendingHandle {
    correlation_id: String,
    deadline: Instant,
    receiver: oneshot::Receiver<DeliveryResult>,
}

impl PendingHandle {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

#[derive(Default)]
pub struct CorrelationRegistry {
    pending: DashMap<String, PendingRequest>,
    closed: AtomicBool,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        correlation_id: impl Into<String>,
        deadline: Instant,
    ) -> Result<PendingHandle, RegistryError> {
        let correlation_id = correlation_id.into();

        if self.is_closed() {
            return Err(RegistryError::Closed);
        }

        match self.pending.entry(correlation_id.clone()) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateCorrelationId(correlation_id)),
            Entry::Vacant(slot) => {
                let (sender, receiver) = oneshot::channel();
                slot.insert(PendingRequest { sender, deadline });

                debug!(correlation_id = %correlation_id, "Pending request registered");

                Ok(PendingHandle {
                    correlation_id,
                    deadline,
                    receiver,
                })
            }
        }
    }

    /// Hands `result` to the caller waiting on `correlation_id`.
    ///
    /// Returns `false` when no live entry exists: unknown ids, ids already
    /// resolved, and ids past their deadline. None of these are errors for the
    /// resolver.
    pub fn resolve(&self, correlation_id: &str, result: DeliveryResult) -> bool {
        let Some((_, pending)) = self.pending.remove(correlation_id) else {
            warn!(
                correlation_id,
                status = %result.status,
                "Discarding reply for unknown or completed request"
            );
            return false;
        };

        if pending.deadline <= Instant::now() {
            warn!(
                correlation_id,
                status = %result.status,
                "Discarding reply that arrived after the deadline"
            );
            return false;
        }

        match pending.sender.send(result) {
            Ok(()) => {
                debug!(correlation_id, "Pending request resolved");
                true
            }
            Err(_) => {
                debug!(correlation_id, "Waiter already gone, reply dropped");
                false
            }
        }
    }

    /// Waits for the reply to `handle`, for at most `timeout` and never past
    /// the registered deadline.
    ///
    /// Never blocks indefinitely; when time runs out the entry is removed and
    /// a timeout-flavoured failure is returned.
    pub async fn wait(&self, handle: PendingHandle, timeout: Duration) -> DeliveryResult {
        let PendingHandle {
            correlation_id,
            deadline,
            mut receiver,
        } = handle;

        let wait_until = std::cmp::min(deadline, deadline_after(timeout));

        match timeout_at(wait_until, &mut receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                debug!(correlation_id = %correlation_id, "Pending request expired");
                DeliveryResult::timeout(correlation_id)
            }
            Err(_) => {
                if self.pending.remove(&correlation_id).is_some() {
                    warn!(correlation_id = %correlation_id, "Timed out waiting for delivery result");
                    DeliveryResult::timeout(correlation_id)
                } else {
                    // A resolver removed the entry first and is about to send.
                    let fallback = DeliveryResult::timeout(correlation_id);
                    receiver.await.unwrap_or(fallback)
                }
            }
        }
    }

    /// Refuses further registrations and releases every waiter.
    ///
    /// Waiters wake immediately with a timeout-flavoured result; the caller
    /// closing the registry decides what that means to them.
    pub fn close(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);

        let abandoned = self.pending.len();
        self.pending.clear();
        abandoned
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Withdraws a request whose event never reached the broker.
    pub fn cancel(&self, correlation_id: &str) -> bool {
        self.pending.remove(correlation_id).is_some()
    }

    /// Drops every entry past its deadline and returns how many were dropped.
    pub fn reap_expired(&self) -> usize {
        let now = Instant::now();
        let mut reaped = 0;

        self.pending.retain(|correlation_id, pending| {
            let live = pending.deadline > now;
            if !live {
                debug!(correlation_id = %correlation_id, "Reaping expired request");
                reaped += 1;
            }
            live
        });

        reaped
    }

    /// Periodically reaps expired entries until the registry is dropped.
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let registry: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                ticker.tick().await;

                let Some(registry) = registry.upgrade() else {
                    break;
                };

                let reaped = registry.reap_expired();
                if reaped > 0 {
                    debug!(reaped, "Expired pending requests removed");
                }
            }
        })
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, correlation_id: &str) -> bool {
        self.pending.contains_key(correlation_id)
    }
}
