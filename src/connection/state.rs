use std::sync::Arc;

use ethers::types::Address;
use tokio::sync::{broadcast, watch};
use tracing::debug;

use super::{ExecutionContext, Identity};
use crate::error::AppError;

const IDENTITY_EVENT_CAPACITY: usize = 16;

/// A handle together with the context it was built for and the identity epoch it
/// was derived from.
pub struct Binding<S, E, H> {
    pub handle: Arc<H>,
    pub context: ExecutionContext<S, E>,
    pub epoch: u64,
}

impl<S, E, H> Clone for Binding<S, E, H> {
    fn clone(&self) -> Self {
        Self {
            handle: Arc::clone(&self.handle),
            context: self.context.clone(),
            epoch: self.epoch,
        }
    }
}

/// A failed binding attempt and the identity epoch it was made for.
#[derive(Debug, Clone)]
pub struct BindingFault {
    pub epoch: u64,
    pub error: AppError,
}

/// What consumers see: the identity, its epoch, the current binding if any, and the
/// last binding fault.
pub struct ConnectionSnapshot<S, E, H> {
    pub identity: Identity<S>,
    pub epoch: u64,
    pub binding: Option<Binding<S, E, H>>,
    pub fault: Option<BindingFault>,
}

impl<S, E, H> ConnectionSnapshot<S, E, H> {
    fn initial() -> Self {
        Self {
            identity: Identity::Absent,
            epoch: 0,
            binding: None,
            fault: None,
        }
    }

    pub fn address(&self) -> Option<Address> {
        self.identity.address()
    }

    pub fn contract(&self) -> Option<&Arc<H>> {
        self.binding.as_ref().map(|b| &b.handle)
    }

    /// Execution context the current handle is bound through.
    pub fn network_handle(&self) -> Option<&ExecutionContext<S, E>> {
        self.binding.as_ref().map(|b| &b.context)
    }

    /// True once the published handle was derived from the current identity.
    pub fn is_settled(&self) -> bool {
        self.binding
            .as_ref()
            .is_some_and(|binding| binding.epoch == self.epoch)
    }

    /// The binding fault for the current identity, if its binding failed.
    pub fn current_fault(&self) -> Option<&AppError> {
        self.fault
            .as_ref()
            .filter(|fault| fault.epoch == self.epoch)
            .map(|fault| &fault.error)
    }
}

impl<S, E, H> Clone for ConnectionSnapshot<S, E, H> {
    fn clone(&self) -> Self {
        Self {
            identity: self.identity.clone(),
            epoch: self.epoch,
            binding: self.binding.clone(),
            fault: self.fault.clone(),
        }
    }
}

/// Emitted after an identity change has been committed.
pub struct IdentityChanged<S> {
    pub epoch: u64,
    pub identity: Identity<S>,
}

impl<S> Clone for IdentityChanged<S> {
    fn clone(&self) -> Self {
        Self {
            epoch: self.epoch,
            identity: self.identity.clone(),
        }
    }
}

/// Result of a guarded publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Publication {
    Published,
    Stale { bound_epoch: u64, current_epoch: u64 },
}

/// Single source of truth for who is connected and which handle is bound.
///
/// Writes go through `watch::Sender::send_if_modified`, so subscribers are only woken
/// when the identity or the handle actually changed.
pub struct ConnectionState<S, E, H> {
    snapshot: watch::Sender<ConnectionSnapshot<S, E, H>>,
    identity_events: broadcast::Sender<IdentityChanged<S>>,
}

impl<S, E, H> ConnectionState<S, E, H> {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(ConnectionSnapshot::initial());
        let (identity_events, _) = broadcast::channel(IDENTITY_EVENT_CAPACITY);
        Self {
            snapshot,
            identity_events,
        }
    }

    pub fn current_identity(&self) -> Identity<S> {
        self.snapshot.borrow().identity.clone()
    }

    /// Identity together with the epoch it was committed at.
    pub fn current_change(&self) -> IdentityChanged<S> {
        let snapshot = self.snapshot.borrow();
        IdentityChanged {
            epoch: snapshot.epoch,
            identity: snapshot.identity.clone(),
        }
    }

    pub fn current_handle(&self) -> Option<Arc<H>> {
        self.snapshot.borrow().contract().cloned()
    }

    pub fn snapshot(&self) -> ConnectionSnapshot<S, E, H> {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<ConnectionSnapshot<S, E, H>> {
        self.snapshot.subscribe()
    }

    /// Identity-change events, delivered after the change is committed.
    pub fn subscribe_identity(&self) -> broadcast::Receiver<IdentityChanged<S>> {
        self.identity_events.subscribe()
    }

    /// Replace the identity. Returns the committed change, or `None` when the new
    /// identity is the same as the current one by reference.
    pub fn set_identity(&self, identity: Identity<S>) -> Option<IdentityChanged<S>> {
        let mut committed = None;
        self.snapshot.send_if_modified(|snapshot| {
            if snapshot.identity.same_as(&identity) {
                return false;
            }
            snapshot.epoch += 1;
            snapshot.identity = identity;
            snapshot.fault = None;
            committed = Some(IdentityChanged {
                epoch: snapshot.epoch,
                identity: snapshot.identity.clone(),
            });
            true
        });

        if let Some(change) = &committed {
            debug!(
                epoch = change.epoch,
                identity = ?change.identity,
                "identity committed"
            );
            // No subscribers is fine: the reconciler may not be running yet.
            let _ = self.identity_events.send(change.clone());
        }
        committed
    }

    /// Replace the handle unconditionally; last writer wins.
    pub fn set_handle(&self, handle: Arc<H>, context: ExecutionContext<S, E>) {
        self.snapshot.send_modify(|snapshot| {
            let epoch = snapshot.epoch;
            snapshot.binding = Some(Binding {
                handle,
                context,
                epoch,
            });
        });
    }

    /// Replace the handle only if `epoch` is still the current identity epoch.
    pub fn publish_if_current(
        &self,
        epoch: u64,
        handle: Arc<H>,
        context: ExecutionContext<S, E>,
    ) -> Publication {
        let mut publication = Publication::Published;
        self.snapshot.send_if_modified(|snapshot| {
            if snapshot.epoch != epoch {
                publication = Publication::Stale {
                    bound_epoch: epoch,
                    current_epoch: snapshot.epoch,
                };
                return false;
            }
            snapshot.binding = Some(Binding {
                handle,
                context,
                epoch,
            });
            snapshot.fault = None;
            true
        });
        publication
    }

    /// Record a failed binding for `epoch`. Faults for superseded identities are
    /// dropped; the published handle is never touched.
    pub fn record_fault(&self, epoch: u64, error: AppError) -> bool {
        self.snapshot.send_if_modified(|snapshot| {
            if snapshot.epoch != epoch {
                return false;
            }
            snapshot.fault = Some(BindingFault { epoch, error });
            true
        })
    }
}

impl<S, E, H> Default for ConnectionState<S, E, H> {
    fn default() -> Self {
        Self::new()
    }
}
