use std::sync::Arc;

use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};
use tracing::{debug, error, info, warn};

use super::{
    ConnectionMode, ContractBinder, ExecutionContext, Identity, IdentityChanged,
    NetworkEndpoints, Publication, state::ConnectionState,
};
use crate::{contract::ContractDescriptor, error::AppResult, network::Network};

/// Connection state shaped by a binder's associated types.
pub type StateFor<B> = ConnectionState<
    <B as ContractBinder>::Signer,
    <B as ContractBinder>::Endpoint,
    <B as ContractBinder>::Handle,
>;

/// What happened to a completed binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Published { epoch: u64, mode: ConnectionMode },
    /// The identity moved on while the binding was in flight; the result was dropped.
    Discarded { epoch: u64, current_epoch: u64 },
}

/// Rebuilds the contract handle whenever the identity changes.
pub struct Reconciler<B, N>
where
    B: ContractBinder,
{
    state: Arc<StateFor<B>>,
    binder: Arc<B>,
    endpoints: Arc<N>,
    descriptor: Arc<ContractDescriptor>,
    network: Network,
}

impl<B, N> Reconciler<B, N>
where
    B: ContractBinder + 'static,
    N: NetworkEndpoints<Endpoint = B::Endpoint> + 'static,
{
    pub fn new(
        state: Arc<StateFor<B>>,
        binder: Arc<B>,
        endpoints: Arc<N>,
        descriptor: Arc<ContractDescriptor>,
        network: Network,
    ) -> Self {
        Self {
            state,
            binder,
            endpoints,
            descriptor,
            network,
        }
    }

    /// Choose the execution context from identity presence alone. The read-only
    /// endpoint is built fresh on every call.
    pub fn execution_context(
        &self,
        identity: &Identity<B::Signer>,
    ) -> AppResult<ExecutionContext<B::Signer, B::Endpoint>> {
        match identity {
            Identity::Present { signer, .. } => Ok(ExecutionContext::Signed(Arc::clone(signer))),
            Identity::Absent => {
                let endpoint = self.endpoints.read_only(self.network)?;
                Ok(ExecutionContext::ReadOnly(Arc::new(endpoint)))
            }
        }
    }

    /// Reconcile against whatever identity is current right now.
    pub async fn reconcile(&self) -> AppResult<ReconcileOutcome> {
        let change = self.state.current_change();
        self.reconcile_change(change).await
    }

    /// Bind for the identity in `change` and publish unless a newer identity has
    /// been committed in the meantime. On error the current handle is untouched and
    /// the fault is recorded against the epoch.
    pub async fn reconcile_change(
        &self,
        change: IdentityChanged<B::Signer>,
    ) -> AppResult<ReconcileOutcome> {
        let IdentityChanged { epoch, identity } = change;
        let (handle, context) = match self.bind_for(&identity).await {
            Ok(bound) => bound,
            Err(err) => {
                if !self.state.record_fault(epoch, err.clone()) {
                    debug!(epoch, "binding fault for superseded identity not recorded");
                }
                return Err(err);
            }
        };
        let mode = context.mode();

        match self.state.publish_if_current(epoch, Arc::new(handle), context) {
            Publication::Published => {
                debug!(
                    epoch,
                    %mode,
                    contract = %format!("{:#x}", self.descriptor.address),
                    "contract handle published"
                );
                Ok(ReconcileOutcome::Published { epoch, mode })
            }
            Publication::Stale { current_epoch, .. } => {
                debug!(epoch, current_epoch, "discarding binding for superseded identity");
                Ok(ReconcileOutcome::Discarded {
                    epoch,
                    current_epoch,
                })
            }
        }
    }

    async fn bind_for(
        &self,
        identity: &Identity<B::Signer>,
    ) -> AppResult<(B::Handle, ExecutionContext<B::Signer, B::Endpoint>)> {
        let context = self.execution_context(identity)?;
        let handle = self.binder.bind(&self.descriptor, &context).await?;
        Ok((handle, context))
    }

    /// Run once for the startup identity, then once per identity-change event.
    ///
    /// The subscription is taken before this returns, so no change committed after
    /// `spawn` can be missed. Each change binds on its own task; overlapping runs
    /// are resolved by the epoch check at publish time.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let mut events = self.state.subscribe_identity();
        let initial = self.state.current_change();

        tokio::spawn(async move {
            info!(network = %self.network, "reconciler started");
            self.spawn_run(initial);

            loop {
                match events.recv().await {
                    Ok(change) => self.spawn_run(change),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "identity events lagged; reconciling latest identity");
                        self.spawn_run(self.state.current_change());
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            info!("reconciler stopped");
        })
    }

    /// Retry binding for the current identity on a background task.
    pub fn rebind_current(self: &Arc<Self>) {
        self.spawn_run(self.state.current_change());
    }

    fn spawn_run(self: &Arc<Self>, change: IdentityChanged<B::Signer>) {
        let reconciler = Arc::clone(self);
        tokio::spawn(async move {
            let epoch = change.epoch;
            if let Err(err) = reconciler.reconcile_change(change).await {
                error!(epoch, "contract binding failed, keeping previous handle: {err}");
            }
        });
    }
}
