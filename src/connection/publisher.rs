use std::sync::Arc;

use tokio::{sync::watch, task::JoinHandle};
use tracing::{info, instrument, warn};

use super::{
    ConnectionSnapshot, ContractBinder, Identity, IdentitySource, NetworkEndpoints,
    ReconcileOutcome, Reconciler, WalletResponse, reconciler::StateFor,
};
use crate::{
    contract::ContractDescriptor,
    error::{AppError, AppResult},
    network::Network,
};

type SnapshotFor<B> = ConnectionSnapshot<
    <B as ContractBinder>::Signer,
    <B as ContractBinder>::Endpoint,
    <B as ContractBinder>::Handle,
>;

/// The one object consumers hold: read the latest connection, subscribe to it,
/// and ask for a wallet connection. Cloning is cheap and shares the same state.
pub struct AppContext<I, B, N>
where
    B: ContractBinder,
{
    state: Arc<StateFor<B>>,
    source: Arc<I>,
    reconciler: Arc<Reconciler<B, N>>,
    descriptor: Arc<ContractDescriptor>,
    network: Network,
}

impl<I, B, N> Clone for AppContext<I, B, N>
where
    B: ContractBinder,
{
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            source: Arc::clone(&self.source),
            reconciler: Arc::clone(&self.reconciler),
            descriptor: Arc::clone(&self.descriptor),
            network: self.network,
        }
    }
}

impl<I, B, N> AppContext<I, B, N>
where
    I: IdentitySource<Signer = B::Signer> + 'static,
    B: ContractBinder + 'static,
    N: NetworkEndpoints<Endpoint = B::Endpoint> + 'static,
{
    pub fn new(
        source: Arc<I>,
        binder: Arc<B>,
        endpoints: Arc<N>,
        descriptor: Arc<ContractDescriptor>,
        network: Network,
    ) -> Self {
        let state = Arc::new(StateFor::<B>::new());
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&state),
            binder,
            endpoints,
            Arc::clone(&descriptor),
            network,
        ));
        Self {
            state,
            source,
            reconciler,
            descriptor,
            network,
        }
    }

    /// Start the background reconciler. Must be called from within a tokio runtime.
    pub fn start(&self) -> JoinHandle<()> {
        Arc::clone(&self.reconciler).spawn()
    }

    pub fn descriptor(&self) -> &ContractDescriptor {
        &self.descriptor
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Latest published connection.
    pub fn snapshot(&self) -> SnapshotFor<B> {
        self.state.snapshot()
    }

    pub fn subscribe(&self) -> ContextSubscription<B::Signer, B::Endpoint, B::Handle> {
        ContextSubscription {
            receiver: self.state.watch(),
        }
    }

    /// Ask the identity source for a wallet. A declined request leaves the
    /// application read-only and is not an error; transport faults are returned
    /// untouched and leave the state as it was. Reconnecting the same identity after
    /// its binding failed retries the binding.
    #[instrument(skip(self), fields(network = %self.network))]
    pub async fn connect(&self) -> AppResult<Identity<B::Signer>> {
        let response = self.source.connect().await?;
        let identity = identity_from_response(response);

        match &identity {
            Identity::Present { address, .. } => info!("wallet connected as {address:#x}"),
            Identity::Absent => info!("wallet not connected; staying read-only"),
        }

        let unchanged = self.state.set_identity(identity.clone()).is_none();
        if unchanged && self.state.snapshot().current_fault().is_some() {
            info!("identity unchanged after a failed binding; rebinding");
            self.reconciler.rebind_current();
        }
        Ok(identity)
    }

    /// Release the wallet session and fall back to read-only access.
    #[instrument(skip(self), fields(network = %self.network))]
    pub async fn disconnect(&self) -> AppResult<()> {
        self.source.disconnect().await?;
        if self.state.set_identity(Identity::Absent).is_some() {
            info!("wallet disconnected");
        }
        Ok(())
    }

    /// Reconcile in the caller's task and hand back the outcome or fault.
    pub async fn reconcile_now(&self) -> AppResult<ReconcileOutcome> {
        self.reconciler.reconcile().await
    }
}

/// Fold a wallet answer into an identity; anything short of a full identity is absent.
fn identity_from_response<S>(response: WalletResponse<S>) -> Identity<S> {
    match response {
        WalletResponse {
            connected: true,
            address: Some(address),
            signer: Some(signer),
        } => Identity::present(address, signer),
        WalletResponse {
            connected: true, ..
        } => {
            warn!("wallet reported connected without both address and signer");
            Identity::Absent
        }
        _ => Identity::Absent,
    }
}

/// Receiver side of the published connection.
pub struct ContextSubscription<S, E, H> {
    receiver: watch::Receiver<ConnectionSnapshot<S, E, H>>,
}

impl<S, E, H> ContextSubscription<S, E, H> {
    pub fn current(&self) -> ConnectionSnapshot<S, E, H> {
        self.receiver.borrow().clone()
    }

    pub fn has_changed(&self) -> bool {
        self.receiver.has_changed().unwrap_or(false)
    }

    /// Wait for the next published change and return it.
    pub async fn changed(&mut self) -> AppResult<ConnectionSnapshot<S, E, H>> {
        self.receiver
            .changed()
            .await
            .map_err(|_| AppError::Internal("connection state dropped".into()))?;
        Ok(self.receiver.borrow_and_update().clone())
    }

    /// Wait until the published handle was derived from the current identity.
    /// Fails with the binding fault if binding for the current identity failed.
    pub async fn settled(&mut self) -> AppResult<ConnectionSnapshot<S, E, H>> {
        let snapshot = self
            .receiver
            .wait_for(|snapshot| snapshot.is_settled() || snapshot.current_fault().is_some())
            .await
            .map_err(|_| AppError::Internal("connection state dropped".into()))?
            .clone();

        match snapshot.current_fault() {
            Some(err) if !snapshot.is_settled() => Err(err.clone()),
            _ => Ok(snapshot),
        }
    }
}
