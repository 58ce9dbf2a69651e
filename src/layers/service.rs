use std::time::Duration;

use crate::{
    connection::{
        AppContext, ConnectionSnapshot, ContractBinder, IdentitySource, NetworkEndpoints,
    },
    contract::ContractDescriptor,
    error::AppResult,
    network::Network,
    types::{ConnectParams, ConnectionOut, DisconnectParams, GetConnectionParams},
};
use tokio::time::timeout;
use tracing::{info, instrument, warn};

/// Middle layer that turns connection snapshots into wire-friendly outputs.
pub struct ServiceLayer<I, B, N>
where
    B: ContractBinder,
{
    ctx: AppContext<I, B, N>,
    settle_timeout: Duration,
}

impl<I, B, N> Clone for ServiceLayer<I, B, N>
where
    B: ContractBinder,
{
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
            settle_timeout: self.settle_timeout,
        }
    }
}

impl<I, B, N> ServiceLayer<I, B, N>
where
    I: IdentitySource<Signer = B::Signer> + 'static,
    B: ContractBinder + 'static,
    N: NetworkEndpoints<Endpoint = B::Endpoint> + 'static,
{
    pub fn new(ctx: AppContext<I, B, N>, settle_timeout: Duration) -> Self {
        Self {
            ctx,
            settle_timeout,
        }
    }

    /// Run the connect action, optionally waiting for the rebinding to land.
    #[instrument(skip(self))]
    pub async fn connect(&self, params: ConnectParams) -> AppResult<ConnectionOut> {
        self.ctx.connect().await?;
        let out = self.current_or_settled(params.wait).await?;
        info!("connect finished in {:?} mode", out.mode);
        Ok(out)
    }

    #[instrument(skip(self))]
    pub async fn disconnect(&self, params: DisconnectParams) -> AppResult<ConnectionOut> {
        self.ctx.disconnect().await?;
        self.current_or_settled(params.wait).await
    }

    pub async fn get_connection(&self, _params: GetConnectionParams) -> AppResult<ConnectionOut> {
        Ok(self.describe(&self.ctx.snapshot()))
    }

    async fn current_or_settled(&self, wait: bool) -> AppResult<ConnectionOut> {
        if !wait {
            return Ok(self.describe(&self.ctx.snapshot()));
        }

        let mut subscription = self.ctx.subscribe();
        match timeout(self.settle_timeout, subscription.settled()).await {
            Ok(snapshot) => Ok(self.describe(&snapshot?)),
            Err(_) => {
                // Still binding; report what is published now.
                warn!(
                    "contract binding did not settle within {:?}",
                    self.settle_timeout
                );
                Ok(self.describe(&self.ctx.snapshot()))
            }
        }
    }

    fn describe(
        &self,
        snapshot: &ConnectionSnapshot<B::Signer, B::Endpoint, B::Handle>,
    ) -> ConnectionOut {
        describe_snapshot(snapshot, self.ctx.descriptor(), self.ctx.network())
    }
}

fn describe_snapshot<S, E, H>(
    snapshot: &ConnectionSnapshot<S, E, H>,
    descriptor: &ContractDescriptor,
    network: Network,
) -> ConnectionOut {
    ConnectionOut {
        address: snapshot.address().map(|address| format!("{address:#x}")),
        mode: snapshot.network_handle().map(|context| context.mode()),
        network,
        chain_id: network.chain_id(),
        contract: format!("{:#x}", descriptor.address),
        epoch: snapshot.epoch,
        settled: snapshot.is_settled(),
        binding_error: snapshot.current_fault().map(ToString::to_string),
    }
}
