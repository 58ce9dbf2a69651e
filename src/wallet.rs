use std::{str::FromStr, sync::Arc};

use async_trait::async_trait;
use ethers::{
    middleware::SignerMiddleware,
    providers::{Http, JsonRpcClient, Middleware, Provider},
    signers::{LocalWallet, Signer},
    types::U256,
};
use tracing::info;

use crate::{
    config::AppConfig,
    connection::{IdentitySource, WalletResponse},
    contract::SignerClient,
    error::{AppError, AppResult},
};

/// Identity source backed by an optional signing key from configuration.
///
/// Without a key every connect attempt answers "not connected", which keeps the
/// application in read-only mode. The signer client is built once per key, so
/// repeated connects hand out the same client.
#[derive(Debug, Clone)]
pub struct WalletManager<P: JsonRpcClient = Http> {
    client: Option<Arc<SignerClient<P>>>,
    provider: Provider<P>,
}

impl<P: JsonRpcClient + Clone> WalletManager<P> {
    pub fn new(signer: Option<LocalWallet>, provider: Provider<P>) -> Self {
        let client =
            signer.map(|wallet| Arc::new(SignerMiddleware::new(provider.clone(), wallet)));
        Self { client, provider }
    }

    pub fn signer(&self) -> Option<LocalWallet> {
        self.client.as_ref().map(|client| client.signer().clone())
    }
}

impl WalletManager<Http> {
    pub fn from_config(config: &AppConfig, provider: Provider<Http>) -> AppResult<Self> {
        if let Some(ref key) = config.private_key {
            let trimmed = key.trim_start_matches("0x");
            let wallet = LocalWallet::from_str(trimmed)
                .map_err(|err| AppError::Wallet(format!("failed to parse private key: {err}")))?;
            let wallet = wallet.with_chain_id(config.network.chain_id());
            Ok(Self::new(Some(wallet), provider))
        } else {
            Ok(Self::new(None, provider))
        }
    }
}

#[async_trait]
impl<P> IdentitySource for WalletManager<P>
where
    P: JsonRpcClient + Clone + 'static,
{
    type Signer = SignerClient<P>;

    async fn connect(&self) -> AppResult<WalletResponse<Self::Signer>> {
        let Some(client) = &self.client else {
            info!("no signing key configured");
            return Ok(WalletResponse::not_connected());
        };
        let wallet = client.signer();

        let chain_id = self
            .provider
            .get_chainid()
            .await
            .map_err(|err| AppError::IdentitySource(format!("wallet endpoint unreachable: {err}")))?;

        if chain_id != U256::from(wallet.chain_id()) {
            return Err(AppError::IdentitySource(format!(
                "wallet is configured for chain {} but endpoint reports {chain_id}",
                wallet.chain_id()
            )));
        }

        Ok(WalletResponse::connected(wallet.address(), Arc::clone(client)))
    }

    async fn disconnect(&self) -> AppResult<()> {
        // A local key holds no session to release.
        Ok(())
    }
}
