use std::{fs, marker::PhantomData, sync::Arc};

use async_trait::async_trait;
use ethers::{
    abi::Abi,
    middleware::SignerMiddleware,
    providers::{Http, JsonRpcClient, Middleware, Provider},
    signers::LocalWallet,
    types::{Address, U256},
};
use ethers_contract::Contract;
use tracing::debug;

use crate::{
    config::AppConfig,
    connection::{ConnectionMode, ContractBinder, ExecutionContext},
    error::{AppError, AppResult},
};

const DEFAULT_ABI_JSON: &str = include_str!("../config/contract_abi.json");

/// Provider wrapped with the user's wallet, used for the signed execution context.
pub type SignerClient<P = Http> = SignerMiddleware<Provider<P>, LocalWallet>;

/// ABI plus deployment address of the application's contract.
#[derive(Debug, Clone)]
pub struct ContractDescriptor {
    pub abi: Abi,
    pub address: Address,
}

impl ContractDescriptor {
    pub fn new(abi: Abi, address: Address) -> Self {
        Self { abi, address }
    }

    pub fn from_json(abi_json: &str, address: Address) -> AppResult<Self> {
        let abi: Abi = serde_json::from_str(abi_json)
            .map_err(|err| AppError::Config(format!("failed to parse contract ABI: {err}")))?;
        Ok(Self::new(abi, address))
    }

    /// Use the ABI file from config when given, the embedded ABI otherwise.
    pub fn load(config: &AppConfig) -> AppResult<Self> {
        match &config.abi_path {
            Some(path) => {
                let raw = fs::read_to_string(path).map_err(|err| {
                    AppError::Config(format!("failed to read ABI {}: {err}", path.display()))
                })?;
                Self::from_json(&raw, config.contract_address)
            }
            None => Self::from_json(DEFAULT_ABI_JSON, config.contract_address),
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.address.is_zero() {
            return Err(AppError::Binding("contract address is zero".into()));
        }
        if self.abi.functions.is_empty() {
            return Err(AppError::Binding("contract ABI declares no functions".into()));
        }
        Ok(())
    }
}

/// Contract instance bound through one of the two execution contexts.
pub enum BoundContract<P: JsonRpcClient = Http> {
    Signed(Contract<SignerClient<P>>),
    ReadOnly(Contract<Provider<P>>),
}

impl<P: JsonRpcClient + 'static> BoundContract<P> {
    pub fn address(&self) -> Address {
        match self {
            BoundContract::Signed(contract) => contract.address(),
            BoundContract::ReadOnly(contract) => contract.address(),
        }
    }

    pub fn abi(&self) -> &Abi {
        match self {
            BoundContract::Signed(contract) => contract.abi(),
            BoundContract::ReadOnly(contract) => contract.abi(),
        }
    }

    pub fn mode(&self) -> ConnectionMode {
        match self {
            BoundContract::Signed(_) => ConnectionMode::Signed,
            BoundContract::ReadOnly(_) => ConnectionMode::ReadOnly,
        }
    }
}

/// Binds the descriptor with ethers, optionally checking that the execution
/// context talks to the expected chain.
#[derive(Debug, Clone)]
pub struct EthersBinder<P = Http> {
    expected_chain_id: Option<u64>,
    _client: PhantomData<fn() -> P>,
}

impl<P> EthersBinder<P> {
    pub fn new(expected_chain_id: Option<u64>) -> Self {
        Self {
            expected_chain_id,
            _client: PhantomData,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.verify_chain.then(|| config.network.chain_id()))
    }

    async fn ensure_chain<M: Middleware>(&self, client: &M) -> AppResult<()> {
        let Some(expected) = self.expected_chain_id else {
            return Ok(());
        };

        let chain_id = client
            .get_chainid()
            .await
            .map_err(|err| AppError::Binding(format!("endpoint unreachable: {err}")))?;

        if chain_id != U256::from(expected) {
            return Err(AppError::Binding(format!(
                "endpoint reports chain id {chain_id}, expected {expected}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl<P> ContractBinder for EthersBinder<P>
where
    P: JsonRpcClient + 'static,
{
    type Signer = SignerClient<P>;
    type Endpoint = Provider<P>;
    type Handle = BoundContract<P>;

    async fn bind(
        &self,
        descriptor: &ContractDescriptor,
        context: &ExecutionContext<Self::Signer, Self::Endpoint>,
    ) -> AppResult<Self::Handle> {
        descriptor.validate()?;

        let handle = match context {
            ExecutionContext::Signed(client) => {
                self.ensure_chain(client.as_ref()).await?;
                BoundContract::Signed(Contract::new(
                    descriptor.address,
                    descriptor.abi.clone(),
                    Arc::clone(client),
                ))
            }
            ExecutionContext::ReadOnly(provider) => {
                self.ensure_chain(provider.as_ref()).await?;
                BoundContract::ReadOnly(Contract::new(
                    descriptor.address,
                    descriptor.abi.clone(),
                    Arc::clone(provider),
                ))
            }
        };

        debug!(
            contract = %format!("{:#x}", handle.address()),
            mode = %handle.mode(),
            "contract bound"
        );
        Ok(handle)
    }
}
