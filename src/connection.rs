//! Connection core: who is connected, which execution context the contract is bound
//! through, and the collaborator seams the reconciler drives.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use ethers::types::Address;
use serde::Serialize;

use crate::{contract::ContractDescriptor, error::AppResult, network::Network};

pub mod publisher;
pub mod reconciler;
pub mod state;

pub use publisher::{AppContext, ContextSubscription};
pub use reconciler::{ReconcileOutcome, Reconciler};
pub use state::{
    Binding, BindingFault, ConnectionSnapshot, ConnectionState, IdentityChanged, Publication,
};

/// The authenticated user, or nobody. An address never exists without its signer.
pub enum Identity<S> {
    Absent,
    Present { address: Address, signer: Arc<S> },
}

impl<S> Identity<S> {
    pub fn present(address: Address, signer: Arc<S>) -> Self {
        Identity::Present { address, signer }
    }

    pub fn address(&self) -> Option<Address> {
        match self {
            Identity::Present { address, .. } => Some(*address),
            Identity::Absent => None,
        }
    }

    pub fn signer(&self) -> Option<&Arc<S>> {
        match self {
            Identity::Present { signer, .. } => Some(signer),
            Identity::Absent => None,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Identity::Present { .. })
    }

    /// Reference identity: same address and the very same signer instance.
    pub fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Identity::Absent, Identity::Absent) => true,
            (
                Identity::Present { address, signer },
                Identity::Present {
                    address: other_address,
                    signer: other_signer,
                },
            ) => address == other_address && Arc::ptr_eq(signer, other_signer),
            _ => false,
        }
    }
}

impl<S> Clone for Identity<S> {
    fn clone(&self) -> Self {
        match self {
            Identity::Absent => Identity::Absent,
            Identity::Present { address, signer } => Identity::Present {
                address: *address,
                signer: Arc::clone(signer),
            },
        }
    }
}

impl<S> Default for Identity<S> {
    fn default() -> Self {
        Identity::Absent
    }
}

impl<S> fmt::Debug for Identity<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Absent => write!(f, "Absent"),
            Identity::Present { address, .. } => write!(f, "Present({address:#x})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    Signed,
    ReadOnly,
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionMode::Signed => write!(f, "signed"),
            ConnectionMode::ReadOnly => write!(f, "read_only"),
        }
    }
}

/// How the contract is reached: through the user's signer or an anonymous endpoint.
pub enum ExecutionContext<S, E> {
    Signed(Arc<S>),
    ReadOnly(Arc<E>),
}

impl<S, E> ExecutionContext<S, E> {
    pub fn mode(&self) -> ConnectionMode {
        match self {
            ExecutionContext::Signed(_) => ConnectionMode::Signed,
            ExecutionContext::ReadOnly(_) => ConnectionMode::ReadOnly,
        }
    }

    pub fn signer(&self) -> Option<&Arc<S>> {
        match self {
            ExecutionContext::Signed(signer) => Some(signer),
            ExecutionContext::ReadOnly(_) => None,
        }
    }

    pub fn endpoint(&self) -> Option<&Arc<E>> {
        match self {
            ExecutionContext::ReadOnly(endpoint) => Some(endpoint),
            ExecutionContext::Signed(_) => None,
        }
    }
}

impl<S, E> Clone for ExecutionContext<S, E> {
    fn clone(&self) -> Self {
        match self {
            ExecutionContext::Signed(signer) => ExecutionContext::Signed(Arc::clone(signer)),
            ExecutionContext::ReadOnly(endpoint) => ExecutionContext::ReadOnly(Arc::clone(endpoint)),
        }
    }
}

impl<S, E> fmt::Debug for ExecutionContext<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mode())
    }
}

/// Raw answer of a wallet connect attempt, before it is folded into an [`Identity`].
pub struct WalletResponse<S> {
    pub connected: bool,
    pub address: Option<Address>,
    pub signer: Option<Arc<S>>,
}

impl<S> WalletResponse<S> {
    pub fn connected(address: Address, signer: Arc<S>) -> Self {
        Self {
            connected: true,
            address: Some(address),
            signer: Some(signer),
        }
    }

    pub fn not_connected() -> Self {
        Self {
            connected: false,
            address: None,
            signer: None,
        }
    }
}

/// Capability producing an authenticated signer on demand.
#[async_trait]
pub trait IdentitySource: Send + Sync {
    type Signer: Send + Sync + 'static;

    async fn connect(&self) -> AppResult<WalletResponse<Self::Signer>>;

    async fn disconnect(&self) -> AppResult<()>;
}

/// Constructor for anonymous endpoints on a named network.
pub trait NetworkEndpoints: Send + Sync {
    type Endpoint: Send + Sync + 'static;

    fn read_only(&self, network: Network) -> AppResult<Self::Endpoint>;
}

/// Binds the static contract descriptor to an execution context.
#[async_trait]
pub trait ContractBinder: Send + Sync {
    type Signer: Send + Sync + 'static;
    type Endpoint: Send + Sync + 'static;
    type Handle: Send + Sync + 'static;

    async fn bind(
        &self,
        descriptor: &ContractDescriptor,
        context: &ExecutionContext<Self::Signer, Self::Endpoint>,
    ) -> AppResult<Self::Handle>;
}
