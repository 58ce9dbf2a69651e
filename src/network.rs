use std::{fmt, str::FromStr, time::Duration};

use ethers::providers::{Http, Provider};
use serde::{Deserialize, Serialize};

use crate::{
    config::AppConfig,
    connection::NetworkEndpoints,
    error::{AppError, AppResult},
};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Named networks the read-only endpoint can be built for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    #[default]
    Sepolia,
    Holesky,
}

impl Network {
    pub fn chain_id(self) -> u64 {
        match self {
            Network::Mainnet => 1,
            Network::Sepolia => 11_155_111,
            Network::Holesky => 17_000,
        }
    }

    /// Public RPC used when no `ETH_RPC_URL` override is configured.
    pub fn default_rpc_url(self) -> &'static str {
        match self {
            Network::Mainnet => "https://eth.llamarpc.com",
            Network::Sepolia => "https://rpc.sepolia.org",
            Network::Holesky => "https://ethereum-holesky-rpc.publicnode.com",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Mainnet => write!(f, "mainnet"),
            Network::Sepolia => write!(f, "sepolia"),
            Network::Holesky => write!(f, "holesky"),
        }
    }
}

impl FromStr for Network {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "sepolia" => Ok(Network::Sepolia),
            "holesky" => Ok(Network::Holesky),
            other => Err(AppError::Config(format!("unsupported network: {other}"))),
        }
    }
}

/// Builds HTTP read-only providers. A fresh provider is created on every call.
#[derive(Debug, Clone)]
pub struct HttpEndpoints {
    rpc_url: Option<String>,
    poll_interval: Duration,
}

impl HttpEndpoints {
    pub fn new(rpc_url: Option<String>) -> Self {
        Self {
            rpc_url,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.eth_rpc_url.clone())
    }

    pub fn url_for(&self, network: Network) -> &str {
        self.rpc_url
            .as_deref()
            .unwrap_or_else(|| network.default_rpc_url())
    }
}

impl NetworkEndpoints for HttpEndpoints {
    type Endpoint = Provider<Http>;

    fn read_only(&self, network: Network) -> AppResult<Self::Endpoint> {
        let url = self.url_for(network);
        Provider::<Http>::try_from(url)
            .map(|provider| provider.interval(self.poll_interval))
            .map_err(|err| {
                AppError::Config(format!(
                    "failed to create read-only provider for {network}: {err}"
                ))
            })
    }
}
