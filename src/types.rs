use serde::{Deserialize, Serialize};

use crate::{connection::ConnectionMode, network::Network};

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    #[serde(default = "default_wait")]
    pub wait: bool,
}

#[derive(Debug, Deserialize)]
pub struct DisconnectParams {
    #[serde(default = "default_wait")]
    pub wait: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct GetConnectionParams {}

fn default_wait() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct ConnectionOut {
    pub address: Option<String>,
    pub mode: Option<ConnectionMode>,
    pub network: Network,
    pub chain_id: u64,
    pub contract: String,
    pub epoch: u64,
    /// Whether the bound contract reflects the current identity.
    pub settled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binding_error: Option<String>,
}
