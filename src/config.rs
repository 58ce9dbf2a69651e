use crate::{
    error::{AppError, AppResult},
    network::Network,
};
use dotenvy::dotenv;
use ethers::types::Address;
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

const DEFAULT_CONFIG_PATH: &str = "Config.toml";
const DEFAULT_SETTLE_TIMEOUT_MS: u64 = 5_000;

/// Strongly-typed configuration derived from a `Config.toml` or environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub network: Network,
    #[serde(default)]
    pub eth_rpc_url: Option<String>,
    pub contract_address: Address,
    #[serde(default)]
    pub abi_path: Option<PathBuf>,
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default = "default_verify_chain")]
    pub verify_chain: bool,
    #[serde(default)]
    pub auto_connect: bool,
    #[serde(default = "default_settle_timeout_ms")]
    pub settle_timeout_ms: u64,
}

fn default_verify_chain() -> bool {
    true
}

fn default_settle_timeout_ms() -> u64 {
    DEFAULT_SETTLE_TIMEOUT_MS
}

impl AppConfig {
    /// Load configuration, preferring a user-provided config file and falling back to env vars.
    pub fn load() -> AppResult<Self> {
        dotenv().ok();

        let configured_path =
            env::var("DAPP_CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let config_path = Path::new(&configured_path);

        if config_path.exists() {
            let raw = fs::read_to_string(config_path)
                .map_err(|err| AppError::Config(format!("failed to read config file: {err}")))?;
            return Self::from_toml_str(&raw);
        }

        Self::from_env()
    }

    pub fn from_toml_str(raw: &str) -> AppResult<Self> {
        let mut cfg: AppConfig = toml::from_str(raw)
            .map_err(|err| AppError::Config(format!("failed to parse config file: {err}")))?;
        cfg.normalize();
        Ok(cfg)
    }

    /// Helper used when no config file is present.
    fn from_env() -> AppResult<Self> {
        let contract_address = env::var("CONTRACT_ADDRESS")
            .map_err(|_| AppError::Config("CONTRACT_ADDRESS missing (config file not found)".into()))?
            .parse::<Address>()
            .map_err(|err| AppError::Config(format!("invalid CONTRACT_ADDRESS: {err}")))?;

        let network = match env::var("ETH_NETWORK") {
            Ok(raw) => raw.parse::<Network>()?,
            Err(_) => Network::default(),
        };

        let mut cfg = Self {
            network,
            eth_rpc_url: env::var("ETH_RPC_URL").ok(),
            contract_address,
            abi_path: env::var("CONTRACT_ABI_PATH").ok().map(PathBuf::from),
            private_key: env::var("PRIVATE_KEY").ok(),
            verify_chain: env_flag("VERIFY_CHAIN").unwrap_or_else(default_verify_chain),
            auto_connect: env_flag("AUTO_CONNECT").unwrap_or(false),
            settle_timeout_ms: parse_settle_timeout(env::var("SETTLE_TIMEOUT_MS").ok())?,
        };
        cfg.normalize();
        Ok(cfg)
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.settle_timeout_ms)
    }

    /// Blank strings from `.env` templates count as unset.
    fn normalize(&mut self) {
        self.eth_rpc_url = self.eth_rpc_url.take().filter(|v| !v.trim().is_empty());
        self.private_key = self.private_key.take().filter(|v| !v.trim().is_empty());
        self.abi_path = self
            .abi_path
            .take()
            .filter(|p| !p.as_os_str().is_empty());
    }
}

fn parse_settle_timeout(raw: Option<String>) -> AppResult<u64> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(DEFAULT_SETTLE_TIMEOUT_MS),
        Some(value) => value
            .parse::<u64>()
            .map_err(|err| AppError::Config(format!("invalid SETTLE_TIMEOUT_MS {value:?}: {err}"))),
    }
}

fn env_flag(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let cfg = AppConfig::from_toml_str(
            r#"contract_address = "0x00000000000000000000000000000000000000aa""#,
        )
        .unwrap();

        assert_eq!(cfg.network, Network::Sepolia);
        assert_eq!(cfg.contract_address, Address::from_low_u64_be(0xaa));
        assert!(cfg.verify_chain);
        assert!(!cfg.auto_connect);
        assert_eq!(cfg.settle_timeout(), Duration::from_millis(5_000));
        assert!(cfg.private_key.is_none());
    }

    #[test]
    fn blank_strings_are_treated_as_unset() {
        let cfg = AppConfig::from_toml_str(
            r#"
            network = "mainnet"
            contract_address = "0x00000000000000000000000000000000000000aa"
            eth_rpc_url = "  "
            private_key = ""
            abi_path = ""
            "#,
        )
        .unwrap();

        assert_eq!(cfg.network, Network::Mainnet);
        assert!(cfg.eth_rpc_url.is_none());
        assert!(cfg.private_key.is_none());
        assert!(cfg.abi_path.is_none());
    }

    #[test]
    fn settle_timeout_from_env_is_strict() {
        assert_eq!(parse_settle_timeout(None).unwrap(), DEFAULT_SETTLE_TIMEOUT_MS);
        assert_eq!(parse_settle_timeout(Some(" ".into())).unwrap(), DEFAULT_SETTLE_TIMEOUT_MS);
        assert_eq!(parse_settle_timeout(Some("750".into())).unwrap(), 750);

        let err = parse_settle_timeout(Some("5s".into())).unwrap_err();
        assert!(matches!(err, AppError::Config(msg) if msg.contains("SETTLE_TIMEOUT_MS")));
    }

    #[test]
    fn malformed_settle_timeout_in_file_is_config_error() {
        let err = AppConfig::from_toml_str(
            r#"
            contract_address = "0x00000000000000000000000000000000000000aa"
            settle_timeout_ms = "soon"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn missing_contract_address_is_config_error() {
        let err = AppConfig::from_toml_str(r#"network = "sepolia""#).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
