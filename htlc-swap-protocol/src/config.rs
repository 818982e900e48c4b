use crate::cross_chain::retry::RetryPolicy;
use crate::data_structures::{Chain, TokenInfo};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const ETHEREUM_PRIVATE_KEY_ENV: &str = "ETHEREUM_PRIVATE_KEY";
pub const ETHEREUM_CONTRACT_ENV: &str = "ETHEREUM_CONTRACT_ADDRESS";
pub const COSMOS_CONTRACT_ENV: &str = "COSMOS_CONTRACT_ADDRESS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub timelock: TimelockPolicy,
    pub coordinator: CoordinatorConfig,
    pub registry: RegistryConfig,
    pub http: HttpConfig,
    pub ledger_mode: LedgerMode,
    pub ethereum: EthereumConfig,
    pub cosmos: CosmosConfig,
    pub logging: LoggingConfig,
}

impl Default for SystemConfig {
    fn default() -> Self {
        SystemConfig {
            timelock: TimelockPolicy::default(),
            coordinator: CoordinatorConfig::default(),
            registry: RegistryConfig::default(),
            http: HttpConfig::default(),
            ledger_mode: LedgerMode::Live,
            ethereum: EthereumConfig::default(),
            cosmos: CosmosConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SystemConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Secrets and contract addresses may come from the environment instead
    /// of the config file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var(ETHEREUM_PRIVATE_KEY_ENV) {
            self.ethereum.private_key = Some(key);
        }
        if let Ok(address) = std::env::var(ETHEREUM_CONTRACT_ENV) {
            self.ethereum.contract_address = Some(address);
        }
        if let Ok(address) = std::env::var(COSMOS_CONTRACT_ENV) {
            self.cosmos.contract_address = Some(address);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.timelock.validate()?;
        if self.coordinator.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "coordinator.retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.ledger_mode == LedgerMode::Live {
            if self.ethereum.contract_address.is_none() {
                return Err(ConfigError::Invalid(
                    "ethereum.contract_address is required in live mode".into(),
                ));
            }
            if self.ethereum.private_key.is_none() {
                return Err(ConfigError::Invalid(format!(
                    "ethereum.private_key or {} is required in live mode",
                    ETHEREUM_PRIVATE_KEY_ENV
                )));
            }
            if self.cosmos.contract_address.is_none() {
                return Err(ConfigError::Invalid(
                    "cosmos.contract_address is required in live mode".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn tokens(&self, chain: Chain) -> &[TokenInfo] {
        match chain {
            Chain::Ethereum => &self.ethereum.tokens,
            Chain::Cosmos => &self.cosmos.tokens,
        }
    }

    pub fn find_token(&self, chain: Chain, symbol: &str) -> Option<&TokenInfo> {
        find_token(self.tokens(chain), symbol)
    }
}

pub fn find_token<'a>(tokens: &'a [TokenInfo], symbol: &str) -> Option<&'a TokenInfo> {
    tokens
        .iter()
        .find(|token| token.symbol.eq_ignore_ascii_case(symbol))
}

/// Bounds on user timelocks and the rule used to derive the counter lock.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelockPolicy {
    #[serde(with = "humantime_serde")]
    pub min_duration: Duration,
    #[serde(with = "humantime_serde")]
    pub max_duration: Duration,
    pub counter_timelock_ratio: CounterTimelockRatio,
    #[serde(with = "humantime_serde")]
    pub counter_min_duration: Duration,
}

impl Default for TimelockPolicy {
    fn default() -> Self {
        TimelockPolicy {
            min_duration: Duration::from_secs(3600),
            max_duration: Duration::from_secs(86400),
            counter_timelock_ratio: CounterTimelockRatio::default(),
            counter_min_duration: Duration::from_secs(3600),
        }
    }
}

impl TimelockPolicy {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.min_duration >= self.max_duration {
            return Err(ConfigError::Invalid(
                "timelock.min_duration must be below timelock.max_duration".into(),
            ));
        }
        let ratio = &self.counter_timelock_ratio;
        if ratio.denominator == 0 || ratio.numerator == 0 || ratio.numerator >= ratio.denominator {
            return Err(ConfigError::Invalid(
                "timelock.counter_timelock_ratio must lie strictly between 0 and 1".into(),
            ));
        }
        Ok(())
    }

    /// Counter lock expiry for a source lock expiring at `source_timelock`.
    /// `None` when too little time remains to leave the counterparty a
    /// usable window.
    pub fn counter_timelock(&self, source_timelock: u64, now: u64) -> Option<u64> {
        let remaining = source_timelock.checked_sub(now).filter(|r| *r > 0)?;
        let ratio = &self.counter_timelock_ratio;
        let shortened = (remaining as u128 * ratio.numerator as u128
            / ratio.denominator.max(1) as u128) as u64;
        let candidate = now + shortened;
        if candidate >= source_timelock || shortened < self.counter_min_duration.as_secs() {
            return None;
        }
        Some(candidate)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterTimelockRatio {
    pub numerator: u64,
    pub denominator: u64,
}

impl Default for CounterTimelockRatio {
    fn default() -> Self {
        CounterTimelockRatio {
            numerator: 1,
            denominator: 2,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub confirmation_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            poll_interval: Duration::from_secs(15),
            request_timeout: Duration::from_secs(10),
            confirmation_timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// JSON snapshot file. Swaps live in memory only when unset.
    pub snapshot_path: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub listen: SocketAddr,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            listen: SocketAddr::from(([0, 0, 0, 0], 3001)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerMode {
    Live,
    /// In-memory HTLC ledgers for both chains.
    Simulated,
}

impl LedgerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerMode::Live => "live",
            LedgerMode::Simulated => "simulated",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EthereumConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub contract_address: Option<String>,
    #[serde(skip_serializing)]
    pub private_key: Option<String>,
    pub confirmations: usize,
    pub tokens: Vec<TokenInfo>,
}

impl Default for EthereumConfig {
    fn default() -> Self {
        EthereumConfig {
            rpc_url: "https://rpc.sepolia.org".to_string(),
            chain_id: 11155111,
            contract_address: None,
            private_key: None,
            confirmations: 1,
            tokens: vec![
                TokenInfo::new("ETH", "0x0000000000000000000000000000000000000000", 18),
                TokenInfo::new("USDC", "0xA0b86a33E6417C14CfE8426b0F1fF15dE6B8E2d9", 6),
                TokenInfo::new("USDT", "0xaA8E23Fb1079EA71e0a56F48a2aA51851D8433D0", 6),
            ],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CosmosConfig {
    /// wasmd compatible CLI used to query and sign.
    pub binary: PathBuf,
    pub node: String,
    pub chain_id: String,
    pub contract_address: Option<String>,
    pub key_name: String,
    pub keyring_backend: String,
    pub gas_prices: String,
    pub gas_adjustment: f64,
    pub tokens: Vec<TokenInfo>,
}

impl Default for CosmosConfig {
    fn default() -> Self {
        CosmosConfig {
            binary: PathBuf::from("wasmd"),
            node: "https://rpc-cosmoshub.cosmos-apis.com:443".to_string(),
            chain_id: "cosmoshub-4".to_string(),
            contract_address: None,
            key_name: "relayer".to_string(),
            keyring_backend: "test".to_string(),
            gas_prices: "0.025uatom".to_string(),
            gas_adjustment: 1.3,
            tokens: vec![
                TokenInfo::new("ATOM", "uatom", 6),
                TokenInfo::new("OSMO", "uosmo", 6),
                TokenInfo::new("JUNO", "ujuno", 6),
            ],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: log::LevelFilter,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: log::LevelFilter::Info,
        }
    }
}
