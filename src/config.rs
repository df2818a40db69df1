//! 配置管理模块
//! 支持从环境变量和配置文件加载配置

use std::{collections::BTreeMap, path::Path};

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    domain::{network::DEFAULT_INVALID_SENDERS, AddressFormat, ContractInfo, LedgerModel, NetworkInfo},
    providers::{Capability, ProviderKind},
};

/// 应用配置结构体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub logging: LoggingConfig,
    pub redis: RedisConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default = "default_networks")]
    pub networks: BTreeMap<String, NetworkConfig>,
    #[serde(default = "default_contracts")]
    pub contracts: Vec<ContractInfo>,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "text"
    pub enable_file_logging: bool,
    pub log_file_path: Option<String>,
}

/// Redis配置（区块游标）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    #[serde(default)]
    pub key_prefix: String,
    #[serde(default = "default_cursor_ttl")]
    pub cursor_ttl_secs: u64,
}

/// 上游 HTTP 调用
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub timeout_ms: u64,
    /// 传输层错误的额外重试次数（不含限流）
    pub retries: usize,
    pub user_agent: String,
}

/// 批量交易详情
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    pub workers: usize,
    pub rate_limit_backoff_ms: u64,
    /// 代币详情失败时改用原生币详情重试
    pub retry_with_main_api: bool,
}

/// 提现对账
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    pub token_workers: usize,
    pub default_window_hours: i64,
}

/// 守护进程扫块
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    pub poll_interval_secs: u64,
    pub networks: Vec<String>,
}

/// 单个网络的元数据与提供方优先级
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub symbol: String,
    pub precision: u32,
    #[serde(default)]
    pub min_valid_tx_amount: Decimal,
    pub model: LedgerModel,
    #[serde(default)]
    pub block_height_offset: u64,
    #[serde(default = "default_max_blocks_per_scan")]
    pub max_blocks_per_scan: u64,
    #[serde(default = "default_withdrawal_window")]
    pub withdrawal_window_hours: i64,
    #[serde(default = "default_invalid_senders")]
    pub invalid_senders: Vec<String>,
    /// 地址格式；未配置时使用内置格式
    #[serde(default)]
    pub address_format: Option<AddressFormat>,
    /// 列表顺序即优先级
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub kind: ProviderKind,
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub capabilities: Vec<Capability>,
    #[serde(default)]
    pub supports_balance_batch: bool,
    #[serde(default = "default_max_balance_batch")]
    pub max_balance_batch: usize,
}

fn default_cursor_ttl() -> u64 {
    86400
}

fn default_max_blocks_per_scan() -> u64 {
    100
}

fn default_withdrawal_window() -> i64 {
    3
}

fn default_max_balance_batch() -> usize {
    1000
}

fn default_invalid_senders() -> Vec<String> {
    DEFAULT_INVALID_SENDERS.iter().map(|s| s.to_string()).collect()
}

impl NetworkConfig {
    pub fn network_info(&self, name: &str) -> NetworkInfo {
        NetworkInfo {
            name: name.to_string(),
            symbol: self.symbol.clone(),
            precision: self.precision,
            min_valid_tx_amount: self.min_valid_tx_amount,
            model: self.model,
            block_height_offset: self.block_height_offset,
            max_blocks_per_scan: self.max_blocks_per_scan,
            withdrawal_window_hours: self.withdrawal_window_hours,
            invalid_senders: self.invalid_senders.clone(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".into()),
            enable_file_logging: std::env::var("LOG_FILE_ENABLED")
                .ok()
                .map(|v| v == "1")
                .unwrap_or(false),
            log_file_path: std::env::var("LOG_FILE_PATH").ok(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into()),
            key_prefix: std::env::var("REDIS_KEY_PREFIX").unwrap_or_else(|_| "ironscan:".into()),
            cursor_ttl_secs: std::env::var("BLOCK_CURSOR_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(86400),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout_ms: std::env::var("UPSTREAM_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10_000),
            retries: std::env::var("UPSTREAM_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1),
            user_agent: std::env::var("UPSTREAM_USER_AGENT")
                .unwrap_or_else(|_| format!("ironscan/{}", env!("CARGO_PKG_VERSION"))),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: std::env::var("BATCH_WORKERS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            rate_limit_backoff_ms: std::env::var("RATE_LIMIT_BACKOFF_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1000),
            retry_with_main_api: std::env::var("RETRY_WITH_MAIN_API")
                .ok()
                .map(|v| v == "1")
                .unwrap_or(true),
        }
    }
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            token_workers: std::env::var("RECONCILIATION_TOKEN_WORKERS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            default_window_hours: std::env::var("WITHDRAWAL_WINDOW_HOURS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: std::env::var("SCAN_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
            networks: std::env::var("SCAN_NETWORKS")
                .ok()
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

fn provider(
    name: &str,
    kind: ProviderKind,
    base_url: String,
    api_key: Option<String>,
    capabilities: &[Capability],
) -> ProviderConfig {
    ProviderConfig {
        name: name.to_string(),
        kind,
        base_url,
        api_key,
        capabilities: capabilities.to_vec(),
        supports_balance_batch: false,
        max_balance_batch: default_max_balance_batch(),
    }
}

fn network(symbol: &str, precision: u32, min_valid: Decimal, model: LedgerModel, providers: Vec<ProviderConfig>) -> NetworkConfig {
    NetworkConfig {
        symbol: symbol.to_string(),
        precision,
        min_valid_tx_amount: min_valid,
        model,
        block_height_offset: 0,
        max_blocks_per_scan: default_max_blocks_per_scan(),
        withdrawal_window_hours: default_withdrawal_window(),
        invalid_senders: default_invalid_senders(),
        address_format: None,
        providers,
    }
}

/// 内置网络；配置文件中出现 `[networks]` 时整体替换
fn default_networks() -> BTreeMap<String, NetworkConfig> {
    use Capability::*;

    let env_or = |key: &str, default: &str| std::env::var(key).unwrap_or_else(|_| default.into());
    let mut networks = BTreeMap::new();

    networks.insert(
        "BTC".to_string(),
        network(
            "BTC",
            8,
            Decimal::new(1, 5),
            LedgerModel::Utxo,
            vec![provider(
                "btc_blockbook",
                ProviderKind::Blockbook,
                env_or("BTC_BLOCKBOOK_URL", "https://btc1.trezor.io"),
                None,
                &[Balance, TxDetails, AddressTxs, BlockTxs, BlockHead],
            )],
        ),
    );

    let mut etherscan = provider(
        "eth_blockscan",
        ProviderKind::Blockscan,
        env_or("ETH_BLOCKSCAN_URL", "https://api.etherscan.io/api"),
        std::env::var("ETHERSCAN_API_KEY").ok(),
        &[Balance, TokenBalance, TxDetails, TokenTxDetails, AddressTxs, TokenTxs, BlockHead],
    );
    etherscan.supports_balance_batch = true;
    etherscan.max_balance_batch = 20;
    let mut eth = network(
        "ETH",
        18,
        Decimal::new(1, 6),
        LedgerModel::Account,
        vec![
            etherscan,
            provider(
                "eth_blockbook",
                ProviderKind::Blockbook,
                env_or("ETH_BLOCKBOOK_URL", "https://eth1.trezor.io"),
                None,
                &[Balance, TokenBalance, TxDetails, TokenTxDetails, AddressTxs, TokenTxs, BlockTxs, BlockHead],
            ),
        ],
    );
    eth.block_height_offset = 12;
    networks.insert("ETH".to_string(), eth);

    networks.insert(
        "FTM".to_string(),
        network(
            "FTM",
            18,
            Decimal::new(1, 6),
            LedgerModel::Account,
            vec![provider(
                "ftm_graphql",
                ProviderKind::Graphql,
                env_or("FTM_GRAPHQL_URL", "https://xapi.fantom.network/"),
                None,
                &[Balance, TxDetails, AddressTxs, BlockTxs, BlockHead],
            )],
        ),
    );

    let mut ton = network(
        "TON",
        9,
        Decimal::new(1, 3),
        LedgerModel::Memo,
        vec![provider(
            "ton_tonapi",
            ProviderKind::Rest,
            env_or("TONAPI_URL", "https://tonapi.io"),
            std::env::var("TONAPI_API_KEY").ok(),
            &[Balance, TokenBalance, TxDetails, TokenTxDetails, AddressTxs, TokenTxs, BlockTxs, BlockHead],
        )],
    );
    ton.withdrawal_window_hours = 6;
    networks.insert("TON".to_string(), ton);

    networks
}

fn default_contracts() -> Vec<ContractInfo> {
    vec![
        ContractInfo {
            network: "ETH".into(),
            symbol: "USDT".into(),
            address: "0xdAC17F958D2ee523a2206206994597C13D831ec7".into(),
            decimals: 6,
            pseudo_network: false,
        },
        ContractInfo {
            network: "TON".into(),
            symbol: "USDT".into(),
            address: "EQCxE6mUtQJKFnGfaROTKOt1lZbDiiX1kCixRv7Nw2Id_sDs".into(),
            decimals: 6,
            pseudo_network: false,
        },
    ]
}

impl Config {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self> {
        // .env 不存在时忽略
        let _ = dotenvy::dotenv();
        Ok(Self {
            logging: LoggingConfig::default(),
            redis: RedisConfig::default(),
            upstream: UpstreamConfig::default(),
            batch: BatchConfig::default(),
            reconciliation: ReconciliationConfig::default(),
            scanner: ScannerConfig::default(),
            networks: default_networks(),
            contracts: default_contracts(),
        })
    }

    /// 从配置文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    /// 从环境变量和配置文件合并加载（配置文件优先级更高）
    pub fn from_env_and_file<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut config = Self::from_env()?;

        if let Some(path) = path {
            if path.as_ref().exists() {
                config = Self::from_file(path)?;
            }
        }

        Ok(config)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<()> {
        // 验证日志级别
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("LOG_LEVEL must be one of: {:?}", valid_levels);
        }

        // 验证日志格式
        if self.logging.format != "json" && self.logging.format != "text" {
            anyhow::bail!("LOG_FORMAT must be 'json' or 'text'");
        }

        if !self.redis.url.starts_with("redis://") && !self.redis.url.starts_with("rediss://") {
            anyhow::bail!("REDIS_URL must start with redis:// or rediss://");
        }

        if self.batch.workers == 0 || self.reconciliation.token_workers == 0 {
            anyhow::bail!("worker pool sizes must be greater than zero");
        }

        for (name, network) in &self.networks {
            if network.max_blocks_per_scan == 0 {
                anyhow::bail!("network {} must scan at least one block per round", name);
            }
            for p in &network.providers {
                if !p.base_url.starts_with("http://") && !p.base_url.starts_with("https://") {
                    anyhow::bail!("provider {} of {} has an invalid base_url", p.name, name);
                }
                if p.capabilities.is_empty() {
                    anyhow::bail!("provider {} of {} declares no capability", p.name, name);
                }
            }
        }

        for contract in &self.contracts {
            if !self.networks.contains_key(&contract.network) {
                anyhow::bail!(
                    "contract {} references unknown network {}",
                    contract.symbol,
                    contract.network
                );
            }
        }

        Ok(())
    }
}
