//! 上游浏览器适配器
//!
//! 每个适配器对应一类上游 API（UTXO 浏览器、账户浏览器、GraphQL 索引器、REST 浏览器），
//! 负责请求、结构校验与解析：
//! 1. 取回原始 JSON
//! 2. `validate` 未通过时返回 `Validation` 错误，由编排层决定降级
//! 3. 解析为规范化的 `Transfer` / `Balance`（纯函数，不做 IO）

pub mod blockbook;
pub mod blockscan;
pub mod graphql;
pub mod json;
pub mod rest;

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    config::ProviderConfig,
    domain::{
        AddressCodec, Balance, ContractInfo, ContractRegistry, CurrencyKey, Direction, NetworkInfo,
        Transfer,
    },
    error::{ExplorerError, ExplorerResult},
    infrastructure::HttpTransport,
};

pub use blockbook::BlockbookAdapter;
pub use blockscan::BlockscanAdapter;
pub use graphql::GraphqlAdapter;
pub use rest::RestAdapter;

/// 适配器可提供的读操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Balance,
    TokenBalance,
    TxDetails,
    TokenTxDetails,
    AddressTxs,
    TokenTxs,
    BlockTxs,
    BlockHead,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Balance => "balance",
            Capability::TokenBalance => "token_balance",
            Capability::TxDetails => "tx_details",
            Capability::TokenTxDetails => "token_tx_details",
            Capability::AddressTxs => "address_txs",
            Capability::TokenTxs => "token_txs",
            Capability::BlockTxs => "block_txs",
            Capability::BlockHead => "block_head",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 待校验响应的种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Balance,
    BatchBalance,
    TokenBalance,
    TxDetails,
    AddressTxs,
    TokenTxs,
    BlockTxs,
    BlockHead,
    Receipt,
}

impl ResponseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseKind::Balance => "balance",
            ResponseKind::BatchBalance => "batch_balance",
            ResponseKind::TokenBalance => "token_balance",
            ResponseKind::TxDetails => "tx_details",
            ResponseKind::AddressTxs => "address_txs",
            ResponseKind::TokenTxs => "token_txs",
            ResponseKind::BlockTxs => "block_txs",
            ResponseKind::BlockHead => "block_head",
            ResponseKind::Receipt => "receipt",
        }
    }
}

impl fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 结构校验：解析前检查所有会被解引用的字段；返回 false 表示"不可信"，从不 panic
pub trait ResponseValidator: Send + Sync {
    fn validate(&self, raw: &Value, kind: ResponseKind) -> bool;
}

/// 解析所需的只读上下文
#[derive(Clone)]
pub struct ParserContext {
    pub network: NetworkInfo,
    pub contracts: Arc<ContractRegistry>,
    pub codec: Arc<dyn AddressCodec>,
}

impl ParserContext {
    pub fn new(
        network: NetworkInfo,
        contracts: Arc<ContractRegistry>,
        codec: Arc<dyn AddressCodec>,
    ) -> Self {
        Self {
            network,
            contracts,
            codec,
        }
    }

    pub fn canonical(&self, address: &str) -> Option<String> {
        self.codec.canonicalize(&self.network.name, address)
    }

    /// 规范形式；无法识别的地址原样保留
    pub fn normalize(&self, address: &str) -> String {
        self.canonical(address)
            .unwrap_or_else(|| address.trim().to_string())
    }

    /// 原生币最小单位 -> 数值
    pub fn scale(&self, raw: &str) -> Option<Decimal> {
        json::scale_units(raw, self.network.precision)
    }

    pub fn native(&self) -> CurrencyKey {
        CurrencyKey::native(self.network.symbol.clone())
    }

    pub fn token_currency(contract: &ContractInfo) -> CurrencyKey {
        CurrencyKey::token(contract.symbol.clone(), contract.address.clone())
    }

    pub fn is_dust(&self, value: Decimal) -> bool {
        value < self.network.min_valid_tx_amount
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterFlags {
    pub supports_balance_batch: bool,
    pub max_balance_batch: usize,
}

impl Default for AdapterFlags {
    fn default() -> Self {
        Self {
            supports_balance_batch: false,
            max_balance_batch: 1000,
        }
    }
}

/// 一个上游浏览器的读操作集合
///
/// 未实现的能力返回 `NotImplemented`，编排层视同降级。
#[async_trait]
pub trait ExplorerAdapter: ResponseValidator {
    fn name(&self) -> &str;

    fn context(&self) -> &ParserContext;

    fn flags(&self) -> AdapterFlags {
        AdapterFlags::default()
    }

    /// 校验闸门：未通过时返回 `Validation` 错误
    fn gate(&self, raw: &Value, kind: ResponseKind) -> ExplorerResult<()> {
        if self.validate(raw, kind) {
            Ok(())
        } else {
            tracing::debug!(provider = %self.name(), kind = %kind, "response rejected by validator");
            Err(ExplorerError::validation(self.name(), kind))
        }
    }

    async fn get_balance(&self, address: &str) -> ExplorerResult<Balance>;

    async fn get_balances(&self, _addresses: &[String]) -> ExplorerResult<Vec<(String, Balance)>> {
        Err(ExplorerError::not_implemented(self.name(), "get_balances"))
    }

    async fn get_token_balance(
        &self,
        _address: &str,
        _contract: &ContractInfo,
    ) -> ExplorerResult<Balance> {
        Err(ExplorerError::not_implemented(self.name(), "get_token_balance"))
    }

    async fn get_tx_details(&self, hash: &str) -> ExplorerResult<Vec<Transfer>>;

    /// 默认取完整详情后只保留该合约的转账
    async fn get_token_tx_details(
        &self,
        hash: &str,
        contract: &ContractInfo,
    ) -> ExplorerResult<Vec<Transfer>> {
        let transfers = self.get_tx_details(hash).await?;
        Ok(transfers
            .into_iter()
            .filter(|t| {
                t.token
                    .as_deref()
                    .is_some_and(|c| c.eq_ignore_ascii_case(&contract.address))
            })
            .collect())
    }

    async fn get_address_txs(&self, address: &str) -> ExplorerResult<Vec<Transfer>>;

    async fn get_token_txs(
        &self,
        _address: &str,
        _contract: &ContractInfo,
        _direction: Option<Direction>,
    ) -> ExplorerResult<Vec<Transfer>> {
        Err(ExplorerError::not_implemented(self.name(), "get_token_txs"))
    }

    async fn get_block_txs(&self, _height: u64) -> ExplorerResult<Vec<Transfer>> {
        Err(ExplorerError::not_implemented(self.name(), "get_block_txs"))
    }

    async fn get_block_head(&self) -> ExplorerResult<u64>;

    /// 对外可见的结算哈希；多数网络与内部哈希一致
    async fn settlement_hash(&self, hash: &str) -> ExplorerResult<Option<String>> {
        Ok(Some(hash.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Blockbook,
    Blockscan,
    Graphql,
    Rest,
}

/// 按配置构建适配器
pub fn build_adapter(
    config: &ProviderConfig,
    context: ParserContext,
    transport: Arc<dyn HttpTransport>,
) -> Arc<dyn ExplorerAdapter> {
    let flags = AdapterFlags {
        supports_balance_batch: config.supports_balance_batch,
        max_balance_batch: config.max_balance_batch.max(1),
    };
    let base_url = config.base_url.trim_end_matches('/').to_string();
    match config.kind {
        ProviderKind::Blockbook => Arc::new(BlockbookAdapter::new(
            config.name.clone(),
            base_url,
            context,
            transport,
        )),
        ProviderKind::Blockscan => Arc::new(
            BlockscanAdapter::new(
                config.name.clone(),
                base_url,
                config.api_key.clone(),
                context,
                transport,
            )
            .with_flags(flags),
        ),
        ProviderKind::Graphql => Arc::new(GraphqlAdapter::new(
            config.name.clone(),
            base_url,
            context,
            transport,
        )),
        ProviderKind::Rest => Arc::new(RestAdapter::new(
            config.name.clone(),
            base_url,
            config.api_key.clone(),
            context,
            transport,
        )),
    }
}

/// 方向过滤：to == address 为转入，from == address 为转出
pub(crate) fn matches_direction(t: &Transfer, address: &str, direction: Option<Direction>) -> bool {
    match direction {
        None => true,
        Some(Direction::Incoming) => t.to_address.eq_ignore_ascii_case(address),
        Some(Direction::Outgoing) => t.from_address.eq_ignore_ascii_case(address),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! 单元测试用的固定响应传输层

    use std::sync::Mutex;

    use super::*;
    use crate::{
        domain::{DefaultAddressCodec, LedgerModel},
        infrastructure::Headers,
    };

    /// 按 URL 子串匹配返回固定 JSON；未命中返回传输错误
    #[derive(Default)]
    pub struct CannedTransport {
        routes: Vec<(String, ExplorerResult<Value>)>,
        pub requests: Mutex<Vec<String>>,
    }

    impl CannedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn route(mut self, fragment: &str, response: Value) -> Self {
            self.routes.push((fragment.to_string(), Ok(response)));
            self
        }

        pub fn fail(mut self, fragment: &str, err: ExplorerError) -> Self {
            self.routes.push((fragment.to_string(), Err(err)));
            self
        }

        fn lookup(&self, key: &str) -> ExplorerResult<Value> {
            if let Ok(mut log) = self.requests.lock() {
                log.push(key.to_string());
            }
            self.routes
                .iter()
                .find(|(fragment, _)| key.contains(fragment.as_str()))
                .map(|(_, r)| r.clone())
                .unwrap_or_else(|| Err(ExplorerError::transport("canned", format!("no route for {}", key))))
        }
    }

    #[async_trait]
    impl HttpTransport for CannedTransport {
        async fn get_json(&self, _provider: &str, url: &str, _headers: &Headers) -> ExplorerResult<Value> {
            self.lookup(url)
        }

        async fn post_json(
            &self,
            _provider: &str,
            url: &str,
            body: &Value,
            _headers: &Headers,
        ) -> ExplorerResult<Value> {
            self.lookup(&format!("{} {}", url, body))
        }
    }

    pub fn context(name: &str, symbol: &str, precision: u32, model: LedgerModel, min: Decimal) -> ParserContext {
        let contracts = ContractRegistry::from_contracts(vec![
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
        ]);
        ParserContext::new(
            NetworkInfo::new(name, symbol, precision, model).with_min_valid_tx_amount(min),
            Arc::new(contracts),
            Arc::new(DefaultAddressCodec::default()),
        )
    }
}
