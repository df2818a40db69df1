//! 单网络的降级编排器
//!
//! 每个能力对应一条按优先级排列的适配器链：
//! - 依次尝试，成功即返回
//! - 传输、限流、校验失败与未实现时切换到下一个；其余错误直接上抛
//! - 链耗尽时返回最后一次错误，不返回空结果
//! - 每次失败记一次 `ironscan_api_errors_total`

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    future::Future,
    sync::Arc,
    time::Duration,
};

use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    domain::{
        aggregate, AddressCodec, AddressTx, Balance, ContractInfo, ContractRegistry, Direction,
        NetworkInfo, Transfer, TxDetails,
    },
    error::{ExplorerError, ExplorerResult},
    infrastructure::KvStore,
    metrics,
    providers::{Capability, ExplorerAdapter},
};

/// 未记录游标时，从链头往回扫的区块数
const DEFAULT_LOOKBACK_BLOCKS: u64 = 5;

/// 区块中的一条转账摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockTxInfo {
    pub tx_hash: String,
    pub value: Decimal,
    pub contract_address: Option<String>,
    pub block_height: Option<u64>,
    pub symbol: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockAddresses {
    pub input_addresses: BTreeSet<String>,
    pub output_addresses: BTreeSet<String>,
}

/// 地址 -> 币种 -> 转账列表
pub type TxInfoMap = BTreeMap<String, BTreeMap<String, Vec<BlockTxInfo>>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockTxsInfo {
    pub outgoing_txs: TxInfoMap,
    pub incoming_txs: TxInfoMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestBlock {
    pub addresses: BlockAddresses,
    pub info: BlockTxsInfo,
    pub last_processed_block: u64,
}

/// 单网络编排器；构建后只读，可跨任务共享
pub struct ExplorerInterface {
    network: NetworkInfo,
    chains: HashMap<Capability, Vec<Arc<dyn ExplorerAdapter>>>,
    contracts: Arc<ContractRegistry>,
    codec: Arc<dyn AddressCodec>,
    kv: Arc<dyn KvStore>,
    kv_prefix: String,
    cursor_ttl: Duration,
    block_workers: usize,
}

impl ExplorerInterface {
    pub fn new(
        network: NetworkInfo,
        contracts: Arc<ContractRegistry>,
        codec: Arc<dyn AddressCodec>,
        kv: Arc<dyn KvStore>,
    ) -> Self {
        Self {
            network,
            chains: HashMap::new(),
            contracts,
            codec,
            kv,
            kv_prefix: String::new(),
            cursor_ttl: Duration::from_secs(86400),
            block_workers: 3,
        }
    }

    /// 追加到能力链末尾（优先级最低）
    pub fn with_adapter(mut self, capability: Capability, adapter: Arc<dyn ExplorerAdapter>) -> Self {
        self.push_adapter(capability, adapter);
        self
    }

    pub fn push_adapter(&mut self, capability: Capability, adapter: Arc<dyn ExplorerAdapter>) {
        self.chains.entry(capability).or_default().push(adapter);
    }

    pub fn with_kv_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.kv_prefix = prefix.into();
        self
    }

    pub fn with_cursor_ttl(mut self, ttl: Duration) -> Self {
        self.cursor_ttl = ttl;
        self
    }

    pub fn with_block_workers(mut self, workers: usize) -> Self {
        self.block_workers = workers.max(1);
        self
    }

    pub fn network(&self) -> &NetworkInfo {
        &self.network
    }

    pub fn contracts(&self) -> &ContractRegistry {
        &self.contracts
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.chains.get(&capability).is_some_and(|c| !c.is_empty())
    }

    /// 规范地址；非法地址返回 InvalidAddress
    pub fn canonical(&self, address: &str) -> ExplorerResult<String> {
        self.codec
            .canonicalize(&self.network.name, address)
            .ok_or_else(|| ExplorerError::InvalidAddress {
                network: self.network.name.clone(),
                address: address.to_string(),
            })
    }

    fn chain(&self, capability: Capability) -> ExplorerResult<&[Arc<dyn ExplorerAdapter>]> {
        match self.chains.get(&capability) {
            Some(chain) if !chain.is_empty() => Ok(chain),
            _ => Err(ExplorerError::CapabilityUnavailable {
                network: self.network.name.clone(),
                capability: capability.to_string(),
            }),
        }
    }

    async fn with_fallback<T, F, Fut>(
        &self,
        capability: Capability,
        operation: &str,
        call: F,
    ) -> ExplorerResult<T>
    where
        F: Fn(Arc<dyn ExplorerAdapter>) -> Fut,
        Fut: Future<Output = ExplorerResult<T>>,
    {
        let chain = self.chain(capability)?;
        let mut last: Option<ExplorerError> = None;
        for adapter in chain {
            match call(adapter.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    metrics::inc_api_error(
                        &self.network.name,
                        adapter.name(),
                        err.kind().as_str(),
                        operation,
                    );
                    tracing::warn!(
                        network = %self.network.name,
                        provider = %adapter.name(),
                        capability = %capability,
                        operation,
                        error = %err,
                        "provider call failed"
                    );
                    if !err.should_fallback() {
                        return Err(err);
                    }
                    last = Some(err);
                }
            }
        }
        let last = last.ok_or_else(|| ExplorerError::CapabilityUnavailable {
            network: self.network.name.clone(),
            capability: capability.to_string(),
        })?;
        tracing::error!(
            network = %self.network.name,
            capability = %capability,
            operation,
            error = %last,
            "all providers failed"
        );
        Err(ExplorerError::AllProvidersFailed {
            network: self.network.name.clone(),
            capability: capability.to_string(),
            last: Box::new(last),
        })
    }

    // ============ 余额 ============

    pub async fn get_balance(&self, address: &str) -> ExplorerResult<Balance> {
        self.with_fallback(Capability::Balance, "get_balance", |adapter| async move {
            adapter.get_balance(address).await
        })
        .await
    }

    /// 余额链中第一个支持批量查询的适配器的分块上限
    pub fn balance_batch_size(&self) -> Option<usize> {
        self.chains
            .get(&Capability::Balance)?
            .iter()
            .map(|a| a.flags())
            .find(|f| f.supports_balance_batch)
            .map(|f| f.max_balance_batch.max(1))
    }

    /// 分块批量查询；任一块失败即整体失败，由调用方决定是否逐个重试
    pub async fn get_balances(&self, addresses: &[String]) -> ExplorerResult<Vec<(String, Balance)>> {
        let chunk_size = self.balance_batch_size().ok_or_else(|| {
            ExplorerError::CapabilityUnavailable {
                network: self.network.name.clone(),
                capability: "balance_batch".into(),
            }
        })?;
        let mut balances = Vec::with_capacity(addresses.len());
        for chunk in addresses.chunks(chunk_size) {
            let part = self
                .with_fallback(Capability::Balance, "get_balances", |adapter| async move {
                    adapter.get_balances(chunk).await
                })
                .await?;
            balances.extend(part);
        }
        Ok(balances)
    }

    pub async fn get_token_balance(
        &self,
        address: &str,
        contract: &ContractInfo,
    ) -> ExplorerResult<Balance> {
        self.with_fallback(Capability::TokenBalance, "get_token_balance", |adapter| async move {
            adapter.get_token_balance(address, contract).await
        })
        .await
    }

    // ============ 交易详情 ============

    /// 按账本模型聚合后的详情；没有任何转账时为失败详情
    pub async fn get_tx_details(&self, hash: &str) -> ExplorerResult<TxDetails> {
        let transfers = self
            .with_fallback(Capability::TxDetails, "get_tx_details", |adapter| async move {
                adapter.get_tx_details(hash).await
            })
            .await?;
        Ok(self.project_details(transfers))
    }

    pub async fn get_token_tx_details(
        &self,
        hash: &str,
        contract: &ContractInfo,
    ) -> ExplorerResult<TxDetails> {
        let transfers = self
            .with_fallback(
                Capability::TokenTxDetails,
                "get_token_tx_details",
                |adapter| async move { adapter.get_token_tx_details(hash, contract).await },
            )
            .await?;
        Ok(self.project_details(transfers))
    }

    fn project_details(&self, transfers: Vec<Transfer>) -> TxDetails {
        TxDetails::from_transfers(&aggregate(self.network.model, transfers))
    }

    // ============ 地址历史 ============

    pub async fn get_address_txs(
        &self,
        address: &str,
        direction: Option<Direction>,
    ) -> ExplorerResult<Vec<AddressTx>> {
        let canonical = self.canonical(address)?;
        let transfers = self
            .with_fallback(Capability::AddressTxs, "get_address_txs", |adapter| {
                let canonical = canonical.clone();
                async move { adapter.get_address_txs(&canonical).await }
            })
            .await?;
        Ok(project_history(&canonical, transfers, direction))
    }

    pub async fn get_token_txs(
        &self,
        address: &str,
        contract: &ContractInfo,
        direction: Option<Direction>,
    ) -> ExplorerResult<Vec<AddressTx>> {
        let canonical = self.canonical(address)?;
        let transfers = self
            .with_fallback(Capability::TokenTxs, "get_token_txs", |adapter| {
                let canonical = canonical.clone();
                async move { adapter.get_token_txs(&canonical, contract, direction).await }
            })
            .await?;
        Ok(project_history(&canonical, transfers, direction))
    }

    /// 结算哈希；None 表示尚无法解析
    pub async fn settlement_hash(&self, hash: &str) -> ExplorerResult<Option<String>> {
        self.with_fallback(Capability::TokenTxs, "settlement_hash", |adapter| async move {
            adapter.settlement_hash(hash).await
        })
        .await
    }

    // ============ 区块 ============

    pub async fn get_block_txs(&self, height: u64) -> ExplorerResult<Vec<Transfer>> {
        self.with_fallback(Capability::BlockTxs, "get_block_txs", |adapter| async move {
            adapter.get_block_txs(height).await
        })
        .await
    }

    pub async fn get_block_head(&self) -> ExplorerResult<u64> {
        self.with_fallback(Capability::BlockHead, "get_block_head", |adapter| async move {
            adapter.get_block_head().await
        })
        .await
    }

    /// 并发询问所有链头适配器，取成功结果中的最大值
    pub async fn max_block_head(&self) -> ExplorerResult<u64> {
        let chain = self.chain(Capability::BlockHead)?;
        let results = futures::future::join_all(chain.iter().map(|adapter| async move {
            (adapter.name().to_string(), adapter.get_block_head().await)
        }))
        .await;

        let mut best: Option<u64> = None;
        let mut last: Option<ExplorerError> = None;
        for (provider, result) in results {
            match result {
                Ok(head) => best = Some(best.map_or(head, |b| b.max(head))),
                Err(err) => {
                    metrics::inc_api_error(&self.network.name, &provider, err.kind().as_str(), "max_block_head");
                    tracing::warn!(network = %self.network.name, provider = %provider, error = %err, "block head failed");
                    last = Some(err);
                }
            }
        }
        match (best, last) {
            (Some(head), _) => Ok(head),
            (None, Some(last)) => Err(ExplorerError::AllProvidersFailed {
                network: self.network.name.clone(),
                capability: Capability::BlockHead.to_string(),
                last: Box::new(last),
            }),
            (None, None) => Err(ExplorerError::CapabilityUnavailable {
                network: self.network.name.clone(),
                capability: Capability::BlockHead.to_string(),
            }),
        }
    }

    fn cursor_key(&self) -> String {
        format!(
            "{}latest_block_height_processed_{}",
            self.kv_prefix,
            self.network.name.to_ascii_lowercase()
        )
    }

    /// 已处理的最新区块；存储不可用时视为未记录
    pub async fn processed_cursor(&self) -> Option<u64> {
        match self.kv.get(&self.cursor_key()).await {
            Ok(value) => value.and_then(|v| v.parse().ok()),
            Err(err) => {
                tracing::warn!(network = %self.network.name, error = %err, "block cursor read failed");
                None
            }
        }
    }

    async fn advance_cursor(&self, processed: u64) {
        let current = self.processed_cursor().await;
        if current.is_some_and(|c| c >= processed) {
            return;
        }
        match self
            .kv
            .set_ex(&self.cursor_key(), &processed.to_string(), self.cursor_ttl)
            .await
        {
            Ok(()) => {
                metrics::set_latest_block_processed(&self.network.name, processed);
                tracing::info!(network = %self.network.name, block = processed, "block cursor advanced");
            }
            Err(err) => {
                tracing::warn!(network = %self.network.name, error = %err, "block cursor write failed");
            }
        }
    }

    /// 待处理区间 [min, max)
    pub async fn unprocessed_range(
        &self,
        after_block: Option<u64>,
        to_block: Option<u64>,
    ) -> ExplorerResult<(u64, u64)> {
        let mined = match to_block {
            Some(to) => to,
            None => self
                .get_block_head()
                .await?
                .saturating_sub(self.network.block_height_offset),
        };
        let processed = match after_block {
            Some(after) => after,
            None => self
                .processed_cursor()
                .await
                .unwrap_or_else(|| mined.saturating_sub(DEFAULT_LOOKBACK_BLOCKS)),
        };
        let min = if mined > processed { processed + 1 } else { mined + 1 };
        let max = (mined + 1).min(min + self.network.max_blocks_per_scan);
        Ok((min, max))
    }

    /// 扫描未处理区块并汇总涉及的地址
    ///
    /// 任一区块失败即整体失败，不返回部分结果。
    pub async fn get_latest_block(
        &self,
        after_block: Option<u64>,
        to_block: Option<u64>,
        include_inputs: bool,
        include_info: bool,
    ) -> ExplorerResult<LatestBlock> {
        let (min, max) = self.unprocessed_range(after_block, to_block).await?;
        tracing::debug!(network = %self.network.name, min, max, "scanning blocks");

        let fetched: Vec<ExplorerResult<(u64, Vec<Transfer>)>> = stream::iter(min..max)
            .map(|height| async move { self.get_block_txs(height).await.map(|txs| (height, txs)) })
            .buffer_unordered(self.block_workers)
            .collect()
            .await;

        let mut blocks: BTreeMap<u64, Vec<Transfer>> = BTreeMap::new();
        for result in fetched {
            let (height, txs) = result?;
            blocks.insert(height, txs);
        }
        let last_processed_block = first_gap(&blocks, min).saturating_sub(1);

        let transfers: Vec<Transfer> = blocks.into_values().flatten().collect();
        let latest = LatestBlock {
            addresses: collect_addresses(&transfers, include_inputs),
            info: if include_info {
                collect_info(&transfers, include_inputs)
            } else {
                BlockTxsInfo::default()
            },
            last_processed_block,
        };
        if max > min {
            self.advance_cursor(last_processed_block).await;
        }
        Ok(latest)
    }
}

/// 从 min 开始第一个缺失的高度
fn first_gap(blocks: &BTreeMap<u64, Vec<Transfer>>, min: u64) -> u64 {
    let mut next = min;
    while blocks.contains_key(&next) {
        next += 1;
    }
    next
}

/// 只保留涉及观察地址的记录，投影为地址历史并按方向过滤
pub fn project_history(
    address: &str,
    transfers: Vec<Transfer>,
    direction: Option<Direction>,
) -> Vec<AddressTx> {
    transfers
        .into_iter()
        .filter(|t| t.involves(address))
        .map(|t| AddressTx::from_transfer(address, t))
        .filter(|tx| direction.map_or(true, |d| tx.direction == d))
        .collect()
}

fn collect_addresses(transfers: &[Transfer], include_inputs: bool) -> BlockAddresses {
    let mut addresses = BlockAddresses::default();
    for t in transfers {
        if include_inputs && !t.from_address.is_empty() {
            addresses.input_addresses.insert(t.from_address.clone());
        }
        if !t.to_address.is_empty() {
            addresses.output_addresses.insert(t.to_address.clone());
        }
    }
    addresses
}

fn collect_info(transfers: &[Transfer], include_inputs: bool) -> BlockTxsInfo {
    let mut info = BlockTxsInfo::default();
    for t in transfers.iter().filter(|t| !t.is_self_transfer()) {
        let entry = || BlockTxInfo {
            tx_hash: t.tx_hash.clone(),
            value: t.value.abs(),
            contract_address: t.token.clone(),
            block_height: t.block_height,
            symbol: t.symbol.clone(),
        };
        if include_inputs && !t.from_address.is_empty() {
            let list = info
                .outgoing_txs
                .entry(t.from_address.clone())
                .or_default()
                .entry(t.symbol.clone())
                .or_default();
            match list.iter_mut().find(|e| e.tx_hash == t.tx_hash) {
                Some(existing) => existing.value += t.value.abs(),
                None => list.push(entry()),
            }
        }
        if !t.to_address.is_empty() {
            info.incoming_txs
                .entry(t.to_address.clone())
                .or_default()
                .entry(t.symbol.clone())
                .or_default()
                .push(entry());
        }
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TxMeta;

    fn transfer(hash: &str, from: &str, to: &str, value: i64) -> Transfer {
        let mut meta = TxMeta::new(hash);
        meta.block_height = Some(10);
        Transfer::from_meta(&meta, from, to, Decimal::from(value), "ETH", None)
    }

    #[test]
    fn test_outgoing_duplicates_are_summed() {
        let transfers = vec![
            transfer("h1", "A", "B", 1),
            transfer("h1", "A", "C", 2),
            transfer("h2", "A", "A", 5),
        ];
        let info = collect_info(&transfers, true);
        let outgoing = &info.outgoing_txs["A"]["ETH"];
        assert_eq!(outgoing.len(), 1);
        assert_eq!(outgoing[0].value, Decimal::from(3));
        assert_eq!(info.incoming_txs["B"]["ETH"].len(), 1);
        assert!(!info.incoming_txs.contains_key("A"));
    }

    #[test]
    fn test_inputs_are_optional() {
        let transfers = vec![transfer("h1", "A", "B", 1)];
        let addresses = collect_addresses(&transfers, false);
        assert!(addresses.input_addresses.is_empty());
        assert!(addresses.output_addresses.contains("B"));
        assert!(collect_info(&transfers, false).outgoing_txs.is_empty());
    }

    #[test]
    fn test_history_projection_filters_foreign_entries() {
        let transfers = vec![
            transfer("h1", "A", "B", 1),
            transfer("h2", "B", "a", 2),
            transfer("h3", "C", "D", 3),
        ];
        let all = project_history("A", transfers.clone(), None);
        assert_eq!(all.len(), 2);
        let incoming = project_history("A", transfers, Some(Direction::Incoming));
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].hash, "h2");
    }

    #[test]
    fn test_first_gap() {
        let mut blocks = BTreeMap::new();
        blocks.insert(5, vec![]);
        blocks.insert(6, vec![]);
        blocks.insert(8, vec![]);
        assert_eq!(first_gap(&blocks, 5), 7);
        assert_eq!(first_gap(&BTreeMap::new(), 5), 5);
    }
}
