//! 面向调用方的批量查询服务
//!
//! 四个入口操作：
//! - `get_wallets_balance`：按网络分组，支持批量时一次查询，否则逐个查询并隔离失败
//! - `get_wallet_transactions`：按币种走代币或原生链路
//! - `get_transactions_details`：有界并发，限流重试一次，失败的哈希不出现在结果中
//! - `get_latest_block_addresses`：区块扫描，任何失败都上抛

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};

use tracing::Instrument;
use uuid::Uuid;

use crate::{
    config::BatchConfig,
    domain::{ContractInfo, Direction, TxDetails, WalletBalance, WalletTransaction},
    error::{ExplorerError, ExplorerResult},
    explorer::{ExplorerInterface, LatestBlock, ProviderRegistry},
    infrastructure::WorkerPool,
};

/// 单个哈希在批量详情查询中的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Pending,
    Fetching { attempt: u8 },
    RateLimited,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchEvent {
    Start,
    Success,
    RateLimited,
    Failure,
}

impl FetchState {
    /// 限流只允许重试一次；第二次限流即失败
    pub fn next(self, event: FetchEvent) -> FetchState {
        use FetchState::*;
        match (self, event) {
            (Pending, FetchEvent::Start) => Fetching { attempt: 1 },
            (RateLimited, FetchEvent::Start) => Fetching { attempt: 2 },
            (Fetching { .. }, FetchEvent::Success) => Succeeded,
            (Fetching { attempt: 1 }, FetchEvent::RateLimited) => RateLimited,
            (Fetching { .. }, FetchEvent::RateLimited | FetchEvent::Failure) => Failed,
            (Succeeded, _) => Succeeded,
            _ => Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FetchState::Succeeded | FetchState::Failed)
    }
}

pub struct BlockchainExplorer {
    registry: Arc<ProviderRegistry>,
    settings: BatchConfig,
}

impl BlockchainExplorer {
    pub fn new(registry: Arc<ProviderRegistry>, settings: BatchConfig) -> Self {
        Self { registry, settings }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// 显式网络优先，否则按地址格式识别
    fn resolve_network(&self, address: &str, network: Option<&str>) -> ExplorerResult<String> {
        match network {
            Some(network) => Ok(network.to_ascii_uppercase()),
            None => self
                .registry
                .detect_network(address)
                .ok_or_else(|| ExplorerError::InvalidAddress {
                    network: "UNKNOWN".into(),
                    address: address.to_string(),
                }),
        }
    }

    /// 币种为代币时返回合约；原生币为 None；该网络上未知的币种报错
    fn resolve_contract(
        &self,
        interface: &ExplorerInterface,
        currency: &str,
    ) -> ExplorerResult<Option<ContractInfo>> {
        let network = interface.network();
        if currency.eq_ignore_ascii_case(&network.symbol) {
            return Ok(None);
        }
        self.registry
            .contracts()
            .resolve(&network.name, &currency.to_ascii_uppercase(), None)
            .map(Some)
            .ok_or_else(|| ExplorerError::UnsupportedCurrency {
                network: network.name.clone(),
                currency: currency.to_ascii_uppercase(),
            })
    }

    // ============ 余额 ============

    /// 按地址返回余额；查询失败的地址不出现在结果中
    pub async fn get_wallets_balance(
        &self,
        addresses: &[String],
        currency: &str,
        network: Option<&str>,
    ) -> HashMap<String, WalletBalance> {
        let span = tracing::info_span!(
            "wallets_balance",
            request_id = %Uuid::new_v4(),
            currency = %currency,
            addresses = addresses.len()
        );
        self.wallets_balance(addresses, currency, network)
            .instrument(span)
            .await
    }

    async fn wallets_balance(
        &self,
        addresses: &[String],
        currency: &str,
        network: Option<&str>,
    ) -> HashMap<String, WalletBalance> {
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for address in addresses {
            match self.resolve_network(address, network) {
                Ok(network) => groups.entry(network).or_default().push(address.clone()),
                Err(err) => tracing::warn!(address = %address, error = %err, "skipping address"),
            }
        }

        let symbol = currency.to_ascii_uppercase();
        let mut balances = HashMap::new();
        for (network, group) in groups {
            let interface = match self.registry.interface(&network) {
                Ok(interface) => interface,
                Err(err) => {
                    tracing::warn!(network = %network, error = %err, "skipping balance group");
                    continue;
                }
            };
            let contract = match self.resolve_contract(&interface, currency) {
                Ok(contract) => contract,
                Err(err) => {
                    tracing::warn!(network = %network, error = %err, "skipping balance group");
                    continue;
                }
            };

            if contract.is_none() && interface.balance_batch_size().is_some() {
                match interface.get_balances(&group).await {
                    Ok(batch) => {
                        for (address, balance) in batch {
                            let record = WalletBalance::from_balance(address.clone(), symbol.clone(), balance);
                            balances.insert(address, record);
                        }
                        continue;
                    }
                    Err(err) => {
                        tracing::warn!(network = %network, error = %err, "batch balance failed, querying one by one");
                    }
                }
            }

            for address in group {
                let result = match &contract {
                    Some(contract) => interface.get_token_balance(&address, contract).await,
                    None => interface.get_balance(&address).await,
                };
                match result {
                    Ok(balance) => {
                        let record = WalletBalance::from_balance(address.clone(), symbol.clone(), balance);
                        balances.insert(address, record);
                    }
                    Err(err) => {
                        tracing::warn!(network = %network, address = %address, error = %err, "balance failed");
                    }
                }
            }
        }
        balances
    }

    // ============ 地址历史 ============

    pub async fn get_wallet_transactions(
        &self,
        address: &str,
        currency: &str,
        network: Option<&str>,
        direction: Option<Direction>,
    ) -> ExplorerResult<Vec<WalletTransaction>> {
        let network = self.resolve_network(address, network)?;
        let interface = self.registry.interface(&network)?;
        let canonical = interface.canonical(address)?;
        let contract = self.resolve_contract(&interface, currency)?;

        let txs = match &contract {
            Some(contract) => interface.get_token_txs(&canonical, contract, direction).await?,
            None => interface.get_address_txs(&canonical, direction).await?,
        };
        let min_valid = interface.network().min_valid_tx_amount;
        let contract_address = contract.as_ref().map(|c| c.address.as_str());

        Ok(txs
            .into_iter()
            .filter(|tx| match tx.direction {
                Direction::Incoming => {
                    tx.to_address.eq_ignore_ascii_case(&canonical)
                        && !tx.from_address.eq_ignore_ascii_case(&tx.to_address)
                }
                Direction::Outgoing => tx.from_address.eq_ignore_ascii_case(&canonical),
            })
            .map(|tx| WalletTransaction::from_address_tx(&canonical, tx, min_valid, contract_address))
            .collect())
    }

    // ============ 交易详情 ============

    /// 批量查询交易详情，结果按哈希索引
    ///
    /// 最终失败的哈希不出现在结果中；成功但链上失败的交易以 `success = false` 返回。
    pub async fn get_transactions_details(
        &self,
        hashes: &[String],
        network: &str,
        currency: Option<&str>,
    ) -> ExplorerResult<HashMap<String, TxDetails>> {
        let interface = self.registry.interface(network)?;
        let contract = match currency {
            Some(currency) => self.resolve_contract(&interface, currency)?,
            None => None,
        };
        let span = tracing::info_span!(
            "transactions_details",
            request_id = %Uuid::new_v4(),
            network = %interface.network().name,
            hashes = hashes.len()
        );

        async {
            let pool = WorkerPool::new(self.settings.workers);
            let details = pool
                .run_keyed(hashes.iter().cloned(), |hash| {
                    let interface = interface.clone();
                    let contract = contract.clone();
                    async move { self.fetch_details(&interface, &hash, contract.as_ref()).await }
                })
                .await;
            tracing::info!(requested = hashes.len(), fetched = details.len(), "details batch finished");
            Ok(details)
        }
        .instrument(span)
        .await
    }

    async fn fetch_details(
        &self,
        interface: &ExplorerInterface,
        hash: &str,
        contract: Option<&ContractInfo>,
    ) -> Option<TxDetails> {
        let backoff = Duration::from_millis(self.settings.rate_limit_backoff_ms);
        let mut state = FetchState::Pending;
        let mut details = None;
        loop {
            state = match state {
                FetchState::Pending | FetchState::RateLimited => state.next(FetchEvent::Start),
                FetchState::Fetching { attempt } => {
                    let event = match self.fetch_once(interface, hash, contract).await {
                        Ok(found) => {
                            details = Some(found);
                            FetchEvent::Success
                        }
                        Err(err) if err.is_rate_limit() => {
                            tracing::warn!(hash, attempt, error = %err, "details rate limited");
                            FetchEvent::RateLimited
                        }
                        Err(err) => {
                            tracing::warn!(hash, attempt, error = %err, "details failed");
                            FetchEvent::Failure
                        }
                    };
                    let next = state.next(event);
                    if next == FetchState::RateLimited {
                        tokio::time::sleep(backoff).await;
                    }
                    next
                }
                FetchState::Succeeded => return details,
                FetchState::Failed => return None,
            };
        }
    }

    /// 代币详情失败（非限流）时按配置改走原生详情
    async fn fetch_once(
        &self,
        interface: &ExplorerInterface,
        hash: &str,
        contract: Option<&ContractInfo>,
    ) -> ExplorerResult<TxDetails> {
        let Some(contract) = contract else {
            return interface.get_tx_details(hash).await;
        };
        match interface.get_token_tx_details(hash, contract).await {
            Err(err) if !err.is_rate_limit() && self.settings.retry_with_main_api => {
                tracing::debug!(hash, error = %err, "token details failed, retrying with main api");
                interface.get_tx_details(hash).await
            }
            other => other,
        }
    }

    /// 按哈希计算相对地址的有符号值
    pub async fn get_wallet_transactions_by_hash(
        &self,
        address: &str,
        hashes: &[String],
        currency: &str,
        network: Option<&str>,
    ) -> ExplorerResult<Vec<WalletTransaction>> {
        let network = self.resolve_network(address, network)?;
        let interface = self.registry.interface(&network)?;
        let canonical = interface.canonical(address)?;
        let contract = self.resolve_contract(&interface, currency)?;
        let symbol = currency.to_ascii_uppercase();

        let details = self
            .get_transactions_details(hashes, &network, Some(currency))
            .await?;
        let mut txs: Vec<WalletTransaction> = details
            .into_iter()
            .map(|(hash, details)| WalletTransaction {
                address: canonical.clone(),
                from_address: details.sender_addresses(),
                block: details.block,
                hash,
                timestamp: details.date,
                value: details.value_for(&[canonical.as_str()], &symbol),
                confirmations: details.confirmations,
                is_double_spend: false,
                details: None,
                tag: details.memo.clone(),
                contract_address: contract.as_ref().map(|c| c.address.clone()),
            })
            .collect();
        txs.sort_by(|a, b| a.hash.cmp(&b.hash));
        Ok(txs)
    }

    // ============ 区块 ============

    pub async fn get_latest_block_addresses(
        &self,
        network: &str,
        after_block: Option<u64>,
        to_block: Option<u64>,
        include_inputs: bool,
        include_info: bool,
    ) -> ExplorerResult<LatestBlock> {
        let interface = self.registry.interface(network)?;
        interface
            .get_latest_block(after_block, to_block, include_inputs, include_info)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_retries_once() {
        let state = FetchState::Pending.next(FetchEvent::Start);
        assert_eq!(state, FetchState::Fetching { attempt: 1 });
        let state = state.next(FetchEvent::RateLimited);
        assert_eq!(state, FetchState::RateLimited);
        let state = state.next(FetchEvent::Start);
        assert_eq!(state, FetchState::Fetching { attempt: 2 });
        assert_eq!(state.next(FetchEvent::RateLimited), FetchState::Failed);
        assert_eq!(state.next(FetchEvent::Success), FetchState::Succeeded);
    }

    #[test]
    fn test_failure_is_terminal() {
        let state = FetchState::Pending
            .next(FetchEvent::Start)
            .next(FetchEvent::Failure);
        assert_eq!(state, FetchState::Failed);
        assert!(state.is_terminal());
        assert_eq!(state.next(FetchEvent::Start), FetchState::Failed);
        assert!(!FetchState::RateLimited.is_terminal());
    }
}
