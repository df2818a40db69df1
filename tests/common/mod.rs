//! 测试辅助模块
//! 提供脚本化适配器与注册表构建函数

#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    str::FromStr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use ironscan::{
    domain::{
        Balance, ContractInfo, ContractRegistry, DefaultAddressCodec, Direction, LedgerModel,
        NetworkInfo, Transfer, TxMeta,
    },
    error::{ExplorerError, ExplorerResult},
    explorer::{ExplorerInterface, ProviderRegistry},
    infrastructure::{KvStore, MemoryKv},
    providers::{
        AdapterFlags, Capability, ExplorerAdapter, ParserContext, ResponseKind, ResponseValidator,
    },
};
use rust_decimal::Decimal;
use serde_json::Value;

pub const ALICE: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
pub const BOB: &str = "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359";
pub const USDT: &str = "0xdAC17F958D2ee523a2206206994597C13D831ec7";

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

pub fn eth_network() -> NetworkInfo {
    NetworkInfo::new("ETH", "ETH", 18, LedgerModel::Account).with_min_valid_tx_amount(dec("0.000001"))
}

pub fn usdt() -> ContractInfo {
    ContractInfo {
        network: "ETH".into(),
        symbol: "USDT".into(),
        address: USDT.into(),
        decimals: 6,
        pseudo_network: false,
    }
}

pub fn contracts() -> Arc<ContractRegistry> {
    Arc::new(ContractRegistry::from_contracts(vec![usdt()]))
}

pub fn context() -> ParserContext {
    ParserContext::new(eth_network(), contracts(), Arc::new(DefaultAddressCodec::default()))
}

pub fn transfer(hash: &str, from: &str, to: &str, value: &str) -> Transfer {
    let mut meta = TxMeta::new(hash);
    meta.block_height = Some(100);
    Transfer::from_meta(&meta, from, to, dec(value), "ETH", None)
}

pub fn token_transfer(hash: &str, from: &str, to: &str, value: &str, secs: i64) -> Transfer {
    let mut meta = TxMeta::new(hash);
    meta.date = chrono::DateTime::from_timestamp(secs, 0);
    Transfer::from_meta(&meta, from, to, dec(value), "USDT", Some(USDT.to_string()))
}

/// 队列中最后一个结果会被重复返回
type Script<T> = Mutex<VecDeque<ExplorerResult<T>>>;

fn pop<T: Clone>(script: &Script<T>, name: &str, operation: &str) -> ExplorerResult<T> {
    let mut queue = script.lock().unwrap();
    match queue.len() {
        0 => Err(ExplorerError::not_implemented(name, operation)),
        1 => queue[0].clone(),
        _ => queue.pop_front().unwrap(),
    }
}

fn keyed<T: Clone>(
    scripts: &Mutex<HashMap<String, VecDeque<ExplorerResult<T>>>>,
    key: &str,
    name: &str,
    operation: &str,
) -> ExplorerResult<T> {
    let mut scripts = scripts.lock().unwrap();
    match scripts.get_mut(key) {
        Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
        Some(queue) if queue.len() == 1 => queue[0].clone(),
        _ => Err(ExplorerError::unexpected(name, format!("no script for {}", key))),
    }
}

/// 按脚本返回结果的适配器
pub struct ScriptedAdapter {
    name: String,
    context: ParserContext,
    flags: AdapterFlags,
    calls: AtomicUsize,
    balance: Script<Balance>,
    balances: Script<Vec<(String, Balance)>>,
    token_balance: Script<Balance>,
    details: Mutex<HashMap<String, VecDeque<ExplorerResult<Vec<Transfer>>>>>,
    token_details: Mutex<HashMap<String, VecDeque<ExplorerResult<Vec<Transfer>>>>>,
    address_txs: Script<Vec<Transfer>>,
    token_txs: Script<Vec<Transfer>>,
    blocks: Mutex<HashMap<String, VecDeque<ExplorerResult<Vec<Transfer>>>>>,
    head: Script<u64>,
    settlement: Mutex<HashMap<String, Option<String>>>,
}

impl ScriptedAdapter {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            context: context(),
            flags: AdapterFlags::default(),
            calls: AtomicUsize::new(0),
            balance: Mutex::default(),
            balances: Mutex::default(),
            token_balance: Mutex::default(),
            details: Mutex::default(),
            token_details: Mutex::default(),
            address_txs: Mutex::default(),
            token_txs: Mutex::default(),
            blocks: Mutex::default(),
            head: Mutex::default(),
            settlement: Mutex::default(),
        }
    }

    pub fn with_batch(mut self, max: usize) -> Self {
        self.flags = AdapterFlags {
            supports_balance_batch: true,
            max_balance_batch: max,
        };
        self
    }

    pub fn balance(self, result: ExplorerResult<Balance>) -> Self {
        self.balance.lock().unwrap().push_back(result);
        self
    }

    pub fn balances(self, result: ExplorerResult<Vec<(String, Balance)>>) -> Self {
        self.balances.lock().unwrap().push_back(result);
        self
    }

    pub fn token_balance(self, result: ExplorerResult<Balance>) -> Self {
        self.token_balance.lock().unwrap().push_back(result);
        self
    }

    pub fn details(self, hash: &str, result: ExplorerResult<Vec<Transfer>>) -> Self {
        self.details
            .lock()
            .unwrap()
            .entry(hash.to_string())
            .or_default()
            .push_back(result);
        self
    }

    pub fn token_details(self, hash: &str, result: ExplorerResult<Vec<Transfer>>) -> Self {
        self.token_details
            .lock()
            .unwrap()
            .entry(hash.to_string())
            .or_default()
            .push_back(result);
        self
    }

    pub fn address_txs(self, result: ExplorerResult<Vec<Transfer>>) -> Self {
        self.address_txs.lock().unwrap().push_back(result);
        self
    }

    pub fn token_txs(self, result: ExplorerResult<Vec<Transfer>>) -> Self {
        self.token_txs.lock().unwrap().push_back(result);
        self
    }

    pub fn block(self, height: u64, result: ExplorerResult<Vec<Transfer>>) -> Self {
        self.blocks
            .lock()
            .unwrap()
            .entry(height.to_string())
            .or_default()
            .push_back(result);
        self
    }

    pub fn head(self, result: ExplorerResult<u64>) -> Self {
        self.head.lock().unwrap().push_back(result);
        self
    }

    pub fn settlement(self, hash: &str, resolved: Option<&str>) -> Self {
        self.settlement
            .lock()
            .unwrap()
            .insert(hash.to_string(), resolved.map(str::to_string));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn record(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl ResponseValidator for ScriptedAdapter {
    fn validate(&self, _raw: &Value, _kind: ResponseKind) -> bool {
        true
    }
}

#[async_trait]
impl ExplorerAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn context(&self) -> &ParserContext {
        &self.context
    }

    fn flags(&self) -> AdapterFlags {
        self.flags
    }

    async fn get_balance(&self, _address: &str) -> ExplorerResult<Balance> {
        self.record();
        pop(&self.balance, &self.name, "get_balance")
    }

    async fn get_balances(&self, addresses: &[String]) -> ExplorerResult<Vec<(String, Balance)>> {
        self.record();
        let all = pop(&self.balances, &self.name, "get_balances")?;
        Ok(all
            .into_iter()
            .filter(|(a, _)| addresses.contains(a))
            .collect())
    }

    async fn get_token_balance(&self, _address: &str, _contract: &ContractInfo) -> ExplorerResult<Balance> {
        self.record();
        pop(&self.token_balance, &self.name, "get_token_balance")
    }

    async fn get_tx_details(&self, hash: &str) -> ExplorerResult<Vec<Transfer>> {
        self.record();
        keyed(&self.details, hash, &self.name, "get_tx_details")
    }

    async fn get_token_tx_details(&self, hash: &str, _contract: &ContractInfo) -> ExplorerResult<Vec<Transfer>> {
        self.record();
        keyed(&self.token_details, hash, &self.name, "get_token_tx_details")
    }

    async fn get_address_txs(&self, _address: &str) -> ExplorerResult<Vec<Transfer>> {
        self.record();
        pop(&self.address_txs, &self.name, "get_address_txs")
    }

    async fn get_token_txs(
        &self,
        _address: &str,
        _contract: &ContractInfo,
        _direction: Option<Direction>,
    ) -> ExplorerResult<Vec<Transfer>> {
        self.record();
        pop(&self.token_txs, &self.name, "get_token_txs")
    }

    async fn get_block_txs(&self, height: u64) -> ExplorerResult<Vec<Transfer>> {
        self.record();
        keyed(&self.blocks, &height.to_string(), &self.name, "get_block_txs")
    }

    async fn get_block_head(&self) -> ExplorerResult<u64> {
        self.record();
        pop(&self.head, &self.name, "get_block_head")
    }

    async fn settlement_hash(&self, hash: &str) -> ExplorerResult<Option<String>> {
        self.record();
        Ok(self
            .settlement
            .lock()
            .unwrap()
            .get(hash)
            .cloned()
            .unwrap_or_else(|| Some(hash.to_string())))
    }
}

/// ETH 编排器，适配器按给定顺序进入对应能力链
pub fn interface(
    adapters: Vec<(Capability, Arc<ScriptedAdapter>)>,
    kv: Arc<dyn KvStore>,
) -> ExplorerInterface {
    let mut interface = ExplorerInterface::new(
        eth_network(),
        contracts(),
        Arc::new(DefaultAddressCodec::default()),
        kv,
    )
    .with_block_workers(3);
    for (capability, adapter) in adapters {
        interface.push_adapter(capability, adapter);
    }
    interface
}

pub fn registry(adapters: Vec<(Capability, Arc<ScriptedAdapter>)>) -> Arc<ProviderRegistry> {
    let mut registry = ProviderRegistry::new(contracts(), Arc::new(DefaultAddressCodec::default()));
    registry.register(interface(adapters, Arc::new(MemoryKv::new())));
    Arc::new(registry)
}

/// 同一适配器进入多条能力链
pub fn on(capabilities: &[Capability], adapter: &Arc<ScriptedAdapter>) -> Vec<(Capability, Arc<ScriptedAdapter>)> {
    capabilities.iter().map(|c| (*c, adapter.clone())).collect()
}
