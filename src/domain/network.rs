//! 网络与代币合约元数据
//!
//! 启动时由配置构建，运行期只读。

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 已知的无效/销毁发送地址（账户模型链）
pub const DEFAULT_INVALID_SENDERS: &[&str] = &[
    "0x70Fd2842096f451150c5748a30e39b64e35A3CdF",
    "0x491fe5F4724e642C90372B0B95b60c4aC8d13F1c",
    "0xB256caa23992e461E277CfA44a2FD72E2d6d2344",
    "0x06cC26db08674CbD9FF4d52444712E23cA3d046d",
    "0x4752B9bD4E73E2f52323E18137F0E66CDDF3f6C9",
];

/// 账本模型，决定交易详情的聚合方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerModel {
    Utxo,
    Account,
    Memo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub name: String,
    pub symbol: String,
    pub precision: u32,
    /// 粉尘阈值：低于该值的输入/输出在合并前丢弃
    pub min_valid_tx_amount: Decimal,
    pub model: LedgerModel,
    /// 扫块时与链头保持的距离
    pub block_height_offset: u64,
    /// 单次扫块的最大区块数
    pub max_blocks_per_scan: u64,
    /// 提现对账的回溯窗口（小时）
    pub withdrawal_window_hours: i64,
    pub invalid_senders: Vec<String>,
}

impl NetworkInfo {
    pub fn new(name: impl Into<String>, symbol: impl Into<String>, precision: u32, model: LedgerModel) -> Self {
        Self {
            name: name.into(),
            symbol: symbol.into(),
            precision,
            min_valid_tx_amount: Decimal::ZERO,
            model,
            block_height_offset: 0,
            max_blocks_per_scan: 100,
            withdrawal_window_hours: 3,
            invalid_senders: DEFAULT_INVALID_SENDERS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_min_valid_tx_amount(mut self, amount: Decimal) -> Self {
        self.min_valid_tx_amount = amount;
        self
    }

    pub fn is_invalid_sender(&self, address: &str) -> bool {
        self.invalid_senders
            .iter()
            .any(|s| s.eq_ignore_ascii_case(address))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractInfo {
    pub network: String,
    pub symbol: String,
    pub address: String,
    pub decimals: u32,
    /// 伪网络合约：以独立网络名对外暴露的代币
    #[serde(default)]
    pub pseudo_network: bool,
}

/// 代币合约注册表（网络 -> 币种 -> 合约）
#[derive(Debug, Clone, Default)]
pub struct ContractRegistry {
    by_network: HashMap<String, HashMap<String, ContractInfo>>,
    pseudo: HashMap<String, ContractInfo>,
}

impl ContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_contracts(contracts: impl IntoIterator<Item = ContractInfo>) -> Self {
        let mut registry = Self::new();
        for contract in contracts {
            registry.register(contract);
        }
        registry
    }

    pub fn register(&mut self, contract: ContractInfo) {
        if contract.pseudo_network {
            self.pseudo
                .insert(contract.address.to_ascii_lowercase(), contract.clone());
        }
        self.by_network
            .entry(contract.network.clone())
            .or_default()
            .insert(contract.symbol.to_ascii_uppercase(), contract);
    }

    pub fn contract(&self, network: &str, symbol: &str) -> Option<&ContractInfo> {
        self.by_network
            .get(network)
            .and_then(|m| m.get(&symbol.to_ascii_uppercase()))
    }

    pub fn by_address(&self, network: &str, address: &str) -> Option<&ContractInfo> {
        self.by_network.get(network).and_then(|m| {
            m.values()
                .find(|c| c.address.eq_ignore_ascii_case(address))
        })
    }

    pub fn contracts(&self, network: &str) -> Vec<&ContractInfo> {
        let mut list: Vec<&ContractInfo> = self
            .by_network
            .get(network)
            .map(|m| m.values().collect())
            .unwrap_or_default();
        list.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        list
    }

    /// 该币种在该网络上是代币（而非原生币）
    pub fn is_token(&self, network: &str, symbol: &str) -> bool {
        self.contract(network, symbol).is_some()
    }

    /// 解析查询所需的合约；显式给出的伪网络合约地址优先
    pub fn resolve(
        &self,
        network: &str,
        symbol: &str,
        contract_address: Option<&str>,
    ) -> Option<ContractInfo> {
        if let Some(address) = contract_address {
            if let Some(info) = self.pseudo.get(&address.to_ascii_lowercase()) {
                return Some(info.clone());
            }
            if let Some(info) = self.by_address(network, address) {
                return Some(info.clone());
            }
        }
        self.contract(network, symbol).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usdt(network: &str, address: &str, pseudo: bool) -> ContractInfo {
        ContractInfo {
            network: network.into(),
            symbol: "USDT".into(),
            address: address.into(),
            decimals: 6,
            pseudo_network: pseudo,
        }
    }

    #[test]
    fn test_lookup_by_symbol_and_address() {
        let registry = ContractRegistry::from_contracts(vec![usdt(
            "ETH",
            "0xdAC17F958D2ee523a2206206994597C13D831ec7",
            false,
        )]);
        assert!(registry.is_token("ETH", "usdt"));
        assert!(!registry.is_token("ETH", "ETH"));
        assert!(registry
            .by_address("ETH", "0xdac17f958d2ee523a2206206994597c13d831ec7")
            .is_some());
        assert_eq!(registry.contracts("ETH").len(), 1);
        assert!(registry.contracts("BTC").is_empty());
    }

    #[test]
    fn test_resolve_prefers_pseudo_network_contract() {
        let registry = ContractRegistry::from_contracts(vec![
            usdt("TON", "EQ-main", false),
            ContractInfo {
                network: "TON".into(),
                symbol: "NOT".into(),
                address: "EQ-pseudo".into(),
                decimals: 9,
                pseudo_network: true,
            },
        ]);
        let resolved = registry.resolve("TON", "USDT", Some("eq-pseudo")).unwrap();
        assert_eq!(resolved.symbol, "NOT");
        let resolved = registry.resolve("TON", "USDT", None).unwrap();
        assert_eq!(resolved.address, "EQ-main");
    }

    #[test]
    fn test_invalid_sender_is_case_insensitive() {
        let info = NetworkInfo::new("ETH", "ETH", 18, LedgerModel::Account);
        assert!(info.is_invalid_sender("0x70fd2842096f451150c5748a30e39b64e35a3cdf"));
        assert!(!info.is_invalid_sender("0x0000000000000000000000000000000000000001"));
    }
}
