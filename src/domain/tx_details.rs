//! 交易详情投影
//!
//! 由聚合后的转账列表构建；空列表对应 `success = false`，
//! 表示"确认不存在"，与批量结果中缺失的条目区分开。
//! UTXO 净额结算产生的单边条目（只有发送方或只有接收方）投影为输入/输出。

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Transfer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    MainCoin,
    Token,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferEntry {
    pub kind: TransferKind,
    pub symbol: String,
    pub from: String,
    pub to: String,
    pub value: Decimal,
    pub is_valid: bool,
    pub token: Option<String>,
    pub memo: Option<String>,
}

/// UTXO 输入/输出条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IoEntry {
    pub address: String,
    pub symbol: String,
    pub value: Decimal,
    pub is_valid: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxDetails {
    pub hash: Option<String>,
    pub success: bool,
    pub block: Option<u64>,
    pub date: Option<DateTime<Utc>>,
    pub fees: Option<Decimal>,
    pub memo: Option<String>,
    pub confirmations: u64,
    pub inputs: Vec<IoEntry>,
    pub outputs: Vec<IoEntry>,
    pub transfers: Vec<TransferEntry>,
}

impl TxDetails {
    pub fn failed() -> Self {
        Self {
            hash: None,
            success: false,
            block: None,
            date: None,
            fees: None,
            memo: None,
            confirmations: 0,
            inputs: Vec::new(),
            outputs: Vec::new(),
            transfers: Vec::new(),
        }
    }

    /// 从聚合后的转账列表构建；from == to 的转账不出现在结果中
    pub fn from_transfers(transfers: &[Transfer]) -> Self {
        let Some(first) = transfers.first() else {
            return Self::failed();
        };

        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        let mut legs = Vec::new();
        for t in transfers.iter().filter(|t| !t.is_self_transfer()) {
            match (t.from_address.is_empty(), t.to_address.is_empty()) {
                // 发送方净支出，值为正
                (false, true) => inputs.push(IoEntry {
                    address: t.from_address.clone(),
                    symbol: t.symbol.clone(),
                    value: t.value.abs(),
                    is_valid: true,
                }),
                (true, false) => outputs.push(IoEntry {
                    address: t.to_address.clone(),
                    symbol: t.symbol.clone(),
                    value: t.value,
                    is_valid: true,
                }),
                _ => legs.push(t),
            }
        }

        let entries = legs
            .into_iter()
            .map(|t| TransferEntry {
                kind: if t.is_token() {
                    TransferKind::Token
                } else {
                    TransferKind::MainCoin
                },
                symbol: t.symbol.clone(),
                from: t.from_address.clone(),
                to: t.to_address.clone(),
                value: t.value,
                is_valid: true,
                token: t.token.clone(),
                memo: t.memo.clone(),
            })
            .collect();

        Self {
            hash: Some(first.tx_hash.clone()),
            success: first.success,
            block: first.block_height,
            date: first.date,
            fees: first.tx_fee,
            memo: first.memo.clone(),
            confirmations: first.confirmations,
            inputs,
            outputs,
            transfers: entries,
        }
    }

    /// 相对一组地址的有符号值
    ///
    /// 失败交易为零；命中的第一个输入取负后停止扫描输入，
    /// 输出累加，转账按 from/to 赋 ±value。
    pub fn value_for(&self, addresses: &[&str], symbol: &str) -> Decimal {
        if !self.success {
            return Decimal::ZERO;
        }
        let matches = |addr: &str| addresses.iter().any(|a| a.eq_ignore_ascii_case(addr));
        let mut value = Decimal::ZERO;

        for input in &self.inputs {
            if input.is_valid && input.symbol.eq_ignore_ascii_case(symbol) && matches(&input.address) {
                value = -input.value;
                break;
            }
        }
        for output in &self.outputs {
            if output.is_valid && output.symbol.eq_ignore_ascii_case(symbol) && matches(&output.address) {
                value += output.value;
            }
        }
        for transfer in &self.transfers {
            if !transfer.is_valid || !transfer.symbol.eq_ignore_ascii_case(symbol) {
                continue;
            }
            if matches(&transfer.from) {
                value = -transfer.value.abs();
            } else if matches(&transfer.to) {
                value = transfer.value.abs();
            }
        }
        value
    }

    /// 按出现顺序去重的发送方列表
    pub fn sender_addresses(&self) -> Vec<String> {
        let mut senders: Vec<String> = Vec::new();
        let candidates = self
            .inputs
            .iter()
            .map(|i| i.address.as_str())
            .chain(self.transfers.iter().map(|t| t.from.as_str()));
        for addr in candidates {
            if !addr.is_empty() && !senders.iter().any(|s| s.eq_ignore_ascii_case(addr)) {
                senders.push(addr.to_string());
            }
        }
        senders
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::domain::TxMeta;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_empty_transfer_list_is_failed() {
        let details = TxDetails::from_transfers(&[]);
        assert!(!details.success);
        assert!(details.hash.is_none());
        assert_eq!(details.value_for(&["A"], "ETH"), Decimal::ZERO);
    }

    #[test]
    fn test_self_transfers_are_omitted() {
        let meta = TxMeta::new("0x1");
        let transfers = vec![
            Transfer::from_meta(&meta, "A", "A", dec("1"), "ETH", None),
            Transfer::from_meta(&meta, "A", "B", dec("2"), "ETH", None),
        ];
        let details = TxDetails::from_transfers(&transfers);
        assert!(details.success);
        assert_eq!(details.transfers.len(), 1);
        assert_eq!(details.transfers[0].to, "B");
    }

    #[test]
    fn test_value_for_transfer_direction() {
        let meta = TxMeta::new("0x1");
        let transfers = vec![Transfer::from_meta(&meta, "A", "B", dec("2"), "ETH", None)];
        let details = TxDetails::from_transfers(&transfers);
        assert_eq!(details.value_for(&["a"], "ETH"), dec("-2"));
        assert_eq!(details.value_for(&["b"], "eth"), dec("2"));
        assert_eq!(details.value_for(&["C"], "ETH"), Decimal::ZERO);
        assert_eq!(details.value_for(&["B"], "USDT"), Decimal::ZERO);
    }

    #[test]
    fn test_netted_utxo_legs_become_inputs_and_outputs() {
        let meta = TxMeta::new("ab01");
        let transfers = vec![
            Transfer::from_meta(&meta, "A", "", dec("-3"), "BTC", None),
            Transfer::from_meta(&meta, "", "B", dec("3"), "BTC", None),
        ];
        let details = TxDetails::from_transfers(&transfers);
        assert!(details.transfers.is_empty());
        assert_eq!(details.inputs.len(), 1);
        assert_eq!(details.inputs[0].value, dec("3"));
        assert_eq!(details.outputs[0].address, "B");
        assert_eq!(details.value_for(&["A"], "BTC"), dec("-3"));
        assert_eq!(details.value_for(&["B"], "BTC"), dec("3"));
        assert_eq!(details.sender_addresses(), vec!["A".to_string()]);
    }

    #[test]
    fn test_value_for_inputs_and_outputs() {
        let mut details = TxDetails::failed();
        details.success = true;
        details.inputs.push(IoEntry {
            address: "A".into(),
            symbol: "BTC".into(),
            value: dec("5"),
            is_valid: true,
        });
        details.outputs.push(IoEntry {
            address: "A".into(),
            symbol: "BTC".into(),
            value: dec("2"),
            is_valid: true,
        });
        assert_eq!(details.value_for(&["A"], "BTC"), dec("-3"));
        assert_eq!(details.sender_addresses(), vec!["A".to_string()]);
    }
}
