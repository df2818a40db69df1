//! 面向调用方的钱包交易模型

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Transfer;

/// 相对观察地址的方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Incoming => "incoming",
            Direction::Outgoing => "outgoing",
        }
    }

    /// to == address 且 from != address 为转入，其余为转出
    pub fn of(transfer: &Transfer, address: &str) -> Self {
        if transfer.to_address.eq_ignore_ascii_case(address)
            && !transfer.from_address.eq_ignore_ascii_case(address)
        {
            Direction::Incoming
        } else {
            Direction::Outgoing
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "incoming" => Ok(Direction::Incoming),
            "outgoing" => Ok(Direction::Outgoing),
            other => Err(format!("unknown direction: {}", other)),
        }
    }
}

/// 地址历史中的一条记录（编排层对单个地址的投影）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressTx {
    pub address: String,
    pub symbol: String,
    pub amount: Decimal,
    pub from_address: String,
    pub to_address: String,
    pub hash: String,
    pub block: Option<u64>,
    pub date: Option<DateTime<Utc>>,
    pub memo: Option<String>,
    pub confirmations: u64,
    pub direction: Direction,
    pub contract_address: Option<String>,
    pub raw: Option<serde_json::Value>,
}

impl AddressTx {
    pub fn from_transfer(address: &str, transfer: Transfer) -> Self {
        let direction = Direction::of(&transfer, address);
        Self {
            address: address.to_string(),
            symbol: transfer.symbol,
            amount: transfer.value,
            from_address: transfer.from_address,
            to_address: transfer.to_address,
            hash: transfer.tx_hash,
            block: transfer.block_height,
            date: transfer.date,
            memo: transfer.memo,
            confirmations: transfer.confirmations,
            direction,
            contract_address: transfer.token,
            raw: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub address: String,
    /// 按出现顺序排列的发送方
    pub from_address: Vec<String>,
    pub block: Option<u64>,
    pub hash: String,
    pub timestamp: Option<DateTime<Utc>>,
    /// 相对 address 的有符号值，负数为转出；
    /// 为零表示没有匹配的输入/输出/转账，不是错误
    pub value: Decimal,
    pub confirmations: u64,
    pub is_double_spend: bool,
    pub details: Option<serde_json::Value>,
    pub tag: Option<String>,
    pub contract_address: Option<String>,
}

impl WalletTransaction {
    /// 地址历史记录 -> 钱包交易
    ///
    /// 转出且为正值的记录取负；绝对值低于最小有效金额的记录值置零。
    pub fn from_address_tx(
        address: &str,
        tx: AddressTx,
        min_valid_tx_amount: Decimal,
        contract_address: Option<&str>,
    ) -> Self {
        let mut value = tx.amount;
        if tx.direction == Direction::Outgoing && value > Decimal::ZERO {
            value = -value;
        }
        if value.abs() < min_valid_tx_amount {
            value = Decimal::ZERO;
        }
        let from_address = if tx.from_address.is_empty() {
            Vec::new()
        } else {
            vec![tx.from_address]
        };
        Self {
            address: address.to_string(),
            from_address,
            block: tx.block,
            hash: tx.hash,
            timestamp: tx.date,
            value,
            confirmations: tx.confirmations,
            is_double_spend: false,
            details: tx.raw,
            tag: tx.memo,
            contract_address: contract_address.map(str::to_string).or(tx.contract_address),
        }
    }
}
