//! 规范化转账模型
//!
//! `Transfer` 是从一笔交易中提取的一次有经济意义的价值转移。
//! 每次解析都会重新构造，返回后不可变，本层不做持久化。

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 同一交易内所有转账共享的元数据
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TxMeta {
    pub tx_hash: String,
    pub block_height: Option<u64>,
    pub block_hash: Option<String>,
    pub confirmations: u64,
    pub date: Option<DateTime<Utc>>,
    pub tx_fee: Option<Decimal>,
    pub success: bool,
    pub memo: Option<String>,
}

impl TxMeta {
    pub fn new(tx_hash: impl Into<String>) -> Self {
        Self {
            tx_hash: tx_hash.into(),
            success: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub tx_hash: String,
    /// 未知或无关一侧为空串
    pub from_address: String,
    pub to_address: String,
    /// 按精度换算后的数值，符号相对于方向而非绝对值
    pub value: Decimal,
    pub symbol: String,
    /// 合约地址；原生币为 None
    pub token: Option<String>,
    pub block_height: Option<u64>,
    pub block_hash: Option<String>,
    pub confirmations: u64,
    pub success: bool,
    pub date: Option<DateTime<Utc>>,
    pub tx_fee: Option<Decimal>,
    pub memo: Option<String>,
}

impl Transfer {
    pub fn from_meta(
        meta: &TxMeta,
        from_address: impl Into<String>,
        to_address: impl Into<String>,
        value: Decimal,
        symbol: impl Into<String>,
        token: Option<String>,
    ) -> Self {
        Self {
            tx_hash: meta.tx_hash.clone(),
            from_address: from_address.into(),
            to_address: to_address.into(),
            value,
            symbol: symbol.into(),
            token,
            block_height: meta.block_height,
            block_hash: meta.block_hash.clone(),
            confirmations: meta.confirmations,
            success: meta.success,
            date: meta.date,
            tx_fee: meta.tx_fee,
            memo: meta.memo.clone(),
        }
    }

    pub fn with_memo(mut self, memo: Option<String>) -> Self {
        self.memo = memo.filter(|m| !m.is_empty());
        self
    }

    pub fn is_token(&self) -> bool {
        self.token.is_some()
    }

    /// 发送方与接收方相同（大小写不敏感）
    pub fn is_self_transfer(&self) -> bool {
        !self.from_address.is_empty() && self.from_address.eq_ignore_ascii_case(&self.to_address)
    }

    pub fn involves(&self, address: &str) -> bool {
        self.from_address.eq_ignore_ascii_case(address)
            || self.to_address.eq_ignore_ascii_case(address)
    }
}
