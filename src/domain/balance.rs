use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 地址余额；校验失败时两项均为零，不传播部分可信的数据
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Balance {
    pub balance: Decimal,
    /// 有符号，负数表示待确认的支出
    pub unconfirmed_balance: Decimal,
}

impl Balance {
    pub fn new(balance: Decimal, unconfirmed_balance: Decimal) -> Self {
        Self {
            balance,
            unconfirmed_balance,
        }
    }

    pub fn zero() -> Self {
        Self::default()
    }
}

/// 批量余额查询对调用方的输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletBalance {
    pub address: String,
    pub symbol: String,
    pub balance: Decimal,
    pub unconfirmed_balance: Decimal,
    pub received: Decimal,
    pub sent: Decimal,
    pub rewarded: Decimal,
}

impl WalletBalance {
    pub fn from_balance(address: impl Into<String>, symbol: impl Into<String>, balance: Balance) -> Self {
        Self {
            address: address.into(),
            symbol: symbol.into(),
            balance: balance.balance,
            unconfirmed_balance: balance.unconfirmed_balance,
            received: balance.balance,
            sent: Decimal::ZERO,
            rewarded: Decimal::ZERO,
        }
    }
}
