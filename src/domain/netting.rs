//! 净额结算
//!
//! 把一笔交易的原始输入/输出（或逐对转账）合并为
//! 每个 (地址, 币种) 至多一条的有符号转账。
//!
//! 符号约定：输入为负，输出为正；找零输出加回发送方条目，
//! 净额为正的发送方翻转为纯接收方（from 为空）。

use std::collections::HashMap;

use rust_decimal::Decimal;

use super::{LedgerModel, NetworkInfo, Transfer, TxMeta};

/// 币种键：原生币与各代币互不合并
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CurrencyKey {
    pub symbol: String,
    pub token: Option<String>,
}

impl CurrencyKey {
    pub fn native(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            token: None,
        }
    }

    pub fn token(symbol: impl Into<String>, contract: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            token: Some(contract.into()),
        }
    }
}

/// 地址 -> 币种 -> 累计值，保留首次插入顺序
#[derive(Debug, Default)]
pub struct NettingLedger {
    totals: HashMap<String, HashMap<CurrencyKey, Decimal>>,
    order: Vec<(String, CurrencyKey)>,
}

impl NettingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_insert_zero(&mut self, address: &str, currency: &CurrencyKey) -> &mut Decimal {
        let per_address = self.totals.entry(address.to_string()).or_default();
        if !per_address.contains_key(currency) {
            self.order.push((address.to_string(), currency.clone()));
        }
        per_address.entry(currency.clone()).or_insert(Decimal::ZERO)
    }

    pub fn contains(&self, address: &str, currency: &CurrencyKey) -> bool {
        self.totals
            .get(address)
            .is_some_and(|m| m.contains_key(currency))
    }

    pub fn get(&self, address: &str, currency: &CurrencyKey) -> Option<Decimal> {
        self.totals.get(address).and_then(|m| m.get(currency)).copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// 按插入顺序取出全部条目
    pub fn into_entries(self) -> Vec<(String, CurrencyKey, Decimal)> {
        let Self { mut totals, order } = self;
        order
            .into_iter()
            .filter_map(|(address, currency)| {
                let value = totals.get_mut(&address)?.remove(&currency)?;
                Some((address, currency, value))
            })
            .collect()
    }
}

/// 一条原始输入或输出；value 为正的换算后金额
#[derive(Debug, Clone, PartialEq)]
pub struct Leg {
    pub address: String,
    pub currency: CurrencyKey,
    pub value: Decimal,
}

impl Leg {
    pub fn new(address: impl Into<String>, currency: CurrencyKey, value: Decimal) -> Self {
        Self {
            address: address.into(),
            currency,
            value,
        }
    }
}

/// UTXO 净额结算
///
/// 低于粉尘阈值的条目在合并前丢弃；地址为空的条目跳过。
pub fn net_legs(meta: &TxMeta, inputs: &[Leg], outputs: &[Leg], min_valid_tx_amount: Decimal) -> Vec<Transfer> {
    let mut senders = NettingLedger::new();
    let mut receivers = NettingLedger::new();

    for leg in inputs {
        if leg.address.is_empty() || leg.value < min_valid_tx_amount {
            continue;
        }
        *senders.get_or_insert_zero(&leg.address, &leg.currency) -= leg.value;
    }

    for leg in outputs {
        if leg.address.is_empty() || leg.value < min_valid_tx_amount {
            continue;
        }
        if senders.contains(&leg.address, &leg.currency) {
            *senders.get_or_insert_zero(&leg.address, &leg.currency) += leg.value;
        } else {
            *receivers.get_or_insert_zero(&leg.address, &leg.currency) += leg.value;
        }
    }

    let mut transfers = Vec::with_capacity(senders.len() + receivers.len());
    for (address, currency, value) in senders.into_entries() {
        if value.is_zero() {
            continue;
        }
        let (from, to) = if value.is_sign_negative() {
            (address, String::new())
        } else {
            (String::new(), address)
        };
        transfers.push(Transfer::from_meta(meta, from, to, value, currency.symbol, currency.token));
    }
    for (address, currency, value) in receivers.into_entries() {
        if value.is_zero() {
            continue;
        }
        transfers.push(Transfer::from_meta(meta, "", address, value, currency.symbol, currency.token));
    }
    transfers
}

/// 账户模型：单输入单输出
///
/// 交易失败、发送方在销毁名单上、金额低于阈值时不产生转账。
pub fn net_account(
    meta: &TxMeta,
    from: &str,
    to: &str,
    value: Decimal,
    currency: CurrencyKey,
    network: &NetworkInfo,
) -> Vec<Transfer> {
    if !meta.success || network.is_invalid_sender(from) || value < network.min_valid_tx_amount {
        return Vec::new();
    }
    vec![Transfer::from_meta(meta, from, to, value, currency.symbol, currency.token)]
}

fn merge_by_key<K, F>(transfers: Vec<Transfer>, key_of: F) -> Vec<Transfer>
where
    K: Eq + std::hash::Hash,
    F: Fn(&Transfer) -> K,
{
    let mut index: HashMap<K, usize> = HashMap::new();
    let mut merged: Vec<Transfer> = Vec::with_capacity(transfers.len());
    for transfer in transfers {
        let key = key_of(&transfer);
        match index.get(&key) {
            Some(&i) => merged[i].value += transfer.value,
            None => {
                index.insert(key, merged.len());
                merged.push(transfer);
            }
        }
    }
    merged
}

/// 按 (from, to, symbol) 合并
pub fn aggregate_account(transfers: Vec<Transfer>) -> Vec<Transfer> {
    merge_by_key(transfers, |t| {
        (t.from_address.clone(), t.to_address.clone(), t.symbol.clone())
    })
}

/// 按 (from, to, memo, symbol) 合并；无 memo 的转账原样追加在后
pub fn aggregate_memo(transfers: Vec<Transfer>) -> Vec<Transfer> {
    let (with_memo, without_memo): (Vec<Transfer>, Vec<Transfer>) = transfers
        .into_iter()
        .partition(|t| t.memo.as_deref().is_some_and(|m| !m.is_empty()));
    let mut merged = merge_by_key(with_memo, |t| {
        (
            t.from_address.clone(),
            t.to_address.clone(),
            t.memo.clone(),
            t.symbol.clone(),
        )
    });
    merged.extend(without_memo);
    merged
}

/// 把逐对转账拆成输入/输出后重新净额结算；对已结算的结果幂等
pub fn aggregate_utxo(transfers: Vec<Transfer>) -> Vec<Transfer> {
    let Some(first) = transfers.first() else {
        return transfers;
    };
    let meta = TxMeta {
        tx_hash: first.tx_hash.clone(),
        block_height: first.block_height,
        block_hash: first.block_hash.clone(),
        confirmations: first.confirmations,
        date: first.date,
        tx_fee: first.tx_fee,
        success: first.success,
        memo: first.memo.clone(),
    };

    let mut inputs = Vec::new();
    let mut outputs = Vec::new();
    for t in &transfers {
        let currency = CurrencyKey {
            symbol: t.symbol.clone(),
            token: t.token.clone(),
        };
        if !t.from_address.is_empty() {
            inputs.push(Leg::new(t.from_address.clone(), currency.clone(), t.value.abs()));
        }
        if !t.to_address.is_empty() {
            outputs.push(Leg::new(t.to_address.clone(), currency, t.value.abs()));
        }
    }
    net_legs(&meta, &inputs, &outputs, Decimal::ZERO)
}

pub fn aggregate(model: LedgerModel, transfers: Vec<Transfer>) -> Vec<Transfer> {
    match model {
        LedgerModel::Account => aggregate_account(transfers),
        LedgerModel::Memo => aggregate_memo(transfers),
        LedgerModel::Utxo => aggregate_utxo(transfers),
    }
}
