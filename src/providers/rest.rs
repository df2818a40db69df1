//! REST 浏览器适配器（TON，memo 模型）
//!
//! 上游返回原始地址 `0:<hex>`，统一转换为可回弹的用户友好形式后再比较。
//! 钱包发起的转出交易由外部消息触发，金额在 out_msgs 里；
//! 对外可见的结算哈希是外部消息哈希而非交易哈希。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

use super::{
    json, matches_direction, ExplorerAdapter, ParserContext, ResponseKind, ResponseValidator,
};
use crate::{
    domain::{ton_user_friendly, Balance, ContractInfo, Direction, Transfer, TxMeta},
    error::{ExplorerError, ExplorerResult},
    infrastructure::{Headers, HttpTransport},
};

const HISTORY_LIMIT: u32 = 100;
/// 平均出块间隔（秒），用于估算确认数
const AVERAGE_BLOCK_SECS: i64 = 5;

pub struct RestAdapter {
    name: String,
    base_url: String,
    api_key: Option<String>,
    context: ParserContext,
    transport: Arc<dyn HttpTransport>,
}

impl RestAdapter {
    pub fn new(
        name: String,
        base_url: String,
        api_key: Option<String>,
        context: ParserContext,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            name,
            base_url,
            api_key,
            context,
            transport,
        }
    }

    fn headers(&self) -> Headers {
        let mut headers: Headers = vec![("Accept".into(), "application/json".into())];
        if let Some(key) = self.api_key.as_deref().filter(|k| !k.is_empty()) {
            headers.push(("Authorization".into(), format!("Bearer {}", key)));
        }
        headers
    }

    async fn fetch(&self, path: &str, kind: ResponseKind) -> ExplorerResult<Value> {
        let url = format!("{}/{}", self.base_url, path);
        let raw = self.transport.get_json(&self.name, &url, &self.headers()).await?;
        self.gate(&raw, kind)?;
        Ok(raw)
    }
}

// ============ 地址 ============

fn address_at(v: &Value, key: &str) -> Option<String> {
    let raw = v.get(key)?.get("address")?.as_str()?;
    ton_user_friendly(raw)
}

// ============ 校验 ============

fn validate_tx(tx: &Value) -> bool {
    let phase_ok = |key: &str, code: &str| {
        tx.get(key).map_or(true, |phase| {
            json::bool_field(phase, "success").unwrap_or(false)
                && json::i64_field(phase, code).unwrap_or(0) == 0
        })
    };
    json::str_field(tx, "hash").is_some_and(|h| !h.is_empty())
        && json::bool_field(tx, "success") == Some(true)
        && json::bool_field(tx, "aborted") != Some(true)
        && tx.get("in_msg").is_some_and(Value::is_object)
        && phase_ok("compute_phase", "exit_code")
        && phase_ok("action_phase", "result_code")
}

fn validate_event(event: &Value) -> bool {
    json::str_field(event, "event_id").is_some() && json::array_field(event, "actions").is_some()
}

impl ResponseValidator for RestAdapter {
    fn validate(&self, raw: &Value, kind: ResponseKind) -> bool {
        if !raw.is_object() || raw.get("error").is_some() {
            return false;
        }
        match kind {
            ResponseKind::Balance | ResponseKind::TokenBalance => json::has_integer(raw, "balance"),
            ResponseKind::TxDetails => {
                (json::str_field(raw, "hash").is_some() && raw.get("in_msg").is_some_and(Value::is_object))
                    || validate_event(raw)
            }
            ResponseKind::AddressTxs | ResponseKind::BlockTxs => {
                json::array_field(raw, "transactions").is_some()
            }
            ResponseKind::TokenTxs => json::array_field(raw, "events").is_some(),
            ResponseKind::BlockHead => json::has_integer(raw, "seqno"),
            ResponseKind::BatchBalance | ResponseKind::Receipt => false,
        }
    }
}

// ============ 解析 ============

fn memo_of(message: &Value) -> Option<String> {
    message
        .get("decoded_body")
        .and_then(|b| b.get("text"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// 原生币交易
pub fn parse_tx(ctx: &ParserContext, tx: &Value, now: DateTime<Utc>) -> Vec<Transfer> {
    if !validate_tx(tx) {
        return Vec::new();
    }
    let in_msg = &tx["in_msg"];
    let external = address_at(in_msg, "source").is_none();

    // 外部消息触发的交易以消息哈希标识，与结算哈希一致
    let hash = external
        .then(|| json::str_field(in_msg, "hash"))
        .flatten()
        .filter(|h| !h.is_empty())
        .or_else(|| json::str_field(tx, "hash"))
        .unwrap_or_default();
    let mut meta = TxMeta::new(hash);
    meta.block_height = json::str_field(tx, "block").and_then(|b| json::ton_block_seqno(&b));
    meta.date = json::i64_field(tx, "utime").and_then(json::timestamp);
    meta.confirmations = json::estimated_confirmations(now, meta.date, AVERAGE_BLOCK_SECS);
    meta.tx_fee = json::str_field(tx, "total_fees").and_then(|f| ctx.scale(&f));

    // 外部消息触发（无 source）：钱包转出，金额在 out_msgs
    let messages: Vec<&Value> = if external {
        json::array_field(tx, "out_msgs").into_iter().flatten().collect()
    } else {
        vec![in_msg]
    };

    messages
        .into_iter()
        .filter_map(|msg| {
            let from = address_at(msg, "source")?;
            let to = address_at(msg, "destination")?;
            let value = ctx.scale(&json::str_field(msg, "value")?)?;
            if value.is_zero() || from == to || ctx.is_dust(value) {
                return None;
            }
            let native = ctx.native();
            Some(
                Transfer::from_meta(&meta, from, to, value, native.symbol, native.token)
                    .with_memo(memo_of(msg)),
            )
        })
        .collect()
}

/// Jetton 事件；`only` 给定时只保留该合约
pub fn parse_jetton_event(
    ctx: &ParserContext,
    event: &Value,
    only: Option<&ContractInfo>,
    now: DateTime<Utc>,
) -> Vec<Transfer> {
    if !validate_event(event)
        || json::bool_field(event, "is_scam") == Some(true)
        || json::bool_field(event, "in_progress") == Some(true)
    {
        return Vec::new();
    }
    let mut meta = TxMeta::new(json::str_field(event, "event_id").unwrap_or_default());
    meta.date = json::i64_field(event, "timestamp").and_then(json::timestamp);
    meta.confirmations = json::estimated_confirmations(now, meta.date, AVERAGE_BLOCK_SECS);

    json::array_field(event, "actions")
        .into_iter()
        .flatten()
        .filter(|a| {
            json::str_field(a, "type").as_deref() == Some("JettonTransfer")
                && json::str_field(a, "status").as_deref() == Some("ok")
        })
        .filter_map(|action| {
            let transfer = action.get("JettonTransfer")?;
            let jetton = address_at(transfer, "jetton")?;
            let contract = ctx.contracts.by_address(&ctx.network.name, &jetton)?;
            if only.is_some_and(|c| !c.address.eq_ignore_ascii_case(&contract.address)) {
                return None;
            }
            let from = address_at(transfer, "sender")?;
            let to = address_at(transfer, "recipient")?;
            let value = json::scale_units(&json::str_field(transfer, "amount")?, contract.decimals)?;
            if value.is_zero() || ctx.is_dust(value) {
                return None;
            }
            let memo = json::str_field(transfer, "comment");
            Some(
                Transfer::from_meta(
                    &meta,
                    from,
                    to,
                    value,
                    contract.symbol.clone(),
                    Some(contract.address.clone()),
                )
                .with_memo(memo),
            )
        })
        .collect()
}

/// 转出视角：同一事件中该地址发出的金额合并为一条
pub fn sum_outgoing(address: &str, transfers: Vec<Transfer>) -> Vec<Transfer> {
    let mut merged: Vec<Transfer> = Vec::new();
    for t in transfers.into_iter().filter(|t| t.from_address == address) {
        match merged.iter_mut().find(|m| m.tx_hash == t.tx_hash) {
            Some(m) => m.value += t.value,
            None => merged.push(Transfer {
                to_address: String::new(),
                memo: None,
                ..t
            }),
        }
    }
    merged
}

// ============ 接口 ============

#[async_trait]
impl ExplorerAdapter for RestAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn context(&self) -> &ParserContext {
        &self.context
    }

    async fn get_balance(&self, address: &str) -> ExplorerResult<Balance> {
        let raw = self
            .fetch(&format!("v2/accounts/{}", address), ResponseKind::Balance)
            .await?;
        let balance = json::str_field(&raw, "balance")
            .and_then(|b| self.context.scale(&b))
            .unwrap_or(Decimal::ZERO);
        Ok(Balance::new(balance, Decimal::ZERO))
    }

    async fn get_token_balance(
        &self,
        address: &str,
        contract: &ContractInfo,
    ) -> ExplorerResult<Balance> {
        let raw = self
            .fetch(
                &format!("v2/accounts/{}/jettons/{}", address, contract.address),
                ResponseKind::TokenBalance,
            )
            .await?;
        let balance = json::str_field(&raw, "balance")
            .and_then(|b| json::scale_units(&b, contract.decimals))
            .unwrap_or(Decimal::ZERO);
        Ok(Balance::new(balance, Decimal::ZERO))
    }

    async fn get_tx_details(&self, hash: &str) -> ExplorerResult<Vec<Transfer>> {
        let raw = self
            .fetch(&format!("v2/blockchain/transactions/{}", hash), ResponseKind::TxDetails)
            .await?;
        Ok(parse_tx(&self.context, &raw, Utc::now()))
    }

    async fn get_token_tx_details(
        &self,
        hash: &str,
        contract: &ContractInfo,
    ) -> ExplorerResult<Vec<Transfer>> {
        let raw = self
            .fetch(&format!("v2/events/{}/jettons", hash), ResponseKind::TxDetails)
            .await?;
        Ok(parse_jetton_event(&self.context, &raw, Some(contract), Utc::now()))
    }

    async fn get_address_txs(&self, address: &str) -> ExplorerResult<Vec<Transfer>> {
        let raw = self
            .fetch(
                &format!(
                    "v2/blockchain/accounts/{}/transactions?limit={}",
                    address, HISTORY_LIMIT
                ),
                ResponseKind::AddressTxs,
            )
            .await?;
        let now = Utc::now();
        Ok(json::array_field(&raw, "transactions")
            .into_iter()
            .flatten()
            .flat_map(|tx| parse_tx(&self.context, tx, now))
            .collect())
    }

    async fn get_token_txs(
        &self,
        address: &str,
        contract: &ContractInfo,
        direction: Option<Direction>,
    ) -> ExplorerResult<Vec<Transfer>> {
        let raw = self
            .fetch(
                &format!(
                    "v2/accounts/{}/jettons/{}/history?limit={}",
                    address, contract.address, HISTORY_LIMIT
                ),
                ResponseKind::TokenTxs,
            )
            .await?;
        let now = Utc::now();
        let address = self.context.normalize(address);
        let transfers: Vec<Transfer> = json::array_field(&raw, "events")
            .into_iter()
            .flatten()
            .flat_map(|event| parse_jetton_event(&self.context, event, Some(contract), now))
            .collect();
        Ok(match direction {
            Some(Direction::Outgoing) => sum_outgoing(&address, transfers),
            _ => transfers
                .into_iter()
                .filter(|t| matches_direction(t, &address, direction))
                .collect(),
        })
    }

    async fn get_block_txs(&self, height: u64) -> ExplorerResult<Vec<Transfer>> {
        let raw = self
            .fetch(
                &format!("v2/blockchain/masterchain/{}/transactions", height),
                ResponseKind::BlockTxs,
            )
            .await?;
        let now = Utc::now();
        Ok(json::array_field(&raw, "transactions")
            .into_iter()
            .flatten()
            .flat_map(|tx| parse_tx(&self.context, tx, now))
            .map(|mut t| {
                t.block_height.get_or_insert(height);
                t
            })
            .collect())
    }

    async fn get_block_head(&self) -> ExplorerResult<u64> {
        let raw = self
            .fetch("v2/blockchain/masterchain-head", ResponseKind::BlockHead)
            .await?;
        json::u64_field(&raw, "seqno")
            .ok_or_else(|| ExplorerError::validation(&self.name, ResponseKind::BlockHead))
    }

    /// 外部消息哈希；为空表示尚无法对外确认
    async fn settlement_hash(&self, hash: &str) -> ExplorerResult<Option<String>> {
        let raw = self
            .fetch(&format!("v2/blockchain/transactions/{}", hash), ResponseKind::TxDetails)
            .await?;
        Ok(raw
            .get("in_msg")
            .and_then(|m| m.get("hash"))
            .and_then(Value::as_str)
            .filter(|h| !h.is_empty())
            .map(str::to_string))
    }
}
