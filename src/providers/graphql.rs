//! GraphQL 索引器适配器（Opera 系 EVM 链）
//!
//! 所有请求都是 POST `{query, variables}`；响应带 `errors` 即视为无效。
//! 该索引器的 inputData 对合约调用不可靠，只接受原生转账（inputData == "0x"）。

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{json, Value};

use super::{json, ExplorerAdapter, ParserContext, ResponseKind, ResponseValidator};
use crate::{
    domain::{net_account, Balance, ContractInfo, Transfer, TxMeta},
    error::{ExplorerError, ExplorerResult},
    infrastructure::{Headers, HttpTransport},
};

const TRANSACTIONS_LIMIT: u32 = 50;

const TX_FIELDS: &str = "hash status from to gas gasPrice value inputData blockNumber block { hash timestamp }";

pub struct GraphqlAdapter {
    name: String,
    base_url: String,
    context: ParserContext,
    transport: Arc<dyn HttpTransport>,
}

impl GraphqlAdapter {
    pub fn new(
        name: String,
        base_url: String,
        context: ParserContext,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            name,
            base_url,
            context,
            transport,
        }
    }

    async fn query(&self, query: String, variables: Value, kind: ResponseKind) -> ExplorerResult<Value> {
        let body = json!({ "query": query, "variables": variables });
        let headers: Headers = vec![("Content-Type".into(), "application/json".into())];
        let raw = self
            .transport
            .post_json(&self.name, &self.base_url, &body, &headers)
            .await?;
        self.gate(&raw, kind)?;
        Ok(raw)
    }
}

// ============ 校验 ============

fn data(raw: &Value) -> Option<&Value> {
    if raw.get("errors").is_some_and(|e| !e.is_null()) {
        return None;
    }
    raw.get("data").filter(|d| d.is_object())
}

fn has_str(v: &Value, key: &str) -> bool {
    v.get(key).is_some_and(Value::is_string)
}

impl ResponseValidator for GraphqlAdapter {
    fn validate(&self, raw: &Value, kind: ResponseKind) -> bool {
        let Some(data) = data(raw) else {
            return false;
        };
        match kind {
            ResponseKind::Balance => data
                .get("account")
                .is_some_and(|a| json::has_hex(a, "balance")),
            ResponseKind::TokenBalance => json::has_hex(data, "ercTokenBalance"),
            ResponseKind::TxDetails => data
                .get("transaction")
                .is_some_and(|t| has_str(t, "hash") && has_str(t, "status")),
            ResponseKind::AddressTxs => data
                .get("account")
                .and_then(|a| a.get("txList"))
                .and_then(|l| l.get("edges"))
                .is_some_and(Value::is_array),
            ResponseKind::BlockTxs => data
                .get("block")
                .is_some_and(|b| has_str(b, "number") && b.get("txList").is_some_and(Value::is_array)),
            ResponseKind::BlockHead => data
                .get("block")
                .is_some_and(|b| json::has_hex(b, "number")),
            ResponseKind::BatchBalance | ResponseKind::TokenTxs | ResponseKind::Receipt => false,
        }
    }
}

// ============ 解析 ============

/// 原生转账；失败、合约调用、自转与粉尘一律丢弃
pub fn parse_tx(ctx: &ParserContext, tx: &Value, head: Option<u64>) -> Vec<Transfer> {
    let field = |key: &str| tx.get(key).and_then(Value::as_str);
    let (Some(hash), Some(from), Some(to), Some(value)) =
        (field("hash"), field("from"), field("to"), field("value"))
    else {
        return Vec::new();
    };
    if field("inputData") != Some("0x") {
        return Vec::new();
    }
    let from = ctx.normalize(from);
    let to = ctx.normalize(to);
    if from.eq_ignore_ascii_case(&to) {
        return Vec::new();
    }
    let Some(value) = json::hex_units(value, ctx.network.precision).filter(|v| !v.is_zero()) else {
        return Vec::new();
    };

    let mut meta = TxMeta::new(hash);
    meta.success = field("status") == Some("0x1");
    meta.block_height = field("blockNumber").and_then(json::hex_u64);
    if let Some(block) = tx.get("block") {
        meta.block_hash = json::str_field(block, "hash");
        meta.date = block
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(json::hex_u64)
            .and_then(|t| i64::try_from(t).ok())
            .and_then(json::timestamp);
    }
    if let (Some(head), Some(height)) = (head, meta.block_height) {
        meta.confirmations = head.saturating_sub(height);
    }
    meta.tx_fee = field("gas")
        .and_then(json::hex_u128)
        .zip(field("gasPrice").and_then(json::hex_u128))
        .and_then(|(gas, price)| gas.checked_mul(price))
        .and_then(|fee| ctx.scale(&fee.to_string()));

    net_account(&meta, &from, &to, value, ctx.native(), &ctx.network)
}

// ============ 接口 ============

#[async_trait]
impl ExplorerAdapter for GraphqlAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn context(&self) -> &ParserContext {
        &self.context
    }

    async fn get_balance(&self, address: &str) -> ExplorerResult<Balance> {
        let raw = self
            .query(
                "query getAddressBalance($address: Address!) { account(address: $address) { balance } }".into(),
                json!({ "address": address }),
                ResponseKind::Balance,
            )
            .await?;
        let balance = raw["data"]["account"]["balance"]
            .as_str()
            .and_then(|b| json::hex_units(b, self.context.network.precision))
            .unwrap_or(Decimal::ZERO);
        Ok(Balance::new(balance, Decimal::ZERO))
    }

    async fn get_token_balance(
        &self,
        address: &str,
        contract: &ContractInfo,
    ) -> ExplorerResult<Balance> {
        let raw = self
            .query(
                "query getTokenBalance($owner: Address!, $token: Address!) { ercTokenBalance(owner: $owner, token: $token) }".into(),
                json!({ "owner": address, "token": contract.address }),
                ResponseKind::TokenBalance,
            )
            .await?;
        let balance = raw["data"]["ercTokenBalance"]
            .as_str()
            .and_then(|b| json::hex_units(b, contract.decimals))
            .unwrap_or(Decimal::ZERO);
        Ok(Balance::new(balance, Decimal::ZERO))
    }

    async fn get_tx_details(&self, hash: &str) -> ExplorerResult<Vec<Transfer>> {
        let raw = self
            .query(
                format!("query getTransaction($hash: Bytes32!) {{ transaction(hash: $hash) {{ {} }} }}", TX_FIELDS),
                json!({ "hash": hash }),
                ResponseKind::TxDetails,
            )
            .await?;
        let head = self.get_block_head().await.ok();
        Ok(parse_tx(&self.context, &raw["data"]["transaction"], head))
    }

    async fn get_address_txs(&self, address: &str) -> ExplorerResult<Vec<Transfer>> {
        let raw = self
            .query(
                format!(
                    "query getAddressTransactions($address: Address!, $limit: Int!) {{ account(address: $address) {{ txList(count: $limit) {{ edges {{ transaction {{ {} }} }} }} }} }}",
                    TX_FIELDS
                ),
                json!({ "address": address, "limit": TRANSACTIONS_LIMIT }),
                ResponseKind::AddressTxs,
            )
            .await?;
        let head = self.get_block_head().await.ok();
        Ok(raw["data"]["account"]["txList"]["edges"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|edge| edge.get("transaction"))
            .flat_map(|tx| parse_tx(&self.context, tx, head))
            .collect())
    }

    async fn get_block_txs(&self, height: u64) -> ExplorerResult<Vec<Transfer>> {
        let raw = self
            .query(
                format!(
                    "query getBlockTransactions($number: Long!) {{ block(number: $number) {{ number txList {{ {} }} }} }}",
                    TX_FIELDS
                ),
                json!({ "number": format!("0x{:x}", height) }),
                ResponseKind::BlockTxs,
            )
            .await?;
        Ok(raw["data"]["block"]["txList"]
            .as_array()
            .into_iter()
            .flatten()
            .flat_map(|tx| parse_tx(&self.context, tx, None))
            .collect())
    }

    async fn get_block_head(&self) -> ExplorerResult<u64> {
        let raw = self
            .query(
                "query blockHead { block { number } }".into(),
                json!({}),
                ResponseKind::BlockHead,
            )
            .await?;
        raw["data"]["block"]["number"]
            .as_str()
            .and_then(json::hex_u64)
            .ok_or_else(|| ExplorerError::validation(&self.name, ResponseKind::BlockHead))
    }
}
