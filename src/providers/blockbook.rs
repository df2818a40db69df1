//! Blockbook 浏览器适配器（UTXO 链与部分 EVM 链）
//!
//! 同一份交易结构同时覆盖两种模型：
//! `vin[0]` 带 value 时按 UTXO 输入/输出净额结算，否则按账户模型取 `tx.value`。

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use serde_json::Value;

use super::{
    json, matches_direction, ExplorerAdapter, ParserContext, ResponseKind, ResponseValidator,
};
use crate::{
    domain::{net_account, net_legs, Balance, ContractInfo, Direction, Leg, Transfer, TxMeta},
    error::{ExplorerError, ExplorerResult},
    infrastructure::{Headers, HttpTransport},
    metrics,
};

const ADDRESS_PAGE_SIZE: u32 = 50;
const BLOCK_PAGE_CONCURRENCY: usize = 3;

pub struct BlockbookAdapter {
    name: String,
    base_url: String,
    context: ParserContext,
    transport: Arc<dyn HttpTransport>,
}

impl BlockbookAdapter {
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

    async fn fetch(&self, path: &str) -> ExplorerResult<Value> {
        let url = format!("{}{}", self.base_url, path);
        self.transport.get_json(&self.name, &url, &Headers::new()).await
    }

    async fn fetch_block_page(&self, height: u64, page: u64) -> ExplorerResult<Value> {
        let raw = self
            .fetch(&format!("/api/v2/block/{}?page={}", height, page))
            .await?;
        self.gate(&raw, ResponseKind::BlockTxs)?;
        Ok(raw)
    }
}

// ============ 校验 ============

fn is_object(v: Option<&Value>) -> bool {
    v.is_some_and(Value::is_object)
}

fn validate_tx(tx: &Value) -> bool {
    json::str_field(tx, "txid").is_some_and(|h| !h.is_empty())
        && json::array_field(tx, "vin").is_some_and(|v| !v.is_empty())
        && json::array_field(tx, "vout").is_some()
}

impl ResponseValidator for BlockbookAdapter {
    fn validate(&self, raw: &Value, kind: ResponseKind) -> bool {
        if !raw.is_object() || raw.get("error").is_some() {
            return false;
        }
        match kind {
            ResponseKind::BlockHead => {
                let (Some(blockbook), Some(backend)) = (raw.get("blockbook"), raw.get("backend"))
                else {
                    return false;
                };
                let warnings = backend
                    .get("warnings")
                    .and_then(Value::as_str)
                    .is_some_and(|w| !w.is_empty());
                is_object(Some(blockbook))
                    && is_object(Some(backend))
                    && blockbook.get("bestHeight").is_some_and(Value::is_u64)
                    && !warnings
            }
            ResponseKind::Balance => json::has_integer(raw, "balance"),
            ResponseKind::TokenBalance => {
                raw.get("address").is_some_and(Value::is_string)
                    && raw.get("tokens").map_or(true, Value::is_array)
            }
            ResponseKind::TxDetails => validate_tx(raw),
            ResponseKind::AddressTxs | ResponseKind::TokenTxs => {
                raw.get("address").is_some_and(Value::is_string)
                    && raw.get("transactions").map_or(true, Value::is_array)
            }
            ResponseKind::BlockTxs => json::array_field(raw, "txs").is_some_and(|t| !t.is_empty()),
            ResponseKind::BatchBalance | ResponseKind::Receipt => false,
        }
    }
}

// ============ 解析 ============

pub fn parse_block_head(raw: &Value) -> Option<u64> {
    raw.get("blockbook")?.get("bestHeight")?.as_u64()
}

pub fn parse_balance(ctx: &ParserContext, raw: &Value) -> Balance {
    let amount = |key: &str| {
        json::str_field(raw, key)
            .and_then(|s| ctx.scale(&s))
            .unwrap_or(Decimal::ZERO)
    };
    Balance::new(amount("balance"), amount("unconfirmedBalance"))
}

pub fn parse_token_balance(raw: &Value, contract: &ContractInfo) -> Balance {
    let balance = json::array_field(raw, "tokens")
        .into_iter()
        .flatten()
        .find(|t| {
            json::str_field(t, "contract")
                .is_some_and(|c| c.eq_ignore_ascii_case(&contract.address))
        })
        .and_then(|t| json::str_field(t, "balance"))
        .and_then(|b| json::scale_units(&b, contract.decimals))
        .unwrap_or(Decimal::ZERO);
    Balance::new(balance, Decimal::ZERO)
}

fn tx_meta(ctx: &ParserContext, tx: &Value) -> TxMeta {
    let mut meta = TxMeta::new(json::str_field(tx, "txid").unwrap_or_default());
    meta.block_height = json::u64_field(tx, "blockHeight").filter(|h| *h > 0);
    meta.block_hash = json::str_field(tx, "blockHash");
    meta.confirmations = json::u64_field(tx, "confirmations").unwrap_or(0);
    meta.date = json::i64_field(tx, "blockTime").and_then(json::timestamp);
    meta.tx_fee = json::str_field(tx, "fees").and_then(|f| ctx.scale(&f));
    // ethereumSpecific.status: 1 成功，0 失败，-1 未确认
    if let Some(status) = tx.get("ethereumSpecific").and_then(|e| json::i64_field(e, "status")) {
        meta.success = status == 1;
    }
    meta
}

/// 单地址输入/输出条目：恰好一个地址且带金额
fn leg(ctx: &ParserContext, entry: &Value) -> Option<(String, Decimal)> {
    if !entry.get("isAddress").and_then(Value::as_bool).unwrap_or(false) {
        return None;
    }
    let addresses = json::array_field(entry, "addresses")?;
    if addresses.len() != 1 {
        return None;
    }
    let address = ctx.normalize(addresses[0].as_str()?);
    let value = ctx.scale(&json::str_field(entry, "value")?)?;
    Some((address, value))
}

fn first_address(ctx: &ParserContext, entries: &[Value]) -> Option<String> {
    let entry = entries.first()?;
    let address = json::array_field(entry, "addresses")?.first()?.as_str()?;
    Some(ctx.normalize(address))
}

fn token_transfers(ctx: &ParserContext, meta: &TxMeta, tx: &Value) -> Vec<Transfer> {
    let network = &ctx.network;
    json::array_field(tx, "tokenTransfers")
        .into_iter()
        .flatten()
        .filter_map(|t| {
            let contract_address = json::str_field(t, "contract").or_else(|| json::str_field(t, "token"))?;
            let contract = ctx.contracts.by_address(&network.name, &contract_address)?;
            let from = ctx.normalize(&json::str_field(t, "from")?);
            let to = ctx.normalize(&json::str_field(t, "to")?);
            let value = json::scale_units(&json::str_field(t, "value")?, contract.decimals)?;
            if network.is_invalid_sender(&from) || ctx.is_dust(value) {
                return None;
            }
            Some(Transfer::from_meta(
                meta,
                from,
                to,
                value,
                contract.symbol.clone(),
                Some(contract.address.clone()),
            ))
        })
        .collect()
}

/// 单笔交易 -> 净额结算后的转账；失败交易不产生转账
pub fn parse_tx(ctx: &ParserContext, tx: &Value) -> Vec<Transfer> {
    if !validate_tx(tx) {
        return Vec::new();
    }
    let meta = tx_meta(ctx, tx);
    if !meta.success {
        return Vec::new();
    }
    let vin = json::array_field(tx, "vin").map(Vec::as_slice).unwrap_or_default();
    let vout = json::array_field(tx, "vout").map(Vec::as_slice).unwrap_or_default();

    let account_style = vin.first().is_some_and(|v| v.get("value").is_none());
    let mut transfers = if account_style {
        let value = json::str_field(tx, "value")
            .and_then(|v| ctx.scale(&v))
            .unwrap_or(Decimal::ZERO);
        match (first_address(ctx, vin), first_address(ctx, vout)) {
            (Some(from), Some(to)) if !value.is_zero() => {
                net_account(&meta, &from, &to, value, ctx.native(), &ctx.network)
            }
            _ => Vec::new(),
        }
    } else {
        let currency = ctx.native();
        let to_legs = |entries: &[Value]| -> Vec<Leg> {
            entries
                .iter()
                .filter_map(|e| leg(ctx, e))
                .map(|(address, value)| Leg::new(address, currency.clone(), value))
                .collect()
        };
        net_legs(
            &meta,
            &to_legs(vin),
            &to_legs(vout),
            ctx.network.min_valid_tx_amount,
        )
    };
    transfers.extend(token_transfers(ctx, &meta, tx));
    transfers
}

pub fn parse_txs(ctx: &ParserContext, raw: &Value, key: &str) -> Vec<Transfer> {
    json::array_field(raw, key)
        .into_iter()
        .flatten()
        .flat_map(|tx| parse_tx(ctx, tx))
        .collect()
}

// ============ 接口 ============

#[async_trait]
impl ExplorerAdapter for BlockbookAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn context(&self) -> &ParserContext {
        &self.context
    }

    async fn get_balance(&self, address: &str) -> ExplorerResult<Balance> {
        let raw = self
            .fetch(&format!("/api/v2/address/{}?details=basic", address))
            .await?;
        self.gate(&raw, ResponseKind::Balance)?;
        Ok(parse_balance(&self.context, &raw))
    }

    async fn get_token_balance(
        &self,
        address: &str,
        contract: &ContractInfo,
    ) -> ExplorerResult<Balance> {
        let raw = self
            .fetch(&format!("/api/v2/address/{}?details=tokenBalances", address))
            .await?;
        self.gate(&raw, ResponseKind::TokenBalance)?;
        Ok(parse_token_balance(&raw, contract))
    }

    async fn get_tx_details(&self, hash: &str) -> ExplorerResult<Vec<Transfer>> {
        let raw = self.fetch(&format!("/api/v2/tx/{}", hash)).await?;
        self.gate(&raw, ResponseKind::TxDetails)?;
        Ok(parse_tx(&self.context, &raw))
    }

    async fn get_address_txs(&self, address: &str) -> ExplorerResult<Vec<Transfer>> {
        let raw = self
            .fetch(&format!(
                "/api/v2/address/{}?details=txs&pageSize={}",
                address, ADDRESS_PAGE_SIZE
            ))
            .await?;
        self.gate(&raw, ResponseKind::AddressTxs)?;
        Ok(parse_txs(&self.context, &raw, "transactions")
            .into_iter()
            .filter(|t| !t.is_token())
            .collect())
    }

    async fn get_token_txs(
        &self,
        address: &str,
        contract: &ContractInfo,
        direction: Option<Direction>,
    ) -> ExplorerResult<Vec<Transfer>> {
        let raw = self
            .fetch(&format!(
                "/api/v2/address/{}?details=txs&pageSize={}&contract={}",
                address, ADDRESS_PAGE_SIZE, contract.address
            ))
            .await?;
        self.gate(&raw, ResponseKind::TokenTxs)?;
        let address = self.context.normalize(address);
        Ok(parse_txs(&self.context, &raw, "transactions")
            .into_iter()
            .filter(|t| {
                t.token
                    .as_deref()
                    .is_some_and(|c| c.eq_ignore_ascii_case(&contract.address))
            })
            .filter(|t| matches_direction(t, &address, direction))
            .collect())
    }

    /// 分页取块：任一页失败即整体失败，避免游标越过缺失的交易
    async fn get_block_txs(&self, height: u64) -> ExplorerResult<Vec<Transfer>> {
        let network = self.context.network.name.clone();
        let first = match self.fetch_block_page(height, 1).await {
            Ok(raw) => raw,
            Err(err) => {
                metrics::inc_missed_block_txs(&self.name, &network);
                return Err(err);
            }
        };
        let total_pages = json::u64_field(&first, "totalPages").unwrap_or(1).max(1);

        let mut pages = vec![first];
        let rest: Vec<ExplorerResult<Value>> = stream::iter(2..=total_pages)
            .map(|page| self.fetch_block_page(height, page))
            .buffered(BLOCK_PAGE_CONCURRENCY)
            .collect()
            .await;
        for (offset, page) in rest.into_iter().enumerate() {
            match page {
                Ok(raw) => pages.push(raw),
                Err(err) => {
                    metrics::inc_missed_block_txs(&self.name, &network);
                    tracing::warn!(
                        provider = %self.name,
                        network = %network,
                        height,
                        page = offset as u64 + 2,
                        error = %err,
                        "block page failed"
                    );
                    return Err(err);
                }
            }
        }

        Ok(pages
            .iter()
            .flat_map(|raw| parse_txs(&self.context, raw, "txs"))
            .map(|mut t| {
                t.block_height.get_or_insert(height);
                t
            })
            .collect())
    }

    async fn get_block_head(&self) -> ExplorerResult<u64> {
        let raw = self.fetch("/api/").await?;
        self.gate(&raw, ResponseKind::BlockHead)?;
        parse_block_head(&raw).ok_or_else(|| ExplorerError::validation(&self.name, ResponseKind::BlockHead))
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use serde_json::json;

    use super::*;
    use crate::{
        domain::{aggregate, LedgerModel, TxDetails},
        providers::testing::{context, CannedTransport},
    };

    const A: &str = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";
    const B: &str = "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4";

    fn btc() -> ParserContext {
        context("BTC", "BTC", 8, LedgerModel::Utxo, Decimal::from_str("0.00001").unwrap())
    }

    fn eth() -> ParserContext {
        context("ETH", "ETH", 18, LedgerModel::Account, Decimal::ZERO)
    }

    fn utxo_tx() -> Value {
        json!({
            "txid": "ab01",
            "blockHeight": 800000,
            "blockHash": "00000000000000000001",
            "confirmations": 6,
            "blockTime": 1700000000,
            "fees": "10000000",
            "vin": [{"isAddress": true, "addresses": [A], "value": "500000000"}],
            "vout": [
                {"isAddress": true, "addresses": [B], "value": "300000000"},
                {"isAddress": true, "addresses": [A], "value": "190000000"},
                {"isAddress": true, "addresses": [B], "value": "500"}
            ]
        })
    }

    fn adapter(ctx: ParserContext, transport: CannedTransport) -> BlockbookAdapter {
        BlockbookAdapter::new(
            "btc_blockbook".into(),
            "https://bb.example".into(),
            ctx,
            Arc::new(transport),
        )
    }

    #[test]
    fn test_utxo_tx_is_netted_with_change() {
        let transfers = parse_tx(&btc(), &utxo_tx());
        assert_eq!(transfers.len(), 2);

        let sender = &transfers[0];
        assert_eq!(sender.from_address, A);
        assert_eq!(sender.to_address, "");
        assert_eq!(sender.value, Decimal::from_str("-3.1").unwrap());

        let receiver = &transfers[1];
        assert_eq!(receiver.from_address, "");
        assert_eq!(receiver.to_address, B);
        // 500 聪低于粉尘阈值，不计入
        assert_eq!(receiver.value, Decimal::from(3));
        assert_eq!(receiver.tx_fee, Decimal::from_str("0.1").ok());
        assert_eq!(receiver.block_height, Some(800000));
    }

    #[test]
    fn test_utxo_details_expose_inputs_and_outputs() {
        let transfers = aggregate(LedgerModel::Utxo, parse_tx(&btc(), &utxo_tx()));
        let details = TxDetails::from_transfers(&transfers);
        assert_eq!(details.inputs.len(), 1);
        assert_eq!(details.inputs[0].address, A);
        assert_eq!(details.inputs[0].value, Decimal::from_str("3.1").unwrap());
        assert_eq!(details.outputs.len(), 1);
        assert_eq!(details.outputs[0].address, B);
        assert_eq!(details.value_for(&[A], "BTC"), Decimal::from_str("-3.1").unwrap());
        assert_eq!(details.value_for(&[B], "BTC"), Decimal::from(3));
    }

    #[test]
    fn test_account_style_tx_with_token_transfer() {
        let tx = json!({
            "txid": "0xfeed",
            "blockHeight": 19000000,
            "confirmations": 12,
            "blockTime": 1700000000,
            "fees": "21000000000000",
            "value": "0",
            "vin": [{"isAddress": true, "addresses": ["0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed"]}],
            "vout": [{"isAddress": true, "addresses": ["0xdac17f958d2ee523a2206206994597c13d831ec7"]}],
            "ethereumSpecific": {"status": 1},
            "tokenTransfers": [{
                "contract": "0xdac17f958d2ee523a2206206994597c13d831ec7",
                "from": "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed",
                "to": "0xfb6916095ca1df60bb79ce92ce3ea74c37c5d359",
                "value": "2500000"
            }]
        });
        let transfers = parse_tx(&eth(), &tx);
        assert_eq!(transfers.len(), 1);
        let t = &transfers[0];
        assert_eq!(t.symbol, "USDT");
        assert_eq!(t.value, Decimal::from_str("2.5").unwrap());
        assert_eq!(t.from_address, "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed");
        assert_eq!(t.to_address, "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359");
        assert_eq!(t.token.as_deref(), Some("0xdAC17F958D2ee523a2206206994597C13D831ec7"));
    }

    #[test]
    fn test_failed_evm_tx_has_no_transfers() {
        let tx = json!({
            "txid": "0xdead",
            "value": "1000000000000000000",
            "vin": [{"isAddress": true, "addresses": ["0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed"]}],
            "vout": [{"isAddress": true, "addresses": ["0xfb6916095ca1df60bb79ce92ce3ea74c37c5d359"]}],
            "ethereumSpecific": {"status": 0}
        });
        assert!(parse_tx(&eth(), &tx).is_empty());
    }

    #[test]
    fn test_block_head_validation() {
        let a = adapter(btc(), CannedTransport::new());
        let ok = json!({"blockbook": {"bestHeight": 812345}, "backend": {"chain": "main"}});
        assert!(a.validate(&ok, ResponseKind::BlockHead));
        assert_eq!(parse_block_head(&ok), Some(812345));

        let warned = json!({"blockbook": {"bestHeight": 1}, "backend": {"warnings": "out of sync"}});
        assert!(!a.validate(&warned, ResponseKind::BlockHead));
        let bad_height = json!({"blockbook": {"bestHeight": "1"}, "backend": {}});
        assert!(!a.validate(&bad_height, ResponseKind::BlockHead));
    }

    #[tokio::test]
    async fn test_invalid_balance_is_validation_error() {
        let transport = CannedTransport::new().route("/api/v2/address/", json!({"page": 1}));
        let err = adapter(btc(), transport).get_balance(A).await.unwrap_err();
        assert!(matches!(err, ExplorerError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_balance() {
        let transport = CannedTransport::new().route(
            "details=basic",
            json!({"address": A, "balance": "150000000", "unconfirmedBalance": "-1000"}),
        );
        let balance = adapter(btc(), transport).get_balance(A).await.unwrap();
        assert_eq!(balance.balance, Decimal::from_str("1.5").unwrap());
        assert_eq!(balance.unconfirmed_balance, Decimal::from_str("-0.00001").unwrap());
    }

    #[tokio::test]
    async fn test_block_pages_are_concatenated() {
        let transport = CannedTransport::new()
            .route("page=1", json!({"page": 1, "totalPages": 2, "txs": [utxo_tx()]}))
            .route("page=2", json!({"page": 2, "totalPages": 2, "txs": [utxo_tx()]}));
        let transfers = adapter(btc(), transport).get_block_txs(800000).await.unwrap();
        assert_eq!(transfers.len(), 4);
    }

    #[tokio::test]
    async fn test_invalid_later_block_page_fails_block() {
        let transport = CannedTransport::new()
            .route("page=1", json!({"page": 1, "totalPages": 3, "txs": [utxo_tx()]}))
            .route("page=2", json!({"page": 2, "txs": []}))
            .route("page=3", json!({"page": 3, "totalPages": 3, "txs": [utxo_tx()]}));
        let err = adapter(btc(), transport).get_block_txs(800000).await.unwrap_err();
        assert!(matches!(err, ExplorerError::Validation { .. }));
        assert!(metrics::render_prometheus().contains("ironscan_missed_block_txs_total"));
    }

    #[tokio::test]
    async fn test_later_page_transport_error_fails_block() {
        let transport = CannedTransport::new()
            .route("page=1", json!({"page": 1, "totalPages": 2, "txs": [utxo_tx()]}))
            .fail("page=2", ExplorerError::transport("bb", "timeout"));
        let err = adapter(btc(), transport).get_block_txs(800000).await.unwrap_err();
        assert!(matches!(err, ExplorerError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_invalid_first_block_page_fails() {
        let transport = CannedTransport::new().route("page=1", json!({"error": "not found"}));
        assert!(adapter(btc(), transport).get_block_txs(1).await.is_err());
    }
}
