//! Etherscan 风格账户浏览器适配器
//!
//! `module=account` 接口返回十进制字符串，`module=proxy` 接口透传节点 JSON-RPC（0x 十六进制）。
//! 限流以 HTTP 200 + `result: "Max rate limit reached"` 的形式返回，需要在校验前识别。

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;

use super::{
    json, matches_direction, AdapterFlags, ExplorerAdapter, ParserContext, ResponseKind,
    ResponseValidator,
};
use crate::{
    domain::{net_account, Balance, ContractInfo, Direction, Transfer, TxMeta},
    error::{ExplorerError, ExplorerResult},
    infrastructure::{Headers, HttpTransport},
};

/// ERC-20 `transfer(address,uint256)` 选择器
const TRANSFER_SELECTOR: &str = "0xa9059cbb";
const TRANSFER_INPUT_LEN: usize = 138;
const ZERO_INPUT: &str = "0x0000000000000000000000000000000000000000";
const PAGE_SIZE: u32 = 50;

pub struct BlockscanAdapter {
    name: String,
    base_url: String,
    api_key: Option<String>,
    context: ParserContext,
    transport: Arc<dyn HttpTransport>,
    flags: AdapterFlags,
}

impl BlockscanAdapter {
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
            flags: AdapterFlags::default(),
        }
    }

    pub fn with_flags(mut self, flags: AdapterFlags) -> Self {
        self.flags = flags;
        self
    }

    fn url(&self, query: &str) -> String {
        match &self.api_key {
            Some(key) if !key.is_empty() => format!("{}/api?{}&apikey={}", self.base_url, query, key),
            _ => format!("{}/api?{}", self.base_url, query),
        }
    }

    async fn fetch(&self, query: &str, kind: ResponseKind) -> ExplorerResult<Value> {
        let raw = self
            .transport
            .get_json(&self.name, &self.url(query), &Headers::new())
            .await?;
        if is_rate_limited(&raw) {
            return Err(ExplorerError::rate_limit(&self.name));
        }
        self.gate(&raw, kind)?;
        Ok(raw)
    }

    /// 回执状态 0x1 为成功；回执为空表示交易尚未上链，返回 None
    async fn receipt_success(&self, hash: &str) -> ExplorerResult<Option<bool>> {
        let raw = self
            .fetch(
                &format!("module=proxy&action=eth_getTransactionReceipt&txhash={}", hash),
                ResponseKind::Receipt,
            )
            .await?;
        let receipt = &raw["result"];
        if receipt.is_null() {
            return Ok(None);
        }
        Ok(Some(receipt.get("status").and_then(Value::as_str) == Some("0x1")))
    }
}

fn is_rate_limited(raw: &Value) -> bool {
    raw.get("result")
        .and_then(Value::as_str)
        .is_some_and(|r| r.to_ascii_lowercase().contains("rate limit"))
}

// ============ 校验 ============

fn validate_general(raw: &Value) -> bool {
    raw.get("result").is_some()
        && !raw
            .get("message")
            .and_then(Value::as_str)
            .is_some_and(|m| m.eq_ignore_ascii_case("NOTOK"))
}

fn status_ok(raw: &Value) -> bool {
    raw.get("status").and_then(Value::as_str) != Some("0")
}

/// `0x` 前缀加纯十六进制
fn is_hex_data(input: &str) -> bool {
    input
        .strip_prefix("0x")
        .is_some_and(|body| body.bytes().all(|b| b.is_ascii_hexdigit()))
}

fn validate_proxy_tx(tx: &Value) -> bool {
    json::str_field(tx, "hash").is_some_and(|h| !h.is_empty())
        && tx.get("from").is_some_and(Value::is_string)
        && tx.get("input").and_then(Value::as_str).is_some_and(is_hex_data)
        && json::has_hex(tx, "value")
}

impl ResponseValidator for BlockscanAdapter {
    fn validate(&self, raw: &Value, kind: ResponseKind) -> bool {
        if !validate_general(raw) {
            return false;
        }
        let result = &raw["result"];
        match kind {
            ResponseKind::Balance | ResponseKind::TokenBalance => {
                status_ok(raw) && result.as_str().is_some_and(json::is_integer_str)
            }
            ResponseKind::BatchBalance => {
                status_ok(raw)
                    && result.as_array().is_some_and(|items| {
                        items.iter().all(|b| {
                            b.get("account").is_some_and(Value::is_string)
                                && json::has_integer(b, "balance")
                        })
                    })
            }
            ResponseKind::TxDetails => validate_proxy_tx(result),
            // 待打包交易的回执为 null
            ResponseKind::Receipt => result.is_null() || result.get("status").is_some_and(Value::is_string),
            // 无交易时 status 为 "0"，result 为空数组，仍视为有效
            ResponseKind::AddressTxs | ResponseKind::TokenTxs => result.is_array(),
            ResponseKind::BlockTxs => {
                json::has_hex(result, "number") && json::array_field(result, "transactions").is_some()
            }
            ResponseKind::BlockHead => result.as_str().and_then(json::hex_u64).is_some(),
        }
    }
}

// ============ 解析 ============

pub fn parse_balance(ctx: &ParserContext, raw: &Value) -> Balance {
    let balance = raw["result"]
        .as_str()
        .and_then(|r| ctx.scale(r))
        .unwrap_or(Decimal::ZERO);
    Balance::new(balance, Decimal::ZERO)
}

pub fn parse_balances(ctx: &ParserContext, raw: &Value) -> Vec<(String, Balance)> {
    json::array_field(raw, "result")
        .into_iter()
        .flatten()
        .filter_map(|b| {
            let account = ctx.normalize(b.get("account")?.as_str()?);
            let balance = ctx.scale(&json::str_field(b, "balance")?)?;
            Some((account, Balance::new(balance, Decimal::ZERO)))
        })
        .collect()
}

pub fn parse_token_balance(raw: &Value, contract: &ContractInfo) -> Balance {
    let balance = raw["result"]
        .as_str()
        .and_then(|r| json::scale_units(r, contract.decimals))
        .unwrap_or(Decimal::ZERO);
    Balance::new(balance, Decimal::ZERO)
}

/// 节点格式交易（proxy 接口与区块交易）
///
/// 只识别原生转账与单笔 ERC-20 `transfer`，其他合约调用不产生转账。
pub fn parse_proxy_tx(ctx: &ParserContext, tx: &Value, meta: &TxMeta) -> Vec<Transfer> {
    if !validate_proxy_tx(tx) {
        return Vec::new();
    }
    let from = ctx.normalize(tx["from"].as_str().unwrap_or_default());
    let to = tx.get("to").and_then(Value::as_str).unwrap_or_default();
    let input = tx["input"].as_str().unwrap_or_default();

    if input == "0x" || input == ZERO_INPUT {
        let to = ctx.normalize(to);
        let value = tx["value"]
            .as_str()
            .and_then(|v| json::hex_units(v, ctx.network.precision))
            .unwrap_or(Decimal::ZERO);
        if value.is_zero() || from.eq_ignore_ascii_case(&to) {
            return Vec::new();
        }
        return net_account(meta, &from, &to, value, ctx.native(), &ctx.network);
    }

    if input.len() == TRANSFER_INPUT_LEN && input.starts_with(TRANSFER_SELECTOR) {
        let Some(contract) = ctx.contracts.by_address(&ctx.network.name, to) else {
            return Vec::new();
        };
        let (Some(recipient), Some(amount)) = (input.get(34..74), input.get(74..138)) else {
            return Vec::new();
        };
        let recipient = ctx.normalize(&format!("0x{}", recipient));
        let Some(value) = json::hex_units(&format!("0x{}", amount), contract.decimals) else {
            return Vec::new();
        };
        if value.is_zero() || from.eq_ignore_ascii_case(&recipient) {
            return Vec::new();
        }
        return net_account(
            meta,
            &from,
            &recipient,
            value,
            ParserContext::token_currency(contract),
            &ctx.network,
        );
    }
    Vec::new()
}

fn proxy_meta(tx: &Value, head: Option<u64>) -> TxMeta {
    let mut meta = TxMeta::new(json::str_field(tx, "hash").unwrap_or_default());
    meta.block_height = tx
        .get("blockNumber")
        .and_then(Value::as_str)
        .and_then(json::hex_u64);
    meta.block_hash = json::str_field(tx, "blockHash");
    if let (Some(head), Some(height)) = (head, meta.block_height) {
        meta.confirmations = head.saturating_sub(height);
    }
    meta
}

pub fn parse_block(ctx: &ParserContext, raw: &Value) -> Vec<Transfer> {
    let block = &raw["result"];
    let height = block
        .get("number")
        .and_then(Value::as_str)
        .and_then(json::hex_u64);
    let date = block
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(json::hex_u64)
        .and_then(|t| i64::try_from(t).ok())
        .and_then(json::timestamp);
    json::array_field(block, "transactions")
        .into_iter()
        .flatten()
        .flat_map(|tx| {
            let mut meta = proxy_meta(tx, None);
            meta.block_height = meta.block_height.or(height);
            meta.date = date;
            parse_proxy_tx(ctx, tx, &meta)
        })
        .collect()
}

/// `txlist` / `tokentx` 列表项
pub fn parse_account_tx(ctx: &ParserContext, tx: &Value, contract: Option<&ContractInfo>) -> Option<Transfer> {
    if json::str_field(tx, "isError").is_some_and(|e| e != "0") {
        return None;
    }
    if json::str_field(tx, "txreceipt_status").is_some_and(|s| !s.is_empty() && s != "1") {
        return None;
    }
    let from = ctx.normalize(&json::str_field(tx, "from")?);
    let to = ctx.normalize(&json::str_field(tx, "to")?);
    if from.eq_ignore_ascii_case(&to) || ctx.network.is_invalid_sender(&from) {
        return None;
    }

    let raw_value = json::str_field(tx, "value")?;
    let (value, currency) = match contract {
        Some(contract) => {
            let tx_contract = json::str_field(tx, "contractAddress").unwrap_or_default();
            if !tx_contract.is_empty() && !tx_contract.eq_ignore_ascii_case(&contract.address) {
                return None;
            }
            (
                json::scale_units(&raw_value, contract.decimals)?,
                ParserContext::token_currency(contract),
            )
        }
        None => {
            // 合约调用（input 非空）不是原生转账
            let input = json::str_field(tx, "input").unwrap_or_else(|| "0x".into());
            if input != "0x" && input != ZERO_INPUT {
                return None;
            }
            (ctx.scale(&raw_value)?, ctx.native())
        }
    };
    if value.is_zero() || ctx.is_dust(value) {
        return None;
    }

    let mut meta = TxMeta::new(json::str_field(tx, "hash")?);
    meta.block_height = json::u64_field(tx, "blockNumber");
    meta.block_hash = json::str_field(tx, "blockHash");
    meta.confirmations = json::u64_field(tx, "confirmations").unwrap_or(0);
    meta.date = json::i64_field(tx, "timeStamp").and_then(json::timestamp);
    let gas = json::str_field(tx, "gasUsed").or_else(|| json::str_field(tx, "gas"));
    meta.tx_fee = gas
        .zip(json::str_field(tx, "gasPrice"))
        .and_then(|(gas, price)| {
            let fee = gas.parse::<u128>().ok()?.checked_mul(price.parse::<u128>().ok()?)?;
            ctx.scale(&fee.to_string())
        });

    Some(Transfer::from_meta(&meta, from, to, value, currency.symbol, currency.token))
}

// ============ 接口 ============

#[async_trait]
impl ExplorerAdapter for BlockscanAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn context(&self) -> &ParserContext {
        &self.context
    }

    fn flags(&self) -> AdapterFlags {
        self.flags
    }

    async fn get_balance(&self, address: &str) -> ExplorerResult<Balance> {
        let raw = self
            .fetch(
                &format!("module=account&action=balance&address={}&tag=latest", address),
                ResponseKind::Balance,
            )
            .await?;
        Ok(parse_balance(&self.context, &raw))
    }

    async fn get_balances(&self, addresses: &[String]) -> ExplorerResult<Vec<(String, Balance)>> {
        if !self.flags.supports_balance_batch {
            return Err(ExplorerError::not_implemented(&self.name, "get_balances"));
        }
        let raw = self
            .fetch(
                &format!(
                    "module=account&action=balancemulti&address={}&tag=latest",
                    addresses.join(",")
                ),
                ResponseKind::BatchBalance,
            )
            .await?;
        Ok(parse_balances(&self.context, &raw))
    }

    async fn get_token_balance(
        &self,
        address: &str,
        contract: &ContractInfo,
    ) -> ExplorerResult<Balance> {
        let raw = self
            .fetch(
                &format!(
                    "module=account&action=tokenbalance&contractaddress={}&address={}&tag=latest",
                    contract.address, address
                ),
                ResponseKind::TokenBalance,
            )
            .await?;
        Ok(parse_token_balance(&raw, contract))
    }

    async fn get_tx_details(&self, hash: &str) -> ExplorerResult<Vec<Transfer>> {
        let raw = self
            .fetch(
                &format!("module=proxy&action=eth_getTransactionByHash&txhash={}", hash),
                ResponseKind::TxDetails,
            )
            .await?;
        let head = self.get_block_head().await.ok();
        let mut meta = proxy_meta(&raw["result"], head);
        match self.receipt_success(hash).await? {
            Some(true) => {}
            Some(false) => return Ok(Vec::new()),
            // 尚未上链
            None => {
                meta.block_height = None;
                meta.block_hash = None;
                meta.confirmations = 0;
            }
        }
        Ok(parse_proxy_tx(&self.context, &raw["result"], &meta))
    }

    async fn get_address_txs(&self, address: &str) -> ExplorerResult<Vec<Transfer>> {
        let raw = self
            .fetch(
                &format!(
                    "module=account&action=txlist&address={}&page=1&offset={}&sort=desc",
                    address, PAGE_SIZE
                ),
                ResponseKind::AddressTxs,
            )
            .await?;
        Ok(json::array_field(&raw, "result")
            .into_iter()
            .flatten()
            .filter_map(|tx| parse_account_tx(&self.context, tx, None))
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
                    "module=account&action=tokentx&contractaddress={}&address={}&page=1&offset={}&sort=desc",
                    contract.address, address, PAGE_SIZE
                ),
                ResponseKind::TokenTxs,
            )
            .await?;
        let address = self.context.normalize(address);
        Ok(json::array_field(&raw, "result")
            .into_iter()
            .flatten()
            .filter_map(|tx| parse_account_tx(&self.context, tx, Some(contract)))
            .filter(|t| matches_direction(t, &address, direction))
            .collect())
    }

    async fn get_block_txs(&self, height: u64) -> ExplorerResult<Vec<Transfer>> {
        let raw = self
            .fetch(
                &format!(
                    "module=proxy&action=eth_getBlockByNumber&tag=0x{:x}&boolean=true",
                    height
                ),
                ResponseKind::BlockTxs,
            )
            .await?;
        Ok(parse_block(&self.context, &raw))
    }

    async fn get_block_head(&self) -> ExplorerResult<u64> {
        let raw = self
            .fetch("module=proxy&action=eth_blockNumber", ResponseKind::BlockHead)
            .await?;
        raw["result"]
            .as_str()
            .and_then(json::hex_u64)
            .ok_or_else(|| ExplorerError::validation(&self.name, ResponseKind::BlockHead))
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use serde_json::json;

    use super::*;
    use crate::{
        domain::LedgerModel,
        providers::testing::{context, CannedTransport},
    };

    const FROM: &str = "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed";
    const TO: &str = "0xfb6916095ca1df60bb79ce92ce3ea74c37c5d359";
    const USDT: &str = "0xdac17f958d2ee523a2206206994597c13d831ec7";

    fn eth() -> ParserContext {
        context("ETH", "ETH", 18, LedgerModel::Account, Decimal::ZERO)
    }

    fn adapter(transport: CannedTransport) -> BlockscanAdapter {
        BlockscanAdapter::new(
            "eth_blockscan".into(),
            "https://scan.example".into(),
            Some("KEY".into()),
            eth(),
            Arc::new(transport),
        )
        .with_flags(AdapterFlags {
            supports_balance_batch: true,
            max_balance_batch: 20,
        })
    }

    fn erc20_input(recipient: &str, amount: u64) -> String {
        format!("{}{:0>64}{:064x}", TRANSFER_SELECTOR, recipient.trim_start_matches("0x"), amount)
    }

    #[test]
    fn test_erc20_transfer_input_is_decoded() {
        let tx = json!({
            "hash": "0x01",
            "from": FROM,
            "to": USDT,
            "input": erc20_input(TO, 2_500_000),
            "value": "0x0",
            "blockNumber": "0x10"
        });
        let meta = proxy_meta(&tx, Some(20));
        assert_eq!(meta.confirmations, 4);
        let transfers = parse_proxy_tx(&eth(), &tx, &meta);
        assert_eq!(transfers.len(), 1);
        let t = &transfers[0];
        assert_eq!(t.symbol, "USDT");
        assert_eq!(t.value, Decimal::from_str("2.5").unwrap());
        assert_eq!(t.to_address, "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359");
        assert_eq!(t.block_height, Some(16));
    }

    #[test]
    fn test_non_hex_input_is_rejected() {
        let mut input = erc20_input(TO, 2_500_000);
        input.replace_range(33..35, "é");
        assert_eq!(input.len(), TRANSFER_INPUT_LEN);
        let tx = json!({
            "hash": "0x05",
            "from": FROM,
            "to": USDT,
            "input": input,
            "value": "0x0"
        });
        assert!(!validate_proxy_tx(&tx));
        assert!(parse_proxy_tx(&eth(), &tx, &TxMeta::new("0x05")).is_empty());
    }

    #[test]
    fn test_unknown_contract_call_is_ignored() {
        let tx = json!({
            "hash": "0x02",
            "from": FROM,
            "to": TO,
            "input": "0x095ea7b3",
            "value": "0x0"
        });
        assert!(parse_proxy_tx(&eth(), &tx, &TxMeta::new("0x02")).is_empty());
    }

    #[test]
    fn test_txlist_skips_failed_and_contract_calls() {
        let ok = json!({
            "hash": "0xa", "blockNumber": "100", "timeStamp": "1700000000",
            "from": FROM, "to": TO, "value": "1000000000000000000",
            "isError": "0", "txreceipt_status": "1", "input": "0x",
            "gasUsed": "21000", "gasPrice": "1000000000", "confirmations": "5"
        });
        let failed = json!({
            "hash": "0xb", "from": FROM, "to": TO, "value": "1", "isError": "1", "input": "0x"
        });
        let call = json!({
            "hash": "0xc", "from": FROM, "to": TO, "value": "1", "isError": "0", "input": "0xabcdef"
        });
        let ctx = eth();
        let t = parse_account_tx(&ctx, &ok, None).unwrap();
        assert_eq!(t.value, Decimal::ONE);
        assert_eq!(t.tx_fee, Decimal::from_str("0.000021").ok());
        assert_eq!(t.confirmations, 5);
        assert!(parse_account_tx(&ctx, &failed, None).is_none());
        assert!(parse_account_tx(&ctx, &call, None).is_none());
    }

    #[tokio::test]
    async fn test_rate_limit_result_maps_to_rate_limit_error() {
        let transport = CannedTransport::new().route(
            "action=balance",
            json!({"status": "0", "message": "NOTOK", "result": "Max rate limit reached"}),
        );
        let err = adapter(transport).get_balance(FROM).await.unwrap_err();
        assert!(err.is_rate_limit());
    }

    #[tokio::test]
    async fn test_batch_balances() {
        let transport = CannedTransport::new().route(
            "action=balancemulti",
            json!({
                "status": "1",
                "message": "OK",
                "result": [
                    {"account": FROM, "balance": "2000000000000000000"},
                    {"account": TO, "balance": "0"}
                ]
            }),
        );
        let balances = adapter(transport)
            .get_balances(&[FROM.to_string(), TO.to_string()])
            .await
            .unwrap();
        assert_eq!(balances.len(), 2);
        assert_eq!(balances[0].0, "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed");
        assert_eq!(balances[0].1.balance, Decimal::from(2));
    }

    #[tokio::test]
    async fn test_failed_receipt_yields_no_transfers() {
        let transport = CannedTransport::new()
            .route(
                "eth_getTransactionByHash",
                json!({"result": {"hash": "0x03", "from": FROM, "to": TO, "input": "0x", "value": "0xde0b6b3a7640000", "blockNumber": "0x1"}}),
            )
            .route("eth_getTransactionReceipt", json!({"result": {"status": "0x0"}}))
            .route("eth_blockNumber", json!({"result": "0x5"}));
        let transfers = adapter(transport).get_tx_details("0x03").await.unwrap();
        assert!(transfers.is_empty());
    }

    #[tokio::test]
    async fn test_native_tx_details() {
        let transport = CannedTransport::new()
            .route(
                "eth_getTransactionByHash",
                json!({"result": {"hash": "0x04", "from": FROM, "to": TO, "input": "0x", "value": "0xde0b6b3a7640000", "blockNumber": "0x1"}}),
            )
            .route("eth_getTransactionReceipt", json!({"result": {"status": "0x1"}}))
            .route("eth_blockNumber", json!({"result": "0x5"}));
        let transfers = adapter(transport).get_tx_details("0x04").await.unwrap();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].value, Decimal::ONE);
        assert_eq!(transfers[0].confirmations, 4);
    }

    #[tokio::test]
    async fn test_pending_tx_is_not_final() {
        let transport = CannedTransport::new()
            .route(
                "eth_getTransactionByHash",
                json!({"result": {"hash": "0x06", "from": FROM, "to": TO, "input": "0x", "value": "0xde0b6b3a7640000", "blockNumber": null}}),
            )
            .route("eth_getTransactionReceipt", json!({"jsonrpc": "2.0", "id": 1, "result": null}))
            .route("eth_blockNumber", json!({"result": "0x5"}));
        let transfers = adapter(transport).get_tx_details("0x06").await.unwrap();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].value, Decimal::ONE);
        assert_eq!(transfers[0].block_height, None);
        assert_eq!(transfers[0].confirmations, 0);
    }
}
