//! 原生币与代币提现的合并对账
//!
//! 原生提现与各代币提现分别查询，截断到共同的时间视界后去重合并。
//! 代币记录以结算哈希为准，无法解析结算哈希的记录直接丢弃。

use std::{collections::HashSet, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use crate::{
    config::ReconciliationConfig,
    domain::{AddressTx, ContractInfo, Direction, WalletTransaction},
    error::ExplorerResult,
    explorer::{ExplorerInterface, ProviderRegistry},
    infrastructure::WorkerPool,
    providers::Capability,
};

pub struct WithdrawalReconciler {
    registry: Arc<ProviderRegistry>,
    settings: ReconciliationConfig,
}

impl WithdrawalReconciler {
    pub fn new(registry: Arc<ProviderRegistry>, settings: ReconciliationConfig) -> Self {
        Self { registry, settings }
    }

    fn window(&self, interface: &ExplorerInterface) -> Duration {
        let hours = interface.network().withdrawal_window_hours;
        let hours = if hours > 0 {
            hours
        } else {
            self.settings.default_window_hours
        };
        Duration::hours(hours)
    }

    /// 时间窗口内的合并提现列表，按时间倒序（未确认的在前）
    ///
    /// 原生查询失败时整体失败；单个代币失败只影响该代币。
    pub async fn get_withdrawals(
        &self,
        address: &str,
        network: &str,
    ) -> ExplorerResult<Vec<WalletTransaction>> {
        let interface = self.registry.interface(network)?;
        let canonical = interface.canonical(address)?;
        let since = Utc::now() - self.window(&interface);

        let mut natives: Vec<AddressTx> = interface
            .get_address_txs(&canonical, Some(Direction::Outgoing))
            .await?
            .into_iter()
            .filter(|tx| within(tx.date, since))
            .collect();
        let mut tokens = self.token_withdrawals(&interface, &canonical, since).await;

        truncate_to_common_horizon(&mut natives, &mut tokens);
        let merged = merge_withdrawals(natives, tokens);
        tracing::info!(
            network = %interface.network().name,
            address = %canonical,
            withdrawals = merged.len(),
            "withdrawals reconciled"
        );

        let min_valid = interface.network().min_valid_tx_amount;
        Ok(merged
            .into_iter()
            .map(|tx| {
                let min = if tx.contract_address.is_some() {
                    Decimal::ZERO
                } else {
                    min_valid
                };
                WalletTransaction::from_address_tx(&canonical, tx, min, None)
            })
            .collect())
    }

    async fn token_withdrawals(
        &self,
        interface: &Arc<ExplorerInterface>,
        address: &str,
        since: DateTime<Utc>,
    ) -> Vec<AddressTx> {
        if !interface.supports(Capability::TokenTxs) {
            return Vec::new();
        }
        let contracts: Vec<ContractInfo> = self
            .registry
            .contracts()
            .contracts(&interface.network().name)
            .into_iter()
            .cloned()
            .collect();

        let pool = WorkerPool::new(self.settings.token_workers);
        let results = pool
            .run(contracts, |contract| async move {
                let txs = interface
                    .get_token_txs(address, &contract, Some(Direction::Outgoing))
                    .await;
                match txs {
                    Ok(txs) => resolve_settlement(interface, txs, since).await,
                    Err(err) => {
                        tracing::warn!(contract = %contract.address, error = %err, "token withdrawals failed");
                        Vec::new()
                    }
                }
            })
            .await;
        results.into_iter().flatten().collect()
    }
}

/// 替换为结算哈希；无法解析的记录丢弃
async fn resolve_settlement(
    interface: &ExplorerInterface,
    txs: Vec<AddressTx>,
    since: DateTime<Utc>,
) -> Vec<AddressTx> {
    let mut resolved = Vec::with_capacity(txs.len());
    for mut tx in txs.into_iter().filter(|tx| within(tx.date, since)) {
        match interface.settlement_hash(&tx.hash).await {
            Ok(Some(hash)) => {
                tx.hash = hash;
                resolved.push(tx);
            }
            Ok(None) => tracing::debug!(hash = %tx.hash, "settlement hash not resolved yet"),
            Err(err) => tracing::warn!(hash = %tx.hash, error = %err, "settlement hash lookup failed"),
        }
    }
    resolved
}

/// 没有时间戳的记录（未确认）视为在窗口内
fn within(date: Option<DateTime<Utc>>, since: DateTime<Utc>) -> bool {
    date.map_or(true, |d| d >= since)
}

fn max_date(txs: &[AddressTx]) -> Option<DateTime<Utc>> {
    txs.iter().filter_map(|tx| tx.date).max()
}

/// 把最新时间戳较晚的一侧截断到另一侧的最新时间戳
///
/// 任一侧没有带时间戳的记录时不截断；无时间戳的记录保留。
pub fn truncate_to_common_horizon(a: &mut Vec<AddressTx>, b: &mut Vec<AddressTx>) {
    let (Some(max_a), Some(max_b)) = (max_date(a), max_date(b)) else {
        return;
    };
    let (later, horizon) = if max_a > max_b {
        (a, max_b)
    } else if max_b > max_a {
        (b, max_a)
    } else {
        return;
    };
    later.retain(|tx| tx.date.map_or(true, |d| d <= horizon));
}

/// 与代币记录同哈希的原生记录被丢弃，然后拼接并按时间倒序排列
pub fn merge_withdrawals(natives: Vec<AddressTx>, tokens: Vec<AddressTx>) -> Vec<AddressTx> {
    let token_hashes: HashSet<String> = tokens.iter().map(|t| t.hash.to_ascii_lowercase()).collect();
    let mut merged: Vec<AddressTx> = natives
        .into_iter()
        .filter(|n| !token_hashes.contains(&n.hash.to_ascii_lowercase()))
        .chain(tokens)
        .collect();
    // None 排在最前
    merged.sort_by(|x, y| match (x.date, y.date) {
        (None, None) => std::cmp::Ordering::Equal,
        (None, Some(_)) => std::cmp::Ordering::Less,
        (Some(_), None) => std::cmp::Ordering::Greater,
        (Some(x), Some(y)) => y.cmp(&x),
    });
    merged
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::domain::{Transfer, TxMeta};

    fn tx(hash: &str, secs: Option<i64>, token: Option<&str>) -> AddressTx {
        let mut meta = TxMeta::new(hash);
        meta.date = secs.and_then(|s| Utc.timestamp_opt(s, 0).single());
        let symbol = if token.is_some() { "USDT" } else { "TON" };
        let transfer = Transfer::from_meta(
            &meta,
            "A",
            "B",
            Decimal::ONE,
            symbol,
            token.map(str::to_string),
        );
        AddressTx::from_transfer("A", transfer)
    }

    #[test]
    fn test_later_set_is_truncated() {
        let mut natives = vec![tx("n1", Some(100), None), tx("n2", Some(300), None)];
        let mut tokens = vec![tx("t1", Some(50), Some("C")), tx("t2", Some(200), Some("C"))];
        truncate_to_common_horizon(&mut natives, &mut tokens);
        assert_eq!(max_date(&natives), max_date(&tokens));
        assert_eq!(natives.len(), 1);
        assert_eq!(tokens.len(), 2);
    }

    #[test]
    fn test_empty_set_disables_truncation() {
        let mut natives = vec![tx("n1", Some(100), None), tx("n2", Some(300), None)];
        let mut tokens = Vec::new();
        truncate_to_common_horizon(&mut natives, &mut tokens);
        assert_eq!(natives.len(), 2);
    }

    #[test]
    fn test_undated_entries_survive_truncation() {
        let mut natives = vec![tx("n1", None, None), tx("n2", Some(300), None)];
        let mut tokens = vec![tx("t1", Some(200), Some("C"))];
        truncate_to_common_horizon(&mut natives, &mut tokens);
        assert_eq!(natives.len(), 1);
        assert_eq!(natives[0].hash, "n1");
    }

    #[test]
    fn test_token_entry_wins_on_shared_hash() {
        let natives = vec![tx("H1", Some(100), None), tx("h2", Some(150), None)];
        let tokens = vec![tx("h1", Some(100), Some("C"))];
        let merged = merge_withdrawals(natives, tokens);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].hash, "h2");
        assert_eq!(merged[1].contract_address.as_deref(), Some("C"));
    }

    #[test]
    fn test_window_accepts_pending() {
        let since = Utc.timestamp_opt(1000, 0).single().unwrap();
        assert!(within(None, since));
        assert!(!within(Utc.timestamp_opt(999, 0).single(), since));
    }
}
