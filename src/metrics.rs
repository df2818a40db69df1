use std::{
    collections::{BTreeMap, HashMap},
    sync::{Mutex, MutexGuard, OnceLock},
};

static METRICS: OnceLock<Mutex<MetricsState>> = OnceLock::new();

/// (network, provider, error_kind, operation)
type ApiErrorKey = (String, String, String, String);

struct MetricsState {
    api_errors: HashMap<ApiErrorKey, u64>,
    // (provider, network)
    missed_block_txs: HashMap<(String, String), u64>,
    latest_block_processed: BTreeMap<String, u64>,
    // 上游成功/失败与时延统计（毫秒）
    upstream_ok: u64,
    upstream_err: u64,
    upstream_latency_sum_ms: u128,
    // 简易直方图分桶（毫秒）：<50, <100, <250, <500, <1000, >=1000
    upstream_hist_buckets: [u64; 6],
}

fn state() -> MutexGuard<'static, MetricsState> {
    let lock = METRICS.get_or_init(|| {
        Mutex::new(MetricsState {
            api_errors: HashMap::new(),
            missed_block_txs: HashMap::new(),
            latest_block_processed: BTreeMap::new(),
            upstream_ok: 0,
            upstream_err: 0,
            upstream_latency_sum_ms: 0,
            upstream_hist_buckets: [0; 6],
        })
    });
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(), // 避免因锁污染导致 panic
    }
}

/// 每次降级切换或终态失败计一次
pub fn inc_api_error(network: &str, provider: &str, error_kind: &str, operation: &str) {
    let mut s = state();
    let key = (
        network.to_string(),
        provider.to_string(),
        error_kind.to_string(),
        operation.to_string(),
    );
    *s.api_errors.entry(key).or_insert(0) += 1;
}

/// 某网络某操作的累计错误数（跨 provider 与错误类别）
pub fn api_error_count(network: &str, operation: &str) -> u64 {
    let s = state();
    s.api_errors
        .iter()
        .filter(|((n, _, _, o), _)| n == network && o == operation)
        .map(|(_, v)| *v)
        .sum()
}

pub fn inc_missed_block_txs(provider: &str, network: &str) {
    let mut s = state();
    *s.missed_block_txs
        .entry((provider.to_string(), network.to_string()))
        .or_insert(0) += 1;
}

pub fn set_latest_block_processed(network: &str, height: u64) {
    let mut s = state();
    s.latest_block_processed.insert(network.to_string(), height);
}

pub fn latest_block_processed(network: &str) -> Option<u64> {
    state().latest_block_processed.get(network).copied()
}

pub fn observe_upstream_latency_ms(latency_ms: u128, ok: bool) {
    let mut s = state();
    if ok {
        s.upstream_ok += 1;
    } else {
        s.upstream_err += 1;
    }
    s.upstream_latency_sum_ms += latency_ms;
    let b = if latency_ms < 50 {
        0
    } else if latency_ms < 100 {
        1
    } else if latency_ms < 250 {
        2
    } else if latency_ms < 500 {
        3
    } else if latency_ms < 1000 {
        4
    } else {
        5
    };
    s.upstream_hist_buckets[b] += 1;
}

pub fn render_prometheus() -> String {
    let s = state();
    let mut out = String::new();

    out.push_str("# HELP ironscan_api_errors_total Explorer API failures and fallbacks\n");
    out.push_str("# TYPE ironscan_api_errors_total counter\n");
    let mut api_errors: Vec<_> = s.api_errors.iter().collect();
    api_errors.sort();
    for ((network, provider, kind, operation), v) in api_errors {
        out.push_str(&format!(
            "ironscan_api_errors_total{{network=\"{}\",provider=\"{}\",error_kind=\"{}\",operation=\"{}\"}} {}\n",
            network, provider, kind, operation, v
        ));
    }

    out.push_str("# HELP ironscan_missed_block_txs_total Block pages rejected by validation\n");
    out.push_str("# TYPE ironscan_missed_block_txs_total counter\n");
    let mut missed: Vec<_> = s.missed_block_txs.iter().collect();
    missed.sort();
    for ((provider, network), v) in missed {
        out.push_str(&format!(
            "ironscan_missed_block_txs_total{{provider=\"{}\",network=\"{}\"}} {}\n",
            provider, network, v
        ));
    }

    out.push_str("# HELP ironscan_latest_block_processed Last block height processed per network\n");
    out.push_str("# TYPE ironscan_latest_block_processed gauge\n");
    for (network, height) in s.latest_block_processed.iter() {
        out.push_str(&format!(
            "ironscan_latest_block_processed{{network=\"{}\"}} {}\n",
            network, height
        ));
    }

    // 上游统计
    out.push_str("# HELP ironscan_upstream_requests_total Upstream requests\n");
    out.push_str("# TYPE ironscan_upstream_requests_total counter\n");
    out.push_str(&format!(
        "ironscan_upstream_requests_total{{result=\"ok\"}} {}\n",
        s.upstream_ok
    ));
    out.push_str(&format!(
        "ironscan_upstream_requests_total{{result=\"err\"}} {}\n",
        s.upstream_err
    ));

    out.push_str("# HELP ironscan_upstream_latency_ms_sum Sum of upstream latency in ms\n");
    out.push_str("# TYPE ironscan_upstream_latency_ms_sum counter\n");
    out.push_str(&format!(
        "ironscan_upstream_latency_ms_sum {}\n",
        s.upstream_latency_sum_ms
    ));

    out.push_str("# HELP ironscan_upstream_latency_ms_bucket Upstream latency histogram buckets\n");
    out.push_str("# TYPE ironscan_upstream_latency_ms_bucket histogram\n");
    let bounds = [50, 100, 250, 500, 1000];
    let mut cumulative = 0u64;
    for (i, bound) in bounds.iter().enumerate() {
        cumulative += s.upstream_hist_buckets[i];
        out.push_str(&format!(
            "ironscan_upstream_latency_ms_bucket{{le=\"{}\"}} {}\n",
            bound, cumulative
        ));
    }
    // +Inf 桶
    out.push_str(&format!(
        "ironscan_upstream_latency_ms_bucket{{le=\"+Inf\"}} {}\n",
        s.upstream_hist_buckets.iter().sum::<u64>()
    ));

    out
}
