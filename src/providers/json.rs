//! JSON 字段读取与数值换算
//!
//! 上游对数值字段的编码并不统一（数字、十进制字符串、0x 十六进制），
//! 这里统一成 Option，读取失败由各校验器在解析前拦截。

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde_json::Value;

/// TON 区块标识 `(workchain,shard,seqno)`
static TON_BLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\((-?\d+),([0-9a-fA-F]+),(\d+)\)").expect("valid regex"));

/// 字符串或数字字段，统一为字符串
pub fn str_field(v: &Value, key: &str) -> Option<String> {
    match v.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn u64_field(v: &Value, key: &str) -> Option<u64> {
    match v.get(key)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

pub fn i64_field(v: &Value, key: &str) -> Option<i64> {
    match v.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

pub fn bool_field(v: &Value, key: &str) -> Option<bool> {
    v.get(key)?.as_bool()
}

pub fn array_field<'a>(v: &'a Value, key: &str) -> Option<&'a Vec<Value>> {
    v.get(key)?.as_array()
}

/// 十进制整数字符串（可带负号）
pub fn is_integer_str(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

pub fn has_integer(v: &Value, key: &str) -> bool {
    match v.get(key) {
        Some(Value::Number(n)) => n.is_i64() || n.is_u64(),
        Some(Value::String(s)) => is_integer_str(s),
        _ => false,
    }
}

pub fn has_hex(v: &Value, key: &str) -> bool {
    v.get(key)
        .and_then(Value::as_str)
        .is_some_and(|s| hex_u128(s).is_some())
}

/// 最小单位整数 -> 按精度换算的数值
pub fn scale_units(raw: &str, decimals: u32) -> Option<Decimal> {
    let raw = raw.trim();
    if !is_integer_str(raw) {
        return None;
    }
    let units: i128 = raw.parse().ok()?;
    Decimal::try_from_i128_with_scale(units, decimals)
        .ok()
        .map(|d| d.normalize())
}

pub fn hex_u128(s: &str) -> Option<u128> {
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))?;
    if digits.is_empty() {
        return Some(0);
    }
    u128::from_str_radix(digits, 16).ok()
}

pub fn hex_u64(s: &str) -> Option<u64> {
    hex_u128(s).and_then(|n| u64::try_from(n).ok())
}

/// 0x 十六进制最小单位 -> 数值
pub fn hex_units(s: &str, decimals: u32) -> Option<Decimal> {
    let units = i128::try_from(hex_u128(s)?).ok()?;
    Decimal::try_from_i128_with_scale(units, decimals)
        .ok()
        .map(|d| d.normalize())
}

pub fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    if secs <= 0 {
        return None;
    }
    DateTime::from_timestamp(secs, 0)
}

/// 确认数：按出块间隔估算
pub fn estimated_confirmations(now: DateTime<Utc>, at: Option<DateTime<Utc>>, block_secs: i64) -> u64 {
    match at {
        Some(at) if block_secs > 0 => {
            let elapsed = (now - at).num_seconds();
            u64::try_from(elapsed / block_secs).unwrap_or(0)
        }
        _ => 0,
    }
}

/// 从 `(0,8000000000000000,12345)` 形式的区块标识中取出 seqno
pub fn ton_block_seqno(block: &str) -> Option<u64> {
    TON_BLOCK_RE
        .captures(block)
        .and_then(|c| c.get(3))
        .and_then(|m| m.as_str().parse().ok())
}
