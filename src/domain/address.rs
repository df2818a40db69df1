//! 地址规范化
//!
//! 同一地址在链上可能有多种等价编码（EIP-55 大小写、Bech32 大小写、TON 的 EQ/UQ 形式等），
//! 比较前必须先规范化。校验规则由网络配置的地址格式决定；网络检测使用锚定正则。

use std::collections::HashMap;

use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use sha3::{Digest, Keccak256};

/// 地址规范化与网络识别能力
pub trait AddressCodec: Send + Sync {
    /// 返回规范形式；地址非法时为 None
    fn canonicalize(&self, network: &str, address: &str) -> Option<String>;

    /// 根据地址格式推断所属网络
    fn detect_network(&self, address: &str) -> Option<String>;

    fn equals(&self, network: &str, a: &str, b: &str) -> bool {
        match (self.canonicalize(network, a), self.canonicalize(network, b)) {
            (Some(a), Some(b)) => a == b,
            _ => a.eq_ignore_ascii_case(b),
        }
    }
}

static EVM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("valid regex"));
static BECH32_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z]{1,83}1[02-9ac-hj-np-z]{6,}$").expect("valid regex"));
static BASE58_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[1-9A-HJ-NP-Za-km-z]{25,35}$").expect("valid regex"));

const TON_BOUNCEABLE: u8 = 0x11;
const TON_NON_BOUNCEABLE: u8 = 0x51;
const TON_TESTNET: u8 = 0x80;

/// 网络的地址格式，决定校验与规范化方式
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AddressFormat {
    /// 0x + 40 位十六进制，规范为 EIP-55 校验和形式
    Evm,
    /// Bech32 人类可读前缀与允许的 Base58Check 版本字节
    Utxo { hrp: String, base58_versions: Vec<u8> },
    /// 原始 `wc:hex` 或用户友好形式，规范为可回弹的 base64url 形式
    Ton,
}

impl AddressFormat {
    pub fn utxo(hrp: &str, base58_versions: &[u8]) -> Self {
        AddressFormat::Utxo {
            hrp: hrp.to_string(),
            base58_versions: base58_versions.to_vec(),
        }
    }
}

/// CRC16/XMODEM
fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for byte in data {
        crc ^= (*byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// TON 地址 -> 可回弹的用户友好形式
///
/// 接受 `0:<64 hex>` 原始形式与 EQ/UQ 友好形式（base64url 或标准 base64），
/// 友好形式会校验 CRC；测试网标志保留。
pub fn ton_user_friendly(address: &str) -> Option<String> {
    let address = address.trim();
    let (tag, workchain, hash) = match address.split_once(':') {
        Some((workchain, hash)) => {
            let workchain: i8 = workchain.parse().ok()?;
            (TON_BOUNCEABLE, workchain as u8, hex::decode(hash).ok()?)
        }
        None => {
            let body = address.trim_end_matches('=');
            let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
                .decode(body)
                .or_else(|_| base64::engine::general_purpose::STANDARD_NO_PAD.decode(body))
                .ok()?;
            if bytes.len() != 36 {
                return None;
            }
            if crc16(&bytes[..34]).to_be_bytes() != bytes[34..36] {
                return None;
            }
            let flags = bytes[0] & !TON_TESTNET;
            if flags != TON_BOUNCEABLE && flags != TON_NON_BOUNCEABLE {
                return None;
            }
            (TON_BOUNCEABLE | (bytes[0] & TON_TESTNET), bytes[1], bytes[2..34].to_vec())
        }
    };
    if hash.len() != 32 {
        return None;
    }
    let mut bytes = Vec::with_capacity(36);
    bytes.push(tag);
    bytes.push(workchain);
    bytes.extend_from_slice(&hash);
    let crc = crc16(&bytes);
    bytes.extend_from_slice(&crc.to_be_bytes());
    Some(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// 网络识别规则：按顺序匹配，先命中者胜出
#[derive(Debug, Clone)]
pub struct DetectionRule {
    pub network: String,
    pub pattern: Regex,
}

impl DetectionRule {
    pub fn new(network: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            network: network.into(),
            pattern: Regex::new(pattern)?,
        })
    }
}

pub struct DefaultAddressCodec {
    rules: Vec<DetectionRule>,
    formats: HashMap<String, AddressFormat>,
}

impl Default for DefaultAddressCodec {
    fn default() -> Self {
        let rules = [
            ("ETH", r"^0x[0-9a-fA-F]{40}$"),
            ("BTC", r"^(bc1[02-9ac-hj-np-z]{11,71}|[13][1-9A-HJ-NP-Za-km-z]{25,34})$"),
            ("LTC", r"^(ltc1[02-9ac-hj-np-z]{11,71}|[LM][1-9A-HJ-NP-Za-km-z]{26,33})$"),
            ("TON", r"^([EU]Q[A-Za-z0-9_-]{46}|-?[0-9]+:[0-9a-fA-F]{64})$"),
        ]
        .into_iter()
        .filter_map(|(network, pattern)| DetectionRule::new(network, pattern).ok())
        .collect();
        let formats = [
            ("ETH", AddressFormat::Evm),
            ("FTM", AddressFormat::Evm),
            ("BTC", AddressFormat::utxo("bc", &[0x00, 0x05])),
            ("LTC", AddressFormat::utxo("ltc", &[0x30, 0x32, 0x05])),
            ("TON", AddressFormat::Ton),
        ]
        .into_iter()
        .map(|(network, format)| (network.to_string(), format))
        .collect();
        Self { rules, formats }
    }
}

impl DefaultAddressCodec {
    /// 覆盖或新增某网络的地址格式
    pub fn with_format(mut self, network: &str, format: AddressFormat) -> Self {
        self.formats.insert(network.to_ascii_uppercase(), format);
        self
    }

    pub fn format(&self, network: &str) -> Option<&AddressFormat> {
        self.formats.get(&network.to_ascii_uppercase())
    }

    /// EIP-55 校验和形式
    /// https://eips.ethereum.org/EIPS/eip-55
    pub fn to_checksum(address: &str) -> Option<String> {
        if !EVM_RE.is_match(address) {
            return None;
        }
        let lower = address[2..].to_ascii_lowercase();
        let hash = Keccak256::digest(lower.as_bytes());
        let hash_hex = hex::encode(hash);

        let mut out = String::with_capacity(42);
        out.push_str("0x");
        for (ch, nibble) in lower.chars().zip(hash_hex.chars()) {
            let upper = nibble.to_digit(16).map(|n| n >= 8).unwrap_or(false);
            if ch.is_ascii_alphabetic() && upper {
                out.push(ch.to_ascii_uppercase());
            } else {
                out.push(ch);
            }
        }
        Some(out)
    }

    fn canonical_evm(address: &str) -> Option<String> {
        let body = address
            .strip_prefix("0x")
            .or_else(|| address.strip_prefix("0X"))?;
        Self::to_checksum(&format!("0x{}", body))
    }

    fn canonical_bech32(address: &str) -> Option<String> {
        let lower = address.to_ascii_lowercase();
        let valid = bech32::segwit::decode(&lower).is_ok() || bech32::decode(&lower).is_ok();
        valid.then_some(lower)
    }

    /// 校验通过时返回版本字节
    fn base58check_version(address: &str) -> Option<u8> {
        let decoded = bs58::decode(address).into_vec().ok()?;
        if decoded.len() < 5 {
            return None;
        }
        let (payload, checksum) = decoded.split_at(decoded.len() - 4);
        let digest = Sha256::digest(Sha256::digest(payload));
        (&digest[..4] == checksum).then_some(payload[0])
    }

    /// `hrp` / `versions` 为 None 时不限制前缀
    fn canonical_utxo(address: &str, hrp: Option<&str>, versions: Option<&[u8]>) -> Option<String> {
        // Bech32 只允许全大写或全小写
        let lower = address.to_ascii_lowercase();
        let single_case = address == lower || address == address.to_ascii_uppercase();
        let hrp_ok = hrp.map_or(true, |hrp| lower.starts_with(&format!("{}1", hrp)));
        if single_case && hrp_ok && BECH32_RE.is_match(&lower) {
            if let Some(canonical) = Self::canonical_bech32(&lower) {
                return Some(canonical);
            }
        }
        if BASE58_RE.is_match(address) {
            let version = Self::base58check_version(address)?;
            return versions
                .map_or(true, |allowed| allowed.contains(&version))
                .then(|| address.to_string());
        }
        None
    }

    fn canonical_with(format: &AddressFormat, address: &str) -> Option<String> {
        match format {
            AddressFormat::Evm => Self::canonical_evm(address),
            AddressFormat::Utxo { hrp, base58_versions } => {
                Self::canonical_utxo(address, Some(hrp.as_str()), Some(base58_versions.as_slice()))
            }
            AddressFormat::Ton => ton_user_friendly(address),
        }
    }
}

impl AddressCodec for DefaultAddressCodec {
    /// 已配置格式的网络按其格式校验；未配置的网络依次尝试各类格式
    fn canonicalize(&self, network: &str, address: &str) -> Option<String> {
        let address = address.trim();
        if address.is_empty() {
            return None;
        }
        if let Some(format) = self.format(network) {
            return Self::canonical_with(format, address);
        }
        Self::canonical_evm(address)
            .or_else(|| Self::canonical_utxo(address, None, None))
            .or_else(|| ton_user_friendly(address))
    }

    fn detect_network(&self, address: &str) -> Option<String> {
        let address = address.trim();
        self.rules
            .iter()
            .find(|rule| rule.pattern.is_match(address))
            .map(|rule| rule.network.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eip55_checksum() {
        let codec = DefaultAddressCodec::default();
        assert_eq!(
            codec
                .canonicalize("ETH", "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed")
                .as_deref(),
            Some("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed")
        );
        assert!(codec.canonicalize("ETH", "0x1234").is_none());
    }

    #[test]
    fn test_bech32_is_lowercased() {
        let codec = DefaultAddressCodec::default();
        let upper = "BC1QW508D6QEJXTDG4Y5R3ZARVARY0C5XW7KV8F3T4";
        assert_eq!(
            codec.canonicalize("BTC", upper).as_deref(),
            Some("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4")
        );
        // 校验和错误
        assert!(codec
            .canonicalize("BTC", "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t5")
            .is_none());
    }

    #[test]
    fn test_base58check() {
        let codec = DefaultAddressCodec::default();
        let genesis = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";
        assert_eq!(codec.canonicalize("BTC", genesis).as_deref(), Some(genesis));
        assert!(codec
            .canonicalize("BTC", "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNb")
            .is_none());
    }

    #[test]
    fn test_detect_network() {
        let codec = DefaultAddressCodec::default();
        assert_eq!(
            codec
                .detect_network("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed")
                .as_deref(),
            Some("ETH")
        );
        assert_eq!(
            codec
                .detect_network("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4")
                .as_deref(),
            Some("BTC")
        );
        assert_eq!(
            codec
                .detect_network("EQCxE6mUtQJKFnGfaROTKOt1lZbDiiX1kCixRv7Nw2Id_sDs")
                .as_deref(),
            Some("TON")
        );
        assert_eq!(codec.detect_network("not-an-address"), None);
    }

    #[test]
    fn test_equals_uses_canonical_form() {
        let codec = DefaultAddressCodec::default();
        assert!(codec.equals(
            "ETH",
            "0x5AAEB6053F3E94C9B9A09F33669435E7EF1BEAED",
            "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed"
        ));
    }

    #[test]
    fn test_garbage_is_rejected() {
        let codec = DefaultAddressCodec::default();
        assert!(codec.canonicalize("ETH", "not-an-address").is_none());
        assert!(codec.canonicalize("TON", "not-an-address").is_none());
        assert!(codec.canonicalize("DOGE", "not-an-address").is_none());
    }

    #[test]
    fn test_format_is_chosen_by_network() {
        let codec = DefaultAddressCodec::default();
        // 比特币地址在以太坊网络上非法
        assert!(codec
            .canonicalize("ETH", "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa")
            .is_none());
        // hrp 不符
        assert!(codec
            .canonicalize("LTC", "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4")
            .is_none());
        // 版本字节不在允许列表
        let codec = codec.with_format("BTC", AddressFormat::utxo("bc", &[0x05]));
        assert!(codec
            .canonicalize("BTC", "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa")
            .is_none());
    }

    #[test]
    fn test_ton_forms_are_unified() {
        let codec = DefaultAddressCodec::default();
        let bounceable = "EQCxE6mUtQJKFnGfaROTKOt1lZbDiiX1kCixRv7Nw2Id_sDs";
        let forms = [
            bounceable,
            "UQCxE6mUtQJKFnGfaROTKOt1lZbDiiX1kCixRv7Nw2Id_p0p",
            "EQCxE6mUtQJKFnGfaROTKOt1lZbDiiX1kCixRv7Nw2Id/sDs",
            "0:b113a994b5024a16719f69139328eb759596c38a25f59028b146fecdc3621dfe",
        ];
        for form in forms {
            assert_eq!(codec.canonicalize("TON", form).as_deref(), Some(bounceable), "{}", form);
        }
        assert!(codec.equals("TON", forms[0], forms[1]));
        // CRC 错误
        assert!(codec
            .canonicalize("TON", "EQCxE6mUtQJKFnGfaROTKOt1lZbDiiX1kCixRv7Nw2Id_sDt")
            .is_none());
        assert_eq!(ton_user_friendly("0:zz"), None);
    }
}
