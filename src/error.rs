//! 统一错误类型
//!
//! 错误分类与上游浏览器的故障模式一一对应：
//! - Transport：超时、代理、TLS、5xx，属于瞬时错误，触发降级
//! - RateLimit：被限流，只重试一次
//! - Validation：响应结构未通过校验，视为"无可用数据"
//! - Unexpected：其他无法归类的错误

use std::fmt;

use thiserror::Error;

/// 错误类别（用于指标标签与重试决策）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transport,
    RateLimit,
    Validation,
    Unexpected,
    Unsupported,
    InvalidInput,
    Cache,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transport => "transport",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Validation => "validation",
            ErrorKind::Unexpected => "unexpected",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Cache => "cache",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExplorerError {
    #[error("transport error from {provider}: {message}")]
    Transport { provider: String, message: String },

    #[error("rate limited by {provider}")]
    RateLimit { provider: String },

    #[error("{provider} returned a {kind} response rejected by validation")]
    Validation { provider: String, kind: String },

    #[error("unexpected error from {provider}: {message}")]
    Unexpected { provider: String, message: String },

    #[error("all providers failed for {network}/{capability}: {last}")]
    AllProvidersFailed {
        network: String,
        capability: String,
        last: Box<ExplorerError>,
    },

    #[error("network {0} is not supported")]
    UnsupportedNetwork(String),

    #[error("currency {currency} is not supported on {network}")]
    UnsupportedCurrency { network: String, currency: String },

    #[error("capability {capability} is not configured for {network}")]
    CapabilityUnavailable { network: String, capability: String },

    #[error("{provider} does not implement {operation}")]
    NotImplemented { provider: String, operation: String },

    #[error("invalid address {address} for {network}")]
    InvalidAddress { network: String, address: String },

    #[error("cache error: {0}")]
    Cache(String),
}

pub type ExplorerResult<T> = Result<T, ExplorerError>;

impl ExplorerError {
    pub fn transport(provider: impl Into<String>, message: impl fmt::Display) -> Self {
        ExplorerError::Transport {
            provider: provider.into(),
            message: message.to_string(),
        }
    }

    pub fn rate_limit(provider: impl Into<String>) -> Self {
        ExplorerError::RateLimit {
            provider: provider.into(),
        }
    }

    pub fn validation(provider: impl Into<String>, kind: impl fmt::Display) -> Self {
        ExplorerError::Validation {
            provider: provider.into(),
            kind: kind.to_string(),
        }
    }

    pub fn unexpected(provider: impl Into<String>, message: impl fmt::Display) -> Self {
        ExplorerError::Unexpected {
            provider: provider.into(),
            message: message.to_string(),
        }
    }

    pub fn not_implemented(provider: impl Into<String>, operation: impl Into<String>) -> Self {
        ExplorerError::NotImplemented {
            provider: provider.into(),
            operation: operation.into(),
        }
    }

    /// 错误类别；降级链耗尽时取最后一次失败的类别
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExplorerError::Transport { .. } => ErrorKind::Transport,
            ExplorerError::RateLimit { .. } => ErrorKind::RateLimit,
            ExplorerError::Validation { .. } => ErrorKind::Validation,
            ExplorerError::Unexpected { .. } => ErrorKind::Unexpected,
            ExplorerError::AllProvidersFailed { last, .. } => last.kind(),
            ExplorerError::UnsupportedNetwork(_)
            | ExplorerError::UnsupportedCurrency { .. }
            | ExplorerError::CapabilityUnavailable { .. }
            | ExplorerError::NotImplemented { .. } => ErrorKind::Unsupported,
            ExplorerError::InvalidAddress { .. } => ErrorKind::InvalidInput,
            ExplorerError::Cache(_) => ErrorKind::Cache,
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        self.kind() == ErrorKind::RateLimit
    }

    /// 可通过切换提供方恢复的错误
    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport | ErrorKind::RateLimit)
    }

    /// 降级链中可切换到下一个提供方的错误；其余错误直接上抛
    pub fn should_fallback(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Transport | ErrorKind::RateLimit | ErrorKind::Validation | ErrorKind::Unsupported
        )
    }

    /// 产生该错误的提供方名称（如有）
    pub fn provider(&self) -> Option<&str> {
        match self {
            ExplorerError::Transport { provider, .. }
            | ExplorerError::RateLimit { provider }
            | ExplorerError::Validation { provider, .. }
            | ExplorerError::Unexpected { provider, .. }
            | ExplorerError::NotImplemented { provider, .. } => Some(provider),
            ExplorerError::AllProvidersFailed { last, .. } => last.provider(),
            _ => None,
        }
    }
}

impl From<redis::RedisError> for ExplorerError {
    fn from(err: redis::RedisError) -> Self {
        ExplorerError::Cache(err.to_string())
    }
}
