//! 上游浏览器 HTTP 传输：超时、有限重试与错误分类
//!
//! - 429 映射为限流错误，不在本层重试
//! - 连接/超时/TLS/5xx 映射为传输错误，按配置做少量指数回退重试
//! - 其他 4xx 与无法解码为 JSON 的响应体映射为校验错误

use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;

use crate::{
    config::UpstreamConfig,
    error::{ExplorerError, ExplorerResult},
};

pub type Headers = Vec<(String, String)>;

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get_json(&self, provider: &str, url: &str, headers: &Headers) -> ExplorerResult<Value>;

    async fn post_json(
        &self,
        provider: &str,
        url: &str,
        body: &Value,
        headers: &Headers,
    ) -> ExplorerResult<Value>;
}

#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    retries: usize,
}

impl ReqwestTransport {
    pub fn new(config: &UpstreamConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(config.user_agent.clone())
            .build()
            .context("Failed to build upstream HTTP client")?;
        Ok(Self {
            client,
            retries: config.retries,
        })
    }

    async fn send(
        &self,
        provider: &str,
        build: impl Fn() -> reqwest::RequestBuilder + Send + Sync,
    ) -> ExplorerResult<Value> {
        let mut attempt = 0usize;
        loop {
            let start = Instant::now();
            let err = match build().send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        crate::metrics::observe_upstream_latency_ms(start.elapsed().as_millis(), false);
                        return Err(ExplorerError::rate_limit(provider));
                    }
                    if status.is_success() {
                        let v = resp.json::<Value>().await.map_err(|e| {
                            crate::metrics::observe_upstream_latency_ms(start.elapsed().as_millis(), false);
                            tracing::debug!(provider = %provider, error = %e, "non-json body");
                            ExplorerError::validation(provider, "non-json body")
                        })?;
                        crate::metrics::observe_upstream_latency_ms(start.elapsed().as_millis(), true);
                        return Ok(v);
                    }
                    crate::metrics::observe_upstream_latency_ms(start.elapsed().as_millis(), false);
                    // 4xx 视为该提供方无可用数据，不重试
                    if status.is_client_error() {
                        return Err(ExplorerError::validation(provider, format!("http status {}", status.as_u16())));
                    }
                    ExplorerError::transport(provider, format!("http status {}", status))
                }
                Err(e) => {
                    crate::metrics::observe_upstream_latency_ms(start.elapsed().as_millis(), false);
                    ExplorerError::transport(provider, e)
                }
            };

            attempt += 1;
            if attempt > self.retries {
                tracing::warn!(provider = %provider, attempts = attempt, error = %err, "upstream request failed");
                return Err(err);
            }
            let backoff = 50 * (1 << (attempt.min(5))); // 简单指数回退，最大 ~1600ms
            tokio::time::sleep(Duration::from_millis(backoff as u64)).await;
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get_json(&self, provider: &str, url: &str, headers: &Headers) -> ExplorerResult<Value> {
        self.send(provider, || {
            headers
                .iter()
                .fold(self.client.get(url), |req, (k, v)| req.header(k.as_str(), v.as_str()))
        })
        .await
    }

    async fn post_json(
        &self,
        provider: &str,
        url: &str,
        body: &Value,
        headers: &Headers,
    ) -> ExplorerResult<Value> {
        self.send(provider, || {
            headers
                .iter()
                .fold(self.client.post(url).json(body), |req, (k, v)| {
                    req.header(k.as_str(), v.as_str())
                })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        let transport = ReqwestTransport::new(&UpstreamConfig {
            timeout_ms: 200,
            retries: 0,
            user_agent: "ironscan-test".into(),
        })
        .unwrap();
        let err = transport
            .get_json("local", "http://127.0.0.1:9/unreachable", &Vec::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Transport);
        assert!(err.is_transient());
    }
}
