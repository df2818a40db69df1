//! IronScan 主入口
//! 周期扫描配置的网络，输出新区块涉及的地址

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use ironscan::{
    config::Config,
    explorer::ProviderRegistry,
    infrastructure::{logging::init_logging, KvStore, MemoryKv, RedisCtx, ReqwestTransport},
    metrics,
    service::BlockchainExplorer,
};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 配置
    let config_path = std::env::var("CONFIG_PATH").ok();
    let config = Config::from_env_and_file(config_path.as_deref())?;
    config.validate()?;

    // 2. 日志；guard 持有到进程退出
    let _guard = init_logging(&config.logging).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting ironscan");

    // 3. 游标存储；Redis 不可用时退回进程内存储
    let kv: Arc<dyn KvStore> = match RedisCtx::new(&config.redis.url) {
        Ok(redis) => match redis.ping().await {
            Ok(_) => {
                tracing::info!("redis connected");
                Arc::new(redis)
            }
            Err(e) => {
                tracing::warn!(error = %e, "redis unavailable, block cursor kept in memory");
                Arc::new(MemoryKv::new())
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "invalid redis url, block cursor kept in memory");
            Arc::new(MemoryKv::new())
        }
    };

    // 4. 提供方注册表
    let transport = Arc::new(ReqwestTransport::new(&config.upstream)?);
    let registry = Arc::new(ProviderRegistry::from_config(&config, transport, kv));
    let explorer = BlockchainExplorer::new(registry.clone(), config.batch.clone());

    let networks: Vec<String> = if config.scanner.networks.is_empty() {
        registry.networks()
    } else {
        config.scanner.networks.clone()
    };
    tracing::info!(networks = ?networks, "scanner ready");

    // 5. 扫描循环
    let mut ticker = tokio::time::interval(Duration::from_secs(config.scanner.poll_interval_secs.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for network in &networks {
                    match explorer
                        .get_latest_block_addresses(network, None, None, true, false)
                        .await
                    {
                        Ok(latest) => tracing::info!(
                            network = %network,
                            last_processed_block = latest.last_processed_block,
                            inputs = latest.addresses.input_addresses.len(),
                            outputs = latest.addresses.output_addresses.len(),
                            "blocks scanned"
                        ),
                        Err(e) => tracing::error!(network = %network, error = %e, "block scan failed"),
                    }
                }
                tracing::debug!(metrics = %metrics::render_prometheus(), "metrics snapshot");
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
        }
    }
    Ok(())
}
