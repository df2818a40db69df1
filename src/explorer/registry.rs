//! 网络 -> 编排器注册表

use std::{collections::HashMap, sync::Arc, time::Duration};

use crate::{
    config::Config,
    domain::{AddressCodec, ContractRegistry, DefaultAddressCodec},
    error::{ExplorerError, ExplorerResult},
    infrastructure::{HttpTransport, KvStore},
    providers::{build_adapter, ParserContext},
};

use super::ExplorerInterface;

pub struct ProviderRegistry {
    interfaces: HashMap<String, Arc<ExplorerInterface>>,
    contracts: Arc<ContractRegistry>,
    codec: Arc<dyn AddressCodec>,
}

impl ProviderRegistry {
    pub fn new(contracts: Arc<ContractRegistry>, codec: Arc<dyn AddressCodec>) -> Self {
        Self {
            interfaces: HashMap::new(),
            contracts,
            codec,
        }
    }

    /// 按配置装配所有网络的降级链；适配器按配置顺序进入其声明的每条能力链
    pub fn from_config(
        config: &Config,
        transport: Arc<dyn HttpTransport>,
        kv: Arc<dyn KvStore>,
    ) -> Self {
        let contracts = Arc::new(ContractRegistry::from_contracts(config.contracts.clone()));
        let codec = config
            .networks
            .iter()
            .filter_map(|(name, network)| network.address_format.clone().map(|f| (name, f)))
            .fold(DefaultAddressCodec::default(), |codec, (name, format)| {
                codec.with_format(name, format)
            });
        let codec: Arc<dyn AddressCodec> = Arc::new(codec);
        let mut registry = Self::new(contracts.clone(), codec.clone());

        for (name, network_config) in &config.networks {
            let network = network_config.network_info(name);
            let context = ParserContext::new(network.clone(), contracts.clone(), codec.clone());
            let mut interface =
                ExplorerInterface::new(network, contracts.clone(), codec.clone(), kv.clone())
                    .with_kv_prefix(config.redis.key_prefix.clone())
                    .with_cursor_ttl(Duration::from_secs(config.redis.cursor_ttl_secs))
                    .with_block_workers(config.batch.workers);

            for provider in &network_config.providers {
                let adapter = build_adapter(provider, context.clone(), transport.clone());
                for capability in &provider.capabilities {
                    interface.push_adapter(*capability, adapter.clone());
                }
                tracing::debug!(
                    network = %name,
                    provider = %provider.name,
                    capabilities = provider.capabilities.len(),
                    "provider registered"
                );
            }
            registry.register(interface);
        }
        tracing::info!(networks = registry.interfaces.len(), "provider registry ready");
        registry
    }

    pub fn register(&mut self, interface: ExplorerInterface) {
        let key = interface.network().name.to_ascii_uppercase();
        self.interfaces.insert(key, Arc::new(interface));
    }

    pub fn interface(&self, network: &str) -> ExplorerResult<Arc<ExplorerInterface>> {
        self.interfaces
            .get(&network.to_ascii_uppercase())
            .cloned()
            .ok_or_else(|| ExplorerError::UnsupportedNetwork(network.to_string()))
    }

    pub fn networks(&self) -> Vec<String> {
        let mut networks: Vec<String> = self.interfaces.keys().cloned().collect();
        networks.sort();
        networks
    }

    pub fn contracts(&self) -> &ContractRegistry {
        &self.contracts
    }

    pub fn codec(&self) -> &dyn AddressCodec {
        self.codec.as_ref()
    }

    /// 地址所属网络，仅返回已注册的网络
    pub fn detect_network(&self, address: &str) -> Option<String> {
        self.codec
            .detect_network(address)
            .map(|n| n.to_ascii_uppercase())
            .filter(|n| self.interfaces.contains_key(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::AddressFormat,
        infrastructure::MemoryKv,
        providers::{testing::CannedTransport, Capability},
    };

    fn registry() -> ProviderRegistry {
        let config = Config::from_env().unwrap();
        ProviderRegistry::from_config(
            &config,
            Arc::new(CannedTransport::new()),
            Arc::new(MemoryKv::new()),
        )
    }

    #[test]
    fn test_default_networks_are_registered() {
        let registry = registry();
        let networks = registry.networks();
        assert!(networks.contains(&"BTC".to_string()));
        assert!(networks.contains(&"ETH".to_string()));
        let eth = registry.interface("eth").unwrap();
        assert!(eth.supports(Capability::Balance));
        assert!(eth.supports(Capability::BlockHead));
    }

    #[test]
    fn test_unknown_network() {
        let err = registry().interface("DOGE").err().unwrap();
        assert_eq!(err, ExplorerError::UnsupportedNetwork("DOGE".into()));
    }

    #[test]
    fn test_detect_network() {
        let registry = registry();
        assert_eq!(
            registry
                .detect_network("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed")
                .as_deref(),
            Some("ETH")
        );
        assert_eq!(registry.detect_network("not-an-address"), None);
    }

    #[test]
    fn test_configured_address_format_is_used() {
        let mut config = Config::from_env().unwrap();
        if let Some(btc) = config.networks.get_mut("BTC") {
            btc.address_format = Some(AddressFormat::utxo("bc", &[0x05]));
        }
        let registry = ProviderRegistry::from_config(
            &config,
            Arc::new(CannedTransport::new()),
            Arc::new(MemoryKv::new()),
        );
        let btc = registry.interface("BTC").unwrap();
        assert!(matches!(
            btc.canonical("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa"),
            Err(ExplorerError::InvalidAddress { .. })
        ));
        assert!(btc.canonical("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4").is_ok());

        let ton = registry.interface("TON").unwrap();
        assert_eq!(
            ton.canonical("UQCxE6mUtQJKFnGfaROTKOt1lZbDiiX1kCixRv7Nw2Id_p0p").unwrap(),
            "EQCxE6mUtQJKFnGfaROTKOt1lZbDiiX1kCixRv7Nw2Id_sDs"
        );
    }
}
