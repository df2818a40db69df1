//! 编排层：按能力组织的降级链与网络注册表

pub mod interface;
pub mod registry;

pub use interface::{
    project_history, BlockAddresses, BlockTxInfo, BlockTxsInfo, ExplorerInterface, LatestBlock,
    TxInfoMap,
};
pub use registry::ProviderRegistry;
