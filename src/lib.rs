//! IronScan - 多链区块浏览器聚合层
//!
//! 统一多个上游浏览器的余额、交易、区块数据，按能力降级，
//! 净额化为规范实体后交给上层业务。

pub mod config;
pub mod domain;
pub mod error;
pub mod explorer;
pub mod infrastructure;
pub mod metrics;
pub mod providers;
pub mod service;

pub use error::{ExplorerError, ExplorerResult};

pub mod prelude {
    pub use crate::{
        config::Config,
        domain::{
            AddressTx, Balance, ContractInfo, Direction, NetworkInfo, Transfer, TxDetails,
            WalletBalance, WalletTransaction,
        },
        error::{ExplorerError, ExplorerResult},
        explorer::{ExplorerInterface, LatestBlock, ProviderRegistry},
        providers::{Capability, ExplorerAdapter},
        service::{BlockchainExplorer, WithdrawalReconciler},
    };
}
