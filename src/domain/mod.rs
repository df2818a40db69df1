//! Domain 模块
//!
//! 规范化的交易/余额模型与净额结算算法，不依赖任何 IO

pub mod address;
pub mod balance;
pub mod netting;
pub mod network;
pub mod transfer;
pub mod tx_details;
pub mod wallet_transaction;

// 重新导出常用类型
pub use address::{ton_user_friendly, AddressCodec, AddressFormat, DefaultAddressCodec, DetectionRule};
pub use balance::{Balance, WalletBalance};
pub use netting::{aggregate, net_account, net_legs, CurrencyKey, Leg, NettingLedger};
pub use network::{ContractInfo, ContractRegistry, LedgerModel, NetworkInfo};
pub use transfer::{Transfer, TxMeta};
pub use tx_details::{IoEntry, TransferEntry, TransferKind, TxDetails};
pub use wallet_transaction::{AddressTx, Direction, WalletTransaction};
