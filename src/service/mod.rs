pub mod blockchain_explorer;
pub mod withdrawal_reconciliation;

pub use blockchain_explorer::{BlockchainExplorer, FetchEvent, FetchState};
pub use withdrawal_reconciliation::{
    merge_withdrawals, truncate_to_common_horizon, WithdrawalReconciler,
};
