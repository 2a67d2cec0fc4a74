pub mod clog;
pub mod snapshot;
pub mod txn_manager;

pub use clog::{CommitLog, TxStatus};
pub use snapshot::{is_visible, Snapshot};
pub use txn_manager::TransactionManager;
