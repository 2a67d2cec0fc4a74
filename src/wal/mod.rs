pub mod format;
pub mod recovery;
pub mod row_codec;
pub mod writer;

pub use format::{DdlPayload, RecordType, WalRecord};
pub use recovery::{recover, RecoveryStats};
pub use writer::WalWriter;
