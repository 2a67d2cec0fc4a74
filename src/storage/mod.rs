pub mod database;
pub mod table;
pub mod version_chain;

pub use database::Storage;
pub use table::{Table, VacuumStats};
pub use version_chain::RowVersion;
