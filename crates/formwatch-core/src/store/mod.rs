pub mod change_log;
pub mod database;
pub mod master_index;
pub mod schema;
pub mod snapshots;

pub use database::MonitorDatabase;
pub use snapshots::SnapshotStore;
