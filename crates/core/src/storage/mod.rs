pub mod event_log;
pub mod output;
pub mod redb_store;

pub use event_log::MemoryEventLog;
pub use output::{MemoryOutputStore, OutputStore};
pub use redb_store::RedbOutputStore;
