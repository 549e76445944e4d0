pub mod baseline;
pub mod defs;
pub mod memory;
pub mod state;

pub use baseline::{BaselineSummarizer, LogDelivery};
pub use defs::*;
pub use memory::MemoryHistoryStore;
pub use state::SqliteHistoryStore;
