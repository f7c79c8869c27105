pub mod defs;
pub mod state;

pub use defs::{Article, Record, SeenStore};
pub use state::{MemorySeenStore, SqliteSeenStore};
