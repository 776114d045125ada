pub mod memory;
pub mod pg;
pub mod pool;
pub mod schema;
pub mod store;

pub use memory::MemoryStore;
pub use pg::PgStore;
pub use store::{AppendOutcome, ChatStore, StoreError};
