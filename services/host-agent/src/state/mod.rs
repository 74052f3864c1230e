//! MicroVM spec repositories.
//!
//! [`SqliteRepository`] is durable and used by the daemon; [`MemoryRepository`]
//! backs development mode and tests.

mod memory;
mod store;

pub use memory::MemoryRepository;
pub use store::{SqliteRepository, StateStoreError};
