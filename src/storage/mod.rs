pub mod adapter;
pub mod memory;

pub use adapter::{Adapter, FindQuery, Transaction};
pub use memory::{AdapterStats, MemoryAdapter};
