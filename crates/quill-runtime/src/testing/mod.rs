//! Testing utilities for code that drives a [`Migrator`](crate::migrations::Migrator)
//! without a live database.

mod memory;

pub use memory::MemoryBackend;
