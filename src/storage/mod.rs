//! Storage abstraction layer for Quiver.
//!
//! Collections persist their manifest, snapshot and write-ahead log through
//! the [`Storage`] trait, so the same code runs against the file system or
//! purely in memory.

#[cfg(test)]
pub(crate) mod faulty;
pub mod file;
pub mod memory;
pub mod namespace;
pub mod traits;

// Re-export commonly used types
pub use file::*;
pub use memory::*;
pub use namespace::*;
pub use traits::*;
