#![forbid(unsafe_code)]

//! Persistence adapters for Ripple.
//!
//! Storage is a thin pluggable layer: a backend implements
//! [`StorageMethods`] over string payloads, [`Storage`] adds key prefixing
//! and JSON (de)serialization, and [`Storages`] is the per-hub registry that
//! primitives talk to when they persist.
//!
//! Backends shipped here:
//!
//! - [`MemoryStorage`]: shared in-memory map. Cloning shares the map, which
//!   makes it a convenient mock store in tests.
//! - [`FileStorage`] (feature `file`): a single JSON object file, rewritten
//!   on every mutation.

pub mod error;
#[cfg(feature = "file")]
pub mod file;
pub mod memory;
pub mod registry;
pub mod storage;

pub use error::{Result, StorageError};
#[cfg(feature = "file")]
pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use registry::{RegisterConfig, Storages};
pub use storage::{Storage, StorageConfig, StorageMethods};
