//! Output resolution: fetch, convert, store.
pub mod convert;
pub mod resolver;
pub mod storage;

pub use convert::{ConvertOptions, MediaConverter};
pub use resolver::{OutputPayload, OutputResolver, ResolvedOutput};
pub use storage::{HttpObjectStore, ObjectStore};
