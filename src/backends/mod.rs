/// Backend-specific transports, classifiers and supervisors
pub mod cache;
pub mod document;

pub use cache::{CacheSupervisor, CacheTransport};
pub use document::{DocumentSupervisor, DocumentTransport};
