pub mod aggregator;
pub mod error;
pub mod flight;
pub mod service;
pub mod store;
pub mod types;

pub use aggregator::{Aggregator, Composite, CompositeResult, Source, SourceResult};
pub use error::{CacheError, Result};
pub use flight::FetchCoordinator;
pub use service::CacheService;
pub use store::CacheStore;
pub use types::{CacheConfig, CacheEntry, CacheStats, KeyInfo};
