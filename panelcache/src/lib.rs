pub mod config;
pub mod core;
pub mod dashboard;
pub mod sources;

// Re-export commonly used types
pub use config::AppConfig;
pub use core::{
    Aggregator, CacheConfig, CacheEntry, CacheError, CacheService, CacheStats, CacheStore,
    Composite, CompositeResult, FetchCoordinator, KeyInfo, Source, SourceResult,
};
pub use dashboard::{DashboardCache, KpiMetric, KpiSnapshot, Panel, PanelKey, TaskBoard};
pub use sources::{
    DashboardSource, InMemorySource, InventoryItem, OrderStats, Recipe, SourceKind, Task,
    TaskStatus,
};
