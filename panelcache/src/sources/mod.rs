//! Upstream data sources behind the dashboard panels
//!
//! Sources never cache; caching belongs to [`crate::CacheService`]. Any
//! placeholder data a source wants to return on failure is its own business.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::str::FromStr;

mod memory;

pub use memory::{InMemorySource, SourceKind};

/// Aggregate order counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStats {
    pub total: u64,
    pub pending: u64,
    pub in_production: u64,
    pub completed: u64,
    pub overdue: u64,
}

/// One stock line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub sku: String,
    pub name: String,
    pub quantity: f64,
    pub unit: String,
    pub unit_cost: f64,
}

impl InventoryItem {
    /// Stock value of this line
    pub fn value(&self) -> f64 {
        self.quantity * self.unit_cost
    }
}

/// Total stock value of a list of items
pub fn inventory_value(items: &[InventoryItem]) -> f64 {
    items.iter().map(InventoryItem::value).sum()
}

/// Production task state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 3] = [Self::Pending, Self::InProgress, Self::Completed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }

    /// Task still needs work
    pub fn is_open(&self) -> bool {
        !matches!(self, Self::Completed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "in_progress" | "in-progress" => Ok(Self::InProgress),
            "completed" | "done" => Ok(Self::Completed),
            other => Err(format!("unknown task status: {}", other)),
        }
    }
}

/// Production task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    pub assignee: Option<String>,
}

/// Production recipe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub id: String,
    pub name: String,
    pub output_quantity: f64,
    pub output_unit: String,
}

/// Upstream queries the dashboard panels are built from.
///
/// Each call is one round trip to the backing store and returns a value or
/// an error. Implementations must be cheap to share behind an `Arc`.
pub trait DashboardSource: Send + Sync + 'static {
    fn fetch_order_stats(&self) -> impl Future<Output = anyhow::Result<OrderStats>> + Send;

    fn fetch_inventory_items(
        &self,
    ) -> impl Future<Output = anyhow::Result<Vec<InventoryItem>>> + Send;

    fn fetch_tasks_by_status(
        &self,
        status: TaskStatus,
    ) -> impl Future<Output = anyhow::Result<Vec<Task>>> + Send;

    fn fetch_recipes(&self, limit: usize) -> impl Future<Output = anyhow::Result<Vec<Recipe>>> + Send;
}
