use super::{DashboardSource, InventoryItem, OrderStats, Recipe, Task, TaskStatus};
use anyhow::bail;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Which upstream query a call belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Orders,
    Inventory,
    Tasks,
    Recipes,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Orders => "orders",
            Self::Inventory => "inventory",
            Self::Tasks => "tasks",
            Self::Recipes => "recipes",
        };
        f.write_str(name)
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "orders" => Ok(Self::Orders),
            "inventory" => Ok(Self::Inventory),
            "tasks" => Ok(Self::Tasks),
            "recipes" => Ok(Self::Recipes),
            other => Err(format!("unknown source: {}", other)),
        }
    }
}

#[derive(Default)]
struct SourceData {
    order_stats: OrderStats,
    inventory: Vec<InventoryItem>,
    tasks: Vec<Task>,
    recipes: Vec<Recipe>,
}

/// In-process [`DashboardSource`] with simulated latency and failure
/// injection. Used by the CLI demo, the benches and the tests.
#[derive(Default)]
pub struct InMemorySource {
    data: RwLock<SourceData>,
    latency: RwLock<Duration>,
    failing: RwLock<HashSet<SourceKind>>,
    calls: Mutex<HashMap<SourceKind, usize>>,
}

impl InMemorySource {
    /// Create an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Source seeded with a small bakery production dataset
    pub fn demo() -> Self {
        let source = Self::new();
        {
            let mut data = source.data.write();
            data.order_stats = OrderStats {
                total: 42,
                pending: 9,
                in_production: 6,
                completed: 25,
                overdue: 2,
            };
            data.inventory = vec![
                item("FLR-01", "Wheat flour", 820.0, "kg", 0.42),
                item("SUG-01", "Sugar", 310.0, "kg", 0.95),
                item("BTR-01", "Butter", 75.0, "kg", 6.80),
                item("YST-01", "Yeast", 12.5, "kg", 4.10),
            ];
            data.tasks = vec![
                task("T-100", "Mix dough batch 14", TaskStatus::Pending, None),
                task("T-101", "Proof croissants", TaskStatus::InProgress, Some("ana")),
                task("T-102", "Bake rye loaves", TaskStatus::InProgress, Some("marek")),
                task("T-103", "Package order 7781", TaskStatus::Completed, Some("ana")),
                task("T-104", "Clean mixer 2", TaskStatus::Pending, None),
            ];
            data.recipes = vec![
                recipe("R-1", "Butter croissant", 120.0, "pcs"),
                recipe("R-2", "Rye sourdough", 40.0, "loaves"),
                recipe("R-3", "Cinnamon roll", 96.0, "pcs"),
            ];
        }
        source
    }

    /// Delay every call by `latency`
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.write() = latency;
        self
    }

    /// Make every call of `kind` fail until [`heal`](Self::heal)
    pub fn fail(&self, kind: SourceKind) {
        self.failing.write().insert(kind);
    }

    pub fn heal(&self, kind: SourceKind) {
        self.failing.write().remove(&kind);
    }

    /// Number of calls made for `kind`, including failed ones
    pub fn calls(&self, kind: SourceKind) -> usize {
        self.calls.lock().get(&kind).copied().unwrap_or(0)
    }

    pub fn set_order_stats(&self, stats: OrderStats) {
        self.data.write().order_stats = stats;
    }

    pub fn add_task(&self, task: Task) {
        self.data.write().tasks.push(task);
    }

    async fn round_trip(&self, kind: SourceKind) -> anyhow::Result<()> {
        *self.calls.lock().entry(kind).or_insert(0) += 1;

        let latency = *self.latency.read();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if self.failing.read().contains(&kind) {
            bail!("{} source unavailable", kind);
        }
        debug!("SOURCE {} answered after {:?}", kind, latency);
        Ok(())
    }
}

impl DashboardSource for InMemorySource {
    async fn fetch_order_stats(&self) -> anyhow::Result<OrderStats> {
        self.round_trip(SourceKind::Orders).await?;
        Ok(self.data.read().order_stats.clone())
    }

    async fn fetch_inventory_items(&self) -> anyhow::Result<Vec<InventoryItem>> {
        self.round_trip(SourceKind::Inventory).await?;
        Ok(self.data.read().inventory.clone())
    }

    async fn fetch_tasks_by_status(&self, status: TaskStatus) -> anyhow::Result<Vec<Task>> {
        self.round_trip(SourceKind::Tasks).await?;
        let tasks = self
            .data
            .read()
            .tasks
            .iter()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        Ok(tasks)
    }

    async fn fetch_recipes(&self, limit: usize) -> anyhow::Result<Vec<Recipe>> {
        self.round_trip(SourceKind::Recipes).await?;
        Ok(self.data.read().recipes.iter().take(limit).cloned().collect())
    }
}

fn item(sku: &str, name: &str, quantity: f64, unit: &str, unit_cost: f64) -> InventoryItem {
    InventoryItem {
        sku: sku.to_string(),
        name: name.to_string(),
        quantity,
        unit: unit.to_string(),
        unit_cost,
    }
}

fn task(id: &str, title: &str, status: TaskStatus, assignee: Option<&str>) -> Task {
    Task {
        id: id.to_string(),
        title: title.to_string(),
        status,
        assignee: assignee.map(str::to_string),
    }
}

fn recipe(id: &str, name: &str, output_quantity: f64, output_unit: &str) -> Recipe {
    Recipe {
        id: id.to_string(),
        name: name.to_string(),
        output_quantity,
        output_unit: output_unit.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_demo_tasks_by_status() {
        let source = InMemorySource::demo();

        let pending = source.fetch_tasks_by_status(TaskStatus::Pending).await.unwrap();
        let done = source.fetch_tasks_by_status(TaskStatus::Completed).await.unwrap();

        assert_eq!(pending.len(), 2);
        assert_eq!(done.len(), 1);
        assert_eq!(source.calls(SourceKind::Tasks), 2);
    }

    #[tokio::test]
    async fn test_recipes_respect_limit() {
        let source = InMemorySource::demo();

        let recipes = source.fetch_recipes(2).await.unwrap();
        assert_eq!(recipes.len(), 2);
        assert_eq!(recipes[0].id, "R-1");
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let source = InMemorySource::demo();

        source.fail(SourceKind::Orders);
        let err = source.fetch_order_stats().await.unwrap_err();
        assert!(err.to_string().contains("orders source unavailable"));

        source.heal(SourceKind::Orders);
        assert_eq!(source.fetch_order_stats().await.unwrap().total, 42);
        assert_eq!(source.calls(SourceKind::Orders), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_is_simulated() {
        let source = InMemorySource::demo().with_latency(Duration::from_millis(250));
        let started = tokio::time::Instant::now();

        source.fetch_inventory_items().await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(250));
    }
}
