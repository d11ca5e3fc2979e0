//! Dashboard panels served through one [`CacheService`]
//!
//! Panel keys:
//! - `kpi`: composite of orders, inventory value, open tasks, recipe count
//! - `dashboard.orders`: order counters
//! - `dashboard.tasks`: composite, one source per task status
//! - `dashboard.inventory`: stock lines
//! - `dashboard.recipes`: recipe list

use crate::config::AppConfig;
use crate::core::{
    CacheConfig, CacheError, CacheService, CacheStats, Composite, CompositeResult, KeyInfo,
    Result, Source,
};
use crate::sources::{
    DashboardSource, InventoryItem, OrderStats, Recipe, Task, TaskStatus, inventory_value,
};
use futures_util::future::{join_all, try_join_all};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

pub const KPI_ORDERS: &str = "orders";
pub const KPI_INVENTORY: &str = "inventory";
pub const KPI_OPEN_TASKS: &str = "open_tasks";
pub const KPI_RECIPES: &str = "recipes";

/// Cache keys of the dashboard panels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum PanelKey {
    Kpi,
    Orders,
    Tasks,
    Inventory,
    Recipes,
}

impl PanelKey {
    pub const ALL: [PanelKey; 5] = [
        Self::Kpi,
        Self::Orders,
        Self::Tasks,
        Self::Inventory,
        Self::Recipes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kpi => "kpi",
            Self::Orders => "dashboard.orders",
            Self::Tasks => "dashboard.tasks",
            Self::Inventory => "dashboard.inventory",
            Self::Recipes => "dashboard.recipes",
        }
    }
}

impl fmt::Display for PanelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PanelKey {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.to_lowercase();
        Self::ALL
            .into_iter()
            .find(|key| {
                key.as_str() == wanted || key.as_str().trim_start_matches("dashboard.") == wanted
            })
            .ok_or_else(|| format!("unknown panel: {}", s))
    }
}

/// One slice of the KPI composite
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "metric", content = "value", rename_all = "snake_case")]
pub enum KpiMetric {
    Orders(OrderStats),
    InventoryValue(f64),
    OpenTasks(usize),
    Recipes(usize),
}

/// Value cached under a panel key
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "panel", content = "data", rename_all = "snake_case")]
pub enum Panel {
    Kpi(CompositeResult<KpiMetric>),
    Orders(OrderStats),
    Tasks(CompositeResult<Vec<Task>>),
    Inventory(Vec<InventoryItem>),
    Recipes(Vec<Recipe>),
}

impl Composite<KpiMetric> for Panel {
    fn from_composite(result: CompositeResult<KpiMetric>) -> Self {
        Self::Kpi(result)
    }

    fn as_composite(&self) -> Option<&CompositeResult<KpiMetric>> {
        match self {
            Self::Kpi(result) => Some(result),
            _ => None,
        }
    }
}

impl Composite<Vec<Task>> for Panel {
    fn from_composite(result: CompositeResult<Vec<Task>>) -> Self {
        Self::Tasks(result)
    }

    fn as_composite(&self) -> Option<&CompositeResult<Vec<Task>>> {
        match self {
            Self::Tasks(result) => Some(result),
            _ => None,
        }
    }
}

/// KPI header figures. `None` means the source is currently unavailable,
/// never zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KpiSnapshot {
    pub total_orders: Option<u64>,
    pub pending_orders: Option<u64>,
    pub overdue_orders: Option<u64>,
    pub inventory_value: Option<f64>,
    pub open_tasks: Option<usize>,
    pub recipe_count: Option<usize>,
    /// Sources with no value at all
    pub unavailable: Vec<String>,
    /// Sources that failed but still show their previous value
    pub stale: Vec<String>,
}

impl From<&CompositeResult<KpiMetric>> for KpiSnapshot {
    fn from(result: &CompositeResult<KpiMetric>) -> Self {
        let mut snapshot = KpiSnapshot::default();

        for source in result.iter() {
            match &source.value {
                Some(KpiMetric::Orders(stats)) => {
                    snapshot.total_orders = Some(stats.total);
                    snapshot.pending_orders = Some(stats.pending);
                    snapshot.overdue_orders = Some(stats.overdue);
                }
                Some(KpiMetric::InventoryValue(value)) => snapshot.inventory_value = Some(*value),
                Some(KpiMetric::OpenTasks(count)) => snapshot.open_tasks = Some(*count),
                Some(KpiMetric::Recipes(count)) => snapshot.recipe_count = Some(*count),
                None => snapshot.unavailable.push(source.source.clone()),
            }
            if source.carried_forward {
                snapshot.stale.push(source.source.clone());
            }
        }

        snapshot
    }
}

/// Production tasks grouped by status
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskBoard {
    columns: CompositeResult<Vec<Task>>,
}

impl TaskBoard {
    /// Tasks in `status`, `None` if that column could not be loaded
    pub fn tasks(&self, status: TaskStatus) -> Option<&[Task]> {
        self.columns.value(status.as_str()).map(Vec::as_slice)
    }

    pub fn count(&self, status: TaskStatus) -> Option<usize> {
        self.tasks(status).map(<[Task]>::len)
    }

    /// Statuses whose column failed to load this time
    pub fn failed_columns(&self) -> Vec<&str> {
        self.columns.failed_sources()
    }
}

/// Dashboard panels backed by a [`DashboardSource`] and cached per key
pub struct DashboardCache<S> {
    cache: CacheService<Panel>,
    source: Arc<S>,
    recipe_limit: usize,
}

impl<S> DashboardCache<S>
where
    S: DashboardSource,
{
    pub fn new(source: Arc<S>, config: CacheConfig, recipe_limit: usize) -> Self {
        info!("Initializing dashboard cache (recipe_limit={})", recipe_limit);
        Self {
            cache: CacheService::new(config),
            source,
            recipe_limit,
        }
    }

    /// Build from application configuration
    pub fn from_config(source: Arc<S>, config: &AppConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(
            source,
            config.to_cache_config(),
            config.dashboard.recipe_limit,
        ))
    }

    /// Underlying cache, for diagnostics
    pub fn cache(&self) -> &CacheService<Panel> {
        &self.cache
    }

    pub async fn kpis(&self) -> Result<KpiSnapshot> {
        let panel = self.load(PanelKey::Kpi).await?;
        match panel.as_ref() {
            Panel::Kpi(result) => Ok(KpiSnapshot::from(result)),
            _ => Err(unexpected(PanelKey::Kpi)),
        }
    }

    pub async fn order_stats(&self) -> Result<OrderStats> {
        let panel = self.load(PanelKey::Orders).await?;
        match panel.as_ref() {
            Panel::Orders(stats) => Ok(stats.clone()),
            _ => Err(unexpected(PanelKey::Orders)),
        }
    }

    pub async fn task_board(&self) -> Result<TaskBoard> {
        let panel = self.load(PanelKey::Tasks).await?;
        match panel.as_ref() {
            Panel::Tasks(columns) => Ok(TaskBoard {
                columns: columns.clone(),
            }),
            _ => Err(unexpected(PanelKey::Tasks)),
        }
    }

    pub async fn inventory(&self) -> Result<Vec<InventoryItem>> {
        let panel = self.load(PanelKey::Inventory).await?;
        match panel.as_ref() {
            Panel::Inventory(items) => Ok(items.clone()),
            _ => Err(unexpected(PanelKey::Inventory)),
        }
    }

    pub async fn recipes(&self) -> Result<Vec<Recipe>> {
        let panel = self.load(PanelKey::Recipes).await?;
        match panel.as_ref() {
            Panel::Recipes(recipes) => Ok(recipes.clone()),
            _ => Err(unexpected(PanelKey::Recipes)),
        }
    }

    /// Cached panel, fetched on miss or when stale
    pub async fn load(&self, key: PanelKey) -> Result<Arc<Panel>> {
        let ttl = self.cache.ttl_for(key.as_str());

        match key {
            PanelKey::Kpi => {
                self.cache
                    .get_composite(key.as_str(), self.kpi_sources(), ttl)
                    .await
            }
            PanelKey::Tasks => {
                self.cache
                    .get_composite(key.as_str(), self.task_sources(), ttl)
                    .await
            }
            PanelKey::Orders => {
                let source = Arc::clone(&self.source);
                let fetch =
                    move || async move { source.fetch_order_stats().await.map(Panel::Orders) };
                self.cache.get(key.as_str(), fetch, ttl).await
            }
            PanelKey::Inventory => {
                let source = Arc::clone(&self.source);
                let fetch = move || async move {
                    source
                        .fetch_inventory_items()
                        .await
                        .map(Panel::Inventory)
                };
                self.cache.get(key.as_str(), fetch, ttl).await
            }
            PanelKey::Recipes => {
                let source = Arc::clone(&self.source);
                let limit = self.recipe_limit;
                let fetch =
                    move || async move { source.fetch_recipes(limit).await.map(Panel::Recipes) };
                self.cache.get(key.as_str(), fetch, ttl).await
            }
        }
    }

    /// Drop the panel and fetch it again (user-triggered reload)
    pub async fn reload(&self, key: PanelKey) -> Result<Arc<Panel>> {
        self.cache.begin_refresh(key.as_str());
        self.load(key).await
    }

    /// Reload every panel concurrently; one failing panel does not stop
    /// the others
    pub async fn refresh_all(&self) -> Vec<(PanelKey, Result<()>)> {
        let reloads = PanelKey::ALL
            .into_iter()
            .map(|key| async move { (key, self.reload(key).await.map(|_| ())) });
        join_all(reloads).await
    }

    pub fn invalidate(&self, key: PanelKey) -> bool {
        self.cache.invalidate(key.as_str())
    }

    pub fn invalidate_all(&self) -> usize {
        self.cache.invalidate_all()
    }

    pub fn info(&self) -> BTreeMap<String, KeyInfo> {
        self.cache.info()
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    fn kpi_sources(&self) -> Vec<Source<KpiMetric>> {
        let orders = Arc::clone(&self.source);
        let inventory = Arc::clone(&self.source);
        let tasks = Arc::clone(&self.source);
        let recipes = Arc::clone(&self.source);
        let limit = self.recipe_limit;

        vec![
            Source::new(KPI_ORDERS, move || async move {
                orders.fetch_order_stats().await.map(KpiMetric::Orders)
            }),
            Source::new(KPI_INVENTORY, move || async move {
                inventory
                    .fetch_inventory_items()
                    .await
                    .map(|items| KpiMetric::InventoryValue(inventory_value(&items)))
            }),
            Source::new(KPI_OPEN_TASKS, move || async move {
                let open = TaskStatus::ALL
                    .into_iter()
                    .filter(TaskStatus::is_open)
                    .map(|status| tasks.fetch_tasks_by_status(status));
                try_join_all(open)
                    .await
                    .map(|columns| KpiMetric::OpenTasks(columns.iter().map(Vec::len).sum()))
            }),
            Source::new(KPI_RECIPES, move || async move {
                recipes
                    .fetch_recipes(limit)
                    .await
                    .map(|list| KpiMetric::Recipes(list.len()))
            }),
        ]
    }

    fn task_sources(&self) -> Vec<Source<Vec<Task>>> {
        TaskStatus::ALL
            .into_iter()
            .map(|status| {
                let source = Arc::clone(&self.source);
                Source::new(status.as_str(), move || async move {
                    source.fetch_tasks_by_status(status).await
                })
            })
            .collect()
    }
}

impl<S> Clone for DashboardCache<S> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            source: Arc::clone(&self.source),
            recipe_limit: self.recipe_limit,
        }
    }
}

fn unexpected(key: PanelKey) -> CacheError {
    CacheError::UnexpectedValue(key.as_str().to_string())
}
