use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use panelcache::config::LoggingConfig;
use panelcache::{
    AppConfig, CacheStats, DashboardCache, InMemorySource, KeyInfo, PanelKey, SourceKind,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "panelcache-cli")]
#[command(about = "Panelcache CLI - load dashboard panels through the read cache", long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Concurrent callers per panel
    #[arg(short = 'n', long, default_value = "5")]
    concurrency: usize,

    /// Simulated latency of every source call
    #[arg(long, default_value = "200")]
    latency_ms: u64,

    /// Source to make unavailable (orders, inventory, tasks, recipes)
    #[arg(long = "fail", value_name = "SOURCE")]
    fail: Vec<SourceKind>,

    /// Panels to load (kpi, orders, tasks, inventory, recipes); all when omitted
    #[arg(short = 'p', long = "panel", value_name = "PANEL")]
    panels: Vec<PanelKey>,

    /// Number of load rounds; later rounds should be served from cache
    #[arg(short = 'r', long, default_value = "1")]
    rounds: usize,

    /// Print a JSON report instead of text
    #[arg(long)]
    json: bool,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,
}

struct PanelReport {
    key: PanelKey,
    ok: usize,
    failed: usize,
    errors: Vec<String>,
    slowest: Duration,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => AppConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => AppConfig::default(),
    };
    init_tracing(&config.logging, args.log_level.as_deref());

    info!("Starting Panelcache CLI v{}", env!("CARGO_PKG_VERSION"));

    let source = Arc::new(
        InMemorySource::demo().with_latency(Duration::from_millis(args.latency_ms)),
    );
    for kind in &args.fail {
        warn!("Source {} will fail every call", kind);
        source.fail(*kind);
    }

    let dashboard = DashboardCache::from_config(Arc::clone(&source), &config)
        .context("Invalid cache configuration")?;

    let panels = if args.panels.is_empty() {
        PanelKey::ALL.to_vec()
    } else {
        args.panels.clone()
    };

    let started = Instant::now();
    let mut reports = Vec::new();
    for round in 1..=args.rounds.max(1) {
        info!("Round {} with {} callers per panel", round, args.concurrency);
        reports = load_round(&dashboard, &panels, args.concurrency.max(1)).await?;
    }
    let elapsed = started.elapsed();

    let info = dashboard.info();
    let stats = dashboard.stats();

    if args.json {
        print_json(&reports, &info, &stats, elapsed)?;
    } else {
        print_text(&reports, &info, &stats, elapsed);
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig, level_override: Option<&str>) {
    let level = level_override.unwrap_or(logging.level.as_str());
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn load_round(
    dashboard: &DashboardCache<InMemorySource>,
    panels: &[PanelKey],
    concurrency: usize,
) -> Result<Vec<PanelReport>> {
    let mut tasks = JoinSet::new();
    for &key in panels {
        for _ in 0..concurrency {
            let dashboard = dashboard.clone();
            tasks.spawn(async move {
                let start = Instant::now();
                let result = dashboard.load(key).await;
                (key, result, start.elapsed())
            });
        }
    }

    let mut reports: BTreeMap<PanelKey, PanelReport> = BTreeMap::new();
    while let Some(joined) = tasks.join_next().await {
        let (key, result, took) = joined.context("Panel load task failed")?;
        let report = reports.entry(key).or_insert_with(|| PanelReport {
            key,
            ok: 0,
            failed: 0,
            errors: Vec::new(),
            slowest: Duration::ZERO,
        });
        report.slowest = report.slowest.max(took);
        match result {
            Ok(_) => report.ok += 1,
            Err(err) => {
                report.failed += 1;
                let message = err.to_string();
                if !report.errors.contains(&message) {
                    report.errors.push(message);
                }
            }
        }
    }

    Ok(reports.into_values().collect())
}

fn print_text(
    reports: &[PanelReport],
    info: &BTreeMap<String, KeyInfo>,
    stats: &CacheStats,
    elapsed: Duration,
) {
    println!("{}", "Panels".bold());
    for report in reports {
        let status = if report.failed == 0 {
            "OK".green()
        } else if report.ok == 0 {
            "FAIL".red()
        } else {
            "PARTIAL".yellow()
        };
        println!(
            "  {:<22} {:<8} ok={} failed={} slowest={}",
            report.key.as_str(),
            status,
            report.ok,
            report.failed,
            format!("{:.2}ms", report.slowest.as_secs_f64() * 1000.0).bright_black()
        );
        for error in &report.errors {
            println!("      {}", error.red());
        }
    }

    println!();
    println!("{}", "Keys".bold());
    for (key, entry) in info {
        let freshness = if entry.is_fresh {
            "fresh".green()
        } else if entry.has_data {
            "stale".yellow()
        } else {
            "empty".bright_black()
        };
        let age = entry
            .age_seconds
            .map(|secs| format!("{}s", secs))
            .unwrap_or_else(|| "-".to_string());
        let ttl = entry
            .ttl_seconds
            .map(|secs| format!("{}s", secs))
            .unwrap_or_else(|| "-".to_string());
        let in_flight = entry
            .in_flight_for_ms
            .map(|ms| format!("{}ms", ms))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<22} {:<6} age={:<5} ttl={:<5} in_flight={}",
            key, freshness, age, ttl, in_flight
        );
    }

    println!();
    println!("{}", "Stats".bold());
    println!(
        "  hits={} misses={} hit_rate={:.1}%",
        stats.hits,
        stats.misses,
        stats.hit_rate() * 100.0
    );
    println!(
        "  fetches={} coalesced={} fetch_failures={} wait_timeouts={} invalidations={}",
        stats.fetches,
        stats.coalesced,
        stats.fetch_failures,
        stats.wait_timeouts,
        stats.invalidations
    );
    println!(
        "{}",
        format!("({:.2}ms total)", elapsed.as_secs_f64() * 1000.0).bright_black()
    );
}

fn print_json(
    reports: &[PanelReport],
    info: &BTreeMap<String, KeyInfo>,
    stats: &CacheStats,
    elapsed: Duration,
) -> Result<()> {
    let panels: Vec<_> = reports
        .iter()
        .map(|report| {
            json!({
                "panel": report.key.as_str(),
                "ok": report.ok,
                "failed": report.failed,
                "errors": report.errors,
                "slowest_ms": report.slowest.as_secs_f64() * 1000.0,
            })
        })
        .collect();

    let output = json!({
        "panels": panels,
        "keys": info,
        "stats": stats,
        "hit_rate": stats.hit_rate(),
        "elapsed_ms": elapsed.as_secs_f64() * 1000.0,
    });

    println!(
        "{}",
        serde_json::to_string_pretty(&output).context("Failed to encode report")?
    );
    Ok(())
}
