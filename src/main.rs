//! Strategy Scheduler - Main Entry Point
//!
//! Discovery trigger loop plus one-shot debugging commands.

use anyhow::Result;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strategy_scheduler::config::Config;
use strategy_scheduler::model::{
    DiscoveryWindow, ExecutionType, LegDefinition, OrderSide, Strategy, StrategyStatus,
    TriggerEvent, WeekdayCode,
};
use strategy_scheduler::scheduler::{
    allocate, BatchDispatcher, CycleReport, RetryPolicy, StrategyExecutor, WindowDiscoverer,
};
use strategy_scheduler::store::{ScheduleStore, SqliteStore};
use strategy_scheduler::timing::compute_wait_seconds;
use strategy_scheduler::workflow::LocalWorkflowRunner;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Strategy Scheduler CLI
#[derive(Parser)]
#[command(name = "strategy-scheduler")]
#[command(version, about = "Precision-timed strategy scheduling and lot allocation")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the discovery trigger loop
    Run {
        /// Seconds between discovery cycles
        #[arg(short, long, default_value = "60")]
        interval: u64,
    },

    /// One-shot discovery over the next N minutes, printed as JSON
    Discover {
        /// Window start (RFC 3339); defaults to now
        #[arg(short, long)]
        from: Option<String>,

        /// Window length in minutes; defaults to the configured lookahead
        #[arg(short, long)]
        minutes: Option<u32>,
    },

    /// Print the allocation plan for a given lot count
    Allocate {
        /// Total lots to allocate
        #[arg(short, long)]
        lots: u32,
    },

    /// Populate the schedule store with sample strategies
    Seed,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;
    config.validate()?;

    match cli.command.unwrap_or(Commands::Run { interval: 60 }) {
        Commands::Run { interval } => run_loop(config, interval).await,
        Commands::Discover { from, minutes } => discover_once(config, from, minutes).await,
        Commands::Allocate { lots } => {
            let plan = allocate(lots, &config.destinations);
            println!("{}", serde_json::to_string_pretty(&plan)?);
            if plan.is_partial() {
                warn!(remainder = plan.remainder, "Partial fill: capacity insufficient");
            }
            Ok(())
        }
        Commands::Seed => seed(config).await,
    }
}

async fn run_loop(config: Config, interval: u64) -> Result<()> {
    info!("🚀 Strategy scheduler starting");
    info!(
        "   Identity: {} | Lookahead: {}m | Tier: {} | Payload: {:?}",
        config.identity,
        config.discovery.lookahead_minutes,
        config.dispatch.tier.as_str(),
        config.dispatch.payload_mode,
    );

    let store = Arc::new(SqliteStore::open(&config.store.db_path)?);
    let calendar = config.trading_calendar();

    let store_timeout = Duration::from_secs(config.store.call_timeout_secs);
    let executor = Arc::new(
        StrategyExecutor::new(
            store.clone(),
            store.clone(),
            calendar.clone(),
            config.destinations.clone(),
        )
        .with_store_timeout(store_timeout),
    );
    let workflow = Arc::new(LocalWorkflowRunner::new(executor, config.dispatch.tier));

    let discoverer = WindowDiscoverer::new(store.clone()).with_retry(RetryPolicy {
        max_attempts: config.discovery.retry_attempts,
        backoff: Duration::from_millis(config.discovery.retry_backoff_ms),
        attempt_timeout: store_timeout,
    });
    let dispatcher = BatchDispatcher::new(
        workflow,
        config.dispatch.tier,
        config.dispatch.payload_mode,
        calendar,
        Duration::from_secs(config.dispatch.call_timeout_secs),
    );

    // Shutdown signal
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Shutdown signal received");
        shutdown_clone.store(true, Ordering::SeqCst);
    });

    // Windows chain half-open so a strategy on the boundary is picked up by
    // exactly one cycle.
    let mut window_start = Utc::now();
    let mut cycle: u64 = 0;

    while !shutdown.load(Ordering::SeqCst) {
        cycle += 1;
        let trigger = TriggerEvent {
            identity: config.identity.clone(),
            weekday: WeekdayCode::from(Utc::now().weekday()),
            trigger_time: Utc::now(),
            lookahead_minutes: config.discovery.lookahead_minutes,
        };
        let window_end = trigger.window().end;

        if window_end > window_start {
            let window = DiscoveryWindow::new(window_start, window_end);
            info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
            info!(
                "📡 [DISCOVER] Cycle #{} ({}): window {} -> {}",
                cycle, trigger.weekday, window.start, window.end
            );

            let mut outcome = discoverer.discover(&trigger.identity, &window).await;
            if outcome.failed_minutes > 0 {
                warn!(
                    "⚠️  [DISCOVER] {} minute(s) dropped from this cycle",
                    outcome.failed_minutes
                );
            }

            let candidates = std::mem::take(&mut outcome.candidates);
            let mut report = CycleReport {
                cycle,
                candidates: candidates.len(),
                failed_minutes: outcome.failed_minutes,
                ..CycleReport::default()
            };

            if candidates.is_empty() {
                info!("📡 [DISCOVER] No strategies due in window");
            } else {
                info!(
                    "📬 [DISPATCH] {} candidate(s) across the window",
                    report.candidates
                );
                let summary = dispatcher
                    .dispatch(&trigger.identity, candidates, Utc::now())
                    .await;
                for group in summary.groups.iter().filter(|g| g.error.is_some()) {
                    error!(
                        "❌ [DISPATCH] Group {} failed: {}",
                        group.execution_time,
                        group.error.as_ref().map(|e| e.to_string()).unwrap_or_default()
                    );
                }
                report.dispatched = summary.dispatched;
                report.skipped = summary.skipped;
                report.failed_groups = summary.failed;
            }
            info!(
                "📬 [CYCLE] #{}: {} dispatched, {} skipped, {} group failure(s)",
                report.cycle, report.dispatched, report.skipped, report.failed_groups
            );
            window_start = window_end;
        }

        // Interruptible sleep between cycles
        for _ in 0..interval {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    info!("👋 Scheduler stopped");
    Ok(())
}

async fn discover_once(config: Config, from: Option<String>, minutes: Option<u32>) -> Result<()> {
    let store = Arc::new(SqliteStore::open(&config.store.db_path)?);
    let discoverer = WindowDiscoverer::new(store);

    let start: DateTime<Utc> = match from {
        Some(raw) => DateTime::parse_from_rfc3339(&raw)?.with_timezone(&Utc),
        None => Utc::now(),
    };
    let length = minutes.unwrap_or(config.discovery.lookahead_minutes);
    let window = DiscoveryWindow::new(start, start + ChronoDuration::minutes(i64::from(length)));

    let outcome = discoverer.discover(&config.identity, &window).await;
    for candidate in &outcome.candidates {
        let wait = compute_wait_seconds(
            Utc::now(),
            &candidate.strategy.execution_time,
            config.dispatch.tier.ceiling_seconds(),
        );
        println!(
            "{} {} lots={} wait={}s",
            candidate.entry_time,
            candidate.strategy.strategy_id,
            candidate.strategy.total_lots(),
            wait
        );
    }
    info!(
        candidates = outcome.candidates.len(),
        failed_minutes = outcome.failed_minutes,
        "Discovery complete"
    );
    Ok(())
}

async fn seed(config: Config) -> Result<()> {
    let store = SqliteStore::open(&config.store.db_path)?;
    let weekdays: Vec<WeekdayCode> = vec![
        WeekdayCode::Mon,
        WeekdayCode::Tue,
        WeekdayCode::Wed,
        WeekdayCode::Thu,
        WeekdayCode::Fri,
    ];

    let samples = [
        ("straddle-0930", "09:30", ExecutionType::Entry, 4u32),
        ("strangle-1015", "10:15", ExecutionType::Entry, 6),
        ("exit-1520", "15:20", ExecutionType::Exit, 4),
    ];

    for (id, time, execution_type, lots) in samples {
        let strategy = Strategy {
            strategy_id: id.to_string(),
            owner_id: config.identity.clone(),
            execution_time: time.to_string(),
            execution_type,
            weekdays: weekdays.iter().copied().collect(),
            legs: vec![
                LegDefinition {
                    leg_id: 1,
                    instrument: "NIFTY-CE".to_string(),
                    side: OrderSide::Sell,
                    lots: lots / 2,
                    strike: None,
                    premium_cap: None,
                },
                LegDefinition {
                    leg_id: 2,
                    instrument: "NIFTY-PE".to_string(),
                    side: OrderSide::Sell,
                    lots: lots - lots / 2,
                    strike: None,
                    premium_cap: None,
                },
            ],
            underlying: "NIFTY".to_string(),
            status: StrategyStatus::Active,
        };
        store.put_strategy(&strategy).await?;
        info!("🌱 Seeded {} at {} ({} lots)", id, time, lots);
    }

    info!("✅ Seed complete: {} strategies", samples.len());
    Ok(())
}
