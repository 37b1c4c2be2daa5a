use anyhow::{Context, Result};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;
use weekly_trader::broker::BrokerRest;
use weekly_trader::config::Config;
use weekly_trader::engine::{Cadence, SchedulingEngine, TickReport};
use weekly_trader::execution::OrderExecutor;
use weekly_trader::pipeline::RunAggregator;
use weekly_trader::stages::{AnthropicChat, FundamentalAnalyst, NewsResearcher, OpenAiChat, QuantDecider};

struct Args {
    config: PathBuf,
    run_now: bool,
    dry_run: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        config: PathBuf::from("config.toml"),
        run_now: false,
        dry_run: false,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--run-now" => args.run_now = true,
            "--dry-run" => args.dry_run = true,
            "--config" => {
                let path = iter.next().context("--config needs a path")?;
                args.config = PathBuf::from(path);
            }
            other => anyhow::bail!(
                "unknown argument: {} (usage: weekly-trader [--config path] [--run-now] [--dry-run])",
                other
            ),
        }
    }
    Ok(args)
}

fn build_engine(config: &Config, dry_run: bool) -> Result<Arc<SchedulingEngine>> {
    let secrets = Config::secrets()?;

    let broker = Arc::new(BrokerRest::new(
        secrets.broker_key_id.clone(),
        secrets.broker_secret.clone(),
        &config.broker.api_base,
        config.broker.request_timeout_ms,
    )?);
    let research_model = Arc::new(OpenAiChat::new(secrets.openai_api_key.clone(), &config.research.model)?);
    let analysis_model = Arc::new(AnthropicChat::new(secrets.anthropic_api_key.clone(), &config.analysis)?);
    let decision_model = Arc::new(OpenAiChat::new(secrets.xai_api_key.clone(), &config.decision.model)?);

    let aggregator = RunAggregator::new(
        broker.clone(),
        Arc::new(NewsResearcher::new(research_model, config.research.pick_count)),
        Arc::new(FundamentalAnalyst::new(analysis_model)),
        Arc::new(QuantDecider::new(decision_model, config.decision.max_position_fraction)),
        Arc::new(OrderExecutor::new(broker, dry_run)),
    );

    let cadence = Cadence::from_config(&config.schedule)?;
    Ok(Arc::new(SchedulingEngine::new(Arc::new(aggregator), cadence, Utc::now())))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args()?;
    let config = Config::load(&args.config)?;

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.logging.file)
        .with_context(|| format!("Failed to open log file: {}", config.logging.file))?;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stdout.and(Arc::new(log_file)))
        .with_ansi(false)
        .init();

    // Load saved keys from .env (real env vars take precedence)
    Config::load_env_file();

    println!();
    println!("  Weekly Trader v0.1.0");
    println!("  ====================");
    println!();
    println!(
        "  Schedule: every {} at {} {}",
        config.schedule.weekday, config.schedule.time, config.schedule.timezone
    );
    if args.dry_run {
        println!("  ** DRY RUN ** (orders are logged, not submitted)");
    }
    println!();

    let engine = build_engine(&config, args.dry_run)?;

    if args.run_now {
        let outcome = engine.run_immediately().await;
        tracing::info!(status = ?outcome.status, actions = outcome.executed_actions.len(), "manual run done");
        return Ok(());
    }

    // Administrative trigger: SIGUSR1 runs the pipeline immediately.
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut usr1 = signal(SignalKind::user_defined1()).context("failed to install SIGUSR1 handler")?;
        let engine = engine.clone();
        tokio::spawn(async move {
            while usr1.recv().await.is_some() {
                tracing::info!("SIGUSR1 received, running pipeline now");
                let outcome = engine.run_immediately().await;
                tracing::info!(status = ?outcome.status, "manual run done");
            }
        });
    }

    let state = engine.current_state();
    tracing::info!(next_window = %state.next_window, "scheduler running, Ctrl+C to exit");

    let mut interval = tokio::time::interval(Duration::from_secs(config.schedule.tick_interval_s));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                match engine.tick().await {
                    TickReport::Ran { trigger, outcome } => {
                        let state = engine.current_state();
                        tracing::info!(
                            trigger = ?trigger,
                            status = ?outcome.status,
                            mode = ?state.mode,
                            next_window = %state.next_window,
                            "tick serviced a run"
                        );
                    }
                    TickReport::Deferred { until } => {
                        tracing::debug!(until = %until, "deferred, waiting for market recheck");
                    }
                    TickReport::Busy | TickReport::Idle => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested");
                break;
            }
        }
    }

    Ok(())
}
