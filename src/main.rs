use anyhow::{Context, Result};
use chrono::{Duration, NaiveDateTime, NaiveTime, Timelike};
use clap::{Parser, Subcommand};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use onair::catalog::{validate, Catalog};
use onair::config::Config;
use onair::player::{Player, SimulatedPlayer};
use onair::scheduler::projector::ProjectionContext;
use onair::scheduler::{
    Clock, MorningGenres, ScheduleProjector, Station, StationDriver, StationEvent, UsageLedger,
};

#[derive(Parser)]
#[command(
    name = "onair",
    version,
    about = "Unattended playout scheduler for an always-on audio stream",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (TOML); environment variables are used otherwise
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Catalog JSON, overriding the configured path
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run in real time against a simulated player until interrupted
    Run {
        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,
    },

    /// Step simulated time deterministically and print what happens
    Simulate {
        /// Start instant, e.g. 2024-01-15T23:59:00
        #[arg(long)]
        at: String,

        /// Clock seconds per step
        #[arg(long, default_value = "1")]
        rate: i64,

        /// Clock seconds to simulate
        #[arg(long = "for", default_value = "3600")]
        seconds: i64,
    },

    /// Print the scheduled timeline of one hour
    Project {
        /// Hour of day (0-23)
        #[arg(long)]
        hour: u8,

        /// Day to project, e.g. 2024-01-15T00:00:00 (defaults to today)
        #[arg(long)]
        at: Option<String>,
    },

    /// Check the catalog for gaps and inconsistencies
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    if let Some(path) = cli.catalog.clone() {
        config.catalog.path = path;
    }
    if let Some(format) = cli.log_format.clone() {
        config.logging.format = format;
    }
    config.validate()?;

    // Initialize tracing/logging
    setup_tracing(&config.logging.format, &config.logging.level, cli.verbose)?;

    tracing::info!(catalog = %config.catalog.path.display(), "onair starting");

    match cli.command {
        Commands::Run { duration } => {
            tracing::info!(duration = ?duration, "Starting run command");
            run(&config, duration).await?;
        }

        Commands::Simulate { at, rate, seconds } => {
            tracing::info!(at = %at, rate, seconds, "Starting simulate command");
            simulate(&config, parse_instant(&at)?, rate, seconds)?;
        }

        Commands::Project { hour, at } => {
            project(&config, hour, at.as_deref())?;
        }

        Commands::Validate => {
            validate_catalog(&config)?;
        }
    }

    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("onair=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("onair={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}

fn load_catalog(config: &Config) -> Result<Arc<Catalog>> {
    let catalog = config
        .load_catalog()
        .with_context(|| format!("Failed to load catalog {}", config.catalog.path.display()))?;
    Ok(Arc::new(catalog))
}

fn parse_instant(value: &str) -> Result<NaiveDateTime> {
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .with_context(|| format!("Invalid instant '{value}', expected YYYY-MM-DDTHH:MM:SS"))
}

fn print_event(now: NaiveDateTime, event: &StationEvent) {
    match serde_json::to_string(event) {
        Ok(json) => println!("{now}  {json}"),
        Err(e) => tracing::warn!(error = %e, "Could not serialize event"),
    }
}

fn drain_events(now: NaiveDateTime, events: &mut broadcast::Receiver<StationEvent>) {
    while let Ok(event) = events.try_recv() {
        print_event(now, &event);
    }
}

async fn run(config: &Config, duration: Option<u64>) -> Result<()> {
    let catalog = load_catalog(config)?;
    let clock = Clock::system(config.zone()?);
    let player = SimulatedPlayer::new(clock.clone(), catalog.durations());
    let station = Station::new(config.station_config(), catalog, clock.clone(), player);
    let mut events = station.subscribe();

    let driver = StationDriver::with_defaults(station)?;
    let handle = driver.handle();
    let task = tokio::spawn(driver.run());

    let deadline = async {
        match duration {
            Some(secs) => tokio::time::sleep(std::time::Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => print_event(clock.now(), &event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event printer fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            _ = &mut deadline => break,
        }
    }

    handle.stop().await;
    task.await.context("Driver task panicked")??;

    let station = handle.station();
    let station = station.lock().await;
    println!("{}", station.status().display());
    Ok(())
}

fn simulate(config: &Config, start: NaiveDateTime, rate: i64, seconds: i64) -> Result<()> {
    anyhow::ensure!(rate > 0, "rate must be positive");

    let catalog = load_catalog(config)?;
    let clock = Clock::simulated(start, rate);
    let player = SimulatedPlayer::new(clock.clone(), catalog.durations());
    let mut station = Station::new(config.station_config(), catalog, clock.clone(), player);
    let mut events = station.subscribe();

    station.start();
    let end = start + Duration::seconds(seconds);

    loop {
        loop {
            let produced = station.player_mut().poll_events();
            if produced.is_empty() {
                break;
            }
            for event in produced {
                station.on_player_event(event);
            }
        }
        drain_events(clock.now(), &mut events);

        if clock.now() >= end {
            break;
        }
        clock.advance(Duration::seconds(rate));
        station.tick();
    }

    println!("{}", station.status().display());
    Ok(())
}

fn project(config: &Config, hour: u8, at: Option<&str>) -> Result<()> {
    anyhow::ensure!(hour < 24, "hour must be 0-23, got {hour}");

    let catalog = load_catalog(config)?;
    let day = match at {
        Some(value) => parse_instant(value)?,
        None => Clock::system(config.zone()?).now(),
    };
    let now = day.date().and_time(NaiveTime::MIN) + Duration::hours(i64::from(hour));

    let mut rng = match config.playback.rng_seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    };
    let mut genres = MorningGenres::default();
    genres.reroll(&catalog, &mut rng, now);

    let ledger = UsageLedger::new();
    let ctx = ProjectionContext {
        catalog: &catalog,
        ledger: &ledger,
        genres: &genres,
    };
    let projector = ScheduleProjector::new(config.playback.chain_gap_threshold_secs);
    let items = projector.project_hour(ctx, hour, now, &mut rng);

    println!("Timeline for {} {:02}:00", now.date(), now.hour());
    if let Some(genre) = genres.genre_for(hour).filter(|_| catalog.is_morning_hour(hour)) {
        println!("Morning genre: {genre}");
    }
    if items.is_empty() {
        println!("  (no scheduled content)");
    }
    for item in &items {
        let chained = if item.is_chained { "  chained" } else { "" };
        println!(
            "  {} - {}  {}{}",
            item.effective_start.time(),
            item.effective_end().time(),
            item.key(),
            chained
        );
    }
    Ok(())
}

fn validate_catalog(config: &Config) -> Result<()> {
    let catalog = load_catalog(config)?;
    let report = validate::validate(&catalog);
    print!("{report}");

    if report.has_errors() {
        anyhow::bail!("Catalog has errors");
    }
    Ok(())
}
