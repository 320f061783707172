//! Playout scheduling core
//!
//! This module decides what is on air at every instant. It interleaves three
//! content classes: free-running rotation music picked per time slot, junk
//! filler (ads, announcements, bumpers), and scheduled content anchored to a
//! wall-clock instant.
//!
//! # Overview
//!
//! A [`Station`] owns all scheduler context and is driven from outside: timer
//! deadlines through [`Station::tick`], player notifications through
//! [`Station::on_player_event`]. [`StationDriver`] does both on tokio.
//!
//! # Features
//!
//! - **Projection**: occurrences of the current and next hour are resolved,
//!   tie-broken by recurrence priority and chained when back to back
//! - **Pre-emption**: 15 and 5 minutes ahead of scheduled content the rotation
//!   narrows to junk, then to non-bumper junk, and fades out before the start
//! - **Usage ledger**: nothing replays inside its exclusion window
//! - **Two strategies**: precise timers, or polling on every selection when
//!   the host delivers timers late
//! - **Simulated time**: the clock can run faster than real time for dry runs
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                          Station                           │
//! │  ┌───────────┐  ┌─────────────┐  ┌──────────────────────┐  │
//! │  │ Projector │─▶│  Upcoming   │─▶│ Strategy ─▶ Timers   │  │
//! │  └─────┬─────┘  │   Ledger    │  └──────────┬───────────┘  │
//! │        │        └─────────────┘             │              │
//! │  ┌─────▼─────┐  ┌─────────────┐             │              │
//! │  │   Usage   │◀─│  Selector   │◀────────────┘              │
//! │  │  Ledger   │  └─────────────┘                            │
//! │  └───────────┘                                             │
//! └──────────────────────────┬─────────────────────────────────┘
//!                            │ set_source / play / volume
//!                            ▼
//!                        ┌────────┐
//!                        │ Player │
//!                        └────────┘
//! ```
//!
//! # Modules
//!
//! - [`clock`] - Pass-through and simulated wall clock
//! - [`ledger`] - Recently-played bookkeeping with per-category expiry
//! - [`recurrence`] - Resolving entries to concrete occurrences
//! - [`projector`] - Hour projection, chaining and the upcoming ledger
//! - [`selector`] - Rotation and junk selection
//! - [`timer`] - Generation-checked timer queue
//! - [`strategy`] - Precise and opportunistic scheduling
//! - [`dispatcher`] - The station state machine
//! - [`driver`] - Tokio runtime loop and timer reliability monitor
//!
//! # Quick Start
//!
//! ```ignore
//! use onair::catalog::Catalog;
//! use onair::player::SimulatedPlayer;
//! use onair::scheduler::{Clock, Station, StationConfig};
//!
//! let catalog = Arc::new(Catalog::from_file("tracks.json")?);
//! let clock = Clock::simulated(start, 1);
//! let player = SimulatedPlayer::new(clock.clone(), catalog.durations());
//!
//! let mut station = Station::new(StationConfig::default(), catalog, clock, player);
//! station.start();
//! println!("{}", station.status().display());
//! ```

pub mod clock;
pub mod dispatcher;
pub mod driver;
pub mod error;
pub mod ledger;
pub mod projector;
pub mod recurrence;
pub mod selector;
pub mod strategy;
pub mod timer;

// Re-export main types
pub use clock::{Clock, ClockMode, ZoneSetting};
pub use dispatcher::{
    DispatchState, NowPlaying, PlayingKind, SkipReason, Station, StationConfig, StationEvent,
    StationStatus,
};
pub use driver::{DriverConfig, DriverHandle, StationDriver, TimerReliabilityMonitor};
pub use error::{SchedulerError, SchedulerResult};
pub use ledger::{ExpiryPolicy, UsageCategory, UsageLedger};
pub use projector::{ChainItem, MorningGenres, ScheduleProjector, UpcomingLedger};
pub use recurrence::Occurrence;
pub use selector::{AlgorithmicSelector, PreemptionState, Selection};
pub use strategy::{OpportunisticStrategy, PreciseStrategy, SchedulingStrategy, StrategyKind};
pub use timer::{TimerQueue, TimerTask};
