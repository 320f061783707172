//! onair - Unattended playout scheduler
//!
//! Drives continuous playback for an always-on audio stream, interleaving
//! rotation music, junk filler and scheduled content that must start at a
//! wall-clock instant.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`catalog`] - Loading and validating the preprocessed track catalog
//! - [`models`] - Core data structures and types
//! - [`player`] - The playback collaborator and its test doubles
//! - [`scheduler`] - Projection, selection and the station state machine
//! - [`error`] - Unified error type
//!
//! # Example
//!
//! ```no_run
//! use onair::catalog::Catalog;
//! use onair::config::Config;
//! use onair::player::SimulatedPlayer;
//! use onair::scheduler::{Clock, Station, StationDriver};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let catalog = Arc::new(Catalog::from_file(&config.catalog.path)?);
//!     let clock = Clock::system(config.zone()?);
//!     let player = SimulatedPlayer::new(clock.clone(), catalog.durations());
//!
//!     let station = Station::new(config.station_config(), catalog, clock, player);
//!     let driver = StationDriver::with_defaults(station)?;
//!     // driver.run().await?;
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod models;
pub mod player;
pub mod scheduler;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::catalog::Catalog;
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, OnairErrorTrait, Result};
    pub use crate::models::{Recurrence, ScheduledEntry, TimeOfDay, TimeSlot, TrackRecord};
    pub use crate::player::{Player, PlayerEvent};
    pub use crate::scheduler::{Clock, Station, StationConfig, StationDriver, StationEvent};
}

// Direct re-exports for convenience
pub use models::{Recurrence, ScheduledEntry, TimeOfDay, TimeSlot, TrackRecord};
