#[cfg(not(unix))]
compile_error!("hourly-fifo manages named pipes and symlinks and only builds on unix");

pub mod config;
pub mod hourly;
pub mod layout;
pub mod pipes;
pub mod retention;
pub mod scheduler;

pub use config::{Config, ConfigError, Settings};
pub use hourly::{HourIndexer, RotationError};
pub use layout::{PathLayout, Stream, StreamKind, date_key, hour_key};
pub use pipes::{PipeAction, PipeProvisioner, ProvisionError};
pub use retention::{
    EntryMatch, RetentionPolicy, RetentionRule, RetentionSweeper, SweepEntryError, SweepReport,
};
pub use scheduler::{Scheduler, SchedulerState, StartupError, shutdown_channel};
