//! Startup pass and the two timers that keep the index and the retention
//! targets in shape.
//!
//! The scheduler moves `Bootstrapping -> Running -> Stopped`. Nothing is
//! deleted on the way to `Stopped`; the next startup pass validates and
//! extends whatever is on disk.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use log::{error, info, warn};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::config::Settings;
use crate::hourly::{HourIndexer, RotationError};
use crate::layout::StreamKind;
use crate::pipes::{PipeAction, PipeProvisioner, ProvisionError};
use crate::retention::{RetentionRule, RetentionSweeper, SweepReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Bootstrapping,
    Running,
    Stopped,
}

/// Anything that stops the startup pass. Always fatal.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Provision(#[from] ProvisionError),
    #[error(transparent)]
    Rotation(#[from] RotationError),
}

#[derive(Debug, Default)]
pub struct BootstrapReport {
    pub pipes: Vec<(StreamKind, PipeAction)>,
    pub linked: Vec<PathBuf>,
}

/// Sender half used to stop a running scheduler.
pub type ShutdownSender = watch::Sender<bool>;
pub type ShutdownReceiver = watch::Receiver<bool>;

pub fn shutdown_channel() -> (ShutdownSender, ShutdownReceiver) {
    watch::channel(false)
}

pub struct Scheduler {
    provisioner: PipeProvisioner,
    indexer: HourIndexer,
    sweeper: RetentionSweeper,
    rotation_schedule: Schedule,
    rules: Vec<RetentionRule>,
    state: SchedulerState,
}

impl Scheduler {
    pub fn new(settings: Settings) -> Self {
        Self {
            provisioner: PipeProvisioner::new(settings.layout.clone()),
            indexer: HourIndexer::new(settings.layout),
            sweeper: RetentionSweeper::new(),
            rotation_schedule: settings.rotation_schedule,
            rules: settings.rules,
            state: SchedulerState::Bootstrapping,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn indexer(&self) -> &HourIndexer {
        &self.indexer
    }

    pub fn rules(&self) -> &[RetentionRule] {
        &self.rules
    }

    pub fn bootstrap(&mut self) -> Result<BootstrapReport, StartupError> {
        self.bootstrap_at(Utc::now())
    }

    /// Provision every pipe and alias, then link the hour containing `now`
    /// and the one after it. Moves to `Running` only if all of it succeeded.
    pub fn bootstrap_at(&mut self, now: DateTime<Utc>) -> Result<BootstrapReport, StartupError> {
        let mut report = BootstrapReport::default();

        for stream in self.provisioner.layout().streams() {
            let action = self.provisioner.ensure(stream)?;
            report.pipes.push((stream.kind, action));
        }
        for stream in self.provisioner.layout().streams() {
            self.provisioner.ensure_alias(stream)?;
        }

        let (linked, errors) = self.indexer.link_current_and_next(now);
        if let Some(first) = errors.into_iter().next() {
            return Err(first.into());
        }
        report.linked = linked;

        self.state = SchedulerState::Running;
        info!(
            "bootstrap complete: {} pipes, {} hour slots",
            report.pipes.len(),
            report.linked.len()
        );
        Ok(report)
    }

    /// One rotation tick. Errors are logged and left for the next tick.
    pub fn rotate_at(&self, now: DateTime<Utc>) -> (Vec<PathBuf>, Vec<RotationError>) {
        rotate(&self.indexer, now)
    }

    /// Run every rule once, in configuration order.
    pub fn sweep_all(&self) -> Vec<SweepReport> {
        self.rules.iter().map(|r| self.sweeper.sweep(r)).collect()
    }

    /// Bootstrap, then run the rotation and retention timers until
    /// `shutdown` flips to true (or its sender is dropped).
    pub async fn run(&mut self, shutdown: ShutdownReceiver) -> Result<(), StartupError> {
        if let Err(e) = self.bootstrap() {
            error!("startup failed: {}", e);
            return Err(e);
        }

        let mut tasks = JoinSet::new();

        let indexer = self.indexer.clone();
        tasks.spawn(run_on_schedule(
            "rotation".to_string(),
            self.rotation_schedule.clone(),
            shutdown.clone(),
            move || {
                rotate(&indexer, Utc::now());
            },
        ));

        // One timer per distinct schedule; rules sharing a schedule run in order
        let mut groups: BTreeMap<String, (Schedule, Vec<RetentionRule>)> = BTreeMap::new();
        for rule in &self.rules {
            groups
                .entry(rule.schedule.to_string())
                .or_insert_with(|| (rule.schedule.clone(), Vec::new()))
                .1
                .push(rule.clone());
        }

        for (expr, (schedule, rules)) in groups {
            let sweeper = self.sweeper;
            tasks.spawn(run_on_schedule(
                format!("sweep[{}]", expr),
                schedule,
                shutdown.clone(),
                move || {
                    for rule in &rules {
                        sweeper.sweep(rule);
                    }
                },
            ));
        }

        info!("scheduler running with {} timers", tasks.len());

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("scheduler task failed: {}", e);
            }
        }

        self.state = SchedulerState::Stopped;
        info!("scheduler stopped");
        Ok(())
    }
}

fn rotate(indexer: &HourIndexer, now: DateTime<Utc>) -> (Vec<PathBuf>, Vec<RotationError>) {
    let (linked, errors) = indexer.link_current_and_next(now);
    info!(
        "rotation: {} slots linked, {} failed",
        linked.len(),
        errors.len()
    );
    (linked, errors)
}

/// Time until the next firing of `schedule` after `now`.
pub fn until_next(schedule: &Schedule, now: DateTime<Utc>) -> Option<Duration> {
    let next = schedule.after(&now).next()?;
    Some((next - now).to_std().unwrap_or(Duration::ZERO))
}

/// Fire `job` on the blocking pool at every point of `schedule`.
///
/// The next firing is computed after the job returns, so a slow job never
/// overlaps itself and missed firings collapse into one.
async fn run_on_schedule<F>(
    label: String,
    schedule: Schedule,
    mut shutdown: ShutdownReceiver,
    job: F,
) where
    F: Fn() + Clone + Send + 'static,
{
    loop {
        if *shutdown.borrow() {
            return;
        }
        let Some(wait) = until_next(&schedule, Utc::now()) else {
            warn!("{}: schedule has no further firings", label);
            return;
        };

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown.changed() => return,
        }

        if let Err(e) = tokio::task::spawn_blocking(job.clone()).await {
            error!("{}: job failed: {}", label, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, parse_schedule};
    use crate::pipes::is_fifo;
    use chrono::TimeZone;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn settings(root: &Path) -> Settings {
        let config = Config::for_root(root);
        fs::create_dir_all(&config.paths.book_root).unwrap();
        fs::create_dir_all(&config.paths.ephemeral_root).unwrap();
        config.resolve().unwrap()
    }

    #[test]
    fn test_bootstrap_links_current_and_next() {
        let temp_dir = TempDir::new().unwrap();
        let mut scheduler = Scheduler::new(settings(temp_dir.path()));
        assert_eq!(scheduler.state(), SchedulerState::Bootstrapping);

        let now = Utc.with_ymd_and_hms(2026, 5, 1, 14, 20, 0).unwrap();
        let report = scheduler.bootstrap_at(now).unwrap();

        assert_eq!(scheduler.state(), SchedulerState::Running);
        assert_eq!(report.pipes.len(), 3);
        assert!(report.pipes.iter().all(|(_, a)| *a == PipeAction::Created));
        assert_eq!(report.linked.len(), 6);

        let layout = scheduler.indexer().layout();
        for stream in layout.streams() {
            assert!(is_fifo(&layout.pipe_path(stream)));
            for hour in [14, 15] {
                let t = Utc.with_ymd_and_hms(2026, 5, 1, hour, 0, 0).unwrap();
                assert_eq!(
                    scheduler.indexer().resolve(stream, t),
                    Some(layout.pipe_path(stream))
                );
            }
        }
    }

    #[test]
    fn test_bootstrap_failure_stays_bootstrapping() {
        let temp_dir = TempDir::new().unwrap();
        let settings = settings(temp_dir.path());
        fs::remove_dir_all(settings.layout.book_root()).unwrap();

        let mut scheduler = Scheduler::new(settings);
        let err = scheduler.bootstrap().unwrap_err();
        assert!(matches!(
            err,
            StartupError::Provision(ProvisionError::MissingParent { .. })
        ));
        assert_eq!(scheduler.state(), SchedulerState::Bootstrapping);
    }

    #[test]
    fn test_until_next_hourly() {
        let schedule = parse_schedule("rotation", crate::config::DEFAULT_ROTATION_SCHEDULE).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 14, 20, 0).unwrap();
        assert_eq!(
            until_next(&schedule, now),
            Some(Duration::from_secs(39 * 60 + 55))
        );

        // Exactly at a firing point the next one is an hour away
        let at = Utc.with_ymd_and_hms(2026, 5, 1, 14, 59, 55).unwrap();
        assert_eq!(until_next(&schedule, at), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_sweep_all_runs_every_rule() {
        let temp_dir = TempDir::new().unwrap();
        let settings = settings(temp_dir.path());
        let checkpoints = temp_dir
            .path()
            .join("hl/hyperliquid_data/evm_db_hub_slow/checkpoint");
        for name in ["100", "200", "300"] {
            fs::create_dir_all(checkpoints.join(name)).unwrap();
        }

        let scheduler = Scheduler::new(settings);
        let reports = scheduler.sweep_all();
        assert_eq!(reports.len(), scheduler.rules().len());

        let evm = reports.iter().find(|r| r.rule == "evm-checkpoints").unwrap();
        assert_eq!(evm.removed, vec![checkpoints.join("100")]);
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let temp_dir = TempDir::new().unwrap();
        let mut settings = settings(temp_dir.path());
        settings.rotation_schedule = parse_schedule("test", "* * * * * *").unwrap();
        for rule in &mut settings.rules {
            rule.schedule = parse_schedule("test", "* * * * * *").unwrap();
        }

        let checkpoints = temp_dir
            .path()
            .join("hl/hyperliquid_data/evm_db_hub_slow/checkpoint");
        for name in ["1", "2", "3"] {
            fs::create_dir_all(checkpoints.join(name)).unwrap();
        }

        let layout = settings.layout.clone();
        let fills = layout.stream(StreamKind::Fills).unwrap().clone();

        let (tx, rx) = shutdown_channel();
        let mut scheduler = Scheduler::new(settings);

        // Bootstrap has run by the time this task is first polled. Drop the
        // next-hour slot so only a rotation firing can bring it back.
        let task_fills = fills.clone();
        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            let removed = layout.slot_path(&task_fills, Utc::now() + chrono::Duration::hours(1));
            let _ = fs::remove_file(&removed);
            tokio::time::sleep(Duration::from_millis(2200)).await;
            tx.send(true).unwrap();
            removed
        });

        scheduler.run(rx).await.unwrap();
        let removed = stopper.await.unwrap();

        assert_eq!(
            fs::read_link(&removed).unwrap(),
            scheduler.indexer().layout().pipe_path(&fills)
        );

        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert!(!checkpoints.join("1").exists());
        assert!(checkpoints.join("2").exists());
        assert!(checkpoints.join("3").exists());

        // Shutdown leaves pipes and slots in place
        let layout = scheduler.indexer().layout();
        for stream in layout.streams() {
            assert!(is_fifo(&layout.pipe_path(stream)));
            assert!(scheduler.indexer().resolve(stream, Utc::now()).is_some());
        }
    }
}
