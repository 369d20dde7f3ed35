use anyhow::{Context, Result};
use hourly_fifo::{PipeAction, Scheduler, Settings};

/// Run the startup pass once: pipes, aliases, current and next hour.
pub fn run(settings: Settings) -> Result<()> {
    let mut scheduler = Scheduler::new(settings);
    let report = scheduler.bootstrap().context("Startup pass failed")?;

    for (kind, action) in &report.pipes {
        let what = match action {
            PipeAction::Unchanged => "ok",
            PipeAction::Created => "created",
            PipeAction::Replaced => "replaced",
        };
        println!("  {:<16} pipe {}", kind.as_str(), what);
    }
    for link in &report.linked {
        println!("  linked {}", link.display());
    }
    Ok(())
}
