use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use hourly_fifo::{Scheduler, Settings};

/// Link the hour containing `at` (default: now) and the hour after it.
pub fn run(settings: Settings, at: Option<&str>) -> Result<()> {
    let now = match at {
        Some(s) => DateTime::parse_from_rfc3339(s)
            .with_context(|| format!("Invalid --at timestamp '{}'", s))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };

    let scheduler = Scheduler::new(settings);
    let (linked, errors) = scheduler.rotate_at(now);

    for link in &linked {
        println!("linked {}", link.display());
    }
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("error: {}", e);
        }
        anyhow::bail!("{} of {} slots failed to link", errors.len(), linked.len() + errors.len());
    }
    Ok(())
}
