use anyhow::Result;
use hourly_fifo::{RetentionSweeper, Settings};

/// Run every retention rule (or just `only`) once.
pub fn run(settings: Settings, only: Option<&str>) -> Result<()> {
    let rules: Vec<_> = settings
        .rules
        .iter()
        .filter(|r| only.is_none_or(|name| r.name == name))
        .collect();

    if let Some(name) = only {
        if rules.is_empty() {
            let known: Vec<_> = settings.rules.iter().map(|r| r.name.as_str()).collect();
            anyhow::bail!("Unknown rule '{}'. Known rules: {}", name, known.join(", "));
        }
    }

    let sweeper = RetentionSweeper::new();
    let mut failed = 0;
    for rule in rules {
        let report = sweeper.sweep(rule);
        println!(
            "{:<24} removed {:>4}  errors {:>3}  {}",
            report.rule,
            report.removed.len(),
            report.errors.len(),
            rule.dir.display()
        );
        failed += report.errors.len();
    }

    // Entry failures are not fatal; the next sweep retries them
    if failed > 0 {
        eprintln!("{} entries could not be removed", failed);
    }
    Ok(())
}
