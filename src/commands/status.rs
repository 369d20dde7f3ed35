use std::fs;
use std::path::Path;

use anyhow::Result;
use chrono::{Duration, Utc};
use hourly_fifo::{HourIndexer, Settings, date_key, hour_key, pipes};

fn pipe_state(path: &Path) -> &'static str {
    match fs::symlink_metadata(path) {
        Ok(_) if pipes::is_fifo(path) => "fifo",
        Ok(m) if m.is_dir() => "directory",
        Ok(m) if m.file_type().is_symlink() => "symlink",
        Ok(_) => "file",
        Err(_) => "missing",
    }
}

/// Report each stream's pipe and whether the current and next slots resolve to it.
pub fn run(settings: Settings, json: bool) -> Result<()> {
    let now = Utc::now();
    let next = now + Duration::hours(1);
    let indexer = HourIndexer::new(settings.layout);
    let layout = indexer.layout();

    let mut healthy = true;
    let mut rows = Vec::new();

    for stream in layout.streams() {
        let pipe = layout.pipe_path(stream);
        let state = pipe_state(&pipe);
        let current = indexer.resolve(stream, now);
        let upcoming = indexer.resolve(stream, next);
        let ok = state == "fifo"
            && current.as_deref() == Some(pipe.as_path())
            && upcoming.as_deref() == Some(pipe.as_path());
        healthy &= ok;
        rows.push((stream, pipe, state, current, upcoming, ok));
    }

    if json {
        let output = serde_json::json!({
            "now": now.to_rfc3339(),
            "healthy": healthy,
            "streams": rows.iter().map(|(stream, pipe, state, current, upcoming, ok)| {
                serde_json::json!({
                    "stream": stream.kind,
                    "pipe": pipe,
                    "pipe_state": state,
                    "current_slot": layout.slot_path(stream, now),
                    "current_target": current,
                    "next_slot": layout.slot_path(stream, next),
                    "next_target": upcoming,
                    "ok": ok,
                })
            }).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!(
            "Slots {}/{} and {}/{} (UTC)",
            date_key(now),
            hour_key(now),
            date_key(next),
            hour_key(next)
        );
        println!();
        for (stream, pipe, state, current, upcoming, ok) in &rows {
            let mark = if *ok { "ok" } else { "!!" };
            println!("[{}] {} ({}: {})", mark, stream.kind, pipe.display(), state);
            let show = |t: &Option<std::path::PathBuf>| {
                t.as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "missing".to_string())
            };
            println!("     current -> {}", show(current));
            println!("     next    -> {}", show(upcoming));
        }
    }

    if !healthy {
        anyhow::bail!("One or more streams are not ready");
    }
    Ok(())
}
