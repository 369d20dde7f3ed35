use anyhow::{Context, Result};
use hourly_fifo::Config;

pub fn run(config: &Config) -> Result<()> {
    // Validate first so a broken config is reported, not printed
    config.resolve()?;
    let toml = config.to_toml().context("Failed to serialize config")?;
    print!("{}", toml);
    Ok(())
}
