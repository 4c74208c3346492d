//! Configuration display.

use crate::cli::icons::dim_arrow;
use crate::config::Config;

/// Print the effective configuration as JSON, with secrets replaced.
pub fn cmd_config_show(config: &Config) -> anyhow::Result<()> {
    let source = config
        .source_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "defaults (no config file found)".to_string());
    eprintln!("{} Source: {}", dim_arrow(), source);

    println!("{}", serde_json::to_string_pretty(&config.redacted())?);
    Ok(())
}
