//! Log setup for the terminal binary. Output goes to a file because anything
//! written to stdout or stderr would corrupt the TUI.

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter directive for a `-v` count. `RUST_LOG` overrides it.
pub fn filter_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "tabby=info",
        1 => "tabby=debug",
        2 => "tabby=trace",
        _ => "trace",
    }
}

/// Install the global subscriber, appending to `log_path`.
pub fn setup_logging(verbosity: u8, log_path: &Path) -> Result<()> {
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| filter_for(verbosity).into());
    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_ansi(false)
        .with_writer(Arc::new(file));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init()
        .context("Failed to install log subscriber")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_to_filters() {
        assert_eq!(filter_for(0), "tabby=info");
        assert_eq!(filter_for(1), "tabby=debug");
        assert_eq!(filter_for(2), "tabby=trace");
        assert_eq!(filter_for(7), "trace");
    }
}
