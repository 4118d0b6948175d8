//! Binary entry point: bring up logging, configuration, and the SQLite store,
//! seed the default category, then hand control to the Ratatui event loop.
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tabby::config::{log_file_path, Config};
use tabby::logging::setup_logging;
use tabby::{run_app, App, CoverScanner, Library, Store};
use tracing::info;

#[derive(Parser)]
#[command(name = "tabby")]
#[command(author, version, about = "Terminal catalogue for a personal book collection")]
struct Cli {
    /// Database file to open instead of the configured one
    #[arg(long)]
    database: Option<PathBuf>,

    /// Config file to read instead of the default location
    #[arg(long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose, &log_file_path()?)?;

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(path) = cli.database {
        config.database_path = Some(path);
    }

    let db_path = config.database_path()?;
    info!(path = %db_path.display(), "opening library");
    let library = Library::new(Store::open(&db_path)?);
    if let Some(seeded) = library.ensure_default_category(config.default_category())? {
        info!(category = %seeded.name, "seeded default category");
    }

    let scanner = CoverScanner::new(&config.scan)?;
    let mut app = App::new(library, scanner)?;
    let result = run_app(&mut app);

    app.into_library().close()?;
    info!("library closed");
    result
}
