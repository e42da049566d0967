//! Album CLI for federated solution catalogs.

use album::core::config::resolve_base_dir;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "album",
    version,
    about = "Federated solution catalogs: resolve, install, and run versioned solutions"
)]
struct Cli {
    /// Album base directory (default: $ALBUM_BASE_DIR or ~/.album)
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: album::cli::Commands,
}

fn main() {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let base_dir = resolve_base_dir(cli.base_dir.as_deref());
    if let Err(e) = album::cli::dispatch(&base_dir, cli.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
