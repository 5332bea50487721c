use clap::Parser;
use pathmux::Settings;
use pathmux::cli::commands::{init, watch};
use pathmux::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
    .unwrap_or_else(|e| {
        eprintln!("Configuration error: {e}");
        Settings::default()
    });

    pathmux::logging::init_with_config(&config.logging);

    match cli.command {
        Commands::Init { force } => init::run_init(force)?,
        Commands::Config => init::run_config(&config, cli.config.as_deref())?,
        Commands::Watch {
            paths,
            mode,
            interval_ms,
        } => watch::run_watch(&config, paths, mode, interval_ms).await?,
    }

    Ok(())
}
