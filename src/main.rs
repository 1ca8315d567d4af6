//! Fashion Tuner - Main Entry Point

use clap::Parser;
use fashion_tuner::cli::{cmd_run, Cli};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fashion_tuner=info".into()),
        )
        .init();

    let cli = Cli::parse();
    cmd_run(&cli)
}
