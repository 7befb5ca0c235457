use clap::Parser;
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::prelude::*;

/// Arguments to configure this runtime of the application before it is started.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(long, env, default_value = "INFO")]
    log_level: LevelFilter,
    #[arg(long, env, default_value = "config.yaml")]
    config: PathBuf,
    #[arg(long, env, default_value = "auth.yaml")]
    auth_config: PathBuf,
}

/// Initializes the application and invokes portal.
///
/// This initializes the logging, aggregates configuration and starts the multithreaded tokio
/// runtime. This is only a thin wrapper around the portal crate that supplies the necessary
/// settings.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    // parse the arguments and configuration
    let args = Args::parse();

    // initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_filter(args.log_level),
        )
        .init();

    // run portal blocking
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async { portal::start(&args.config, &args.auth_config).await })?;

    Ok(())
}
