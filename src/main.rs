use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Commands};
use inbox_pulse::config::LoggingConfig;

fn main() -> Result<()> {
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

fn init_logging(logging: &LoggingConfig, verbose: bool) {
    let log_level = if verbose { "debug" } else { logging.level.as_str() };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn async_main(cli: Cli) -> Result<()> {
    let config_arg = cli.config.as_deref();

    // Config commands must work even when the file does not validate.
    if let Commands::Config(args) = cli.command {
        init_logging(&LoggingConfig::default(), cli.verbose);
        return cli::config::run(args, config_arg).await;
    }

    let config = cli::common::load_config(config_arg)?;
    init_logging(&config.logging, cli.verbose);

    match cli.command {
        Commands::Listen(args) => cli::listen::run(args, config).await,
        Commands::Inbox(args) => cli::inbox::run(args, config).await,
        Commands::Send(args) => cli::send::run(args, config).await,
        Commands::Config(_) => Ok(()),
    }
}
