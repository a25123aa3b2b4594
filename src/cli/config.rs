use anyhow::Result;
use clap::{Args, Subcommand};

use inbox_pulse::config::Config;

use super::common::{config_file, load_config};

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the config file location
    Path,

    /// Print the effective configuration
    Show,

    /// Read one value, e.g. `polling.interval_ms`
    Get { key: String },

    /// Set one value and save the file
    Set { key: String, value: String },
}

pub async fn run(args: ConfigArgs, path: Option<&str>) -> Result<()> {
    match args.command {
        ConfigCommands::Path => {
            let path = match config_file(path) {
                Some(p) => p,
                None => Config::config_path()?,
            };
            println!("{}", path.display());
        }
        ConfigCommands::Show => {
            let config = load_config(path)?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigCommands::Get { key } => {
            let config = load_config(path)?;
            println!("{}", config.get_value(&key)?);
        }
        ConfigCommands::Set { key, value } => {
            let mut config = load_config(path)?;
            config.set_value(&key, &value)?;
            config.validate()?;
            match config_file(path) {
                Some(p) => config.save_to(&p)?,
                None => config.save()?,
            }
            println!("{} = {}", key, value);
        }
    }
    Ok(())
}
