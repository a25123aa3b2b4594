use anyhow::Result;
use std::path::PathBuf;

use inbox_pulse::config::Config;

/// Load the config from `--config` if given, else from the default location.
pub fn load_config(path: Option<&str>) -> Result<Config> {
    match config_file(path) {
        Some(path) => Config::load_from(&path),
        None => Config::load(),
    }
}

pub fn config_file(path: Option<&str>) -> Option<PathBuf> {
    path.map(|p| PathBuf::from(shellexpand::tilde(p).to_string()))
}

/// Render an API timestamp (microseconds since the epoch) for display.
pub fn format_timestamp(micros: i64) -> String {
    chrono::DateTime::from_timestamp_micros(micros)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| micros.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(1_700_000_000_000_000), "2023-11-14 22:13:20");
        assert_eq!(format_timestamp(i64::MAX), i64::MAX.to_string());
    }

    #[test]
    fn test_config_file_expands_tilde() {
        assert!(config_file(None).is_none());
        let path = config_file(Some("/tmp/x.toml")).unwrap();
        assert_eq!(path, PathBuf::from("/tmp/x.toml"));
    }
}
