use std::path::PathBuf;

use serde::Deserialize;

/// Optional `emptool.toml` with defaults for the knobs nobody wants to
/// retype on every invocation.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub baudrate: u32,
    pub loader_dir: PathBuf,
    pub rest_dir: PathBuf,
    pub backup_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            baudrate: 115200,
            loader_dir: PathBuf::from("./loader"),
            rest_dir: PathBuf::from("./rest"),
            backup_dir: PathBuf::from("./backup"),
        }
    }
}

pub fn parse_config<P>(path: P) -> anyhow::Result<Config>
where
    P: AsRef<std::path::Path>,
{
    if let Ok(config_file) = std::fs::read_to_string(&path) {
        Ok(toml::from_str(&config_file)?)
    } else {
        Ok(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_missing() {
        let config = parse_config("/nonexistent/emptool.toml").unwrap();
        assert_eq!(config.baudrate, 115200);
        assert_eq!(config.loader_dir, PathBuf::from("./loader"));
    }

    #[test]
    fn test_partial_override() {
        let config: Config = toml::from_str("baudrate = 921600\n").unwrap();
        assert_eq!(config.baudrate, 921600);
        assert_eq!(config.backup_dir, PathBuf::from("./backup"));
    }
}
