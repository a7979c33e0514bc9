use crate::config::AppConfig;
use anyhow::Result;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads application configuration by merging the TOML file and
    /// `GEXRAY_`-prefixed environment variables over the built-in defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read or parsed.
    pub fn load() -> Result<AppConfig> {
        Self::load_from("config/Config.toml")
    }

    /// Loads application configuration from a specific TOML file.
    ///
    /// A missing file is not an error; defaults apply.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or environment overrides cannot be parsed.
    pub fn load_from(path: &str) -> Result<AppConfig> {
        let config: AppConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("GEXRAY_").split("__"))
            .extract()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = ConfigLoader::load_from("does/not/exist.toml").unwrap();
        assert_eq!(config.fetcher.cadence_secs, 60);
        assert_eq!(config.market_hours.open, "09:30");
        assert!(!config.universe.symbols.is_empty());
    }

    #[test]
    fn toml_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[fetcher]\ncadence_secs = 300\n\n[universe]\nsymbols = [\"SPY\", \"$SPX\"]\n"
        )
        .unwrap();

        let config = ConfigLoader::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(config.fetcher.cadence_secs, 300);
        assert_eq!(config.universe.symbols, vec!["SPY", "$SPX"]);
        // Untouched sections keep their defaults.
        assert_eq!(config.schwab.timeout_secs, 30);
    }
}
