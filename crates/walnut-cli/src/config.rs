// Layered settings: built-in defaults, then walnut.toml (or --config), then WALNUT_* env,
// then command-line overrides.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;
use walnut_names::policy::{DEFAULT_HOLD_BASE_SECS, DEFAULT_HOLD_MAX_SECS};
use walnut_names::HoldPolicy;

use crate::cli::Cli;

pub const DEFAULT_CONFIG_NAME: &str = "walnut";
pub const ENV_PREFIX: &str = "WALNUT";
pub const DEFAULT_LOG_FILTER: &str = "walnut=info,walnut_cli=info,walnut_rpc=info,walnut_names=info,walnut_kv=info,warp=warn";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Process-local, lost on restart
    Memory,
    /// Durable sled database under `data_dir`
    Sled,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub bind: SocketAddr,
    pub storage: StorageKind,
    pub data_dir: PathBuf,
    pub hold_base_secs: u64,
    pub hold_max_secs: u64,
    pub hash_salt: String,
    pub log_filter: String,
}

impl Settings {
    /// Defaults only, before any file or environment source
    pub fn defaults() -> Result<ConfigBuilder<DefaultState>> {
        Ok(Config::builder()
            .set_default("bind", "127.0.0.1:8080")?
            .set_default("storage", "sled")?
            .set_default("data_dir", "./walnut-data")?
            .set_default("hold_base_secs", DEFAULT_HOLD_BASE_SECS as i64)?
            .set_default("hold_max_secs", DEFAULT_HOLD_MAX_SECS as i64)?
            .set_default("hash_salt", "walnut.world")?
            .set_default("log_filter", DEFAULT_LOG_FILTER)?)
    }

    pub fn load(cli: &Cli) -> Result<Self> {
        let builder = Self::defaults()?;
        let builder = match &cli.config {
            Some(path) => builder.add_source(File::from(path.as_path()).required(true)),
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_NAME).required(false)),
        };
        let builder = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .set_override_option("bind", cli.bind.map(|addr| addr.to_string()))?
            .set_override_option(
                "data_dir",
                cli.data_dir.as_deref().map(|dir| dir.display().to_string()),
            )?
            .set_override_option(
                "storage",
                cli.storage.map(|kind| kind.as_str().to_string()),
            )?;
        Self::from_builder(builder)
    }

    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let settings: Settings = builder
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("invalid configuration")?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.hold_base_secs > 0, "hold_base_secs must be positive");
        ensure!(
            self.hold_max_secs >= self.hold_base_secs,
            "hold_max_secs ({}) must be >= hold_base_secs ({})",
            self.hold_max_secs,
            self.hold_base_secs
        );
        ensure!(!self.hash_salt.is_empty(), "hash_salt must not be empty");
        Ok(())
    }

    pub fn hold_policy(&self) -> HoldPolicy {
        HoldPolicy {
            base_secs: self.hold_base_secs,
            max_secs: self.hold_max_secs,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Memory => "memory",
            StorageKind::Sled => "sled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_policy() {
        let settings = Settings::from_builder(Settings::defaults().unwrap()).unwrap();
        assert_eq!(settings.bind, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(settings.storage, StorageKind::Sled);
        assert_eq!(settings.hold_policy(), HoldPolicy::default());
        assert_eq!(settings.data_dir(), Path::new("./walnut-data"));
    }

    #[test]
    fn test_overrides_apply() {
        let builder = Settings::defaults()
            .unwrap()
            .set_override("storage", "memory")
            .unwrap()
            .set_override("hold_base_secs", 60)
            .unwrap()
            .set_override("hold_max_secs", 600)
            .unwrap();
        let settings = Settings::from_builder(builder).unwrap();
        assert_eq!(settings.storage, StorageKind::Memory);
        assert_eq!(settings.hold_policy().hold_duration(10), 600);
    }

    #[test]
    fn test_inverted_hold_bounds_are_rejected() {
        let builder = Settings::defaults()
            .unwrap()
            .set_override("hold_base_secs", 7200)
            .unwrap()
            .set_override("hold_max_secs", 3600)
            .unwrap();
        let err = Settings::from_builder(builder).unwrap_err();
        assert!(err.to_string().contains("hold_max_secs"));
    }

    #[test]
    fn test_config_file_source() {
        let path = std::env::temp_dir().join(format!("walnut-config-{}.toml", std::process::id()));
        std::fs::write(&path, "bind = \"0.0.0.0:9000\"\nstorage = \"memory\"\n").unwrap();

        let cli = Cli {
            config: Some(path.clone()),
            bind: None,
            data_dir: Some(PathBuf::from("/var/lib/walnut")),
            storage: None,
            command: None,
        };
        let settings = Settings::load(&cli).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(settings.bind, "0.0.0.0:9000".parse().unwrap());
        assert_eq!(settings.storage, StorageKind::Memory);
        assert_eq!(settings.data_dir(), Path::new("/var/lib/walnut"));
    }
}
