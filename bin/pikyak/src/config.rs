//! Runtime settings for the Pikyak server.
//!
//! Sources, later ones winning: built-in defaults, the file named by
//! `PIKYAK_SETTINGS` (any format the `config` crate understands), then
//! `PIKYAK_*` environment variables such as `PIKYAK_PORT`.

use anyhow::{bail, Context};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

pub const SETTINGS_FILE_VAR: &str = "PIKYAK_SETTINGS";
const ENV_PREFIX: &str = "PIKYAK";
/// First path segments owned by the API; images cannot be mounted there.
const API_PREFIXES: [&str; 3] = ["/users", "/conversations", "/posts"];

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub db_max_connections: u32,
    pub media_root: PathBuf,
    pub media_url_prefix: String,
    pub max_upload_bytes: usize,
}

impl Settings {
    /// Loads settings from the process environment.
    pub fn load() -> anyhow::Result<Self> {
        let file = std::env::var(SETTINGS_FILE_VAR).ok();
        Self::from_sources(file.as_deref(), Environment::with_prefix(ENV_PREFIX))
    }

    fn from_sources(file: Option<&str>, env: Environment) -> anyhow::Result<Self> {
        let mut builder = Config::builder()
            .set_default("host", "0.0.0.0")?
            .set_default("port", 5000)?
            .set_default("database_url", "sqlite:pikyak.db")?
            .set_default("db_max_connections", 5)?
            .set_default("media_root", "./images")?
            .set_default("media_url_prefix", "/images")?
            .set_default("max_upload_bytes", 10 * 1024 * 1024)?;

        if let Some(path) = file {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        let settings: Settings = builder
            .add_source(env.try_parsing(true))
            .build()
            .context("reading configuration")?
            .try_deserialize()
            .context("invalid configuration")?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.db_max_connections == 0 {
            bail!("db_max_connections must be at least 1");
        }
        if self.max_upload_bytes == 0 {
            bail!("max_upload_bytes must be at least 1");
        }
        if !self.media_url_prefix.starts_with('/') {
            bail!("media_url_prefix must start with '/', got {:?}", self.media_url_prefix);
        }
        let prefix = self.media_url_prefix.trim_end_matches('/');
        if prefix.is_empty() || API_PREFIXES.iter().any(|reserved| *reserved == prefix) {
            bail!("media_url_prefix {:?} collides with the API routes", self.media_url_prefix);
        }
        Ok(())
    }
}
