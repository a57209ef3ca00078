//! Installer configuration stored in `kongcert.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Default config file name, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "kongcert.toml";

/// Installer configuration (TOML).
///
/// Meant to be edited by humans. Missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KongcertConfig {
    /// Base URL of the Kong admin API.
    pub admin_url: String,

    /// Delete a certificate once its last SNI moves to a new certificate.
    pub delete_unused_certificates: bool,

    /// Redirect routes that have no hosts (they match every domain).
    pub redirect_route_no_host: bool,

    /// Redirect routes where only some hosts match the domain.
    pub redirect_route_any_host: bool,

    /// Where the last checkpoint is written. Relative paths resolve against
    /// the working directory.
    pub snapshot_path: PathBuf,

    pub http: HttpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HttpConfig {
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
            read_timeout_secs: 30,
        }
    }
}

impl HttpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

impl Default for KongcertConfig {
    fn default() -> Self {
        Self {
            admin_url: "http://localhost:8001".to_string(),
            delete_unused_certificates: true,
            redirect_route_no_host: true,
            redirect_route_any_host: true,
            snapshot_path: PathBuf::from(".kongcert/checkpoint.json"),
            http: HttpConfig::default(),
        }
    }
}

impl KongcertConfig {
    pub fn validate(&self) -> Result<()> {
        let url = self.admin_url.trim();
        if url.is_empty() {
            return Err(anyhow!("admin_url must be non-empty"));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(anyhow!(
                "admin_url must start with http:// or https:// (got {url})"
            ));
        }
        if self.snapshot_path.as_os_str().is_empty() {
            return Err(anyhow!("snapshot_path must be non-empty"));
        }
        if self.http.connect_timeout_secs == 0 {
            return Err(anyhow!("http.connect_timeout_secs must be > 0"));
        }
        if self.http.read_timeout_secs == 0 {
            return Err(anyhow!("http.read_timeout_secs must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `KongcertConfig::default()`.
pub fn load_config(path: &Path) -> Result<KongcertConfig> {
    if !path.exists() {
        let cfg = KongcertConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: KongcertConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &KongcertConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}
