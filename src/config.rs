//! JSON config files with create-on-first-run and forward migration.
//!
//! Missing files are written out with defaults so an operator can edit them
//! in the field. When a newer build adds keys, the file on disk is rewritten
//! with the merged result so the new knobs become visible.

use anyhow::{bail, Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::transport::Identity;

/// Mobile-side settings. Interval fields are seconds, fractional allowed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub display_name: String,
    pub base_station_hash: String,
    pub announce_interval: f64,
    pub ping_interval: f64,
    pub ping_delay: f64,
    pub ping_timeout: f64,
    pub path_establishment_wait: f64,
    pub pre_ping_delay: f64,
    pub log_file: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            display_name: "RangeTest-Mobile".to_string(),
            base_station_hash: String::new(),
            announce_interval: 180.0,
            ping_interval: 5.0,
            ping_delay: 0.0,
            ping_timeout: 10.0,
            path_establishment_wait: 10.0,
            pre_ping_delay: 3.0,
            log_file: "range_test.json".to_string(),
        }
    }
}

impl ClientConfig {
    /// The target identity, required before a run can start.
    pub fn base_station(&self) -> Result<Identity> {
        if self.base_station_hash.is_empty() {
            bail!("base_station_hash is not set; pass it on the command line or edit the config");
        }
        Identity::from_hex(&self.base_station_hash)
            .with_context(|| format!("invalid base_station_hash {:?}", self.base_station_hash))
    }

    pub fn announce_interval(&self) -> Duration {
        Duration::from_secs_f64(self.announce_interval)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs_f64(self.ping_interval)
    }

    pub fn ping_delay(&self) -> Duration {
        Duration::from_secs_f64(self.ping_delay)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.ping_timeout)
    }

    pub fn path_establishment_wait(&self) -> Duration {
        Duration::from_secs_f64(self.path_establishment_wait)
    }

    pub fn pre_ping_delay(&self) -> Duration {
        Duration::from_secs_f64(self.pre_ping_delay)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ping_interval <= 0.0 {
            bail!("ping_interval must be positive");
        }
        if self.ping_timeout <= 0.0 {
            bail!("ping_timeout must be positive");
        }
        if self.ping_timeout > self.ping_interval + 60.0 {
            bail!("ping_timeout of {}s is unreasonably long", self.ping_timeout);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub display_name: String,
    pub announce_interval: f64,
    pub reply_path_wait: f64,
    pub log_file: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            display_name: "RangeTest-Base".to_string(),
            announce_interval: 180.0,
            reply_path_wait: 10.0,
            log_file: "range_test_server.json".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn announce_interval(&self) -> Duration {
        Duration::from_secs_f64(self.announce_interval)
    }

    pub fn reply_path_wait(&self) -> Duration {
        Duration::from_secs_f64(self.reply_path_wait)
    }
}

/// Load `path`, creating it with defaults when missing. A file from an
/// older build is rewritten with any newly-added keys merged in.
pub fn load_or_create<T>(path: &Path) -> Result<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    if !path.exists() {
        let config = T::default();
        write_config(path, &config)?;
        println!("Created default config at {}", path.display());
        return Ok(config);
    }

    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: T = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse config {}", path.display()))?;

    // Rewrite when deserializing filled in keys the file does not have.
    let on_disk: serde_json::Value = serde_json::from_str(&text)?;
    let full = serde_json::to_value(&config)?;
    if let (Some(disk), Some(full)) = (on_disk.as_object(), full.as_object()) {
        if disk.len() < full.len() {
            write_config(path, &config)?;
        }
    }
    Ok(config)
}

fn write_config<T: Serialize>(path: &Path, config: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(config)?;
    fs::write(path, text + "\n")
        .with_context(|| format!("failed to write config {}", path.display()))
}
