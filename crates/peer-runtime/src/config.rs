//! # Runtime Configuration
//!
//! Loaded from an optional TOML file (`HR_CONFIG`), then overridden by
//! environment variables:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `HR_PROFILE` | `profile` (`production` or `development`) |
//! | `HR_USER_ID` | `user_id` |
//! | `HR_PEERS` | `peers` |
//! | `HR_STORE_DIR` | `store_dir` (file-backed shared store) |
//!
//! A `[peer]` table in the file replaces the profile's peer configuration.

use anyhow::{bail, Context, Result};
use hr_04_delivery::PeerConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub profile: String,
    pub user_id: String,
    /// In-process peers sharing one origin.
    pub peers: usize,
    /// Directory for the file-backed shared store. In-memory when unset.
    pub store_dir: Option<PathBuf>,
    /// How often the scripted upstream emits a demo record.
    #[serde(with = "shared_types::millis")]
    pub demo_interval: Duration,
    /// How often the visible peer changes.
    #[serde(with = "shared_types::millis")]
    pub visibility_rotation: Duration,
    #[serde(with = "shared_types::millis")]
    pub stats_interval: Duration,
    pub peer: Option<PeerConfig>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            profile: "development".to_string(),
            user_id: "demo-user".to_string(),
            peers: 3,
            store_dir: None,
            demo_interval: Duration::from_secs(7),
            visibility_rotation: Duration::from_secs(30),
            stats_interval: Duration::from_secs(10),
            peer: None,
        }
    }
}

impl RuntimeConfig {
    pub fn load() -> Result<Self> {
        Self::load_with(|key| env::var(key).ok())
    }

    /// Same as [`RuntimeConfig::load`] with an injectable variable lookup.
    pub fn load_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = match lookup("HR_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };

        if let Some(profile) = lookup("HR_PROFILE") {
            config.profile = profile;
        }
        if let Some(user_id) = lookup("HR_USER_ID") {
            config.user_id = user_id;
        }
        if let Some(peers) = lookup("HR_PEERS") {
            config.peers = peers
                .trim()
                .parse()
                .with_context(|| format!("HR_PEERS={peers:?} is not a peer count"))?;
        }
        if let Some(dir) = lookup("HR_STORE_DIR") {
            config.store_dir = Some(PathBuf::from(dir));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading runtime config {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("parsing runtime config {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// The peer configuration every peer runs with.
    pub fn peer_config(&self) -> Result<PeerConfig> {
        let config = match &self.peer {
            Some(config) => config.clone(),
            None => PeerConfig::for_profile(&self.profile)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.peers == 0 {
            bail!("at least one peer is required");
        }
        if self.user_id.trim().is_empty() {
            bail!("user_id must not be empty");
        }
        for (name, value) in [
            ("demo_interval", self.demo_interval),
            ("visibility_rotation", self.visibility_rotation),
            ("stats_interval", self.stats_interval),
        ] {
            if value.is_zero() {
                bail!("{name} must be greater than zero");
            }
        }
        self.peer_config().map(|_| ())
    }
}
