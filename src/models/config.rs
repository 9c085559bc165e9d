use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::PathBuf;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::FeedError;

pub const DEFAULT_PAGE_SIZE: usize = 10;

/// How close (in rows) the selection may get to the end of the rendered
/// feed before the next page is requested.
pub const DEFAULT_SCROLL_THRESHOLD: usize = 3;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FeedConfig {
    pub display_name: String,
    pub page_size: usize,
    pub scroll_threshold: usize,
    pub simulate: bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            display_name: "anonymous".to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            scroll_threshold: DEFAULT_SCROLL_THRESHOLD,
            simulate: true,
        }
    }
}

impl FeedConfig {
    fn config_path() -> Result<PathBuf, FeedError> {
        let home = dirs::home_dir()
            .ok_or_else(|| FeedError::Config("could not find home directory".to_string()))?;
        Ok(home.join(".config/livefeed/config.json"))
    }

    /// Load the config file, falling back to defaults when it is absent.
    pub fn load() -> Result<Self, FeedError> {
        let config_path = Self::config_path()?;
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let file = File::open(&config_path)
            .with_context(|| format!("failed to open config file at {:?}", config_path))?;
        let reader = BufReader::new(file);
        let config: FeedConfig =
            serde_json::from_reader(reader).context("failed to parse config JSON")?;
        Ok(config)
    }

    pub fn save(&self) -> Result<(), FeedError> {
        let config_path = Self::config_path()?;
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create config directory {:?}", parent))?;
        }

        let json =
            serde_json::to_string_pretty(&self).context("failed to serialize config to JSON")?;

        let mut file = File::create(&config_path)
            .with_context(|| format!("failed to open config file for writing at {:?}", config_path))?;
        file.write_all(json.as_bytes())
            .context("failed to write config data")?;

        Ok(())
    }
}
