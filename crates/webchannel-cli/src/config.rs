//! Configuration file for the WebChannel CLI.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;
use webchannel_client::ChannelOptions;

/// Upper bound accepted for `concurrent_request_limit`
const MAX_CONCURRENT_REQUESTS: usize = 100;

/// WebChannel CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Channel configuration
    #[serde(default)]
    pub channel: ChannelSection,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[channel]` table
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelSection {
    /// Channel base URL, used when none is given on the command line
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Options handed to the client
    #[serde(flatten)]
    pub options: ChannelOptions,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("webchannel/config.toml")
    }

    /// Load config from default path, or create default if it doesn't exist
    ///
    /// # Errors
    ///
    /// Returns an error if reading or creating the config fails.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();

        if path.exists() {
            Self::load(&path)
        } else {
            let config = Self::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(url) = &self.channel.url {
            validate_url(url, "Channel URL")?;
        }
        if let Some(url) = &self.channel.options.test_url {
            validate_url(url, "Test URL")?;
        }

        if let Some(limit) = self.channel.options.concurrent_request_limit {
            if limit == 0 || limit > MAX_CONCURRENT_REQUESTS {
                anyhow::bail!(
                    "Concurrent request limit must be between 1 and {}",
                    MAX_CONCURRENT_REQUESTS
                );
            }
        }

        let headers = self
            .channel
            .options
            .message_headers
            .keys()
            .chain(self.channel.options.init_message_headers.keys());
        for name in headers {
            if name.is_empty() || name.chars().any(|c| c.is_whitespace() || c == ':') {
                anyhow::bail!("Invalid header name: '{}'", name);
            }
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }
}

fn validate_url(url: &str, name: &str) -> anyhow::Result<()> {
    let parsed = Url::parse(url).map_err(|e| anyhow::anyhow!("{} '{}' is invalid: {}", name, url, e))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        anyhow::bail!("{} '{}' must use http or https", name, url);
    }
    Ok(())
}
