//! Service configuration
//!
//! Layering (later wins): built-in defaults, YAML file, environment.
//! Environment keys use `__` as the nesting separator, e.g.
//! `GATEWAYSRV_MODBUS__HOST=10.0.0.5`.

use std::path::Path;

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use modbus_link::{ClientConfig, PollingConfig};
use serde::{Deserialize, Serialize};

use crate::logging::LoggingConfig;

pub const DEFAULT_CONFIG_PATH: &str = "config/gatewaysrv.yaml";
pub const ENV_PREFIX: &str = "GATEWAYSRV_";

fn default_indicator_capacity() -> usize {
    5
}

fn default_publish_capacity() -> usize {
    64
}

/// Complete gatewaysrv configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub modbus: ClientConfig,

    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Queue depth of LED color commands
    #[serde(default = "default_indicator_capacity")]
    pub indicator_capacity: usize,

    /// Queue depth between the polling loop and the uplink forwarder
    #[serde(default = "default_publish_capacity")]
    pub publish_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            modbus: ClientConfig::default(),
            polling: PollingConfig::default(),
            logging: LoggingConfig::default(),
            indicator_capacity: default_indicator_capacity(),
            publish_capacity: default_publish_capacity(),
        }
    }
}

impl GatewayConfig {
    /// Load from `path` and `GATEWAYSRV_*` variables
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    /// Load with a custom environment prefix
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_with_prefix(path: impl AsRef<Path>, prefix: &str) -> Result<Self> {
        let path = path.as_ref();
        let config: GatewayConfig = Figment::from(Serialized::defaults(GatewayConfig::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed(prefix).split("__"))
            .extract()
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

        config.validate()
    }

    /// Normalize the Modbus sections and reject unusable values
    pub fn validate(mut self) -> Result<Self> {
        self.modbus = self
            .modbus
            .normalized()
            .context("Invalid modbus configuration")?;
        self.polling = self
            .polling
            .normalized()
            .context("Invalid polling configuration")?;

        if self.indicator_capacity == 0 {
            self.indicator_capacity = default_indicator_capacity();
        }
        if self.publish_capacity == 0 {
            self.publish_capacity = default_publish_capacity();
        }

        Ok(self)
    }
}
