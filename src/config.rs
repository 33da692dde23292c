use serde::Deserialize;

use crate::error::Error;

pub mod defaults {
    pub const ACTIVE_PREFIX: &str = "state";
    pub const SUCCESS_PREFIX: &str = "success";
    pub const FAILED_PREFIX: &str = "failed";
    pub const REGION: &str = "us-east-1";
    pub const API_HOST: &str = "0.0.0.0";
    pub const API_PORT: u16 = 8080;
    pub const LOG_LEVEL: &str = "info";
    pub const DISPATCH_BATCH_SIZE: usize = 64;
    pub const DEMO_SUCCESS_RATE: f64 = 0.3;
}

/// Application configuration, read from `COURIER_`-prefixed environment
/// variables. Every key except the bucket has a default.
#[derive(Clone, Deserialize)]
pub struct Config {
    pub bucket: String,
    pub active_prefix: Option<String>,
    pub success_prefix: Option<String>,
    pub failed_prefix: Option<String>,
    pub endpoint_url: Option<String>,
    pub region: Option<String>,
    pub api_host: Option<String>,
    pub api_port: Option<u16>,
    pub log_level: Option<String>,
    pub recovery_skip_corrupt: Option<bool>,
    pub dispatch_batch_size: Option<usize>,
    pub demo_success_rate: Option<f64>,
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        Ok(envy::prefixed("COURIER_").from_env::<Self>()?)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn active_prefix(&self) -> &str {
        self.active_prefix
            .as_deref()
            .unwrap_or(defaults::ACTIVE_PREFIX)
    }

    pub fn success_prefix(&self) -> &str {
        self.success_prefix
            .as_deref()
            .unwrap_or(defaults::SUCCESS_PREFIX)
    }

    pub fn failed_prefix(&self) -> &str {
        self.failed_prefix
            .as_deref()
            .unwrap_or(defaults::FAILED_PREFIX)
    }

    pub fn endpoint_url(&self) -> Option<&str> {
        self.endpoint_url.as_deref()
    }

    pub fn region(&self) -> &str {
        self.region.as_deref().unwrap_or(defaults::REGION)
    }

    pub fn api_host(&self) -> &str {
        self.api_host.as_deref().unwrap_or(defaults::API_HOST)
    }

    pub fn api_port(&self) -> u16 {
        self.api_port.unwrap_or(defaults::API_PORT)
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or(defaults::LOG_LEVEL)
    }

    pub fn recovery_skip_corrupt(&self) -> bool {
        self.recovery_skip_corrupt.unwrap_or(false)
    }

    pub fn dispatch_batch_size(&self) -> usize {
        self.dispatch_batch_size
            .unwrap_or(defaults::DISPATCH_BATCH_SIZE)
    }

    pub fn demo_success_rate(&self) -> f64 {
        self.demo_success_rate
            .unwrap_or(defaults::DEMO_SUCCESS_RATE)
    }
}
