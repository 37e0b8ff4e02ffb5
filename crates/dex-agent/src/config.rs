// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::ConfigError;
use insightfinder::api::RetryStrategy;
use insightfinder::constants::{
    CHUNK_SIZE, DEFAULT_URL, HTTP_REQUEST_TIMEOUT, HTTP_RETRY_INTERVAL, HTTP_RETRY_TIMES,
    MAX_PACKET_SIZE,
};
use insightfinder::flusher::FlusherConfig;
use insightfinder::util::parse_duration_secs;
use std::env;
use std::fs;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_ROUND_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_SAMPLING_WINDOW: Duration = Duration::from_secs(2);
const MAX_SAMPLING_WINDOW: Duration = Duration::from_secs(60);
const KERNEL_HOSTNAME_PATH: &str = "/proc/sys/kernel/hostname";
const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Configuration of the agent, read once at startup
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// InsightFinder base url
    pub url: String,
    pub user_name: String,
    pub license_key: String,
    pub project_name: String,
    pub system_name: Option<String>,
    /// Name published for system-wide metrics
    pub instance_name: String,
    pub component_name: Option<String>,
    pub https_proxy: Option<String>,
    /// Time between the starts of two rounds
    pub round_interval: Duration,
    /// Time between the two reads of cumulative counters
    pub sampling_window: Duration,
    pub chunk_threshold: usize,
    pub max_packet_size: usize,
    /// Total delivery attempts per chunk
    pub retry_attempts: u64,
    pub retry_interval: Duration,
    pub request_timeout: Duration,
    /// Also report one instance per logical CPU
    pub per_cpu: bool,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            user_name: String::new(),
            license_key: String::new(),
            project_name: String::new(),
            system_name: None,
            instance_name: "unknown".to_string(),
            component_name: None,
            https_proxy: None,
            round_interval: DEFAULT_ROUND_INTERVAL,
            sampling_window: DEFAULT_SAMPLING_WINDOW,
            chunk_threshold: CHUNK_SIZE,
            max_packet_size: MAX_PACKET_SIZE,
            retry_attempts: HTTP_RETRY_TIMES,
            retry_interval: HTTP_RETRY_INTERVAL,
            request_timeout: HTTP_REQUEST_TIMEOUT,
            per_cpu: false,
            log_level: "info".to_string(),
        }
    }
}

impl AgentConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create configuration from any variable lookup, `None` meaning unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();

        let config = Self {
            url: var("IF_URL").unwrap_or(defaults.url),
            user_name: var("IF_USER_NAME").unwrap_or_default(),
            license_key: var("IF_LICENSE_KEY").unwrap_or_default(),
            project_name: var("IF_PROJECT_NAME").unwrap_or_default(),
            system_name: var("IF_SYSTEM_NAME"),
            instance_name: var("IF_INSTANCE_NAME").unwrap_or_else(|| detect_hostname(&var)),
            component_name: var("IF_COMPONENT_NAME"),
            https_proxy: var("IF_HTTPS_PROXY").or_else(|| var("HTTPS_PROXY")),
            round_interval: parse_duration("IF_RUN_INTERVAL", var("IF_RUN_INTERVAL"))?
                .unwrap_or(defaults.round_interval),
            sampling_window: parse_duration("IF_SAMPLING_WINDOW", var("IF_SAMPLING_WINDOW"))?
                .unwrap_or(defaults.sampling_window),
            chunk_threshold: parse_number("IF_CHUNK_SIZE", var("IF_CHUNK_SIZE"))?
                .unwrap_or(defaults.chunk_threshold),
            max_packet_size: parse_number("IF_MAX_PACKET_SIZE", var("IF_MAX_PACKET_SIZE"))?
                .unwrap_or(defaults.max_packet_size),
            retry_attempts: parse_number("IF_RETRY_TIMES", var("IF_RETRY_TIMES"))?
                .unwrap_or(defaults.retry_attempts),
            retry_interval: parse_duration("IF_RETRY_INTERVAL", var("IF_RETRY_INTERVAL"))?
                .unwrap_or(defaults.retry_interval),
            request_timeout: parse_duration("IF_REQUEST_TIMEOUT", var("IF_REQUEST_TIMEOUT"))?
                .unwrap_or(defaults.request_timeout),
            per_cpu: parse_bool("IF_PER_CPU_METRICS", var("IF_PER_CPU_METRICS"))?
                .unwrap_or(defaults.per_cpu),
            log_level: var("IF_LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or(defaults.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("IF_URL", &self.url),
            ("IF_USER_NAME", &self.user_name),
            ("IF_LICENSE_KEY", &self.license_key),
            ("IF_PROJECT_NAME", &self.project_name),
            ("IF_INSTANCE_NAME", &self.instance_name),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{name} is required")));
            }
        }

        if self.round_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "IF_RUN_INTERVAL must be greater than 0".to_string(),
            ));
        }

        if self.sampling_window < Duration::from_secs(1) || self.sampling_window > MAX_SAMPLING_WINDOW
        {
            return Err(ConfigError::Invalid(format!(
                "IF_SAMPLING_WINDOW must be between 1s and {}s",
                MAX_SAMPLING_WINDOW.as_secs()
            )));
        }

        if self.chunk_threshold == 0 {
            return Err(ConfigError::Invalid(
                "IF_CHUNK_SIZE must be greater than 0".to_string(),
            ));
        }

        if self.max_packet_size < self.chunk_threshold {
            return Err(ConfigError::Invalid(format!(
                "IF_MAX_PACKET_SIZE ({}) must not be smaller than IF_CHUNK_SIZE ({})",
                self.max_packet_size, self.chunk_threshold
            )));
        }

        if self.retry_attempts == 0 {
            return Err(ConfigError::Invalid(
                "IF_RETRY_TIMES must be at least 1".to_string(),
            ));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    pub fn retry_strategy(&self) -> RetryStrategy {
        RetryStrategy::FixedInterval(self.retry_attempts, self.retry_interval)
    }

    pub fn flusher_config(&self) -> FlusherConfig {
        FlusherConfig {
            url: self.url.clone(),
            user_name: self.user_name.clone(),
            license_key: self.license_key.clone(),
            project_name: self.project_name.clone(),
            system_name: self.system_name.clone(),
            instance_name: self.instance_name.clone(),
            component_name: self.component_name.clone(),
            sampling_interval: Some(self.round_interval),
            https_proxy: self.https_proxy.clone(),
            timeout: self.request_timeout,
            retry_strategy: self.retry_strategy(),
            chunk_threshold: self.chunk_threshold,
            max_packet_size: self.max_packet_size,
        }
    }
}

/// Hostname from `HOSTNAME`, then the kernel, then `"unknown"`.
fn detect_hostname<F>(var: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(hostname) = var("HOSTNAME") {
        return hostname;
    }
    match fs::read_to_string(KERNEL_HOSTNAME_PATH) {
        Ok(hostname) if !hostname.trim().is_empty() => hostname.trim().to_string(),
        _ => {
            warn!("Could not determine hostname, using 'unknown'");
            "unknown".to_string()
        }
    }
}

fn parse_duration(name: &str, value: Option<String>) -> Result<Option<Duration>, ConfigError> {
    value
        .map(|raw| {
            parse_duration_secs(&raw).ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "{name} must be a number of seconds or end with s, m or h, got '{raw}'"
                ))
            })
        })
        .transpose()
}

fn parse_number<T: std::str::FromStr>(
    name: &str,
    value: Option<String>,
) -> Result<Option<T>, ConfigError> {
    value
        .map(|raw| {
            raw.parse::<T>().map_err(|_| {
                ConfigError::Invalid(format!("{name} must be a non-negative integer, got '{raw}'"))
            })
        })
        .transpose()
}

fn parse_bool(name: &str, value: Option<String>) -> Result<Option<bool>, ConfigError> {
    value
        .map(|raw| match raw.to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(ConfigError::Invalid(format!(
                "{name} must be true or false, got '{raw}'"
            ))),
        })
        .transpose()
}
