//! Configuration
//!
//! [`ConfigService`] is the raw string settings map an application
//! consults; it is seeded from the process environment and can be
//! overridden programmatically. [`Settings`] is the typed view the runner
//! itself uses.

use dashmap::DashMap;
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while reading settings
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A setting was present but could not be parsed
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: String, value: String },
}

/// Configuration service
#[derive(Clone, Default)]
pub struct ConfigService {
    config: Arc<DashMap<String, String>>,
}

impl ConfigService {
    /// Settings map seeded from the process environment
    pub fn new() -> Self {
        let service = Self::empty();
        for (key, value) in env::vars() {
            service.set(&key, &value);
        }
        service
    }

    /// Settings map with no entries
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builder-style [`ConfigService::set`]
    pub fn with(self, key: &str, value: impl ToString) -> Self {
        self.set(key, &value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.config.get(key).map(|v| v.clone())
    }

    pub fn set(&self, key: &str, value: &str) {
        self.config.insert(key.to_string(), value.to_string());
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        self.config.remove(key).map(|(_, v)| v)
    }

    /// Parse `key` as `T`, `None` when unset
    pub fn parse<T: FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| ConfigError::Invalid {
                key: key.to_string(),
                value: raw,
            }),
        }
    }

    /// Boolean flag: `true`/`false`/`yes`/`no`/`on`/`off`, or an integer where non-zero is true
    pub fn flag(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        let Some(raw) = self.get(key) else {
            return Ok(None);
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" => Ok(Some(true)),
            "false" | "no" | "off" | "" => Ok(Some(false)),
            other => other
                .parse::<i64>()
                .map(|n| Some(n != 0))
                .map_err(|_| ConfigError::Invalid {
                    key: key.to_string(),
                    value: raw.clone(),
                }),
        }
    }

    /// Duration given in (possibly fractional) seconds
    pub fn seconds(&self, key: &str) -> Result<Option<Duration>, ConfigError> {
        let Some(secs) = self.parse::<f64>(key)? else {
            return Ok(None);
        };
        Duration::try_from_secs_f64(secs)
            .map(Some)
            .map_err(|_| ConfigError::Invalid {
                key: key.to_string(),
                value: secs.to_string(),
            })
    }
}

/// When the readiness gate opens after startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadinessMode {
    /// As soon as every post-start callback has been scheduled
    #[default]
    Scheduled,
    /// Once every post-start callback has finished
    Completed,
}

impl FromStr for ReadinessMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "scheduled" => Ok(Self::Scheduled),
            "completed" => Ok(Self::Completed),
            _ => Err(()),
        }
    }
}

/// Typed runner settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub debug: bool,
    pub port: u16,
    pub address: String,
    pub number_of_workers: usize,
    pub xheaders: bool,
    pub max_body_size: Option<usize>,
    pub max_buffer_size: Option<usize>,
    pub service: Option<String>,
    pub version: Option<String>,
    pub environment: Option<String>,
    pub server_header: Option<String>,
    pub serve_traceback: bool,
    pub access_log_failures_only: bool,
    pub log_errors: bool,
    pub write_error_bodies: bool,
    pub shutdown_limit: Duration,
    pub poll_interval: Duration,
    pub readiness: ReadinessMode,
    pub trap_signals: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug: false,
            port: 8000,
            address: "0.0.0.0".to_string(),
            number_of_workers: 0,
            xheaders: false,
            max_body_size: None,
            max_buffer_size: None,
            service: None,
            version: None,
            environment: None,
            server_header: None,
            serve_traceback: false,
            access_log_failures_only: false,
            log_errors: true,
            write_error_bodies: true,
            shutdown_limit: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
            readiness: ReadinessMode::Scheduled,
            trap_signals: true,
        }
    }
}

impl Settings {
    /// Read settings from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_config(&ConfigService::new())
    }

    /// Read settings from a settings map; unset keys keep their defaults
    pub fn from_config(config: &ConfigService) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let readiness = match config.get("READINESS") {
            None => defaults.readiness,
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                key: "READINESS".to_string(),
                value: raw.clone(),
            })?,
        };

        Ok(Self {
            debug: config.flag("DEBUG")?.unwrap_or(defaults.debug),
            port: config.parse("PORT")?.unwrap_or(defaults.port),
            address: config.get("ADDRESS").unwrap_or(defaults.address),
            number_of_workers: config
                .parse("NUMBER_OF_WORKERS")?
                .unwrap_or(defaults.number_of_workers),
            xheaders: config.flag("XHEADERS")?.unwrap_or(defaults.xheaders),
            max_body_size: config.parse("MAX_BODY_SIZE")?,
            max_buffer_size: config.parse("MAX_BUFFER_SIZE")?,
            service: config.get("SERVICE"),
            version: config.get("VERSION"),
            environment: config.get("ENVIRONMENT"),
            server_header: config.get("SERVER_HEADER"),
            serve_traceback: config.flag("SERVE_TRACEBACK")?.unwrap_or(defaults.serve_traceback),
            access_log_failures_only: config
                .flag("ACCESS_LOG_FAILURES_ONLY")?
                .unwrap_or(defaults.access_log_failures_only),
            log_errors: config.flag("LOG_ERRORS")?.unwrap_or(defaults.log_errors),
            write_error_bodies: config
                .flag("WRITE_ERROR_BODIES")?
                .unwrap_or(defaults.write_error_bodies),
            shutdown_limit: config
                .seconds("SHUTDOWN_LIMIT")?
                .unwrap_or(defaults.shutdown_limit),
            poll_interval: config
                .seconds("SHUTDOWN_POLL_INTERVAL")?
                .unwrap_or(defaults.poll_interval),
            readiness,
            trap_signals: config.flag("TRAP_SIGNALS")?.unwrap_or(defaults.trap_signals),
        })
    }

    /// Value for the `Server` response header, if one should be sent
    pub fn server_header(&self) -> Option<String> {
        if let Some(header) = &self.server_header {
            return Some(header.clone());
        }
        match (&self.service, &self.version) {
            (Some(service), Some(version)) => Some(format!("{service}/{version}")),
            (Some(service), None) => Some(service.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::from_config(&ConfigService::empty()).unwrap();
        assert!(!settings.debug);
        assert_eq!(settings.port, 8000);
        assert_eq!(settings.number_of_workers, 0);
        assert_eq!(settings.shutdown_limit, Duration::from_secs(5));
        assert_eq!(settings.readiness, ReadinessMode::Scheduled);
        assert!(settings.server_header().is_none());
    }

    #[test]
    fn test_overrides() {
        let config = ConfigService::empty()
            .with("DEBUG", "1")
            .with("PORT", "8888")
            .with("NUMBER_OF_WORKERS", 4)
            .with("SHUTDOWN_LIMIT", "0.25")
            .with("READINESS", "completed")
            .with("SERVICE", "orders")
            .with("VERSION", "1.2.3");
        let settings = Settings::from_config(&config).unwrap();

        assert!(settings.debug);
        assert_eq!(settings.port, 8888);
        assert_eq!(settings.number_of_workers, 4);
        assert_eq!(settings.shutdown_limit, Duration::from_millis(250));
        assert_eq!(settings.readiness, ReadinessMode::Completed);
        assert_eq!(settings.server_header().as_deref(), Some("orders/1.2.3"));
    }

    #[test]
    fn test_debug_flag_accepts_integers() {
        let off = ConfigService::empty().with("DEBUG", "0");
        assert!(!Settings::from_config(&off).unwrap().debug);
        let on = ConfigService::empty().with("DEBUG", "2");
        assert!(Settings::from_config(&on).unwrap().debug);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let config = ConfigService::empty().with("PORT", "eighty");
        let err = Settings::from_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "PORT"));

        let config = ConfigService::empty().with("SHUTDOWN_LIMIT", "-1");
        assert!(Settings::from_config(&config).is_err());
    }
}
