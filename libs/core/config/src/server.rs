use crate::{env_optional, env_or_default, ConfigError, FromEnv};
use std::net::Ipv4Addr;

/// Health/metrics HTTP server configuration
#[derive(Clone, Debug)]
pub struct HealthServerConfig {
    pub host: String,
    pub port: u16,
}

impl HealthServerConfig {
    pub fn new(host: String, port: u16) -> Self {
        Self { host, port }
    }

    /// Get the server address as "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl FromEnv for HealthServerConfig {
    /// - HOST: defaults to 0.0.0.0
    /// - EMAIL_WORKER_HEALTH_PORT, then HEALTH_PORT: defaults to 8081
    fn from_env() -> Result<Self, ConfigError> {
        let host = env_or_default("HOST", &Ipv4Addr::UNSPECIFIED.to_string());

        let (key, raw) = match env_optional("EMAIL_WORKER_HEALTH_PORT") {
            Some(raw) => ("EMAIL_WORKER_HEALTH_PORT", raw),
            None => ("HEALTH_PORT", env_or_default("HEALTH_PORT", "8081")),
        };
        let port = raw.trim().parse().map_err(|e| ConfigError::ParseError {
            key: key.to_string(),
            details: format!("{}", e),
        })?;

        Ok(Self { host, port })
    }
}

impl Default for HealthServerConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::UNSPECIFIED.to_string(),
            port: 8081,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_config_defaults() {
        temp_env::with_vars(
            [
                ("HOST", None::<&str>),
                ("EMAIL_WORKER_HEALTH_PORT", None),
                ("HEALTH_PORT", None),
            ],
            || {
                let config = HealthServerConfig::from_env().unwrap();
                assert_eq!(config.address(), "0.0.0.0:8081");
            },
        );
    }

    #[test]
    fn test_health_config_specific_port_wins() {
        temp_env::with_vars(
            [
                ("HOST", Some("127.0.0.1")),
                ("EMAIL_WORKER_HEALTH_PORT", Some("9100")),
                ("HEALTH_PORT", Some("9200")),
            ],
            || {
                let config = HealthServerConfig::from_env().unwrap();
                assert_eq!(config.address(), "127.0.0.1:9100");
            },
        );
    }

    #[test]
    fn test_health_config_generic_port() {
        temp_env::with_vars(
            [
                ("HOST", None::<&str>),
                ("EMAIL_WORKER_HEALTH_PORT", None),
                ("HEALTH_PORT", Some("9200")),
            ],
            || {
                assert_eq!(HealthServerConfig::from_env().unwrap().port, 9200);
            },
        );
    }

    #[test]
    fn test_health_config_invalid_port() {
        temp_env::with_vars(
            [
                ("EMAIL_WORKER_HEALTH_PORT", Some("not_a_number")),
                ("HEALTH_PORT", None),
            ],
            || {
                let err = HealthServerConfig::from_env().unwrap_err();
                assert!(err.to_string().contains("EMAIL_WORKER_HEALTH_PORT"));
            },
        );
    }

    #[test]
    fn test_health_config_default() {
        let config = HealthServerConfig::default();
        assert_eq!(config.port, 8081);
        assert_eq!(config.host, "0.0.0.0");
    }
}
