use crate::{env_or_default, ConfigError, Environment, FromEnv};

/// Service metadata attached to logs and health responses
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub name: String,
    pub namespace: String,
    pub version: String,
    pub environment: Environment,
}

impl FromEnv for ServiceConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            name: env_or_default("SERVICE_NAME", "email-worker"),
            namespace: env_or_default("SERVICE_NAMESPACE", "email"),
            version: env_or_default("SERVICE_VERSION", env!("CARGO_PKG_VERSION")),
            environment: Environment::from_env(),
        })
    }
}
