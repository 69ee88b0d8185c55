use crate::{env_flag, env_optional, env_or_default, env_parse_or, env_required, ConfigError, FromEnv};
use std::time::Duration;

/// SMTP gateway configuration
#[derive(Clone, Debug)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    /// Implicit TLS (usually port 465)
    pub secure: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_email: String,
    pub from_name: String,
    /// `None` disables the per-send bound
    pub send_timeout: Option<Duration>,
    /// Log mails instead of sending them
    pub dry_run: bool,
}

impl SmtpConfig {
    pub fn new(host: impl Into<String>, from_email: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 587,
            secure: false,
            username: None,
            password: None,
            from_email: from_email.into(),
            from_name: "Gau Email Service".to_string(),
            send_timeout: Some(Duration::from_secs(30)),
            dry_run: false,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn has_credentials(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }

    /// Domain part of the sender address, used for Message-IDs.
    pub fn from_domain(&self) -> &str {
        self.from_email
            .rsplit_once('@')
            .map(|(_, domain)| domain)
            .unwrap_or("localhost")
    }
}

impl FromEnv for SmtpConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let host = env_required("SMTP_HOST")?;
        let from_email = env_required("SMTP_FROM_EMAIL")?;
        if !from_email.contains('@') {
            return Err(ConfigError::invalid(
                "SMTP_FROM_EMAIL",
                format!("'{}' is not an email address", from_email),
            ));
        }

        let username = env_optional("SMTP_USER");
        let password = env_optional("SMTP_PASSWORD");
        if username.is_some() != password.is_some() {
            return Err(ConfigError::invalid(
                "SMTP_USER",
                "SMTP_USER and SMTP_PASSWORD must be set together",
            ));
        }

        let timeout_secs: u64 = env_parse_or("SMTP_SEND_TIMEOUT_SECS", 30)?;

        Ok(Self {
            host,
            port: env_parse_or("SMTP_PORT", 587)?,
            secure: env_flag("SMTP_SECURE", false)?,
            username,
            password,
            from_email,
            from_name: env_or_default("SMTP_FROM_NAME", "Gau Email Service"),
            send_timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            dry_run: env_flag("SMTP_DRY_RUN", false)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smtp_vars<'a>(overrides: &[(&'a str, &'a str)]) -> Vec<(&'a str, Option<&'a str>)> {
        [
            "SMTP_HOST",
            "SMTP_PORT",
            "SMTP_SECURE",
            "SMTP_USER",
            "SMTP_PASSWORD",
            "SMTP_FROM_EMAIL",
            "SMTP_FROM_NAME",
            "SMTP_SEND_TIMEOUT_SECS",
            "SMTP_DRY_RUN",
        ]
        .into_iter()
        .map(|key| {
            let value = overrides.iter().find(|(k, _)| *k == key).map(|(_, v)| *v);
            (key, value)
        })
        .collect()
    }

    #[test]
    fn test_smtp_config_defaults() {
        let vars = smtp_vars(&[
            ("SMTP_HOST", "smtp.gmail.com"),
            ("SMTP_FROM_EMAIL", "noreply@gauas.lab"),
        ]);
        temp_env::with_vars(vars, || {
            let config = SmtpConfig::from_env().unwrap();
            assert_eq!(config.host, "smtp.gmail.com");
            assert_eq!(config.port, 587);
            assert!(!config.secure);
            assert!(!config.has_credentials());
            assert_eq!(config.from_name, "Gau Email Service");
            assert_eq!(config.send_timeout, Some(Duration::from_secs(30)));
            assert!(!config.dry_run);
            assert_eq!(config.from_domain(), "gauas.lab");
        });
    }

    #[test]
    fn test_smtp_config_full() {
        let vars = smtp_vars(&[
            ("SMTP_HOST", "mail.example.com"),
            ("SMTP_PORT", "465"),
            ("SMTP_SECURE", "true"),
            ("SMTP_USER", "mailer"),
            ("SMTP_PASSWORD", "hunter2"),
            ("SMTP_FROM_EMAIL", "ops@example.com"),
            ("SMTP_FROM_NAME", "Ops"),
            ("SMTP_SEND_TIMEOUT_SECS", "0"),
            ("SMTP_DRY_RUN", "yes"),
        ]);
        temp_env::with_vars(vars, || {
            let config = SmtpConfig::from_env().unwrap();
            assert_eq!(config.port, 465);
            assert!(config.secure);
            assert!(config.has_credentials());
            assert_eq!(config.from_name, "Ops");
            assert_eq!(config.send_timeout, None);
            assert!(config.dry_run);
        });
    }

    #[test]
    fn test_smtp_config_requires_host_and_sender() {
        temp_env::with_vars(smtp_vars(&[("SMTP_FROM_EMAIL", "a@b.com")]), || {
            let err = SmtpConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("SMTP_HOST"));
        });
        temp_env::with_vars(smtp_vars(&[("SMTP_HOST", "localhost")]), || {
            let err = SmtpConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("SMTP_FROM_EMAIL"));
        });
    }

    #[test]
    fn test_smtp_config_rejects_invalid_sender() {
        let vars = smtp_vars(&[("SMTP_HOST", "localhost"), ("SMTP_FROM_EMAIL", "nobody")]);
        temp_env::with_vars(vars, || {
            assert!(matches!(SmtpConfig::from_env(), Err(ConfigError::Invalid { .. })));
        });
    }

    #[test]
    fn test_smtp_config_rejects_half_credentials() {
        let vars = smtp_vars(&[
            ("SMTP_HOST", "localhost"),
            ("SMTP_FROM_EMAIL", "a@b.com"),
            ("SMTP_USER", "mailer"),
        ]);
        temp_env::with_vars(vars, || {
            assert!(SmtpConfig::from_env().is_err());
        });
    }

    #[test]
    fn test_smtp_config_invalid_port() {
        let vars = smtp_vars(&[
            ("SMTP_HOST", "localhost"),
            ("SMTP_FROM_EMAIL", "a@b.com"),
            ("SMTP_PORT", "99999"),
        ]);
        temp_env::with_vars(vars, || {
            let err = SmtpConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("SMTP_PORT"));
        });
    }

    #[test]
    fn test_smtp_config_builder() {
        let config = SmtpConfig::new("localhost", "a@b.com")
            .with_port(2525)
            .with_secure(true)
            .with_credentials("u", "p");
        assert_eq!(config.port, 2525);
        assert!(config.secure);
        assert!(config.has_credentials());
    }
}
