//! Configuration types for mail dispatch.
//!
//! Provides:
//! - SMTP transport settings with a builder ([`TransportConfig`])
//! - Message defaults (sender, reply-to, logging, tracking) behind the
//!   [`DefaultsProvider`] seam
//! - A serde-loadable [`MailConfig`] implementing that seam

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};

use crate::address::Address;
use crate::errors::{MailError, MailResult};

/// Default SMTP port (submission with STARTTLS).
pub const DEFAULT_PORT: u16 = 587;

/// Default timeout for a single send.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport security for SMTP connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmtpSecurity {
    /// No TLS (insecure, not recommended).
    None,
    /// STARTTLS upgrade on a plain connection (default).
    #[default]
    StartTls,
    /// Implicit TLS (port 465).
    Tls,
}

/// SMTP transport settings.
///
/// When `enabled` is false the dispatch gateway leaves the transport on its
/// default local submission path and none of the other fields are applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Use an SMTP server instead of local submission.
    #[serde(default)]
    pub enabled: bool,
    /// SMTP server hostname.
    #[serde(default)]
    pub host: String,
    /// SMTP server port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Authenticate against the server.
    #[serde(default)]
    pub auth: bool,
    /// Authentication username.
    #[serde(default)]
    pub username: Option<String>,
    /// Authentication password (never serialized).
    #[serde(default, skip_serializing, deserialize_with = "deserialize_secret")]
    pub password: Option<SecretString>,
    /// Transport security.
    #[serde(default)]
    pub security: SmtpSecurity,
    /// Timeout for a single send.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_port() -> u16 { DEFAULT_PORT }
fn default_timeout() -> Duration { DEFAULT_TIMEOUT }
fn default_true() -> bool { true }

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::new))
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: String::new(),
            port: DEFAULT_PORT,
            auth: false,
            username: None,
            password: None,
            security: SmtpSecurity::default(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl TransportConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> TransportConfigBuilder {
        TransportConfigBuilder::default()
    }

    /// Validates the configuration.
    pub fn validate(&self) -> MailResult<()> {
        if !self.enabled {
            return Ok(());
        }

        if self.host.trim().is_empty() {
            return Err(MailError::configuration("SMTP host is required when SMTP is enabled"));
        }

        if self.port == 0 {
            return Err(MailError::configuration("SMTP port must be non-zero"));
        }

        if self.auth && self.username.as_deref().map_or(true, str::is_empty) {
            return Err(MailError::configuration("SMTP auth requires a username"));
        }

        if self.timeout.is_zero() {
            return Err(MailError::configuration("SMTP timeout must be positive"));
        }

        Ok(())
    }

    /// Returns the full server address.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns true if authentication is configured.
    pub fn has_auth(&self) -> bool {
        self.auth && self.username.is_some() && self.password.is_some()
    }

    /// Returns the password, if any.
    pub fn password(&self) -> Option<&str> {
        self.password.as_ref().map(|s| s.expose_secret().as_str())
    }
}

/// Builder for transport configuration.
#[derive(Debug, Default)]
pub struct TransportConfigBuilder {
    config: TransportConfig,
}

impl TransportConfigBuilder {
    /// Sets the SMTP server host and enables SMTP.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self.config.enabled = true;
        self
    }

    /// Sets the SMTP server port.
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Sets credentials and enables authentication.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.auth = true;
        self.config.username = Some(username.into());
        self.config.password = Some(SecretString::new(password.into()));
        self
    }

    /// Sets the transport security.
    pub fn security(mut self, security: SmtpSecurity) -> Self {
        self.config.security = security;
        self
    }

    /// Sets the send timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Enables or disables SMTP.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> MailResult<TransportConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// System defaults consulted when a message leaves a field unset.
pub trait DefaultsProvider: Send + Sync {
    /// The sender used when a message has none.
    fn default_from(&self) -> MailResult<Address>;

    /// The reply-to address used when a message has none. Absence is not an error.
    fn default_reply_to(&self) -> MailResult<Option<Address>>;

    /// Whether deliveries are logged by default.
    fn default_log_enabled(&self) -> bool;

    /// Whether deliveries are tracked by default.
    fn default_track_enabled(&self) -> bool;

    /// Transport settings for the dispatch gateway.
    fn smtp_config(&self) -> TransportConfig;
}

/// Mail configuration, typically loaded from a JSON document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    /// Default sender (`address` or `Name <address>`).
    #[serde(default)]
    pub default_from: Option<String>,
    /// Default reply-to address.
    #[serde(default)]
    pub default_reply_to: Option<String>,
    /// Log deliveries unless a message says otherwise.
    #[serde(default = "default_true")]
    pub default_log: bool,
    /// Track deliveries unless a message says otherwise.
    #[serde(default)]
    pub default_track: bool,
    /// SMTP transport settings.
    #[serde(default)]
    pub smtp: TransportConfig,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            default_from: None,
            default_reply_to: None,
            default_log: true,
            default_track: false,
            smtp: TransportConfig::default(),
        }
    }
}

impl MailConfig {
    /// Parses and validates a JSON configuration document.
    pub fn from_json(json: &str) -> MailResult<Self> {
        let config: MailConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates default addresses and transport settings.
    pub fn validate(&self) -> MailResult<()> {
        if self.default_from.is_some() {
            self.default_from()?;
        }
        self.default_reply_to()?;
        self.smtp.validate()
    }
}

impl DefaultsProvider for MailConfig {
    fn default_from(&self) -> MailResult<Address> {
        let raw = self
            .default_from
            .as_deref()
            .ok_or_else(|| MailError::configuration("No default sender configured"))?;
        Address::parse(raw)
    }

    fn default_reply_to(&self) -> MailResult<Option<Address>> {
        match self.default_reply_to.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => Address::parse(raw).map(Some),
        }
    }

    fn default_log_enabled(&self) -> bool {
        self.default_log
    }

    fn default_track_enabled(&self) -> bool {
        self.default_track
    }

    fn smtp_config(&self) -> TransportConfig {
        self.smtp.clone()
    }
}

/// Serde adapters for durations in humantime form (`"30s"`, `"2m"`).
pub(crate) mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => serializer.serialize_some(&humantime::format_duration(*d).to_string()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<String>::deserialize(deserializer)?
                .map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::MailErrorKind;

    #[test]
    fn test_transport_builder() {
        let config = TransportConfig::builder()
            .host("smtp.example.com")
            .port(465)
            .security(SmtpSecurity::Tls)
            .credentials("user", "pass")
            .build()
            .unwrap();

        assert!(config.enabled);
        assert_eq!(config.address(), "smtp.example.com:465");
        assert!(config.has_auth());
        assert_eq!(config.password(), Some("pass"));
    }

    #[test]
    fn test_transport_defaults() {
        let config = TransportConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_transport_validation() {
        let err = TransportConfig::builder().enabled(true).build().unwrap_err();
        assert_eq!(err.kind(), MailErrorKind::Configuration);

        let err = TransportConfig::builder()
            .host("smtp.example.com")
            .port(0)
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), MailErrorKind::Configuration);
    }

    #[test]
    fn test_password_not_leaked() {
        let config = TransportConfig::builder()
            .host("smtp.example.com")
            .credentials("user", "hunter2")
            .build()
            .unwrap();

        assert!(!format!("{:?}", config).contains("hunter2"));
        assert!(!serde_json::to_string(&config).unwrap().contains("hunter2"));
    }

    #[test]
    fn test_mail_config_from_json() {
        let config = MailConfig::from_json(
            r#"{
                "default_from": "Sender <sender@example.com>",
                "default_reply_to": "",
                "smtp": {
                    "enabled": true,
                    "host": "smtp.example.com",
                    "auth": true,
                    "username": "user",
                    "password": "secret",
                    "security": "tls",
                    "timeout": "45s"
                }
            }"#,
        )
        .unwrap();

        let from = config.default_from().unwrap();
        assert_eq!(from.email(), "sender@example.com");
        assert_eq!(from.name(), Some("Sender"));
        assert!(config.default_reply_to().unwrap().is_none());
        assert!(config.default_log_enabled());
        assert!(!config.default_track_enabled());

        let smtp = config.smtp_config();
        assert_eq!(smtp.security, SmtpSecurity::Tls);
        assert_eq!(smtp.timeout, Duration::from_secs(45));
        assert_eq!(smtp.password(), Some("secret"));
    }

    #[test]
    fn test_mail_config_rejects_bad_default_sender() {
        let err = MailConfig::from_json(r#"{"default_from": "not-an-address"}"#).unwrap_err();
        assert_eq!(err.kind(), MailErrorKind::InvalidAddress);

        let err = MailConfig::from_json("{ nope").unwrap_err();
        assert_eq!(err.kind(), MailErrorKind::Configuration);
    }
}
