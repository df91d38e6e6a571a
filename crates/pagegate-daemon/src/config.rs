//! Daemon configuration.
//!
//! Settings come from a TOML file (`pagegate.toml` by default); command-line
//! flags override individual values. The page document itself is a separate
//! YAML file referenced by `server.pages_file`, because the daemon rewrites it
//! on every new binding.
//!
//! ```toml
//! [server]
//! listen = "127.0.0.1:5000"
//! pages_file = "config.yaml"
//! templates_dir = "templates"
//! client_ip_header = "x-forwarded-for"
//!
//! [cookie]
//! name = "super_secret"
//! max_age_days = 365
//!
//! [mail]
//! enabled = true
//! address = "alerts@example.org"
//! host = "smtp.example.org"
//! port = 587
//! username = "alerts@example.org"
//! password_env = "PAGEGATE_MAIL_PASSWORD"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound for `cookie.max_age_days`. Browsers cap cookie lifetimes at
/// 400 days (RFC 6265bis).
pub const MAX_COOKIE_AGE_DAYS: u32 = 400;

/// Errors raised while loading the daemon configuration.
#[derive(Debug, Error)]
pub enum DaemonConfigError {
    /// I/O error reading the configuration file.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Validation error.
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Session cookie settings.
    #[serde(default)]
    pub cookie: CookieConfig,

    /// Mail alerting settings.
    #[serde(default)]
    pub mail: MailConfig,
}

impl DaemonConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, DaemonConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, DaemonConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field requirements.
    ///
    /// # Errors
    ///
    /// Returns [`DaemonConfigError::Validation`] when the cookie name is not
    /// a valid cookie token, the cookie lifetime exceeds
    /// [`MAX_COOKIE_AGE_DAYS`], or mail is enabled without an address or host.
    pub fn validate(&self) -> Result<(), DaemonConfigError> {
        if !is_cookie_token(&self.cookie.name) {
            return Err(DaemonConfigError::Validation(format!(
                "cookie.name '{}' is not a valid cookie name",
                self.cookie.name
            )));
        }
        if self.cookie.max_age_days > MAX_COOKIE_AGE_DAYS {
            return Err(DaemonConfigError::Validation(format!(
                "cookie.max_age_days must be at most {MAX_COOKIE_AGE_DAYS}, got {}",
                self.cookie.max_age_days
            )));
        }
        if self.mail.enabled {
            if self.mail.address.as_deref().is_none_or(str::is_empty) {
                return Err(DaemonConfigError::Validation(
                    "mail.enabled=true requires mail.address".to_string(),
                ));
            }
            if self.mail.host.as_deref().is_none_or(str::is_empty) {
                return Err(DaemonConfigError::Validation(
                    "mail.enabled=true requires mail.host".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Address to listen on.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Path to the YAML page document.
    #[serde(default = "default_pages_file")]
    pub pages_file: PathBuf,

    /// Directory holding `index.html`, `forbidden.html` and `pages/`.
    #[serde(default = "default_templates_dir")]
    pub templates_dir: PathBuf,

    /// Header carrying the client IP when running behind a trusted reverse
    /// proxy, e.g. `x-forwarded-for`. The first listed address is used.
    ///
    /// Leave unset when clients connect directly; otherwise any client can
    /// pick its own IP.
    #[serde(default)]
    pub client_ip_header: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            pages_file: default_pages_file(),
            templates_dir: default_templates_dir(),
            client_ip_header: None,
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5000))
}

fn default_pages_file() -> PathBuf {
    PathBuf::from("config.yaml")
}

fn default_templates_dir() -> PathBuf {
    PathBuf::from("templates")
}

/// Session cookie settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CookieConfig {
    /// Cookie name.
    #[serde(default = "default_cookie_name")]
    pub name: String,

    /// Lifetime in days. `0` issues a session cookie without `Max-Age` or
    /// `Expires`.
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,

    /// Add the `Secure` attribute.
    #[serde(default)]
    pub secure: bool,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            name: default_cookie_name(),
            max_age_days: default_max_age_days(),
            secure: false,
        }
    }
}

fn default_cookie_name() -> String {
    "super_secret".to_string()
}

const fn default_max_age_days() -> u32 {
    365
}

/// Mail alerting settings.
///
/// Disabled by default. The password is never stored in the file; set
/// `password_env` to the name of an environment variable that holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MailConfig {
    /// Whether rejection diagnostics are mailed.
    #[serde(default)]
    pub enabled: bool,

    /// Sender and recipient address.
    #[serde(default)]
    pub address: Option<String>,

    /// SMTP relay host.
    #[serde(default)]
    pub host: Option<String>,

    /// SMTP port (STARTTLS).
    #[serde(default = "default_mail_port")]
    pub port: u16,

    /// Subject line.
    #[serde(default = "default_mail_subject")]
    pub subject: String,

    /// SMTP user name. Without it no authentication is attempted.
    #[serde(default)]
    pub username: Option<String>,

    /// Environment variable holding the SMTP password.
    #[serde(default)]
    pub password_env: Option<String>,

    /// Alerts queued while the mailer is busy; further alerts are dropped.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: None,
            host: None,
            port: default_mail_port(),
            subject: default_mail_subject(),
            username: None,
            password_env: None,
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl MailConfig {
    /// Reads the SMTP password through `lookup` (normally `std::env::var`).
    ///
    /// # Errors
    ///
    /// Returns [`DaemonConfigError::Validation`] if `password_env` is set but
    /// the variable is missing or empty.
    pub fn resolve_password<F>(&self, lookup: F) -> Result<Option<SecretString>, DaemonConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(var) = self.password_env.as_deref() else {
            return Ok(None);
        };
        match lookup(var) {
            Some(value) if !value.is_empty() => Ok(Some(SecretString::from(value))),
            _ => Err(DaemonConfigError::Validation(format!(
                "mail.password_env names '{var}' but it is not set"
            ))),
        }
    }
}

const fn default_mail_port() -> u16 {
    587
}

fn default_mail_subject() -> String {
    "pagegate: blocked request".to_string()
}

const fn default_queue_capacity() -> usize {
    64
}

fn is_cookie_token(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
        })
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::from_toml("").unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:5000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.server.pages_file, PathBuf::from("config.yaml"));
        assert_eq!(config.cookie.name, "super_secret");
        assert_eq!(config.cookie.max_age_days, 365);
        assert!(!config.mail.enabled);
        assert!(config.server.client_ip_header.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [server]
            listen = "0.0.0.0:8080"
            pages_file = "/srv/pagegate/config.yaml"
            templates_dir = "/srv/pagegate/templates"
            client_ip_header = "x-forwarded-for"

            [cookie]
            name = "gate"
            max_age_days = 0
            secure = true

            [mail]
            enabled = true
            address = "ops@example.org"
            host = "smtp.example.org"
            port = 2525
            username = "ops"
            password_env = "MAIL_PASSWORD"
            queue_capacity = 8
        "#;

        let config = DaemonConfig::from_toml(toml).unwrap();
        assert_eq!(config.server.listen.port(), 8080);
        assert_eq!(config.server.client_ip_header.as_deref(), Some("x-forwarded-for"));
        assert_eq!(config.cookie.max_age_days, 0);
        assert!(config.cookie.secure);
        assert_eq!(config.mail.port, 2525);
        assert_eq!(config.mail.queue_capacity, 8);
    }

    #[test]
    fn test_mail_requires_address_and_host() {
        let missing_host = "[mail]\nenabled = true\naddress = \"ops@example.org\"\n";
        assert!(matches!(
            DaemonConfig::from_toml(missing_host),
            Err(DaemonConfigError::Validation(_))
        ));

        let missing_address = "[mail]\nenabled = true\nhost = \"smtp.example.org\"\n";
        assert!(matches!(
            DaemonConfig::from_toml(missing_address),
            Err(DaemonConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_invalid_cookie_name_is_rejected() {
        assert!(matches!(
            DaemonConfig::from_toml("[cookie]\nname = \"bad name\"\n"),
            Err(DaemonConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_cookie_lifetime_is_bounded() {
        assert!(DaemonConfig::from_toml("[cookie]\nmax_age_days = 400\n").is_ok());
        assert!(matches!(
            DaemonConfig::from_toml("[cookie]\nmax_age_days = 4294967295\n"),
            Err(DaemonConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(matches!(
            DaemonConfig::from_toml("[server]\nlisten_addr = \"0.0.0.0:1\"\n"),
            Err(DaemonConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_resolve_password() {
        let mut mail = MailConfig::default();
        assert!(mail.resolve_password(|_| None).unwrap().is_none());

        mail.password_env = Some("MAIL_PASSWORD".to_string());
        let secret = mail
            .resolve_password(|var| (var == "MAIL_PASSWORD").then(|| "hunter22".to_string()))
            .unwrap()
            .unwrap();
        assert_eq!(secret.expose_secret(), "hunter22");

        assert!(mail.resolve_password(|_| None).is_err());
        assert!(mail.resolve_password(|_| Some(String::new())).is_err());
    }
}
