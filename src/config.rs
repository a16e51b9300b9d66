//! Configuration for a single wait operation.
//!
//! Use [`WaitConfigBuilder`] to create a configuration with sensible defaults:
//!
//! ```
//! use mailcode::WaitConfig;
//!
//! let config = WaitConfig::builder()
//!     .email("user@gmail.com")
//!     .app_password("abcd efgh ijkl mnop")
//!     .from_email("noreply@service.example")
//!     .build()
//!     .expect("valid config");
//!
//! assert_eq!(config.polling.interval.as_secs(), 3);
//! assert_eq!(config.polling.max_wait.as_secs(), 120);
//! ```

use crate::error::{Error, Result};
use email_address::EmailAddress;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;

/// Default IMAP endpoint.
pub const DEFAULT_IMAP_HOST: &str = "imap.gmail.com";

/// Default IMAPS port.
pub const DEFAULT_IMAP_PORT: u16 = 993;

/// Immutable input to one wait operation.
///
/// Create using [`WaitConfig::builder()`].
///
/// The app password is held as a [`SecretString`] and never shows up in
/// `Debug` output.
#[derive(Clone)]
pub struct WaitConfig {
    email: EmailAddress,
    app_password: SecretString,
    from_email: String,
    /// IMAP server hostname.
    pub imap_host: String,
    /// IMAP server port.
    pub imap_port: u16,
    /// Optional SOCKS5 proxy for the TCP leg.
    pub proxy: Option<ProxyConfig>,
    /// Per-step connection timeouts.
    pub timeouts: TimeoutConfig,
    /// Poll interval and global wait budget.
    pub polling: PollingConfig,
}

impl std::fmt::Debug for WaitConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitConfig")
            .field("email", &self.email.as_str())
            .field("app_password", &"[REDACTED]")
            .field("from_email", &self.from_email)
            .field("imap_host", &self.imap_host)
            .field("imap_port", &self.imap_port)
            .field("proxy", &self.proxy)
            .field("timeouts", &self.timeouts)
            .field("polling", &self.polling)
            .finish()
    }
}

impl WaitConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> WaitConfigBuilder {
        WaitConfigBuilder::default()
    }

    /// Returns the mailbox login address.
    #[must_use]
    pub fn email(&self) -> &str {
        self.email.as_str()
    }

    /// Returns the app password.
    ///
    /// Only the session uses this, to authenticate.
    #[must_use]
    pub fn app_password(&self) -> &str {
        self.app_password.expose_secret()
    }

    /// Returns the sender address that qualifying messages must come from.
    #[must_use]
    pub fn from_email(&self) -> &str {
        &self.from_email
    }

    /// Returns the full IMAP server address as "host:port".
    #[must_use]
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.imap_host, self.imap_port)
    }
}

/// Timeouts for the individual connection steps.
///
/// Mailbox commands issued after login are bounded only by the global
/// [`PollingConfig::max_wait`].
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Timeout for establishing TCP/TLS connection.
    pub connect: Duration,
    /// Timeout for IMAP authentication.
    pub auth: Duration,
    /// Timeout for logout operation.
    pub logout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            auth: Duration::from_secs(30),
            logout: Duration::from_secs(5),
        }
    }
}

/// Polling configuration for a wait.
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Interval between scans of the inbox.
    pub interval: Duration,
    /// Global budget for the whole wait, connect included.
    pub max_wait: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            max_wait: Duration::from_secs(120),
        }
    }
}

/// SOCKS5 proxy for the IMAP connection.
#[derive(Clone)]
pub struct ProxyConfig {
    /// Proxy server hostname or IP address.
    pub host: String,
    /// Proxy server port.
    pub port: u16,
    credentials: Option<(String, SecretString)>,
}

impl ProxyConfig {
    /// A proxy that needs no authentication.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            credentials: None,
        }
    }

    /// A proxy with username/password authentication.
    #[must_use]
    pub fn with_auth(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            credentials: Some((username.into(), SecretString::from(password.into()))),
        }
    }

    /// Returns the username/password pair, if any.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        self.credentials
            .as_ref()
            .map(|(user, pass)| (user.as_str(), pass.expose_secret()))
    }
}

impl std::fmt::Display for ProxyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.credentials {
            Some((user, _)) => write!(f, "socks5://{user}:***@{}:{}", self.host, self.port),
            None => write!(f, "socks5://{}:{}", self.host, self.port),
        }
    }
}

impl std::fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ProxyConfig").field(&self.to_string()).finish()
    }
}

fn validate_email(email: &str) -> Result<EmailAddress> {
    EmailAddress::parse_with_options(email, email_address::Options::default()).map_err(|_| {
        Error::InvalidEmailFormat {
            email: email.to_string(),
        }
    })
}

/// Builder for [`WaitConfig`].
#[derive(Debug, Default)]
pub struct WaitConfigBuilder {
    email: Option<String>,
    app_password: Option<String>,
    from_email: Option<String>,
    imap_host: Option<String>,
    imap_port: Option<u16>,
    proxy: Option<ProxyConfig>,
    timeouts: Option<TimeoutConfig>,
    polling: Option<PollingConfig>,
}

impl WaitConfigBuilder {
    /// Sets the mailbox login address (required).
    #[must_use]
    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Sets the app password (required).
    #[must_use]
    pub fn app_password(mut self, password: impl Into<String>) -> Self {
        self.app_password = Some(password.into());
        self
    }

    /// Sets the sender filter (required).
    ///
    /// Matched case-insensitively as a substring of the message's `From`
    /// header, so display-name formatting does not matter.
    #[must_use]
    pub fn from_email(mut self, sender: impl Into<String>) -> Self {
        self.from_email = Some(sender.into());
        self
    }

    /// Overrides the IMAP server hostname. Default: `imap.gmail.com`.
    #[must_use]
    pub fn imap_host(mut self, host: impl Into<String>) -> Self {
        self.imap_host = Some(host.into());
        self
    }

    /// Overrides the IMAP server port. Default: 993.
    #[must_use]
    pub fn imap_port(mut self, port: u16) -> Self {
        self.imap_port = Some(port);
        self
    }

    /// Routes the connection through a SOCKS5 proxy.
    #[must_use]
    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Sets the per-step connection timeouts.
    #[must_use]
    pub fn timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts
            .get_or_insert_with(TimeoutConfig::default)
            .connect = timeout;
        self
    }

    /// Sets the poll interval. Default: 3 seconds.
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.polling
            .get_or_insert_with(PollingConfig::default)
            .interval = interval;
        self
    }

    /// Sets the global wait budget. Default: 120 seconds.
    #[must_use]
    pub fn timeout(mut self, max_wait: Duration) -> Self {
        self.polling
            .get_or_insert_with(PollingConfig::default)
            .max_wait = max_wait;
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a required field is missing, the login address is
    /// malformed, the sender filter is blank, or a polling duration is zero.
    pub fn build(self) -> Result<WaitConfig> {
        let email_raw = self.email.ok_or_else(|| Error::InvalidConfig {
            message: "email is required".into(),
        })?;
        let email = validate_email(&email_raw)?;

        let app_password = self.app_password.ok_or_else(|| Error::InvalidConfig {
            message: "app password is required".into(),
        })?;

        let from_email = self
            .from_email
            .filter(|sender| !sender.trim().is_empty())
            .ok_or_else(|| Error::InvalidConfig {
                message: "sender address (from_email) is required".into(),
            })?;

        let polling = self.polling.unwrap_or_default();
        if polling.interval.is_zero() {
            return Err(Error::InvalidConfig {
                message: "poll interval must be greater than zero".into(),
            });
        }
        if polling.max_wait.is_zero() {
            return Err(Error::InvalidConfig {
                message: "wait timeout must be greater than zero".into(),
            });
        }

        Ok(WaitConfig {
            email,
            app_password: SecretString::from(app_password),
            from_email: from_email.trim().to_string(),
            imap_host: self
                .imap_host
                .unwrap_or_else(|| DEFAULT_IMAP_HOST.to_string()),
            imap_port: self.imap_port.unwrap_or(DEFAULT_IMAP_PORT),
            proxy: self.proxy,
            timeouts: self.timeouts.unwrap_or_default(),
            polling,
        })
    }
}
