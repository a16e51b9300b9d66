//! Error types for the mailcode crate.
//!
//! Only three kinds of failure ever reach the caller of a wait: connection
//! failures, a premature close of the mailbox connection, and the global wait
//! timeout. Everything else (folder discovery, disposal, unparseable candidates)
//! is absorbed by the waiter and only shows up in the logs. See
//! [`Error::category`].

use std::time::Duration;
use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while waiting for a verification code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    // ─────────────────────────────────────────────────────────────────────────
    // Configuration / validation errors
    // ─────────────────────────────────────────────────────────────────────────
    /// Invalid email address format.
    #[error("invalid email format: {email}")]
    InvalidEmailFormat {
        /// The invalid email address.
        email: String,
    },

    /// Invalid configuration provided.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration error.
        message: String,
    },

    /// Invalid DNS name for TLS.
    #[error("invalid DNS name for host '{host}'")]
    InvalidDnsName {
        /// The invalid hostname.
        host: String,
        /// The underlying DNS name error.
        #[source]
        source: rustls::client::InvalidDnsNameError,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Connect-time failures (fatal)
    // ─────────────────────────────────────────────────────────────────────────
    /// Failed to establish TCP connection.
    #[error("failed to connect to {target}")]
    TcpConnect {
        /// The target address that failed.
        target: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to establish TLS connection.
    #[error("failed to establish TLS connection to {target}")]
    TlsConnect {
        /// The target address that failed.
        target: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to connect via SOCKS5 proxy.
    #[error("failed to connect via SOCKS5 proxy {proxy_host} to {target}")]
    Socks5Connect {
        /// The SOCKS5 proxy hostname.
        proxy_host: String,
        /// The target address.
        target: String,
        /// The underlying SOCKS5 error.
        #[source]
        source: tokio_socks::Error,
    },

    /// Connection timeout.
    #[error("connection timeout to {target} after {timeout:?}")]
    ConnectTimeout {
        /// The target address.
        target: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Authentication timeout.
    #[error("authentication timeout for {email} after {timeout:?}")]
    AuthTimeout {
        /// The email address used for authentication.
        email: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// IMAP login failed.
    #[error("IMAP login failed for {email}")]
    ImapLogin {
        /// The email address used for login.
        email: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// Failed to open a mailbox for read-write access.
    #[error("failed to select mailbox '{mailbox}'")]
    SelectMailbox {
        /// The mailbox name.
        mailbox: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle failures (fatal)
    // ─────────────────────────────────────────────────────────────────────────
    /// The server closed the connection before a code was captured.
    #[error("IMAP connection closed during {operation} before a code was captured")]
    ConnectionClosed {
        /// The mailbox operation that observed the close.
        operation: &'static str,
    },

    /// Timeout waiting for a message carrying a code.
    #[error("timeout waiting for a verification code after {timeout:?}")]
    WaitTimeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// The wait was already settled; no second outcome is delivered.
    #[error("wait operation already settled")]
    AlreadySettled,

    // ─────────────────────────────────────────────────────────────────────────
    // Mailbox command failures (absorbed by the waiter, logged only)
    // ─────────────────────────────────────────────────────────────────────────
    /// Failed to list the folder hierarchy.
    #[error("failed to list mailbox folders")]
    ListFolders {
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP search failed.
    #[error("IMAP search failed")]
    ImapSearch {
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP fetch failed.
    #[error("IMAP fetch failed for UID {uid}")]
    ImapFetch {
        /// The UID being fetched.
        uid: u32,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// The server answered a fetch without a message body.
    #[error("no body returned for UID {uid}")]
    MissingBody {
        /// The UID being fetched.
        uid: u32,
    },

    /// Setting flags on a message failed.
    #[error("failed to set flags {flags} on UID {uid}")]
    ImapStore {
        /// The message UID.
        uid: u32,
        /// The flag list that was being added.
        flags: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// Moving a message to another folder failed.
    #[error("failed to move UID {uid} to '{folder}'")]
    ImapMove {
        /// The message UID.
        uid: u32,
        /// The destination folder.
        folder: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// Purging messages flagged as deleted failed.
    #[error("IMAP expunge failed")]
    ImapExpunge {
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP logout failed.
    #[error("IMAP logout failed")]
    ImapLogout {
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// Logout timeout (not critical).
    #[error("logout timeout after {timeout:?}")]
    LogoutTimeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Email parsing errors
    // ─────────────────────────────────────────────────────────────────────────
    /// Failed to parse email message.
    #[error("failed to parse email UID {uid}")]
    ParseEmail {
        /// The message UID.
        uid: u32,
        /// The underlying parse error.
        #[source]
        source: mailparse::MailParseError,
    },
}

impl Error {
    /// Returns `true` if this error represents a transient failure that might succeed on retry.
    ///
    /// A caller can use this to decide whether to start a fresh wait:
    ///
    /// ```ignore
    /// if error.is_retryable() {
    ///     // Backoff and start another wait
    /// } else {
    ///     // Fail permanently
    /// }
    /// ```
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::TcpConnect { .. }
            | Error::TlsConnect { .. }
            | Error::Socks5Connect { .. }
            | Error::ConnectTimeout { .. }
            | Error::AuthTimeout { .. }
            | Error::ImapLogin { .. }
            | Error::SelectMailbox { .. }
            | Error::ConnectionClosed { .. }
            | Error::ListFolders { .. }
            | Error::ImapSearch { .. }
            | Error::ImapFetch { .. }
            | Error::ImapStore { .. }
            | Error::ImapMove { .. }
            | Error::ImapExpunge { .. } => true,

            // The wait already consumed its budget; config and content won't change
            Error::InvalidEmailFormat { .. }
            | Error::InvalidConfig { .. }
            | Error::InvalidDnsName { .. }
            | Error::WaitTimeout { .. }
            | Error::AlreadySettled
            | Error::MissingBody { .. }
            | Error::ImapLogout { .. }
            | Error::LogoutTimeout { .. }
            | Error::ParseEmail { .. } => false,
        }
    }

    /// Returns `true` if this error means the server side closed the connection.
    ///
    /// Such an error is fatal for the running wait even when it surfaces from a
    /// command whose failure would otherwise be absorbed.
    #[must_use]
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Error::ConnectionClosed { .. })
    }

    /// Returns the error category for metrics/logging purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidEmailFormat { .. }
            | Error::InvalidConfig { .. }
            | Error::InvalidDnsName { .. } => ErrorCategory::Configuration,

            Error::TcpConnect { .. }
            | Error::TlsConnect { .. }
            | Error::Socks5Connect { .. }
            | Error::ConnectTimeout { .. }
            | Error::AuthTimeout { .. }
            | Error::ImapLogin { .. }
            | Error::SelectMailbox { .. } => ErrorCategory::Connection,

            Error::ConnectionClosed { .. } => ErrorCategory::PrematureClose,

            Error::WaitTimeout { .. } | Error::LogoutTimeout { .. } => ErrorCategory::Timeout,

            Error::ListFolders { .. }
            | Error::ImapSearch { .. }
            | Error::ImapFetch { .. }
            | Error::MissingBody { .. }
            | Error::ImapStore { .. }
            | Error::ImapMove { .. }
            | Error::ImapExpunge { .. }
            | Error::ImapLogout { .. } => ErrorCategory::Protocol,

            Error::ParseEmail { .. } => ErrorCategory::Parse,

            Error::AlreadySettled => ErrorCategory::State,
        }
    }
}

/// Error categories for metrics and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Configuration or validation errors.
    Configuration,
    /// Authentication or transport failure while connecting.
    Connection,
    /// The remote side closed the connection before a code was captured.
    PrematureClose,
    /// Timeout errors.
    Timeout,
    /// IMAP command failures after the session was established.
    Protocol,
    /// Email parsing errors.
    Parse,
    /// Misuse of a settled wait.
    State,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Connection => write!(f, "connection"),
            ErrorCategory::PrematureClose => write!(f, "premature_close"),
            ErrorCategory::Timeout => write!(f, "timeout"),
            ErrorCategory::Protocol => write!(f, "protocol"),
            ErrorCategory::Parse => write!(f, "parse"),
            ErrorCategory::State => write!(f, "state"),
        }
    }
}
