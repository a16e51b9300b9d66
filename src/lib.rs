//! # mailcode
//!
//! Async IMAP waiter for one-time verification codes delivered by email.
//!
//! A wait connects to one mailbox, watches the inbox for an unread message from
//! a given sender, extracts the five-digit code it carries, disposes of the
//! message and reports the code. It:
//! - Connects over TLS (with optional SOCKS5 proxy support) using an app password
//! - Locates the account's trash folder by special-use attribute or by name
//! - Scans the inbox immediately, then on a fixed interval, never overlapping scans
//! - Moves the consumed message to the trash, falling back to flag-and-expunge
//! - Settles exactly once: with the code, a connection error, or a timeout
//!
//! ## Quick Start
//!
//! ```no_run
//! use mailcode::{wait_for_code, WaitConfig};
//!
//! # async fn example() -> mailcode::Result<()> {
//! let config = WaitConfig::builder()
//!     .email("user@gmail.com")
//!     .app_password("app-password")  // Use an app-specific password for Gmail
//!     .from_email("no-reply@service.example")
//!     .build()?;
//!
//! let code = wait_for_code(config).await?;
//! println!("Got code: {code}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Using a SOCKS5 Proxy
//!
//! ```no_run
//! use mailcode::{wait_for_code, ProxyConfig, WaitConfig};
//!
//! # async fn example() -> mailcode::Result<()> {
//! let config = WaitConfig::builder()
//!     .email("user@gmail.com")
//!     .app_password("app-password")
//!     .from_email("no-reply@service.example")
//!     .proxy(ProxyConfig::with_auth("proxy.example.com", 1080, "user", "pass"))
//!     .build()?;
//!
//! let code = wait_for_code(config).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Bringing Your Own Session
//!
//! [`Waiter`] runs over any [`MailSession`], so the polling logic can be driven
//! by a session the caller has already authenticated:
//!
//! ```no_run
//! use mailcode::{ImapSession, WaitConfig, Waiter};
//!
//! # async fn example() -> mailcode::Result<()> {
//! # let config = WaitConfig::builder().email("a@b.c").app_password("x").from_email("d@e.f").build()?;
//! let mut session = ImapSession::new(config.clone());
//! session.connect().await?;
//!
//! let code = Waiter::new(&config, session).wait().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Only connection failures, a premature close and the wait timeout reach the
//! caller. Use [`Error::category`] to tell them apart and [`Error::is_retryable`]
//! to decide whether to start another wait:
//!
//! ```
//! use mailcode::{Error, ErrorCategory};
//!
//! fn handle_error(error: &Error) {
//!     match error.category() {
//!         ErrorCategory::Timeout => println!("No code arrived: {error}"),
//!         _ if error.is_retryable() => println!("Transient error, can retry: {error}"),
//!         _ => println!("Permanent error: {error}"),
//!     }
//! }
//! ```
//!
//! ## Observability
//!
//! The crate uses `tracing` for instrumentation. All major operations emit spans with
//! structured fields suitable for distributed tracing.
//!
//! ### Span Naming Convention
//!
//! - `mailcode::wait_for_code` - Whole wait, including connect
//! - `ImapSession::connect` - Connection and authentication
//! - `connection::open_tls` - TLS connection
//! - `Waiter::wait` - Polling until settlement
//! - `Scanner::tick` - One inbox scan
//! - `MessageDisposer::dispose` - Disposal of a consumed message
//!
//! ### Standard Fields
//!
//! - `email` - Mailbox address
//! - `imap_host` - IMAP server hostname
//! - `proxy_enabled` - Whether proxy is used
//! - `sender` - Sender filter
//! - `uid` - Message UID
//! - `folder` - Disposal folder
//!
//! Spans are no-ops until the application installs a subscriber, e.g.
//! `tracing-subscriber` or an OpenTelemetry layer of its own.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
pub mod config;
pub mod dispose;
pub mod error;
pub mod extract;
pub mod folder;
pub mod message;
pub mod scanner;
pub mod session;
pub mod waiter;

// Internal modules
mod connection;

// Re-exports for ergonomic API
pub use config::{PollingConfig, ProxyConfig, TimeoutConfig, WaitConfig, WaitConfigBuilder};
pub use dispose::Disposition;
pub use email_address::EmailAddress;
pub use error::{Error, ErrorCategory, Result};
pub use extract::ExtractedCode;
pub use folder::FolderListing;
pub use scanner::WaitState;
pub use session::{Flag, ImapSession, MailSession, SessionState};
pub use waiter::{wait_for_code, Waiter};
