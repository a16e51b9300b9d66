//! Mailbox session: the one authenticated connection a wait owns.
//!
//! [`MailSession`] is the seam between the wait logic and the mail service.
//! [`ImapSession`] implements it over async-imap, tracking its lifecycle in an
//! explicit [`SessionState`] machine.

use crate::config::WaitConfig;
use crate::connection::{self, TlsStream};
use crate::error::{Error, Result};
use crate::folder::FolderListing;
use async_imap::error::Error as ImapError;
use async_imap::types::{Name, NameAttribute};
use futures::{StreamExt, TryStreamExt};
use std::future::Future;
use tracing::{debug, instrument, warn};

#[cfg(test)]
pub(crate) mod fake;

type Imap = async_imap::Session<TlsStream>;

/// Mailbox name that is opened for scanning.
pub const INBOX: &str = "INBOX";

/// Message flags the waiter sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    /// Message has been read (`\Seen`).
    Seen,
    /// Message is marked for deletion (`\Deleted`).
    Deleted,
}

impl Flag {
    /// The IMAP wire representation, including the leading backslash.
    #[must_use]
    pub fn as_imap_str(self) -> &'static str {
        match self {
            Self::Seen => "\\Seen",
            Self::Deleted => "\\Deleted",
        }
    }
}

impl std::fmt::Display for Flag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_imap_str())
    }
}

/// Renders flags as an IMAP parenthesized list, e.g. `(\Seen \Deleted)`.
pub(crate) fn flag_list(flags: &[Flag]) -> String {
    let names: Vec<&str> = flags.iter().map(|f| f.as_imap_str()).collect();
    format!("({})", names.join(" "))
}

/// Operations a wait performs against the mailbox.
///
/// All methods act on the currently selected folder (the inbox, once
/// [`open_inbox`](Self::open_inbox) succeeded). An implementation reports a
/// remote close as [`Error::ConnectionClosed`]; the waiter treats that as
/// fatal wherever it surfaces.
pub trait MailSession: Send {
    /// Selects the inbox for read-write access.
    fn open_inbox(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Lists every folder of the account, in provider order.
    fn list_folders(&mut self) -> impl Future<Output = Result<Vec<FolderListing>>> + Send;

    /// Returns the UIDs of unread messages from `sender`, ascending.
    fn search_unseen_from(&mut self, sender: &str)
        -> impl Future<Output = Result<Vec<u32>>> + Send;

    /// Fetches the full RFC 5322 source of a message.
    fn fetch_message(&mut self, uid: u32) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Adds `flags` to a message.
    fn add_flags(&mut self, uid: u32, flags: &[Flag]) -> impl Future<Output = Result<()>> + Send;

    /// Moves a message into `folder`.
    fn move_message(&mut self, uid: u32, folder: &str)
        -> impl Future<Output = Result<()>> + Send;

    /// Permanently removes messages flagged `\Deleted` from the selected folder.
    fn expunge(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Closes the connection. Safe to call repeatedly and after a failure.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// Lifecycle of an [`ImapSession`].
///
/// ```text
/// Disconnected ──connect──▶ Connecting ──ready──▶ Ready ──close/end──▶ Closed
///                                │                                       ▲
///                                └──────────────error────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not yet connected.
    Disconnected,
    /// TLS handshake or login in progress.
    Connecting,
    /// Authenticated and usable.
    Ready,
    /// Closed locally, by the server, or after a failed connect.
    Closed,
}

/// [`MailSession`] over an IMAP connection secured with TLS.
pub struct ImapSession {
    config: WaitConfig,
    state: SessionState,
    imap: Option<Imap>,
}

impl ImapSession {
    /// Creates a session in the [`SessionState::Disconnected`] state.
    #[must_use]
    pub fn new(config: WaitConfig) -> Self {
        Self {
            config,
            state: SessionState::Disconnected,
            imap: None,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Opens the TLS channel and logs in with the app password.
    ///
    /// # Errors
    ///
    /// Returns a connection error if the transport, the handshake or the login
    /// fails or times out. The session is then [`SessionState::Closed`].
    #[instrument(
        name = "ImapSession::connect",
        skip_all,
        fields(
            email = %self.config.email(),
            imap_host = %self.config.imap_host,
            proxy_enabled = self.config.proxy.is_some()
        )
    )]
    pub async fn connect(&mut self) -> Result<()> {
        match self.state {
            SessionState::Disconnected => {}
            SessionState::Ready => return Ok(()),
            SessionState::Connecting | SessionState::Closed => {
                return Err(Error::ConnectionClosed {
                    operation: "connect",
                })
            }
        }
        self.state = SessionState::Connecting;

        match establish(&self.config).await {
            Ok(imap) => {
                self.on_ready(imap);
                Ok(())
            }
            Err(err) => {
                self.on_error(&err);
                Err(err)
            }
        }
    }

    fn on_ready(&mut self, imap: Imap) {
        debug!("Authenticated");
        self.imap = Some(imap);
        self.state = SessionState::Ready;
    }

    fn on_error(&mut self, err: &Error) {
        warn!(error = %err, "IMAP connect failed");
        self.imap = None;
        self.state = SessionState::Closed;
    }

    fn on_end(&mut self, operation: &'static str) -> Error {
        warn!(operation, "IMAP connection closed by server");
        self.imap = None;
        self.state = SessionState::Closed;
        Error::ConnectionClosed { operation }
    }

    fn live(&mut self, operation: &'static str) -> Result<&mut Imap> {
        match (self.state, self.imap.as_mut()) {
            (SessionState::Ready, Some(imap)) => Ok(imap),
            _ => Err(Error::ConnectionClosed { operation }),
        }
    }

    /// Turns a command failure into a crate error, recognising a dropped link.
    fn command_failed(
        &mut self,
        operation: &'static str,
        source: ImapError,
        wrap: impl FnOnce(ImapError) -> Error,
    ) -> Error {
        if is_link_lost(&source) {
            self.on_end(operation)
        } else {
            wrap(source)
        }
    }
}

impl std::fmt::Debug for ImapSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapSession")
            .field("email", &self.config.email())
            .field("imap_host", &self.config.imap_host)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl MailSession for ImapSession {
    #[instrument(name = "ImapSession::open_inbox", skip_all)]
    async fn open_inbox(&mut self) -> Result<()> {
        let selected = self.live("select")?.select(INBOX).await;
        selected.map_err(|source| {
            self.command_failed("select", source, |source| Error::SelectMailbox {
                mailbox: INBOX.to_string(),
                source,
            })
        })?;
        debug!("Selected INBOX read-write");
        Ok(())
    }

    #[instrument(name = "ImapSession::list_folders", skip_all)]
    async fn list_folders(&mut self) -> Result<Vec<FolderListing>> {
        let imap = self.live("list")?;
        let listed = async {
            let names: Vec<Name> = imap.list(Some(""), Some("*")).await?.try_collect().await?;
            Ok::<_, ImapError>(names)
        }
        .await;

        let names = listed.map_err(|source| {
            self.command_failed("list", source, |source| Error::ListFolders { source })
        })?;

        debug!(folder_count = names.len(), "Listed folders");
        Ok(names.iter().map(listing_from_name).collect())
    }

    #[instrument(name = "ImapSession::search", skip_all, fields(sender = %sender))]
    async fn search_unseen_from(&mut self, sender: &str) -> Result<Vec<u32>> {
        let query = unseen_from_query(sender);
        let found = self.live("search")?.uid_search(&query).await;

        let mut uids: Vec<u32> = found
            .map_err(|source| {
                self.command_failed("search", source, |source| Error::ImapSearch { source })
            })?
            .into_iter()
            .collect();
        uids.sort_unstable();

        debug!(uid_count = uids.len(), "Searched unread messages");
        Ok(uids)
    }

    #[instrument(name = "ImapSession::fetch", skip(self))]
    async fn fetch_message(&mut self, uid: u32) -> Result<Vec<u8>> {
        let imap = self.live("fetch")?;
        let fetched = async {
            let mut stream = imap.uid_fetch(uid.to_string(), "BODY[]").await?.boxed();
            let mut body = None;
            // Drain the whole response so the session is ready for the next command
            while let Some(item) = stream.next().await {
                let fetch = item?;
                if body.is_none() && fetch.uid.map_or(true, |u| u == uid) {
                    body = fetch.body().map(<[u8]>::to_vec);
                }
            }
            Ok::<_, ImapError>(body)
        }
        .await;

        fetched
            .map_err(|source| {
                self.command_failed("fetch", source, |source| Error::ImapFetch { uid, source })
            })?
            .ok_or(Error::MissingBody { uid })
    }

    #[instrument(
        name = "ImapSession::add_flags",
        skip(self, flags),
        fields(flags = %flag_list(flags))
    )]
    async fn add_flags(&mut self, uid: u32, flags: &[Flag]) -> Result<()> {
        let list = flag_list(flags);
        let query = format!("+FLAGS {list}");
        let imap = self.live("store")?;
        let stored = async {
            let updates: Vec<_> = imap
                .uid_store(uid.to_string(), &query)
                .await?
                .try_collect()
                .await?;
            Ok::<_, ImapError>(updates)
        }
        .await;

        stored.map_err(|source| {
            self.command_failed("store", source, |source| Error::ImapStore {
                uid,
                flags: list.clone(),
                source,
            })
        })?;
        Ok(())
    }

    #[instrument(name = "ImapSession::move", skip(self))]
    async fn move_message(&mut self, uid: u32, folder: &str) -> Result<()> {
        let moved = self.live("move")?.uid_mv(uid.to_string(), folder).await;
        moved.map_err(|source| {
            self.command_failed("move", source, |source| Error::ImapMove {
                uid,
                folder: folder.to_string(),
                source,
            })
        })
    }

    #[instrument(name = "ImapSession::expunge", skip_all)]
    async fn expunge(&mut self) -> Result<()> {
        let imap = self.live("expunge")?;
        let purged = async {
            let seqs: Vec<u32> = imap.expunge().await?.try_collect().await?;
            Ok::<_, ImapError>(seqs)
        }
        .await;

        let purged = purged.map_err(|source| {
            self.command_failed("expunge", source, |source| Error::ImapExpunge { source })
        })?;
        debug!(purged = purged.len(), "Expunged flagged messages");
        Ok(())
    }

    #[instrument(name = "ImapSession::close", skip_all, fields(state = ?self.state))]
    async fn close(&mut self) -> Result<()> {
        self.state = SessionState::Closed;
        let Some(mut imap) = self.imap.take() else {
            return Ok(());
        };

        let timeout = self.config.timeouts.logout;
        match tokio::time::timeout(timeout, imap.logout()).await {
            Ok(Ok(())) => {
                debug!("Logged out");
                Ok(())
            }
            Ok(Err(source)) if is_link_lost(&source) => Ok(()),
            Ok(Err(source)) => Err(Error::ImapLogout { source }),
            Err(_) => Err(Error::LogoutTimeout { timeout }),
        }
    }
}

/// Opens the TLS channel and logs in, each step under its own timeout.
async fn establish(config: &WaitConfig) -> Result<Imap> {
    let target = config.server_address();
    let timeouts = &config.timeouts;

    let tls_stream = tokio::time::timeout(
        timeouts.connect,
        connection::open_tls(&config.imap_host, &target, config.proxy.as_ref()),
    )
    .await
    .map_err(|_| Error::ConnectTimeout {
        target: target.clone(),
        timeout: timeouts.connect,
    })??;

    debug!("TLS connection established");

    let client = async_imap::Client::new(tls_stream);
    tokio::time::timeout(
        timeouts.auth,
        client.login(config.email(), config.app_password()),
    )
    .await
    .map_err(|_| Error::AuthTimeout {
        email: config.email().to_string(),
        timeout: timeouts.auth,
    })?
    .map_err(|(source, _client)| Error::ImapLogin {
        email: config.email().to_string(),
        source,
    })
}

fn is_link_lost(err: &ImapError) -> bool {
    use std::io::ErrorKind;

    match err {
        ImapError::ConnectionLost => true,
        ImapError::Io(io) => matches!(
            io.kind(),
            ErrorKind::UnexpectedEof
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::BrokenPipe
                | ErrorKind::NotConnected
        ),
        _ => false,
    }
}

/// `UNSEEN FROM "<sender>"` with the sender quoted as an IMAP string.
fn unseen_from_query(sender: &str) -> String {
    let quoted = sender.replace('\\', "\\\\").replace('"', "\\\"");
    format!("UNSEEN FROM \"{quoted}\"")
}

fn listing_from_name(name: &Name) -> FolderListing {
    FolderListing {
        name: name.name().to_string(),
        delimiter: name.delimiter().map(str::to_string),
        attributes: name
            .attributes()
            .iter()
            .filter_map(attribute_text)
            .collect(),
    }
}

fn attribute_text(attr: &NameAttribute<'_>) -> Option<String> {
    let text = match attr {
        NameAttribute::NoInferiors => "\\Noinferiors",
        NameAttribute::NoSelect => "\\Noselect",
        NameAttribute::Marked => "\\Marked",
        NameAttribute::Unmarked => "\\Unmarked",
        NameAttribute::All => "\\All",
        NameAttribute::Archive => "\\Archive",
        NameAttribute::Drafts => "\\Drafts",
        NameAttribute::Flagged => "\\Flagged",
        NameAttribute::Junk => "\\Junk",
        NameAttribute::Sent => "\\Sent",
        NameAttribute::Trash => "\\Trash",
        NameAttribute::Extension(ext) => return Some(ext.to_string()),
        #[allow(unreachable_patterns)]
        _ => return None,
    };
    Some(text.to_string())
}
