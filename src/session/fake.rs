//! Scripted in-memory mailbox for unit tests.

use super::{Flag, MailSession};
use crate::error::{Error, Result};
use crate::folder::FolderListing;
use async_imap::error::Error as ImapError;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A mailbox call, as recorded in the [`Journal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    OpenInbox,
    ListFolders,
    Search(String),
    Fetch(u32),
    AddFlags(u32, Vec<Flag>),
    Move(u32, String),
    Expunge,
    Close,
}

/// Shared record of every call made against a [`FakeMailbox`].
#[derive(Debug, Clone, Default)]
pub(crate) struct Journal(Arc<Mutex<Vec<Call>>>);

impl Journal {
    fn record(&self, call: Call) {
        self.0.lock().unwrap().push(call);
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.0.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    pub(crate) fn moves(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Move(_, folder) => Some(folder),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug)]
struct StoredMessage {
    uid: u32,
    from: String,
    raw: Vec<u8>,
    flags: HashSet<Flag>,
}

/// [`MailSession`] backed by a list of messages and a set of scripted failures.
#[derive(Debug, Default)]
pub(crate) struct FakeMailbox {
    journal: Journal,
    messages: Vec<StoredMessage>,
    folders: Vec<FolderListing>,
    fail_open: bool,
    fail_list: bool,
    fail_fetch: bool,
    failing_moves: HashSet<String>,
    fail_all_moves: bool,
    fail_store: bool,
    fail_expunge: bool,
    drop_on_search: Option<usize>,
    search_ignores_sender: bool,
    fetch_delay: Option<Duration>,
    stall_search: bool,
    close_delay: Option<Duration>,
    searches: usize,
    closed: bool,
}

impl FakeMailbox {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn journal(&self) -> Journal {
        self.journal.clone()
    }

    pub(crate) fn with_message(self, uid: u32, from: &str, subject: &str, body: &str) -> Self {
        let raw = raw_message(from, subject, body);
        self.with_raw(uid, from, raw)
    }

    /// Adds a message whose source is used verbatim; `from` drives the search.
    pub(crate) fn with_raw(mut self, uid: u32, from: &str, raw: Vec<u8>) -> Self {
        self.messages.push(StoredMessage {
            uid,
            from: from.to_string(),
            raw,
            flags: HashSet::new(),
        });
        self
    }

    pub(crate) fn with_folders(mut self, folders: Vec<FolderListing>) -> Self {
        self.folders = folders;
        self
    }

    pub(crate) fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub(crate) fn failing_list(mut self) -> Self {
        self.fail_list = true;
        self
    }

    pub(crate) fn failing_fetch(mut self) -> Self {
        self.fail_fetch = true;
        self
    }

    pub(crate) fn failing_move(mut self, folder: &str) -> Self {
        self.failing_moves.insert(folder.to_string());
        self
    }

    pub(crate) fn failing_all_moves(mut self) -> Self {
        self.fail_all_moves = true;
        self
    }

    pub(crate) fn failing_store(mut self) -> Self {
        self.fail_store = true;
        self
    }

    pub(crate) fn failing_expunge(mut self) -> Self {
        self.fail_expunge = true;
        self
    }

    /// The server drops the link when the `nth` search (1-based) is issued.
    pub(crate) fn dropping_on_search(mut self, nth: usize) -> Self {
        self.drop_on_search = Some(nth);
        self
    }

    /// Search returns every unread message, whoever sent it.
    pub(crate) fn loose_search(mut self) -> Self {
        self.search_ignores_sender = true;
        self
    }

    pub(crate) fn fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    /// Search is issued but the server never answers it.
    pub(crate) fn stalling_search(mut self) -> Self {
        self.stall_search = true;
        self
    }

    pub(crate) fn close_delay(mut self, delay: Duration) -> Self {
        self.close_delay = Some(delay);
        self
    }

    pub(crate) fn has_flag(&self, uid: u32, flag: Flag) -> bool {
        self.messages
            .iter()
            .any(|m| m.uid == uid && m.flags.contains(&flag))
    }

    pub(crate) fn contains(&self, uid: u32) -> bool {
        self.messages.iter().any(|m| m.uid == uid)
    }

    fn ensure_open(&self, operation: &'static str) -> Result<()> {
        if self.closed {
            Err(Error::ConnectionClosed { operation })
        } else {
            Ok(())
        }
    }
}

fn refused(text: &str) -> ImapError {
    ImapError::No(text.to_string())
}

impl MailSession for FakeMailbox {
    async fn open_inbox(&mut self) -> Result<()> {
        self.journal.record(Call::OpenInbox);
        self.ensure_open("select")?;
        if self.fail_open {
            return Err(Error::SelectMailbox {
                mailbox: super::INBOX.to_string(),
                source: refused("mailbox unavailable"),
            });
        }
        Ok(())
    }

    async fn list_folders(&mut self) -> Result<Vec<FolderListing>> {
        self.journal.record(Call::ListFolders);
        self.ensure_open("list")?;
        if self.fail_list {
            return Err(Error::ListFolders {
                source: refused("LIST not permitted"),
            });
        }
        Ok(self.folders.clone())
    }

    async fn search_unseen_from(&mut self, sender: &str) -> Result<Vec<u32>> {
        self.journal.record(Call::Search(sender.to_string()));
        self.ensure_open("search")?;
        self.searches += 1;
        if self.stall_search {
            std::future::pending::<()>().await;
        }
        if self.drop_on_search == Some(self.searches) {
            self.closed = true;
            return Err(Error::ConnectionClosed {
                operation: "search",
            });
        }

        let needle = sender.to_lowercase();
        let mut uids: Vec<u32> = self
            .messages
            .iter()
            .filter(|m| !m.flags.contains(&Flag::Seen))
            .filter(|m| self.search_ignores_sender || m.from.to_lowercase().contains(&needle))
            .map(|m| m.uid)
            .collect();
        uids.sort_unstable();
        Ok(uids)
    }

    async fn fetch_message(&mut self, uid: u32) -> Result<Vec<u8>> {
        self.journal.record(Call::Fetch(uid));
        self.ensure_open("fetch")?;
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_fetch {
            return Err(Error::ImapFetch {
                uid,
                source: refused("FETCH failed"),
            });
        }
        self.messages
            .iter()
            .find(|m| m.uid == uid)
            .map(|m| m.raw.clone())
            .ok_or(Error::MissingBody { uid })
    }

    async fn add_flags(&mut self, uid: u32, flags: &[Flag]) -> Result<()> {
        self.journal.record(Call::AddFlags(uid, flags.to_vec()));
        self.ensure_open("store")?;
        if self.fail_store {
            return Err(Error::ImapStore {
                uid,
                flags: super::flag_list(flags),
                source: refused("STORE failed"),
            });
        }
        if let Some(message) = self.messages.iter_mut().find(|m| m.uid == uid) {
            message.flags.extend(flags.iter().copied());
        }
        Ok(())
    }

    async fn move_message(&mut self, uid: u32, folder: &str) -> Result<()> {
        self.journal.record(Call::Move(uid, folder.to_string()));
        self.ensure_open("move")?;
        if self.fail_all_moves || self.failing_moves.contains(folder) {
            return Err(Error::ImapMove {
                uid,
                folder: folder.to_string(),
                source: refused("[TRYCREATE] no such mailbox"),
            });
        }
        self.messages.retain(|m| m.uid != uid);
        Ok(())
    }

    async fn expunge(&mut self) -> Result<()> {
        self.journal.record(Call::Expunge);
        self.ensure_open("expunge")?;
        if self.fail_expunge {
            return Err(Error::ImapExpunge {
                source: refused("EXPUNGE failed"),
            });
        }
        self.messages.retain(|m| !m.flags.contains(&Flag::Deleted));
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.journal.record(Call::Close);
        self.closed = true;
        if let Some(delay) = self.close_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

/// A minimal single-part RFC 5322 message.
pub(crate) fn raw_message(from: &str, subject: &str, body: &str) -> Vec<u8> {
    format!(
        "From: {from}\r\nTo: user@gmail.com\r\nSubject: {subject}\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\r\n{body}\r\n"
    )
    .into_bytes()
}
