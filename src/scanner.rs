//! Single-flight inbox scanning.

use crate::dispose::{Disposition, MessageDisposer};
use crate::error::Error;
use crate::extract::{extract_code, ExtractedCode};
use crate::message::CandidateMessage;
use crate::session::MailSession;
use tracing::{debug, info, instrument, warn};

/// Lifecycle of one wait operation.
///
/// This is the only record of whether a scan is in flight and whether the
/// wait is over. It moves `Idle → Scanning → Idle` any number of times and
/// `→ Settled` at most once; nothing leaves `Settled`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WaitState {
    /// No scan in flight.
    #[default]
    Idle,
    /// A scan is in flight.
    Scanning,
    /// The outcome has been delivered.
    Settled,
}

impl WaitState {
    /// Returns `true` once the wait has delivered its outcome.
    #[must_use]
    pub fn is_settled(self) -> bool {
        self == Self::Settled
    }

    /// `Idle → Scanning`. Returns `false` (and changes nothing) from any other state.
    pub(crate) fn begin_scan(&mut self) -> bool {
        if *self == Self::Idle {
            *self = Self::Scanning;
            true
        } else {
            false
        }
    }

    /// `Scanning → Idle`. A settled wait stays settled.
    pub(crate) fn finish_scan(&mut self) {
        if *self == Self::Scanning {
            *self = Self::Idle;
        }
    }

    /// Moves to `Settled`. Returns `false` if it already was.
    pub(crate) fn settle(&mut self) -> bool {
        if self.is_settled() {
            false
        } else {
            *self = Self::Settled;
            true
        }
    }
}

/// Result of one [`Scanner::tick`].
#[derive(Debug)]
pub enum TickOutcome {
    /// A scan was already in flight or the wait had settled; nothing was done.
    Busy,
    /// No unread message from the sender.
    NoCandidate,
    /// The newest candidate was not from the sender or carried no code.
    /// It is left unread.
    Rejected {
        /// UID of the rejected message.
        uid: u32,
    },
    /// A mailbox command failed; the failure was logged and the next tick retries.
    Failed(Error),
    /// A code was found and disposal of its message was attempted.
    Captured {
        /// UID of the message that carried the code.
        uid: u32,
        /// The verification code.
        code: ExtractedCode,
        /// What disposal achieved.
        disposition: Disposition,
    },
    /// The connection was lost; the wait cannot continue.
    Fatal(Error),
}

impl TickOutcome {
    /// Returns `true` if this outcome ends the wait.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Captured { .. } | Self::Fatal(_))
    }
}

/// Looks for one qualifying unread message per tick.
#[derive(Debug, Clone)]
pub struct Scanner {
    sender: String,
}

impl Scanner {
    /// Creates a scanner for messages from `sender`.
    #[must_use]
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
        }
    }

    /// Runs one scan if `state` is idle.
    ///
    /// On a terminal outcome `state` is left at [`WaitState::Scanning`] so that
    /// no further tick can start before the waiter settles.
    #[instrument(name = "Scanner::tick", skip_all, fields(sender = %self.sender))]
    pub async fn tick<S: MailSession>(
        &self,
        session: &mut S,
        state: &mut WaitState,
        disposer: &MessageDisposer,
    ) -> TickOutcome {
        if !state.begin_scan() {
            debug!(?state, "Tick dropped");
            return TickOutcome::Busy;
        }

        let outcome = self.scan(session, disposer).await;
        if !outcome.is_terminal() {
            state.finish_scan();
        }
        outcome
    }

    async fn scan<S: MailSession>(
        &self,
        session: &mut S,
        disposer: &MessageDisposer,
    ) -> TickOutcome {
        let uids = match session.search_unseen_from(&self.sender).await {
            Ok(uids) => uids,
            Err(err) => return absorb(err),
        };

        // UIDs grow with arrival, so the highest is the newest
        let Some(uid) = uids.iter().copied().max() else {
            debug!("No unread message from sender");
            return TickOutcome::NoCandidate;
        };

        let raw = match session.fetch_message(uid).await {
            Ok(raw) => raw,
            Err(err) => return absorb(err),
        };

        let message = match CandidateMessage::parse(uid, &raw) {
            Ok(message) => message,
            Err(err) => {
                warn!(uid, error = %err, "Skipping unparseable message");
                return TickOutcome::Rejected { uid };
            }
        };

        if !message.is_from(&self.sender) {
            debug!(uid, from = %message.from, "Sender does not match");
            return TickOutcome::Rejected { uid };
        }

        let Some(code) = extract_code(&message.subject, &message.body) else {
            debug!(uid, "No verification code in message");
            return TickOutcome::Rejected { uid };
        };

        info!(uid, "Verification code found");
        let disposition = disposer.dispose(session, uid).await;

        TickOutcome::Captured {
            uid,
            code,
            disposition,
        }
    }
}

fn absorb(err: Error) -> TickOutcome {
    if err.is_connection_lost() {
        TickOutcome::Fatal(err)
    } else {
        warn!(error = %err, category = %err.category(), "Scan failed; retrying on next tick");
        TickOutcome::Failed(err)
    }
}
