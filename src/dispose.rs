//! Best-effort removal of a consumed message.
//!
//! A [`MessageDisposer`] never fails: every step that goes wrong is logged and
//! the next step in the plan is tried. The caller learns what happened from the
//! returned [`Disposition`], but the verification code is reported either way.

use crate::error::Result;
use crate::session::{Flag, MailSession};
use tracing::{debug, instrument, warn};

/// Well-known disposal folders tried, in order, after the located one.
pub const FALLBACK_DISPOSAL_FOLDERS: [&str; 5] = [
    "[Gmail]/Trash",
    "[Google Mail]/Trash",
    "[Gmail]/Papelera",
    "Papelera",
    "Trash",
];

/// One strategy in the disposal plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisposalStep<'a> {
    /// Move the message into a folder.
    MoveTo(&'a str),
    /// Flag the message `\Seen` and `\Deleted`, then purge the inbox.
    FlagAndPurge,
}

/// What disposal achieved for a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// The message now lives in `folder`.
    Moved {
        /// Destination folder.
        folder: String,
    },
    /// The message was flagged deleted and the inbox purged.
    Purged,
    /// Every strategy failed; the message is still in the inbox.
    Retained,
}

/// Marks a message read and removes it through an ordered fallback chain.
#[derive(Debug, Clone)]
pub struct MessageDisposer {
    primary: String,
}

impl MessageDisposer {
    /// Creates a disposer that tries `primary` before the well-known folders.
    #[must_use]
    pub fn new(primary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
        }
    }

    /// The located disposal folder.
    #[must_use]
    pub fn primary(&self) -> &str {
        &self.primary
    }

    /// The strategies [`dispose`](Self::dispose) tries, in order.
    ///
    /// The located folder comes first, then [`FALLBACK_DISPOSAL_FOLDERS`], then
    /// [`DisposalStep::FlagAndPurge`]. Names are not de-duplicated.
    pub fn plan(&self) -> impl Iterator<Item = DisposalStep<'_>> {
        std::iter::once(self.primary.as_str())
            .chain(FALLBACK_DISPOSAL_FOLDERS)
            .map(DisposalStep::MoveTo)
            .chain(std::iter::once(DisposalStep::FlagAndPurge))
    }

    /// Marks message `uid` read, then runs the plan until a step succeeds.
    ///
    /// Failures are logged and never returned. A lost connection ends the
    /// plan early since no later step could reach the server.
    #[instrument(
        name = "MessageDisposer::dispose",
        skip(self, session),
        fields(primary = %self.primary)
    )]
    pub async fn dispose<S: MailSession>(&self, session: &mut S, uid: u32) -> Disposition {
        if let Err(err) = session.add_flags(uid, &[Flag::Seen]).await {
            warn!(error = %err, "Failed to mark message as read");
            if err.is_connection_lost() {
                return Disposition::Retained;
            }
        }

        for step in self.plan() {
            let attempt = match step {
                DisposalStep::MoveTo(folder) => session
                    .move_message(uid, folder)
                    .await
                    .map(|()| Disposition::Moved {
                        folder: folder.to_string(),
                    }),
                DisposalStep::FlagAndPurge => flag_and_purge(session, uid).await,
            };

            match attempt {
                Ok(disposition) => {
                    debug!(?disposition, "Message disposed");
                    return disposition;
                }
                Err(err) if err.is_connection_lost() => {
                    warn!(error = %err, ?step, "Connection lost during disposal");
                    return Disposition::Retained;
                }
                Err(err) => warn!(error = %err, ?step, "Disposal step failed"),
            }
        }

        warn!("Every disposal strategy failed; message left in inbox");
        Disposition::Retained
    }
}

async fn flag_and_purge<S: MailSession>(session: &mut S, uid: u32) -> Result<Disposition> {
    session.add_flags(uid, &[Flag::Seen, Flag::Deleted]).await?;
    session.expunge().await?;
    Ok(Disposition::Purged)
}
