//! Orchestration of one wait for a verification code.
//!
//! A [`Waiter`] owns its [`MailSession`] for the whole operation. It opens the
//! inbox, looks up the disposal folder, then scans once immediately and again
//! on every poll interval until a code is captured, the connection is lost or
//! the global deadline passes. Whichever happens first settles the wait; the
//! session is closed exactly once on every path.
//!
//! # Example
//!
//! ```no_run
//! use mailcode::{wait_for_code, WaitConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> mailcode::Result<()> {
//! let config = WaitConfig::builder()
//!     .email("user@gmail.com")
//!     .app_password("app-password")
//!     .from_email("no-reply@service.example")
//!     .timeout(Duration::from_secs(90))
//!     .build()?;
//!
//! let code = wait_for_code(config).await?;
//! println!("Got code: {code}");
//! # Ok(())
//! # }
//! ```

use crate::config::WaitConfig;
use crate::dispose::MessageDisposer;
use crate::error::{Error, Result};
use crate::extract::ExtractedCode;
use crate::folder::{disposal_folder_or_default, FolderNode, DEFAULT_DISPOSAL_FOLDER};
use crate::scanner::{Scanner, TickOutcome, WaitState};
use crate::session::{ImapSession, MailSession};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

/// Drives one wait over an already authenticated session.
pub struct Waiter<S: MailSession> {
    session: S,
    sender: String,
    poll_interval: Duration,
    max_wait: Duration,
    deadline: Option<Instant>,
    state: WaitState,
}

impl<S: MailSession> Waiter<S> {
    /// Creates a waiter. The `max_wait` budget starts when [`wait`](Self::wait) is called.
    #[must_use]
    pub fn new(config: &WaitConfig, session: S) -> Self {
        Self {
            session,
            sender: config.from_email().to_string(),
            poll_interval: config.polling.interval,
            max_wait: config.polling.max_wait,
            deadline: None,
            state: WaitState::Idle,
        }
    }

    /// Creates a waiter with a deadline that started earlier, e.g. before connecting.
    pub(crate) fn with_deadline(config: &WaitConfig, session: S, deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            ..Self::new(config, session)
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> WaitState {
        self.state
    }

    /// Waits until a code is captured or the wait fails.
    ///
    /// # Errors
    ///
    /// - [`Error::SelectMailbox`] if the inbox cannot be opened
    /// - [`Error::ConnectionClosed`] if the server closes the connection first
    /// - [`Error::WaitTimeout`] if no code arrives before the deadline
    ///
    /// Folder discovery, disposal and unparseable messages never fail the wait.
    #[instrument(
        name = "Waiter::wait",
        skip_all,
        fields(
            sender = %self.sender,
            poll_interval = ?self.poll_interval,
            max_wait = ?self.max_wait
        )
    )]
    pub async fn wait(mut self) -> Result<ExtractedCode> {
        let timeout = self.max_wait;
        let deadline = *self
            .deadline
            .get_or_insert_with(|| Instant::now() + timeout);

        // Losing the race drops the in-flight scan along with its result
        let outcome = tokio::select! {
            biased;
            () = tokio::time::sleep_until(deadline) => Err(Error::WaitTimeout { timeout }),
            outcome = self.run() => outcome,
        };

        self.settle(outcome)
            .await
            .unwrap_or(Err(Error::AlreadySettled))
    }

    async fn run(&mut self) -> Result<ExtractedCode> {
        self.session.open_inbox().await?;
        debug!("Inbox opened");

        let disposer = MessageDisposer::new(self.discover_disposal_folder().await?);
        let scanner = Scanner::new(self.sender.as_str());

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;

            match scanner
                .tick(&mut self.session, &mut self.state, &disposer)
                .await
            {
                TickOutcome::Captured {
                    uid,
                    code,
                    disposition,
                } => {
                    debug!(uid, ?disposition, "Message consumed");
                    return Ok(code);
                }
                TickOutcome::Fatal(err) => return Err(err),
                TickOutcome::Busy
                | TickOutcome::NoCandidate
                | TickOutcome::Rejected { .. }
                | TickOutcome::Failed(_) => {}
            }
        }
    }

    /// Locates the disposal folder. Only a lost connection is an error.
    async fn discover_disposal_folder(&mut self) -> Result<String> {
        match self.session.list_folders().await {
            Ok(listing) => {
                let folder = disposal_folder_or_default(&FolderNode::tree(&listing));
                debug!(folder = %folder, "Disposal folder located");
                Ok(folder)
            }
            Err(err) if err.is_connection_lost() => Err(err),
            Err(err) => {
                warn!(
                    error = %err,
                    fallback = DEFAULT_DISPOSAL_FOLDER,
                    "Folder discovery failed; using fallback disposal folder"
                );
                Ok(DEFAULT_DISPOSAL_FOLDER.to_string())
            }
        }
    }

    /// Delivers `outcome` if the wait has not settled yet.
    ///
    /// The first call closes the session and returns the outcome. Any later
    /// call returns `None` and touches nothing. Closing is given at most one
    /// poll interval, so a stalled logout cannot hold the outcome back.
    pub(crate) async fn settle(
        &mut self,
        outcome: Result<ExtractedCode>,
    ) -> Option<Result<ExtractedCode>> {
        if !self.state.settle() {
            debug!("Wait already settled; outcome discarded");
            return None;
        }

        match tokio::time::timeout(self.poll_interval, self.session.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "Failed to close mailbox session"),
            Err(_) => warn!(
                timeout = ?self.poll_interval,
                "Mailbox session did not close in time; abandoning it"
            ),
        }

        match &outcome {
            Ok(_) => info!("Wait settled with a verification code"),
            Err(err) => warn!(error = %err, category = %err.category(), "Wait failed"),
        }
        Some(outcome)
    }
}

impl<S: MailSession> std::fmt::Debug for Waiter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waiter")
            .field("sender", &self.sender)
            .field("poll_interval", &self.poll_interval)
            .field("max_wait", &self.max_wait)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Connects to the mailbox described by `config` and waits for a code.
///
/// The deadline covers connecting as well as polling.
///
/// # Errors
///
/// Returns a connection error if connecting, logging in or opening the inbox
/// fails, [`Error::ConnectionClosed`] if the server closes the connection
/// before a code is captured, and [`Error::WaitTimeout`] when the deadline
/// passes first.
#[instrument(
    name = "mailcode::wait_for_code",
    skip_all,
    fields(
        email = %config.email(),
        imap_host = %config.imap_host,
        proxy_enabled = config.proxy.is_some()
    )
)]
pub async fn wait_for_code(config: WaitConfig) -> Result<ExtractedCode> {
    let timeout = config.polling.max_wait;
    let deadline = Instant::now() + timeout;
    let mut session = ImapSession::new(config.clone());

    let failure = match tokio::time::timeout_at(deadline, session.connect()).await {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(err),
        Err(_) => Some(Error::WaitTimeout { timeout }),
    };

    if let Some(err) = failure {
        if let Err(close_err) = session.close().await {
            warn!(error = %close_err, "Failed to close mailbox session");
        }
        warn!(error = %err, category = %err.category(), "Wait failed");
        return Err(err);
    }

    Waiter::with_deadline(&config, session, deadline).wait().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use crate::folder::FolderListing;
    use crate::session::fake::{Call, FakeMailbox};
    use crate::session::Flag;

    const SENDER: &str = "codes@service.example";

    fn config(poll: u64, max_wait: u64) -> WaitConfig {
        WaitConfig::builder()
            .email("user@gmail.com")
            .app_password("secret")
            .from_email(SENDER)
            .poll_interval(Duration::from_secs(poll))
            .timeout(Duration::from_secs(max_wait))
            .build()
            .unwrap()
    }

    fn closes(calls: &[Call]) -> usize {
        calls.iter().filter(|c| **c == Call::Close).count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_happy_path_marks_read_and_moves_before_settling() {
        let mailbox =
            FakeMailbox::new().with_message(12, SENDER, "Your sign-in code", "code: 54321");
        let journal = mailbox.journal();

        let code = Waiter::new(&config(3, 120), mailbox).wait().await.unwrap();

        assert_eq!(code, "54321");
        assert_eq!(
            journal.calls(),
            vec![
                Call::OpenInbox,
                Call::ListFolders,
                Call::Search(SENDER.into()),
                Call::Fetch(12),
                Call::AddFlags(12, vec![Flag::Seen]),
                Call::Move(12, "[Gmail]/Trash".into()),
                Call::Close,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_scan_runs_immediately() {
        let mailbox = FakeMailbox::new().with_message(1, SENDER, "Code", "24680");
        let start = Instant::now();

        let code = Waiter::new(&config(30, 120), mailbox).wait().await.unwrap();

        assert_eq!(code, "24680");
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovered_folder_is_tried_first() {
        let mailbox = FakeMailbox::new()
            .with_folders(vec![
                FolderListing::new("INBOX", Some("/"), &[]),
                FolderListing::new("[Gmail]", Some("/"), &["\\Noselect"]),
                FolderListing::new("[Gmail]/Bin", Some("/"), &["\\Trash"]),
            ])
            .with_message(2, SENDER, "Code", "13579");
        let journal = mailbox.journal();

        Waiter::new(&config(3, 120), mailbox).wait().await.unwrap();

        assert_eq!(journal.moves(), vec!["[Gmail]/Bin"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_failure_falls_back() {
        let mailbox = FakeMailbox::new()
            .failing_list()
            .with_message(2, SENDER, "Code", "13579");
        let journal = mailbox.journal();

        let code = Waiter::new(&config(3, 120), mailbox).wait().await.unwrap();

        assert_eq!(code, "13579");
        assert_eq!(journal.moves(), vec![DEFAULT_DISPOSAL_FOLDER]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_code_is_reported_when_every_disposal_fails() {
        let mailbox = FakeMailbox::new()
            .with_message(4, SENDER, "Code", "11223")
            .failing_all_moves()
            .failing_store()
            .failing_expunge();
        let journal = mailbox.journal();

        let code = Waiter::new(&config(3, 120), mailbox).wait().await.unwrap();

        assert_eq!(code, "11223");
        let calls = journal.calls();
        assert_eq!(journal.moves().len(), 6);
        assert_eq!(
            &calls[calls.len() - 2..],
            &[
                Call::AddFlags(4, vec![Flag::Seen, Flag::Deleted]),
                Call::Close
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_within_one_poll_interval() {
        let mailbox = FakeMailbox::new();
        let journal = mailbox.journal();
        let start = Instant::now();

        let err = Waiter::new(&config(3, 10), mailbox).wait().await.unwrap_err();

        let elapsed = start.elapsed();
        assert!(matches!(err, Error::WaitTimeout { .. }));
        assert_eq!(err.category(), ErrorCategory::Timeout);
        assert!(elapsed >= Duration::from_secs(10));
        assert!(elapsed <= Duration::from_secs(13));

        let calls = journal.calls();
        assert_eq!(closes(&calls), 1);
        assert_eq!(calls.last(), Some(&Call::Close));
        // Scans at 0, 3, 6 and 9 seconds
        assert_eq!(journal.count(|c| matches!(c, Call::Search(_))), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_fetch_never_overlaps_scans() {
        let mailbox = FakeMailbox::new()
            .with_message(3, SENDER, "Newsletter", "nothing to see")
            .fetch_delay(Duration::from_secs(7));
        let journal = mailbox.journal();

        let err = Waiter::new(&config(3, 20), mailbox).wait().await.unwrap_err();
        assert!(matches!(err, Error::WaitTimeout { .. }));

        let scan_calls: Vec<Call> = journal
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Search(_) | Call::Fetch(_)))
            .collect();
        assert!(scan_calls.len() >= 2);
        for pair in scan_calls.chunks(2) {
            assert!(matches!(pair[0], Call::Search(_)));
            assert_eq!(pair.get(1), Some(&Call::Fetch(3)));
        }
        // Without single-flight a 3s interval would have started a search every tick
        assert!(journal.count(|c| matches!(c, Call::Search(_))) < 20 / 3);

        // The fetch cut off by the deadline is discarded without further commands
        let calls = journal.calls();
        assert_eq!(closes(&calls), 1);
        assert_eq!(calls.last(), Some(&Call::Close));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_message_is_refetched_and_left_unread() {
        let mailbox = FakeMailbox::new()
            .with_message(6, "other@elsewhere.example", "Code", "12345")
            .loose_search();
        let journal = mailbox.journal();

        let err = Waiter::new(&config(3, 7), mailbox).wait().await.unwrap_err();

        assert!(matches!(err, Error::WaitTimeout { .. }));
        assert_eq!(journal.count(|c| *c == Call::Fetch(6)), 3);
        assert_eq!(journal.count(|c| matches!(c, Call::AddFlags(..))), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_closed_mid_wait_is_fatal() {
        let mailbox = FakeMailbox::new().dropping_on_search(2);
        let journal = mailbox.journal();
        let start = Instant::now();

        let err = Waiter::new(&config(3, 120), mailbox).wait().await.unwrap_err();

        assert!(err.is_connection_lost());
        assert_eq!(err.category(), ErrorCategory::PrematureClose);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        assert_eq!(closes(&journal.calls()), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbox_open_failure_is_fatal() {
        let mailbox = FakeMailbox::new().failing_open();
        let journal = mailbox.journal();

        let err = Waiter::new(&config(3, 120), mailbox).wait().await.unwrap_err();

        assert!(matches!(err, Error::SelectMailbox { .. }));
        assert_eq!(err.category(), ErrorCategory::Connection);
        assert_eq!(journal.calls(), vec![Call::OpenInbox, Call::Close]);
    }

    #[tokio::test]
    async fn test_settle_is_idempotent() {
        let mailbox = FakeMailbox::new();
        let journal = mailbox.journal();
        let mut waiter = Waiter::new(&config(3, 120), mailbox);
        let code = crate::extract::extract_code("", "54321").unwrap();

        let first = waiter.settle(Ok(code)).await;
        let second = waiter
            .settle(Err(Error::WaitTimeout {
                timeout: Duration::from_secs(120),
            }))
            .await;

        assert_eq!(first.unwrap().unwrap(), "54321");
        assert!(second.is_none());
        assert!(waiter.state().is_settled());
        assert_eq!(closes(&journal.calls()), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_started_before_connecting_is_honoured() {
        let mailbox = FakeMailbox::new();
        let config = config(3, 10);
        let deadline = Instant::now() + Duration::from_secs(4);
        let start = Instant::now();

        let err = Waiter::with_deadline(&config, mailbox, deadline)
            .wait()
            .await
            .unwrap_err();

        assert!(matches!(err, Error::WaitTimeout { .. }));
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_close_does_not_delay_timeout() {
        let mailbox = FakeMailbox::new()
            .stalling_search()
            .close_delay(Duration::from_secs(5));
        let journal = mailbox.journal();
        let start = Instant::now();

        let err = Waiter::new(&config(3, 10), mailbox).wait().await.unwrap_err();

        assert!(matches!(err, Error::WaitTimeout { .. }));
        assert!(start.elapsed() <= Duration::from_secs(13));
        assert_eq!(
            journal.calls(),
            vec![
                Call::OpenInbox,
                Call::ListFolders,
                Call::Search(SENDER.into()),
                Call::Close,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_starts_when_waiting_begins() {
        let mailbox = FakeMailbox::new();
        let waiter = Waiter::new(&config(3, 10), mailbox);

        tokio::time::sleep(Duration::from_secs(6)).await;
        let start = Instant::now();
        let err = waiter.wait().await.unwrap_err();

        assert!(matches!(err, Error::WaitTimeout { .. }));
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_wait_for_code_reports_connection_failure() {
        let config = WaitConfig::builder()
            .email("user@gmail.com")
            .app_password("secret")
            .from_email(SENDER)
            .imap_host("localhost")
            .imap_port(1)
            .build()
            .unwrap();

        let err = wait_for_code(config).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Connection);
    }
}
