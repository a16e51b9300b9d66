//! Parsing fetched messages into the fields the scanner evaluates.

use crate::error::{Error, Result};
use crate::extract::html_to_text;
use mailparse::{parse_mail, MailHeaderMap, ParsedMail};
use tracing::debug;

/// A fetched message, reduced to what the scanner needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateMessage {
    /// Message UID in the inbox.
    pub uid: u32,
    /// Decoded `From` header, display name included.
    pub from: String,
    /// Decoded subject, empty if absent.
    pub subject: String,
    /// Plain-text body, or the HTML body rendered as text.
    pub body: String,
}

impl CandidateMessage {
    /// Parses the raw RFC 5322 source of message `uid`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ParseEmail`] if the message structure cannot be parsed.
    pub fn parse(uid: u32, raw: &[u8]) -> Result<Self> {
        let parsed = parse_mail(raw).map_err(|source| Error::ParseEmail { uid, source })?;

        let from = parsed.headers.get_first_value("From").unwrap_or_default();
        let subject = parsed.headers.get_first_value("Subject").unwrap_or_default();
        let body = body_text(&parsed).map_err(|source| Error::ParseEmail { uid, source })?;

        debug!(uid, body_len = body.len(), "Parsed candidate message");

        Ok(Self {
            uid,
            from,
            subject,
            body,
        })
    }

    /// Returns `true` if the `From` header mentions `sender`, ignoring case.
    #[must_use]
    pub fn is_from(&self, sender: &str) -> bool {
        self.from
            .to_lowercase()
            .contains(&sender.trim().to_lowercase())
    }
}

/// Plain text if the message has any, otherwise its HTML rendered as text.
fn body_text(parsed: &ParsedMail<'_>) -> std::result::Result<String, mailparse::MailParseError> {
    if let Some(plain) = find_part(parsed, "text/plain") {
        return plain.get_body();
    }
    if let Some(html) = find_part(parsed, "text/html") {
        return html.get_body().map(|html| html_to_text(&html));
    }
    if parsed.subparts.is_empty() {
        return parsed.get_body();
    }
    Ok(String::new())
}

/// Depth-first search for the first leaf part of the given MIME type.
fn find_part<'a>(part: &'a ParsedMail<'a>, mimetype: &str) -> Option<&'a ParsedMail<'a>> {
    if part.subparts.is_empty() {
        return part
            .ctype
            .mimetype
            .eq_ignore_ascii_case(mimetype)
            .then_some(part);
    }
    part.subparts
        .iter()
        .find_map(|sub| find_part(sub, mimetype))
}
