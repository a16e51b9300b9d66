//! Verification code extraction.
//!
//! # Example
//!
//! ```
//! use mailcode::extract::extract_code;
//!
//! let code = extract_code("Sign-in request", "Your code is\n  48213  \nIt expires soon.");
//! assert_eq!(code.as_ref().map(|c| c.as_str()), Some("48213"));
//!
//! assert!(extract_code("", "123456").is_none());
//! ```

use regex::Regex;
use std::sync::LazyLock;

/// Number of digits in a verification code.
pub const CODE_LENGTH: usize = 5;

static STANDALONE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{5}$").expect("valid code regex"));

// Five ASCII digits with no letter or digit directly on either side
static INLINE_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^0-9A-Za-z])([0-9]{5})(?:[^0-9A-Za-z]|$)").expect("valid code regex")
});

static BREAK_TAGS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<\s*(?:br|/p|/div|/tr|/li|/h[1-6]|/table|/blockquote)\b[^>]*>")
        .expect("valid HTML break regex")
});

static SKIPPED_BLOCKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(style|script|head)\b[^>]*>.*?</(?:style|script|head)\s*>")
        .expect("valid HTML block regex")
});

static TAGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid HTML tag regex"));

/// A five-digit verification code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExtractedCode(String);

impl ExtractedCode {
    /// The code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the code, returning the inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for ExtractedCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ExtractedCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<&str> for ExtractedCode {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl From<ExtractedCode> for String {
    fn from(code: ExtractedCode) -> Self {
        code.0
    }
}

/// Finds the verification code in a message.
///
/// The subject and body are searched as one text, subject first. A line whose
/// trimmed content is exactly five digits is preferred; failing that, the first
/// run of exactly five digits standing on its own (e.g. `code: 54321`) is taken.
#[must_use]
pub fn extract_code(subject: &str, body: &str) -> Option<ExtractedCode> {
    let text = format!("{subject}\n{body}");

    text.lines()
        .map(str::trim)
        .find(|line| STANDALONE_CODE.is_match(line))
        .or_else(|| {
            INLINE_CODE
                .captures(&text)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str())
        })
        .map(|code| ExtractedCode(code.to_string()))
}

/// Renders an HTML body as plain text, keeping block boundaries as line breaks.
#[must_use]
pub fn html_to_text(html: &str) -> String {
    let without_blocks = SKIPPED_BLOCKS.replace_all(html, "");
    let with_breaks = BREAK_TAGS.replace_all(&without_blocks, "\n");
    let without_tags = TAGS.replace_all(&with_breaks, " ");

    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    decoded
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
