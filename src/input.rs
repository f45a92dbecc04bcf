//! Input preparation: splitting, trimming, deduplication and validation
//!
//! Every entry that fails validation is reported back individually as a
//! [`Rejected`] so callers can tell the user exactly which inputs were skipped.

use crate::error::Error;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;
use url::Url;

const MAX_EMAIL_LEN: usize = 254;
const URL_SCHEMES: [&str; 3] = ["http://", "https://", "ftp://"];

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^[a-z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?(?:\.[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?)*$",
    )
    .unwrap_or_else(|e| panic!("email pattern must compile: {e}"))
});

/// Kind of content a work item carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    /// An email address
    Email,
    /// An absolute http/https/ftp URL
    Url,
}

/// A validated, trimmed string scheduled for encoding
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkItem {
    text: String,
    kind: ContentKind,
}

impl WorkItem {
    /// Validate a single (already trimmed) entry.
    pub fn parse(input: &str) -> Result<Self, Error> {
        let text = input.trim();
        if text.is_empty() {
            return Err(Error::Validation {
                input: text.to_string(),
                reason: "empty entry".to_string(),
            });
        }

        if is_valid_email(text) {
            return Ok(Self {
                text: text.to_string(),
                kind: ContentKind::Email,
            });
        }

        if is_valid_url(text) {
            return Ok(Self {
                text: text.to_string(),
                kind: ContentKind::Url,
            });
        }

        let reason = if text.contains('@') && !text.contains("://") {
            "not a valid email address"
        } else if URL_SCHEMES.iter().any(|scheme| text.starts_with(scheme)) {
            "not a valid URL"
        } else {
            "expected an email address or an http(s)/ftp URL"
        };

        Err(Error::Validation {
            input: text.to_string(),
            reason: reason.to_string(),
        })
    }

    /// The string to encode
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// What kind of content this is
    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    /// Consume the item, returning its text
    pub fn into_string(self) -> String {
        self.text
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl AsRef<str> for WorkItem {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

/// An input entry that did not pass validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejected {
    /// The trimmed entry
    pub input: String,
    /// Human-readable reason
    pub reason: String,
}

/// Outcome of [`prepare`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedInput {
    /// Unique, valid items in first-seen order
    pub items: Vec<WorkItem>,
    /// Entries that failed validation, in first-seen order
    pub rejected: Vec<Rejected>,
    /// Number of entries dropped as exact duplicates
    pub duplicates: usize,
}

impl PreparedInput {
    /// Whether nothing is left to generate
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Split raw text on `;` and line breaks, then trim, deduplicate and validate.
pub fn prepare(raw: &str) -> PreparedInput {
    prepare_entries(raw.split([';', '\n', '\r']))
}

/// Same as [`prepare`] for entries that were already split.
pub fn prepare_entries<I, S>(entries: I) -> PreparedInput
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut prepared = PreparedInput::default();

    for entry in entries {
        let entry = entry.as_ref().trim();
        if entry.is_empty() {
            continue;
        }
        if !seen.insert(entry.to_string()) {
            prepared.duplicates += 1;
            continue;
        }

        match WorkItem::parse(entry) {
            Ok(item) => prepared.items.push(item),
            Err(Error::Validation { input, reason }) => {
                tracing::debug!(%input, %reason, "Rejected input");
                prepared.rejected.push(Rejected { input, reason });
            }
            Err(other) => prepared.rejected.push(Rejected {
                input: entry.to_string(),
                reason: other.to_string(),
            }),
        }
    }

    prepared
}

/// Email syntax check (length bound plus an RFC 5322 style pattern).
pub fn is_valid_email(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_EMAIL_LEN
        && value.contains('@')
        && EMAIL_RE.is_match(value)
}

/// Absolute http, https or ftp URL.
pub fn is_valid_url(value: &str) -> bool {
    if !URL_SCHEMES.iter().any(|scheme| value.starts_with(scheme)) {
        return false;
    }
    match Url::parse(value) {
        Ok(url) => url.has_host(),
        Err(_) => false,
    }
}
