//! Relay record shapes.
//!
//! Records are opaque signed envelopes: a kind number, an author, a list of
//! tags and a content string. Signing and wire encoding belong to the relay
//! gateway; this crate only reads and builds the fields it needs.

use crate::owner::OwnerKey;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current time in seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// A signed record as returned by a relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Record id.
    pub id: String,
    /// Author public key.
    pub pubkey: String,
    /// Kind number.
    pub kind: u32,
    /// Creation time (seconds since the Unix epoch).
    pub created_at: u64,
    /// Tags; each tag is a name followed by its values.
    pub tags: Vec<Vec<String>>,
    /// Content string.
    pub content: String,
    /// Signature.
    pub sig: String,
}

impl Record {
    /// Returns the first value of every tag named `name`, in order.
    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.tags
            .iter()
            .filter(move |t| t.first().map(String::as_str) == Some(name))
            .filter_map(|t| t.get(1).map(String::as_str))
    }

    /// Returns the `d` tag, if any.
    pub fn identifier(&self) -> Option<&str> {
        self.tag_values("d").next()
    }
}

/// An unsigned record the gateway will sign and publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDraft {
    /// Author the record is published as.
    pub author: OwnerKey,
    /// Kind number.
    pub kind: u32,
    /// Creation time (seconds since the Unix epoch).
    pub created_at: u64,
    /// Tags.
    pub tags: Vec<Vec<String>>,
    /// Content string.
    pub content: String,
}

impl RecordDraft {
    /// Creates an empty draft.
    pub fn new(author: OwnerKey, kind: u32, created_at: u64) -> Self {
        Self {
            author,
            kind,
            created_at,
            tags: Vec::new(),
            content: String::new(),
        }
    }

    /// Appends a tag.
    pub fn with_tag<I, S>(mut self, tag: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.push(tag.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the content.
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }
}

/// A relay query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    /// Accepted kind numbers.
    pub kinds: Vec<u32>,
    /// Accepted authors.
    pub authors: Vec<String>,
    /// Required tags: name and accepted values.
    pub tags: Vec<(String, Vec<String>)>,
    /// Maximum number of records wanted.
    pub limit: Option<usize>,
}

impl Filter {
    /// Creates an empty filter that matches everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an accepted kind.
    pub fn kind(mut self, kind: u32) -> Self {
        self.kinds.push(kind);
        self
    }

    /// Adds an accepted author.
    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.authors.push(author.into());
        self
    }

    /// Requires a tag with one of the given values.
    pub fn tag<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags
            .push((name.into(), values.into_iter().map(Into::into).collect()));
        self
    }

    /// Sets the limit.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if `record` satisfies every constraint.
    pub fn matches(&self, record: &Record) -> bool {
        (self.kinds.is_empty() || self.kinds.contains(&record.kind))
            && (self.authors.is_empty() || self.authors.contains(&record.pubkey))
            && self.tags.iter().all(|(name, values)| {
                record
                    .tag_values(name)
                    .any(|v| values.iter().any(|accepted| accepted == v))
            })
    }
}
