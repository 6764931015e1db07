//! Owner identity and state kinds.

use crate::error::{ProtocolError, ProtocolResult};
use crate::record::Filter;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The identity (public key) whose state is being synchronized.
///
/// All state is partitioned first by owner. The key is kept as the string
/// the signer reports; it must be non-empty and free of whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerKey(String);

impl OwnerKey {
    /// Parses an owner key.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidInput`] for empty keys or keys
    /// containing whitespace or control characters.
    pub fn parse(key: impl Into<String>) -> ProtocolResult<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(ProtocolError::invalid("owner_key", "must not be empty"));
        }
        if key.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(ProtocolError::invalid(
                "owner_key",
                "must not contain whitespace",
            ));
        }
        Ok(Self(key))
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for OwnerKey {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Bookmark list events (public list of `e` tags).
pub const BOOKMARK_LIST_EVENT_KIND: u32 = 10003;
/// Parameterized replaceable application data.
pub const APP_DATA_EVENT_KIND: u32 = 30078;

/// The kinds of replaceable state this system synchronizes.
///
/// Each kind maps to exactly one logical document per owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StateKind {
    /// Ordered, unique list of bookmarked event ids.
    BookmarkList,
    /// User-defined bookmark collections.
    BookmarkCollections,
    /// Per-bookmark metadata keyed by event id.
    BookmarkMetadata,
}

impl StateKind {
    /// All kinds, in a stable order.
    pub const ALL: [StateKind; 3] = [
        StateKind::BookmarkList,
        StateKind::BookmarkCollections,
        StateKind::BookmarkMetadata,
    ];

    /// Returns the record kind number the document is published under.
    pub fn event_kind(self) -> u32 {
        match self {
            StateKind::BookmarkList => BOOKMARK_LIST_EVENT_KIND,
            StateKind::BookmarkCollections | StateKind::BookmarkMetadata => APP_DATA_EVENT_KIND,
        }
    }

    /// Returns the `d` tag value for parameterized kinds.
    pub fn identifier(self) -> Option<&'static str> {
        match self {
            StateKind::BookmarkList => None,
            StateKind::BookmarkCollections => Some("relaymark/bookmark-collections"),
            StateKind::BookmarkMetadata => Some("relaymark/bookmark-metadata"),
        }
    }

    /// Returns a stable short name, used in storage keys and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            StateKind::BookmarkList => "bookmark-list",
            StateKind::BookmarkCollections => "bookmark-collections",
            StateKind::BookmarkMetadata => "bookmark-metadata",
        }
    }

    /// Builds the relay filter selecting this document for `owner`.
    pub fn filter(self, owner: &OwnerKey) -> Filter {
        let filter = Filter::new()
            .kind(self.event_kind())
            .author(owner.as_str())
            .limit(1);
        match self.identifier() {
            Some(d) => filter.tag("d", [d]),
            None => filter,
        }
    }
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StateKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StateKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ProtocolError::invalid("state_kind", format!("unknown kind {s:?}")))
    }
}
