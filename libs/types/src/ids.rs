//! Identifier types for feeds, update batches and quotes
//!
//! A feed is identified by an opaque name plus a numeric id that stays stable
//! for the process lifetime. Message ids group all protocol messages that
//! belong to one atomic update batch on a feed.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one (venue, symbol, book-side-grouping) stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeedId {
    name: String,
    id: u32,
}

impl FeedId {
    pub fn new(name: impl Into<String>, id: u32) -> Self {
        Self {
            name: name.into(),
            id,
        }
    }

    /// Opaque feed name (e.g. "BINANCE:BTCUSDT")
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Numeric feed id
    pub fn id(&self) -> u32 {
        self.id
    }
}

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}

/// Source-assigned id of one atomic update batch.
///
/// Monotonically non-decreasing per feed; every message of a batch shares it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(u64);

impl MessageId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// The id following this one.
    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl From<u64> for MessageId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Venue-assigned quote identifier, the primary key for level lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ItemId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
