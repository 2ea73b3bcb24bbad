//! Committed book snapshots and the listeners that receive them
//!
//! A snapshot is published once per commit of a modified cache. Its view is
//! an immutable copy, so listeners may keep it after the callback returns.

use feed_types::ids::MessageId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::cache::OrderBookCache;
use crate::error::ListenerError;
use crate::view::{BookView, OrderBookView};

/// Immutable state of one book side as of a commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    /// Message id of the batch that produced this state.
    pub id: MessageId,
    /// The book was rebuilt from a venue snapshot rather than patched.
    pub is_full_snapshot: bool,
    /// Source timestamp carried by the closing end-of-update.
    pub committed_at: i64,
    pub view: BookView,
}

impl OrderBookSnapshot {
    pub fn new(id: MessageId, is_full_snapshot: bool, committed_at: i64, view: BookView) -> Self {
        Self {
            id,
            is_full_snapshot,
            committed_at,
            view,
        }
    }

    /// SHA-256 over the feed, side, id and every level in rank order.
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();

        hasher.update(self.view.feed.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(self.view.side.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(self.id.value().to_le_bytes());
        hasher.update(b"---");

        for ranked in &self.view.levels {
            hasher.update(ranked.level.item_id.as_str().as_bytes());
            hasher.update(b":");
            hasher.update(ranked.level.price.raw().to_le_bytes());
            hasher.update(b":");
            hasher.update(ranked.level.size.to_bits().to_le_bytes());
            hasher.update(b"|");
        }
        hasher.update(b"---");

        if let Some(trade) = &self.view.trade {
            hasher.update(trade.price.raw().to_le_bytes());
            hasher.update(b":");
            hasher.update(trade.size.to_bits().to_le_bytes());
        }

        format!("{:x}", hasher.finalize())
    }

    /// Whether `expected` matches the checksum of this snapshot's content.
    pub fn verify(&self, expected: &str) -> bool {
        self.checksum() == expected
    }

    pub fn depth(&self) -> usize {
        self.view.depth()
    }
}

/// Receiver of cache commits.
///
/// Callbacks run on the committing thread after the cache lock is released.
/// An error from any callback aborts the remaining notifications of that
/// commit.
pub trait OrderBookSnapshotListener: Send + Sync {
    /// A modified cache was committed.
    fn on_new_snapshot(&self, snapshot: &OrderBookSnapshot) -> Result<(), ListenerError>;

    /// Every commit ends here, modified or not.
    fn on_end_update(
        &self,
        cache: &dyn OrderBookCache,
        id: MessageId,
        was_modified: bool,
    ) -> Result<(), ListenerError>;

    /// The feed closed a batch without touching this cache.
    fn on_no_update(&self, _id: MessageId) {}
}
