//! Outbound incremental update message
//!
//! One `IncrementalUpdate` coalesces the bid-side and ask-side changes of a
//! single feed update cycle. Added levels are kept as parallel arrays so the
//! message maps directly onto columnar downstream encodings.

use serde::{Deserialize, Serialize};

use crate::ids::{ItemId, MessageId};
use crate::numeric::{Price, Size};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncrementalUpdate {
    pub message_id: MessageId,
    pub product_code: String,
    pub added_bid_ids: Vec<ItemId>,
    pub added_bid_prices: Vec<Price>,
    pub added_bid_sizes: Vec<Size>,
    pub added_ask_ids: Vec<ItemId>,
    pub added_ask_prices: Vec<Price>,
    pub added_ask_sizes: Vec<Size>,
    /// Deleted item ids, not segregated by side
    pub deleted_ids: Vec<ItemId>,
    /// Receivers must replace their book instead of applying a delta
    pub is_new_snapshot: bool,
}

impl IncrementalUpdate {
    /// Number of added bid levels.
    pub fn bid_count(&self) -> usize {
        self.added_bid_ids.len()
    }

    /// Number of added ask levels.
    pub fn ask_count(&self) -> usize {
        self.added_ask_ids.len()
    }

    /// Total number of level changes carried.
    pub fn change_count(&self) -> usize {
        self.bid_count() + self.ask_count() + self.deleted_ids.len()
    }

    /// Whether the parallel arrays of each side have matching lengths.
    pub fn is_well_formed(&self) -> bool {
        self.added_bid_ids.len() == self.added_bid_prices.len()
            && self.added_bid_ids.len() == self.added_bid_sizes.len()
            && self.added_ask_ids.len() == self.added_ask_prices.len()
            && self.added_ask_ids.len() == self.added_ask_sizes.len()
    }
}
