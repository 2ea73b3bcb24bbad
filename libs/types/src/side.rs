//! Book side types

use crate::numeric::Price;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Half of an order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BookSide {
    /// Buy interest, best = highest price
    Bid,
    /// Sell interest, best = lowest price
    Offer,
}

impl BookSide {
    pub const BOTH: [BookSide; 2] = [BookSide::Bid, BookSide::Offer];

    /// Get the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            BookSide::Bid => BookSide::Offer,
            BookSide::Offer => BookSide::Bid,
        }
    }

    /// Ranking order for two prices on this side: `Less` means `a` is better.
    ///
    /// Bids rank descending by price, offers ascending.
    pub fn rank_cmp(&self, a: Price, b: Price) -> Ordering {
        match self {
            BookSide::Bid => b.cmp(&a),
            BookSide::Offer => a.cmp(&b),
        }
    }

    /// Whether `a` is strictly better than `b` on this side.
    pub fn is_better(&self, a: Price, b: Price) -> bool {
        self.rank_cmp(a, b) == Ordering::Less
    }

    /// Dense index, handy for per-side arrays.
    pub fn index(&self) -> usize {
        match self {
            BookSide::Bid => 0,
            BookSide::Offer => 1,
        }
    }
}

impl fmt::Display for BookSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookSide::Bid => write!(f, "BID"),
            BookSide::Offer => write!(f, "OFFER"),
        }
    }
}
