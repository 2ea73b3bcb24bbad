//! Read-only order-book access
//!
//! [`OrderBookView`] is the query surface shared by live caches and the
//! immutable [`BookView`] captured into every published snapshot. Ranks are
//! computed when a view is read, starting at 0 for the best price on the
//! view's side.

use feed_types::ids::{FeedId, ItemId, MessageId};
use feed_types::messages::{PriceLevelEvent, TradeEvent};
use feed_types::numeric::{Price, Size};
use feed_types::side::BookSide;
use serde::{Deserialize, Serialize};

/// One quote in the book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub item_id: ItemId,
    pub price: Price,
    pub size: Size,
    pub side: BookSide,
    pub message_id: MessageId,
    pub source_timestamp: i64,
}

impl From<&PriceLevelEvent> for PriceLevel {
    fn from(event: &PriceLevelEvent) -> Self {
        Self {
            item_id: event.item_id.clone(),
            price: event.price,
            size: event.size,
            side: event.side,
            message_id: event.message_id,
            source_timestamp: event.source_timestamp,
        }
    }
}

/// A price level together with its rank at read time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedLevel {
    pub rank: usize,
    pub level: PriceLevel,
}

/// Most recent trade seen by a cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastTrade {
    pub price: Price,
    pub size: Size,
    pub side: BookSide,
    pub message_id: MessageId,
    pub source_timestamp: i64,
}

impl From<&TradeEvent> for LastTrade {
    fn from(event: &TradeEvent) -> Self {
        Self {
            price: event.price,
            size: event.size,
            side: event.side,
            message_id: event.message_id,
            source_timestamp: event.source_timestamp,
        }
    }
}

/// Query surface of one side of one feed's book.
pub trait OrderBookView {
    fn feed(&self) -> &FeedId;

    fn side(&self) -> BookSide;

    /// Level at `rank` (0 = best), or `None` past the end of the book.
    fn level(&self, rank: usize) -> Option<PriceLevel>;

    /// Every level, best first, ranks dense from 0.
    fn all_levels(&self) -> Vec<RankedLevel>;

    fn trade(&self) -> Option<LastTrade>;

    /// Source timestamp of the most recent applied mutation (0 before any).
    fn source_timestamp(&self) -> i64;

    fn top(&self) -> Option<PriceLevel> {
        self.level(0)
    }

    fn level2(&self) -> Option<PriceLevel> {
        self.level(1)
    }

    fn level3(&self) -> Option<PriceLevel> {
        self.level(2)
    }

    fn depth(&self) -> usize {
        self.all_levels().len()
    }

    fn best_price(&self) -> Option<Price> {
        self.top().map(|level| level.price)
    }
}

/// Immutable copy of a book taken under the cache's lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookView {
    pub feed: FeedId,
    pub side: BookSide,
    pub levels: Vec<RankedLevel>,
    pub trade: Option<LastTrade>,
    pub source_timestamp: i64,
}

impl BookView {
    /// Build a view from levels already in rank order.
    pub fn from_ordered<I>(
        feed: FeedId,
        side: BookSide,
        ordered: I,
        trade: Option<LastTrade>,
        source_timestamp: i64,
    ) -> Self
    where
        I: IntoIterator<Item = PriceLevel>,
    {
        let levels = ordered
            .into_iter()
            .enumerate()
            .map(|(rank, level)| RankedLevel { rank, level })
            .collect();
        Self {
            feed,
            side,
            levels,
            trade,
            source_timestamp,
        }
    }
}

impl OrderBookView for BookView {
    fn feed(&self) -> &FeedId {
        &self.feed
    }

    fn side(&self) -> BookSide {
        self.side
    }

    fn level(&self, rank: usize) -> Option<PriceLevel> {
        self.levels.get(rank).map(|ranked| ranked.level.clone())
    }

    fn all_levels(&self) -> Vec<RankedLevel> {
        self.levels.clone()
    }

    fn trade(&self) -> Option<LastTrade> {
        self.trade.clone()
    }

    fn source_timestamp(&self) -> i64 {
        self.source_timestamp
    }

    fn depth(&self) -> usize {
        self.levels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(id: &str, price: i64) -> PriceLevel {
        PriceLevel {
            item_id: ItemId::from(id),
            price: Price::new(price),
            size: 1.0,
            side: BookSide::Offer,
            message_id: MessageId::new(1),
            source_timestamp: 10,
        }
    }

    #[test]
    fn test_ranks_follow_input_order() {
        let view = BookView::from_ordered(
            FeedId::new("F", 1),
            BookSide::Offer,
            vec![level("a", 100), level("b", 101), level("c", 105)],
            None,
            10,
        );

        assert_eq!(view.depth(), 3);
        assert_eq!(view.best_price(), Some(Price::new(100)));
        assert_eq!(view.level2().unwrap().item_id, ItemId::from("b"));
        assert_eq!(view.level3().unwrap().item_id, ItemId::from("c"));
        let ranks: Vec<usize> = view.all_levels().iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![0, 1, 2]);
    }

    #[test]
    fn test_empty_view() {
        let view = BookView::from_ordered(FeedId::new("F", 1), BookSide::Bid, Vec::new(), None, 0);
        assert!(view.top().is_none());
        assert!(view.level(5).is_none());
        assert_eq!(view.depth(), 0);
    }
}
