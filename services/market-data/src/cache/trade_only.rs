use feed_types::ids::ItemId;
use feed_types::messages::PriceLevelEvent;
use feed_types::side::BookSide;

use super::{BookState, CacheKind, Mutation};
use crate::view::PriceLevel;

/// No price levels; the cache only tracks the latest trade.
#[derive(Debug, Clone, Copy, Default)]
pub struct TradeOnlyBook;

impl BookState for TradeOnlyBook {
    const KIND: CacheKind = CacheKind::TradeOnly;

    fn empty(_side: BookSide) -> Self {
        TradeOnlyBook
    }

    fn apply_price(&mut self, _event: &PriceLevelEvent) -> Mutation {
        Mutation::Ignored
    }

    fn apply_delete(&mut self, _item_id: &ItemId) -> Mutation {
        Mutation::Ignored
    }

    fn clear(&mut self) {}

    fn level(&self, _rank: usize) -> Option<PriceLevel> {
        None
    }

    fn ordered_levels(&self) -> Vec<PriceLevel> {
        Vec::new()
    }

    fn depth(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use crate::cache::test_support::{delete, feed, price, trade};
    use crate::cache::{OrderBookCache, TradeOnlyCache};
    use crate::view::OrderBookView;
    use feed_types::numeric::Price;
    use feed_types::side::BookSide;

    #[test]
    fn test_price_events_do_not_modify() {
        let cache = TradeOnlyCache::new(feed(), BookSide::Bid);
        cache.add_price(&price("a", 100, BookSide::Bid, 1));
        cache.delete_price(&delete("a", BookSide::Bid, 1));

        assert!(!cache.is_modified());
        assert!(cache.top().is_none());
        assert!(cache.all_levels().is_empty());
    }

    #[test]
    fn test_trade_replaces_previous() {
        let cache = TradeOnlyCache::new(feed(), BookSide::Bid);
        cache.add_trade(&trade(100, 1));
        cache.add_trade(&trade(101, 2));

        assert!(cache.is_modified());
        assert_eq!(cache.trade().unwrap().price, Price::new(101));
    }
}
