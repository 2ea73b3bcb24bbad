use std::collections::{BTreeMap, HashMap};

use feed_types::ids::ItemId;
use feed_types::messages::PriceLevelEvent;
use feed_types::numeric::Price;
use feed_types::side::BookSide;
use tracing::debug;

use super::{BookState, CacheKind, Mutation};
use crate::view::PriceLevel;

/// Every level of one side, keyed by item id.
///
/// `by_price` is a secondary index holding the single item that currently
/// owns each price. The two maps always describe the same set of levels:
/// a new item at an occupied price evicts the previous owner from both.
#[derive(Debug, Clone)]
pub struct FullDepthBook {
    side: BookSide,
    levels: HashMap<ItemId, PriceLevel>,
    by_price: BTreeMap<Price, ItemId>,
}

impl FullDepthBook {
    fn ranked_ids(&self) -> Box<dyn Iterator<Item = &ItemId> + '_> {
        match self.side {
            BookSide::Bid => Box::new(self.by_price.values().rev()),
            BookSide::Offer => Box::new(self.by_price.values()),
        }
    }

    fn remove_item(&mut self, item_id: &ItemId) -> Option<PriceLevel> {
        let removed = self.levels.remove(item_id)?;
        if self.by_price.get(&removed.price) == Some(item_id) {
            self.by_price.remove(&removed.price);
        }
        Some(removed)
    }
}

impl BookState for FullDepthBook {
    const KIND: CacheKind = CacheKind::FullDepth;

    fn empty(side: BookSide) -> Self {
        Self {
            side,
            levels: HashMap::new(),
            by_price: BTreeMap::new(),
        }
    }

    fn apply_price(&mut self, event: &PriceLevelEvent) -> Mutation {
        // Re-adding an item may move it to another price.
        self.remove_item(&event.item_id);

        if let Some(evicted) = self.by_price.insert(event.price, event.item_id.clone()) {
            self.levels.remove(&evicted);
            debug!(
                price = %event.price,
                evicted = %evicted,
                replacement = %event.item_id,
                "Price collision, evicting previous level"
            );
        }
        self.levels
            .insert(event.item_id.clone(), PriceLevel::from(event));
        Mutation::Applied
    }

    fn apply_delete(&mut self, item_id: &ItemId) -> Mutation {
        match self.remove_item(item_id) {
            Some(_) => Mutation::Applied,
            None => Mutation::Unknown,
        }
    }

    fn clear(&mut self) {
        self.levels.clear();
        self.by_price.clear();
    }

    fn level(&self, rank: usize) -> Option<PriceLevel> {
        self.ranked_ids()
            .nth(rank)
            .and_then(|id| self.levels.get(id))
            .cloned()
    }

    fn ordered_levels(&self) -> Vec<PriceLevel> {
        self.ranked_ids()
            .filter_map(|id| self.levels.get(id))
            .cloned()
            .collect()
    }

    fn depth(&self) -> usize {
        self.levels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::test_support::price;

    fn ids(book: &FullDepthBook) -> Vec<String> {
        book.ordered_levels()
            .into_iter()
            .map(|l| l.item_id.to_string())
            .collect()
    }

    #[test]
    fn test_bids_rank_descending() {
        let mut book = FullDepthBook::empty(BookSide::Bid);
        book.apply_price(&price("a", 100, BookSide::Bid, 1));
        book.apply_price(&price("b", 102, BookSide::Bid, 1));
        book.apply_price(&price("c", 101, BookSide::Bid, 1));

        assert_eq!(ids(&book), vec!["b", "c", "a"]);
        assert_eq!(book.level(0).unwrap().price, Price::new(102));
        assert!(book.level(3).is_none());
    }

    #[test]
    fn test_offers_rank_ascending() {
        let mut book = FullDepthBook::empty(BookSide::Offer);
        book.apply_price(&price("a", 100, BookSide::Offer, 1));
        book.apply_price(&price("b", 102, BookSide::Offer, 1));
        book.apply_price(&price("c", 101, BookSide::Offer, 1));

        assert_eq!(ids(&book), vec!["a", "c", "b"]);
    }

    #[test]
    fn test_price_collision_evicts_previous_owner() {
        let mut book = FullDepthBook::empty(BookSide::Offer);
        book.apply_price(&price("1", 100, BookSide::Offer, 1));
        book.apply_price(&price("2", 101, BookSide::Offer, 1));
        book.apply_price(&price("3", 101, BookSide::Offer, 2));

        assert_eq!(ids(&book), vec!["1", "3"]);
        assert_eq!(book.depth(), 2);
        assert_eq!(book.apply_delete(&ItemId::from("2")), Mutation::Unknown);
    }

    #[test]
    fn test_readding_item_moves_it() {
        let mut book = FullDepthBook::empty(BookSide::Bid);
        book.apply_price(&price("a", 100, BookSide::Bid, 1));
        book.apply_price(&price("a", 105, BookSide::Bid, 2));

        assert_eq!(book.depth(), 1);
        assert_eq!(book.level(0).unwrap().price, Price::new(105));
        assert_eq!(book.by_price.len(), 1);
    }

    #[test]
    fn test_delete_removes_from_both_indexes() {
        let mut book = FullDepthBook::empty(BookSide::Bid);
        book.apply_price(&price("a", 100, BookSide::Bid, 1));
        assert_eq!(book.apply_delete(&ItemId::from("a")), Mutation::Applied);
        assert_eq!(book.depth(), 0);
        assert!(book.by_price.is_empty());
    }

    #[test]
    fn test_clear() {
        let mut book = FullDepthBook::empty(BookSide::Bid);
        book.apply_price(&price("a", 100, BookSide::Bid, 1));
        book.clear();
        assert!(book.ordered_levels().is_empty());
    }
}
