use feed_types::ids::ItemId;
use feed_types::messages::PriceLevelEvent;
use feed_types::side::BookSide;

use super::{BookState, CacheKind, Mutation};
use crate::view::PriceLevel;

/// Only the best level, as last reported by the venue.
///
/// Every price event replaces the stored level; the venue is trusted to
/// send only top-of-book updates on feeds using this policy.
#[derive(Debug, Clone, Default)]
pub struct TopOfBookBook {
    best: Option<PriceLevel>,
}

impl BookState for TopOfBookBook {
    const KIND: CacheKind = CacheKind::TopOfBook;

    fn empty(_side: BookSide) -> Self {
        Self::default()
    }

    fn apply_price(&mut self, event: &PriceLevelEvent) -> Mutation {
        self.best = Some(PriceLevel::from(event));
        Mutation::Applied
    }

    fn apply_delete(&mut self, item_id: &ItemId) -> Mutation {
        match &self.best {
            Some(best) if &best.item_id == item_id => {
                self.best = None;
                Mutation::Applied
            }
            _ => Mutation::Ignored,
        }
    }

    fn clear(&mut self) {
        self.best = None;
    }

    fn level(&self, rank: usize) -> Option<PriceLevel> {
        if rank == 0 {
            self.best.clone()
        } else {
            None
        }
    }

    fn ordered_levels(&self) -> Vec<PriceLevel> {
        self.best.iter().cloned().collect()
    }

    fn depth(&self) -> usize {
        usize::from(self.best.is_some())
    }
}
