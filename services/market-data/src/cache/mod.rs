//! Order-book caches
//!
//! A cache holds the current state of one side of one feed's book. Feed
//! events mutate it, `commit` publishes the state accumulated since the
//! previous commit to every registered listener.
//!
//! Three storage policies share one implementation, [`Cache`], and differ
//! only in their [`BookState`]:
//! - [`FullDepthBook`]: every level keyed by item id, one level per price
//! - [`TopOfBookBook`]: only the most recent best level
//! - [`TradeOnlyBook`]: no levels, trades only
//!
//! Locking: mutators and the snapshot capture in `commit` take the state
//! write lock. Listeners are invoked after the lock is released, so a
//! listener may read the cache it is notified about.

mod full_depth;
mod top_of_book;
mod trade_only;

pub use full_depth::FullDepthBook;
pub use top_of_book::TopOfBookBook;
pub use trade_only::TradeOnlyBook;

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use feed_types::errors::ProtocolError;
use feed_types::ids::{FeedId, ItemId, MessageId};
use feed_types::messages::{DeleteEvent, EndUpdate, PriceLevelEvent, TradeEvent};
use feed_types::side::BookSide;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::error::{CommitError, ListenerError};
use crate::metrics::FabricMetrics;
use crate::snapshot::{OrderBookSnapshot, OrderBookSnapshotListener};
use crate::view::{BookView, LastTrade, OrderBookView, PriceLevel, RankedLevel};

/// Storage policy of a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKind {
    FullDepth,
    TopOfBook,
    TradeOnly,
}

/// What a book did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    /// State changed.
    Applied,
    /// The policy does not store this kind of event.
    Ignored,
    /// The event referenced an item the book does not hold.
    Unknown,
}

/// Level storage behind a [`Cache`].
///
/// Implementations are plain data; all synchronisation lives in the cache.
pub trait BookState: Send + Sync + 'static {
    const KIND: CacheKind;

    fn empty(side: BookSide) -> Self;

    fn apply_price(&mut self, event: &PriceLevelEvent) -> Mutation;

    fn apply_delete(&mut self, item_id: &ItemId) -> Mutation;

    fn clear(&mut self);

    fn level(&self, rank: usize) -> Option<PriceLevel>;

    /// Levels best first.
    fn ordered_levels(&self) -> Vec<PriceLevel>;

    fn depth(&self) -> usize;
}

/// Mutable, committable book for one side of one feed.
pub trait OrderBookCache: OrderBookView + Send + Sync {
    fn kind(&self) -> CacheKind;

    fn add_price(&self, event: &PriceLevelEvent);

    fn add_trade(&self, event: &TradeEvent);

    fn delete_price(&self, event: &DeleteEvent);

    /// Drop every level and the last trade.
    fn clear(&self);

    /// Flag the next committed snapshot as a full rebuild.
    fn mark_new_snapshot(&self);

    /// Publish the accumulated state.
    ///
    /// When the cache was modified since the previous commit, listeners get
    /// `on_new_snapshot` first. Every listener always gets `on_end_update`.
    fn commit(&self, message_id: MessageId, source_timestamp: i64) -> Result<(), CommitError>;

    /// Forward a feed-wide end-of-update that carried nothing for this cache.
    fn no_updates(&self, end: &EndUpdate);

    /// Whether a mutation was applied since the last commit.
    fn is_modified(&self) -> bool;

    fn add_listener(&self, listener: Arc<dyn OrderBookSnapshotListener>);
}

struct CacheState<B> {
    book: B,
    trade: Option<LastTrade>,
    modified: bool,
    new_snapshot: bool,
    source_timestamp: i64,
}

impl<B> CacheState<B> {
    fn touch(&mut self, feed: &FeedId, source_timestamp: i64) {
        if source_timestamp < self.source_timestamp {
            debug!(
                feed = %feed,
                previous = self.source_timestamp,
                received = source_timestamp,
                "Source timestamp went backwards"
            );
        }
        self.source_timestamp = source_timestamp;
        self.modified = true;
    }
}

/// Order-book cache parameterised by its storage policy.
pub struct Cache<B: BookState> {
    feed: FeedId,
    side: BookSide,
    state: RwLock<CacheState<B>>,
    listeners: RwLock<Vec<Arc<dyn OrderBookSnapshotListener>>>,
    metrics: Option<Arc<FabricMetrics>>,
}

pub type FullDepthCache = Cache<FullDepthBook>;
pub type TopOfBookCache = Cache<TopOfBookBook>;
pub type TradeOnlyCache = Cache<TradeOnlyBook>;

impl<B: BookState> Cache<B> {
    pub fn new(feed: FeedId, side: BookSide) -> Self {
        Self {
            feed,
            side,
            state: RwLock::new(CacheState {
                book: B::empty(side),
                trade: None,
                modified: false,
                new_snapshot: false,
                source_timestamp: 0,
            }),
            listeners: RwLock::new(Vec::new()),
            metrics: None,
        }
    }

    /// Attach shared metrics.
    pub fn with_metrics(mut self, metrics: Arc<FabricMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState<B>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState<B>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn listeners(&self) -> Vec<Arc<dyn OrderBookSnapshotListener>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn accepts(&self, feed: &FeedId, side: Option<BookSide>) -> bool {
        if feed != &self.feed {
            let err = ProtocolError::ForeignFeed {
                expected: self.feed.clone(),
                received: feed.clone(),
            };
            warn!(error = %err, "Dropping event");
            return false;
        }
        if let Some(side) = side {
            if side != self.side {
                let err = ProtocolError::SideMismatch {
                    feed: self.feed.clone(),
                    expected: self.side,
                    received: side,
                };
                warn!(error = %err, "Dropping event");
                return false;
            }
        }
        true
    }

    fn publish(
        &self,
        message_id: MessageId,
        snapshot: Option<&OrderBookSnapshot>,
        was_modified: bool,
    ) -> Result<(), CommitError> {
        let listeners = self.listeners();
        let abort = |source: ListenerError| {
            if let Some(metrics) = &self.metrics {
                metrics.record_listener_failure();
            }
            warn!(feed = %self.feed, side = %self.side, id = %message_id, error = %source, "Listener failed, commit notifications aborted");
            CommitError::Listener {
                snapshot_id: message_id,
                source,
            }
        };

        if let Some(snapshot) = snapshot {
            for listener in &listeners {
                listener.on_new_snapshot(snapshot).map_err(&abort)?;
            }
        }
        for listener in &listeners {
            listener
                .on_end_update(self, message_id, was_modified)
                .map_err(&abort)?;
        }
        Ok(())
    }
}

impl<B: BookState> OrderBookView for Cache<B> {
    fn feed(&self) -> &FeedId {
        &self.feed
    }

    fn side(&self) -> BookSide {
        self.side
    }

    fn level(&self, rank: usize) -> Option<PriceLevel> {
        self.read().book.level(rank)
    }

    fn all_levels(&self) -> Vec<RankedLevel> {
        self.read()
            .book
            .ordered_levels()
            .into_iter()
            .enumerate()
            .map(|(rank, level)| RankedLevel { rank, level })
            .collect()
    }

    fn trade(&self) -> Option<LastTrade> {
        self.read().trade.clone()
    }

    fn source_timestamp(&self) -> i64 {
        self.read().source_timestamp
    }

    fn depth(&self) -> usize {
        self.read().book.depth()
    }
}

impl<B: BookState> OrderBookCache for Cache<B> {
    fn kind(&self) -> CacheKind {
        B::KIND
    }

    fn add_price(&self, event: &PriceLevelEvent) {
        if !self.accepts(&event.feed_id, Some(event.side)) {
            return;
        }
        let mut state = self.write();
        match state.book.apply_price(event) {
            Mutation::Applied => state.touch(&self.feed, event.source_timestamp),
            Mutation::Ignored | Mutation::Unknown => {
                trace!(feed = %self.feed, item = %event.item_id, "Price event not stored");
            }
        }
    }

    fn add_trade(&self, event: &TradeEvent) {
        if !self.accepts(&event.feed_id, None) {
            return;
        }
        let mut state = self.write();
        state.trade = Some(LastTrade::from(event));
        state.touch(&self.feed, event.source_timestamp);
    }

    fn delete_price(&self, event: &DeleteEvent) {
        if !self.accepts(&event.feed_id, Some(event.side)) {
            return;
        }
        let mut state = self.write();
        match state.book.apply_delete(&event.item_id) {
            Mutation::Applied => state.touch(&self.feed, event.source_timestamp),
            Mutation::Ignored => {
                trace!(feed = %self.feed, item = %event.item_id, "Delete not stored");
            }
            Mutation::Unknown => {
                let err = ProtocolError::UnknownItem {
                    feed: self.feed.clone(),
                    item_id: event.item_id.clone(),
                };
                warn!(error = %err, "Ignoring delete");
            }
        }
    }

    fn clear(&self) {
        let mut state = self.write();
        state.book.clear();
        state.trade = None;
        state.modified = true;
    }

    fn mark_new_snapshot(&self) {
        self.write().new_snapshot = true;
    }

    fn commit(&self, message_id: MessageId, source_timestamp: i64) -> Result<(), CommitError> {
        let started = Instant::now();

        let snapshot = {
            let mut state = self.write();
            if state.modified {
                let view = BookView::from_ordered(
                    self.feed.clone(),
                    self.side,
                    state.book.ordered_levels(),
                    state.trade.clone(),
                    state.source_timestamp,
                );
                state.modified = false;
                let is_full = std::mem::take(&mut state.new_snapshot);
                Some(OrderBookSnapshot::new(message_id, is_full, source_timestamp, view))
            } else {
                None
            }
        };
        let was_modified = snapshot.is_some();

        debug!(
            feed = %self.feed,
            side = %self.side,
            id = %message_id,
            modified = was_modified,
            "Committing"
        );
        let result = self.publish(message_id, snapshot.as_ref(), was_modified);

        if let Some(metrics) = &self.metrics {
            metrics.record_commit(was_modified, started.elapsed().as_nanos() as u64);
        }
        result
    }

    fn no_updates(&self, end: &EndUpdate) {
        if !end.is_mine(&self.feed) {
            trace!(feed = %self.feed, other = %end.feed_id, "End-of-update for another feed");
            return;
        }
        for listener in self.listeners() {
            listener.on_no_update(end.message_id);
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_no_update();
        }
    }

    fn is_modified(&self) -> bool {
        self.read().modified
    }

    fn add_listener(&self, listener: Arc<dyn OrderBookSnapshotListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }
}

/// Build a cache of the given policy behind a trait object.
pub fn new_cache(
    kind: CacheKind,
    feed: FeedId,
    side: BookSide,
    metrics: Option<Arc<FabricMetrics>>,
) -> Arc<dyn OrderBookCache> {
    fn build<B: BookState>(
        feed: FeedId,
        side: BookSide,
        metrics: Option<Arc<FabricMetrics>>,
    ) -> Arc<dyn OrderBookCache> {
        let cache = Cache::<B>::new(feed, side);
        match metrics {
            Some(metrics) => Arc::new(cache.with_metrics(metrics)),
            None => Arc::new(cache),
        }
    }

    match kind {
        CacheKind::FullDepth => build::<FullDepthBook>(feed, side, metrics),
        CacheKind::TopOfBook => build::<TopOfBookBook>(feed, side, metrics),
        CacheKind::TradeOnly => build::<TradeOnlyBook>(feed, side, metrics),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Mutex;

    use feed_types::numeric::Price;

    use super::*;

    pub fn feed() -> FeedId {
        FeedId::new("TEST:BTCUSD", 1)
    }

    pub fn price(id: &str, price: i64, side: BookSide, msg: u64) -> PriceLevelEvent {
        PriceLevelEvent {
            feed_id: feed(),
            item_id: ItemId::from(id),
            price: Price::new(price),
            size: 1.0,
            side,
            message_id: MessageId::new(msg),
            source_timestamp: msg as i64 * 1_000,
        }
    }

    pub fn delete(id: &str, side: BookSide, msg: u64) -> DeleteEvent {
        DeleteEvent {
            feed_id: feed(),
            item_id: ItemId::from(id),
            side,
            message_id: MessageId::new(msg),
            source_timestamp: msg as i64 * 1_000,
        }
    }

    pub fn trade(price: i64, msg: u64) -> TradeEvent {
        TradeEvent {
            feed_id: feed(),
            price: Price::new(price),
            size: 0.5,
            side: BookSide::Bid,
            message_id: MessageId::new(msg),
            source_timestamp: msg as i64 * 1_000,
        }
    }

    /// Records every callback; optionally fails snapshot delivery.
    #[derive(Default)]
    pub struct RecordingListener {
        pub snapshots: Mutex<Vec<OrderBookSnapshot>>,
        pub end_updates: Mutex<Vec<(MessageId, bool)>>,
        pub no_updates: Mutex<Vec<MessageId>>,
        pub fail_snapshots: bool,
    }

    impl RecordingListener {
        pub fn failing() -> Self {
            Self {
                fail_snapshots: true,
                ..Self::default()
            }
        }
    }

    impl OrderBookSnapshotListener for RecordingListener {
        fn on_new_snapshot(&self, snapshot: &OrderBookSnapshot) -> Result<(), ListenerError> {
            if self.fail_snapshots {
                return Err(ListenerError::new("recorder", "rejected"));
            }
            self.snapshots.lock().unwrap().push(snapshot.clone());
            Ok(())
        }

        fn on_end_update(
            &self,
            cache: &dyn OrderBookCache,
            id: MessageId,
            was_modified: bool,
        ) -> Result<(), ListenerError> {
            // The cache lock is released before callbacks run.
            let _ = cache.depth();
            self.end_updates.lock().unwrap().push((id, was_modified));
            Ok(())
        }

        fn on_no_update(&self, id: MessageId) {
            self.no_updates.lock().unwrap().push(id);
        }
    }
}
