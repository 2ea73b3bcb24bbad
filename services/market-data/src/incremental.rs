//! Incremental update synthesis
//!
//! Bid and offer changes of one feed update cycle arrive on two independent
//! sub-streams. Each side has a [`SideHandler`] feeding a shared
//! [`IncrementalUpdatesEngine`]; the engine emits one [`IncrementalUpdate`]
//! per cycle once both sides have committed.
//!
//! Flow per cycle:
//! 1. handlers forward adds and deletes into the accumulator
//! 2. each handler commits when its feed's `EndUpdate` arrives
//! 3. the second commit emits the update (if anything changed) and resets
//!    the accumulator
//! 4. the handler that received the update hands it to the [`Publisher`]

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use feed_types::ids::{FeedId, ItemId, MessageId};
use feed_types::messages::FeedMessage;
use feed_types::numeric::{Price, Size};
use feed_types::side::BookSide;
use feed_types::update::IncrementalUpdate;
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

use crate::error::{HandlerError, PublishError};
use crate::ingestion::FeedConsumer;
use crate::metrics::FabricMetrics;

/// Added levels of one side, as parallel arrays.
#[derive(Debug, Default)]
struct SideArrays {
    ids: Vec<ItemId>,
    prices: Vec<Price>,
    sizes: Vec<Size>,
}

impl SideArrays {
    fn push(&mut self, id: ItemId, price: Price, size: Size) {
        self.ids.push(id);
        self.prices.push(price);
        self.sizes.push(size);
    }

    fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[derive(Debug, Default)]
struct Accumulator {
    sides: [SideArrays; 2],
    deleted_ids: Vec<ItemId>,
    is_new_snapshot: bool,
    committed: [bool; 2],
}

impl Accumulator {
    fn has_changes(&self) -> bool {
        !self.sides[0].is_empty() || !self.sides[1].is_empty() || !self.deleted_ids.is_empty()
    }

    /// Clear levels and commit flags; the snapshot flag survives until emitted.
    fn reset_cycle(&mut self) {
        self.sides = Default::default();
        self.deleted_ids.clear();
        self.committed = [false; 2];
    }

    fn drain(&mut self, product_code: &str, message_id: MessageId) -> IncrementalUpdate {
        let [bids, asks] = std::mem::take(&mut self.sides);
        let update = IncrementalUpdate {
            message_id,
            product_code: product_code.to_string(),
            added_bid_ids: bids.ids,
            added_bid_prices: bids.prices,
            added_bid_sizes: bids.sizes,
            added_ask_ids: asks.ids,
            added_ask_prices: asks.prices,
            added_ask_sizes: asks.sizes,
            deleted_ids: std::mem::take(&mut self.deleted_ids),
            is_new_snapshot: self.is_new_snapshot,
        };
        self.is_new_snapshot = false;
        self.committed = [false; 2];
        update
    }
}

/// Two-sided barrier that coalesces one update cycle into one message.
///
/// All operations serialize on one mutex, so near-simultaneous commits from
/// the bid and offer handlers cannot both miss the barrier.
#[derive(Debug, Default)]
pub struct IncrementalUpdatesEngine {
    state: Mutex<Accumulator>,
}

impl IncrementalUpdatesEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Accumulator> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_bid_price(&self, id: ItemId, price: Price, size: Size) {
        self.add_price(BookSide::Bid, id, price, size);
    }

    pub fn add_ask_price(&self, id: ItemId, price: Price, size: Size) {
        self.add_price(BookSide::Offer, id, price, size);
    }

    pub fn add_price(&self, side: BookSide, id: ItemId, price: Price, size: Size) {
        self.lock().sides[side.index()].push(id, price, size);
    }

    /// Record a deleted item. Deletes are not segregated by side.
    pub fn delete_price(&self, id: ItemId) {
        self.lock().deleted_ids.push(id);
    }

    /// Latch the snapshot flag until the next emitted update.
    pub fn set_new_snapshot(&self, is_new_snapshot: bool) {
        self.lock().is_new_snapshot = is_new_snapshot;
    }

    /// Mark `side` committed for the open cycle.
    ///
    /// Returns the update once both sides have committed and something
    /// changed. A cycle committed by both sides without changes is discarded.
    pub fn commit(
        &self,
        product_code: &str,
        message_id: MessageId,
        side: BookSide,
    ) -> Option<IncrementalUpdate> {
        let mut acc = self.lock();
        acc.committed[side.index()] = true;

        if !acc.committed.iter().all(|c| *c) {
            trace!(product = product_code, id = %message_id, side = %side, "Waiting for other side");
            return None;
        }

        if !acc.has_changes() {
            debug!(product = product_code, id = %message_id, "Cycle committed without changes");
            acc.reset_cycle();
            return None;
        }

        Some(acc.drain(product_code, message_id))
    }

    /// Whether `side` already committed in the open cycle.
    pub fn is_committed(&self, side: BookSide) -> bool {
        self.lock().committed[side.index()]
    }
}

/// Downstream sink for incremental updates.
pub trait Publisher: Send + Sync {
    fn publish(&self, update: IncrementalUpdate) -> Result<(), PublishError>;
}

/// Publisher backed by an unbounded tokio channel.
pub struct ChannelPublisher {
    tx: mpsc::UnboundedSender<IncrementalUpdate>,
}

impl ChannelPublisher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<IncrementalUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Publisher for ChannelPublisher {
    fn publish(&self, update: IncrementalUpdate) -> Result<(), PublishError> {
        self.tx.send(update).map_err(|_| PublishError::ChannelClosed)
    }
}

/// Feeds one side of one feed into the shared engine.
pub struct SideHandler {
    feed: FeedId,
    side: BookSide,
    product_code: String,
    engine: Arc<IncrementalUpdatesEngine>,
    publisher: Arc<dyn Publisher>,
    metrics: Option<Arc<FabricMetrics>>,
}

impl SideHandler {
    pub fn new(
        feed: FeedId,
        side: BookSide,
        product_code: impl Into<String>,
        engine: Arc<IncrementalUpdatesEngine>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            feed,
            side,
            product_code: product_code.into(),
            engine,
            publisher,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<FabricMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn side(&self) -> BookSide {
        self.side
    }

    /// Apply one protocol message; publishes when the cycle completes.
    pub fn handle(&self, message: &FeedMessage) -> Result<(), HandlerError> {
        if message.feed_id() != &self.feed {
            return Ok(());
        }

        match message {
            FeedMessage::PriceLevel(e) if e.side == self.side => {
                self.engine
                    .add_price(self.side, e.item_id.clone(), e.price, e.size);
            }
            FeedMessage::Delete(e) if e.side == self.side => {
                self.engine.delete_price(e.item_id.clone());
            }
            FeedMessage::NewSnapshot(_) => self.engine.set_new_snapshot(true),
            FeedMessage::EndUpdate(end) if end.is_mine(&self.feed) => {
                if let Some(update) =
                    self.engine
                        .commit(&self.product_code, end.message_id, self.side)
                {
                    return self.publish(update);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn publish(&self, update: IncrementalUpdate) -> Result<(), HandlerError> {
        let message_id = update.message_id;
        let changes = update.change_count();
        match self.publisher.publish(update) {
            Ok(()) => {
                debug!(product = %self.product_code, id = %message_id, changes, "Published incremental update");
                if let Some(metrics) = &self.metrics {
                    metrics.record_incremental_published();
                }
                Ok(())
            }
            Err(source) => {
                error!(product = %self.product_code, id = %message_id, error = %source, "Incremental update lost");
                if let Some(metrics) = &self.metrics {
                    metrics.record_publish_failure();
                }
                Err(HandlerError::Publish { message_id, source })
            }
        }
    }
}

impl FeedConsumer for SideHandler {
    fn feed(&self) -> &FeedId {
        &self.feed
    }

    fn consume(&self, message: &FeedMessage) -> crate::error::Result<()> {
        self.handle(message)?;
        Ok(())
    }
}

/// Build the bid and offer handlers sharing `engine`.
pub fn side_handlers(
    product_code: &str,
    bid_feed: FeedId,
    offer_feed: FeedId,
    engine: Arc<IncrementalUpdatesEngine>,
    publisher: Arc<dyn Publisher>,
) -> (SideHandler, SideHandler) {
    let bid = SideHandler::new(
        bid_feed,
        BookSide::Bid,
        product_code,
        Arc::clone(&engine),
        Arc::clone(&publisher),
    );
    let offer = SideHandler::new(offer_feed, BookSide::Offer, product_code, engine, publisher);
    (bid, offer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use feed_types::messages::{DeleteEvent, EndUpdate, NewSnapshotMarker, PriceLevelEvent};

    fn engine_with_changes() -> IncrementalUpdatesEngine {
        let engine = IncrementalUpdatesEngine::new();
        engine.add_bid_price(ItemId::from("b1"), Price::new(100), 1.0);
        engine.add_ask_price(ItemId::from("a1"), Price::new(101), 2.0);
        engine.delete_price(ItemId::from("b0"));
        engine
    }

    #[test]
    fn test_barrier_waits_for_both_sides() {
        let engine = engine_with_changes();

        assert!(engine.commit("BTCUSD", MessageId::new(1), BookSide::Bid).is_none());
        assert!(engine.is_committed(BookSide::Bid));
        let update = engine
            .commit("BTCUSD", MessageId::new(1), BookSide::Offer)
            .unwrap();

        assert_eq!(update.product_code, "BTCUSD");
        assert_eq!(update.added_bid_ids, vec![ItemId::from("b1")]);
        assert_eq!(update.added_ask_prices, vec![Price::new(101)]);
        assert_eq!(update.deleted_ids, vec![ItemId::from("b0")]);
        assert!(update.is_well_formed());
        assert!(!engine.is_committed(BookSide::Bid));
    }

    #[test]
    fn test_commit_order_does_not_matter() {
        let a = engine_with_changes();
        a.commit("X", MessageId::new(5), BookSide::Bid);
        let first = a.commit("X", MessageId::new(5), BookSide::Offer).unwrap();

        let b = engine_with_changes();
        b.commit("X", MessageId::new(5), BookSide::Offer);
        let second = b.commit("X", MessageId::new(5), BookSide::Bid).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_unchanged_cycle_is_suppressed() {
        let engine = IncrementalUpdatesEngine::new();
        assert!(engine.commit("X", MessageId::new(1), BookSide::Bid).is_none());
        assert!(engine.commit("X", MessageId::new(1), BookSide::Offer).is_none());
        assert!(!engine.is_committed(BookSide::Bid));
        assert!(!engine.is_committed(BookSide::Offer));
    }

    #[test]
    fn test_accumulator_cleared_after_emission() {
        let engine = engine_with_changes();
        engine.commit("X", MessageId::new(1), BookSide::Bid);
        engine.commit("X", MessageId::new(1), BookSide::Offer).unwrap();

        engine.commit("X", MessageId::new(2), BookSide::Bid);
        assert!(engine.commit("X", MessageId::new(2), BookSide::Offer).is_none());
    }

    #[test]
    fn test_new_snapshot_latched_until_emitted() {
        let engine = IncrementalUpdatesEngine::new();
        engine.set_new_snapshot(true);
        engine.commit("X", MessageId::new(1), BookSide::Bid);
        assert!(engine.commit("X", MessageId::new(1), BookSide::Offer).is_none());

        engine.add_bid_price(ItemId::from("b"), Price::new(1), 1.0);
        engine.commit("X", MessageId::new(2), BookSide::Bid);
        let update = engine.commit("X", MessageId::new(2), BookSide::Offer).unwrap();
        assert!(update.is_new_snapshot);

        engine.add_bid_price(ItemId::from("c"), Price::new(2), 1.0);
        engine.commit("X", MessageId::new(3), BookSide::Bid);
        let update = engine.commit("X", MessageId::new(3), BookSide::Offer).unwrap();
        assert!(!update.is_new_snapshot);
    }

    struct FailingPublisher;

    impl Publisher for FailingPublisher {
        fn publish(&self, update: IncrementalUpdate) -> Result<(), PublishError> {
            Err(PublishError::Rejected {
                message_id: update.message_id,
                reason: "downstream offline".to_string(),
            })
        }
    }

    fn bid_feed() -> FeedId {
        FeedId::new("VENUE:BTCUSD:BID", 1)
    }

    fn offer_feed() -> FeedId {
        FeedId::new("VENUE:BTCUSD:ASK", 2)
    }

    fn add(feed: FeedId, id: &str, side: BookSide, msg: u64) -> FeedMessage {
        PriceLevelEvent {
            feed_id: feed,
            item_id: ItemId::from(id),
            price: Price::new(100),
            size: 1.0,
            side,
            message_id: MessageId::new(msg),
            source_timestamp: 0,
        }
        .into()
    }

    fn end(feed: FeedId, msg: u64) -> FeedMessage {
        EndUpdate {
            feed_id: feed,
            message_id: MessageId::new(msg),
            item_count: 1,
            source_timestamp: 0,
        }
        .into()
    }

    #[test]
    fn test_handlers_publish_one_update_per_cycle() {
        let (publisher, mut rx) = ChannelPublisher::new();
        let engine = Arc::new(IncrementalUpdatesEngine::new());
        let (bid, offer) =
            side_handlers("BTCUSD", bid_feed(), offer_feed(), engine, Arc::new(publisher));

        bid.handle(&NewSnapshotMarker { feed_id: bid_feed(), message_id: MessageId::new(1) }.into())
            .unwrap();
        bid.handle(&add(bid_feed(), "b1", BookSide::Bid, 1)).unwrap();
        offer.handle(&add(offer_feed(), "a1", BookSide::Offer, 1)).unwrap();
        // Events of the other side are filtered out.
        bid.handle(&add(bid_feed(), "x", BookSide::Offer, 1)).unwrap();
        offer
            .handle(
                &DeleteEvent {
                    feed_id: offer_feed(),
                    item_id: ItemId::from("a0"),
                    side: BookSide::Offer,
                    message_id: MessageId::new(1),
                    source_timestamp: 0,
                }
                .into(),
            )
            .unwrap();

        offer.handle(&end(offer_feed(), 1)).unwrap();
        assert!(rx.try_recv().is_err());
        bid.handle(&end(bid_feed(), 1)).unwrap();

        let update = rx.try_recv().unwrap();
        assert_eq!(update.added_bid_ids, vec![ItemId::from("b1")]);
        assert_eq!(update.added_ask_ids, vec![ItemId::from("a1")]);
        assert_eq!(update.deleted_ids, vec![ItemId::from("a0")]);
        assert!(update.is_new_snapshot);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_end_update_of_other_feed_does_not_commit() {
        let (publisher, _rx) = ChannelPublisher::new();
        let engine = Arc::new(IncrementalUpdatesEngine::new());
        let (bid, _offer) =
            side_handlers("BTCUSD", bid_feed(), offer_feed(), Arc::clone(&engine), Arc::new(publisher));

        bid.handle(&end(offer_feed(), 1)).unwrap();
        assert!(!engine.is_committed(BookSide::Bid));
    }

    #[test]
    fn test_publish_failure_is_reported_and_not_rolled_back() {
        let metrics = Arc::new(FabricMetrics::new());
        let engine = Arc::new(IncrementalUpdatesEngine::new());
        let (bid, offer) = side_handlers(
            "BTCUSD",
            bid_feed(),
            offer_feed(),
            Arc::clone(&engine),
            Arc::new(FailingPublisher),
        );
        let bid = bid.with_metrics(Arc::clone(&metrics));

        bid.handle(&add(bid_feed(), "b1", BookSide::Bid, 1)).unwrap();
        offer.handle(&end(offer_feed(), 1)).unwrap();
        let err = bid.handle(&end(bid_feed(), 1)).unwrap_err();

        assert!(matches!(err, HandlerError::Publish { message_id, .. } if message_id == MessageId::new(1)));
        assert_eq!(metrics.export()["publish_failures"], 1);
        // Accumulator already advanced.
        engine.commit("BTCUSD", MessageId::new(2), BookSide::Bid);
        assert!(engine.commit("BTCUSD", MessageId::new(2), BookSide::Offer).is_none());
    }

    #[test]
    fn test_closed_channel_reports_publish_error() {
        let (publisher, rx) = ChannelPublisher::new();
        drop(rx);
        let err = publisher
            .publish(IncrementalUpdate {
                message_id: MessageId::new(1),
                product_code: "X".to_string(),
                added_bid_ids: vec![],
                added_bid_prices: vec![],
                added_bid_sizes: vec![],
                added_ask_ids: vec![],
                added_ask_prices: vec![],
                added_ask_sizes: vec![],
                deleted_ids: vec![],
                is_new_snapshot: false,
            })
            .unwrap_err();
        assert_eq!(err, PublishError::ChannelClosed);
    }
}
