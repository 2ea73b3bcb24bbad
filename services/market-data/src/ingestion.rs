//! Inbound message sink for the market-data fabric
//!
//! Feed sources (venue adapters, the replay player) push protocol messages
//! into a [`FeedDispatcher`], which fans them out to every consumer
//! registered for the message's feed. Consumers are order-book caches
//! (through [`CacheSink`]) and incremental update side handlers.
//!
//! The upstream source serializes messages per feed, so each consumer sees
//! one feed's messages from one thread at a time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use feed_types::errors::ProtocolError;
use feed_types::ids::{FeedId, MessageId};
use feed_types::messages::FeedMessage;
use tracing::{debug, error, trace, warn};

use crate::cache::OrderBookCache;
use crate::config::DispatcherConfig;
use crate::error::{MarketDataError, PublishError, Result};
use crate::metrics::FabricMetrics;
use crate::replay::{ContentListener, PlayEvent};
use crate::view::OrderBookView;

/// Receiver of one feed's protocol stream.
pub trait FeedConsumer: Send + Sync {
    fn feed(&self) -> &FeedId;

    fn consume(&self, message: &FeedMessage) -> Result<()>;
}

/// Applies protocol messages to one order-book cache.
///
/// Price and delete events for the other side are skipped, trades are
/// applied regardless of aggressor side. A new-snapshot marker clears the
/// book so the next batch rebuilds it from scratch.
pub struct CacheSink {
    cache: Arc<dyn OrderBookCache>,
}

impl CacheSink {
    pub fn new(cache: Arc<dyn OrderBookCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<dyn OrderBookCache> {
        &self.cache
    }
}

impl FeedConsumer for CacheSink {
    fn feed(&self) -> &FeedId {
        self.cache.feed()
    }

    fn consume(&self, message: &FeedMessage) -> Result<()> {
        let side = self.cache.side();
        match message {
            FeedMessage::PriceLevel(e) if e.side == side => self.cache.add_price(e),
            FeedMessage::Delete(e) if e.side == side => self.cache.delete_price(e),
            FeedMessage::PriceLevel(_) | FeedMessage::Delete(_) => {}
            FeedMessage::Trade(e) => self.cache.add_trade(e),
            FeedMessage::NewSnapshot(_) => {
                self.cache.clear();
                self.cache.mark_new_snapshot();
            }
            FeedMessage::EndUpdate(end) => {
                if !end.is_mine(self.cache.feed()) {
                    return Ok(());
                }
                if end.item_count == 0 && !self.cache.is_modified() {
                    self.cache.no_updates(end);
                } else {
                    self.cache.commit(end.message_id, end.source_timestamp)?;
                }
            }
        }
        Ok(())
    }
}

/// Outcome of dispatching one message.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Consumers that accepted the message.
    pub delivered: usize,
    /// Failures reported by the remaining consumers.
    pub errors: Vec<MarketDataError>,
}

impl DispatchReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Routes protocol messages to the consumers registered for their feed.
pub struct FeedDispatcher {
    config: DispatcherConfig,
    routes: RwLock<HashMap<FeedId, Vec<Arc<dyn FeedConsumer>>>>,
    last_message: Mutex<HashMap<FeedId, MessageId>>,
    metrics: Arc<FabricMetrics>,
}

impl FeedDispatcher {
    pub fn new(config: DispatcherConfig, metrics: Arc<FabricMetrics>) -> Self {
        Self {
            config,
            routes: RwLock::new(HashMap::new()),
            last_message: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DispatcherConfig::default(), Arc::new(FabricMetrics::new()))
    }

    pub fn register(&self, consumer: Arc<dyn FeedConsumer>) {
        let feed = consumer.feed().clone();
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        let consumers = routes.entry(feed.clone()).or_default();
        consumers.push(consumer);
        debug!(feed = %feed, consumers = consumers.len(), "Registered feed consumer");
    }

    /// Number of consumers registered for `feed`.
    pub fn consumer_count(&self, feed: &FeedId) -> usize {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(feed)
            .map_or(0, Vec::len)
    }

    /// Deliver `message` to every consumer of its feed.
    ///
    /// A failing consumer does not stop delivery to the others.
    pub fn dispatch(&self, message: &FeedMessage) -> DispatchReport {
        let feed = message.feed_id();
        let out_of_order = self.config.check_message_order && self.check_order(message);
        self.metrics.record_dispatch(out_of_order);

        let consumers = self
            .routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(feed)
            .cloned()
            .unwrap_or_default();

        if consumers.is_empty() {
            trace!(feed = %feed, kind = message.kind_label(), "No consumer for feed");
        }

        let mut report = DispatchReport::default();
        for consumer in consumers {
            match consumer.consume(message) {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    error!(
                        feed = %feed,
                        id = %message.message_id(),
                        kind = message.kind_label(),
                        error = %err,
                        "Consumer failed"
                    );
                    report.errors.push(err);
                }
            }
        }
        report
    }

    /// Returns true when the message id went backwards on its feed.
    fn check_order(&self, message: &FeedMessage) -> bool {
        let feed = message.feed_id();
        let received = message.message_id();
        let mut last = self
            .last_message
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        match last.get(feed).copied() {
            Some(previous) if received < previous => {
                let err = ProtocolError::NonMonotonicMessageId {
                    feed: feed.clone(),
                    last: previous,
                    received,
                };
                warn!(error = %err, "Delivering out-of-order message");
                true
            }
            _ => {
                last.insert(feed.clone(), received);
                false
            }
        }
    }
}

impl ContentListener for FeedDispatcher {
    fn on_play(&self, event: &PlayEvent) -> std::result::Result<(), PublishError> {
        if let PlayEvent::Message { message, .. } = event {
            let report = self.dispatch(message);
            if let Some(first) = report.errors.first() {
                return Err(PublishError::Rejected {
                    message_id: message.message_id(),
                    reason: first.to_string(),
                });
            }
        }
        Ok(())
    }
}
