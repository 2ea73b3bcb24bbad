//! Playback of one track run

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use feed_types::ids::{FeedId, MessageId};
use feed_types::messages::{EndUpdate, FeedMessage, NewSnapshotMarker};
use tracing::{debug, error, warn};

use super::task::Task;
use super::track::{MessageStream, StoredMessage, TrackStore, UpdateType};
use super::{ListenerSet, PlayEvent};
use crate::metrics::FabricMetrics;

struct OpenBatch {
    message_id: MessageId,
    snapshot: bool,
    /// Feeds seen in this batch with their item counts, in first-seen order.
    feeds: Vec<(FeedId, u32)>,
    source_timestamp: i64,
}

/// Re-inserts batch boundaries into a stored message sequence.
///
/// Captured sessions hold only book and trade items. A change of message
/// id closes the open batch with one `EndUpdate` per contributing feed; a
/// batch captured as a snapshot is preceded by a `NewSnapshotMarker` for
/// each of its feeds.
#[derive(Default)]
pub(crate) struct BatchTracker {
    open: Option<OpenBatch>,
}

impl BatchTracker {
    pub(crate) fn on_item(&mut self, stored: StoredMessage) -> Vec<FeedMessage> {
        let message = stored.message;
        if !message.is_batch_item() {
            return vec![message];
        }

        let mut out = Vec::new();
        let id = message.message_id();
        if self.open.as_ref().map_or(true, |batch| batch.message_id != id) {
            out.extend(self.close());
        }
        let batch = self.open.get_or_insert_with(|| OpenBatch {
            message_id: id,
            snapshot: stored.update_type == UpdateType::Snapshot,
            feeds: Vec::new(),
            source_timestamp: 0,
        });

        let feed = message.feed_id();
        match batch.feeds.iter_mut().find(|(f, _)| f == feed) {
            Some((_, count)) => *count += 1,
            None => {
                if batch.snapshot {
                    out.push(
                        NewSnapshotMarker {
                            feed_id: feed.clone(),
                            message_id: id,
                        }
                        .into(),
                    );
                }
                batch.feeds.push((feed.clone(), 1));
            }
        }
        if let Some(ts) = message.source_timestamp() {
            batch.source_timestamp = ts;
        }

        out.push(message);
        out
    }

    /// Close the open batch, if any.
    pub(crate) fn close(&mut self) -> Vec<FeedMessage> {
        let Some(batch) = self.open.take() else {
            return Vec::new();
        };
        batch
            .feeds
            .into_iter()
            .map(|(feed_id, item_count)| {
                EndUpdate {
                    feed_id,
                    message_id: batch.message_id,
                    item_count,
                    source_timestamp: batch.source_timestamp,
                }
                .into()
            })
            .collect()
    }
}

pub(crate) struct PlaybackContext {
    pub task: Task,
    pub store: Option<Arc<dyn TrackStore>>,
    pub listeners: Arc<ListenerSet>,
    pub metrics: Arc<FabricMetrics>,
    pub cancel: Arc<AtomicBool>,
    pub pacing: Duration,
    pub emit_latency_offset: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PlaybackOutcome {
    pub messages: u64,
    pub cancelled: bool,
}

fn open_stream(ctx: &PlaybackContext) -> MessageStream {
    let track = &ctx.task.track;
    match &ctx.store {
        None => {
            warn!(track = %track.number, "No track store configured, track is empty");
            Box::new(std::iter::empty())
        }
        Some(store) => match track.open(store.as_ref()) {
            Ok(stream) => stream,
            Err(err) => {
                error!(track = %track.number, context = %track.context, error = %err, "Failed to load track");
                Box::new(std::iter::empty())
            }
        },
    }
}

/// Play one run of the task's track to completion or cancellation.
pub(crate) async fn play_track(ctx: PlaybackContext) -> PlaybackOutcome {
    let track = ctx.task.number();
    let stream = open_stream(&ctx);

    ctx.listeners.connected();
    ctx.listeners
        .emit(&PlayEvent::StartNotify { track }, &ctx.metrics);

    let mut tracker = BatchTracker::default();
    let mut messages = 0u64;
    let mut cancelled = false;
    let mut offset_reported = !ctx.emit_latency_offset;

    for stored in stream {
        if ctx.cancel.load(Ordering::Acquire) {
            cancelled = true;
            break;
        }

        if !offset_reported {
            if let Some(ts) = stored.message.source_timestamp() {
                let offset_ms = Utc::now().timestamp_millis() - ts / 1_000_000;
                ctx.listeners.latency_offset(offset_ms);
                offset_reported = true;
            }
        }

        for message in tracker.on_item(stored) {
            ctx.listeners
                .emit(&PlayEvent::Message { track, message }, &ctx.metrics);
            messages += 1;
        }

        if ctx.task.execute_delay {
            tokio::time::sleep(ctx.pacing).await;
        } else {
            tokio::task::yield_now().await;
        }
    }

    for message in tracker.close() {
        ctx.listeners
            .emit(&PlayEvent::Message { track, message }, &ctx.metrics);
        messages += 1;
    }
    ctx.listeners
        .emit(&PlayEvent::StopPlaying { track }, &ctx.metrics);
    ctx.listeners.disconnected();

    debug!(track = %track, messages, cancelled, "Track run ended");
    PlaybackOutcome {
        messages,
        cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feed_types::ids::ItemId;
    use feed_types::messages::{PriceLevelEvent, TradeEvent};
    use feed_types::numeric::Price;
    use feed_types::side::BookSide;

    fn level(feed: u32, msg: u64, update_type: UpdateType) -> StoredMessage {
        StoredMessage {
            message: PriceLevelEvent {
                feed_id: FeedId::new("F", feed),
                item_id: ItemId::from(format!("q{msg}")),
                price: Price::new(100),
                size: 1.0,
                side: BookSide::Bid,
                message_id: MessageId::new(msg),
                source_timestamp: msg as i64,
            }
            .into(),
            update_type,
        }
    }

    fn labels(messages: &[FeedMessage]) -> Vec<&'static str> {
        messages.iter().map(FeedMessage::kind_label).collect()
    }

    #[test]
    fn test_message_id_change_closes_batch() {
        let mut tracker = BatchTracker::default();
        let mut out = Vec::new();
        out.extend(tracker.on_item(level(1, 1, UpdateType::Incremental)));
        out.extend(tracker.on_item(level(1, 1, UpdateType::Incremental)));
        out.extend(tracker.on_item(level(1, 2, UpdateType::Incremental)));
        out.extend(tracker.close());

        assert_eq!(
            labels(&out),
            vec!["PriceLevel", "PriceLevel", "EndUpdate", "PriceLevel", "EndUpdate"]
        );
        match &out[2] {
            FeedMessage::EndUpdate(end) => {
                assert_eq!(end.message_id, MessageId::new(1));
                assert_eq!(end.item_count, 2);
            }
            other => panic!("expected EndUpdate, got {other:?}"),
        }
    }

    #[test]
    fn test_snapshot_batch_gets_marker_first() {
        let mut tracker = BatchTracker::default();
        let mut out = Vec::new();
        out.extend(tracker.on_item(level(1, 1, UpdateType::Incremental)));
        out.extend(tracker.on_item(level(1, 2, UpdateType::Snapshot)));

        assert_eq!(
            labels(&out),
            vec!["PriceLevel", "EndUpdate", "NewSnapshot", "PriceLevel"]
        );
    }

    #[test]
    fn test_end_update_per_contributing_feed() {
        let mut tracker = BatchTracker::default();
        tracker.on_item(level(1, 7, UpdateType::Incremental));
        tracker.on_item(level(2, 7, UpdateType::Incremental));
        let closing = tracker.close();

        let feeds: Vec<u32> = closing
            .iter()
            .map(|m| m.feed_id().id())
            .collect();
        assert_eq!(feeds, vec![1, 2]);
        assert!(tracker.close().is_empty());
    }

    #[test]
    fn test_trades_share_batch_tracking() {
        let mut tracker = BatchTracker::default();
        let trade = StoredMessage::incremental(TradeEvent {
            feed_id: FeedId::new("F", 1),
            price: Price::new(5),
            size: 1.0,
            side: BookSide::Offer,
            message_id: MessageId::new(3),
            source_timestamp: 3,
        });
        let out = tracker.on_item(trade);
        assert_eq!(labels(&out), vec!["Trade"]);
        assert_eq!(labels(&tracker.close()), vec!["EndUpdate"]);
    }

    #[test]
    fn test_non_batch_items_pass_through() {
        let mut tracker = BatchTracker::default();
        let end = StoredMessage::incremental(EndUpdate {
            feed_id: FeedId::new("F", 1),
            message_id: MessageId::new(1),
            item_count: 0,
            source_timestamp: 0,
        });
        assert_eq!(labels(&tracker.on_item(end)), vec!["EndUpdate"]);
        assert!(tracker.close().is_empty());
    }
}
