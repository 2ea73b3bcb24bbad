//! Market Data Fabric
//!
//! Maintains per-feed order-book caches from a batched price-level
//! protocol, publishes snapshots when a batch commits, derives incremental
//! bid/ask updates for downstream consumers, and replays captured sessions
//! for backtesting.
//!
//! # Architecture
//!
//! ```text
//!   Live feed            Replay Player
//!       │              (tracks, tasks, timers)
//!       │                     │
//!       └────────┬────────────┘
//!                │ FeedMessage
//!        ┌───────▼────────┐
//!        │ FeedDispatcher │  ← routes by feed, checks message order
//!        └───┬────────┬───┘
//!            │        │
//!     ┌──────▼───┐ ┌──▼──────────┐
//!     │CacheSink │ │ SideHandler │ (bid, offer)
//!     └──────┬───┘ └──┬──────────┘
//!            │        │
//!    ┌───────▼──┐ ┌───▼──────────────────────┐
//!    │  Cache   │ │ IncrementalUpdatesEngine │
//!    └───────┬──┘ └───┬──────────────────────┘
//!            │        │
//!  OrderBookSnapshot  IncrementalUpdate
//!   → listeners        → Publisher
//! ```
//!
//! Within one feed, item messages are applied to the caches in arrival
//! order, so cache reads see a batch as it is applied. Snapshots and
//! incremental updates are published only when the batch's `EndUpdate`
//! arrives.

pub mod cache;
pub mod config;
pub mod error;
pub mod incremental;
pub mod ingestion;
pub mod metrics;
pub mod replay;
pub mod snapshot;
pub mod view;

pub use cache::{new_cache, CacheKind, FullDepthCache, OrderBookCache, TopOfBookCache, TradeOnlyCache};
pub use config::{DispatcherConfig, MarketDataConfig, ReplayConfig};
pub use error::{MarketDataError, Result};
pub use incremental::{ChannelPublisher, IncrementalUpdatesEngine, Publisher, SideHandler};
pub use ingestion::{CacheSink, FeedConsumer, FeedDispatcher};
pub use metrics::FabricMetrics;
pub use replay::{ContentListener, PlayEvent, Player, PlayerState};
pub use snapshot::{OrderBookSnapshot, OrderBookSnapshotListener};
pub use view::{BookView, OrderBookView, PriceLevel};

pub const SERVICE_VERSION: &str = "0.1.0";
