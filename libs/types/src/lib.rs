//! Message protocol types for the market-data distribution fabric
//!
//! Shared by feed sources (venue adapters, the replay scheduler) and by the
//! consumers that rebuild order books and derive incremental updates.
//!
//! # Modules
//! - `ids`: Feed identity, batch message ids, quote item ids
//! - `numeric`: Fixed-point prices and sizes
//! - `side`: Book sides and their ranking order
//! - `messages`: Inbound protocol messages
//! - `update`: Outbound incremental update
//! - `errors`: Protocol inconsistency taxonomy

pub mod errors;
pub mod ids;
pub mod messages;
pub mod numeric;
pub mod side;
pub mod update;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::errors::*;
    pub use crate::ids::*;
    pub use crate::messages::*;
    pub use crate::numeric::*;
    pub use crate::side::*;
    pub use crate::update::*;
}
