//! Watch feed: filesystem change events, batching, and the notify adapter.

mod events;
mod feed;

pub use events::{ChangeEvent, EventBatcher, WatchConfig};
pub use feed::WatchFeed;
