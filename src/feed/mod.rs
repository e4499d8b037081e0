//! Channel feeds: parsing, fetching, resolving, and merging.
//!
//! - [`parser`] - Atom/RSS channel feed XML into [`FeedVideo`]s and [`ChannelMeta`]
//! - [`fetcher`] - HTTP retrieval of one channel's feed
//! - [`resolver`] - user input (URL, handle, raw id) to a canonical channel id
//! - [`aggregator`] - bounded worker pool merging many channels, with caching
//!   and request coalescing
//! - [`avatar`] - best-effort channel avatar backfill into the subscription store

mod aggregator;
mod avatar;
mod fetcher;
mod parser;
mod resolver;
mod types;

pub use aggregator::{
    AggregateError, AggregatorConfig, FeedAggregator, FeedItems, DEFAULT_CACHE_TTL,
    DEFAULT_CONCURRENCY,
};
pub use avatar::{extract_avatar_url, AvatarEnricher};
pub use fetcher::{FeedFetcher, FetchError};
pub use parser::{default_thumbnail, parse_channel_feed};
pub use resolver::{
    extract_channel_id, extract_channel_id_from_page, extract_handle, is_channel_id,
    ChannelResolver,
};
pub use types::{ChannelFeed, ChannelMeta, FeedVideo};
