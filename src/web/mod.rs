//! HTTP API over the aggregation engine.
//!
//! - `GET /api/feed?ids=&refresh=true` - merged feed
//! - `GET /api/feed/progress` - progress as server-sent events
//! - `POST /api/subscriptions` - subscribe by URL, handle, or id
//! - `GET /api/subscription-lists` - stored lists

mod error;
mod handlers;
mod router;

pub use error::{ApiError, ErrorBody};
pub use handlers::{AddSubscriptionRequest, AddSubscriptionResponse, AppState, UNRESOLVABLE_INPUT};
pub use router::create_router;
