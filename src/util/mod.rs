//! Utility functions shared by the upstream-facing components.
//!
//! - **HTTP**: size-capped body reads, browser request headers, base URL joining

mod http;

pub use http::{browser_headers, join_url, read_limited_bytes, BodyError};
