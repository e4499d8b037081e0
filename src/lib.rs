//! Per-channel video feed aggregation.
//!
//! Fetches the Atom feeds of many channels, merges them newest first, and
//! serves the result over HTTP together with a live progress stream.

pub mod config;
pub mod feed;
pub mod progress;
pub mod storage;
pub mod util;
pub mod web;
