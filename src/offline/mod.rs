//! Offline asset cache for the app shell.
//!
//! This module keeps the application's static assets available without a
//! network connection:
//! - Precaches a fixed manifest into a bucket named after the release
//! - Garbage-collects buckets of older releases on activation
//! - Serves documents network-first and other assets cache-first, refreshing
//!   cached assets in the background

mod controller;
mod message;
mod network;
mod request;
mod storage;
mod traits;

pub use controller::{ControllerSettings, OfflineController, UpdateReport, WorkerState};
pub use message::ControlMessage;
pub use network::HttpNetwork;
pub use request::{Request, Response};
pub use storage::{CacheStorage, SqliteCacheStorage};
pub use traits::{CacheSource, FetchOutcome, Network};
