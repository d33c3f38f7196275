//! Tracker scrape clients and the aggregator that races them.
//!
//! HTTP trackers are scraped per BEP 48 and UDP trackers per BEP 15. The
//! aggregator merges embedded trackers with the public list and keeps the
//! first answer.

pub mod aggregator;
pub mod client;
pub mod list;
pub mod protocol;
pub mod types;
pub mod udp;

// Re-export public API
pub use aggregator::{PeerCount, ScrapeError, TrackerScrapeAggregator, dedup_preserving_order};
pub use client::HttpTrackerClient;
pub use list::{TrackerListProvider, parse_tracker_list};
pub use types::{
    NetworkTrackerClients, ScrapeStats, TrackerClient, TrackerClientFactory, TrackerError,
};
pub use udp::UdpTrackerClient;
