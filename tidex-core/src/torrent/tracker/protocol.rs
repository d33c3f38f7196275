//! BitTorrent tracker protocol utilities and constants

/// UDP tracker protocol constants (BEP 15)
pub mod udp {
    /// Magic connection id sent with every connect request
    pub const PROTOCOL_ID: u64 = 0x0417_2710_1980;

    pub const ACTION_CONNECT: u32 = 0;
    pub const ACTION_SCRAPE: u32 = 2;
    pub const ACTION_ERROR: u32 = 3;

    /// connection_id + action + transaction_id
    pub const CONNECT_REQUEST_LEN: usize = 16;
    /// action + transaction_id + connection_id
    pub const CONNECT_RESPONSE_LEN: usize = 16;
    /// action + transaction_id
    pub const RESPONSE_HEADER_LEN: usize = 8;
    /// seeders + completed + leechers
    pub const SCRAPE_ENTRY_LEN: usize = 12;

    /// Largest datagram accepted from a tracker
    pub const MAX_PACKET_LEN: usize = 2048;
}

/// URL encoding utilities for tracker communication
pub mod encoding {
    /// Percent-encodes every byte, as trackers expect for binary hashes.
    pub fn url_encode_bytes(bytes: &[u8]) -> String {
        bytes.iter().map(|&b| format!("%{b:02X}")).collect()
    }
}

/// Derives the scrape URL of an HTTP tracker (BEP 48).
///
/// Only a final path segment named `announce` maps to `scrape`; trackers
/// whose announce URL is shaped differently do not support scraping.
pub fn scrape_url_for(announce_url: &str) -> Option<String> {
    let (without_query, query) = match announce_url.split_once('?') {
        Some((base, query)) => (base, Some(query)),
        None => (announce_url, None),
    };

    let slash = without_query.rfind('/')?;
    let last_segment = &without_query[slash + 1..];
    let suffix = last_segment.strip_prefix("announce")?;

    let mut scrape = format!("{}scrape{suffix}", &without_query[..=slash]);
    if let Some(query) = query {
        scrape.push('?');
        scrape.push_str(query);
    }
    Some(scrape)
}
