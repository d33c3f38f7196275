//! HTTP tracker scrape client with URL building and response parsing

use async_trait::async_trait;

use super::protocol::{encoding, scrape_url_for};
use super::types::{ScrapeStats, TrackerClient, TrackerError};
use crate::torrent::InfoHash;

/// HTTP tracker client implementation
pub struct HttpTrackerClient {
    pub(super) announce_url: String,
    pub(super) scrape_url: Option<String>,
    client: reqwest::Client,
}

impl HttpTrackerClient {
    /// Creates HTTP tracker client with automatic scrape URL derivation.
    ///
    /// The scrape URL follows BEP 48: the final `announce` path segment is
    /// replaced with `scrape`. The shared `client` carries timeout and user
    /// agent settings.
    pub fn new(announce_url: String, client: reqwest::Client) -> Self {
        let scrape_url = scrape_url_for(&announce_url);

        Self {
            announce_url,
            scrape_url,
            client,
        }
    }

    /// Build scrape URL for a single torrent
    ///
    /// # Errors
    /// - `TrackerError::Protocol` - Tracker has no scrape convention
    pub(super) fn build_scrape_url(&self, info_hash: &InfoHash) -> Result<String, TrackerError> {
        let scrape_url = self
            .scrape_url
            .as_ref()
            .ok_or_else(|| TrackerError::Protocol {
                message: format!("{} does not support scrape", self.announce_url),
            })?;

        // Query is built by hand so the binary hash is not encoded twice
        let separator = if scrape_url.contains('?') { '&' } else { '?' };
        Ok(format!(
            "{scrape_url}{separator}info_hash={}",
            encoding::url_encode_bytes(info_hash.as_bytes())
        ))
    }

    /// Parse tracker scrape response from bencode data
    pub(super) fn parse_scrape_response(
        &self,
        response_bytes: &[u8],
        info_hash: &InfoHash,
    ) -> Result<ScrapeStats, TrackerError> {
        let parsed =
            bencode_rs::Value::parse(response_bytes).map_err(|e| TrackerError::Protocol {
                message: format!("Failed to parse scrape response: {e:?}"),
            })?;

        let Some(bencode_rs::Value::Dictionary(dict)) = parsed.first() else {
            return Err(TrackerError::Protocol {
                message: "Invalid scrape response format".to_string(),
            });
        };

        if let Some(bencode_rs::Value::Bytes(failure_reason)) =
            dict.get(b"failure reason".as_slice())
        {
            return Err(TrackerError::Protocol {
                message: format!("Scrape error: {}", String::from_utf8_lossy(failure_reason)),
            });
        }

        let Some(bencode_rs::Value::Dictionary(files)) = dict.get(b"files".as_slice()) else {
            return Err(TrackerError::Protocol {
                message: "Scrape response has no files dictionary".to_string(),
            });
        };

        match files.get(info_hash.as_bytes().as_slice()) {
            Some(bencode_rs::Value::Dictionary(file)) => {
                let count = |key: &[u8]| match file.get(key) {
                    Some(bencode_rs::Value::Integer(val)) => {
                        u32::try_from(*val).map_err(|_| TrackerError::Protocol {
                            message: format!(
                                "Invalid {} count in scrape response: {val}",
                                String::from_utf8_lossy(key)
                            ),
                        })
                    }
                    _ => Ok(0),
                };

                Ok(ScrapeStats {
                    complete: count(b"complete")?,
                    downloaded: count(b"downloaded")?,
                    incomplete: count(b"incomplete")?,
                })
            }
            _ => Err(TrackerError::NotTracked {
                url: self.announce_url.clone(),
                info_hash: *info_hash,
            }),
        }
    }

    fn request_error(&self, e: reqwest::Error) -> TrackerError {
        if e.is_timeout() {
            TrackerError::Timeout {
                url: self.announce_url.clone(),
            }
        } else {
            TrackerError::ConnectionFailed {
                url: self.announce_url.clone(),
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl TrackerClient for HttpTrackerClient {
    /// Retrieves torrent statistics from tracker without announcing.
    ///
    /// # Errors
    /// - `TrackerError::ConnectionFailed` - Network error
    /// - `TrackerError::Timeout` - No reply within the client timeout
    /// - `TrackerError::ServerError` - Non-success HTTP status
    /// - `TrackerError::Protocol` - Invalid scrape response format
    /// - `TrackerError::NotTracked` - Reply does not mention the torrent
    async fn scrape(&self, info_hash: &InfoHash) -> Result<ScrapeStats, TrackerError> {
        let url = self.build_scrape_url(info_hash)?;

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(
                tracker = %self.announce_url,
                status = status.as_u16(),
                "Tracker scrape returned error status"
            );
            return Err(TrackerError::ServerError {
                url: self.announce_url.clone(),
                status: status.as_u16(),
            });
        }

        let response_bytes = response.bytes().await.map_err(|e| self.request_error(e))?;

        self.parse_scrape_response(&response_bytes, info_hash)
    }

    /// Returns tracker URL for debugging and logging purposes.
    fn tracker_url(&self) -> &str {
        &self.announce_url
    }
}
