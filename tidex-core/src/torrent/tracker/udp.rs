//! UDP tracker scrape client (BEP 15)

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::net::UdpSocket;
use tokio::time::timeout;

use super::protocol::udp::{
    ACTION_CONNECT, ACTION_ERROR, ACTION_SCRAPE, CONNECT_REQUEST_LEN, CONNECT_RESPONSE_LEN,
    MAX_PACKET_LEN, PROTOCOL_ID, RESPONSE_HEADER_LEN, SCRAPE_ENTRY_LEN,
};
use super::types::{ScrapeStats, TrackerClient, TrackerError};
use crate::torrent::InfoHash;

/// Scrape client for `udp://host:port` trackers.
pub struct UdpTrackerClient {
    tracker_url: String,
    host_port: String,
    timeout: Duration,
}

impl UdpTrackerClient {
    /// # Errors
    ///
    /// - `TrackerError::InvalidUrl` - If the URL lacks a host or port
    pub fn new(tracker_url: String, timeout: Duration) -> Result<Self, TrackerError> {
        let invalid = |reason: &str| TrackerError::InvalidUrl {
            url: tracker_url.clone(),
            reason: reason.to_string(),
        };

        let parsed = url::Url::parse(&tracker_url).map_err(|e| invalid(&e.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| invalid("missing host"))?;
        let port = parsed.port().ok_or_else(|| invalid("missing port"))?;
        let host_port = format!("{host}:{port}");

        Ok(Self {
            tracker_url,
            host_port,
            timeout,
        })
    }

    async fn resolve(&self) -> Result<SocketAddr, TrackerError> {
        tokio::net::lookup_host(&self.host_port)
            .await
            .map_err(|e| self.connection_failed(format!("resolve failed: {e}")))?
            .next()
            .ok_or_else(|| self.connection_failed("no addresses found".to_string()))
    }

    async fn exchange(
        &self,
        socket: &UdpSocket,
        request: &[u8],
        buffer: &mut [u8],
    ) -> Result<usize, TrackerError> {
        socket
            .send(request)
            .await
            .map_err(|e| self.connection_failed(format!("send failed: {e}")))?;

        timeout(self.timeout, socket.recv(buffer))
            .await
            .map_err(|_| TrackerError::Timeout {
                url: self.tracker_url.clone(),
            })?
            .map_err(|e| self.connection_failed(format!("receive failed: {e}")))
    }

    fn connection_failed(&self, reason: String) -> TrackerError {
        TrackerError::ConnectionFailed {
            url: self.tracker_url.clone(),
            reason,
        }
    }
}

#[async_trait]
impl TrackerClient for UdpTrackerClient {
    async fn scrape(&self, info_hash: &InfoHash) -> Result<ScrapeStats, TrackerError> {
        let addr = self.resolve().await?;
        let bind_addr = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };

        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| self.connection_failed(format!("bind failed: {e}")))?;
        socket
            .connect(addr)
            .await
            .map_err(|e| self.connection_failed(format!("connect failed: {e}")))?;

        let mut buffer = [0u8; MAX_PACKET_LEN];

        let transaction_id: u32 = rand::random();
        let len = self
            .exchange(&socket, &connect_request(transaction_id), &mut buffer)
            .await?;
        let connection_id = parse_connect_response(&buffer[..len], transaction_id)?;

        let transaction_id: u32 = rand::random();
        let request = scrape_request(connection_id, transaction_id, info_hash);
        let len = self.exchange(&socket, &request, &mut buffer).await?;
        let stats = parse_scrape_response(&buffer[..len], transaction_id)?;

        tracing::trace!(
            tracker = %self.tracker_url,
            seeders = stats.complete,
            leechers = stats.incomplete,
            "UDP scrape succeeded"
        );
        Ok(stats)
    }

    fn tracker_url(&self) -> &str {
        &self.tracker_url
    }
}

pub(crate) fn connect_request(transaction_id: u32) -> Bytes {
    let mut request = BytesMut::with_capacity(CONNECT_REQUEST_LEN);
    request.put_u64(PROTOCOL_ID);
    request.put_u32(ACTION_CONNECT);
    request.put_u32(transaction_id);
    request.freeze()
}

pub(crate) fn scrape_request(connection_id: u64, transaction_id: u32, info_hash: &InfoHash) -> Bytes {
    let mut request = BytesMut::with_capacity(16 + 20);
    request.put_u64(connection_id);
    request.put_u32(ACTION_SCRAPE);
    request.put_u32(transaction_id);
    request.put_slice(info_hash.as_bytes());
    request.freeze()
}

/// Reads the action and transaction id, turning error replies into `Protocol`.
fn parse_header(
    mut packet: &[u8],
    expected_action: u32,
    transaction_id: u32,
) -> Result<&[u8], TrackerError> {
    if packet.len() < RESPONSE_HEADER_LEN {
        return Err(TrackerError::Protocol {
            message: format!("UDP response too short: {} bytes", packet.len()),
        });
    }

    let action = packet.get_u32();
    let received_transaction = packet.get_u32();

    if received_transaction != transaction_id {
        return Err(TrackerError::Protocol {
            message: "UDP transaction ID mismatch".to_string(),
        });
    }
    if action == ACTION_ERROR {
        return Err(TrackerError::Protocol {
            message: format!("Tracker error: {}", String::from_utf8_lossy(packet)),
        });
    }
    if action != expected_action {
        return Err(TrackerError::Protocol {
            message: format!("UDP unexpected action: {action}"),
        });
    }

    Ok(packet)
}

pub(crate) fn parse_connect_response(packet: &[u8], transaction_id: u32) -> Result<u64, TrackerError> {
    if packet.len() < CONNECT_RESPONSE_LEN {
        // Error replies are shorter than a connect reply
        parse_header(packet, ACTION_CONNECT, transaction_id)?;
        return Err(TrackerError::Protocol {
            message: "UDP connect response too short".to_string(),
        });
    }

    let mut body = parse_header(packet, ACTION_CONNECT, transaction_id)?;
    Ok(body.get_u64())
}

pub(crate) fn parse_scrape_response(
    packet: &[u8],
    transaction_id: u32,
) -> Result<ScrapeStats, TrackerError> {
    let mut body = parse_header(packet, ACTION_SCRAPE, transaction_id)?;

    if body.len() < SCRAPE_ENTRY_LEN {
        return Err(TrackerError::Protocol {
            message: "UDP scrape response has no entry".to_string(),
        });
    }

    Ok(ScrapeStats {
        complete: body.get_u32(),
        downloaded: body.get_u32(),
        incomplete: body.get_u32(),
    })
}
