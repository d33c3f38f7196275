//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use tidex_core::{CacheError, CacheStore, InfoHash};
use tidex_core::torrent::tracker::{
    ScrapeStats, TrackerClient, TrackerClientFactory, TrackerError,
};
use tokio::net::UdpSocket;

pub const PAGE: &str =
    "<!DOCTYPE html><html><head><title>Results</title></head><body>torrents</body></html>";

/// Cache whose backend is down: every operation fails.
#[derive(Default)]
pub struct FailingCache {
    pub calls: AtomicUsize,
}

impl FailingCache {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail(&self) -> CacheError {
        self.calls.fetch_add(1, Ordering::SeqCst);
        CacheError::Unavailable {
            reason: "connection refused".to_string(),
        }
    }
}

#[async_trait]
impl CacheStore for FailingCache {
    async fn get(&self, _key: &str) -> Result<Option<Bytes>, CacheError> {
        Err(self.fail())
    }

    async fn set(&self, _key: &str, _value: Bytes) -> Result<(), CacheError> {
        Err(self.fail())
    }

    async fn set_with_expiration(
        &self,
        _key: &str,
        _value: Bytes,
        _ttl: Duration,
    ) -> Result<(), CacheError> {
        Err(self.fail())
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Err(self.fail())
    }
}

/// Behaviour of one scripted tracker.
#[derive(Debug, Clone, Copy)]
pub struct Script {
    pub delay: Duration,
    /// `(seeders, leechers)`, or `None` to fail after the delay.
    pub reply: Option<(u32, u32)>,
}

impl Script {
    pub fn answers(delay_ms: u64, seeders: u32, leechers: u32) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            reply: Some((seeders, leechers)),
        }
    }

    pub fn fails(delay_ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            reply: None,
        }
    }
}

/// Per-tracker call and completion counters.
#[derive(Default)]
pub struct Counters {
    pub started: AtomicUsize,
    pub finished: AtomicUsize,
}

struct ScriptedClient {
    url: String,
    script: Script,
    counters: Arc<Counters>,
}

#[async_trait]
impl TrackerClient for ScriptedClient {
    async fn scrape(&self, _info_hash: &InfoHash) -> Result<ScrapeStats, TrackerError> {
        self.counters.started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.script.delay).await;
        self.counters.finished.fetch_add(1, Ordering::SeqCst);

        match self.script.reply {
            Some((seeders, leechers)) => Ok(ScrapeStats {
                complete: seeders,
                downloaded: 0,
                incomplete: leechers,
            }),
            None => Err(TrackerError::ConnectionFailed {
                url: self.url.clone(),
                reason: "scripted failure".to_string(),
            }),
        }
    }

    fn tracker_url(&self) -> &str {
        &self.url
    }
}

/// Client factory handing out scripted trackers; unknown URLs fail at once.
#[derive(Default)]
pub struct ScriptedTrackers {
    scripts: HashMap<String, Script>,
    counters: Mutex<HashMap<String, Arc<Counters>>>,
}

impl ScriptedTrackers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: &str, script: Script) -> Self {
        self.scripts.insert(url.to_string(), script);
        self
    }

    pub fn counters(&self, url: &str) -> Arc<Counters> {
        Arc::clone(self.counters.lock().entry(url.to_string()).or_default())
    }

    pub fn started(&self, url: &str) -> usize {
        self.counters(url).started.load(Ordering::SeqCst)
    }

    pub fn finished(&self, url: &str) -> usize {
        self.counters(url).finished.load(Ordering::SeqCst)
    }

    pub fn total_started(&self) -> usize {
        self.counters
            .lock()
            .values()
            .map(|c| c.started.load(Ordering::SeqCst))
            .sum()
    }
}

impl TrackerClientFactory for ScriptedTrackers {
    fn client_for(&self, tracker_url: &str) -> Result<Arc<dyn TrackerClient>, TrackerError> {
        let script = self
            .scripts
            .get(tracker_url)
            .copied()
            .unwrap_or(Script::fails(0));

        Ok(Arc::new(ScriptedClient {
            url: tracker_url.to_string(),
            script,
            counters: self.counters(tracker_url),
        }))
    }
}

/// Binds a BEP 15 tracker on localhost answering every request.
pub async fn spawn_udp_tracker(seeders: u32, leechers: u32) -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();

    tokio::spawn(async move {
        let mut buf = [0u8; 512];
        loop {
            let Ok((len, peer)) = socket.recv_from(&mut buf).await else {
                return;
            };
            let mut packet = &buf[..len];
            let _connection_id = packet.get_u64();
            let action = packet.get_u32();
            let transaction_id = packet.get_u32();

            let mut reply = BytesMut::new();
            reply.put_u32(action);
            reply.put_u32(transaction_id);
            if action == 0 {
                reply.put_u64(0x1234_5678);
            } else {
                reply.put_u32(seeders);
                reply.put_u32(7);
                reply.put_u32(leechers);
            }
            let _ = socket.send_to(&reply, peer).await;
        }
    });

    addr
}
