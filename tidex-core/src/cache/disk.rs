//! Persistent cache stored in an embedded sled database
//!
//! Entries outlive the process, so each value carries a wall-clock deadline
//! in front of the payload. Expired entries are removed when read or by
//! `purge_expired`.

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;

use super::{CacheError, CacheStore};

const ENTRY_MAGIC: [u8; 4] = *b"TDX1";
const DEADLINE_LEN: usize = 8;

/// `CacheStore` persisted on disk.
pub struct DiskCache {
    db: sled::Db,
    default_ttl: Duration,
}

impl DiskCache {
    /// Opens or creates the database at `path`.
    ///
    /// # Errors
    ///
    /// - `CacheError::Unavailable` - If the database cannot be opened, for
    ///   example because another process holds it
    pub fn open(path: impl AsRef<Path>, default_ttl: Duration) -> Result<Self, CacheError> {
        let path = path.as_ref();
        let db = sled::open(path).map_err(|e| CacheError::Unavailable {
            reason: format!("cannot open {}: {e}", path.display()),
        })?;

        tracing::debug!(path = %path.display(), entries = db.len(), "Opened disk cache");
        Ok(Self { db, default_ttl })
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    /// Removes every expired or unreadable entry and returns how many went.
    ///
    /// # Errors
    ///
    /// - `CacheError::Unavailable` - If the database cannot be read
    pub fn purge_expired(&self) -> Result<usize, CacheError> {
        let now = now_unix_ms();
        let mut purged = 0;

        for item in self.db.iter() {
            let (key, raw) = item.map_err(unavailable)?;
            let keep = decode_entry("", &raw).is_ok_and(|(deadline, _)| deadline > now);
            if !keep {
                self.db.remove(&key).map_err(unavailable)?;
                purged += 1;
            }
        }

        if purged > 0 {
            tracing::debug!(purged, "Purged expired disk cache entries");
        }
        Ok(purged)
    }

    fn write(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let deadline = now_unix_ms().saturating_add(ttl_ms);

        let mut entry = Vec::with_capacity(ENTRY_MAGIC.len() + DEADLINE_LEN + value.len());
        entry.extend_from_slice(&ENTRY_MAGIC);
        entry.extend_from_slice(&deadline.to_be_bytes());
        entry.extend_from_slice(value);

        self.db.insert(key.as_bytes(), entry).map_err(unavailable)?;
        Ok(())
    }
}

#[async_trait]
impl CacheStore for DiskCache {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        let Some(raw) = self.db.get(key.as_bytes()).map_err(unavailable)? else {
            return Ok(None);
        };

        let (deadline, payload) = decode_entry(key, &raw)?;
        if deadline <= now_unix_ms() {
            self.db.remove(key.as_bytes()).map_err(unavailable)?;
            tracing::trace!(key, "Dropped expired disk cache entry");
            return Ok(None);
        }

        Ok(Some(Bytes::copy_from_slice(payload)))
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<(), CacheError> {
        self.write(key, &value, self.default_ttl)
    }

    async fn set_with_expiration(
        &self,
        key: &str,
        value: Bytes,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.write(key, &value, ttl)
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.db.remove(key.as_bytes()).map_err(unavailable)?;
        Ok(())
    }

    async fn flush(&self) -> Result<(), CacheError> {
        self.db.flush_async().await.map_err(unavailable)?;
        Ok(())
    }
}

/// Splits a stored entry into its deadline (unix millis) and payload.
fn decode_entry<'a>(key: &str, raw: &'a [u8]) -> Result<(u64, &'a [u8]), CacheError> {
    let corrupt = |reason: &str| CacheError::Corrupt {
        key: key.to_string(),
        reason: reason.to_string(),
    };

    let rest = raw
        .strip_prefix(ENTRY_MAGIC.as_slice())
        .ok_or_else(|| corrupt("unknown entry format"))?;
    if rest.len() < DEADLINE_LEN {
        return Err(corrupt("truncated expiry header"));
    }

    let (deadline, payload) = rest.split_at(DEADLINE_LEN);
    let mut deadline_bytes = [0u8; DEADLINE_LEN];
    deadline_bytes.copy_from_slice(deadline);
    Ok((u64::from_be_bytes(deadline_bytes), payload))
}

fn unavailable(error: sled::Error) -> CacheError {
    CacheError::Unavailable {
        reason: error.to_string(),
    }
}

fn now_unix_ms() -> u64 {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod disk_cache_tests {
    use tempfile::TempDir;

    use super::*;

    fn open(dir: &TempDir) -> DiskCache {
        DiskCache::open(dir.path().join("cache"), Duration::from_secs(60)).unwrap()
    }

    #[tokio::test]
    async fn test_values_survive_reopening() {
        let dir = TempDir::new().unwrap();

        let cache = open(&dir);
        cache.set("page", Bytes::from_static(b"<html></html>")).await.unwrap();
        cache.set("gone", Bytes::from_static(b"x")).await.unwrap();
        cache.delete("gone").await.unwrap();
        cache.flush().await.unwrap();
        drop(cache);

        let reopened = open(&dir);
        let value = reopened.get("page").await.unwrap().unwrap();
        assert_eq!(&value[..], b"<html></html>");
        assert!(reopened.get("gone").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);

        cache
            .set_with_expiration("short", Bytes::from_static(b"x"), Duration::from_millis(20))
            .await
            .unwrap();
        cache.set("long", Bytes::from_static(b"y")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(cache.get("short").await.unwrap().is_none());
        assert!(cache.get("long").await.unwrap().is_some());
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_entry_is_reported_corrupt() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);

        cache.db.insert("legacy", b"plain value".as_slice()).unwrap();
        cache.db.insert("truncated", b"TDX1\x00\x01".as_slice()).unwrap();

        for key in ["legacy", "truncated"] {
            let error = cache.get(key).await.unwrap_err();
            assert!(matches!(error, CacheError::Corrupt { key: ref k, .. } if k == key));
        }
    }

    #[tokio::test]
    async fn test_purge_removes_expired_and_corrupt_entries() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);

        cache
            .set_with_expiration("stale", Bytes::from_static(b"x"), Duration::from_millis(5))
            .await
            .unwrap();
        cache.set("fresh", Bytes::from_static(b"y")).await.unwrap();
        cache.db.insert("junk", b"??".as_slice()).unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(cache.purge_expired().unwrap(), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("fresh").await.unwrap().is_some());
    }
}
