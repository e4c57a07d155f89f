use crate::domain::errors::CacheError;
use crate::domain::observation::PriceObservation;
use crate::domain::ports::{CacheStats, PriceCache};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

pub fn latest_key(symbol: &str) -> String {
    format!("price:{}:latest", symbol)
}

pub fn historical_key(symbol: &str, days: u32) -> String {
    format!("historical:{}:{}d", symbol, days)
}

/// Key patterns owned by one symbol
pub fn symbol_patterns(symbol: &str) -> [String; 3] {
    [
        format!("price:{}:*", symbol),
        format!("historical:{}:*", symbol),
        format!("crypto:{}:*", symbol),
    ]
}

/// Matches `key` against a pattern where `*` stands for any run of characters.
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let mut parts = pattern.split('*');
    let first = parts.next().unwrap_or_default();
    let Some(mut rest) = key.strip_prefix(first) else {
        return false;
    };

    let tail: Vec<&str> = parts.collect();
    let Some((last, middle)) = tail.split_last() else {
        // No wildcard: exact match
        return rest.is_empty();
    };

    for part in middle {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}

#[derive(Debug)]
struct CacheEntry {
    payload: String,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Process-local key/value cache with per-entry TTL.
///
/// Values are stored as JSON so a corrupt entry surfaces as `CacheError::Corrupt` the
/// same way it would with an external cache server.
pub struct InMemoryPriceCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    errors: AtomicU64,
    evictions: AtomicU64,
}

impl std::fmt::Debug for InMemoryPriceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryPriceCache")
            .field("entries", &"<RwLock>")
            .finish()
    }
}

impl Default for InMemoryPriceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPriceCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let now = Instant::now();
        let payload = {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.is_expired(now) => Some(entry.payload.clone()),
                Some(_) => None,
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return Ok(None);
                }
            }
        };

        let Some(payload) = payload else {
            // Expired: drop it now rather than waiting for maintenance
            let mut entries = self.entries.write().await;
            if entries.get(key).is_some_and(|e| e.is_expired(now)) {
                entries.remove(key);
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        match serde_json::from_str(&payload) {
            Ok(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(value))
            }
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                Err(CacheError::Corrupt {
                    key: key.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn set_json<T: Serialize + ?Sized>(
        &self,
        key: String,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let payload = serde_json::to_string(value).map_err(|e| {
            self.errors.fetch_add(1, Ordering::Relaxed);
            CacheError::Corrupt {
                key: key.clone(),
                reason: e.to_string(),
            }
        })?;

        let entry = CacheEntry {
            payload,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().await.insert(key, entry);
        self.sets.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    #[cfg(test)]
    async fn insert_raw(&self, key: &str, payload: &str, ttl: Duration) {
        self.entries.write().await.insert(
            key.to_string(),
            CacheEntry {
                payload: payload.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

#[async_trait]
impl PriceCache for InMemoryPriceCache {
    async fn get(&self, symbol: &str) -> Result<Option<PriceObservation>, CacheError> {
        self.get_json(&latest_key(symbol)).await
    }

    async fn set(
        &self,
        symbol: &str,
        observation: &PriceObservation,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.set_json(latest_key(symbol), observation, ttl).await
    }

    async fn get_historical(
        &self,
        symbol: &str,
        days: u32,
    ) -> Result<Option<Vec<PriceObservation>>, CacheError> {
        self.get_json(&historical_key(symbol, days)).await
    }

    async fn set_historical(
        &self,
        symbol: &str,
        days: u32,
        observations: &[PriceObservation],
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.set_json(historical_key(symbol, days), observations, ttl)
            .await
    }

    async fn invalidate_symbol(&self, symbol: &str) -> Result<usize, CacheError> {
        let patterns = symbol_patterns(symbol);
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !patterns.iter().any(|p| glob_match(p, key)));
        let removed = before - entries.len();
        if removed > 0 {
            debug!("PriceCache: invalidated {} keys for {}", removed, symbol);
        }
        Ok(removed)
    }

    async fn replace_latest(
        &self,
        symbol: &str,
        candidate: &PriceObservation,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let key = latest_key(symbol);
        let candidate_payload = serde_json::to_string(candidate).map_err(|e| {
            self.errors.fetch_add(1, Ordering::Relaxed);
            CacheError::Corrupt {
                key: key.clone(),
                reason: e.to_string(),
            }
        })?;

        let now = Instant::now();
        let patterns = symbol_patterns(symbol);
        let mut entries = self.entries.write().await;

        // A corrupt or expired entry never wins over the candidate
        let current = entries
            .get(&key)
            .filter(|entry| !entry.is_expired(now))
            .and_then(|entry| serde_json::from_str::<PriceObservation>(&entry.payload).ok());
        let keep_current = current.is_some_and(|c| c.timestamp() > candidate.timestamp());

        let kept = if keep_current { entries.remove(&key) } else { None };
        entries.retain(|k, _| !patterns.iter().any(|p| glob_match(p, k)));

        match kept {
            Some(entry) => {
                debug!("PriceCache: keeping fresher latest entry for {}", symbol);
                entries.insert(key, entry);
                Ok(false)
            }
            None => {
                entries.insert(
                    key,
                    CacheEntry {
                        payload: candidate_payload,
                        expires_at: now + ttl,
                    },
                );
                self.sets.fetch_add(1, Ordering::Relaxed);
                Ok(true)
            }
        }
    }

    async fn prune(&self, pattern: &str) -> Result<usize, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, entry| !(entry.is_expired(now) && glob_match(pattern, key)));
        let removed = before - entries.len();
        self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        Ok(removed)
    }

    async fn stats(&self) -> CacheStats {
        CacheStats {
            status: "connected".to_string(),
            entries: self.entries.read().await.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
