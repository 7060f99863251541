//! # In-Memory Cache Store
//!
//! Process-local backend with Redis semantics for the commands the caching
//! layer uses. Serves as the store when Redis is disabled and as the test
//! double for everything above the backend seam.
//!
//! Time is measured with `tokio::time::Instant`, so tests running on a paused
//! tokio clock can advance past TTLs without sleeping.

use super::{ttl_secs, KvBackend};
use crate::caching::{CacheError, CacheResult};
use async_trait::async_trait;
use dashmap::DashMap;
use regex::Regex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn new(value: String, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + Duration::from_secs(ttl_secs(ttl))),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-memory key-value backend
#[derive(Debug)]
pub struct MemoryBackend {
    entries: DashMap<String, MemoryEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
    connected: AtomicBool,
    available: AtomicBool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create a connected, available backend
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            connected: AtomicBool::new(true),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the store becoming unreachable (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        if available {
            info!("In-memory store marked available");
        } else {
            warn!("In-memory store marked unavailable");
        }
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!("Purged {} expired entries from in-memory store", removed);
        }
        removed
    }

    fn ensure_available(&self) -> CacheResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(CacheError::Unavailable)
        }
    }

    fn read(&self, key: &str) -> Option<MemoryEntry> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if entry.is_live(now) => return Some(entry.clone()),
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries.remove_if(key, |_, entry| !entry.is_live(now));
        }
        None
    }

    fn apply_delta(&self, key: &str, delta: i64, expire_new: Option<Duration>) -> CacheResult<i64> {
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| MemoryEntry::new("0".to_string(), None));

        if !entry.is_live(now) {
            *entry = MemoryEntry::new("0".to_string(), None);
        }

        let current: i64 = entry
            .value
            .parse()
            .map_err(|_| CacheError::store("value is not an integer or out of range"))?;
        let next = current
            .checked_add(delta)
            .ok_or_else(|| CacheError::store("increment or decrement would overflow"))?;
        entry.value = next.to_string();

        if let Some(ttl) = expire_new {
            if next == 1 || entry.expires_at.is_none() {
                entry.expires_at = Some(now + Duration::from_secs(ttl_secs(ttl)));
            }
        }

        Ok(next)
    }

    fn used_memory(&self) -> u64 {
        self.entries
            .iter()
            .map(|entry| (entry.key().len() + entry.value().value.len()) as u64)
            .sum()
    }
}

/// Translate a Redis glob (`*`, `?`, `[...]`, `\x`) into an anchored regex.
pub(crate) fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');

    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                out.push('[');
                for inner in chars.by_ref() {
                    if inner == ']' {
                        break;
                    }
                    if inner == '\\' {
                        out.push_str("\\\\");
                    } else {
                        out.push(inner);
                    }
                }
                out.push(']');
            }
            '\\' => {
                if let Some(escaped) = chars.next() {
                    out.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }

    out.push('$');
    Regex::new(&out)
}

/// Format a byte count the way Redis renders `used_memory_human`.
pub(crate) fn bytes_to_human(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["K", "M", "G", "T"];

    if bytes < 1024 {
        return format!("{}B", bytes);
    }

    let mut value = bytes as f64;
    let mut unit = "B";
    for candidate in UNITS {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = candidate;
    }
    format!("{:.2}{}", value, unit)
}

#[async_trait]
impl KvBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.available.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> CacheResult<()> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable);
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> CacheResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.ensure_available()?;
        match self.read(key) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(entry.value))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        self.ensure_available()?;
        self.entries
            .insert(key.to_string(), MemoryEntry::new(value.to_string(), ttl));
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> CacheResult<u64> {
        self.ensure_available()?;
        let now = Instant::now();
        let removed = keys
            .iter()
            .filter_map(|key| self.entries.remove(key))
            .filter(|(_, entry)| entry.is_live(now))
            .count();
        Ok(removed as u64)
    }

    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        self.ensure_available()?;
        let matcher = glob_to_regex(pattern)
            .map_err(|e| CacheError::store(format!("Invalid key pattern {}: {}", pattern, e)))?;
        let now = Instant::now();

        Ok(self
            .entries
            .iter()
            .filter(|entry| entry.value().is_live(now) && matcher.is_match(entry.key()))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.ensure_available()?;
        Ok(self.read(key).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        self.ensure_available()?;
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut entry) if entry.is_live(now) => {
                entry.expires_at = Some(now + Duration::from_secs(ttl_secs(ttl)));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn incr(&self, key: &str) -> CacheResult<i64> {
        self.ensure_available()?;
        self.apply_delta(key, 1, None)
    }

    async fn decr(&self, key: &str) -> CacheResult<i64> {
        self.ensure_available()?;
        self.apply_delta(key, -1, None)
    }

    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> CacheResult<i64> {
        self.ensure_available()?;
        self.apply_delta(key, 1, Some(ttl))
    }

    async fn ttl(&self, key: &str) -> CacheResult<i64> {
        self.ensure_available()?;
        let now = Instant::now();
        Ok(match self.read(key) {
            None => -2,
            Some(MemoryEntry { expires_at: None, .. }) => -1,
            Some(MemoryEntry {
                expires_at: Some(at),
                ..
            }) => {
                let remaining = at.saturating_duration_since(now);
                let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
                secs as i64
            }
        })
    }

    async fn flush_all(&self) -> CacheResult<()> {
        self.ensure_available()?;
        self.entries.clear();
        Ok(())
    }

    async fn db_size(&self) -> CacheResult<u64> {
        self.ensure_available()?;
        self.purge_expired();
        Ok(self.entries.len() as u64)
    }

    async fn info(&self) -> CacheResult<String> {
        self.ensure_available()?;
        let used = self.used_memory();
        Ok(format!(
            "# Memory\r\nused_memory:{}\r\nused_memory_human:{}\r\n\r\n# Stats\r\nkeyspace_hits:{}\r\nkeyspace_misses:{}\r\n",
            used,
            bytes_to_human(used),
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        ))
    }
}
