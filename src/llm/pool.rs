//! In-memory API-key pool with priority-weighted round-robin and
//! rate-limit cooldowns. The pool is the only component that mutates key
//! state; callers use `next()` and the `mark_*` events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Cooldown applied when a provider answers 429 and no duration is given.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyErrorKind {
    /// Provider rejected the credential outright; the key leaves the pool.
    InvalidKey,
    /// Any other failure; only the counter moves.
    Other,
}

#[derive(Debug)]
struct PoolEntry {
    key: String,
    priority: u32,
    last_used: Option<Instant>,
    rate_limited_until: Option<Instant>,
    success_count: u64,
    error_count: u64,
}

/// Per-key summary with the raw key reduced to a short prefix.
#[derive(Debug, Clone, Serialize)]
pub struct KeyStats {
    pub key_prefix: String,
    pub priority: u32,
    pub success_count: u64,
    pub error_count: u64,
    pub rate_limited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_remaining_secs: Option<u64>,
}

pub struct KeyPool {
    entries: RwLock<Vec<PoolEntry>>,
    counter: AtomicU64,
}

/// Reduce key material to a short prefix for logs and status payloads.
pub fn redact_key(key: &str) -> String {
    let prefix: String = key.chars().take(8).collect();
    format!("{prefix}…")
}

impl KeyPool {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            counter: AtomicU64::new(0),
        }
    }

    /// Add a key with priority clamped to [1, 10]. Re-adding an existing key
    /// updates its priority and keeps its counters.
    pub fn add_key(&self, key: impl Into<String>, priority: u32) {
        let key = key.into();
        let priority = priority.clamp(1, 10);
        let mut entries = self.entries.write().expect("key pool lock");
        if let Some(existing) = entries.iter_mut().find(|e| e.key == key) {
            existing.priority = priority;
            return;
        }
        tracing::info!(key = %redact_key(&key), priority, "key added to pool");
        entries.push(PoolEntry {
            key,
            priority,
            last_used: None,
            rate_limited_until: None,
            success_count: 0,
            error_count: 0,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("key pool lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Priority-weighted round-robin over keys whose cooldown has passed.
    /// Expired cooldowns are cleared on each pass. Returns `None` when every
    /// key is cooling down or the pool is empty.
    pub fn next(&self) -> Option<String> {
        let now = Instant::now();
        let mut entries = self.entries.write().expect("key pool lock");

        for entry in entries.iter_mut() {
            if let Some(until) = entry.rate_limited_until {
                if until <= now {
                    entry.rate_limited_until = None;
                }
            }
        }

        let candidates: Vec<usize> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.rate_limited_until.is_none())
            .map(|(i, _)| i)
            .collect();
        if candidates.is_empty() {
            return None;
        }

        let total_weight: u64 = candidates.iter().map(|&i| entries[i].priority as u64).sum();
        let round = self.counter.fetch_add(1, Ordering::Relaxed);
        let target = round % total_weight;

        let mut cumulative = 0u64;
        for &i in &candidates {
            cumulative += entries[i].priority as u64;
            if target < cumulative {
                entries[i].last_used = Some(now);
                return Some(entries[i].key.clone());
            }
        }

        // Weight walk always terminates inside the loop; this is unreachable
        // but the fallback keeps the selector total.
        let &first = candidates.first()?;
        entries[first].last_used = Some(now);
        Some(entries[first].key.clone())
    }

    pub fn mark_success(&self, key: &str) {
        let mut entries = self.entries.write().expect("key pool lock");
        if let Some(entry) = entries.iter_mut().find(|e| e.key == key) {
            entry.success_count += 1;
        }
    }

    pub fn mark_rate_limited(&self, key: &str, duration: Duration) {
        let mut entries = self.entries.write().expect("key pool lock");
        if let Some(entry) = entries.iter_mut().find(|e| e.key == key) {
            entry.rate_limited_until = Some(Instant::now() + duration);
            entry.error_count += 1;
            tracing::warn!(
                key = %redact_key(key),
                cooldown_secs = duration.as_secs(),
                "key rate limited"
            );
        }
    }

    pub fn mark_error(&self, key: &str, kind: KeyErrorKind) {
        let mut entries = self.entries.write().expect("key pool lock");
        match kind {
            KeyErrorKind::InvalidKey => {
                let before = entries.len();
                entries.retain(|e| e.key != key);
                if entries.len() < before {
                    tracing::warn!(key = %redact_key(key), "invalid key evicted from pool");
                }
            }
            KeyErrorKind::Other => {
                if let Some(entry) = entries.iter_mut().find(|e| e.key == key) {
                    entry.error_count += 1;
                }
            }
        }
    }

    pub fn stats(&self) -> Vec<KeyStats> {
        let now = Instant::now();
        let entries = self.entries.read().expect("key pool lock");
        entries
            .iter()
            .map(|e| {
                let cooldown = e.rate_limited_until.and_then(|until| {
                    (until > now).then(|| (until - now).as_secs())
                });
                KeyStats {
                    key_prefix: redact_key(&e.key),
                    priority: e.priority,
                    success_count: e.success_count,
                    error_count: e.error_count,
                    rate_limited: cooldown.is_some(),
                    cooldown_remaining_secs: cooldown,
                }
            })
            .collect()
    }
}

impl Default for KeyPool {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ───────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_pool_returns_none() {
        let pool = KeyPool::new();
        assert!(pool.next().is_none());
    }

    #[test]
    fn weighted_round_robin_favors_priority() {
        let pool = KeyPool::new();
        pool.add_key("sk-or-k1", 10);
        pool.add_key("sk-or-k2", 5);

        let mut k1 = 0;
        let mut k2 = 0;
        for _ in 0..300 {
            match pool.next().unwrap().as_str() {
                "sk-or-k1" => k1 += 1,
                "sk-or-k2" => k2 += 1,
                other => panic!("unexpected key {other}"),
            }
        }
        // 10:5 weights — k1 should get exactly two thirds of the rounds.
        assert_eq!(k1, 200);
        assert_eq!(k2, 100);
    }

    #[test]
    fn rate_limited_key_is_not_selectable_until_cooldown_ends() {
        let pool = KeyPool::new();
        pool.add_key("sk-or-k1", 10);
        pool.add_key("sk-or-k2", 5);

        pool.mark_rate_limited("sk-or-k1", Duration::from_secs(60));
        for _ in 0..20 {
            assert_eq!(pool.next().unwrap(), "sk-or-k2");
        }

        // An already-expired cooldown is cleared on the next pass.
        pool.mark_rate_limited("sk-or-k1", Duration::ZERO);
        let seen_k1 = (0..20).any(|_| pool.next().unwrap() == "sk-or-k1");
        assert!(seen_k1, "key should be selectable after cooldown expiry");
    }

    #[test]
    fn all_keys_cooling_down_returns_none() {
        let pool = KeyPool::new();
        pool.add_key("sk-or-k1", 10);
        pool.mark_rate_limited("sk-or-k1", Duration::from_secs(60));
        assert!(pool.next().is_none());
    }

    #[test]
    fn invalid_key_is_evicted() {
        let pool = KeyPool::new();
        pool.add_key("sk-or-k1", 10);
        pool.add_key("sk-or-k2", 5);
        pool.mark_error("sk-or-k1", KeyErrorKind::InvalidKey);
        assert_eq!(pool.len(), 1);
        for _ in 0..10 {
            assert_eq!(pool.next().unwrap(), "sk-or-k2");
        }
    }

    #[test]
    fn other_errors_only_count() {
        let pool = KeyPool::new();
        pool.add_key("sk-or-k1", 10);
        pool.mark_error("sk-or-k1", KeyErrorKind::Other);
        pool.mark_success("sk-or-k1");
        assert_eq!(pool.len(), 1);

        let stats = pool.stats();
        assert_eq!(stats[0].success_count, 1);
        assert_eq!(stats[0].error_count, 1);
    }

    #[test]
    fn stats_redact_key_material() {
        let pool = KeyPool::new();
        pool.add_key("sk-or-v1-abcdef123456", 3);
        let stats = pool.stats();
        assert_eq!(stats[0].key_prefix, "sk-or-v1…");
        assert!(!format!("{stats:?}").contains("abcdef123456"));
    }

    #[test]
    fn priority_is_clamped_and_readd_updates() {
        let pool = KeyPool::new();
        pool.add_key("sk-or-k1", 99);
        assert_eq!(pool.stats()[0].priority, 10);
        pool.add_key("sk-or-k1", 0);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.stats()[0].priority, 1);
    }
}
