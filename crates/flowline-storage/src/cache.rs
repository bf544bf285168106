// Result cache for node execution outputs
//
// Deterministic, tenant-scoped memoization of successful outputs. The
// cache is an optimization only: every operation is non-throwing and any
// internal failure degrades to a miss. The tenant id is the first
// component of the storage key, so a key for tenant A can never collide
// with tenant B's entries.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use flowline_core::JsonMap;

/// Number of hex chars kept from the SHA-256 of the canonical inputs
const INPUTS_HASH_LEN: usize = 16;

/// Immutable cache key for node execution results.
///
/// Intentionally excludes execution_id and node_id: the same agent with
/// the same inputs should hit the cache across executions and nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    pub tenant_id: String,
    pub agent_id: String,
    pub agent_version: String,
    pub inputs_hash: String,
}

impl CacheKey {
    /// Storage key string, tenant first
    fn storage_key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.tenant_id, self.agent_id, self.agent_version, self.inputs_hash
        )
    }
}

/// A cached execution result
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntry {
    pub output: Value,
    pub duration_ms: u64,
    pub cached_at: DateTime<Utc>,
    /// Stored copy of the owning tenant, checked again on retrieval
    pub tenant_id: String,
}

/// Serialize a JSON value with object keys sorted recursively.
///
/// serde_json's default map ordering depends on enabled features, so
/// canonical ordering is enforced here explicitly.
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .iter()
                .map(|key| {
                    let encoded_key =
                        serde_json::to_string(key).unwrap_or_else(|_| format!("\"{key}\""));
                    format!("{}:{}", encoded_key, canonical_json(&map[key.as_str()]))
                })
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", parts.join(","))
        }
        other => serde_json::to_string(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// Compute a deterministic hash of inputs.
///
/// Canonical JSON (sorted keys, no insignificant whitespace), SHA-256,
/// truncated to 16 hex characters.
pub fn compute_inputs_hash(inputs: &JsonMap) -> String {
    let serialized = canonical_json(&Value::Object(inputs.clone()));
    let digest = Sha256::digest(serialized.as_bytes());
    let mut hash = hex::encode(digest);
    hash.truncate(INPUTS_HASH_LEN);
    hash
}

/// Generate a cache key for an agent execution.
///
/// Returns None when the tenant id is empty: a keyless tenant would
/// defeat isolation, so such jobs are simply not cacheable.
pub fn generate_cache_key(
    tenant_id: &str,
    agent_id: &str,
    inputs: &JsonMap,
    agent_version: &str,
) -> Option<CacheKey> {
    if tenant_id.is_empty() {
        return None;
    }

    Some(CacheKey {
        tenant_id: tenant_id.to_string(),
        agent_id: agent_id.to_string(),
        agent_version: agent_version.to_string(),
        inputs_hash: compute_inputs_hash(inputs),
    })
}

/// Global cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// Per-tenant cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct TenantCacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

#[derive(Default)]
struct Counters {
    hits: u64,
    misses: u64,
}

#[derive(Default)]
struct CacheInner {
    store: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
    tenant_counters: HashMap<String, Counters>,
}

/// In-memory cache for node execution results.
///
/// No TTL, no size limit, no persistence: entries live for the lifetime
/// of the process and can be bulk invalidated per tenant.
#[derive(Default)]
pub struct ResultCache {
    inner: Mutex<CacheInner>,
}

impl ResultCache {
    pub fn new() -> Self {
        ResultCache::default()
    }

    /// Retrieve a cached result. Returns None on miss.
    ///
    /// The stored tenant must equal the key's tenant; a mismatch is
    /// treated as a miss.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        let entry = inner
            .store
            .get(&key.storage_key())
            .filter(|entry| entry.tenant_id == key.tenant_id)
            .cloned();

        let hit = entry.is_some();
        if hit {
            inner.hits += 1;
        } else {
            inner.misses += 1;
        }

        let counters = inner.tenant_counters.entry(key.tenant_id.clone()).or_default();
        if hit {
            counters.hits += 1;
        } else {
            counters.misses += 1;
        }

        entry
    }

    /// Store a successful result. Returns false if the key is unusable.
    pub fn set(&self, key: &CacheKey, output: Value, duration_ms: u64) -> bool {
        if key.tenant_id.is_empty() {
            return false;
        }

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.store.insert(
            key.storage_key(),
            CacheEntry {
                output,
                duration_ms,
                cached_at: Utc::now(),
                tenant_id: key.tenant_id.clone(),
            },
        );
        true
    }

    /// Check if a key exists without touching hit/miss counters
    pub fn has(&self, key: &CacheKey) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.store.contains_key(&key.storage_key())
    }

    /// Remove an entry. Returns true if it existed.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.store.remove(&key.storage_key()).is_some()
    }

    /// Remove all entries for a tenant. Returns the number removed.
    pub fn invalidate_tenant(&self, tenant_id: &str) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        let keys: Vec<String> = inner
            .store
            .iter()
            .filter(|(_, entry)| entry.tenant_id == tenant_id)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &keys {
            inner.store.remove(key);
        }
        inner.tenant_counters.remove(tenant_id);

        keys.len()
    }

    /// Clear all entries and counters
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.store.clear();
        inner.hits = 0;
        inner.misses = 0;
        inner.tenant_counters.clear();
    }

    /// Global statistics for monitoring
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let total = inner.hits + inner.misses;
        CacheStats {
            size: inner.store.len(),
            hits: inner.hits,
            misses: inner.misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                inner.hits as f64 / total as f64
            },
        }
    }

    /// Statistics for a single tenant
    pub fn tenant_stats(&self, tenant_id: &str) -> TenantCacheStats {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        let (hits, misses) = inner
            .tenant_counters
            .get(tenant_id)
            .map(|c| (c.hits, c.misses))
            .unwrap_or((0, 0));
        let total = hits + misses;
        let entries = inner
            .store
            .values()
            .filter(|entry| entry.tenant_id == tenant_id)
            .count();

        TenantCacheStats {
            entries,
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inputs(pairs: &[(&str, Value)]) -> JsonMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_inputs_hash_is_key_order_independent() {
        let a = inputs(&[("x", json!(1)), ("y", json!({"b": 2, "a": 1}))]);
        let b = inputs(&[("y", json!({"a": 1, "b": 2})), ("x", json!(1))]);

        assert_eq!(compute_inputs_hash(&a), compute_inputs_hash(&b));
        assert_eq!(compute_inputs_hash(&a).len(), 16);
    }

    #[test]
    fn test_inputs_hash_differs_for_different_values() {
        let a = inputs(&[("x", json!(1))]);
        let b = inputs(&[("x", json!(2))]);

        assert_ne!(compute_inputs_hash(&a), compute_inputs_hash(&b));
    }

    #[test]
    fn test_empty_tenant_gets_no_key() {
        assert!(generate_cache_key("", "agent", &JsonMap::new(), "1.0.0").is_none());
        assert!(generate_cache_key("t1", "agent", &JsonMap::new(), "1.0.0").is_some());
    }

    #[test]
    fn test_set_then_get_round_trip() {
        let cache = ResultCache::new();
        let key = generate_cache_key("t1", "gpt-4", &inputs(&[("q", json!("hi"))]), "1.0.0")
            .expect("key");

        assert!(cache.get(&key).is_none());
        assert!(cache.set(&key, json!({"answer": 42}), 120));

        let entry = cache.get(&key).expect("hit");
        assert_eq!(entry.output, json!({"answer": 42}));
        assert_eq!(entry.duration_ms, 120);
        assert_eq!(entry.tenant_id, "t1");
    }

    #[test]
    fn test_tenant_isolation_is_structural() {
        let cache = ResultCache::new();
        let same_inputs = inputs(&[("q", json!("hi"))]);

        let key_a = generate_cache_key("tenant-a", "gpt-4", &same_inputs, "1.0.0").expect("key");
        let key_b = generate_cache_key("tenant-b", "gpt-4", &same_inputs, "1.0.0").expect("key");

        cache.set(&key_a, json!("a-secret"), 10);

        assert!(cache.get(&key_b).is_none());
        assert_eq!(cache.get(&key_a).expect("hit").output, json!("a-secret"));
    }

    #[test]
    fn test_invalidate_tenant_removes_only_that_tenant() {
        let cache = ResultCache::new();
        let key_a =
            generate_cache_key("tenant-a", "x", &JsonMap::new(), "1.0.0").expect("key");
        let key_b =
            generate_cache_key("tenant-b", "x", &JsonMap::new(), "1.0.0").expect("key");

        cache.set(&key_a, json!(1), 1);
        cache.set(&key_b, json!(2), 1);

        assert_eq!(cache.invalidate_tenant("tenant-a"), 1);
        assert!(cache.get(&key_a).is_none());
        assert!(cache.get(&key_b).is_some());
    }

    #[test]
    fn test_stats_track_hits_and_misses() {
        let cache = ResultCache::new();
        let key = generate_cache_key("t1", "x", &JsonMap::new(), "1.0.0").expect("key");

        cache.get(&key); // miss
        cache.set(&key, json!(1), 1);
        cache.get(&key); // hit

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);

        let tenant = cache.tenant_stats("t1");
        assert_eq!(tenant.entries, 1);
        assert_eq!(tenant.hits, 1);
        assert_eq!(tenant.misses, 1);
    }
}
