use covnet_core::types::PropertyValue;
use covnet_core::PropertyRef;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

/// How long values read or notified for a ref may be served from memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CachePolicy {
    Never,
    Timed(Duration),
    NeverExpire,
}

impl CachePolicy {
    /// `0` disables caching and `u64::MAX` never expires.
    pub fn from_max_age_ms(max_age_ms: u64) -> Self {
        match max_age_ms {
            0 => Self::Never,
            u64::MAX => Self::NeverExpire,
            ms => Self::Timed(Duration::from_millis(ms)),
        }
    }
}

#[derive(Debug, Clone)]
struct Cached {
    value: PropertyValue,
    stored: Instant,
}

/// Read-through value cache keyed by ref (without write priority).
#[derive(Debug, Default)]
pub(crate) struct ValueCache {
    policies: DashMap<PropertyRef, CachePolicy>,
    values: DashMap<PropertyRef, Cached>,
}

impl ValueCache {
    pub fn set_policy(&self, refs: &[PropertyRef], policy: CachePolicy) {
        for r in refs {
            let key = r.without_priority();
            match policy {
                CachePolicy::Never => {
                    self.policies.remove(&key);
                    self.values.remove(&key);
                }
                policy => {
                    self.policies.insert(key, policy);
                }
            }
        }
    }

    pub fn get(&self, r: &PropertyRef) -> Option<PropertyValue> {
        let key = r.without_priority();
        let policy = *self.policies.get(&key)?;
        let cached = self.values.get(&key)?;
        let fresh = match policy {
            CachePolicy::Never => false,
            CachePolicy::NeverExpire => true,
            CachePolicy::Timed(max_age) => cached.stored.elapsed() <= max_age,
        };
        fresh.then(|| cached.value.clone())
    }

    /// Stores `value` when the ref has a caching policy.
    pub fn store(&self, r: &PropertyRef, value: &PropertyValue) {
        let key = r.without_priority();
        if self.policies.contains_key(&key) {
            self.values.insert(
                key,
                Cached {
                    value: value.clone(),
                    stored: Instant::now(),
                },
            );
        }
    }

    pub fn invalidate(&self, r: &PropertyRef) {
        self.values.remove(&r.without_priority());
    }

    /// Drops every cached value; policies are kept.
    pub fn clear_values(&self) {
        self.values.clear();
    }
}
