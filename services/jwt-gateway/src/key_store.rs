use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::DecodingKey;
use tracing::{debug, info};

use crate::error::{KeyStoreError, KeyStoreResult};
use crate::key_source::KeySource;

/// Public key bound to one issuer.
#[derive(Clone)]
pub struct KeyRecord {
    issuer: String,
    public_key_pem: String,
    decoding_key: DecodingKey,
}

impl KeyRecord {
    pub fn from_rsa_pem(issuer: impl Into<String>, pem: &str) -> KeyStoreResult<Self> {
        let issuer = issuer.into();
        let decoding_key = DecodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|err| KeyStoreError::KeyParse(issuer.clone(), err.to_string()))?;
        Ok(Self {
            issuer,
            public_key_pem: pem.to_string(),
            decoding_key,
        })
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
}

impl fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRecord")
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

/// Read-only issuer → key resolution used by the verifier.
///
/// `Ok(None)` means the issuer is unknown; `Err` means the backing source could
/// not answer. Callers must treat both as a rejection.
pub trait KeyLookup: Send + Sync {
    fn lookup(&self, issuer: &str) -> KeyStoreResult<Option<KeyRecord>>;
}

/// Split a hierarchical location like `/platform/app-key/` into its segments.
pub fn split_path(path: &str) -> Vec<String> {
    path.trim_matches('/')
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

struct KeySnapshot {
    keys: HashMap<String, KeyRecord>,
    loaded_at: Option<DateTime<Utc>>,
}

/// Thread-safe issuer → key map. Lookups clone the current snapshot `Arc`
/// under a short read lock; refreshes swap in a complete new snapshot.
#[derive(Clone)]
pub struct SnapshotKeyStore {
    namespace: Arc<Vec<String>>,
    inner: Arc<RwLock<Arc<KeySnapshot>>>,
    max_staleness: Option<Duration>,
}

impl Default for SnapshotKeyStore {
    fn default() -> Self {
        Self::bind("")
    }
}

impl SnapshotKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store bound to a configuration namespace.
    pub fn bind(namespace: &str) -> Self {
        Self {
            namespace: Arc::new(split_path(namespace)),
            inner: Arc::new(RwLock::new(Arc::new(KeySnapshot {
                keys: HashMap::new(),
                loaded_at: None,
            }))),
            max_staleness: None,
        }
    }

    /// Fail lookups closed once the snapshot has not been refreshed for `max`.
    pub fn with_max_staleness(mut self, max: Duration) -> Self {
        self.max_staleness = Some(max);
        self
    }

    pub fn namespace(&self) -> &[String] {
        &self.namespace
    }

    fn snapshot(&self) -> Arc<KeySnapshot> {
        match self.inner.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn swap(&self, next: KeySnapshot) {
        let next = Arc::new(next);
        match self.inner.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    pub fn insert_rsa_pem(&self, issuer: impl Into<String>, pem: &str) -> KeyStoreResult<()> {
        let record = KeyRecord::from_rsa_pem(issuer, pem)?;
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Copy-on-write: readers holding the old Arc keep a complete map.
        let mut keys = guard.keys.clone();
        keys.insert(record.issuer.clone(), record);
        // A manual insert does not vouch for the records loaded from the source.
        let loaded_at = guard.loaded_at.or_else(|| Some(Utc::now()));
        *guard = Arc::new(KeySnapshot { keys, loaded_at });
        Ok(())
    }

    pub fn replace_all<I>(&self, records: I)
    where
        I: IntoIterator<Item = KeyRecord>,
    {
        let keys = records
            .into_iter()
            .map(|record| (record.issuer.clone(), record))
            .collect();
        self.swap(KeySnapshot {
            keys,
            loaded_at: Some(Utc::now()),
        });
    }

    pub fn contains(&self, issuer: &str) -> bool {
        self.snapshot().keys.contains_key(issuer)
    }

    pub fn len(&self) -> usize {
        self.snapshot().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last_refreshed(&self) -> Option<DateTime<Utc>> {
        self.snapshot().loaded_at
    }

    /// Load a complete record set from `source` and publish it.
    ///
    /// On error the previous snapshot stays in place.
    pub async fn refresh(&self, source: &dyn KeySource) -> KeyStoreResult<usize> {
        let records = source.load(&self.namespace).await?;
        let count = records.len();
        self.replace_all(records);
        info!(
            count,
            namespace = %self.namespace.join("/"),
            source = %source.describe(),
            "issuer key snapshot refreshed"
        );
        Ok(count)
    }

    fn check_freshness(&self, snapshot: &KeySnapshot) -> KeyStoreResult<()> {
        let Some(max) = self.max_staleness else {
            return Ok(());
        };
        let Some(loaded_at) = snapshot.loaded_at else {
            return Err(KeyStoreError::Stale { age_secs: i64::MAX });
        };
        let age = Utc::now().signed_duration_since(loaded_at);
        // A negative age (clock stepped back) counts as fresh.
        if age.to_std().map(|age| age > max).unwrap_or(false) {
            return Err(KeyStoreError::Stale {
                age_secs: age.num_seconds(),
            });
        }
        Ok(())
    }
}

impl KeyLookup for SnapshotKeyStore {
    fn lookup(&self, issuer: &str) -> KeyStoreResult<Option<KeyRecord>> {
        let snapshot = self.snapshot();
        self.check_freshness(&snapshot)?;
        let record = snapshot.keys.get(issuer).cloned();
        debug!(issuer, found = record.is_some(), "issuer key lookup");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_keys::{KEY_A, KEY_B};

    #[test]
    fn split_path_trims_slashes() {
        assert_eq!(split_path("platform/app-key"), vec!["platform", "app-key"]);
        assert_eq!(split_path("/platform/app-key/"), vec!["platform", "app-key"]);
        assert_eq!(split_path("platform//app-key"), vec!["platform", "app-key"]);
        assert!(split_path("/").is_empty());
    }

    #[test]
    fn insert_and_replace_round_trip() {
        let store = SnapshotKeyStore::bind("platform/app-key");
        assert_eq!(store.namespace(), ["platform", "app-key"]);
        assert!(store.is_empty());
        assert!(store.last_refreshed().is_none());

        store.insert_rsa_pem("app-1", &KEY_A.public_pem).unwrap();
        assert!(store.contains("app-1"));
        assert!(store.last_refreshed().is_some());
        let record = store.lookup("app-1").unwrap().unwrap();
        assert_eq!(record.issuer(), "app-1");
        assert_eq!(record.public_key_pem(), KEY_A.public_pem);

        let replacement = KeyRecord::from_rsa_pem("app-2", &KEY_B.public_pem).unwrap();
        store.replace_all(vec![replacement]);
        assert!(!store.contains("app-1"));
        assert!(store.contains("app-2"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn unknown_issuer_is_not_an_error() {
        let store = SnapshotKeyStore::new();
        assert!(store.lookup("nobody").unwrap().is_none());
    }

    #[test]
    fn bad_pem_is_rejected() {
        let store = SnapshotKeyStore::new();
        let err = store.insert_rsa_pem("app-1", "not a key").unwrap_err();
        assert!(matches!(err, KeyStoreError::KeyParse(issuer, _) if issuer == "app-1"));
    }

    #[test]
    fn stale_snapshot_fails_closed() {
        let store = SnapshotKeyStore::new().with_max_staleness(Duration::from_secs(60));
        let err = store.lookup("app-1").unwrap_err();
        assert!(matches!(err, KeyStoreError::Stale { .. }));

        store.insert_rsa_pem("app-1", &KEY_A.public_pem).unwrap();
        assert!(store.lookup("app-1").unwrap().is_some());
    }

    #[test]
    fn insert_keeps_the_source_refresh_time() {
        let store = SnapshotKeyStore::new();
        store.replace_all(vec![KeyRecord::from_rsa_pem("app-1", &KEY_A.public_pem).unwrap()]);
        let loaded = store.last_refreshed();
        std::thread::sleep(Duration::from_millis(5));

        store.insert_rsa_pem("app-2", &KEY_B.public_pem).unwrap();
        assert!(store.contains("app-2"));
        assert_eq!(store.last_refreshed(), loaded);
    }

    #[test]
    fn old_snapshot_handles_survive_a_swap() {
        let store = SnapshotKeyStore::new();
        store.insert_rsa_pem("app-1", &KEY_A.public_pem).unwrap();
        let before = store.snapshot();
        store.replace_all(Vec::new());
        assert!(before.keys.contains_key("app-1"));
        assert!(!store.contains("app-1"));
    }
}
