use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{GatewayConfig, KeySourceLocation, MIN_KEY_REFRESH_INTERVAL};
use crate::error::{KeyStoreError, KeyStoreResult};
use crate::key_store::{KeyRecord, SnapshotKeyStore};

/// Configuration source holding issuer key records.
///
/// Documents are JSON objects. The namespace segments are followed as nested
/// keys; the object found there maps each issuer to either a PEM string or an
/// object with a `public_key` PEM field:
///
/// ```json
/// { "platform": { "app-key": { "app-1": { "public_key": "-----BEGIN PUBLIC KEY-----..." } } } }
/// ```
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Read the current key record set for issuers under `namespace`.
    async fn load(&self, namespace: &[String]) -> KeyStoreResult<Vec<KeyRecord>>;

    fn describe(&self) -> String;
}

/// Extract the issuer records found under `namespace` in a key document.
///
/// Entries with an unusable key are skipped so one bad record cannot take the
/// whole issuer set offline.
pub fn parse_key_document(document: &Value, namespace: &[String]) -> KeyStoreResult<Vec<KeyRecord>> {
    let mut node = document;
    for segment in namespace {
        node = node
            .get(segment)
            .ok_or_else(|| KeyStoreError::MissingNamespace(namespace.join("/")))?;
    }

    let entries = node.as_object().ok_or_else(|| {
        KeyStoreError::Decode(format!(
            "expected an object of issuer keys at '{}'",
            namespace.join("/")
        ))
    })?;

    let mut records = Vec::with_capacity(entries.len());
    for (issuer, entry) in entries {
        let pem = match entry {
            Value::String(pem) => Some(pem.as_str()),
            Value::Object(fields) => fields.get("public_key").and_then(Value::as_str),
            _ => None,
        };
        let Some(pem) = pem else {
            warn!(issuer = %issuer, "key record has no public_key, skipping");
            continue;
        };
        match KeyRecord::from_rsa_pem(issuer.as_str(), pem) {
            Ok(record) => records.push(record),
            Err(err) => warn!(issuer = %issuer, error = %err, "unusable key record, skipping"),
        }
    }

    Ok(records)
}

/// Reads the key document from a local file on every load.
#[derive(Debug, Clone)]
pub struct FileKeySource {
    path: PathBuf,
}

impl FileKeySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl KeySource for FileKeySource {
    async fn load(&self, namespace: &[String]) -> KeyStoreResult<Vec<KeyRecord>> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        let document: Value = serde_json::from_str(&raw)?;
        parse_key_document(&document, namespace)
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

/// Fetches the key document over HTTP.
#[derive(Clone)]
pub struct HttpKeySource {
    client: Client,
    url: String,
}

impl HttpKeySource {
    pub fn new(url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|err| {
                warn!(error = %err, "failed to build HTTP client with timeout, using defaults");
                Client::new()
            });
        Self::with_client(client, url)
    }

    pub fn with_client(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl KeySource for HttpKeySource {
    async fn load(&self, namespace: &[String]) -> KeyStoreResult<Vec<KeyRecord>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|err| KeyStoreError::Fetch(err.to_string()))?;

        if !response.status().is_success() {
            return Err(KeyStoreError::Fetch(format!(
                "HTTP {} from {}",
                response.status(),
                self.url
            )));
        }

        let document: Value = response
            .json()
            .await
            .map_err(|err| KeyStoreError::Decode(err.to_string()))?;
        parse_key_document(&document, namespace)
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Periodically reload `store` from `source`. A failed reload keeps the
/// previous snapshot; the store's staleness bound decides when lookups stop
/// trusting it. A zero `every` falls back to [`MIN_KEY_REFRESH_INTERVAL`].
pub fn spawn_key_refresh(
    store: SnapshotKeyStore,
    source: Arc<dyn KeySource>,
    every: Duration,
) -> JoinHandle<()> {
    let every = if every.is_zero() {
        warn!(
            fallback = ?MIN_KEY_REFRESH_INTERVAL,
            "zero key refresh interval, using the minimum"
        );
        MIN_KEY_REFRESH_INTERVAL
    } else {
        every
    };
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; callers load once up front.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match store.refresh(source.as_ref()).await {
                Ok(count) => debug!(count, source = %source.describe(), "reloaded issuer keys"),
                Err(err) => {
                    warn!(error = %err, source = %source.describe(), "failed to reload issuer keys")
                }
            }
        }
    })
}

/// Build the key store described by `config`, load it once, and keep it
/// refreshed in the background.
pub async fn start_key_store(config: &GatewayConfig) -> anyhow::Result<SnapshotKeyStore> {
    let store =
        SnapshotKeyStore::bind(&config.key_namespace).with_max_staleness(config.key_max_staleness);

    let source: Arc<dyn KeySource> = match &config.key_source {
        Some(KeySourceLocation::File(path)) => Arc::new(FileKeySource::new(path)),
        Some(KeySourceLocation::Url(url)) => Arc::new(HttpKeySource::new(url.as_str())),
        None => {
            warn!("no issuer key source configured; every token will be rejected");
            return Ok(store);
        }
    };

    let count = store
        .refresh(source.as_ref())
        .await
        .with_context(|| format!("initial issuer key load from {} failed", source.describe()))?;
    info!(count, "issuer key store initialised");

    spawn_key_refresh(store.clone(), source, config.key_refresh_interval);
    Ok(store)
}
