//! Record/replay state machine

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::call::Call;
use super::{ABSENT_STATUS, FALLBACK_CONTENT_TYPE};
use crate::config::Config;
use crate::dataset::DatasetSelector;
use crate::fingerprint::{fingerprint, Fingerprint, FingerprintDigest};
use crate::origin::{is_supported, Origin, OriginRequest};
use crate::storage::{run_blocking, validate_name, FixtureStore, IndexEntry};
use crate::{HulkError, Result};

/// Terminal state of one call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Served from a stored fixture
    Replay,
    /// Fetched from the origin and stored
    Record,
    /// No fixture and recording disabled
    Absent,
}

/// Response produced by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureResponse {
    /// How the response was produced
    pub outcome: Outcome,
    /// HTTP status to answer with
    pub status: u16,
    /// Content type to answer with
    pub content_type: String,
    /// Response body
    pub body: Vec<u8>,
}

/// Where a call's fixture lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// Active dataset
    pub dataset: String,
    /// Target host
    pub host: String,
    /// Fingerprint of the call
    pub fingerprint: Fingerprint,
}

impl Resolved {
    /// URL recorded in the index: host followed by the canonical string
    #[must_use]
    pub fn index_url(&self) -> String {
        format!("{}{}", self.host, self.fingerprint.canonical)
    }
}

/// Engine counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Calls served from fixtures
    pub replays: usize,
    /// Calls fetched from the origin and stored
    pub records: usize,
    /// Calls with no fixture
    pub absents: usize,
}

/// Record/replay engine
///
/// Holds no per-call state; fixtures live in the [`FixtureStore`] and the
/// active dataset in the [`DatasetSelector`].
pub struct ReplayEngine<O> {
    store: FixtureStore,
    selector: Arc<DatasetSelector>,
    origin: O,
    digest: FingerprintDigest,
    origin_timeout: Duration,
    default_dataset: RwLock<String>,
    recording: AtomicBool,
    replays: AtomicUsize,
    records: AtomicUsize,
    absents: AtomicUsize,
}

impl<O: Origin> ReplayEngine<O> {
    /// Create an engine from configuration
    #[must_use]
    pub fn new(config: &Config, selector: Arc<DatasetSelector>, origin: O) -> Self {
        Self {
            store: FixtureStore::from_config(config),
            selector,
            origin,
            digest: config.digest,
            origin_timeout: config.origin_timeout(),
            default_dataset: RwLock::new(config.default_dataset.clone()),
            recording: AtomicBool::new(config.recording),
            replays: AtomicUsize::new(0),
            records: AtomicUsize::new(0),
            absents: AtomicUsize::new(0),
        }
    }

    /// Handle one call
    ///
    /// Pointer, index and body access run on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns error on origin failure while recording, on storage failure,
    /// or if the active dataset cannot be resolved. A missing fixture is
    /// not an error, but an index entry whose body is gone is
    /// [`HulkError::IndexCorrupted`] unless recording can replace it.
    pub async fn handle(&self, call: &Call) -> Result<FixtureResponse> {
        let fingerprint = fingerprint(&call.path, &call.params(), self.digest);
        let selector = Arc::clone(&self.selector);
        let store = self.store.clone();
        let default_dataset = self.default_dataset();
        let host = call.host.clone();

        let (resolved, lookup) = run_blocking(move || {
            let resolved = resolve_with(&selector, &default_dataset, host, fingerprint)?;
            let lookup = lookup_fixture(&store, &resolved)?;
            Ok((resolved, lookup))
        })
        .await?;

        debug!(
            "{} {} -> {}/{}/{}",
            call.method,
            resolved.index_url(),
            resolved.dataset,
            resolved.host,
            resolved.fingerprint.hash
        );

        match lookup {
            Lookup::Hit { body, entry } => Ok(self.replay(&resolved, body, entry)),
            Lookup::Miss { entry: None } if !self.is_recording() => {
                Ok(self.absent(call, &resolved))
            }
            Lookup::Miss { entry: Some(entry) } if !self.is_recording() => {
                warn!(
                    "Index of '{}' lists {} ({}) but its body is missing",
                    resolved.dataset, resolved.fingerprint.hash, entry.url
                );
                Err(HulkError::IndexCorrupted {
                    dataset: resolved.dataset,
                    hash: resolved.fingerprint.hash,
                    url: entry.url,
                })
            }
            Lookup::Miss { entry } => {
                if entry.is_some() {
                    warn!(
                        "Body of {} missing in '{}', recording it again",
                        resolved.fingerprint.hash, resolved.dataset
                    );
                }
                self.record(call, &resolved).await
            }
        }
    }

    /// Compute dataset, host and fingerprint for `call`
    ///
    /// Reads the dataset pointer on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns error if the dataset pointer cannot be read or a name is unsafe
    pub fn resolve(&self, call: &Call) -> Result<Resolved> {
        resolve_with(
            &self.selector,
            &self.default_dataset(),
            call.host.clone(),
            fingerprint(&call.path, &call.params(), self.digest),
        )
    }

    fn replay(
        &self,
        resolved: &Resolved,
        body: Vec<u8>,
        entry: Option<IndexEntry>,
    ) -> FixtureResponse {
        let content_type = entry
            .and_then(|entry| entry.content_type)
            .filter(|ct| !ct.is_empty())
            .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string());

        self.replays.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Replay {}/{}/{} ({} bytes)",
            resolved.dataset,
            resolved.host,
            resolved.fingerprint.hash,
            body.len()
        );

        FixtureResponse {
            outcome: Outcome::Replay,
            status: 200,
            content_type,
            body,
        }
    }

    fn absent(&self, call: &Call, resolved: &Resolved) -> FixtureResponse {
        self.absents.fetch_add(1, Ordering::Relaxed);

        let location = format!(
            "{}/{}/{}",
            resolved.dataset, resolved.host, resolved.fingerprint.hash
        );
        warn!(
            "No fixture for {} {} (expected at {})",
            call.method,
            resolved.index_url(),
            location
        );

        FixtureResponse {
            outcome: Outcome::Absent,
            status: ABSENT_STATUS,
            content_type: "text/plain; charset=utf-8".to_string(),
            body: format!(
                "No fixture recorded for {} {} in dataset '{}' (expected at {})",
                call.method,
                resolved.index_url(),
                resolved.dataset,
                location
            )
            .into_bytes(),
        }
    }

    async fn record(&self, call: &Call, resolved: &Resolved) -> Result<FixtureResponse> {
        if !is_supported(&call.method) {
            return Err(HulkError::UnsupportedMethod(call.method.clone()));
        }

        let request = OriginRequest {
            method: call.method.clone(),
            url: call.origin_url(),
            query: call.query.to_pairs(),
            form: call.form.to_pairs(),
        };

        info!("Recording {} {}", request.method, call.full_url());

        let response = tokio::time::timeout(self.origin_timeout, self.origin.fetch(&request))
            .await
            .map_err(|_| HulkError::OriginTimeout {
                url: call.full_url(),
                timeout_ms: self.origin_timeout.as_millis() as u64,
            })??;

        if !response.is_success() {
            warn!(
                "Origin returned {} for {}, nothing recorded",
                response.status,
                call.full_url()
            );
            return Err(HulkError::OriginStatus {
                status: response.status,
                url: call.full_url(),
            });
        }

        let status = response.status;
        let content_type = response.content_type.or_else(|| call.content_type.clone());

        let store = self.store.clone();
        let target = resolved.clone();
        let recorded_type = content_type.clone();
        let body = run_blocking(move || {
            store.record(
                &target.dataset,
                &target.host,
                &target.fingerprint.hash,
                &response.body,
                recorded_type.as_deref(),
                &target.index_url(),
            )?;
            Ok(response.body)
        })
        .await?;
        self.records.fetch_add(1, Ordering::Relaxed);

        Ok(FixtureResponse {
            outcome: Outcome::Record,
            status,
            content_type: content_type.unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string()),
            body,
        })
    }
}

/// Result of looking a resolved call up in the store
enum Lookup {
    Hit {
        body: Vec<u8>,
        entry: Option<IndexEntry>,
    },
    Miss {
        entry: Option<IndexEntry>,
    },
}

fn resolve_with(
    selector: &DatasetSelector,
    default_dataset: &str,
    host: String,
    fingerprint: Fingerprint,
) -> Result<Resolved> {
    let dataset = selector.get_active(default_dataset)?;
    validate_name(&dataset)?;
    validate_name(&host)?;

    Ok(Resolved {
        dataset,
        host,
        fingerprint,
    })
}

fn lookup_fixture(store: &FixtureStore, resolved: &Resolved) -> Result<Lookup> {
    let entry = readable_index_entry(store, resolved)?;
    let body = store.read(&resolved.dataset, &resolved.host, &resolved.fingerprint.hash)?;

    Ok(match body {
        Some(body) => Lookup::Hit { body, entry },
        None => Lookup::Miss { entry },
    })
}

/// Index entry for `resolved`; an unparseable index only loses metadata
fn readable_index_entry(store: &FixtureStore, resolved: &Resolved) -> Result<Option<IndexEntry>> {
    match store.index_entry(&resolved.dataset, &resolved.fingerprint.hash) {
        Ok(entry) => Ok(entry),
        Err(HulkError::InvalidIndex { path, reason }) => {
            warn!("Ignoring unreadable index {}: {}", path.display(), reason);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

impl<O> ReplayEngine<O> {
    /// Dataset used when the pointer is unset
    #[must_use]
    pub fn default_dataset(&self) -> String {
        match self.default_dataset.read() {
            Ok(name) => name.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Change the dataset used when the pointer is unset
    ///
    /// # Errors
    ///
    /// Returns error if the name is not filesystem-safe
    pub fn set_default_dataset(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        let mut guard = match self.default_dataset.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = name.to_string();
        info!("Default dataset set to '{}'", name);
        Ok(())
    }

    /// Whether missing fixtures are fetched from the origin
    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Relaxed)
    }

    /// Enable or disable recording
    pub fn set_recording(&self, enabled: bool) {
        self.recording.store(enabled, Ordering::Relaxed);
        info!("Recording {}", if enabled { "enabled" } else { "disabled" });
    }

    /// Fixture store used by the engine
    #[must_use]
    pub fn store(&self) -> &FixtureStore {
        &self.store
    }

    /// Dataset selector used by the engine
    #[must_use]
    pub fn selector(&self) -> &Arc<DatasetSelector> {
        &self.selector
    }

    /// Counters since the engine was created
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            replays: self.replays.load(Ordering::Relaxed),
            records: self.records.load(Ordering::Relaxed),
            absents: self.absents.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::Params;
    use crate::origin::OriginResponse;
    use crate::replay::call::parse_query;
    use crate::storage::{FileLock, LockMode};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Origin that answers every request with a fixed response
    struct StubOrigin {
        status: u16,
        body: &'static str,
        seen: Mutex<Vec<OriginRequest>>,
    }

    impl StubOrigin {
        fn new(status: u16, body: &'static str) -> Self {
            Self {
                status,
                body,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    impl Origin for StubOrigin {
        async fn fetch(&self, request: &OriginRequest) -> Result<OriginResponse> {
            self.seen.lock().unwrap().push(request.clone());
            Ok(OriginResponse {
                status: self.status,
                content_type: Some("application/json".to_string()),
                body: self.body.as_bytes().to_vec(),
            })
        }
    }

    /// Origin that never answers
    struct HangingOrigin;

    impl Origin for HangingOrigin {
        async fn fetch(&self, _request: &OriginRequest) -> Result<OriginResponse> {
            std::future::pending().await
        }
    }

    fn config(dir: &TempDir, recording: bool) -> Config {
        Config::default()
            .base_dir(dir.path().join("datasets"))
            .pointer_file(dir.path().join("current_dataset.hulk"))
            .default_dataset("orders")
            .recording(recording)
    }

    fn engine<O: Origin>(dir: &TempDir, recording: bool, origin: O) -> ReplayEngine<O> {
        let config = config(dir, recording);
        let selector = Arc::new(DatasetSelector::from_config(&config));
        ReplayEngine::new(&config, selector, origin)
    }

    fn search_call() -> Call {
        Call::new("GET", "api.example.com", "/search").with_query(parse_query("q=cat"))
    }

    #[tokio::test]
    async fn test_absent_when_not_recording() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, false, StubOrigin::new(200, "{}"));

        let response = engine.handle(&search_call()).await.unwrap();

        assert_eq!(response.outcome, Outcome::Absent);
        assert_eq!(response.status, ABSENT_STATUS);
        assert_eq!(engine.origin.calls(), 0);
        assert!(!dir.path().join("datasets/orders/api.example.com").exists());
        assert_eq!(engine.stats().absents, 1);
    }

    #[tokio::test]
    async fn test_record_then_replay() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, true, StubOrigin::new(200, "{\"hits\":1}"));
        let call = search_call();

        let recorded = engine.handle(&call).await.unwrap();
        assert_eq!(recorded.outcome, Outcome::Record);
        assert_eq!(recorded.body, b"{\"hits\":1}");

        let hash = engine.resolve(&call).unwrap().fingerprint.hash;
        let body_path = dir
            .path()
            .join("datasets/orders/api.example.com")
            .join(&hash);
        assert_eq!(std::fs::read(body_path).unwrap(), b"{\"hits\":1}");

        let entry = engine.store().index_entry("orders", &hash).unwrap().unwrap();
        assert_eq!(entry.url, "api.example.com/search?q=cat");
        assert_eq!(entry.content_type.as_deref(), Some("application/json"));

        let replayed = engine.handle(&call).await.unwrap();
        assert_eq!(replayed.outcome, Outcome::Replay);
        assert_eq!(replayed.content_type, "application/json");
        assert_eq!(replayed.body, recorded.body);
        assert_eq!(engine.origin.calls(), 1);
        assert_eq!(
            engine.stats(),
            EngineStats {
                replays: 1,
                records: 1,
                absents: 0
            }
        );
    }

    #[tokio::test]
    async fn test_origin_failure_is_not_cached() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, true, StubOrigin::new(503, "down"));

        let err = engine.handle(&search_call()).await.unwrap_err();
        assert!(matches!(err, HulkError::OriginStatus { status: 503, .. }));
        assert!(!dir.path().join("datasets/orders").exists());
    }

    #[tokio::test]
    async fn test_origin_timeout_is_failure() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir, true);
        config.origin_timeout_ms = 20;
        let selector = Arc::new(DatasetSelector::from_config(&config));
        let engine = ReplayEngine::new(&config, selector, HangingOrigin);

        let err = engine.handle(&search_call()).await.unwrap_err();
        assert!(matches!(err, HulkError::OriginTimeout { .. }));
        assert!(err.is_origin_failure());
    }

    #[tokio::test]
    async fn test_replay_without_index_entry_uses_fallback_type() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, false, StubOrigin::new(200, ""));
        let call = search_call();

        let hash = engine.resolve(&call).unwrap().fingerprint.hash;
        engine
            .store()
            .write("orders", "api.example.com", &hash, b"raw")
            .unwrap();

        let response = engine.handle(&call).await.unwrap();
        assert_eq!(response.outcome, Outcome::Replay);
        assert_eq!(response.content_type, FALLBACK_CONTENT_TYPE);
    }

    #[tokio::test]
    async fn test_unreadable_index_replays_with_fallback_type() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, false, StubOrigin::new(200, ""));
        let call = search_call();

        let hash = engine.resolve(&call).unwrap().fingerprint.hash;
        engine
            .store()
            .write("orders", "api.example.com", &hash, b"raw")
            .unwrap();
        std::fs::write(dir.path().join("datasets/orders/dataset.json"), "{not json").unwrap();

        let response = engine.handle(&call).await.unwrap();
        assert_eq!(response.outcome, Outcome::Replay);
        assert_eq!(response.content_type, FALLBACK_CONTENT_TYPE);
        assert_eq!(response.body, b"raw");
    }

    #[tokio::test]
    async fn test_indexed_fixture_without_body_is_corruption() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, true, StubOrigin::new(200, "{}"));
        let call = search_call();

        engine.handle(&call).await.unwrap();
        let resolved = engine.resolve(&call).unwrap();
        std::fs::remove_file(
            engine
                .store()
                .fixture_path("orders", "api.example.com", &resolved.fingerprint.hash)
                .unwrap(),
        )
        .unwrap();

        engine.set_recording(false);
        let err = engine.handle(&call).await.unwrap_err();
        match err {
            HulkError::IndexCorrupted { dataset, hash, url } => {
                assert_eq!(dataset, "orders");
                assert_eq!(hash, resolved.fingerprint.hash);
                assert_eq!(url, "api.example.com/search?q=cat");
            }
            other => panic!("expected IndexCorrupted, got {other:?}"),
        }
        assert_eq!(engine.stats().absents, 0);

        // Recording replaces the lost body
        engine.set_recording(true);
        let response = engine.handle(&call).await.unwrap();
        assert_eq!(response.outcome, Outcome::Record);
        assert_eq!(engine.origin.calls(), 2);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_pointer_lock_wait_does_not_stall_runtime() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, false, StubOrigin::new(200, ""));
        engine.selector().set_active("orders").unwrap();

        let pointer = dir.path().join("current_dataset.hulk");
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder = std::thread::spawn(move || {
            let mut options = std::fs::OpenOptions::new();
            options.read(true).write(true);
            let _held =
                FileLock::acquire(&pointer, &options, LockMode::Exclusive, Duration::from_secs(1))
                    .unwrap();
            locked_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(300));
        });
        locked_rx.recv().unwrap();

        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = {
            let ticks = Arc::clone(&ticks);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_millis(10));
                loop {
                    interval.tick().await;
                    ticks.fetch_add(1, Ordering::Relaxed);
                }
            })
        };

        let response = engine.handle(&search_call()).await.unwrap();
        assert_eq!(response.outcome, Outcome::Absent);
        assert!(ticks.load(Ordering::Relaxed) > 5);

        ticker.abort();
        holder.join().unwrap();
    }

    #[tokio::test]
    async fn test_active_dataset_overrides_default() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, true, StubOrigin::new(200, "x"));

        engine.selector().set_active("search").unwrap();
        engine.handle(&search_call()).await.unwrap();

        assert!(dir.path().join("datasets/search/api.example.com").is_dir());
        assert!(!dir.path().join("datasets/orders").exists());
    }

    #[tokio::test]
    async fn test_set_default_dataset() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, false, StubOrigin::new(200, ""));

        engine.set_default_dataset("inventory").unwrap();
        assert!(engine.set_default_dataset("../x").is_err());

        let resolved = engine.resolve(&search_call()).unwrap();
        assert_eq!(resolved.dataset, "inventory");
    }

    #[tokio::test]
    async fn test_post_form_params_are_fingerprinted_and_forwarded() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, true, StubOrigin::new(201, "created"));

        let mut form = Params::new();
        form.insert("name", Some("widget".to_string()));
        form.insert("color", None);
        let call = Call::new("POST", "api.example.com", "/items").with_form(form);

        let response = engine.handle(&call).await.unwrap();
        assert_eq!(response.status, 201);

        let resolved = engine.resolve(&call).unwrap();
        assert_eq!(resolved.fingerprint.canonical, "/items?name=widget");

        let seen = engine.origin.seen.lock().unwrap();
        assert_eq!(seen[0].url, "http://api.example.com/items");
        assert_eq!(seen[0].form, vec![("name".to_string(), "widget".to_string())]);
    }

    #[tokio::test]
    async fn test_unsupported_method_on_record() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, true, StubOrigin::new(200, ""));

        let call = Call::new("DELETE", "api.example.com", "/items/1");
        assert!(matches!(
            engine.handle(&call).await,
            Err(HulkError::UnsupportedMethod(_))
        ));
        assert_eq!(engine.origin.calls(), 0);
    }

    #[tokio::test]
    async fn test_toggle_recording() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, false, StubOrigin::new(200, "x"));

        assert!(!engine.is_recording());
        engine.set_recording(true);
        let response = engine.handle(&search_call()).await.unwrap();
        assert_eq!(response.outcome, Outcome::Record);
    }
}
