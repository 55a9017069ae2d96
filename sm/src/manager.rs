//! SearchManager - query cursor and backward scan passes
//!
//! State lives behind one mutex: the active query, the cursor (next chunk id
//! to examine, negative once exhausted) and a generation counter bumped on
//! every query change. Scan passes run on the blocking pool, one at a time,
//! and stop delivering as soon as their generation is stale. Matches are
//! handed to the materializer with no lock held, tagged with their
//! generation so the collaborator can drop late ones.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chunkstore::{CatalogItem, ChunkStore};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::SearchError;
use crate::materializer::{Materializer, SinkPush};

/// Snapshot of the manager's cursor state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchStatus {
    /// Active query, `None` while idle
    pub query: Option<String>,
    /// Next chunk id to examine; negative once exhausted
    pub cursor: i64,
    /// Bumped on every query change
    pub generation: u64,
    /// Chunks in the store right now
    pub chunk_count: usize,
    /// No further matches exist for the active query
    pub exhausted: bool,
}

/// What one scan pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanOutcome {
    /// Generation the pass ran for
    pub generation: u64,
    /// Matches handed to the materializer
    pub delivered: usize,
    /// Chunks read and tested
    pub examined: usize,
    /// Cursor went below zero during or before this pass
    pub exhausted: bool,
    /// A newer query took over before the pass finished
    pub superseded: bool,
    /// Stopped through [`ScanHandle::cancel`]
    pub cancelled: bool,
    /// The materializer's page was full; the refused match is offered again
    /// by the next pass
    pub page_full: bool,
}

/// Handle to a scan pass running on the blocking pool
///
/// Dropping the handle detaches the pass; it still runs to completion.
#[derive(Debug)]
pub struct ScanHandle {
    generation: u64,
    cancel: Arc<AtomicBool>,
    join: JoinHandle<Result<ScanOutcome, SearchError>>,
}

impl ScanHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Ask the pass to stop before examining its next chunk
    pub fn cancel(&self) {
        debug!(generation = self.generation, "ScanHandle::cancel: called");
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the pass to finish
    pub async fn wait(self) -> Result<ScanOutcome, SearchError> {
        self.join.await.map_err(|e| SearchError::Worker(e.to_string()))?
    }
}

#[derive(Debug)]
struct SearchState {
    query: Option<String>,
    cursor: i64,
    generation: u64,
}

struct Shared {
    store: Arc<ChunkStore>,
    materializer: Arc<dyn Materializer>,
    page_size: usize,
    state: Mutex<SearchState>,
    /// Held for the whole of a pass so passes never interleave
    pass: Mutex<()>,
}

/// Newest-first, paginated substring search over a [`ChunkStore`]
///
/// Cheap to clone; clones drive the same cursor.
#[derive(Clone)]
pub struct SearchManager {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SearchManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchManager")
            .field("page_size", &self.shared.page_size)
            .field("state", &*self.shared.lock_state())
            .finish()
    }
}

impl SearchManager {
    /// Create an idle manager over `store`, delivering pages of `page_size`
    pub fn new(store: Arc<ChunkStore>, materializer: Arc<dyn Materializer>, page_size: usize) -> Self {
        let cursor = store.chunk_count() as i64 - 1;
        debug!(cursor, page_size, "SearchManager::new: called");
        Self {
            shared: Arc::new(Shared {
                store,
                materializer,
                page_size: page_size.max(1),
                state: Mutex::new(SearchState {
                    query: None,
                    cursor,
                    generation: 0,
                }),
                pass: Mutex::new(()),
            }),
        }
    }

    pub fn page_size(&self) -> usize {
        self.shared.page_size
    }

    pub fn store(&self) -> &Arc<ChunkStore> {
        &self.shared.store
    }

    /// Set the active query and start a scan pass
    ///
    /// An empty query does nothing. A query different from the current one
    /// supersedes any in-flight pass, clears the materializer's page and
    /// restarts the cursor at the newest chunk. Must be called within a
    /// Tokio runtime.
    pub fn set_query(&self, query: &str) -> Option<ScanHandle> {
        debug!(%query, "SearchManager::set_query: called");
        if query.is_empty() {
            debug!("SearchManager::set_query: empty query, ignoring");
            return None;
        }

        let (generation, changed) = {
            let mut state = self.shared.lock_state();
            let changed = state.query.as_deref() != Some(query);
            if changed {
                state.generation += 1;
                state.query = Some(query.to_string());
                state.cursor = self.shared.store.chunk_count() as i64 - 1;
                info!(
                    %query,
                    generation = state.generation,
                    cursor = state.cursor,
                    "New search query"
                );
            }
            (state.generation, changed)
        };

        if changed {
            self.shared.materializer.reset(generation);
        }
        Some(self.spawn_pass(generation))
    }

    /// Start a pass for the next page of the active query
    ///
    /// Returns `None` while idle or once the cursor is exhausted. Must be
    /// called within a Tokio runtime.
    pub fn fetch_more(&self) -> Option<ScanHandle> {
        debug!("SearchManager::fetch_more: called");
        let generation = self.runnable_generation()?;
        Some(self.spawn_pass(generation))
    }

    /// Run the next page's pass on the calling thread
    pub fn scan_page_blocking(&self) -> Result<Option<ScanOutcome>, SearchError> {
        debug!("SearchManager::scan_page_blocking: called");
        match self.runnable_generation() {
            Some(generation) => self
                .shared
                .run_pass(generation, &AtomicBool::new(false))
                .map(Some),
            None => Ok(None),
        }
    }

    pub fn query(&self) -> Option<String> {
        self.shared.lock_state().query.clone()
    }

    /// Next chunk id to examine; negative once the query is exhausted
    pub fn cursor(&self) -> i64 {
        self.shared.lock_state().cursor
    }

    pub fn generation(&self) -> u64 {
        self.shared.lock_state().generation
    }

    /// True when a query is active and no chunks remain to examine
    pub fn is_exhausted(&self) -> bool {
        let state = self.shared.lock_state();
        state.query.is_some() && state.cursor < 0
    }

    pub fn status(&self) -> SearchStatus {
        let state = self.shared.lock_state();
        SearchStatus {
            query: state.query.clone(),
            cursor: state.cursor,
            generation: state.generation,
            chunk_count: self.shared.store.chunk_count(),
            exhausted: state.query.is_some() && state.cursor < 0,
        }
    }

    fn runnable_generation(&self) -> Option<u64> {
        let state = self.shared.lock_state();
        if state.query.is_none() {
            debug!("SearchManager: no query set");
            return None;
        }
        if state.cursor < 0 {
            debug!(generation = state.generation, "SearchManager: query exhausted");
            return None;
        }
        Some(state.generation)
    }

    fn spawn_pass(&self, generation: u64) -> ScanHandle {
        let cancel = Arc::new(AtomicBool::new(false));
        let shared = Arc::clone(&self.shared);
        let flag = Arc::clone(&cancel);
        let join = tokio::task::spawn_blocking(move || shared.run_pass(generation, &flag));
        ScanHandle {
            generation,
            cancel,
            join,
        }
    }
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, SearchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Scan backward from the cursor until the page fills, the store runs
    /// out, the query changes or the pass is cancelled
    fn run_pass(&self, generation: u64, cancel: &AtomicBool) -> Result<ScanOutcome, SearchError> {
        let _pass = self.pass.lock().unwrap_or_else(PoisonError::into_inner);
        let mut outcome = ScanOutcome {
            generation,
            ..Default::default()
        };

        let query = {
            let state = self.lock_state();
            match (&state.query, state.generation == generation) {
                (Some(query), true) => query.clone(),
                _ => {
                    outcome.superseded = true;
                    return Ok(outcome);
                }
            }
        };
        debug!(%query, generation, cursor = self.lock_state().cursor, "Shared::run_pass: started");

        while outcome.delivered < self.page_size {
            if cancel.load(Ordering::SeqCst) {
                outcome.cancelled = true;
                break;
            }

            let id = {
                let mut state = self.lock_state();
                if state.generation != generation {
                    outcome.superseded = true;
                    break;
                }
                if state.cursor < 0 {
                    outcome.exhausted = true;
                    break;
                }
                let id = state.cursor as u64;
                state.cursor -= 1;
                id
            };

            outcome.examined += 1;
            let payload = self.store.read_chunk(id)?;
            let item = match CatalogItem::decode(&payload) {
                Ok(item) => item,
                Err(e) => {
                    warn!(id, error = %e, "Skipping undecodable chunk");
                    continue;
                }
            };
            if !item.matches(&query) {
                continue;
            }

            if self.lock_state().generation != generation {
                outcome.superseded = true;
                break;
            }
            debug!(id, name = %item.name, "Shared::run_pass: match");
            match self.materializer.materialize(generation, item) {
                SinkPush::Accepted => outcome.delivered += 1,
                SinkPush::Full => {
                    // Hand the chunk back so the next pass offers it again
                    let mut state = self.lock_state();
                    if state.generation == generation {
                        state.cursor = state.cursor.max(id as i64);
                    }
                    outcome.page_full = true;
                    break;
                }
                SinkPush::Stale => {
                    outcome.superseded = true;
                    break;
                }
            }
        }

        if !outcome.superseded {
            let state = self.lock_state();
            outcome.exhausted = state.generation == generation && state.cursor < 0;
        }

        debug!(
            generation,
            delivered = outcome.delivered,
            examined = outcome.examined,
            exhausted = outcome.exhausted,
            superseded = outcome.superseded,
            page_full = outcome.page_full,
            "Shared::run_pass: finished"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materializer::{ResultSink, SinkMaterializer};
    use tempfile::TempDir;

    /// Records every delivery in order
    #[derive(Default)]
    struct Recorder {
        items: Mutex<Vec<CatalogItem>>,
        resets: Mutex<usize>,
    }

    impl Recorder {
        fn names(&self) -> Vec<String> {
            self.items.lock().unwrap().iter().map(|i| i.name.clone()).collect()
        }
    }

    impl Materializer for Recorder {
        fn materialize(&self, _generation: u64, item: CatalogItem) -> SinkPush {
            self.items.lock().unwrap().push(item);
            SinkPush::Accepted
        }

        fn reset(&self, _generation: u64) {
            *self.resets.lock().unwrap() += 1;
        }
    }

    fn store_with(temp: &TempDir, names: &[&str]) -> Arc<ChunkStore> {
        let store = ChunkStore::open(temp.path(), "catalog").unwrap();
        for (i, name) in names.iter().enumerate() {
            let item = CatalogItem::new(*name, format!("item {}", i), format!("ref-{}", i));
            store.append_chunk(&item.encode().unwrap()).unwrap();
        }
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_page_then_exhaustion() {
        let temp = TempDir::new().unwrap();
        // Matches for "cat" at ids 1, 3, 5, 6, 7
        let store = store_with(
            &temp,
            &["dog", "Cat 1", "bird", "CAT 3", "fish", "bobcat 5", "Catalog 6", "cat 7"],
        );
        let recorder = Arc::new(Recorder::default());
        let manager = SearchManager::new(store, recorder.clone(), 5);

        let outcome = manager.set_query("cat").unwrap().wait().await.unwrap();
        assert_eq!(recorder.names(), vec!["cat 7", "Catalog 6", "bobcat 5", "CAT 3", "Cat 1"]);
        assert_eq!(outcome.delivered, 5);
        assert_eq!(outcome.examined, 7);
        assert!(!outcome.exhausted);
        assert_eq!(manager.cursor(), 0);
        assert!(!manager.is_exhausted());

        let outcome = manager.fetch_more().unwrap().wait().await.unwrap();
        assert_eq!(outcome.delivered, 0);
        assert!(outcome.exhausted);
        assert_eq!(recorder.names().len(), 5);
        assert!(manager.cursor() < 0);
        assert!(manager.is_exhausted());

        assert!(manager.fetch_more().is_none());
    }

    #[tokio::test]
    async fn test_empty_query_is_noop() {
        let temp = TempDir::new().unwrap();
        let store = store_with(&temp, &["a", "b"]);
        let recorder = Arc::new(Recorder::default());
        let manager = SearchManager::new(store, recorder.clone(), 5);

        assert!(manager.set_query("").is_none());
        assert_eq!(manager.query(), None);
        assert_eq!(manager.generation(), 0);
        assert_eq!(*recorder.resets.lock().unwrap(), 0);
        assert!(manager.fetch_more().is_none());
    }

    #[tokio::test]
    async fn test_same_query_continues_cursor() {
        let temp = TempDir::new().unwrap();
        let store = store_with(&temp, &["x1", "x2", "x3", "x4"]);
        let recorder = Arc::new(Recorder::default());
        let manager = SearchManager::new(store, recorder.clone(), 2);

        manager.set_query("x").unwrap().wait().await.unwrap();
        assert_eq!(recorder.names(), vec!["x4", "x3"]);

        let outcome = manager.set_query("x").unwrap().wait().await.unwrap();
        assert_eq!(outcome.generation, 1);
        assert_eq!(recorder.names(), vec!["x4", "x3", "x2", "x1"]);
        assert_eq!(*recorder.resets.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_query_change_resets_cursor_and_page() {
        let temp = TempDir::new().unwrap();
        let store = store_with(&temp, &["ab", "a", "b", "a", "a", "b", "a", "a"]);
        let sink = ResultSink::new(2);
        let manager = SearchManager::new(store, Arc::new(SinkMaterializer::new(sink.clone())), 2);

        manager.set_query("a").unwrap().wait().await.unwrap();
        assert_eq!(sink.len(), 2);
        assert_eq!(manager.cursor(), 5);

        let outcome = manager.set_query("b").unwrap().wait().await.unwrap();
        assert_eq!(outcome.generation, 2);
        let names: Vec<String> = sink.snapshot().into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["b", "b"]);
        assert_eq!(manager.cursor(), 1);
    }

    #[tokio::test]
    async fn test_undecodable_chunks_are_skipped() {
        let temp = TempDir::new().unwrap();
        let store = store_with(&temp, &["match one"]);
        store.append_chunk(&[200, 1, 2]).unwrap();
        store
            .append_chunk(&CatalogItem::new("match two", "", "").encode().unwrap())
            .unwrap();
        store.append_chunk(&[]).unwrap();

        let recorder = Arc::new(Recorder::default());
        let manager = SearchManager::new(store, recorder.clone(), 5);
        let outcome = manager.set_query("MATCH").unwrap().wait().await.unwrap();

        assert_eq!(recorder.names(), vec!["match two", "match one"]);
        assert_eq!(outcome.examined, 4);
        assert!(outcome.exhausted);
    }

    #[tokio::test]
    async fn test_superseded_pass_delivers_nothing() {
        let temp = TempDir::new().unwrap();
        let store = store_with(&temp, &["a1", "b1", "a2", "b2", "a3"]);
        let recorder = Arc::new(Recorder::default());
        let manager = SearchManager::new(store, recorder.clone(), 5);

        // Hold the pass lock so both passes queue up behind it
        let guard = manager.shared.pass.lock().unwrap();
        let first = manager.set_query("a").unwrap();
        let second = manager.set_query("b").unwrap();
        drop(guard);

        let first = first.wait().await.unwrap();
        let second = second.wait().await.unwrap();

        assert!(first.superseded);
        assert_eq!(first.delivered, 0);
        assert_eq!(second.delivered, 2);
        assert_eq!(recorder.names(), vec!["b2", "b1"]);
    }

    #[tokio::test]
    async fn test_cancelled_pass_stops() {
        let temp = TempDir::new().unwrap();
        let store = store_with(&temp, &["a", "a", "a"]);
        let recorder = Arc::new(Recorder::default());
        let manager = SearchManager::new(store, recorder.clone(), 5);

        let guard = manager.shared.pass.lock().unwrap();
        let handle = manager.set_query("a").unwrap();
        handle.cancel();
        drop(guard);

        let outcome = handle.wait().await.unwrap();
        assert!(outcome.cancelled);
        assert_eq!(outcome.examined, 0);
        assert_eq!(manager.cursor(), 2);

        let outcome = manager.fetch_more().unwrap().wait().await.unwrap();
        assert_eq!(outcome.delivered, 3);
    }

    #[tokio::test]
    async fn test_empty_store_exhausts_immediately() {
        let temp = TempDir::new().unwrap();
        let store = store_with(&temp, &[]);
        let manager = SearchManager::new(store, Arc::new(Recorder::default()), 5);

        let outcome = manager.set_query("anything").unwrap().wait().await.unwrap();
        assert_eq!(outcome.examined, 0);
        assert!(outcome.exhausted);
        assert!(manager.status().exhausted);
    }

    #[test]
    fn test_scan_page_blocking() {
        let temp = TempDir::new().unwrap();
        let store = store_with(&temp, &["z1", "z2", "z3"]);
        let recorder = Arc::new(Recorder::default());
        let manager = SearchManager::new(store, recorder.clone(), 2);

        assert_eq!(manager.scan_page_blocking().unwrap(), None);
        {
            let mut state = manager.shared.lock_state();
            state.query = Some("z".to_string());
            state.generation = 1;
        }
        let outcome = manager.scan_page_blocking().unwrap().unwrap();
        assert_eq!(outcome.delivered, 2);
        let outcome = manager.scan_page_blocking().unwrap().unwrap();
        assert_eq!(outcome.delivered, 1);
        assert!(outcome.exhausted);
        assert_eq!(recorder.names(), vec!["z3", "z2", "z1"]);
    }

    #[test]
    fn test_status_reports_idle() {
        let temp = TempDir::new().unwrap();
        let store = store_with(&temp, &["a", "b", "c"]);
        let manager = SearchManager::new(store, Arc::new(Recorder::default()), 5);

        let status = manager.status();
        assert_eq!(
            status,
            SearchStatus {
                query: None,
                cursor: 2,
                generation: 0,
                chunk_count: 3,
                exhausted: false,
            }
        );
    }

    #[tokio::test]
    async fn test_full_page_stops_pass_and_keeps_match() {
        let temp = TempDir::new().unwrap();
        let names: Vec<String> = (0..12).map(|i| format!("m{}", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let store = store_with(&temp, &refs);
        let sink = ResultSink::new(5);
        let manager = SearchManager::new(store, Arc::new(SinkMaterializer::new(sink.clone())), 5);

        manager.set_query("m").unwrap().wait().await.unwrap();
        assert_eq!(sink.len(), 5);
        assert_eq!(manager.cursor(), 6);

        // Page not drained: the pass refuses to run past it
        let outcome = manager.fetch_more().unwrap().wait().await.unwrap();
        assert!(outcome.page_full);
        assert_eq!(outcome.delivered, 0);
        assert_eq!(outcome.examined, 1);
        assert_eq!(manager.cursor(), 6);
        assert_eq!(sink.len(), 5);

        let mut seen: Vec<String> = sink.take().into_iter().map(|i| i.name).collect();
        while let Some(scan) = manager.fetch_more() {
            scan.wait().await.unwrap();
            seen.extend(sink.take().into_iter().map(|i| i.name));
        }

        let expected: Vec<String> = (0..12).rev().map(|i| format!("m{}", i)).collect();
        assert_eq!(seen, expected);
        assert!(manager.is_exhausted());
    }

    /// Parks inside the first delivery until released
    struct Gate {
        entered: Mutex<Option<std::sync::mpsc::Sender<()>>>,
        release: Mutex<std::sync::mpsc::Receiver<()>>,
        delivered: Mutex<Vec<(u64, String)>>,
    }

    impl Materializer for Gate {
        fn materialize(&self, generation: u64, item: CatalogItem) -> SinkPush {
            if let Some(entered) = self.entered.lock().unwrap().take() {
                entered.send(()).unwrap();
                self.release.lock().unwrap().recv().unwrap();
            }
            self.delivered.lock().unwrap().push((generation, item.name));
            SinkPush::Accepted
        }
    }

    #[tokio::test]
    async fn test_blocked_materializer_leaves_manager_responsive() {
        use std::sync::mpsc;
        use std::time::Duration;

        let temp = TempDir::new().unwrap();
        let store = store_with(&temp, &["b1", "a1", "a2"]);
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let gate = Arc::new(Gate {
            entered: Mutex::new(Some(entered_tx)),
            release: Mutex::new(release_rx),
            delivered: Mutex::new(Vec::new()),
        });
        let manager = SearchManager::new(store, gate.clone(), 5);

        let first = manager.set_query("a").unwrap();
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let observer = manager.clone();
        let (status_tx, status_rx) = mpsc::channel();
        std::thread::spawn(move || {
            let _ = status_tx.send(observer.status());
        });
        let status = status_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("status blocked behind the materializer");
        assert_eq!(status.query.as_deref(), Some("a"));
        assert_eq!(status.cursor, 1);

        let second = manager.set_query("b").unwrap();
        assert_eq!(manager.generation(), 2);
        release_tx.send(()).unwrap();

        let first = first.wait().await.unwrap();
        let second = second.wait().await.unwrap();
        assert!(first.superseded);
        assert_eq!(first.delivered, 1);
        assert_eq!(second.delivered, 1);
        assert_eq!(
            *gate.delivered.lock().unwrap(),
            vec![(1, "a2".to_string()), (2, "b1".to_string())]
        );
    }
}
