//! Fetch collaborator seam and the page sink it publishes into
//!
//! The search manager hands every match to a [`Materializer`] and moves on;
//! turning the item's reference into content (and retrying when that fails)
//! is entirely the collaborator's business.
//!
//! Every call carries the query generation it belongs to. Generations only
//! grow, so a collaborator can discard late deliveries from a superseded
//! query without coordinating with the manager.

use std::sync::{Arc, Mutex, PoisonError};

use chunkstore::CatalogItem;
use tokio::sync::mpsc;
use tracing::debug;

/// Receives matched items from a scan, in scan order
///
/// Called from the scan worker with no manager or store lock held.
pub trait Materializer: Send + Sync {
    /// Take one item matched for query `generation`
    ///
    /// [`SinkPush::Full`] ends the pass without consuming the item; the
    /// next pass offers it again. Items from a generation older than the
    /// latest [`Materializer::reset`] must be dropped and reported as
    /// [`SinkPush::Stale`].
    fn materialize(&self, generation: u64, item: CatalogItem) -> SinkPush;

    /// The query changed to `generation`; drop whatever page was accumulated
    ///
    /// May arrive after the first delivery of the same generation, and must
    /// then leave that page alone.
    fn reset(&self, _generation: u64) {}
}

/// Outcome of offering an item to a page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkPush {
    Accepted,
    /// The page is at capacity; the item was not stored
    Full,
    /// The item belongs to a superseded query
    Stale,
}

#[derive(Debug, Default)]
struct Page {
    generation: u64,
    items: Vec<CatalogItem>,
}

/// Capped, shared list of results for the current page
///
/// Cheap to clone; clones share the same list.
#[derive(Debug, Clone)]
pub struct ResultSink {
    page: Arc<Mutex<Page>>,
    capacity: usize,
}

impl ResultSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            page: Arc::new(Mutex::new(Page {
                generation: 0,
                items: Vec::with_capacity(capacity),
            })),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Page> {
        self.page.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an item to the current page unless it is full
    pub fn push(&self, item: CatalogItem) -> SinkPush {
        let mut page = self.lock();
        self.push_locked(&mut page, item)
    }

    /// Append an item matched for `generation`
    ///
    /// Older generations are refused; a newer one starts a fresh page.
    pub fn push_for(&self, generation: u64, item: CatalogItem) -> SinkPush {
        let mut page = self.lock();
        if generation < page.generation {
            debug!(generation, current = page.generation, "ResultSink::push_for: stale item");
            return SinkPush::Stale;
        }
        if generation > page.generation {
            page.generation = generation;
            page.items.clear();
        }
        self.push_locked(&mut page, item)
    }

    fn push_locked(&self, page: &mut Page, item: CatalogItem) -> SinkPush {
        if page.items.len() >= self.capacity {
            debug!(name = %item.name, "ResultSink::push: page full");
            return SinkPush::Full;
        }
        page.items.push(item);
        SinkPush::Accepted
    }

    /// Start a fresh page for `generation`; older generations are ignored
    pub fn reset_to(&self, generation: u64) {
        let mut page = self.lock();
        if generation > page.generation {
            page.generation = generation;
            page.items.clear();
        }
    }

    /// Generation of the current page
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Item at `index`, if present
    pub fn get(&self, index: usize) -> Option<CatalogItem> {
        self.lock().items.get(index).cloned()
    }

    /// Copy of the current page
    pub fn snapshot(&self) -> Vec<CatalogItem> {
        self.lock().items.clone()
    }

    /// Drain the current page, leaving the sink empty
    pub fn take(&self) -> Vec<CatalogItem> {
        std::mem::take(&mut self.lock().items)
    }

    pub fn clear(&self) {
        self.lock().items.clear();
    }
}

/// Publishes matches straight into a [`ResultSink`]
#[derive(Debug, Clone)]
pub struct SinkMaterializer {
    sink: ResultSink,
}

impl SinkMaterializer {
    pub fn new(sink: ResultSink) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &ResultSink {
        &self.sink
    }
}

impl Materializer for SinkMaterializer {
    fn materialize(&self, generation: u64, item: CatalogItem) -> SinkPush {
        self.sink.push_for(generation, item)
    }

    fn reset(&self, generation: u64) {
        debug!(generation, "SinkMaterializer::reset: new page");
        self.sink.reset_to(generation);
    }
}

/// Event forwarded by [`ChannelMaterializer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchEvent {
    /// Query changed; consumers should discard their page
    Reset { generation: u64 },
    /// A matched item to fetch
    Materialize { generation: u64, item: CatalogItem },
}

/// Forwards matches to an async consumer (e.g. a content-fetch client)
///
/// Events arrive in generation order: once a `Reset` is sent, no item of an
/// older generation follows it.
#[derive(Debug, Clone)]
pub struct ChannelMaterializer {
    tx: mpsc::UnboundedSender<FetchEvent>,
    latest: Arc<Mutex<u64>>,
}

impl ChannelMaterializer {
    /// Create the materializer and the receiver its events arrive on
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<FetchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                latest: Arc::new(Mutex::new(0)),
            },
            rx,
        )
    }

    fn send(&self, event: FetchEvent) {
        // Receiver gone means nobody wants results anymore
        if self.tx.send(event).is_err() {
            debug!("ChannelMaterializer: receiver dropped");
        }
    }
}

impl Materializer for ChannelMaterializer {
    fn materialize(&self, generation: u64, item: CatalogItem) -> SinkPush {
        let mut latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        if generation < *latest {
            return SinkPush::Stale;
        }
        if generation > *latest {
            *latest = generation;
            self.send(FetchEvent::Reset { generation });
        }
        self.send(FetchEvent::Materialize { generation, item });
        SinkPush::Accepted
    }

    fn reset(&self, generation: u64) {
        let mut latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        if generation > *latest {
            *latest = generation;
            self.send(FetchEvent::Reset { generation });
        }
    }
}
