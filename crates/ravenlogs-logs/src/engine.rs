use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use ravenlogs_types::{Error, LogFilter, LogLevel, LogRecord, Result};

/// Immutable view of the filtered records at one point in time
pub type Snapshot = Arc<Vec<Arc<LogRecord>>>;

/// Buffered notifications per observer before it starts lagging
const EVENT_CAPACITY: usize = 1024;

/// Change to the filtered view, delivered to observers
#[derive(Clone, Debug)]
pub enum ViewEvent {
    /// A newly ingested record matched the current filter
    Appended(Arc<LogRecord>),
    /// The filtered view was rebuilt (filter change, clear or batch load).
    /// Holds a [`LogEngine::filtered`] snapshot until every observer has
    /// received it.
    Reset(Snapshot),
}

/// Records guarded together by one lock
struct RecordStore {
    all: Vec<Arc<LogRecord>>,

    /// Copy-on-write: only cloned when a reader still holds the previous snapshot
    filtered: Snapshot,

    filter: LogFilter,

    counts: LevelCounts,
}

impl RecordStore {
    fn new(filter: LogFilter) -> Self {
        Self {
            all: Vec::new(),
            filtered: Arc::new(Vec::new()),
            filter,
            counts: LevelCounts::default(),
        }
    }

    fn push(&mut self, record: Arc<LogRecord>) -> bool {
        self.counts.increment(record.level);
        let matched = self.filter.matches(&record);
        if matched {
            Arc::make_mut(&mut self.filtered).push(Arc::clone(&record));
        }
        self.all.push(record);
        matched
    }

    fn refilter(&mut self) {
        let filtered = self
            .all
            .iter()
            .filter(|r| self.filter.matches(r))
            .cloned()
            .collect();
        self.filtered = Arc::new(filtered);
    }
}

/// Thread-safe store of every received record plus the view matching the
/// current filter
///
/// Cloning is cheap and every clone shares the same records.
#[derive(Clone)]
pub struct LogEngine {
    store: Arc<RwLock<RecordStore>>,
    events: broadcast::Sender<ViewEvent>,
}

impl LogEngine {
    /// Create an empty engine with the given filter
    pub fn new(filter: LogFilter) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store: Arc::new(RwLock::new(RecordStore::new(filter))),
            events,
        }
    }

    /// Register an observer of the filtered view
    ///
    /// An observer that falls behind gets `RecvError::Lagged` and should
    /// resynchronise with [`LogEngine::filtered`].
    pub fn subscribe(&self) -> broadcast::Receiver<ViewEvent> {
        self.events.subscribe()
    }

    /// Accept a record; returns whether it entered the filtered view
    pub fn ingest(&self, record: LogRecord) -> bool {
        let record = Arc::new(record);
        let mut store = self.store.write();
        let matched = store.push(Arc::clone(&record));
        if matched {
            // Sent under the lock so observers see events in ingestion order
            let _ = self.events.send(ViewEvent::Appended(record));
        }
        matched
    }

    /// Replace the filter and rebuild the filtered view from all records
    pub fn set_filter(&self, filter: LogFilter) {
        let mut store = self.store.write();
        store.filter = filter;
        store.refilter();
        let _ = self.events.send(ViewEvent::Reset(Arc::clone(&store.filtered)));
    }

    /// Current filter
    pub fn filter(&self) -> LogFilter {
        self.store.read().filter.clone()
    }

    /// Bulk-load previously saved records, then apply `filter` once
    pub fn load_batch(&self, records: Vec<LogRecord>, filter: LogFilter) {
        let mut store = self.store.write();
        store.all.reserve(records.len());
        for record in records {
            store.counts.increment(record.level);
            store.all.push(Arc::new(record));
        }
        store.filter = filter;
        store.refilter();
        let _ = self.events.send(ViewEvent::Reset(Arc::clone(&store.filtered)));
    }

    /// Empty both the full and filtered sequences
    pub fn clear(&self) {
        let mut store = self.store.write();
        store.all.clear();
        store.filtered = Arc::new(Vec::new());
        store.counts = LevelCounts::default();
        let _ = self.events.send(ViewEvent::Reset(Arc::clone(&store.filtered)));
    }

    pub fn is_all_empty(&self) -> bool {
        self.store.read().all.is_empty()
    }

    pub fn is_filtered_empty(&self) -> bool {
        self.store.read().filtered.is_empty()
    }

    /// Total number of records received
    pub fn len(&self) -> usize {
        self.store.read().all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.is_all_empty()
    }

    /// Number of records in the filtered view
    pub fn filtered_len(&self) -> usize {
        self.store.read().filtered.len()
    }

    /// Every record in arrival order
    pub fn all(&self) -> Vec<Arc<LogRecord>> {
        self.store.read().all.clone()
    }

    /// Snapshot of the filtered view
    ///
    /// While a snapshot is alive the next matching `ingest` copies the view
    /// (O(n) in the filtered length) so the snapshot stays unchanged. Drop
    /// snapshots once read rather than holding them across a stream.
    pub fn filtered(&self) -> Snapshot {
        Arc::clone(&self.store.read().filtered)
    }

    /// Entry count per log level across all records
    pub fn level_counts(&self) -> LevelCounts {
        self.store.read().counts.clone()
    }

    /// Filtered view as an indented JSON array
    pub fn to_json(&self) -> Result<String> {
        let store = self.store.read();
        let records: Vec<&LogRecord> = store.filtered.iter().map(|r| r.as_ref()).collect();
        serde_json::to_string_pretty(&records).map_err(|e| Error::Format(e.to_string()))
    }

    /// Filtered view rendered as plain text, one record after another
    pub fn to_text(&self) -> String {
        let store = self.store.read();
        store.filtered.iter().map(|r| r.to_string()).collect()
    }
}

impl Default for LogEngine {
    fn default() -> Self {
        Self::new(LogFilter::default())
    }
}

/// Counts per log level
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LevelCounts {
    pub trace: usize,
    pub debug: usize,
    pub info: usize,
    pub warn: usize,
    pub error: usize,
    pub fatal: usize,
}

impl LevelCounts {
    fn increment(&mut self, level: LogLevel) {
        match level {
            LogLevel::Trace => self.trace += 1,
            LogLevel::Debug => self.debug += 1,
            LogLevel::Info => self.info += 1,
            LogLevel::Warn => self.warn += 1,
            LogLevel::Error => self.error += 1,
            LogLevel::Fatal => self.fatal += 1,
        }
    }

    pub fn get(&self, level: LogLevel) -> usize {
        match level {
            LogLevel::Trace => self.trace,
            LogLevel::Debug => self.debug,
            LogLevel::Info => self.info,
            LogLevel::Warn => self.warn,
            LogLevel::Error => self.error,
            LogLevel::Fatal => self.fatal,
        }
    }

    pub fn total(&self) -> usize {
        self.trace + self.debug + self.info + self.warn + self.error + self.fatal
    }
}
