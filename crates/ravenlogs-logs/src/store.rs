//! Append-only JSON log files
//!
//! Each file holds one JSON array of records. Appending rewrites only the
//! closing bracket at the tail, so the file is a complete array after every
//! append.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use ravenlogs_types::{Error, LogRecord, Result};

/// Written at the start of a new file
const OPENING: &str = "[\n";

/// Terminates the array after every write
const CLOSING: &str = "\n]";

/// Placed between the previous last record and a new one
const SEPARATOR: &str = ",\n";

/// Bytes read per step while scanning back from the end of a file
const TAIL_CHUNK: u64 = 64;

/// Find a file path under `directory` that no previous run has used
///
/// Returns `{base_name}.json` when free, otherwise the lowest free
/// `{base_name} (n).json` past the existing run of numbered files. The bound
/// is found by doubling and then narrowed by bisection, so a run of `n`
/// existing files costs O(log n) existence checks.
pub fn allocate_path(directory: &Path, base_name: &str) -> PathBuf {
    let plain = directory.join(format!("{base_name}.json"));
    if !plain.exists() {
        return plain;
    }

    let numbered = |n: u64| directory.join(format!("{base_name} ({n}).json"));

    let mut min = 1u64;
    let mut max = 2u64;
    while numbered(max).exists() {
        min = max;
        max = max.saturating_mul(2);
    }

    // Invariant: `min` is taken (or is the implicit plain file), `max` is free
    while max - min > 1 {
        let pivot = min + (max - min) / 2;
        if numbered(pivot).exists() {
            min = pivot;
        } else {
            max = pivot;
        }
    }

    numbered(max)
}

/// Read a whole log file as an array of records
pub fn read_all(path: &Path) -> Result<Vec<LogRecord>> {
    let content = fs::read_to_string(path).map_err(|e| Error::file_system(path, e))?;
    serde_json::from_str(&content)
        .map_err(|e| Error::Format(format!("{}: {e}", path.display())))
}

/// Append one record to the array in `path`, creating the file if needed.
/// Callers must hold exclusive access to `path`.
fn append_to_file(path: &Path, record: &LogRecord) -> Result<()> {
    let body = record.to_json()?;
    let fs_err = |e| Error::file_system(path, e);

    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut file) => {
            let content = format!("{OPENING}{body}{CLOSING}");
            file.write_all(content.as_bytes()).map_err(fs_err)?;
            return file.flush().map_err(fs_err);
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
        Err(e) => return Err(fs_err(e)),
    }

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(fs_err)?;

    let (offset, chunk) = match Tail::locate(&mut file).map_err(fs_err)? {
        // Left behind by a write that never got past creating the file
        Some(Tail::Blank) => (0, format!("{OPENING}{body}{CLOSING}")),
        Some(Tail::Array { offset, is_empty: true }) => (offset, format!("\n{body}{CLOSING}")),
        Some(Tail::Array { offset, is_empty: false }) => {
            (offset, format!("{SEPARATOR}{body}{CLOSING}"))
        }
        None => {
            return Err(Error::Format(format!(
                "{} does not end with a JSON array",
                path.display()
            )));
        }
    };

    file.seek(SeekFrom::Start(offset)).map_err(fs_err)?;
    file.write_all(chunk.as_bytes()).map_err(fs_err)?;
    // Drop anything that followed the old closing bracket
    file.set_len(offset + chunk.len() as u64).map_err(fs_err)?;
    file.flush().map_err(fs_err)
}

/// What the end of an existing file looks like
enum Tail {
    /// Empty or whitespace only
    Blank,
    /// Ends with `]`; the next element starts at `offset`, just past the last
    /// element (or past `[` when the array is empty)
    Array { offset: u64, is_empty: bool },
}

impl Tail {
    /// Scan back from the end for `]` and the content before it.
    /// `None` when the file does not end like a JSON array.
    fn locate(file: &mut File) -> io::Result<Option<Self>> {
        let len = file.metadata()?.len();
        let mut scanner = ReverseScanner::new(file, len);

        match scanner.prev_significant()? {
            None => return Ok(Some(Self::Blank)),
            Some((_, b']')) => {}
            Some(_) => return Ok(None),
        }

        Ok(scanner.prev_significant()?.map(|(pos, byte)| Self::Array {
            offset: pos + 1,
            is_empty: byte == b'[',
        }))
    }
}

/// Walks a file backwards one non-whitespace byte at a time
struct ReverseScanner<'a> {
    file: &'a mut File,
    /// Offset of the next byte to hand out, plus one
    pos: u64,
    buf: Vec<u8>,
    buf_start: u64,
}

impl<'a> ReverseScanner<'a> {
    fn new(file: &'a mut File, len: u64) -> Self {
        Self {
            file,
            pos: len,
            buf: Vec::new(),
            buf_start: len,
        }
    }

    fn prev_significant(&mut self) -> io::Result<Option<(u64, u8)>> {
        loop {
            if self.pos == 0 {
                return Ok(None);
            }
            if self.pos <= self.buf_start {
                let start = self.pos.saturating_sub(TAIL_CHUNK);
                self.buf.resize((self.pos - start) as usize, 0);
                self.file.seek(SeekFrom::Start(start))?;
                self.file.read_exact(&mut self.buf)?;
                self.buf_start = start;
            }
            self.pos -= 1;
            let byte = self.buf[(self.pos - self.buf_start) as usize];
            if !byte.is_ascii_whitespace() {
                return Ok(Some((self.pos, byte)));
            }
        }
    }
}

/// Durable sink writing records into one JSON array file per destination
///
/// The active file is allocated lazily on the first [`JsonLogStore::save_record`]
/// and reused until [`JsonLogStore::reset`].
pub struct JsonLogStore {
    directory: PathBuf,
    base_name: String,

    /// Held for the whole save so a fresh allocation is created before anyone
    /// else can check for the same name
    active: Mutex<Option<PathBuf>>,

    /// One lock per destination path
    path_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl JsonLogStore {
    pub fn new(directory: impl Into<PathBuf>, base_name: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            base_name: base_name.into(),
            active: Mutex::new(None),
            path_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    /// Next free path in the store's directory
    pub fn allocate_path(&self) -> PathBuf {
        allocate_path(&self.directory, &self.base_name)
    }

    /// Path of the file receiving [`JsonLogStore::save_record`] calls, if allocated
    pub fn active_path(&self) -> Option<PathBuf> {
        self.active.lock().clone()
    }

    /// Whether the active file has been created on disk
    pub fn log_file_exists(&self) -> bool {
        self.active
            .lock()
            .as_deref()
            .is_some_and(|path| path.exists())
    }

    /// Forget the active file; the next save allocates a fresh one
    pub fn reset(&self) {
        self.active.lock().take();
    }

    /// Append `record` to the array in `path`
    ///
    /// Appends to the same path are serialized; different paths proceed
    /// independently.
    pub fn append_record(&self, path: &Path, record: &LogRecord) -> Result<()> {
        let lock = Arc::clone(
            self.path_locks
                .lock()
                .entry(path.to_path_buf())
                .or_default(),
        );
        let _guard = lock.lock();
        append_to_file(path, record)
    }

    /// Append `record` to the active file, allocating it first if needed
    pub fn save_record(&self, record: &LogRecord) -> Result<PathBuf> {
        let mut active = self.active.lock();
        let path = match active.as_ref() {
            Some(path) => path.clone(),
            None => {
                self.ensure_directory()?;
                let path = self.allocate_path();
                info!(path = %path.display(), "Allocated log file");
                *active = Some(path.clone());
                path
            }
        };

        self.append_record(&path, record)?;
        debug!(path = %path.display(), "Saved log record");
        Ok(path)
    }

    /// Write a complete export to a freshly allocated path
    pub fn save_export(&self, content: &str) -> Result<PathBuf> {
        let _active = self.active.lock();
        self.ensure_directory()?;
        let path = self.allocate_path();
        fs::write(&path, content).map_err(|e| Error::file_system(&path, e))?;
        info!(path = %path.display(), "Exported logs");
        Ok(path)
    }

    /// Load a previously stored file
    pub fn load_from_file(&self, path: &Path) -> Result<Vec<LogRecord>> {
        read_all(path)
    }

    fn ensure_directory(&self) -> Result<()> {
        fs::create_dir_all(&self.directory).map_err(|e| Error::file_system(&self.directory, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ravenlogs_types::LogLevel;
    use std::thread;
    use tempfile::TempDir;

    fn record(n: usize) -> LogRecord {
        LogRecord::new(LogLevel::Info, "Raven.Server").with_message(format!("message {n}"))
    }

    fn touch(path: &Path) {
        fs::write(path, "[]").unwrap();
    }

    fn parse_array(path: &Path) -> Vec<serde_json::Value> {
        let content = fs::read_to_string(path).unwrap();
        serde_json::from_str(&content).unwrap()
    }

    #[test]
    fn test_allocate_plain_name_first() {
        let dir = TempDir::new().unwrap();
        assert_eq!(allocate_path(dir.path(), "logs"), dir.path().join("logs.json"));
    }

    #[test]
    fn test_allocate_distinct_paths() {
        let dir = TempDir::new().unwrap();
        let mut seen = Vec::new();
        for _ in 0..12 {
            let path = allocate_path(dir.path(), "logs");
            assert!(!seen.contains(&path));
            touch(&path);
            seen.push(path);
        }

        assert_eq!(seen[0], dir.path().join("logs.json"));
        assert_eq!(seen[1], dir.path().join("logs (2).json"));
        assert_eq!(seen[11], dir.path().join("logs (12).json"));
        assert_eq!(
            allocate_path(dir.path(), "logs"),
            dir.path().join("logs (13).json")
        );
    }

    #[test]
    fn test_allocate_after_existing_run() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("logs.json"));
        for n in 2..=37 {
            touch(&dir.path().join(format!("logs ({n}).json")));
        }
        assert_eq!(
            allocate_path(dir.path(), "logs"),
            dir.path().join("logs (38).json")
        );
    }

    #[test]
    fn test_allocate_ignores_other_base_names() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("other.json"));
        touch(&dir.path().join("logs.json"));
        assert_eq!(
            allocate_path(dir.path(), "logs"),
            dir.path().join("logs (2).json")
        );
    }

    #[test]
    fn test_append_keeps_valid_array_after_each_write() {
        let dir = TempDir::new().unwrap();
        let store = JsonLogStore::new(dir.path(), "logs");
        let path = dir.path().join("fresh.json");

        for n in 1..=3 {
            store.append_record(&path, &record(n)).unwrap();
            assert_eq!(parse_array(&path).len(), n);
        }

        let records = read_all(&path).unwrap();
        assert_eq!(records, vec![record(1), record(2), record(3)]);
    }

    #[test]
    fn test_new_file_layout() {
        let dir = TempDir::new().unwrap();
        let store = JsonLogStore::new(dir.path(), "logs");
        let path = dir.path().join("layout.json");

        store.append_record(&path, &record(1)).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("[\n{"));
        assert!(content.ends_with("}\n]"));

        store.append_record(&path, &record(2)).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("},\n{"));
        assert!(content.ends_with("}\n]"));
    }

    #[test]
    fn test_append_to_empty_array() {
        let dir = TempDir::new().unwrap();
        let store = JsonLogStore::new(dir.path(), "logs");
        let path = dir.path().join("empty.json");
        fs::write(&path, "[]").unwrap();

        store.append_record(&path, &record(1)).unwrap();
        assert_eq!(read_all(&path).unwrap(), vec![record(1)]);
    }

    #[test]
    fn test_append_to_blank_file() {
        let dir = TempDir::new().unwrap();
        let store = JsonLogStore::new(dir.path(), "logs");

        for (name, content) in [("zero.json", ""), ("spaces.json", "  \n\t\n")] {
            let path = dir.path().join(name);
            fs::write(&path, content).unwrap();

            store.append_record(&path, &record(1)).unwrap();
            assert_eq!(read_all(&path).unwrap(), vec![record(1)]);
            assert!(fs::read_to_string(&path).unwrap().starts_with("[\n{"));

            store.append_record(&path, &record(2)).unwrap();
            assert_eq!(read_all(&path).unwrap(), vec![record(1), record(2)]);
        }
    }

    #[test]
    fn test_append_after_trailing_whitespace() {
        let dir = TempDir::new().unwrap();
        let store = JsonLogStore::new(dir.path(), "logs");
        let path = dir.path().join("exported.json");
        let existing = serde_json::to_string_pretty(&vec![record(1)]).unwrap();
        fs::write(&path, format!("{existing}\n\n   ")).unwrap();

        store.append_record(&path, &record(2)).unwrap();
        assert_eq!(read_all(&path).unwrap(), vec![record(1), record(2)]);
    }

    #[test]
    fn test_append_with_multibyte_content() {
        let dir = TempDir::new().unwrap();
        let store = JsonLogStore::new(dir.path(), "logs");
        let path = dir.path().join("utf8.json");
        let fancy = LogRecord::new(LogLevel::Warn, "Raven.Server").with_message("╭──╮ ünïcødé ✓");

        store.append_record(&path, &fancy).unwrap();
        store.append_record(&path, &fancy).unwrap();
        assert_eq!(read_all(&path).unwrap(), vec![fancy.clone(), fancy]);
    }

    #[test]
    fn test_append_rejects_non_array_file() {
        let dir = TempDir::new().unwrap();
        let store = JsonLogStore::new(dir.path(), "logs");
        let path = dir.path().join("broken.json");
        fs::write(&path, "{\"not\": \"an array\"}").unwrap();

        let err = store.append_record(&path, &record(1)).unwrap_err();
        assert!(matches!(err, Error::Format(_)));
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"not\": \"an array\"}");
    }

    #[test]
    fn test_read_all_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("garbage.json");
        fs::write(&path, "[{\"Level\":\"Info\"}").unwrap();
        assert!(matches!(read_all(&path), Err(Error::Format(_))));

        fs::write(&path, "[{\"Level\":\"Info\"}]").unwrap();
        assert!(matches!(read_all(&path), Err(Error::Format(_))));

        let missing = dir.path().join("missing.json");
        assert!(matches!(read_all(&missing), Err(Error::FileSystem { .. })));
    }

    #[test]
    fn test_concurrent_appends_same_path() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(JsonLogStore::new(dir.path(), "logs"));
        let path = dir.path().join("shared.json");

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = Arc::clone(&store);
                let path = path.clone();
                thread::spawn(move || {
                    for n in 0..25 {
                        store.append_record(&path, &record(t * 100 + n)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(read_all(&path).unwrap().len(), 100);
    }

    #[test]
    fn test_save_record_skips_previous_run() {
        let dir = TempDir::new().unwrap();
        let previous = dir.path().join("logs.json");
        fs::write(&previous, "[]").unwrap();

        let store = JsonLogStore::new(dir.path(), "logs");
        assert!(store.active_path().is_none());
        assert!(!store.log_file_exists());

        let first = store.save_record(&record(1)).unwrap();
        let second = store.save_record(&record(2)).unwrap();
        assert_eq!(first, dir.path().join("logs (2).json"));
        assert_eq!(first, second);
        assert!(store.log_file_exists());
        assert_eq!(read_all(&first).unwrap().len(), 2);
        assert_eq!(fs::read_to_string(&previous).unwrap(), "[]");

        store.reset();
        let third = store.save_record(&record(3)).unwrap();
        assert_eq!(third, dir.path().join("logs (3).json"));
    }

    #[test]
    fn test_save_export_and_load() {
        let dir = TempDir::new().unwrap();
        let store = JsonLogStore::new(dir.path().join("nested"), "export");
        let content = serde_json::to_string_pretty(&vec![record(1), record(2)]).unwrap();

        let path = store.save_export(&content).unwrap();
        assert_eq!(path, dir.path().join("nested").join("export.json"));
        assert_eq!(store.load_from_file(&path).unwrap(), vec![record(1), record(2)]);

        let again = store.save_export(&content).unwrap();
        assert_ne!(path, again);
    }
}
