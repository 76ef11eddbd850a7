use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use crate::alphabet::{progress_percentage, total_combinations, EnumerationPosition, SearchSpace};
use crate::error::{Result, SearchError};

/// Durable record of how far a run got.
///
/// `position` is the next candidate to test. It is `None` once the whole
/// space has been tested without a match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_identity: String,
    pub search_space: SearchSpace,
    pub position: Option<EnumerationPosition>,
    pub attempts: u64,
    pub created_at: String,
}

impl Checkpoint {
    /// Create a new checkpoint stamped with the current local time
    ///
    /// # Examples
    ///
    /// ```
    /// use keyspace_finder::{Checkpoint, EnumerationPosition, SearchSpace};
    ///
    /// let space = SearchSpace::new("01", 1, 3).unwrap();
    /// let checkpoint = Checkpoint::new("brute-force", space, Some(EnumerationPosition::new(2, 1u32)), 3);
    /// assert!(!checkpoint.is_exhausted());
    /// ```
    pub fn new(
        run_identity: impl Into<String>,
        search_space: SearchSpace,
        position: Option<EnumerationPosition>,
        attempts: u64,
    ) -> Self {
        Checkpoint {
            run_identity: run_identity.into(),
            search_space,
            position,
            attempts,
            created_at: chrono::Local::now().to_rfc3339(),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.position.is_none()
    }

    /// Check the record is internally consistent
    ///
    /// The stored space must itself be valid and a stored position must lie
    /// inside it. Stores call this before handing a record back.
    ///
    /// # Returns
    ///
    /// `Ok(())`, or `SearchError::CorruptCheckpoint` naming the inconsistency
    ///
    /// # Examples
    ///
    /// ```
    /// use keyspace_finder::{Checkpoint, EnumerationPosition, SearchSpace};
    ///
    /// let space = SearchSpace::new("01", 1, 3).unwrap();
    /// let inside = Checkpoint::new("brute-force", space.clone(), Some(EnumerationPosition::new(3, 7u32)), 13);
    /// assert!(inside.validate().is_ok());
    ///
    /// let outside = Checkpoint::new("brute-force", space, Some(EnumerationPosition::new(3, 8u32)), 14);
    /// assert!(outside.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<()> {
        self.search_space
            .validate()
            .map_err(|e| SearchError::CorruptCheckpoint(e.to_string()))?;
        if let Some(position) = &self.position {
            if !self.search_space.contains(position) {
                return Err(SearchError::CorruptCheckpoint(format!(
                    "position {} lies outside {}",
                    position, self.search_space
                )));
            }
        }
        Ok(())
    }

    /// Save checkpoint to a file
    ///
    /// Serializes the checkpoint to JSON and moves it into place atomically:
    /// a reader of `path` sees either the previous file or the complete new one.
    ///
    /// # Arguments
    ///
    /// * `path` - Where the checkpoint file should be written
    ///
    /// # Returns
    ///
    /// `Ok(())` if the save succeeded, `Err(std::io::Error)` if it failed
    ///
    /// # Examples
    ///
    /// ```
    /// use keyspace_finder::{Checkpoint, EnumerationPosition, SearchSpace};
    ///
    /// let space = SearchSpace::new("0123456789", 4, 8).unwrap();
    /// let checkpoint = Checkpoint::new("brute-force", space, Some(EnumerationPosition::new(4, 1234u32)), 1234);
    /// let path = std::env::temp_dir().join("keyspace_doc_checkpoint_save.json");
    /// checkpoint.save(&path).unwrap();
    /// # std::fs::remove_file(&path).unwrap();
    /// ```
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        crate::io_utils::save_to_file(self, path)
    }

    /// Load checkpoint from a file
    ///
    /// Reads a JSON file and deserializes it. The record is not validated;
    /// call [`validate`](Self::validate) before trusting its position.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the checkpoint file to load
    ///
    /// # Returns
    ///
    /// `Ok(Checkpoint)` if the load succeeded, `Err(std::io::Error)` if the file
    /// is missing or is not a checkpoint
    ///
    /// # Examples
    ///
    /// ```
    /// use keyspace_finder::{Checkpoint, SearchSpace};
    ///
    /// let space = SearchSpace::new("ab", 1, 2).unwrap();
    /// let path = std::env::temp_dir().join("keyspace_doc_checkpoint_load.json");
    /// Checkpoint::new("brute-force", space, None, 6).save(&path).unwrap();
    ///
    /// let checkpoint = Checkpoint::load(&path).unwrap();
    /// assert!(checkpoint.is_exhausted());
    /// assert_eq!(checkpoint.attempts, 6);
    /// # std::fs::remove_file(&path).unwrap();
    /// ```
    pub fn load(path: &Path) -> std::io::Result<Self> {
        crate::io_utils::load_from_file(path)
    }

    /// Calculate progress as a percentage of the whole search space
    pub fn progress_percentage(&self) -> f64 {
        if self.is_exhausted() {
            return 100.0;
        }
        progress_percentage(self.attempts, &total_combinations(&self.search_space))
    }
}

/// Durable key-value home for checkpoints, addressed by run identity.
///
/// Implementations must make `save` atomic with respect to `load_latest`.
///
/// # Examples
///
/// ```
/// use keyspace_finder::{Checkpoint, CheckpointStore, MemoryCheckpointStore, SearchSpace};
///
/// let store = MemoryCheckpointStore::new();
/// let space = SearchSpace::new("01", 1, 3).unwrap();
/// store.save(&Checkpoint::new("brute-force", space, None, 14)).unwrap();
///
/// let latest = store.load_latest("brute-force").unwrap().unwrap();
/// assert_eq!(latest.attempts, 14);
/// store.delete("brute-force").unwrap();
/// assert!(store.load_latest("brute-force").unwrap().is_none());
/// ```
pub trait CheckpointStore: Send + Sync {
    /// Persist `checkpoint` as the latest record of its run identity
    ///
    /// Older records of the same identity may be dropped; records of other
    /// identities are never touched.
    ///
    /// # Returns
    ///
    /// `Ok(())` once the record is durable, or the I/O or serialization error.
    /// Callers driving a run treat an error as a warning, not a reason to stop.
    fn save(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// Most recent readable checkpoint for `run_identity`
    ///
    /// Corrupt or inconsistent records are logged and skipped.
    ///
    /// # Returns
    ///
    /// `Ok(None)` when the identity has no usable checkpoint, `Err` only when
    /// the backing medium itself cannot be listed.
    fn load_latest(&self, run_identity: &str) -> Result<Option<Checkpoint>>;

    /// Remove every checkpoint of `run_identity`. Deleting nothing is not an error.
    fn delete(&self, run_identity: &str) -> Result<()>;

    /// Housekeeping, independent of any active run
    ///
    /// # Arguments
    ///
    /// * `age` - Records last written longer ago than this are removed, whatever their identity
    ///
    /// # Returns
    ///
    /// How many records were removed.
    fn purge_older_than(&self, age: Duration) -> Result<usize>;
}

/// Checkpoints as JSON files in one directory:
/// `checkpoint_<identity>_<timestamp>.json`, newest name wins.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

const FILE_PREFIX: &str = "checkpoint_";
const FILE_EXTENSION: &str = ".json";

/// File-name-safe form of a run identity: ASCII alphanumerics and `-` are
/// kept, every other byte becomes `%XX`.
pub(crate) fn encode_identity(run_identity: &str) -> String {
    let mut encoded = String::with_capacity(run_identity.len());
    for byte in run_identity.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    encoded
}

impl FileCheckpointStore {
    /// Open a store in `dir`, creating the directory if needed
    ///
    /// # Arguments
    ///
    /// * `dir` - Directory holding the checkpoint files (`logs/checkpoints` by default in the CLI)
    ///
    /// # Returns
    ///
    /// The store, or `SearchError::CheckpointIo` if the directory cannot be created
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(FileCheckpointStore { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name prefix of an identity.
    ///
    /// ASCII alphanumerics and `-` are kept; every other byte is written as
    /// `%XX`. The encoding never produces `_`, so the prefix of one identity
    /// is never a prefix of another's.
    fn prefix(run_identity: &str) -> String {
        format!("{}{}_", FILE_PREFIX, encode_identity(run_identity))
    }

    /// Checkpoint files for one identity, newest first.
    fn files_for(&self, run_identity: &str) -> Result<Vec<PathBuf>> {
        let prefix = Self::prefix(run_identity);
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                name.starts_with(&prefix) && name.ends_with(FILE_EXTENSION)
            })
            .map(|entry| entry.path())
            .collect();
        files.sort();
        files.reverse();
        Ok(files)
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S_%6f");
        let path = self.dir.join(format!(
            "{}{}{}",
            Self::prefix(&checkpoint.run_identity),
            stamp,
            FILE_EXTENSION
        ));
        checkpoint.save(&path)?;
        debug!(
            "Checkpoint saved: {} ({} attempts)",
            path.display(),
            checkpoint.attempts
        );

        // Only the newest checkpoint of an identity is retained.
        for older in self.files_for(&checkpoint.run_identity)? {
            if older != path {
                if let Err(e) = fs::remove_file(&older) {
                    warn!("Could not remove old checkpoint {}: {}", older.display(), e);
                }
            }
        }
        Ok(())
    }

    fn load_latest(&self, run_identity: &str) -> Result<Option<Checkpoint>> {
        for path in self.files_for(run_identity)? {
            let checkpoint = match Checkpoint::load(&path) {
                Ok(checkpoint) => checkpoint,
                Err(e) => {
                    warn!("Skipping unreadable checkpoint {}: {}", path.display(), e);
                    continue;
                }
            };
            if checkpoint.run_identity != run_identity {
                continue;
            }
            if let Err(e) = checkpoint.validate() {
                warn!("Skipping checkpoint {}: {}", path.display(), e);
                continue;
            }
            info!("Checkpoint loaded: {}", path.display());
            return Ok(Some(checkpoint));
        }
        info!("No checkpoint found for {}", run_identity);
        Ok(None)
    }

    fn delete(&self, run_identity: &str) -> Result<()> {
        for path in self.files_for(run_identity)? {
            match fs::remove_file(&path) {
                Ok(()) => debug!("Checkpoint removed: {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn purge_older_than(&self, age: Duration) -> Result<usize> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let now = SystemTime::now();
        let mut removed = 0;
        for entry in entries.filter_map(|entry| entry.ok()) {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with(FILE_PREFIX) {
                continue;
            }

            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    warn!("Could not read age of {}: {}", name, e);
                    continue;
                }
            };
            let elapsed = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if elapsed > age {
                match fs::remove_file(entry.path()) {
                    Ok(()) => {
                        debug!("Old checkpoint removed: {}", name);
                        removed += 1;
                    }
                    Err(e) => warn!("Could not remove old checkpoint {}: {}", name, e),
                }
            }
        }
        Ok(removed)
    }
}

/// In-process store, for embedding the engine without touching the disk.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: Mutex<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Checkpoint>> {
        self.checkpoints
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.lock()
            .insert(checkpoint.run_identity.clone(), checkpoint.clone());
        Ok(())
    }

    fn load_latest(&self, run_identity: &str) -> Result<Option<Checkpoint>> {
        Ok(self.lock().get(run_identity).cloned())
    }

    fn delete(&self, run_identity: &str) -> Result<()> {
        self.lock().remove(run_identity);
        Ok(())
    }

    fn purge_older_than(&self, age: Duration) -> Result<usize> {
        let now = chrono::Local::now();
        let mut checkpoints = self.lock();
        let before = checkpoints.len();
        checkpoints.retain(|_, checkpoint| {
            match chrono::DateTime::parse_from_rfc3339(&checkpoint.created_at) {
                Ok(created) => now
                    .signed_duration_since(created)
                    .to_std()
                    .map_or(true, |elapsed| elapsed <= age),
                Err(_) => false,
            }
        });
        Ok(before - checkpoints.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "keyspace_checkpoint_{}_{}",
            name,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn sample(attempts: u64, ordinal: u32) -> Checkpoint {
        Checkpoint::new(
            "brute-force",
            SearchSpace::new("0123456789", 1, 4).unwrap(),
            Some(EnumerationPosition::new(3, ordinal)),
            attempts,
        )
    }

    fn checkpoint_files(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_file_store_keeps_only_latest() {
        let dir = scratch_dir("latest");
        let store = FileCheckpointStore::new(&dir).unwrap();

        store.save(&sample(1000, 990)).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        store.save(&sample(2000, 1990)).unwrap();

        let latest = store.load_latest("brute-force").unwrap().unwrap();
        assert_eq!(latest.attempts, 2000);
        assert_eq!(checkpoint_files(&dir).len(), 1);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_file_store_skips_corrupt_records() {
        let dir = scratch_dir("corrupt");
        let store = FileCheckpointStore::new(&dir).unwrap();
        store.save(&sample(1000, 990)).unwrap();

        // Sorts after any real timestamp, so it is tried first.
        fs::write(
            dir.join("checkpoint_brute-force_99999999_999999_999999.json"),
            b"{ not json",
        )
        .unwrap();

        let latest = store.load_latest("brute-force").unwrap().unwrap();
        assert_eq!(latest.attempts, 1000);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_file_store_skips_out_of_range_position() {
        let dir = scratch_dir("range");
        let store = FileCheckpointStore::new(&dir).unwrap();
        let mut bad = sample(10, 0);
        bad.position = Some(EnumerationPosition::new(3, 5000u32));
        bad.save(&dir.join("checkpoint_brute-force_20240101_000000_000000.json"))
            .unwrap();

        assert!(store.load_latest("brute-force").unwrap().is_none());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_file_store_identities_are_separate() {
        let dir = scratch_dir("identities");
        let store = FileCheckpointStore::new(&dir).unwrap();
        store.save(&sample(1000, 990)).unwrap();

        let mut other = sample(7, 7);
        other.run_identity = "brute-force-2".to_string();
        store.save(&other).unwrap();

        assert_eq!(store.load_latest("brute-force").unwrap().unwrap().attempts, 1000);
        assert_eq!(store.load_latest("brute-force-2").unwrap().unwrap().attempts, 7);

        store.delete("brute-force").unwrap();
        assert!(store.load_latest("brute-force").unwrap().is_none());
        assert!(store.load_latest("brute-force-2").unwrap().is_some());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_file_store_lookalike_identities_do_not_collide() {
        let dir = scratch_dir("lookalike");
        let store = FileCheckpointStore::new(&dir).unwrap();
        store.save(&sample(3, 3)).unwrap();

        for (identity, attempts) in [("brute force", 11), ("brute_force", 12), ("brute%2Dforce", 13)] {
            let mut other = sample(attempts, 1);
            other.run_identity = identity.to_string();
            store.save(&other).unwrap();
        }

        assert_eq!(store.load_latest("brute-force").unwrap().unwrap().attempts, 3);
        assert_eq!(store.load_latest("brute force").unwrap().unwrap().attempts, 11);
        assert_eq!(store.load_latest("brute_force").unwrap().unwrap().attempts, 12);
        assert_eq!(store.load_latest("brute%2Dforce").unwrap().unwrap().attempts, 13);
        assert_eq!(checkpoint_files(&dir).len(), 4);

        store.delete("brute force").unwrap();
        assert_eq!(store.load_latest("brute-force").unwrap().unwrap().attempts, 3);
        assert!(store.load_latest("brute force").unwrap().is_none());
        assert!(store.load_latest("brute_force").unwrap().is_some());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_identity_prefix_is_injective() {
        assert_eq!(FileCheckpointStore::prefix("brute-force"), "checkpoint_brute-force_");
        assert_eq!(FileCheckpointStore::prefix("brute force"), "checkpoint_brute%20force_");
        assert_eq!(FileCheckpointStore::prefix("brute_force"), "checkpoint_brute%5Fforce_");
        assert_eq!(FileCheckpointStore::prefix("a/b"), "checkpoint_a%2Fb_");
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dir = scratch_dir("delete");
        let store = FileCheckpointStore::new(&dir).unwrap();
        store.delete("brute-force").unwrap();
        store.save(&sample(1, 1)).unwrap();
        store.delete("brute-force").unwrap();
        store.delete("brute-force").unwrap();
        assert!(store.load_latest("brute-force").unwrap().is_none());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_purge_older_than() {
        let dir = scratch_dir("purge");
        let store = FileCheckpointStore::new(&dir).unwrap();
        store.save(&sample(1, 1)).unwrap();

        assert_eq!(store.purge_older_than(Duration::from_secs(3600)).unwrap(), 0);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(store.purge_older_than(Duration::from_millis(10)).unwrap(), 1);
        assert!(store.load_latest("brute-force").unwrap().is_none());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryCheckpointStore::new();
        assert!(store.load_latest("brute-force").unwrap().is_none());

        store.save(&sample(5, 4)).unwrap();
        store.save(&sample(10, 9)).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.load_latest("brute-force").unwrap().unwrap().attempts, 10);

        assert_eq!(store.purge_older_than(Duration::from_secs(3600)).unwrap(), 0);
        store.delete("brute-force").unwrap();
        store.delete("brute-force").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_checkpoint_progress_percentage() {
        let space = SearchSpace::new("01", 1, 3).unwrap();
        let halfway = Checkpoint::new("brute-force", space.clone(), Some(EnumerationPosition::new(3, 0u32)), 7);
        assert!((halfway.progress_percentage() - 50.0).abs() < 1e-9);

        let done = Checkpoint::new("brute-force", space, None, 14);
        assert!(done.is_exhausted());
        assert_eq!(done.progress_percentage(), 100.0);
    }
}
