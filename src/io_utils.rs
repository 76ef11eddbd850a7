use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub(crate) const TEMP_SUFFIX: &str = ".tmp";

/// Path of the scratch file a save goes through before being renamed into place.
pub(crate) fn temp_path_for(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}

/// Save data to a file using JSON serialization
///
/// The JSON is written and synced to a sibling temp file which is then renamed
/// over `path`, so readers see either the previous content or the new one.
///
/// # Arguments
///
/// * `data` - Any serializable value
/// * `path` - Destination file; its parent directory must exist
///
/// # Returns
///
/// `Ok(())` if the save succeeded, `Err(std::io::Error)` if writing, syncing
/// or renaming failed. The temp file is removed on failure.
///
/// # Examples
///
/// ```
/// use keyspace_finder::io_utils::{load_from_file, save_to_file};
///
/// let path = std::env::temp_dir().join("keyspace_doc_io_utils.json");
/// save_to_file(&vec![1u64, 2, 3], &path).unwrap();
/// let loaded: Vec<u64> = load_from_file(&path).unwrap();
/// assert_eq!(loaded, vec![1, 2, 3]);
/// # std::fs::remove_file(&path).unwrap();
/// ```
pub fn save_to_file<T: Serialize>(data: &T, path: &Path) -> std::io::Result<()> {
    let temp = temp_path_for(path);
    let result = write_json(data, &temp).and_then(|_| fs::rename(&temp, path));
    if result.is_err() {
        let _ = fs::remove_file(&temp);
    }
    result
}

fn write_json<T: Serialize>(data: &T, path: &Path) -> std::io::Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, data)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

/// Load data from a file using JSON deserialization
///
/// # Arguments
///
/// * `path` - File previously written by [`save_to_file`] or by hand
///
/// # Returns
///
/// The deserialized value. A missing file yields `ErrorKind::NotFound`;
/// malformed or truncated JSON yields `InvalidData` or `UnexpectedEof`.
pub fn load_from_file<T: for<'a> Deserialize<'a>>(path: &Path) -> std::io::Result<T> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let data = serde_json::from_reader(reader)?;
    Ok(data)
}
