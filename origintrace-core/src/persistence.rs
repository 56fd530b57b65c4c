//! On-disk formats for operation logs and the configuration file.
//!
//! A log is stored either as one JSON array (a snapshot, written at the end
//! of a session) or as JSON lines appended while the session runs. Snapshots
//! and config files are staged in a `.partial` file next to the target and
//! renamed over it once complete.

use std::ffi::OsString;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

/// How a log file on disk is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// A single JSON array of entries.
    Snapshot,
    /// One JSON entry per line.
    JsonLines,
}

impl LogFormat {
    /// Look at the first non-blank byte of `path`. An array opener means a
    /// snapshot. Anything else, including an empty file, is read as JSON
    /// lines.
    pub fn detect(path: &Path) -> io::Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        loop {
            let buf = reader.fill_buf()?;
            if buf.is_empty() {
                return Ok(LogFormat::JsonLines);
            }
            match buf.iter().find(|b| !b.is_ascii_whitespace()) {
                Some(b'[') => return Ok(LogFormat::Snapshot),
                Some(_) => return Ok(LogFormat::JsonLines),
                None => {
                    let blank = buf.len();
                    reader.consume(blank);
                }
            }
        }
    }
}

/// Sibling path a write is staged in: `trace.json` stages as
/// `trace.json.partial`.
fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("origintrace"));
    name.push(".partial");
    path.with_file_name(name)
}

/// Replace `path` with `data` without exposing a half-written file.
/// Missing parent directories are created.
pub fn write_atomically(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let staged = staging_path(path);
    std::fs::write(&staged, data)?;
    std::fs::rename(&staged, path).inspect_err(|_| {
        let _ = std::fs::remove_file(&staged);
    })
}

/// Write `entries` as a pretty-printed snapshot.
pub fn write_snapshot<T: serde::Serialize>(path: &Path, entries: &T) -> io::Result<()> {
    let mut json = serde_json::to_vec_pretty(entries).map_err(io::Error::other)?;
    json.push(b'\n');
    write_atomically(path, &json)
}

/// Read a snapshot written by [`write_snapshot`].
///
/// A missing file is `Ok(None)`. Content that does not deserialize as `T`
/// is `InvalidData`.
pub fn read_snapshot<T: serde::de::DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    serde_json::from_slice(&data)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
