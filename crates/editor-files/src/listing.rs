use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use glob::Pattern;
use serde::Serialize;
use tracing::debug;

use crate::path_guard::{absolutize, dirname};

/// One child of a listed directory.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DirEntry {
    pub name: String,
    /// Directory the entry was listed from, as the client passed it
    #[serde(rename = "dir")]
    pub parent_dir: String,
    #[serde(rename = "fullpath")]
    pub absolute_path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(rename = "size")]
    pub size_bytes: u64,
    /// Seconds since the epoch, fractional
    #[serde(rename = "modified")]
    pub modified_time: f64,
    #[serde(rename = "created")]
    pub created_time: f64,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
}

/// Body of `GET /api/listdir`.
#[derive(Debug, Serialize)]
pub struct DirListing {
    #[serde(rename = "content")]
    pub entries: Vec<DirEntry>,
    #[serde(rename = "abspath")]
    pub abs_path: String,
    #[serde(rename = "parent")]
    pub parent_path: String,
    pub activebranch: Option<String>,
    pub dirty: bool,
    pub error: Option<String>,
}

/// Body of `GET /api/listdir` when the listing could not be built.
#[derive(Debug, Serialize)]
pub struct ListingError {
    pub error: String,
}

/// Builds ordered, filtered directory listings.
#[derive(Debug, Clone)]
pub struct DirectoryLister {
    dirs_first: bool,
    hide_hidden: bool,
    ignore: Vec<Pattern>,
}

impl DirectoryLister {
    pub fn new(dirs_first: bool, hide_hidden: bool, ignore: Vec<Pattern>) -> Self {
        Self {
            dirs_first,
            hide_hidden,
            ignore,
        }
    }

    /// List the immediate children of `path`.
    ///
    /// Entries that cannot be stat'ed are kept with zeroed size and times;
    /// entries the directory iterator fails on are skipped.
    pub fn list(&self, path: &str) -> std::io::Result<Vec<DirEntry>> {
        let dir = Path::new(path);
        let mut dirs = Vec::new();
        let mut files = Vec::new();

        for entry in fs::read_dir(dir)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    debug!("Skipping unreadable entry in {}: {}", path, err);
                    continue;
                }
            };
            let name = entry.file_name().to_string_lossy().to_string();
            if self.hide_hidden && name.starts_with('.') {
                continue;
            }
            if dir.join(&name).is_dir() {
                dirs.push(name);
            } else {
                files.push(name);
            }
        }

        let names = if self.dirs_first {
            sort_case_insensitive(&mut dirs);
            sort_case_insensitive(&mut files);
            dirs.append(&mut files);
            dirs
        } else {
            dirs.append(&mut files);
            sort_case_insensitive(&mut dirs);
            dirs
        };

        let mut entries: Vec<DirEntry> = names
            .into_iter()
            .map(|name| self.describe(path, dir, name))
            .collect();

        entries.retain(|entry| !self.is_ignored(&entry.name));
        debug!("Listed {} entries in {}", entries.len(), path);
        Ok(entries)
    }

    /// Full `/api/listdir` payload for `path`.
    pub fn listing(&self, path: &str) -> std::io::Result<DirListing> {
        let entries = self.list(path)?;
        let abs_path = absolutize(Path::new(path));
        let abs_str = abs_path.display().to_string();
        let parent_path = dirname(&abs_str).to_string();

        Ok(DirListing {
            entries,
            abs_path: abs_str,
            parent_path,
            activebranch: None,
            dirty: false,
            error: None,
        })
    }

    fn is_ignored(&self, name: &str) -> bool {
        self.ignore.iter().any(|pattern| pattern.matches(name))
    }

    fn describe(&self, parent: &str, dir: &Path, name: String) -> DirEntry {
        let entry_path: PathBuf = dir.join(&name);
        let absolute_path = absolutize(&entry_path);
        let kind = if absolute_path.is_dir() {
            EntryKind::Dir
        } else {
            EntryKind::File
        };

        let (size_bytes, modified_time, created_time) = match fs::metadata(&entry_path) {
            Ok(metadata) => (
                metadata.len(),
                metadata.modified().map(epoch_seconds).unwrap_or(0.0),
                created_seconds(&metadata),
            ),
            Err(_) => (0, 0.0, 0.0),
        };

        DirEntry {
            name,
            parent_dir: parent.to_string(),
            absolute_path: absolute_path.display().to_string(),
            kind,
            size_bytes,
            modified_time,
            created_time,
        }
    }
}

fn sort_case_insensitive(names: &mut [String]) {
    names.sort_by_cached_key(|name| name.to_lowercase());
}

fn epoch_seconds(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

// Inode change time on Unix, birth time elsewhere.
#[cfg(unix)]
fn created_seconds(metadata: &Metadata) -> f64 {
    use std::os::unix::fs::MetadataExt;
    metadata.ctime() as f64 + metadata.ctime_nsec() as f64 / 1e9
}

#[cfg(not(unix))]
fn created_seconds(metadata: &Metadata) -> f64 {
    metadata.created().map(epoch_seconds).unwrap_or(0.0)
}
