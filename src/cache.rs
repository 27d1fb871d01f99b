//! Persistent dedup cache: which items of which channel have already been
//! seen, and when.
//!
//! The cache file is a small JSON document. Saving optionally rotates
//! numbered backups (`<file>.1` newest … `<file>.N` oldest) and always
//! writes through a temporary file that is synced and renamed into place, so
//! a crash never leaves a half-written cache behind.

use std::collections::HashMap;
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::RetentionDays;
use crate::feed::Item;

const CACHE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cache file '{path}' is unreadable: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("Cache path '{0}' is a directory")]
    IsDirectory(PathBuf),

    #[error("Failed to serialize cache: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl CacheError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// One remembered item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub channel_url: String,
    pub item_url: Option<String>,
    /// Last time the item was observed in its channel.
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    entries: Vec<CacheEntry>,
}

/// In-memory cache, keyed by `(channel URL, item key)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedCache {
    entries: HashMap<(String, String), CacheEntry>,
}

impl FeedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the cache stored at `path`. A missing file yields an empty cache.
    ///
    /// # Errors
    ///
    /// - [`CacheError::IsDirectory`] if `path` is a directory
    /// - [`CacheError::Io`] if the file exists but cannot be read
    /// - [`CacheError::Unreadable`] if the content is not a cache document
    pub fn load(path: &Path) -> Result<Self, CacheError> {
        if path.is_dir() {
            return Err(CacheError::IsDirectory(path.to_path_buf()));
        }

        let content = match std::fs::read(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No cache file yet, starting empty");
                return Ok(Self::new());
            }
            Err(e) => return Err(CacheError::io(path, e)),
        };

        let file: CacheFile =
            serde_json::from_slice(&content).map_err(|e| CacheError::Unreadable {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        if file.version != CACHE_FORMAT_VERSION {
            return Err(CacheError::Unreadable {
                path: path.to_path_buf(),
                reason: format!("unsupported format version {}", file.version),
            });
        }

        let entries = file
            .entries
            .into_iter()
            .map(|e| ((e.channel_url.clone(), e.key.clone()), e))
            .collect::<HashMap<_, _>>();
        tracing::debug!(path = %path.display(), entries = entries.len(), "Loaded cache");
        Ok(Self { entries })
    }

    /// Writes the cache to `path`, first rotating up to `backups` copies of
    /// the previous file.
    ///
    /// # Errors
    ///
    /// [`CacheError::Io`] for any filesystem failure; the previous file is left
    /// intact in that case.
    pub fn save(&self, path: &Path, backups: usize) -> Result<(), CacheError> {
        if path.is_dir() {
            return Err(CacheError::IsDirectory(path.to_path_buf()));
        }

        if backups > 0 {
            rotate_backups(path, backups)?;
        }

        let file = CacheFile {
            version: CACHE_FORMAT_VERSION,
            entries: self.sorted_entries().into_iter().cloned().collect(),
        };
        let content = serde_json::to_vec_pretty(&file)?;
        write_atomic(path, &content)?;

        tracing::debug!(path = %path.display(), entries = self.entries.len(), backups, "Saved cache");
        Ok(())
    }

    /// Returns the items of `channel_url` that are not in the cache yet, and
    /// marks every item in `items` as seen at `now`.
    pub fn filter_new(&mut self, channel_url: &str, items: &[Item], now: DateTime<Utc>) -> Vec<Item> {
        let mut fresh = Vec::new();

        for item in items {
            let id = (channel_url.to_string(), item.key.clone());
            match self.entries.get_mut(&id) {
                Some(entry) => {
                    entry.timestamp = now;
                    if item.link.is_some() {
                        entry.item_url = item.link.clone();
                    }
                }
                None => {
                    self.entries.insert(
                        id,
                        CacheEntry {
                            key: item.key.clone(),
                            channel_url: channel_url.to_string(),
                            item_url: item.link.clone(),
                            timestamp: now,
                        },
                    );
                    fresh.push(item.clone());
                }
            }
        }

        fresh
    }

    /// Evicts every entry older than its channel's retention window.
    /// Returns the number of entries removed.
    pub fn prune<F>(&mut self, now: DateTime<Utc>, retention_for: F) -> usize
    where
        F: Fn(&str) -> RetentionDays,
    {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| !retention_for(&entry.channel_url).is_expired(entry.timestamp, now));
        let removed = before - self.entries.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = self.entries.len(), "Pruned cache");
        }
        removed
    }

    pub fn get(&self, channel_url: &str, key: &str) -> Option<&CacheEntry> {
        self.entries
            .get(&(channel_url.to_string(), key.to_string()))
    }

    pub fn contains(&self, channel_url: &str, key: &str) -> bool {
        self.get(channel_url, key).is_some()
    }

    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }

    /// Entries ordered by channel URL, then key.
    pub fn sorted_entries(&self) -> Vec<&CacheEntry> {
        let mut entries: Vec<_> = self.entries.values().collect();
        entries.sort_by(|a, b| (&a.channel_url, &a.key).cmp(&(&b.channel_url, &b.key)));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn backup_path(path: &Path, n: usize) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(format!(".{n}"));
    PathBuf::from(name)
}

/// Drops `<path>.<backups>`, shifts every other backup up by one and copies
/// the current file to `<path>.1`.
fn rotate_backups(path: &Path, backups: usize) -> Result<(), CacheError> {
    let oldest = backup_path(path, backups);
    if oldest.exists() {
        std::fs::remove_file(&oldest).map_err(|e| CacheError::io(&oldest, e))?;
    }

    for n in (1..backups).rev() {
        let from = backup_path(path, n);
        if from.exists() {
            let to = backup_path(path, n + 1);
            std::fs::rename(&from, &to).map_err(|e| CacheError::io(&from, e))?;
        }
    }

    if path.exists() {
        let content = std::fs::read(path).map_err(|e| CacheError::io(path, e))?;
        write_atomic(&backup_path(path, 1), &content)?;
    }

    Ok(())
}

/// Writes `content` to `dst` via a temporary file in the same directory that
/// is synced to disk and then renamed into place.
fn write_atomic(dst: &Path, content: &[u8]) -> Result<(), CacheError> {
    use std::time::{SystemTime, UNIX_EPOCH};

    // SEC-009: Randomized temp filename to prevent TOCTOU race conditions
    let random_suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let mut temp_name = OsString::from(dst.as_os_str());
    temp_name.push(format!(".tmp.{:016x}", random_suffix));
    let temp_path = PathBuf::from(temp_name);

    let cleanup = |e: std::io::Error| {
        let _ = std::fs::remove_file(&temp_path);
        CacheError::io(dst, e)
    };

    let mut temp_file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)
        .map_err(|e| CacheError::io(&temp_path, e))?;
    temp_file.write_all(content).map_err(cleanup)?;
    temp_file.sync_all().map_err(cleanup)?;
    drop(temp_file);

    #[cfg(windows)]
    if dst.exists() {
        std::fs::remove_file(dst).map_err(cleanup)?;
    }

    std::fs::rename(&temp_path, dst).map_err(cleanup)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    const CHANNEL: &str = "https://example.com/rss";

    fn item(key: &str) -> Item {
        Item {
            key: key.to_string(),
            link: Some(format!("https://example.com/{key}")),
            ..Item::default()
        }
    }

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, day, 12, 0, 0).unwrap()
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("feedpoll_cache_test_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_filter_new_marks_seen() {
        let mut cache = FeedCache::new();
        let items = vec![item("a"), item("b")];

        let first = cache.filter_new(CHANNEL, &items, ts(1));
        assert_eq!(first, items);

        let second = cache.filter_new(CHANNEL, &items, ts(2));
        assert!(second.is_empty());
        assert_eq!(cache.get(CHANNEL, "a").unwrap().timestamp, ts(2));
        assert_eq!(cache.get(CHANNEL, "b").unwrap().timestamp, ts(2));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_same_key_in_different_channels_is_distinct() {
        let mut cache = FeedCache::new();
        cache.filter_new(CHANNEL, &[item("a")], ts(1));
        let other = cache.filter_new("https://other.example.com/", &[item("a")], ts(1));
        assert_eq!(other.len(), 1);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_prune_uses_strict_boundary() {
        let mut cache = FeedCache::new();
        let now = ts(30);
        cache.filter_new(CHANNEL, &[item("boundary")], now - Duration::days(10));
        cache.filter_new(CHANNEL, &[item("old")], now - Duration::days(10) - Duration::seconds(1));

        let removed = cache.prune(now, |_| RetentionDays::Days(10));
        assert_eq!(removed, 1);
        assert!(cache.contains(CHANNEL, "boundary"));
        assert!(!cache.contains(CHANNEL, "old"));
    }

    #[test]
    fn test_prune_per_channel_and_unbounded() {
        let mut cache = FeedCache::new();
        let ancient = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        cache.filter_new(CHANNEL, &[item("keep")], ancient);
        cache.filter_new("https://gone.example.com/", &[item("drop")], ancient);

        let removed = cache.prune(ts(1), |url| {
            if url == CHANNEL {
                RetentionDays::Unbounded
            } else {
                RetentionDays::Days(365)
            }
        });
        assert_eq!(removed, 1);
        assert!(cache.contains(CHANNEL, "keep"));
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = temp_dir("round_trip");
        let path = dir.join("cache.json");

        let mut cache = FeedCache::new();
        cache.filter_new(CHANNEL, &[item("a"), item("b")], ts(3));
        cache.filter_new("https://other.example.com/", &[item("c")], ts(4));
        cache.save(&path, 0).unwrap();

        let loaded = FeedCache::load(&path).unwrap();
        assert_eq!(loaded, cache);
        assert_eq!(
            loaded.get(CHANNEL, "a").unwrap().item_url.as_deref(),
            Some("https://example.com/a")
        );

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_saved_file_is_sorted_and_versioned() {
        let dir = temp_dir("sorted");
        let path = dir.join("cache.json");

        let mut cache = FeedCache::new();
        cache.filter_new("https://z.example.com/", &[item("z")], ts(1));
        cache.filter_new("https://a.example.com/", &[item("b"), item("a")], ts(1));
        cache.save(&path, 0).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["version"], 1);
        let keys: Vec<_> = json["entries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["key"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(keys, vec!["a", "b", "z"]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_file_is_empty_cache() {
        let dir = temp_dir("missing");
        let cache = FeedCache::load(&dir.join("nope.json")).unwrap();
        assert!(cache.is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_corrupt_file_is_unreadable() {
        let dir = temp_dir("corrupt");
        let path = dir.join("cache.json");
        std::fs::write(&path, "{ definitely not a cache").unwrap();

        let err = FeedCache::load(&path).unwrap_err();
        assert!(matches!(err, CacheError::Unreadable { .. }));

        std::fs::write(&path, r#"{"version": 99, "entries": []}"#).unwrap();
        let err = FeedCache::load(&path).unwrap_err();
        assert!(err.to_string().contains("version 99"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_directory_path_rejected() {
        let dir = temp_dir("is_dir");
        assert!(matches!(FeedCache::load(&dir), Err(CacheError::IsDirectory(_))));
        assert!(matches!(
            FeedCache::new().save(&dir, 0),
            Err(CacheError::IsDirectory(_))
        ));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_backup_rotation() {
        let dir = temp_dir("rotation");
        let path = dir.join("cache.json");

        let mut cache = FeedCache::new();
        for (n, key) in ["first", "second", "third"].iter().enumerate() {
            cache.filter_new(CHANNEL, &[item(key)], ts(n as u32 + 1));
            cache.save(&path, 2).unwrap();
        }

        let current = FeedCache::load(&path).unwrap();
        let newest_backup = FeedCache::load(&backup_path(&path, 1)).unwrap();
        let oldest_backup = FeedCache::load(&backup_path(&path, 2)).unwrap();

        assert_eq!(current.len(), 3);
        assert_eq!(newest_backup.len(), 2);
        assert_eq!(oldest_backup.len(), 1);
        assert!(oldest_backup.contains(CHANNEL, "first"));
        assert!(!backup_path(&path, 3).exists());

        // A fourth save keeps at most two backups
        cache.save(&path, 2).unwrap();
        assert_eq!(FeedCache::load(&backup_path(&path, 2)).unwrap().len(), 2);
        assert!(!backup_path(&path, 3).exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = temp_dir("no_temp");
        let path = dir.join("cache.json");
        FeedCache::new().save(&path, 1).unwrap();
        FeedCache::new().save(&path, 1).unwrap();

        let names: Vec<_> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().all(|n| !n.contains(".tmp.")), "{names:?}");

        std::fs::remove_dir_all(&dir).ok();
    }
}
