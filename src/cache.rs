// The persistent content cache: a map from a glob pattern or file-dep
// string to a snapshot of the identity of every file it matched as of the
// last successful update.
//
// Persistence follows an atomic write-then-rename shape via `tempfile`;
// the optional content digest (on top of plain size/mtime) gives a
// stronger-than-mtime identity for small files.

use crate::globset;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tempfile::NamedTempFile;

/// Above this size, the cache trusts `(size, mtime)` alone and skips
/// hashing -- hashing large build artifacts on every check would make
/// `@cache` itself the bottleneck.
const DIGEST_SIZE_LIMIT: u64 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIdentity {
  pub path: String,
  pub size: u64,
  pub mtime_unix_ms: i64,
  pub digest: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cache {
  entries: IndexMap<String, Vec<FileIdentity>>,
  #[serde(skip)]
  path: Option<PathBuf>,
}

impl Cache {
  /// Best-effort load from `path`. A missing or corrupt file is equivalent
  /// to an empty cache.
  pub fn load(path: &Path) -> Self {
    let mut cache = fs::read_to_string(path)
      .ok()
      .and_then(|text| serde_json::from_str::<Cache>(&text).ok())
      .unwrap_or_default();
    cache.path = Some(path.to_owned());
    cache
  }

  /// Expands `pattern` and compares it to the stored snapshot. Returns
  /// `true` (stale) if the snapshot is absent, or any matching file is
  /// new, missing, or changed.
  pub fn is_glob_stale(&self, pattern: &str) -> bool {
    let Some(stored) = self.entries.get(pattern) else {
      return true;
    };
    let current = snapshot(pattern);
    current != *stored
  }

  /// Re-expands `pattern` and stores the fresh snapshot. Does not persist
  /// to disk -- call `save` for that.
  pub fn update(&mut self, pattern: &str) {
    self.entries.insert(pattern.to_owned(), snapshot(pattern));
  }

  /// Atomically persists the whole cache to its load path (write a temp
  /// file in the same directory, then rename over the target).
  pub fn save(&self) -> std::io::Result<()> {
    let Some(path) = &self.path else {
      return Ok(());
    };
    let Some(dir) = path.parent() else {
      return Ok(());
    };
    fs::create_dir_all(dir)?;
    let body = serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_owned());
    let mut temp = NamedTempFile::new_in(dir)?;
    use std::io::Write;
    temp.write_all(body.as_bytes())?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
  }

  /// The default cache file location: `~/.cache/jake/cache.json`, or a
  /// fallback relative path if the home directory can't be resolved.
  pub fn default_path() -> PathBuf {
    dirs::cache_dir().unwrap_or_else(|| PathBuf::from(".")).join("jake").join("cache.json")
  }
}

fn snapshot(pattern: &str) -> Vec<FileIdentity> {
  let mut identities: Vec<FileIdentity> = globset::expand(pattern)
    .into_iter()
    .filter_map(|path| identity_of(&path))
    .collect();
  identities.sort_by(|a, b| a.path.cmp(&b.path));
  identities
}

fn identity_of(path: &Path) -> Option<FileIdentity> {
  let metadata = fs::metadata(path).ok()?;
  let size = metadata.len();
  let mtime_unix_ms = metadata
    .modified()
    .ok()
    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
    .map(|d| d.as_millis() as i64)
    .unwrap_or(0);

  let digest = if size <= DIGEST_SIZE_LIMIT {
    fs::read(path).ok().map(|bytes| hex_digest(&bytes))
  } else {
    None
  };

  Some(FileIdentity { path: path.to_string_lossy().into_owned(), size, mtime_unix_ms, digest })
}

fn hex_digest(bytes: &[u8]) -> String {
  let hash = Sha256::digest(bytes);
  hash.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;

  #[test]
  fn missing_cache_file_is_empty() {
    let cache = Cache::load(Path::new("/nonexistent/cache.json"));
    assert!(cache.entries.is_empty());
  }

  #[test]
  fn unseen_pattern_is_stale() {
    let cache = Cache::default();
    assert!(cache.is_glob_stale("src/*.rs"));
  }

  #[test]
  fn unchanged_file_is_fresh_after_update() {
    let dir = tempfile::tempdir().unwrap();
    let file_path = dir.path().join("a.txt");
    fs::write(&file_path, "hello").unwrap();

    let pattern = file_path.to_string_lossy().into_owned();
    let mut cache = Cache::default();
    assert!(cache.is_glob_stale(&pattern));
    cache.update(&pattern);
    assert!(!cache.is_glob_stale(&pattern));
  }

  #[test]
  fn modified_file_is_stale_again() {
    let dir = tempfile::tempdir().unwrap();
    let file_path = dir.path().join("a.txt");
    fs::write(&file_path, "hello").unwrap();

    let pattern = file_path.to_string_lossy().into_owned();
    let mut cache = Cache::default();
    cache.update(&pattern);
    assert!(!cache.is_glob_stale(&pattern));

    fs::write(&file_path, "hello, world, with rather more bytes in it now").unwrap();
    assert!(cache.is_glob_stale(&pattern));
  }

  #[test]
  fn save_then_load_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let file_path = dir.path().join("a.txt");
    fs::write(&file_path, "hello").unwrap();
    let pattern = file_path.to_string_lossy().into_owned();

    let cache_path = dir.path().join("cache.json");
    let mut cache = Cache::load(&cache_path);
    cache.update(&pattern);
    cache.save().unwrap();

    let reloaded = Cache::load(&cache_path);
    assert!(!reloaded.is_glob_stale(&pattern));
  }
}
