// Thin wrapper around the `glob` crate: the concrete implementation of the
// file-system glob expansion primitives the rest of the crate treats as an
// opaque collaborator.

use std::path::PathBuf;

/// Expands a glob pattern to a lexicographically sorted list of matching
/// paths. A pattern with no glob metacharacters that doesn't exist on disk
/// is returned as a single literal path (never an error) -- callers decide
/// what "no matches" means for their use case.
pub fn expand(pattern: &str) -> Vec<PathBuf> {
  if !is_glob_pattern(pattern) {
    return vec![PathBuf::from(pattern)];
  }

  match glob::glob(pattern) {
    Ok(paths) => {
      let mut matched: Vec<PathBuf> = paths.filter_map(Result::ok).collect();
      matched.sort();
      matched
    }
    Err(_) => Vec::new(),
  }
}

pub fn is_glob_pattern(pattern: &str) -> bool {
  pattern.contains('*') || pattern.contains('?') || pattern.contains('[')
}
