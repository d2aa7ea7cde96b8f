// In-memory environment map, `.env` loading, and `$VAR`/`${VAR}`/
// `${VAR:-default}` expansion. Child-process environment assembly clones
// the inherited process environment, then overlays the tool's own entries,
// the same shape used elsewhere in the codebase for building a spawned
// child's environment.

use indexmap::IndexMap;
use std::collections::HashMap;
use std::path::Path;

/// An ordered `name -> value` map, separate from the process environment
/// until `build_env_map` combines them for a child process.
#[derive(Debug, Clone, Default)]
pub struct Environment {
  values: IndexMap<String, String>,
}

impl Environment {
  pub fn new() -> Self {
    Environment { values: IndexMap::new() }
  }

  pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
    self.values.insert(key.into(), value.into());
  }

  pub fn get(&self, key: &str) -> Option<&str> {
    self.values.get(key).map(String::as_str)
  }

  /// Parses `KEY=VALUE` lines from a `.env`-style file, ignoring blank lines
  /// and lines starting with `#`, and trimming surrounding quotes on the
  /// value. A missing file is silently tolerated.
  pub fn load_dotenv(&mut self, path: &Path) {
    let Ok(contents) = std::fs::read_to_string(path) else {
      return;
    };
    for line in contents.lines() {
      let trimmed = line.trim();
      if trimmed.is_empty() || trimmed.starts_with('#') {
        continue;
      }
      let Some((key, value)) = trimmed.split_once('=') else {
        continue;
      };
      let key = key.trim();
      let value = unquote(value.trim());
      self.values.insert(key.to_owned(), value);
    }
  }

  /// Expands `$NAME`, `${NAME}`, and `${NAME:-default}` against this map
  /// first, then the process environment. Unknown names expand to empty
  /// unless a default is given. Content inside single-quoted runs is left
  /// untouched; double-quoted and bare runs are expanded.
  pub fn expand_command(&self, line: &str) -> String {
    let mut out: Vec<u8> = Vec::with_capacity(line.len());
    let bytes = line.as_bytes();
    let mut i = 0;
    let mut in_single_quotes = false;

    while i < bytes.len() {
      let b = bytes[i];
      if b == b'\'' {
        in_single_quotes = !in_single_quotes;
        out.push(b);
        i += 1;
        continue;
      }
      if b == b'$' && !in_single_quotes {
        if let Some((expanded, consumed)) = self.expand_one(&line[i..]) {
          out.extend_from_slice(expanded.as_bytes());
          i += consumed;
          continue;
        }
      }
      out.push(b);
      i += 1;
    }

    String::from_utf8(out).unwrap_or_else(|_| line.to_owned())
  }

  /// Expands the `$...` reference starting at `rest[0] == '$'`. Returns the
  /// expansion and how many bytes of `rest` it consumed.
  fn expand_one(&self, rest: &str) -> Option<(String, usize)> {
    let bytes = rest.as_bytes();
    if bytes.len() < 2 {
      return None;
    }

    if bytes[1] == b'{' {
      let end = rest.find('}')?;
      let inner = &rest[2..end];
      let (name, default) = match inner.split_once(":-") {
        Some((n, d)) => (n, Some(d)),
        None => (inner, None),
      };
      let value = self.lookup(name).unwrap_or_else(|| default.unwrap_or("").to_owned());
      return Some((value, end + 1));
    }

    let name_len = bytes[1..].iter().take_while(|&&b| is_name_byte(b)).count();
    if name_len == 0 {
      return None;
    }
    let name = &rest[1..1 + name_len];
    let value = self.lookup(name).unwrap_or_default();
    Some((value, 1 + name_len))
  }

  fn lookup(&self, name: &str) -> Option<String> {
    self.values.get(name).cloned().or_else(|| std::env::var(name).ok())
  }

  /// Builds the environment for a spawned child process: the full process
  /// environment overlaid with this map's entries.
  pub fn build_env_map(&self) -> HashMap<String, String> {
    let mut map: HashMap<String, String> = std::env::vars().collect();
    for (k, v) in &self.values {
      map.insert(k.clone(), v.clone());
    }
    map
  }
}

fn is_name_byte(b: u8) -> bool {
  b.is_ascii_alphanumeric() || b == b'_'
}

fn unquote(s: &str) -> String {
  let bytes = s.as_bytes();
  if bytes.len() >= 2 && (bytes[0] == b'"' || bytes[0] == b'\'') && bytes[bytes.len() - 1] == bytes[0] {
    s[1..s.len() - 1].to_owned()
  } else {
    s.to_owned()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn expands_bare_dollar_var() {
    let mut env = Environment::new();
    env.set("NAME", "jake");
    assert_eq!(env.expand_command("hello $NAME"), "hello jake");
  }

  #[test]
  fn expands_braced_var() {
    let mut env = Environment::new();
    env.set("NAME", "jake");
    assert_eq!(env.expand_command("hello ${NAME}!"), "hello jake!");
  }

  #[test]
  fn braced_default_is_used_when_unset() {
    let env = Environment::new();
    assert_eq!(env.expand_command("${MISSING_XYZ:-fallback}"), "fallback");
  }

  #[test]
  fn unknown_bare_var_expands_to_empty() {
    let env = Environment::new();
    assert_eq!(env.expand_command("[$MISSING_XYZ]"), "[]");
  }

  #[test]
  fn single_quoted_dollar_is_not_expanded() {
    let mut env = Environment::new();
    env.set("NAME", "jake");
    assert_eq!(env.expand_command("'$NAME'"), "'$NAME'");
  }

  #[test]
  fn unchanged_when_no_expansion_targets_present() {
    let env = Environment::new();
    assert_eq!(env.expand_command("echo hello world"), "echo hello world");
  }

  #[test]
  fn dotenv_loading_trims_quotes_and_skips_comments() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(".env");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "# a comment\n\nFOO=\"bar\"\nBAZ=qux\n").unwrap();
    drop(file);

    let mut env = Environment::new();
    env.load_dotenv(&path);
    assert_eq!(env.get("FOO"), Some("bar"));
    assert_eq!(env.get("BAZ"), Some("qux"));
  }

  #[test]
  fn missing_dotenv_file_is_tolerated() {
    let mut env = Environment::new();
    env.load_dotenv(Path::new("/nonexistent/path/.env"));
    assert!(env.get("ANYTHING").is_none());
  }
}
