// The fixed dispatch table for `{{fn(arg)}}` string/path functions. Small
// and pure, in the same spirit as the other tiny pure-function modules
// (`format.rs`).

/// Applies a named function to an already-trimmed argument. Returns `None`
/// for an unrecognized function name, so the caller can leave the lexeme
/// verbatim rather than substituting an error.
pub fn apply(name: &str, arg: &str) -> Option<String> {
  match name {
    "uppercase" => Some(arg.to_uppercase()),
    "lowercase" => Some(arg.to_lowercase()),
    "dirname" => Some(
      std::path::Path::new(arg)
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| ".".to_owned()),
    ),
    "basename" => Some(
      std::path::Path::new(arg)
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| arg.to_owned()),
    ),
    "extension" => Some(
      std::path::Path::new(arg)
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default(),
    ),
    "trim" => Some(arg.trim().to_owned()),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn uppercase_and_lowercase() {
    assert_eq!(apply("uppercase", "hi"), Some("HI".to_owned()));
    assert_eq!(apply("lowercase", "HI"), Some("hi".to_owned()));
  }

  #[test]
  fn dirname_and_basename() {
    assert_eq!(apply("dirname", "src/main.rs"), Some("src".to_owned()));
    assert_eq!(apply("basename", "src/main.rs"), Some("main.rs".to_owned()));
  }

  #[test]
  fn dirname_of_bare_name_is_dot() {
    assert_eq!(apply("dirname", "main.rs"), Some(".".to_owned()));
  }

  #[test]
  fn extension_of_extensionless_path_is_empty() {
    assert_eq!(apply("extension", "Jakefile"), Some(String::new()));
  }

  #[test]
  fn unknown_function_is_none() {
    assert_eq!(apply("reverse", "hi"), None);
  }
}
