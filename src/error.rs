// The error taxonomy for the crate: a `Display` + chained `source()` + a
// way to print a colored `error:` label with an optional hint and
// follow-up suggestion, derived with `thiserror`.

use crate::format::CodeStr;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, JakeError>;

#[derive(Debug, Error)]
pub enum JakeError {
  #[error("{file}:{line}:{column}: {message}")]
  ParseError {
    message: String,
    file: String,
    line: usize,
    column: usize,
  },

  #[error("No recipe named `{name}`.")]
  RecipeNotFound { name: String, candidates: Vec<String> },

  #[error("Dependency cycle detected: {}.", .cycle.join(" -> "))]
  CyclicDependency { cycle: Vec<String> },

  #[error(
    "Missing required environment variable{}: {}.",
    if .names.len() == 1 { "" } else { "s" },
    crate::format::series(.names)
  )]
  MissingRequiredEnv { names: Vec<String> },

  #[error("Recipe `{recipe}` failed: {message}")]
  CommandFailed { recipe: String, message: String },

  #[error("File not found: `{path}`.")]
  FileNotFound { path: String, #[source] source: io::Error },

  #[error("Access denied: `{path}`.")]
  AccessDenied { path: String, #[source] source: io::Error },

  #[error("System resource error: {message}")]
  SystemResources { message: String },

  #[error("Unexpected error: {message}")]
  Unexpected { message: String },

  #[error("Out of memory.")]
  OutOfMemory,

  #[error("Interrupted.")]
  Interrupted,
}

impl JakeError {
  /// Builds `FileNotFound` or `AccessDenied` from an `io::Error` that
  /// occurred while reading or canonicalizing `path`, branching on
  /// `source.kind()` so a permission-denied file isn't misreported as
  /// missing.
  pub fn from_io(path: impl Into<String>, source: io::Error) -> JakeError {
    let path = path.into();
    if source.kind() == io::ErrorKind::PermissionDenied {
      JakeError::AccessDenied { path, source }
    } else {
      JakeError::FileNotFound { path, source }
    }
  }

  /// A short, structured hint to print below the error message, when one is
  /// available.
  pub fn hint(&self) -> Option<String> {
    match self {
      JakeError::RecipeNotFound { candidates, .. } if !candidates.is_empty() => Some(format!(
        "did you mean {}?",
        crate::format::series(&candidates.iter().map(|c| c.code_str().to_string()).collect::<Vec<_>>())
      )),
      JakeError::MissingRequiredEnv { names } => Some(format!(
        "set {} in your shell or in a `.env` file",
        crate::format::series(&names.iter().map(|n| n.code_str().to_string()).collect::<Vec<_>>())
      )),
      _ => None,
    }
  }

  /// A "run: jake <task>" style follow-up suggestion, when one applies.
  pub fn suggestion(&self) -> Option<String> {
    match self {
      JakeError::RecipeNotFound { candidates, .. } => {
        candidates.first().map(|c| format!("run: jake {}", c))
      }
      _ => None,
    }
  }

  /// Prints a colored `error:` label, the message, and (if present) a
  /// hint/suggestion line.
  pub fn report(&self) {
    eprintln!("{} {}", "error:".red().bold(), self);
    if let Some(hint) = self.hint() {
      eprintln!("{} {}", "hint:".yellow().bold(), hint);
    }
    if let Some(suggestion) = self.suggestion() {
      eprintln!("{} {}", "note:".blue().bold(), suggestion);
    }
  }
}

use colored::Colorize;

pub fn user_error(message: impl Into<String>) -> JakeError {
  JakeError::Unexpected { message: message.into() }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cyclic_dependency_message_includes_cycle() {
    let err = JakeError::CyclicDependency {
      cycle: vec!["a".to_owned(), "b".to_owned(), "a".to_owned()],
    };
    assert_eq!(err.to_string(), "Dependency cycle detected: a -> b -> a.");
  }

  #[test]
  fn missing_required_env_pluralizes() {
    let err = JakeError::MissingRequiredEnv {
      names: vec!["FOO".to_owned()],
    };
    assert_eq!(err.to_string(), "Missing required environment variable: FOO.");

    let err = JakeError::MissingRequiredEnv {
      names: vec!["FOO".to_owned(), "BAR".to_owned()],
    };
    assert_eq!(err.to_string(), "Missing required environment variables: FOO and BAR.");
  }

  #[test]
  fn from_io_maps_permission_denied_to_access_denied() {
    let source = io::Error::from(io::ErrorKind::PermissionDenied);
    let err = JakeError::from_io("secret.jake", source);
    assert!(matches!(err, JakeError::AccessDenied { .. }));
  }

  #[test]
  fn from_io_maps_other_errors_to_file_not_found() {
    let source = io::Error::from(io::ErrorKind::NotFound);
    let err = JakeError::from_io("missing.jake", source);
    assert!(matches!(err, JakeError::FileNotFound { .. }));
  }
}
