// The `@confirm` yes/no prompt. Small and direct, writing straight to
// stdout for user-facing output rather than going through `log` (see
// `format.rs`).

use std::io::{self, Write};

/// Asks the user to confirm `message` on stdin/stdout. Always answers "yes"
/// without prompting when `auto_yes` or `dry_run` is set.
pub fn confirm(message: &str, auto_yes: bool, dry_run: bool) -> bool {
  if auto_yes || dry_run {
    return true;
  }

  print!("{} [y/N] ", message);
  let _ = io::stdout().flush();

  let mut answer = String::new();
  if io::stdin().read_line(&mut answer).is_err() {
    return false;
  }

  matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}
