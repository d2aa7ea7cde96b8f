// Expansion of `{{...}}` Jake-variable/positional/function references
// inside a command line. `$VAR`-style environment expansion is a
// separate, later step handled by `Environment::expand_command`.

use crate::functions;
use indexmap::IndexMap;

/// Expands every `{{...}}` span in `line`. Unknown variables, unknown
/// functions, and out-of-range positionals never produce an error: an
/// unresolvable `{{name}}` is left verbatim (never substituted empty),
/// while positional forms substitute empty when out of range.
pub fn expand_braces(line: &str, variables: &IndexMap<String, String>, positionals: &[String]) -> String {
  let mut out = String::with_capacity(line.len());
  let mut rest = line;

  while let Some(start) = rest.find("{{") {
    out.push_str(&rest[..start]);
    let after = &rest[start + 2..];
    let Some(end) = after.find("}}") else {
      // Unterminated `{{`: emit it verbatim and stop scanning.
      out.push_str(&rest[start..]);
      return out;
    };
    let inner = after[..end].trim();
    let whole = &rest[start..start + 2 + end + 2];
    out.push_str(&expand_one(inner, whole, variables, positionals));
    rest = &after[end + 2..];
  }
  out.push_str(rest);
  out
}

fn expand_one(inner: &str, whole: &str, variables: &IndexMap<String, String>, positionals: &[String]) -> String {
  if let Some(rest) = inner.strip_prefix('$') {
    return expand_positional(rest, whole, positionals);
  }

  if let Some(open) = inner.find('(') {
    if inner.ends_with(')') {
      let name = inner[..open].trim();
      let arg = inner[open + 1..inner.len() - 1].trim();
      let resolved_arg = variables.get(arg).cloned().unwrap_or_else(|| arg.to_owned());
      return functions::apply(name, &resolved_arg).unwrap_or_else(|| whole.to_owned());
    }
  }

  variables.get(inner).cloned().unwrap_or_else(|| whole.to_owned())
}

fn expand_positional(name: &str, whole: &str, positionals: &[String]) -> String {
  if name == "@" {
    return positionals.join(" ");
  }
  match name.parse::<usize>() {
    Ok(0) => String::new(),
    Ok(n) => positionals.get(n - 1).cloned().unwrap_or_default(),
    Err(_) => whole.to_owned(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn vars(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
  }

  #[test]
  fn expands_known_variable() {
    let v = vars(&[("greeting", "Hi")]);
    assert_eq!(expand_braces("{{greeting}} there", &v, &[]), "Hi there");
  }

  #[test]
  fn unknown_variable_is_left_verbatim() {
    let v = vars(&[]);
    assert_eq!(expand_braces("{{mystery}}", &v, &[]), "{{mystery}}");
  }

  #[test]
  fn positional_args_substitute_by_index() {
    let v = vars(&[]);
    assert_eq!(expand_braces("{{$1}}", &v, &["world".to_owned()]), "world");
  }

  #[test]
  fn positional_zero_is_empty() {
    let v = vars(&[]);
    assert_eq!(expand_braces("[{{$0}}]", &v, &["world".to_owned()]), "[]");
  }

  #[test]
  fn out_of_range_positional_is_empty() {
    let v = vars(&[]);
    assert_eq!(expand_braces("[{{$5}}]", &v, &["a".to_owned()]), "[]");
  }

  #[test]
  fn at_positional_joins_with_space() {
    let v = vars(&[]);
    let positionals = vec!["a".to_owned(), "b".to_owned(), "c".to_owned()];
    assert_eq!(expand_braces("{{$@}}", &v, &positionals), "a b c");
  }

  #[test]
  fn at_positional_empty_when_no_args() {
    let v = vars(&[]);
    assert_eq!(expand_braces("{{$@}}", &v, &[]), "");
  }

  #[test]
  fn non_numeric_dollar_name_is_left_verbatim() {
    let v = vars(&[]);
    assert_eq!(expand_braces("{{$name}}", &v, &[]), "{{$name}}");
  }

  #[test]
  fn function_call_applies_to_literal_argument() {
    let v = vars(&[]);
    assert_eq!(expand_braces("{{uppercase(hi)}}", &v, &[]), "HI");
  }

  #[test]
  fn function_call_resolves_variable_argument_first() {
    let v = vars(&[("name", "jake")]);
    assert_eq!(expand_braces("{{uppercase(name)}}", &v, &[]), "JAKE");
  }

  #[test]
  fn unknown_function_is_left_verbatim() {
    let v = vars(&[]);
    assert_eq!(expand_braces("{{reverse(hi)}}", &v, &[]), "{{reverse(hi)}}");
  }

  #[test]
  fn string_with_no_braces_is_unchanged() {
    let v = vars(&[]);
    assert_eq!(expand_braces("echo hello world", &v, &[]), "echo hello world");
  }
}
