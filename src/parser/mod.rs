// Recursive-descent parser: consumes the lexer's token stream and builds a
// `Jakefile` AST. On a structural error it records a diagnostic and resumes
// at the next newline, so parsing always yields a usable (if partial) AST.
//
// The parser never expands variables or functions -- it stores raw lexemes
// and leaves expansion to the executor.

use crate::ast::{
  BodyDirective, Command, Hook, HookKind, Import, Jakefile, NeedsEntry, Param, Recipe, RecipeKind,
  TopDirective, Variable,
};
use crate::lexer::{Lexer, Token, TokenKind};
use std::collections::HashSet;

/// A non-fatal parse diagnostic: precise `file:line:column` plus a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
  pub file: String,
  pub line: usize,
  pub column: usize,
  pub message: String,
}

impl std::fmt::Display for Diagnostic {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}:{}:{}: {}", self.file, self.line, self.column, self.message)
  }
}

const MAX_CONDITIONAL_DEPTH: usize = 32;

const DIRECTIVE_KEYWORDS: &[&str] = &[
  "if", "elif", "else", "end", "ignore", "needs", "confirm", "each", "cache", "watch", "launch",
];

/// Pending top-level annotations that attach to the *next* recipe header.
#[derive(Default)]
struct Pending {
  doc_lines: Vec<String>,
  aliases: Vec<String>,
  group: Option<String>,
  description: Option<String>,
  shell: Option<String>,
  working_dir: Option<String>,
  only_os: HashSet<String>,
  quiet: bool,
  is_default: bool,
  needs: Vec<NeedsEntry>,
  timeout_seconds: Option<u64>,
  pre_hooks: Vec<String>,
  post_hooks: Vec<String>,
}

impl Pending {
  fn take_doc_comment(&mut self) -> Option<String> {
    if self.doc_lines.is_empty() {
      None
    } else {
      Some(self.doc_lines.drain(..).collect::<Vec<_>>().join("\n"))
    }
  }

  fn is_empty(&self) -> bool {
    self.doc_lines.is_empty()
      && self.aliases.is_empty()
      && self.group.is_none()
      && self.description.is_none()
      && self.shell.is_none()
      && self.working_dir.is_none()
      && self.only_os.is_empty()
      && !self.quiet
      && !self.is_default
      && self.needs.is_empty()
      && self.timeout_seconds.is_none()
      && self.pre_hooks.is_empty()
      && self.post_hooks.is_empty()
  }
}

pub struct Parser<'a> {
  tokens: Vec<Token>,
  pos: usize,
  source: &'a str,
  file: String,
  diagnostics: Vec<Diagnostic>,
}

/// Parse a Jakefile's source text. Always returns a (possibly partial) AST,
/// plus any diagnostics collected along the way.
pub fn parse(source: &str, file: &str) -> (Jakefile, Vec<Diagnostic>) {
  let tokens = Lexer::new(source).tokenize();
  let mut parser = Parser {
    tokens,
    pos: 0,
    source,
    file: file.to_owned(),
    diagnostics: Vec::new(),
  };
  let jakefile = parser.parse_jakefile();
  (jakefile, parser.diagnostics)
}

impl<'a> Parser<'a> {
  fn current(&self) -> Token {
    self.tokens[self.pos.min(self.tokens.len() - 1)]
  }

  fn kind(&self) -> TokenKind {
    self.current().kind
  }

  fn text(&self, token: Token) -> &'a str {
    token.text(self.source)
  }

  fn current_text(&self) -> &'a str {
    self.text(self.current())
  }

  fn at_eof(&self) -> bool {
    self.kind() == TokenKind::Eof
  }

  fn advance(&mut self) -> Token {
    let token = self.current();
    if self.pos < self.tokens.len() - 1 {
      self.pos += 1;
    }
    token
  }

  fn check(&self, kind: TokenKind) -> bool {
    self.kind() == kind
  }

  fn peek_kind(&self, offset: usize) -> TokenKind {
    self.tokens.get(self.pos + offset).map_or(TokenKind::Eof, |t| t.kind)
  }

  fn diagnostic(&mut self, token: Token, message: impl Into<String>) {
    self.diagnostics.push(Diagnostic {
      file: self.file.clone(),
      line: token.line,
      column: token.column,
      message: message.into(),
    });
  }

  /// Error recovery: record a diagnostic and skip to the next newline.
  fn recover(&mut self, message: impl Into<String>) {
    let token = self.current();
    self.diagnostic(token, message);
    while !self.check(TokenKind::Newline) && !self.at_eof() {
      self.advance();
    }
    if self.check(TokenKind::Newline) {
      self.advance();
    }
  }

  /// Consume a trailing newline (or accept EOF in its place).
  fn expect_newline(&mut self) {
    if self.check(TokenKind::Newline) {
      self.advance();
    } else if !self.at_eof() {
      self.recover("expected end of line");
    }
  }

  fn line_text_until_newline(&mut self) -> (String, usize) {
    let start_token = self.current();
    let start = start_token.start;
    let line_no = start_token.line;
    let mut end = start;
    while !self.check(TokenKind::Newline) && !self.at_eof() {
      end = self.current().end;
      self.advance();
    }
    (self.source[start..end].to_owned(), line_no)
  }

  fn parse_jakefile(&mut self) -> Jakefile {
    let mut jakefile = Jakefile {
      source: self.source.to_owned(),
      ..Jakefile::default()
    };
    let mut pending = Pending::default();

    loop {
      // Skip purely blank lines.
      while self.check(TokenKind::Newline) {
        self.advance();
      }

      if self.at_eof() {
        break;
      }

      match self.kind() {
        TokenKind::Comment => {
          let text = self.current_text();
          let stripped = text.trim_start_matches('#').trim();
          pending.doc_lines.push(stripped.to_owned());
          self.advance();
          self.expect_newline();
        }
        TokenKind::Default => {
          self.advance();
          self.expect_newline();
          pending.is_default = true;
        }
        TokenKind::At => {
          self.parse_top_directive(&mut jakefile, &mut pending);
        }
        TokenKind::Import => {
          self.parse_import(&mut jakefile);
        }
        TokenKind::Task => {
          self.advance();
          self.parse_recipe(&mut jakefile, &mut pending, RecipeKind::Task);
        }
        TokenKind::File => {
          self.advance();
          self.parse_recipe(&mut jakefile, &mut pending, RecipeKind::File);
        }
        TokenKind::Ident => {
          if self.peek_kind(1) == TokenKind::Eq {
            self.parse_variable(&mut jakefile);
          } else {
            self.parse_recipe(&mut jakefile, &mut pending, RecipeKind::Simple);
          }
        }
        _ => {
          self.recover("unexpected token at top level");
        }
      }
    }

    // Any pre/post annotations that never attached to a recipe become
    // global hooks, so nothing the user wrote is silently dropped.
    for command in pending.pre_hooks.drain(..) {
      jakefile.directives.push(TopDirective::Hook(Hook {
        kind: HookKind::Pre,
        target: None,
        command,
        line: 0,
      }));
    }
    for command in pending.post_hooks.drain(..) {
      jakefile.directives.push(TopDirective::Hook(Hook {
        kind: HookKind::Post,
        target: None,
        command,
        line: 0,
      }));
    }

    if !pending.is_empty() {
      let eof = self.current();
      self.diagnostic(eof, "trailing recipe annotations have no recipe to attach to");
    }

    jakefile
  }

  fn parse_variable(&mut self, jakefile: &mut Jakefile) {
    let name_token = self.advance();
    let name = self.text(name_token).to_owned();
    let line = name_token.line;
    self.advance(); // '='
    if self.at_eof() || self.check(TokenKind::Newline) {
      self.recover("expected a value after `=`");
      return;
    }
    let value_token = self.advance();
    let value = unquote(self.text(value_token));
    self.expect_newline();
    jakefile.variables.insert(name.clone(), Variable { name, value, line });
  }

  fn parse_import(&mut self, jakefile: &mut Jakefile) {
    let line = self.current().line;
    self.advance(); // 'import'
    if !self.check(TokenKind::String) && !self.check(TokenKind::Ident) && !self.check(TokenKind::GlobPattern) {
      self.recover("expected a path after `import`");
      return;
    }
    let path_token = self.advance();
    let path = unquote(self.text(path_token));
    let alias = if self.check(TokenKind::As) {
      self.advance();
      if self.check(TokenKind::Ident) {
        Some(self.text(self.advance()).to_owned())
      } else {
        self.recover("expected an identifier after `as`");
        None
      }
    } else {
      None
    };
    self.expect_newline();
    jakefile.imports.push(Import { path, alias, line });
  }

  /// Parses a top-level `@directive ...` line: dotenv/require/export/quiet,
  /// hook registrations (pre/post/on_error/before/after), and recipe
  /// annotations (alias/group/description/shell/workdir/only/needs/timeout).
  fn parse_top_directive(&mut self, jakefile: &mut Jakefile, pending: &mut Pending) {
    let at_token = self.advance(); // '@'
    if self.at_eof() || self.check(TokenKind::Newline) {
      self.recover("expected a directive keyword after `@`");
      return;
    }
    let keyword_token = self.advance();
    let keyword = self.text(keyword_token);
    let line = at_token.line;

    match (keyword_token.kind, keyword) {
      (TokenKind::Dotenv, _) => {
        let args = self.parse_arg_list();
        jakefile.directives.push(TopDirective::Dotenv(args));
        return;
      }
      (TokenKind::Require, _) => {
        let args = self.parse_arg_list();
        jakefile.directives.push(TopDirective::Require(args));
        return;
      }
      (TokenKind::Export, _) => {
        let args = self.parse_arg_list();
        let pairs = args
          .into_iter()
          .map(|arg| match arg.split_once('=') {
            Some((k, v)) => (k.to_owned(), v.to_owned()),
            None => (arg, String::new()),
          })
          .collect();
        jakefile.directives.push(TopDirective::Export(pairs));
        return;
      }
      (_, "quiet") => {
        self.expect_newline();
        pending.quiet = true;
        return;
      }
      (_, "alias") => {
        pending.aliases.extend(self.parse_arg_list());
        return;
      }
      (_, "group") => {
        let args = self.parse_arg_list();
        pending.group = args.into_iter().next();
        return;
      }
      (_, "description") => {
        let (rest, _) = self.line_text_until_newline();
        self.expect_newline();
        pending.description = Some(unquote(rest.trim()));
        return;
      }
      (_, "shell") => {
        let args = self.parse_arg_list();
        pending.shell = args.into_iter().next();
        return;
      }
      (_, "workdir") => {
        let args = self.parse_arg_list();
        pending.working_dir = args.into_iter().next();
        return;
      }
      (_, "only") => {
        pending.only_os.extend(self.parse_arg_list());
        return;
      }
      (_, "timeout") => {
        let args = self.parse_arg_list();
        if let Some(raw) = args.into_iter().next() {
          pending.timeout_seconds = parse_duration_seconds(&raw);
        }
        return;
      }
      (_, "needs") => {
        let args = self.parse_arg_list();
        pending
          .needs
          .extend(args.into_iter().map(|command| NeedsEntry { command, hint: None, install_task: None }));
        return;
      }
      (TokenKind::Pre, _) => {
        let (rest, _) = self.line_text_until_newline();
        self.expect_newline();
        pending.pre_hooks.push(rest.trim().to_owned());
        return;
      }
      (TokenKind::Post, _) => {
        let (rest, _) = self.line_text_until_newline();
        self.expect_newline();
        pending.post_hooks.push(rest.trim().to_owned());
        return;
      }
      (_, "on_error") => {
        let (rest, _) = self.line_text_until_newline();
        self.expect_newline();
        jakefile.directives.push(TopDirective::Hook(Hook {
          kind: HookKind::OnError,
          target: None,
          command: rest.trim().to_owned(),
          line,
        }));
        return;
      }
      (_, "before") | (_, "after") => {
        let hook_kind = if keyword == "before" { HookKind::Pre } else { HookKind::Post };
        if !self.check(TokenKind::Ident) {
          self.recover("expected a recipe name");
          return;
        }
        let target = self.text(self.advance()).to_owned();
        let (rest, _) = self.line_text_until_newline();
        self.expect_newline();
        jakefile.directives.push(TopDirective::Hook(Hook {
          kind: hook_kind,
          target: Some(target),
          command: rest.trim().to_owned(),
          line,
        }));
        return;
      }
      _ => {
        self.recover(format!("unknown directive `@{}`", keyword));
      }
    }
  }

  /// Parses a space/comma-separated argument list of strings/idents/globs
  /// until end of line.
  fn parse_arg_list(&mut self) -> Vec<String> {
    let mut args = Vec::new();
    while !self.check(TokenKind::Newline) && !self.at_eof() {
      if self.check(TokenKind::Comma) {
        self.advance();
        continue;
      }
      let token = self.advance();
      if token.kind == TokenKind::String {
        args.push(unquote(self.text(token)));
      } else {
        args.push(self.text(token).to_owned());
      }
    }
    self.expect_newline();
    args
  }

  fn parse_recipe(&mut self, jakefile: &mut Jakefile, pending: &mut Pending, kind: RecipeKind) {
    if !self.check(TokenKind::Ident) && !self.check(TokenKind::GlobPattern) {
      self.recover("expected a recipe name");
      return;
    }
    let name_token = self.advance();
    let name = self.text(name_token).to_owned();
    let line = name_token.line;

    let mut recipe = Recipe::new(name.clone(), kind, line);
    recipe.doc_comment = pending.take_doc_comment();
    recipe.aliases = std::mem::take(&mut pending.aliases);
    recipe.group = pending.group.take();
    recipe.description = pending.description.take();
    recipe.shell = pending.shell.take();
    recipe.working_dir = pending.working_dir.take();
    recipe.only_os = std::mem::take(&mut pending.only_os);
    recipe.quiet = std::mem::replace(&mut pending.quiet, false);
    recipe.is_default = std::mem::replace(&mut pending.is_default, false);
    recipe.needs = std::mem::take(&mut pending.needs);
    recipe.timeout_seconds = pending.timeout_seconds.take();
    recipe.pre_hooks = std::mem::take(&mut pending.pre_hooks);
    recipe.post_hooks = std::mem::take(&mut pending.post_hooks);

    if matches!(kind, RecipeKind::File) {
      recipe.output = Some(name.clone());
    }

    // Parameters: zero or more `ident` or `ident = default` until `:` or
    // end of line.
    while self.check(TokenKind::Ident) {
      let param_name = self.text(self.advance()).to_owned();
      let default = if self.check(TokenKind::Eq) {
        self.advance();
        if self.at_eof() || self.check(TokenKind::Newline) || self.check(TokenKind::Colon) {
          self.recover("expected a default value");
          None
        } else {
          Some(unquote(self.text(self.advance())))
        }
      } else {
        None
      };
      recipe.params.push(Param { name: param_name, default });
    }

    if self.check(TokenKind::Colon) {
      self.advance();
      let deps = self.parse_dependency_list();
      if matches!(kind, RecipeKind::File) {
        recipe.file_deps = deps;
      } else {
        recipe.dependencies = deps;
      }
    }

    self.expect_newline();

    recipe.commands = self.parse_recipe_body();

    if jakefile.recipes.contains_key(&recipe.name) {
      self.diagnostic(name_token, format!("duplicate recipe name `{}`", recipe.name));
    }
    jakefile.recipes.insert(recipe.name.clone(), recipe);
  }

  fn parse_dependency_list(&mut self) -> Vec<String> {
    let mut deps = Vec::new();
    let bracketed = self.check(TokenKind::LBracket);
    if bracketed {
      self.advance();
    }
    loop {
      if self.check(TokenKind::Newline) || self.at_eof() {
        break;
      }
      if bracketed && self.check(TokenKind::RBracket) {
        self.advance();
        break;
      }
      if self.check(TokenKind::Comma) {
        self.advance();
        continue;
      }
      if self.check(TokenKind::Ident) || self.check(TokenKind::GlobPattern) || self.check(TokenKind::String) {
        let token = self.advance();
        deps.push(if token.kind == TokenKind::String {
          unquote(self.text(token))
        } else {
          self.text(token).to_owned()
        });
      } else {
        break;
      }
    }
    deps
  }

  /// Parses indented body lines following a recipe header until a line
  /// without a leading indent token is seen.
  fn parse_recipe_body(&mut self) -> Vec<Command> {
    let mut commands = Vec::new();
    let mut depth: usize = 0;

    loop {
      if !self.check(TokenKind::Indent) {
        break;
      }
      self.advance(); // consume indent

      if self.check(TokenKind::Newline) {
        self.advance(); // blank indented line
        continue;
      }

      if self.check(TokenKind::Comment) {
        self.advance();
        self.expect_newline();
        continue;
      }

      let line_no = self.current().line;

      if self.check(TokenKind::At) {
        let save = self.pos;
        self.advance(); // '@'
        if matches!(self.kind(), TokenKind::Ident | TokenKind::If | TokenKind::Elif | TokenKind::Else | TokenKind::End | TokenKind::Each | TokenKind::Cache | TokenKind::Watch | TokenKind::Needs | TokenKind::Confirm)
          && DIRECTIVE_KEYWORDS.contains(&self.current_text())
        {
          let directive = self.parse_body_directive(&mut depth, line_no);
          commands.push(Command { line: String::new(), directive: Some(directive), line_no });
          continue;
        }
        // Not a recognized directive keyword: fall through and treat the
        // whole line (including the leading `@`) as a shell command.
        self.pos = save;
      }

      let (text, _) = self.line_text_until_newline();
      self.expect_newline();
      commands.push(Command { line: text, directive: None, line_no });
    }

    if depth != 0 {
      self.diagnostic(self.current(), "missing `@end` for `@if`/`@each`");
    }

    commands
  }

  fn parse_body_directive(&mut self, depth: &mut usize, line_no: usize) -> BodyDirective {
    let keyword_token = self.advance();
    let keyword = self.text(keyword_token);
    match keyword {
      "if" => {
        if *depth >= MAX_CONDITIONAL_DEPTH {
          self.diagnostic(keyword_token, "conditional nesting exceeds the maximum depth of 32");
        }
        *depth += 1;
        let (cond, _) = self.line_text_until_newline();
        self.expect_newline();
        BodyDirective::If(cond.trim().to_owned())
      }
      "elif" => {
        let (cond, _) = self.line_text_until_newline();
        self.expect_newline();
        BodyDirective::Elif(cond.trim().to_owned())
      }
      "else" => {
        self.expect_newline();
        BodyDirective::Else
      }
      "end" => {
        if *depth > 0 {
          *depth -= 1;
        }
        self.expect_newline();
        BodyDirective::End
      }
      "ignore" => {
        self.expect_newline();
        BodyDirective::Ignore
      }
      "needs" => {
        let args = self.parse_arg_list();
        BodyDirective::Needs(
          args.into_iter().map(|command| NeedsEntry { command, hint: None, install_task: None }).collect(),
        )
      }
      "confirm" => {
        let (rest, _) = self.line_text_until_newline();
        self.expect_newline();
        let trimmed = rest.trim();
        BodyDirective::Confirm(if trimmed.is_empty() { None } else { Some(trimmed.to_owned()) })
      }
      "each" => {
        *depth += 1;
        let (rest, _) = self.line_text_until_newline();
        self.expect_newline();
        BodyDirective::Each(rest.trim().to_owned())
      }
      "cache" => {
        let args = self.parse_arg_list();
        BodyDirective::Cache(args)
      }
      "watch" => {
        let args = self.parse_arg_list();
        BodyDirective::Watch(args)
      }
      "launch" => {
        let (rest, _) = self.line_text_until_newline();
        self.expect_newline();
        BodyDirective::Launch(rest.trim().to_owned())
      }
      other => {
        self.recover(format!("unknown directive `@{}`", other));
        let _ = line_no;
        BodyDirective::Ignore
      }
    }
  }
}

/// Strips a single layer of matching quotes, if present, leaving escapes
/// untouched (expansion-time concern, not parse-time).
fn unquote(lexeme: &str) -> String {
  let bytes = lexeme.as_bytes();
  if bytes.len() >= 2 && (bytes[0] == b'"' || bytes[0] == b'\'') && bytes[bytes.len() - 1] == bytes[0] {
    lexeme[1..lexeme.len() - 1].to_owned()
  } else {
    lexeme.to_owned()
  }
}

fn parse_duration_seconds(raw: &str) -> Option<u64> {
  let trimmed = raw.trim();
  let digits = trimmed.trim_end_matches(|c: char| !c.is_ascii_digit());
  digits.parse().ok()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ast::RecipeKind;

  #[test]
  fn parses_simple_recipe_with_dependencies() {
    let source = "task d:\n  echo d\ntask b: d\n  echo b\n";
    let (jakefile, diagnostics) = parse(source, "Jakefile");
    assert!(diagnostics.is_empty(), "{:?}", diagnostics);
    assert_eq!(jakefile.recipes.len(), 2);
    let b = &jakefile.recipes["b"];
    assert_eq!(b.dependencies, vec!["d".to_owned()]);
    assert_eq!(b.kind, RecipeKind::Task);
  }

  #[test]
  fn parses_variable() {
    let (jakefile, _) = parse("greeting = \"Hi\"\n", "Jakefile");
    assert_eq!(jakefile.variables["greeting"].value, "Hi");
  }

  #[test]
  fn three_space_indent_is_not_a_body_line() {
    let (jakefile, _) = parse("task t:\n   echo hi\n", "Jakefile");
    assert_eq!(jakefile.recipes["t"].commands.len(), 0);
  }

  #[test]
  fn four_space_indent_is_a_body_line() {
    let (jakefile, _) = parse("task t:\n    echo hi\n", "Jakefile");
    assert_eq!(jakefile.recipes["t"].commands.len(), 1);
  }

  #[test]
  fn conditional_directives_are_classified() {
    let source = "task t:\n    @if true\n    echo yes\n    @else\n    echo no\n    @end\n";
    let (jakefile, diagnostics) = parse(source, "Jakefile");
    assert!(diagnostics.is_empty(), "{:?}", diagnostics);
    let commands = &jakefile.recipes["t"].commands;
    assert!(matches!(commands[0].directive, Some(BodyDirective::If(_))));
    assert!(matches!(commands[2].directive, Some(BodyDirective::Else)));
    assert!(matches!(commands[4].directive, Some(BodyDirective::End)));
  }

  #[test]
  fn at_prefixed_shell_command_is_not_misclassified_as_directive() {
    let source = "task t:\n    @echo hi\n";
    let (jakefile, _) = parse(source, "Jakefile");
    let command = &jakefile.recipes["t"].commands[0];
    assert!(command.directive.is_none());
    assert_eq!(command.line, "@echo hi");
  }

  #[test]
  fn description_directive_attaches_to_the_next_recipe() {
    let source = "@description Builds the release binary\ntask build:\n    echo building\n";
    let (jakefile, diagnostics) = parse(source, "Jakefile");
    assert!(diagnostics.is_empty(), "{:?}", diagnostics);
    assert_eq!(jakefile.recipes["build"].description.as_deref(), Some("Builds the release binary"));
  }

  #[test]
  fn duplicate_recipe_name_is_a_diagnostic() {
    let source = "task t:\n    echo 1\ntask t:\n    echo 2\n";
    let (_, diagnostics) = parse(source, "Jakefile");
    assert!(diagnostics.iter().any(|d| d.message.contains("duplicate")));
  }

  #[test]
  fn default_marker_attaches_to_next_recipe() {
    let source = "default\ntask build:\n    echo building\n";
    let (jakefile, _) = parse(source, "Jakefile");
    assert!(jakefile.recipes["build"].is_default);
  }

  #[test]
  fn doc_comment_attaches_to_next_recipe() {
    let source = "# Builds the project.\ntask build:\n    echo hi\n";
    let (jakefile, _) = parse(source, "Jakefile");
    assert_eq!(jakefile.recipes["build"].doc_comment.as_deref(), Some("Builds the project."));
  }

  #[test]
  fn file_recipe_records_output_and_file_deps() {
    let source = "file out.txt: in.txt\n    echo hi > out.txt\n";
    let (jakefile, _) = parse(source, "Jakefile");
    let recipe = &jakefile.recipes["out.txt"];
    assert_eq!(recipe.output.as_deref(), Some("out.txt"));
    assert_eq!(recipe.file_deps, vec!["in.txt".to_owned()]);
  }
}
