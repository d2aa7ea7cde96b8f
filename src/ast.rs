// The typed Jakefile data model produced by the parser and consumed
// read-only by the import resolver (which only merges it) and the
// executors (which never mutate it).

use indexmap::IndexMap;
use std::collections::HashSet;

/// A top-level variable: `name = "value"`. Last definition wins, enforced by
/// the parser/import-merge step rather than by this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
  pub name: String,
  pub value: String,
  pub line: usize,
}

/// The kind of lifecycle hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
  Pre,
  Post,
  OnError,
}

/// A registered hook, either global (`target: None`) or targeted at one
/// recipe by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hook {
  pub kind: HookKind,
  pub target: Option<String>,
  pub command: String,
  pub line: usize,
}

/// A top-level (file-scope) directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopDirective {
  Dotenv(Vec<String>),
  Require(Vec<String>),
  Export(Vec<(String, String)>),
  /// One-shot: applies quiet mode to the very next recipe definition.
  Quiet,
  Hook(Hook),
}

/// `import "path" [as alias]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
  pub path: String,
  pub alias: Option<String>,
  pub line: usize,
}

/// Records where an imported recipe came from, so diagnostics and privacy
/// checks can use the pre-prefix name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
  pub original_name: String,
  pub prefix: String,
  pub source_file: String,
}

/// The syntactic prefix on a recipe header, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipeKind {
  Simple,
  Task,
  File,
}

/// A recipe parameter: `name` or `name = default`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
  pub name: String,
  pub default: Option<String>,
}

/// An entry in a recipe-level `needs` list: an external command that must
/// exist on `PATH` (or at an absolute path) before the recipe runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeedsEntry {
  pub command: String,
  pub hint: Option<String>,
  pub install_task: Option<String>,
}

/// A body-level directive, recognized by its `@`-prefixed keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyDirective {
  If(String),
  Elif(String),
  Else,
  End,
  Ignore,
  Needs(Vec<NeedsEntry>),
  Confirm(Option<String>),
  Each(String),
  Cache(Vec<String>),
  Watch(Vec<String>),
  Launch(String),
}

/// A single line in a recipe body: either an ordinary shell command or a
/// classified directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
  pub line: String,
  pub directive: Option<BodyDirective>,
  pub line_no: usize,
}

/// A named unit of work: a task, a file target, or a plain recipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipe {
  pub name: String,
  pub origin: Option<Origin>,
  pub kind: RecipeKind,
  pub dependencies: Vec<String>,
  pub file_deps: Vec<String>,
  pub output: Option<String>,
  pub params: Vec<Param>,
  pub commands: Vec<Command>,
  pub pre_hooks: Vec<String>,
  pub post_hooks: Vec<String>,
  pub doc_comment: Option<String>,
  pub description: Option<String>,
  pub is_default: bool,
  pub aliases: Vec<String>,
  pub group: Option<String>,
  pub shell: Option<String>,
  pub working_dir: Option<String>,
  pub only_os: HashSet<String>,
  pub quiet: bool,
  pub needs: Vec<NeedsEntry>,
  pub timeout_seconds: Option<u64>,
  pub line: usize,
}

impl Recipe {
  pub fn new(name: String, kind: RecipeKind, line: usize) -> Self {
    Recipe {
      name,
      origin: None,
      kind,
      dependencies: Vec::new(),
      file_deps: Vec::new(),
      output: None,
      params: Vec::new(),
      commands: Vec::new(),
      pre_hooks: Vec::new(),
      post_hooks: Vec::new(),
      doc_comment: None,
      description: None,
      is_default: false,
      aliases: Vec::new(),
      group: None,
      shell: None,
      working_dir: None,
      only_os: HashSet::new(),
      quiet: false,
      needs: Vec::new(),
      timeout_seconds: None,
      line,
    }
  }
}

/// The parsed representation of a Jakefile (before import resolution).
#[derive(Debug, Clone, Default)]
pub struct Jakefile {
  pub variables: IndexMap<String, Variable>,
  pub directives: Vec<TopDirective>,
  pub imports: Vec<Import>,
  pub recipes: IndexMap<String, Recipe>,
  pub source: String,
}

impl Jakefile {
  pub fn default_recipe(&self) -> Option<&Recipe> {
    self.recipes.values().find(|r| r.is_default)
  }

  /// Resolves `name` to the canonical recipe name: a primary recipe name
  /// wins outright, otherwise any recipe whose `@alias` list contains
  /// `name` is used. Returns `None` if neither matches.
  pub fn resolve_name(&self, name: &str) -> Option<&str> {
    if let Some((key, _)) = self.recipes.get_key_value(name) {
      return Some(key.as_str());
    }
    self
      .recipes
      .values()
      .find(|r| r.aliases.iter().any(|alias| alias == name))
      .map(|r| r.name.as_str())
  }

  pub fn global_hooks(&self, kind: HookKind) -> Vec<&Hook> {
    self
      .directives
      .iter()
      .filter_map(|d| match d {
        TopDirective::Hook(h) if h.kind == kind => Some(h),
        _ => None,
      })
      .collect()
  }

  /// Hooks registered with `before <recipe>` / `after <recipe>` targeting a
  /// specific recipe name (as opposed to the recipe's own `pre`/`post`
  /// blocks, which live on `Recipe` directly).
  pub fn targeted_hooks(&self, kind: HookKind, recipe: &str) -> Vec<&Hook> {
    self
      .directives
      .iter()
      .filter_map(|d| match d {
        TopDirective::Hook(h) if h.kind == kind && h.target.as_deref() == Some(recipe) => Some(h),
        _ => None,
      })
      .collect()
  }
}
