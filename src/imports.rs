// Import resolution: loads imported Jakefiles and merges their recipes into
// the parent, prefixing names and recording origin info. The seen-set
// guards against import cycles the same defensive way other traversal
// loops in this codebase guard against revisiting a node.

use crate::ast::{Jakefile, Origin};
use crate::error::{JakeError, Result};
use crate::parser;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Recursively resolves `import` statements starting from an already-parsed
/// root Jakefile, merging every imported recipe into the root with its name
/// prefixed. Returns the merged Jakefile.
pub fn resolve(mut root: Jakefile, root_path: &Path) -> Result<Jakefile> {
  let mut seen = HashSet::new();
  if let Ok(canonical) = fs::canonicalize(root_path) {
    seen.insert(canonical);
  }

  let imports = std::mem::take(&mut root.imports);
  for import in &imports {
    merge_import(&mut root, import, root_path, &mut seen)?;
  }
  root.imports = imports;

  Ok(root)
}

fn merge_import(
  root: &mut Jakefile,
  import: &crate::ast::Import,
  from_path: &Path,
  seen: &mut HashSet<PathBuf>,
) -> Result<()> {
  let base = from_path.parent().unwrap_or_else(|| Path::new("."));
  let import_path = base.join(&import.path);

  let canonical = match fs::canonicalize(&import_path) {
    Ok(p) => p,
    Err(source) => {
      return Err(JakeError::from_io(import_path.display().to_string(), source));
    }
  };

  if !seen.insert(canonical.clone()) {
    // Already merged (or an ancestor currently being merged): skip silently,
    // per the documented cycle-safety decision.
    return Ok(());
  }

  let source =
    fs::read_to_string(&import_path).map_err(|source| JakeError::from_io(import_path.display().to_string(), source))?;

  let file_label = import_path.display().to_string();
  let (child, diagnostics) = parser::parse(&source, &file_label);
  if let Some(first) = diagnostics.first() {
    return Err(JakeError::ParseError {
      message: first.message.clone(),
      file: first.file.clone(),
      line: first.line,
      column: first.column,
    });
  }

  let prefix = import
    .alias
    .clone()
    .unwrap_or_else(|| file_basename(&import_path));

  let sibling_names: HashSet<String> = child.recipes.keys().cloned().collect();

  for (original_name, mut recipe) in child.recipes {
    let prefixed_name = format!("{}.{}", prefix, original_name);
    recipe.origin = Some(Origin {
      original_name: original_name.clone(),
      prefix: prefix.clone(),
      source_file: file_label.clone(),
    });
    // Dependencies written inside the imported file refer to sibling
    // recipes in that same file; prefix them too. A dependency naming a
    // recipe the imported file doesn't define is left as-is, so it can
    // still resolve against a recipe the parent defines directly.
    recipe.dependencies = recipe
      .dependencies
      .into_iter()
      .map(|dep| if sibling_names.contains(&dep) { format!("{}.{}", prefix, dep) } else { dep })
      .collect();
    recipe.name = prefixed_name.clone();
    if !root.recipes.contains_key(&prefixed_name) {
      root.recipes.insert(prefixed_name, recipe);
    }
  }

  for variable in child.variables.into_values() {
    root.variables.entry(variable.name.clone()).or_insert(variable);
  }

  for directive in child.directives {
    root.directives.push(directive);
  }

  // Transitively resolve imports declared by the child.
  for nested in &child.imports {
    merge_import(root, nested, &import_path, seen)?;
  }

  Ok(())
}

fn file_basename(path: &Path) -> String {
  path
    .file_stem()
    .map(|s| s.to_string_lossy().into_owned())
    .unwrap_or_else(|| "import".to_owned())
}
