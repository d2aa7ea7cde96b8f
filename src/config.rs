use serde::{Deserialize, Serialize};

pub const EMPTY_CONFIG: &str = "{}";

// Jake's own tool-wide configuration, loaded from `~/.config/jake/config.yml`.
// Not the Jakefile itself -- this is user-wide defaults that CLI flags
// override.
#[derive(Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
  #[serde(default = "default_jobs")]
  pub jobs: usize,

  #[serde(default)]
  pub shell: Option<String>,

  #[serde(default = "default_color")]
  pub color: bool,
}

fn default_jobs() -> usize {
  1
}

fn default_color() -> bool {
  true
}

impl Default for Config {
  fn default() -> Self {
    Config { jobs: default_jobs(), shell: None, color: default_color() }
  }
}

// Parse config data.
pub fn parse(config: &str) -> Result<Config, String> {
  serde_yaml::from_str(config).map_err(|e| format!("{}", e))
}

/// Loads the tool config from its fixed path. A missing or corrupt file
/// falls back to defaults rather than failing the whole run.
pub fn load() -> Config {
  let Some(path) = config_path() else {
    return Config::default();
  };
  match std::fs::read_to_string(&path) {
    Ok(text) => parse(&text).unwrap_or_default(),
    Err(_) => Config::default(),
  }
}

pub fn config_path() -> Option<std::path::PathBuf> {
  dirs::config_dir().map(|dir| dir.join("jake").join("config.yml"))
}

#[cfg(test)]
mod tests {
  use crate::config::{parse, Config, EMPTY_CONFIG};

  #[test]
  fn parse_empty() {
    let result = Ok(Config { jobs: 1, shell: None, color: true });
    assert_eq!(parse(EMPTY_CONFIG), result);
  }

  #[test]
  fn parse_nonempty() {
    let config = r#"
jobs: 4
shell: /bin/zsh
color: false
    "#
    .trim();

    let result = Ok(Config { jobs: 4, shell: Some("/bin/zsh".to_owned()), color: false });

    assert_eq!(parse(config), result);
  }

  #[test]
  fn unknown_field_is_rejected() {
    assert!(parse("bogus_field: true").is_err());
  }
}
