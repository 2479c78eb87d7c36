//! Configuration loading.
//!
//! Values are layered: built-in defaults, then `polbridge.json`, then
//! environment variables, then command-line flags.
//!
//! The config file is looked up in this order:
//! 1. `--config <path>` (must exist)
//! 2. `POLBRIDGE_CONFIG` (must exist)
//! 3. `./polbridge.json`
//! 4. Platform config dir (`~/.config/polbridge/polbridge.json` on Linux)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::constants::{DEFAULT_FOREIGN_EXTENSION, DEFAULT_LISTEN_ADDR, DEFAULT_SCRIPT_EXTENSION};

const CONFIG_FILE_NAME: &str = "polbridge.json";

/// Bridge configuration.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Address to listen on.
    pub listen_addr: String,
    /// Root directory for bare script paths.
    pub scripts_root: PathBuf,
    /// Directory scanned for packages. Defaults to `<scripts_root>/pkg`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packages_dir: Option<PathBuf>,
    /// Extension of host scripts, without the dot.
    pub script_extension: String,
    /// Extension stripped from incoming paths, without the dot.
    pub foreign_extension: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            scripts_root: PathBuf::from("scripts"),
            packages_dir: None,
            script_extension: DEFAULT_SCRIPT_EXTENSION.to_string(),
            foreign_extension: DEFAULT_FOREIGN_EXTENSION.to_string(),
        }
    }
}

impl Config {
    /// Load configuration with environment overrides applied.
    ///
    /// `explicit` is the `--config` flag, if given.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match Self::locate(explicit)? {
            Some(path) => {
                log::info!("Loading config from {}", path.display());
                Self::load_from_file(&path)?
            }
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn locate(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        let required = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("POLBRIDGE_CONFIG").map(PathBuf::from));
        if let Some(path) = required {
            anyhow::ensure!(path.is_file(), "Config file not found: {}", path.display());
            return Ok(Some(path));
        }

        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.is_file() {
            return Ok(Some(local));
        }
        Ok(dirs::config_dir()
            .map(|dir| dir.join("polbridge").join(CONFIG_FILE_NAME))
            .filter(|path| path.is_file()))
    }

    /// Parse a config file. Missing keys take their defaults.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply `POLBRIDGE_LISTEN`, `POLBRIDGE_SCRIPTS_ROOT` and
    /// `POLBRIDGE_PACKAGES_DIR` as returned by `lookup`.
    fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(listen) = lookup("POLBRIDGE_LISTEN") {
            self.listen_addr = listen;
        }
        if let Some(root) = lookup("POLBRIDGE_SCRIPTS_ROOT") {
            self.scripts_root = PathBuf::from(root);
        }
        if let Some(dir) = lookup("POLBRIDGE_PACKAGES_DIR") {
            self.packages_dir = Some(PathBuf::from(dir));
        }
    }

    /// Apply command-line flags, which win over everything else.
    pub fn apply_cli(&mut self, listen: Option<String>, scripts_root: Option<PathBuf>) {
        if let Some(listen) = listen {
            self.listen_addr = listen;
        }
        if let Some(root) = scripts_root {
            self.scripts_root = root;
        }
    }

    /// Effective packages directory.
    pub fn packages_dir(&self) -> PathBuf {
        self.packages_dir
            .clone()
            .unwrap_or_else(|| self.scripts_root.join("pkg"))
    }

    /// Canonicalize `scripts_root`.
    ///
    /// # Errors
    ///
    /// Fails if the directory does not exist.
    pub fn canonical_scripts_root(&self) -> Result<PathBuf> {
        let root = self.scripts_root.canonicalize().with_context(|| {
            format!("Scripts root {} does not exist", self.scripts_root.display())
        })?;
        anyhow::ensure!(root.is_dir(), "Scripts root {} is not a directory", root.display());
        Ok(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.listen_addr, "127.0.0.1:6060");
        assert_eq!(config.script_extension, "lua");
        assert_eq!(config.foreign_extension, "ecl");
        assert_eq!(config.packages_dir(), PathBuf::from("scripts/pkg"));
    }

    #[test]
    fn test_load_from_file_partial() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CONFIG_FILE_NAME);
        fs::write(&path, r#"{"listen_addr": "127.0.0.1:7070", "packages_dir": "/opt/pkg"}"#).unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:7070");
        assert_eq!(config.packages_dir(), PathBuf::from("/opt/pkg"));
        assert_eq!(config.scripts_root, PathBuf::from("scripts"));
    }

    #[test]
    fn test_load_from_invalid_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "{nope").unwrap();
        assert!(Config::load_from_file(&path).is_err());
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let temp = TempDir::new().unwrap();
        assert!(Config::load(Some(&temp.path().join("missing.json"))).is_err());
    }

    #[test]
    fn test_env_then_cli_precedence() {
        let env: HashMap<&str, &str> = [
            ("POLBRIDGE_LISTEN", "0.0.0.0:1"),
            ("POLBRIDGE_SCRIPTS_ROOT", "/env/scripts"),
            ("POLBRIDGE_PACKAGES_DIR", "/env/pkg"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides_from(|key| env.get(key).map(|v| (*v).to_string()));
        assert_eq!(config.listen_addr, "0.0.0.0:1");
        assert_eq!(config.scripts_root, PathBuf::from("/env/scripts"));
        assert_eq!(config.packages_dir(), PathBuf::from("/env/pkg"));

        config.apply_cli(Some("127.0.0.1:2".to_string()), None);
        assert_eq!(config.listen_addr, "127.0.0.1:2");
        assert_eq!(config.scripts_root, PathBuf::from("/env/scripts"));
    }

    #[test]
    fn test_canonical_scripts_root() {
        let temp = TempDir::new().unwrap();
        let config = Config {
            scripts_root: temp.path().to_path_buf(),
            ..Config::default()
        };
        assert_eq!(
            config.canonical_scripts_root().unwrap(),
            temp.path().canonicalize().unwrap()
        );

        let missing = Config {
            scripts_root: temp.path().join("absent"),
            ..Config::default()
        };
        assert!(missing.canonical_scripts_root().is_err());
    }
}
