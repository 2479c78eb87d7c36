//! Script package discovery.
//!
//! A package is a directory under the packages dir that contains a
//! `pkg.json` manifest. Scripts inside it are addressed by the peer as
//! `:<package>:<relative path>`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::PACKAGE_MANIFEST;

/// Contents of `pkg.json`. Unknown keys are kept in `extra`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct PackageManifest {
    /// Package name; defaults to the directory name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Free-form version string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Everything else in the manifest.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A discovered package.
#[derive(Clone, Debug)]
pub struct Package {
    /// Name the peer uses to address it.
    pub name: String,
    /// Canonical install directory.
    pub path: PathBuf,
    /// Parsed manifest.
    pub manifest: PackageManifest,
}

/// Package name → install directory. Read-only once built.
#[derive(Clone, Debug, Default)]
pub struct PackageTable {
    packages: HashMap<String, Package>,
}

impl PackageTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan `dir` for packages.
    ///
    /// A missing `dir` yields an empty table. Sub-directories without a
    /// manifest are skipped.
    pub fn discover(dir: &Path) -> Result<Self> {
        let mut table = Self::new();
        if !dir.is_dir() {
            log::info!("Packages directory {} not found, no packages loaded", dir.display());
            return Ok(table);
        }

        let entries = fs::read_dir(dir)
            .with_context(|| format!("Failed to read packages directory {}", dir.display()))?;
        for entry in entries {
            let entry = entry.context("Failed to read packages directory entry")?;
            let path = entry.path();
            if !path.is_dir() || !path.join(PACKAGE_MANIFEST).is_file() {
                continue;
            }
            let package = Self::load_package(&path)?;
            table.insert(package)?;
        }
        Ok(table)
    }

    fn load_package(path: &Path) -> Result<Package> {
        let manifest_path = path.join(PACKAGE_MANIFEST);
        let content = fs::read_to_string(&manifest_path)
            .with_context(|| format!("Failed to read {}", manifest_path.display()))?;
        let manifest: PackageManifest = serde_json::from_str(&content)
            .with_context(|| format!("Invalid package manifest {}", manifest_path.display()))?;

        let path = path
            .canonicalize()
            .with_context(|| format!("Failed to resolve package path {}", path.display()))?;
        let name = match &manifest.name {
            Some(name) => name.clone(),
            None => path
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
                .with_context(|| format!("Package directory has no usable name: {}", path.display()))?,
        };

        Ok(Package {
            name,
            path,
            manifest,
        })
    }

    /// Add a package.
    ///
    /// # Errors
    ///
    /// Fails if another package already has the same name.
    pub fn insert(&mut self, package: Package) -> Result<()> {
        if let Some(existing) = self.packages.get(&package.name) {
            anyhow::bail!(
                "Duplicate package \"{}\" in {} and {}",
                package.name,
                existing.path.display(),
                package.path.display()
            );
        }
        log::info!("Loaded package \"{}\" from {}", package.name, package.path.display());
        self.packages.insert(package.name.clone(), package);
        Ok(())
    }

    /// Package by name.
    pub fn get(&self, name: &str) -> Option<&Package> {
        self.packages.get(name)
    }

    /// Sorted package names.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.packages.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of packages.
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    /// Returns true if there are no packages.
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}
