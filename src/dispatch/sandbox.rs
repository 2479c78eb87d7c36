//! Confinement of peer-supplied script paths.
//!
//! Two forms are accepted:
//!
//! - `misc/skillwin`: relative to the scripts root
//! - `:moonwalker:start`: relative to the `moonwalker` package directory
//!
//! A trailing foreign extension (`.ecl`) is dropped and the host extension
//! (`.lua`) appended. The joined path is normalized lexically and must
//! stay strictly inside its root before the filesystem is touched at all;
//! the canonical path is then checked again so symlinks cannot lead out.

use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::constants::{DEFAULT_FOREIGN_EXTENSION, DEFAULT_SCRIPT_EXTENSION};
use crate::packages::PackageTable;

/// A script path that cannot be served.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// `:<name>:...` names a package that does not exist.
    #[error("Missing package \"{0}\"")]
    UnknownPackage(String),
    /// `:<name>` without the second colon.
    #[error("Malformed package script path \"{0}\"")]
    MalformedPath(String),
    /// The path leaves its root.
    #[error("Cannot access at invalid script path \"{0}\"")]
    Escape(String),
    /// The path is inside the root but no such file exists.
    #[error("Missing script file \"{}\"", .0.display())]
    MissingScript(PathBuf),
    /// Filesystem failure while resolving.
    #[error("Failed to resolve script path {}: {source}", .path.display())]
    Io {
        /// Path being resolved.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
}

/// Resolves script paths under the scripts root and package directories.
#[derive(Debug, Clone)]
pub struct Sandbox {
    scripts_root: PathBuf,
    packages: Arc<PackageTable>,
    script_extension: String,
    foreign_extension: String,
}

impl Sandbox {
    /// Sandbox rooted at `scripts_root` with the default extensions.
    pub fn new(scripts_root: impl Into<PathBuf>, packages: Arc<PackageTable>) -> Self {
        Self {
            scripts_root: scripts_root.into(),
            packages,
            script_extension: DEFAULT_SCRIPT_EXTENSION.to_string(),
            foreign_extension: DEFAULT_FOREIGN_EXTENSION.to_string(),
        }
    }

    /// Override the host and foreign extensions (without leading dot).
    #[must_use]
    pub fn with_extensions(mut self, script: &str, foreign: &str) -> Self {
        self.script_extension = script.to_string();
        self.foreign_extension = foreign.to_string();
        self
    }

    /// Scripts root.
    pub fn scripts_root(&self) -> &Path {
        &self.scripts_root
    }

    /// Host script extension.
    pub fn script_extension(&self) -> &str {
        &self.script_extension
    }

    /// Resolve `raw` to the canonical path of an existing script file.
    ///
    /// # Errors
    ///
    /// See [`SandboxError`]. Escapes are reported before any filesystem
    /// access.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf, SandboxError> {
        let (root, candidate) = self.confine(raw)?;

        let canonical_root = root.canonicalize().map_err(|source| SandboxError::Io {
            path: root.to_path_buf(),
            source,
        })?;
        let canonical = match candidate.canonicalize() {
            Ok(path) => path,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(SandboxError::MissingScript(candidate))
            }
            Err(source) => {
                return Err(SandboxError::Io {
                    path: candidate,
                    source,
                })
            }
        };

        if !is_strictly_within(&canonical, &canonical_root) {
            log::warn!(
                "Script path {raw:?} resolves to {} outside {}",
                canonical.display(),
                canonical_root.display()
            );
            return Err(SandboxError::Escape(raw.to_string()));
        }
        Ok(canonical)
    }

    /// Purely lexical resolution: pick the root, join, normalize, check
    /// confinement, append the host extension. Never touches the
    /// filesystem.
    pub fn confine(&self, raw: &str) -> Result<(&Path, PathBuf), SandboxError> {
        let (root, relative) = match raw.strip_prefix(':') {
            Some(qualified) => {
                let (name, relative) = qualified
                    .split_once(':')
                    .ok_or_else(|| SandboxError::MalformedPath(raw.to_string()))?;
                let package = self
                    .packages
                    .get(name)
                    .ok_or_else(|| SandboxError::UnknownPackage(name.to_string()))?;
                // Anything after a third colon is ignored.
                let relative = relative.split_once(':').map_or(relative, |(head, _)| head);
                (package.path.as_path(), relative)
            }
            None => (self.scripts_root.as_path(), raw),
        };

        let foreign_suffix = format!(".{}", self.foreign_extension);
        let relative = relative.strip_suffix(&foreign_suffix).unwrap_or(relative);

        let base = normalize(root).unwrap_or_else(|| root.to_path_buf());
        let candidate = normalize(&root.join(relative))
            .filter(|path| is_strictly_within(path, &base))
            .ok_or_else(|| SandboxError::Escape(raw.to_string()))?;

        let mut with_extension = candidate.into_os_string();
        with_extension.push(".");
        with_extension.push(&self.script_extension);
        Ok((root, PathBuf::from(with_extension)))
    }
}

/// Resolve `.` and `..` without consulting the filesystem. `None` if `..`
/// climbs past the filesystem root.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::Normal(_) => {
                out.push(component.as_os_str());
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
        }
    }
    Some(out)
}

fn is_strictly_within(path: &Path, root: &Path) -> bool {
    path != root && path.starts_with(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packages::{Package, PackageManifest};
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        root: PathBuf,
        sandbox: Sandbox,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let base = temp.path().canonicalize().unwrap();
        let root = base.join("scripts");
        fs::create_dir_all(root.join("misc")).unwrap();
        fs::write(root.join("misc/skillwin.lua"), "return function() end").unwrap();

        let pkg = root.join("pkg/moonwalker");
        fs::create_dir_all(&pkg).unwrap();
        fs::write(pkg.join("start.lua"), "return function() end").unwrap();
        fs::write(base.join("secret.lua"), "return 'secret'").unwrap();

        let mut packages = PackageTable::new();
        packages
            .insert(Package {
                name: "moonwalker".to_string(),
                path: pkg,
                manifest: PackageManifest::default(),
            })
            .unwrap();

        let sandbox = Sandbox::new(root.clone(), Arc::new(packages));
        Fixture {
            _temp: temp,
            root,
            sandbox,
        }
    }

    #[test]
    fn test_resolve_relative_script() {
        let fx = fixture();
        let path = fx.sandbox.resolve("misc/skillwin").unwrap();
        assert_eq!(path, fx.root.join("misc/skillwin.lua"));
    }

    #[test]
    fn test_foreign_extension_stripped() {
        let fx = fixture();
        let path = fx.sandbox.resolve("misc/skillwin.ecl").unwrap();
        assert_eq!(path, fx.root.join("misc/skillwin.lua"));
    }

    #[test]
    fn test_resolve_package_script() {
        let fx = fixture();
        let path = fx.sandbox.resolve(":moonwalker:start").unwrap();
        assert_eq!(path, fx.root.join("pkg/moonwalker/start.lua"));
    }

    #[test]
    fn test_package_path_ignores_extra_segments() {
        let fx = fixture();
        let path = fx.sandbox.resolve(":moonwalker:start:extra").unwrap();
        assert_eq!(path, fx.root.join("pkg/moonwalker/start.lua"));
    }

    #[test]
    fn test_unknown_package() {
        let fx = fixture();
        assert!(matches!(
            fx.sandbox.resolve(":nope:start"),
            Err(SandboxError::UnknownPackage(name)) if name == "nope"
        ));
    }

    #[test]
    fn test_malformed_package_path() {
        let fx = fixture();
        assert!(matches!(
            fx.sandbox.resolve(":moonwalker"),
            Err(SandboxError::MalformedPath(_))
        ));
    }

    #[test]
    fn test_traversal_rejected_before_fs_access() {
        let fx = fixture();
        // confine() is lexical; no file at this location needs to exist.
        assert!(matches!(
            fx.sandbox.confine("../../etc/passwd"),
            Err(SandboxError::Escape(_))
        ));
        assert!(matches!(
            fx.sandbox.resolve("../../etc/passwd"),
            Err(SandboxError::Escape(_))
        ));
    }

    #[test]
    fn test_traversal_to_existing_sibling_rejected() {
        let fx = fixture();
        assert!(matches!(
            fx.sandbox.resolve("../secret"),
            Err(SandboxError::Escape(_))
        ));
    }

    #[test]
    fn test_package_traversal_rejected() {
        let fx = fixture();
        assert!(matches!(
            fx.sandbox.resolve(":moonwalker:../../misc/skillwin"),
            Err(SandboxError::Escape(_))
        ));
    }

    #[test]
    fn test_absolute_path_outside_root_rejected() {
        let fx = fixture();
        assert!(matches!(
            fx.sandbox.resolve("/etc/passwd"),
            Err(SandboxError::Escape(_))
        ));
    }

    #[test]
    fn test_root_itself_rejected() {
        let fx = fixture();
        for raw in ["", ".", "misc/.."] {
            assert!(
                matches!(fx.sandbox.confine(raw), Err(SandboxError::Escape(_))),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_inner_dotdot_allowed() {
        let fx = fixture();
        let path = fx.sandbox.resolve("misc/../misc/./skillwin").unwrap();
        assert_eq!(path, fx.root.join("misc/skillwin.lua"));
    }

    #[test]
    fn test_missing_script() {
        let fx = fixture();
        assert!(matches!(
            fx.sandbox.resolve("misc/absent"),
            Err(SandboxError::MissingScript(path)) if path.ends_with("misc/absent.lua")
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_out_of_root_rejected() {
        let fx = fixture();
        let outside = fx.root.parent().unwrap().join("secret.lua");
        std::os::unix::fs::symlink(outside, fx.root.join("link.lua")).unwrap();

        assert!(matches!(
            fx.sandbox.resolve("link"),
            Err(SandboxError::Escape(_))
        ));
    }

    #[test]
    fn test_custom_extensions() {
        let fx = fixture();
        fs::write(fx.root.join("misc/tool.luau"), "").unwrap();
        let sandbox = fx.sandbox.clone().with_extensions("luau", "src");
        let path = sandbox.resolve("misc/tool.src").unwrap();
        assert_eq!(path, fx.root.join("misc/tool.luau"));
    }
}
