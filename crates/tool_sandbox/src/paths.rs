use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use crate::error::SandboxError;

/// Absolute paths the session has read (or listed) through the sandbox.
///
/// An existing file may only be overwritten or patched once it is in here.
#[derive(Debug, Clone, Default)]
pub struct ReadSet {
    paths: BTreeSet<PathBuf>,
}

impl ReadSet {
    pub fn mark(&mut self, path: impl Into<PathBuf>) {
        self.paths.insert(path.into());
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.contains(path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn clear(&mut self) {
        self.paths.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.paths.iter().map(PathBuf::as_path)
    }
}

/// A path argument after confinement checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// `root` joined with the normalized relative form.
    pub absolute: PathBuf,
    /// Normalized, `/`-separated path relative to the root (`.` for the root).
    pub relative: String,
}

/// Filesystem jail rooted at one canonical directory.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SandboxError> {
        let root = root.as_ref();
        let canonical_root = root
            .canonicalize()
            .map_err(|error| SandboxError::io("resolve workspace root", root.display().to_string(), error))?;

        if !canonical_root.is_dir() {
            return Err(SandboxError::NotDirectory(
                canonical_root.display().to_string(),
            ));
        }

        Ok(Self {
            root: canonical_root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Confines `raw` to the workspace.
    ///
    /// The check is lexical first (absolute paths outside the root and any
    /// `..` that climbs above it are rejected), then canonical: the nearest
    /// existing ancestor must still live under the root once symlinks are
    /// resolved.
    pub fn resolve(&self, raw: &str) -> Result<ResolvedPath, SandboxError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SandboxError::InvalidArguments(
                "path must not be empty".to_string(),
            ));
        }

        let candidate = Path::new(trimmed);
        let relative_input = if candidate.is_absolute() {
            candidate
                .strip_prefix(&self.root)
                .map_err(|_| SandboxError::PathViolation(trimmed.to_string()))?
        } else {
            candidate
        };

        let mut parts: Vec<String> = Vec::new();
        for component in relative_input.components() {
            match component {
                Component::CurDir => {}
                Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
                Component::ParentDir => {
                    if parts.pop().is_none() {
                        return Err(SandboxError::PathViolation(trimmed.to_string()));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(SandboxError::PathViolation(trimmed.to_string()));
                }
            }
        }

        let mut absolute = self.root.clone();
        absolute.extend(&parts);

        let anchor = canonicalize_existing_ancestor(&absolute)?;
        self.ensure_inside_workspace(&anchor, trimmed)?;

        let relative = if parts.is_empty() {
            ".".to_string()
        } else {
            parts.join("/")
        };

        Ok(ResolvedPath { absolute, relative })
    }

    /// Re-checks a path after the filesystem changed under it (for example
    /// after creating parent directories).
    pub fn ensure_still_inside(&self, path: &Path, display: &str) -> Result<(), SandboxError> {
        let anchor = canonicalize_existing_ancestor(path)?;
        self.ensure_inside_workspace(&anchor, display)
    }

    pub fn relative_display(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .map(|relative| {
                relative
                    .components()
                    .map(|part| part.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .unwrap_or_else(|_| path.display().to_string())
    }

    fn ensure_inside_workspace(&self, canonical_path: &Path, display: &str) -> Result<(), SandboxError> {
        if canonical_path.starts_with(&self.root) {
            Ok(())
        } else {
            Err(SandboxError::PathViolation(display.to_string()))
        }
    }
}

fn canonicalize_existing_ancestor(path: &Path) -> Result<PathBuf, SandboxError> {
    for ancestor in path.ancestors() {
        if ancestor.exists() {
            return ancestor.canonicalize().map_err(|error| {
                SandboxError::io("resolve path", ancestor.display().to_string(), error)
            });
        }
    }

    Err(SandboxError::PathViolation(path.display().to_string()))
}

#[cfg(test)]
mod tests {
    use super::Workspace;
    use crate::error::SandboxError;

    #[test]
    fn dot_segments_are_normalized_inside_the_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let workspace = Workspace::new(dir.path()).expect("workspace");

        let resolved = workspace.resolve("./src/../docs/guide.md").expect("inside root");
        assert_eq!(resolved.relative, "docs/guide.md");
        assert_eq!(resolved.absolute, workspace.root().join("docs").join("guide.md"));
        assert_eq!(workspace.resolve(".").expect("root").relative, ".");
    }

    #[test]
    fn climbing_above_the_root_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let workspace = Workspace::new(dir.path()).expect("workspace");

        for raw in ["../outside", "a/../../b", "/etc/passwd"] {
            assert!(
                matches!(workspace.resolve(raw), Err(SandboxError::PathViolation(_))),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn absolute_path_under_the_root_is_accepted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let workspace = Workspace::new(dir.path()).expect("workspace");
        let inside = workspace.root().join("notes.txt");

        let resolved = workspace
            .resolve(inside.to_str().expect("utf8 path"))
            .expect("inside root");
        assert_eq!(resolved.relative, "notes.txt");
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escape_is_rejected() {
        let outside = tempfile::tempdir().expect("outside");
        let dir = tempfile::tempdir().expect("tempdir");
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).expect("symlink");
        let workspace = Workspace::new(dir.path()).expect("workspace");

        assert!(matches!(
            workspace.resolve("link/secret.txt"),
            Err(SandboxError::PathViolation(_))
        ));
    }
}
