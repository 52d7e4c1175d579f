//! Jailed file storage for generated artifacts.

use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Checks that `path` is a plain relative path.
///
/// Rejects empty paths, absolute paths, drive prefixes (`C:`), and any `..`
/// segment. Backslashes are treated as separators so that Windows-style
/// traversal is rejected on every host.
pub fn check_relative_path(path: &str) -> Result<()> {
    if path.trim().is_empty() {
        return Err(Error::containment(path, "empty path"));
    }
    if path.contains('\0') {
        return Err(Error::containment(path, "path contains a NUL byte"));
    }

    let normalized = path.replace('\\', "/");
    let bytes = normalized.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        return Err(Error::containment(path, "drive prefixes are not allowed"));
    }

    let mut has_name = false;
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(_) => has_name = true,
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(Error::containment(path, "parent-directory segments are not allowed"));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(Error::containment(path, "absolute paths are not allowed"));
            }
        }
    }

    if !has_name {
        return Err(Error::containment(path, "path does not name a file"));
    }

    Ok(())
}

/// A single directory beneath which every generated file lives.
///
/// The root is created lazily on first use. All operations are synchronous;
/// callers must not write the same path concurrently from two runs.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Creates a workspace rooted at `root`. Nothing is touched on disk yet.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the configured root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the root if needed and returns its canonical form.
    pub fn canonical_root(&self) -> Result<PathBuf> {
        fs::create_dir_all(&self.root)?;
        Ok(self.root.canonicalize()?)
    }

    /// Resolves `path` to an absolute location inside the root.
    ///
    /// The lexical check runs before anything touches the disk, so rejected
    /// paths never cause a filesystem mutation. Existing ancestors are
    /// canonicalized to catch symlinks pointing out of the root.
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        check_relative_path(path)?;

        let root = self.canonical_root()?;
        let candidate = root.join(path.replace('\\', "/"));

        let mut existing = candidate.as_path();
        while existing.symlink_metadata().is_err() {
            match existing.parent() {
                Some(parent) => existing = parent,
                None => break,
            }
        }

        let canonical = existing
            .canonicalize()
            .map_err(|e| Error::containment(path, format!("cannot resolve path: {}", e)))?;
        if !canonical.starts_with(&root) {
            tracing::warn!(path = %path, resolved = ?canonical, "path escapes workspace root");
            return Err(Error::containment(path, "resolves outside the workspace root"));
        }

        Ok(candidate)
    }

    /// Writes `content` to `path`, creating parent directories inside the root.
    ///
    /// Existing content is overwritten. Returns the number of bytes written.
    pub fn write(&self, path: &str, content: &str) -> Result<usize> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, content)?;

        tracing::debug!(path = %path, bytes = content.len(), "wrote workspace file");
        Ok(content.len())
    }

    /// Reads the content stored at `path`.
    pub fn read(&self, path: &str) -> Result<String> {
        let target = self.resolve(path)?;
        if !target.is_file() {
            return Err(Error::NotFound(path.to_string()));
        }
        Ok(fs::read_to_string(&target)?)
    }

    /// Returns true if a file exists at `path` inside the root.
    pub fn contains(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Lists every file under the root as sorted, `/`-separated relative paths.
    pub fn list(&self) -> Result<Vec<String>> {
        let root = self.canonical_root()?;
        let mut files = Vec::new();
        collect_files(&root, &root, &mut files)?;
        files.sort();
        Ok(files)
    }

    /// Removes every file and subdirectory under the root, keeping the root.
    pub fn clear(&self) -> Result<()> {
        let root = self.canonical_root()?;
        for entry in fs::read_dir(&root)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                fs::remove_dir_all(entry.path())?;
            } else {
                fs::remove_file(entry.path())?;
            }
        }

        tracing::info!(root = ?root, "cleared workspace");
        Ok(())
    }
}

fn collect_files(root: &Path, dir: &Path, files: &mut Vec<String>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            collect_files(root, &path, files)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            let parts: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            files.push(parts.join("/"));
        }
    }
    Ok(())
}
