// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use std::fmt;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::error::FloeError;

/// Why a library-relative path was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("path is empty")]
    Empty,

    #[error("path \"{0}\" is absolute; paths must be relative to the library folder")]
    Absolute(String),

    #[error("path \"{0}\" starts with \"..\"; paths must stay inside the library folder")]
    ParentPrefix(String),

    #[error("path \"{0}\" leaves the library folder")]
    Escapes(String),
}

/// A path relative to a library's root folder. Construction rejects absolute
/// paths and paths that begin with `..`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelativePath(String);

impl RelativePath {
    pub fn new(path: &str) -> Result<RelativePath, PathError> {
        if path.is_empty() {
            return Err(PathError::Empty);
        }
        if is_absolute(path) {
            return Err(PathError::Absolute(path.to_string()));
        }
        if path.starts_with("..") {
            return Err(PathError::ParentPrefix(path.to_string()));
        }
        Ok(RelativePath(path.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_absolute(path: &str) -> bool {
    let bytes = path.as_bytes();
    path.starts_with('/')
        || path.starts_with('\\')
        || (bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':')
}

/// Read access scoped to a library's root folder. Every lookup is resolved
/// lexically against the root and refused if it would leave it.
#[derive(Debug, Clone, Default)]
pub struct FileReader {
    root: PathBuf,
}

impl FileReader {
    pub fn new(root: impl Into<PathBuf>) -> FileReader {
        FileReader { root: root.into() }
    }

    /// The library root folder.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Joins a relative path onto the root. Backslashes are treated as separators
    /// so that scripts written on Windows resolve everywhere.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, PathError> {
        let checked = RelativePath::new(path)?;
        let normalized = checked.as_str().replace('\\', "/");

        let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
        for component in Path::new(&normalized).components() {
            match component {
                Component::Normal(part) => parts.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if parts.pop().is_none() {
                        return Err(PathError::Escapes(path.to_string()));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(PathError::Absolute(path.to_string()))
                }
            }
        }
        if parts.is_empty() {
            return Err(PathError::Empty);
        }

        let mut resolved = self.root.clone();
        resolved.extend(parts);
        Ok(resolved)
    }

    /// Resolves a path that has already passed construction checks.
    pub fn resolve_relative(&self, path: &RelativePath) -> Result<PathBuf, PathError> {
        self.resolve(path.as_str())
    }

    /// Returns true if the path resolves inside the root and names an existing file.
    pub fn exists(&self, path: &RelativePath) -> Result<bool, PathError> {
        let resolved = self.resolve_relative(path)?;
        Ok(resolved.is_file())
    }

    /// Reads a whole file from the library folder.
    pub fn read(&self, path: &RelativePath) -> Result<Vec<u8>, FloeError> {
        let resolved = self
            .resolve_relative(path)
            .map_err(|e| FloeError::InvalidFileFormat {
                path: self.root.clone(),
                message: e.to_string(),
            })?;
        debug!(path = ?resolved, "Reading library file");
        std::fs::read(&resolved).map_err(|source| FloeError::io(&resolved, source))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_relative_path_rules() {
        assert!(RelativePath::new("samples/a.wav").is_ok());
        assert_eq!(RelativePath::new(""), Err(PathError::Empty));
        assert_eq!(
            RelativePath::new("/etc/passwd"),
            Err(PathError::Absolute("/etc/passwd".to_string()))
        );
        assert_eq!(
            RelativePath::new("C:\\x.wav"),
            Err(PathError::Absolute("C:\\x.wav".to_string()))
        );
        assert_eq!(
            RelativePath::new("../outside.wav"),
            Err(PathError::ParentPrefix("../outside.wav".to_string()))
        );
    }

    #[test]
    fn test_resolve_stays_inside_root() {
        let reader = FileReader::new("/libs/piano");
        assert_eq!(
            reader.resolve("samples/./c4.wav").expect("resolve"),
            PathBuf::from("/libs/piano/samples/c4.wav")
        );
        assert_eq!(
            reader.resolve("samples\\c4.wav").expect("resolve"),
            PathBuf::from("/libs/piano/samples/c4.wav")
        );
        assert_eq!(
            reader.resolve("samples/../c4.wav").expect("resolve"),
            PathBuf::from("/libs/piano/c4.wav")
        );
        assert_eq!(
            reader.resolve("samples/../../c4.wav"),
            Err(PathError::Escapes("samples/../../c4.wav".to_string()))
        );
    }

    #[test]
    fn test_read_and_exists() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.txt"), b"hello").expect("write");
        let reader = FileReader::new(dir.path());
        let path = RelativePath::new("a.txt").expect("path");
        assert!(reader.exists(&path).expect("exists"));
        assert_eq!(reader.read(&path).expect("read"), b"hello");

        let missing = RelativePath::new("b.txt").expect("path");
        assert!(!reader.exists(&missing).expect("exists"));
        assert!(matches!(reader.read(&missing), Err(FloeError::Io { .. })));
    }
}
