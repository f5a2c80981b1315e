//! Storage of persisted experiment results
//!
//! The conflict engine asks a [`StorageLocator`] which resources are
//! persisted at a path. [`FileSystemStore`] maps `/a/b` to `root/a/b` and
//! reports the regular files directly inside it.

use assay_declaration::ExperimentPath;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Resource persisted for an instruction path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedResource {
    /// Instruction path the resource belongs to
    pub path: ExperimentPath,
    /// Resource name within the location
    pub name: String,
    /// Backing file, if any
    pub file: Option<PathBuf>,
}

/// Iterator over the persisted resources of one location
pub type Location<'a> = Box<dyn Iterator<Item = io::Result<PersistedResource>> + 'a>;

/// Finds persisted resources by instruction path
pub trait StorageLocator: Send + Sync + fmt::Debug {
    /// Persisted resources at a path
    ///
    /// # Errors
    /// Returns an I/O error if the location cannot be read. Individual
    /// entries may also fail.
    fn location(&self, path: &ExperimentPath) -> io::Result<Location<'_>>;
}

/// Storage with nothing persisted
#[derive(Debug, Clone, Copy, Default)]
pub struct NoStorage;

impl StorageLocator for NoStorage {
    fn location(&self, _path: &ExperimentPath) -> io::Result<Location<'_>> {
        Ok(Box::new(std::iter::empty()))
    }
}

/// Directory tree store
#[derive(Debug, Clone)]
pub struct FileSystemStore {
    root: PathBuf,
}

impl FileSystemStore {
    /// Store rooted at a directory
    #[inline]
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of an instruction path
    ///
    /// # Errors
    /// Returns [`io::ErrorKind::InvalidInput`] for relative paths
    pub fn directory(&self, path: &ExperimentPath) -> io::Result<PathBuf> {
        if !path.is_absolute() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("storage paths must be absolute: {path}"),
            ));
        }
        Ok(path.ids().fold(self.root.clone(), |directory, id| directory.join(id)))
    }

    /// Persist a named resource for an instruction path
    ///
    /// # Errors
    /// Returns an I/O error if the directory or file cannot be written
    pub fn persist(&self, path: &ExperimentPath, name: &str, contents: &[u8]) -> io::Result<PersistedResource> {
        let directory = self.directory(path)?;
        std::fs::create_dir_all(&directory)?;
        let file = directory.join(name);
        std::fs::write(&file, contents)?;
        tracing::debug!(path = %path, file = %file.display(), "persisted resource");
        Ok(PersistedResource {
            path: path.clone(),
            name: name.to_string(),
            file: Some(file),
        })
    }
}

impl StorageLocator for FileSystemStore {
    fn location(&self, path: &ExperimentPath) -> io::Result<Location<'_>> {
        let directory = self.directory(path)?;
        let entries = match std::fs::read_dir(&directory) {
            Ok(entries) => entries,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Box::new(std::iter::empty())),
            Err(error) => return Err(error),
        };

        let path = path.clone();
        Ok(Box::new(entries.filter_map(move |entry| {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => return Some(Err(error)),
            };
            match entry.file_type() {
                Ok(kind) if kind.is_file() => Some(Ok(PersistedResource {
                    path: path.clone(),
                    name: entry.file_name().to_string_lossy().into_owned(),
                    file: Some(entry.path()),
                })),
                Ok(_) => None,
                Err(error) => Some(Err(error)),
            }
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> ExperimentPath {
        s.parse().unwrap()
    }

    #[test]
    fn missing_directory_has_no_resources() {
        let root = tempfile::tempdir().unwrap();
        let store = FileSystemStore::new(root.path());
        assert_eq!(store.location(&path("/a/b")).unwrap().count(), 0);
    }

    #[test]
    fn lists_regular_files_only() {
        let root = tempfile::tempdir().unwrap();
        let store = FileSystemStore::new(root.path());
        store.persist(&path("/a"), "spectrum.json", b"[]").unwrap();
        std::fs::create_dir_all(root.path().join("a").join("b")).unwrap();

        let names: Vec<String> = store
            .location(&path("/a"))
            .unwrap()
            .map(|resource| resource.unwrap().name)
            .collect();
        assert_eq!(names, vec!["spectrum.json"]);
    }

    #[test]
    fn relative_paths_rejected() {
        let store = FileSystemStore::new("/tmp");
        let error = store.location(&path("a")).err().unwrap();
        assert_eq!(error.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn no_storage_is_empty() {
        assert_eq!(NoStorage.location(&path("/x")).unwrap().count(), 0);
    }
}
