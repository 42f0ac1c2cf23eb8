//! Live, name-indexed store of program definitions
//!
//! A [`Repository`] scans one or more root directories for `.yaml`/`.yml`
//! definition files and keeps the index current while [`Repository::watch`]
//! runs. Every read and write goes through a single reader/writer lock.
//!
//! Programs are handed out as `Arc<Program>`: shared and read-only. Callers
//! that want to specialize a definition must clone it first.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{RepositoryError, WatchError};
use crate::program::Program;
use crate::shutdown::Shutdown;
use crate::watch::{DEFINITION_MASKS, FileWatcher, WatchConfig, WatchHandler, is_hidden};

/// One indexed program and the file it came from
#[derive(Debug, Clone)]
pub struct RepositoryProgram {
    pub path: PathBuf,
    pub program: Arc<Program>,
}

#[derive(Debug, Default)]
struct ProgramIndex {
    programs: HashMap<String, RepositoryProgram>,
    paths: HashMap<PathBuf, String>,
}

impl ProgramIndex {
    /// Insert or replace, keeping names and paths in one-to-one correspondence
    fn upsert(&mut self, path: PathBuf, program: Program) {
        let name = program.name.clone();

        if let Some(old_name) = self.paths.get(&path)
            && *old_name != name
        {
            info!(old = %old_name, new = %name, ?path, "Program renamed");
            self.programs.remove(old_name);
        }

        if let Some(existing) = self.programs.get(&name)
            && existing.path != path
        {
            info!(%name, previous = ?existing.path, current = ?path, "Program redefined by another file");
            self.paths.remove(&existing.path);
        }

        self.paths.insert(path.clone(), name.clone());
        self.programs.insert(
            name,
            RepositoryProgram {
                path,
                program: Arc::new(program),
            },
        );
    }

    fn remove_path(&mut self, path: &Path) -> Option<String> {
        let name = self.paths.remove(path)?;
        self.programs.remove(&name);
        Some(name)
    }
}

/// Program definitions sourced from a fixed set of directories
#[derive(Debug)]
pub struct Repository {
    directories: Vec<PathBuf>,
    index: RwLock<ProgramIndex>,
}

impl Repository {
    /// Create an empty repository; call [`load`](Self::load) to populate it
    pub fn new<I, P>(directories: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let directories: Vec<PathBuf> = directories
            .into_iter()
            .map(|dir| {
                let dir = dir.as_ref();
                std::path::absolute(dir).unwrap_or_else(|_| dir.to_path_buf())
            })
            .collect();
        debug!(?directories, "Repository::new: called");
        Self {
            directories,
            index: RwLock::new(ProgramIndex::default()),
        }
    }

    pub fn directories(&self) -> &[PathBuf] {
        &self.directories
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, ProgramIndex>, RepositoryError> {
        self.index.read().map_err(|_| RepositoryError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, ProgramIndex>, RepositoryError> {
        self.index.write().map_err(|_| RepositoryError::LockPoisoned)
    }

    /// Scan every root and replace the index
    ///
    /// Holds the write lock throughout. The new index is only installed when
    /// the whole scan succeeds; on error the previous contents are kept.
    pub fn load(&self) -> Result<(), RepositoryError> {
        debug!(directories = ?self.directories, "Repository::load: called");
        let mut guard = self.write()?;
        let mut fresh = ProgramIndex::default();

        for root in &self.directories {
            fs::read_dir(root).map_err(|source| RepositoryError::RootUnreadable {
                path: root.clone(),
                source,
            })?;

            for path in definition_files(root) {
                let path = path?;
                if fresh.paths.contains_key(&path) {
                    debug!(?path, "Repository::load: already indexed through an enclosing root");
                    continue;
                }

                debug!(?path, "Repository::load: parsing");
                let program = Program::from_file(&path).map_err(|source| RepositoryError::Program {
                    path: path.clone(),
                    source,
                })?;

                if let Some(existing) = fresh.programs.get(&program.name) {
                    return Err(RepositoryError::DuplicateName {
                        name: program.name,
                        existing: existing.path.clone(),
                        duplicate: path,
                    });
                }

                info!(name = %program.name, ?path, "Adding program");
                fresh.upsert(path, program);
            }
        }

        info!(count = fresh.programs.len(), "Loaded programs");
        *guard = fresh;
        Ok(())
    }

    /// Snapshot of the name → program mapping
    pub fn get_programs(&self) -> Result<HashMap<String, Arc<Program>>, RepositoryError> {
        Ok(self
            .read()?
            .programs
            .iter()
            .map(|(name, entry)| (name.clone(), entry.program.clone()))
            .collect())
    }

    /// Snapshot of every entry, sorted by program name
    pub fn entries(&self) -> Result<Vec<RepositoryProgram>, RepositoryError> {
        let mut entries: Vec<_> = self.read()?.programs.values().cloned().collect();
        entries.sort_by(|a, b| a.program.name.cmp(&b.program.name));
        Ok(entries)
    }

    pub fn get(&self, name: &str) -> Result<Option<Arc<Program>>, RepositoryError> {
        Ok(self.read()?.programs.get(name).map(|entry| entry.program.clone()))
    }

    /// Name of the program defined by `path`, if indexed
    pub fn name_for_path(&self, path: &Path) -> Result<Option<String>, RepositoryError> {
        Ok(self.read()?.paths.get(path).cloned())
    }

    pub fn len(&self) -> Result<usize, RepositoryError> {
        Ok(self.read()?.programs.len())
    }

    pub fn is_empty(&self) -> Result<bool, RepositoryError> {
        Ok(self.len()? == 0)
    }

    /// Index a parsed program under `path`, overwriting any same-named entry
    pub fn insert(&self, path: impl Into<PathBuf>, program: Program) -> Result<(), RepositoryError> {
        let path = path.into();
        debug!(name = %program.name, ?path, "Repository::insert: called");
        self.write()?.upsert(path, program);
        Ok(())
    }

    /// Reparse `path` and index the result; returns the program name
    pub fn reload_file(&self, path: &Path) -> Result<String, RepositoryError> {
        debug!(?path, "Repository::reload_file: called");
        let program = Program::from_file(path).map_err(|source| RepositoryError::Program {
            path: path.to_path_buf(),
            source,
        })?;
        let name = program.name.clone();
        self.insert(path, program)?;
        Ok(name)
    }

    /// Drop the program defined by `path`; unknown paths are ignored
    pub fn remove_path(&self, path: &Path) -> Result<Option<String>, RepositoryError> {
        debug!(?path, "Repository::remove_path: called");
        let removed = self.write()?.remove_path(path);
        match &removed {
            Some(name) => info!(%name, ?path, "Removing program"),
            None => warn!(?path, "Removed file was not indexed"),
        }
        Ok(removed)
    }

    /// Keep the index current until `shutdown` fires
    ///
    /// Returns [`RepositoryError::Cancelled`] on shutdown.
    pub async fn watch(&self, config: &WatchConfig, shutdown: &Shutdown) -> Result<(), RepositoryError> {
        debug!(directories = ?self.directories, "Repository::watch: called");
        let watcher = FileWatcher::new(self.directories.clone(), DEFINITION_MASKS, config)?;
        watcher.run(self, shutdown).await?;
        Ok(())
    }
}

#[async_trait]
impl WatchHandler for Repository {
    async fn on_write(&self, path: &Path) -> Result<(), WatchError> {
        let owned = path.to_path_buf();
        let parsed = tokio::task::spawn_blocking(move || Program::from_file(&owned)).await?;
        let program = match parsed {
            Ok(program) => program,
            Err(e) => {
                warn!(?path, error = %e, "Ignoring invalid program definition");
                return Ok(());
            }
        };

        let name = program.name.clone();
        self.insert(path, program).map_err(WatchError::handler)?;
        info!(%name, ?path, "Reloaded program");
        Ok(())
    }

    async fn on_remove(&self, path: &Path) -> Result<(), WatchError> {
        self.remove_path(path).map(|_| ()).map_err(WatchError::handler)
    }
}

/// Definition files under `root`, depth-first with directories sorted by name
///
/// Dot-prefixed files and directories are skipped.
pub fn definition_files(root: &Path) -> impl Iterator<Item = Result<PathBuf, walkdir::Error>> + use<> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_hidden(entry))
        .filter_map(|entry| match entry {
            Ok(entry) if entry.file_type().is_file() && is_definition_file(entry.path()) => {
                Some(Ok(entry.into_path()))
            }
            Ok(_) => None,
            Err(e) => Some(Err(e)),
        })
}

pub fn is_definition_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext == "yaml" || ext == "yml")
        .unwrap_or(false)
}
