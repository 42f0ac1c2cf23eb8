//! Polling file watcher
//!
//! Periodically snapshots every matching file under a set of roots and
//! reports differences between consecutive snapshots as [`FileEvent`]s.
//! Both the repository reload loop and the template re-render loop are
//! driven by this watcher through the [`WatchHandler`] trait.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

use crate::error::WatchError;
use crate::shutdown::Shutdown;

/// Masks matching program definition files
pub const DEFINITION_MASKS: &[&str] = &["**/*.yaml", "**/*.yml"];

/// Configuration for the polling watcher
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WatchConfig {
    /// Polling interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl WatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// A change observed between two scans
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    /// The file was created or its contents changed
    Written(PathBuf),
    /// The file no longer exists
    Removed(PathBuf),
}

impl FileEvent {
    pub fn path(&self) -> &Path {
        match self {
            FileEvent::Written(path) | FileEvent::Removed(path) => path,
        }
    }
}

/// Receiver of watch events
///
/// Returning an error stops the watch loop; recoverable per-file problems
/// should be logged by the handler and reported as `Ok`.
#[async_trait]
pub trait WatchHandler: Send + Sync {
    async fn on_write(&self, path: &Path) -> Result<(), WatchError>;
    async fn on_remove(&self, path: &Path) -> Result<(), WatchError>;
}

/// Compile glob masks, failing on the first invalid one
pub fn compile_masks<S: AsRef<str>>(masks: &[S]) -> Result<Vec<Pattern>, WatchError> {
    masks
        .iter()
        .map(|mask| {
            let mask = mask.as_ref();
            Pattern::new(mask).map_err(|source| WatchError::InvalidMask {
                mask: mask.to_string(),
                source,
            })
        })
        .collect()
}

/// `*` and `?` stay within one path component; only `**` crosses directories
const MASK_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Test a root-relative path against a mask set (an empty set matches all)
pub fn matches_masks(masks: &[Pattern], relative: &Path) -> bool {
    masks.is_empty()
        || relative.as_os_str().is_empty()
        || masks.iter().any(|mask| mask.matches_path_with(relative, MASK_OPTIONS))
}

/// True for dot-prefixed names below the walk root
pub fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

/// Modification stamp of one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stamp {
    modified: Option<SystemTime>,
    len: u64,
}

type Snapshot = HashMap<PathBuf, Stamp>;

/// Polling watcher over a set of roots
#[derive(Debug)]
pub struct FileWatcher {
    roots: Vec<PathBuf>,
    masks: Vec<Pattern>,
    interval: Duration,
    snapshot: Snapshot,
}

impl FileWatcher {
    /// Create a watcher; nothing is scanned until [`prime`](Self::prime),
    /// [`poll`](Self::poll) or [`run`](Self::run)
    pub fn new<S: AsRef<str>>(roots: Vec<PathBuf>, masks: &[S], config: &WatchConfig) -> Result<Self, WatchError> {
        debug!(?roots, mask_count = masks.len(), "FileWatcher::new: called");
        Ok(Self {
            roots,
            masks: compile_masks(masks)?,
            interval: config.poll_interval(),
            snapshot: Snapshot::new(),
        })
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Record the current state without emitting events
    pub async fn prime(&mut self) -> Result<(), WatchError> {
        debug!("FileWatcher::prime: called");
        self.snapshot = self.scan().await?;
        debug!(file_count = self.snapshot.len(), "FileWatcher::prime: complete");
        Ok(())
    }

    /// Scan once and return the events since the previous scan
    pub async fn poll(&mut self) -> Result<Vec<FileEvent>, WatchError> {
        let current = self.scan().await?;
        let events = diff(&self.snapshot, &current);
        self.snapshot = current;
        if !events.is_empty() {
            debug!(event_count = events.len(), "FileWatcher::poll: changes detected");
        }
        Ok(events)
    }

    async fn scan(&self) -> Result<Snapshot, WatchError> {
        let roots = self.roots.clone();
        let masks = self.masks.clone();
        Ok(tokio::task::spawn_blocking(move || snapshot(&roots, &masks)).await?)
    }

    /// Poll until `shutdown` fires, dispatching events to `handler`
    ///
    /// Always ends with an error: [`WatchError::Cancelled`] on shutdown, or
    /// whatever the handler or scan failed with.
    pub async fn run<H>(mut self, handler: &H, shutdown: &Shutdown) -> Result<(), WatchError>
    where
        H: WatchHandler + ?Sized,
    {
        info!(roots = ?self.roots, interval_ms = self.interval.as_millis() as u64, "Watcher started");
        self.prime().await?;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("FileWatcher::run: shutdown received");
                    return Err(WatchError::Cancelled);
                }
                _ = tokio::time::sleep(self.interval) => {}
            }

            for event in self.poll().await? {
                debug!(?event, "FileWatcher::run: dispatching");
                match &event {
                    FileEvent::Written(path) => handler.on_write(path).await?,
                    FileEvent::Removed(path) => handler.on_remove(path).await?,
                }
            }
        }
    }
}

/// Walk every root and stamp matching files; unreadable entries are skipped
fn snapshot(roots: &[PathBuf], masks: &[Pattern]) -> Snapshot {
    let mut files = Snapshot::new();
    for root in roots {
        let walker = WalkDir::new(root).into_iter().filter_entry(|entry| !is_hidden(entry));
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(?root, error = %e, "snapshot: skipping unreadable entry");
                    continue;
                }
            };
            if entry.path_is_symlink() || !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
            if !matches_masks(masks, relative) {
                continue;
            }
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            files.insert(
                entry.path().to_path_buf(),
                Stamp {
                    modified: metadata.modified().ok(),
                    len: metadata.len(),
                },
            );
        }
    }
    files
}

/// Events turning `old` into `new`, sorted by path
fn diff(old: &Snapshot, new: &Snapshot) -> Vec<FileEvent> {
    let mut events = BTreeMap::new();
    for (path, stamp) in new {
        if old.get(path) != Some(stamp) {
            events.insert(path.clone(), FileEvent::Written(path.clone()));
        }
    }
    for path in old.keys() {
        if !new.contains_key(path) {
            events.insert(path.clone(), FileEvent::Removed(path.clone()));
        }
    }
    events.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn stamp(len: u64) -> Stamp {
        Stamp {
            modified: Some(SystemTime::UNIX_EPOCH + Duration::from_secs(len)),
            len,
        }
    }

    #[test]
    fn test_default_config() {
        let config = WatchConfig::default();
        assert_eq!(config.poll_interval_ms, 500);
        assert_eq!(config.poll_interval(), Duration::from_millis(500));

        let parsed: WatchConfig = serde_yaml::from_str("poll-interval-ms: 50").unwrap();
        assert_eq!(parsed.poll_interval_ms, 50);
    }

    #[test]
    fn test_diff_detects_all_changes() {
        let old = Snapshot::from([
            (PathBuf::from("/r/same"), stamp(1)),
            (PathBuf::from("/r/changed"), stamp(1)),
            (PathBuf::from("/r/gone"), stamp(1)),
        ]);
        let new = Snapshot::from([
            (PathBuf::from("/r/same"), stamp(1)),
            (PathBuf::from("/r/changed"), stamp(2)),
            (PathBuf::from("/r/added"), stamp(1)),
        ]);

        assert_eq!(
            diff(&old, &new),
            vec![
                FileEvent::Written(PathBuf::from("/r/added")),
                FileEvent::Written(PathBuf::from("/r/changed")),
                FileEvent::Removed(PathBuf::from("/r/gone")),
            ]
        );
    }

    #[test]
    fn test_matches_masks() {
        let masks = compile_masks(DEFINITION_MASKS).unwrap();
        assert!(matches_masks(&masks, Path::new("a.yaml")));
        assert!(matches_masks(&masks, Path::new("nested/deep/b.yml")));
        assert!(!matches_masks(&masks, Path::new("notes.txt")));
        assert!(matches_masks(&[], Path::new("anything.bin")));
        assert!(matches_masks(&masks, Path::new("")));
    }

    #[test]
    fn test_single_star_mask_stays_in_one_directory() {
        let masks = compile_masks(&["*.md"]).unwrap();
        assert!(matches_masks(&masks, Path::new("x.md")));
        assert!(!matches_masks(&masks, Path::new("nested/x.md")));

        let recursive = compile_masks(&["**/*.md"]).unwrap();
        assert!(matches_masks(&recursive, Path::new("x.md")));
        assert!(matches_masks(&recursive, Path::new("nested/deep/x.md")));

        let scoped = compile_masks(&["docs/*.md"]).unwrap();
        assert!(matches_masks(&scoped, Path::new("docs/x.md")));
        assert!(!matches_masks(&scoped, Path::new("docs/sub/x.md")));
    }

    #[test]
    fn test_compile_masks_rejects_invalid() {
        let result = compile_masks(&["[unclosed"]);
        assert!(matches!(result, Err(WatchError::InvalidMask { .. })));
    }

    #[test]
    fn test_snapshot_skips_hidden_and_unmatched() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();
        fs::write(root.join("a.yaml"), "name: a").unwrap();
        fs::write(root.join("readme.md"), "docs").unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join(".git/config.yaml"), "x").unwrap();
        fs::write(root.join(".hidden.yaml"), "x").unwrap();
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("sub/b.yml"), "name: b").unwrap();

        let masks = compile_masks(DEFINITION_MASKS).unwrap();
        let files = snapshot(std::slice::from_ref(&root), &masks);
        let mut paths: Vec<_> = files.keys().cloned().collect();
        paths.sort();
        assert_eq!(paths, vec![root.join("a.yaml"), root.join("sub/b.yml")]);
    }

    #[test]
    fn test_snapshot_missing_root_is_empty() {
        let files = snapshot(&[PathBuf::from("/nonexistent/watch/root")], &[]);
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn test_poll_reports_changes() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();
        fs::write(root.join("keep.yaml"), "one").unwrap();
        fs::write(root.join("drop.yaml"), "one").unwrap();

        let mut watcher = FileWatcher::new(vec![root.clone()], DEFINITION_MASKS, &WatchConfig::default()).unwrap();
        watcher.prime().await.unwrap();
        assert!(watcher.poll().await.unwrap().is_empty());

        fs::write(root.join("keep.yaml"), "one plus more").unwrap();
        fs::remove_file(root.join("drop.yaml")).unwrap();
        fs::write(root.join("new.yml"), "fresh").unwrap();
        fs::write(root.join("ignored.txt"), "fresh").unwrap();

        let events = watcher.poll().await.unwrap();
        assert_eq!(
            events,
            vec![
                FileEvent::Removed(root.join("drop.yaml")),
                FileEvent::Written(root.join("keep.yaml")),
                FileEvent::Written(root.join("new.yml")),
            ]
        );
        assert!(watcher.poll().await.unwrap().is_empty());
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<FileEvent>>,
    }

    #[async_trait]
    impl WatchHandler for Recorder {
        async fn on_write(&self, path: &Path) -> Result<(), WatchError> {
            self.events.lock().unwrap().push(FileEvent::Written(path.to_path_buf()));
            Ok(())
        }

        async fn on_remove(&self, path: &Path) -> Result<(), WatchError> {
            self.events.lock().unwrap().push(FileEvent::Removed(path.to_path_buf()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_run_dispatches_until_cancelled() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();
        let config = WatchConfig { poll_interval_ms: 20 };
        let watcher = FileWatcher::new(vec![root.clone()], DEFINITION_MASKS, &config).unwrap();

        let recorder = std::sync::Arc::new(Recorder::default());
        let (trigger, shutdown) = crate::shutdown::channel();
        let task = tokio::spawn({
            let recorder = recorder.clone();
            async move { watcher.run(recorder.as_ref(), &shutdown).await }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        fs::write(root.join("late.yaml"), "name: late").unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while recorder.events.lock().unwrap().is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        trigger.trigger();
        let result = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert!(matches!(result, Err(WatchError::Cancelled)));
        assert_eq!(
            recorder.events.lock().unwrap().first(),
            Some(&FileEvent::Written(root.join("late.yaml")))
        );
    }

    struct Failing;

    #[async_trait]
    impl WatchHandler for Failing {
        async fn on_write(&self, _path: &Path) -> Result<(), WatchError> {
            Err(WatchError::handler(std::io::Error::other("handler broke")))
        }

        async fn on_remove(&self, _path: &Path) -> Result<(), WatchError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_run_stops_on_handler_error() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();
        let config = WatchConfig { poll_interval_ms: 20 };
        let watcher = FileWatcher::new(vec![root.clone()], &["*.yaml"], &config).unwrap();

        let task = tokio::spawn(async move { watcher.run(&Failing, &Shutdown::never()).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        fs::write(root.join("x.yaml"), "name: x").unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert!(matches!(result, Err(WatchError::Handler(_))));
    }
}
