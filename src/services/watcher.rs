//! Filesystem watcher for watch-enabled libraries
//!
//! Keeps a live folder-to-library mapping (rebuilt by `refresh`) and a
//! recursive notify watcher per root. Raw events are debounced per path:
//! a path's timer resets on every new event, and only after a quiet
//! interval does the event go downstream. That collapses the
//! write-write-rename bursts file copies produce into one delivery.
//!
//! Downstream is a plain channel of (library, path) pairs; the caller
//! decides what a settled change means (normally: enqueue a scan).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::Database;
use crate::services::scanner::has_media_extension;

const CHECK_INTERVAL: Duration = Duration::from_millis(250);

/// A settled filesystem change within a watched library
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub library_id: Uuid,
    pub path: PathBuf,
}

/// Folder-to-library mapping shared between the resolver and `refresh`
#[derive(Default)]
pub struct WatchRoots {
    by_path: HashMap<PathBuf, Uuid>,
}

impl WatchRoots {
    pub fn insert(&mut self, path: PathBuf, library_id: Uuid) {
        self.by_path.insert(path, library_id);
    }

    pub fn clear(&mut self) {
        self.by_path.clear();
    }

    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.by_path.keys()
    }

    /// Resolve an event path to its library by walking ancestors up to a
    /// watched root. Events from nested subdirectories resolve the same
    /// as events at the root itself.
    pub fn resolve(&self, path: &Path) -> Option<Uuid> {
        let mut current = Some(path);
        while let Some(p) = current {
            if let Some(id) = self.by_path.get(p) {
                return Some(*id);
            }
            current = p.parent();
        }
        None
    }
}

/// Per-path quiescence tracker. A path is delivered once no new event has
/// arrived for it within the debounce window.
pub struct DebounceTracker {
    pending: HashMap<PathBuf, Instant>,
    window: Duration,
}

impl DebounceTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            window,
        }
    }

    /// Record an event, resetting the path's timer
    pub fn touch(&mut self, path: PathBuf, now: Instant) {
        self.pending.insert(path, now);
    }

    /// Drain paths whose window has elapsed
    pub fn take_settled(&mut self, now: Instant) -> Vec<PathBuf> {
        let settled: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, last)| now.duration_since(**last) >= self.window)
            .map(|(path, _)| path.clone())
            .collect();

        for path in &settled {
            self.pending.remove(path);
        }
        settled
    }
}

/// Event pre-filter: only visible media files go downstream
pub fn is_relevant_path(path: &Path) -> bool {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
        return false;
    };
    has_media_extension(&name)
}

pub struct LibraryWatcher {
    db: Database,
    debounce: Duration,
    roots: Arc<RwLock<WatchRoots>>,
    watcher: Option<RecommendedWatcher>,
}

impl LibraryWatcher {
    pub fn new(db: Database, debounce: Duration) -> Self {
        Self {
            db,
            debounce,
            roots: Arc::new(RwLock::new(WatchRoots::default())),
            watcher: None,
        }
    }

    /// Rebuild the folder mapping from watch-enabled libraries and point
    /// the notify watcher at the current root set. Safe to call again
    /// after library settings change.
    pub async fn refresh(&mut self) -> Result<()> {
        let libraries = self.db.libraries().list_watched().await?;

        let previous: Vec<PathBuf> = self.roots.read().paths().cloned().collect();

        let mut mapping = WatchRoots::default();
        for library in &libraries {
            for folder in library.folders.iter() {
                mapping.insert(PathBuf::from(folder), library.id);
            }
        }
        let current: Vec<PathBuf> = mapping.paths().cloned().collect();
        *self.roots.write() = mapping;

        if let Some(watcher) = self.watcher.as_mut() {
            for path in &previous {
                if !current.contains(path) {
                    let _ = watcher.unwatch(path);
                }
            }
            for path in &current {
                if !path.exists() {
                    warn!(path = %path.display(), "watch root does not exist");
                    continue;
                }
                // Recursive mode also covers directories created later,
                // so new nested folders need no explicit registration
                if let Err(err) = watcher.watch(path, RecursiveMode::Recursive) {
                    warn!(path = %path.display(), error = %err, "failed to watch root");
                } else {
                    debug!(path = %path.display(), "watching root");
                }
            }
        }

        info!(roots = current.len(), libraries = libraries.len(), "watch roots refreshed");
        Ok(())
    }

    /// Start the watcher and return the settled-event stream. Call
    /// `refresh` afterwards to register the initial roots.
    pub fn start(&mut self) -> Result<mpsc::Receiver<WatchEvent>> {
        let (raw_tx, mut raw_rx) = mpsc::channel::<PathBuf>(256);
        let (settled_tx, settled_rx) = mpsc::channel::<WatchEvent>(64);

        let watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| {
                let Ok(event) = result else { return };
                if !matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                ) {
                    return;
                }
                for path in event.paths {
                    if is_relevant_path(&path) {
                        let _ = raw_tx.blocking_send(path);
                    }
                }
            },
            notify::Config::default(),
        )
        .context("failed to create filesystem watcher")?;

        self.watcher = Some(watcher);

        let roots = self.roots.clone();
        let debounce = self.debounce;

        tokio::spawn(async move {
            let mut tracker = DebounceTracker::new(debounce);
            let mut tick = tokio::time::interval(CHECK_INTERVAL);

            loop {
                tokio::select! {
                    received = raw_rx.recv() => {
                        let Some(path) = received else { break };
                        debug!(path = %path.display(), "raw filesystem event");
                        tracker.touch(path, Instant::now());
                    }
                    _ = tick.tick() => {
                        for path in tracker.take_settled(Instant::now()) {
                            let resolved = roots.read().resolve(&path);
                            match resolved {
                                Some(library_id) => {
                                    debug!(
                                        library_id = %library_id,
                                        path = %path.display(),
                                        "settled change"
                                    );
                                    if settled_tx
                                        .send(WatchEvent { library_id, path })
                                        .await
                                        .is_err()
                                    {
                                        return;
                                    }
                                }
                                None => {
                                    debug!(path = %path.display(), "event outside watched roots");
                                }
                            }
                        }
                    }
                }
            }
        });

        Ok(settled_rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ancestor_resolution() {
        let library_id = Uuid::new_v4();
        let mut roots = WatchRoots::default();
        roots.insert(PathBuf::from("/media/movies"), library_id);

        assert_eq!(
            roots.resolve(Path::new("/media/movies/Sub/Deep/file.mkv")),
            Some(library_id)
        );
        assert_eq!(roots.resolve(Path::new("/media/movies")), Some(library_id));
        assert_eq!(roots.resolve(Path::new("/media/music/file.mp3")), None);
    }

    #[test]
    fn debounce_resets_on_new_events() {
        let mut tracker = DebounceTracker::new(Duration::from_secs(1));
        let start = Instant::now();
        let path = PathBuf::from("/m/file.mkv");

        tracker.touch(path.clone(), start);
        assert!(tracker.take_settled(start + Duration::from_millis(500)).is_empty());

        // New event mid-window resets the timer
        tracker.touch(path.clone(), start + Duration::from_millis(800));
        assert!(tracker.take_settled(start + Duration::from_millis(1200)).is_empty());

        let settled = tracker.take_settled(start + Duration::from_millis(1900));
        assert_eq!(settled, vec![path]);
    }

    #[test]
    fn settled_paths_are_delivered_once() {
        let mut tracker = DebounceTracker::new(Duration::from_secs(1));
        let start = Instant::now();
        tracker.touch(PathBuf::from("/m/a.mkv"), start);

        assert_eq!(tracker.take_settled(start + Duration::from_secs(2)).len(), 1);
        assert!(tracker.take_settled(start + Duration::from_secs(3)).is_empty());
    }

    #[test]
    fn relevance_filter() {
        assert!(is_relevant_path(Path::new("/m/movie.mkv")));
        assert!(is_relevant_path(Path::new("/m/track.flac")));
        assert!(!is_relevant_path(Path::new("/m/.hidden.mkv")));
        assert!(!is_relevant_path(Path::new("/m/movie.mkv.part")));
        assert!(!is_relevant_path(Path::new("/m/notes.txt")));
        assert!(!is_relevant_path(Path::new("/")));
    }
}
