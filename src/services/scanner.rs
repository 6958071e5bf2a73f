//! Library scan orchestrator
//!
//! One scan is a single walk over a library's root folders. Per file:
//! classify the name, resolve the container hierarchy, probe technical
//! attributes, persist. Unchanged files (same size and mtime) are skipped
//! without a probe. After a complete walk, vanished paths are pruned and
//! multi-part files are grouped into sister sets.
//!
//! Per-file failures are counted and skipped; only infrastructure errors
//! (database unavailable) abort the scan.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::db::{Database, LibraryRecord, LibraryType, UpsertMediaItem};
use crate::db::sister_groups::{NewSisterGroup, SisterMember};
use crate::services::classifier::{classify, Classification};
use crate::services::hierarchy::HierarchyResolver;
use crate::services::notifier::{Event, Notifier};
use crate::services::prober::Prober;

const VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "m4v", "avi", "mov", "wmv", "ts", "m2ts", "webm", "mpg", "mpeg",
];

const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "m4a", "m4b", "ogg", "opus", "wav", "aac", "wma",
];

pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Outcome of one library scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub files_found: usize,
    pub files_added: usize,
    pub files_updated: usize,
    pub files_removed: usize,
    pub errors: usize,
    pub cancelled: bool,
}

/// Time-based coalescing for progress callbacks: at most one emission per
/// interval, and always one for the final item.
pub struct ProgressThrottle {
    interval: Duration,
    last_emit: Option<Instant>,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
        }
    }

    pub fn should_emit(&mut self, now: Instant, is_final: bool) -> bool {
        if is_final {
            self.last_emit = Some(now);
            return true;
        }
        match self.last_emit {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last_emit = Some(now);
                true
            }
        }
    }
}

/// Whether a file name is a scan candidate for the library type.
/// Hidden files and partial-download markers never qualify.
pub fn is_candidate(file_name: &str, library_type: LibraryType) -> bool {
    if file_name.starts_with('.') {
        return false;
    }

    let lower = file_name.to_lowercase();
    if lower.ends_with(".tmp") || lower.ends_with(".part") {
        return false;
    }

    let Some(ext) = lower.rsplit('.').next().filter(|e| *e != lower) else {
        return false;
    };

    let allowed = match library_type {
        LibraryType::Movies | LibraryType::Shows => VIDEO_EXTENSIONS,
        LibraryType::Music | LibraryType::Audiobooks => AUDIO_EXTENSIONS,
    };
    allowed.contains(&ext)
}

/// Whether a file name carries any recognized media extension. Used by
/// the watcher, which does not know the library type when filtering.
pub fn has_media_extension(file_name: &str) -> bool {
    is_candidate(file_name, LibraryType::Movies) || is_candidate(file_name, LibraryType::Music)
}

/// Walk library roots and return candidate file paths. Hidden directory
/// subtrees are not entered; walk errors are logged and skipped.
pub fn collect_candidates(folders: &[String], library_type: LibraryType) -> Vec<std::path::PathBuf> {
    let mut paths = Vec::new();

    for root in folders {
        for entry in WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !is_hidden(e.file_name()))
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(root = %root, error = %err, "walk error");
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let name = entry.file_name().to_string_lossy();
            if is_candidate(&name, library_type) {
                paths.push(entry.into_path());
            }
        }
    }

    paths
}

/// A multi-part file observed during the walk, keyed for grouping
#[derive(Debug, Clone)]
pub struct PartCandidate {
    pub media_item_id: Uuid,
    pub directory: String,
    pub base_title: String,
    pub part_number: i32,
}

/// Group multi-part candidates by (directory, lowercased base title).
/// Singletons are dropped; members are ordered by part number.
pub fn build_sister_groups(candidates: Vec<PartCandidate>) -> Vec<NewSisterGroup> {
    let mut by_key: HashMap<(String, String), Vec<PartCandidate>> = HashMap::new();
    for candidate in candidates {
        let key = (candidate.directory.clone(), candidate.base_title.to_lowercase());
        by_key.entry(key).or_default().push(candidate);
    }

    let mut groups: Vec<NewSisterGroup> = by_key
        .into_values()
        .filter(|members| members.len() >= 2)
        .map(|mut members| {
            members.sort_by_key(|m| m.part_number);
            NewSisterGroup {
                base_title: members[0].base_title.clone(),
                directory: members[0].directory.clone(),
                members: members
                    .into_iter()
                    .map(|m| SisterMember {
                        media_item_id: m.media_item_id,
                        sort_position: m.part_number,
                    })
                    .collect(),
            }
        })
        .collect();

    groups.sort_by(|a, b| a.base_title.cmp(&b.base_title));
    groups
}

pub struct ScannerService {
    db: Database,
    prober: Prober,
    notifier: Notifier,
}

impl ScannerService {
    pub fn new(db: Database, prober: Prober, notifier: Notifier) -> Self {
        Self {
            db,
            prober,
            notifier,
        }
    }

    /// Scan one library. Cancellation is checked between files; a
    /// cancelled scan keeps everything already persisted but skips
    /// pruning and sister grouping, which need a complete walk.
    pub async fn scan_library(
        &self,
        library: &LibraryRecord,
        cancel: &CancellationToken,
    ) -> Result<ScanSummary> {
        let library_type = library.library_type();
        info!(library_id = %library.id, library_type = library_type.as_str(), "scan started");

        self.notifier.emit(Event::ScanStarted {
            library_id: library.id,
        });

        let resolver = HierarchyResolver::new(self.db.clone());
        let mut summary = ScanSummary::default();

        // Paths only; file decisions are made one at a time below
        let candidates = collect_candidates(&library.folders, library_type);
        let total = candidates.len();
        summary.files_found = total;

        let items = self.db.media_items();
        let mut seen = HashSet::with_capacity(total);
        let mut parts: Vec<PartCandidate> = Vec::new();
        let mut throttle = ProgressThrottle::new(PROGRESS_INTERVAL);

        for (index, path) in candidates.iter().enumerate() {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let path_str = path.display().to_string();
            seen.insert(path_str.clone());

            match self
                .process_file(library, library_type, &resolver, path, &path_str)
                .await
            {
                Ok(FileOutcome::Unchanged) => {}
                Ok(FileOutcome::Added { part }) => {
                    summary.files_added += 1;
                    parts.extend(part);
                }
                Ok(FileOutcome::Updated { part }) => {
                    summary.files_updated += 1;
                    parts.extend(part);
                }
                Ok(FileOutcome::Skipped) => {}
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "file skipped");
                    summary.errors += 1;
                }
            }

            let is_final = index + 1 == total;
            if throttle.should_emit(Instant::now(), is_final) {
                self.notifier.emit(Event::ScanProgress {
                    library_id: library.id,
                    processed: index + 1,
                    total,
                });
            }
        }

        if !summary.cancelled {
            let persisted = items.list_paths_by_library(library.id).await?;
            let removed: Vec<String> = persisted
                .into_iter()
                .filter(|p| !seen.contains(p))
                .collect();
            summary.files_removed = items.prune_paths(library.id, &removed).await? as usize;

            let groups = build_sister_groups(parts);
            let count = self
                .db
                .sister_groups()
                .replace_for_library(library.id, &groups)
                .await?;
            if count > 0 {
                info!(library_id = %library.id, groups = count, "sister groups rebuilt");
            }

            self.db.libraries().update_last_scanned(library.id).await?;
        }

        info!(
            library_id = %library.id,
            found = summary.files_found,
            added = summary.files_added,
            updated = summary.files_updated,
            removed = summary.files_removed,
            errors = summary.errors,
            cancelled = summary.cancelled,
            "scan finished"
        );

        self.notifier.emit(Event::ScanCompleted {
            library_id: library.id,
            added: summary.files_added,
            updated: summary.files_updated,
            removed: summary.files_removed,
        });

        Ok(summary)
    }

    async fn process_file(
        &self,
        library: &LibraryRecord,
        library_type: LibraryType,
        resolver: &HierarchyResolver,
        path: &Path,
        path_str: &str,
    ) -> Result<FileOutcome> {
        let metadata = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("stat failed for {path_str}"))?;
        let size = metadata.len();
        let modified: Option<DateTime<Utc>> = metadata.modified().ok().map(DateTime::from);

        let items = self.db.media_items();
        let existing = items.get_by_path(library.id, path_str).await?;

        if let Some(existing) = &existing {
            if existing.matches_disk(size, modified) {
                return Ok(FileOutcome::Unchanged);
            }
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let classification = classify(&file_name, library_type);

        // Extras end here: stored nowhere, matched against nothing
        if classification.extra.is_some() {
            return Ok(FileOutcome::Skipped);
        }

        let parent_id = self
            .resolve_parent(library, library_type, resolver, path, &classification)
            .await?;

        let probe = self.prober.probe(path).await?;

        let record = items
            .upsert(UpsertMediaItem {
                library_id: library.id,
                parent_id,
                title: classification.title.clone(),
                sort_title: classification.sort_title.clone(),
                original_title: None,
                year: classification.year,
                file_path: path_str.to_string(),
                size_bytes: size as i64,
                file_modified_at: modified,
                video_codec: probe.video_codec,
                audio_codec: probe.audio_codec,
                width: probe.width,
                height: probe.height,
                duration_secs: probe.duration_secs,
                bitrate: probe.bitrate,
                resolution_hint: classification.resolution_hint.clone(),
                source_hint: classification.source_hint.clone(),
                edition: classification.edition.clone(),
                season_number: classification.season,
                episode_number: classification.episode,
                disc_number: classification.disc,
                track_number: classification.track,
                part_number: classification.part.as_ref().map(|p| p.number),
            })
            .await?;

        let part = classification.part.as_ref().map(|p| PartCandidate {
            media_item_id: record.id,
            directory: path
                .parent()
                .map(|d| d.display().to_string())
                .unwrap_or_default(),
            base_title: p.base_title.clone(),
            part_number: p.number,
        });

        Ok(if existing.is_some() {
            FileOutcome::Updated { part }
        } else {
            FileOutcome::Added { part }
        })
    }

    async fn resolve_parent(
        &self,
        library: &LibraryRecord,
        library_type: LibraryType,
        resolver: &HierarchyResolver,
        path: &Path,
        classification: &Classification,
    ) -> Result<Option<Uuid>> {
        match library_type {
            LibraryType::Movies | LibraryType::Audiobooks => Ok(None),
            LibraryType::Shows => {
                let resolved = resolver
                    .resolve_episode(
                        library.id,
                        &classification.title,
                        classification.year,
                        classification.season,
                        library.group_by_season,
                    )
                    .await?;
                Ok(Some(resolved.parent_id))
            }
            LibraryType::Music => {
                // Strict-pattern artist/album win; the Artist/Album/track
                // directory layout is the fallback
                let artist = classification
                    .artist
                    .clone()
                    .or_else(|| dir_name(path, 2))
                    .unwrap_or_else(|| "Unknown Artist".to_string());
                let album = classification
                    .album
                    .clone()
                    .or_else(|| dir_name(path, 1))
                    .unwrap_or_else(|| "Unknown Album".to_string());

                let resolved = resolver
                    .resolve_track(library.id, &artist, &album, classification.year)
                    .await?;
                Ok(Some(resolved.parent_id))
            }
        }
    }
}

enum FileOutcome {
    Unchanged,
    Added { part: Option<PartCandidate> },
    Updated { part: Option<PartCandidate> },
    Skipped,
}

fn dir_name(path: &Path, levels_up: usize) -> Option<String> {
    let mut current = path.parent();
    for _ in 1..levels_up {
        current = current.and_then(|p| p.parent());
    }
    current
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string())
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}
