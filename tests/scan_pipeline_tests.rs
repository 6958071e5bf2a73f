//! Integration tests for the scan pipeline's pure logic
//!
//! Covers the pieces that do not need a database or external tools:
//! classification, candidate filtering, sister grouping, duplicate
//! pair decisions, progress throttling, and worker-pool cancellation.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use curator::db::LibraryType;
use curator::jobs::worker_pool::run_pool;
use curator::services::classifier::{classify, ExtraKind};
use curator::services::fingerprint::{durations_comparable, similarity};
use curator::services::scanner::{
    build_sister_groups, collect_candidates, is_candidate, PartCandidate, ProgressThrottle,
};
use curator::services::watcher::{is_relevant_path, DebounceTracker, WatchRoots};

// ============================================================================
// Classifier
// ============================================================================

#[test]
fn classifier_handles_a_realistic_movie_folder() {
    let cases = [
        ("Heat (1995) [1080p].mkv", "Heat", Some(1995)),
        ("Movie.Title.2019.1080p.BluRay.x264-GROUP.mkv", "Movie Title", Some(2019)),
        ("Arrival.2016.2160p.WEB-DL.DDP5.1.HDR.HEVC.mkv", "Arrival", Some(2016)),
        ("Old Film.avi", "Old Film", None),
    ];

    for (name, title, year) in cases {
        let c = classify(name, LibraryType::Movies);
        assert_eq!(c.title, title, "title for {name}");
        assert_eq!(c.year, year, "year for {name}");
    }
}

#[test]
fn classifier_short_title_protection() {
    // Titles that collide with the garbage vocabulary must survive
    let c = classify("XXX 2.mkv", LibraryType::Movies);
    assert_eq!(c.title, "XXX 2");

    let c = classify("Ts.mkv", LibraryType::Movies);
    assert_eq!(c.title, "Ts");
}

#[test]
fn classifier_episode_patterns_agree() {
    for name in [
        "Show - S02E05.mkv",
        "Show.S02E05.720p.HDTV.x264.mkv",
        "Show - 2x05.mkv",
        "Show Season 2 Episode 5.mkv",
    ] {
        let c = classify(name, LibraryType::Shows);
        assert_eq!(c.season, Some(2), "season for {name}");
        assert_eq!(c.episode, Some(5), "episode for {name}");
        assert_eq!(c.title, "Show", "show name for {name}");
    }
}

#[test]
fn classifier_extras_stop_matching() {
    let c = classify("Big Film-trailer.mp4", LibraryType::Movies);
    assert_eq!(c.extra, Some(ExtraKind::Trailer));

    // Multi-part and hierarchy info are never derived for extras
    assert!(c.part.is_none());
    assert!(c.season.is_none());
}

#[test]
fn classifier_is_total_over_hostile_input() {
    let hostile = [
        "",
        ".",
        "..",
        "....mkv",
        "???.mkv",
        "xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx.mkv",
        "1080p.2160p.720p.mkv",
        "日本語 (2020).mkv",
    ];
    for name in hostile {
        for media_type in [
            LibraryType::Movies,
            LibraryType::Shows,
            LibraryType::Music,
            LibraryType::Audiobooks,
        ] {
            let _ = classify(name, media_type);
        }
    }
}

// ============================================================================
// Sister grouping
// ============================================================================

fn part(dir: &str, base: &str, number: i32) -> PartCandidate {
    PartCandidate {
        media_item_id: Uuid::new_v4(),
        directory: dir.to_string(),
        base_title: base.to_string(),
        part_number: number,
    }
}

#[test]
fn disc_pair_forms_one_ordered_group() {
    let c1 = classify("Film DISC-1.mkv", LibraryType::Movies);
    let c2 = classify("Film DISC-2.mkv", LibraryType::Movies);
    let p1 = c1.part.expect("disc 1 part");
    let p2 = c2.part.expect("disc 2 part");

    let groups = build_sister_groups(vec![
        part("/m/Film", &p2.base_title, p2.number),
        part("/m/Film", &p1.base_title, p1.number),
    ]);

    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].members.len(), 2);
    assert_eq!(groups[0].members[0].sort_position, 1);
    assert_eq!(groups[0].members[1].sort_position, 2);
}

#[test]
fn lone_part_forms_no_group() {
    let groups = build_sister_groups(vec![part("/m/Film", "Film", 1)]);
    assert!(groups.is_empty());
}

// ============================================================================
// Duplicate detection invariants
// ============================================================================

#[test]
fn similarity_symmetry_over_samples() {
    let samples = ["AQIDBA", "AQIDBB", "zzzzzz", "AAAAAA"];
    for a in samples {
        for b in samples {
            assert_eq!(similarity(a, b), similarity(b, a), "{a} vs {b}");
        }
    }
}

#[test]
fn duration_ratio_outside_band_is_never_compared() {
    // Ratio 1.10 fails in both argument orders
    assert!(!durations_comparable(Some(110.0), Some(100.0), 0.05));
    assert!(!durations_comparable(Some(100.0), Some(110.0), 0.05));
    // Boundary of the band passes
    assert!(durations_comparable(Some(105.0), Some(100.0), 0.05));
}

// ============================================================================
// Candidate and watch filtering
// ============================================================================

#[test]
fn scan_and_watch_filters_agree_on_noise() {
    for name in [".hidden.mkv", "film.mkv.tmp", "film.mkv.part"] {
        assert!(!is_candidate(name, LibraryType::Movies), "{name}");
        assert!(
            !is_relevant_path(&PathBuf::from("/m").join(name)),
            "{name}"
        );
    }
}

#[test]
fn walk_skips_hidden_subtrees_and_foreign_extensions() {
    let root = tempfile::tempdir().expect("tempdir");
    let base = root.path();

    std::fs::create_dir_all(base.join("Film (2001)")).unwrap();
    std::fs::create_dir_all(base.join(".stversions")).unwrap();
    std::fs::write(base.join("Film (2001)/Film DISC-1.mkv"), b"x").unwrap();
    std::fs::write(base.join("Film (2001)/Film DISC-2.mkv"), b"x").unwrap();
    std::fs::write(base.join("Film (2001)/cover.jpg"), b"x").unwrap();
    std::fs::write(base.join(".stversions/Old.mkv"), b"x").unwrap();
    std::fs::write(base.join("download.mkv.part"), b"x").unwrap();

    let mut found = collect_candidates(
        &[base.display().to_string()],
        LibraryType::Movies,
    );
    found.sort();

    let names: Vec<String> = found
        .iter()
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
        .collect();
    assert_eq!(names, vec!["Film DISC-1.mkv", "Film DISC-2.mkv"]);
}

#[test]
fn watch_event_resolution_walks_ancestors() {
    let movies = Uuid::new_v4();
    let music = Uuid::new_v4();

    let mut roots = WatchRoots::default();
    roots.insert(PathBuf::from("/srv/media/movies"), movies);
    roots.insert(PathBuf::from("/srv/media/music"), music);

    assert_eq!(
        roots.resolve(Path::new("/srv/media/movies/Film (2001)/Film DISC-1.mkv")),
        Some(movies)
    );
    assert_eq!(
        roots.resolve(Path::new("/srv/media/music/Artist/Album/01 - Song.flac")),
        Some(music)
    );
    assert_eq!(roots.resolve(Path::new("/srv/other/file.mkv")), None);
}

#[test]
fn debounce_collapses_copy_bursts() {
    let mut tracker = DebounceTracker::new(Duration::from_secs(1));
    let start = Instant::now();
    let path = PathBuf::from("/m/incoming.mkv");

    // Write, write, rename within the window: one delivery
    tracker.touch(path.clone(), start);
    tracker.touch(path.clone(), start + Duration::from_millis(300));
    tracker.touch(path.clone(), start + Duration::from_millis(600));

    assert!(tracker.take_settled(start + Duration::from_millis(1500)).is_empty());
    assert_eq!(
        tracker.take_settled(start + Duration::from_millis(1700)),
        vec![path]
    );
}

// ============================================================================
// Progress and cancellation
// ============================================================================

#[test]
fn throttle_rate_is_bounded() {
    let mut throttle = ProgressThrottle::new(Duration::from_millis(500));
    let start = Instant::now();

    let mut emitted = 0;
    for i in 0..100 {
        let now = start + Duration::from_millis(i * 10);
        if throttle.should_emit(now, false) {
            emitted += 1;
        }
    }

    // 1 second of 10ms ticks fits at most three 500ms windows
    assert!(emitted <= 3, "emitted {emitted} times");
}

#[tokio::test]
async fn cancelled_pool_retains_partial_progress() {
    let cancel = CancellationToken::new();
    let persisted = Arc::new(AtomicUsize::new(0));

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            cancel.cancel();
        });
    }

    let persisted_ref = Arc::clone(&persisted);
    let outcome = run_pool(
        (0..1000).collect::<Vec<_>>(),
        2,
        cancel,
        |_, _| {},
        move |_item| {
            let persisted = Arc::clone(&persisted_ref);
            async move {
                tokio::time::sleep(Duration::from_millis(2)).await;
                persisted.fetch_add(1, Ordering::Relaxed);
            }
        },
    )
    .await;

    assert!(outcome.cancelled);
    // Exactly the processed count was persisted, nothing torn
    assert_eq!(outcome.processed, persisted.load(Ordering::Relaxed));
    assert!(outcome.processed < outcome.total);
}
