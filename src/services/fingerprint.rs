//! Perceptual fingerprinting and duplicate detection
//!
//! Fingerprints are computed by an external tool (fpcalc) and stored as
//! opaque encoded strings. Comparison is a normalized Hamming-style score
//! over the encoded bytes; two cheap pre-filters (duration ratio, encoded
//! length) keep the O(n²) pairwise pass tractable for realistic library
//! sizes.

use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::{Database, DuplicateStatus, MediaItemRecord};

#[derive(Deserialize)]
struct FpcalcOutput {
    duration: f64,
    fingerprint: String,
}

/// Computed fingerprint plus the duration the tool saw
#[derive(Debug, Clone)]
pub struct Fingerprint {
    pub encoded: String,
    pub duration_secs: f64,
}

/// Bitwise similarity of two equal-length encoded fingerprints in [0,1].
/// Returns `None` for mismatched lengths; those come from incompatible
/// hash schemes and are not comparable.
pub fn similarity(a: &str, b: &str) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let total_bits = (a.len() * 8) as f64;
    let differing: u32 = a
        .bytes()
        .zip(b.bytes())
        .map(|(x, y)| (x ^ y).count_ones())
        .sum();

    Some(1.0 - differing as f64 / total_bits)
}

/// Duration pre-filter: comparable when either duration is unknown, or
/// the ratio of the two falls within the tolerance band.
pub fn durations_comparable(a: Option<f64>, b: Option<f64>, tolerance: f64) -> bool {
    match (a, b) {
        (Some(a), Some(b)) if a > 0.0 && b > 0.0 => {
            let ratio = a / b;
            ratio >= 1.0 - tolerance && ratio <= 1.0 + tolerance
        }
        _ => true,
    }
}

/// Full pair decision: pre-filters first, similarity only when they pass
pub fn is_duplicate_pair(
    a: &MediaItemRecord,
    b: &MediaItemRecord,
    threshold: f64,
    duration_tolerance: f64,
) -> bool {
    if !durations_comparable(a.duration_secs, b.duration_secs, duration_tolerance) {
        return false;
    }

    match (&a.fingerprint, &b.fingerprint) {
        (Some(fa), Some(fb)) => similarity(fa, fb).is_some_and(|s| s >= threshold),
        _ => false,
    }
}

#[derive(Clone)]
pub struct Fingerprinter {
    fpcalc_path: String,
}

impl Fingerprinter {
    pub fn new(fpcalc_path: impl Into<String>) -> Self {
        Self {
            fpcalc_path: fpcalc_path.into(),
        }
    }

    pub async fn is_available(&self) -> bool {
        Command::new(&self.fpcalc_path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Compute a content fingerprint for one file. Identical content gives
    /// identical fingerprints regardless of container or bitrate.
    pub async fn compute(&self, path: &Path) -> Result<Fingerprint> {
        debug!(path = %path.display(), "computing fingerprint");

        let output = Command::new(&self.fpcalc_path)
            .arg("-json")
            .args(["-length", "120"])
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.fpcalc_path))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("{} failed for '{}': {}", self.fpcalc_path, path.display(), stderr.trim());
        }

        let parsed: FpcalcOutput = serde_json::from_slice(&output.stdout)
            .context("unparseable fpcalc output")?;

        Ok(Fingerprint {
            encoded: parsed.fingerprint,
            duration_secs: parsed.duration,
        })
    }
}

/// Pairwise duplicate scan over a library's fingerprinted items
pub struct DuplicateDetector {
    db: Database,
    threshold: f64,
    duration_tolerance: f64,
}

impl DuplicateDetector {
    pub fn new(db: Database, threshold: f64, duration_tolerance: f64) -> Self {
        Self {
            db,
            threshold,
            duration_tolerance,
        }
    }

    /// Compare every fingerprinted pair in the library and flag matches.
    /// Items a human already marked `addressed` are left untouched; their
    /// counterparts are not re-flagged either. Returns flagged pair count.
    pub async fn scan_library(&self, library_id: Uuid) -> Result<usize> {
        let items = self.db.media_items().list_fingerprinted(library_id).await?;
        let repo = self.db.media_items();

        let mut flagged = 0usize;

        for (i, a) in items.iter().enumerate() {
            for b in items.iter().skip(i + 1) {
                if !is_duplicate_pair(a, b, self.threshold, self.duration_tolerance) {
                    continue;
                }

                if a.duplicate_status() == DuplicateStatus::Addressed
                    || b.duplicate_status() == DuplicateStatus::Addressed
                {
                    continue;
                }

                if a.duplicate_status() != DuplicateStatus::Potential {
                    repo.set_duplicate_status(a.id, DuplicateStatus::Potential).await?;
                }
                if b.duplicate_status() != DuplicateStatus::Potential {
                    repo.set_duplicate_status(b.id, DuplicateStatus::Potential).await?;
                }

                debug!(
                    library_id = %library_id,
                    a = %a.file_path,
                    b = %b.file_path,
                    "flagged potential duplicate pair"
                );
                flagged += 1;
            }
        }

        info!(
            library_id = %library_id,
            items = items.len(),
            flagged,
            "duplicate scan complete"
        );

        Ok(flagged)
    }
}
