//! Filename classifier
//!
//! Turns a raw filename into a structured descriptor: title, year,
//! season/episode, artist/album, multi-part info, edition, quality hints.
//! Pure and total — it never fails, degrading to a best-effort title when
//! no structured pattern matches.
//!
//! Examples it handles:
//! - "Heat (1995) {Edition-Director's Cut} [1080p].mkv"
//! - "Movie.Title.2019.1080p.BluRay.x264-GROUP.mkv"
//! - "Show - S02E05 - Episode Name.mkv"
//! - "Artist - Album - D01T05 - Song.flac"
//! - "Film DISC-1.mkv" / "Film DISC-2.mkv"

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::db::LibraryType;

/// Kind of "extra" content, detected from a filename suffix.
/// Extras stop the scan pipeline for their file: they are never
/// persisted, matched into a hierarchy, or enriched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtraKind {
    Trailer,
    Sample,
    Featurette,
    BehindTheScenes,
    DeletedScene,
    Interview,
    Short,
    Other,
}

/// Inline provider identifiers embedded in brackets, e.g. "[tmdb-603]"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderIds {
    pub tmdb: Option<i64>,
    pub tvdb: Option<i64>,
    pub imdb: Option<String>,
}

impl ProviderIds {
    pub fn is_empty(&self) -> bool {
        self.tmdb.is_none() && self.tvdb.is_none() && self.imdb.is_none()
    }
}

/// Trailing multi-part indicator stripped from a movie-like filename
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartInfo {
    /// 1-based part number (disc/cd/part)
    pub number: i32,
    /// Title with the part indicator removed; the sister-grouping key
    pub base_title: String,
}

/// Structured result of classifying one filename
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Classification {
    pub title: String,
    pub sort_title: Option<String>,
    pub year: Option<i32>,
    pub season: Option<i32>,
    pub episode: Option<i32>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub disc: Option<i32>,
    pub track: Option<i32>,
    pub edition: Option<String>,
    pub resolution_hint: Option<String>,
    pub source_hint: Option<String>,
    pub extra: Option<ExtraKind>,
    pub provider_ids: ProviderIds,
    pub part: Option<PartInfo>,
}

static PROVIDER_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[\[{](tmdb|tvdb|imdb)[-=:]?\s*(tt\d+|\d+)[\]}]").unwrap()
});

static MULTIPART_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[ ._-]*(?:cd|disc|disk|dvd|part|pt)[ ._-]?(\d{1,2})\s*$").unwrap()
});

static MOVIE_STRICT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<title>.+?)\s*\((?P<year>\d{4})\)\s*(?P<rest>.*)$").unwrap()
});

static EDITION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\{(?:edition-)?(?P<edition>[^}]+)\}").unwrap());

static SXXEXX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?P<show>.+?)[ ._-]*[Ss](?P<s>\d{1,2})[Ee](?P<e>\d{1,3})").unwrap());

static NXNN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?P<show>.+?)[ ._-]+(?P<s>\d{1,2})x(?P<e>\d{2,3})").unwrap());

static VERBOSE_EPISODE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?P<show>.+?)[ ._-]*Season[ ._]*(?P<s>\d{1,2}).*?Episode[ ._]*(?P<e>\d{1,3})")
        .unwrap()
});

static TRACK_STRICT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?P<artist>.+?)\s+-\s+(?P<album>.+?)\s+-\s+[Dd](?P<d>\d{1,2})[Tt](?P<t>\d{1,3})(?:\s*-?\s*(?P<title>.+))?$",
    )
    .unwrap()
});

static TRACK_NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<t>\d{1,3})\s*[-. ]\s*(?P<title>.+)$").unwrap());

// Anchored on delimiters so embedded digit runs ("19844") never match
static YEAR_TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(19|20)\d{2}$").unwrap());

static RESOLUTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(2160p|1080p|720p|480p|4K|UHD)\b").unwrap());

static SPACES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Release-noise vocabulary for the fallback token cleaner. Tokens are
/// compared lowercased; a token also counts as garbage when the segment
/// before its first dash does ("x264-GROUP").
const GARBAGE_TOKENS: &[&str] = &[
    "2160p", "1080p", "720p", "480p", "576p", "4k", "uhd", "hdr", "hdr10", "hdr10+", "dv",
    "dovi", "hlg", "sdr", "bluray", "blu-ray", "bdrip", "brrip", "bdremux", "remux", "webrip",
    "web-dl", "webdl", "web", "hdtv", "dvdrip", "dvd", "cam", "ts", "r5", "x264", "x265",
    "h264", "h265", "h.264", "h.265", "hevc", "avc", "av1", "xvid", "divx", "10bit", "8bit",
    "aac", "aac2", "ac3", "eac3", "dts", "dts-hd", "dd5", "ddp", "ddp5", "truehd", "atmos",
    "flac", "mp3", "opus", "proper", "repack", "internal", "limited", "extended", "unrated",
    "uncut", "remastered", "multi", "dual", "dubbed", "subbed", "amzn", "nf", "dsnp", "hulu",
    "hmax", "atvp",
];

const EXTRA_SUFFIXES: &[(&str, ExtraKind)] = &[
    ("trailer", ExtraKind::Trailer),
    ("sample", ExtraKind::Sample),
    ("featurette", ExtraKind::Featurette),
    ("behindthescenes", ExtraKind::BehindTheScenes),
    ("deleted", ExtraKind::DeletedScene),
    ("deletedscene", ExtraKind::DeletedScene),
    ("interview", ExtraKind::Interview),
    ("short", ExtraKind::Short),
    ("extra", ExtraKind::Other),
    ("other", ExtraKind::Other),
];

/// Classify a filename into a structured descriptor. Never fails.
pub fn classify(filename: &str, media_type: LibraryType) -> Classification {
    let mut result = Classification::default();

    let mut stem = strip_extension(filename).to_string();

    // Inline provider ids come out first so bracket noise never confuses
    // the pattern matchers
    result.provider_ids = extract_provider_ids(&mut stem);

    result.resolution_hint = parse_resolution(&stem);
    result.source_hint = parse_source(&stem);

    // Extras short-circuit: downstream matching is skipped entirely
    if let Some(extra) = detect_extra(&stem) {
        result.extra = Some(extra);
        result.title = fallback_title(&stem).0;
        result.sort_title = Some(sort_title(&result.title));
        return result;
    }

    // Movie-like types can carry a trailing disc/part indicator
    if media_type.is_movie_like() {
        if let Some(caps) = MULTIPART_RE.captures(&stem) {
            let number: i32 = caps.get(1).and_then(|m| m.as_str().parse().ok()).unwrap_or(1);
            let base = stem[..caps.get(0).unwrap().start()].trim().to_string();
            let (base_title, _) = fallback_title(&base);
            result.part = Some(PartInfo {
                number,
                base_title,
            });
            stem = base;
        }
    }

    match media_type {
        LibraryType::Movies | LibraryType::Audiobooks => classify_movie(&stem, &mut result),
        LibraryType::Shows => classify_episode(&stem, &mut result),
        LibraryType::Music => classify_track(&stem, &mut result),
    }

    if result.edition.is_none() && media_type == LibraryType::Movies {
        result.edition = Some("Theatrical".to_string());
    }

    if result.title.is_empty() {
        result.title = fallback_title(&stem).0;
    }
    result.sort_title = Some(sort_title(&result.title));

    result
}

fn classify_movie(stem: &str, result: &mut Classification) {
    // Strict form: Title (Year) {Edition} [hints]
    if let Some(caps) = MOVIE_STRICT_RE.captures(stem) {
        let title = caps.name("title").unwrap().as_str().trim();
        // Reject matches where the "title" itself is pure noise
        if !title.is_empty() {
            result.title = title.to_string();
            result.year = caps.name("year").and_then(|m| m.as_str().parse().ok());

            let rest = caps.name("rest").map(|m| m.as_str()).unwrap_or("");
            if let Some(ed) = EDITION_RE.captures(rest) {
                result.edition = Some(ed.name("edition").unwrap().as_str().trim().to_string());
            }
            return;
        }
    }

    let (title, year) = fallback_title(stem);
    result.title = title;
    result.year = year;
}

fn classify_episode(stem: &str, result: &mut Classification) {
    let caps = SXXEXX_RE
        .captures(stem)
        .or_else(|| NXNN_RE.captures(stem))
        .or_else(|| VERBOSE_EPISODE_RE.captures(stem));

    if let Some(caps) = caps {
        result.season = caps.name("s").and_then(|m| m.as_str().parse().ok());
        result.episode = caps.name("e").and_then(|m| m.as_str().parse().ok());
        let raw_show = caps.name("show").unwrap().as_str();
        let (title, year) = fallback_title(raw_show);
        result.title = title;
        result.year = year;
        return;
    }

    let (title, year) = fallback_title(stem);
    result.title = title;
    result.year = year;
}

fn classify_track(stem: &str, result: &mut Classification) {
    if let Some(caps) = TRACK_STRICT_RE.captures(stem) {
        result.artist = Some(caps.name("artist").unwrap().as_str().trim().to_string());
        result.album = Some(caps.name("album").unwrap().as_str().trim().to_string());
        result.disc = caps.name("d").and_then(|m| m.as_str().parse().ok());
        result.track = caps.name("t").and_then(|m| m.as_str().parse().ok());
        result.title = caps
            .name("title")
            .map(|m| m.as_str().trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| {
                format!(
                    "Track {}",
                    result.track.unwrap_or(0)
                )
            });
        return;
    }

    // "NN - Title" is the common per-album layout; artist/album come from
    // the directory structure at scan time
    if let Some(caps) = TRACK_NUMBER_RE.captures(stem) {
        result.track = caps.name("t").and_then(|m| m.as_str().parse().ok());
        result.title = caps.name("title").unwrap().as_str().trim().to_string();
        return;
    }

    let (title, year) = fallback_title(stem);
    result.title = title;
    result.year = year;
}

/// Universal token cleaner: the last line of defense for unstructured
/// names. Splits on delimiters, pulls a delimiter-anchored year, strips
/// trailing release noise, and reassembles the rest as the title.
fn fallback_title(stem: &str) -> (String, Option<i32>) {
    let normalized = stem.replace(['.', '_'], " ");
    let tokens: Vec<&str> = normalized.split_whitespace().collect();

    if tokens.is_empty() {
        return (stem.trim().to_string(), None);
    }

    // Short names are never stripped; one- and two-token titles routinely
    // collide with the garbage vocabulary ("Heat", "Web 2")
    if tokens.len() <= 2 {
        return (trim_separators(&tokens.join(" ")), None);
    }

    // A year token anywhere past the first position splits title from noise
    let year_idx = tokens
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, t)| YEAR_TOKEN_RE.is_match(strip_brackets(t)))
        .map(|(i, _)| i);

    let year = year_idx.and_then(|i| strip_brackets(tokens[i]).parse().ok());

    let mut title_tokens: Vec<&str> = match year_idx {
        Some(i) => tokens[..i].to_vec(),
        None => tokens.clone(),
    };

    // Trailing scan: cut at the first run of two consecutive garbage
    // tokens, then drop a single trailing garbage token if one remains.
    // Stopping at two bounds how much of a punctuated title is discarded.
    if title_tokens.len() > 2 {
        if let Some(cut) = title_tokens
            .windows(2)
            .position(|w| is_garbage(w[0]) && is_garbage(w[1]))
        {
            if cut >= 1 {
                title_tokens.truncate(cut);
            }
        }
        while title_tokens.len() > 2 && is_garbage(title_tokens[title_tokens.len() - 1]) {
            title_tokens.pop();
        }
    }

    let title = trim_separators(&title_tokens.join(" "));
    if title.is_empty() {
        // Degenerate inputs keep their raw stem rather than vanishing
        return (trim_separators(&tokens.join(" ")), year);
    }

    (title, year)
}

fn is_garbage(token: &str) -> bool {
    let lower = token.to_lowercase();
    let lower = strip_brackets(&lower);
    if GARBAGE_TOKENS.contains(&lower) {
        return true;
    }
    // "x264-GROUP" style: codec fused to a release group
    if let Some(head) = lower.split('-').next() {
        if head != lower && GARBAGE_TOKENS.contains(&head) {
            return true;
        }
    }
    false
}

fn strip_brackets(token: &str) -> &str {
    token.trim_matches(|c| matches!(c, '(' | ')' | '[' | ']' | '{' | '}'))
}

fn trim_separators(s: &str) -> String {
    let trimmed = s.trim_matches(|c: char| c.is_whitespace() || matches!(c, '-' | '.' | '_'));
    SPACES_RE.replace_all(trimmed, " ").to_string()
}

fn strip_extension(filename: &str) -> &str {
    match filename.rfind('.') {
        // Only treat short alphanumeric tails as extensions
        Some(idx)
            if filename.len() - idx <= 6
                && filename[idx + 1..].chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            &filename[..idx]
        }
        _ => filename,
    }
}

fn extract_provider_ids(stem: &mut String) -> ProviderIds {
    let mut ids = ProviderIds::default();

    while let Some(caps) = PROVIDER_ID_RE.captures(stem) {
        let provider = caps.get(1).unwrap().as_str().to_lowercase();
        let value = caps.get(2).unwrap().as_str();
        match provider.as_str() {
            "tmdb" => ids.tmdb = value.parse().ok(),
            "tvdb" => ids.tvdb = value.parse().ok(),
            "imdb" => ids.imdb = Some(value.to_string()),
            _ => {}
        }
        let range = caps.get(0).unwrap().range();
        stem.replace_range(range, "");
    }

    *stem = trim_separators(stem);
    ids
}

fn detect_extra(stem: &str) -> Option<ExtraKind> {
    let lower = stem.to_lowercase();
    let last = lower
        .rsplit(|c: char| matches!(c, '-' | '_' | '.' | ' '))
        .next()
        .unwrap_or(&lower);

    for (suffix, kind) in EXTRA_SUFFIXES {
        if last == *suffix {
            return Some(*kind);
        }
    }
    None
}

fn parse_resolution(stem: &str) -> Option<String> {
    RESOLUTION_RE.captures(stem).map(|caps| {
        let res = caps.get(1).unwrap().as_str().to_uppercase();
        match res.as_str() {
            "4K" | "UHD" => "2160p".to_string(),
            other => other.to_lowercase(),
        }
    })
}

fn parse_source(stem: &str) -> Option<String> {
    let upper = stem.to_uppercase();

    if upper.contains("BLURAY") || upper.contains("BLU-RAY") || upper.contains("BDRIP") {
        Some("BluRay".to_string())
    } else if upper.contains("WEB-DL") || upper.contains("WEBDL") {
        Some("WEB-DL".to_string())
    } else if upper.contains("WEBRIP") {
        Some("WEBRip".to_string())
    } else if upper.contains("HDTV") {
        Some("HDTV".to_string())
    } else if upper.contains("DVDRIP") || upper.contains("DVD") {
        Some("DVD".to_string())
    } else {
        None
    }
}

/// Leading-article-free form used for ordering
fn sort_title(title: &str) -> String {
    let lower = title.to_lowercase();
    for article in ["the ", "a ", "an "] {
        if lower.starts_with(article) {
            return title[article.len()..].to_string();
        }
    }
    title.to_string()
}
