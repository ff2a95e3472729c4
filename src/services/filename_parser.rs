//! Filename parsing for files inside debrid releases
//!
//! Recognises the naming schemes seen in season packs and single releases:
//! - "Show.Name.S02E05.1080p.WEB.h264-GROUP.mkv"
//! - "[Group] Anime - 1153 [1080p].mkv" (absolute numbering)
//! - "The.Daily.Show.2024.03.01.Guest.720p.WEB.h264-EDITH.mkv"
//! - "Show - 03 [720p].mkv" (bare episode numbers in first-season packs)

use std::collections::HashSet;
use std::fmt;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

static EPISODE_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)s(\d{1,2})\s*e(\d{1,2})").expect("valid regex"));
static EPISODE_KEYWORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)ep(?:isode)?\.?\s*(\d{1,2})").expect("valid regex"));
static EPISODE_NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[-_\s](\d{1,2})[-_\s\[\.]").expect("valid regex"));

// Absolute numbering, tried in order.
static ABSOLUTE_DASH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[-–][\s_]*(\d{2,4})(?:v\d)?[\s_]*[\[\(\s_]").expect("valid regex")
});
static ABSOLUTE_KEYWORD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:episode|ep\.?)\s*(\d{2,4})(?:\s|$|[\[\(\.])").expect("valid regex")
});
static STANDALONE_EPISODE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:^|[^\d])e(\d{1,4})(?:[\s\]\)\-_\.'"v]|$)"#).expect("valid regex")
});
static ABSOLUTE_HASH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"#\s*(\d{2,4})(?:\s|$|[\[\(])").expect("valid regex"));
static S01_ABSOLUTE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)s01e(\d{3,4})(?:\s|$|[\.\-\[\(])").expect("valid regex")
});

// Numbers that look like episodes but are not.
static RESOLUTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d{3,4})p").expect("valid regex"));
static BRACKETED_YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\(\[](\d{4})[\)\]]").expect("valid regex"));

static DAILY_DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[.\-_\s])(\d{4})[.\-\s](\d{2})[.\-\s](\d{2})(?:[.\-_\s]|$)")
        .expect("valid regex")
});

/// Extensions stripped before comparing release names.
const RELEASE_NAME_EXTENSIONS: &[&str] = &[
    "nzb", "mkv", "mp4", "m4v", "avi", "mov", "mpg", "mpeg", "ts", "m2ts", "mts", "rar", "zip",
    "7z",
];

/// A season/episode pair such as `S02E05`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EpisodeCode {
    pub season: u32,
    pub episode: u32,
}

impl EpisodeCode {
    pub fn new(season: u32, episode: u32) -> Self {
        Self { season, episode }
    }
}

impl fmt::Display for EpisodeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{:02}E{:02}", self.season, self.episode)
    }
}

fn capture_number(re: &Regex, value: &str) -> Option<u32> {
    re.captures(value)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Parse the first `SxxEyy` code in a string.
pub fn parse_episode_code(value: &str) -> Option<EpisodeCode> {
    if value.trim().is_empty() {
        return None;
    }
    let caps = EPISODE_CODE_RE.captures(value)?;
    let season = caps.get(1)?.as_str().parse().ok()?;
    let episode = caps.get(2)?.as_str().parse().ok()?;
    Some(EpisodeCode { season, episode })
}

/// First episode code found across several strings.
pub fn extract_episode_code<'a>(parts: impl IntoIterator<Item = &'a str>) -> Option<EpisodeCode> {
    parts.into_iter().find_map(parse_episode_code)
}

/// Episode number without a season ("Ep. 03", " - 03 - ").
pub fn parse_bare_episode(value: &str) -> Option<u32> {
    if value.trim().is_empty() {
        return None;
    }
    capture_number(&EPISODE_KEYWORD_RE, value)
        .filter(|ep| *ep > 0)
        .or_else(|| capture_number(&EPISODE_NUMBER_RE, value).filter(|ep| *ep > 0))
}

/// Whether a file label refers to the target episode.
///
/// Bare episode numbers only count for season 1: in a multi-season pack
/// "- 01" is ambiguous.
pub fn matches_episode(label: &str, target: EpisodeCode) -> bool {
    if parse_episode_code(label) == Some(target) {
        return true;
    }
    target.season == 1 && parse_bare_episode(label) == Some(target.episode)
}

/// Absolute episode number, as used by long-running anime.
pub fn parse_absolute_episode(value: &str) -> Option<u32> {
    if value.trim().is_empty() {
        return None;
    }

    let excluded: HashSet<u32> = RESOLUTION_RE
        .captures_iter(value)
        .chain(BRACKETED_YEAR_RE.captures_iter(value))
        .filter_map(|caps| caps.get(1).and_then(|m| m.as_str().parse().ok()))
        .collect();

    [
        &*ABSOLUTE_DASH_RE,
        &*ABSOLUTE_KEYWORD_RE,
        &*STANDALONE_EPISODE_RE,
        &*ABSOLUTE_HASH_RE,
        &*S01_ABSOLUTE_RE,
    ]
    .into_iter()
    .find_map(|re| capture_number(re, value).filter(|ep| *ep > 0 && !excluded.contains(ep)))
}

pub fn matches_absolute_episode(label: &str, target: u32) -> bool {
    target > 0 && parse_absolute_episode(label) == Some(target)
}

/// Air date of a daily show ("2024.03.01", "2024-03-01", "2024 03 01").
pub fn parse_daily_date(value: &str) -> Option<NaiveDate> {
    let caps = DAILY_DATE_RE.captures(value)?;
    let year: i32 = caps.get(1)?.as_str().parse().ok()?;
    let month: u32 = caps.get(2)?.as_str().parse().ok()?;
    let day: u32 = caps.get(3)?.as_str().parse().ok()?;
    if !(1900..=2100).contains(&year) {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Exact air-date match. Adjacent days are different episodes.
pub fn matches_daily_date(label: &str, target: NaiveDate) -> bool {
    parse_daily_date(label) == Some(target)
}

/// Base name of a release string with known extensions removed.
pub fn normalize_release_part(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let normalized = trimmed.replace('\\', "/");
    let base = normalized
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|b| !b.is_empty() && *b != ".")
        .unwrap_or(trimmed);

    match base.rsplit_once('.') {
        Some((stem, ext))
            if !ext.is_empty()
                && RELEASE_NAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) =>
        {
            stem.to_string()
        }
        _ => base.to_string(),
    }
}

/// Lowercase alphanumeric tokens of all parts.
pub fn tokenize_parts<'a>(parts: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    parts
        .into_iter()
        .flat_map(|part| {
            part.trim()
                .to_lowercase()
                .split(|c: char| !(c.is_ascii_lowercase() || c.is_ascii_digit()))
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Rough similarity between a file name and the release tokens.
///
/// +10 per shared release token longer than two characters, +25 when one
/// flattened name contains the other, -20 for samples and extras.
pub fn similarity_score(candidate: &str, release_tokens: &[String], release_flat: &str) -> i32 {
    if release_tokens.is_empty() {
        return 0;
    }

    let mut normalized = normalize_release_part(candidate);
    if normalized.is_empty() {
        normalized = candidate.to_string();
    }

    let candidate_tokens = tokenize_parts([normalized.as_str()]);
    let token_set: HashSet<&str> = candidate_tokens.iter().map(String::as_str).collect();

    let mut score: i32 = release_tokens
        .iter()
        .filter(|tok| tok.len() > 2 && token_set.contains(tok.as_str()))
        .map(|_| 10)
        .sum();

    let candidate_flat = candidate_tokens.concat();
    if !candidate_flat.is_empty()
        && !release_flat.is_empty()
        && (candidate_flat.contains(release_flat) || release_flat.contains(&candidate_flat))
    {
        score += 25;
    }

    let lower = normalized.to_lowercase();
    if (lower.contains("sample") || lower.contains("extras")) && score > 0 {
        score = (score - 20).max(0);
    }

    score
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_episode_code() {
        assert_eq!(
            parse_episode_code("Chicago.Fire.S14E08.1080p.WEB.h264-ETHEL.mkv"),
            Some(EpisodeCode::new(14, 8))
        );
        assert_eq!(parse_episode_code("show s02 e05"), Some(EpisodeCode::new(2, 5)));
        assert_eq!(parse_episode_code("Movie.2019.1080p.mkv"), None);
        assert_eq!(EpisodeCode::new(2, 5).to_string(), "S02E05");
    }

    #[test]
    fn test_matches_episode_bare_numbers_only_season_one() {
        assert!(matches_episode("Anime - 03 [720p].mkv", EpisodeCode::new(1, 3)));
        assert!(matches_episode("Show Ep. 04.mkv", EpisodeCode::new(1, 4)));
        assert!(!matches_episode("Anime - 03 [720p].mkv", EpisodeCode::new(2, 3)));
        assert!(!matches_episode("Show.S01E01.mkv", EpisodeCode::new(1, 2)));
    }

    #[test]
    fn test_parse_absolute_episode() {
        assert_eq!(
            parse_absolute_episode("[SubsPlease] One Piece - 1153 (1080p) [ABCD1234].mkv"),
            Some(1153)
        );
        assert_eq!(parse_absolute_episode("Naruto Episode 042.mkv"), Some(42));
        assert_eq!(parse_absolute_episode("One Piece #1071 [720p]"), Some(1071));
        assert_eq!(parse_absolute_episode("One.Piece.S01E1153.mkv"), Some(1153));
        assert_eq!(parse_absolute_episode("Movie (2024) 1080p.mkv"), None);
    }

    #[test]
    fn test_resolution_is_not_an_episode() {
        assert_eq!(parse_absolute_episode("Show - 1080 [1080p].mkv"), None);
    }

    #[test]
    fn test_parse_daily_date() {
        assert_eq!(
            parse_daily_date("The.Daily.Show.2026.01.07.Stephen.J.Dubner.720p.WEB.h264-EDITH"),
            NaiveDate::from_ymd_opt(2026, 1, 7)
        );
        assert_eq!(
            parse_daily_date("Show 2024-03-01 Guest"),
            NaiveDate::from_ymd_opt(2024, 3, 1)
        );
        assert_eq!(parse_daily_date("Show.2024.13.01.mkv"), None);
        assert_eq!(parse_daily_date("Show.S01E01.mkv"), None);
    }

    #[test]
    fn test_daily_date_requires_exact_match() {
        let target = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert!(matches_daily_date("Show.2024.03.01.mkv", target));
        assert!(!matches_daily_date("Show.2024.03.02.mkv", target));
        assert!(!matches_daily_date("Show.2024.02.29.mkv", target));
    }

    #[test]
    fn test_normalize_release_part() {
        assert_eq!(
            normalize_release_part("Pack/Show.S01E01.1080p.mkv"),
            "Show.S01E01.1080p"
        );
        assert_eq!(normalize_release_part("Show.S01.1080p.WEB"), "Show.S01.1080p.WEB");
        assert_eq!(normalize_release_part("  "), "");
    }

    #[test]
    fn test_tokenize_parts() {
        assert_eq!(
            tokenize_parts(["The.Show-S01 [1080p]", ""]),
            vec!["the", "show", "s01", "1080p"]
        );
    }

    #[test]
    fn test_similarity_penalises_samples() {
        let tokens = tokenize_parts(["Great.Movie.2019.1080p"]);
        let flat = tokens.concat();
        let feature = similarity_score("Great.Movie.2019.1080p.mkv", &tokens, &flat);
        let sample = similarity_score("Great.Movie.2019.1080p.sample.mkv", &tokens, &flat);
        assert!(feature > sample);
        assert_eq!(similarity_score("unrelated.mkv", &tokens, &flat), 0);
    }
}
