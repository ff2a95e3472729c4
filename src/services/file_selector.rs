//! Media file selection for multi-file releases
//!
//! Picks the single playable file out of a release's file tree and produces
//! the ordered id list sent to the provider. The preferred file is always
//! first in that list; non-media files are never included.
//!
//! Decision order:
//! 1. no media files: nothing to select
//! 2. one media file: accept it, unless an explicit target episode does not match
//! 3. Blu-ray (`BDMV/STREAM`) trees: the largest file wins
//! 4. otherwise episode / absolute / air-date matching, then title similarity,
//!    then extension priority (only when no target episode was asked for)

use chrono::NaiveDate;
use tracing::debug;

use crate::debrid::types::{MediaFileEntry, ReleaseCandidate, attrs};
use crate::services::filename_parser::{
    EpisodeCode, extract_episode_code, matches_absolute_episode, matches_daily_date,
    matches_episode, normalize_release_part, parse_episode_code, similarity_score,
    tokenize_parts,
};

/// Ranked playable extensions. Lower rank is preferred.
const MEDIA_EXTENSIONS: &[(&str, u8)] = &[
    ("mp4", 0),
    ("m4v", 1),
    ("mkv", 2),
    ("webm", 3),
    ("mov", 4),
    ("avi", 5),
    ("mpg", 6),
    ("mpeg", 6),
    ("ts", 7),
    ("m2ts", 7),
    ("mts", 7),
    ("wmv", 8),
    ("flv", 9),
    ("vob", 10),
    ("ogv", 11),
    ("3gp", 12),
    ("divx", 13),
];

/// Extension rank of a path, `None` for non-media files.
pub fn media_extension_priority(path: &str) -> Option<u8> {
    let name = path.rsplit('/').next().unwrap_or(path);
    let (_, ext) = name.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    MEDIA_EXTENSIONS
        .iter()
        .find(|(candidate, _)| *candidate == ext)
        .map(|(_, rank)| *rank)
}

fn is_bdmv_stream(path: &str) -> bool {
    let upper = path.replace('\\', "/").to_ascii_uppercase();
    let segments: Vec<&str> = upper.split('/').collect();
    segments
        .windows(2)
        .any(|pair| pair[0] == "BDMV" && pair[1] == "STREAM")
}

/// Disambiguation hints derived from a candidate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionHints {
    pub release_title: String,
    pub queue_name: String,
    pub directory: String,
    pub target_season: Option<u32>,
    pub target_episode: Option<u32>,
    pub target_episode_code: Option<String>,
    pub absolute_episode: Option<u32>,
    pub target_air_date: Option<NaiveDate>,
    pub is_daily: bool,
}

fn positive_int(value: Option<&str>) -> Option<u32> {
    value.and_then(|v| v.parse::<u32>().ok()).filter(|n| *n > 0)
}

impl SelectionHints {
    /// Build hints from candidate attributes. `directory` is the release
    /// name reported by the provider.
    pub fn from_candidate(candidate: &ReleaseCandidate, directory: &str) -> Self {
        let mut hints = SelectionHints {
            release_title: candidate.title.clone(),
            queue_name: candidate
                .attribute(attrs::RAW_TITLE)
                .unwrap_or_default()
                .to_string(),
            directory: directory.to_string(),
            target_season: positive_int(candidate.attribute(attrs::TARGET_SEASON)),
            target_episode: positive_int(candidate.attribute(attrs::TARGET_EPISODE)),
            target_episode_code: candidate
                .attribute(attrs::TARGET_EPISODE_CODE)
                .map(str::to_string),
            absolute_episode: positive_int(candidate.attribute(attrs::ABSOLUTE_EPISODE)),
            target_air_date: candidate
                .attribute(attrs::TARGET_AIR_DATE)
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()),
            is_daily: candidate
                .attribute(attrs::IS_DAILY)
                .is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1"),
        };

        if hints.target_episode_code.is_none() {
            if let (Some(season), Some(episode)) = (hints.target_season, hints.target_episode) {
                hints.target_episode_code = Some(EpisodeCode::new(season, episode).to_string());
            }
        }
        if hints.release_title.trim().is_empty() {
            if let Some(name) = candidate.attribute(attrs::TITLE_NAME) {
                hints.release_title = name.to_string();
            }
        }

        hints
    }

    /// Target episode the caller asked for explicitly.
    pub fn explicit_episode(&self) -> Option<EpisodeCode> {
        match (self.target_season, self.target_episode) {
            (Some(season), Some(episode)) => Some(EpisodeCode::new(season, episode)),
            _ => self
                .target_episode_code
                .as_deref()
                .and_then(parse_episode_code),
        }
    }

    /// Air date, only for daily shows.
    pub fn daily_air_date(&self) -> Option<NaiveDate> {
        self.target_air_date.filter(|_| self.is_daily)
    }
}

/// Accepted selection. `ordered_ids[0] == preferred_id` always holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFileSelection {
    pub ordered_ids: Vec<u32>,
    pub preferred_id: u32,
    pub preferred_label: String,
    pub reason: String,
}

impl MediaFileSelection {
    fn new(mut ordered_ids: Vec<u32>, preferred: &Candidate<'_>, reason: String) -> Self {
        if let Some(pos) = ordered_ids.iter().position(|id| *id == preferred.id) {
            let id = ordered_ids.remove(pos);
            ordered_ids.insert(0, id);
        }
        Self {
            ordered_ids,
            preferred_id: preferred.id,
            preferred_label: preferred.label.to_string(),
            reason,
        }
    }

    /// Comma separated ids, as the provider's select call expects.
    pub fn id_list(&self) -> String {
        self.ordered_ids
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionOutcome {
    /// The release contains no playable files.
    NoMedia,
    Rejected(String),
    Selected(MediaFileSelection),
}

#[derive(Debug)]
struct Candidate<'a> {
    id: u32,
    label: &'a str,
    priority: u8,
    bytes: u64,
}

/// How the secondary target is appended to a rejection reason.
#[derive(Clone, Copy)]
enum TargetStyle {
    /// `S02E05 or date 2024-03-01`
    Alternatives,
    /// `S02E05 (date: 2024-03-01)`
    Annotated,
}

fn describe_target(target: EpisodeCode, hints: &SelectionHints, style: TargetStyle) -> String {
    let date = hints.daily_air_date().map(|d| d.format("%Y-%m-%d").to_string());
    match (style, date, hints.absolute_episode) {
        (TargetStyle::Alternatives, Some(date), _) => format!("{target} or date {date}"),
        (TargetStyle::Alternatives, None, Some(abs)) => format!("{target} or absolute ep {abs}"),
        (TargetStyle::Annotated, Some(date), _) => format!("{target} (date: {date})"),
        (TargetStyle::Annotated, None, Some(abs)) => format!("{target} (abs: {abs})"),
        (_, None, None) => target.to_string(),
    }
}

/// Select the playable file(s) of a release.
pub fn select_media_files(files: &[MediaFileEntry], hints: &SelectionHints) -> SelectionOutcome {
    let candidates: Vec<Candidate<'_>> = files
        .iter()
        .filter_map(|file| {
            media_extension_priority(&file.path).map(|priority| Candidate {
                id: file.id,
                label: &file.path,
                priority,
                bytes: file.bytes,
            })
        })
        .collect();

    if candidates.is_empty() {
        return SelectionOutcome::NoMedia;
    }

    let ordered_ids: Vec<u32> = candidates.iter().map(|c| c.id).collect();

    if let [only] = candidates.as_slice() {
        if let (Some(season), Some(episode)) = (hints.target_season, hints.target_episode) {
            let target = EpisodeCode::new(season, episode);
            let by_code = matches_episode(only.label, target);
            let by_absolute = hints
                .absolute_episode
                .is_some_and(|abs| matches_absolute_episode(only.label, abs));
            let by_date = hints
                .daily_air_date()
                .is_some_and(|date| matches_daily_date(only.label, date));

            if !by_code && !by_absolute && !by_date {
                let reason = format!(
                    "single file {:?} does not match target {}",
                    only.label,
                    describe_target(target, hints, TargetStyle::Alternatives)
                );
                debug!(reason = %reason, "Rejecting single-file release");
                return SelectionOutcome::Rejected(reason);
            }
        }
        return SelectionOutcome::Selected(MediaFileSelection::new(
            ordered_ids,
            only,
            "only playable file found".to_string(),
        ));
    }

    if files.iter().any(|f| is_bdmv_stream(&f.path)) {
        // BDMV segment names are sequential numbers, so only size is meaningful.
        let largest = candidates
            .iter()
            .reduce(|best, c| if c.bytes > best.bytes { c } else { best })
            .unwrap_or(&candidates[0]);
        debug!(file = %largest.label, bytes = largest.bytes, "BDMV structure detected");
        return SelectionOutcome::Selected(MediaFileSelection::new(
            ordered_ids.clone(),
            largest,
            format!("BDMV largest file ({} MB)", largest.bytes / (1024 * 1024)),
        ));
    }

    match select_best_candidate(&candidates, hints) {
        Some((idx, reason)) => SelectionOutcome::Selected(MediaFileSelection::new(
            ordered_ids,
            &candidates[idx],
            reason,
        )),
        None => {
            if let Some(target) = hints.explicit_episode() {
                let reason = format!(
                    "target episode {} not found in torrent",
                    describe_target(target, hints, TargetStyle::Annotated)
                );
                debug!(reason = %reason, "Rejecting release");
                return SelectionOutcome::Rejected(reason);
            }
            let best = best_priority(&candidates, 0..candidates.len()).unwrap_or(0);
            SelectionOutcome::Selected(MediaFileSelection::new(
                ordered_ids,
                &candidates[best],
                "fallback to extension priority".to_string(),
            ))
        }
    }
}

fn best_priority(candidates: &[Candidate<'_>], indices: impl IntoIterator<Item = usize>) -> Option<usize> {
    indices
        .into_iter()
        .reduce(|best, idx| {
            if candidates[idx].priority < candidates[best].priority {
                idx
            } else {
                best
            }
        })
}

fn best_similarity(
    candidates: &[Candidate<'_>],
    indices: &[usize],
    release_tokens: &[String],
    release_flat: &str,
) -> Option<(usize, i32)> {
    let mut best: Option<(usize, i32)> = None;
    for &idx in indices {
        let score = similarity_score(candidates[idx].label, release_tokens, release_flat);
        if score <= 0 {
            continue;
        }
        let better = match best {
            None => true,
            Some((best_idx, best_score)) => {
                score > best_score
                    || (score == best_score && candidates[idx].priority < candidates[best_idx].priority)
            }
        };
        if better {
            best = Some((idx, score));
        }
    }
    best
}

/// Among several matches, prefer title similarity, then extension rank.
fn pick_among(
    candidates: &[Candidate<'_>],
    matching: &[usize],
    release_tokens: &[String],
    release_flat: &str,
    kind: &str,
    detail: &str,
) -> Option<(usize, String)> {
    if let [only] = matching {
        return Some((*only, format!("matched {kind} {detail}")));
    }
    if let Some((idx, score)) = best_similarity(candidates, matching, release_tokens, release_flat) {
        return Some((idx, format!("{kind} match + title similarity score {score}")));
    }
    best_priority(candidates, matching.iter().copied())
        .map(|idx| (idx, format!("{kind} match fallback to extension priority ({detail})")))
}

/// Hint-driven resolver for multi-file releases.
///
/// Returns `None` when nothing matched. Once a target episode is known,
/// title similarity is never consulted across non-matching files.
fn select_best_candidate(
    candidates: &[Candidate<'_>],
    hints: &SelectionHints,
) -> Option<(usize, String)> {
    let release_part = normalize_release_part(&hints.release_title);
    let queue_part = normalize_release_part(&hints.queue_name);
    let dir_part = normalize_release_part(&hints.directory);
    let release_tokens = tokenize_parts([
        release_part.as_str(),
        queue_part.as_str(),
        dir_part.as_str(),
    ]);
    let release_flat = release_tokens.concat();

    let target = hints.explicit_episode().or_else(|| {
        extract_episode_code([
            hints.release_title.as_str(),
            hints.queue_name.as_str(),
            hints.directory.as_str(),
            release_part.as_str(),
            queue_part.as_str(),
            dir_part.as_str(),
        ])
    });

    if let Some(target) = target {
        let matching: Vec<usize> = candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| matches_episode(c.label, target))
            .map(|(idx, _)| idx)
            .collect();
        debug!(target = %target, matches = matching.len(), candidates = candidates.len(), "Episode code matching");

        if !matching.is_empty() {
            return pick_among(
                candidates,
                &matching,
                &release_tokens,
                &release_flat,
                "episode code",
                &target.to_string(),
            );
        }

        if let Some(abs) = hints.absolute_episode {
            let matching: Vec<usize> = candidates
                .iter()
                .enumerate()
                .filter(|(_, c)| matches_absolute_episode(c.label, abs))
                .map(|(idx, _)| idx)
                .collect();
            debug!(absolute_episode = abs, matches = matching.len(), "Absolute episode matching");
            if !matching.is_empty() {
                return pick_among(
                    candidates,
                    &matching,
                    &release_tokens,
                    &release_flat,
                    "absolute episode",
                    &abs.to_string(),
                );
            }
        }

        if let Some(date) = hints.daily_air_date() {
            let matching: Vec<usize> = candidates
                .iter()
                .enumerate()
                .filter(|(_, c)| matches_daily_date(c.label, date))
                .map(|(idx, _)| idx)
                .collect();
            debug!(air_date = %date, matches = matching.len(), "Daily date matching");
            if !matching.is_empty() {
                return pick_among(
                    candidates,
                    &matching,
                    &release_tokens,
                    &release_flat,
                    "daily date",
                    &date.format("%Y-%m-%d").to_string(),
                );
            }
        }

        debug!(target = %target, "No file matches target episode");
        return None;
    }

    if release_tokens.is_empty() {
        return None;
    }
    let all: Vec<usize> = (0..candidates.len()).collect();
    best_similarity(candidates, &all, &release_tokens, &release_flat)
        .map(|(idx, score)| (idx, format!("title similarity score {score}")))
}
