//! Minimal argument parsing for `debrid-check`.

use std::env;

use anyhow::{Context, Result, bail};
use librarian_debrid::debrid::types::{ReleaseCandidate, attrs};

pub const USAGE: &str = "\
usage: debrid-check [options] <magnet|torrent-url|stream-url>

options:
  --health             verify only, never keep the release
  --tracks             probe audio/subtitle tracks (implies --health)
  --title <title>      release title used for selection hints
  --provider <name>    only use this provider
  --info-hash <hash>   info hash when the link is not a magnet
  --season <n>         target season
  --episode <n>        target episode
  --absolute <n>       absolute episode number
  --air-date <date>    target air date of a daily show (YYYY-MM-DD)
  --preresolved        treat the link as an already resolved stream";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Command {
    #[default]
    Resolve,
    Health,
}

#[derive(Debug, Default)]
pub struct CliOptions {
    pub command: Command,
    pub want_tracks: bool,
    pub link: String,
    pub title: Option<String>,
    pub provider: Option<String>,
    pub info_hash: Option<String>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub absolute_episode: Option<u32>,
    pub air_date: Option<String>,
    pub preresolved: bool,
}

impl CliOptions {
    /// `None` when help was requested
    pub fn from_args() -> Result<Option<Self>> {
        Self::parse(env::args().skip(1))
    }

    pub fn parse(args: impl IntoIterator<Item = String>) -> Result<Option<Self>> {
        let mut options = CliOptions::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) if flag.starts_with("--") => (flag.to_string(), Some(value.to_string())),
                _ => (arg.clone(), None),
            };
            let mut value = |name: &str| -> Result<String> {
                inline
                    .clone()
                    .or_else(|| args.next())
                    .with_context(|| format!("{name} requires a value"))
            };
            match flag.as_str() {
                "-h" | "--help" => return Ok(None),
                "--health" => options.command = Command::Health,
                "--tracks" => {
                    options.command = Command::Health;
                    options.want_tracks = true;
                }
                "--preresolved" => options.preresolved = true,
                "--title" => options.title = Some(value("--title")?),
                "--provider" => options.provider = Some(value("--provider")?),
                "--info-hash" => options.info_hash = Some(value("--info-hash")?),
                "--season" => options.season = Some(parse_number("--season", &value("--season")?)?),
                "--episode" => options.episode = Some(parse_number("--episode", &value("--episode")?)?),
                "--absolute" => {
                    options.absolute_episode = Some(parse_number("--absolute", &value("--absolute")?)?)
                }
                "--air-date" => options.air_date = Some(value("--air-date")?),
                _ if flag.starts_with("--") => bail!("unknown option {flag}"),
                _ if options.link.is_empty() => options.link = arg,
                _ => bail!("unexpected argument {arg}"),
            }
        }
        if options.link.is_empty() && options.info_hash.is_none() {
            bail!("a link or --info-hash is required");
        }
        Ok(Some(options))
    }

    /// Candidate equivalent to what a scraper would hand over
    pub fn candidate(&self) -> ReleaseCandidate {
        let title = self.title.clone().unwrap_or_else(|| self.link.clone());
        let mut candidate = ReleaseCandidate::new(title, self.link.clone());
        let mut set = |key: &str, value: Option<String>| {
            if let Some(value) = value {
                candidate.attributes.insert(key.to_string(), value);
            }
        };
        set(attrs::PROVIDER, self.provider.clone());
        set(attrs::INFO_HASH, self.info_hash.clone());
        set(attrs::TITLE_NAME, self.title.clone());
        set(attrs::TARGET_SEASON, self.season.map(|s| s.to_string()));
        set(attrs::TARGET_EPISODE, self.episode.map(|e| e.to_string()));
        set(
            attrs::TARGET_EPISODE_CODE,
            self.season
                .zip(self.episode)
                .map(|(s, e)| format!("S{s:02}E{e:02}")),
        );
        set(attrs::ABSOLUTE_EPISODE, self.absolute_episode.map(|n| n.to_string()));
        if let Some(date) = &self.air_date {
            set(attrs::IS_DAILY, Some("true".to_string()));
            set(attrs::TARGET_AIR_DATE, Some(date.clone()));
        }
        if self.preresolved {
            set(attrs::PRERESOLVED, Some("true".to_string()));
            set(attrs::STREAM_URL, Some(self.link.clone()));
        }
        candidate
    }
}

fn parse_number(flag: &str, value: &str) -> Result<u32> {
    value
        .trim()
        .parse()
        .with_context(|| format!("{flag} expects a number, got {value:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(args: &[&str]) -> Result<Option<CliOptions>> {
        CliOptions::parse(args.iter().map(|a| a.to_string()))
    }

    #[test]
    fn test_episode_candidate() {
        let options = parse(&["magnet:?xt=urn:btih:abc", "--season", "2", "--episode=5", "--title", "Show"])
            .unwrap()
            .unwrap();
        assert_eq!(options.command, Command::Resolve);
        let candidate = options.candidate();
        assert_eq!(candidate.attribute(attrs::TARGET_EPISODE_CODE), Some("S02E05"));
        assert_eq!(candidate.attribute(attrs::TITLE_NAME), Some("Show"));
        assert_eq!(candidate.info_hash().as_deref(), Some("abc"));
    }

    #[test]
    fn test_daily_and_tracks() {
        let options = parse(&["--tracks", "--air-date", "2024-03-01", "--info-hash", "ABC"])
            .unwrap()
            .unwrap();
        assert_eq!(options.command, Command::Health);
        assert!(options.want_tracks);
        let candidate = options.candidate();
        assert_eq!(candidate.attribute(attrs::IS_DAILY), Some("true"));
        assert_eq!(candidate.magnet_uri().as_deref(), Some("magnet:?xt=urn:btih:abc"));
    }

    #[test]
    fn test_errors_and_help() {
        assert!(parse(&["--help"]).unwrap().is_none());
        assert!(parse(&[]).is_err());
        assert!(parse(&["magnet:?x", "--season"]).is_err());
        assert!(parse(&["magnet:?x", "--season", "two"]).is_err());
        assert!(parse(&["magnet:?x", "--bogus"]).is_err());
    }
}
