use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;

use crate::error::PipelineError;
use crate::rate_limit::Window;

pub const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_REGION: &str = "europe";
const DEFAULT_PLATFORM: &str = "euw1";
const DEFAULT_PAGE_SIZE: u32 = 100;
const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_RETRY_AFTER_SECS: u64 = 2;
const DEFAULT_RATE_LIMITS: &str = "20:1,100:120";

/// Settings every stage that talks to the upstream API needs.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub api_key: String,
    pub region: String,
    pub platform: String,
    pub base_override: Option<String>,
    pub page_size: u32,
    pub id_limit: Option<usize>,
    pub rate_limits: Vec<Window>,
    pub max_attempts: u32,
    pub default_retry_after: Duration,
}

impl ApiSettings {
    pub fn from_env() -> Result<Self> {
        let api_key = required_env("RIOT_API_KEY")?;
        let region = optional_env("RIOT_REGION").unwrap_or_else(|| DEFAULT_REGION.to_string());
        let platform =
            optional_env("RIOT_PLATFORM").unwrap_or_else(|| DEFAULT_PLATFORM.to_string());
        let base_override = optional_env("RIOT_API_BASE");
        let page_size = optional_env("MATCH_PAGE_SIZE")
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, 100);
        let id_limit = optional_env("MATCH_ID_LIMIT")
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|n| *n > 0);
        let raw_limits =
            optional_env("RIOT_RATE_LIMITS").unwrap_or_else(|| DEFAULT_RATE_LIMITS.to_string());
        let rate_limits =
            parse_rate_limits(&raw_limits).ok_or_else(|| PipelineError::InvalidConfig {
                key: "RIOT_RATE_LIMITS",
                value: raw_limits.clone(),
            })?;
        let max_attempts = optional_env("RIOT_MAX_RETRIES")
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MAX_RETRIES)
            .max(1);
        let retry_after_secs = optional_env("RIOT_RETRY_AFTER_DEFAULT_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS);

        Ok(Self {
            api_key,
            region: region.to_ascii_lowercase(),
            platform: platform.to_ascii_lowercase(),
            base_override,
            page_size,
            id_limit,
            rate_limits,
            max_attempts,
            default_retry_after: Duration::from_secs(retry_after_secs),
        })
    }
}

/// Human-readable player handle, `name#tag`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiotId {
    pub game_name: String,
    pub tag_line: String,
}

impl RiotId {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            game_name: required_env("RIOT_GAME_NAME")?,
            tag_line: required_env("RIOT_TAG_LINE")?,
        })
    }
}

impl std::fmt::Display for RiotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.game_name, self.tag_line)
    }
}

/// Where every stage reads and writes its file artifacts.
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_env() -> Self {
        Self::new(optional_env("LOL_DW_DATA_DIR").unwrap_or_else(|| DEFAULT_DATA_DIR.to_string()))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn puuid_file(&self) -> PathBuf {
        self.root.join("raw").join("puuid.json")
    }

    pub fn match_ids_file(&self) -> PathBuf {
        self.root.join("raw").join("match_ids.json")
    }

    pub fn matches_dir(&self) -> PathBuf {
        self.root.join("raw").join("matches")
    }

    pub fn manifest_file(&self) -> PathBuf {
        self.root.join("raw").join("matches_manifest.json")
    }

    pub fn staging_file(&self) -> PathBuf {
        self.root.join("stg").join("stg_participants.csv")
    }

    pub fn player_staging_file(&self) -> PathBuf {
        self.root.join("stg").join("stg_my_games.csv")
    }

    pub fn warehouse_db(&self) -> PathBuf {
        self.root.join("warehouse").join("lol_dw.sqlite")
    }
}

/// Parses `requests:seconds` windows, e.g. `20:1,100:120`.
pub fn parse_rate_limits(raw: &str) -> Option<Vec<Window>> {
    let mut out = Vec::new();
    for part in raw.split([',', ';', ' ']).filter(|p| !p.trim().is_empty()) {
        let (requests, secs) = part.trim().split_once(':')?;
        let requests = requests.trim().parse::<u32>().ok().filter(|n| *n > 0)?;
        let secs = secs.trim().parse::<u64>().ok().filter(|n| *n > 0)?;
        out.push(Window {
            requests,
            per: Duration::from_secs(secs),
        });
    }
    if out.is_empty() { None } else { Some(out) }
}

fn required_env(key: &'static str) -> Result<String> {
    optional_env(key).ok_or_else(|| PipelineError::MissingConfig { key }.into())
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dev_key_limits() {
        let windows = parse_rate_limits("20:1,100:120").expect("valid limits");
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].requests, 20);
        assert_eq!(windows[1].per, Duration::from_secs(120));
    }

    #[test]
    fn rejects_malformed_limits() {
        assert!(parse_rate_limits("").is_none());
        assert!(parse_rate_limits("20").is_none());
        assert!(parse_rate_limits("0:1").is_none());
        assert!(parse_rate_limits("20:x").is_none());
    }

    #[test]
    fn layout_paths_hang_off_root() {
        let layout = DataLayout::new("/tmp/lol");
        assert_eq!(
            layout.matches_dir(),
            PathBuf::from("/tmp/lol/raw/matches")
        );
        assert_eq!(
            layout.staging_file(),
            PathBuf::from("/tmp/lol/stg/stg_participants.csv")
        );
    }
}
