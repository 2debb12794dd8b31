use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use lol_dw::config::{ApiSettings, DataLayout, RiotId};
use lol_dw::identity::{self, Account};
use lol_dw::manifest::Manifest;
use lol_dw::match_fetch::fetch_match_details;
use lol_dw::match_ids::{self, CollectOptions};
use lol_dw::riot_api::{HttpTransport, RiotApi};
use lol_dw::rate_limit::SystemClock;
use lol_dw::{flatten, logging, staging, warehouse};

const STATUS_PREVIEW_CHARS: usize = 500;

type Api = RiotApi<HttpTransport, SystemClock>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Check,
    Puuid,
    MatchIds,
    Matches,
    Stage,
    Load,
    All,
}

impl Stage {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "check" => Some(Self::Check),
            "puuid" => Some(Self::Puuid),
            "match-ids" | "ids" => Some(Self::MatchIds),
            "matches" | "fetch" => Some(Self::Matches),
            "stage" | "flatten" => Some(Self::Stage),
            "load" => Some(Self::Load),
            "all" => Some(Self::All),
            _ => None,
        }
    }
}

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    logging::init_tracing(logging::DEFAULT_FILTER)?;

    let stage = match parse_stage_arg() {
        Some(raw) => Stage::parse(&raw).ok_or_else(|| {
            anyhow!("unknown stage {raw:?} (expected check, puuid, match-ids, matches, stage, load, all)")
        })?,
        None => Stage::All,
    };
    let layout = parse_path_arg("--data-dir")
        .map(DataLayout::new)
        .unwrap_or_else(DataLayout::from_env);
    let db_path = parse_path_arg("--db").unwrap_or_else(|| layout.warehouse_db());

    match stage {
        Stage::Check => run_check(&ApiSettings::from_env()?),
        Stage::Puuid => {
            let riot_id = RiotId::from_env()?;
            let mut api = RiotApi::from_settings(&ApiSettings::from_env()?)?;
            run_puuid(&mut api, &riot_id, &layout).map(|_| ())
        }
        Stage::MatchIds => {
            let settings = ApiSettings::from_env()?;
            let mut api = RiotApi::from_settings(&settings)?;
            let account = identity::load_account(&layout.puuid_file())
                .context("resolve the player first (stage `puuid`)")?;
            run_match_ids(&mut api, &settings, &account, &layout).map(|_| ())
        }
        Stage::Matches => {
            let mut api = RiotApi::from_settings(&ApiSettings::from_env()?)?;
            let ids = match_ids::load_match_ids(&layout.match_ids_file())
                .context("collect match ids first (stage `match-ids`)")?;
            run_matches(&mut api, &ids, &layout)
        }
        Stage::Stage => run_stage(&layout),
        Stage::Load => run_load(&layout, &db_path),
        Stage::All => {
            let settings = ApiSettings::from_env()?;
            let riot_id = if layout.puuid_file().exists() {
                None
            } else {
                Some(RiotId::from_env()?)
            };
            let mut api = RiotApi::from_settings(&settings)?;
            let account = match riot_id {
                Some(riot_id) => run_puuid(&mut api, &riot_id, &layout)?,
                None => identity::load_account(&layout.puuid_file())?,
            };
            let ids = run_match_ids(&mut api, &settings, &account, &layout)?;
            run_matches(&mut api, &ids, &layout)?;
            run_stage(&layout)?;
            run_load(&layout, &db_path)
        }
    }
}

fn run_check(settings: &ApiSettings) -> Result<()> {
    let mut api = RiotApi::from_settings(settings)?;
    let url = api.endpoints().platform_status();
    let resp = api.get(&url)?;
    println!("Status code: {}", resp.status);
    let preview: String = resp.body.chars().take(STATUS_PREVIEW_CHARS).collect();
    println!("Response preview:\n{preview}");
    if !resp.is_success() {
        return Err(resp.error_for("platform status").into());
    }
    Ok(())
}

fn run_puuid(api: &mut Api, riot_id: &RiotId, layout: &DataLayout) -> Result<Account> {
    let account = identity::resolve_account(api, riot_id)?;
    let path = layout.puuid_file();
    identity::save_account(&path, &account)?;
    println!("Resolved {riot_id}");
    println!("PUUID saved to {}", path.display());
    Ok(account)
}

fn run_match_ids(
    api: &mut Api,
    settings: &ApiSettings,
    account: &Account,
    layout: &DataLayout,
) -> Result<Vec<String>> {
    let opts = CollectOptions {
        page_size: settings.page_size,
        limit: settings.id_limit,
    };
    let summary = match_ids::collect_match_ids(api, &account.puuid, &opts)?;
    let path = layout.match_ids_file();
    match_ids::save_match_ids(&path, &summary.ids)?;
    println!("Total IDs collected: {}", summary.ids.len());
    if summary.duplicates > 0 {
        println!("Duplicates dropped: {}", summary.duplicates);
    }
    println!("Saved to {}", path.display());
    Ok(summary.ids)
}

fn run_matches(api: &mut Api, ids: &[String], layout: &DataLayout) -> Result<()> {
    let matches_dir = layout.matches_dir();
    let mut manifest = Manifest::load(&layout.manifest_file(), &matches_dir)?;
    let summary = fetch_match_details(api, ids, &matches_dir, &mut manifest)?;
    println!(
        "Done. Saved={}, Skipped={}, Failed={}",
        summary.saved,
        summary.skipped,
        summary.failed.len()
    );
    for (match_id, failure) in summary.failed.iter().take(8) {
        println!(" - {match_id}: {failure}");
    }
    Ok(())
}

fn run_stage(layout: &DataLayout) -> Result<()> {
    let (rows, summary) = flatten::flatten_dir(&layout.matches_dir())?;
    let staging_path = layout.staging_file();
    staging::write_staging(&staging_path, &rows)?;
    println!(
        "Wrote {} rows from {} matches to {}",
        summary.rows,
        summary.matches,
        staging_path.display()
    );
    if !summary.unreadable.is_empty() {
        println!("Unreadable match files: {}", summary.unreadable.len());
    }

    match identity::load_account(&layout.puuid_file()) {
        Ok(account) => {
            let player_path = layout.player_staging_file();
            let count = staging::write_player_staging(&player_path, &rows, &account.puuid)?;
            println!("Filtered {count} rows into {}", player_path.display());
        }
        Err(err) => {
            tracing::warn!("skipping player staging file: {err:#}");
        }
    }
    Ok(())
}

fn run_load(layout: &DataLayout, db_path: &Path) -> Result<()> {
    let staging_path = layout.staging_file();
    // Validate the staging file before the warehouse is even opened.
    let rows = staging::read_staging(&staging_path)?;
    let mut conn = warehouse::open_db(db_path)?;
    let summary = warehouse::load_rows(&mut conn, &rows, &staging_path)?;

    println!("Warehouse load complete. DB: {}", db_path.display());
    println!("Rows read: {}", summary.rows_read);
    println!(
        "Summoners: {}  Champions: {}  Queues: {}  Matches: {}",
        summary.summoners, summary.champions, summary.queues, summary.matches
    );
    println!(
        "Facts written: {}  dropped: {}  stale removed: {}",
        summary.facts_written, summary.facts_dropped, summary.stale_facts_removed
    );
    Ok(())
}

fn parse_stage_arg() -> Option<String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let mut skip_next = false;
    for arg in &args {
        if skip_next {
            skip_next = false;
            continue;
        }
        if arg == "--db" || arg == "--data-dir" {
            skip_next = true;
            continue;
        }
        if arg.starts_with("--") {
            continue;
        }
        return Some(arg.clone());
    }
    None
}

fn parse_path_arg(flag: &str) -> Option<PathBuf> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let prefix = format!("{flag}=");
    for (idx, arg) in args.iter().enumerate() {
        if let Some(path) = arg.strip_prefix(&prefix) {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                return Some(PathBuf::from(trimmed));
            }
        }
        if arg == flag {
            let Some(next) = args.get(idx + 1) else {
                continue;
            };
            if !next.trim().is_empty() {
                return Some(PathBuf::from(next));
            }
        }
    }
    None
}
