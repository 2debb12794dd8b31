use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::rate_limit::Clock;
use crate::riot_api::{RiotApi, RiotTransport};

#[derive(Debug, Clone)]
pub struct CollectOptions {
    pub page_size: u32,
    pub limit: Option<usize>,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            page_size: 100,
            limit: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CollectSummary {
    pub ids: Vec<String>,
    pub pages: usize,
    pub duplicates: usize,
}

/// Pages through the player's match history, newest first.
///
/// Stops on an empty page, on the configured limit, or on a failed page. A
/// failure on the very first page is an error; later failures keep what was
/// collected. Ids repeated across page boundaries are dropped, first
/// occurrence wins.
pub fn collect_match_ids<T: RiotTransport, C: Clock>(
    api: &mut RiotApi<T, C>,
    puuid: &str,
    opts: &CollectOptions,
) -> Result<CollectSummary> {
    let page_size = opts.page_size.max(1);
    let mut seen = HashSet::new();
    let mut summary = CollectSummary::default();
    let mut start = 0usize;

    loop {
        let url = api.endpoints().match_ids(puuid, start, page_size);
        let resp = api.get(&url)?;
        if !resp.is_success() {
            if summary.pages == 0 {
                return Err(resp.error_for("match id listing").into());
            }
            warn!(
                status = resp.status,
                start, "match id page failed, stopping pagination"
            );
            break;
        }

        let batch: Vec<String> = resp
            .json()
            .with_context(|| format!("decode match id page at start={start}"))?;
        summary.pages += 1;
        info!("fetched {} ids at start={start}", batch.len());
        if batch.is_empty() {
            break;
        }

        for id in batch {
            if seen.insert(id.clone()) {
                summary.ids.push(id);
            } else {
                summary.duplicates += 1;
            }
        }

        if let Some(limit) = opts.limit
            && summary.ids.len() >= limit
        {
            summary.ids.truncate(limit);
            break;
        }
        start += page_size as usize;
    }

    Ok(summary)
}

pub fn save_match_ids(path: &Path, ids: &[String]) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    let json = serde_json::to_string_pretty(ids).context("serialize match ids")?;
    fs::write(path, json).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

pub fn load_match_ids(path: &Path) -> Result<Vec<String>> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid match id list in {}", path.display()))
}
