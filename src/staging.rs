use std::collections::BTreeSet;
use std::fs;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Header of the staging CSV, in file order.
pub const STAGING_COLUMNS: &[&str] = &[
    "match_id",
    "game_creation",
    "game_duration",
    "queue_id",
    "game_version",
    "platform_id",
    "participant_puuid",
    "summoner_name",
    "champion_id",
    "champion_name",
    "team_id",
    "win",
    "kills",
    "deaths",
    "assists",
    "total_damage_to_champions",
    "gold_earned",
    "total_minions_killed",
    "vision_score",
    "role",
    "teamPosition",
    "individualPosition",
    "lane",
];

/// Columns the warehouse load cannot do without.
pub const REQUIRED_COLUMNS: &[&str] = &[
    "match_id",
    "game_creation",
    "game_duration",
    "queue_id",
    "game_version",
    "platform_id",
    "participant_puuid",
    "summoner_name",
    "champion_id",
    "champion_name",
    "team_id",
    "win",
    "kills",
    "deaths",
    "assists",
    "total_damage_to_champions",
    "gold_earned",
    "total_minions_killed",
    "vision_score",
    "role",
    "teamPosition",
    "lane",
];

/// One (match, participant) row. Every cell is raw text; an empty cell is `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingRow {
    pub match_id: Option<String>,
    pub game_creation: Option<String>,
    pub game_duration: Option<String>,
    pub queue_id: Option<String>,
    pub game_version: Option<String>,
    pub platform_id: Option<String>,
    pub participant_puuid: Option<String>,
    pub summoner_name: Option<String>,
    pub champion_id: Option<String>,
    pub champion_name: Option<String>,
    pub team_id: Option<String>,
    pub win: Option<String>,
    pub kills: Option<String>,
    pub deaths: Option<String>,
    pub assists: Option<String>,
    pub total_damage_to_champions: Option<String>,
    pub gold_earned: Option<String>,
    pub total_minions_killed: Option<String>,
    pub vision_score: Option<String>,
    pub role: Option<String>,
    #[serde(rename = "teamPosition")]
    pub team_position: Option<String>,
    #[serde(rename = "individualPosition", default)]
    pub individual_position: Option<String>,
    pub lane: Option<String>,
}

/// Writes `rows` under the fixed header. An empty slice still yields the header.
pub fn write_staging(path: &Path, rows: &[StagingRow]) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("open {}", path.display()))?;
    wtr.write_record(STAGING_COLUMNS)
        .context("write staging header")?;
    for row in rows {
        wtr.serialize(row).context("write staging row")?;
    }
    wtr.flush().context("flush staging csv")?;
    Ok(())
}

/// Reads a staging CSV, refusing it outright when a required column is absent.
pub fn read_staging(path: &Path) -> Result<Vec<StagingRow>> {
    let file = fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    read_staging_from(file, path)
}

/// Like [`read_staging`], from any reader; `origin` names it in errors.
pub fn read_staging_from<R: Read>(reader: R, origin: &Path) -> Result<Vec<StagingRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);
    let headers = rdr
        .headers()
        .with_context(|| format!("read header of {}", origin.display()))?
        .clone();
    let present: BTreeSet<&str> = headers.iter().collect();
    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|col| !present.contains(**col))
        .map(|col| col.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(PipelineError::MissingColumns {
            path: origin.to_path_buf(),
            columns: missing,
        }
        .into());
    }

    let mut out = Vec::new();
    for (idx, record) in rdr.deserialize::<StagingRow>().enumerate() {
        let row = record.with_context(|| format!("decode row {} of {}", idx + 1, origin.display()))?;
        out.push(row);
    }
    Ok(out)
}

/// Rows belonging to `puuid` only.
pub fn rows_for_player<'a>(rows: &'a [StagingRow], puuid: &str) -> Vec<&'a StagingRow> {
    rows.iter()
        .filter(|row| row.participant_puuid.as_deref() == Some(puuid))
        .collect()
}

pub fn write_player_staging(path: &Path, rows: &[StagingRow], puuid: &str) -> Result<usize> {
    let mine: Vec<StagingRow> = rows_for_player(rows, puuid).into_iter().cloned().collect();
    write_staging(path, &mine)?;
    Ok(mine.len())
}
