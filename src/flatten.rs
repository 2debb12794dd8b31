use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::warn;

use crate::manifest::{detail_ids_in, detail_path};
use crate::staging::StagingRow;

#[derive(Debug, Clone, Default)]
pub struct FlattenSummary {
    pub matches: usize,
    pub rows: usize,
    pub unreadable: Vec<String>,
}

/// One row per participant of a match detail record. Absent fields stay empty.
pub fn flatten_match(match_id: &str, detail: &Value) -> Vec<StagingRow> {
    let info = detail.get("info");
    let info_text = |key: &str| info.and_then(|i| i.get(key)).and_then(cell_text);

    let Some(participants) = info
        .and_then(|i| i.get("participants"))
        .and_then(|p| p.as_array())
    else {
        return Vec::new();
    };

    participants
        .iter()
        .map(|p| {
            let text = |key: &str| p.get(key).and_then(cell_text);
            StagingRow {
                match_id: Some(match_id.to_string()),
                game_creation: info_text("gameCreation"),
                game_duration: info_text("gameDuration"),
                queue_id: info_text("queueId"),
                game_version: info_text("gameVersion"),
                platform_id: info_text("platformId"),
                participant_puuid: text("puuid"),
                summoner_name: text("summonerName").or_else(|| text("riotIdGameName")),
                champion_id: text("championId"),
                champion_name: text("championName"),
                team_id: text("teamId"),
                win: text("win"),
                kills: text("kills"),
                deaths: text("deaths"),
                assists: text("assists"),
                total_damage_to_champions: text("totalDamageDealtToChampions"),
                gold_earned: text("goldEarned"),
                total_minions_killed: text("totalMinionsKilled"),
                vision_score: text("visionScore"),
                role: text("role"),
                team_position: text("teamPosition"),
                individual_position: text("individualPosition"),
                lane: text("lane"),
            }
        })
        .collect()
}

/// Flattens every detail record in `matches_dir`, in match-id order.
pub fn flatten_dir(matches_dir: &Path) -> Result<(Vec<StagingRow>, FlattenSummary)> {
    let mut summary = FlattenSummary::default();
    let mut rows = Vec::new();
    for match_id in detail_ids_in(matches_dir)? {
        let path = detail_path(matches_dir, &match_id);
        let detail = match fs::read(&path)
            .with_context(|| format!("read {}", path.display()))
            .and_then(|raw| {
                serde_json::from_slice::<Value>(&raw)
                    .with_context(|| format!("decode {}", path.display()))
            }) {
            Ok(v) => v,
            Err(err) => {
                warn!("skipping unreadable match file: {err:#}");
                summary.unreadable.push(match_id);
                continue;
            }
        };
        let match_rows = flatten_match(&match_id, &detail);
        summary.matches += 1;
        summary.rows += match_rows.len();
        rows.extend(match_rows);
    }
    Ok((rows, summary))
}

/// Text of a scalar cell. Null, blank strings and nested values are empty.
fn cell_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn scalar_cells() {
        assert_eq!(cell_text(&json!(12)), Some("12".to_string()));
        assert_eq!(cell_text(&json!(true)), Some("true".to_string()));
        assert_eq!(cell_text(&json!("")), None);
        assert_eq!(cell_text(&json!(null)), None);
        assert_eq!(cell_text(&json!({"a": 1})), None);
    }

    #[test]
    fn record_without_participants_yields_nothing() {
        assert!(flatten_match("M1", &json!({"info": {"gameDuration": 10}})).is_empty());
        assert!(flatten_match("M1", &json!({})).is_empty());
    }

    #[test]
    fn blank_summoner_name_falls_back_to_riot_id() {
        let detail = json!({"info": {"participants": [
            {"puuid": "p1", "summonerName": "", "riotIdGameName": "Riot Name"}
        ]}});
        let rows = flatten_match("M1", &detail);
        assert_eq!(rows[0].summoner_name.as_deref(), Some("Riot Name"));
    }
}
