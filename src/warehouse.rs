//! Dimensional load of the staging table into SQLite.
//!
//! Stages run in referential order (summoners, champions, queues, matches,
//! participant facts) and each commits on its own. Every stage is an upsert,
//! so a load interrupted halfway is repaired by simply running it again.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, Transaction, params};
use tracing::{info, warn};

use crate::staging::{StagingRow, read_staging};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub source: PathBuf,
    pub rows_read: usize,
    pub summoners: usize,
    pub champions: usize,
    pub queues: usize,
    pub matches: usize,
    pub facts_written: usize,
    pub facts_dropped: usize,
    pub stale_facts_removed: usize,
}

/// A staging row with every derived and coerced value the warehouse stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantRecord {
    pub match_id: Option<String>,
    pub creation_ms: Option<i64>,
    pub game_creation: Option<String>,
    pub game_duration_sec: Option<i64>,
    pub queue_id: Option<i64>,
    pub game_version: Option<String>,
    pub platform: Option<String>,
    pub puuid: Option<String>,
    pub summoner_name: Option<String>,
    pub champion_id: Option<i64>,
    pub champion_name: Option<String>,
    pub team_id: Option<i64>,
    pub win: bool,
    pub kills: Option<i64>,
    pub deaths: Option<i64>,
    pub assists: Option<i64>,
    pub gold_earned: Option<i64>,
    pub damage_to_champs: Option<i64>,
    pub cs: i64,
    pub vision_score: Option<i64>,
    pub role: Option<String>,
    pub team_position: Option<String>,
    pub lane: Option<String>,
    pub time_played_sec: Option<i64>,
}

impl ParticipantRecord {
    pub fn from_staging(row: &StagingRow) -> Self {
        let creation_ms = parse_int(row.game_creation.as_deref());
        let game_duration_sec = parse_int(row.game_duration.as_deref());
        Self {
            match_id: non_blank(&row.match_id),
            creation_ms,
            game_creation: creation_ms.and_then(creation_timestamp),
            game_duration_sec,
            queue_id: parse_int(row.queue_id.as_deref()),
            game_version: row.game_version.clone(),
            platform: row.platform_id.clone(),
            puuid: non_blank(&row.participant_puuid),
            summoner_name: row.summoner_name.clone(),
            champion_id: parse_int(row.champion_id.as_deref()),
            champion_name: row.champion_name.clone(),
            team_id: parse_int(row.team_id.as_deref()),
            win: normalize_win(row.win.as_deref()),
            kills: parse_int(row.kills.as_deref()),
            deaths: parse_int(row.deaths.as_deref()),
            assists: parse_int(row.assists.as_deref()),
            gold_earned: parse_int(row.gold_earned.as_deref()),
            damage_to_champs: parse_int(row.total_damage_to_champions.as_deref()),
            cs: parse_int(row.total_minions_killed.as_deref()).unwrap_or(0),
            vision_score: parse_int(row.vision_score.as_deref()),
            role: row.role.clone(),
            team_position: row.team_position.clone(),
            lane: row.lane.clone(),
            time_played_sec: game_duration_sec,
        }
    }
}

pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create {}", parent.display()))?;
    }
    let conn =
        Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().context("open in-memory sqlite db")?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Enables foreign keys and creates the warehouse tables. Safe to rerun.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .context("enable foreign keys")?;
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS dim_summoner (
            summoner_id INTEGER PRIMARY KEY AUTOINCREMENT,
            puuid TEXT NOT NULL UNIQUE,
            summoner_name TEXT NULL,
            last_seen_at TEXT NULL
        );

        CREATE TABLE IF NOT EXISTS dim_champion (
            champion_id INTEGER PRIMARY KEY,
            champion_name TEXT NULL
        );

        CREATE TABLE IF NOT EXISTS dim_queue (
            queue_id INTEGER PRIMARY KEY,
            description TEXT NULL
        );

        CREATE TABLE IF NOT EXISTS dim_match (
            match_id TEXT PRIMARY KEY,
            game_creation TEXT NULL,
            game_duration_sec INTEGER NULL,
            queue_id INTEGER NULL REFERENCES dim_queue(queue_id),
            game_version TEXT NULL,
            platform TEXT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_dim_match_creation ON dim_match(game_creation);

        CREATE TABLE IF NOT EXISTS fact_participant (
            match_id TEXT NOT NULL REFERENCES dim_match(match_id),
            summoner_id INTEGER NOT NULL REFERENCES dim_summoner(summoner_id),
            champion_id INTEGER NULL REFERENCES dim_champion(champion_id),
            team_id INTEGER NULL,
            win INTEGER NOT NULL,
            kills INTEGER NULL,
            deaths INTEGER NULL,
            assists INTEGER NULL,
            gold_earned INTEGER NULL,
            damage_to_champs INTEGER NULL,
            cs INTEGER NULL,
            vision_score INTEGER NULL,
            role TEXT NULL,
            team_position TEXT NULL,
            lane TEXT NULL,
            time_played_sec INTEGER NULL,
            PRIMARY KEY (match_id, summoner_id)
        );
        CREATE INDEX IF NOT EXISTS idx_fact_participant_summoner ON fact_participant(summoner_id);
        CREATE INDEX IF NOT EXISTS idx_fact_participant_champion ON fact_participant(champion_id);

        CREATE TABLE IF NOT EXISTS load_runs (
            run_id INTEGER PRIMARY KEY AUTOINCREMENT,
            started_at TEXT NOT NULL,
            finished_at TEXT NULL,
            source TEXT NOT NULL,
            rows_read INTEGER NOT NULL,
            facts_written INTEGER NOT NULL,
            facts_dropped INTEGER NOT NULL
        );
        "#,
    )
    .context("create warehouse schema")?;
    Ok(())
}

/// Reads and validates the staging file, then loads it. Nothing is written
/// when the file is unreadable or lacks a required column.
pub fn load_staging_file(conn: &mut Connection, path: &Path) -> Result<LoadSummary> {
    let rows = read_staging(path)?;
    load_rows(conn, &rows, path)
}

pub fn load_rows(conn: &mut Connection, rows: &[StagingRow], source: &Path) -> Result<LoadSummary> {
    let records: Vec<ParticipantRecord> = rows.iter().map(ParticipantRecord::from_staging).collect();

    conn.execute(
        "INSERT INTO load_runs(started_at, finished_at, source, rows_read, facts_written, facts_dropped)
         VALUES (?1, NULL, ?2, ?3, 0, 0)",
        params![
            Utc::now().to_rfc3339(),
            source.display().to_string(),
            records.len() as i64
        ],
    )
    .context("insert load run")?;
    let run_id = conn.last_insert_rowid();

    let mut summary = LoadSummary {
        source: source.to_path_buf(),
        rows_read: records.len(),
        ..LoadSummary::default()
    };
    summary.summoners = upsert_summoners(conn, &records)?;
    summary.champions = upsert_champions(conn, &records)?;
    summary.queues = upsert_queues(conn, &records)?;
    summary.matches = upsert_matches(conn, &records)?;
    let facts = upsert_facts(conn, &records)?;
    summary.facts_written = facts.written;
    summary.facts_dropped = facts.dropped;
    summary.stale_facts_removed = facts.stale_removed;

    conn.execute(
        "UPDATE load_runs SET finished_at = ?1, facts_written = ?2, facts_dropped = ?3
         WHERE run_id = ?4",
        params![
            Utc::now().to_rfc3339(),
            summary.facts_written as i64,
            summary.facts_dropped as i64,
            run_id
        ],
    )
    .context("update load run")?;

    info!(
        summoners = summary.summoners,
        champions = summary.champions,
        queues = summary.queues,
        matches = summary.matches,
        facts = summary.facts_written,
        dropped = summary.facts_dropped,
        "warehouse load complete"
    );
    Ok(summary)
}

/// Newest observation per player wins; a missing creation time counts as oldest
/// and ties go to the later row.
fn upsert_summoners(conn: &mut Connection, records: &[ParticipantRecord]) -> Result<usize> {
    let mut order: Vec<&str> = Vec::new();
    let mut latest: HashMap<&str, &ParticipantRecord> = HashMap::new();
    for rec in records {
        let Some(puuid) = rec.puuid.as_deref() else {
            continue;
        };
        let newer = match latest.get(puuid) {
            Some(prev) => prev.creation_ms <= rec.creation_ms,
            None => {
                order.push(puuid);
                true
            }
        };
        if newer {
            latest.insert(puuid, rec);
        }
    }

    let tx = conn.transaction().context("begin summoner upsert")?;
    for puuid in &order {
        let rec = latest[puuid];
        tx.execute(
            r#"
            INSERT INTO dim_summoner (puuid, summoner_name, last_seen_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(puuid) DO UPDATE SET
                summoner_name = excluded.summoner_name,
                last_seen_at = excluded.last_seen_at
            "#,
            params![puuid, rec.summoner_name, rec.game_creation],
        )
        .context("upsert summoner")?;
    }
    tx.commit().context("commit summoner upsert")?;
    Ok(order.len())
}

fn upsert_champions(conn: &mut Connection, records: &[ParticipantRecord]) -> Result<usize> {
    let mut seen = HashSet::new();
    let tx = conn.transaction().context("begin champion upsert")?;
    for rec in records {
        let Some(champion_id) = rec.champion_id else {
            continue;
        };
        if !seen.insert(champion_id) {
            continue;
        }
        tx.execute(
            r#"
            INSERT INTO dim_champion (champion_id, champion_name)
            VALUES (?1, ?2)
            ON CONFLICT(champion_id) DO UPDATE SET
                champion_name = excluded.champion_name
            "#,
            params![champion_id, rec.champion_name],
        )
        .context("upsert champion")?;
    }
    tx.commit().context("commit champion upsert")?;
    Ok(seen.len())
}

fn upsert_queues(conn: &mut Connection, records: &[ParticipantRecord]) -> Result<usize> {
    let mut seen = HashSet::new();
    let tx = conn.transaction().context("begin queue upsert")?;
    for queue_id in records.iter().filter_map(|r| r.queue_id) {
        if !seen.insert(queue_id) {
            continue;
        }
        tx.execute(
            "INSERT INTO dim_queue (queue_id) VALUES (?1) ON CONFLICT(queue_id) DO NOTHING",
            params![queue_id],
        )
        .context("insert queue")?;
    }
    tx.commit().context("commit queue upsert")?;
    Ok(seen.len())
}

fn upsert_matches(conn: &mut Connection, records: &[ParticipantRecord]) -> Result<usize> {
    let mut seen = HashSet::new();
    let tx = conn.transaction().context("begin match upsert")?;
    for rec in records {
        let Some(match_id) = rec.match_id.as_deref() else {
            continue;
        };
        if !seen.insert(match_id) {
            continue;
        }
        tx.execute(
            r#"
            INSERT INTO dim_match (
                match_id, game_creation, game_duration_sec, queue_id, game_version, platform
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(match_id) DO UPDATE SET
                game_creation = excluded.game_creation,
                game_duration_sec = excluded.game_duration_sec,
                queue_id = excluded.queue_id,
                game_version = excluded.game_version,
                platform = excluded.platform
            "#,
            params![
                match_id,
                rec.game_creation,
                rec.game_duration_sec,
                rec.queue_id,
                rec.game_version,
                rec.platform
            ],
        )
        .context("upsert match")?;
    }
    tx.commit().context("commit match upsert")?;
    Ok(seen.len())
}

/// Opaque player id to warehouse surrogate key, as currently stored.
pub fn summoner_key_map(conn: &Connection) -> Result<HashMap<String, i64>> {
    let mut stmt = conn
        .prepare("SELECT puuid, summoner_id FROM dim_summoner")
        .context("prepare summoner key query")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
        .context("query summoner keys")?;
    let mut out = HashMap::new();
    for row in rows {
        let (puuid, id) = row.context("decode summoner key")?;
        out.insert(puuid, id);
    }
    Ok(out)
}

#[derive(Debug, Default)]
struct FactOutcome {
    written: usize,
    dropped: usize,
    stale_removed: usize,
}

/// Upserts facts keyed on (match, summoner), then removes rows of the same
/// matches that the staging set no longer contains. After this the facts of
/// every loaded match equal exactly what the staging rows derive.
fn upsert_facts(conn: &mut Connection, records: &[ParticipantRecord]) -> Result<FactOutcome> {
    // Re-read after the summoner stage so new players resolve.
    let keys = summoner_key_map(conn)?;
    let mut outcome = FactOutcome::default();
    let mut match_order: Vec<&str> = Vec::new();
    let mut kept: HashMap<&str, HashSet<i64>> = HashMap::new();

    let tx = conn.transaction().context("begin fact upsert")?;
    for rec in records {
        let Some(match_id) = rec.match_id.as_deref() else {
            outcome.dropped += 1;
            continue;
        };
        let kept_for_match = kept.entry(match_id).or_insert_with(|| {
            match_order.push(match_id);
            HashSet::new()
        });
        let Some(summoner_id) = rec.puuid.as_deref().and_then(|p| keys.get(p)).copied() else {
            warn!(
                match_id,
                puuid = rec.puuid.as_deref().unwrap_or(""),
                "dropping fact row with unresolved summoner"
            );
            outcome.dropped += 1;
            continue;
        };
        upsert_fact(&tx, match_id, summoner_id, rec)?;
        // A repeated (match, summoner) row overwrites the same fact.
        if kept_for_match.insert(summoner_id) {
            outcome.written += 1;
        }
    }

    for match_id in match_order {
        let keep = &kept[match_id];
        outcome.stale_removed += remove_stale_facts(&tx, match_id, keep)?;
    }
    tx.commit().context("commit fact upsert")?;

    if outcome.dropped > 0 {
        warn!("dropped {} fact rows that could not be resolved", outcome.dropped);
    }
    Ok(outcome)
}

fn upsert_fact(
    tx: &Transaction<'_>,
    match_id: &str,
    summoner_id: i64,
    rec: &ParticipantRecord,
) -> Result<()> {
    tx.execute(
        r#"
        INSERT INTO fact_participant (
            match_id, summoner_id, champion_id, team_id, win,
            kills, deaths, assists, gold_earned, damage_to_champs,
            cs, vision_score, role, team_position, lane, time_played_sec
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5,
            ?6, ?7, ?8, ?9, ?10,
            ?11, ?12, ?13, ?14, ?15, ?16
        )
        ON CONFLICT(match_id, summoner_id) DO UPDATE SET
            champion_id = excluded.champion_id,
            team_id = excluded.team_id,
            win = excluded.win,
            kills = excluded.kills,
            deaths = excluded.deaths,
            assists = excluded.assists,
            gold_earned = excluded.gold_earned,
            damage_to_champs = excluded.damage_to_champs,
            cs = excluded.cs,
            vision_score = excluded.vision_score,
            role = excluded.role,
            team_position = excluded.team_position,
            lane = excluded.lane,
            time_played_sec = excluded.time_played_sec
        "#,
        params![
            match_id,
            summoner_id,
            rec.champion_id,
            rec.team_id,
            i64::from(rec.win),
            rec.kills,
            rec.deaths,
            rec.assists,
            rec.gold_earned,
            rec.damage_to_champs,
            rec.cs,
            rec.vision_score,
            rec.role,
            rec.team_position,
            rec.lane,
            rec.time_played_sec,
        ],
    )
    .with_context(|| format!("upsert fact {match_id}/{summoner_id}"))?;
    Ok(())
}

fn remove_stale_facts(tx: &Transaction<'_>, match_id: &str, keep: &HashSet<i64>) -> Result<usize> {
    let existing: Vec<i64> = {
        let mut stmt = tx
            .prepare("SELECT summoner_id FROM fact_participant WHERE match_id = ?1")
            .context("prepare stale fact query")?;
        let rows = stmt
            .query_map(params![match_id], |row| row.get::<_, i64>(0))
            .context("query stale facts")?;
        let ids = rows
            .collect::<rusqlite::Result<Vec<i64>>>()
            .context("decode stale facts")?;
        ids
    };

    let mut removed = 0;
    for summoner_id in existing.into_iter().filter(|id| !keep.contains(id)) {
        removed += tx
            .execute(
                "DELETE FROM fact_participant WHERE match_id = ?1 AND summoner_id = ?2",
                params![match_id, summoner_id],
            )
            .context("delete stale fact")?;
    }
    Ok(removed)
}

/// Integer value of a cell. Integral and float text both count; anything else
/// is absent rather than zero.
pub fn parse_int(raw: Option<&str>) -> Option<i64> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Some(n);
    }
    let f = raw.parse::<f64>().ok().filter(|f| f.is_finite())?;
    if f < i64::MIN as f64 || f > i64::MAX as f64 {
        return None;
    }
    Some(f.trunc() as i64)
}

/// `true`, `1` and `win` in any case mean a win; everything else does not.
pub fn normalize_win(raw: Option<&str>) -> bool {
    raw.map(|v| v.trim().to_ascii_lowercase())
        .is_some_and(|v| matches!(v.as_str(), "true" | "1" | "win"))
}

/// UTC RFC 3339 timestamp (millisecond precision) of an epoch-millisecond value.
pub fn creation_timestamp(epoch_ms: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp_millis(epoch_ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, false))
}

fn non_blank(v: &Option<String>) -> Option<String> {
    v.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
