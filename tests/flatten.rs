use std::fs;
use std::path::PathBuf;

use lol_dw::flatten::{flatten_dir, flatten_match};
use lol_dw::staging::{read_staging, write_player_staging, write_staging};

fn fixture_path(name: &str) -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push(name);
    path
}

fn read_fixture(name: &str) -> String {
    fs::read_to_string(fixture_path(name)).expect("fixture file should be readable")
}

#[test]
fn flattens_one_row_per_participant() {
    let detail: serde_json::Value =
        serde_json::from_str(&read_fixture("match_detail.json")).expect("fixture should parse");
    let rows = flatten_match("EUW1_7000000001", &detail);
    assert_eq!(rows.len(), 2);

    let ahri = &rows[0];
    assert_eq!(ahri.match_id.as_deref(), Some("EUW1_7000000001"));
    assert_eq!(ahri.game_creation.as_deref(), Some("1700000000123"));
    assert_eq!(ahri.game_duration.as_deref(), Some("1800"));
    assert_eq!(ahri.queue_id.as_deref(), Some("420"));
    assert_eq!(ahri.platform_id.as_deref(), Some("EUW1"));
    assert_eq!(ahri.champion_name.as_deref(), Some("Ahri"));
    assert_eq!(ahri.win.as_deref(), Some("true"));
    assert_eq!(ahri.total_damage_to_champions.as_deref(), Some("24510"));
    assert_eq!(ahri.team_position.as_deref(), Some("MIDDLE"));
    assert_eq!(ahri.individual_position.as_deref(), Some("MIDDLE"));

    let garen = &rows[1];
    assert_eq!(garen.summoner_name.as_deref(), Some("TopDemacia"));
    assert_eq!(garen.win.as_deref(), Some("false"));
    assert_eq!(garen.total_minions_killed, None);
    assert_eq!(garen.vision_score, None);
}

#[test]
fn flattens_directory_into_staging_and_player_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let matches = dir.path().join("matches");
    fs::create_dir_all(&matches).expect("mkdir");
    fs::write(
        matches.join("EUW1_7000000001.json"),
        read_fixture("match_detail.json"),
    )
    .expect("copy fixture");
    fs::write(matches.join("EUW1_BROKEN.json"), "{not json").expect("write broken");
    fs::write(matches.join("EUW1_LATIN1.json"), [0xff, 0xfe, b'{']).expect("write non-utf8");

    let (rows, summary) = flatten_dir(&matches).expect("flatten");
    assert_eq!(summary.matches, 1);
    assert_eq!(summary.rows, 2);
    assert_eq!(
        summary.unreadable,
        vec!["EUW1_BROKEN".to_string(), "EUW1_LATIN1".to_string()]
    );

    let staging = dir.path().join("stg").join("stg_participants.csv");
    write_staging(&staging, &rows).expect("write staging");
    assert_eq!(read_staging(&staging).expect("read staging"), rows);

    let mine = dir.path().join("stg").join("stg_my_games.csv");
    let count = write_player_staging(&mine, &rows, "puuid-garen").expect("write player rows");
    assert_eq!(count, 1);
    let mine_rows = read_staging(&mine).expect("read player rows");
    assert_eq!(mine_rows.len(), 1);
    assert_eq!(mine_rows[0].champion_name.as_deref(), Some("Garen"));

    let header_all = fs::read_to_string(&staging).expect("raw");
    let header_mine = fs::read_to_string(&mine).expect("raw");
    assert_eq!(header_all.lines().next(), header_mine.lines().next());
}
