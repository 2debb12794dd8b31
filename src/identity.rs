use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::RiotId;
use crate::rate_limit::Clock;
use crate::riot_api::{RiotApi, RiotTransport};

/// Account record as returned by the identity endpoint and kept in `puuid.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub puuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_line: Option<String>,
}

/// Looks the handle up once. Any non-success response aborts with the
/// upstream status and body.
pub fn resolve_account<T: RiotTransport, C: Clock>(
    api: &mut RiotApi<T, C>,
    riot_id: &RiotId,
) -> Result<Account> {
    let url = api
        .endpoints()
        .account_by_riot_id(&riot_id.game_name, &riot_id.tag_line)?;
    info!("resolving riot id {riot_id}");
    let resp = api.get(&url)?;
    if !resp.is_success() {
        return Err(resp.error_for(format!("account lookup for {riot_id}")).into());
    }
    let account: Account = resp.json().context("decode account response")?;
    Ok(account)
}

pub fn save_account(path: &Path, account: &Account) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    let json = serde_json::to_string_pretty(account).context("serialize account")?;
    fs::write(path, json).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

pub fn load_account(path: &Path) -> Result<Account> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid account json in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use governor::clock::FakeRelativeClock;
    use crate::riot_api::testing::{ScriptedTransport, scripted_api};

    fn riot_id() -> RiotId {
        RiotId {
            game_name: "Some Player".to_string(),
            tag_line: "EUW".to_string(),
        }
    }

    #[test]
    fn resolves_and_round_trips_through_file() {
        let clock = FakeRelativeClock::default();
        let mut transport = ScriptedTransport::default();
        transport.push(
            200,
            r#"{"puuid":"p-123","gameName":"Some Player","tagLine":"EUW"}"#,
        );
        let mut api = scripted_api(transport, &clock);

        let account = resolve_account(&mut api, &riot_id()).expect("resolves");
        assert_eq!(account.puuid, "p-123");
        assert!(api.transport().requested[0].ends_with("/by-riot-id/Some%20Player/EUW"));

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("raw").join("puuid.json");
        save_account(&path, &account).expect("save");
        assert_eq!(load_account(&path).expect("load"), account);
    }

    #[test]
    fn failure_surfaces_status_and_body() {
        let clock = FakeRelativeClock::default();
        let mut transport = ScriptedTransport::default();
        transport.push(403, r#"{"status":{"message":"Forbidden"}}"#);
        let mut api = scripted_api(transport, &clock);

        let err = resolve_account(&mut api, &riot_id()).expect_err("must fail");
        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::UpstreamStatus { status, body, .. }) => {
                assert_eq!(*status, 403);
                assert!(body.contains("Forbidden"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(api.transport().requested.len(), 1);
    }
}
