use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::manifest::{Manifest, detail_path};
use crate::rate_limit::Clock;
use crate::riot_api::{RiotApi, RiotTransport};

/// Why one match id was left out of a fetch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    Status(u16),
    Transport(String),
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status(status) => write!(f, "http {status}"),
            Self::Transport(err) => write!(f, "transport error: {err}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub saved: usize,
    pub skipped: usize,
    pub failed: Vec<(String, FetchFailure)>,
}

/// Downloads the detail record of every id not yet in the manifest.
///
/// Bodies are written verbatim to `<matches_dir>/<id>.json`. A failed id is
/// logged and left out, whether upstream answered with an error status or the
/// request never completed; it does not stop the batch.
pub fn fetch_match_details<T: RiotTransport, C: Clock>(
    api: &mut RiotApi<T, C>,
    match_ids: &[String],
    matches_dir: &Path,
    manifest: &mut Manifest,
) -> Result<FetchSummary> {
    fs::create_dir_all(matches_dir)
        .with_context(|| format!("create {}", matches_dir.display()))?;

    let total = match_ids.len();
    let mut summary = FetchSummary::default();
    for (idx, match_id) in match_ids.iter().enumerate() {
        let pos = idx + 1;
        if manifest.contains(match_id) {
            summary.skipped += 1;
            continue;
        }

        let url = api.endpoints().match_detail(match_id);
        let resp = match api.get(&url) {
            Ok(resp) => resp,
            Err(err) => {
                warn!("[{pos}/{total}] failed {match_id}: {err:#}");
                summary
                    .failed
                    .push((match_id.clone(), FetchFailure::Transport(format!("{err:#}"))));
                continue;
            }
        };
        if !resp.is_success() {
            let preview: String = resp.body.chars().take(200).collect();
            warn!("[{pos}/{total}] failed {match_id}: {} {preview}", resp.status);
            summary
                .failed
                .push((match_id.clone(), FetchFailure::Status(resp.status)));
            continue;
        }

        let out_path = detail_path(matches_dir, match_id);
        fs::write(&out_path, &resp.body)
            .with_context(|| format!("write {}", out_path.display()))?;
        manifest.mark_completed(match_id)?;
        summary.saved += 1;
        info!("[{pos}/{total}] saved {match_id}");
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use governor::clock::FakeRelativeClock;

    use crate::rate_limit::elapsed;
    use crate::riot_api::testing::{ScriptedTransport, scripted_api};

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn saves_bodies_verbatim_and_skips_completed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let matches = dir.path().join("matches");
        fs::create_dir_all(&matches).expect("mkdir");
        fs::write(detail_path(&matches, "M1"), "{\"old\":true}").expect("seed");
        let mut manifest =
            Manifest::load(&dir.path().join("manifest.json"), &matches).expect("manifest");

        let clock = FakeRelativeClock::default();
        let mut transport = ScriptedTransport::default();
        transport.push(200, "{\"info\": {\"gameDuration\": 1800}}");
        let mut api = scripted_api(transport, &clock);

        let summary = fetch_match_details(&mut api, &ids(&["M1", "M2"]), &matches, &mut manifest)
            .expect("fetch");
        assert_eq!(summary.saved, 1);
        assert_eq!(summary.skipped, 1);
        assert!(summary.failed.is_empty());
        assert_eq!(api.transport().requested.len(), 1);
        assert!(api.transport().requested[0].ends_with("/matches/M2"));

        let body = fs::read_to_string(detail_path(&matches, "M2")).expect("saved");
        assert_eq!(body, "{\"info\": {\"gameDuration\": 1800}}");
        assert!(manifest.contains("M2"));
    }

    #[test]
    fn failed_match_does_not_abort_batch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let matches = dir.path().join("matches");
        let mut manifest = Manifest::empty(dir.path().join("manifest.json"));

        let clock = FakeRelativeClock::default();
        let mut transport = ScriptedTransport::default();
        transport.push(404, "missing");
        transport.push(200, "{}");
        let mut api = scripted_api(transport, &clock);

        let summary = fetch_match_details(&mut api, &ids(&["BAD", "GOOD"]), &matches, &mut manifest)
            .expect("fetch");
        assert_eq!(summary.saved, 1);
        assert_eq!(
            summary.failed,
            vec![("BAD".to_string(), FetchFailure::Status(404))]
        );
        assert!(!detail_path(&matches, "BAD").exists());
        assert!(!manifest.contains("BAD"));
        assert!(manifest.contains("GOOD"));
    }

    #[test]
    fn rate_limited_fetch_is_retried_then_saved() {
        let dir = tempfile::tempdir().expect("tempdir");
        let matches = dir.path().join("matches");
        let mut manifest = Manifest::empty(dir.path().join("manifest.json"));

        let clock = FakeRelativeClock::default();
        let mut transport = ScriptedTransport::default();
        transport.push_rate_limited(Some(3));
        transport.push(200, "{}");
        let mut api = scripted_api(transport, &clock);

        let summary =
            fetch_match_details(&mut api, &ids(&["M1"]), &matches, &mut manifest).expect("fetch");
        assert_eq!(summary.saved, 1);
        assert_eq!(elapsed(&clock), std::time::Duration::from_secs(3));
    }

    #[test]
    fn transport_error_skips_match_and_continues() {
        let dir = tempfile::tempdir().expect("tempdir");
        let matches = dir.path().join("matches");
        let mut manifest = Manifest::empty(dir.path().join("manifest.json"));

        let clock = FakeRelativeClock::default();
        let mut transport = ScriptedTransport::default();
        transport.push_transport_error("connection reset by peer");
        transport.push(200, "{}");
        let mut api = scripted_api(transport, &clock);

        let summary = fetch_match_details(&mut api, &ids(&["RESET", "GOOD"]), &matches, &mut manifest)
            .expect("fetch");
        assert_eq!(summary.saved, 1);
        assert_eq!(
            summary.failed,
            vec![(
                "RESET".to_string(),
                FetchFailure::Transport("connection reset by peer".to_string())
            )]
        );
        assert!(!detail_path(&matches, "RESET").exists());
        assert!(!manifest.contains("RESET"));
        assert!(manifest.contains("GOOD"));
    }
}
