//! Campaign index: on-disk records and runnable-campaign selection
//!
//! Campaigns are persisted by the orchestrator as `<id>.json` files under
//! `<workspace>/.nerd/campaigns/`. The runner only reads them. File
//! modification times stand in for `updated_at` when the record omits it.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Campaign lifecycle status as persisted in the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    /// In progress; the runner should resume it
    Active,
    /// Interrupted; resumable
    Paused,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
}

impl CampaignStatus {
    /// Whether the runner may start an orchestrator for this status.
    pub fn is_runnable(&self) -> bool {
        matches!(self, CampaignStatus::Active | CampaignStatus::Paused)
    }
}

/// One entry of the campaign index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignRecord {
    /// Campaign id (also the file stem)
    pub id: String,
    /// Persisted status
    pub status: CampaignStatus,
    /// Last update; file mtime when the record omits it
    pub updated_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawCampaign {
    id: String,
    status: CampaignStatus,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

/// The campaign directory under a workspace root.
pub fn campaigns_dir(workspace: &Path) -> PathBuf {
    workspace.join(".nerd").join("campaigns")
}

/// Read every parseable `*.json` record in `dir`. Unreadable or malformed
/// files are skipped with a warning; a missing directory yields an empty
/// index.
pub async fn scan_campaigns(dir: &Path) -> Result<Vec<CampaignRecord>> {
    let mut records = Vec::new();

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
        Err(e) => {
            return Err(crate::error::SupervisorError::CampaignIndex(format!(
                "{}: {}",
                dir.display(),
                e
            )));
        }
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }

        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable campaign file");
                continue;
            }
        };

        let raw: RawCampaign = match serde_json::from_str(&text) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "malformed campaign file");
                continue;
            }
        };

        let updated_at = match raw.updated_at {
            Some(t) => t,
            None => file_mtime(&path).await.unwrap_or_else(Utc::now),
        };

        records.push(CampaignRecord {
            id: raw.id,
            status: raw.status,
            updated_at,
        });
    }

    Ok(records)
}

async fn file_mtime(path: &Path) -> Option<DateTime<Utc>> {
    let metadata = tokio::fs::metadata(path).await.ok()?;
    let modified = metadata.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

/// Select the campaign the runner should resume: the most recently updated
/// runnable record, preferring `active` over `paused` among candidates whose
/// timestamps are within one second of the newest. Deterministic for any
/// directory contents (final tie-break is the id).
pub fn best_runnable(records: &[CampaignRecord]) -> Option<&CampaignRecord> {
    let runnable: Vec<&CampaignRecord> =
        records.iter().filter(|r| r.status.is_runnable()).collect();
    let newest = runnable.iter().map(|r| r.updated_at).max()?;

    runnable
        .into_iter()
        .filter(|r| newest - r.updated_at <= chrono::Duration::seconds(1))
        .min_by(|a, b| {
            let rank = |r: &CampaignRecord| match r.status {
                CampaignStatus::Active => 0,
                _ => 1,
            };
            rank(a)
                .cmp(&rank(b))
                .then(b.updated_at.cmp(&a.updated_at))
                .then(a.id.cmp(&b.id))
        })
}
