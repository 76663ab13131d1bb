use anyhow::{Context, Result};
use packsync_core::is_newer;
use serde::Deserialize;

use crate::fetch::fetch_text;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateCheck {
    UpToDate {
        current: String,
    },
    UpdateAvailable {
        current: String,
        latest: String,
        download_url: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct LatestRelease {
    pub tag_name: String,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ReleaseAsset {
    pub browser_download_url: String,
}

pub fn check_for_update(latest_release_url: &str) -> Result<UpdateCheck> {
    let body = fetch_text(latest_release_url)?;
    let release: LatestRelease =
        serde_json::from_str(&body).context("failed to parse latest release document")?;
    evaluate_release(env!("CARGO_PKG_VERSION"), &release)
}

pub(crate) fn evaluate_release(current: &str, release: &LatestRelease) -> Result<UpdateCheck> {
    let current_normalized = normalize_release_tag(current);
    let latest_normalized = normalize_release_tag(&release.tag_name);

    if is_newer(current_normalized, latest_normalized)
        .context("release version comparison aborted")?
    {
        Ok(UpdateCheck::UpdateAvailable {
            current: current.to_string(),
            latest: release.tag_name.clone(),
            download_url: release
                .assets
                .first()
                .map(|asset| asset.browser_download_url.clone()),
        })
    } else {
        Ok(UpdateCheck::UpToDate {
            current: current.to_string(),
        })
    }
}

pub(crate) fn normalize_release_tag(tag: &str) -> &str {
    tag.trim().trim_start_matches(['v', 'V'])
}
