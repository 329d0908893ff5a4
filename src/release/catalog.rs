use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{
    StatusCode,
    blocking::Client,
    header::{ACCEPT, HeaderMap},
};
use serde::{Deserialize, Serialize};

use super::{
    ReleaseError,
    platform::{Platform, resolve_asset_name},
};

const CATALOG_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ReleaseAsset {
    pub name: String,
    pub size: u64,
    pub download_count: u64,
    pub url: String,
}

/// One published frp release.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ReleaseCatalogEntry {
    pub tag: String,
    pub published_at: DateTime<Utc>,
    pub prerelease: bool,
    pub assets: Vec<ReleaseAsset>,
    pub body: String,
}

impl ReleaseCatalogEntry {
    pub fn asset_for(&self, platform: Platform, arch: &str) -> Option<&ReleaseAsset> {
        let name = resolve_asset_name(&self.tag, platform, arch);
        self.assets.iter().find(|asset| asset.name == name)
    }
}

#[derive(Deserialize)]
struct GitHubRelease {
    tag_name: String,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    prerelease: bool,
    #[serde(default)]
    assets: Vec<GitHubAsset>,
    #[serde(default)]
    body: Option<String>,
}

#[derive(Deserialize)]
struct GitHubAsset {
    name: String,
    browser_download_url: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    download_count: u64,
}

impl From<GitHubRelease> for ReleaseCatalogEntry {
    fn from(release: GitHubRelease) -> Self {
        Self {
            tag: release.tag_name,
            published_at: release.published_at.unwrap_or_default(),
            prerelease: release.prerelease,
            assets: release
                .assets
                .into_iter()
                .map(|asset| ReleaseAsset {
                    name: asset.name,
                    size: asset.size,
                    download_count: asset.download_count,
                    url: asset.browser_download_url,
                })
                .collect(),
            body: release.body.unwrap_or_default(),
        }
    }
}

/// Maps a transport failure onto the release error taxonomy.
pub(crate) fn classify_transport(error: reqwest::Error) -> ReleaseError {
    if error.is_timeout() {
        ReleaseError::Timeout
    } else {
        ReleaseError::Network(error.to_string())
    }
}

/// `None` for success statuses. GitHub signals an exhausted quota with 429,
/// or with 403 and `x-ratelimit-remaining: 0`.
pub(crate) fn classify_status(status: StatusCode, headers: &HeaderMap) -> Option<ReleaseError> {
    if status.is_success() {
        return None;
    }
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
    };
    let exhausted = header("x-ratelimit-remaining").and_then(|value| value.parse::<u64>().ok()) == Some(0);
    if status == StatusCode::TOO_MANY_REQUESTS || (status == StatusCode::FORBIDDEN && exhausted) {
        let reset_at = header("x-ratelimit-reset")
            .and_then(|value| value.parse::<i64>().ok())
            .and_then(|seconds| DateTime::from_timestamp(seconds, 0));
        return Some(ReleaseError::RateLimited { reset_at });
    }
    Some(ReleaseError::Http {
        status: status.as_u16(),
    })
}

pub fn fetch_catalog(client: &Client, url: &str) -> Result<Vec<ReleaseCatalogEntry>, ReleaseError> {
    log::info!("[release] fetching releases from {url}");

    let response = client
        .get(url)
        .header(ACCEPT, "application/vnd.github+json")
        .timeout(CATALOG_TIMEOUT)
        .send()
        .map_err(classify_transport)?;

    if let Some(error) = classify_status(response.status(), response.headers()) {
        log::warn!("[release] catalog request failed: {error}");
        return Err(error);
    }

    let body = response.bytes().map_err(classify_transport)?;
    let releases: Vec<GitHubRelease> = serde_json::from_slice(&body)
        .map_err(|error| ReleaseError::Decode(error.to_string()))?;

    let entries: Vec<ReleaseCatalogEntry> = releases
        .into_iter()
        .filter(|release| !release.draft)
        .map(ReleaseCatalogEntry::from)
        .collect();
    log::info!("[release] found {} releases", entries.len());
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release::test_server::{serve_once, test_client};
    use reqwest::header::HeaderValue;

    const CATALOG: &str = r#"[
        {
            "tag_name": "v0.61.1",
            "published_at": "2024-12-30T08:00:00Z",
            "draft": false,
            "prerelease": false,
            "body": "notes",
            "assets": [
                {
                    "name": "frp_0.61.1_linux_amd64.tar.gz",
                    "size": 12345,
                    "download_count": 7,
                    "browser_download_url": "https://example.invalid/frp_0.61.1_linux_amd64.tar.gz"
                }
            ]
        },
        { "tag_name": "v0.62.0", "published_at": null, "draft": true }
    ]"#;

    #[test]
    fn test_catalog_is_decoded() {
        let url = serve_once(200, &[("Content-Type", "application/json")], CATALOG.as_bytes());
        let entries = fetch_catalog(&test_client(), &url).unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.tag, "v0.61.1");
        assert_eq!(entry.body, "notes");
        assert_eq!(entry.published_at.to_rfc3339(), "2024-12-30T08:00:00+00:00");
        let asset = entry.asset_for(Platform::Linux, "x86_64").unwrap();
        assert_eq!(asset.size, 12345);
        assert_eq!(asset.download_count, 7);
        assert!(entry.asset_for(Platform::Windows, "amd64").is_none());
    }

    #[test]
    fn test_rate_limit_is_classified() {
        let url = serve_once(
            403,
            &[("x-ratelimit-remaining", "0"), ("x-ratelimit-reset", "1700000000")],
            b"{}",
        );
        match fetch_catalog(&test_client(), &url) {
            Err(ReleaseError::RateLimited { reset_at }) => {
                assert_eq!(reset_at.map(|at| at.timestamp()), Some(1_700_000_000));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_status_classification() {
        let empty = HeaderMap::new();
        assert!(classify_status(StatusCode::OK, &empty).is_none());
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, &empty),
            Some(ReleaseError::RateLimited { reset_at: None })
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, &empty),
            Some(ReleaseError::Http { status: 403 })
        ));

        let mut remaining = HeaderMap::new();
        remaining.insert("x-ratelimit-remaining", HeaderValue::from_static("12"));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, &remaining),
            Some(ReleaseError::Http { status: 403 })
        ));
        assert!(matches!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR, &empty),
            Some(ReleaseError::Http { status: 500 })
        ));
    }

    #[test]
    fn test_unreachable_host_is_a_network_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);
        let result = fetch_catalog(&test_client(), &format!("http://{address}/releases"));
        assert!(matches!(result, Err(ReleaseError::Network(_))));
    }

    #[test]
    fn test_malformed_body_is_a_decode_error() {
        let url = serve_once(200, &[], b"not json");
        assert!(matches!(
            fetch_catalog(&test_client(), &url),
            Err(ReleaseError::Decode(_))
        ));
    }
}
