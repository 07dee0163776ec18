//! GitHub releases source (`github://host/org[/repo]`).

use super::Download;
use crate::error::{PluginError, PluginResult};
use crate::fetch::{Fetcher, HttpRequest, HttpResponse};
use crate::identity::{Platform, PluginKind, PluginSpec};
use crate::version::parse_tolerant;
use indicatif::HumanDuration;
use semver::Version;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

#[derive(Debug, Deserialize)]
struct Release {
    #[serde(default)]
    tag_name: Option<String>,
    #[serde(default)]
    assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Deserialize)]
struct ReleaseAsset {
    url: String,
    name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubSource {
    host: String,
    org: String,
    repo: String,
    token: Option<String>,
    kind: PluginKind,
    name: String,
}

impl GitHubSource {
    /// Build from `github://host/org[/repo]`; the repo defaults to `plugin-<name>`.
    pub fn from_url(url: &Url, spec: &PluginSpec, token: Option<String>) -> PluginResult<Self> {
        let invalid = |message: &str| PluginError::InvalidDownloadUrl {
            url: url.to_string(),
            message: message.to_string(),
        };

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid("missing host"))?;
        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|p| !p.is_empty()).collect())
            .unwrap_or_default();

        let (org, repo) = match segments.as_slice() {
            [org] => (org.to_string(), format!("plugin-{}", spec.name)),
            [org, repo] => (org.to_string(), repo.to_string()),
            [] => return Err(invalid("missing organization")),
            _ => return Err(invalid("expected github://host/org[/repo]")),
        };

        Ok(Self {
            host: host.to_string(),
            org,
            repo,
            token,
            kind: spec.kind,
            name: spec.name.clone(),
        })
    }

    pub fn url(&self) -> String {
        format!("github://{}/{}/{}", self.host, self.org, self.repo)
    }

    fn releases_url(&self) -> String {
        format!(
            "https://{}/repos/{}/{}/releases",
            self.host, self.org, self.repo
        )
    }

    pub fn latest_version(&self, fetcher: &dyn Fetcher) -> PluginResult<Version> {
        let url = format!("{}/latest", self.releases_url());
        let release = self.release(fetcher, &url)?;
        let tag = release
            .tag_name
            .ok_or_else(|| PluginError::malformed(&url, "release has no tag_name"))?;
        parse_tolerant(&tag)
    }

    pub fn download(
        &self,
        version: &Version,
        platform: &Platform,
        fetcher: &dyn Fetcher,
    ) -> PluginResult<Download> {
        let mut spec = PluginSpec::new(self.kind, self.name.clone());
        spec.version = Some(version.clone());
        let asset_name = spec.asset_name(version, platform);

        let url = format!("{}/tags/v{}", self.releases_url(), version);
        let release = self.release(fetcher, &url)?;
        let asset = release
            .assets
            .iter()
            .find(|a| a.name == asset_name)
            .ok_or_else(|| PluginError::AssetNotFound {
                asset: asset_name.clone(),
                url: url.clone(),
            })?;

        log::debug!("downloading {} from {}", asset_name, asset.url);
        let response = self.get(fetcher, &asset.url, "application/octet-stream")?;
        Ok(Download {
            content_length: response.content_length,
            body: response.body,
        })
    }

    fn release(&self, fetcher: &dyn Fetcher, url: &str) -> PluginResult<Release> {
        let body = self.get(fetcher, url, "application/json")?.text(url)?;
        serde_json::from_str(&body).map_err(|e| PluginError::malformed(url, e))
    }

    /// GET with the token if one is configured.
    ///
    /// A token that is refused (401, or 403 without rate limiting) is dropped
    /// and the request repeated anonymously; public releases stay reachable
    /// with a stale token.
    fn get(&self, fetcher: &dyn Fetcher, url: &str, accept: &str) -> PluginResult<HttpResponse> {
        let mut request = HttpRequest::get(url).header("Accept", accept);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("token {}", token));
        }

        let response = fetcher.fetch(&request)?;
        if response.is_success() {
            return Ok(response);
        }

        let refused_token = self.token.is_some()
            && (response.status == 401 || (response.status == 403 && !is_rate_limited(&response)));
        if !refused_token {
            return Err(self.status_error(url, &response, self.token.is_some()));
        }

        log::debug!(
            "GitHub refused token for {} ({}), retrying anonymously",
            url,
            response.status
        );
        let response = fetcher.fetch(&request.without_header("Authorization"))?;
        if response.is_success() {
            return Ok(response);
        }
        Err(self.status_error(url, &response, false))
    }

    fn status_error(&self, url: &str, response: &HttpResponse, had_token: bool) -> PluginError {
        match response.status {
            403 if is_rate_limited(response) => PluginError::RateLimited {
                url: url.to_string(),
                retry_after: retry_after(response),
            },
            404 if !had_token => PluginError::PrivateRepository {
                url: url.to_string(),
            },
            status => PluginError::http(status, url),
        }
    }
}

fn is_rate_limited(response: &HttpResponse) -> bool {
    response.header("x-ratelimit-remaining") == Some("0")
}

fn retry_after(response: &HttpResponse) -> String {
    let reset = response
        .header("x-ratelimit-reset")
        .and_then(|v| v.parse::<i64>().ok());
    match reset {
        Some(reset) => {
            let wait = (reset - chrono::Utc::now().timestamp()).max(0) as u64;
            HumanDuration(Duration::from_secs(wait)).to_string()
        }
        None => "an hour".to_string(),
    }
}
