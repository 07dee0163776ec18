//! Default source: public GitHub releases, then the HORUS download host.

use super::github::GitHubSource;
use super::Download;
use crate::config::{DEFAULT_DOWNLOAD_HOST, DEFAULT_GITHUB_SOURCE};
use crate::error::{PluginError, PluginResult};
use crate::fetch::{Fetcher, HttpRequest};
use crate::identity::{Platform, PluginSpec};
use semver::Version;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackSource {
    github: GitHubSource,
    host: String,
    spec: PluginSpec,
}

impl FallbackSource {
    pub fn new(spec: &PluginSpec, github_token: Option<String>) -> PluginResult<Self> {
        let url = Url::parse(DEFAULT_GITHUB_SOURCE).map_err(|e| PluginError::InvalidDownloadUrl {
            url: DEFAULT_GITHUB_SOURCE.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            github: GitHubSource::from_url(&url, spec, github_token)?,
            host: DEFAULT_DOWNLOAD_HOST.to_string(),
            spec: PluginSpec::new(spec.kind, spec.name.clone()),
        })
    }

    /// Replace the secondary host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn url(&self) -> String {
        self.github.url()
    }

    /// Only the public registry knows the latest version.
    pub fn latest_version(&self, fetcher: &dyn Fetcher) -> PluginResult<Version> {
        self.github.latest_version(fetcher)
    }

    pub fn download(
        &self,
        version: &Version,
        platform: &Platform,
        fetcher: &dyn Fetcher,
    ) -> PluginResult<Download> {
        match self.github.download(version, platform, fetcher) {
            Ok(download) => return Ok(download),
            Err(e) => log::debug!(
                "{} not available from {}: {}; trying {}",
                self.spec.name,
                self.github.url(),
                e,
                self.host
            ),
        }

        let asset = self.spec.asset_name(version, platform);
        let url = format!(
            "{}/{}",
            self.host.trim_end_matches('/'),
            urlencoding::encode(&asset)
        );
        let response = fetcher.fetch(&HttpRequest::get(&url))?;
        if !response.is_success() {
            return Err(PluginError::http(response.status, url));
        }
        Ok(Download {
            content_length: response.content_length,
            body: response.body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::HttpResponse;
    use crate::identity::PluginKind;
    use std::io::Read;
    use std::sync::Mutex;

    fn linux() -> Platform {
        Platform {
            os: "linux",
            arch: "amd64",
        }
    }

    #[test]
    fn test_url_is_public_github() {
        let spec = PluginSpec::new(PluginKind::Resource, "test-plugin");
        let source = FallbackSource::new(&spec, None).unwrap();
        assert_eq!(
            source.url(),
            "github://api.github.com/softmata/plugin-test-plugin"
        );
    }

    #[test]
    fn test_falls_back_to_default_host() {
        let spec = PluginSpec::new(PluginKind::Resource, "mock");
        let source = FallbackSource::new(&spec, None)
            .unwrap()
            .with_host("https://get.example.com/releases/plugins/");
        let urls = Mutex::new(Vec::new());
        let fetcher = |req: &HttpRequest| -> PluginResult<HttpResponse> {
            urls.lock().unwrap().push(req.url.clone());
            if req.url.starts_with("https://api.github.com/") {
                return Ok(HttpResponse::status(404));
            }
            Ok(HttpResponse::ok("from host"))
        };

        let mut download = source
            .download(&Version::new(0, 4, 0), &linux(), &fetcher)
            .unwrap();
        let mut body = String::new();
        download.body.read_to_string(&mut body).unwrap();
        assert_eq!(body, "from host");
        assert_eq!(
            *urls.lock().unwrap(),
            vec![
                "https://api.github.com/repos/softmata/plugin-mock/releases/tags/v0.4.0".to_string(),
                "https://get.example.com/releases/plugins/plugin-resource-mock-v0.4.0-linux-amd64.tar.gz"
                    .to_string(),
            ]
        );
    }

    #[test]
    fn test_both_failing_reports_host_error() {
        let spec = PluginSpec::new(PluginKind::Resource, "mock");
        let source = FallbackSource::new(&spec, None).unwrap();
        let fetcher =
            |_: &HttpRequest| -> PluginResult<HttpResponse> { Ok(HttpResponse::status(500)) };
        let err = source
            .download(&Version::new(1, 0, 0), &linux(), &fetcher)
            .unwrap_err();
        match err {
            PluginError::Http { status, url } => {
                assert_eq!(status, 500);
                assert!(url.starts_with(DEFAULT_DOWNLOAD_HOST));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
