//! GitLab releases source (`gitlab://host/<project-id>`).

use super::Download;
use crate::error::{PluginError, PluginResult};
use crate::fetch::{Fetcher, HttpRequest, HttpResponse};
use crate::identity::{Platform, PluginKind, PluginSpec};
use crate::version::parse_tolerant;
use semver::Version;
use serde::Deserialize;
use url::Url;

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitLabSource {
    host: String,
    project: String,
    token: Option<String>,
    kind: PluginKind,
    name: String,
}

impl GitLabSource {
    pub fn from_url(url: &Url, spec: &PluginSpec, token: Option<String>) -> PluginResult<Self> {
        let invalid = |message: &str| PluginError::InvalidDownloadUrl {
            url: url.to_string(),
            message: message.to_string(),
        };

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid("missing host"))?;
        let project = url
            .path()
            .trim_matches('/')
            .to_string();
        if project.is_empty() {
            return Err(invalid("missing project id"));
        }

        Ok(Self {
            host: host.to_string(),
            project,
            token,
            kind: spec.kind,
            name: spec.name.clone(),
        })
    }

    pub fn url(&self) -> String {
        format!("gitlab://{}/{}", self.host, self.project)
    }

    fn releases_url(&self) -> String {
        format!(
            "https://{}/api/v4/projects/{}/releases",
            self.host,
            urlencoding::encode(&self.project)
        )
    }

    pub fn latest_version(&self, fetcher: &dyn Fetcher) -> PluginResult<Version> {
        let url = format!("{}/permalink/latest", self.releases_url());
        let body = self.get(fetcher, &url, "application/json")?.text(&url)?;
        let release: Release = serde_json::from_str(&body).map_err(|e| PluginError::malformed(&url, e))?;
        parse_tolerant(&release.tag_name)
    }

    pub fn download(
        &self,
        version: &Version,
        platform: &Platform,
        fetcher: &dyn Fetcher,
    ) -> PluginResult<Download> {
        let mut spec = PluginSpec::new(self.kind, self.name.clone());
        spec.version = Some(version.clone());
        let asset = spec.asset_name(version, platform);

        let url = format!("{}/v{}/downloads/{}", self.releases_url(), version, asset);
        let response = self.get(fetcher, &url, "application/octet-stream")?;
        Ok(Download {
            content_length: response.content_length,
            body: response.body,
        })
    }

    fn get(&self, fetcher: &dyn Fetcher, url: &str, accept: &str) -> PluginResult<HttpResponse> {
        let mut request = HttpRequest::get(url).header("Accept", accept);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }
        let response = fetcher.fetch(&request)?;
        if !response.is_success() {
            return Err(PluginError::http(response.status, url));
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn source(token: Option<&str>) -> GitLabSource {
        let url = Url::parse("gitlab://gitlab.com/278964").unwrap();
        let spec = PluginSpec::new(PluginKind::Resource, "mock-gitlab");
        GitLabSource::from_url(&url, &spec, token.map(String::from)).unwrap()
    }

    #[test]
    fn test_url_round_trip() {
        assert_eq!(source(None).url(), "gitlab://gitlab.com/278964");
    }

    #[test]
    fn test_missing_project() {
        let url = Url::parse("gitlab://gitlab.com/").unwrap();
        let spec = PluginSpec::new(PluginKind::Resource, "x");
        assert!(GitLabSource::from_url(&url, &spec, None).is_err());
    }

    #[test]
    fn test_latest_version() {
        let fetcher = |req: &HttpRequest| -> PluginResult<HttpResponse> {
            assert_eq!(
                req.url,
                "https://gitlab.com/api/v4/projects/278964/releases/permalink/latest"
            );
            assert_eq!(req.header_value("Authorization"), Some("Bearer secret"));
            assert_eq!(req.header_value("Accept"), Some("application/json"));
            Ok(HttpResponse::ok(r#"{"tag_name": "v1.23"}"#))
        };
        let version = source(Some("secret")).latest_version(&fetcher).unwrap();
        assert_eq!(version, Version::new(1, 23, 0));
    }

    #[test]
    fn test_download() {
        let fetcher = |req: &HttpRequest| -> PluginResult<HttpResponse> {
            assert_eq!(
                req.url,
                "https://gitlab.com/api/v4/projects/278964/releases/v1.23.0/downloads/plugin-resource-mock-gitlab-v1.23.0-windows-arm64.tar.gz"
            );
            assert_eq!(req.header_value("Accept"), Some("application/octet-stream"));
            Ok(HttpResponse::ok("gz"))
        };
        let platform = Platform {
            os: "windows",
            arch: "arm64",
        };
        let mut download = source(None)
            .download(&Version::new(1, 23, 0), &platform, &fetcher)
            .unwrap();
        let mut body = Vec::new();
        download.body.read_to_end(&mut body).unwrap();
        assert_eq!(body, b"gz");
    }

    #[test]
    fn test_not_found_is_rejected() {
        let fetcher =
            |_: &HttpRequest| -> PluginResult<HttpResponse> { Ok(HttpResponse::status(404)) };
        let err = source(None).latest_version(&fetcher).unwrap_err();
        assert_eq!(err.class(), crate::error::ErrorClass::Rejected);
    }
}
