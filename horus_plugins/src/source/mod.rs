//! Where plugin archives come from.
//!
//! [`Source::resolve`] picks a strategy for a [`PluginSpec`]:
//! 1. the spec's explicit download URL, else the first matching download URL override
//! 2. otherwise the default [`FallbackSource`]
//! 3. if the spec carries checksums, the result is wrapped in [`Source::Checksum`]

pub mod checksum;
pub mod fallback;
pub mod github;
pub mod gitlab;
pub mod http;

pub use checksum::ChecksumReader;
pub use fallback::FallbackSource;
pub use github::GitHubSource;
pub use gitlab::GitLabSource;
pub use http::HttpSource;

use crate::config::PluginConfig;
use crate::error::{PluginError, PluginResult};
use crate::fetch::Fetcher;
use crate::identity::{Platform, PluginSpec};
use semver::Version;
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use url::Url;

/// An open archive stream.
pub struct Download {
    pub body: Box<dyn Read + Send>,
    /// Declared size, when the server sent one
    pub content_length: Option<u64>,
}

impl fmt::Debug for Download {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Download")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    GitHub(GitHubSource),
    GitLab(GitLabSource),
    Http(HttpSource),
    Fallback(FallbackSource),
    /// Any of the above, with sha256 digests keyed by `<os>-<arch>`
    Checksum(Box<Source>, HashMap<String, Vec<u8>>),
}

impl Source {
    pub fn resolve(spec: &PluginSpec, config: &PluginConfig) -> PluginResult<Self> {
        let explicit = spec
            .download_url
            .clone()
            .filter(|u| !u.is_empty())
            .or_else(|| config.override_url(&spec.name));

        let base = match explicit {
            Some(url) => Self::from_url(&url, spec, config)?,
            None => Source::Fallback(FallbackSource::new(spec, config.github_token.clone())?),
        };
        log::debug!("plugin {} resolved to source {}", spec.label(), base.url());

        if spec.checksums.is_empty() {
            Ok(base)
        } else {
            Ok(Source::Checksum(Box::new(base), spec.checksums.clone()))
        }
    }

    fn from_url(raw: &str, spec: &PluginSpec, config: &PluginConfig) -> PluginResult<Self> {
        let url = Url::parse(raw).map_err(|e| PluginError::InvalidDownloadUrl {
            url: raw.to_string(),
            message: e.to_string(),
        })?;
        match url.scheme() {
            "github" => Ok(Source::GitHub(GitHubSource::from_url(
                &url,
                spec,
                config.github_token.clone(),
            )?)),
            "gitlab" => Ok(Source::GitLab(GitLabSource::from_url(
                &url,
                spec,
                config.gitlab_token.clone(),
            )?)),
            "http" | "https" => Ok(Source::Http(HttpSource::new(raw, spec))),
            other => Err(PluginError::UnknownScheme(other.to_string())),
        }
    }

    /// Human-readable location, without the checksum wrapper.
    pub fn url(&self) -> String {
        match self {
            Source::GitHub(s) => s.url(),
            Source::GitLab(s) => s.url(),
            Source::Http(s) => s.url(),
            Source::Fallback(s) => s.url(),
            Source::Checksum(inner, _) => inner.url(),
        }
    }

    pub fn latest_version(&self, fetcher: &dyn Fetcher) -> PluginResult<Version> {
        match self {
            Source::GitHub(s) => s.latest_version(fetcher),
            Source::GitLab(s) => s.latest_version(fetcher),
            Source::Http(s) => s.latest_version(fetcher),
            Source::Fallback(s) => s.latest_version(fetcher),
            Source::Checksum(inner, _) => inner.latest_version(fetcher),
        }
    }

    pub fn download(
        &self,
        version: &Version,
        platform: &Platform,
        fetcher: &dyn Fetcher,
    ) -> PluginResult<Download> {
        match self {
            Source::GitHub(s) => s.download(version, platform, fetcher),
            Source::GitLab(s) => s.download(version, platform, fetcher),
            Source::Http(s) => s.download(version, platform, fetcher),
            Source::Fallback(s) => s.download(version, platform, fetcher),
            Source::Checksum(inner, checksums) => {
                let download = inner.download(version, platform, fetcher)?;
                match checksums.get(&platform.key()) {
                    Some(expected) => Ok(Download {
                        body: Box::new(ChecksumReader::new(download.body, expected.clone())),
                        content_length: download.content_length,
                    }),
                    None => {
                        log::debug!("no checksum for {}, skipping verification", platform.key());
                        Ok(download)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_download_overrides;
    use crate::fetch::{HttpRequest, HttpResponse};
    use crate::identity::PluginKind;
    use sha2::{Digest, Sha256};

    fn spec() -> PluginSpec {
        PluginSpec::new(PluginKind::Resource, "test-plugin")
    }

    fn config() -> PluginConfig {
        PluginConfig::new("/tmp/plugins")
    }

    #[test]
    fn test_explicit_urls_pick_variant() {
        let cases = [
            ("https://example.com/test-plugin", "https://example.com/test-plugin"),
            ("github://api.github.com/owner/repo", "github://api.github.com/owner/repo"),
            ("gitlab://mygitlab.example.com/proj1", "gitlab://mygitlab.example.com/proj1"),
        ];
        for (input, expected) in cases {
            let source = Source::resolve(&spec().with_download_url(input), &config()).unwrap();
            assert_eq!(source.url(), expected);
        }

        let source = Source::resolve(&spec().with_download_url("https://x.io"), &config()).unwrap();
        assert!(matches!(source, Source::Http(_)));
        let source =
            Source::resolve(&spec().with_download_url("gitlab://x.io/1"), &config()).unwrap();
        assert!(matches!(source, Source::GitLab(_)));
    }

    #[test]
    fn test_default_is_fallback() {
        let source = Source::resolve(&spec(), &config()).unwrap();
        assert!(matches!(source, Source::Fallback(_)));
        assert_eq!(
            source.url(),
            "github://api.github.com/softmata/plugin-test-plugin"
        );
    }

    #[test]
    fn test_override_applies_without_explicit_url() {
        let overrides =
            parse_download_overrides("test-plugin=github://api.github.com/test-org/test-plugin")
                .unwrap();
        let config = config().with_download_overrides(overrides);

        let source = Source::resolve(&spec(), &config).unwrap();
        assert!(matches!(source, Source::GitHub(_)));
        assert_eq!(source.url(), "github://api.github.com/test-org/test-plugin");

        // an explicit URL wins over overrides
        let source =
            Source::resolve(&spec().with_download_url("https://example.com"), &config).unwrap();
        assert!(matches!(source, Source::Http(_)));
    }

    #[test]
    fn test_checksums_wrap_source() {
        let checksums = HashMap::from([("checksum1".to_string(), b"checksum2".to_vec())]);
        let source = Source::resolve(&spec().with_checksums(checksums), &config()).unwrap();
        match &source {
            Source::Checksum(inner, _) => assert!(matches!(**inner, Source::Fallback(_))),
            other => panic!("expected checksum source, got {other:?}"),
        }
        assert_eq!(
            source.url(),
            "github://api.github.com/softmata/plugin-test-plugin"
        );
    }

    #[test]
    fn test_bad_urls() {
        let err = Source::resolve(&spec().with_download_url("://invalid-url"), &config()).unwrap_err();
        assert!(matches!(err, PluginError::InvalidDownloadUrl { .. }));

        let err = Source::resolve(
            &spec().with_download_url("unknown://example.com/plugin"),
            &config(),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "unknown plugin source scheme: unknown");
    }

    #[test]
    fn test_checksum_skipped_for_unlisted_platform() {
        let checksums = HashMap::from([("darwin-arm64".to_string(), vec![0u8; 32])]);
        let spec = spec()
            .with_download_url("https://example.com")
            .with_checksums(checksums);
        let source = Source::resolve(&spec, &config()).unwrap();
        let fetcher =
            |_: &HttpRequest| -> PluginResult<HttpResponse> { Ok(HttpResponse::ok("data")) };
        let platform = Platform {
            os: "linux",
            arch: "amd64",
        };

        let mut download = source
            .download(&Version::new(1, 0, 0), &platform, &fetcher)
            .unwrap();
        let mut body = Vec::new();
        download.body.read_to_end(&mut body).unwrap();
        assert_eq!(body, b"data");
    }

    #[test]
    fn test_checksum_enforced_for_listed_platform() {
        let good = Sha256::digest(b"data").to_vec();
        let platform = Platform {
            os: "linux",
            arch: "amd64",
        };
        let fetcher =
            |_: &HttpRequest| -> PluginResult<HttpResponse> { Ok(HttpResponse::ok("data")) };

        let ok_spec = spec()
            .with_download_url("https://example.com")
            .with_checksums(HashMap::from([(platform.key(), good)]));
        let mut download = Source::resolve(&ok_spec, &config())
            .unwrap()
            .download(&Version::new(1, 0, 0), &platform, &fetcher)
            .unwrap();
        let mut body = Vec::new();
        download.body.read_to_end(&mut body).unwrap();

        let bad_spec = ok_spec.with_checksums(HashMap::from([(platform.key(), vec![1u8; 32])]));
        let mut download = Source::resolve(&bad_spec, &config())
            .unwrap()
            .download(&Version::new(1, 0, 0), &platform, &fetcher)
            .unwrap();
        let err = download.body.read_to_end(&mut Vec::new()).unwrap_err();
        assert!(matches!(
            PluginError::from_read(err),
            PluginError::ChecksumMismatch { .. }
        ));
    }
}
