//! Templated HTTP(S) source.
//!
//! The URL may contain `${NAME}`, `${VERSION}`, `${OS}` and `${ARCH}`; the
//! asset file name is appended after substitution.

use super::Download;
use crate::error::{PluginError, PluginResult};
use crate::fetch::{Fetcher, HttpRequest};
use crate::identity::{Platform, PluginKind, PluginSpec};
use semver::Version;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSource {
    template: String,
    kind: PluginKind,
    name: String,
}

impl HttpSource {
    pub fn new(template: impl Into<String>, spec: &PluginSpec) -> Self {
        Self {
            template: template.into(),
            kind: spec.kind,
            name: spec.name.clone(),
        }
    }

    pub fn url(&self) -> String {
        self.template.clone()
    }

    /// Substitute placeholders and append the asset name.
    pub fn asset_url(&self, version: &Version, platform: &Platform) -> String {
        let version_str = version.to_string();
        let base = self
            .template
            .replace("${NAME}", &urlencoding::encode(&self.name))
            .replace("${VERSION}", &urlencoding::encode(&version_str))
            .replace("${OS}", &urlencoding::encode(platform.os))
            .replace("${ARCH}", &urlencoding::encode(platform.arch));

        let mut spec = PluginSpec::new(self.kind, self.name.clone());
        spec.version = Some(version.clone());
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            spec.asset_name(version, platform)
        )
    }

    pub fn latest_version(&self, _fetcher: &dyn Fetcher) -> PluginResult<Version> {
        Err(PluginError::LatestUnsupported)
    }

    pub fn download(
        &self,
        version: &Version,
        platform: &Platform,
        fetcher: &dyn Fetcher,
    ) -> PluginResult<Download> {
        let url = self.asset_url(version, platform);
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
