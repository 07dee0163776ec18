//! Centralized configuration for the plugin engine.
//!
//! Defaults live here as constants. [`PluginConfig::from_env`] reads the
//! environment once at startup; everything downstream takes the struct.

use crate::error::{PluginError, PluginResult};
use crate::paths;
use regex::Regex;
use std::path::PathBuf;
use std::time::Duration;

/// Public GitHub organization holding HORUS plugin releases.
pub const DEFAULT_GITHUB_SOURCE: &str = "github://api.github.com/softmata";

/// Host tried when the public GitHub release is unavailable.
pub const DEFAULT_DOWNLOAD_HOST: &str = "https://get.softmata.com/releases/plugins";

// === Environment Variables ===

/// Set to any value to skip `$PATH` lookups for non-bundled plugins.
pub const IGNORE_AMBIENT_PLUGINS_ENV: &str = "HORUS_IGNORE_AMBIENT_PLUGINS";

/// Set to any value to select cached plugins with the legacy algorithm.
pub const LEGACY_PLUGIN_SEARCH_ENV: &str = "HORUS_ENABLE_LEGACY_PLUGIN_SEARCH";

/// `regexp1=URL1,regexp2=URL2` mapping plugin names to alternate sources.
pub const DOWNLOAD_URL_OVERRIDES_ENV: &str = "HORUS_PLUGIN_DOWNLOAD_URL_OVERRIDES";

/// Overrides the default plugin cache (`~/.horus/plugins`).
pub const PLUGIN_DIR_ENV: &str = "HORUS_PLUGIN_DIR";

pub const GITHUB_TOKEN_ENV: &str = "GITHUB_TOKEN";
pub const GITLAB_TOKEN_ENV: &str = "GITLAB_TOKEN";

// === Download Constants ===

/// Total attempts per download, including the first.
pub const DOWNLOAD_MAX_ATTEMPTS: u32 = 5;

/// Delay before the first retry; doubles after each attempt.
pub const DOWNLOAD_INITIAL_DELAY: Duration = Duration::from_millis(80);

/// HTTP request timeout in seconds.
pub const HTTP_TIMEOUT_SECS: u64 = 300;

// === File Name Constants ===

/// Optional manifest inside an installed plugin declaring its runtime.
pub const PLUGIN_MANIFEST: &str = "plugin.yaml";

/// A plugin-name pattern routed to an alternate download URL.
#[derive(Debug, Clone)]
pub struct DownloadOverride {
    pub pattern: Regex,
    /// May reference captures as `$0`, `$1` or `${name}`
    pub url: String,
}

impl DownloadOverride {
    /// The expanded URL if `plugin_name` matches.
    pub fn apply(&self, plugin_name: &str) -> Option<String> {
        let caps = self.pattern.captures(plugin_name)?;
        let mut url = String::new();
        caps.expand(&self.url, &mut url);
        Some(url)
    }
}

/// Parse `regexp1=URL1,regexp2=URL2`.
pub fn parse_download_overrides(input: &str) -> PluginResult<Vec<DownloadOverride>> {
    if input.is_empty() {
        return Ok(Vec::new());
    }

    let mut overrides = Vec::new();
    for pair in input.split(',') {
        let (pattern, url) = pair
            .split_once('=')
            .ok_or_else(|| PluginError::InvalidOverrides(input.to_string()))?;
        if pattern.is_empty() || url.is_empty() {
            return Err(PluginError::InvalidOverrides(input.to_string()));
        }
        let pattern = Regex::new(pattern).map_err(|e| PluginError::InvalidOverridePattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
        overrides.push(DownloadOverride {
            pattern,
            url: url.to_string(),
        });
    }
    Ok(overrides)
}

/// Plugin engine settings, read once and passed down explicitly.
#[derive(Debug, Clone)]
pub struct PluginConfig {
    /// Cache root
    pub plugin_dir: PathBuf,
    pub ignore_ambient: bool,
    pub legacy_search: bool,
    pub github_token: Option<String>,
    pub gitlab_token: Option<String>,
    pub download_overrides: Vec<DownloadOverride>,
}

impl PluginConfig {
    /// Defaults rooted at `plugin_dir`, ignoring the environment.
    pub fn new(plugin_dir: impl Into<PathBuf>) -> Self {
        Self {
            plugin_dir: plugin_dir.into(),
            ignore_ambient: false,
            legacy_search: false,
            github_token: None,
            gitlab_token: None,
            download_overrides: Vec::new(),
        }
    }

    pub fn from_env() -> PluginResult<Self> {
        let plugin_dir = match std::env::var(PLUGIN_DIR_ENV) {
            Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => paths::plugins_dir()?,
        };

        let overrides = std::env::var(DOWNLOAD_URL_OVERRIDES_ENV).unwrap_or_default();

        let config = Self {
            plugin_dir,
            ignore_ambient: std::env::var_os(IGNORE_AMBIENT_PLUGINS_ENV).is_some(),
            legacy_search: std::env::var_os(LEGACY_PLUGIN_SEARCH_ENV).is_some(),
            github_token: non_empty_env(GITHUB_TOKEN_ENV),
            gitlab_token: non_empty_env(GITLAB_TOKEN_ENV),
            download_overrides: parse_download_overrides(&overrides)?,
        };
        log::debug!(
            "plugin config: dir={:?} ignore_ambient={} legacy_search={} overrides={}",
            config.plugin_dir,
            config.ignore_ambient,
            config.legacy_search,
            config.download_overrides.len()
        );
        Ok(config)
    }

    pub fn with_ignore_ambient(mut self, ignore: bool) -> Self {
        self.ignore_ambient = ignore;
        self
    }

    pub fn with_legacy_search(mut self, legacy: bool) -> Self {
        self.legacy_search = legacy;
        self
    }

    pub fn with_github_token(mut self, token: impl Into<String>) -> Self {
        self.github_token = Some(token.into());
        self
    }

    pub fn with_gitlab_token(mut self, token: impl Into<String>) -> Self {
        self.gitlab_token = Some(token.into());
        self
    }

    pub fn with_download_overrides(mut self, overrides: Vec<DownloadOverride>) -> Self {
        self.download_overrides = overrides;
        self
    }

    /// First override URL whose pattern matches `plugin_name`.
    pub fn override_url(&self, plugin_name: &str) -> Option<String> {
        self.download_overrides
            .iter()
            .find_map(|o| o.apply(plugin_name))
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_parse_overrides() {
        let overrides = parse_download_overrides("^foo.*=https://foo,^bar.*=https://bar").unwrap();
        let config = PluginConfig::new("/tmp").with_download_overrides(overrides);

        assert_eq!(config.override_url("foo").as_deref(), Some("https://foo"));
        assert_eq!(config.override_url("foo-bar").as_deref(), Some("https://foo"));
        assert_eq!(config.override_url("barbaz").as_deref(), Some("https://bar"));
        assert_eq!(config.override_url("fo"), None);
        assert_eq!(config.override_url("nope"), None);
        assert_eq!(config.override_url(""), None);
    }

    #[test]
    fn test_parse_overrides_empty_input() {
        assert!(parse_download_overrides("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_overrides_format_errors() {
        for input in ["=", "^foo.*=", "=https://foo", "^foo.*=https://foo,", "nourl"] {
            let err = parse_download_overrides(input).unwrap_err();
            assert_eq!(
                err.to_string(),
                format!(
                    "expected format to be \"regexp1=URL1,regexp2=URL2\"; got \"{}\"",
                    input
                )
            );
        }
    }

    #[test]
    fn test_parse_overrides_invalid_regex() {
        let err = parse_download_overrides("[=https://foo").unwrap_err();
        assert!(matches!(err, PluginError::InvalidOverridePattern { .. }));
    }

    #[test]
    fn test_override_capture_expansion() {
        let overrides =
            parse_download_overrides(r"^(?P<org>[a-z]+)-(.*)$=github://api.github.com/${org}/$2").unwrap();
        assert_eq!(
            overrides[0].apply("acme-widgets").as_deref(),
            Some("github://api.github.com/acme/widgets")
        );
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var(PLUGIN_DIR_ENV, "/opt/horus/plugins");
        std::env::set_var(IGNORE_AMBIENT_PLUGINS_ENV, "1");
        std::env::remove_var(LEGACY_PLUGIN_SEARCH_ENV);
        std::env::set_var(GITHUB_TOKEN_ENV, "");
        std::env::set_var(DOWNLOAD_URL_OVERRIDES_ENV, "^aws$=https://mirror.example.com");

        let config = PluginConfig::from_env().unwrap();
        assert_eq!(config.plugin_dir, PathBuf::from("/opt/horus/plugins"));
        assert!(config.ignore_ambient);
        assert!(!config.legacy_search);
        assert_eq!(config.github_token, None);
        assert_eq!(
            config.override_url("aws").as_deref(),
            Some("https://mirror.example.com")
        );

        std::env::remove_var(PLUGIN_DIR_ENV);
        std::env::remove_var(IGNORE_AMBIENT_PLUGINS_ENV);
        std::env::remove_var(GITHUB_TOKEN_ENV);
        std::env::remove_var(DOWNLOAD_URL_OVERRIDES_ENV);
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_bad_overrides() {
        std::env::set_var(DOWNLOAD_URL_OVERRIDES_ENV, "=");
        assert!(matches!(
            PluginConfig::from_env(),
            Err(PluginError::InvalidOverrides(_))
        ));
        std::env::remove_var(DOWNLOAD_URL_OVERRIDES_ENV);
    }
}
