//! Plugin identity and on-disk layout
//!
//! Maps `(kind, name, version)` to cache directory names, lock files,
//! partial-install markers, executable names and release asset names.

use crate::error::{PluginError, PluginResult};
use crate::version::parse_tolerant;
use chrono::{DateTime, Utc};
use regex::Regex;
use semver::Version;
use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

/// Suffix of the lock file that serializes installs of one plugin version.
pub const LOCK_SUFFIX: &str = ".lock";

/// Suffix of the marker left behind by an unfinished install.
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Prefix of every plugin executable and release asset.
pub const PLUGIN_PREFIX: &str = "plugin";

/// Plugins that ship next to the `horus` binary instead of in the cache.
pub const BUNDLED_PLUGINS: &[(PluginKind, &str)] = &[
    (PluginKind::Language, "python"),
    (PluginKind::Language, "nodejs"),
    (PluginKind::Language, "go"),
    (PluginKind::Language, "dotnet"),
    (PluginKind::Language, "java"),
    (PluginKind::Language, "yaml"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PluginKind {
    Analyzer,
    Language,
    Resource,
    Converter,
    Tool,
}

impl PluginKind {
    pub const ALL: [PluginKind; 5] = [
        PluginKind::Analyzer,
        PluginKind::Language,
        PluginKind::Resource,
        PluginKind::Converter,
        PluginKind::Tool,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PluginKind::Analyzer => "analyzer",
            PluginKind::Language => "language",
            PluginKind::Resource => "resource",
            PluginKind::Converter => "converter",
            PluginKind::Tool => "tool",
        }
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PluginKind {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PluginKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| PluginError::InvalidKind(s.to_string()))
    }
}

/// Target platform in release-asset terms (`linux|darwin|windows`, `amd64|arm64`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    pub os: &'static str,
    pub arch: &'static str,
}

impl Platform {
    pub fn current() -> PluginResult<Self> {
        Self::from_rust(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Translate Rust's `std::env::consts` names.
    pub fn from_rust(os: &str, arch: &str) -> PluginResult<Self> {
        let unsupported = || PluginError::UnsupportedPlatform {
            os: os.to_string(),
            arch: arch.to_string(),
        };
        let os = match os {
            "linux" => "linux",
            "macos" => "darwin",
            "windows" => "windows",
            _ => return Err(unsupported()),
        };
        let arch = match arch {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            _ => return Err(unsupported()),
        };
        Ok(Self { os, arch })
    }

    /// Checksum map key, e.g. `linux-amd64`.
    pub fn key(&self) -> String {
        format!("{}-{}", self.os, self.arch)
    }
}

/// A request for a plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginSpec {
    pub name: String,
    pub kind: PluginKind,
    pub version: Option<Version>,
    /// Explicit source, e.g. `github://api.github.com/org/repo`
    pub download_url: Option<String>,
    /// Expected sha256 digests keyed by `<os>-<arch>`
    pub checksums: HashMap<String, Vec<u8>>,
    /// Cache root override
    pub plugin_dir: Option<PathBuf>,
}

impl PluginSpec {
    pub fn new(kind: PluginKind, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            version: None,
            download_url: None,
            checksums: HashMap::new(),
            plugin_dir: None,
        }
    }

    /// Copy of this spec pinned to `version`.
    pub fn with_version(&self, version: Version) -> Self {
        Self {
            version: Some(version),
            ..self.clone()
        }
    }

    pub fn with_download_url(mut self, url: impl Into<String>) -> Self {
        self.download_url = Some(url.into());
        self
    }

    pub fn with_checksums(mut self, checksums: HashMap<String, Vec<u8>>) -> Self {
        self.checksums = checksums;
        self
    }

    pub fn with_plugin_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.plugin_dir = Some(dir.into());
        self
    }

    /// `<kind>-<name>-v<version>`, or `<kind>-<name>` when unversioned.
    pub fn dir_name(&self) -> String {
        dir_name(self.kind, &self.name, self.version.as_ref())
    }

    /// Cache directory under `self.plugin_dir`, or `default_root` when unset.
    pub fn dir_path(&self, default_root: &Path) -> PathBuf {
        self.plugin_dir
            .as_deref()
            .unwrap_or(default_root)
            .join(self.dir_name())
    }

    pub fn lock_path(&self, default_root: &Path) -> PathBuf {
        with_suffix(&self.dir_path(default_root), LOCK_SUFFIX)
    }

    pub fn partial_path(&self, default_root: &Path) -> PathBuf {
        with_suffix(&self.dir_path(default_root), PARTIAL_SUFFIX)
    }

    /// Executable name without platform extension.
    pub fn file_prefix(&self) -> String {
        file_prefix(self.kind, &self.name)
    }

    /// Executable name, with `.exe` on Windows.
    pub fn file_name(&self) -> String {
        exe_name(&self.file_prefix())
    }

    /// Release asset for `version` on `platform`.
    pub fn asset_name(&self, version: &Version, platform: &Platform) -> String {
        format!(
            "{}-v{}-{}-{}.tar.gz",
            self.file_prefix(),
            version,
            platform.os,
            platform.arch
        )
    }

    pub fn is_bundled(&self) -> bool {
        is_bundled(self.kind, &self.name)
    }

    /// `name-version` label used in logs and errors.
    pub fn label(&self) -> String {
        match &self.version {
            Some(v) => format!("{}-{}", self.name, v),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for PluginSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.label())
    }
}

/// An installed plugin found by a cache scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInfo {
    pub name: String,
    pub kind: PluginKind,
    pub version: Option<Version>,
    /// Plugin directory
    pub path: PathBuf,
    /// Total bytes on disk; only set by a metadata scan
    pub size: u64,
    pub install_time: Option<DateTime<Utc>>,
    pub last_used_time: Option<DateTime<Utc>>,
    /// `schema-<name>.json` in the cache root, if present
    pub schema_path: Option<PathBuf>,
    pub schema_time: Option<DateTime<Utc>>,
}

impl PluginInfo {
    pub fn new(kind: PluginKind, name: impl Into<String>, version: Option<Version>, path: PathBuf) -> Self {
        Self {
            name: name.into(),
            kind,
            version,
            path,
            size: 0,
            install_time: None,
            last_used_time: None,
            schema_path: None,
            schema_time: None,
        }
    }

    /// Path of the plugin executable inside its directory.
    pub fn file_path(&self) -> PathBuf {
        self.path.join(exe_name(&file_prefix(self.kind, &self.name)))
    }

    pub fn spec(&self) -> PluginSpec {
        let mut spec = PluginSpec::new(self.kind, self.name.clone());
        spec.version = self.version.clone();
        if let Some(root) = self.path.parent() {
            spec.plugin_dir = Some(root.to_path_buf());
        }
        spec
    }
}

impl fmt::Display for PluginInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(v) => write!(f, "{}-{}", self.name, v),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A plugin pinned by the surrounding project to a local path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPlugin {
    pub name: String,
    pub kind: PluginKind,
    pub version: Option<Version>,
    /// Either the executable itself or a directory containing it
    pub path: PathBuf,
}

pub fn is_bundled(kind: PluginKind, name: &str) -> bool {
    BUNDLED_PLUGINS.iter().any(|(k, n)| *k == kind && *n == name)
}

pub fn dir_name(kind: PluginKind, name: &str, version: Option<&Version>) -> String {
    match version {
        Some(v) => format!("{}-{}-v{}", kind, name, v),
        None => format!("{}-{}", kind, name),
    }
}

pub fn file_prefix(kind: PluginKind, name: &str) -> String {
    format!("{}-{}-{}", PLUGIN_PREFIX, kind, name)
}

fn exe_name(prefix: &str) -> String {
    if cfg!(windows) {
        format!("{}.exe", prefix)
    } else {
        prefix.to_string()
    }
}

/// `path` with `suffix` appended to its final component.
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

fn versioned_dir_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<kind>[a-z]+)-(?P<name>[a-zA-Z0-9-]*[a-zA-Z0-9])-v(?P<version>.+)$").ok()
    })
    .as_ref()
}

fn unversioned_dir_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?P<kind>[a-z]+)-(?P<name>[a-zA-Z0-9-]*[a-zA-Z0-9])$").ok())
        .as_ref()
}

/// Leftover extraction directories from interrupted installs.
pub fn is_temp_dir_name(name: &str) -> bool {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\.tmp[0-9]+$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(name))
}

/// Parse a cache directory name into `(kind, name, version)`.
///
/// Each field is validated on its own; any failure rejects the whole entry.
pub fn parse_dir_name(dir: &str) -> Option<(PluginKind, String, Option<Version>)> {
    if is_temp_dir_name(dir) {
        return None;
    }

    if let Some(caps) = versioned_dir_regex().and_then(|re| re.captures(dir)) {
        let kind = caps["kind"].parse::<PluginKind>().ok()?;
        return match parse_tolerant(&caps["version"]) {
            Ok(version) => Some((kind, caps["name"].to_string(), Some(version))),
            Err(_) => {
                log::debug!("skipping plugin dir {} with invalid version", dir);
                None
            }
        };
    }

    let caps = unversioned_dir_regex()?.captures(dir)?;
    let kind = caps["kind"].parse::<PluginKind>().ok()?;
    Some((kind, caps["name"].to_string(), None))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(version: Option<&str>) -> PluginSpec {
        let mut s = PluginSpec::new(PluginKind::Resource, "aws");
        s.version = version.map(|v| Version::parse(v).unwrap());
        s
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in PluginKind::ALL {
            assert_eq!(kind.as_str().parse::<PluginKind>().unwrap(), kind);
        }
        assert!(matches!(
            "provider".parse::<PluginKind>(),
            Err(PluginError::InvalidKind(_))
        ));
    }

    #[test]
    fn test_dir_layout() {
        let root = Path::new("/cache");
        let s = spec(Some("1.2.3"));
        assert_eq!(s.dir_name(), "resource-aws-v1.2.3");
        assert_eq!(s.dir_path(root), PathBuf::from("/cache/resource-aws-v1.2.3"));
        assert_eq!(s.lock_path(root), PathBuf::from("/cache/resource-aws-v1.2.3.lock"));
        assert_eq!(
            s.partial_path(root),
            PathBuf::from("/cache/resource-aws-v1.2.3.partial")
        );
        assert_eq!(spec(None).dir_name(), "resource-aws");
    }

    #[test]
    fn test_plugin_dir_override() {
        let s = spec(Some("1.0.0")).with_plugin_dir("/elsewhere");
        assert_eq!(
            s.dir_path(Path::new("/cache")),
            PathBuf::from("/elsewhere/resource-aws-v1.0.0")
        );
    }

    #[test]
    fn test_asset_name() {
        let s = spec(None);
        let platform = Platform {
            os: "linux",
            arch: "amd64",
        };
        assert_eq!(
            s.asset_name(&Version::new(4, 1, 0), &platform),
            "plugin-resource-aws-v4.1.0-linux-amd64.tar.gz"
        );
    }

    #[test]
    fn test_platform_mapping() {
        let p = Platform::from_rust("macos", "aarch64").unwrap();
        assert_eq!(p.key(), "darwin-arm64");
        assert!(matches!(
            Platform::from_rust("freebsd", "x86_64"),
            Err(PluginError::UnsupportedPlatform { .. })
        ));
    }

    #[test]
    fn test_parse_dir_name() {
        let (kind, name, version) = parse_dir_name("resource-aws-v1.2.3").unwrap();
        assert_eq!(kind, PluginKind::Resource);
        assert_eq!(name, "aws");
        assert_eq!(version, Some(Version::new(1, 2, 3)));

        let (_, name, version) = parse_dir_name("tool-my-tool-v0.1.0-alpha").unwrap();
        assert_eq!(name, "my-tool");
        assert_eq!(version.unwrap().pre.as_str(), "alpha");

        let (kind, name, version) = parse_dir_name("language-python").unwrap();
        assert_eq!(kind, PluginKind::Language);
        assert_eq!(name, "python");
        assert!(version.is_none());
    }

    #[test]
    fn test_parse_dir_name_rejects_bad_entries() {
        assert!(parse_dir_name("widget-aws-v1.0.0").is_none());
        assert!(parse_dir_name("resource-aws-vnot.a.version").is_none());
        assert!(parse_dir_name("resource-aws-v1.0.0.tmp123456").is_none());
        assert!(parse_dir_name("resource-").is_none());
    }

    #[test]
    fn test_bundled() {
        assert!(PluginSpec::new(PluginKind::Language, "python").is_bundled());
        assert!(!PluginSpec::new(PluginKind::Resource, "python").is_bundled());
    }

    #[test]
    fn test_info_spec_round_trip() {
        let info = PluginInfo::new(
            PluginKind::Tool,
            "lint",
            Some(Version::new(1, 0, 0)),
            PathBuf::from("/cache/tool-lint-v1.0.0"),
        );
        let spec = info.spec();
        assert_eq!(spec.dir_path(Path::new("/other")), info.path);
        assert_eq!(info.to_string(), "lint-1.0.0");
    }
}
