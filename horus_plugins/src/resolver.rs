//! Locating the executable for a plugin
//!
//! Lookup order:
//! 1. plugins pinned by the project to a local path
//! 2. `$PATH`, unless ambient plugins are ignored (bundled plugins are always looked up)
//! 3. bundled plugins next to the running executable
//! 4. the plugin cache, via [`crate::select`]

use crate::cache;
use crate::config::PluginConfig;
use crate::error::{MissingError, PluginError, PluginResult};
use crate::identity::{file_prefix, is_bundled, PluginInfo, PluginKind, ProjectPlugin};
use crate::paths;
use crate::select::{legacy_select, select_compatible};
use crate::version;
use semver::Version;
use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

/// Where a resolved plugin came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginLocation {
    Project(ProjectPlugin),
    /// Found on `$PATH`; `shadows` is the differing bundled binary it hides
    Ambient { shadows: Option<PathBuf> },
    Bundled,
    Cache(PluginInfo),
}

impl PluginLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginLocation::Project(_) => "project",
            PluginLocation::Ambient { .. } => "$PATH",
            PluginLocation::Bundled => "bundled",
            PluginLocation::Cache(_) => "cache",
        }
    }
}

pub struct Resolver {
    config: PluginConfig,
    search_path: Option<OsString>,
    exe_dir: Option<PathBuf>,
}

impl Resolver {
    /// Resolver using the process `$PATH` and the running executable's dir.
    pub fn new(config: PluginConfig) -> Self {
        Self {
            config,
            search_path: std::env::var_os("PATH"),
            exe_dir: paths::current_exe_dir(),
        }
    }

    /// Replace the `$PATH` value searched for ambient plugins.
    pub fn with_search_path(mut self, path: Option<OsString>) -> Self {
        self.search_path = path;
        self
    }

    /// Replace the directory searched for bundled plugins.
    pub fn with_exe_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.exe_dir = dir;
        self
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    /// Find the executable for `(kind, name)`.
    ///
    /// `version` filters project plugins and drives cache selection; ambient
    /// and bundled plugins are taken at whatever version they are.
    pub fn resolve(
        &self,
        kind: PluginKind,
        name: &str,
        version: Option<&Version>,
        project_plugins: &[ProjectPlugin],
    ) -> PluginResult<(PluginLocation, PathBuf)> {
        if let Some(plugin) = find_project_plugin(kind, name, version, project_plugins)? {
            let path = project_plugin_path(kind, name, plugin)?;
            log::debug!("resolve({}, {}): project plugin at {:?}", kind, name, path);
            return Ok((PluginLocation::Project(plugin.clone()), path));
        }

        let prefix = file_prefix(kind, name);
        let bundled = is_bundled(kind, name);
        let include_ambient = !self.config.ignore_ambient || bundled;

        let bundled_path = if bundled {
            self.find_bundled(&prefix)
        } else {
            None
        };

        if include_ambient {
            if let Some(path) = self.find_on_path(&prefix) {
                let shadows = bundled_path.clone().filter(|bundled| !same_file(&path, bundled));
                if let Some(bundled) = &shadows {
                    log::warn!(
                        "using {} from $PATH at {} instead of the bundled {}",
                        prefix,
                        path.display(),
                        bundled.display()
                    );
                }
                log::debug!("resolve({}, {}): found on $PATH at {:?}", kind, name, path);
                return Ok((PluginLocation::Ambient { shadows }, path));
            }
        }

        if let Some(path) = bundled_path {
            log::debug!("resolve({}, {}): bundled at {:?}", kind, name, path);
            return Ok((PluginLocation::Bundled, path));
        }

        let plugins = cache::get_plugins(&self.config.plugin_dir)?;
        let selected = match version {
            Some(v) if !self.config.legacy_search => {
                let req = version::exact(v)?;
                select_compatible(&plugins, kind, name, &req)
            }
            _ => legacy_select(&plugins, kind, name, version),
        };

        match selected {
            Some(info) => {
                let path = info.file_path();
                log::debug!("resolve({}, {}): cached {} at {:?}", kind, name, info, path);
                Ok((PluginLocation::Cache(info.clone()), path))
            }
            None => Err(MissingError::new(kind, name, version.cloned(), include_ambient).into()),
        }
    }

    fn find_on_path(&self, prefix: &str) -> Option<PathBuf> {
        let search_path = self.search_path.as_ref()?;
        std::env::split_paths(search_path).find_map(|dir| find_executable(&dir, prefix))
    }

    fn find_bundled(&self, prefix: &str) -> Option<PathBuf> {
        find_executable(self.exe_dir.as_deref()?, prefix)
    }
}

/// The project plugin for `(kind, name)`, skipping entries pinned to a
/// different version than requested.
///
/// Two entries at the same version are an error wherever they appear in the
/// list; among distinct versions the highest wins.
fn find_project_plugin<'a>(
    kind: PluginKind,
    name: &str,
    version: Option<&Version>,
    project_plugins: &'a [ProjectPlugin],
) -> PluginResult<Option<&'a ProjectPlugin>> {
    let mut candidates: Vec<&ProjectPlugin> = Vec::new();
    for plugin in project_plugins
        .iter()
        .filter(|p| p.kind == kind && p.name == name)
    {
        if let (Some(want), Some(have)) = (version, &plugin.version) {
            if want != have {
                log::warn!(
                    "project plugin {} {} at version {} does not match requested version {}",
                    kind,
                    name,
                    have,
                    want
                );
                continue;
            }
        }
        candidates.push(plugin);
    }

    let mut seen: HashSet<Option<&Version>> = HashSet::new();
    for plugin in &candidates {
        if !seen.insert(plugin.version.as_ref()) {
            return Err(PluginError::DuplicateProjectPlugin {
                kind,
                name: name.to_string(),
                version: plugin
                    .version
                    .as_ref()
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "none".to_string()),
            });
        }
    }

    Ok(candidates.into_iter().max_by(|a, b| a.version.cmp(&b.version)))
}

/// A project plugin path names either the executable or its directory.
fn project_plugin_path(kind: PluginKind, name: &str, plugin: &ProjectPlugin) -> PluginResult<PathBuf> {
    let meta = fs::metadata(&plugin.path)?;
    if meta.is_dir() {
        Ok(plugin.path.join(exe_file_name(kind, name)))
    } else {
        Ok(plugin.path.clone())
    }
}

fn exe_file_name(kind: PluginKind, name: &str) -> String {
    let prefix = file_prefix(kind, name);
    match candidate_extensions().first() {
        Some(ext) => format!("{}{}", prefix, ext),
        None => prefix,
    }
}

fn candidate_extensions() -> &'static [&'static str] {
    if cfg!(windows) {
        &[".exe", ".cmd"]
    } else {
        &[""]
    }
}

fn find_executable(dir: &Path, prefix: &str) -> Option<PathBuf> {
    candidate_extensions()
        .iter()
        .map(|ext| dir.join(format!("{}{}", prefix, ext)))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    match path.metadata() {
        Ok(metadata) => metadata.is_file() && metadata.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
