//! Scanning and pruning the local plugin cache

use crate::config::PluginConfig;
use crate::error::{PluginError, PluginResult};
use crate::identity::{parse_dir_name, with_suffix, PluginInfo, PluginSpec, LOCK_SUFFIX, PARTIAL_SUFFIX};
use crate::select::select_compatible;
use crate::version;
use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::Path;
use walkdir::WalkDir;

/// Installed plugins under `dir`, without size or timestamps.
///
/// A missing `dir` is an empty cache. Files, leftover temp dirs, names that
/// do not parse and dirs with a `.partial` marker are skipped.
pub fn get_plugins(dir: &Path) -> PluginResult<Vec<PluginInfo>> {
    scan(dir, false)
}

/// Like [`get_plugins`], also filling size, install/last-used times and the
/// cached schema. Sizing walks every file, so this is only for listings.
pub fn get_plugins_with_metadata(dir: &Path) -> PluginResult<Vec<PluginInfo>> {
    scan(dir, true)
}

fn scan(dir: &Path, with_metadata: bool) -> PluginResult<Vec<PluginInfo>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut plugins = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let file_name = entry.file_name();
        let Some((kind, name, version)) = parse_dir_name(&file_name.to_string_lossy()) else {
            continue;
        };

        let path = entry.path();
        if with_suffix(&path, PARTIAL_SUFFIX).exists() {
            log::debug!("skipping partially installed plugin {:?}", path);
            continue;
        }

        let mut info = PluginInfo::new(kind, name, version, path);
        if with_metadata {
            info.load_metadata()?;
        }
        plugins.push(info);
    }
    Ok(plugins)
}

fn dir_size(dir: &Path) -> PluginResult<u64> {
    let mut total = 0;
    for entry in WalkDir::new(dir) {
        let entry = entry.map_err(|e| PluginError::Io(e.into()))?;
        if entry.file_type().is_file() {
            total += entry.metadata().map_err(|e| PluginError::Io(e.into()))?.len();
        }
    }
    Ok(total)
}

impl PluginInfo {
    /// Fill size, times and schema information from disk.
    pub fn load_metadata(&mut self) -> PluginResult<()> {
        let meta = fs::metadata(&self.path)?;
        self.size = dir_size(&self.path)?;
        // birth time is not available on every filesystem
        self.install_time = meta.created().ok().map(DateTime::<Utc>::from);
        self.last_used_time = meta.accessed().ok().map(DateTime::<Utc>::from);

        self.schema_path = None;
        self.schema_time = None;
        if let Some(root) = self.path.parent() {
            let schema = root.join(format!("schema-{}.json", self.name));
            if let Ok(schema_meta) = fs::metadata(&schema) {
                self.schema_time = schema_meta.modified().ok().map(DateTime::<Utc>::from);
                self.schema_path = Some(schema);
            }
        }
        Ok(())
    }

    /// Remove the plugin directory along with its marker and lock files.
    pub fn delete(&self) -> PluginResult<()> {
        fs::remove_dir_all(&self.path)?;
        for suffix in [PARTIAL_SUFFIX, LOCK_SUFFIX] {
            let _ = fs::remove_file(with_suffix(&self.path, suffix));
        }
        log::debug!("deleted plugin {} at {:?}", self, self.path);
        Ok(())
    }
}

/// Whether exactly `spec` is fully installed.
pub fn has_plugin(spec: &PluginSpec, default_root: &Path) -> bool {
    let dir = spec.dir_path(default_root);
    dir.is_dir() && !with_suffix(&dir, PARTIAL_SUFFIX).exists()
}

/// Whether `spec` or something that satisfies it is installed.
///
/// With range selection the requested version has to match exactly; with
/// legacy selection any same-named plugin at or above it counts.
pub fn has_plugin_gte(spec: &PluginSpec, config: &PluginConfig) -> PluginResult<bool> {
    if has_plugin(spec, &config.plugin_dir) {
        return Ok(true);
    }

    let root = spec.plugin_dir.as_deref().unwrap_or(&config.plugin_dir);
    let plugins = get_plugins(root)?;

    let Some(requested) = &spec.version else {
        return Ok(false);
    };

    if !config.legacy_search {
        let req = version::exact(requested)?;
        return Ok(select_compatible(&plugins, spec.kind, &spec.name, &req).is_some());
    }

    Ok(plugins.iter().any(|p| {
        p.kind == spec.kind
            && p.name == spec.name
            && p.version.as_ref().is_some_and(|v| v >= requested)
    }))
}
