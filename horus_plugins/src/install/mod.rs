//! Plugin installation into the cache
//!
//! Installing one `(kind, name, version)` into directory `D`:
//! 1. take an exclusive lock on `D.lock` (held until return)
//! 2. remove leftover `*.tmpNNN` extraction dirs next to `D` (best effort)
//! 3. if `D` exists without `D.partial` and no reinstall was asked for, stop
//! 4. otherwise remove `D`, create `D.partial`, then `D`
//! 5. write the payload, then install runtime dependencies if declared
//! 6. remove `D.partial`
//!
//! Any failure before step 6 leaves `D.partial` behind so the next scan
//! ignores `D` and the next install redoes it.

pub mod deps;

pub use deps::{CommandDependencyInstaller, DependencyInstaller, Runtime};

use crate::config::PluginConfig;
use crate::download::Downloader;
use crate::error::{PluginError, PluginResult};
use crate::identity::{is_temp_dir_name, with_suffix, PluginSpec, LOCK_SUFFIX, PARTIAL_SUFFIX};
use flate2::read::GzDecoder;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tar::Archive;

/// What gets written into the plugin directory.
pub enum PluginContent {
    /// An already extracted directory, copied recursively
    Dir(PathBuf),
    /// A single executable, written under the conventional file name
    File(Box<dyn Read + Send>),
    /// A gzip-compressed tarball
    Tarball(Box<dyn Read + Send>),
}

impl PluginContent {
    pub fn tarball(reader: impl Read + Send + 'static) -> Self {
        PluginContent::Tarball(Box::new(reader))
    }

    pub fn file(reader: impl Read + Send + 'static) -> Self {
        PluginContent::File(Box::new(reader))
    }

    fn write_to(self, dir: &Path, file_name: &str) -> PluginResult<()> {
        match self {
            PluginContent::Dir(src) => copy_dir_all(&src, dir),
            PluginContent::File(mut reader) => {
                let path = dir.join(file_name);
                let mut file = create_executable(&path)?;
                io::copy(&mut reader, &mut file).map_err(PluginError::from_local_io)?;
                Ok(())
            }
            PluginContent::Tarball(reader) => extract_tarball(reader, dir),
        }
    }
}

/// Result of [`Installer::install`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed,
    AlreadyInstalled,
}

/// Exclusive advisory lock on a plugin's `.lock` file, released on drop.
#[derive(Debug)]
pub struct InstallLock {
    file: File,
    path: PathBuf,
}

impl InstallLock {
    /// Block until the lock at `path` is ours, creating parent dirs as needed.
    pub fn acquire(path: &Path) -> PluginResult<Self> {
        let lock_err = |source: io::Error| PluginError::Lock {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(lock_err)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(lock_err)?;

        log::debug!("acquiring lock {:?}", path);
        FileExt::lock_exclusive(&file).map_err(lock_err)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for InstallLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            log::warn!("failed to release lock {:?}: {}", self.path, e);
        }
    }
}

pub struct Installer {
    config: PluginConfig,
    deps: Arc<dyn DependencyInstaller>,
}

impl Installer {
    pub fn new(config: PluginConfig) -> Self {
        Self {
            config,
            deps: Arc::new(CommandDependencyInstaller),
        }
    }

    pub fn with_dependency_installer(mut self, deps: Arc<dyn DependencyInstaller>) -> Self {
        self.deps = deps;
        self
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    /// Cache directory for `spec`.
    pub fn plugin_dir(&self, spec: &PluginSpec) -> PathBuf {
        spec.dir_path(&self.config.plugin_dir)
    }

    /// Install `content` as `spec`, which must carry a version.
    pub fn install(
        &self,
        spec: &PluginSpec,
        content: PluginContent,
        reinstall: bool,
    ) -> PluginResult<InstallOutcome> {
        if spec.version.is_none() {
            return Err(PluginError::invalid_version(
                "",
                format!("{} must have a version to be installed", spec.name),
            ));
        }

        let dir = self.plugin_dir(spec);
        let partial = with_suffix(&dir, PARTIAL_SUFFIX);
        let _lock = InstallLock::acquire(&with_suffix(&dir, LOCK_SUFFIX))?;

        if let Some(parent) = dir.parent() {
            if let Err(e) = cleanup_temp_dirs(parent) {
                log::warn!("failed to clean up temporary plugin dirs in {:?}: {}", parent, e);
            }
        }

        if dir.exists() {
            let interrupted = partial.exists();
            if !interrupted && !reinstall {
                log::debug!("{} already installed at {:?}", spec, dir);
                return Ok(InstallOutcome::AlreadyInstalled);
            }
            log::debug!(
                "removing {:?} (interrupted={}, reinstall={})",
                dir,
                interrupted,
                reinstall
            );
            fs::remove_dir_all(&dir)?;
        }

        create_marker(&partial)?;
        create_private_dir(&dir)?;

        content.write_to(&dir, &spec.file_name())?;

        let runtime = deps::read_runtime(&dir).map_err(|source| PluginError::DependencyInstall {
            plugin: spec.label(),
            source,
        })?;
        if let Some(runtime) = runtime {
            log::debug!("installing {:?} dependencies for {}", runtime, spec);
            self.deps
                .install(&runtime, &dir)
                .map_err(|source| PluginError::DependencyInstall {
                    plugin: spec.label(),
                    source,
                })?;
        }

        fs::remove_file(&partial)?;
        log::debug!("installed {} at {:?}", spec, dir);
        Ok(InstallOutcome::Installed)
    }

    /// Download `spec` from its source and install it.
    ///
    /// A missing version is resolved to the source's latest release first.
    /// Returns the spec that was installed.
    pub fn install_from_source(
        &self,
        spec: &PluginSpec,
        downloader: &Downloader,
        reinstall: bool,
    ) -> PluginResult<PluginSpec> {
        if spec.is_bundled() {
            return Err(PluginError::BundledPlugin(spec.name.clone()));
        }

        let spec = match &spec.version {
            Some(_) => spec.clone(),
            None => {
                let latest = downloader.latest_version(spec)?;
                log::debug!("resolved latest version of {} to {}", spec.name, latest);
                spec.with_version(latest)
            }
        };

        let dir = self.plugin_dir(&spec);
        if !reinstall && dir.exists() && !with_suffix(&dir, PARTIAL_SUFFIX).exists() {
            log::debug!("{} already installed", spec);
            return Ok(spec);
        }

        let archive = downloader.download_to_file(&spec)?;
        let file = archive.reopen().map_err(PluginError::Io)?;
        self.install(&spec, PluginContent::tarball(file), reinstall)?;
        Ok(spec)
    }
}

/// Remove leftover `*.tmpNNN` extraction directories in `dir`.
pub fn cleanup_temp_dirs(dir: &Path) -> io::Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        if entry.file_type()?.is_dir() && is_temp_dir_name(&name.to_string_lossy()) {
            log::debug!("removing stale temp dir {:?}", entry.path());
            fs::remove_dir_all(entry.path())?;
        }
    }
    Ok(())
}

fn create_marker(path: &Path) -> PluginResult<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)?;
    Ok(())
}

fn create_private_dir(path: &Path) -> PluginResult<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(path)?;
    Ok(())
}

fn create_executable(path: &Path) -> PluginResult<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o755);
    }
    Ok(options.open(path)?)
}

/// Recursively copy `src` into `dst`; `fs::copy` carries permission bits.
fn copy_dir_all(src: &Path, dst: &Path) -> PluginResult<()> {
    fs::create_dir_all(dst)?;

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let ty = entry.file_type()?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if ty.is_dir() {
            copy_dir_all(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path)?;
        }
    }

    Ok(())
}

/// Relative path made only of normal components.
fn is_contained(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn extract_tarball(reader: Box<dyn Read + Send>, dir: &Path) -> PluginResult<()> {
    let mut archive = Archive::new(GzDecoder::new(reader));
    archive.set_preserve_permissions(true);

    for entry in archive.entries().map_err(PluginError::from_local_io)? {
        let mut entry = entry.map_err(PluginError::from_local_io)?;
        let path = entry
            .path()
            .map_err(PluginError::from_local_io)?
            .into_owned();
        if !is_contained(&path) {
            return Err(PluginError::UnsafeArchivePath(path.display().to_string()));
        }
        if entry.header().entry_type().is_hard_link() {
            if let Some(target) = entry.link_name().map_err(PluginError::from_local_io)? {
                if !is_contained(&target) {
                    return Err(PluginError::UnsafeArchivePath(target.display().to_string()));
                }
            }
        }
        if !entry.unpack_in(dir).map_err(PluginError::from_local_io)? {
            return Err(PluginError::UnsafeArchivePath(path.display().to_string()));
        }
    }
    Ok(())
}
