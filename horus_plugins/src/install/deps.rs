//! Post-extraction dependency installation for interpreted plugins.
//!
//! A plugin may ship a `plugin.yaml` declaring its runtime:
//!
//! ```yaml
//! runtime: nodejs
//! ```
//!
//! or, with options:
//!
//! ```yaml
//! runtime:
//!   name: python
//!   options:
//!     virtualenv: venv
//! ```

use crate::config::PLUGIN_MANIFEST;
use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Default virtualenv directory for python plugins.
pub const DEFAULT_VIRTUALENV: &str = "venv";

#[derive(Debug, Deserialize)]
struct PluginManifest {
    #[serde(default)]
    runtime: Option<RuntimeField>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RuntimeField {
    Name(String),
    Detailed {
        name: String,
        #[serde(default)]
        options: HashMap<String, serde_yaml::Value>,
    },
}

/// Runtimes that need dependencies installed after extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Runtime {
    NodeJs,
    Python { virtualenv: String },
}

/// Read the runtime from `dir/plugin.yaml`.
///
/// `Ok(None)` when there is no manifest or the runtime needs no dependency step.
pub fn read_runtime(dir: &Path) -> Result<Option<Runtime>> {
    let manifest_path = dir.join(PLUGIN_MANIFEST);
    if !manifest_path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(&manifest_path)
        .with_context(|| format!("failed to read {}", manifest_path.display()))?;
    let manifest: PluginManifest = serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse {}", manifest_path.display()))?;

    let (name, options) = match manifest.runtime {
        None => return Ok(None),
        Some(RuntimeField::Name(name)) => (name, HashMap::new()),
        Some(RuntimeField::Detailed { name, options }) => (name, options),
    };

    let runtime = match name.as_str() {
        "nodejs" => Some(Runtime::NodeJs),
        "python" => {
            let virtualenv = options
                .get("virtualenv")
                .and_then(|v| v.as_str())
                .unwrap_or(DEFAULT_VIRTUALENV)
                .to_string();
            Some(Runtime::Python { virtualenv })
        }
        other => {
            log::debug!("runtime '{}' has no dependency step", other);
            None
        }
    };
    Ok(runtime)
}

/// Installs a plugin's runtime dependencies inside its directory.
pub trait DependencyInstaller: Send + Sync {
    fn install(&self, runtime: &Runtime, dir: &Path) -> Result<()>;
}

/// Runs `npm` or `python -m venv` + `pip`.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandDependencyInstaller;

impl DependencyInstaller for CommandDependencyInstaller {
    fn install(&self, runtime: &Runtime, dir: &Path) -> Result<()> {
        match runtime {
            Runtime::NodeJs => {
                log::debug!("running npm install in {:?}", dir);
                run(Command::new("npm")
                    .args(["install", "--production"])
                    .current_dir(dir))
            }
            Runtime::Python { virtualenv } => install_python(dir, virtualenv),
        }
    }
}

fn install_python(dir: &Path, virtualenv: &str) -> Result<()> {
    let python_cmd = if Command::new("python3").arg("--version").output().is_ok() {
        "python3"
    } else {
        "python"
    };

    let venv = dir.join(virtualenv);
    log::debug!("creating virtualenv {:?}", venv);
    run(Command::new(python_cmd)
        .args(["-m", "venv"])
        .arg(&venv)
        .current_dir(dir))?;

    let requirements = dir.join("requirements.txt");
    if !requirements.exists() {
        return Ok(());
    }
    run(Command::new(pip_path(&venv))
        .args(["install", "-r"])
        .arg(&requirements)
        .current_dir(dir))
}

fn pip_path(venv: &Path) -> PathBuf {
    if cfg!(windows) {
        venv.join("Scripts").join("pip.exe")
    } else {
        venv.join("bin").join("pip")
    }
}

fn run(cmd: &mut Command) -> Result<()> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    let output = cmd
        .output()
        .map_err(|e| anyhow!("failed to run {}: {}", program, e))?;
    if !output.status.success() {
        bail!(
            "{} exited with {}: {}",
            program,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}
