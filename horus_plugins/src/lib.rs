//! HORUS plugin engine
//!
//! Resolves, downloads and installs the versioned executables (analyzers,
//! language hosts, resource providers, converters and tools) that the HORUS
//! CLI runs out of process.
//!
//! The pieces, leaf first:
//! - [`identity`]: kinds, specs and the on-disk naming scheme
//! - [`source`]: where a plugin archive comes from (GitHub, GitLab, HTTP, fallback, checksums)
//! - [`download`]: single-attempt copy plus bounded retry with backoff
//! - [`install`]: lock-protected, crash-recoverable installation into the cache
//! - [`cache`] and [`select`]: scanning installed plugins and picking a version
//! - [`resolver`]: project overrides, `$PATH`, bundled binaries, then the cache

pub mod cache;
pub mod config;
pub mod download;
pub mod error;
pub mod fetch;
pub mod identity;
pub mod install;
pub mod paths;
pub mod progress;
pub mod resolver;
pub mod select;
pub mod source;
pub mod version;

pub use config::PluginConfig;
pub use error::{ErrorClass, MissingError, PluginError, PluginResult};
pub use identity::{PluginInfo, PluginKind, PluginSpec, ProjectPlugin};
pub use install::{Installer, PluginContent};
pub use resolver::{PluginLocation, Resolver};
