//! Error handling for the plugin engine
//!
//! Every failure is classified where it originates (see [`ErrorClass`]) so
//! the download retry policy never has to look at status codes or messages.

use crate::identity::PluginKind;
use semver::Version;
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Broad category of a [`PluginError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// No source or installed candidate satisfies the request
    NotFound,
    /// Connection failures, timeouts, 5xx; worth retrying
    Transient,
    /// The registry processed the request and refused it (401/403/404, rate limits)
    Rejected,
    /// Checksum or byte-count mismatch
    Integrity,
    /// Local disk failures while writing, extracting or installing dependencies
    LocalIo,
    /// Bad configuration detected before any network activity
    Config,
    /// The caller cancelled the operation
    Cancelled,
}

/// Main error type for plugin operations
#[derive(Debug, Error)]
pub enum PluginError {
    #[error(transparent)]
    NotFound(#[from] MissingError),

    /// Non-2xx response from a plugin host
    #[error("{status} HTTP error fetching plugin from {url}")]
    Http { status: u16, url: String },

    #[error("GitHub rate limit exceeded for {url}, try again in {retry_after}")]
    RateLimited { url: String, retry_after: String },

    #[error("404 HTTP error fetching plugin from {url}: the repository may be private, try setting GITHUB_TOKEN")]
    PrivateRepository { url: String },

    /// Connection-level failure before a response was received
    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },

    /// Failure reading the download stream
    #[error("error reading plugin download: {0}")]
    Read(#[source] io::Error),

    /// Failure writing the download to local disk
    #[error("error writing plugin download: {0}")]
    Write(#[source] io::Error),

    #[error("invalid checksum, expected {expected}, actual {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("downloaded {actual} bytes, expected {expected}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("failed to download plugin: {plugin} after {attempts} attempts: {source}")]
    RetriesExhausted {
        plugin: String,
        attempts: u32,
        #[source]
        source: Box<PluginError>,
    },

    #[error("latest version lookup is not supported for plugins from http sources")]
    LatestUnsupported,

    #[error("unknown plugin source scheme: {0}")]
    UnknownScheme(String),

    #[error("invalid plugin download URL '{url}': {message}")]
    InvalidDownloadUrl { url: String, message: String },

    #[error("expected format to be \"regexp1=URL1,regexp2=URL2\"; got \"{0}\"")]
    InvalidOverrides(String),

    #[error("invalid download URL override pattern '{pattern}': {message}")]
    InvalidOverridePattern { pattern: String, message: String },

    #[error("multiple project plugins with kind {kind}, name {name}, version {version}")]
    DuplicateProjectPlugin {
        kind: PluginKind,
        name: String,
        version: String,
    },

    #[error("unsupported plugin platform: {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },

    #[error("archive entry '{0}' resolves outside the plugin directory")]
    UnsafeArchivePath(String),

    #[error("failed to install dependencies for {plugin}: {source}")]
    DependencyInstall {
        plugin: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("'{0}' is bundled with the HORUS CLI and cannot be installed separately")]
    BundledPlugin(String),

    #[error("plugin download cancelled")]
    Cancelled,

    #[error("unknown plugin kind '{0}'")]
    InvalidKind(String),

    #[error("invalid version '{input}': {message}")]
    InvalidVersion { input: String, message: String },

    #[error("unexpected response from {url}: {message}")]
    MalformedResponse { url: String, message: String },

    #[error("no release asset named '{asset}' at {url}")]
    AssetNotFound { asset: String, url: String },

    #[error("could not find home directory")]
    NoHomeDir,

    #[error("failed to lock {path:?}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for plugin operations
pub type PluginResult<T> = Result<T, PluginError>;

impl PluginError {
    /// Build an HTTP status error.
    pub fn http<S: Into<String>>(status: u16, url: S) -> Self {
        PluginError::Http {
            status,
            url: url.into(),
        }
    }

    /// Build a version parse error.
    pub fn invalid_version<S: Into<String>, T: fmt::Display>(input: S, message: T) -> Self {
        PluginError::InvalidVersion {
            input: input.into(),
            message: message.to_string(),
        }
    }

    pub fn malformed<S: Into<String>, T: fmt::Display>(url: S, message: T) -> Self {
        PluginError::MalformedResponse {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Recover a read-side failure.
    ///
    /// Stream decorators (the checksum guard) smuggle a `PluginError` through
    /// the `io::Read` boundary; unwrap it here so its class survives.
    pub fn from_read(err: io::Error) -> Self {
        Self::take_wrapped(err).unwrap_or_else(PluginError::Read)
    }

    /// Like [`PluginError::from_read`], for local reads such as archive
    /// extraction where a plain I/O failure is a disk problem.
    pub fn from_local_io(err: io::Error) -> Self {
        Self::take_wrapped(err).unwrap_or_else(PluginError::Io)
    }

    fn take_wrapped(err: io::Error) -> Result<Self, io::Error> {
        if !err
            .get_ref()
            .is_some_and(|inner| inner.is::<PluginError>())
        {
            return Err(err);
        }
        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<PluginError>()) {
            Some(Ok(plugin_err)) => Ok(*plugin_err),
            Some(Err(other)) => Err(io::Error::new(kind, other)),
            None => Err(io::Error::from(kind)),
        }
    }

    /// Wrap this error so it can travel through an `io::Read` implementation.
    pub fn into_io(self) -> io::Error {
        io::Error::new(io::ErrorKind::InvalidData, self)
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            PluginError::NotFound(_) | PluginError::AssetNotFound { .. } => ErrorClass::NotFound,
            PluginError::Http { status, .. } => match status {
                401 | 403 | 404 => ErrorClass::Rejected,
                _ => ErrorClass::Transient,
            },
            PluginError::RateLimited { .. }
            | PluginError::PrivateRepository { .. }
            | PluginError::MalformedResponse { .. } => ErrorClass::Rejected,
            PluginError::Network { .. } | PluginError::Read(_) => ErrorClass::Transient,
            PluginError::ChecksumMismatch { .. }
            | PluginError::SizeMismatch { .. }
            | PluginError::UnsafeArchivePath(_) => ErrorClass::Integrity,
            PluginError::RetriesExhausted { source, .. } => source.class(),
            PluginError::Write(_)
            | PluginError::DependencyInstall { .. }
            | PluginError::Lock { .. }
            | PluginError::Io(_) => ErrorClass::LocalIo,
            PluginError::LatestUnsupported
            | PluginError::UnknownScheme(_)
            | PluginError::InvalidDownloadUrl { .. }
            | PluginError::InvalidOverrides(_)
            | PluginError::InvalidOverridePattern { .. }
            | PluginError::DuplicateProjectPlugin { .. }
            | PluginError::UnsupportedPlatform { .. }
            | PluginError::BundledPlugin(_)
            | PluginError::InvalidKind(_)
            | PluginError::InvalidVersion { .. }
            | PluginError::NoHomeDir => ErrorClass::Config,
            PluginError::Cancelled => ErrorClass::Cancelled,
        }
    }

    /// Only transient failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

/// A plugin could not be found in the workspace (and optionally on `$PATH`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingError {
    pub kind: PluginKind,
    pub name: String,
    pub version: Option<Version>,
    /// Whether `$PATH` was searched too
    pub include_ambient: bool,
}

impl MissingError {
    pub fn new(
        kind: PluginKind,
        name: impl Into<String>,
        version: Option<Version>,
        include_ambient: bool,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            version,
            include_ambient,
        }
    }

    /// The command that would install the missing plugin.
    pub fn install_hint(&self) -> String {
        match &self.version {
            Some(v) => format!("horus plugin install {} {} {}", self.kind, self.name, v),
            None => format!("horus plugin install {} {}", self.kind, self.name),
        }
    }
}

impl fmt::Display for MissingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "no {} plugin 'plugin-{}-{}' found in the workspace",
            self.kind, self.kind, self.name
        )?;
        if let Some(v) = &self.version {
            write!(f, " at version v{}", v)?;
        }
        if self.include_ambient {
            write!(f, " or on your $PATH")?;
        }
        Ok(())
    }
}

impl std::error::Error for MissingError {}
