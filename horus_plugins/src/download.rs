//! Download pipeline
//!
//! A single attempt resolves the source, streams the archive into a
//! temporary file and checks the byte count. [`Downloader::download_to_file`]
//! repeats attempts with exponential backoff while the failure is transient.

use crate::config::{PluginConfig, DOWNLOAD_INITIAL_DELAY, DOWNLOAD_MAX_ATTEMPTS};
use crate::error::{PluginError, PluginResult};
use crate::fetch::Fetcher;
use crate::identity::{Platform, PluginSpec};
use crate::progress;
use crate::source::Source;
use semver::Version;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;

/// Waits between attempts. Returning an error aborts the retry loop.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, delay: Duration) -> PluginResult<()>;
}

/// Blocks the current thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, delay: Duration) -> PluginResult<()> {
        std::thread::sleep(delay);
        Ok(())
    }
}

/// Cancellation signal shared between a caller and a [`CancellableSleeper`].
#[derive(Debug, Default)]
pub struct Cancellation {
    cancelled: Mutex<bool>,
    cond: Condvar,
}

impl Cancellation {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn cancel(&self) {
        if let Ok(mut cancelled) = self.cancelled.lock() {
            *cancelled = true;
        }
        self.cond.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.lock().map(|c| *c).unwrap_or(true)
    }
}

/// Sleeps until the delay passes or the download is cancelled.
///
/// An in-flight request is never interrupted; cancellation takes effect at
/// the next retry boundary.
#[derive(Debug, Clone)]
pub struct CancellableSleeper {
    cancellation: Arc<Cancellation>,
}

impl CancellableSleeper {
    pub fn new(cancellation: Arc<Cancellation>) -> Self {
        Self { cancellation }
    }
}

impl Sleeper for CancellableSleeper {
    fn sleep(&self, delay: Duration) -> PluginResult<()> {
        let deadline = Instant::now() + delay;
        let mut cancelled = self
            .cancellation
            .cancelled
            .lock()
            .map_err(|_| PluginError::Cancelled)?;
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            let (guard, _) = self
                .cancellation
                .cond
                .wait_timeout(cancelled, deadline - now)
                .map_err(|_| PluginError::Cancelled)?;
            cancelled = guard;
        }
        Err(PluginError::Cancelled)
    }
}

/// Retry policy for downloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for each later one
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DOWNLOAD_MAX_ATTEMPTS,
            initial_delay: DOWNLOAD_INITIAL_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Delay after the 1-based `attempt` failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.initial_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Called before each retry with `(error, attempt, max_attempts, delay)`.
pub type RetryObserver = Box<dyn Fn(&PluginError, u32, u32, Duration) + Send + Sync>;

/// Copy `reader` into `writer`, reporting read and write failures separately.
///
/// Read failures come from the network (or a stream decorator) and may be
/// retried; write failures come from the local disk and are not.
pub fn copy_split_errors<R: Read + ?Sized, W: Write + ?Sized>(
    reader: &mut R,
    writer: &mut W,
) -> PluginResult<u64> {
    let mut buf = [0u8; 32 * 1024];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(PluginError::from_read(e)),
        };
        writer.write_all(&buf[..n]).map_err(PluginError::Write)?;
        total += n as u64;
    }
    writer.flush().map_err(PluginError::Write)?;
    Ok(total)
}

pub struct Downloader {
    config: PluginConfig,
    fetcher: Arc<dyn Fetcher>,
    platform: Platform,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    on_retry: Option<RetryObserver>,
    show_progress: bool,
    temp_dir: Option<PathBuf>,
}

impl Downloader {
    pub fn new(config: PluginConfig, fetcher: Arc<dyn Fetcher>) -> PluginResult<Self> {
        Ok(Self {
            config,
            fetcher,
            platform: Platform::current()?,
            policy: RetryPolicy::default(),
            sleeper: Arc::new(ThreadSleeper),
            on_retry: None,
            show_progress: false,
            temp_dir: None,
        })
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn on_retry<F>(mut self, observer: F) -> Self
    where
        F: Fn(&PluginError, u32, u32, Duration) + Send + Sync + 'static,
    {
        self.on_retry = Some(Box::new(observer));
        self
    }

    /// Show an indicatif bar when the server declares a size.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Directory for temporary archives (defaults to the system temp dir).
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Ask the plugin's source for its newest release.
    pub fn latest_version(&self, spec: &PluginSpec) -> PluginResult<Version> {
        Source::resolve(spec, &self.config)?.latest_version(self.fetcher.as_ref())
    }

    /// One attempt. The temp file is removed on drop, so a failed attempt
    /// leaves nothing behind.
    pub fn download_once(&self, spec: &PluginSpec) -> PluginResult<NamedTempFile> {
        let version = spec.version.as_ref().ok_or_else(|| {
            PluginError::invalid_version("", format!("{} has no version to download", spec.name))
        })?;

        let source = Source::resolve(spec, &self.config)?;
        let download = source.download(version, &self.platform, self.fetcher.as_ref())?;

        let bar = match download.content_length {
            Some(total) if self.show_progress => Some(progress::download_progress_bar(
                total,
                &format!("Downloading {}", spec),
            )),
            _ => None,
        };
        let mut reader: Box<dyn Read + Send> = match &bar {
            Some(pb) => Box::new(pb.wrap_read(download.body)),
            None => download.body,
        };

        let mut builder = tempfile::Builder::new();
        builder.prefix(".horus-plugin-").suffix(".tar.gz");
        let mut file = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(PluginError::Write)?;

        let result = copy_split_errors(&mut reader, file.as_file_mut()).and_then(|copied| {
            match download.content_length {
                Some(expected) if expected != copied => Err(PluginError::SizeMismatch {
                    expected,
                    actual: copied,
                }),
                _ => Ok(copied),
            }
        });

        match result {
            Ok(copied) => {
                if let Some(pb) = &bar {
                    progress::finish_success(pb, &format!("Downloaded {}", spec));
                }
                log::debug!("downloaded {} ({} bytes) to {:?}", spec, copied, file.path());
            }
            Err(e) => {
                if let Some(pb) = &bar {
                    let message = format!("Failed to download {}", spec);
                    if e.is_retryable() {
                        progress::finish_warning(pb, &message);
                    } else {
                        progress::finish_error(pb, &message);
                    }
                }
                return Err(e);
            }
        }

        file.as_file_mut()
            .seek(SeekFrom::Start(0))
            .map_err(PluginError::Write)?;
        Ok(file)
    }

    /// Download with bounded exponential backoff.
    ///
    /// Only transient failures are retried; rejected requests, integrity
    /// failures and local write errors return after the attempt that hit them.
    pub fn download_to_file(&self, spec: &PluginSpec) -> PluginResult<NamedTempFile> {
        let max = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let err = match self.download_once(spec) {
                Ok(file) => return Ok(file),
                Err(err) => err,
            };

            if !err.is_retryable() {
                log::debug!("download of {} failed ({:?}), not retrying", spec, err.class());
                return Err(err);
            }
            if attempt >= max {
                return Err(PluginError::RetriesExhausted {
                    plugin: spec.label(),
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            let delay = self.policy.delay_after(attempt);
            log::warn!(
                "error downloading {} (attempt {}/{}): {}; retrying in {:?}",
                spec,
                attempt,
                max,
                err,
                delay
            );
            if let Some(observer) = &self.on_retry {
                observer(&err, attempt, max, delay);
            }
            self.sleeper.sleep(delay)?;
            attempt += 1;
        }
    }
}
