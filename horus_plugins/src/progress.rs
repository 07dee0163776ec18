//! Progress indicators for plugin downloads
//!
//! Byte progress bars for archive downloads plus the status markers the
//! HORUS CLI prints when an operation finishes.

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};

/// Global quiet mode flag
static QUIET_MODE: AtomicBool = AtomicBool::new(false);

/// Set global quiet mode
pub fn set_quiet(quiet: bool) {
    QUIET_MODE.store(quiet, Ordering::SeqCst);
}

/// Check if quiet mode is enabled
pub fn is_quiet() -> bool {
    QUIET_MODE.load(Ordering::SeqCst)
}

// [+] success, [-] error, [!] warning
pub const STATUS_SUCCESS: &str = "[+]";
pub const STATUS_ERROR: &str = "[-]";
pub const STATUS_WARNING: &str = "[!]";

/// Create a progress bar for byte downloads
pub fn download_progress_bar(total: u64, message: &str) -> ProgressBar {
    if is_quiet() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    let bar_style = ProgressStyle::default_bar()
        .template("{msg}\n       [{elapsed_precise}] [{bar:40.green/black}] {bytes}/{total_bytes} ({bytes_per_sec})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█░-");
    pb.set_style(bar_style);
    pb.set_message(message.to_string());
    pb
}

fn message_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Finish a bar with success
pub fn finish_success(pb: &ProgressBar, message: &str) {
    pb.set_style(message_style());
    pb.finish_with_message(format!("{} {}", STATUS_SUCCESS, style(message).green()));
}

/// Finish a bar with warning
pub fn finish_warning(pb: &ProgressBar, message: &str) {
    pb.set_style(message_style());
    pb.finish_with_message(format!("{} {}", STATUS_WARNING, style(message).yellow()));
}

/// Finish a bar with error
pub fn finish_error(pb: &ProgressBar, message: &str) {
    pb.set_style(message_style());
    pb.finish_with_message(format!("{} {}", STATUS_ERROR, style(message).red()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};

    #[test]
    fn test_quiet_mode_hides_bar() {
        set_quiet(true);
        let pb = download_progress_bar(100, "downloading");
        assert!(pb.is_hidden());
        set_quiet(false);
    }

    #[test]
    fn test_wrapped_reader_tracks_bytes() {
        let pb = ProgressBar::hidden();
        pb.set_length(5);
        let mut reader = pb.wrap_read(Cursor::new(b"bytes".to_vec()));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(pb.position(), 5);
        finish_success(&pb, "done");
        assert!(pb.is_finished());
    }
}
