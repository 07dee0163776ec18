//! Version parsing helpers
//!
//! Release tags and directory names are looser than strict semver
//! (`v1.23`, `2`), and range strings use space-separated comparators.

use crate::error::{PluginError, PluginResult};
use semver::{Version, VersionReq};

/// Parse a version, accepting a leading `v` and missing minor/patch parts.
pub fn parse_tolerant(input: &str) -> PluginResult<Version> {
    let trimmed = input.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);

    let split = trimmed.find(|c: char| c == '-' || c == '+').unwrap_or(trimmed.len());
    let (core, rest) = trimmed.split_at(split);

    let mut parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty() || parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
        return Err(PluginError::invalid_version(input, "expected MAJOR[.MINOR[.PATCH]]"));
    }
    while parts.len() < 3 {
        parts.push("0");
    }

    // semver rejects leading zeros in numeric parts
    let normalized: Vec<String> = parts
        .iter()
        .map(|p| match p.parse::<u64>() {
            Ok(n) => n.to_string(),
            Err(_) => p.to_string(),
        })
        .collect();

    let candidate = format!("{}{}", normalized.join("."), rest);
    Version::parse(&candidate).map_err(|e| PluginError::invalid_version(input, e))
}

/// Parse a version range such as `>=0.2.0 <0.3.0`, `^1.2` or a bare `1.2.3`.
///
/// Accepted grammar: comparators separated by whitespace or commas, all of
/// which must hold. An operator may be detached from its version
/// (`>= 0.2.0`). A bare version means exactly that version. Alternatives
/// (`||`) are not supported.
pub fn parse_range(input: &str) -> PluginResult<VersionReq> {
    if input.contains("||") {
        return Err(PluginError::invalid_version(
            input,
            "alternative ranges (`||`) are not supported",
        ));
    }

    let mut comparators: Vec<String> = Vec::new();
    let mut pending_op: Option<&str> = None;
    for token in input
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
    {
        if token.chars().all(is_operator_char) {
            if pending_op.is_some() {
                return Err(PluginError::invalid_version(input, "operator without a version"));
            }
            pending_op = Some(token);
            continue;
        }

        let comparator = match pending_op.take() {
            Some(op) => format!("{}{}", op, token.trim_start_matches('v')),
            None if token.starts_with(|ch: char| ch.is_ascii_digit() || ch == 'v') => {
                format!("={}", token.trim_start_matches('v'))
            }
            None => token.to_string(),
        };
        comparators.push(comparator);
    }

    if pending_op.is_some() {
        return Err(PluginError::invalid_version(input, "operator without a version"));
    }
    if comparators.is_empty() {
        return Err(PluginError::invalid_version(input, "empty version range"));
    }

    VersionReq::parse(&comparators.join(", ")).map_err(|e| PluginError::invalid_version(input, e))
}

fn is_operator_char(c: char) -> bool {
    matches!(c, '<' | '>' | '=' | '~' | '^')
}

/// The range matching exactly `version`.
pub fn exact(version: &Version) -> PluginResult<VersionReq> {
    parse_range(&version.to_string())
}
