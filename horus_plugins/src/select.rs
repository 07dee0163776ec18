//! Picking an installed plugin version
//!
//! Two algorithms are kept side by side. The legacy one walks candidates in
//! scan order; the range one sorts ascending and keeps the last candidate in
//! range. Which one runs is decided by `PluginConfig::legacy_search`.

use crate::identity::{PluginInfo, PluginKind};
use semver::{Version, VersionReq};
use std::cmp::Ordering;

/// Legacy selection.
///
/// Unversioned candidates only win when nothing versioned matches. Among
/// versioned ones a release beats a pre-release, otherwise strictly greater
/// wins; equal versions keep the first seen. With `version` set, candidates
/// below it are ignored.
pub fn legacy_select<'a>(
    plugins: &'a [PluginInfo],
    kind: PluginKind,
    name: &str,
    version: Option<&Version>,
) -> Option<&'a PluginInfo> {
    let at_least_requested = |candidate: &Version| version.map_or(true, |v| candidate >= v);

    let mut best: Option<&PluginInfo> = None;
    for plugin in plugins.iter().filter(|p| p.kind == kind && p.name == name) {
        let take = match (best.and_then(|b| b.version.as_ref()), &plugin.version) {
            // first candidate
            _ if best.is_none() => match &plugin.version {
                None => version.is_none(),
                Some(v) => at_least_requested(v),
            },
            (None, Some(v)) => at_least_requested(v),
            (Some(current), Some(v)) => at_least_requested(v) && is_preferred(v, current),
            (_, None) => false,
        };

        if take {
            log::trace!("legacy_select({}): candidate {}", name, plugin);
            best = Some(plugin);
        }
    }
    best
}

/// Release over pre-release, then strictly greater.
fn is_preferred(candidate: &Version, current: &Version) -> bool {
    match (candidate.pre.is_empty(), current.pre.is_empty()) {
        (true, false) => true,
        (false, true) => false,
        _ => candidate > current,
    }
}

/// Unversioned sorts lowest.
fn cmp_version(a: &PluginInfo, b: &PluginInfo) -> Ordering {
    match (&a.version, &b.version) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => x.cmp(y),
    }
}

/// Range selection: the highest version satisfying `requested`.
///
/// An unversioned plugin is only returned when no versioned candidate is in
/// range.
pub fn select_compatible<'a>(
    plugins: &'a [PluginInfo],
    kind: PluginKind,
    name: &str,
    requested: &VersionReq,
) -> Option<&'a PluginInfo> {
    let mut candidates: Vec<&PluginInfo> = plugins
        .iter()
        .filter(|p| p.kind == kind && p.name == name)
        .collect();
    candidates.sort_by(|a, b| cmp_version(a, b));

    let mut best: Option<&PluginInfo> = None;
    for plugin in candidates {
        match &plugin.version {
            None if best.is_none() => {
                log::trace!("select_compatible({}): unversioned {} as fallback", name, plugin);
                best = Some(plugin);
            }
            None => {}
            Some(v) if requested.matches(v) => {
                log::trace!("select_compatible({}): {} matches {}", name, plugin, requested);
                best = Some(plugin);
            }
            Some(_) => {}
        }
    }

    if best.is_none() {
        log::debug!("select_compatible({}): nothing satisfies {}", name, requested);
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::parse_range;
    use std::path::PathBuf;

    fn info(kind: PluginKind, name: &str, version: Option<&str>) -> PluginInfo {
        PluginInfo::new(
            kind,
            name,
            version.map(|v| Version::parse(v).unwrap()),
            PathBuf::from(format!("/cache/{}-{}", kind, name)),
        )
    }

    fn resources(versions: &[Option<&str>]) -> Vec<PluginInfo> {
        versions
            .iter()
            .map(|v| info(PluginKind::Resource, "aws", *v))
            .collect()
    }

    fn selected_version(p: Option<&PluginInfo>) -> Option<String> {
        p.and_then(|p| p.version.as_ref()).map(|v| v.to_string())
    }

    #[test]
    fn test_range_patch_version_slide() {
        let plugins = resources(&[Some("0.2.1"), Some("0.1.0"), Some("0.3.0"), Some("0.2.0")]);
        let req = parse_range(">=0.2.0 <0.3.0").unwrap();
        let selected = select_compatible(&plugins, PluginKind::Resource, "aws", &req);
        assert_eq!(selected_version(selected).as_deref(), Some("0.2.1"));
    }

    #[test]
    fn test_range_exact_request() {
        let plugins = resources(&[Some("0.1.0"), Some("0.2.1")]);
        let req = parse_range("0.2.0").unwrap();
        assert!(select_compatible(&plugins, PluginKind::Resource, "aws", &req).is_none());

        let plugins = resources(&[Some("0.2.0"), Some("0.2.1")]);
        let selected = select_compatible(&plugins, PluginKind::Resource, "aws", &req);
        assert_eq!(selected_version(selected).as_deref(), Some("0.2.0"));
    }

    #[test]
    fn test_range_unversioned_only_as_fallback() {
        let plugins = resources(&[None, Some("1.0.0")]);
        let req = parse_range(">=1.0.0").unwrap();
        let selected = select_compatible(&plugins, PluginKind::Resource, "aws", &req);
        assert_eq!(selected_version(selected).as_deref(), Some("1.0.0"));

        let req = parse_range(">=2.0.0").unwrap();
        let selected = select_compatible(&plugins, PluginKind::Resource, "aws", &req).unwrap();
        assert!(selected.version.is_none());
    }

    #[test]
    fn test_range_filters_kind_and_name() {
        let plugins = vec![
            info(PluginKind::Tool, "aws", Some("1.0.0")),
            info(PluginKind::Resource, "gcp", Some("1.0.0")),
        ];
        let req = parse_range(">=0.0.0").unwrap();
        assert!(select_compatible(&plugins, PluginKind::Resource, "aws", &req).is_none());
    }

    #[test]
    fn test_legacy_prefers_release_over_prerelease() {
        let orders = [
            ["0.1.0", "0.2.0", "0.3.0-alpha"],
            ["0.3.0-alpha", "0.1.0", "0.2.0"],
            ["0.2.0", "0.3.0-alpha", "0.1.0"],
            ["0.3.0-alpha", "0.2.0", "0.1.0"],
        ];
        for order in orders {
            let plugins = resources(&order.map(Some));
            let selected = legacy_select(&plugins, PluginKind::Resource, "aws", None);
            assert_eq!(
                selected_version(selected).as_deref(),
                Some("0.2.0"),
                "order {:?}",
                order
            );
        }
    }

    #[test]
    fn test_legacy_picks_highest() {
        let plugins = resources(&[Some("1.0.0"), Some("3.0.0"), Some("2.0.0")]);
        let selected = legacy_select(&plugins, PluginKind::Resource, "aws", None);
        assert_eq!(selected_version(selected).as_deref(), Some("3.0.0"));
    }

    #[test]
    fn test_legacy_with_minimum_version() {
        let plugins = resources(&[Some("1.0.0"), Some("1.5.0"), Some("0.9.0")]);
        let min = Version::new(1, 2, 0);
        let selected = legacy_select(&plugins, PluginKind::Resource, "aws", Some(&min));
        assert_eq!(selected_version(selected).as_deref(), Some("1.5.0"));

        let min = Version::new(2, 0, 0);
        assert!(legacy_select(&plugins, PluginKind::Resource, "aws", Some(&min)).is_none());
    }

    #[test]
    fn test_legacy_unversioned() {
        let plugins = resources(&[None, Some("0.1.0")]);
        let selected = legacy_select(&plugins, PluginKind::Resource, "aws", None);
        assert_eq!(selected_version(selected).as_deref(), Some("0.1.0"));

        let plugins = resources(&[None]);
        let selected = legacy_select(&plugins, PluginKind::Resource, "aws", None).unwrap();
        assert!(selected.version.is_none());

        let min = Version::new(0, 1, 0);
        assert!(legacy_select(&plugins, PluginKind::Resource, "aws", Some(&min)).is_none());
    }

    #[test]
    fn test_legacy_ties_keep_first() {
        let mut plugins = resources(&[Some("1.0.0"), Some("1.0.0")]);
        plugins[1].path = PathBuf::from("/second");
        let selected = legacy_select(&plugins, PluginKind::Resource, "aws", None).unwrap();
        assert_eq!(selected.path, PathBuf::from("/cache/resource-aws"));
    }
}
