//! Small shared helpers: timestamps, name validation, version comparison.

use std::cmp::Ordering;
use std::sync::OnceLock;

use regex::Regex;

/// Current time as Unix milliseconds.
#[must_use]
pub fn unix_timestamp_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Trim a string option, mapping empty results to `None`.
#[must_use]
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9@._+-]*$").expect("Invalid regex")
    })
}

/// Whether `name` is a valid package/pool/endpoint name.
///
/// Mirrors pacman's naming rules: leading alphanumeric, then
/// alphanumerics plus `@ . _ + -`.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    name_pattern().is_match(name)
}

/// Compare two package version strings, pacman `vercmp` style.
///
/// Handles `epoch:version-release`: epochs compare numerically first,
/// then version and release are compared segment-wise, where numeric
/// segments compare as integers and alphabetic segments lexically.
/// Numeric segments sort after alphabetic ones (`1.0a < 1.0.1`).
#[must_use]
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let (epoch_a, rest_a) = split_epoch(a);
    let (epoch_b, rest_b) = split_epoch(b);
    match epoch_a.cmp(&epoch_b) {
        Ordering::Equal => {}
        other => return other,
    }

    let (ver_a, rel_a) = split_release(rest_a);
    let (ver_b, rel_b) = split_release(rest_b);
    match compare_segments(ver_a, ver_b) {
        Ordering::Equal => {}
        other => return other,
    }

    match (rel_a, rel_b) {
        (Some(ra), Some(rb)) => compare_segments(ra, rb),
        // A missing release matches any release (pacman treats it as a wildcard)
        _ => Ordering::Equal,
    }
}

fn split_epoch(version: &str) -> (i64, &str) {
    match version.split_once(':') {
        Some((epoch, rest)) => (epoch.parse().unwrap_or(0), rest),
        None => (0, version),
    }
}

fn split_release(version: &str) -> (&str, Option<&str>) {
    match version.rsplit_once('-') {
        Some((ver, rel)) => (ver, Some(rel)),
        None => (version, None),
    }
}

fn compare_segments(a: &str, b: &str) -> Ordering {
    let mut segs_a = segments(a);
    let mut segs_b = segments(b);

    loop {
        match (segs_a.next(), segs_b.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(sa), Some(sb)) => {
                let numeric_a = sa.chars().all(|c| c.is_ascii_digit());
                let numeric_b = sb.chars().all(|c| c.is_ascii_digit());
                let ord = match (numeric_a, numeric_b) {
                    (true, true) => {
                        let na: u64 = sa.trim_start_matches('0').parse().unwrap_or(0);
                        let nb: u64 = sb.trim_start_matches('0').parse().unwrap_or(0);
                        na.cmp(&nb)
                    }
                    // Numeric segments are considered newer than alphabetic ones
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    (false, false) => sa.cmp(sb),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

fn segments(version: &str) -> impl Iterator<Item = &str> {
    version
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|segment| !segment.is_empty())
        .flat_map(split_alpha_numeric_runs)
}

fn split_alpha_numeric_runs(segment: &str) -> Vec<&str> {
    let mut runs = Vec::new();
    let mut start = 0;
    let bytes = segment.as_bytes();
    for i in 1..bytes.len() {
        let prev_digit = bytes[i - 1].is_ascii_digit();
        let cur_digit = bytes[i].is_ascii_digit();
        if prev_digit != cur_digit {
            runs.push(&segment[start..i]);
            start = i;
        }
    }
    runs.push(&segment[start..]);
    runs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names() {
        assert!(is_valid_name("glibc"));
        assert!(is_valid_name("gtk3"));
        assert!(is_valid_name("libreoffice-fresh"));
        assert!(is_valid_name("python-pip"));
        assert!(is_valid_name("java8-openjdk"));
        assert!(is_valid_name("c++"));
    }

    #[test]
    fn invalid_names() {
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("-leading-dash"));
        assert!(!is_valid_name("has space"));
        assert!(!is_valid_name(".hidden"));
    }

    #[test]
    fn normalize_trims_and_drops_empty() {
        assert_eq!(
            normalize_text_option(Some("  core  ".to_string())),
            Some("core".to_string())
        );
        assert_eq!(normalize_text_option(Some("   ".to_string())), None);
        assert_eq!(normalize_text_option(None), None);
    }

    #[test]
    fn version_ordering_basics() {
        assert_eq!(compare_versions("1.0", "1.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.0", "1.1"), Ordering::Less);
        assert_eq!(compare_versions("2.0", "1.9.9"), Ordering::Greater);
        assert_eq!(compare_versions("1.10", "1.9"), Ordering::Greater);
    }

    #[test]
    fn version_ordering_release_and_epoch() {
        assert_eq!(compare_versions("1.0-1", "1.0-2"), Ordering::Less);
        assert_eq!(compare_versions("1.0", "1.0-5"), Ordering::Equal);
        assert_eq!(compare_versions("1:0.5", "2.0"), Ordering::Greater);
        assert_eq!(compare_versions("2:1.0", "1:9.0"), Ordering::Greater);
    }

    #[test]
    fn version_ordering_alpha_segments() {
        assert_eq!(compare_versions("1.0a", "1.0b"), Ordering::Less);
        assert_eq!(compare_versions("1.0a", "1.0.1"), Ordering::Less);
        assert_eq!(compare_versions("1.0rc1", "1.0rc2"), Ordering::Less);
    }

    #[test]
    fn version_leading_zeroes_compare_numerically() {
        assert_eq!(compare_versions("1.01", "1.1"), Ordering::Equal);
        assert_eq!(compare_versions("1.010", "1.10"), Ordering::Equal);
    }
}
