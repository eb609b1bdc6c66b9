//! Version string ordering
//!
//! Versions are split on `.` and compared segment by segment. Two all-digit
//! segments compare numerically; anything else compares as plain, case-sensitive
//! strings. This is deliberately not semver: `"1-b"` sorts after `"1"` simply
//! because it is the longer string with the same prefix, and `"10"` sorts before
//! `"9a"` because a mixed pair falls back to string order.

use std::cmp::Ordering;

/// Compare two version strings
///
/// When every shared segment is equal, the version with more segments is later,
/// unless all of its extra segments are empty (`"1."` equals `"1"`).
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let a_parts: Vec<&str> = a.split('.').collect();
    let b_parts: Vec<&str> = b.split('.').collect();

    for (a_seg, b_seg) in a_parts.iter().zip(b_parts.iter()) {
        match compare_segments(a_seg, b_seg) {
            Ordering::Equal => {}
            ord => return ord,
        }
    }

    let shared = a_parts.len().min(b_parts.len());
    let a_rest = a_parts[shared..].iter().any(|seg| !seg.is_empty());
    let b_rest = b_parts[shared..].iter().any(|seg| !seg.is_empty());

    match (a_rest, b_rest) {
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

/// Return whichever of `a` and `b` is the later version (`a` on a tie)
pub fn later<'a>(a: &'a str, b: &'a str) -> &'a str {
    match compare_versions(a, b) {
        Ordering::Less => b,
        _ => a,
    }
}

fn compare_segments(a: &str, b: &str) -> Ordering {
    if is_numeric(a) && is_numeric(b) {
        compare_numeric(a, b)
    } else {
        a.cmp(b)
    }
}

fn is_numeric(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|c| c.is_ascii_digit())
}

// Digit strings of any length: drop leading zeros, then a longer number is larger.
fn compare_numeric(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}
