//! Changelog text tokenizer
//!
//! Splits a newest-first changelog into one segment per version:
//!
//! ```text
//! 1.3.2 (unreleased)
//! ------------------
//! * feature: something
//!   continued
//!
//! 1.3.0 (2011-09-30) r17790 alice
//! -------------------------------
//! * bugfix: ...
//! ```
//!
//! A header starts at column 0 with a dotted version, followed by an optional
//! `-` and an optional date in parentheses (or a bare `YYYY-MM-DD`). Whatever
//! follows is metadata: an optional `r<rev>` token, the rest is the author.
//! Without a date the metadata has to start with the revision, so prose such as
//! `1.5 million users` stays body text.
//! Text in the parentheses that is not a date (`unreleased`, `in development`)
//! marks the release as pending. Only the first header may be pending.

use std::collections::HashSet;
use std::iter::{Enumerate, Peekable};
use std::str::Lines;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use thiserror::Error;

use crate::models::{ReleaseFields, ReleaseNumber};

static HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<version>\d+(?:\.[0-9A-Za-z][0-9A-Za-z-]*)+)(?:\s+-)?(?:\s*\((?P<date>[^)]*)\)|\s+(?P<bare>\d{4}[-/]\d{2}[-/]\d{2}))?(?P<tail>.*)$",
    )
    .expect("changelog header pattern is valid")
});

static REVISION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^r\d+$").expect("revision pattern is valid"));

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d.%m.%Y"];

/// The changelog cannot be turned into a consistent release list
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChangelogError {
    #[error("malformed changelog at line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

/// One version's header and body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangelogSegment {
    pub version: String,
    /// `None` for the pending (unreleased) entry
    pub date: Option<NaiveDate>,
    pub number: Option<ReleaseNumber>,
    pub author: Option<String>,
    /// First body line without its bullet
    pub message: Option<String>,
    pub body: String,
    /// 1-based line of the header
    pub line: usize,
}

impl ChangelogSegment {
    pub fn is_pending(&self) -> bool {
        self.date.is_none()
    }

    pub fn release_fields(&self) -> ReleaseFields {
        ReleaseFields {
            datev: self.date,
            number: self.number.clone(),
            author: self.author.clone(),
            message: self.message.clone(),
            changelog: self.body.clone(),
        }
    }
}

/// Parser over borrowed changelog text
#[derive(Debug, Clone, Copy)]
pub struct ChangelogParser<'a> {
    text: &'a str,
}

impl<'a> ChangelogParser<'a> {
    pub fn new(text: &'a str) -> Self {
        Self { text }
    }

    /// Lazy iterator over the segments, newest first. Call again to restart.
    pub fn segments(&self) -> Segments<'a> {
        Segments {
            lines: self.text.lines().enumerate().peekable(),
            headers_seen: 0,
            versions: HashSet::new(),
            failed: false,
        }
    }

    /// Every segment, or the first error
    pub fn parse_all(&self) -> Result<Vec<ChangelogSegment>, ChangelogError> {
        self.segments().collect()
    }
}

/// Iterator returned by [`ChangelogParser::segments`]
///
/// Yields `Err` at most once, then stops.
#[derive(Debug, Clone)]
pub struct Segments<'a> {
    lines: Peekable<Enumerate<Lines<'a>>>,
    headers_seen: usize,
    versions: HashSet<String>,
    failed: bool,
}

struct Header {
    version: String,
    date: Option<NaiveDate>,
    number: Option<ReleaseNumber>,
    author: Option<String>,
}

impl<'a> Iterator for Segments<'a> {
    type Item = Result<ChangelogSegment, ChangelogError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_segment() {
            Some(Err(e)) => {
                self.failed = true;
                Some(Err(e))
            }
            other => other,
        }
    }
}

impl<'a> Segments<'a> {
    fn next_segment(&mut self) -> Option<Result<ChangelogSegment, ChangelogError>> {
        // Skip the preamble (or anything the previous body left behind)
        let (index, header_line) = loop {
            let (index, line) = self.lines.next()?;
            if is_header(line) {
                break (index, line);
            }
        };
        let line_no = index + 1;

        let header = match parse_header(header_line, line_no) {
            Ok(header) => header,
            Err(e) => return Some(Err(e)),
        };

        if header.date.is_none() && self.headers_seen > 0 {
            return Some(Err(ChangelogError::Malformed {
                line: line_no,
                reason: format!(
                    "release {} has no date but is not the newest entry",
                    header.version
                ),
            }));
        }
        if !self.versions.insert(header.version.clone()) {
            return Some(Err(ChangelogError::Malformed {
                line: line_no,
                reason: format!("release {} appears more than once", header.version),
            }));
        }
        self.headers_seen += 1;

        if let Some(&(_, line)) = self.lines.peek() {
            if is_underline(line) {
                self.lines.next();
            }
        }

        let mut body_lines: Vec<&str> = Vec::new();
        while let Some(&(_, line)) = self.lines.peek() {
            if is_header(line) {
                break;
            }
            body_lines.push(line.trim_end());
            self.lines.next();
        }

        let body = join_body(&body_lines);
        let message = body
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(strip_bullet);

        Some(Ok(ChangelogSegment {
            version: header.version,
            date: header.date,
            number: header.number,
            author: header.author,
            message,
            body,
            line: line_no,
        }))
    }
}

/// Whether a line starts a new version segment
pub fn is_header(line: &str) -> bool {
    header_captures(line).is_some()
}

fn header_captures(line: &str) -> Option<Captures<'_>> {
    let caps = HEADER.captures(line)?;
    let tail = caps.name("tail").map_or("", |m| m.as_str());
    if tail.trim().is_empty() {
        return Some(caps);
    }
    if !tail.starts_with(char::is_whitespace) {
        return None;
    }
    let dated = caps.name("date").is_some() || caps.name("bare").is_some();
    let revision_first = tail
        .split_whitespace()
        .next()
        .is_some_and(|token| REVISION.is_match(token));
    (dated || revision_first).then_some(caps)
}

/// Split header metadata into an optional revision token and the author
fn split_tail(tail: &str) -> (Option<&str>, Option<String>) {
    let mut tokens = tail.split_whitespace().peekable();
    let rev = tokens.next_if(|token| REVISION.is_match(token));
    let author = tokens.collect::<Vec<_>>().join(" ");
    (rev, (!author.is_empty()).then_some(author))
}

fn parse_header(line: &str, line_no: usize) -> Result<Header, ChangelogError> {
    let caps = header_captures(line).ok_or_else(|| ChangelogError::Malformed {
        line: line_no,
        reason: "not a version header".to_string(),
    })?;
    let (rev, author) = split_tail(caps.name("tail").map_or("", |m| m.as_str()));

    let date_text = caps
        .name("date")
        .or_else(|| caps.name("bare"))
        .map(|m| m.as_str().trim());
    let number = rev
        .map(|rev| {
            ReleaseNumber::parse(rev).map_err(|e| ChangelogError::Malformed {
                line: line_no,
                reason: e.to_string(),
            })
        })
        .transpose()?;

    Ok(Header {
        version: caps["version"].to_string(),
        date: date_text.and_then(parse_date),
        number,
        author,
    })
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
}

fn is_underline(line: &str) -> bool {
    let trimmed = line.trim();
    match trimmed.chars().next() {
        Some(first @ ('-' | '=' | '~')) => trimmed.chars().all(|c| c == first),
        _ => false,
    }
}

// Drop blank lines at both ends, keep the ones in between.
fn join_body(lines: &[&str]) -> String {
    let start = lines.iter().position(|l| !l.is_empty());
    let end = lines.iter().rposition(|l| !l.is_empty());
    match (start, end) {
        (Some(start), Some(end)) => lines[start..=end].join("\n"),
        _ => String::new(),
    }
}

fn strip_bullet(line: &str) -> String {
    line.strip_prefix("* ")
        .or_else(|| line.strip_prefix("- "))
        .unwrap_or(line)
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHANGELOG0: &str = include_str!("../../../testdata/changelog0.txt");

    fn date(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    #[test]
    fn test_parse_sample_changelog() {
        let segments = ChangelogParser::new(CHANGELOG0).parse_all().unwrap();
        let versions: Vec<&str> = segments.iter().map(|s| s.version.as_str()).collect();
        assert_eq!(versions, vec!["1.2.6", "1.2.5", "1.2.2"]);

        assert!(segments[0].is_pending());
        assert_eq!(segments[1].date, date(2011, 9, 23));
        assert_eq!(segments[1].number.as_ref().map(ReleaseNumber::as_str), Some("r17721"));
        assert_eq!(segments[1].author.as_deref(), Some("moregale"));
        assert_eq!(
            segments[2].body,
            "* Last version where Products.NaayaSurvey and Products.NaayaWidgets were separate packages"
        );
    }

    #[test]
    fn test_body_keeps_inner_blank_lines_and_continuations() {
        let text = "\
2.0 (2012-01-02)
----------------

* first item
  continued on the next line

* second item


1.9 (2011-12-01)
* older
";
        let segments = ChangelogParser::new(text).parse_all().unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(
            segments[0].body,
            "* first item\n  continued on the next line\n\n* second item"
        );
        assert_eq!(segments[0].message.as_deref(), Some("first item"));
        assert_eq!(segments[1].body, "* older");
    }

    #[test]
    fn test_preamble_is_ignored() {
        let text = "Changelog\n=========\n\nSome intro text.\n\n1.0 (2010-05-05)\n* initial\n";
        let segments = ChangelogParser::new(text).parse_all().unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].version, "1.0");
        assert_eq!(segments[0].line, 6);
    }

    #[test]
    fn test_header_variants() {
        assert!(is_header("1.2.6 (unreleased)"));
        assert!(is_header("1.2.5 - (2011-09-23)"));
        assert!(is_header("1.2.5 - 2011-09-23"));
        assert!(is_header("1.0b1 (2010/05/05) r100 bob"));
        assert!(is_header("1.2.2"));
        assert!(!is_header("  1.2.2 (2011-07-18)"));
        assert!(!is_header("* 1.2 compatible"));
        assert!(!is_header("1.5 million users now supported"));
        assert!(!is_header("2 (2011-07-18)"));

        let segments = ChangelogParser::new("3.0 (30.01.2012)\n* x\n2.9 2011/12/31\n* y\n")
            .parse_all()
            .unwrap();
        assert_eq!(segments[0].date, date(2012, 1, 30));
        assert_eq!(segments[1].date, date(2011, 12, 31));
    }

    #[test]
    fn test_header_metadata_is_lenient() {
        let text = "\
1.2.6 (unreleased)
* a

1.2.5 (2011-09-23) r17721 Alex Morega
* b

1.2.4 (2011-09-01) moregale
* c

1.2.2 (2011-07-18)
* d
";
        let segments = ChangelogParser::new(text).parse_all().unwrap();
        let versions: Vec<&str> = segments.iter().map(|s| s.version.as_str()).collect();
        assert_eq!(versions, vec!["1.2.6", "1.2.5", "1.2.4", "1.2.2"]);
        assert_eq!(segments[0].body, "* a");

        assert_eq!(segments[1].number.as_ref().map(ReleaseNumber::as_str), Some("r17721"));
        assert_eq!(segments[1].author.as_deref(), Some("Alex Morega"));

        assert_eq!(segments[2].date, date(2011, 9, 1));
        assert_eq!(segments[2].number, None);
        assert_eq!(segments[2].author.as_deref(), Some("moregale"));

        assert_eq!(segments[3].author, None);
    }

    #[test]
    fn test_undated_header_needs_revision_before_author() {
        assert!(is_header("1.3 r200 Alex Morega"));
        assert!(!is_header("1.3 fixes everything"));
        assert!(!is_header("1.3.x branch notes"));
    }

    #[test]
    fn test_only_newest_entry_may_be_pending() {
        let text = "1.1 (2011-02-02)\n* a\n\n1.0 (unreleased)\n* b\n";
        let err = ChangelogParser::new(text).parse_all().unwrap_err();
        assert_eq!(
            err,
            ChangelogError::Malformed {
                line: 4,
                reason: "release 1.0 has no date but is not the newest entry".to_string()
            }
        );
    }

    #[test]
    fn test_two_pending_entries_rejected() {
        let text = "1.2 (unreleased)\n1.1 (in development)\n1.0 (2011-01-01)\n";
        assert!(matches!(
            ChangelogParser::new(text).parse_all(),
            Err(ChangelogError::Malformed { line: 2, .. })
        ));
    }

    #[test]
    fn test_duplicate_version_rejected() {
        let text = "1.1 (2011-02-02)\n1.1 (2011-01-01)\n";
        assert!(matches!(
            ChangelogParser::new(text).parse_all(),
            Err(ChangelogError::Malformed { line: 2, .. })
        ));
    }

    #[test]
    fn test_invalid_revision_rejected() {
        let text = "1.1 (2011-02-02) r0 bob\n* x\n";
        assert!(matches!(
            ChangelogParser::new(text).parse_all(),
            Err(ChangelogError::Malformed { line: 1, .. })
        ));
    }

    #[test]
    fn test_segments_are_lazy_and_restartable() {
        let text = "1.2 (2011-03-03)\n* c\n1.1 (unreleased)\n* b\n";
        let parser = ChangelogParser::new(text);

        let mut segments = parser.segments();
        assert_eq!(segments.next().unwrap().unwrap().version, "1.2");
        assert!(segments.next().unwrap().is_err());
        assert!(segments.next().is_none());

        let mut restarted = parser.segments();
        assert_eq!(restarted.next().unwrap().unwrap().version, "1.2");
    }

    #[test]
    fn test_empty_input() {
        assert!(ChangelogParser::new("").parse_all().unwrap().is_empty());
        assert!(ChangelogParser::new("No releases yet\n").parse_all().unwrap().is_empty());
    }

    #[test]
    fn test_release_fields() {
        let segments = ChangelogParser::new(CHANGELOG0).parse_all().unwrap();
        let fields = segments[1].release_fields();
        assert_eq!(fields.datev, date(2011, 9, 23));
        assert_eq!(fields.changelog, segments[1].body);
        assert_eq!(
            fields.message.as_deref(),
            Some("Fixed encoding of answers exported to Excel")
        );
    }
}
