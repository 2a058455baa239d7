//! Subject templates.
//!
//! A template is plain text with brace-delimited placeholders that address
//! the segments of a path (for HTTP → NATS) or of a subject (for NATS → HTTP):
//!
//! | placeholder | result |
//! |---|---|
//! | `{subject}` | every segment, joined by `.` |
//! | `{subject.N}` | segment `N`, or nothing when out of range |
//! | `{subject.N:M}` | segments `N` through `M` inclusive, `M` clamped |
//! | `{subject.N:}` | segments from `N` to the end |
//! | `{subject.:M}` | segments from the start through `M` |
//! | `{subject.asUrlPath...}` | same selections, joined by `/` |
//!
//! The `nats.` prefix (`{nats.subject.1}`) is accepted as well. Anything else
//! is copied through untouched, so resolution can never fail.

use std::fmt;

use serde::Deserialize;

const SUBJECT_SEPARATOR: char = '.';
const URL_PATH_SEPARATOR: char = '/';

/// A subject (or URL) template, resolved per request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct SubjectTemplate(String);

impl SubjectTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn resolve<S: AsRef<str>>(&self, segments: &[S]) -> String {
        resolve(&self.0, segments)
    }
}

impl fmt::Display for SubjectTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubjectTemplate {
    fn from(template: &str) -> Self {
        Self::new(template)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Selection {
    All,
    Index(usize),
    Range { start: usize, end: Option<usize> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Placeholder {
    separator: char,
    selection: Selection,
}

impl Placeholder {
    fn parse(token: &str) -> Option<Self> {
        let token = token.strip_prefix("nats.").unwrap_or(token);
        let rest = token.strip_prefix("subject")?;
        let (separator, rest) = match rest.strip_prefix(".asUrlPath") {
            Some(rest) => (URL_PATH_SEPARATOR, rest),
            None => (SUBJECT_SEPARATOR, rest),
        };

        if rest.is_empty() {
            return Some(Self {
                separator,
                selection: Selection::All,
            });
        }

        let selector = rest.strip_prefix('.')?;
        let selection = match selector.split_once(':') {
            None => Selection::Index(parse_index(selector)?),
            Some((start, end)) => Selection::Range {
                start: parse_bound(start)?.unwrap_or(0),
                end: parse_bound(end)?,
            },
        };
        Some(Self {
            separator,
            selection,
        })
    }

    fn render<S: AsRef<str>>(&self, segments: &[S], out: &mut String) {
        let selected: &[S] = match self.selection {
            Selection::All => segments,
            Selection::Index(n) => match segments.get(n) {
                Some(segment) => std::slice::from_ref(segment),
                None => &[],
            },
            Selection::Range { start, end } => {
                let Some(last_index) = segments.len().checked_sub(1) else {
                    return;
                };
                let last = end.map_or(last_index, |end| end.min(last_index));
                if start > last {
                    return;
                }
                &segments[start..=last]
            }
        };

        for (i, segment) in selected.iter().enumerate() {
            if i > 0 {
                out.push(self.separator);
            }
            out.push_str(segment.as_ref());
        }
    }
}

fn parse_index(raw: &str) -> Option<usize> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

/// Empty means "open"; anything non-numeric is not a placeholder.
fn parse_bound(raw: &str) -> Option<Option<usize>> {
    if raw.is_empty() {
        Some(None)
    } else {
        parse_index(raw).map(Some)
    }
}

/// Substitute every placeholder in `template` using `segments`.
pub fn resolve<S: AsRef<str>>(template: &str, segments: &[S]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let candidate = &rest[open..];

        let Some(close) = candidate.find('}') else {
            out.push_str(candidate);
            return out;
        };
        let token = &candidate[1..close];

        if token.contains('{') {
            // `{{subject}`: emit the first brace and rescan from the next one.
            out.push('{');
            rest = &candidate[1..];
            continue;
        }

        match Placeholder::parse(token) {
            Some(placeholder) => placeholder.render(segments, &mut out),
            None => out.push_str(&candidate[..=close]),
        }
        rest = &candidate[close + 1..];
    }

    out.push_str(rest);
    out
}

/// Segments of an HTTP path: the query string is dropped, as are the leading
/// and trailing slashes.
pub fn path_segments(path: &str) -> Vec<String> {
    let path = path.split_once('?').map_or(path, |(path, _)| path);
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Vec::new();
    }
    trimmed.split('/').map(str::to_string).collect()
}

/// Segments of a NATS subject.
pub fn subject_segments(subject: &str) -> Vec<String> {
    if subject.is_empty() {
        return Vec::new();
    }
    subject.split(SUBJECT_SEPARATOR).map(str::to_string).collect()
}
