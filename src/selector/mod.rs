//! Selector compilation and evaluation.
//!
//! One selector is active per invocation, chosen by subcommand:
//!
//! ```text
//! name  PATTERN              entry name (or full virtual path) regex
//! regex NAME_PAT PATTERN     first content match, multi-line regex
//! jq    TARGET EXPR          predicate over a sibling JSON document
//! ```
//!
//! Selectors are compiled once at configuration time; a malformed pattern
//! or predicate aborts the run before any entry is visited. Evaluation is
//! per entry and never fatal: undecodable content, unparsable JSON and
//! ambiguous targets are reported through the warning channel and count as
//! no-match.

pub mod error;
pub mod predicate;

pub use error::SelectorError;
pub use predicate::{CmpOp, Predicate};

use crate::entry::{Entry, ScopeDoc, ScopeResolution};
use regex::{Regex, RegexBuilder};
use serde_json::Value;
use std::collections::HashMap;

/// Outcome of applying a selector to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Match {
    None,
    /// Whole-entry match without a position (name and JSON selectors).
    Entry,
    /// Content match, carrying the byte offset of the matched line's start.
    Line { offset: usize },
}

impl Match {
    pub fn is_hit(&self) -> bool {
        !matches!(self, Match::None)
    }
}

/// The matching rule applied to every enumerated entry.
pub enum Selector {
    Name(NameSelector),
    Content(ContentSelector),
    Json(JsonSelector),
}

impl Selector {
    /// Apply the selector to one entry. Recoverable problems go through
    /// `warn` and yield [`Match::None`].
    pub fn evaluate(
        &self,
        entry: &mut Entry,
        max_bytes: u64,
        scopes: &mut ScopeCache,
        warn: &mut dyn FnMut(String),
    ) -> Match {
        match self {
            Selector::Name(name) => name.evaluate(entry),
            Selector::Content(content) => content.evaluate(entry, max_bytes, warn),
            Selector::Json(json) => json.evaluate(entry, scopes, warn),
        }
    }

    /// Whether evaluation reads entry content.
    pub fn needs_content(&self) -> bool {
        matches!(self, Selector::Content(_))
    }
}

/// Matches the entry name against a regex.
pub struct NameSelector {
    regex: Regex,
    full_path: bool,
}

impl NameSelector {
    /// Case sensitivity follows the filesystem convention (byte-sensitive)
    /// unless `ignore_case` overrides it.
    pub fn new(pattern: &str, full_path: bool, ignore_case: bool) -> Result<Self, SelectorError> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(ignore_case)
            .build()?;
        Ok(Self { regex, full_path })
    }

    fn evaluate(&self, entry: &Entry) -> Match {
        let haystack = if self.full_path {
            entry.path.as_str()
        } else {
            entry.name()
        };
        if self.regex.is_match(haystack) {
            Match::Entry
        } else {
            Match::None
        }
    }
}

/// Searches decoded entry text for the first occurrence of a regex.
pub struct ContentSelector {
    regex: Regex,
}

impl ContentSelector {
    pub fn new(pattern: &str) -> Result<Self, SelectorError> {
        // Multi-line mode so ^ and $ anchor on line boundaries.
        let regex = RegexBuilder::new(pattern).multi_line(true).build()?;
        Ok(Self { regex })
    }

    fn evaluate(&self, entry: &mut Entry, max_bytes: u64, warn: &mut dyn FnMut(String)) -> Match {
        use crate::entry::ContentStatus;

        match entry.load(max_bytes) {
            Err(err) => {
                warn(format!("{err:#}"));
                return Match::None;
            }
            Ok(ContentStatus::TooLarge) => {
                warn(format!(
                    "{}: exceeds the in-memory size cap, content match skipped",
                    entry.path
                ));
                return Match::None;
            }
            Ok(ContentStatus::Unread) => return Match::None,
            Ok(ContentStatus::Loaded) => {}
        }
        let Some(bytes) = entry.content_bytes() else {
            return Match::None;
        };
        let Ok(text) = std::str::from_utf8(bytes) else {
            warn(format!(
                "{}: binary or non-UTF-8 content, skipped",
                entry.path
            ));
            return Match::None;
        };
        match self.regex.find(text) {
            Some(m) => Match::Line {
                offset: line_start(text, m.start()),
            },
            None => Match::None,
        }
    }
}

/// Byte offset of the start of the line containing `offset`.
pub fn line_start(text: &str, offset: usize) -> usize {
    text[..offset].rfind('\n').map(|i| i + 1).unwrap_or(0)
}

/// Matches entries whose container scope carries a sibling JSON document
/// satisfying a predicate.
pub struct JsonSelector {
    pub target: String,
    predicate: Predicate,
}

impl JsonSelector {
    pub fn new(target: &str, expr: &str) -> Result<Self, SelectorError> {
        Ok(Self {
            target: target.to_string(),
            predicate: Predicate::parse(expr)?,
        })
    }

    fn evaluate(
        &self,
        entry: &Entry,
        scopes: &mut ScopeCache,
        warn: &mut dyn FnMut(String),
    ) -> Match {
        let Some(doc) = &entry.scope_doc else {
            return Match::None;
        };
        if scopes.verdict(doc, &self.predicate, &self.target, warn) {
            Match::Entry
        } else {
            Match::None
        }
    }
}

/// One predicate verdict per container scope, so a manifest is parsed once
/// no matter how many sibling entries are tested.
#[derive(Default)]
pub struct ScopeCache {
    verdicts: HashMap<String, bool>,
}

impl ScopeCache {
    fn verdict(
        &mut self,
        doc: &ScopeDoc,
        predicate: &Predicate,
        target: &str,
        warn: &mut dyn FnMut(String),
    ) -> bool {
        if let Some(verdict) = self.verdicts.get(&doc.scope) {
            return *verdict;
        }
        let verdict = match &doc.resolution {
            ScopeResolution::Found { path, bytes } => {
                match serde_json::from_slice::<Value>(bytes) {
                    Ok(value) => predicate.matches(&value),
                    Err(err) => {
                        warn(format!("{path}: target is not valid JSON: {err}"));
                        false
                    }
                }
            }
            ScopeResolution::Missing => false,
            ScopeResolution::Ambiguous(candidates) => {
                warn(format!(
                    "{}: ambiguous target '{target}', {} candidates: {}",
                    doc.scope,
                    candidates.len(),
                    candidates.join(", ")
                ));
                false
            }
            // Already reported when the document was captured.
            ScopeResolution::TooLarge => false,
        };
        self.verdicts.insert(doc.scope.clone(), verdict);
        verdict
    }
}
