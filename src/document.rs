//! STATE.md and PLAN.md parsing.
//!
//! STATE.md carries one status line, dependencies either inline or as a
//! section, and an optional "Decomposed Into" section:
//!
//! ```text
//! - **Status:** open
//! - **Dependencies:** [2.1-parser, lexer]
//!
//! ## Decomposed Into
//! - parser-core
//! - parser-errors
//! ```
//!
//! PLAN.md marks post-condition items with `- [issue] <name>` lines.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Error, Result};
use crate::model::Status;

/// The parsed contents of a STATE.md.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateDocument {
    pub status: Status,
    pub dependencies: Vec<String>,
    pub decomposed_into: Vec<String>,
}

impl StateDocument {
    /// Parse a STATE.md. A missing or unrecognized status is an error.
    pub fn parse(path: &Path, text: &str) -> Result<Self> {
        let raw = raw_status(text).ok_or_else(|| Error::status(path, "missing status line"))?;
        if raw.is_empty() {
            return Err(Error::status(path, "empty status value"));
        }
        let status = raw
            .parse::<Status>()
            .map_err(|message| Error::status(path, message))?;

        Ok(Self {
            status,
            dependencies: parse_dependencies(text),
            decomposed_into: parse_decomposition(text),
        })
    }
}

fn status_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?mi)^([ \t]*[-*][ \t]*\*\*Status:\*\*[ \t]*)(.*?)[ \t]*\r?$")
            .expect("valid status regex")
    })
}

fn inline_dependencies_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?mi)^[ \t]*[-*][ \t]*\*\*Dependencies:\*\*[ \t]*(.*?)[ \t]*\r?$")
            .expect("valid dependencies regex")
    })
}

fn heading_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^#{1,6}[ \t]+(.+?)[ \t]*$").expect("valid heading regex"))
}

fn postcondition_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?mi)^[ \t]*[-*][ \t]*\[issue\][ \t]+(\S+)").expect("valid plan regex")
    })
}

/// The status value as written, trimmed and without backticks.
pub fn raw_status(text: &str) -> Option<String> {
    status_regex()
        .captures(text)
        .map(|caps| caps[2].trim().trim_matches('`').trim().to_string())
}

/// Dependencies from the inline `**Dependencies:**` line and the
/// `## Dependencies` section, in order of appearance, deduplicated.
pub fn parse_dependencies(text: &str) -> Vec<String> {
    let mut deps = Vec::new();
    if let Some(caps) = inline_dependencies_regex().captures(text) {
        let list = caps[1].trim().trim_start_matches('[').trim_end_matches(']');
        deps.extend(list.split(',').filter_map(clean_reference));
    }
    deps.extend(section_items(text, "dependencies"));

    let mut seen = BTreeSet::new();
    deps.retain(|dep| seen.insert(dep.clone()));
    deps
}

/// Child names from the `## Decomposed Into` section.
pub fn parse_decomposition(text: &str) -> Vec<String> {
    section_items(text, "decomposed into")
}

/// Names marked `- [issue] <name>` in a version's PLAN.md.
pub fn parse_postconditions(plan: &str) -> BTreeSet<String> {
    postcondition_regex()
        .captures_iter(plan)
        .filter_map(|caps| clean_reference(&caps[1]))
        .collect()
}

/// Rewrite the status line to `status`, keeping everything else verbatim.
/// Returns `None` if the document has no status line.
pub fn replace_status(text: &str, status: Status) -> Option<String> {
    let caps = status_regex().captures(text)?;
    let whole = caps.get(0)?;
    let prefix = caps.get(1)?.as_str();
    let mut out = String::with_capacity(text.len());
    out.push_str(&text[..whole.start()]);
    out.push_str(prefix);
    out.push_str(status.as_str());
    if whole.as_str().ends_with('\r') {
        out.push('\r');
    }
    out.push_str(&text[whole.end()..]);
    Some(out)
}

/// Bullet items under the heading whose text equals `heading` (case-insensitive),
/// up to the next heading.
fn section_items(text: &str, heading: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut inside = false;
    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(caps) = heading_regex().captures(trimmed) {
            inside = caps[1].trim().eq_ignore_ascii_case(heading);
            continue;
        }
        if !inside {
            continue;
        }
        let Some(item) = trimmed
            .strip_prefix("- ")
            .or_else(|| trimmed.strip_prefix("* "))
        else {
            continue;
        };
        let token = item.split_whitespace().next().unwrap_or_default();
        if let Some(reference) = clean_reference(token) {
            items.push(reference);
        }
    }
    items
}

/// Normalize one list entry; `None` for placeholders like "none" or "-".
fn clean_reference(raw: &str) -> Option<String> {
    let cleaned = raw
        .trim()
        .trim_matches('`')
        .trim_end_matches([',', ':', ';'])
        .trim();
    if cleaned.is_empty()
        || cleaned == "-"
        || cleaned.eq_ignore_ascii_case("none")
        || cleaned.eq_ignore_ascii_case("n/a")
    {
        return None;
    }
    Some(cleaned.to_string())
}
