use crate::error::LexiconError;
use crate::normalize::{self, Code};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub type TermId = u64;

// ----------------- Code sets -----------------

/// Set of normalized codes for one character category (symbols, hidden, emoji).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeSet {
    codes: HashSet<Code>,
}

impl CodeSet {
    pub fn from_chars<I: IntoIterator<Item = char>>(chars: I) -> Self {
        Self {
            codes: chars.into_iter().map(normalize::char_code).collect(),
        }
    }

    /// Parse the code-set text format.
    ///
    /// One or more whitespace-separated tokens per line, `#` starts a comment line.
    /// - `U+XXXX` adds one code point
    /// - `U+XXXX..U+YYYY` adds an inclusive range
    /// - any other token adds each of its characters
    pub fn parse(category: &str, text: &str) -> Result<Self, LexiconError> {
        let mut chars = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            for token in line.split_whitespace() {
                if let Some(spec) = token.strip_prefix("U+") {
                    push_code_points(&mut chars, spec).map_err(|msg| {
                        LexiconError::parse(category, format!("line {}: {msg}", lineno + 1))
                    })?;
                } else {
                    chars.extend(token.chars());
                }
            }
        }
        Ok(Self::from_chars(chars))
    }

    pub fn contains_code(&self, code: Code) -> bool {
        self.codes.contains(&code)
    }

    /// Normalize `ch` and test membership.
    pub fn contains_char(&self, ch: char) -> bool {
        self.contains_code(normalize::char_code(ch))
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

fn push_code_points(out: &mut Vec<char>, spec: &str) -> Result<(), String> {
    let (start, end) = match spec.split_once("..") {
        Some((a, b)) => (a, b.strip_prefix("U+").unwrap_or(b)),
        None => (spec, spec),
    };
    let start = u32::from_str_radix(start, 16).map_err(|_| format!("bad code point `{start}`"))?;
    let end = u32::from_str_radix(end, 16).map_err(|_| format!("bad code point `{end}`"))?;
    if end < start {
        return Err(format!("empty range U+{start:04X}..U+{end:04X}"));
    }
    // Surrogates have no char; skip them silently inside ranges.
    out.extend((start..=end).filter_map(char::from_u32));
    Ok(())
}

// ----------------- Dictionaries -----------------

/// How a hit was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TermKind {
    /// Literal dictionary term.
    Dictionary,
    /// Regular-expression rule.
    Pattern,
    /// Synthetic hit produced when matching could not run.
    FailClosed,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TermEntry {
    pub id: TermId,
    pub term: String,
    /// Dictionary number the term was authored in.
    #[serde(default)]
    pub dictionary: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PatternEntry {
    pub id: TermId,
    pub pattern: String,
    #[serde(default)]
    pub rule: u32,
}

/// Sensitive-term dictionary as authored on disk.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Dictionary {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub terms: Vec<TermEntry>,
    #[serde(default)]
    pub patterns: Vec<PatternEntry>,
}

impl Dictionary {
    pub fn parse(category: &str, text: &str) -> Result<Self, LexiconError> {
        toml::from_str(text).map_err(|e| LexiconError::parse(category, e.to_string()))
    }
}

// ----------------- Allowlists -----------------

/// One allowlist entry; either field may be used, the original data keyed by word.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AllowEntry {
    #[serde(default)]
    pub id: Option<TermId>,
    #[serde(default)]
    pub term: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
struct AllowlistFile {
    #[serde(default)]
    entries: Vec<AllowEntry>,
}

/// Term ids and normalized terms excused from blocking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Allowlist {
    ids: HashSet<TermId>,
    terms: HashSet<String>,
}

impl Allowlist {
    pub fn from_entries<I: IntoIterator<Item = AllowEntry>>(entries: I) -> Self {
        let mut list = Self::default();
        for entry in entries {
            if let Some(id) = entry.id {
                list.ids.insert(id);
            }
            if let Some(term) = entry.term {
                let norm = normalize::for_lookup(term.trim());
                if !norm.is_empty() {
                    list.terms.insert(norm);
                }
            }
        }
        list
    }

    pub fn parse(category: &str, text: &str) -> Result<Self, LexiconError> {
        let file: AllowlistFile =
            toml::from_str(text).map_err(|e| LexiconError::parse(category, e.to_string()))?;
        Ok(Self::from_entries(file.entries))
    }

    /// `term` must already be normalized (as carried by hits).
    pub fn covers(&self, id: TermId, term: &str) -> bool {
        self.ids.contains(&id) || self.terms.contains(term)
    }

    pub fn len(&self) -> usize {
        self.ids.len() + self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty() && self.terms.is_empty()
    }
}
