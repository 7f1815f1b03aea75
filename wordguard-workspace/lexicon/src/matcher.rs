use crate::error::LexiconError;
use crate::normalize;
use crate::types::{Dictionary, TermId, TermKind};
use aho_corasick::{AhoCorasick, MatchKind};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ----------------- Result -----------------

/// One sensitive term found in scanned text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TermHit {
    /// Normalized form of the matched term.
    pub term: String,
    pub id: TermId,
    pub kind: TermKind,
    /// Dictionary or rule number the hit came from.
    pub source: u32,
}

impl TermHit {
    /// Placeholder hit used when content could not be moderated.
    pub fn fail_closed() -> Self {
        Self {
            term: "<unmoderated>".to_string(),
            id: 0,
            kind: TermKind::FailClosed,
            source: 0,
        }
    }
}

// ----------------- Index -----------------

struct LiteralTerm {
    id: TermId,
    term: String,
    dictionary: u32,
}

struct PatternRule {
    id: TermId,
    rule: u32,
    regex: Regex,
}

/// Compiled term dictionary: an Aho–Corasick automaton over normalized terms plus
/// optional regex rules, both evaluated over normalized text.
#[derive(Default)]
pub struct TermIndex {
    automaton: Option<AhoCorasick>,
    literals: Vec<LiteralTerm>,
    patterns: Vec<PatternRule>,
    version: String,
}

impl std::fmt::Debug for TermIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TermIndex")
            .field("terms", &self.literals.len())
            .field("patterns", &self.patterns.len())
            .field("version", &self.version)
            .finish()
    }
}

impl TermIndex {
    pub fn build(dict: &Dictionary) -> Result<Self, LexiconError> {
        let literals: Vec<LiteralTerm> = dict
            .terms
            .iter()
            .filter_map(|t| {
                let term = normalize::for_lookup(t.term.trim());
                (!term.is_empty()).then(|| LiteralTerm {
                    id: t.id,
                    term,
                    dictionary: t.dictionary,
                })
            })
            .collect();

        let automaton = if literals.is_empty() {
            None
        } else {
            Some(
                AhoCorasick::builder()
                    .match_kind(MatchKind::Standard)
                    .build(literals.iter().map(|l| l.term.as_str()))?,
            )
        };

        let mut patterns = Vec::with_capacity(dict.patterns.len());
        for p in &dict.patterns {
            if p.pattern.trim().is_empty() {
                continue;
            }
            let regex = RegexBuilder::new(&p.pattern)
                .case_insensitive(true)
                .build()
                .map_err(|source| LexiconError::Pattern {
                    id: p.id,
                    pattern: p.pattern.clone(),
                    source,
                })?;
            patterns.push(PatternRule { id: p.id, rule: p.rule, regex });
        }

        Ok(Self {
            automaton,
            literals,
            patterns,
            version: dict.version.clone(),
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn len(&self) -> usize {
        self.literals.len() + self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.literals.is_empty() && self.patterns.is_empty()
    }

    /// Scan `text` and return hits ordered by first occurrence, deduplicated by id.
    /// Overlapping and adjacent matches are all reported.
    pub fn scan(&self, text: &str) -> Vec<TermHit> {
        let hay = normalize::for_lookup(text);
        let mut found: Vec<(usize, TermHit)> = Vec::new();

        if let Some(ac) = &self.automaton {
            for m in ac.find_overlapping_iter(&hay) {
                let lit = &self.literals[m.pattern().as_usize()];
                found.push((
                    m.start(),
                    TermHit {
                        term: lit.term.clone(),
                        id: lit.id,
                        kind: TermKind::Dictionary,
                        source: lit.dictionary,
                    },
                ));
            }
        }

        for rule in &self.patterns {
            if let Some(m) = rule.regex.find(&hay) {
                found.push((
                    m.start(),
                    TermHit {
                        term: m.as_str().to_string(),
                        id: rule.id,
                        kind: TermKind::Pattern,
                        source: rule.rule,
                    },
                ));
            }
        }

        found.sort_by_key(|(start, hit)| (*start, hit.id));
        let mut seen: HashSet<TermId> = HashSet::with_capacity(found.len());
        found
            .into_iter()
            .filter(|(_, hit)| seen.insert(hit.id))
            .map(|(_, hit)| hit)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PatternEntry, TermEntry};

    fn dict(terms: &[(TermId, &str)]) -> Dictionary {
        Dictionary {
            terms: terms
                .iter()
                .map(|(id, t)| TermEntry { id: *id, term: t.to_string(), dictionary: 1 })
                .collect(),
            ..Dictionary::default()
        }
    }

    #[test]
    fn index_keeps_dictionary_version() {
        let mut d = dict(&[]);
        d.version = "2024.06".into();
        let index = TermIndex::build(&d).unwrap();
        assert_eq!(index.version(), "2024.06");
    }

    #[test]
    fn empty_index_yields_no_hits() {
        let index = TermIndex::build(&Dictionary::default()).unwrap();
        assert!(index.scan("anything at all").is_empty());
    }

    #[test]
    fn pattern_rules_report_their_rule_number() {
        let mut d = dict(&[]);
        d.patterns.push(PatternEntry { id: 900, pattern: r"fr[e3]{2}\s*money".into(), rule: 4 });
        let index = TermIndex::build(&d).unwrap();
        let hits = index.scan("Get FR33 money now");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].kind, TermKind::Pattern);
        assert_eq!(hits[0].source, 4);
        assert_eq!(hits[0].term, "fr33 money");
    }

    #[test]
    fn invalid_pattern_is_a_build_error() {
        let mut d = dict(&[]);
        d.patterns.push(PatternEntry { id: 1, pattern: "(unclosed".into(), rule: 0 });
        assert!(matches!(TermIndex::build(&d), Err(LexiconError::Pattern { id: 1, .. })));
    }
}
