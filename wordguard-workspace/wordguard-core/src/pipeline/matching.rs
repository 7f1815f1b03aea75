// src/pipeline/matching.rs
use lexicon::{TermHit, TermIndex};
use std::panic::{self, AssertUnwindSafe};

use super::{StageError, panic_message};
use crate::cache::LookupCache;

pub const MATCHING: &str = "matching";

/// Scans cleaned text against the compiled term dictionary.
///
/// Not a chain stage: it sits between the cleaning and effect chains and its failures are
/// handled by the runner, which fails closed.
pub struct MatchingStage {
    category: String,
    terms: LookupCache<TermIndex>,
}

impl MatchingStage {
    pub fn new(category: impl Into<String>, terms: LookupCache<TermIndex>) -> Self {
        Self {
            category: category.into(),
            terms,
        }
    }

    pub fn name(&self) -> &'static str {
        MATCHING
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    /// Hits in order of first occurrence, one per id.
    pub fn scan(&self, cleaned: &str) -> Result<Vec<TermHit>, StageError> {
        let lookup = self.terms.get(&self.category);
        if !lookup.is_available() {
            return Err(StageError::Unavailable {
                category: self.category.clone(),
            });
        }
        let index = lookup.value();
        panic::catch_unwind(AssertUnwindSafe(|| index.scan(cleaned)))
            .map_err(|p| StageError::Failed(format!("scan panicked: {}", panic_message(p.as_ref()))))
    }
}
