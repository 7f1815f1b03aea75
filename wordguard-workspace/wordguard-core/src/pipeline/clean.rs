// src/pipeline/clean.rs
use lexicon::CodeSet;

use super::{Scope, Stage, StageError, Step};
use crate::cache::LookupCache;

pub const SPECIAL_SYMBOLS: &str = "special_symbols";
pub const HIDDEN_CHARACTERS: &str = "hidden_characters";
pub const EMOJI: &str = "emoji";

/// Drops every character whose normalized code is in one category's code set.
pub struct StripStage {
    name: &'static str,
    category: String,
    codes: LookupCache<CodeSet>,
}

impl StripStage {
    pub fn new(name: &'static str, category: impl Into<String>, codes: LookupCache<CodeSet>) -> Self {
        Self {
            name,
            category: category.into(),
            codes,
        }
    }

    pub fn special_symbols(category: impl Into<String>, codes: LookupCache<CodeSet>) -> Self {
        Self::new(SPECIAL_SYMBOLS, category, codes)
    }

    pub fn hidden_characters(category: impl Into<String>, codes: LookupCache<CodeSet>) -> Self {
        Self::new(HIDDEN_CHARACTERS, category, codes)
    }

    pub fn emoji(category: impl Into<String>, codes: LookupCache<CodeSet>) -> Self {
        Self::new(EMOJI, category, codes)
    }

    pub fn category(&self) -> &str {
        &self.category
    }
}

impl Stage<String> for StripStage {
    fn name(&self) -> &'static str {
        self.name
    }

    fn handle(&self, _scope: &Scope<'_>, input: &String) -> Result<Step<String>, StageError> {
        let lookup = self.codes.get(&self.category);
        if !lookup.is_available() {
            return Err(StageError::Unavailable {
                category: self.category.clone(),
            });
        }
        Ok(Step::Continue(strip(input, lookup.value())))
    }
}

/// Keep the characters of `text` that are not in `set`, in order.
pub fn strip(text: &str, set: &CodeSet) -> String {
    text.chars().filter(|c| !set.contains_char(*c)).collect()
}
