// src/pipeline/effect.rs
use lexicon::{Allowlist, TermHit, TermKind};
use std::collections::BTreeSet;

use super::{Scope, Stage, StageError, Step};
use crate::cache::{Lookup, LookupCache};

pub const NO_HITS: &str = "no_hits";
pub const COMPLIANCE: &str = "compliance";
pub const SCOPED: &str = "scoped";

/// Payload of the effect chain: hits still blocking and hits already excused.
///
/// Hits only ever move from `remaining` to `excused`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectContext {
    remaining: Vec<TermHit>,
    excused: Vec<TermHit>,
}

impl EffectContext {
    pub fn new(hits: Vec<TermHit>) -> Self {
        Self {
            remaining: hits,
            excused: Vec::new(),
        }
    }

    pub fn remaining(&self) -> &[TermHit] {
        &self.remaining
    }

    pub fn excused(&self) -> &[TermHit] {
        &self.excused
    }

    /// No hit was ever recorded for this run.
    pub fn is_empty(&self) -> bool {
        self.remaining.is_empty() && self.excused.is_empty()
    }

    pub fn is_clear(&self) -> bool {
        self.remaining.is_empty()
    }

    /// Copy of `self` with every remaining hit matching `pred` moved to `excused`.
    /// Fail-closed hits are never excused.
    pub fn excuse_where<F>(&self, mut pred: F) -> Self
    where
        F: FnMut(&TermHit) -> bool,
    {
        let mut next = Self {
            remaining: Vec::with_capacity(self.remaining.len()),
            excused: self.excused.clone(),
        };
        for hit in &self.remaining {
            if hit.kind != TermKind::FailClosed && pred(hit) {
                next.excused.push(hit.clone());
            } else {
                next.remaining.push(hit.clone());
            }
        }
        next
    }

    pub fn into_parts(self) -> (Vec<TermHit>, Vec<TermHit>) {
        (self.remaining, self.excused)
    }
}

/// Ends the chain right away when matching found nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHitsShortCircuit;

impl Stage<EffectContext> for NoHitsShortCircuit {
    fn name(&self) -> &'static str {
        NO_HITS
    }

    fn handle(&self, _scope: &Scope<'_>, input: &EffectContext) -> Result<Step<EffectContext>, StageError> {
        if input.is_empty() {
            return Ok(Step::Finish {
                payload: input.clone(),
                reason: None,
            });
        }
        Ok(Step::Continue(input.clone()))
    }
}

/// Excuses hits on the global compliance allowlist.
pub struct ComplianceOverride {
    category: String,
    allowlists: LookupCache<Allowlist>,
}

impl ComplianceOverride {
    pub fn new(category: impl Into<String>, allowlists: LookupCache<Allowlist>) -> Self {
        Self {
            category: category.into(),
            allowlists,
        }
    }
}

impl Stage<EffectContext> for ComplianceOverride {
    fn name(&self) -> &'static str {
        COMPLIANCE
    }

    fn handle(&self, _scope: &Scope<'_>, input: &EffectContext) -> Result<Step<EffectContext>, StageError> {
        let lookup = self.allowlists.get(&self.category);
        Ok(apply_allowlist(input, &lookup, &self.category))
    }
}

/// Excuses hits on an allowlist picked by a content attribute:
/// `<prefix>.<value of attribute>`, e.g. `compliance.merchant` for `scene=merchant`.
///
/// Only values in `scopes` are looked up, so callers cannot grow the allowlist cache.
pub struct ScopedOverride {
    attribute: String,
    prefix: String,
    scopes: BTreeSet<String>,
    allowlists: LookupCache<Allowlist>,
}

impl ScopedOverride {
    pub fn new(
        attribute: impl Into<String>,
        prefix: impl Into<String>,
        scopes: impl IntoIterator<Item = String>,
        allowlists: LookupCache<Allowlist>,
    ) -> Self {
        Self {
            attribute: attribute.into(),
            prefix: prefix.into(),
            scopes: scopes.into_iter().map(|s| s.trim().to_string()).collect(),
            allowlists,
        }
    }

    pub fn category_for(&self, value: &str) -> String {
        format!("{}.{}", self.prefix, value)
    }
}

impl Stage<EffectContext> for ScopedOverride {
    fn name(&self) -> &'static str {
        SCOPED
    }

    fn handle(&self, scope: &Scope<'_>, input: &EffectContext) -> Result<Step<EffectContext>, StageError> {
        let Some(value) = scope.attribute(&self.attribute).filter(|v| !v.trim().is_empty()) else {
            return Ok(Step::Continue(input.clone()));
        };
        let value = value.trim();
        if !self.scopes.contains(value) {
            tracing::debug!(attribute = %self.attribute, value, "no scoped allowlist for value");
            return Ok(Step::Continue(input.clone()));
        }
        let category = self.category_for(value);
        let lookup = self.allowlists.get(&category);
        Ok(apply_allowlist(input, &lookup, &category))
    }
}

// An unavailable list excuses nothing; the cache has already reported why.
fn apply_allowlist(input: &EffectContext, lookup: &Lookup<Allowlist>, category: &str) -> Step<EffectContext> {
    let list = lookup.value();
    if list.is_empty() || input.is_clear() {
        return Step::Continue(input.clone());
    }
    let next = input.excuse_where(|h| list.covers(h.id, &h.term));
    let newly = next.excused().len() - input.excused().len();
    if newly > 0 {
        tracing::debug!(category, excused = newly, "hits excused");
    }
    if next.is_clear() {
        Step::Finish {
            payload: next,
            reason: Some(format!("all hits excused by `{category}`")),
        }
    } else {
        Step::Continue(next)
    }
}
