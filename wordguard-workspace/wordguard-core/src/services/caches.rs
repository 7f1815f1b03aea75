//! services/caches.rs
//! The three category caches every pipeline reads from, wired to one [`LexiconSource`].

use lexicon::{Allowlist, CodeSet, LexiconSource, TermIndex};
use std::sync::Arc;

use crate::cache::{CacheSettings, LookupCache, loader};
use crate::services::audit::ErrorSink;

#[derive(Clone)]
pub struct LexiconCaches {
    pub codes: LookupCache<CodeSet>,
    pub terms: LookupCache<TermIndex>,
    pub allowlists: LookupCache<Allowlist>,
}

/// Outcome of a forced reload of every cached category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadReport {
    pub loaded: Vec<String>,
    pub failed: Vec<String>,
}

impl LexiconCaches {
    pub fn new(source: Arc<dyn LexiconSource>, settings: CacheSettings, sink: Arc<dyn ErrorSink>) -> Self {
        let codes_src = Arc::clone(&source);
        let terms_src = Arc::clone(&source);
        let allow_src = source;

        let codes = LookupCache::new(
            "codes",
            loader(move |category| codes_src.load_codes(category)),
            settings,
            Arc::clone(&sink),
        );
        let terms = LookupCache::new(
            "terms",
            loader(move |category| {
                let dict = terms_src.load_dictionary(category)?;
                let index = TermIndex::build(&dict)?;
                tracing::debug!(category, version = index.version(), entries = index.len(), "term index built");
                Ok(index)
            }),
            settings,
            Arc::clone(&sink),
        );
        // A scoped list that was never written is an empty list, not an outage.
        let allowlists = LookupCache::new(
            "allowlists",
            loader(move |category| match allow_src.load_allowlist(category) {
                Err(e) if e.is_not_found() => Ok(Allowlist::default()),
                other => other,
            }),
            settings,
            sink,
        );
        Self {
            codes,
            terms,
            allowlists,
        }
    }

    /// Reload every category currently cached, synchronously.
    pub fn reload(&self) -> ReloadReport {
        let mut report = ReloadReport::default();
        for key in self.codes.keys() {
            record(&mut report, "codes", &key, self.codes.refresh_now(&key).failures());
        }
        for key in self.terms.keys() {
            record(&mut report, "terms", &key, self.terms.refresh_now(&key).failures());
        }
        for key in self.allowlists.keys() {
            record(&mut report, "allowlists", &key, self.allowlists.refresh_now(&key).failures());
        }
        tracing::info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "lexicon reloaded"
        );
        report
    }
}

fn record(report: &mut ReloadReport, cache: &str, key: &str, failures: u32) {
    let label = format!("{cache}:{key}");
    if failures == 0 {
        report.loaded.push(label);
    } else {
        report.failed.push(label);
    }
}
