// src/commands/api.rs
use anyhow::{Context, Result};
use lexicon::{DirectorySource, EmbeddedSource, LexiconSource, TermHit};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::cache::CacheSettings;
use crate::commands::init::{ensure_initialized_at, ensure_initialized_once};
use crate::config::{CoreConfig, SourceKind};
use crate::pipeline::{ConfigError, Pipeline};
use crate::record::{ContentRecord, DecisionRecord};
use crate::services::audit::{ErrorSink, FanoutSink, LogbookSink, TracingSink};
use crate::services::caches::{LexiconCaches, ReloadReport};

/// Owns the caches and the composed pipeline. Share it behind an `Arc` or use [`moderate`].
pub struct Moderator {
    config: CoreConfig,
    caches: LexiconCaches,
    pipeline: Pipeline,
    sink: Arc<dyn ErrorSink>,
}

/// Per-character view used by the `codes` command.
#[derive(Debug, Clone, Serialize)]
pub struct CharReport {
    pub ch: char,
    pub scalar: String,
    pub code: String,
    /// Cleaning categories whose code set contains this character.
    pub categories: Vec<String>,
}

impl Moderator {
    pub fn new(config: CoreConfig, source: Arc<dyn LexiconSource>, sink: Arc<dyn ErrorSink>) -> Result<Self, ConfigError> {
        let caches = LexiconCaches::new(source, CacheSettings::from(&config.cache), Arc::clone(&sink));
        let pipeline = Pipeline::from_config(
            &config.pipeline,
            &config.lexicon.categories,
            &caches,
            Arc::clone(&sink),
        )?;
        tracing::info!(
            cleaning = ?pipeline.cleaning_stages(),
            effects = ?pipeline.effect_stages(),
            policy = ?pipeline.policy(),
            "moderator ready"
        );
        Ok(Self {
            config,
            caches,
            pipeline,
            sink,
        })
    }

    /// Source and sinks picked by `config`: tracing always, plus the JSONL logbook when enabled.
    pub fn from_config(config: &CoreConfig) -> Result<Self> {
        let source: Arc<dyn LexiconSource> = match config.lexicon.source {
            SourceKind::Embedded => Arc::new(EmbeddedSource),
            SourceKind::Directory => Arc::new(DirectorySource::new(&config.lexicon.path, config.lexicon.locked)),
        };
        let mut fanout = FanoutSink::default();
        fanout.push(Arc::new(TracingSink));
        if config.logbook.enabled {
            fanout.push(Arc::new(LogbookSink::from_config(&config.logbook)));
        }
        Self::new(config.clone(), source, Arc::new(fanout)).context("composing moderation pipeline")
    }

    /// Initialize `root` if needed and build from its config.
    pub fn from_root(root: &Path) -> Result<Self> {
        let report = ensure_initialized_at(root)?;
        Self::from_config(&report.config)
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn caches(&self) -> &LexiconCaches {
        &self.caches
    }

    pub fn sink(&self) -> &Arc<dyn ErrorSink> {
        &self.sink
    }

    pub fn moderate(&self, content: &str, attributes: &BTreeMap<String, String>) -> DecisionRecord {
        self.moderate_record(ContentRecord::with_attributes(content, attributes.clone()))
    }

    pub fn moderate_record(&self, record: ContentRecord) -> DecisionRecord {
        self.pipeline.run(record)
    }

    /// Cleaning chain only. On a stage failure returns what was cleaned before it.
    pub fn clean(&self, content: &str) -> String {
        self.pipeline.clean(&ContentRecord::new(content)).into_payload()
    }

    /// Force a reload of every category cached so far.
    pub fn reload(&self) -> ReloadReport {
        self.caches.reload()
    }

    /// Raw and normalized code of each character, with the cleaning categories that hold it.
    pub fn inspect_codes(&self, content: &str) -> Vec<CharReport> {
        let cats = &self.config.lexicon.categories;
        let sets: Vec<(&str, _)> = [&cats.special_symbols, &cats.hidden_characters, &cats.emoji]
            .into_iter()
            .map(|c| (c.as_str(), self.caches.codes.get(c)))
            .collect();
        content
            .chars()
            .map(|ch| CharReport {
                ch,
                scalar: format!("U+{:04X}", ch as u32),
                code: format!("U+{:04X}", lexicon::char_code(ch)),
                categories: sets
                    .iter()
                    .filter(|(_, lookup)| lookup.value().contains_char(ch))
                    .map(|(name, _)| name.to_string())
                    .collect(),
            })
            .collect()
    }
}

// ---------- process-wide entry point ----------

static GLOBAL: OnceCell<Moderator> = OnceCell::new();

/// Moderator for the root named by `WORDGUARD_ROOT`, built on first use.
pub fn global() -> Result<&'static Moderator> {
    GLOBAL.get_or_try_init(|| {
        let report = ensure_initialized_once()?;
        Moderator::from_config(&report.config)
    })
}

/// Moderate with the process-wide [`Moderator`].
///
/// If the moderator cannot be built the content is blocked and the reason says why.
pub fn moderate(content: &str, attributes: &BTreeMap<String, String>) -> DecisionRecord {
    match global() {
        Ok(m) => m.moderate(content, attributes),
        Err(e) => {
            let reason = format!("moderator unavailable: {e:#}");
            tracing::error!("{reason}");
            DecisionRecord::new(
                ContentRecord::with_attributes(content, attributes.clone()),
                vec![TermHit::fail_closed()],
                Vec::new(),
                Some(reason),
                vec!["moderator".to_string()],
            )
        }
    }
}
