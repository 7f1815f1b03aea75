// src/pipeline/runner.rs
use lexicon::TermHit;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use super::clean::{self, StripStage};
use super::effect::{self, ComplianceOverride, EffectContext, NoHitsShortCircuit, ScopedOverride};
use super::matching::{self, MatchingStage};
use super::{Chain, ConfigError, Envelope, Scope, Stage, panic_message};
use crate::config::{AbortPolicy, CategoryNames, PipelineConfig};
use crate::record::{ContentRecord, DecisionRecord};
use crate::services::audit::ErrorSink;
use crate::services::caches::LexiconCaches;

const CLEANING_CHAIN: &str = "cleaning";
const EFFECT_CHAIN: &str = "effects";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StageKind {
    Cleaning,
    Matching,
    Effect,
}

impl StageKind {
    fn of(name: &str) -> Option<Self> {
        match name {
            clean::SPECIAL_SYMBOLS | clean::HIDDEN_CHARACTERS | clean::EMOJI => Some(Self::Cleaning),
            matching::MATCHING => Some(Self::Matching),
            effect::NO_HITS | effect::COMPLIANCE | effect::SCOPED => Some(Self::Effect),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Cleaning => "cleaning",
            Self::Matching => "matching",
            Self::Effect => "effect",
        }
    }
}

/// Builds stages from their config names.
pub struct StageRegistry<'a> {
    categories: &'a CategoryNames,
    pipeline: &'a PipelineConfig,
    caches: &'a LexiconCaches,
}

impl<'a> StageRegistry<'a> {
    pub fn new(categories: &'a CategoryNames, pipeline: &'a PipelineConfig, caches: &'a LexiconCaches) -> Self {
        Self {
            categories,
            pipeline,
            caches,
        }
    }

    fn check(chain: &'static str, name: &str, want: StageKind) -> Result<(), ConfigError> {
        match StageKind::of(name) {
            None => Err(ConfigError::UnknownStage {
                chain,
                name: name.to_string(),
            }),
            Some(kind) if kind != want => Err(ConfigError::StageKindMismatch {
                chain,
                name: name.to_string(),
                actual: kind.label(),
            }),
            Some(_) => Ok(()),
        }
    }

    pub fn cleaning_stage(&self, name: &str) -> Result<Box<dyn Stage<String>>, ConfigError> {
        Self::check(CLEANING_CHAIN, name, StageKind::Cleaning)?;
        let codes = self.caches.codes.clone();
        let cats = self.categories;
        let stage = match name {
            clean::SPECIAL_SYMBOLS => StripStage::special_symbols(&cats.special_symbols, codes),
            clean::HIDDEN_CHARACTERS => StripStage::hidden_characters(&cats.hidden_characters, codes),
            _ => StripStage::emoji(&cats.emoji, codes),
        };
        Ok(Box::new(stage))
    }

    pub fn effect_stage(&self, name: &str) -> Result<Box<dyn Stage<EffectContext>>, ConfigError> {
        Self::check(EFFECT_CHAIN, name, StageKind::Effect)?;
        let lists = self.caches.allowlists.clone();
        let stage: Box<dyn Stage<EffectContext>> = match name {
            effect::NO_HITS => Box::new(NoHitsShortCircuit),
            effect::COMPLIANCE => Box::new(ComplianceOverride::new(&self.categories.compliance, lists)),
            _ => Box::new(ScopedOverride::new(
                &self.pipeline.scope_attribute,
                &self.pipeline.scope_prefix,
                self.pipeline.scopes.iter().cloned(),
                lists,
            )),
        };
        Ok(stage)
    }

    pub fn cleaning_chain(&self, names: &[String]) -> Result<Chain<String>, ConfigError> {
        let stages = names
            .iter()
            .map(|n| self.cleaning_stage(n))
            .collect::<Result<Vec<_>, _>>()?;
        Chain::new(CLEANING_CHAIN, stages)
    }

    pub fn effect_chain(&self, names: &[String]) -> Result<Chain<EffectContext>, ConfigError> {
        let stages = names
            .iter()
            .map(|n| self.effect_stage(n))
            .collect::<Result<Vec<_>, _>>()?;
        Chain::new(EFFECT_CHAIN, stages)
    }
}

/// Cleaning chain, then matching, then the effect chain.
pub struct Pipeline {
    cleaning: Chain<String>,
    matching: MatchingStage,
    effects: Chain<EffectContext>,
    policy: AbortPolicy,
    sink: Arc<dyn ErrorSink>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("cleaning", &self.cleaning)
            .field("matching", &self.matching.category())
            .field("effects", &self.effects)
            .field("policy", &self.policy)
            .finish()
    }
}

impl Pipeline {
    pub fn new(
        cleaning: Chain<String>,
        matching: MatchingStage,
        effects: Chain<EffectContext>,
        policy: AbortPolicy,
        sink: Arc<dyn ErrorSink>,
    ) -> Self {
        Self {
            cleaning,
            matching,
            effects,
            policy,
            sink,
        }
    }

    /// Compose the chains named in `cfg`. Fails on unknown, misplaced or repeated names.
    pub fn from_config(
        cfg: &PipelineConfig,
        categories: &CategoryNames,
        caches: &LexiconCaches,
        sink: Arc<dyn ErrorSink>,
    ) -> Result<Self, ConfigError> {
        let registry = StageRegistry::new(categories, cfg, caches);
        let cleaning = registry.cleaning_chain(&cfg.cleaning)?;
        let effects = registry.effect_chain(&cfg.effects)?;
        let matching = MatchingStage::new(&categories.terms, caches.terms.clone());
        Ok(Self::new(cleaning, matching, effects, cfg.abort_policy, sink))
    }

    pub fn policy(&self) -> AbortPolicy {
        self.policy
    }

    pub fn cleaning_stages(&self) -> Vec<&'static str> {
        self.cleaning.stage_names()
    }

    pub fn effect_stages(&self) -> Vec<&'static str> {
        self.effects.stage_names()
    }

    /// Run only the cleaning chain.
    pub fn clean(&self, record: &ContentRecord) -> Envelope<String> {
        let scope = Scope::new(&record.content, &record.attributes);
        self.cleaning
            .run(&scope, Envelope::new(record.clean_content.clone()), self.sink.as_ref())
    }

    /// Moderate one record. Never panics; every failure ends up in the decision.
    pub fn run(&self, record: ContentRecord) -> DecisionRecord {
        let fallback = record.clone();
        let decision = match panic::catch_unwind(AssertUnwindSafe(|| self.run_stages(record))) {
            Ok(decision) => decision,
            Err(p) => {
                let reason = format!("pipeline panicked: {}", panic_message(p.as_ref()));
                self.sink.report_failure("pipeline", &reason);
                DecisionRecord::new(
                    fallback,
                    vec![TermHit::fail_closed()],
                    Vec::new(),
                    Some(reason),
                    vec!["pipeline".to_string()],
                )
            }
        };
        self.sink.record_decision(&decision);
        decision
    }

    fn run_stages(&self, mut record: ContentRecord) -> DecisionRecord {
        let sink = self.sink.as_ref();
        let mut notes: Vec<String> = Vec::new();
        let mut degraded: Vec<String> = Vec::new();

        let scope = Scope::new(&record.content, &record.attributes);
        let cleaned = self
            .cleaning
            .run(&scope, Envelope::new(record.clean_content.clone()), sink);
        let cleaning_failed = cleaned.is_failed();
        if let (Some(stage), Some(reason)) = (cleaned.failed_stage(), cleaned.reason()) {
            degraded.push(stage.to_string());
            notes.push(reason.to_string());
        }
        record.clean_content = cleaned.into_payload();

        if cleaning_failed && self.policy == AbortPolicy::Strict {
            notes.push("strict abort policy: content not moderated".to_string());
            return fail_closed(record, Vec::new(), notes, degraded);
        }

        let hits = match self.matching.scan(&record.clean_content) {
            Ok(hits) => hits,
            Err(e) => {
                let reason = format!("{} failed: {e}", self.matching.name());
                sink.report_failure(self.matching.name(), &reason);
                degraded.push(self.matching.name().to_string());
                notes.push(reason);
                return fail_closed(record, Vec::new(), notes, degraded);
            }
        };

        let scope = Scope::new(&record.content, &record.attributes);
        let outcome = self
            .effects
            .run(&scope, Envelope::new(EffectContext::new(hits)), sink);
        if let Some(reason) = outcome.reason() {
            notes.push(reason.to_string());
        }
        if let Some(stage) = outcome.failed_stage() {
            degraded.push(stage.to_string());
        }
        let failed = outcome.is_failed();
        let (remaining, excused) = outcome.into_payload().into_parts();
        if failed && remaining.is_empty() {
            return fail_closed(record, excused, notes, degraded);
        }
        DecisionRecord::new(record, remaining, excused, join(notes), degraded)
    }
}

fn fail_closed(
    record: ContentRecord,
    excused: Vec<TermHit>,
    notes: Vec<String>,
    degraded: Vec<String>,
) -> DecisionRecord {
    DecisionRecord::new(record, vec![TermHit::fail_closed()], excused, join(notes), degraded)
}

fn join(notes: Vec<String>) -> Option<String> {
    if notes.is_empty() {
        None
    } else {
        Some(notes.join("; "))
    }
}
