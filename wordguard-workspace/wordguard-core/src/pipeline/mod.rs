// src/pipeline/mod.rs
//! Ordered stage chains and the envelope they pass along.
//!
//! A [`Chain`] is a plain list of [`Stage`]s. Stages never call each other; the chain runs
//! them in order until one finishes early or fails.

pub mod clean;
pub mod effect;
pub mod matching;
pub mod runner;

use std::collections::{BTreeMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;

use crate::services::audit::ErrorSink;

pub use clean::StripStage;
pub use effect::{ComplianceOverride, EffectContext, NoHitsShortCircuit, ScopedOverride};
pub use matching::MatchingStage;
pub use runner::{Pipeline, StageRegistry};

// ----------------- Errors -----------------

/// A stage could not do its job for this run.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("category `{category}` unavailable")]
    Unavailable { category: String },

    #[error("{0}")]
    Failed(String),
}

/// Chain composition problems. Raised once at construction, never per request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{chain} chain has no stages")]
    EmptyChain { chain: &'static str },

    #[error("{chain} chain: unknown stage `{name}`")]
    UnknownStage { chain: &'static str, name: String },

    #[error("{chain} chain: `{name}` is a {actual} stage")]
    StageKindMismatch {
        chain: &'static str,
        name: String,
        actual: &'static str,
    },

    #[error("{chain} chain: stage `{name}` listed twice")]
    DuplicateStage { chain: &'static str, name: String },
}

// ----------------- Envelope -----------------

/// Where a chain run stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    Proceeding,
    /// A stage ended the chain on purpose.
    Finished { reason: Option<String> },
    /// A stage failed; the payload is the last good one.
    Failed { stage: String, reason: String },
}

/// Stage payload plus the continue flag.
///
/// Once the flow leaves `Proceeding` the payload is frozen.
#[derive(Debug, Clone)]
pub struct Envelope<C> {
    payload: C,
    flow: Flow,
}

impl<C> Envelope<C> {
    pub fn new(payload: C) -> Self {
        Self {
            payload,
            flow: Flow::Proceeding,
        }
    }

    pub fn payload(&self) -> &C {
        &self.payload
    }

    pub fn into_payload(self) -> C {
        self.payload
    }

    pub fn flow(&self) -> &Flow {
        &self.flow
    }

    pub fn proceed(&self) -> bool {
        matches!(self.flow, Flow::Proceeding)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.flow, Flow::Finished { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.flow, Flow::Failed { .. })
    }

    pub fn failed_stage(&self) -> Option<&str> {
        match &self.flow {
            Flow::Failed { stage, .. } => Some(stage),
            _ => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match &self.flow {
            Flow::Proceeding => None,
            Flow::Finished { reason } => reason.as_deref(),
            Flow::Failed { reason, .. } => Some(reason),
        }
    }

    fn advance(&mut self, payload: C) {
        if self.proceed() {
            self.payload = payload;
        }
    }

    fn finish(&mut self, payload: C, reason: Option<String>) {
        if self.proceed() {
            self.payload = payload;
            self.flow = Flow::Finished { reason };
        }
    }

    fn fail(&mut self, stage: &str, reason: String) {
        if self.proceed() {
            self.flow = Flow::Failed {
                stage: stage.to_string(),
                reason,
            };
        }
    }
}

// ----------------- Stages -----------------

/// Read-only view of the record under moderation, shared by every stage of a run.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    pub content: &'a str,
    pub attributes: &'a BTreeMap<String, String>,
}

impl<'a> Scope<'a> {
    pub fn new(content: &'a str, attributes: &'a BTreeMap<String, String>) -> Self {
        Self { content, attributes }
    }

    pub fn attribute(&self, key: &str) -> Option<&'a str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// What a stage wants the chain to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<C> {
    Continue(C),
    Finish { payload: C, reason: Option<String> },
}

pub trait Stage<C>: Send + Sync {
    /// Config name of the stage; also used in failure reports.
    fn name(&self) -> &'static str;

    fn handle(&self, scope: &Scope<'_>, input: &C) -> Result<Step<C>, StageError>;
}

/// Fixed, ordered list of stages over one payload type.
pub struct Chain<C> {
    label: &'static str,
    stages: Vec<Box<dyn Stage<C>>>,
}

impl<C> std::fmt::Debug for Chain<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("label", &self.label)
            .field("stages", &self.stage_names())
            .finish()
    }
}

impl<C> Chain<C> {
    pub fn new(label: &'static str, stages: Vec<Box<dyn Stage<C>>>) -> Result<Self, ConfigError> {
        if stages.is_empty() {
            return Err(ConfigError::EmptyChain { chain: label });
        }
        let mut seen = HashSet::new();
        for s in &stages {
            if !seen.insert(s.name()) {
                return Err(ConfigError::DuplicateStage {
                    chain: label,
                    name: s.name().to_string(),
                });
            }
        }
        Ok(Self { label, stages })
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage while the envelope says proceed.
    ///
    /// Errors and panics from a stage are reported to `sink` and mark the envelope failed;
    /// they never escape.
    pub fn run(&self, scope: &Scope<'_>, mut env: Envelope<C>, sink: &dyn ErrorSink) -> Envelope<C> {
        for stage in &self.stages {
            if !env.proceed() {
                break;
            }
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| stage.handle(scope, env.payload())));
            match outcome {
                Ok(Ok(Step::Continue(next))) => env.advance(next),
                Ok(Ok(Step::Finish { payload, reason })) => {
                    tracing::debug!(chain = self.label, stage = stage.name(), "chain finished early");
                    env.finish(payload, reason);
                }
                Ok(Err(e)) => {
                    let reason = format!("{} failed: {e}", stage.name());
                    sink.report_failure(stage.name(), &reason);
                    env.fail(stage.name(), reason);
                }
                Err(panic) => {
                    let reason = format!("{} panicked: {}", stage.name(), panic_message(panic.as_ref()));
                    sink.report_failure(stage.name(), &reason);
                    env.fail(stage.name(), reason);
                }
            }
        }
        env
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
