// src/record.rs
use lexicon::TermHit;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Text under moderation plus its attribute bag.
///
/// `clean_content` starts as a copy of `content` and only ever shrinks as
/// cleaning stages strip characters from it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub content: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    pub clean_content: String,
}

impl ContentRecord {
    pub fn new(content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            clean_content: content.clone(),
            content,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attributes(content: impl Into<String>, attributes: BTreeMap<String, String>) -> Self {
        let mut rec = Self::new(content);
        rec.attributes = attributes;
        rec
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// Outcome of one moderation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecisionRecord {
    pub run_id: Uuid,
    pub blocked: bool,
    pub content: String,
    pub clean_content: String,
    /// Hits left after every override; non-empty exactly when `blocked`.
    pub hits: Vec<TermHit>,
    pub excused: Vec<TermHit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<String>,
}

impl DecisionRecord {
    pub fn new(
        record: ContentRecord,
        hits: Vec<TermHit>,
        excused: Vec<TermHit>,
        reason: Option<String>,
        degraded: Vec<String>,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            blocked: !hits.is_empty(),
            content: record.content,
            clean_content: record.clean_content,
            hits,
            excused,
            reason,
            degraded,
        }
    }

    pub fn hit_ids(&self) -> Vec<u64> {
        self.hits.iter().map(|h| h.id).collect()
    }

    pub fn excused_ids(&self) -> Vec<u64> {
        self.excused.iter().map(|h| h.id).collect()
    }
}
