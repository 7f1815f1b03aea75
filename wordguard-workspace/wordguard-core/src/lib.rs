// wordguard-core/src/lib.rs
pub mod cache;
pub mod commands;
pub mod config;
pub mod pipeline;
pub mod record;
pub mod services;

pub use cache::{CacheSettings, Lookup, LookupCache};
pub use commands::{Moderator, moderate};
pub use config::{AbortPolicy, CoreConfig};
pub use pipeline::{ConfigError, Pipeline, StageError};
pub use record::{ContentRecord, DecisionRecord};
pub use services::{ErrorSink, LexiconCaches};

pub use lexicon::{TermHit, TermKind};
