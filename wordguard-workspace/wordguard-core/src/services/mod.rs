// src/services/mod.rs

pub mod audit;  // error sinks + JSONL logbook
pub mod caches; // category caches over one LexiconSource

pub use audit::{ErrorSink, FanoutSink, LogbookSink, MemorySink, TracingSink};
pub use caches::{LexiconCaches, ReloadReport};
