use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub lexicon: LexiconConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logbook: LogbookConfig,
}

impl CoreConfig {
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join("config.toml");
        let mut cfg = if path.exists() {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            Self::from_toml(&text)
                .with_context(|| format!("parsing config file {}", path.display()))?
        } else {
            tracing::info!(
                "No config file found at {}. Using CoreConfig::default().",
                path.display()
            );
            CoreConfig::default()
        };
        cfg.resolve_paths(root);
        Ok(cfg)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str::<CoreConfig>(text)?)
    }

    fn resolve_paths(&mut self, root: &Path) {
        self.lexicon.path = absolutize(root, &self.lexicon.path);
        self.logbook.path = absolutize(root, &self.logbook.path);
        self.logbook.failures_log = absolutize(root, &self.logbook.failures_log);
        self.logbook.decisions_log = absolutize(root, &self.logbook.decisions_log);
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    #[serde(default = "SystemConfig::default_name")]
    pub name: String,
    #[serde(default = "SystemConfig::default_version")]
    pub version: String,
}

impl SystemConfig {
    fn default_name() -> String {
        "wordguard".to_string()
    }

    fn default_version() -> String {
        "0.1.0".to_string()
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            name: Self::default_name(),
            version: Self::default_version(),
        }
    }
}

// -------------------------------------------------------------------------
// Lexicon source + category names
// -------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Compiled-in defaults; no files needed.
    #[default]
    Embedded,
    /// `<lexicon.path>/<category>.{txt,toml}`
    Directory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LexiconConfig {
    #[serde(default)]
    pub source: SourceKind,
    #[serde(default = "LexiconConfig::default_path")]
    pub path: PathBuf,
    /// Restore edited lexicon files to their embedded copies.
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub categories: CategoryNames,
}

impl LexiconConfig {
    fn default_path() -> PathBuf {
        PathBuf::from("lexicon")
    }
}

impl Default for LexiconConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::default(),
            path: Self::default_path(),
            locked: false,
            categories: CategoryNames::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryNames {
    #[serde(default = "CategoryNames::default_special_symbols")]
    pub special_symbols: String,
    #[serde(default = "CategoryNames::default_hidden_characters")]
    pub hidden_characters: String,
    #[serde(default = "CategoryNames::default_emoji")]
    pub emoji: String,
    #[serde(default = "CategoryNames::default_terms")]
    pub terms: String,
    #[serde(default = "CategoryNames::default_compliance")]
    pub compliance: String,
}

impl CategoryNames {
    fn default_special_symbols() -> String {
        lexicon::assets::SPECIAL_SYMBOLS.to_string()
    }
    fn default_hidden_characters() -> String {
        lexicon::assets::HIDDEN_CHARACTERS.to_string()
    }
    fn default_emoji() -> String {
        lexicon::assets::EMOJI.to_string()
    }
    fn default_terms() -> String {
        lexicon::assets::TERMS.to_string()
    }
    fn default_compliance() -> String {
        lexicon::assets::COMPLIANCE.to_string()
    }
}

impl Default for CategoryNames {
    fn default() -> Self {
        Self {
            special_symbols: Self::default_special_symbols(),
            hidden_characters: Self::default_hidden_characters(),
            emoji: Self::default_emoji(),
            terms: Self::default_terms(),
            compliance: Self::default_compliance(),
        }
    }
}

// -------------------------------------------------------------------------
// Lookup cache timing
// -------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "CacheConfig::default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    /// Retry delay after a failed load (no snapshot, or a failed refresh).
    #[serde(default = "CacheConfig::default_retry_interval_secs")]
    pub retry_interval_secs: u64,
    #[serde(default = "CacheConfig::default_load_timeout_ms")]
    pub load_timeout_ms: u64,
}

impl CacheConfig {
    fn default_refresh_interval_secs() -> u64 {
        600
    }
    fn default_retry_interval_secs() -> u64 {
        30
    }
    fn default_load_timeout_ms() -> u64 {
        2_000
    }

    pub fn refresh_after(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn retry_after(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: Self::default_refresh_interval_secs(),
            retry_interval_secs: Self::default_retry_interval_secs(),
            load_timeout_ms: Self::default_load_timeout_ms(),
        }
    }
}

// -------------------------------------------------------------------------
// Pipeline composition
// -------------------------------------------------------------------------

/// What the runner does when a cleaning stage fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortPolicy {
    /// Keep going: match on whatever text was cleaned so far.
    #[default]
    Degrade,
    /// Stop the run and fail closed. This blocks content whose cleaning failed, overriding
    /// the rule that cleaning failures never widen the blocked set.
    Strict,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "PipelineConfig::default_cleaning")]
    pub cleaning: Vec<String>,
    #[serde(default = "PipelineConfig::default_effects")]
    pub effects: Vec<String>,
    #[serde(default)]
    pub abort_policy: AbortPolicy,
    /// Content attribute that selects a scoped allowlist (`scoped` effect stage).
    #[serde(default = "PipelineConfig::default_scope_attribute")]
    pub scope_attribute: String,
    /// Scoped allowlist category is `<scope_prefix>.<attribute value>`.
    #[serde(default = "PipelineConfig::default_scope_prefix")]
    pub scope_prefix: String,
    /// Attribute values that have a scoped allowlist. Any other value is ignored.
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl PipelineConfig {
    fn default_cleaning() -> Vec<String> {
        vec![
            "special_symbols".into(),
            "hidden_characters".into(),
            "emoji".into(),
        ]
    }
    fn default_effects() -> Vec<String> {
        vec!["no_hits".into(), "compliance".into()]
    }
    fn default_scope_attribute() -> String {
        "scene".into()
    }
    fn default_scope_prefix() -> String {
        "compliance".into()
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cleaning: Self::default_cleaning(),
            effects: Self::default_effects(),
            abort_policy: AbortPolicy::default(),
            scope_attribute: Self::default_scope_attribute(),
            scope_prefix: Self::default_scope_prefix(),
            scopes: Vec::new(),
        }
    }
}

// -------------------------------------------------------------------------
// Logbook
// -------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct LogbookConfig {
    #[serde(default = "LogbookConfig::default_enabled")]
    pub enabled: bool,
    #[serde(default = "LogbookConfig::default_path")]
    pub path: PathBuf,
    #[serde(default = "LogbookConfig::default_failures_log")]
    pub failures_log: PathBuf,
    #[serde(default = "LogbookConfig::default_decisions_log")]
    pub decisions_log: PathBuf,
    #[serde(default = "LogbookConfig::default_preview_len")]
    pub preview_len: usize,
    /// Default tracing filter when `RUST_LOG` is unset.
    #[serde(default = "LogbookConfig::default_log_level")]
    pub log_level: String,
}

impl LogbookConfig {
    fn default_enabled() -> bool {
        true
    }
    fn default_path() -> PathBuf {
        PathBuf::from("logbook")
    }
    fn default_failures_log() -> PathBuf {
        PathBuf::from("logbook/failures.jsonl")
    }
    fn default_decisions_log() -> PathBuf {
        PathBuf::from("logbook/decisions.jsonl")
    }
    fn default_preview_len() -> usize {
        160
    }
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for LogbookConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            path: Self::default_path(),
            failures_log: Self::default_failures_log(),
            decisions_log: Self::default_decisions_log(),
            preview_len: Self::default_preview_len(),
            log_level: Self::default_log_level(),
        }
    }
}

fn absolutize(root: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        value.to_path_buf()
    } else {
        root.join(value)
    }
}
