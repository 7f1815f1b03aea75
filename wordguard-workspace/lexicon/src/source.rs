use crate::assets::{default_lexicon_text, read_verified_or_embedded};
use crate::error::LexiconError;
use crate::types::{Allowlist, CodeSet, Dictionary};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Where lexicon categories come from (files, embedded defaults, a remote service, ...).
///
/// Implementations must be cheap to share across threads; the lookup cache calls them
/// from worker threads during refreshes.
pub trait LexiconSource: Send + Sync {
    /// Character category (`special_symbols`, `hidden_characters`, `emoji`, ...).
    fn load_codes(&self, category: &str) -> Result<CodeSet, LexiconError>;
    /// Sensitive-term dictionary.
    fn load_dictionary(&self, category: &str) -> Result<Dictionary, LexiconError>;
    /// Compliance or policy allowlist.
    fn load_allowlist(&self, category: &str) -> Result<Allowlist, LexiconError>;
}

// -------------- embedded --------------

/// Serves the lexicon compiled into this crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedSource;

impl EmbeddedSource {
    fn text(category: &str, ext: &str) -> Result<&'static str, LexiconError> {
        default_lexicon_text(&format!("{category}.{ext}"))
            .ok_or_else(|| LexiconError::NotFound(category.to_string()))
    }
}

impl LexiconSource for EmbeddedSource {
    fn load_codes(&self, category: &str) -> Result<CodeSet, LexiconError> {
        CodeSet::parse(category, Self::text(category, "txt")?)
    }

    fn load_dictionary(&self, category: &str) -> Result<Dictionary, LexiconError> {
        Dictionary::parse(category, Self::text(category, "toml")?)
    }

    fn load_allowlist(&self, category: &str) -> Result<Allowlist, LexiconError> {
        Allowlist::parse(category, Self::text(category, "toml")?)
    }
}

// -------------- directory --------------

/// Reads `<root>/<category>.txt` for code sets and `<root>/<category>.toml` for
/// dictionaries and allowlists. In `locked` mode, files that have an embedded
/// canonical copy are restored to it when edited on disk.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
    locked: bool,
}

impl DirectorySource {
    pub fn new<P: AsRef<Path>>(root: P, locked: bool) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            locked,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read(&self, category: &str, ext: &str) -> Result<String, LexiconError> {
        let path = self.root.join(format!("{}.{ext}", sanitize(category)));
        match read_verified_or_embedded(&path, self.locked) {
            Ok(Some(text)) => Ok(text.into_owned()),
            Ok(None) => Err(LexiconError::NotFound(category.to_string())),
            Err(e) => Err(LexiconError::Unavailable(format!("{}: {e:#}", path.display()))),
        }
    }
}

impl LexiconSource for DirectorySource {
    fn load_codes(&self, category: &str) -> Result<CodeSet, LexiconError> {
        CodeSet::parse(category, &self.read(category, "txt")?)
    }

    fn load_dictionary(&self, category: &str) -> Result<Dictionary, LexiconError> {
        Dictionary::parse(category, &self.read(category, "toml")?)
    }

    fn load_allowlist(&self, category: &str) -> Result<Allowlist, LexiconError> {
        Allowlist::parse(category, &self.read(category, "toml")?)
    }
}

// -------------- in-memory --------------

/// Mutable in-memory source for embedding applications and tests.
/// Categories that were never set (or were removed) load as `NotFound`.
#[derive(Debug, Default)]
pub struct MemorySource {
    codes: RwLock<HashMap<String, CodeSet>>,
    dictionaries: RwLock<HashMap<String, Dictionary>>,
    allowlists: RwLock<HashMap<String, Allowlist>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_codes(&self, category: &str, codes: CodeSet) {
        write_map(&self.codes).insert(category.to_string(), codes);
    }

    pub fn set_dictionary(&self, category: &str, dict: Dictionary) {
        write_map(&self.dictionaries).insert(category.to_string(), dict);
    }

    pub fn set_allowlist(&self, category: &str, list: Allowlist) {
        write_map(&self.allowlists).insert(category.to_string(), list);
    }

    /// Forget a category in every map.
    pub fn remove(&self, category: &str) {
        write_map(&self.codes).remove(category);
        write_map(&self.dictionaries).remove(category);
        write_map(&self.allowlists).remove(category);
    }
}

impl LexiconSource for MemorySource {
    fn load_codes(&self, category: &str) -> Result<CodeSet, LexiconError> {
        read_entry(&self.codes, category)
    }

    fn load_dictionary(&self, category: &str) -> Result<Dictionary, LexiconError> {
        read_entry(&self.dictionaries, category)
    }

    fn load_allowlist(&self, category: &str) -> Result<Allowlist, LexiconError> {
        read_entry(&self.allowlists, category)
    }
}

// -------------- helpers --------------

fn write_map<V>(
    lock: &RwLock<HashMap<String, V>>,
) -> std::sync::RwLockWriteGuard<'_, HashMap<String, V>> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read_entry<V: Clone>(
    lock: &RwLock<HashMap<String, V>>,
    category: &str,
) -> Result<V, LexiconError> {
    let map = lock.read().unwrap_or_else(|poisoned| poisoned.into_inner());
    map.get(category)
        .cloned()
        .ok_or_else(|| LexiconError::NotFound(category.to_string()))
}

/// Category names become file names; keep them inside the lexicon directory.
fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}
