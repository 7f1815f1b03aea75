// Public modules so wordguard-core can use them
pub mod assets;
pub mod error;
pub mod matcher;
pub mod normalize;
pub mod source;
pub mod types;

pub use assets::{default_lexicon_text, fingerprint, write_default_lexicon};
pub use error::LexiconError;
pub use matcher::{TermHit, TermIndex};
pub use normalize::{canonical, char_code, for_lookup, Code};
pub use source::{DirectorySource, EmbeddedSource, LexiconSource, MemorySource};
pub use types::{AllowEntry, Allowlist, CodeSet, Dictionary, PatternEntry, TermEntry, TermId, TermKind};

/// Parse a TOML dictionary and scan `text` with it in one call.
pub fn scan_with_dictionary_toml(dictionary_toml: &str, text: &str) -> Result<Vec<TermHit>, LexiconError> {
    let dict = Dictionary::parse("inline", dictionary_toml)?;
    Ok(TermIndex::build(&dict)?.scan(text))
}
