use thiserror::Error;

/// Failures while loading or parsing lexicon data.
#[derive(Debug, Error)]
pub enum LexiconError {
    #[error("lexicon category `{0}` not found")]
    NotFound(String),

    #[error("parsing `{category}`: {message}")]
    Parse { category: String, message: String },

    #[error("invalid pattern rule {id} (`{pattern}`): {source}")]
    Pattern {
        id: u64,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("building term automaton: {0}")]
    Automaton(#[from] aho_corasick::BuildError),

    #[error("lexicon source unavailable: {0}")]
    Unavailable(String),
}

impl LexiconError {
    pub fn parse(category: &str, message: impl Into<String>) -> Self {
        Self::Parse {
            category: category.to_string(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, LexiconError::NotFound(_))
    }
}
