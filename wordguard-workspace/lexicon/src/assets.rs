use anyhow::{Context, Result};
use std::{
    borrow::Cow,
    fs,
    path::Path,
};

/// === Embedded default lexicon ===
pub const SPECIAL_SYMBOLS: &str = "special_symbols";
pub const HIDDEN_CHARACTERS: &str = "hidden_characters";
pub const EMOJI: &str = "emoji";
pub const TERMS: &str = "terms";
pub const COMPLIANCE: &str = "compliance";

const SPECIAL_SYMBOLS_TXT: &str = include_str!("../assets/special_symbols.txt");
const HIDDEN_CHARACTERS_TXT: &str = include_str!("../assets/hidden_characters.txt");
const EMOJI_TXT: &str = include_str!("../assets/emoji.txt");
const TERMS_TOML: &str = include_str!("../assets/terms.toml");
const COMPLIANCE_TOML: &str = include_str!("../assets/compliance.toml");

const EMBEDDED: [(&str, &str); 5] = [
    ("special_symbols.txt", SPECIAL_SYMBOLS_TXT),
    ("hidden_characters.txt", HIDDEN_CHARACTERS_TXT),
    ("emoji.txt", EMOJI_TXT),
    ("terms.toml", TERMS_TOML),
    ("compliance.toml", COMPLIANCE_TOML),
];

/// Return the embedded text for a known lexicon file name, if any.
pub fn default_lexicon_text(file_name: &str) -> Option<&'static str> {
    EMBEDDED
        .iter()
        .find(|(name, _)| *name == file_name)
        .map(|(_, text)| *text)
}

/// Seed missing default lexicon files into a destination directory (idempotent).
/// Returns a list of files that were created.
pub fn write_default_lexicon(dir: impl AsRef<Path>) -> Result<Vec<String>> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).with_context(|| format!("create_dir_all({:?})", dir))?;

    let mut created = Vec::new();
    for (name, text) in EMBEDDED {
        let path = dir.join(name);
        if !path.exists() {
            fs::write(&path, text).with_context(|| format!("write {:?}", path))?;
            created.push(name.to_string());
        }
    }

    Ok(created)
}

/// Verified reader with "locked" mode.
///
/// - If `path` exists:
///   - with an embedded copy, compare blake3(file) against blake3(embedded);
///   - match → return file contents;
///   - mismatch and `locked` → restore the embedded copy on disk and return it;
///   - mismatch and not locked → return the local edit.
/// - If `path` is missing and an embedded copy exists, best-effort write it and return it.
/// - Otherwise `Ok(None)`: the caller decides whether a missing file is an error.
pub fn read_verified_or_embedded(path: &Path, locked: bool) -> Result<Option<Cow<'static, str>>> {
    let name = path.file_name().and_then(|s| s.to_str()).unwrap_or("");
    let embedded_opt = default_lexicon_text(name);

    if path.exists() {
        let file_bytes = fs::read(path).with_context(|| format!("read {:?}", path))?;
        let local = || Cow::Owned(String::from_utf8_lossy(&file_bytes).into_owned());
        let Some(embedded) = embedded_opt else {
            return Ok(Some(local()));
        };
        if fingerprint(&file_bytes) == fingerprint(embedded.as_bytes()) || !locked {
            return Ok(Some(local()));
        }
        fs::write(path, embedded).with_context(|| format!("restore embedded {:?}", path))?;
        return Ok(Some(Cow::Borrowed(embedded)));
    }

    match embedded_opt {
        Some(embedded) => {
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir).ok();
            }
            let _ = fs::write(path, embedded);
            Ok(Some(Cow::Borrowed(embedded)))
        }
        None => Ok(None),
    }
}

/// blake3 hex digest of a lexicon file.
pub fn fingerprint(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}
