//! Character normalization used for every blocklist lookup.
//!
//! Policy:
//! - Full-width ASCII forms fold to their half-width counterparts.
//! - The ideographic space folds to an ASCII space.
//! - Half-width CJK punctuation folds to the full form.
//! - Single-char lowercase mapping is applied after width folding.
//!
//! Compatibility decompositions (circled digits, ligatures, ...) are left alone so
//! a symbol list containing `①` never strips a plain `1`.
//!
//! Keep this logic single-sourced: code sets, term dictionaries and the text being
//! scanned must all go through the same mapping.

/// Canonical lookup code of a character.
pub type Code = u32;

const FULLWIDTH_START: u32 = 0xFF01;
const FULLWIDTH_END: u32 = 0xFF5E;
const FULLWIDTH_OFFSET: u32 = 0xFEE0;
const IDEOGRAPHIC_SPACE: u32 = 0x3000;

/// Return the canonical lookup code for `ch`. Total and deterministic.
pub fn char_code(ch: char) -> Code {
    canonical(ch) as Code
}

/// Return the canonical character `ch` folds to.
pub fn canonical(ch: char) -> char {
    let folded = fold_width(ch);
    let mut lower = folded.to_lowercase();
    match (lower.next(), lower.next()) {
        (Some(lc), None) => lc,
        _ => folded,
    }
}

/// Map a whole string through [`canonical`], one output char per input char.
pub fn for_lookup(s: &str) -> String {
    s.chars().map(canonical).collect()
}

/// Iterate the canonical codes of `s`.
pub fn codes(s: &str) -> impl Iterator<Item = Code> + '_ {
    s.chars().map(char_code)
}

fn fold_width(ch: char) -> char {
    let cp = ch as u32;
    let mapped = match cp {
        FULLWIDTH_START..=FULLWIDTH_END => cp - FULLWIDTH_OFFSET,
        IDEOGRAPHIC_SPACE => 0x20,
        0xFF61 => 0x3002, // ｡
        0xFF62 => 0x300C, // ｢
        0xFF63 => 0x300D, // ｣
        0xFF64 => 0x3001, // ､
        _ => return ch,
    };
    char::from_u32(mapped).unwrap_or(ch)
}
