use lexicon::assets::{default_lexicon_text, write_default_lexicon};
use lexicon::{
    AllowEntry, Allowlist, CodeSet, DirectorySource, EmbeddedSource, LexiconError, LexiconSource,
    MemorySource,
};
use std::fs;

#[test]
fn embedded_categories_load() {
    let src = EmbeddedSource;
    assert!(src.load_codes("special_symbols").unwrap().contains_char('，'));
    assert!(src.load_codes("hidden_characters").unwrap().contains_char('\u{200B}'));
    assert!(src.load_codes("emoji").unwrap().contains_char('😀'));
    assert!(!src.load_dictionary("terms").unwrap().terms.is_empty());
    assert!(!src.load_allowlist("compliance").unwrap().is_empty());
}

#[test]
fn embedded_unknown_category_is_not_found() {
    assert!(EmbeddedSource.load_codes("nope").unwrap_err().is_not_found());
}

#[test]
fn embedded_emoji_set_keeps_plain_digits() {
    let emoji = EmbeddedSource.load_codes("emoji").unwrap();
    assert!(!emoji.contains_char('1'));
    assert!(!emoji.contains_char('#'));
}

#[test]
fn seeding_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let first = write_default_lexicon(dir.path()).unwrap();
    assert_eq!(first.len(), 5);
    let second = write_default_lexicon(dir.path()).unwrap();
    assert!(second.is_empty());
}

#[test]
fn directory_source_reads_local_edits_when_unlocked() {
    let dir = tempfile::tempdir().unwrap();
    write_default_lexicon(dir.path()).unwrap();
    fs::write(dir.path().join("emoji.txt"), "★\n").unwrap();

    let src = DirectorySource::new(dir.path(), false);
    let emoji = src.load_codes("emoji").unwrap();
    assert_eq!(emoji.len(), 1);
    assert!(emoji.contains_char('★'));
}

#[test]
fn directory_source_restores_embedded_copy_when_locked() {
    let dir = tempfile::tempdir().unwrap();
    write_default_lexicon(dir.path()).unwrap();
    let path = dir.path().join("emoji.txt");
    fs::write(&path, "★\n").unwrap();

    let src = DirectorySource::new(dir.path(), true);
    let emoji = src.load_codes("emoji").unwrap();
    assert!(emoji.contains_char('😀'));
    assert_eq!(fs::read_to_string(&path).unwrap(), default_lexicon_text("emoji.txt").unwrap());
}

#[test]
fn directory_source_custom_category_without_embedded_copy() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("compliance.merchant.toml"),
        "[[entries]]\nid = 1004\n",
    )
    .unwrap();
    let src = DirectorySource::new(dir.path(), true);
    let list = src.load_allowlist("compliance.merchant").unwrap();
    assert!(list.covers(1004, "刷单"));

    let missing = src.load_allowlist("compliance.unknown").unwrap_err();
    assert!(missing.is_not_found());
}

#[test]
fn directory_source_reports_parse_errors() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("broken.toml"), "[[terms]\nid = ").unwrap();
    let err = DirectorySource::new(dir.path(), false)
        .load_dictionary("broken")
        .unwrap_err();
    assert!(matches!(err, LexiconError::Parse { .. }));
}

#[test]
fn memory_source_set_and_remove() {
    let src = MemorySource::new();
    src.set_codes("emoji", CodeSet::from_chars(['😀']));
    src.set_allowlist(
        "compliance",
        Allowlist::from_entries(vec![AllowEntry { id: Some(1), term: None }]),
    );
    assert!(src.load_codes("emoji").unwrap().contains_char('😀'));
    assert!(src.load_allowlist("compliance").unwrap().covers(1, "x"));

    src.remove("emoji");
    assert!(src.load_codes("emoji").unwrap_err().is_not_found());
}
