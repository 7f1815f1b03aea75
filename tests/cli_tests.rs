use std::process::Command;

fn wordguard(root: &std::path::Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_wordguard"));
    cmd.arg("--root").arg(root).env_remove("RUST_LOG");
    cmd
}

#[test]
fn init_then_check_blocked_and_allowed() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("wg");

    let out = wordguard(&root).arg("init").output().unwrap();
    assert!(out.status.success());
    assert!(root.join("config.toml").exists());

    let out = wordguard(&root).args(["check", "顺便刷单", "--json"]).output().unwrap();
    assert_eq!(out.status.code(), Some(2));
    let decision: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(decision["blocked"], true);
    assert_eq!(decision["hits"][0]["id"], 1004);

    let out = wordguard(&root).args(["check", "点外卖"]).output().unwrap();
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).starts_with("allowed"));
}

#[test]
fn clean_prints_cleaned_text() {
    let dir = tempfile::tempdir().unwrap();
    let out = wordguard(dir.path()).args(["clean", "a\u{200B}b😀c，"]).output().unwrap();
    assert!(out.status.success());
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim_end(), "abc");
}

#[test]
fn malformed_attribute_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let out = wordguard(dir.path()).args(["check", "x", "--attr", "novalue"]).output().unwrap();
    assert!(!out.status.success());
}

#[test]
fn codes_reports_each_character() {
    let dir = tempfile::tempdir().unwrap();
    let out = wordguard(dir.path()).args(["codes", "Ａ，", "--json"]).output().unwrap();
    assert!(out.status.success());
    let rows: Vec<serde_json::Value> = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["scalar"], "U+FF21");
    assert_eq!(rows[1]["categories"][0], "special_symbols");
}
