// wordguard-core/src/commands/init.rs

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::CoreConfig;
use crate::services::audit::init_event_line;

#[derive(Debug, Clone)]
pub struct InitReport {
    pub root: PathBuf,
    pub config: CoreConfig,
    pub created: Vec<String>,
    pub existed: Vec<String>,
}

// ---------- single global init gate ----------

static INIT: OnceCell<InitReport> = OnceCell::new();

/// Idempotent global initializer for the root named by `WORDGUARD_ROOT`.
pub fn ensure_initialized_once() -> Result<&'static InitReport> {
    INIT.get_or_try_init(|| ensure_initialized_at(&wordguard_root()))
}

/// Resolve the wordguard root. Override with WORDGUARD_ROOT.
pub fn wordguard_root() -> PathBuf {
    std::env::var_os("WORDGUARD_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".wordguard"))
}

/// Seed `root` with a config file, the default lexicon and the logbook streams.
/// Existing files are left alone.
pub fn ensure_initialized_at(root: &Path) -> Result<InitReport> {
    let mut created = Vec::new();
    let mut existed = Vec::new();

    ensure_dir(root, "", &mut created, &mut existed)?;
    ensure_file(
        root,
        "config.toml",
        DEFAULT_CONFIG_TOML,
        &mut created,
        &mut existed,
    )?;

    let config = CoreConfig::load(root)?;

    let lexicon_dir = &config.lexicon.path;
    let seeded = lexicon::write_default_lexicon(lexicon_dir)
        .with_context(|| format!("seeding lexicon into {}", lexicon_dir.display()))?;
    for name in seeded {
        created.push(format!("lexicon/{name}"));
    }

    if config.logbook.enabled {
        let version = config.system.version.clone();
        ensure_dir(root, "logbook", &mut created, &mut existed)?;
        ensure_seeded_jsonl(&config.logbook.failures_log, &version, &mut created, &mut existed)?;
        ensure_seeded_jsonl(&config.logbook.decisions_log, &version, &mut created, &mut existed)?;
    }

    tracing::info!(root = %root.display(), created = created.len(), "wordguard root ready");
    Ok(InitReport {
        root: root.to_path_buf(),
        config,
        created,
        existed,
    })
}

fn ensure_dir(base: &Path, rel: &str, created: &mut Vec<String>, existed: &mut Vec<String>) -> Result<()> {
    let p = if rel.is_empty() { base.to_path_buf() } else { base.join(rel) };
    let label = if rel.is_empty() { ".".to_string() } else { rel.to_string() };
    if p.exists() {
        existed.push(label);
        return Ok(());
    }
    fs::create_dir_all(&p).with_context(|| format!("create_dir_all({:?})", p))?;
    created.push(label);
    Ok(())
}

fn ensure_file(
    base: &Path,
    rel_file: &str,
    content_if_absent: &str,
    created: &mut Vec<String>,
    existed: &mut Vec<String>,
) -> Result<()> {
    let p = base.join(rel_file);
    if p.exists() {
        existed.push(rel_file.to_string());
        return Ok(());
    }
    write_atomic(&p, content_if_absent.as_bytes())?;
    created.push(rel_file.to_string());
    Ok(())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create_dir_all({:?})", parent))?;
    }
    let tmp = path.with_extension("tmp");
    {
        let mut f = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&tmp)
            .with_context(|| format!("open temp file {:?}", tmp))?;
        f.write_all(bytes)?;
        f.flush()?;
    }
    fs::rename(&tmp, path).with_context(|| format!("rename {:?} -> {:?}", tmp, path))?;
    Ok(())
}

// An empty stream gets one system_init line so tailers always see valid JSONL.
fn ensure_seeded_jsonl(
    path: &Path,
    version: &str,
    created: &mut Vec<String>,
    existed: &mut Vec<String>,
) -> Result<()> {
    let label = path
        .file_name()
        .map(|n| format!("logbook/{}", n.to_string_lossy()))
        .unwrap_or_else(|| path.display().to_string());
    let line = init_event_line(version) + "\n";
    if !path.exists() {
        write_atomic(path, line.as_bytes())?;
        created.push(label);
        return Ok(());
    }
    existed.push(label);
    if fs::metadata(path)?.len() == 0 {
        let mut f = OpenOptions::new().append(true).open(path)?;
        f.write_all(line.as_bytes())?;
    }
    Ok(())
}

// ---------- defaults ----------

const DEFAULT_CONFIG_TOML: &str = r#"[system]
name = "wordguard"
version = "0.1.0"

[lexicon]
# "embedded" serves the compiled-in lists; "directory" reads <path>/<category>.{txt,toml}
source = "directory"
path = "lexicon"
# restore edited default files to their shipped copies
locked = false

[lexicon.categories]
special_symbols = "special_symbols"
hidden_characters = "hidden_characters"
emoji = "emoji"
terms = "terms"
compliance = "compliance"

[cache]
refresh_interval_secs = 600
retry_interval_secs = 30
load_timeout_ms = 2000

[pipeline]
cleaning = ["special_symbols", "hidden_characters", "emoji"]
effects = ["no_hits", "compliance"]
# "degrade" keeps matching after a cleaning failure; "strict" blocks the content instead
abort_policy = "degrade"
scope_attribute = "scene"
scope_prefix = "compliance"
# scene values with a `compliance.<scene>` allowlist, e.g. ["merchant"]
scopes = []

[logbook]
enabled = true
path = "logbook"
failures_log = "logbook/failures.jsonl"
decisions_log = "logbook/decisions.jsonl"
preview_len = 160
log_level = "info"
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceKind;

    #[test]
    fn init_seeds_root_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("wg");

        let first = ensure_initialized_at(&root).unwrap();
        assert!(first.created.contains(&"config.toml".to_string()));
        assert!(first.created.contains(&"lexicon/terms.toml".to_string()));
        assert!(root.join("lexicon/emoji.txt").exists());
        assert!(root.join("logbook/failures.jsonl").exists());
        assert_eq!(first.config.lexicon.source, SourceKind::Directory);

        let second = ensure_initialized_at(&root).unwrap();
        assert!(second.created.is_empty());
        assert!(second.existed.contains(&"config.toml".to_string()));
    }
}
