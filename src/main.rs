use std::collections::BTreeMap;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use wordguard_core::commands::{ensure_initialized_at, wordguard_root};
use wordguard_core::{CoreConfig, DecisionRecord, Moderator};

#[derive(Parser)]
#[command(name = "wordguard", about = "Clean and moderate text against the wordguard lexicon")]
struct Cli {
    /// Workspace root (defaults to $WORDGUARD_ROOT, then .wordguard)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Create the root with a default config, lexicon and logbook (idempotent)
    Init,
    /// Moderate text; exits with status 2 when the content is blocked
    Check {
        /// Text to check; read from stdin when omitted
        text: Option<String>,
        /// Content attribute, repeatable (e.g. --attr scene=merchant)
        #[arg(long = "attr", value_parser = parse_attr)]
        attrs: Vec<(String, String)>,
        #[arg(long)]
        json: bool,
    },
    /// Run only the cleaning chain and print the result
    Clean { text: Option<String> },
    /// Show raw and normalized code points and the categories holding each character
    Codes {
        text: Option<String>,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let root = cli.root.unwrap_or_else(wordguard_root);

    let report = ensure_initialized_at(&root)?;
    init_tracing(&report.config)?;
    tracing::debug!(root = %report.root.display(), "wordguard root loaded");

    match cli.cmd {
        Cmd::Init => {
            println!("wordguard root: {}", report.root.display());
            for f in &report.created {
                println!("  created {f}");
            }
            for f in &report.existed {
                println!("  exists  {f}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Cmd::Check { text, attrs, json } => {
            let moderator = moderator(&root)?;
            let text = text_or_stdin(text)?;
            let attrs: BTreeMap<String, String> = attrs.into_iter().collect();
            let decision = moderator.moderate(&text, &attrs);
            if json {
                println!("{}", serde_json::to_string_pretty(&decision)?);
            } else {
                print_decision(&decision);
            }
            Ok(if decision.blocked { ExitCode::from(2) } else { ExitCode::SUCCESS })
        }
        Cmd::Clean { text } => {
            let moderator = moderator(&root)?;
            println!("{}", moderator.clean(&text_or_stdin(text)?));
            Ok(ExitCode::SUCCESS)
        }
        Cmd::Codes { text, json } => {
            let moderator = moderator(&root)?;
            let rows = moderator.inspect_codes(&text_or_stdin(text)?);
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                for r in rows {
                    println!("{:?}\t{}\t{}\t{}", r.ch, r.scalar, r.code, r.categories.join(","));
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn moderator(root: &Path) -> Result<Moderator> {
    Moderator::from_root(root).with_context(|| format!("loading wordguard root {}", root.display()))
}

// RUST_LOG wins over the configured level; logs go to stderr so stdout stays parseable.
fn init_tracing(cfg: &CoreConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => EnvFilter::try_new(&cfg.logbook.log_level)
            .with_context(|| format!("invalid log level '{}'", cfg.logbook.log_level))?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .with_writer(io::stderr)
        .try_init()
        .map_err(|e| anyhow!("installing tracing subscriber: {e}"))
}

fn parse_attr(s: &str) -> Result<(String, String), String> {
    let (k, v) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{s}`"))?;
    if k.trim().is_empty() {
        return Err(format!("empty attribute name in `{s}`"));
    }
    Ok((k.trim().to_string(), v.to_string()))
}

fn text_or_stdin(text: Option<String>) -> Result<String> {
    match text {
        Some(t) => Ok(t),
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf).context("reading text from stdin")?;
            Ok(buf.trim_end_matches(['\n', '\r']).to_string())
        }
    }
}

fn print_decision(d: &DecisionRecord) {
    println!("{}", if d.blocked { "BLOCKED" } else { "allowed" });
    println!("  run:     {}", d.run_id);
    println!("  cleaned: {}", d.clean_content);
    for h in &d.hits {
        println!("  hit:     {} (id {}, {:?})", h.term, h.id, h.kind);
    }
    for h in &d.excused {
        println!("  excused: {} (id {})", h.term, h.id);
    }
    if !d.degraded.is_empty() {
        println!("  degraded: {}", d.degraded.join(", "));
    }
    if let Some(reason) = &d.reason {
        println!("  reason:  {reason}");
    }
}
