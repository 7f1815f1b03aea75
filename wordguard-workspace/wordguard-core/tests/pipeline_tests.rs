use lexicon::{AllowEntry, Allowlist, CodeSet, Dictionary, MemorySource, TermEntry, TermIndex, TermKind};
use rand::{Rng, SeedableRng, rngs::StdRng};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use wordguard_core::cache::CacheSettings;
use wordguard_core::config::{AbortPolicy, CoreConfig};
use wordguard_core::pipeline::clean::StripStage;
use wordguard_core::pipeline::{
    Chain, EffectContext, MatchingStage, NoHitsShortCircuit, Pipeline, Scope, Stage, StageError, Step,
};
use wordguard_core::services::{LexiconCaches, MemorySink};
use wordguard_core::{ConfigError, Moderator};

fn dictionary(terms: &[(u64, &str)]) -> Dictionary {
    Dictionary {
        name: "test".into(),
        version: "1".into(),
        terms: terms
            .iter()
            .map(|(id, term)| TermEntry {
                id: *id,
                term: term.to_string(),
                dictionary: 1,
            })
            .collect(),
        patterns: vec![],
    }
}

const TERMS: &[(u64, &str)] = &[(1, "blocked-term-A"), (2, "term-X"), (3, "spam"), (4, "eggs")];

fn source() -> Arc<MemorySource> {
    let src = MemorySource::new();
    src.set_codes("special_symbols", CodeSet::from_chars(['，', '!']));
    src.set_codes("hidden_characters", CodeSet::from_chars(['\u{200B}', '\u{2060}']));
    src.set_codes("emoji", CodeSet::from_chars(['😀', '🔥']));
    src.set_dictionary("terms", dictionary(TERMS));
    src.set_allowlist(
        "compliance",
        Allowlist::from_entries(vec![AllowEntry {
            id: Some(2),
            term: None,
        }]),
    );
    Arc::new(src)
}

fn build(cfg: CoreConfig, src: Arc<MemorySource>) -> (Moderator, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let moderator = match Moderator::new(cfg, src, sink.clone()) {
        Ok(m) => m,
        Err(e) => panic!("pipeline should compose: {e}"),
    };
    (moderator, sink)
}

fn no_attrs() -> BTreeMap<String, String> {
    BTreeMap::new()
}

fn ids(hits: &[lexicon::TermHit]) -> Vec<u64> {
    hits.iter().map(|h| h.id).collect()
}

// ---------------------------------------------------------------------------
// reference scenarios
// ---------------------------------------------------------------------------

#[test]
fn fullwidth_comma_is_stripped_and_term_blocks() {
    let (m, sink) = build(CoreConfig::default(), source());
    let d = m.moderate("，blocked-term-A", &no_attrs());
    assert_eq!(d.clean_content, "blocked-term-A");
    assert_eq!(d.hit_ids(), vec![1]);
    assert!(d.blocked);
    assert!(d.excused.is_empty());
    assert!(d.degraded.is_empty());
    assert!(sink.failures().is_empty());
}

#[test]
fn allowlisted_term_is_excused() {
    let (m, _) = build(CoreConfig::default(), source());
    let d = m.moderate("term-X", &no_attrs());
    assert!(!d.blocked);
    assert!(d.hits.is_empty());
    assert_eq!(d.excused_ids(), vec![2]);
}

#[test]
fn failing_emoji_category_degrades_but_completes() {
    let src = source();
    src.remove("emoji");
    let (m, sink) = build(CoreConfig::default(), src);

    let d = m.moderate("，he\u{200B}llo😀 spam", &no_attrs());
    // special symbols and hidden characters still ran
    assert_eq!(d.clean_content, "hello😀 spam");
    assert_eq!(d.degraded, vec!["emoji"]);
    assert!(d.reason.as_deref().unwrap().contains("emoji"));
    assert_eq!(d.hit_ids(), vec![3]);
    assert!(d.blocked);

    let stages = sink.failed_stages();
    assert!(stages.contains(&"cache:emoji".to_string()));
    assert!(stages.contains(&"emoji".to_string()));
}

// ---------------------------------------------------------------------------
// failure policy
// ---------------------------------------------------------------------------

#[test]
fn strict_policy_fails_closed_on_cleaning_failure() {
    let src = source();
    src.remove("emoji");
    let mut cfg = CoreConfig::default();
    cfg.pipeline.abort_policy = AbortPolicy::Strict;
    let (m, _) = build(cfg, src);

    let d = m.moderate("hello", &no_attrs());
    assert!(d.blocked);
    assert_eq!(d.hit_ids(), vec![0]);
    assert_eq!(d.hits[0].kind, TermKind::FailClosed);
    assert!(d.reason.as_deref().unwrap().contains("strict"));
}

#[test]
fn degrade_policy_keeps_clean_text_unblocked() {
    let src = source();
    src.remove("emoji");
    let (m, _) = build(CoreConfig::default(), src);
    let d = m.moderate("hello", &no_attrs());
    assert!(!d.blocked);
    assert_eq!(d.degraded, vec!["emoji"]);
}

#[test]
fn missing_dictionary_fails_closed() {
    let src = source();
    src.remove("terms");
    let (m, sink) = build(CoreConfig::default(), src);

    let d = m.moderate("perfectly harmless", &no_attrs());
    assert!(d.blocked);
    assert_eq!(d.hits, vec![lexicon::TermHit::fail_closed()]);
    assert_eq!(d.degraded, vec!["matching"]);
    assert!(sink.failed_stages().contains(&"matching".to_string()));
}

#[test]
fn missing_compliance_list_means_no_overrides() {
    let src = source();
    src.remove("compliance");
    let (m, sink) = build(CoreConfig::default(), src);
    let d = m.moderate("term-X", &no_attrs());
    assert!(d.blocked);
    assert_eq!(d.hit_ids(), vec![2]);
    assert!(d.degraded.is_empty());
    assert!(sink.failures().is_empty());
}

struct Broken;

impl Stage<EffectContext> for Broken {
    fn name(&self) -> &'static str {
        "broken"
    }
    fn handle(&self, _: &Scope<'_>, _: &EffectContext) -> Result<Step<EffectContext>, StageError> {
        Err(StageError::Failed("policy backend unreachable".into()))
    }
}

fn pipeline_with_effects(effects: Vec<Box<dyn Stage<EffectContext>>>) -> (Pipeline, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let caches = LexiconCaches::new(source(), CacheSettings::default(), sink.clone());
    let strip: Box<dyn Stage<String>> =
        Box::new(StripStage::special_symbols("special_symbols", caches.codes.clone()));
    let cleaning = Chain::new("cleaning", vec![strip]).unwrap();
    let effects = Chain::new("effects", effects).unwrap();
    let matching = MatchingStage::new("terms", caches.terms.clone());
    let pipeline = Pipeline::new(cleaning, matching, effects, AbortPolicy::Degrade, sink.clone());
    (pipeline, sink)
}

#[test]
fn failing_effect_stage_keeps_remaining_hits_blocked() {
    let no_hits: Box<dyn Stage<EffectContext>> = Box::new(NoHitsShortCircuit);
    let (p, sink) = pipeline_with_effects(vec![no_hits, Box::new(Broken)]);
    let d = p.run(wordguard_core::ContentRecord::new("spam and eggs"));
    assert!(d.blocked);
    assert_eq!(d.hit_ids(), vec![3, 4]);
    assert_eq!(d.degraded, vec!["broken"]);
    assert_eq!(sink.failed_stages(), vec!["broken"]);
}

#[test]
fn failing_effect_stage_with_nothing_left_adds_sentinel_hit() {
    let broken: Box<dyn Stage<EffectContext>> = Box::new(Broken);
    let (p, _) = pipeline_with_effects(vec![broken]);
    let d = p.run(wordguard_core::ContentRecord::new("nothing to see"));
    assert!(d.blocked);
    assert_eq!(d.hit_ids(), vec![0]);
}

// ---------------------------------------------------------------------------
// properties
// ---------------------------------------------------------------------------

#[test]
fn no_hits_short_circuits() {
    let (m, _) = build(CoreConfig::default(), source());
    let d = m.moderate("an ordinary sentence", &no_attrs());
    assert!(!d.blocked);
    assert!(d.hits.is_empty());
    assert!(d.excused.is_empty());
    assert!(d.reason.is_none());
}

struct Counting(Arc<AtomicUsize>);

impl Stage<EffectContext> for Counting {
    fn name(&self) -> &'static str {
        "counting"
    }
    fn handle(&self, _: &Scope<'_>, input: &EffectContext) -> Result<Step<EffectContext>, StageError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(Step::Continue(input.clone()))
    }
}

#[test]
fn no_hits_stops_the_effect_chain() {
    let runs = Arc::new(AtomicUsize::new(0));
    let no_hits: Box<dyn Stage<EffectContext>> = Box::new(NoHitsShortCircuit);
    let (p, sink) = pipeline_with_effects(vec![no_hits, Box::new(Counting(runs.clone())), Box::new(Broken)]);

    let d = p.run(wordguard_core::ContentRecord::new("nothing to see"));
    assert!(!d.blocked);
    assert!(d.excused.is_empty());
    assert!(d.degraded.is_empty());
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert!(sink.failures().is_empty());

    // with a hit the later stages do run
    p.run(wordguard_core::ContentRecord::new("spam"));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn allowlist_stage_leaves_hitless_runs_alone() {
    let mut cfg = CoreConfig::default();
    cfg.pipeline.effects = vec!["compliance".into()];
    let (m, _) = build(cfg, source());
    let d = m.moderate("an ordinary sentence", &no_attrs());
    assert!(!d.blocked);
    assert!(d.reason.is_none());
}

fn random_text(rng: &mut StdRng) -> String {
    const PIECES: &[&str] = &[
        "spam", "eggs", "term-X", "blocked-term-A", " ", "，", "!", "\u{200B}", "😀", "ｓｐａｍ", "x", "外",
    ];
    (0..rng.gen_range(0..12))
        .map(|_| PIECES[rng.gen_range(0..PIECES.len())])
        .collect()
}

#[test]
fn cleaning_is_idempotent() {
    let (m, _) = build(CoreConfig::default(), source());
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..500 {
        let text = random_text(&mut rng);
        let once = m.clean(&text);
        assert_eq!(m.clean(&once), once, "input {text:?}");
    }
}

#[test]
fn overrides_only_move_hits() {
    let (m, _) = build(CoreConfig::default(), source());
    let index = TermIndex::build(&dictionary(TERMS)).unwrap();
    let mut rng = StdRng::seed_from_u64(11);
    for _ in 0..500 {
        let text = random_text(&mut rng);
        let d = m.moderate(&text, &no_attrs());
        let expected: HashSet<u64> = index.scan(&d.clean_content).iter().map(|h| h.id).collect();
        let remaining: HashSet<u64> = d.hit_ids().into_iter().collect();
        let excused: HashSet<u64> = d.excused_ids().into_iter().collect();
        assert!(remaining.is_disjoint(&excused), "input {text:?}");
        let union: HashSet<u64> = remaining.union(&excused).copied().collect();
        assert_eq!(union, expected, "input {text:?}");
        assert_eq!(d.blocked, !d.hits.is_empty());
    }
}

#[test]
fn decisions_are_deterministic() {
    let (m, _) = build(CoreConfig::default(), source());
    let first = m.moderate("spam，eggs term-X", &no_attrs());
    for _ in 0..20 {
        let d = m.moderate("spam，eggs term-X", &no_attrs());
        assert_eq!(d.hits, first.hits);
        assert_eq!(d.excused, first.excused);
    }
}

// ---------------------------------------------------------------------------
// scoped allowlists
// ---------------------------------------------------------------------------

fn scoped_moderator() -> (Moderator, Arc<MemorySink>) {
    let src = source();
    src.set_allowlist(
        "compliance.merchant",
        Allowlist::from_entries(vec![AllowEntry {
            id: None,
            term: Some("SPAM".into()),
        }]),
    );
    let mut cfg = CoreConfig::default();
    cfg.pipeline.effects = vec!["no_hits".into(), "compliance".into(), "scoped".into()];
    cfg.pipeline.scopes = vec!["merchant".into()];
    build(cfg, src)
}

#[test]
fn scoped_allowlist_applies_only_to_its_scene() {
    let (m, sink) = scoped_moderator();
    let mut attrs = BTreeMap::new();
    attrs.insert("scene".to_string(), "merchant".to_string());

    let d = m.moderate("spam", &attrs);
    assert!(!d.blocked);
    assert_eq!(d.excused_ids(), vec![3]);

    let d = m.moderate("spam", &no_attrs());
    assert!(d.blocked);

    attrs.insert("scene".to_string(), "unknown".to_string());
    let d = m.moderate("spam", &attrs);
    assert!(d.blocked);
    assert!(sink.failures().is_empty());
}

#[test]
fn unlisted_scenes_never_reach_the_allowlist_cache() {
    let (m, sink) = scoped_moderator();
    for i in 0..500 {
        let mut attrs = BTreeMap::new();
        attrs.insert("scene".to_string(), format!("req-{i}"));
        assert!(m.moderate("spam", &attrs).blocked);
    }
    assert_eq!(m.caches().allowlists.keys(), vec!["compliance"]);
    assert!(sink.failures().is_empty());

    let mut attrs = BTreeMap::new();
    attrs.insert("scene".to_string(), " merchant ".to_string());
    assert!(!m.moderate("spam", &attrs).blocked);
    assert_eq!(
        m.caches().allowlists.keys(),
        vec!["compliance", "compliance.merchant"]
    );
}

// ---------------------------------------------------------------------------
// composition errors
// ---------------------------------------------------------------------------

fn config_error(cfg: CoreConfig) -> ConfigError {
    match Moderator::new(cfg, source(), Arc::new(MemorySink::new())) {
        Ok(_) => panic!("expected a configuration error"),
        Err(e) => e,
    }
}

#[test]
fn chain_configuration_errors() {
    let mut cfg = CoreConfig::default();
    cfg.pipeline.cleaning = vec![];
    assert_eq!(config_error(cfg), ConfigError::EmptyChain { chain: "cleaning" });

    let mut cfg = CoreConfig::default();
    cfg.pipeline.cleaning = vec!["emoji".into(), "sparkles".into()];
    assert_eq!(
        config_error(cfg),
        ConfigError::UnknownStage {
            chain: "cleaning",
            name: "sparkles".into()
        }
    );

    let mut cfg = CoreConfig::default();
    cfg.pipeline.effects = vec!["no_hits".into(), "emoji".into()];
    assert_eq!(
        config_error(cfg),
        ConfigError::StageKindMismatch {
            chain: "effects",
            name: "emoji".into(),
            actual: "cleaning"
        }
    );

    let mut cfg = CoreConfig::default();
    cfg.pipeline.cleaning = vec!["matching".into()];
    assert!(matches!(
        config_error(cfg),
        ConfigError::StageKindMismatch { actual: "matching", .. }
    ));

    let mut cfg = CoreConfig::default();
    cfg.pipeline.effects = vec!["compliance".into(), "compliance".into()];
    assert!(matches!(config_error(cfg), ConfigError::DuplicateStage { .. }));
}

#[test]
fn reordered_cleaning_chain_gives_same_text() {
    let mut cfg = CoreConfig::default();
    cfg.pipeline.cleaning = vec!["emoji".into(), "hidden_characters".into(), "special_symbols".into()];
    let (reordered, _) = build(cfg, source());
    let (reference, _) = build(CoreConfig::default(), source());
    let text = "，s\u{2060}p😀a!m🔥";
    assert_eq!(reordered.clean(text), reference.clean(text));
    assert_eq!(reference.clean(text), "spam");
}
