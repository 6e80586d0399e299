//! Sweep engine tests against an in-memory registry with scripted fetchers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tripwire::config::{DeliveryPolicy, EngineConfig, FetchMode};
use tripwire::db::Database;
use tripwire::error::{Result, TripwireError};
use tripwire::fetch::{FailureKind, FetchFailure, FetchOutcome, PageContent, PageFetcher};
use tripwire::model::{ChannelConfig, Extraction, KeywordRule, MatchMode, Target};
use tripwire::notify::{Notifier, NotifierFactory};
use tripwire::registry::Registry;
use tripwire::sweep::{SweepReport, Sweeper, TargetOutcome, MSG_NOT_FOUND, MSG_NO_RULES};

/// Serves canned pages by URL and counts every call
struct ScriptedFetcher {
    mode: FetchMode,
    pages: Mutex<HashMap<String, FetchOutcome>>,
    fetches: AtomicUsize,
    begin_fails: bool,
    ended: AtomicUsize,
}

impl ScriptedFetcher {
    fn new(mode: FetchMode) -> Self {
        Self {
            mode,
            pages: Mutex::new(HashMap::new()),
            fetches: AtomicUsize::new(0),
            begin_fails: false,
            ended: AtomicUsize::new(0),
        }
    }

    fn serve(&self, url: &str, html: &str) {
        self.pages.lock().unwrap().insert(
            url.to_string(),
            FetchOutcome::Content(PageContent {
                url: url.to_string(),
                html: html.to_string(),
            }),
        );
    }

    fn fail(&self, url: &str, failure: FetchFailure) {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), FetchOutcome::Failed(failure));
    }

    fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl PageFetcher for ScriptedFetcher {
    fn mode(&self) -> FetchMode {
        self.mode
    }

    fn begin_sweep(&self) -> Result<()> {
        if self.begin_fails {
            return Err(TripwireError::EngineInitError("chromium missing".into()));
        }
        Ok(())
    }

    fn fetch(&self, url: &str) -> FetchOutcome {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.pages
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_else(|| FetchOutcome::Failed(FetchFailure::new(FailureKind::Status(404), "HTTP 404")))
    }

    fn end_sweep(&self) {
        self.ended.fetch_add(1, Ordering::SeqCst);
    }
}

/// Records every message; optionally reports failure
struct RecordingNotifier {
    sent: Arc<Mutex<Vec<String>>>,
    succeed: bool,
}

impl Notifier for RecordingNotifier {
    fn send(&self, message: &str) -> bool {
        self.sent.lock().unwrap().push(message.to_string());
        self.succeed
    }
}

fn recording_factory(succeed: bool) -> (Arc<dyn NotifierFactory>, Arc<Mutex<Vec<String>>>) {
    let sent = Arc::new(Mutex::new(Vec::new()));
    let inner = Arc::clone(&sent);
    let factory: Arc<dyn NotifierFactory> = Arc::new(move |_: &ChannelConfig| -> Box<dyn Notifier> {
        Box::new(RecordingNotifier {
            sent: Arc::clone(&inner),
            succeed,
        })
    });
    (factory, sent)
}

fn channel() -> ChannelConfig {
    ChannelConfig {
        bot_token: "123456:ABCDEF".to_string(),
        chat_id: "42".to_string(),
        proxy_url: None,
    }
}

fn engine_config(mode: FetchMode) -> EngineConfig {
    EngineConfig {
        fetch_mode: mode,
        inter_target_delay_ms: 0,
        ..EngineConfig::default()
    }
}

struct Harness {
    db: Arc<Database>,
    fetcher: Arc<ScriptedFetcher>,
    sent: Arc<Mutex<Vec<String>>>,
    sweeper: Sweeper,
}

fn harness_with(fetcher: ScriptedFetcher, config: EngineConfig, notify_ok: bool, with_channel: bool) -> Harness {
    let db = Arc::new(Database::open_in_memory().unwrap());
    if with_channel {
        db.set_channel_config(&channel()).unwrap();
    }
    let fetcher = Arc::new(fetcher);
    let (factory, sent) = recording_factory(notify_ok);
    let registry: Arc<dyn Registry> = db.clone();
    let page_fetcher: Arc<dyn PageFetcher> = fetcher.clone();
    let sweeper = Sweeper::new(registry, page_fetcher, factory, config);
    Harness {
        db,
        fetcher,
        sent,
        sweeper,
    }
}

fn harness() -> Harness {
    harness_with(
        ScriptedFetcher::new(FetchMode::Stealth),
        engine_config(FetchMode::Stealth),
        true,
        true,
    )
}

fn add_target(db: &Database, name: &str, url: &str) -> Target {
    let target = Target::new(name.to_string(), url.to_string());
    db.insert_target(&target).unwrap();
    target
}

fn arm(db: &Database, target: &Target, keyword: &str, mode: MatchMode) -> KeywordRule {
    let rule = KeywordRule::new(target.id, keyword.to_string(), mode);
    db.insert_rule(&rule).unwrap();
    rule
}

fn outcome_for<'a>(report: &'a SweepReport, target: &Target) -> &'a TargetOutcome {
    &report
        .outcomes
        .iter()
        .find(|r| r.target_id == target.id)
        .expect("target missing from report")
        .outcome
}

#[test]
fn test_match_dispatches_and_consumes_rule() {
    let h = harness();
    let target = add_target(&h.db, "shop", "https://shop.example.com/");
    arm(&h.db, &target, "Sold Out", MatchMode::Fuzzy);
    h.fetcher.serve(&target.url, "<p>Item is SOLD OUT today</p>");

    let report = h.sweeper.run().unwrap();

    assert_eq!(report.matches(), 1);
    assert_eq!(report.notifications_sent, 1);
    assert_eq!(report.rules_consumed, 1);
    assert!(h.db.list_rules(&target.id).unwrap().is_empty());

    let sent = h.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("shop"));
    assert!(sent[0].contains("Sold Out"));

    let logs = h.db.recent_logs(Some(&target.id), 10).unwrap();
    assert_eq!(logs.len(), 1);
    assert!(logs[0].found);
    assert_eq!(logs[0].keyword.as_deref(), Some("Sold Out"));
}

#[test]
fn test_second_sweep_does_not_refire() {
    let h = harness();
    let target = add_target(&h.db, "shop", "https://shop.example.com/");
    arm(&h.db, &target, "restock", MatchMode::Fuzzy);
    h.fetcher.serve(&target.url, "<p>restock alert</p>");

    h.sweeper.run().unwrap();
    let second = h.sweeper.run().unwrap();

    assert_eq!(h.sent.lock().unwrap().len(), 1);
    assert_eq!(outcome_for(&second, &target), &TargetOutcome::NoRules);
    // no rules left, so the second sweep skips the fetch
    assert_eq!(h.fetcher.fetch_count(), 1);
}

#[test]
fn test_target_without_rules_is_not_fetched() {
    let h = harness();
    let target = add_target(&h.db, "idle", "https://idle.example.com/");

    let report = h.sweeper.run().unwrap();

    assert_eq!(outcome_for(&report, &target), &TargetOutcome::NoRules);
    assert_eq!(h.fetcher.fetch_count(), 0);
    let logs = h.db.recent_logs(Some(&target.id), 10).unwrap();
    assert_eq!(logs.len(), 1);
    assert!(!logs[0].found);
    assert_eq!(logs[0].message, MSG_NO_RULES);
}

#[test]
fn test_no_match_logs_not_found_and_keeps_rule() {
    let h = harness();
    let target = add_target(&h.db, "news", "https://news.example.com/");
    arm(&h.db, &target, "launch", MatchMode::Fuzzy);
    h.fetcher.serve(&target.url, "<p>nothing interesting</p>");

    let report = h.sweeper.run().unwrap();

    assert_eq!(report.matches(), 0);
    assert_eq!(h.db.list_rules(&target.id).unwrap().len(), 1);
    let logs = h.db.recent_logs(Some(&target.id), 10).unwrap();
    assert_eq!(logs[0].message, MSG_NOT_FOUND);
    assert!(h.sent.lock().unwrap().is_empty());
}

#[test]
fn test_fetch_failure_is_isolated() {
    let h = harness();
    let broken = add_target(&h.db, "broken", "https://broken.example.com/");
    let healthy = add_target(&h.db, "healthy", "https://healthy.example.com/");
    arm(&h.db, &broken, "anything", MatchMode::Fuzzy);
    arm(&h.db, &healthy, "ready", MatchMode::Fuzzy);
    h.fetcher.fail(&broken.url, FetchFailure::new(FailureKind::Timeout, "timed out"));
    h.fetcher.serve(&healthy.url, "<p>ready to ship</p>");

    let report = h.sweeper.run().unwrap();

    assert_eq!(report.fetch_failures, 1);
    assert_eq!(
        outcome_for(&report, &broken),
        &TargetOutcome::FetchFailed {
            reason: "timed out".into()
        }
    );
    assert_eq!(report.matches(), 1);
    assert_eq!(h.db.list_rules(&broken.id).unwrap().len(), 1);

    let logs = h.db.recent_logs(Some(&broken.id), 10).unwrap();
    assert_eq!(logs[0].message, "fetch failed: timed out");
}

#[test]
fn test_exact_mode_requires_word_boundary() {
    let h = harness();
    let target = add_target(&h.db, "blog", "https://blog.example.com/");
    let exact = arm(&h.db, &target, "cat", MatchMode::Exact);
    arm(&h.db, &target, "dog", MatchMode::Fuzzy);
    h.fetcher.serve(&target.url, "<p>concatenate the hotdogs</p>");

    let report = h.sweeper.run().unwrap();

    match outcome_for(&report, &target) {
        TargetOutcome::Checked { matched, .. } => assert_eq!(matched, &vec!["dog".to_string()]),
        other => panic!("unexpected outcome: {:?}", other),
    }
    let left = h.db.list_rules(&target.id).unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].id, exact.id);
}

#[test]
fn test_feed_fires_once_and_remembers_records() {
    let h = harness();
    let mut target = Target::new("feed".into(), "https://feed.example.com/".into());
    target.extraction = Extraction::feed();
    h.db.insert_target(&target).unwrap();
    arm(&h.db, &target, "giveaway", MatchMode::Fuzzy);

    let html = r#"
        <article mid="1"><div class="txt">Giveaway starts now</div></article>
        <article mid="2"><div class="txt">Another giveaway later</div></article>
    "#;
    h.fetcher.serve(&target.url, html);

    let report = h.sweeper.run().unwrap();
    assert_eq!(report.matches(), 1);
    assert_eq!(h.sent.lock().unwrap().len(), 1);
    assert!(h.sent.lock().unwrap()[0].contains("Giveaway starts now"));
    assert!(h.db.is_record_seen(&target.id, "1").unwrap());
    assert!(!h.db.is_record_seen(&target.id, "2").unwrap());

    // Re-arming the same keyword skips the record that already fired
    arm(&h.db, &target, "giveaway", MatchMode::Fuzzy);
    let report = h.sweeper.run().unwrap();
    assert_eq!(report.matches(), 1);
    assert!(h.sent.lock().unwrap()[1].contains("Another giveaway later"));
    assert!(h.db.is_record_seen(&target.id, "2").unwrap());
}

#[test]
fn test_at_least_once_keeps_rule_when_send_fails() {
    let config = EngineConfig {
        delivery: DeliveryPolicy::AtLeastOnce,
        ..engine_config(FetchMode::Stealth)
    };
    let h = harness_with(ScriptedFetcher::new(FetchMode::Stealth), config, false, true);
    let target = add_target(&h.db, "shop", "https://shop.example.com/");
    arm(&h.db, &target, "drop", MatchMode::Fuzzy);
    h.fetcher.serve(&target.url, "<p>price drop</p>");

    let report = h.sweeper.run().unwrap();

    assert_eq!(report.matches(), 1);
    assert_eq!(report.notifications_sent, 0);
    assert_eq!(report.rules_consumed, 0);
    assert_eq!(h.db.list_rules(&target.id).unwrap().len(), 1);
}

#[test]
fn test_at_most_once_consumes_even_when_send_fails() {
    let h = harness_with(
        ScriptedFetcher::new(FetchMode::Stealth),
        engine_config(FetchMode::Stealth),
        false,
        true,
    );
    let target = add_target(&h.db, "shop", "https://shop.example.com/");
    arm(&h.db, &target, "drop", MatchMode::Fuzzy);
    h.fetcher.serve(&target.url, "<p>price drop</p>");

    let report = h.sweeper.run().unwrap();

    assert_eq!(report.notifications_sent, 0);
    assert_eq!(report.rules_consumed, 1);
    assert!(h.db.list_rules(&target.id).unwrap().is_empty());
}

#[test]
fn test_missing_channel_skips_dispatch_but_consumes() {
    let h = harness_with(
        ScriptedFetcher::new(FetchMode::Stealth),
        engine_config(FetchMode::Stealth),
        true,
        false,
    );
    let target = add_target(&h.db, "shop", "https://shop.example.com/");
    arm(&h.db, &target, "drop", MatchMode::Fuzzy);
    h.fetcher.serve(&target.url, "<p>price drop</p>");

    let report = h.sweeper.run().unwrap();

    assert_eq!(report.matches(), 1);
    assert!(h.sent.lock().unwrap().is_empty());
    assert!(h.db.list_rules(&target.id).unwrap().is_empty());
    let logs = h.db.recent_logs(Some(&target.id), 10).unwrap();
    assert!(logs[0].found);
}

#[test]
fn test_engine_init_failure_aborts_sweep() {
    let mut fetcher = ScriptedFetcher::new(FetchMode::Stealth);
    fetcher.begin_fails = true;
    let h = harness_with(fetcher, engine_config(FetchMode::Stealth), true, true);
    let target = add_target(&h.db, "shop", "https://shop.example.com/");
    arm(&h.db, &target, "drop", MatchMode::Fuzzy);

    let err = h.sweeper.run().unwrap_err();

    assert!(matches!(err, TripwireError::EngineInitError(_)));
    assert_eq!(h.fetcher.fetch_count(), 0);
    assert_eq!(h.fetcher.ended.load(Ordering::SeqCst), 1);
    assert_eq!(h.db.count_logs().unwrap(), 0);
    assert_eq!(h.db.list_rules(&target.id).unwrap().len(), 1);
}

#[test]
fn test_disabled_targets_are_skipped() {
    let h = harness();
    let target = add_target(&h.db, "paused", "https://paused.example.com/");
    arm(&h.db, &target, "anything", MatchMode::Fuzzy);
    h.db.set_target_enabled(&target.id, false).unwrap();

    let report = h.sweeper.run().unwrap();

    assert!(report.outcomes.is_empty());
    assert_eq!(h.fetcher.fetch_count(), 0);
}

#[test]
fn test_audit_log_is_pruned_after_sweep() {
    let config = EngineConfig {
        log_retention: 3,
        ..engine_config(FetchMode::Stealth)
    };
    let h = harness_with(ScriptedFetcher::new(FetchMode::Stealth), config, true, true);
    add_target(&h.db, "idle", "https://idle.example.com/");

    for _ in 0..5 {
        h.sweeper.run().unwrap();
    }

    assert_eq!(h.db.count_logs().unwrap(), 3);
}

#[test]
fn test_plain_mode_checks_targets_concurrently() {
    let config = EngineConfig {
        max_concurrency: 4,
        ..engine_config(FetchMode::Plain)
    };
    let h = harness_with(ScriptedFetcher::new(FetchMode::Plain), config, true, true);

    let mut targets = Vec::new();
    for i in 0..8 {
        let target = add_target(&h.db, &format!("site-{}", i), &format!("https://site{}.example.com/", i));
        arm(&h.db, &target, "hit", MatchMode::Fuzzy);
        let body = if i % 2 == 0 { "<p>hit</p>" } else { "<p>miss</p>" };
        h.fetcher.serve(&target.url, body);
        targets.push(target);
    }

    let report = h.sweeper.run().unwrap();

    assert_eq!(report.outcomes.len(), 8);
    assert_eq!(report.matches(), 4);
    assert_eq!(h.fetcher.fetch_count(), 8);
    assert_eq!(h.sent.lock().unwrap().len(), 4);

    // report keeps registry order
    let listed: Vec<_> = h.db.list_enabled_targets().unwrap().into_iter().map(|t| t.id).collect();
    let reported: Vec<_> = report.outcomes.iter().map(|r| r.target_id).collect();
    assert_eq!(listed, reported);
}

#[test]
fn test_stealth_mode_waits_between_targets() {
    let config = EngineConfig {
        inter_target_delay_ms: 50,
        ..engine_config(FetchMode::Stealth)
    };
    let h = harness_with(ScriptedFetcher::new(FetchMode::Stealth), config, true, true);
    for i in 0..3 {
        let target = add_target(&h.db, &format!("t{}", i), &format!("https://t{}.example.com/", i));
        arm(&h.db, &target, "x", MatchMode::Fuzzy);
        h.fetcher.serve(&target.url, "<p>nothing</p>");
    }

    let started = std::time::Instant::now();
    h.sweeper.run().unwrap();

    // two gaps between three targets
    assert!(started.elapsed() >= Duration::from_millis(100));
}
