//! One pass over every enabled target.
//!
//! Per target: load rules fresh, fetch, extract, test every rule, and for each
//! match dispatch a notification, append an audit entry and consume the rule.
//! Failures stay inside the target that produced them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::{DeliveryPolicy, EngineConfig, FetchMode};
use crate::error::{Result, TripwireError};
use crate::extract::{extract, Extracted};
use crate::fetch::{FetchFailure, FetchOutcome, PageFetcher};
use crate::matcher::matches;
use crate::model::{KeywordRule, Target};
use crate::notify::{format_match_message, MatchNotice, Notifier, NotifierFactory};
use crate::registry::Registry;

pub const MSG_NO_RULES: &str = "no rules configured";
pub const MSG_NOT_FOUND: &str = "keyword not found";

/// What happened to one target during a sweep
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TargetOutcome {
    /// Nothing armed; not fetched
    NoRules,
    FetchFailed {
        reason: String,
    },
    Checked {
        /// Keywords that matched this sweep
        matched: Vec<String>,
        notified: usize,
        consumed: usize,
    },
    /// Registry or extraction error caught at the target boundary
    Failed {
        error: String,
    },
}

impl From<&FetchFailure> for TargetOutcome {
    fn from(failure: &FetchFailure) -> Self {
        TargetOutcome::FetchFailed {
            reason: failure.reason.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetReport {
    pub target_id: Uuid,
    pub target_name: String,
    pub outcome: TargetOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<TargetReport>,
    pub notifications_sent: usize,
    pub rules_consumed: usize,
    pub fetch_failures: usize,
}

impl SweepReport {
    fn from_outcomes(started_at: DateTime<Utc>, outcomes: Vec<TargetReport>) -> Self {
        let mut notifications_sent = 0;
        let mut rules_consumed = 0;
        let mut fetch_failures = 0;
        for report in &outcomes {
            match &report.outcome {
                TargetOutcome::Checked { notified, consumed, .. } => {
                    notifications_sent += notified;
                    rules_consumed += consumed;
                }
                TargetOutcome::FetchFailed { .. } => fetch_failures += 1,
                TargetOutcome::NoRules | TargetOutcome::Failed { .. } => {}
            }
        }
        Self {
            started_at,
            finished_at: Utc::now(),
            outcomes,
            notifications_sent,
            rules_consumed,
            fetch_failures,
        }
    }

    /// Number of keyword matches across all targets
    pub fn matches(&self) -> usize {
        self.outcomes
            .iter()
            .map(|r| match &r.outcome {
                TargetOutcome::Checked { matched, .. } => matched.len(),
                _ => 0,
            })
            .sum()
    }

    /// Targets that hit a registry or extraction error
    pub fn target_errors(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|r| matches!(r.outcome, TargetOutcome::Failed { .. }))
            .count()
    }
}

/// Result of acting on one matched rule
struct Fired {
    sent: bool,
    consumed: bool,
}

#[derive(Default)]
struct Tally {
    matched: Vec<String>,
    notified: usize,
    consumed: usize,
}

impl Tally {
    fn record(&mut self, keyword: &str, fired: &Fired) {
        self.matched.push(keyword.to_string());
        if fired.sent {
            self.notified += 1;
        }
        if fired.consumed {
            self.consumed += 1;
        }
    }

    fn into_outcome(self) -> TargetOutcome {
        TargetOutcome::Checked {
            matched: self.matched,
            notified: self.notified,
            consumed: self.consumed,
        }
    }
}

/// Runs sweeps against a registry with one fetch strategy
pub struct Sweeper {
    registry: Arc<dyn Registry>,
    fetcher: Arc<dyn PageFetcher>,
    notifiers: Arc<dyn NotifierFactory>,
    config: EngineConfig,
    /// Identifies this sweeper in the registry's sweep lease
    lease_holder: String,
}

impl Sweeper {
    pub fn new(
        registry: Arc<dyn Registry>,
        fetcher: Arc<dyn PageFetcher>,
        notifiers: Arc<dyn NotifierFactory>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            fetcher,
            notifiers,
            config,
            lease_holder: format!("{}-{}", std::process::id(), Uuid::new_v4()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn fetcher(&self) -> &Arc<dyn PageFetcher> {
        &self.fetcher
    }

    /// Take the registry's sweep lease. False while another sweeper holds it.
    pub fn acquire_lease(&self) -> Result<bool> {
        self.registry.acquire_sweep_lease(&self.lease_holder, self.config.sweep_lease())
    }

    pub fn release_lease(&self) {
        if let Err(e) = self.registry.release_sweep_lease(&self.lease_holder) {
            warn!(error = %e, "could not release sweep lease");
        }
    }

    /// Run one sweep over all enabled targets under the sweep lease.
    ///
    /// Returns an error only when the sweep could not start: another sweeper
    /// holds the lease (`SweepInProgress`), the target list could not be read,
    /// or the fetch engine failed to initialize.
    pub fn run(&self) -> Result<SweepReport> {
        if !self.acquire_lease()? {
            info!("another sweeper holds the lease, sweep skipped");
            return Err(TripwireError::SweepInProgress);
        }
        let result = self.run_leased();
        self.release_lease();
        result
    }

    /// Sweep body; the caller already holds the lease
    pub(crate) fn run_leased(&self) -> Result<SweepReport> {
        let started_at = Utc::now();
        let targets = self.registry.list_enabled_targets()?;
        info!(targets = targets.len(), mode = ?self.fetcher.mode(), "sweep started");

        if let Err(e) = self.fetcher.begin_sweep() {
            self.fetcher.end_sweep();
            error!(error = %e, "fetch engine failed to start, sweep aborted");
            return Err(match e {
                TripwireError::EngineInitError(_) => e,
                other => TripwireError::EngineInitError(other.to_string()),
            });
        }

        let notifier = self.load_notifier();
        let outcomes = match self.fetcher.mode() {
            FetchMode::Stealth => self.run_sequential(&targets, notifier.as_deref()),
            FetchMode::Plain => self.run_concurrent(&targets, notifier.as_deref()),
        };

        self.fetcher.end_sweep();

        if let Err(e) = self.registry.prune_logs(self.config.log_retention) {
            warn!(error = %e, "could not prune audit log");
        }

        let report = SweepReport::from_outcomes(started_at, outcomes);
        info!(
            targets = report.outcomes.len(),
            matches = report.matches(),
            sent = report.notifications_sent,
            fetch_failures = report.fetch_failures,
            "sweep finished"
        );
        Ok(report)
    }

    /// Channel config is read once per sweep; without one, matches are not dispatched
    fn load_notifier(&self) -> Option<Box<dyn Notifier>> {
        match self.registry.channel_config() {
            Ok(Some(config)) => Some(self.notifiers.build(&config)),
            Ok(None) => {
                warn!("no notification channel configured, matches will not be dispatched");
                None
            }
            Err(e) => {
                warn!(error = %e, "could not read notification channel, matches will not be dispatched");
                None
            }
        }
    }

    fn run_sequential(&self, targets: &[Target], notifier: Option<&dyn Notifier>) -> Vec<TargetReport> {
        let delay = self.config.inter_target_delay();
        let mut reports = Vec::with_capacity(targets.len());
        for (i, target) in targets.iter().enumerate() {
            reports.push(self.check_target(target, notifier));
            if i + 1 < targets.len() && !delay.is_zero() {
                thread::sleep(delay);
            }
        }
        reports
    }

    fn run_concurrent(&self, targets: &[Target], notifier: Option<&dyn Notifier>) -> Vec<TargetReport> {
        let workers = self.config.max_concurrency.max(1).min(targets.len());
        if workers <= 1 {
            return targets.iter().map(|t| self.check_target(t, notifier)).collect();
        }

        let next = AtomicUsize::new(0);
        let mut indexed: Vec<(usize, TargetReport)> = thread::scope(|s| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    s.spawn(|| {
                        let mut done = Vec::new();
                        loop {
                            let i = next.fetch_add(1, Ordering::SeqCst);
                            let Some(target) = targets.get(i) else { break };
                            done.push((i, self.check_target(target, notifier)));
                        }
                        done
                    })
                })
                .collect();

            handles
                .into_iter()
                .flat_map(|h| match h.join() {
                    Ok(done) => done,
                    Err(_) => {
                        error!("sweep worker panicked");
                        Vec::new()
                    }
                })
                .collect()
        });

        indexed.sort_by_key(|(i, _)| *i);
        indexed.into_iter().map(|(_, report)| report).collect()
    }

    /// Check one target; every error is contained here
    fn check_target(&self, target: &Target, notifier: Option<&dyn Notifier>) -> TargetReport {
        let span = info_span!("target", name = %target.name);
        let _enter = span.enter();

        let outcome = match self.check_target_inner(target, notifier) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "target check failed");
                TargetOutcome::Failed { error: e.to_string() }
            }
        };

        TargetReport {
            target_id: target.id,
            target_name: target.name.clone(),
            outcome,
        }
    }

    fn check_target_inner(&self, target: &Target, notifier: Option<&dyn Notifier>) -> Result<TargetOutcome> {
        if !self.acquire_lease()? {
            warn!("sweep lease lost to another sweeper");
            return Err(TripwireError::SweepInProgress);
        }

        let rules = self.registry.list_rules(&target.id)?;
        if rules.is_empty() {
            debug!("no rules, skipping fetch");
            self.registry.append_log(&target.id, None, false, MSG_NO_RULES)?;
            return Ok(TargetOutcome::NoRules);
        }

        let page = match self.fetcher.fetch(&target.url) {
            FetchOutcome::Content(page) => page,
            FetchOutcome::Failed(failure) => {
                warn!(url = %target.url, reason = %failure.reason, "fetch failed");
                self.registry.append_log(
                    &target.id,
                    None,
                    false,
                    &format!("fetch failed: {}", failure.reason),
                )?;
                return Ok(TargetOutcome::from(&failure));
            }
        };
        debug!(bytes = page.html.len(), "page fetched");

        let extracted = match extract(&page, &target.extraction) {
            Ok(extracted) => extracted,
            Err(e) => {
                warn!(error = %e, "extraction failed");
                self.registry.append_log(&target.id, None, false, &format!("extraction failed: {}", e))?;
                return Ok(TargetOutcome::Failed { error: e.to_string() });
            }
        };

        let tally = match extracted {
            Extracted::Document(text) => self.match_document(target, &text, &rules, notifier)?,
            Extracted::Feed(records) => self.match_feed(target, &records, rules, notifier)?,
        };

        if tally.matched.is_empty() {
            info!("keyword not found");
            self.registry.append_log(&target.id, None, false, MSG_NOT_FOUND)?;
        }
        Ok(tally.into_outcome())
    }

    fn match_document(
        &self,
        target: &Target,
        text: &str,
        rules: &[KeywordRule],
        notifier: Option<&dyn Notifier>,
    ) -> Result<Tally> {
        let mut tally = Tally::default();
        for rule in rules {
            if matches(text, &rule.keyword, rule.mode) {
                let fired = self.fire(target, rule, None, notifier)?;
                tally.record(&rule.keyword, &fired);
            }
        }
        Ok(tally)
    }

    /// Test each unseen record against the rules still alive.
    ///
    /// A rule fires at most once per sweep. A record is marked seen once every
    /// rule that matched it was consumed, so it cannot trigger a re-added rule.
    fn match_feed(
        &self,
        target: &Target,
        records: &[crate::extract::FeedRecord],
        rules: Vec<KeywordRule>,
        notifier: Option<&dyn Notifier>,
    ) -> Result<Tally> {
        let mut tally = Tally::default();
        let mut live = rules;

        for record in records {
            if live.is_empty() {
                break;
            }
            if self.registry.is_record_seen(&target.id, &record.id)? {
                debug!(record = %record.id, "record already seen");
                continue;
            }

            let mut any_matched = false;
            let mut all_consumed = true;
            let mut remaining = Vec::with_capacity(live.len());
            for rule in live {
                if matches(&record.text, &rule.keyword, rule.mode) {
                    let fired = self.fire(target, &rule, Some(&record.text), notifier)?;
                    tally.record(&rule.keyword, &fired);
                    any_matched = true;
                    all_consumed &= fired.consumed;
                } else {
                    remaining.push(rule);
                }
            }
            live = remaining;

            if any_matched && all_consumed {
                self.registry.mark_record_seen(&target.id, &record.id)?;
            }
        }
        Ok(tally)
    }

    /// Dispatch, log, then consume the rule according to the delivery policy
    fn fire(
        &self,
        target: &Target,
        rule: &KeywordRule,
        excerpt: Option<&str>,
        notifier: Option<&dyn Notifier>,
    ) -> Result<Fired> {
        info!(keyword = %rule.keyword, "keyword matched");

        let sent = match notifier {
            Some(notifier) => notifier.send(&format_match_message(&MatchNotice {
                target_name: &target.name,
                url: &target.url,
                keyword: &rule.keyword,
                matched_at: Local::now(),
                excerpt,
            })),
            None => false,
        };

        self.registry.append_log(
            &target.id,
            Some(&rule.keyword),
            true,
            &format!("keyword matched: {}", rule.keyword),
        )?;

        let consume = match self.config.delivery {
            DeliveryPolicy::AtMostOnce => true,
            DeliveryPolicy::AtLeastOnce => sent,
        };
        if consume {
            self.registry.delete_rule(&rule.id)?;
            info!(keyword = %rule.keyword, "rule consumed");
        } else {
            warn!(keyword = %rule.keyword, "dispatch not confirmed, rule kept for next sweep");
        }

        Ok(Fired { sent, consumed: consume })
    }
}
