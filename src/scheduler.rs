// src/scheduler.rs
//! # Scheduler
//! Runs ingest cycles at a fixed interval inside a daily hour window.
//!
//! One cycle: fetch all sources, keep entries the store has not seen within
//! the dedupe window, match them against the rules, dispatch the matches.
//! Phases move `Idle -> Fetching -> Matching -> Dispatching -> Idle`.
//!
//! A live cycle writes nothing until dispatch is done; entries, matches,
//! actions, alerts and the health row are then committed in one
//! transaction. A storage error rolls all of it back, aborts the cycle and
//! returns the scheduler to `Idle`, so the next tick sees the same entries
//! as new. Notifications already sent by the aborted cycle go out again on
//! the retry. Shutdown is only observed between cycles.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::clock::Clock;
use crate::config::{AppConfig, SchedulerConfig};
use crate::dispatch::{persist_actions, DispatchReport, Dispatcher};
use crate::error::StorageError;
use crate::ingest::rate_limit::RateLimiter;
use crate::ingest::types::{Entry, FeedSource};
use crate::ingest::{ensure_metrics_described, fetch_all};
use crate::matcher::MatchEngine;
use crate::notify::NotifierRegistry;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Fetching,
    Matching,
    Dispatching,
}

#[derive(Debug, Default)]
pub struct CycleReport {
    pub dry_run: bool,
    pub fetched: usize,
    pub rate_limited: usize,
    pub source_failures: usize,
    pub new_entries: usize,
    pub duplicates: usize,
    pub matches: usize,
    pub dispatch: DispatchReport,
}

#[derive(Debug)]
pub enum TickOutcome {
    /// Outside the hour window; nothing was fetched.
    Skipped,
    Completed(CycleReport),
}

/// Whether `hour` lies in `[start, end)`. Wraps past midnight when
/// `start > end`; `start == end` means always open.
pub fn hour_in_window(hour: u32, start: u32, end: u32) -> bool {
    use std::cmp::Ordering;
    match start.cmp(&end) {
        Ordering::Equal => true,
        Ordering::Less => start <= hour && hour < end,
        Ordering::Greater => hour >= start || hour < end,
    }
}

pub struct Scheduler {
    cfg: SchedulerConfig,
    clock: Arc<dyn Clock>,
    store: Arc<Store>,
    sources: Vec<Arc<dyn FeedSource>>,
    engine: MatchEngine,
    dispatcher: Dispatcher,
    limiter: RateLimiter,
    phase: Phase,
}

impl Scheduler {
    pub fn new(
        cfg: SchedulerConfig,
        clock: Arc<dyn Clock>,
        store: Arc<Store>,
        sources: Vec<Arc<dyn FeedSource>>,
        engine: MatchEngine,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            cfg,
            clock,
            store,
            sources,
            engine,
            dispatcher,
            limiter: RateLimiter::new(),
            phase: Phase::Idle,
        }
    }

    /// Wire a scheduler from a validated config.
    pub fn from_config(
        cfg: &AppConfig,
        clock: Arc<dyn Clock>,
        store: Arc<Store>,
        sources: Vec<Arc<dyn FeedSource>>,
        notifiers: NotifierRegistry,
    ) -> Self {
        let dispatcher = Dispatcher::new(&cfg.triggers, notifiers, cfg.scheduler.dry_run);
        Self::new(
            cfg.scheduler.clone(),
            clock,
            store,
            sources,
            MatchEngine::new(cfg.triggers.clone()),
            dispatcher,
        )
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_dry_run(&self) -> bool {
        self.dispatcher.is_dry_run()
    }

    /// Window check at the configured UTC offset.
    pub fn in_window(&self, now: DateTime<Utc>) -> bool {
        let local = now + ChronoDuration::minutes(i64::from(self.cfg.utc_offset_minutes));
        hour_in_window(local.hour(), self.cfg.start_hour, self.cfg.end_hour)
    }

    /// Run a cycle if the clock is inside the hour window.
    pub async fn tick(&mut self) -> Result<TickOutcome, StorageError> {
        let now = self.clock.now();
        if !self.in_window(now) {
            tracing::debug!(
                at = %now,
                start_hour = self.cfg.start_hour,
                end_hour = self.cfg.end_hour,
                "outside run window, skipping"
            );
            return Ok(TickOutcome::Skipped);
        }
        self.run_once().await.map(TickOutcome::Completed)
    }

    /// Run one full cycle now, regardless of the hour window.
    pub async fn run_once(&mut self) -> Result<CycleReport, StorageError> {
        ensure_metrics_described();
        let result = self.cycle().await;
        self.phase = Phase::Idle;

        match &result {
            Ok(report) => {
                metrics::counter!("scheduler_cycles_total", "outcome" => "ok").increment(1);
                tracing::info!(
                    dry_run = report.dry_run,
                    fetched = report.fetched,
                    new = report.new_entries,
                    duplicates = report.duplicates,
                    matches = report.matches,
                    actions = report.dispatch.planned,
                    action_failures = report.dispatch.failures.len(),
                    source_failures = report.source_failures,
                    "cycle complete"
                );
                self.log_stats();
            }
            Err(e) => {
                metrics::counter!("scheduler_cycles_total", "outcome" => "aborted").increment(1);
                tracing::error!(error = %e, "cycle aborted");
                if let Err(e2) = self
                    .store
                    .log_health_check("cycle", "error", Some(&e.to_string()))
                {
                    tracing::warn!(error = %e2, "could not record failed health check");
                }
            }
        }
        result
    }

    async fn cycle(&mut self) -> Result<CycleReport, StorageError> {
        let now = self.clock.now();
        let dry_run = self.dispatcher.is_dry_run();
        let mut report = CycleReport {
            dry_run,
            ..CycleReport::default()
        };

        self.phase = Phase::Fetching;
        let outcome = fetch_all(
            &self.sources,
            &mut self.limiter,
            now,
            self.cfg.max_concurrent_fetches,
        )
        .await;
        report.fetched = outcome.total_entries();
        report.rate_limited = outcome.rate_limited.len();
        report.source_failures = outcome.failures.len();

        self.phase = Phase::Matching;
        let mut seen_this_cycle = HashSet::new();
        let mut fresh: Vec<Entry> = Vec::new();
        for entry in outcome.batches.into_iter().flat_map(|b| b.entries) {
            if !seen_this_cycle.insert(entry.dedupe_key()) || self.store.is_duplicate(&entry)? {
                report.duplicates += 1;
                continue;
            }
            fresh.push(entry);
        }

        let matches = self.engine.match_batch(&fresh, now);
        metrics::counter!("matcher_matches_total").increment(matches.len() as u64);

        self.phase = Phase::Dispatching;
        let mut executed = Vec::with_capacity(matches.len());
        for m in matches {
            let (r, actions) = self.dispatcher.dispatch(&m, now).await;
            report.dispatch.merge(r);
            executed.push((m, actions));
        }

        if dry_run {
            report.new_entries = fresh.len();
            report.matches = executed.len();
            return Ok(report);
        }

        let health = format!(
            "fetched={} new={} matches={} failures={}",
            report.fetched,
            fresh.len(),
            executed.len(),
            report.source_failures + report.dispatch.failures.len()
        );
        let (new_entries, stored_matches, persisted, raced) = self.store.transaction(|w| {
            let mut inserted = HashSet::new();
            let mut raced = 0usize;
            for entry in &fresh {
                if w.insert_if_new(entry)?.is_new() {
                    inserted.insert(entry.id.as_str());
                } else {
                    raced += 1;
                }
            }
            let mut stored_matches = 0usize;
            let mut persisted = 0usize;
            for (m, actions) in &mut executed {
                if !inserted.contains(m.entry_id.as_str()) {
                    continue;
                }
                let match_id = w.record_match(m)?;
                stored_matches += 1;
                persisted += persist_actions(w, match_id, actions)?;
            }
            w.log_health_check("cycle", "ok", Some(&health))?;
            Ok((inserted.len(), stored_matches, persisted, raced))
        })?;

        report.new_entries = new_entries;
        report.duplicates += raced;
        report.matches = stored_matches;
        report.dispatch.persisted += persisted;
        Ok(report)
    }

    fn log_stats(&self) {
        match self.store.stats() {
            Ok(stats) => tracing::info!(?stats, "store stats"),
            Err(e) => tracing::warn!(error = %e, "could not read store stats"),
        }
    }

    /// Tick immediately, then every `interval_hours`, until `shutdown`
    /// flips to true or its sender is dropped. An in-flight cycle always
    /// finishes before shutdown is observed.
    pub async fn run_loop(&mut self, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_secs(u64::from(self.cfg.interval_hours.max(1)) * 3600);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_hours = self.cfg.interval_hours,
            start_hour = self.cfg.start_hour,
            end_hour = self.cfg.end_hour,
            sources = self.sources.len(),
            rules = self.engine.rules().len(),
            dry_run = self.is_dry_run(),
            "scheduler started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        tracing::debug!(error = %e, "tick failed, retrying next interval");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("scheduler stopped");
    }
}
