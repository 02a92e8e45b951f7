//! Periodic poll → apply → report loop.

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, histogram};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use warden_core::{Command, CommandReport};

use crate::router::Router;
use crate::source::CommandSource;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Listing failed; nothing applied, nothing reported.
    FetchFailed,
    Empty,
    /// `n` commands applied and their reports delivered.
    Reported(usize),
    /// `n` commands applied but their reports were lost.
    ReportFailed(usize),
}

pub struct Watcher {
    source: Arc<dyn CommandSource>,
    router: Router,
    interval: Duration,
}

impl Watcher {
    pub fn new(source: Arc<dyn CommandSource>, router: Router) -> Self {
        Self { source, router, interval: DEFAULT_INTERVAL }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run cycles every `interval` until `cancel` fires.
    ///
    /// Cancellation is only observed between cycles. Ticks missed while a cycle
    /// overruns are dropped, not queued.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut tick = interval_at(Instant::now() + self.interval, self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_ms = self.interval.as_millis() as u64, "command watcher started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("stopping command watcher");
                    return;
                }
                _ = tick.tick() => {
                    let outcome = self.run_cycle().await;
                    debug!(?outcome, "command cycle done");
                }
            }
        }
    }

    /// One poll/apply/report cycle.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let t0 = std::time::Instant::now();
        let mut commands = match self.source.list_pending_commands().await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = ?e, "failed to list commands; skipping cycle");
                counter!("command_cycles_skipped_total", 1u64);
                return CycleOutcome::FetchFailed;
            }
        };
        if commands.is_empty() {
            return CycleOutcome::Empty;
        }
        counter!("commands_fetched_total", commands.len() as u64);

        let reports = apply_batch(&self.router, &mut commands).await;
        let n = reports.len();
        let outcome = match self.source.send_command_reports(&reports).await {
            Ok(()) => CycleOutcome::Reported(n),
            Err(e) => {
                warn!(error = ?e, count = n, "failed to send command reports; dropping them");
                counter!("command_reports_dropped_total", n as u64);
                CycleOutcome::ReportFailed(n)
            }
        };
        histogram!("command_cycle_ms", t0.elapsed().as_secs_f64() * 1000.0);
        outcome
    }
}

/// Sort `commands` by creation time and route them one by one.
pub async fn apply_batch(router: &Router, commands: &mut [Command]) -> Vec<CommandReport> {
    // Oldest first: the idempotency token only moves forward.
    commands.sort_by_key(|c| c.created_at);

    let mut reports = Vec::with_capacity(commands.len());
    for cmd in commands.iter() {
        reports.push(router.route(cmd).await);
    }
    reports
}
