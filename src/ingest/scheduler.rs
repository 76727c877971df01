// src/ingest/scheduler.rs
//! Long-running loop: one pass over every target per interval, with the
//! sleep shortened by however long the previous pass took.

use metrics::gauge;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::config::targets::Target;
use crate::ingest::cycle::{CycleReport, FetchCycle};

#[derive(Clone, Copy, Debug)]
pub struct SchedulerSettings {
    pub interval: Duration,
    pub startup_delay: Duration,
    /// Targets in flight at once. 1 keeps passes strictly sequential.
    pub concurrency: usize,
}

/// Outcome of one pass over all targets, in configured order.
#[derive(Debug, Clone)]
pub struct PassReport {
    pub reports: Vec<CycleReport>,
    pub elapsed: Duration,
}

pub struct Scheduler {
    cycle: Arc<FetchCycle>,
    targets: Vec<Target>,
    settings: SchedulerSettings,
}

/// How long to wait before the next pass, given how long the last one ran.
pub fn next_delay(last_elapsed: Duration, interval: Duration) -> Duration {
    interval.saturating_sub(last_elapsed)
}

impl Scheduler {
    pub fn new(cycle: Arc<FetchCycle>, targets: Vec<Target>, settings: SchedulerSettings) -> Self {
        Self {
            cycle,
            targets,
            settings,
        }
    }

    /// Run the fetch cycle once for every target.
    pub async fn run_pass(&self) -> PassReport {
        let t0 = Instant::now();
        let reports = if self.settings.concurrency <= 1 {
            let mut reports = Vec::with_capacity(self.targets.len());
            for target in &self.targets {
                reports.push(self.cycle.run(target).await);
            }
            reports
        } else {
            self.run_concurrent().await
        };

        let elapsed = t0.elapsed();
        gauge!("scheduler_last_pass_ts").set(chrono::Utc::now().timestamp() as f64);
        tracing::info!(
            targets = self.targets.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "completed pass"
        );
        PassReport { reports, elapsed }
    }

    async fn run_concurrent(&self) -> Vec<CycleReport> {
        let permits = Arc::new(Semaphore::new(self.settings.concurrency));
        let mut set = JoinSet::new();
        for (idx, target) in self.targets.iter().cloned().enumerate() {
            let cycle = Arc::clone(&self.cycle);
            let permits = Arc::clone(&permits);
            set.spawn(async move {
                // Never closed; acquire cannot fail.
                let _permit = permits.acquire_owned().await.ok();
                (idx, cycle.run(&target).await)
            });
        }

        let mut slots: Vec<Option<CycleReport>> = vec![None; self.targets.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, report)) => slots[idx] = Some(report),
                Err(e) => tracing::error!(error = %e, "fetch cycle task failed"),
            }
        }
        slots.into_iter().flatten().collect()
    }

    /// Startup delay, readiness check, then passes until `shutdown` resolves.
    ///
    /// A failing readiness check is fatal. The first pass starts right after it.
    pub async fn run_until<R, S>(&self, ready: R, shutdown: S) -> anyhow::Result<()>
    where
        R: Future<Output = anyhow::Result<()>>,
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        tracing::info!(
            delay_secs = self.settings.startup_delay.as_secs(),
            "waiting before first pass"
        );
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("shutdown requested before start");
                return Ok(());
            }
            _ = tokio::time::sleep(self.settings.startup_delay) => {}
        }

        ready.await?;
        tracing::info!(
            targets = self.targets.len(),
            interval_secs = self.settings.interval.as_secs(),
            "scheduler started"
        );

        let mut delay = Duration::ZERO;
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(delay) => {}
            }
            let pass = tokio::select! {
                _ = &mut shutdown => break,
                pass = self.run_pass() => pass,
            };
            delay = next_delay(pass.elapsed, self.settings.interval);
            tracing::debug!(next_in_secs = delay.as_secs_f64(), "sleeping until next pass");
        }

        tracing::info!("scheduler stopped");
        Ok(())
    }
}
