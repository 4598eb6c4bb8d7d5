/// Heartbeat scheduler: one locked pipeline cycle per day.
///
/// Per cycle: acquire the lock, run the pipeline, persist run counters, then
/// release the lock. These steps never overlap or reorder. A lock held by a
/// live process skips the cycle; lock I/O or state persistence failures are
/// fatal and end the loop.
use std::path::PathBuf;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Days, Utc};
use signalforge_logging::{CycleEvent, EventLogger};
use tracing::{error, info, warn};

use crate::lock::{DistributedLock, LockOutcome};
use crate::state::{load_state, save_state, StateLoad};

// ---------------------------------------------------------------------------
// Next-run arithmetic
// ---------------------------------------------------------------------------

/// Time from `now` until the next `hour_utc:00:00` UTC.
///
/// If that instant today is `now` or already past, tomorrow's is used.
/// Hours above 23 are clamped to 23.
pub fn duration_until_next_run(now: DateTime<Utc>, hour_utc: u8) -> Duration {
    let hour = u32::from(hour_utc.min(23));
    let today = now
        .date_naive()
        .and_hms_opt(hour, 0, 0)
        .map(|t| t.and_utc())
        .unwrap_or(now);
    let target = if today > now {
        today
    } else {
        today.checked_add_days(Days::new(1)).unwrap_or(today)
    };
    (target - now).to_std().unwrap_or_default()
}

/// Milliseconds until the next heartbeat hour, from the current time.
pub fn ms_until_next_run(hour_utc: u8) -> u64 {
    duration_until_next_run(Utc::now(), hour_utc).as_millis() as u64
}

// ---------------------------------------------------------------------------
// Pipeline seam
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineOutput {
    pub produced_report: bool,
    pub summary: Option<String>,
}

/// The work executed once per acquired-lock cycle.
#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn run(&self) -> Result<PipelineOutput>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Another live process holds the lock; nothing ran.
    Skipped { holder: Option<u32> },
    Completed { produced_report: bool, summary: Option<String> },
    Failed { error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    Idle,
    AcquiringLock,
    Running,
    Fatal,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Hour of day (0–23, UTC) at which the cycle fires.
    pub hour_utc: u8,
    pub state_path: PathBuf,
    /// Run one cycle immediately before the first sleep.
    pub run_on_start: bool,
}

impl HeartbeatConfig {
    pub fn new(hour_utc: u8, state_path: impl Into<PathBuf>) -> Self {
        Self { hour_utc, state_path: state_path.into(), run_on_start: false }
    }
}

pub struct HeartbeatScheduler<L: DistributedLock> {
    config: HeartbeatConfig,
    lock: L,
    phase: RwLock<SchedulerPhase>,
}

/// Releases the lock when dropped, so a panicking pipeline cannot leak it.
struct LockGuard<'a, L: DistributedLock>(&'a L);

impl<L: DistributedLock> Drop for LockGuard<'_, L> {
    fn drop(&mut self) {
        self.0.release();
    }
}

impl<L: DistributedLock> HeartbeatScheduler<L> {
    pub fn new(config: HeartbeatConfig, lock: L) -> Self {
        Self { config, lock, phase: RwLock::new(SchedulerPhase::Idle) }
    }

    pub fn config(&self) -> &HeartbeatConfig {
        &self.config
    }

    pub fn phase(&self) -> SchedulerPhase {
        *self.phase.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_phase(&self, phase: SchedulerPhase) {
        *self.phase.write().unwrap_or_else(|e| e.into_inner()) = phase;
    }

    /// Run one cycle now: lock, pipeline, persist counters, unlock.
    ///
    /// `Err` means the scheduler is in [`SchedulerPhase::Fatal`].
    pub async fn run_cycle(&self, pipeline: &dyn Pipeline) -> Result<CycleOutcome> {
        self.set_phase(SchedulerPhase::AcquiringLock);
        let acquired = match self.lock.try_acquire() {
            Ok(outcome) => outcome,
            Err(e) => {
                self.set_phase(SchedulerPhase::Fatal);
                error!(error = %e, "Lock acquisition failed");
                return Err(e).context("heartbeat lock unusable");
            }
        };
        if let LockOutcome::HeldBy(holder) = acquired {
            self.set_phase(SchedulerPhase::Idle);
            EventLogger::log_event(CycleEvent::Skipped { holder_pid: holder });
            return Ok(CycleOutcome::Skipped { holder });
        }
        let guard = LockGuard(&self.lock);

        let loaded = load_state(&self.config.state_path).await;
        if let StateLoad::Defaulted { reason, .. } = &loaded {
            warn!(reason = %reason, "Starting cycle from default run state");
        }
        let mut state = loaded.into_state();
        let cycle = state.cycle_count + 1;

        self.set_phase(SchedulerPhase::Running);
        EventLogger::log_event(CycleEvent::Started { cycle });
        let started = Instant::now();
        let result = pipeline.run().await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let now = Utc::now();
        let outcome = match result {
            Ok(output) => {
                state.record_success(now, output.produced_report);
                EventLogger::log_event(CycleEvent::Completed {
                    cycle,
                    produced_report: output.produced_report,
                    duration_ms,
                    summary: output.summary.clone(),
                });
                CycleOutcome::Completed {
                    produced_report: output.produced_report,
                    summary: output.summary,
                }
            }
            Err(e) => {
                let message = format!("{e:#}");
                state.record_failure(now, &message);
                EventLogger::log_event(CycleEvent::Failed {
                    cycle,
                    consecutive_failures: state.consecutive_failures,
                    error: message.clone(),
                });
                CycleOutcome::Failed { error: message }
            }
        };

        if let Err(e) = save_state(&state, &self.config.state_path).await {
            self.set_phase(SchedulerPhase::Fatal);
            drop(guard);
            error!(error = %e, "Run state could not be persisted");
            return Err(e).context("run state persistence failed");
        }

        drop(guard);
        self.set_phase(SchedulerPhase::Idle);
        Ok(outcome)
    }

    /// Loop forever, one cycle per day at `hour_utc`.
    ///
    /// Failed and skipped cycles wait for the next scheduled hour; only fatal
    /// errors return.
    pub async fn run_forever(&self, pipeline: &dyn Pipeline) -> Result<()> {
        let initial = load_state(&self.config.state_path).await;
        info!(
            hour_utc = self.config.hour_utc,
            cycle_count = initial.state().cycle_count,
            consecutive_failures = initial.state().consecutive_failures,
            "Heartbeat scheduler started"
        );

        if self.config.run_on_start {
            self.run_cycle(pipeline).await?;
        }

        loop {
            let wait = duration_until_next_run(Utc::now(), self.config.hour_utc);
            let next_at = Utc::now() + chrono::Duration::milliseconds(wait.as_millis() as i64);
            info!(next_run = %next_at, wait_secs = wait.as_secs(), "Sleeping until next heartbeat");
            tokio::time::sleep(wait).await;

            match self.run_cycle(pipeline).await? {
                CycleOutcome::Skipped { holder } => {
                    info!(holder = ?holder, "Cycle skipped; another instance is running");
                }
                CycleOutcome::Completed { produced_report, .. } => {
                    info!(produced_report, "Cycle completed");
                }
                CycleOutcome::Failed { error } => {
                    warn!(error = %error, "Cycle failed; waiting for next heartbeat");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::tests::FakeProbe;
    use crate::lock::{FileLock, LockError};
    use crate::state::RunState;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 28, h, m, s).unwrap()
    }

    #[test]
    fn next_run_later_today() {
        assert_eq!(duration_until_next_run(at(4, 30, 0), 6), Duration::from_secs(90 * 60));
    }

    #[test]
    fn next_run_rolls_to_tomorrow_when_passed_or_equal() {
        assert_eq!(duration_until_next_run(at(6, 0, 0), 6), Duration::from_secs(24 * 3600));
        assert_eq!(duration_until_next_run(at(7, 0, 0), 6), Duration::from_secs(23 * 3600));
        // across a month boundary in a leap year
        let leap_day = Utc.with_ymd_and_hms(2024, 2, 29, 23, 0, 0).unwrap();
        assert_eq!(duration_until_next_run(leap_day, 0), Duration::from_secs(3600));
    }

    #[test]
    fn ms_until_next_run_is_within_a_day() {
        let ms = ms_until_next_run(12);
        assert!(ms > 0 && ms <= 24 * 3600 * 1000);
    }

    /// In-memory lock, to exercise the scheduler without a filesystem.
    #[derive(Default)]
    struct MemoryLock {
        held: AtomicBool,
        releases: AtomicUsize,
        broken: bool,
    }

    impl DistributedLock for MemoryLock {
        fn try_acquire(&self) -> Result<LockOutcome, LockError> {
            if self.broken {
                return Err(LockError::Create {
                    path: PathBuf::from("/dev/null/lock"),
                    source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
                });
            }
            if self.held.swap(true, Ordering::SeqCst) {
                Ok(LockOutcome::HeldBy(Some(42)))
            } else {
                Ok(LockOutcome::Acquired)
            }
        }

        fn release(&self) {
            self.held.store(false, Ordering::SeqCst);
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FixedPipeline {
        fail: bool,
        report: bool,
        calls: AtomicUsize,
    }

    impl FixedPipeline {
        fn ok(report: bool) -> Self {
            Self { fail: false, report, calls: AtomicUsize::new(0) }
        }

        fn failing() -> Self {
            Self { fail: true, report: false, calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl Pipeline for FixedPipeline {
        async fn run(&self) -> Result<PipelineOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("source unreachable");
            }
            Ok(PipelineOutput { produced_report: self.report, summary: Some("3 anomalies".into()) })
        }
    }

    /// Asserts the lock is held while the pipeline body runs.
    struct LockCheckingPipeline {
        lock_path: PathBuf,
    }

    #[async_trait]
    impl Pipeline for LockCheckingPipeline {
        async fn run(&self) -> Result<PipelineOutput> {
            anyhow::ensure!(self.lock_path.exists(), "lock not held during pipeline");
            Ok(PipelineOutput { produced_report: true, summary: None })
        }
    }

    fn scheduler(dir: &TempDir, lock: MemoryLock) -> HeartbeatScheduler<MemoryLock> {
        HeartbeatScheduler::new(HeartbeatConfig::new(6, dir.path().join("state.json")), lock)
    }

    #[tokio::test]
    async fn successful_cycle_updates_counters_and_releases() {
        let dir = TempDir::new().unwrap();
        let sched = scheduler(&dir, MemoryLock::default());
        let pipeline = FixedPipeline::ok(true);

        let outcome = sched.run_cycle(&pipeline).await.unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Completed { produced_report: true, summary: Some("3 anomalies".into()) }
        );
        assert_eq!(sched.phase(), SchedulerPhase::Idle);
        assert_eq!(sched.lock.releases.load(Ordering::SeqCst), 1);
        assert!(!sched.lock.held.load(Ordering::SeqCst));

        let state = load_state(&dir.path().join("state.json")).await.into_state();
        assert_eq!((state.cycle_count, state.total_reports, state.consecutive_failures), (1, 1, 0));
        assert_eq!(state.last_outcome.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn failed_cycle_counts_failure_and_still_releases() {
        let dir = TempDir::new().unwrap();
        let sched = scheduler(&dir, MemoryLock::default());

        for _ in 0..2 {
            let outcome = sched.run_cycle(&FixedPipeline::failing()).await.unwrap();
            assert!(matches!(
                outcome,
                CycleOutcome::Failed { ref error } if error.contains("unreachable")
            ));
        }
        assert_eq!(sched.lock.releases.load(Ordering::SeqCst), 2);

        let state = load_state(&dir.path().join("state.json")).await.into_state();
        assert_eq!((state.cycle_count, state.consecutive_failures, state.total_reports), (2, 2, 0));

        sched.run_cycle(&FixedPipeline::ok(false)).await.unwrap();
        let state = load_state(&dir.path().join("state.json")).await.into_state();
        assert_eq!((state.cycle_count, state.consecutive_failures, state.total_reports), (3, 0, 0));
    }

    #[tokio::test]
    async fn held_lock_skips_without_running_or_touching_state() {
        let dir = TempDir::new().unwrap();
        let lock = MemoryLock::default();
        lock.held.store(true, Ordering::SeqCst);
        let sched = scheduler(&dir, lock);
        let pipeline = FixedPipeline::ok(true);

        let outcome = sched.run_cycle(&pipeline).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Skipped { holder: Some(42) });
        assert_eq!(pipeline.calls.load(Ordering::SeqCst), 0);
        assert_eq!(sched.lock.releases.load(Ordering::SeqCst), 0);
        assert!(!dir.path().join("state.json").exists());
    }

    #[tokio::test]
    async fn lock_io_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        let sched = scheduler(&dir, MemoryLock { broken: true, ..Default::default() });
        assert!(sched.run_cycle(&FixedPipeline::ok(true)).await.is_err());
        assert_eq!(sched.phase(), SchedulerPhase::Fatal);
    }

    #[tokio::test]
    async fn unpersistable_state_is_fatal_but_releases_lock() {
        let dir = TempDir::new().unwrap();
        let state_path = dir.path().join("state.json");
        std::fs::create_dir(&state_path).unwrap();
        let sched =
            HeartbeatScheduler::new(HeartbeatConfig::new(6, &state_path), MemoryLock::default());

        let err = sched.run_cycle(&FixedPipeline::ok(true)).await.unwrap_err();
        assert!(format!("{err:#}").contains("persistence"));
        assert_eq!(sched.phase(), SchedulerPhase::Fatal);
        assert_eq!(sched.lock.releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn run_forever_stops_on_fatal_start_cycle() {
        let dir = TempDir::new().unwrap();
        let state_path = dir.path().join("state.json");
        std::fs::create_dir(&state_path).unwrap();
        let mut config = HeartbeatConfig::new(6, &state_path);
        config.run_on_start = true;
        let sched = HeartbeatScheduler::new(config, MemoryLock::default());

        assert!(sched.run_forever(&FixedPipeline::ok(true)).await.is_err());
    }

    #[tokio::test]
    async fn file_lock_is_held_during_pipeline_and_removed_after() {
        let dir = TempDir::new().unwrap();
        let lock_path = dir.path().join("heartbeat.lock");
        let probe = FakeProbe::with_alive(&[7]);
        let lock = FileLock::new(&lock_path).with_owner_pid(7).with_probe(probe);
        let sched =
            HeartbeatScheduler::new(HeartbeatConfig::new(6, dir.path().join("state.json")), lock);

        let outcome = sched
            .run_cycle(&LockCheckingPipeline { lock_path: lock_path.clone() })
            .await
            .unwrap();
        assert!(matches!(outcome, CycleOutcome::Completed { produced_report: true, .. }));
        assert!(!lock_path.exists());
    }

    #[tokio::test]
    async fn defaulted_state_is_overwritten_after_cycle() {
        let dir = TempDir::new().unwrap();
        let state_path = dir.path().join("state.json");
        std::fs::write(&state_path, "not json").unwrap();
        let sched =
            HeartbeatScheduler::new(HeartbeatConfig::new(6, &state_path), MemoryLock::default());

        sched.run_cycle(&FixedPipeline::ok(true)).await.unwrap();
        let loaded = load_state(&state_path).await;
        assert!(matches!(loaded, StateLoad::Loaded(RunState { cycle_count: 1, .. })));
    }
}
