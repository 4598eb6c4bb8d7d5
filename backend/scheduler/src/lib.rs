pub mod heartbeat;
pub mod lock;
pub mod retry;
pub mod state;

pub use heartbeat::{
    duration_until_next_run, ms_until_next_run, CycleOutcome, HeartbeatConfig, HeartbeatScheduler,
    Pipeline, PipelineOutput, SchedulerPhase,
};
pub use lock::{
    acquire_lock, release_lock, DistributedLock, FileLock, LockError, LockOutcome, OsProcessProbe,
    ProcessProbe,
};
pub use retry::{with_retry, RetryPolicy};
pub use state::{load_state, save_state, DefaultReason, RunState, StateError, StateLoad};
