//! Single-instance lock backed by a create-only token file.
//!
//! The file's presence means "a cycle is running"; its content is the owning
//! process id in decimal. A lock whose owner is no longer alive is stale and
//! is recovered once; if the retry still finds a lock, the cycle is skipped.
//!
//! Recovery runs under a second create-only file, `<lock>.recover`, and
//! re-checks the owner before removing anything, so a lock recovered by one
//! contender is never deleted by another that saw the same stale owner.

use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use thiserror::Error;
use tracing::{debug, info, warn};

/// A lock file whose pid is unreadable is assumed to be mid-write by its
/// creator for this long before it is treated as stale.
const UNREADABLE_LOCK_GRACE: Duration = Duration::from_secs(60);

/// A recovery guard older than this was left by a contender that died
/// mid-recovery.
const ABANDONED_RECOVERY_AGE: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum LockError {
    #[error("failed to create lock file {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read lock file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to create recovery guard {path}: {source}")]
    Recover {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to remove stale lock file {path}: {source}")]
    RemoveStale {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result of an acquisition attempt. Contention is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired,
    /// Another live owner holds the lock; its pid, when readable.
    HeldBy(Option<u32>),
}

impl LockOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, LockOutcome::Acquired)
    }
}

/// "Is this process id alive?"
pub trait ProcessProbe: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Probe backed by the host OS.
///
/// Unix sends signal 0, which checks existence without touching the target.
/// Windows asks `tasklist`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsProcessProbe;

impl ProcessProbe for OsProcessProbe {
    #[cfg(unix)]
    fn is_alive(&self, pid: u32) -> bool {
        // 0 and negative values address process groups, not a process.
        let Ok(pid) = i32::try_from(pid) else { return false };
        if pid <= 0 {
            return false;
        }
        if unsafe { kill(pid, 0) } == 0 {
            return true;
        }
        // EPERM: exists, owned by someone else.
        io::Error::last_os_error().raw_os_error() == Some(EPERM)
    }

    #[cfg(not(unix))]
    fn is_alive(&self, pid: u32) -> bool {
        match std::process::Command::new("tasklist")
            .args(["/FI", &format!("PID eq {pid}"), "/NH"])
            .output()
        {
            Ok(out) => String::from_utf8_lossy(&out.stdout).contains(&pid.to_string()),
            // Cannot tell; never steal a lock we are unsure about.
            Err(_) => true,
        }
    }
}

#[cfg(unix)]
const EPERM: i32 = 1;

#[cfg(unix)]
extern "C" {
    fn kill(pid: i32, sig: i32) -> i32;
}

/// Mutual exclusion for scheduled cycles.
///
/// The file lock is the single-host backend; another backend can be swapped in
/// without changing the scheduler.
pub trait DistributedLock: Send + Sync {
    fn try_acquire(&self) -> Result<LockOutcome, LockError>;

    /// Best-effort release; a missing lock is not an error.
    fn release(&self);
}

enum Holder {
    Pid(u32),
    Unreadable { fresh: bool },
    Gone,
}

/// What the current lock file means for a contender.
enum Verdict {
    Held(Option<u32>),
    Stale,
    Gone,
}

/// Exclusive right to replace a stale lock; removed on drop.
struct RecoveryGuard {
    path: PathBuf,
}

impl Drop for RecoveryGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove recovery guard");
            }
        }
    }
}

/// Lock file at a fixed path, owned by `owner_pid`.
pub struct FileLock {
    path: PathBuf,
    owner_pid: u32,
    probe: Arc<dyn ProcessProbe>,
}

impl FileLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            owner_pid: std::process::id(),
            probe: Arc::new(OsProcessProbe),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn ProcessProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Record a different owner pid (lets one process act as several callers).
    pub fn with_owner_pid(mut self, pid: u32) -> Self {
        self.owner_pid = pid;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The pid recorded in the lock file, if present and readable.
    pub fn current_holder(&self) -> Option<u32> {
        match self.read_holder() {
            Ok(Holder::Pid(pid)) => Some(pid),
            _ => None,
        }
    }

    fn create(&self) -> io::Result<()> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(&self.path)?;
        let written = file
            .write_all(self.owner_pid.to_string().as_bytes())
            .and_then(|_| file.sync_all());
        if let Err(e) = written {
            let _ = fs::remove_file(&self.path);
            return Err(e);
        }
        Ok(())
    }

    fn read_holder(&self) -> Result<Holder, LockError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Holder::Gone),
            Err(source) => return Err(LockError::Read { path: self.path.clone(), source }),
        };
        if let Ok(pid) = raw.trim().parse::<u32>() {
            return Ok(Holder::Pid(pid));
        }
        let fresh = fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .map(|age| age < UNREADABLE_LOCK_GRACE)
            .unwrap_or(false);
        Ok(Holder::Unreadable { fresh })
    }

    fn guard_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".recover");
        self.path.with_file_name(name)
    }

    /// Classify the lock file, probing a recorded owner.
    fn verdict(&self) -> Result<Verdict, LockError> {
        Ok(match self.read_holder()? {
            Holder::Pid(pid) if self.probe.is_alive(pid) => Verdict::Held(Some(pid)),
            Holder::Unreadable { fresh: true } => Verdict::Held(None),
            Holder::Pid(_) | Holder::Unreadable { fresh: false } => Verdict::Stale,
            Holder::Gone => Verdict::Gone,
        })
    }

    /// `None` when another contender is already recovering.
    fn begin_recovery(&self) -> Result<Option<RecoveryGuard>, LockError> {
        let path = self.guard_path();
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let _ = file.write_all(self.owner_pid.to_string().as_bytes());
                Ok(Some(RecoveryGuard { path }))
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let abandoned = fs::metadata(&path)
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|modified| SystemTime::now().duration_since(modified).ok())
                    .is_some_and(|age| age >= ABANDONED_RECOVERY_AGE);
                if abandoned {
                    // Cleared for the next attempt; this one stays out.
                    warn!(path = %path.display(), "Removing abandoned recovery guard");
                    let _ = fs::remove_file(&path);
                }
                Ok(None)
            }
            Err(source) => Err(LockError::Recover { path, source }),
        }
    }

    /// `true` if this call created the file, `false` if it already existed.
    fn create_or_contended(&self) -> Result<bool, LockError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|source| LockError::Create { path: self.path.clone(), source })?;
            }
        }
        match self.create() {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(source) => Err(LockError::Create { path: self.path.clone(), source }),
        }
    }
}

impl DistributedLock for FileLock {
    fn try_acquire(&self) -> Result<LockOutcome, LockError> {
        if self.create_or_contended()? {
            debug!(path = %self.path.display(), pid = self.owner_pid, "Lock acquired");
            return Ok(LockOutcome::Acquired);
        }

        match self.verdict()? {
            Verdict::Held(holder) => {
                info!(path = %self.path.display(), holder = ?holder, "Lock held by a live process");
                return Ok(LockOutcome::HeldBy(holder));
            }
            Verdict::Stale | Verdict::Gone => {}
        }

        let Some(_guard) = self.begin_recovery()? else {
            info!(path = %self.path.display(), "Another process is recovering the lock");
            return Ok(LockOutcome::HeldBy(self.current_holder()));
        };

        // The file may have been replaced since it was first read.
        match self.verdict()? {
            Verdict::Held(holder) => {
                info!(
                    path = %self.path.display(),
                    holder = ?holder,
                    "Lock was recovered by another process"
                );
                return Ok(LockOutcome::HeldBy(holder));
            }
            Verdict::Stale => {
                warn!(path = %self.path.display(), "Removing stale lock left by a dead process");
                match fs::remove_file(&self.path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(source) => {
                        return Err(LockError::RemoveStale { path: self.path.clone(), source });
                    }
                }
            }
            Verdict::Gone => {}
        }

        if self.create_or_contended()? {
            info!(
                path = %self.path.display(),
                pid = self.owner_pid,
                "Lock acquired after stale recovery"
            );
            return Ok(LockOutcome::Acquired);
        }
        Ok(LockOutcome::HeldBy(self.current_holder()))
    }

    fn release(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Lock released"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to release lock"),
        }
    }
}

/// Acquire the lock at `path` for this process; `false` means someone else holds it.
pub fn acquire_lock(path: impl AsRef<Path>) -> Result<bool, LockError> {
    FileLock::new(path.as_ref()).try_acquire().map(|o| o.is_acquired())
}

/// Delete the lock at `path` unconditionally.
pub fn release_lock(path: impl AsRef<Path>) {
    FileLock::new(path.as_ref()).release();
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Probe with a fixed set of live pids.
    #[derive(Default)]
    pub(crate) struct FakeProbe {
        alive: Mutex<HashSet<u32>>,
    }

    impl FakeProbe {
        pub(crate) fn with_alive(pids: &[u32]) -> Arc<Self> {
            Arc::new(Self { alive: Mutex::new(pids.iter().copied().collect()) })
        }

        pub(crate) fn kill(&self, pid: u32) {
            self.alive.lock().unwrap().remove(&pid);
        }
    }

    impl ProcessProbe for FakeProbe {
        fn is_alive(&self, pid: u32) -> bool {
            self.alive.lock().unwrap().contains(&pid)
        }
    }

    type Hook = Box<dyn FnOnce() + Send>;

    /// Runs `hook` inside the first liveness check, then answers from `inner`.
    struct InterleavingProbe {
        inner: Arc<FakeProbe>,
        hook: Mutex<Option<Hook>>,
    }

    impl ProcessProbe for InterleavingProbe {
        fn is_alive(&self, pid: u32) -> bool {
            let hook = self.hook.lock().unwrap().take();
            if let Some(hook) = hook {
                hook();
            }
            self.inner.is_alive(pid)
        }
    }

    fn lock_for(dir: &TempDir, pid: u32, probe: &Arc<FakeProbe>) -> FileLock {
        FileLock::new(dir.path().join("heartbeat.lock"))
            .with_owner_pid(pid)
            .with_probe(probe.clone())
    }

    #[test]
    fn acquire_writes_owner_pid() {
        let dir = TempDir::new().unwrap();
        let probe = FakeProbe::with_alive(&[100]);
        let lock = lock_for(&dir, 100, &probe);

        assert_eq!(lock.try_acquire().unwrap(), LockOutcome::Acquired);
        assert_eq!(fs::read_to_string(lock.path()).unwrap(), "100");
    }

    #[test]
    fn second_caller_is_refused_while_first_holds() {
        let dir = TempDir::new().unwrap();
        let probe = FakeProbe::with_alive(&[100, 200]);
        let first = lock_for(&dir, 100, &probe);
        let second = lock_for(&dir, 200, &probe);

        assert!(first.try_acquire().unwrap().is_acquired());
        assert_eq!(second.try_acquire().unwrap(), LockOutcome::HeldBy(Some(100)));
        assert_eq!(first.current_holder(), Some(100));

        first.release();
        assert!(second.try_acquire().unwrap().is_acquired());
        assert_eq!(second.current_holder(), Some(200));
    }

    #[test]
    fn stale_lock_from_dead_process_is_recovered() {
        let dir = TempDir::new().unwrap();
        let probe = FakeProbe::with_alive(&[100, 200]);
        let crashed = lock_for(&dir, 100, &probe);
        assert!(crashed.try_acquire().unwrap().is_acquired());

        probe.kill(100);
        let next = lock_for(&dir, 200, &probe);
        assert_eq!(next.try_acquire().unwrap(), LockOutcome::Acquired);

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(fs::read_to_string(next.path()).unwrap(), "200");
    }

    #[test]
    fn racing_recoveries_leave_one_owner() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("heartbeat.lock");
        fs::write(&path, "100").unwrap();
        let probe = FakeProbe::with_alive(&[200, 300]);

        let first = lock_for(&dir, 200, &probe);
        let first_result = Arc::new(Mutex::new(None));
        let slot = first_result.clone();
        let hook: Hook = Box::new(move || {
            *slot.lock().unwrap() = Some(first.try_acquire().unwrap());
        });
        let interleaved = InterleavingProbe { inner: probe.clone(), hook: Mutex::new(Some(hook)) };
        let second = FileLock::new(&path).with_owner_pid(300).with_probe(Arc::new(interleaved));

        // `second` sees dead pid 100, then `first` recovers before `second` acts.
        let second_result = second.try_acquire().unwrap();

        assert_eq!(*first_result.lock().unwrap(), Some(LockOutcome::Acquired));
        assert_eq!(second_result, LockOutcome::HeldBy(Some(200)));
        assert_eq!(fs::read_to_string(&path).unwrap(), "200");
        assert!(!second.guard_path().exists());
    }

    #[test]
    fn recovery_in_progress_elsewhere_is_respected() {
        let dir = TempDir::new().unwrap();
        let probe = FakeProbe::with_alive(&[300]);
        let lock = lock_for(&dir, 300, &probe);
        fs::write(lock.path(), "100").unwrap();
        fs::write(lock.guard_path(), "200").unwrap();

        assert_eq!(lock.try_acquire().unwrap(), LockOutcome::HeldBy(Some(100)));
        assert_eq!(fs::read_to_string(lock.path()).unwrap(), "100");
        assert!(lock.guard_path().exists());
    }

    #[test]
    fn abandoned_recovery_guard_is_cleared_for_the_next_attempt() {
        let dir = TempDir::new().unwrap();
        let probe = FakeProbe::with_alive(&[300]);
        let lock = lock_for(&dir, 300, &probe);
        fs::write(lock.path(), "100").unwrap();
        fs::write(lock.guard_path(), "200").unwrap();
        let old = SystemTime::now() - Duration::from_secs(3_600);
        fs::File::options()
            .write(true)
            .open(lock.guard_path())
            .unwrap()
            .set_modified(old)
            .unwrap();

        assert_eq!(lock.try_acquire().unwrap(), LockOutcome::HeldBy(Some(100)));
        assert!(!lock.guard_path().exists());
        assert!(lock.try_acquire().unwrap().is_acquired());
        assert_eq!(lock.current_holder(), Some(300));
    }

    #[test]
    fn fresh_unreadable_lock_is_respected() {
        let dir = TempDir::new().unwrap();
        let probe = FakeProbe::with_alive(&[]);
        let lock = lock_for(&dir, 300, &probe);
        fs::write(lock.path(), "").unwrap();

        assert_eq!(lock.try_acquire().unwrap(), LockOutcome::HeldBy(None));
    }

    #[test]
    fn old_unreadable_lock_is_stale() {
        let dir = TempDir::new().unwrap();
        let probe = FakeProbe::with_alive(&[]);
        let lock = lock_for(&dir, 300, &probe);
        fs::write(lock.path(), "garbage").unwrap();
        let old = SystemTime::now() - Duration::from_secs(3_600);
        fs::File::options()
            .write(true)
            .open(lock.path())
            .unwrap()
            .set_modified(old)
            .unwrap();

        assert!(lock.try_acquire().unwrap().is_acquired());
        assert_eq!(lock.current_holder(), Some(300));
    }

    #[test]
    fn release_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let probe = FakeProbe::with_alive(&[1]);
        let lock = lock_for(&dir, 1, &probe);
        lock.release();
        assert!(lock.try_acquire().unwrap().is_acquired());
        lock.release();
        lock.release();
        assert!(!lock.path().exists());
    }

    #[test]
    fn unwritable_directory_is_an_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "file").unwrap();
        let lock = FileLock::new(blocker.join("heartbeat.lock"));
        assert!(matches!(lock.try_acquire(), Err(LockError::Create { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn os_probe_sees_this_process() {
        assert!(OsProcessProbe.is_alive(std::process::id()));
        assert!(!OsProcessProbe.is_alive(0));
        assert!(!OsProcessProbe.is_alive(u32::MAX));
    }

    #[test]
    fn free_functions_follow_the_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.lock");
        assert!(acquire_lock(&path).unwrap());
        // Same live pid is recorded, so a second acquire is refused.
        assert!(!acquire_lock(&path).unwrap());
        release_lock(&path);
        assert!(!path.exists());
        release_lock(&path);
    }
}
