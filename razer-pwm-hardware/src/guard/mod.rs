//! System-wide exclusive access to the controllers
//!
//! The HID transport has no per-transaction arbitration, so every process
//! talking to these devices (including other vendors' tools) agrees on one
//! named lock and holds it for each batch of transactions.
//!
//! - Windows: named kernel mutex `Global\<name>`, open to every principal.
//! - Unix: `flock` on `<lock_dir>/<name>.lock`, world-writable.
//!
//! Within a process, threads queue on an in-process gate before touching the
//! system primitive.

use razer_pwm_core::{GuardConfig, RazerPwmError, Result};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use tracing::{debug, warn};

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix::NamedLock;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use windows::NamedLock;

/// Mutual exclusion capability used by the device session
pub trait AccessGuard: Send + Sync {
    /// Block until exclusive ownership is obtained
    fn acquire(&self) -> Result<()>;

    /// Give ownership back; called exactly once per successful `acquire`
    fn release(&self);
}

/// Held ownership of an `AccessGuard`, released on drop
#[must_use = "the guard is released as soon as this value is dropped"]
pub struct ExclusiveAccess<'a> {
    guard: &'a dyn AccessGuard,
}

impl<'a> ExclusiveAccess<'a> {
    pub fn acquire(guard: &'a dyn AccessGuard) -> Result<Self> {
        guard.acquire()?;
        Ok(Self { guard })
    }
}

impl Drop for ExclusiveAccess<'_> {
    fn drop(&mut self) {
        self.guard.release();
    }
}

impl std::fmt::Debug for ExclusiveAccess<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExclusiveAccess").finish_non_exhaustive()
    }
}

/// In-process gate
///
/// Serializes threads of one process. On its own it is enough for simulated
/// devices, which no other process can see.
#[derive(Debug, Default)]
pub struct LocalGuard {
    held: Mutex<bool>,
    released: Condvar,
}

impl LocalGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn held(&self) -> MutexGuard<'_, bool> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AccessGuard for LocalGuard {
    fn acquire(&self) -> Result<()> {
        let mut held = self.held();
        while *held {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *held = true;
        Ok(())
    }

    fn release(&self) {
        *self.held() = false;
        self.released.notify_one();
    }
}

/// Named lock shared by every process on the machine
#[derive(Debug)]
pub struct SystemGuard {
    name: String,
    gate: LocalGuard,
    lock: NamedLock,
}

impl SystemGuard {
    /// Create or open the named lock
    ///
    /// Prefer [`system_guard`], which keeps one instance per process.
    pub fn open(config: &GuardConfig) -> Result<Self> {
        if config.name.is_empty() {
            return Err(RazerPwmError::Guard("Guard name is empty".to_string()));
        }
        let lock = NamedLock::open(config)?;
        debug!("Opened access guard '{}'", config.name);
        Ok(Self {
            name: config.name.clone(),
            gate: LocalGuard::new(),
            lock,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl AccessGuard for SystemGuard {
    fn acquire(&self) -> Result<()> {
        self.gate.acquire()?;
        if let Err(e) = self.lock.lock() {
            self.gate.release();
            return Err(e);
        }
        Ok(())
    }

    fn release(&self) {
        self.lock.unlock();
        self.gate.release();
    }
}

static SYSTEM_GUARD: OnceLock<Arc<SystemGuard>> = OnceLock::new();

/// Process-wide system guard, created on first use
///
/// Later calls return the same instance; a differing `config.name` is logged
/// and ignored.
pub fn system_guard(config: &GuardConfig) -> Result<Arc<SystemGuard>> {
    if let Some(existing) = SYSTEM_GUARD.get() {
        if existing.name() != config.name {
            warn!(
                "Access guard already open as '{}', ignoring '{}'",
                existing.name(),
                config.name
            );
        }
        return Ok(Arc::clone(existing));
    }

    let guard = Arc::new(SystemGuard::open(config)?);
    Ok(Arc::clone(SYSTEM_GUARD.get_or_init(|| guard)))
}
