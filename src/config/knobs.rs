//! Global runtime knob store.
//!
//! # Responsibilities
//! - Hold the small set of global scalars configuration mutates and
//!   unrelated subsystems read (thread counts, admission capacities, paths)
//! - Validate every write before commit; a rejected write leaves the
//!   previous value untouched
//! - Expose a read-only snapshot for diagnostics
//!
//! # Design Decisions
//! - One `Arc<Mutex<_>>` handle instead of ambient globals; the handle is
//!   cloned into every reading subsystem (resolver pool, OCSP scheduler,
//!   buffering layer)
//! - Lock discipline is acquire → read-or-write → release, never nested
//! - Platform capability (TCP fast-open) is captured at construction so the
//!   store itself stays platform-agnostic

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use thiserror::Error;

/// Capacity of the temp-buffer filename template shared with the external
/// buffering subsystem. A rewritten template must fit, NUL included.
pub const TEMP_BUFFER_TEMPLATE_CAPACITY: usize = 256;

/// Default fast-open queue length on platforms that support the option.
pub const DEFAULT_TCP_FASTOPEN_QUEUE: i32 = 4096;

const DEFAULT_TEMP_BUFFER_TEMPLATE: &str = "/tmp/server.b.XXXXXX";

/// A knob write that failed validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KnobError {
    #[error("num-threads must be >=1")]
    NumThreads,
    #[error("num-name-resolution-threads must be >=1")]
    NameResolutionThreads,
    #[error("num-ocsp-updaters must be >=1")]
    OcspUpdaters,
    #[error("path is too long")]
    TempPathTooLong,
}

/// The knob scalars proper. Private to the store; all access goes through
/// [`KnobStore`] so the lock is impossible to forget.
#[derive(Debug)]
struct RuntimeKnobs {
    max_connections: i32,
    num_threads: usize,
    name_resolution_threads: usize,
    ocsp_updater_capacity: usize,
    tcp_fastopen_queue: i32,
    fastopen_supported: bool,
    temp_buffer_template: String,
}

impl RuntimeKnobs {
    fn new(fastopen_supported: bool) -> Self {
        RuntimeKnobs {
            max_connections: 1024,
            num_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            name_resolution_threads: 1,
            ocsp_updater_capacity: 1,
            tcp_fastopen_queue: if fastopen_supported {
                DEFAULT_TCP_FASTOPEN_QUEUE
            } else {
                0
            },
            fastopen_supported,
            temp_buffer_template: DEFAULT_TEMP_BUFFER_TEMPLATE.to_string(),
        }
    }
}

/// Shared handle to the runtime knobs.
///
/// Cloning is cheap and shares the same underlying store.
#[derive(Debug, Clone)]
pub struct KnobStore {
    inner: Arc<Mutex<RuntimeKnobs>>,
}

impl KnobStore {
    /// Create a store with platform defaults. `fastopen_supported` comes
    /// from the socket capability probe resolved once at startup.
    pub fn new(fastopen_supported: bool) -> Self {
        KnobStore {
            inner: Arc::new(Mutex::new(RuntimeKnobs::new(fastopen_supported))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RuntimeKnobs> {
        // A poisoned lock only means a panicking reader; the scalars stay
        // valid, so recover the guard instead of propagating the panic.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_max_connections(&self, value: i32) {
        self.lock().max_connections = value;
    }

    pub fn max_connections(&self) -> i32 {
        self.lock().max_connections
    }

    pub fn set_num_threads(&self, value: usize) -> Result<(), KnobError> {
        if value == 0 {
            return Err(KnobError::NumThreads);
        }
        self.lock().num_threads = value;
        Ok(())
    }

    pub fn num_threads(&self) -> usize {
        self.lock().num_threads
    }

    /// Read concurrently by the external name-resolution pool.
    pub fn set_name_resolution_threads(&self, value: usize) -> Result<(), KnobError> {
        if value == 0 {
            return Err(KnobError::NameResolutionThreads);
        }
        self.lock().name_resolution_threads = value;
        Ok(())
    }

    pub fn name_resolution_threads(&self) -> usize {
        self.lock().name_resolution_threads
    }

    /// Resizes the admission capacity the external OCSP scheduler draws on.
    pub fn set_ocsp_updater_capacity(&self, value: usize) -> Result<(), KnobError> {
        if value == 0 {
            return Err(KnobError::OcspUpdaters);
        }
        self.lock().ocsp_updater_capacity = value;
        Ok(())
    }

    pub fn ocsp_updater_capacity(&self) -> usize {
        self.lock().ocsp_updater_capacity
    }

    /// Set the fast-open queue length. On platforms without the socket
    /// option the value is silently clamped to zero with a warning; the
    /// provisioner never sees a non-zero length it cannot apply.
    pub fn set_tcp_fastopen_queue(&self, value: i32) {
        let mut knobs = self.lock();
        if value != 0 && !knobs.fastopen_supported {
            tracing::warn!(
                requested = value,
                "ignoring the value; the platform does not support TCP_FASTOPEN"
            );
            knobs.tcp_fastopen_queue = 0;
            return;
        }
        knobs.tcp_fastopen_queue = value;
    }

    pub fn tcp_fastopen_queue(&self) -> i32 {
        self.lock().tcp_fastopen_queue
    }

    /// Rewrite the directory prefix of the temp-buffer filename template.
    /// The filename component is kept; the rewritten template must fit the
    /// fixed buffer shared with the external buffering subsystem.
    pub fn set_temp_buffer_path(&self, prefix: &str) -> Result<(), KnobError> {
        let mut knobs = self.lock();
        let filename_at = knobs.temp_buffer_template.rfind('/').unwrap_or(0);
        let candidate = format!(
            "{}{}",
            prefix,
            &knobs.temp_buffer_template[filename_at..]
        );
        if candidate.len() >= TEMP_BUFFER_TEMPLATE_CAPACITY {
            return Err(KnobError::TempPathTooLong);
        }
        knobs.temp_buffer_template = candidate;
        Ok(())
    }

    /// Directory prefix of the current temp-buffer template.
    pub fn temp_buffer_path(&self) -> String {
        let knobs = self.lock();
        let filename_at = knobs.temp_buffer_template.rfind('/').unwrap_or(0);
        knobs.temp_buffer_template[..filename_at].to_string()
    }

    /// Read-only snapshot of every knob. The error-log path lives on the
    /// owning config and is filled in by [`GlobalConfig::snapshot`].
    ///
    /// [`GlobalConfig::snapshot`]: crate::config::global::GlobalConfig::snapshot
    pub fn snapshot(&self) -> KnobSnapshot {
        let knobs = self.lock();
        let filename_at = knobs.temp_buffer_template.rfind('/').unwrap_or(0);
        KnobSnapshot {
            max_connections: knobs.max_connections,
            num_threads: knobs.num_threads,
            num_name_resolution_threads: knobs.name_resolution_threads,
            num_ocsp_updaters: knobs.ocsp_updater_capacity,
            tcp_fastopen: knobs.tcp_fastopen_queue,
            temp_buffer_path: knobs.temp_buffer_template[..filename_at].to_string(),
            error_log: None,
        }
    }
}

/// Point-in-time view of the knob store, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KnobSnapshot {
    pub max_connections: i32,
    pub num_threads: usize,
    pub num_name_resolution_threads: usize,
    pub num_ocsp_updaters: usize,
    pub tcp_fastopen: i32,
    pub temp_buffer_path: String,
    pub error_log: Option<String>,
}
