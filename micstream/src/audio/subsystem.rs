//! Process-wide audio host guard
//!
//! Opening, enumerating and tearing down devices all go through the platform
//! audio host, which is global state. Those calls are serialised here. Reading
//! from an already-open stream never takes this lock, so two devices stream
//! independently.

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::debug;

/// Serialises every access to the platform audio host
#[derive(Debug, Default)]
pub struct AudioSubsystem {
    lock: Mutex<()>,
}

static SHARED: OnceLock<Arc<AudioSubsystem>> = OnceLock::new();

impl AudioSubsystem {
    /// A private guard (tests, or hosts that are not shared)
    pub fn new() -> Self {
        Self::default()
    }

    /// The guard every capture source in this process should share
    pub fn shared() -> Arc<Self> {
        Arc::clone(SHARED.get_or_init(|| Arc::new(Self::new())))
    }

    /// Run `f` with exclusive access to the default host
    pub fn with_host<R>(&self, f: impl FnOnce(&cpal::Host) -> R) -> R {
        let _guard = self.lock.lock();
        let host = cpal::default_host();
        debug!(host = ?host.id(), "Audio host acquired");
        f(&host)
    }

    /// Drop a device resource (stream, device handle) under the guard
    pub fn release<T>(&self, resource: T) {
        let _guard = self.lock.lock();
        drop(resource);
    }
}
