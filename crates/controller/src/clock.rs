use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Time source used by controllers that integrate over time.
pub trait Clock: Debug + Send + Sync {
    /// Current time in seconds. Only differences between calls are meaningful.
    fn now_s(&self) -> f64;
}

/// Process-monotonic wall clock.
#[derive(Clone, Copy, Debug)]
pub struct WallClock {
    origin: Instant,
}

impl WallClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for WallClock {
    fn now_s(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Manually driven clock. Clones share the same time, so a simulation loop can
/// advance it while a controller reads it.
#[derive(Clone, Debug, Default)]
pub struct SimClock {
    bits: Arc<AtomicU64>,
}

impl SimClock {
    pub fn new(start_s: f64) -> Self {
        Self {
            bits: Arc::new(AtomicU64::new(start_s.to_bits())),
        }
    }

    pub fn set(&self, t_s: f64) {
        self.bits.store(t_s.to_bits(), Ordering::Release);
    }

    pub fn advance(&self, dt_s: f64) {
        self.set(self.now_s() + dt_s);
    }
}

impl Clock for SimClock {
    fn now_s(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }
}
