//! Time sources used by the session engine.
//!
//! Every phase computation reads the injected [`Clock`] instead of calling
//! [`SystemTime::now`] directly so tests can drive the scheduler with a
//! [`ManualClock`].

use std::{
    fmt,
    sync::Mutex,
    time::{Duration, SystemTime},
};

/// Abstraction over wall-clock time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current wall-clock instant.
    fn now(&self) -> SystemTime;
}

/// Production clock backed by [`SystemTime::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<SystemTime>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: SystemTime) -> Self {
        Self {
            current: Mutex::new(start),
        }
    }

    /// Move the clock forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        let mut guard = self.current.lock().unwrap_or_else(|poison| poison.into_inner());
        *guard += delta;
    }

    /// Jump to an absolute instant.
    pub fn set(&self, instant: SystemTime) {
        let mut guard = self.current.lock().unwrap_or_else(|poison| poison.into_inner());
        *guard = instant;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        *self.current.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

/// Signed number of whole seconds from `earlier` to `later` (negative when `later` precedes it).
pub fn seconds_between(earlier: SystemTime, later: SystemTime) -> i64 {
    match later.duration_since(earlier) {
        Ok(elapsed) => elapsed.as_secs() as i64,
        Err(err) => -(err.duration().as_secs() as i64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let start = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let clock = ManualClock::new(start);
        clock.advance(Duration::from_secs(30));
        assert_eq!(clock.now(), start + Duration::from_secs(30));
    }

    #[test]
    fn seconds_between_is_signed() {
        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(10_000);
        assert_eq!(seconds_between(base, base + Duration::from_secs(90)), 90);
        assert_eq!(seconds_between(base + Duration::from_secs(90), base), -90);
    }
}
