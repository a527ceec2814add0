//! Virtual Clock for Deterministic Tests
//!
//! The wall clock seen by code under test. It is installed at the start of
//! every spec, pinned to either the suite's fixed date or the real time at
//! install, and frozen. Only the fake-async zone moves it, by exactly the
//! amount of virtual time it fires through.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Clock state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockState {
    /// Pinned and advanced only by `tick`
    Frozen,
    /// Reading system time
    System,
}

/// Options for clock installation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockOptions {
    /// Pinned time (milliseconds since Unix epoch)
    pub time_ms: u64,
}

impl ClockOptions {
    /// Pin at the current system time
    #[must_use]
    pub fn now() -> Self {
        Self {
            time_ms: system_now_ms(),
        }
    }

    /// Pin at a fixed time
    #[must_use]
    pub const fn fixed(time_ms: u64) -> Self {
        Self { time_ms }
    }

    /// Pin at an ISO 8601 date
    ///
    /// # Errors
    ///
    /// Returns error if parsing fails
    pub fn from_iso(iso: &str) -> Result<Self, ClockError> {
        Ok(Self {
            time_ms: parse_iso_to_ms(iso)?,
        })
    }
}

impl Default for ClockOptions {
    fn default() -> Self {
        Self::now()
    }
}

/// Errors that can occur with clock operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClockError {
    /// Invalid datetime format
    InvalidFormat(String),
    /// Clock already installed
    AlreadyInstalled,
}

impl std::fmt::Display for ClockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidFormat(s) => write!(f, "Invalid datetime format: {s}"),
            Self::AlreadyInstalled => write!(f, "Clock already installed"),
        }
    }
}

impl std::error::Error for ClockError {}

/// Pinned wall clock
#[derive(Debug, Default)]
pub struct VirtualClock {
    current_ms: AtomicU64,
    installed: AtomicBool,
}

impl VirtualClock {
    /// Create a clock that reads system time until installed
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the clock
    ///
    /// # Errors
    ///
    /// Returns error if clock is already installed
    pub fn install(&self, options: ClockOptions) -> Result<(), ClockError> {
        if self.installed.swap(true, Ordering::SeqCst) {
            return Err(ClockError::AlreadyInstalled);
        }
        self.current_ms.store(options.time_ms, Ordering::SeqCst);
        Ok(())
    }

    /// Restore the system time source
    pub fn uninstall(&self) {
        self.installed.store(false, Ordering::SeqCst);
    }

    /// Check if clock is installed
    #[must_use]
    pub fn is_installed(&self) -> bool {
        self.installed.load(Ordering::SeqCst)
    }

    /// Current time in milliseconds since Unix epoch
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        if self.is_installed() {
            self.current_ms.load(Ordering::SeqCst)
        } else {
            system_now_ms()
        }
    }

    /// Current time as Duration since Unix epoch
    #[must_use]
    pub fn now(&self) -> Duration {
        Duration::from_millis(self.now_ms())
    }

    /// Advance a pinned clock by exactly `delta_ms`; no-op when uninstalled
    pub fn tick(&self, delta_ms: u64) {
        if self.is_installed() {
            self.current_ms.fetch_add(delta_ms, Ordering::SeqCst);
        }
    }

    /// Get current state
    #[must_use]
    pub fn state(&self) -> ClockState {
        if self.is_installed() {
            ClockState::Frozen
        } else {
            ClockState::System
        }
    }
}

/// Thread-safe clock handle
pub type Clock = Arc<VirtualClock>;

/// Create a new shared clock
#[must_use]
pub fn create_clock() -> Clock {
    Arc::new(VirtualClock::new())
}

fn system_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Parse an ISO 8601 date or datetime to milliseconds since the epoch.
///
/// Accepts RFC 3339 (`2000-01-01T00:00:00Z`, `...+02:00`), a datetime
/// without offset, read as UTC, and a bare `YYYY-MM-DD` (UTC midnight).
/// Dates before the epoch are rejected.
pub(crate) fn parse_iso_to_ms(iso: &str) -> Result<u64, ClockError> {
    let trimmed = iso.trim();
    let invalid = || ClockError::InvalidFormat(iso.to_string());

    let millis = if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        dt.timestamp_millis()
    } else if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f") {
        dt.and_utc().timestamp_millis()
    } else {
        NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
            .map_err(|_| invalid())?
            .and_time(NaiveTime::MIN)
            .and_utc()
            .timestamp_millis()
    };
    u64::try_from(millis).map_err(|_| invalid())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    // =========================================================================
    // Installation
    // =========================================================================

    #[test]
    fn test_new_reads_system_time() {
        let clock = VirtualClock::new();
        assert!(!clock.is_installed());
        assert_eq!(clock.state(), ClockState::System);
        assert!(clock.now_ms() > 1_600_000_000_000);
    }

    #[test]
    fn test_install_pins_time() {
        let clock = VirtualClock::new();
        clock.install(ClockOptions::fixed(1_000_000)).unwrap();
        assert_eq!(clock.state(), ClockState::Frozen);
        assert_eq!(clock.now_ms(), 1_000_000);
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(clock.now_ms(), 1_000_000);
    }

    #[test]
    fn test_install_twice_fails() {
        let clock = VirtualClock::new();
        clock.install(ClockOptions::fixed(0)).unwrap();
        assert_eq!(
            clock.install(ClockOptions::fixed(0)),
            Err(ClockError::AlreadyInstalled)
        );
        clock.uninstall();
        clock.install(ClockOptions::fixed(5)).unwrap();
        assert_eq!(clock.now_ms(), 5);
    }

    // =========================================================================
    // Tick
    // =========================================================================

    #[test]
    fn test_tick_advances_exactly() {
        let clock = VirtualClock::new();
        clock.install(ClockOptions::fixed(100)).unwrap();
        clock.tick(250);
        clock.tick(0);
        assert_eq!(clock.now_ms(), 350);
        assert_eq!(clock.now(), Duration::from_millis(350));
    }

    #[test]
    fn test_tick_uninstalled_is_noop() {
        let clock = VirtualClock::new();
        clock.tick(1_000);
        clock.install(ClockOptions::fixed(7)).unwrap();
        assert_eq!(clock.now_ms(), 7);
    }

    // =========================================================================
    // ISO parsing
    // =========================================================================

    #[test]
    fn test_parse_epoch() {
        assert_eq!(parse_iso_to_ms("1970-01-01T00:00:00Z").unwrap(), 0);
        assert_eq!(parse_iso_to_ms("1970-01-02").unwrap(), 86_400_000);
    }

    #[test]
    fn test_parse_known_dates() {
        // 2000-03-01 follows a leap day
        assert_eq!(parse_iso_to_ms("2000-03-01").unwrap(), 951_868_800_000);
        assert_eq!(
            parse_iso_to_ms("1983-01-22T12:00:00Z").unwrap(),
            412_084_800_000
        );
        assert_eq!(
            parse_iso_to_ms("2024-02-29T23:59:59.500Z").unwrap(),
            1_709_251_199_500
        );
        assert_eq!(
            parse_iso_to_ms("1983-01-22T12:00:00").unwrap(),
            412_084_800_000
        );
        assert_eq!(
            parse_iso_to_ms("1983-01-22T14:00:00+02:00").unwrap(),
            412_084_800_000
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_iso_to_ms("not a date").is_err());
        assert!(parse_iso_to_ms("2023-13-01").is_err());
        assert!(parse_iso_to_ms("2023-02-29").is_err());
        assert!(parse_iso_to_ms("2023-01-01T25:00:00").is_err());
        assert_eq!(
            ClockOptions::from_iso("1960-01-01"),
            Err(ClockError::InvalidFormat("1960-01-01".to_string()))
        );
    }
}
