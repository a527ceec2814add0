//! Flush and stabilize.
//!
//! [`Stabilizer`] bundles the zone with the virtual clock so every advance of
//! zone time is mirrored on the clock. `flush_pending_work` is the harness's
//! "make everything settle" step: render, drain timers (periodic ones once
//! per pass), render again.
//!
//! [`ChangeDetectionDepth`] counts render cycles in progress. The fixture's
//! task observer only reacts to framework tasks when the depth is zero, so a
//! listener fired from inside a render never triggers a nested render.

use crate::clock::Clock;
use crate::config::SettleConfig;
use crate::fixture::ComponentFixture;
use crate::result::SettleResult;
use crate::zone::FakeAsyncZone;
use std::cell::Cell;
use std::rc::Rc;

/// Shared count of render cycles in progress
#[derive(Debug, Clone, Default)]
pub struct ChangeDetectionDepth(Rc<Cell<u32>>);

impl ChangeDetectionDepth {
    /// Counter at zero
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a render cycle; the cycle ends when the guard drops
    #[must_use = "the cycle ends as soon as the guard is dropped"]
    pub fn enter(&self) -> DepthGuard {
        self.0.set(self.0.get() + 1);
        DepthGuard(Rc::clone(&self.0))
    }

    /// Current depth
    #[must_use]
    pub fn get(&self) -> u32 {
        self.0.get()
    }

    /// No render cycle is running
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.0.get() == 0
    }

    /// Force the counter back to zero
    pub fn reset(&self) {
        self.0.set(0);
    }
}

/// Leaves a render cycle on drop, including by panic
#[derive(Debug)]
pub struct DepthGuard(Rc<Cell<u32>>);

impl Drop for DepthGuard {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

/// Zone draining with the clock kept in step
#[derive(Debug, Clone)]
pub struct Stabilizer {
    zone: FakeAsyncZone,
    clock: Clock,
    flush_limit: usize,
    bootstrap_flush_limit: usize,
}

impl Stabilizer {
    /// Stabilizer over `zone` advancing `clock`
    #[must_use]
    pub fn new(zone: FakeAsyncZone, clock: Clock, config: &SettleConfig) -> Self {
        Self {
            zone,
            clock,
            flush_limit: config.flush_limit,
            bootstrap_flush_limit: config.bootstrap_flush_limit,
        }
    }

    /// The zone being drained
    #[must_use]
    pub const fn zone(&self) -> &FakeAsyncZone {
        &self.zone
    }

    /// The clock being advanced
    #[must_use]
    pub const fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Advance time by `millis`, firing due timers
    ///
    /// # Errors
    ///
    /// Returns error if the zone is inactive or a microtask drain runs away
    pub fn advance_time(&self, millis: u64) -> SettleResult<()> {
        let clock = &self.clock;
        self.zone.tick(millis, |delta| clock.tick(delta))
    }

    /// Render, drain all timers (periodic ones once per pass), render again.
    /// Returns the elapsed zone milliseconds.
    ///
    /// # Errors
    ///
    /// Returns error if rendering fails or the drain exceeds its bound
    pub fn flush_pending_work(&self, fixture: Option<&ComponentFixture>) -> SettleResult<u64> {
        if let Some(fixture) = fixture {
            fixture.detect_changes()?;
        }
        let clock = &self.clock;
        let elapsed = self
            .zone
            .flush(self.flush_limit, true, |delta| clock.tick(delta))?;
        if let Some(fixture) = fixture {
            fixture.detect_changes()?;
        }
        Ok(elapsed)
    }

    /// Drain one-shot timers only, with the larger bootstrap bound
    ///
    /// # Errors
    ///
    /// Returns error if the drain exceeds its bound
    pub fn flush_bootstrap(&self) -> SettleResult<u64> {
        let clock = &self.clock;
        self.zone
            .flush(self.bootstrap_flush_limit, false, |delta| clock.tick(delta))
    }

    /// Drain microtasks and woken futures only
    ///
    /// # Errors
    ///
    /// Returns error if the zone is inactive or the drain runs away
    pub fn flush_microtasks(&self) -> SettleResult<()> {
        self.zone.flush_microtasks()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::clock::{create_clock, ClockOptions};
    use crate::result::SettleError;
    use crate::scheduler::Scheduler;
    use std::cell::RefCell;

    fn stabilizer(config: &SettleConfig) -> Stabilizer {
        let clock = create_clock();
        clock.install(ClockOptions::fixed(1_000)).unwrap();
        let zone = FakeAsyncZone::with_options("stabilize", config.into(), Some(clock.clone()));
        Stabilizer::new(zone, clock, config)
    }

    // =========================================================================
    // Depth counter
    // =========================================================================

    mod depth_tests {
        use super::*;

        #[test]
        fn test_guard_nests_and_releases() {
            let depth = ChangeDetectionDepth::new();
            assert!(depth.is_idle());
            {
                let _outer = depth.enter();
                let _inner = depth.enter();
                assert_eq!(depth.get(), 2);
            }
            assert!(depth.is_idle());
        }

        #[test]
        fn test_guard_released_on_panic() {
            let depth = ChangeDetectionDepth::new();
            let d = depth.clone();
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
                let _guard = d.enter();
                panic!("render failed");
            }));
            assert!(result.is_err());
            assert!(depth.is_idle());
        }

        #[test]
        fn test_reset() {
            let depth = ChangeDetectionDepth::new();
            let guard = depth.enter();
            depth.reset();
            assert_eq!(depth.get(), 0);
            drop(guard);
            assert_eq!(depth.get(), 0);
        }
    }

    // =========================================================================
    // Flushing
    // =========================================================================

    mod flush_tests {
        use super::*;

        #[test]
        fn test_periodic_timers_fire_once_per_pass_and_clock_follows() {
            let s = stabilizer(&SettleConfig::default());
            let fast = Rc::new(Cell::new(0));
            let slow = Rc::new(Cell::new(0));
            s.zone().run(|| {
                let f = Rc::clone(&fast);
                s.zone().set_interval(100, Box::new(move || f.set(f.get() + 1)));
                let f = Rc::clone(&slow);
                s.zone().set_interval(400, Box::new(move || f.set(f.get() + 1)));
                let elapsed = s.flush_pending_work(None).unwrap();
                assert_eq!(elapsed, 400);
            });
            assert_eq!(fast.get(), 4);
            assert_eq!(slow.get(), 1);
            assert_eq!(s.clock().now_ms(), 1_400);
        }

        #[test]
        fn test_advance_time_moves_clock() {
            let s = stabilizer(&SettleConfig::default());
            let log = Rc::new(RefCell::new(Vec::new()));
            s.zone().run(|| {
                let l = Rc::clone(&log);
                let clock = s.clock().clone();
                s.zone()
                    .set_timeout(250, Box::new(move || l.borrow_mut().push(clock.now_ms())));
                s.advance_time(300).unwrap();
            });
            assert_eq!(*log.borrow(), vec![1_250]);
            assert_eq!(s.clock().now_ms(), 1_300);
        }

        #[test]
        fn test_bootstrap_flush_keeps_intervals_in_step() {
            let s = stabilizer(&SettleConfig::default());
            let ticks = Rc::new(Cell::new(0));
            s.zone().run(|| {
                let t = Rc::clone(&ticks);
                s.zone().set_interval(10, Box::new(move || t.set(t.get() + 1)));
                s.zone().set_timeout(50, Box::new(|| {}));
                assert_eq!(s.flush_bootstrap().unwrap(), 50);
                assert_eq!(ticks.get(), 4);
                s.advance_time(10).unwrap();
            });
            assert_eq!(ticks.get(), 6);
            assert_eq!(s.zone().pending_periodic_timers(), 1);
        }

        #[test]
        fn test_flush_limit_reported() {
            let config = SettleConfig::builder().flush_limit(3).build();
            let s = stabilizer(&config);
            let zone = s.zone().clone();
            s.zone().run(|| {
                fn again(zone: FakeAsyncZone) {
                    let z = zone.clone();
                    zone.set_timeout(10, Box::new(move || again(z)));
                }
                again(zone.clone());
                let err = s.flush_pending_work(None).unwrap_err();
                assert!(matches!(err, SettleError::FlushLimitExceeded { limit: 3 }));
            });
        }

        #[test]
        fn test_flush_outside_run_is_rejected() {
            let s = stabilizer(&SettleConfig::default());
            assert!(matches!(
                s.flush_pending_work(None),
                Err(SettleError::ZoneInactive { .. })
            ));
        }
    }
}
