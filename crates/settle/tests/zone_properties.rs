//! Property-based tests for virtual time.
//!
//! Uses proptest to check the timer ordering and flush invariants of the
//! fake-async zone over arbitrary delays.

use proptest::prelude::*;
use settle::zone::ZoneLimits;
use settle::{create_clock, ClockOptions, FakeAsyncZone, Scheduler};
use std::cell::Cell;
use std::rc::Rc;

fn counter() -> (Rc<Cell<u32>>, Box<dyn FnMut()>) {
    let count = Rc::new(Cell::new(0));
    let c = Rc::clone(&count);
    (count, Box::new(move || c.set(c.get() + 1)))
}

// === Tick Property Tests ===

proptest! {
    /// Ticking to `b` lands the clock at `t0 + b` and fires a one-shot at
    /// `a <= b` exactly once.
    #[test]
    fn prop_tick_fires_one_shot_once(
        a in 0u64..10_000,
        extra in 0u64..10_000,
        t0 in 0u64..1_000_000_000_000
    ) {
        let b = a + extra;
        let clock = create_clock();
        clock.install(ClockOptions::fixed(t0)).unwrap();
        let zone = FakeAsyncZone::with_options("prop", ZoneLimits::default(), Some(clock.clone()));
        let fired = Rc::new(Cell::new(0u32));
        let f = Rc::clone(&fired);
        zone.set_timeout(a, Box::new(move || f.set(f.get() + 1)));

        zone.run(|| zone.tick(b, |delta| clock.tick(delta))).unwrap();
        prop_assert_eq!(clock.now_ms(), t0 + b);
        prop_assert_eq!(fired.get(), 1);

        zone.run(|| zone.tick(b + 1, |delta| clock.tick(delta))).unwrap();
        prop_assert_eq!(fired.get(), 1, "one-shot fired twice");
    }

    /// A periodic timer with interval `i` fires `floor(E / i)` times when
    /// ticked by `E`, exact multiples included.
    #[test]
    fn prop_periodic_fires_floor_times(
        interval in 1u64..500,
        elapsed in 0u64..5_000
    ) {
        let zone = FakeAsyncZone::new("prop");
        let (count, f) = counter();
        zone.set_interval(interval, f);
        zone.run(|| zone.tick(elapsed, |_| {})).unwrap();
        prop_assert_eq!(u64::from(count.get()), elapsed / interval);
    }

    /// Once quiescent, a second flush neither advances time nor fires.
    #[test]
    fn prop_flush_idempotent(
        delays in proptest::collection::vec(0u64..1_000, 1..8),
        interval in 1u64..300
    ) {
        let zone = FakeAsyncZone::new("prop");
        let fired = Rc::new(Cell::new(0u32));
        for delay in &delays {
            let f = Rc::clone(&fired);
            zone.set_timeout(*delay, Box::new(move || f.set(f.get() + 1)));
        }
        let (ticks, f) = counter();
        zone.set_interval(interval, f);

        let first = zone.run(|| zone.flush(1_000, true, |_| {})).unwrap();
        prop_assert_eq!(fired.get() as usize, delays.len());
        prop_assert!(first >= *delays.iter().max().unwrap_or(&0));

        let snapshot = (fired.get(), ticks.get(), zone.now());
        let second = zone.run(|| zone.flush(1_000, true, |_| {})).unwrap();
        prop_assert_eq!(second, 0);
        prop_assert_eq!((fired.get(), ticks.get(), zone.now()), snapshot);
    }
}

#[test]
fn exact_multiple_fires_exactly() {
    let zone = FakeAsyncZone::new("exact");
    let (count, f) = counter();
    zone.set_interval(100, f);
    zone.run(|| zone.tick(400, |_| {})).unwrap();
    assert_eq!(count.get(), 4);
}
