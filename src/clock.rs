//! Process-global logical clock.
//!
//! Every two successive calls return strictly increasing values, and
//! `update` never moves the counter backwards.

use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Inner(Mutex<i64>);

/// A cheaply-cloneable handle to a shared Lamport clock.
#[derive(Debug, Clone, Default)]
pub struct LamportClock(Arc<Inner>);

impl LamportClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the counter and return the new value.
    pub fn tick(&self) -> i64 {
        let mut counter = self.0 .0.lock();
        *counter += 1;
        *counter
    }

    /// Merge an observed remote timestamp into the counter, returning the
    /// new value. `counter = max(counter, observed) + 1`.
    pub fn update(&self, observed: i64) -> i64 {
        let mut counter = self.0 .0.lock();
        *counter = (*counter).max(observed) + 1;
        *counter
    }

    /// Current counter value, without advancing it.
    pub fn get(&self) -> i64 {
        *self.0 .0.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successive_ticks_strictly_increase() {
        let clock = LamportClock::new();
        let a = clock.tick();
        let b = clock.tick();
        assert!(b > a);
    }

    #[test]
    fn update_never_decreases_counter() {
        let clock = LamportClock::new();
        clock.tick();
        clock.tick();
        let before = clock.get();
        let after = clock.update(1);
        assert!(after > before);
        assert_eq!(after, before + 1);
    }

    #[test]
    fn update_jumps_ahead_of_larger_observed_value() {
        let clock = LamportClock::new();
        clock.tick(); // counter = 1
        let observed = 100;
        let result = clock.update(observed);
        assert_eq!(result, 101);
    }

    #[test]
    fn clone_shares_the_same_counter() {
        let clock = LamportClock::new();
        let clone = clock.clone();
        clock.tick();
        assert_eq!(clock.get(), clone.get());
    }
}
