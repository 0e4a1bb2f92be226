//! Time-based hysteresis over boolean conditions
//!
//! A condition only counts once it has held, unchanged, for a wait duration.
//! A fresh flip never satisfies anything, whatever its value.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A value plus the moment it last *changed*
///
/// Re-observing the same value does not move `last_changed`; that timestamp is
/// what the gate measures stability against. `None` means the value has not
/// changed since the condition was created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeStampedCondition<T> {
    value: T,
    last_changed: Option<DateTime<Utc>>,
}

impl<T: PartialEq> TimeStampedCondition<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            last_changed: None,
        }
    }

    /// Condition whose value changed at `at`
    pub fn changed_at(value: T, at: DateTime<Utc>) -> Self {
        Self {
            value,
            last_changed: Some(at),
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn last_changed(&self) -> Option<DateTime<Utc>> {
        self.last_changed
    }

    /// Record an observation; returns whether the value flipped
    pub fn update(&mut self, value: T, now: DateTime<Utc>) -> bool {
        if self.value == value {
            return false;
        }
        self.value = value;
        self.last_changed = Some(now);
        true
    }
}

impl<T: PartialEq + Default> Default for TimeStampedCondition<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Outcome of a hysteresis check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateResult {
    pub fulfilled: bool,
    /// When the condition becomes stable, if it is not yet
    pub relevant_at: Option<DateTime<Utc>>,
}

/// Has `condition` held `expected` unchanged for longer than `wait` as of `now`?
///
/// `last_changed == now - wait` is still unstable; stability is strict.
pub fn is_relevant_and_fulfilled<T: PartialEq>(
    condition: &TimeStampedCondition<T>,
    now: DateTime<Utc>,
    wait: Duration,
    expected: &T,
) -> GateResult {
    let stable = GateResult {
        fulfilled: condition.value == *expected,
        relevant_at: None,
    };
    let Some(last_changed) = condition.last_changed else {
        return stable;
    };
    if last_changed < now - wait {
        return stable;
    }
    GateResult {
        fulfilled: false,
        relevant_at: Some(last_changed + wait),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, h, m, s).unwrap()
    }

    #[test]
    fn never_changed_is_stable() {
        let c = TimeStampedCondition::new(true);
        let r = is_relevant_and_fulfilled(&c, at(10, 0, 0), Duration::minutes(10), &true);
        assert!(r.fulfilled);
        assert_eq!(r.relevant_at, None);

        let r = is_relevant_and_fulfilled(&c, at(10, 0, 0), Duration::minutes(10), &false);
        assert!(!r.fulfilled);
        assert_eq!(r.relevant_at, None);
    }

    #[test]
    fn recent_change_is_pending() {
        let c = TimeStampedCondition::changed_at(true, at(10, 0, 0));
        let r = is_relevant_and_fulfilled(&c, at(10, 5, 0), Duration::minutes(10), &true);
        assert!(!r.fulfilled);
        assert_eq!(r.relevant_at, Some(at(10, 10, 0)));
    }

    #[test]
    fn recent_change_never_fulfils_even_the_other_value() {
        let c = TimeStampedCondition::changed_at(false, at(10, 0, 0));
        let r = is_relevant_and_fulfilled(&c, at(10, 5, 0), Duration::minutes(10), &false);
        assert!(!r.fulfilled);
    }

    #[test]
    fn boundary_is_strict() {
        let c = TimeStampedCondition::changed_at(true, at(10, 0, 0));
        let wait = Duration::minutes(10);

        let exact = is_relevant_and_fulfilled(&c, at(10, 10, 0), wait, &true);
        assert!(!exact.fulfilled);
        assert_eq!(exact.relevant_at, Some(at(10, 10, 0)));

        let after = at(10, 10, 0) + Duration::microseconds(1);
        let r = is_relevant_and_fulfilled(&c, after, wait, &true);
        assert!(r.fulfilled);
        assert_eq!(r.relevant_at, None);
    }

    #[test]
    fn stays_stable_for_later_times() {
        let c = TimeStampedCondition::changed_at(true, at(10, 0, 0));
        let wait = Duration::minutes(10);
        for minutes in [11, 15, 60, 600] {
            let now = at(10, 0, 0) + Duration::minutes(minutes);
            assert!(is_relevant_and_fulfilled(&c, now, wait, &true).fulfilled);
        }
    }

    #[test]
    fn update_only_moves_timestamp_on_change() {
        let mut c = TimeStampedCondition::new(false);
        assert!(!c.update(false, at(9, 0, 0)));
        assert_eq!(c.last_changed(), None);

        assert!(c.update(true, at(9, 1, 0)));
        assert_eq!(c.last_changed(), Some(at(9, 1, 0)));

        assert!(!c.update(true, at(9, 2, 0)));
        assert_eq!(c.last_changed(), Some(at(9, 1, 0)));
        assert!(*c.value());
    }
}
