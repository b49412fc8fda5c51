//! Tick scheduling for the pipeline loop.

use std::time::{Duration, Instant};

/// Decides when the next pipeline pass may begin.
pub trait Cadence {
    /// Blocks until the next tick is due.
    fn wait_for_tick(&mut self);

    /// Forgets any schedule so the next tick fires immediately.
    fn reset(&mut self);
}

/// Fixed-period cadence that never double-schedules.
///
/// When a pass overruns its period the next tick is due one full period after
/// the overrun is noticed; missed ticks are dropped rather than replayed.
#[derive(Debug, Clone)]
pub struct FixedCadence {
    period: Duration,
    next_due: Option<Instant>,
}

impl FixedCadence {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            next_due: None,
        }
    }
}

/// Deadline for the tick after one that was due at `due` and started at `now`.
fn next_deadline(due: Instant, now: Instant, period: Duration) -> Instant {
    if now > due + period {
        now + period
    } else {
        due + period
    }
}

impl Cadence for FixedCadence {
    fn wait_for_tick(&mut self) {
        let now = Instant::now();
        let due = match self.next_due {
            Some(due) if due > now => {
                std::thread::sleep(due - now);
                due
            }
            Some(due) => due,
            None => now,
        };
        let started = Instant::now();
        if started > due + self.period {
            tracing::trace!(
                "Tick overran by {:?}, skipping missed ticks",
                started - due - self.period
            );
        }
        self.next_due = Some(next_deadline(due, started, self.period));
    }

    fn reset(&mut self) {
        self.next_due = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_on_time_ticks_keep_phase() {
        let start = Instant::now();
        let period = Duration::from_millis(30);
        let now = start + Duration::from_millis(2);
        assert_eq!(next_deadline(start, now, period), start + period);
    }

    #[test]
    fn test_overrun_does_not_burst() {
        let start = Instant::now();
        let period = Duration::from_millis(30);
        let late = start + Duration::from_millis(95);
        assert_eq!(next_deadline(start, late, period), late + period);
    }

    #[test]
    fn test_fixed_cadence_waits_one_period() {
        let mut cadence = FixedCadence::new(Duration::from_millis(20));
        let begin = Instant::now();
        cadence.wait_for_tick();
        assert!(begin.elapsed() < Duration::from_millis(20));
        cadence.wait_for_tick();
        assert!(begin.elapsed() >= Duration::from_millis(20));

        cadence.reset();
        let after_reset = Instant::now();
        cadence.wait_for_tick();
        assert!(after_reset.elapsed() < Duration::from_millis(20));
    }
}
