//! Adaptive inter-cycle delay.
//!
//! A discrete smoother with hysteresis around a target latency: slow cycles
//! stretch the delay by 10%, fast cycles shrink it by 5%, and the result is
//! always clamped into `[floor, ceiling]`. While heightened responsiveness is
//! on, both the target latency and the floor are halved.

use std::time::Duration;

/// The floor never drops below this, even when halved.
const ABSOLUTE_FLOOR: Duration = Duration::from_millis(20);

/// Growth and decay steps, in percent of the current delay.
const GROWTH_PCT: u128 = 110;
const DECAY_PCT: u128 = 95;
const SLOW_FACTOR: f64 = 1.5;
const FAST_FACTOR: f64 = 0.5;

fn scale(d: Duration, pct: u128) -> Duration {
    let nanos = d.as_nanos() * pct / 100;
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

#[derive(Debug, Clone)]
pub struct AdaptiveDelay {
    current: Duration,
    floor: Duration,
    ceiling: Duration,
    target: Duration,
    heightened: bool,
}

impl AdaptiveDelay {
    /// `floor` and `ceiling` are swapped if given out of order.
    pub fn new(base: Duration, floor: Duration, ceiling: Duration, target: Duration) -> Self {
        let (floor, ceiling) = if floor <= ceiling {
            (floor, ceiling)
        } else {
            (ceiling, floor)
        };
        Self {
            current: base.clamp(floor, ceiling),
            floor,
            ceiling,
            target,
            heightened: false,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn floor(&self) -> Duration {
        self.floor
    }

    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    pub fn is_heightened(&self) -> bool {
        self.heightened
    }

    pub fn set_heightened(&mut self, on: bool) {
        self.heightened = on;
    }

    /// Target latency after the heightened-responsiveness adjustment.
    pub fn effective_target(&self) -> Duration {
        if self.heightened {
            self.target / 2
        } else {
            self.target
        }
    }

    /// Floor after the heightened-responsiveness adjustment.
    pub fn effective_floor(&self) -> Duration {
        if self.heightened {
            (self.floor / 2).max(ABSOLUTE_FLOOR).min(self.floor)
        } else {
            self.floor
        }
    }

    /// Feed the latest average cycle latency and return the new delay.
    pub fn adjust(&mut self, avg_latency: Duration) -> Duration {
        let target = self.effective_target().as_secs_f64();
        let floor = self.effective_floor();
        let latency = avg_latency.as_secs_f64();

        let next = if latency > target * SLOW_FACTOR {
            scale(self.current, GROWTH_PCT)
        } else if latency < target * FAST_FACTOR {
            scale(self.current, DECAY_PCT)
        } else {
            self.current
        };
        self.current = next.clamp(floor, self.ceiling);
        self.current
    }

    /// Reinitialize from a (possibly new) base delay, clamped to the bounds.
    pub fn reset(&mut self, base: Duration) {
        self.current = base.clamp(self.floor, self.ceiling);
    }

    /// Swap in new bounds and target, keeping the heightened flag. The
    /// current delay is re-clamped; callers normally follow with
    /// [`reset`](Self::reset).
    pub fn reconfigure(&mut self, floor: Duration, ceiling: Duration, target: Duration) {
        let heightened = self.heightened;
        *self = Self::new(self.current, floor, ceiling, target);
        self.heightened = heightened;
    }
}
