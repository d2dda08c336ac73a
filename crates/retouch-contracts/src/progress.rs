/// Shape of the cosmetic progress curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressCurve {
    pub decay: f64,
    pub ceiling: f64,
    pub epsilon: f64,
}

impl Default for ProgressCurve {
    fn default() -> Self {
        Self {
            decay: 0.05,
            ceiling: 95.0,
            epsilon: 0.5,
        }
    }
}

impl ProgressCurve {
    /// Clamps into a shape that stays strictly below 100 and always moves on
    /// the first tick.
    pub fn new(decay: f64, ceiling: f64, epsilon: f64) -> Self {
        let ceiling = if ceiling.is_finite() {
            ceiling.clamp(1.0, 99.0)
        } else {
            95.0
        };
        Self {
            decay: if decay.is_finite() {
                decay.clamp(0.001, 1.0)
            } else {
                0.05
            },
            ceiling,
            epsilon: if epsilon.is_finite() {
                epsilon.clamp(0.0, ceiling / 2.0)
            } else {
                0.5
            },
        }
    }

    fn step(&self, value: f64) -> f64 {
        if value >= self.ceiling - self.epsilon {
            return value;
        }
        (value + (100.0 - value) * self.decay).min(self.ceiling)
    }

    /// Value after `ticks` steps from zero.
    pub fn value_after(&self, ticks: u64) -> f64 {
        let mut value = 0.0;
        for _ in 0..ticks {
            let next = self.step(value);
            if next == value {
                break;
            }
            value = next;
        }
        value
    }
}

/// Progress signal for one pending interval. Starts at 0, creeps toward the
/// ceiling on every tick, jumps to 100 on [`ProgressEstimator::finish`].
#[derive(Debug, Clone)]
pub struct ProgressEstimator {
    curve: ProgressCurve,
    value: f64,
    ticks: u64,
    active: bool,
}

impl Default for ProgressEstimator {
    fn default() -> Self {
        Self::new(ProgressCurve::default())
    }
}

impl ProgressEstimator {
    pub fn new(curve: ProgressCurve) -> Self {
        Self {
            curve,
            value: 0.0,
            ticks: 0,
            active: false,
        }
    }

    pub fn start(&mut self) {
        self.value = 0.0;
        self.ticks = 0;
        self.active = true;
    }

    pub fn tick(&mut self) -> f64 {
        if self.active {
            self.value = self.curve.step(self.value);
            self.ticks += 1;
        }
        self.value
    }

    pub fn finish(&mut self) {
        self.active = false;
        self.value = 100.0;
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn curve(&self) -> ProgressCurve {
        self.curve
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_resets_to_zero_and_first_tick_increases() {
        let mut progress = ProgressEstimator::default();
        progress.finish();
        progress.start();
        assert_eq!(progress.value(), 0.0);
        let first = progress.tick();
        assert!(first > 0.0);
        assert!(progress.tick() > first);
    }

    #[test]
    fn value_stays_below_ceiling_while_pending() {
        let mut progress = ProgressEstimator::default();
        progress.start();
        let mut last = 0.0;
        for _ in 0..10_000 {
            let next = progress.tick();
            assert!(next >= last);
            assert!(next <= 95.0);
            last = next;
        }
        assert!(last < 100.0);
        assert!(last >= 95.0 - 0.5);
    }

    #[test]
    fn value_freezes_near_ceiling() {
        let mut progress = ProgressEstimator::default();
        progress.start();
        for _ in 0..1_000 {
            progress.tick();
        }
        let frozen = progress.value();
        progress.tick();
        assert_eq!(progress.value(), frozen);
    }

    #[test]
    fn finish_forces_hundred_and_stops_ticking() {
        let mut progress = ProgressEstimator::default();
        progress.start();
        progress.tick();
        progress.finish();
        assert_eq!(progress.value(), 100.0);
        assert_eq!(progress.tick(), 100.0);
        assert!(!progress.is_active());
    }

    #[test]
    fn ticking_matches_pure_curve() {
        let curve = ProgressCurve::default();
        let mut progress = ProgressEstimator::new(curve);
        progress.start();
        for _ in 0..17 {
            progress.tick();
        }
        assert_eq!(progress.value(), curve.value_after(17));
    }

    #[test]
    fn curve_clamps_out_of_range_parameters() {
        let curve = ProgressCurve::new(5.0, 150.0, f64::NAN);
        assert_eq!(curve.decay, 1.0);
        assert_eq!(curve.ceiling, 99.0);
        assert_eq!(curve.epsilon, 0.5);
        assert!(curve.value_after(100) < 100.0);
    }
}
