//! Running RTT measurements used by the gradient algorithms

/// Exponential moving average with a plain-average warm-up phase.
///
/// The first `warmup_window` samples are averaged arithmetically so the
/// estimate is not dominated by its zero starting point.
#[derive(Debug, Clone)]
pub(crate) struct ExpAvgMeasurement {
    window: usize,
    warmup_window: usize,
    count: usize,
    sum: f64,
    value: f64,
}

impl ExpAvgMeasurement {
    pub(crate) fn new(window: usize, warmup_window: usize) -> Self {
        ExpAvgMeasurement {
            window: window.max(1),
            warmup_window,
            count: 0,
            sum: 0.0,
            value: 0.0,
        }
    }

    pub(crate) fn add(&mut self, sample: f64) -> f64 {
        if self.count < self.warmup_window {
            self.count += 1;
            self.sum += sample;
            self.value = self.sum / self.count as f64;
        } else {
            let factor = 2.0 / (self.window as f64 + 1.0);
            self.value = self.value * (1.0 - factor) + sample * factor;
        }
        self.value
    }

    pub(crate) fn get(&self) -> f64 {
        self.value
    }

    pub(crate) fn update(&mut self, op: impl FnOnce(f64) -> f64) {
        self.value = op(self.value);
    }
}

/// Smallest sample seen since the last reset
#[derive(Debug, Clone, Default)]
pub(crate) struct MinimumMeasurement {
    value: Option<u64>,
}

impl MinimumMeasurement {
    pub(crate) fn add(&mut self, sample: u64) -> u64 {
        let min = match self.value {
            Some(current) if current <= sample => current,
            _ => sample,
        };
        self.value = Some(min);
        min
    }

    pub(crate) fn get(&self) -> u64 {
        self.value.unwrap_or(0)
    }

    pub(crate) fn reset(&mut self) {
        self.value = None;
    }
}
