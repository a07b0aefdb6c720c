//! Sample-window smoothing around another limit
//!
//! Individual samples are collected into a window; the wrapped limit only
//! sees one aggregated sample (the window's minimum RTT, its peak in-flight
//! count, and whether anything dropped) once the window holds at least
//! `window_size` samples *and* its time span has elapsed.

use super::{AdaptiveLimit, Sample};
use crate::config::WindowConfig;
use std::mem;

#[derive(Debug, Clone)]
struct SampleWindow {
    min_rtt: u64,
    max_inflight: usize,
    sample_count: usize,
    did_drop: bool,
}

impl Default for SampleWindow {
    fn default() -> Self {
        SampleWindow {
            min_rtt: u64::MAX,
            max_inflight: 0,
            sample_count: 0,
            did_drop: false,
        }
    }
}

impl SampleWindow {
    fn add(&mut self, sample: &Sample) {
        self.min_rtt = self.min_rtt.min(sample.rtt_nanos);
        self.max_inflight = self.max_inflight.max(sample.inflight);
        self.sample_count += 1;
        self.did_drop |= sample.did_drop;
    }

    fn is_ready(&self, window_size: usize) -> bool {
        self.min_rtt < u64::MAX && self.sample_count >= window_size
    }
}

/// Windowed wrapper state
#[derive(Debug, Clone)]
pub struct WindowedLimit {
    delegate: AdaptiveLimit,
    window_size: usize,
    min_window_nanos: u64,
    max_window_nanos: u64,
    min_rtt_threshold_nanos: u64,
    next_update_nanos: u64,
    window: SampleWindow,
}

impl WindowedLimit {
    /// Wrap `delegate`
    pub fn new(delegate: AdaptiveLimit, config: &WindowConfig) -> Self {
        let min_window_nanos = config.min_window().as_nanos() as u64;
        WindowedLimit {
            delegate,
            window_size: config.window_size.max(1),
            min_window_nanos,
            max_window_nanos: (config.max_window().as_nanos() as u64).max(min_window_nanos),
            min_rtt_threshold_nanos: config.min_rtt_threshold().as_nanos() as u64,
            next_update_nanos: 0,
            window: SampleWindow::default(),
        }
    }

    /// Current ceiling of the wrapped limit
    pub fn limit(&self) -> usize {
        self.delegate.limit()
    }

    /// The wrapped limit
    pub fn delegate(&self) -> &AdaptiveLimit {
        &self.delegate
    }

    /// Samples collected in the open window
    pub fn pending_samples(&self) -> usize {
        self.window.sample_count
    }

    pub(crate) fn update(&mut self, sample: &Sample) -> usize {
        if sample.rtt_nanos < self.min_rtt_threshold_nanos {
            return self.limit();
        }

        self.window.add(sample);

        let end_nanos = sample.start_nanos.saturating_add(sample.rtt_nanos);
        if end_nanos > self.next_update_nanos && self.window.is_ready(self.window_size) {
            let window = mem::take(&mut self.window);
            let span = window
                .min_rtt
                .saturating_mul(2)
                .clamp(self.min_window_nanos, self.max_window_nanos);
            self.next_update_nanos = end_nanos.saturating_add(span);
            self.delegate.update(&Sample {
                start_nanos: sample.start_nanos,
                rtt_nanos: window.min_rtt,
                inflight: window.max_inflight,
                did_drop: window.did_drop,
            });
        }
        self.limit()
    }
}
