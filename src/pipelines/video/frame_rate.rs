// SPDX-License-Identifier: GPL-3.0-only

//! Smoothed frame-rate estimate over a trailing one-second window

use crate::backends::camera::types::Timestamp;
use crate::constants::recording::FRAME_RATE_WINDOW;
use std::collections::VecDeque;

#[derive(Debug, Default, Clone)]
pub struct FrameRateEstimator {
    window: VecDeque<Timestamp>,
    rate: f32,
}

impl FrameRateEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.rate = 0.0;
    }

    /// Record a frame and update the smoothed rate
    ///
    /// Entries older than one second before `timestamp` are evicted. The
    /// instantaneous rate is the window size and the smoothed rate moves
    /// halfway towards it.
    pub fn observe(&mut self, timestamp: Timestamp) {
        self.window.push_back(timestamp);
        let cutoff = timestamp.saturating_sub(FRAME_RATE_WINDOW);
        while self.window.front().is_some_and(|t| *t < cutoff) {
            self.window.pop_front();
        }
        let instantaneous = self.window.len() as f32;
        self.rate = (self.rate + instantaneous) / 2.0;
    }

    /// Smoothed frames per second
    pub fn rate(&self) -> f32 {
        self.rate
    }

    /// Frames in the current window
    pub fn instantaneous(&self) -> usize {
        self.window.len()
    }
}
