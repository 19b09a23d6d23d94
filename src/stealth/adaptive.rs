//! Adaptive delay learning
//!
//! Emitted delays are remembered and new delays are pulled toward their
//! mean, so delay generation depends on what came before.

use std::collections::VecDeque;

use super::HumanizationLevel;

/// Number of past delays kept for the running mean
pub const HISTORY_SIZE: usize = 100;

/// Bounded history of emitted delays
#[derive(Debug, Clone, Default)]
pub struct AdaptiveDelayTracker {
    history: VecDeque<i64>,
}

impl AdaptiveDelayTracker {
    pub fn new() -> Self {
        Self {
            history: VecDeque::with_capacity(HISTORY_SIZE),
        }
    }

    /// Blend `delay` toward the historical mean and record the result
    pub fn adjust(&mut self, delay: i64, level: HumanizationLevel) -> i64 {
        if self.history.len() >= HISTORY_SIZE {
            self.history.pop_front();
        }

        let adjusted = match level {
            HumanizationLevel::None => delay,
            _ => {
                let mean = self.mean().unwrap_or(delay as f64);
                let blend = level.blend_factor();
                (delay as f64 * (1.0 - blend) + mean * blend) as i64
            }
        };

        self.history.push_back(adjusted);
        adjusted
    }

    /// Mean of the remembered delays
    pub fn mean(&self) -> Option<f64> {
        if self.history.is_empty() {
            return None;
        }
        Some(self.history.iter().sum::<i64>() as f64 / self.history.len() as f64)
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_delay_passes_through() {
        let mut tracker = AdaptiveDelayTracker::new();
        assert_eq!(tracker.adjust(100, HumanizationLevel::Extreme), 100);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_blends_toward_mean() {
        let mut tracker = AdaptiveDelayTracker::new();
        tracker.adjust(100, HumanizationLevel::Low);
        // 200 * 0.9 + 100 * 0.1
        assert_eq!(tracker.adjust(200, HumanizationLevel::Low), 190);
        // Level none records but does not blend
        assert_eq!(tracker.adjust(500, HumanizationLevel::None), 500);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut tracker = AdaptiveDelayTracker::new();
        for i in 0..250 {
            tracker.adjust(i, HumanizationLevel::Medium);
        }
        assert_eq!(tracker.len(), HISTORY_SIZE);
    }
}
