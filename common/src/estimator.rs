// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Minimum UDP question size estimation.
//
// DNSCrypt resolvers never answer over UDP with a response larger than the
// question, so questions are padded to at least the size of the responses
// we expect. The estimator grows the minimum when responses come back
// truncated and lets it settle back towards observed response sizes.

use parking_lot::RwLock;
use tracing::debug;

use crate::protocol::MAX_DNS_UDP_PACKET_SIZE;

/// Starting minimum question size (bytes).
pub const INITIAL_MIN_QUESTION_SIZE: usize = 512;

/// Moving average smoothing factor (30-sample window).
const EWMA_DECAY: f64 = 2.0 / (30.0 + 1.0);

/// Source of the minimum safe question size for UDP queries.
pub trait QuestionSizeEstimator: Send + Sync {
    fn min_question_size(&self) -> usize;
}

/// Estimator driven by the outcome of UDP exchanges.
#[derive(Debug)]
pub struct AdaptiveSizeEstimator {
    state: RwLock<EstimatorState>,
}

#[derive(Debug)]
struct EstimatorState {
    min_question_size: usize,
    average: f64,
}

impl AdaptiveSizeEstimator {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(EstimatorState {
                min_question_size: INITIAL_MIN_QUESTION_SIZE,
                average: INITIAL_MIN_QUESTION_SIZE as f64,
            }),
        }
    }

    /// A UDP exchange timed out or came back truncated: double the minimum.
    pub fn blind_adjust(&self) {
        let mut state = self.state.write();
        state.min_question_size = if MAX_DNS_UDP_PACKET_SIZE - state.min_question_size
            < state.min_question_size
        {
            MAX_DNS_UDP_PACKET_SIZE
        } else {
            state.min_question_size * 2
        };
        state.average = state.min_question_size as f64;
        debug!(min_question_size = state.min_question_size, "blind question size adjustment");
    }

    /// A UDP response frame of `response_size` bytes arrived intact.
    pub fn adjust(&self, response_size: usize) {
        let mut state = self.state.write();
        state.average += EWMA_DECAY * (response_size as f64 - state.average);
        let min = (state.average.ceil() as usize)
            .clamp(INITIAL_MIN_QUESTION_SIZE, MAX_DNS_UDP_PACKET_SIZE);
        if min != state.min_question_size {
            debug!(from = state.min_question_size, to = min, "question size adjusted");
            state.min_question_size = min;
        }
    }
}

impl Default for AdaptiveSizeEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl QuestionSizeEstimator for AdaptiveSizeEstimator {
    fn min_question_size(&self) -> usize {
        self.state.read().min_question_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_initial_size() {
        assert_eq!(AdaptiveSizeEstimator::new().min_question_size(), INITIAL_MIN_QUESTION_SIZE);
    }

    #[test]
    fn blind_adjust_doubles_then_clamps() {
        let estimator = AdaptiveSizeEstimator::new();
        estimator.blind_adjust();
        assert_eq!(estimator.min_question_size(), 1024);
        estimator.blind_adjust();
        assert_eq!(estimator.min_question_size(), 2048);
        estimator.blind_adjust();
        assert_eq!(estimator.min_question_size(), 4096);
        estimator.blind_adjust();
        assert_eq!(estimator.min_question_size(), MAX_DNS_UDP_PACKET_SIZE);
    }

    #[test]
    fn small_responses_never_go_below_initial() {
        let estimator = AdaptiveSizeEstimator::new();
        for _ in 0..100 {
            estimator.adjust(64);
        }
        assert_eq!(estimator.min_question_size(), INITIAL_MIN_QUESTION_SIZE);
    }

    #[test]
    fn settles_back_after_blind_adjust() {
        let estimator = AdaptiveSizeEstimator::new();
        estimator.blind_adjust();
        estimator.blind_adjust();
        assert_eq!(estimator.min_question_size(), 2048);

        for _ in 0..200 {
            estimator.adjust(700);
        }
        let min = estimator.min_question_size();
        assert!((700..=710).contains(&min), "min = {min}");
    }

    #[test]
    fn large_responses_raise_minimum() {
        let estimator = AdaptiveSizeEstimator::new();
        estimator.adjust(1500);
        let first = estimator.min_question_size();
        assert!(first > INITIAL_MIN_QUESTION_SIZE && first < 1500);
        for _ in 0..200 {
            estimator.adjust(1500);
        }
        assert!(estimator.min_question_size() >= 1499);
    }
}
