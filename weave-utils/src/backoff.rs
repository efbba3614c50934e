//
// Copyright (c) The Weave Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::time::{Duration, Instant};

// Exponential backoff tracker.
//
// Errors double the backoff period up to the configured maximum;
// a success resets it. Used to debounce bursts of topology updates
// before triggering an expensive recomputation.
#[derive(Debug)]
pub struct ExponentialBackoff {
    initial: Duration,
    maximum: Duration,
    current: Duration,
    last_error_time: Option<Instant>,
}

// ===== impl ExponentialBackoff =====

impl ExponentialBackoff {
    pub fn new(initial: Duration, maximum: Duration) -> ExponentialBackoff {
        assert!(initial <= maximum);
        ExponentialBackoff {
            initial,
            maximum,
            current: Duration::ZERO,
            last_error_time: None,
        }
    }

    // Registers an error, growing the backoff period.
    pub fn report_error(&mut self) {
        self.last_error_time = Some(Instant::now());
        if self.current.is_zero() {
            self.current = self.initial;
        } else {
            self.current = std::cmp::min(self.current * 2, self.maximum);
        }
    }

    // Registers a success, resetting the backoff.
    pub fn report_success(&mut self) {
        self.current = Duration::ZERO;
        self.last_error_time = None;
    }

    pub fn at_max_backoff(&self) -> bool {
        self.current >= self.maximum
    }

    // Returns how long to wait before retrying, measured from the last
    // reported error.
    pub fn time_remaining_until_retry(&self) -> Duration {
        match self.last_error_time {
            Some(last) => (last + self.current)
                .saturating_duration_since(Instant::now()),
            None => Duration::ZERO,
        }
    }
}

// ===== unit tests =====
