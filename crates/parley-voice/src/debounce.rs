//! Single-slot debouncer driven by `tokio::time`.
//!
//! Scheduling replaces any pending value and restarts the quiet period, so N
//! schedules inside one window produce exactly one elapse carrying the last value.

use std::time::Duration;
use tokio::time::{sleep_until, Instant};

#[derive(Debug)]
struct Pending<T> {
    deadline: Instant,
    value: T,
}

#[derive(Debug)]
pub struct Debouncer<T> {
    delay: Duration,
    pending: Option<Pending<T>>,
}

impl<T> Debouncer<T> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    /// Arm (or re-arm) with `value`; the deadline moves to now + delay.
    pub fn schedule(&mut self, value: T) {
        self.pending = Some(Pending {
            deadline: Instant::now() + self.delay,
            value,
        });
    }

    /// Disarm and return the value that would have fired.
    pub fn cancel(&mut self) -> Option<T> {
        self.pending.take().map(|p| p.value)
    }

    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }

    /// Wait for the current deadline and take its value.
    ///
    /// Pends forever while disarmed, which keeps it usable as a `select!` branch.
    /// Cancel-safe: dropping the future before the deadline leaves the value in place.
    pub async fn elapsed(&mut self) -> T {
        loop {
            match self.pending.as_ref() {
                Some(pending) => {
                    sleep_until(pending.deadline).await;
                    if let Some(pending) = self.pending.take() {
                        return pending.value;
                    }
                }
                None => std::future::pending::<()>().await,
            }
        }
    }
}
