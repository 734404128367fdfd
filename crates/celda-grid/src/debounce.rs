// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::time::{Duration, Instant};

/// Trailing-edge debounce over an explicit clock. Each `push` replaces the
/// pending value and restarts the window; `poll` yields the last value once the
/// window has elapsed without further pushes.
#[derive(Debug, Clone)]
pub struct Debounce<T> {
    delay: Duration,
    pending: Option<(T, Instant)>,
}

impl<T> Debounce<T> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn push(&mut self, value: T, now: Instant) {
        self.pending = Some((value, now + self.delay));
    }

    pub fn poll(&mut self, now: Instant) -> Option<T> {
        match &self.pending {
            Some((_, deadline)) if now >= *deadline => self.pending.take().map(|(value, _)| value),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(_, deadline)| *deadline)
    }

    pub fn cancel(&mut self) -> Option<T> {
        self.pending.take().map(|(value, _)| value)
    }
}

#[cfg(test)]
mod tests {
    use super::Debounce;
    use std::time::{Duration, Instant};

    #[test]
    fn coalesces_pushes_inside_the_window() {
        let start = Instant::now();
        let mut debounce = Debounce::new(Duration::from_millis(250));

        debounce.push(1, start);
        debounce.push(2, start + Duration::from_millis(200));
        assert_eq!(debounce.poll(start + Duration::from_millis(300)), None);
        assert_eq!(debounce.poll(start + Duration::from_millis(450)), Some(2));
        assert_eq!(debounce.poll(start + Duration::from_millis(900)), None);
    }

    #[test]
    fn cancel_drops_pending_value() {
        let start = Instant::now();
        let mut debounce = Debounce::new(Duration::from_millis(10));
        debounce.push("x", start);
        assert_eq!(debounce.cancel(), Some("x"));
        assert!(!debounce.is_pending());
        assert_eq!(debounce.poll(start + Duration::from_secs(1)), None);
    }
}
