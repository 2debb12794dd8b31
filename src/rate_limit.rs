//! Request pacing for the upstream API.
//!
//! Each configured window (`N requests per D`) becomes a `governor` direct
//! limiter that releases one request every `D / N` with no burst, so any span
//! of length `D` holds at most `N` requests. A request must clear every
//! window. Waiting goes through [`Clock::sleep`]; tests run the limiters on
//! `governor::clock::FakeRelativeClock` and never block.

use std::cmp::Reverse;
use std::num::NonZeroU32;
use std::thread;
use std::time::Duration;

use governor::Quota;
use governor::clock::{Clock as GovernorClock, DefaultClock, FakeRelativeClock};
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};

/// A `governor` clock that can also be waited on.
pub trait Clock: GovernorClock {
    fn sleep(&self, dur: Duration);
}

pub type SystemClock = DefaultClock;

impl Clock for DefaultClock {
    fn sleep(&self, dur: Duration) {
        thread::sleep(dur);
    }
}

/// Sleeping on the fake clock just moves it forward.
impl Clock for FakeRelativeClock {
    fn sleep(&self, dur: Duration) {
        self.advance(dur);
    }
}

/// Capability handed to anything that sends upstream requests.
pub trait RateLimiter {
    /// Blocks until one more request may be sent, then accounts for it.
    fn acquire(&mut self);
}

/// `requests` allowed per `per`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub requests: u32,
    pub per: Duration,
}

impl Window {
    fn interval(&self) -> Duration {
        self.per / self.requests.max(1)
    }

    fn quota(&self) -> Option<Quota> {
        Quota::with_period(self.interval()).map(|q| q.allow_burst(NonZeroU32::MIN))
    }
}

type DirectLimiter<C> =
    governor::RateLimiter<NotKeyed, InMemoryState, C, NoOpMiddleware<<C as GovernorClock>::Instant>>;

/// Paces requests against one or more windows.
pub struct Limiter<C: Clock> {
    clock: C,
    windows: Vec<DirectLimiter<C>>,
}

impl<C: Clock> Limiter<C> {
    pub fn new(clock: C, windows: &[Window]) -> Self {
        let mut ordered = windows.to_vec();
        // Slowest first: a refusal there leaves the faster windows untouched.
        ordered.sort_by_key(|w| Reverse(w.interval()));
        let windows = ordered
            .iter()
            .filter_map(Window::quota)
            .map(|quota| governor::RateLimiter::direct_with_clock(quota, &clock))
            .collect();
        Self { clock, windows }
    }

    /// A limiter that never waits.
    pub fn unlimited(clock: C) -> Self {
        Self::new(clock, &[])
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }
}

impl<C: Clock> RateLimiter for Limiter<C> {
    fn acquire(&mut self) {
        'pass: loop {
            for window in &self.windows {
                if let Err(not_until) = window.check() {
                    let wait = not_until.wait_time_from(self.clock.now());
                    self.clock.sleep(wait);
                    continue 'pass;
                }
            }
            return;
        }
    }
}

/// Time the fake clock has moved since it was created.
#[cfg(test)]
pub(crate) fn elapsed(clock: &FakeRelativeClock) -> Duration {
    Duration::from(clock.now())
}
