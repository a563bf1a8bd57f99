//! Deterministic [`Environment`] implementation shared by this crate's unit
//! tests, grounded in the teacher's `TestEnv` (`driver.rs`'s test module):
//! real `Instant` for simplicity, `rand`'s thread RNG for bytes, an
//! instantly-resolving `sleep`. Unlike the teacher's version this one also
//! carries a wall clock, since identity pruning needs to simulate time
//! passing without a real 30-day wait; tests exercise it by calling
//! `prune_stale` with an explicit `now_secs` rather than advancing the clock
//! through the environment.

#![cfg(test)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use veilgate_core::Environment;

#[derive(Clone)]
pub(crate) struct TestEnv {
    wall_clock_secs: Arc<AtomicU64>,
}

impl TestEnv {
    pub(crate) fn new() -> Self {
        Self { wall_clock_secs: Arc::new(AtomicU64::new(0)) }
    }
}

impl Environment for TestEnv {
    type Instant = std::time::Instant;

    #[allow(clippy::disallowed_methods)]
    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    fn wall_clock_secs(&self) -> u64 {
        self.wall_clock_secs.load(Ordering::SeqCst)
    }

    fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        async {}
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        use rand::RngCore;
        rand::rng().fill_bytes(buffer);
    }
}
