//! Environment abstraction for deterministic testing.
//!
//! Decouples the dispatch engine and keepalive sweeper from system resources
//! (time, randomness) so both can be driven by a fake clock and seeded RNG in
//! tests, while production wiring (in `veilgate-server`) supplies real ones.

use std::time::Duration;

/// Abstract environment providing time, randomness, and async sleep.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `now()` and `wall_clock_secs()` never go backwards.
/// - `random_bytes()` uses cryptographically secure entropy in production.
/// - Methods are infallible except in exceptional circumstances (OS entropy
///   exhaustion, a misconfigured simulation clock).
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Current monotonic time.
    fn now(&self) -> Self::Instant;

    /// Current Unix time in seconds, used for identity-registry pruning
    /// (§9 of the design notes) where a wall-clock timestamp, not an
    /// opaque monotonic instant, must be persisted and compared across
    /// process restarts of the registry entry's `last_seen` field.
    fn wall_clock_secs(&self) -> u64;

    /// Sleeps for the specified duration. The only async method in the
    /// trait; driver/task code calls this, never protocol logic.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}
