//! Production [`Environment`] implementation using system time and RNG.
//!
//! Real system time, OS cryptographic RNG, real tokio sleep. Production
//! behavior is non-deterministic; the deterministic counterpart used by
//! this crate's own unit tests lives in `test_support`.

use std::time::Duration;

use veilgate_core::Environment;

/// Production environment using system time and cryptographic RNG.
///
/// # Panics
///
/// [`Environment::random_bytes`] panics if the OS RNG fails. A gateway
/// without functioning cryptographic randomness cannot generate unguessable
/// identities or tokens and should not continue operating.
#[derive(Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    #[allow(clippy::disallowed_methods)]
    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    #[allow(clippy::disallowed_methods, clippy::expect_used)]
    fn wall_clock_secs(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("invariant: system clock is after the Unix epoch (1970-01-01)")
            .as_secs()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer)
            .expect("invariant: OS RNG failure is unrecoverable - gateway cannot operate securely");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::disallowed_methods)]
    fn time_advances() {
        let env = SystemEnv::new();
        let t1 = env.now();
        std::thread::sleep(Duration::from_millis(5));
        assert!(env.now() > t1);
    }

    #[test]
    fn random_bytes_fills_buffer() {
        let env = SystemEnv::new();
        let mut bytes = [0u8; 32];
        env.random_bytes(&mut bytes);
        assert!(bytes.iter().any(|&b| b != 0));
    }

    #[tokio::test]
    async fn wall_clock_is_plausible() {
        let env = SystemEnv::new();
        // Any time after this file was written.
        assert!(env.wall_clock_secs() > 1_700_000_000);
    }
}
