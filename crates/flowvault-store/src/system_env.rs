//! Production Environment implementation using system time and RNG.

use flowvault_core::Environment;

/// Production environment using the system clock and cryptographic RNG.
///
/// # Security
///
/// The RNG uses getrandom, which provides OS-level cryptographic randomness
/// (e.g., /dev/urandom on Linux, `BCryptGenRandom` on Windows). It feeds
/// encryption IVs, so nothing weaker is acceptable here.
///
/// # Panics
///
/// Panics if the OS RNG fails. This is intentional: a service without
/// functioning cryptographic randomness cannot encrypt safely, and RNG
/// failure indicates OS-level problems no retry will fix.
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
    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer)
            .expect("invariant: OS RNG failure is unrecoverable - cannot encrypt without entropy");
    }

    #[allow(clippy::expect_used)]
    fn wall_clock_secs(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("invariant: system clock is after Unix epoch (1970-01-01)")
            .as_secs()
    }
}
