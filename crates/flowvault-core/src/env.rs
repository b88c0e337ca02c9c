//! Environment abstraction for deterministic testing.
//!
//! Decouples the core from system resources (randomness, wall clock). Tests
//! inject fixed randomness to get reproducible IVs; production uses OS
//! entropy (see `SystemEnv` in the `flowvault-store` crate).

/// Abstract environment providing randomness and wall-clock time.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `random_bytes()` uses cryptographically secure entropy in production
///   (it feeds encryption IVs)
/// - `wall_clock_secs()` is Unix time in seconds; it is only used for
///   instance bookkeeping timestamps, never for crypto
pub trait Environment: Clone + Send + Sync + 'static {
    /// Fills the provided buffer with random bytes.
    ///
    /// # Invariants
    ///
    /// - Given the same RNG seed, this produces the same sequence of bytes
    /// - Uses cryptographically secure RNG in production
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Current Unix time in whole seconds.
    fn wall_clock_secs(&self) -> u64;

    /// Generates a fresh 16-byte initialization vector.
    ///
    /// Convenience wrapper over [`Environment::random_bytes`]; one IV per
    /// context write, never reused or derived from content.
    fn random_iv(&self) -> [u8; crate::envelope::IV_LENGTH] {
        let mut iv = [0u8; crate::envelope::IV_LENGTH];
        self.random_bytes(&mut iv);
        iv
    }
}
