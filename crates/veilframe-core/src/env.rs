//! Wall clock and randomness behind a trait.
//!
//! Decouples key scheduling and stream padding from system resources (wall
//! clock, randomness). Tests drive a manual clock and a seeded RNG; production
//! uses [`SystemEnv`].

/// Abstract environment providing wall-clock time and randomness.
///
/// Rotation periods are defined on wall-clock time shared with the peer, so
/// unlike a monotonic clock this one may jump. Callers read it once and pass
/// the value into the key manager.
///
/// # Safety
///
/// Production implementations must draw `random_bytes` from a
/// cryptographically secure source. Padding lengths are taken from it, and a
/// predictable source leaks record sizes.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Milliseconds since the Unix epoch.
    fn wall_clock_millis(&self) -> u64;

    /// Overwrites `buffer` with fresh random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// A uniformly random `u64`.
    fn random_u64(&self) -> u64 {
        let mut word = [0u8; 8];
        self.random_bytes(&mut word);
        u64::from_be_bytes(word)
    }
}

/// Production environment using the system clock and the OS RNG.
///
/// # Panics
///
/// Panics if the OS RNG fails. Without working randomness padding lengths
/// become predictable and the process cannot operate securely.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// The process-wide system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    #[allow(clippy::disallowed_methods, reason = "SystemEnv is the wall-clock source")]
    fn wall_clock_millis(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_millis() as u64)
    }

    #[allow(clippy::expect_used, reason = "no secure fallback exists")]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer)
            .expect("invariant: OS RNG failure is unrecoverable - cannot pad securely");
    }
}
