//! Environment abstraction for deterministic testing.
//!
//! Decouples session logic from the system clock so relay timestamps can be
//! pinned in tests. Production uses [`SystemEnv`].

/// Abstract environment providing wall-clock time.
///
/// # Invariants
///
/// - `wall_clock_secs()` is seconds since the Unix epoch
pub trait Environment: Clone + Send + 'static {
    /// Current wall-clock time as seconds since the Unix epoch.
    fn wall_clock_secs(&self) -> u64;
}

/// Production environment backed by the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    #[allow(clippy::disallowed_methods)]
    fn wall_clock_secs(&self) -> u64 {
        // A clock set before 1970 reads as the epoch itself.
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_env_reports_current_epoch_seconds() {
        let env = SystemEnv::new();

        // 2020-01-01T00:00:00Z
        assert!(env.wall_clock_secs() > 1_577_836_800);
    }

    #[test]
    fn system_env_time_does_not_go_backwards() {
        let env = SystemEnv::new();

        let t1 = env.wall_clock_secs();
        let t2 = env.wall_clock_secs();

        assert!(t2 >= t1);
    }
}
