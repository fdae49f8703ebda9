//! Shared plumbing for the blocking primitives.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Acquires `mutex`, ignoring lock poisoning.
///
/// The critical sections in this crate only manipulate queue bookkeeping and
/// contain no user code, so a panic while holding a lock cannot leave the
/// protected state half-updated.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
pub(crate) mod test {
    use std::time::Duration;

    /// A guard holding the tracing default-subscriber registration.
    ///
    /// *Should* be held until the end of the test, to ensure that tracing
    /// messages actually make it to the fmt subscriber for the entire test.
    #[must_use]
    pub struct TestGuard {
        _x1: tracing::subscriber::DefaultGuard,
    }

    /// Initialize tracing with a default filter directive.
    ///
    /// Returns a [`TestGuard`] that must be held for the duration of the
    /// test to ensure tracing messages are correctly output.
    pub(crate) fn trace_init() -> TestGuard {
        use tracing_subscriber::{
            filter::{EnvFilter, LevelFilter},
            util::SubscriberInitExt,
        };

        let env = std::env::var("RUST_LOG").unwrap_or_default();
        let builder = EnvFilter::builder().with_default_directive(LevelFilter::INFO.into());
        let filter = if env.is_empty() {
            builder.parse("handoff_sync=debug").unwrap()
        } else {
            builder.parse_lossy(env)
        };
        let collector = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .without_time()
            .finish();

        TestGuard {
            _x1: collector.set_default(),
        }
    }

    /// A generous deadline for waits that are expected to be satisfied; long
    /// enough that a slow CI machine won't trip it, short enough that a
    /// genuinely stuck test still fails.
    pub(crate) const LONG: Duration = Duration::from_secs(30);

    #[allow(dead_code)]
    pub(crate) fn assert_send_sync<T: Send + Sync>() {}
}
