use std::time::Duration;

use tracing::trace;

/// Pauses the current task
pub trait Sleeper: Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        trace!("Sleeping {:.1}s", duration.as_secs_f64());
        std::thread::sleep(duration);
    }
}
