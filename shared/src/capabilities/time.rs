use chrono::{DateTime, Utc};

/// Wall-clock source. Countdown and toast expiry read it instead of calling
/// `Utc::now()` directly.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
