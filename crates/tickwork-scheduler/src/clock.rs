use chrono::{DateTime, Utc};
use chrono_tz::Tz;

/// Source of the current instant plus timezone resolution.
///
/// The engine never calls `Utc::now()` directly so tests can drive time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Express `instant` in the IANA zone `timezone`; `None` for an unknown zone.
    fn to_zoned(&self, instant: DateTime<Utc>, timezone: &str) -> Option<DateTime<Tz>> {
        let tz: Tz = timezone.parse().ok()?;
        Some(instant.with_timezone(&tz))
    }
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that advances with the Tokio timer instead of the OS clock.
///
/// Under `tokio::time::pause()` it stands still and jumps exactly as far as
/// the runtime auto-advances, which makes timing deterministic in tests and
/// simulations.
#[derive(Debug, Clone)]
pub struct TokioClock {
    base: DateTime<Utc>,
    origin: tokio::time::Instant,
}

impl TokioClock {
    /// Anchor at the current wall time.
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(base: DateTime<Utc>) -> Self {
        Self {
            base,
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.origin.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.base + elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn to_zoned_shifts_wall_time() {
        let instant = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap();
        let zoned = SystemClock.to_zoned(instant, "Asia/Tokyo").unwrap();
        assert_eq!(zoned.hour(), 21);
        assert_eq!(zoned.with_timezone(&Utc), instant);
    }

    #[test]
    fn to_zoned_rejects_unknown_zone() {
        assert!(SystemClock.to_zoned(Utc::now(), "Mars/Olympus").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_clock_follows_paused_time() {
        let base = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        let clock = TokioClock::starting_at(base);
        assert_eq!(clock.now(), base);
        tokio::time::sleep(std::time::Duration::from_secs(90)).await;
        assert_eq!(clock.now(), base + chrono::Duration::seconds(90));
    }
}
