use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use tickwork_core::config::{DEFAULT_FALLBACK_INTERVAL_SECS, DEFAULT_TIMEZONE};
use tracing::warn;

use crate::error::{Result, SchedulerError};
use crate::types::TimezonePolicy;

/// A parsed schedule spec.
#[derive(Debug, Clone)]
pub enum Schedule {
    /// Fire every N seconds (spec is a bare positive integer).
    Interval { every_secs: u64 },
    /// Cron expression, seconds-resolution.
    Cron(Box<cron::Schedule>),
}

impl Schedule {
    /// Parse `spec` as an interval literal, falling back to cron grammar.
    ///
    /// Five-field cron (`min hour dom mon dow`) is accepted and fires at
    /// second zero.
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        if let Ok(every_secs) = spec.parse::<u64>() {
            if every_secs == 0 {
                return Err(SchedulerError::InvalidSchedule(
                    "interval must be at least one second".to_string(),
                ));
            }
            return Ok(Schedule::Interval { every_secs });
        }

        let expr = if spec.split_whitespace().count() == 5 {
            format!("0 {spec}")
        } else {
            spec.to_string()
        };
        cron::Schedule::from_str(&expr)
            .map(|s| Schedule::Cron(Box::new(s)))
            .map_err(|e| SchedulerError::InvalidSchedule(format!("{spec:?}: {e}")))
    }

    /// First fire strictly after `reference`, evaluated in `tz`.
    fn next_after(&self, reference: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Interval { every_secs } => {
                let step = Duration::try_seconds(i64::try_from(*every_secs).ok()?)?;
                reference.checked_add_signed(step)
            }
            Schedule::Cron(schedule) => schedule
                .after(&reference.with_timezone(&tz))
                .next()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

/// Pure next-fire computation plus the fallback policy for bad specs.
#[derive(Debug, Clone)]
pub struct ScheduleCalculator {
    fallback: Duration,
    default_timezone: Tz,
}

impl ScheduleCalculator {
    /// `default_timezone` applies to local-time policies that name no zone;
    /// an unknown name degrades to UTC.
    pub fn new(fallback_interval_secs: u64, default_timezone: &str) -> Self {
        let default_timezone = default_timezone.parse().unwrap_or_else(|_| {
            warn!(timezone = %default_timezone, "unknown default timezone, using UTC");
            Tz::UTC
        });
        let fallback = i64::try_from(fallback_interval_secs.max(1))
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or_else(|| {
                warn!(
                    fallback_secs = fallback_interval_secs,
                    "fallback interval out of range, using default"
                );
                Duration::seconds(DEFAULT_FALLBACK_INTERVAL_SECS as i64)
            });
        Self {
            fallback,
            default_timezone,
        }
    }

    pub fn fallback(&self) -> Duration {
        self.fallback
    }

    /// Compute the next fire instant after `reference`.
    ///
    /// With `use_local_time` the rule is applied to the reference's wall time
    /// in the policy's zone and converted back; otherwise UTC is used.
    pub fn next_fire(
        &self,
        spec: &str,
        policy: &TimezonePolicy,
        reference: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let schedule = Schedule::parse(spec)?;
        schedule
            .next_after(reference, self.frame(policy))
            .ok_or_else(|| SchedulerError::InvalidSchedule(format!("{spec:?} never fires again")))
    }

    /// Like [`next_fire`](Self::next_fire) but never fails: an invalid spec
    /// yields `reference + fallback` and a warning.
    pub fn next_fire_or_fallback(
        &self,
        spec: &str,
        policy: &TimezonePolicy,
        reference: DateTime<Utc>,
    ) -> DateTime<Utc> {
        self.next_fire(spec, policy, reference).unwrap_or_else(|e| {
            warn!(
                error = %e,
                fallback_secs = self.fallback.num_seconds(),
                "using fallback interval"
            );
            reference
                .checked_add_signed(self.fallback)
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        })
    }

    fn frame(&self, policy: &TimezonePolicy) -> Tz {
        if !policy.use_local_time {
            return Tz::UTC;
        }
        if policy.timezone.is_empty() {
            return self.default_timezone;
        }
        policy.timezone.parse().unwrap_or_else(|_| {
            warn!(timezone = %policy.timezone, "unknown timezone, evaluating in UTC");
            Tz::UTC
        })
    }
}

impl Default for ScheduleCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_FALLBACK_INTERVAL_SECS, DEFAULT_TIMEZONE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn interval_adds_seconds() {
        let calc = ScheduleCalculator::default();
        let now = at(2026, 3, 1, 10, 0, 0);
        let next = calc.next_fire("5", &TimezonePolicy::utc(), now).unwrap();
        assert_eq!(next, now + Duration::seconds(5));
    }

    #[test]
    fn interval_is_frame_independent() {
        let calc = ScheduleCalculator::default();
        let now = at(2026, 3, 1, 10, 0, 0);
        let next = calc
            .next_fire("90", &TimezonePolicy::local("America/New_York"), now)
            .unwrap();
        assert_eq!(next, now + Duration::seconds(90));
    }

    #[test]
    fn deterministic_for_identical_inputs() {
        let calc = ScheduleCalculator::default();
        let now = at(2026, 7, 4, 23, 59, 59);
        let policy = TimezonePolicy::local("Europe/Berlin");
        let a = calc.next_fire("0 0 9 * * *", &policy, now).unwrap();
        let b = calc.next_fire("0 0 9 * * *", &policy, now).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn cron_in_utc_ignores_timezone_field() {
        let calc = ScheduleCalculator::default();
        let now = at(2026, 1, 10, 8, 0, 0);
        let policy = TimezonePolicy {
            use_local_time: false,
            timezone: "Asia/Tokyo".to_string(),
        };
        let next = calc.next_fire("0 0 9 * * *", &policy, now).unwrap();
        assert_eq!(next, at(2026, 1, 10, 9, 0, 0));
    }

    #[test]
    fn cron_in_local_time_converts_back_to_utc() {
        let calc = ScheduleCalculator::default();
        // 08:00 UTC is 17:00 in Tokyo; next 09:00 Tokyo is 00:00 UTC next day.
        let now = at(2026, 1, 10, 8, 0, 0);
        let next = calc
            .next_fire("0 0 9 * * *", &TimezonePolicy::local("Asia/Tokyo"), now)
            .unwrap();
        assert_eq!(next, at(2026, 1, 11, 0, 0, 0));
    }

    #[test]
    fn five_field_cron_fires_on_second_zero() {
        let calc = ScheduleCalculator::default();
        let now = at(2026, 1, 10, 8, 7, 30);
        let next = calc.next_fire("*/15 * * * *", &TimezonePolicy::utc(), now).unwrap();
        assert_eq!(next, at(2026, 1, 10, 8, 15, 0));
    }

    #[test]
    fn unparsable_spec_is_typed_error() {
        let calc = ScheduleCalculator::default();
        let err = calc
            .next_fire("not-a-number", &TimezonePolicy::utc(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSchedule(_)));
        assert!(!err.is_persistence());
    }

    #[test]
    fn zero_interval_is_rejected() {
        assert!(Schedule::parse("0").is_err());
    }

    #[test]
    fn fallback_is_sixty_seconds_by_default() {
        let calc = ScheduleCalculator::default();
        let now = at(2026, 5, 5, 5, 5, 5);
        let next = calc.next_fire_or_fallback("not-a-number", &TimezonePolicy::utc(), now);
        assert_eq!(next, now + Duration::seconds(60));
    }

    #[test]
    fn overflowing_interval_uses_fallback() {
        let calc = ScheduleCalculator::default();
        let now = at(2026, 5, 5, 5, 5, 5);
        let err = calc
            .next_fire("99999999999999", &TimezonePolicy::utc(), now)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSchedule(_)));
        let next = calc.next_fire_or_fallback("99999999999999", &TimezonePolicy::utc(), now);
        assert_eq!(next, now + Duration::seconds(60));
        // above i64::MAX seconds
        let next = calc.next_fire_or_fallback("18446744073709551615", &TimezonePolicy::utc(), now);
        assert_eq!(next, now + Duration::seconds(60));
    }

    #[test]
    fn out_of_range_fallback_is_replaced_by_default() {
        let calc = ScheduleCalculator::new(u64::MAX, "UTC");
        assert_eq!(calc.fallback(), Duration::seconds(60));
        let calc = ScheduleCalculator::new(10_000_000_000_000_000, "UTC");
        assert_eq!(calc.fallback(), Duration::seconds(60));

        // representable as a duration, but past the last representable instant
        let calc = ScheduleCalculator::new(9_000_000_000_000_000, "UTC");
        let now = at(2026, 5, 5, 5, 5, 5);
        let next = calc.next_fire_or_fallback("bogus", &TimezonePolicy::utc(), now);
        assert_eq!(next, DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn fallback_honours_configured_interval() {
        let calc = ScheduleCalculator::new(15, "UTC");
        let now = at(2026, 5, 5, 5, 5, 5);
        let next = calc.next_fire_or_fallback("@@bogus@@", &TimezonePolicy::utc(), now);
        assert_eq!(next, now + Duration::seconds(15));
    }

    #[test]
    fn unknown_timezone_evaluates_in_utc() {
        let calc = ScheduleCalculator::default();
        let now = at(2026, 1, 10, 8, 0, 0);
        let next = calc
            .next_fire("0 0 9 * * *", &TimezonePolicy::local("Nowhere/Special"), now)
            .unwrap();
        assert_eq!(next, at(2026, 1, 10, 9, 0, 0));
    }

    #[test]
    fn empty_timezone_uses_configured_default() {
        let calc = ScheduleCalculator::new(60, "Asia/Tokyo");
        let now = at(2026, 1, 10, 8, 0, 0);
        let next = calc
            .next_fire("0 0 9 * * *", &TimezonePolicy::local(""), now)
            .unwrap();
        assert_eq!(next, at(2026, 1, 11, 0, 0, 0));
    }
}
