//! Uptime/downtime extrapolation for a single location.
//!
//! Each business-hour window is treated as one sampled hour: the share of
//! `active` polls whose local clock time falls inside the window is spread
//! over 60 minutes, then scaled by the window's length to a day and a week.
//! Sample dates are ignored; only the local time-of-day is compared.

use crate::config::MidnightWindows;
use crate::db::{BusinessHourWindow, LocationMetrics, SampleStatus, StatusSample};

use chrono::NaiveTime;
use chrono_tz::Tz;
use thiserror::Error;

const SECONDS_PER_DAY: i64 = 86_400;

/// Errors raised while computing one location's metrics.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtrapolateError {
    #[error("unknown timezone: {0}")]
    UnknownTimezone(String),
    #[error("invalid business-hour window {start}-{end}: zero duration")]
    InvalidWindow { start: NaiveTime, end: NaiveTime },
}

#[derive(Debug, Default)]
struct Totals {
    uptime_hour: f64,
    downtime_hour: f64,
    uptime_day: f64,
    downtime_day: f64,
    uptime_week: f64,
    downtime_week: f64,
}

/// Compute the six metrics for one location.
///
/// Windows without any matching sample are skipped. A matched window of zero
/// length is an error rather than a division by zero.
pub fn extrapolate(
    location_id: &str,
    samples: &[StatusSample],
    windows: &[BusinessHourWindow],
    timezone: &str,
    midnight: MidnightWindows,
) -> Result<LocationMetrics, ExtrapolateError> {
    let tz: Tz = timezone
        .parse()
        .map_err(|_| ExtrapolateError::UnknownTimezone(timezone.to_string()))?;

    let local: Vec<(NaiveTime, SampleStatus)> = samples
        .iter()
        .map(|s| (s.timestamp.with_timezone(&tz).time(), s.status))
        .collect();

    let mut totals = Totals::default();

    for window in windows {
        let (start, end) = (window.start, window.end);
        let wraps = end < start && midnight == MidnightWindows::Wrap;

        let matched: Vec<SampleStatus> = local
            .iter()
            .filter(|(t, _)| {
                if wraps {
                    *t >= start || *t <= end
                } else {
                    start <= *t && *t <= end
                }
            })
            .map(|(_, status)| *status)
            .collect();

        if matched.is_empty() {
            continue;
        }

        let mut seconds = end.signed_duration_since(start).num_seconds();
        if wraps {
            seconds += SECONDS_PER_DAY;
        }
        if seconds == 0 {
            return Err(ExtrapolateError::InvalidWindow { start, end });
        }
        let window_hours = seconds as f64 / 3600.0;

        let total = matched.len() as f64;
        let active = matched.iter().filter(|s| **s == SampleStatus::Active).count() as f64;
        let inactive = matched.iter().filter(|s| **s == SampleStatus::Inactive).count() as f64;

        // minutes within the sampled hour
        let uptime = active * 60.0 / total;
        let downtime = inactive * 60.0 / total;

        totals.uptime_hour += uptime;
        totals.downtime_hour += downtime;
        totals.uptime_day += uptime / window_hours * 24.0;
        totals.downtime_day += downtime / window_hours * 24.0;
        totals.uptime_week += uptime / window_hours * 24.0 * 7.0;
        totals.downtime_week += downtime / window_hours * 24.0 * 7.0;
    }

    Ok(LocationMetrics {
        location_id: location_id.to_string(),
        uptime_last_hour: round2(totals.uptime_hour),
        downtime_last_hour: round2(totals.downtime_hour),
        uptime_last_day: round2(totals.uptime_day),
        downtime_last_day: round2(totals.downtime_day),
        uptime_last_week: round2(totals.uptime_week),
        downtime_last_week: round2(totals.downtime_week),
    })
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, 24, h, m, 0).unwrap()
    }

    fn sample(ts: DateTime<Utc>, status: SampleStatus) -> StatusSample {
        StatusSample {
            location_id: "1".to_string(),
            timestamp: ts,
            status,
        }
    }

    fn window(start: (u32, u32), end: (u32, u32)) -> BusinessHourWindow {
        BusinessHourWindow {
            location_id: "1".to_string(),
            start: NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
            end: NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
        }
    }

    fn run(samples: &[StatusSample], windows: &[BusinessHourWindow]) -> LocationMetrics {
        extrapolate("1", samples, windows, "UTC", MidnightWindows::Ignore).unwrap()
    }

    #[test]
    fn test_all_active_hour() {
        let samples: Vec<_> = (0..6)
            .map(|i| sample(at(9, i * 10), SampleStatus::Active))
            .collect();
        let m = run(&samples, &[window((9, 0), (10, 0))]);

        assert_eq!(m.location_id, "1");
        assert_eq!(m.uptime_last_hour, 60.0);
        assert_eq!(m.downtime_last_hour, 0.0);
        assert_eq!(m.uptime_last_day, 1440.0);
        assert_eq!(m.downtime_last_day, 0.0);
        assert_eq!(m.uptime_last_week, 10080.0);
        assert_eq!(m.downtime_last_week, 0.0);
    }

    #[test]
    fn test_half_active_hour() {
        let samples: Vec<_> = (0..8)
            .map(|i| {
                let status = if i % 2 == 0 { SampleStatus::Active } else { SampleStatus::Inactive };
                sample(at(9, i * 7), status)
            })
            .collect();
        let m = run(&samples, &[window((9, 0), (10, 0))]);

        assert_eq!(m.uptime_last_hour, 30.0);
        assert_eq!(m.downtime_last_hour, 30.0);
        assert_eq!(m.uptime_last_day, 720.0);
        assert_eq!(m.downtime_last_week, 5040.0);
    }

    #[test]
    fn test_samples_outside_window_are_excluded() {
        let samples = vec![
            sample(at(8, 59), SampleStatus::Inactive),
            sample(at(9, 0), SampleStatus::Active),
            sample(at(10, 0), SampleStatus::Active),
            sample(at(10, 1), SampleStatus::Inactive),
        ];
        let m = run(&samples, &[window((9, 0), (10, 0))]);
        assert_eq!(m.uptime_last_hour, 60.0);
        assert_eq!(m.downtime_last_hour, 0.0);
    }

    #[test]
    fn test_sample_date_is_ignored() {
        let other_day = Utc.with_ymd_and_hms(2023, 1, 18, 9, 30, 0).unwrap();
        let samples = vec![
            sample(at(9, 15), SampleStatus::Active),
            sample(other_day, SampleStatus::Inactive),
        ];
        let m = run(&samples, &[window((9, 0), (10, 0))]);
        assert_eq!(m.uptime_last_hour, 30.0);
        assert_eq!(m.downtime_last_hour, 30.0);
    }

    #[test]
    fn test_rounding_and_long_window() {
        // 1 of 3 active over a 7 hour window
        let samples = vec![
            sample(at(10, 0), SampleStatus::Active),
            sample(at(11, 0), SampleStatus::Inactive),
            sample(at(12, 0), SampleStatus::Inactive),
        ];
        let m = run(&samples, &[window((9, 0), (16, 0))]);
        assert_eq!(m.uptime_last_hour, 20.0);
        assert_eq!(m.downtime_last_hour, 40.0);
        assert_eq!(m.uptime_last_day, 68.57);
        assert_eq!(m.downtime_last_day, 137.14);
        assert_eq!(m.uptime_last_week, 480.0);
        assert_eq!(m.downtime_last_week, 960.0);

        for v in [m.uptime_last_day, m.downtime_last_day] {
            assert_eq!(v, (v * 100.0).round() / 100.0);
        }
    }

    #[test]
    fn test_windows_accumulate() {
        let samples = vec![
            sample(at(9, 30), SampleStatus::Active),
            sample(at(14, 30), SampleStatus::Inactive),
        ];
        let m = run(
            &samples,
            &[window((9, 0), (10, 0)), window((14, 0), (16, 0))],
        );
        assert_eq!(m.uptime_last_hour, 60.0);
        assert_eq!(m.downtime_last_hour, 60.0);
        assert_eq!(m.uptime_last_day, 1440.0);
        assert_eq!(m.downtime_last_day, 720.0);
    }

    #[test]
    fn test_windows_without_samples_are_skipped() {
        let samples = vec![sample(at(9, 30), SampleStatus::Active)];
        let m = run(&samples, &[window((20, 0), (21, 0))]);
        assert_eq!(m.uptime_last_hour, 0.0);
        assert_eq!(m.uptime_last_week, 0.0);

        let m = run(&[], &[window((9, 0), (10, 0))]);
        assert_eq!(m.downtime_last_day, 0.0);
    }

    #[test]
    fn test_midnight_window_matches_nothing_by_default() {
        let samples = vec![
            sample(at(23, 0), SampleStatus::Active),
            sample(at(1, 0), SampleStatus::Active),
        ];
        let m = run(&samples, &[window((22, 0), (2, 0))]);
        assert_eq!(m.uptime_last_hour, 0.0);
        assert_eq!(m.uptime_last_day, 0.0);
        assert_eq!(m.uptime_last_week, 0.0);
    }

    #[test]
    fn test_midnight_window_wraps_when_enabled() {
        let samples = vec![
            sample(at(23, 0), SampleStatus::Active),
            sample(at(1, 0), SampleStatus::Inactive),
            sample(at(12, 0), SampleStatus::Inactive),
        ];
        let m = extrapolate(
            "1",
            &samples,
            &[window((22, 0), (2, 0))],
            "UTC",
            MidnightWindows::Wrap,
        )
        .unwrap();
        // 4 hour window, half active
        assert_eq!(m.uptime_last_hour, 30.0);
        assert_eq!(m.downtime_last_hour, 30.0);
        assert_eq!(m.uptime_last_day, 180.0);
        assert_eq!(m.uptime_last_week, 1260.0);
    }

    #[test]
    fn test_zero_duration_window_is_an_error() {
        let samples = vec![sample(at(9, 0), SampleStatus::Active)];
        let err = extrapolate(
            "1",
            &samples,
            &[window((9, 0), (9, 0))],
            "UTC",
            MidnightWindows::Ignore,
        )
        .unwrap_err();
        assert!(matches!(err, ExtrapolateError::InvalidWindow { .. }));
    }

    #[test]
    fn test_zero_duration_window_without_samples_is_skipped() {
        let samples = vec![sample(at(11, 0), SampleStatus::Active)];
        let m = run(&samples, &[window((9, 0), (9, 0))]);
        assert_eq!(m.uptime_last_hour, 0.0);
    }

    #[test]
    fn test_timezone_conversion() {
        // 14:30 UTC is 08:30 in Chicago (CST, UTC-6) in January
        let samples = vec![sample(at(14, 30), SampleStatus::Active)];
        let windows = [window((8, 0), (9, 0))];

        let m = extrapolate("1", &samples, &windows, "America/Chicago", MidnightWindows::Ignore).unwrap();
        assert_eq!(m.uptime_last_hour, 60.0);

        let m = extrapolate("1", &samples, &windows, "UTC", MidnightWindows::Ignore).unwrap();
        assert_eq!(m.uptime_last_hour, 0.0);
    }

    #[test]
    fn test_unknown_timezone() {
        let err = extrapolate("1", &[], &[], "Mars/Olympus_Mons", MidnightWindows::Ignore).unwrap_err();
        assert_eq!(err, ExtrapolateError::UnknownTimezone("Mars/Olympus_Mons".to_string()));
    }

    #[test]
    fn test_deterministic() {
        let samples = vec![
            sample(at(9, 10), SampleStatus::Active),
            sample(at(9, 20), SampleStatus::Inactive),
            sample(at(9, 40), SampleStatus::Active),
        ];
        let windows = [window((9, 0), (10, 0)), window((9, 0), (12, 0))];
        let a = extrapolate("1", &samples, &windows, "Asia/Kolkata", MidnightWindows::Ignore);
        let b = extrapolate("1", &samples, &windows, "Asia/Kolkata", MidnightWindows::Ignore);
        assert_eq!(a, b);
    }
}
