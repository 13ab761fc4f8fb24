use crate::common::types::{CommonError, CommonResult};
use chrono::{DateTime, Days, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

/// Upper bound for `days_back`; keeps every window inside the i64 nanosecond range.
pub const MAX_DAYS_BACK: u32 = 36_500;

/// Fetch window ending at the last microsecond of the current local day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
}

/// Last instant of `date` in `timezone`. When 23:59:59.999999 is skipped by a transition, the
/// day ends one microsecond before the first valid local time of the next day.
pub fn end_of_local_day(timezone: Tz, date: NaiveDate) -> Option<DateTime<Tz>> {
    let last_micro = date.and_hms_micro_opt(23, 59, 59, 999_999)?;
    if let Some(end) = timezone.from_local_datetime(&last_micro).latest() {
        return Some(end);
    }

    let next_midnight = date.checked_add_days(Days::new(1))?.and_hms_opt(0, 0, 0)?;
    (0..=96)
        .map(|quarter| next_midnight + Duration::minutes(15 * quarter))
        .find_map(|naive| timezone.from_local_datetime(&naive).earliest())
        .map(|first_valid| first_valid - Duration::microseconds(1))
}

impl TimeRange {
    pub fn days_back(days_back: u32, timezone: Tz) -> CommonResult<Self> {
        Self::days_back_from(Utc::now().with_timezone(&timezone), days_back)
    }

    /// `end` is 23:59:59.999999 local on `now`'s date; `start` is exactly `days_back * 24h`
    /// before it, regardless of DST transitions in between.
    pub fn days_back_from(now: DateTime<Tz>, days_back: u32) -> CommonResult<Self> {
        if days_back > MAX_DAYS_BACK {
            return Err(CommonError::Configuration(format!(
                "days back must be at most {MAX_DAYS_BACK}, got {days_back}"
            )));
        }

        let end = end_of_local_day(now.timezone(), now.date_naive()).unwrap_or(now);
        let start = end
            .checked_sub_signed(Duration::days(i64::from(days_back)))
            .ok_or_else(|| {
                CommonError::Configuration(format!("{days_back} days back is out of range"))
            })?;

        Ok(Self { start, end })
    }

    pub fn start_nanos(&self) -> i64 {
        self.start.timestamp_micros() * 1_000
    }

    pub fn end_nanos(&self) -> i64 {
        self.end.timestamp_micros() * 1_000
    }

    pub fn start_seconds(&self) -> i64 {
        self.start.timestamp()
    }

    pub fn end_seconds(&self) -> i64 {
        self.end.timestamp()
    }

    /// Google Fit dataset id: `{start_ns}-{end_ns}`.
    pub fn dataset_id(&self) -> String {
        format!("{}-{}", self.start_nanos(), self.end_nanos())
    }
}
