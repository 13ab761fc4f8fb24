use crate::common::measurement::{HealthRecord, Measurement, SLEEP_DEEP, SLEEP_LIGHT, SLEEP_REM};
use crate::common::sync::HealthData;
use chrono::{DateTime, Days, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

/// Synthetic health data shaped like a typical day, for filling dashboards without Google Fit
/// credentials.
pub struct MockDataGenerator<R = StdRng> {
    timezone: Tz,
    today: NaiveDate,
    rng: R,
}

impl MockDataGenerator<StdRng> {
    pub fn new(timezone: Tz) -> Self {
        let today = Utc::now().with_timezone(&timezone).date_naive();
        Self::with_rng(timezone, today, StdRng::from_os_rng())
    }
}

impl<R: Rng> MockDataGenerator<R> {
    pub fn with_rng(timezone: Tz, today: NaiveDate, rng: R) -> Self {
        Self {
            timezone,
            today,
            rng,
        }
    }

    fn day(&self, days_ago: u32) -> Option<NaiveDate> {
        self.today.checked_sub_days(Days::new(u64::from(days_ago)))
    }

    fn dates(&self, days: u32) -> Vec<NaiveDate> {
        (0..days).filter_map(|d| self.day(d)).collect()
    }

    // None for local times that fall into a DST gap
    fn local(&self, date: NaiveDate, hour: u32, minute: u32) -> Option<DateTime<Tz>> {
        date.and_hms_opt(hour, minute, 0)
            .and_then(|naive| self.timezone.from_local_datetime(&naive).earliest())
    }

    pub fn generate_steps_data(&mut self, days: u32) -> Vec<HealthRecord> {
        let mut data = Vec::new();

        for date in self.dates(days) {
            let hourly_base_steps = self.rng.random_range(8000..=15000) / 18;
            let mut daily_steps = 0;

            // 06:00 through 23:00
            for hour in 0..18 {
                let factor = match hour {
                    1 | 2 | 6 | 7 | 11 | 12 => self.rng.random_range(1.5..2.5),
                    0 | 8 | 9 | 10 | 13 | 14 | 15 => self.rng.random_range(0.8..1.2),
                    _ => self.rng.random_range(0.3..0.7),
                };
                let jitter = self.rng.random_range(-50..=100);
                let steps = ((f64::from(hourly_base_steps) * factor) as i64 + jitter).max(0);

                let Some(time) = self.local(date, 6 + hour, 0) else {
                    continue;
                };
                daily_steps += steps;
                data.push(HealthRecord::new(
                    Measurement::Steps,
                    steps as f64,
                    time.timestamp(),
                ));
            }

            info!("Generated {} steps for {}", daily_steps, date);
        }

        data
    }

    pub fn generate_weight_data(&mut self, days: u32) -> Vec<HealthRecord> {
        let mut data = Vec::new();
        let base_weight = self.rng.random_range(60.0..80.0);

        for day in 0..days {
            let Some(date) = self.day(day) else { continue };
            let minute = self.rng.random_range(0..=30);
            let variation = self.rng.random_range(-0.5..0.5);
            let drift = self.rng.random_range(-0.1..0.1) * f64::from(day);
            let weight = ((base_weight + variation + drift) * 10.0).round() / 10.0;

            if let Some(time) = self.local(date, 7, minute) {
                data.push(HealthRecord::new(Measurement::Weight, weight, time.timestamp()));
            }
        }

        data
    }

    pub fn generate_heart_rate_data(&mut self, days: u32) -> Vec<HealthRecord> {
        let mut data = Vec::new();

        for date in self.dates(days) {
            for hour in 6..23 {
                for minute in [0, 30] {
                    let base_hr = match hour {
                        6..=8 => self.rng.random_range(65..=85),
                        9..=17 => self.rng.random_range(70..=90),
                        18..=20 => self.rng.random_range(80..=110),
                        _ => self.rng.random_range(60..=75),
                    };
                    let heart_rate: i64 = (base_hr + self.rng.random_range(-10..=15)).clamp(50, 180);

                    if let Some(time) = self.local(date, hour, minute) {
                        data.push(HealthRecord::new(
                            Measurement::HeartRate,
                            heart_rate as f64,
                            time.timestamp(),
                        ));
                    }
                }
            }
        }

        data
    }

    /// One night per day starting around 23:00: three light segments, then deep, then REM.
    pub fn generate_sleep_data(&mut self, days: u32) -> Vec<HealthRecord> {
        let mut data = Vec::new();

        for date in self.dates(days) {
            let minute = self.rng.random_range(0..=30);
            let total_seconds = (self.rng.random_range(6.5..8.5) * 3600.0) as i64;
            let deep = (total_seconds as f64 * self.rng.random_range(0.20..0.25)) as i64;
            let rem = (total_seconds as f64 * self.rng.random_range(0.20..0.25)) as i64;
            let light_segment = (total_seconds - deep - rem) / 3;

            let Some(start) = self.local(date, 23, minute) else {
                continue;
            };
            let mut current = start.timestamp();

            for _ in 0..3 {
                data.push(HealthRecord::sleep(light_segment, current, SLEEP_LIGHT));
                current += light_segment;
            }
            data.push(HealthRecord::sleep(deep, current, SLEEP_DEEP));
            current += deep;
            data.push(HealthRecord::sleep(rem, current, SLEEP_REM));
        }

        data
    }

    pub fn generate_calories_data(&mut self, days: u32) -> Vec<HealthRecord> {
        let mut data = Vec::new();

        for date in self.dates(days) {
            let mut daily_calories = 0;

            for hour in (6..23).step_by(2) {
                let calories: i64 = match hour {
                    7 | 12 | 18 => self.rng.random_range(150..=300),
                    8 | 9 | 13 | 14 | 19 | 20 => self.rng.random_range(100..=200),
                    _ => self.rng.random_range(50..=120),
                };

                if let Some(time) = self.local(date, hour, 0) {
                    daily_calories += calories;
                    data.push(HealthRecord::new(
                        Measurement::Calories,
                        calories as f64,
                        time.timestamp(),
                    ));
                }
            }

            info!("Generated {} calories for {}", daily_calories, date);
        }

        data
    }

    pub fn generate_all_mock_data(&mut self, days: u32) -> HealthData {
        info!("Generating mock health data for {} days", days);

        let mut all_data = HealthData::new();
        all_data.insert(Measurement::Steps, self.generate_steps_data(days));
        all_data.insert(Measurement::Weight, self.generate_weight_data(days));
        all_data.insert(Measurement::HeartRate, self.generate_heart_rate_data(days));
        all_data.insert(Measurement::Sleep, self.generate_sleep_data(days));
        all_data.insert(Measurement::Calories, self.generate_calories_data(days));
        all_data
    }
}
