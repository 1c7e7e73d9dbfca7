//! Timestamp assembly from split date/time fields.
//!
//! Tracker frames carry dates and times as separate digit groups in
//! protocol-specific orders (yymmdd, ddmmyy, yyyymmdd). Decoders feed the
//! fields in whatever order they captured them and get back one absolute UTC
//! instant. No semantic validation happens here beyond calendar arithmetic;
//! the all-zero "no fix yet" sentinel must be rejected by the caller before
//! building.

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};

#[derive(Debug, Clone, Copy)]
pub struct DateBuilder {
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
}

impl Default for DateBuilder {
    fn default() -> Self {
        Self {
            year: 1970,
            month: 1,
            day: 1,
            hour: 0,
            minute: 0,
            second: 0,
        }
    }
}

impl DateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the calendar date. Two-digit years are interpreted as 2000-based.
    pub fn date(mut self, year: i32, month: u32, day: u32) -> Self {
        self.year = if year < 100 { 2000 + year } else { year };
        self.month = month;
        self.day = day;
        self
    }

    pub fn time(mut self, hour: u32, minute: u32, second: u32) -> Self {
        self.hour = hour;
        self.minute = minute;
        self.second = second;
        self
    }

    pub fn build(self) -> Result<DateTime<Utc>> {
        Utc.with_ymd_and_hms(
            self.year,
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second,
        )
        .single()
        .with_context(|| {
            format!(
                "invalid date {:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                self.year, self.month, self.day, self.hour, self.minute, self.second
            )
        })
    }
}
