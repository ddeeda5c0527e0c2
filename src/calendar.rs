// src/calendar.rs
use chrono::{Datelike, Local, NaiveDate};
use std::sync::Mutex;

/// Default divisors for the standard working month. Kept on the calendar
/// configuration rather than hardcoded in the composer so a tenant can
/// change them without touching the arithmetic.
pub const DEFAULT_WORK_DAYS_PER_MONTH: u32 = 22;
pub const DEFAULT_HOURS_PER_DAY: u32 = 8;

/// Business-calendar configuration. Read-only at calculation time;
/// administration of it lives outside this crate.
#[derive(Debug, Clone)]
pub struct WorkCalendarConfig {
    /// Monday-first weekday mask.
    pub working_weekdays: [bool; 7],
    pub late_tolerance_minutes: i64,
    pub early_leave_tolerance_minutes: i64,
    pub work_days_per_month: u32,
    pub hours_per_day: u32,
}

impl Default for WorkCalendarConfig {
    fn default() -> Self {
        Self {
            working_weekdays: [true, true, true, true, true, false, false],
            late_tolerance_minutes: 15,
            early_leave_tolerance_minutes: 15,
            work_days_per_month: DEFAULT_WORK_DAYS_PER_MONTH,
            hours_per_day: DEFAULT_HOURS_PER_DAY,
        }
    }
}

impl WorkCalendarConfig {
    /// True iff the date's weekday is marked working. Weekday mask only;
    /// leave coverage is the composer's concern.
    pub fn is_working_day(&self, date: NaiveDate) -> bool {
        self.working_weekdays[date.weekday().num_days_from_monday() as usize]
    }
}

/// Time source for the month-end trigger. Abstracted so tests can walk the
/// calendar without sleeping.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// A clock that only moves when told to. Test use.
pub struct ManualClock {
    today: Mutex<NaiveDate>,
}

impl ManualClock {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            today: Mutex::new(today),
        }
    }

    pub fn set(&self, today: NaiveDate) {
        *self.today.lock().unwrap() = today;
    }
}

impl Clock for ManualClock {
    fn today(&self) -> NaiveDate {
        *self.today.lock().unwrap()
    }
}
