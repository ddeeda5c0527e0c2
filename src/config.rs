// src/config.rs
use serde::Deserialize;
use tracing::warn;

use crate::calendar::{WorkCalendarConfig, DEFAULT_HOURS_PER_DAY, DEFAULT_WORK_DAYS_PER_MONTH};

/// Environment-driven configuration, prefixed `PAYCORE_` (e.g.
/// `PAYCORE_BIND_ADDR`). `.env` files are honored via dotenv in main.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Seconds between month-end trigger checks.
    #[serde(default = "default_trigger_tick_secs")]
    pub trigger_tick_secs: u64,
    /// Comma-separated working weekdays, e.g. "mon,tue,wed,thu,fri".
    #[serde(default = "default_working_weekdays")]
    pub working_weekdays: String,
    #[serde(default = "default_late_tolerance")]
    pub late_tolerance_minutes: i64,
    #[serde(default = "default_early_tolerance")]
    pub early_leave_tolerance_minutes: i64,
    #[serde(default = "default_work_days_per_month")]
    pub work_days_per_month: u32,
    #[serde(default = "default_hours_per_day")]
    pub hours_per_day: u32,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}
fn default_workers() -> usize {
    4
}
fn default_retry_max_attempts() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    250
}
fn default_trigger_tick_secs() -> u64 {
    300
}
fn default_working_weekdays() -> String {
    "mon,tue,wed,thu,fri".to_string()
}
fn default_late_tolerance() -> i64 {
    15
}
fn default_early_tolerance() -> i64 {
    15
}
fn default_work_days_per_month() -> u32 {
    DEFAULT_WORK_DAYS_PER_MONTH
}
fn default_hours_per_day() -> u32 {
    DEFAULT_HOURS_PER_DAY
}

impl AppConfig {
    pub fn load() -> Result<Self, envy::Error> {
        envy::prefixed("PAYCORE_").from_env()
    }

    pub fn calendar(&self) -> WorkCalendarConfig {
        let mut mask = [false; 7];
        for token in self.working_weekdays.split(',') {
            match token.trim().to_ascii_lowercase().as_str() {
                "mon" => mask[0] = true,
                "tue" => mask[1] = true,
                "wed" => mask[2] = true,
                "thu" => mask[3] = true,
                "fri" => mask[4] = true,
                "sat" => mask[5] = true,
                "sun" => mask[6] = true,
                "" => {}
                other => warn!("Ignoring unknown weekday token '{}' in config", other),
            }
        }
        WorkCalendarConfig {
            working_weekdays: mask,
            late_tolerance_minutes: self.late_tolerance_minutes,
            early_leave_tolerance_minutes: self.early_leave_tolerance_minutes,
            work_days_per_month: self.work_days_per_month,
            hours_per_day: self.hours_per_day,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            bind_addr: default_bind_addr(),
            workers: default_workers(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            trigger_tick_secs: default_trigger_tick_secs(),
            working_weekdays: default_working_weekdays(),
            late_tolerance_minutes: default_late_tolerance(),
            early_leave_tolerance_minutes: default_early_tolerance(),
            work_days_per_month: default_work_days_per_month(),
            hours_per_day: default_hours_per_day(),
        }
    }

    #[test]
    fn parses_weekday_mask() {
        let mut cfg = base_config();
        cfg.working_weekdays = "mon, tue,sat".to_string();
        let cal = cfg.calendar();
        assert_eq!(
            cal.working_weekdays,
            [true, true, false, false, false, true, false]
        );
    }

    #[test]
    fn unknown_tokens_are_skipped() {
        let mut cfg = base_config();
        cfg.working_weekdays = "mon,funday".to_string();
        let cal = cfg.calendar();
        assert_eq!(
            cal.working_weekdays,
            [true, false, false, false, false, false, false]
        );
    }
}
