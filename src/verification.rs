// src/verification.rs
//
// Matching of approved overtime and late/early requests against the actual
// attendance record. Both procedures are tolerance-windowed and
// all-or-nothing: a request that does not match within its window is
// discarded entirely (no credit, no exception from penalty).

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::calendar::WorkCalendarConfig;
use crate::error::PayrollError;
use crate::model::{
    checked_add, checked_decimal, checked_mul, AttendanceRecord, LateEarlyKind, LateEarlyRequest,
    OvertimeRequest,
};

/// Window around the expected overtime end within which the actual checkout
/// still earns the full declared hours.
pub const OVERTIME_CHECKOUT_TOLERANCE_MIN: i64 = 60;

/// Window within which a claimed actual time must match the attendance
/// timestamp for a late/early approval to waive the penalty.
pub const CLAIM_MATCH_TOLERANCE_MIN: i64 = 30;

/// Sums the hours of approved overtime requests whose actual checkout
/// matches the declared end time within tolerance. Result rounded to 2 dp.
pub fn verified_overtime_hours(
    overtimes: &[OvertimeRequest],
    attendance_by_date: &HashMap<NaiveDate, &AttendanceRecord>,
) -> Result<Decimal, PayrollError> {
    let mut total = dec!(0);

    for req in overtimes {
        let Some(att) = attendance_by_date.get(&req.date) else {
            debug!(
                "Overtime {} on {} discarded: no attendance record",
                req.id, req.date
            );
            continue;
        };
        let (Some(_check_in), Some(check_out)) = (att.check_in, att.check_out) else {
            debug!(
                "Overtime {} on {} discarded: attendance missing check-in/out",
                req.id, req.date
            );
            continue;
        };

        let Some(expected_end) = expected_end_instant(req.date, req.start_time, req.end_time)
        else {
            warn!(
                "Overtime {} on {} discarded: end instant overflows the calendar",
                req.id, req.date
            );
            continue;
        };

        let delta_min = (expected_end - check_out).num_minutes().abs();
        if delta_min <= OVERTIME_CHECKOUT_TOLERANCE_MIN {
            let hours = checked_decimal(req.hours, "overtime hours")?;
            total = checked_add(total, hours, "overtime hours")?;
            debug!(
                "Overtime {} on {} verified ({} min off expected end): +{} h",
                req.id, req.date, delta_min, hours
            );
        } else {
            debug!(
                "Overtime {} on {} discarded: checkout {} min from expected end",
                req.id, req.date, delta_min
            );
        }
    }

    Ok(total.round_dp(2))
}

/// Combines the request date with its end time; an end at or before the
/// start means the shift crosses midnight and ends the next day.
fn expected_end_instant(
    date: NaiveDate,
    start_time: NaiveTime,
    end_time: NaiveTime,
) -> Option<NaiveDateTime> {
    let end_date = if end_time <= start_time {
        date.succ_opt()?
    } else {
        date
    };
    Some(end_date.and_time(end_time))
}

/// Whether an attendance deviation of the given kind is excused by one of
/// the day's approved requests.
///
/// A request with no claimed time verifies unconditionally. A claimed time
/// must land within [`CLAIM_MATCH_TOLERANCE_MIN`] of the actual check-in
/// (LATE) or check-out (EARLY), compared as minute-of-day; a mismatched
/// claim does not waive the penalty.
pub fn is_excused(
    att: &AttendanceRecord,
    requests: &[LateEarlyRequest],
    kind: LateEarlyKind,
) -> bool {
    requests
        .iter()
        .filter(|r| r.kind == kind && r.date == att.date)
        .any(|r| claim_verified(att, r, kind))
}

fn claim_verified(att: &AttendanceRecord, req: &LateEarlyRequest, kind: LateEarlyKind) -> bool {
    let Some(claimed) = req.claimed_actual_time else {
        return true;
    };
    let actual = match kind {
        LateEarlyKind::Late => att.check_in,
        LateEarlyKind::Early => att.check_out,
    };
    let Some(actual) = actual else {
        debug!(
            "Late/early request {} on {} unverifiable: attendance missing timestamp",
            req.id, req.date
        );
        return false;
    };
    let delta = minute_of_day(actual.time()) - minute_of_day(claimed);
    delta.abs() <= CLAIM_MATCH_TOLERANCE_MIN
}

fn minute_of_day(t: NaiveTime) -> i64 {
    i64::from(t.hour()) * 60 + i64::from(t.minute())
}

/// Tolerance-reduced penalty for one attendance record: 50% of the hourly
/// rate per hour beyond tolerance, separately for unexcused lateness and
/// unexcused early leave.
pub fn unexcused_deduction(
    att: &AttendanceRecord,
    requests: &[LateEarlyRequest],
    calendar: &WorkCalendarConfig,
    hourly_rate: Decimal,
) -> Result<Decimal, PayrollError> {
    let mut deduction = dec!(0);

    let late_excess = att.late_minutes - calendar.late_tolerance_minutes;
    if late_excess > 0 && !is_excused(att, requests, LateEarlyKind::Late) {
        deduction = checked_add(
            deduction,
            penalty_for(late_excess, hourly_rate)?,
            "late deduction",
        )?;
    }

    let early_excess = att.early_leave_minutes - calendar.early_leave_tolerance_minutes;
    if early_excess > 0 && !is_excused(att, requests, LateEarlyKind::Early) {
        deduction = checked_add(
            deduction,
            penalty_for(early_excess, hourly_rate)?,
            "early leave deduction",
        )?;
    }

    Ok(deduction)
}

fn penalty_for(excess_minutes: i64, hourly_rate: Decimal) -> Result<Decimal, PayrollError> {
    let excess_hours = Decimal::from(excess_minutes) / dec!(60);
    let penalty = checked_mul(excess_hours, hourly_rate, "deduction")?;
    checked_mul(penalty, dec!(0.5), "deduction")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RequestStatus;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn t(s: &str) -> NaiveTime {
        NaiveTime::parse_from_str(s, "%H:%M").unwrap()
    }

    fn dt(date: &str, time: &str) -> NaiveDateTime {
        d(date).and_time(t(time))
    }

    fn attendance(date: &str, check_in: Option<&str>, check_out: Option<&str>) -> AttendanceRecord {
        AttendanceRecord {
            employee_id: "E1".into(),
            date: d(date),
            check_in: check_in.map(|s| dt(date, s)),
            check_out: check_out.map(|s| dt(date, s)),
            work_hours: 8.0,
            late_minutes: 0,
            early_leave_minutes: 0,
        }
    }

    fn overtime(date: &str, start: &str, end: &str, hours: f64) -> OvertimeRequest {
        OvertimeRequest {
            id: "OT1".into(),
            employee_id: "E1".into(),
            date: d(date),
            start_time: t(start),
            end_time: t(end),
            hours,
            status: RequestStatus::Approved,
        }
    }

    fn by_date(atts: &[AttendanceRecord]) -> HashMap<NaiveDate, &AttendanceRecord> {
        atts.iter().map(|a| (a.date, a)).collect()
    }

    #[test]
    fn overtime_credited_at_exact_tolerance() {
        // Expected end 20:00, checkout 21:00: exactly 60 minutes off.
        let atts = vec![attendance("2025-06-02", Some("09:00"), Some("21:00"))];
        let reqs = vec![overtime("2025-06-02", "18:00", "20:00", 2.0)];
        let hours = verified_overtime_hours(&reqs, &by_date(&atts)).unwrap();
        assert_eq!(hours, dec!(2.00));
    }

    #[test]
    fn overtime_discarded_one_minute_past_tolerance() {
        let atts = vec![attendance("2025-06-02", Some("09:00"), Some("21:01"))];
        let reqs = vec![overtime("2025-06-02", "18:00", "20:00", 2.0)];
        let hours = verified_overtime_hours(&reqs, &by_date(&atts)).unwrap();
        assert_eq!(hours, dec!(0));
    }

    #[test]
    fn overtime_without_attendance_contributes_nothing() {
        let reqs = vec![overtime("2025-06-02", "18:00", "20:00", 2.0)];
        let hours = verified_overtime_hours(&reqs, &HashMap::new()).unwrap();
        assert_eq!(hours, dec!(0));
    }

    #[test]
    fn overtime_missing_checkout_contributes_nothing() {
        let atts = vec![attendance("2025-06-02", Some("09:00"), None)];
        let reqs = vec![overtime("2025-06-02", "18:00", "20:00", 2.0)];
        let hours = verified_overtime_hours(&reqs, &by_date(&atts)).unwrap();
        assert_eq!(hours, dec!(0));
    }

    #[test]
    fn overnight_shift_expected_end_is_next_day() {
        // Shift 22:00 -> 02:00 crosses midnight; checkout recorded at 01:30
        // on the next day is 30 minutes early, within tolerance.
        let mut att = attendance("2025-06-02", Some("22:00"), None);
        att.check_out = Some(dt("2025-06-03", "01:30"));
        let atts = vec![att];
        let reqs = vec![overtime("2025-06-02", "22:00", "02:00", 4.0)];
        let hours = verified_overtime_hours(&reqs, &by_date(&atts)).unwrap();
        assert_eq!(hours, dec!(4.00));
    }

    #[test]
    fn sums_and_rounds_multiple_verified_requests() {
        let atts = vec![
            attendance("2025-06-02", Some("09:00"), Some("20:00")),
            attendance("2025-06-03", Some("09:00"), Some("19:30")),
        ];
        let mut r1 = overtime("2025-06-02", "18:00", "20:00", 1.333);
        r1.id = "OT1".into();
        let mut r2 = overtime("2025-06-03", "18:00", "19:30", 1.333);
        r2.id = "OT2".into();
        let hours = verified_overtime_hours(&[r1, r2], &by_date(&atts)).unwrap();
        assert_eq!(hours, dec!(2.67));
    }

    fn late_req(date: &str, claimed: Option<&str>) -> LateEarlyRequest {
        LateEarlyRequest {
            id: "LE1".into(),
            employee_id: "E1".into(),
            date: d(date),
            kind: LateEarlyKind::Late,
            claimed_actual_time: claimed.map(t),
            minutes: 30,
            status: RequestStatus::Approved,
        }
    }

    #[test]
    fn claim_within_window_excuses() {
        let att = attendance("2025-06-02", Some("09:25"), Some("18:00"));
        let reqs = vec![late_req("2025-06-02", Some("09:00"))];
        assert!(is_excused(&att, &reqs, LateEarlyKind::Late));
    }

    #[test]
    fn claim_outside_window_does_not_excuse() {
        let att = attendance("2025-06-02", Some("09:45"), Some("18:00"));
        let reqs = vec![late_req("2025-06-02", Some("09:00"))];
        assert!(!is_excused(&att, &reqs, LateEarlyKind::Late));
    }

    #[test]
    fn missing_claim_excuses_unconditionally() {
        let att = attendance("2025-06-02", Some("11:00"), Some("18:00"));
        let reqs = vec![late_req("2025-06-02", None)];
        assert!(is_excused(&att, &reqs, LateEarlyKind::Late));
    }

    #[test]
    fn wrong_kind_does_not_excuse_early_leave() {
        let att = attendance("2025-06-02", Some("09:00"), Some("16:00"));
        let reqs = vec![late_req("2025-06-02", None)];
        assert!(!is_excused(&att, &reqs, LateEarlyKind::Early));
    }

    #[test]
    fn deduction_one_minute_beyond_tolerance() {
        let cal = WorkCalendarConfig::default();
        let mut att = attendance("2025-06-02", Some("09:16"), Some("18:00"));
        att.late_minutes = cal.late_tolerance_minutes + 1;
        let hourly = dec!(120000);
        let ded = unexcused_deduction(&att, &[], &cal, hourly).unwrap();
        // 1 excess minute: (1/60) * hourly * 0.5
        assert_eq!(ded, Decimal::from(1) / dec!(60) * hourly * dec!(0.5));
    }

    #[test]
    fn deduction_waived_when_excused() {
        let cal = WorkCalendarConfig::default();
        let mut att = attendance("2025-06-02", Some("09:40"), Some("18:00"));
        att.late_minutes = 40;
        let reqs = vec![late_req("2025-06-02", Some("09:30"))];
        let ded = unexcused_deduction(&att, &reqs, &cal, dec!(120000)).unwrap();
        assert_eq!(ded, dec!(0));
    }

    #[test]
    fn within_tolerance_never_penalized() {
        let cal = WorkCalendarConfig::default();
        let mut att = attendance("2025-06-02", Some("09:10"), Some("18:00"));
        att.late_minutes = cal.late_tolerance_minutes;
        let ded = unexcused_deduction(&att, &[], &cal, dec!(120000)).unwrap();
        assert_eq!(ded, dec!(0));
    }
}
