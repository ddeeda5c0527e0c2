// src/model.rs
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::PayrollError;

// --- Employees ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmployeeStatus {
    Active,
    Inactive,
    Suspended,
    Terminated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Employee {
    pub id: String,
    pub name: String,
    pub status: EmployeeStatus,
    /// Assigned role ids. Policy resolution uses the lowest id when more
    /// than one role is assigned (see policy module).
    pub role_ids: Vec<String>,
}

impl Employee {
    pub fn is_active(&self) -> bool {
        self.status == EmployeeStatus::Active
    }
}

// --- Requests (leave / overtime / late-early) ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeaveType {
    Annual,
    Sick,
    Personal,
    Maternity,
    Paternity,
    Unpaid,
    Other,
}

impl LeaveType {
    /// Paid categories still count toward work days despite the absence.
    pub fn is_paid(&self) -> bool {
        !matches!(self, LeaveType::Unpaid)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaveRequest {
    pub id: String,
    pub employee_id: String,
    pub leave_type: LeaveType,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total_days: f64,
    pub status: RequestStatus,
}

impl LeaveRequest {
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }

    pub fn overlaps(&self, from: NaiveDate, to: NaiveDate) -> bool {
        self.start_date <= to && self.end_date >= from
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OvertimeRequest {
    pub id: String,
    pub employee_id: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    /// `end_time <= start_time` means the shift crosses midnight and ends
    /// on the following calendar day.
    pub end_time: NaiveTime,
    pub hours: f64,
    pub status: RequestStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LateEarlyKind {
    Late,
    Early,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LateEarlyRequest {
    pub id: String,
    pub employee_id: String,
    pub date: NaiveDate,
    pub kind: LateEarlyKind,
    /// What the employee claims the actual check-in/check-out time was.
    /// Absent means the approval stands without a verifiable claim.
    pub claimed_actual_time: Option<NaiveTime>,
    pub minutes: i64,
    pub status: RequestStatus,
}

// --- Attendance ---

/// One row per (employee, date), produced by the external time-tracking
/// collaborator. Read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub employee_id: String,
    pub date: NaiveDate,
    pub check_in: Option<NaiveDateTime>,
    pub check_out: Option<NaiveDateTime>,
    pub work_hours: f64,
    pub late_minutes: i64,
    pub early_leave_minutes: i64,
}

// --- Compensation policy ---

/// Keyed by exactly one of `employee_id` or `role_id`. An employee-specific
/// policy shadows the role-level default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationPolicy {
    pub employee_id: Option<String>,
    pub role_id: Option<String>,
    pub base_salary: Decimal,
    pub allowance: Decimal,
    pub insurance_rate_percent: Decimal,
    /// Derived from the base salary and the standard month when absent.
    pub hourly_rate: Option<Decimal>,
    pub overtime_multiplier: Decimal,
}

// --- Pay period ---

/// One calendar month, normalized to its first day. Every component that
/// stores or compares periods goes through this type so the normalization
/// invariant holds everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PayPeriod {
    first_day: NaiveDate,
}

impl PayPeriod {
    pub fn from_ymd(year: i32, month: u32) -> Result<Self, PayrollError> {
        let first_day = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| {
            PayrollError::InvalidInput(format!("invalid pay period {}-{}", year, month))
        })?;
        Ok(Self { first_day })
    }

    /// The period containing the given date.
    pub fn of(date: NaiveDate) -> Self {
        Self {
            first_day: date.with_day(1).unwrap_or(date),
        }
    }

    pub fn first_day(&self) -> NaiveDate {
        self.first_day
    }

    pub fn last_day(&self) -> NaiveDate {
        let (y, m) = (self.first_day.year(), self.first_day.month());
        let (ny, nm) = if m == 12 { (y + 1, 1) } else { (y, m + 1) };
        NaiveDate::from_ymd_opt(ny, nm, 1)
            .and_then(|d| d.pred_opt())
            .unwrap_or(self.first_day)
    }

    /// Every calendar day of the month, inclusive.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let last = self.last_day();
        self.first_day.iter_days().take_while(move |d| *d <= last)
    }
}

impl fmt::Display for PayPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.first_day.format("%Y-%m"))
    }
}

// --- Payroll ledger ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayrollStatus {
    Pending,
    Approved,
    Paid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    BankTransfer,
    Cash,
    Check,
}

/// The engine's output: one record per employee per month. The record id is
/// the natural key `employee:period`, so recomputation overwrites in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayrollRecord {
    pub id: String,
    pub employee_id: String,
    pub period: PayPeriod,
    pub base_salary: Decimal,
    pub work_days: u32,
    pub work_hours: Decimal,
    pub approved_leave_days: Decimal,
    pub overtime_hours: Decimal,
    pub overtime_salary: Decimal,
    pub allowance: Decimal,
    pub insurance: Decimal,
    pub deduction: Decimal,
    pub bonus: Decimal,
    pub total_salary: Decimal,
    pub status: PayrollStatus,
    pub pay_date: Option<NaiveDate>,
    pub payment_method: Option<PaymentMethod>,
}

impl PayrollRecord {
    pub fn key(employee_id: &str, period: PayPeriod) -> String {
        format!("{}:{}", employee_id, period)
    }
}

// --- Checked numeric conversion ---

/// Converts an `f64` coming from a collaborator system into a `Decimal`,
/// rejecting NaN/infinity. The component name ends up in the error message
/// so a corrupted upstream field is identifiable from the log line alone.
pub fn checked_decimal(value: f64, component: &str) -> Result<Decimal, PayrollError> {
    Decimal::from_f64(value).ok_or_else(|| PayrollError::Arithmetic(component.to_string()))
}

/// Checked multiply; overflow is a data-integrity fault, not a zero.
pub fn checked_mul(a: Decimal, b: Decimal, component: &str) -> Result<Decimal, PayrollError> {
    a.checked_mul(b)
        .ok_or_else(|| PayrollError::Arithmetic(component.to_string()))
}

pub fn checked_add(a: Decimal, b: Decimal, component: &str) -> Result<Decimal, PayrollError> {
    a.checked_add(b)
        .ok_or_else(|| PayrollError::Arithmetic(component.to_string()))
}

pub fn checked_sub(a: Decimal, b: Decimal, component: &str) -> Result<Decimal, PayrollError> {
    a.checked_sub(b)
        .ok_or_else(|| PayrollError::Arithmetic(component.to_string()))
}

pub fn checked_div(a: Decimal, b: Decimal, component: &str) -> Result<Decimal, PayrollError> {
    a.checked_div(b)
        .ok_or_else(|| PayrollError::Arithmetic(component.to_string()))
}
