// src/engine.rs
//
// The payroll engine proper: month aggregation, salary composition and the
// PENDING -> APPROVED -> PAID ledger state machine. Every data access goes
// through the store trait; the composition itself is synchronous
// arithmetic over one month of one employee.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use crate::calendar::WorkCalendarConfig;
use crate::error::PayrollError;
use crate::model::{
    checked_add, checked_decimal, checked_div, checked_mul, checked_sub, AttendanceRecord,
    CompensationPolicy,
    LateEarlyRequest, LeaveRequest, OvertimeRequest, PayPeriod, PaymentMethod,
    PayrollRecord, PayrollStatus,
};
use crate::policy::{effective_hourly_rate, resolve_effective_policy};
use crate::store::PayrollStore;
use crate::verification::{unexcused_deduction, verified_overtime_hours};

/// Everything the composer needs for one employee-month, loaded in one
/// pass. Only approved requests are included.
#[derive(Debug, Default)]
pub struct MonthData {
    pub attendance: Vec<AttendanceRecord>,
    pub leaves: Vec<LeaveRequest>,
    pub overtimes: Vec<OvertimeRequest>,
    pub late_early: Vec<LateEarlyRequest>,
}

/// Aggregate outcome of a batch operation. Item failures never abort the
/// batch; they are reported here and logged as they happen.
#[derive(Debug, Default, Serialize)]
pub struct BatchReport {
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<BatchError>,
}

#[derive(Debug, Serialize)]
pub struct BatchError {
    pub id: String,
    pub error: String,
}

impl BatchReport {
    fn record_success(&mut self) {
        self.succeeded += 1;
    }

    fn record_failure(&mut self, id: &str, error: &PayrollError) {
        self.failed += 1;
        self.errors.push(BatchError {
            id: id.to_string(),
            error: error.to_string(),
        });
    }
}

pub struct PayrollEngine {
    store: Arc<dyn PayrollStore>,
    calendar: WorkCalendarConfig,
    /// Advisory locks keyed by (employee, period), so at most one
    /// recomputation per ledger key is in flight at a time.
    period_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PayrollEngine {
    pub fn new(store: Arc<dyn PayrollStore>, calendar: WorkCalendarConfig) -> Self {
        Self {
            store,
            calendar,
            period_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_period(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.period_locks.lock().await;
            // Entries whose Arc is only held by the map are idle; prune
            // them so the map tracks in-flight keys, not history.
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            Arc::clone(
                locks
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    pub(crate) async fn period_lock_count(&self) -> usize {
        self.period_locks.lock().await.len()
    }

    /// Loads attendance plus the three approved request streams for the
    /// employee-month.
    pub async fn load_month_data(
        &self,
        employee_id: &str,
        period: PayPeriod,
    ) -> Result<MonthData, PayrollError> {
        let (from, to) = (period.first_day(), period.last_day());
        let data = MonthData {
            attendance: self.store.attendance(employee_id, from, to).await?,
            leaves: self.store.approved_leaves(employee_id, from, to).await?,
            overtimes: self.store.approved_overtimes(employee_id, from, to).await?,
            late_early: self
                .store
                .approved_late_early(employee_id, from, to)
                .await?,
        };
        debug!(
            "Loaded month data for {} {}: {} attendance, {} leaves, {} overtimes, {} late/early",
            employee_id,
            period,
            data.attendance.len(),
            data.leaves.len(),
            data.overtimes.len(),
            data.late_early.len()
        );
        Ok(data)
    }

    /// Computes (or recomputes) the payroll record for one employee-month
    /// and upserts it in PENDING state. Approved or paid records are frozen
    /// and refuse recomputation.
    pub async fn calculate_salary(
        &self,
        employee_id: &str,
        period: PayPeriod,
    ) -> Result<PayrollRecord, PayrollError> {
        let key = PayrollRecord::key(employee_id, period);
        let _guard = self.lock_period(&key).await;

        if let Some(existing) = self.store.payroll(employee_id, period).await? {
            if existing.status != PayrollStatus::Pending {
                return Err(PayrollError::InvalidState(format!(
                    "payroll {} is {:?}; approved figures are frozen",
                    key, existing.status
                )));
            }
        }

        let employee = self
            .store
            .employee(employee_id)
            .await?
            .ok_or_else(|| PayrollError::EmployeeNotFound(employee_id.to_string()))?;
        let policy = resolve_effective_policy(self.store.as_ref(), &employee).await?;
        let data = self.load_month_data(employee_id, period).await?;

        let record = compose_salary(employee_id, period, &policy, &data, &self.calendar)?;
        info!(
            "Calculated salary for {} {}: {} work days, {} overtime hours, total {}",
            employee_id, period, record.work_days, record.overtime_hours, record.total_salary
        );
        self.store.upsert_payroll(record).await
    }

    /// Runs the compute path for every ACTIVE employee. One employee's
    /// failure is logged and reported without aborting the rest.
    pub async fn calculate_all_employees(
        &self,
        period: PayPeriod,
    ) -> Result<(Vec<PayrollRecord>, BatchReport), PayrollError> {
        let employees = self.store.active_employees().await?;
        info!(
            "Bulk salary calculation for {}: {} active employees",
            period,
            employees.len()
        );

        let mut records = Vec::new();
        let mut report = BatchReport::default();
        for employee in &employees {
            match self.calculate_salary(&employee.id, period).await {
                Ok(record) => {
                    records.push(record);
                    report.record_success();
                }
                Err(e) => {
                    warn!(
                        "Salary calculation failed for {} {}: {}",
                        employee.id, period, e
                    );
                    report.record_failure(&employee.id, &e);
                }
            }
        }
        info!(
            "Bulk calculation for {} done: {} succeeded, {} failed",
            period, report.succeeded, report.failed
        );
        Ok((records, report))
    }

    /// PENDING -> APPROVED. Serialized with recomputation via the per-key
    /// lock, so an in-flight recompute cannot overwrite the transition.
    pub async fn approve_salary(&self, record_id: &str) -> Result<PayrollRecord, PayrollError> {
        let record = self
            .store
            .payroll_by_id(record_id)
            .await?
            .ok_or_else(|| PayrollError::RecordNotFound(record_id.to_string()))?;
        let key = PayrollRecord::key(&record.employee_id, record.period);
        let _guard = self.lock_period(&key).await;

        // Re-read under the lock; a recompute may have landed in between.
        let mut record = self
            .store
            .payroll_by_id(record_id)
            .await?
            .ok_or_else(|| PayrollError::RecordNotFound(record_id.to_string()))?;
        if record.status != PayrollStatus::Pending {
            return Err(PayrollError::InvalidState(format!(
                "payroll {} is {:?}; only PENDING records can be approved",
                record_id, record.status
            )));
        }
        record.status = PayrollStatus::Approved;
        info!("Approved payroll {}", record_id);
        self.store.upsert_payroll(record).await
    }

    /// Approves every PENDING record of the period independently; one
    /// record's failure is reported without stopping the batch. Records
    /// already past PENDING are not eligible and are not counted, so a
    /// re-run over a partly approved period reports only the remainder.
    pub async fn approve_all_salaries(
        &self,
        period: PayPeriod,
    ) -> Result<BatchReport, PayrollError> {
        let records = self.store.payrolls_for_period(period).await?;
        let mut report = BatchReport::default();
        for record in records.iter().filter(|r| r.status == PayrollStatus::Pending) {
            match self.approve_salary(&record.id).await {
                Ok(_) => report.record_success(),
                Err(e) => {
                    warn!("Approval failed for {}: {}", record.id, e);
                    report.record_failure(&record.id, &e);
                }
            }
        }
        info!(
            "Bulk approval for {}: {} approved, {} failed",
            period, report.succeeded, report.failed
        );
        Ok(report)
    }

    /// APPROVED -> PAID. Requires the pay date and payment method. Holds
    /// the per-key lock like `approve_salary`.
    pub async fn mark_as_paid(
        &self,
        record_id: &str,
        pay_date: NaiveDate,
        payment_method: PaymentMethod,
    ) -> Result<PayrollRecord, PayrollError> {
        let record = self
            .store
            .payroll_by_id(record_id)
            .await?
            .ok_or_else(|| PayrollError::RecordNotFound(record_id.to_string()))?;
        let key = PayrollRecord::key(&record.employee_id, record.period);
        let _guard = self.lock_period(&key).await;

        let mut record = self
            .store
            .payroll_by_id(record_id)
            .await?
            .ok_or_else(|| PayrollError::RecordNotFound(record_id.to_string()))?;
        if record.status != PayrollStatus::Approved {
            return Err(PayrollError::InvalidState(format!(
                "payroll {} is {:?}; only APPROVED records can be paid",
                record_id, record.status
            )));
        }
        record.status = PayrollStatus::Paid;
        record.pay_date = Some(pay_date);
        record.payment_method = Some(payment_method);
        info!("Marked payroll {} paid on {}", record_id, pay_date);
        self.store.upsert_payroll(record).await
    }
}

/// Pure salary composition over the verified quantities. Any non-finite or
/// overflowing intermediate is an arithmetic fault naming the component
/// that produced it.
pub fn compose_salary(
    employee_id: &str,
    period: PayPeriod,
    policy: &CompensationPolicy,
    data: &MonthData,
    calendar: &WorkCalendarConfig,
) -> Result<PayrollRecord, PayrollError> {
    let hourly_rate = effective_hourly_rate(policy, calendar)?;

    // Work days: every working day of the month counts unless it is fully
    // covered by an unpaid-category leave.
    let mut work_days: u32 = 0;
    for day in period.days() {
        if !calendar.is_working_day(day) {
            continue;
        }
        let covering_unpaid = data
            .leaves
            .iter()
            .any(|l| l.covers(day) && !l.leave_type.is_paid());
        if !covering_unpaid {
            work_days += 1;
        }
    }

    let mut work_hours = dec!(0);
    for att in &data.attendance {
        work_hours = checked_add(
            work_hours,
            checked_decimal(att.work_hours, "work hours")?,
            "work hours",
        )?;
    }
    let work_hours = work_hours.round_dp(2);

    let attendance_by_date: HashMap<_, _> = data.attendance.iter().map(|a| (a.date, a)).collect();
    let overtime_hours = verified_overtime_hours(&data.overtimes, &attendance_by_date)?;
    let overtime_salary = checked_mul(
        checked_mul(overtime_hours, hourly_rate, "overtime salary")?,
        policy.overtime_multiplier,
        "overtime salary",
    )?
    .round_dp(2);

    let mut deduction = dec!(0);
    for att in &data.attendance {
        deduction = checked_add(
            deduction,
            unexcused_deduction(att, &data.late_early, calendar, hourly_rate)?,
            "deduction",
        )?;
    }
    let deduction = deduction.round_dp(2);

    let insurance = checked_mul(
        policy.base_salary,
        policy.insurance_rate_percent / dec!(100),
        "insurance",
    )?
    .round_dp(2);

    let salary_per_day = checked_div(
        policy.base_salary,
        Decimal::from(calendar.work_days_per_month),
        "salary per day",
    )?;
    let base_pay = checked_mul(Decimal::from(work_days), salary_per_day, "total salary")?;

    let mut total = checked_add(base_pay, overtime_salary, "total salary")?;
    total = checked_add(total, policy.allowance, "total salary")?;
    total = checked_sub(total, insurance, "total salary")?;
    total = checked_sub(total, deduction, "total salary")?;
    let total_salary = total.round_dp(2);

    // Reported for display and audit only; its monetary effect is already
    // in the work-day count.
    let mut approved_leave_days = dec!(0);
    for leave in &data.leaves {
        approved_leave_days = checked_add(
            approved_leave_days,
            checked_decimal(leave.total_days, "approved leave days")?,
            "approved leave days",
        )?;
    }

    if total_salary < dec!(0) {
        // Deductions can exceed the earned amount in pathological months;
        // keep the figure but make it visible.
        error!(
            "Negative total salary {} for {} {}",
            total_salary, employee_id, period
        );
    }

    Ok(PayrollRecord {
        id: PayrollRecord::key(employee_id, period),
        employee_id: employee_id.to_string(),
        period,
        base_salary: policy.base_salary,
        work_days,
        work_hours,
        approved_leave_days,
        overtime_hours,
        overtime_salary,
        allowance: policy.allowance,
        insurance,
        deduction,
        bonus: dec!(0),
        total_salary,
        status: PayrollStatus::Pending,
        pay_date: None,
        payment_method: None,
    })
}
