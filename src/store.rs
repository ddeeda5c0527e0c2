// src/store.rs
//
// Data-access contract consumed by the engine, plus an in-memory
// implementation. The collaborator subsystems (attendance capture, the
// leave/overtime/exception approval workflows) own every entity except the
// payroll ledger; this crate only ever reads their approved snapshot.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::PayrollError;
use crate::model::{
    AttendanceRecord, CompensationPolicy, Employee, LateEarlyRequest, LeaveRequest,
    OvertimeRequest, PayPeriod, PayrollRecord, RequestStatus,
};

#[async_trait]
pub trait PayrollStore: Send + Sync {
    async fn active_employees(&self) -> Result<Vec<Employee>, PayrollError>;
    async fn employee(&self, id: &str) -> Result<Option<Employee>, PayrollError>;

    async fn employee_policy(
        &self,
        employee_id: &str,
    ) -> Result<Option<CompensationPolicy>, PayrollError>;
    async fn role_policy(&self, role_id: &str) -> Result<Option<CompensationPolicy>, PayrollError>;

    async fn attendance(
        &self,
        employee_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>, PayrollError>;
    async fn approved_leaves(
        &self,
        employee_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<LeaveRequest>, PayrollError>;
    async fn approved_overtimes(
        &self,
        employee_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<OvertimeRequest>, PayrollError>;
    async fn approved_late_early(
        &self,
        employee_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<LateEarlyRequest>, PayrollError>;

    async fn payroll(
        &self,
        employee_id: &str,
        period: PayPeriod,
    ) -> Result<Option<PayrollRecord>, PayrollError>;
    async fn payroll_by_id(&self, id: &str) -> Result<Option<PayrollRecord>, PayrollError>;
    async fn payrolls_for_period(
        &self,
        period: PayPeriod,
    ) -> Result<Vec<PayrollRecord>, PayrollError>;
    async fn upsert_payroll(&self, record: PayrollRecord) -> Result<PayrollRecord, PayrollError>;

    /// Records that the month-end trigger fired for this period. Returns
    /// false when the period was already marked, so the bulk job is
    /// enqueued at most once per period even across trigger ticks.
    async fn mark_period_triggered(&self, period: PayPeriod) -> Result<bool, PayrollError>;
}

#[derive(Default)]
struct MemoryStoreInner {
    employees: HashMap<String, Employee>,
    employee_policies: HashMap<String, CompensationPolicy>,
    role_policies: HashMap<String, CompensationPolicy>,
    attendance: Vec<AttendanceRecord>,
    leaves: Vec<LeaveRequest>,
    overtimes: Vec<OvertimeRequest>,
    late_early: Vec<LateEarlyRequest>,
    payrolls: HashMap<String, PayrollRecord>,
    triggered_periods: HashSet<PayPeriod>,
    /// Fault injection: the next N upserts fail with a transient error.
    fail_upserts: u32,
}

/// HashMap-backed store behind a single async mutex. Suits the bounded
/// working set here (one employee-month per query); a relational backend
/// would implement the same trait.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // --- Seeding (normally done by the collaborator subsystems) ---

    pub async fn insert_employee(&self, employee: Employee) {
        self.inner
            .lock()
            .await
            .employees
            .insert(employee.id.clone(), employee);
    }

    pub async fn insert_policy(&self, policy: CompensationPolicy) {
        let mut inner = self.inner.lock().await;
        match (&policy.employee_id, &policy.role_id) {
            (Some(emp), _) => {
                inner.employee_policies.insert(emp.clone(), policy);
            }
            (None, Some(role)) => {
                inner.role_policies.insert(role.clone(), policy);
            }
            (None, None) => {
                debug!("Dropping policy keyed by neither employee nor role");
            }
        }
    }

    pub async fn insert_attendance(&self, record: AttendanceRecord) {
        self.inner.lock().await.attendance.push(record);
    }

    pub async fn insert_leave(&self, request: LeaveRequest) {
        self.inner.lock().await.leaves.push(request);
    }

    pub async fn insert_overtime(&self, request: OvertimeRequest) {
        self.inner.lock().await.overtimes.push(request);
    }

    pub async fn insert_late_early(&self, request: LateEarlyRequest) {
        self.inner.lock().await.late_early.push(request);
    }

    /// Makes the next `n` upserts fail with a transient storage error.
    /// Test seam for the retry policy.
    pub async fn fail_next_upserts(&self, n: u32) {
        self.inner.lock().await.fail_upserts = n;
    }
}

#[async_trait]
impl PayrollStore for MemoryStore {
    async fn active_employees(&self) -> Result<Vec<Employee>, PayrollError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .employees
            .values()
            .filter(|e| e.is_active())
            .cloned()
            .collect())
    }

    async fn employee(&self, id: &str) -> Result<Option<Employee>, PayrollError> {
        Ok(self.inner.lock().await.employees.get(id).cloned())
    }

    async fn employee_policy(
        &self,
        employee_id: &str,
    ) -> Result<Option<CompensationPolicy>, PayrollError> {
        Ok(self
            .inner
            .lock()
            .await
            .employee_policies
            .get(employee_id)
            .cloned())
    }

    async fn role_policy(&self, role_id: &str) -> Result<Option<CompensationPolicy>, PayrollError> {
        Ok(self.inner.lock().await.role_policies.get(role_id).cloned())
    }

    async fn attendance(
        &self,
        employee_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>, PayrollError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .attendance
            .iter()
            .filter(|a| a.employee_id == employee_id && a.date >= from && a.date <= to)
            .cloned()
            .collect())
    }

    async fn approved_leaves(
        &self,
        employee_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<LeaveRequest>, PayrollError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .leaves
            .iter()
            .filter(|l| {
                l.employee_id == employee_id
                    && l.status == RequestStatus::Approved
                    && l.overlaps(from, to)
            })
            .cloned()
            .collect())
    }

    async fn approved_overtimes(
        &self,
        employee_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<OvertimeRequest>, PayrollError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .overtimes
            .iter()
            .filter(|o| {
                o.employee_id == employee_id
                    && o.status == RequestStatus::Approved
                    && o.date >= from
                    && o.date <= to
            })
            .cloned()
            .collect())
    }

    async fn approved_late_early(
        &self,
        employee_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<LateEarlyRequest>, PayrollError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .late_early
            .iter()
            .filter(|r| {
                r.employee_id == employee_id
                    && r.status == RequestStatus::Approved
                    && r.date >= from
                    && r.date <= to
            })
            .cloned()
            .collect())
    }

    async fn payroll(
        &self,
        employee_id: &str,
        period: PayPeriod,
    ) -> Result<Option<PayrollRecord>, PayrollError> {
        let key = PayrollRecord::key(employee_id, period);
        Ok(self.inner.lock().await.payrolls.get(&key).cloned())
    }

    async fn payroll_by_id(&self, id: &str) -> Result<Option<PayrollRecord>, PayrollError> {
        Ok(self.inner.lock().await.payrolls.get(id).cloned())
    }

    async fn payrolls_for_period(
        &self,
        period: PayPeriod,
    ) -> Result<Vec<PayrollRecord>, PayrollError> {
        let inner = self.inner.lock().await;
        let mut records: Vec<PayrollRecord> = inner
            .payrolls
            .values()
            .filter(|r| r.period == period)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.employee_id.cmp(&b.employee_id));
        Ok(records)
    }

    async fn upsert_payroll(&self, record: PayrollRecord) -> Result<PayrollRecord, PayrollError> {
        let mut inner = self.inner.lock().await;
        if inner.fail_upserts > 0 {
            inner.fail_upserts -= 1;
            return Err(PayrollError::Storage(
                "injected upsert failure".to_string(),
            ));
        }
        inner.payrolls.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn mark_period_triggered(&self, period: PayPeriod) -> Result<bool, PayrollError> {
        Ok(self.inner.lock().await.triggered_periods.insert(period))
    }
}
