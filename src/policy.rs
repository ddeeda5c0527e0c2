// src/policy.rs
//
// Effective compensation policy resolution: an employee-specific policy
// shadows the role-level default; no policy at all is fatal for the
// calculation.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use crate::calendar::WorkCalendarConfig;
use crate::error::PayrollError;
use crate::model::{checked_div, checked_mul, CompensationPolicy, Employee};
use crate::store::PayrollStore;

pub async fn resolve_effective_policy(
    store: &dyn PayrollStore,
    employee: &Employee,
) -> Result<CompensationPolicy, PayrollError> {
    if let Some(policy) = store.employee_policy(&employee.id).await? {
        debug!("Using employee-specific policy for {}", employee.id);
        return validated(policy, employee);
    }

    // Role fallback: when more than one role is assigned the lowest role id
    // wins, so resolution stays deterministic.
    if employee.role_ids.len() > 1 {
        debug!(
            "Employee {} has {} roles; resolving policy via the lowest role id",
            employee.id,
            employee.role_ids.len()
        );
    }
    if let Some(role_id) = employee.role_ids.iter().min() {
        if let Some(policy) = store.role_policy(role_id).await? {
            debug!("Using role {} policy for {}", role_id, employee.id);
            return validated(policy, employee);
        }
    }

    Err(PayrollError::PolicyNotFound(employee.id.clone()))
}

fn validated(
    policy: CompensationPolicy,
    employee: &Employee,
) -> Result<CompensationPolicy, PayrollError> {
    if policy.base_salary <= dec!(0) {
        return Err(PayrollError::InvalidInput(format!(
            "non-positive base salary in policy for employee {}",
            employee.id
        )));
    }
    Ok(policy)
}

/// The policy's hourly rate, derived from the base salary over the standard
/// month (`base / (hours_per_day * days_per_month)`) when not set
/// explicitly. Rounded to 2 dp so both paths round the same way.
pub fn effective_hourly_rate(
    policy: &CompensationPolicy,
    calendar: &WorkCalendarConfig,
) -> Result<Decimal, PayrollError> {
    if let Some(rate) = policy.hourly_rate {
        return Ok(rate.round_dp(2));
    }
    let hours_per_month = checked_mul(
        Decimal::from(calendar.hours_per_day),
        Decimal::from(calendar.work_days_per_month),
        "hourly rate",
    )?;
    Ok(checked_div(policy.base_salary, hours_per_month, "hourly rate")?.round_dp(2))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(base: Decimal) -> CompensationPolicy {
        CompensationPolicy {
            employee_id: Some("E1".into()),
            role_id: None,
            base_salary: base,
            allowance: dec!(0),
            insurance_rate_percent: dec!(0),
            hourly_rate: None,
            overtime_multiplier: dec!(1.5),
        }
    }

    #[test]
    fn derives_hourly_rate_over_standard_month() {
        let cal = WorkCalendarConfig::default();
        let rate = effective_hourly_rate(&policy(dec!(22000000)), &cal).unwrap();
        // 22,000,000 / (8 * 22) = 125,000
        assert_eq!(rate, dec!(125000.00));
    }

    #[test]
    fn explicit_hourly_rate_wins() {
        let cal = WorkCalendarConfig::default();
        let mut p = policy(dec!(22000000));
        p.hourly_rate = Some(dec!(99000));
        assert_eq!(effective_hourly_rate(&p, &cal).unwrap(), dec!(99000.00));
    }
}
