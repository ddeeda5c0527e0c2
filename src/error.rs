// src/error.rs
use thiserror::Error;

/// Error taxonomy for the payroll core.
///
/// `Storage` is the only transient variant; everything else is a business
/// failure and must not be retried by the job queue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayrollError {
    #[error("Employee not found: {0}")]
    EmployeeNotFound(String),

    #[error("Salary settings not found for this employee: {0}")]
    PolicyNotFound(String),

    #[error("Payroll record not found: {0}")]
    RecordNotFound(String),

    #[error("Invalid payroll state: {0}")]
    InvalidState(String),

    #[error("Error calculating {0}")]
    Arithmetic(String),

    #[error("Storage unavailable: {0}")]
    Storage(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl PayrollError {
    /// Transient failures are eligible for retry with backoff; business
    /// failures are terminal for the job that hit them.
    pub fn is_transient(&self) -> bool {
        matches!(self, PayrollError::Storage(_))
    }
}
