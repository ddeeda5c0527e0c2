// src/api.rs
//
// Thin HTTP surface over the engine's own operations. Collaborator
// subsystems (auth, audit, notifications) sit in front of or beside this
// service and are not routed here.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::engine::PayrollEngine;
use crate::error::PayrollError;
use crate::model::{PayPeriod, PaymentMethod};
use crate::scheduler::RecalcScheduler;
use crate::store::PayrollStore;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<PayrollEngine>,
    pub scheduler: Arc<RecalcScheduler>,
    pub store: Arc<dyn PayrollStore>,
}

impl IntoResponse for PayrollError {
    fn into_response(self) -> Response {
        error!("Request failed: {}", self);
        let status = match &self {
            PayrollError::EmployeeNotFound(_)
            | PayrollError::PolicyNotFound(_)
            | PayrollError::RecordNotFound(_) => StatusCode::NOT_FOUND,
            PayrollError::InvalidState(_) => StatusCode::CONFLICT,
            PayrollError::Arithmetic(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PayrollError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            PayrollError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct PeriodParams {
    pub year: i32,
    pub month: u32,
}

impl PeriodParams {
    fn period(&self) -> Result<PayPeriod, PayrollError> {
        PayPeriod::from_ymd(self.year, self.month)
    }
}

#[derive(Debug, Deserialize)]
pub struct CalculateBody {
    pub employee_id: String,
    pub year: i32,
    pub month: u32,
}

#[derive(Debug, Deserialize)]
pub struct MarkPaidBody {
    pub pay_date: NaiveDate,
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Serialize)]
pub struct EnqueuedResponse {
    pub job_id: u64,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/payroll/calculate", post(calculate))
        .route("/api/payroll/calculate-all", post(calculate_all))
        .route("/api/payroll/approve-all", post(approve_all))
        .route("/api/payroll/{id}/approve", post(approve))
        .route("/api/payroll/{id}/pay", post(mark_paid))
        .route("/api/payroll", get(list_payrolls))
        .route("/api/payroll/{id}", get(get_payroll))
        .route("/api/jobs/calculate", post(enqueue_calculate))
        .route("/api/jobs/calculate-all", post(enqueue_calculate_all))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn calculate(
    State(state): State<AppState>,
    Json(body): Json<CalculateBody>,
) -> Result<impl IntoResponse, PayrollError> {
    let period = PayPeriod::from_ymd(body.year, body.month)?;
    let record = state.engine.calculate_salary(&body.employee_id, period).await?;
    Ok(Json(record))
}

async fn calculate_all(
    State(state): State<AppState>,
    Query(params): Query<PeriodParams>,
) -> Result<impl IntoResponse, PayrollError> {
    let period = params.period()?;
    let (records, report) = state.engine.calculate_all_employees(period).await?;
    Ok(Json(serde_json::json!({
        "records": records,
        "report": report,
    })))
}

async fn approve(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, PayrollError> {
    let record = state.engine.approve_salary(&id).await?;
    Ok(Json(record))
}

async fn approve_all(
    State(state): State<AppState>,
    Query(params): Query<PeriodParams>,
) -> Result<impl IntoResponse, PayrollError> {
    let period = params.period()?;
    let report = state.engine.approve_all_salaries(period).await?;
    Ok(Json(report))
}

async fn mark_paid(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<MarkPaidBody>,
) -> Result<impl IntoResponse, PayrollError> {
    let record = state
        .engine
        .mark_as_paid(&id, body.pay_date, body.payment_method)
        .await?;
    Ok(Json(record))
}

async fn get_payroll(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, PayrollError> {
    let record = state
        .store
        .payroll_by_id(&id)
        .await?
        .ok_or_else(|| PayrollError::RecordNotFound(id))?;
    Ok(Json(record))
}

async fn list_payrolls(
    State(state): State<AppState>,
    Query(params): Query<PeriodParams>,
) -> Result<impl IntoResponse, PayrollError> {
    let period = params.period()?;
    let records = state.store.payrolls_for_period(period).await?;
    Ok(Json(records))
}

async fn enqueue_calculate(
    State(state): State<AppState>,
    Json(body): Json<CalculateBody>,
) -> Result<impl IntoResponse, PayrollError> {
    let period = PayPeriod::from_ymd(body.year, body.month)?;
    let handle = state
        .scheduler
        .enqueue_calculate_salary(&body.employee_id, period)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueuedResponse { job_id: handle.id }),
    ))
}

async fn enqueue_calculate_all(
    State(state): State<AppState>,
    Query(params): Query<PeriodParams>,
) -> Result<impl IntoResponse, PayrollError> {
    let period = params.period()?;
    let handle = state.scheduler.enqueue_calculate_all(period).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueuedResponse { job_id: handle.id }),
    ))
}
