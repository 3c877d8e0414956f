use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use tracing::{error, info};

use crate::ledger::{LedgerError, OrgSummary};
use crate::storage::{HistoryEntry, HistoryFilter, StorageError};

use super::types::{
    AckResponse, AllocateRequest, AllocateResponse, ConsumeRequest, CreateOrgRequest,
    CreateStudentRequest, ErrorResponse, HistoryQuery, SetQuotaLimitRequest,
};
use super::ApiState;

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

pub async fn create_org(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<CreateOrgRequest>,
) -> ApiResult<AckResponse> {
    if request.org_id.trim().is_empty() {
        return Err(bad_request("invalid_org_id", "org_id cannot be empty"));
    }

    state
        .database
        .create_org_account(&request.org_id, request.quota_limit)
        .map_err(storage_error_response)?;

    info!(org_id = %request.org_id, quota_limit = request.quota_limit, "organization account created");
    Ok(Json(AckResponse { success: true }))
}

pub async fn set_quota_limit(
    State(state): State<Arc<ApiState>>,
    Path(org_id): Path<String>,
    Json(request): Json<SetQuotaLimitRequest>,
) -> ApiResult<AckResponse> {
    state
        .database
        .set_quota_limit(&org_id, request.quota_limit)
        .map_err(storage_error_response)?;

    info!(org_id = %org_id, quota_limit = request.quota_limit, "quota limit updated");
    Ok(Json(AckResponse { success: true }))
}

pub async fn create_student(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<CreateStudentRequest>,
) -> ApiResult<AckResponse> {
    if request.student_id.trim().is_empty() {
        return Err(bad_request("invalid_student_id", "student_id cannot be empty"));
    }

    state
        .database
        .create_student_account(&request.org_id, &request.student_id)
        .map_err(storage_error_response)?;

    info!(org_id = %request.org_id, student_id = %request.student_id, "student account created");
    Ok(Json(AckResponse { success: true }))
}

pub async fn allocate(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<AllocateRequest>,
) -> ApiResult<AllocateResponse> {
    let balances = state
        .allocations
        .allocate(
            &request.org_id,
            &request.student_id,
            request.amount,
            &request.reason,
            &request.performed_by,
        )
        .map_err(ledger_error_response)?;

    Ok(Json(AllocateResponse {
        new_allocated: balances.new_allocated,
        new_remaining: balances.new_remaining,
    }))
}

pub async fn consume(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<ConsumeRequest>,
) -> ApiResult<AckResponse> {
    state
        .consumption
        .consume(&request.org_id, &request.subject_id, request.subject_kind)
        .map_err(ledger_error_response)?;

    Ok(Json(AckResponse { success: true }))
}

pub async fn get_summary(
    State(state): State<Arc<ApiState>>,
    Path(org_id): Path<String>,
) -> ApiResult<OrgSummary> {
    let summary = state
        .queries
        .get_summary(&org_id)
        .map_err(ledger_error_response)?;
    Ok(Json(summary))
}

pub async fn get_history(
    State(state): State<Arc<ApiState>>,
    Path(org_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Vec<HistoryEntry>> {
    let filter = HistoryFilter {
        student_id: query.student_id,
        kind: query.kind,
        limit: query.limit,
    };

    let entries = state
        .queries
        .history(&org_id, &filter)
        .map_err(ledger_error_response)?;
    Ok(Json(entries))
}

pub async fn health_check() -> ApiResult<serde_json::Value> {
    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": "credit-ledger"
    })))
}

fn ledger_error_response(err: LedgerError) -> (StatusCode, Json<ErrorResponse>) {
    match err {
        LedgerError::InvalidAmount(amount) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "amount must be a non-zero integer".to_string(),
                code: "invalid_amount".to_string(),
                details: Some(serde_json::json!({ "amount": amount })),
            }),
        ),
        LedgerError::AccountNotFound(id) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("account {id} not found"),
                code: "account_not_found".to_string(),
                details: None,
            }),
        ),
        LedgerError::InsufficientOrgCredits { available } => (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: format!("organization has only {available} credits available"),
                code: "insufficient_org_credits".to_string(),
                details: Some(serde_json::json!({ "available": available })),
            }),
        ),
        LedgerError::InsufficientUnusedCredits { available } => (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: format!("student has only {available} unused credits"),
                code: "insufficient_unused_credits".to_string(),
                details: Some(serde_json::json!({ "available": available })),
            }),
        ),
        LedgerError::NoCreditsRemaining => (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: "no credits remaining".to_string(),
                code: "no_credits_remaining".to_string(),
                details: None,
            }),
        ),
        // Balances may have moved again by now, so no detail is reported.
        LedgerError::TransactionConflict { .. } => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: "the ledger is busy, please try again".to_string(),
                code: "transaction_conflict".to_string(),
                details: None,
            }),
        ),
        LedgerError::Storage(err) => storage_error_response(err),
    }
}

fn storage_error_response(err: StorageError) -> (StatusCode, Json<ErrorResponse>) {
    match err {
        StorageError::AccountNotFound(id) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("account {id} not found"),
                code: "account_not_found".to_string(),
                details: None,
            }),
        ),
        StorageError::AccountExists(id) => (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: format!("account {id} already exists"),
                code: "account_exists".to_string(),
                details: None,
            }),
        ),
        StorageError::QuotaBelowCommitted { requested, committed } => (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: format!(
                    "quota limit {requested} is below already committed credits {committed}"
                ),
                code: "quota_below_committed".to_string(),
                details: Some(serde_json::json!({
                    "requested": requested,
                    "committed": committed
                })),
            }),
        ),
        StorageError::InvalidValue(message) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: message,
                code: "invalid_value".to_string(),
                details: None,
            }),
        ),
        err => internal_error(err),
    }
}

fn bad_request(code: &str, message: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.to_string(),
            code: code.to_string(),
            details: None,
        }),
    )
}

fn internal_error<E: std::fmt::Display>(err: E) -> (StatusCode, Json<ErrorResponse>) {
    error!(error = %err, "ledger API internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "internal server error".to_string(),
            code: "internal_error".to_string(),
            details: Some(serde_json::json!({ "message": err.to_string() })),
        }),
    )
}
