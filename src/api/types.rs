use serde::{Deserialize, Serialize};

use crate::ledger::consumption::SubjectKind;
use crate::storage::HistoryKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrgRequest {
    pub org_id: String,
    pub quota_limit: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetQuotaLimitRequest {
    pub quota_limit: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateStudentRequest {
    pub org_id: String,
    pub student_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocateRequest {
    pub org_id: String,
    pub student_id: String,
    pub amount: i64,
    pub reason: String,
    pub performed_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocateResponse {
    pub new_allocated: u64,
    pub new_remaining: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumeRequest {
    pub org_id: String,
    pub subject_id: String,
    pub subject_kind: SubjectKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    pub student_id: Option<String>,
    pub kind: Option<HistoryKind>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    pub details: Option<serde_json::Value>,
}
