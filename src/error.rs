use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::responses::RequestMeta;
use crate::store::StoreError;

pub const E_INVALID_USAGE_CAP: &str = "INVALID_USAGE_CAP";
pub const E_INVALID_ACCOUNT_TYPE: &str = "INVALID_ACCOUNT_TYPE";
pub const E_DUPLICATE_REQUEST: &str = "DUPLICATE_REQUEST";
pub const E_SELF_REFERRAL: &str = "SELF_REFERRAL";
pub const E_INVALID_CODE: &str = "INVALID_CODE";
pub const E_CODE_TAKEN: &str = "CODE_TAKEN";
pub const E_USAGE_LIMIT_EXCEEDED: &str = "USAGE_LIMIT_EXCEEDED";
pub const E_REFERRAL_INACTIVE: &str = "REFERRAL_INACTIVE";
pub const E_REFERRAL_EXPIRED: &str = "REFERRAL_EXPIRED";
pub const E_ALREADY_DECIDED: &str = "ALREADY_DECIDED";
pub const E_INSUFFICIENT_POINTS: &str = "INSUFFICIENT_POINTS";
pub const E_INVALID_SPEND_AMOUNT: &str = "INVALID_SPEND_AMOUNT";
pub const E_CODE_EXHAUSTED: &str = "CODE_EXHAUSTED";
pub const E_NOT_FOUND: &str = "NOT_FOUND";
pub const E_BAD_REQUEST: &str = "BAD_REQUEST";
pub const E_DB_FAILURE: &str = "DB_FAILURE";

/// The typed outcome of every registry, ledger, and workflow operation.
///
/// Any variant touching a counter or point total leaves stored state
/// unchanged.
#[derive(Debug, Error)]
pub enum Error {
    /// The requested cap is below the usage already recorded.
    #[error("usage cap is below the current usage")]
    InvalidUsageCap,
    /// The caller's account type is not allowed to perform this action.
    #[error("the account type cannot perform this action")]
    InvalidAccountType,
    /// A pending join request already exists for this organization.
    #[error("a pending join request already exists for this organization")]
    DuplicateRequest,
    /// A code cannot be redeemed by its own issuer.
    #[error("a referral code cannot be redeemed by its owner")]
    SelfReferral,
    /// The string is not shaped like a referral code.
    #[error("the referral code has an invalid format")]
    InvalidCode,
    /// A caller-chosen code collides with an existing one.
    #[error("the referral code is already in use")]
    CodeTaken,
    /// The referral's usage cap has been reached.
    #[error("the referral usage limit has been reached")]
    UsageLimitExceeded,
    /// The referral has been deactivated.
    #[error("the referral is not active")]
    ReferralInactive,
    /// The referral's expiry has passed.
    #[error("the referral has expired")]
    ReferralExpired,
    /// The join request was already approved or rejected.
    #[error("the join request was already decided")]
    AlreadyDecided,
    /// The spend exceeds the available point balance.
    #[error("not enough available points")]
    InsufficientPoints,
    /// A spend of zero or negative points.
    #[error("spend amount must be positive")]
    InvalidSpendAmount,
    /// Every generated code collided; the namespace needs attention.
    #[error("could not generate a unique referral code")]
    CodeGenerationExhausted,
    /// The referenced entity does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),
    /// The storage layer failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Error {
    /// Maps a domain error onto an HTTP error with its `E_*` code.
    pub fn into_api(self, meta: RequestMeta) -> ApiErrorWithMeta {
        let msg = self.to_string();
        let (api, code) = match self {
            Error::InvalidUsageCap => (ApiError::BadRequest(msg), E_INVALID_USAGE_CAP),
            Error::InvalidAccountType => (ApiError::BadRequest(msg), E_INVALID_ACCOUNT_TYPE),
            Error::DuplicateRequest => (ApiError::Conflict(msg), E_DUPLICATE_REQUEST),
            Error::SelfReferral => (ApiError::BadRequest(msg), E_SELF_REFERRAL),
            Error::InvalidCode => (ApiError::BadRequest(msg), E_INVALID_CODE),
            Error::CodeTaken => (ApiError::Conflict(msg), E_CODE_TAKEN),
            Error::UsageLimitExceeded => (ApiError::Conflict(msg), E_USAGE_LIMIT_EXCEEDED),
            Error::ReferralInactive => (ApiError::Conflict(msg), E_REFERRAL_INACTIVE),
            Error::ReferralExpired => (ApiError::Conflict(msg), E_REFERRAL_EXPIRED),
            Error::AlreadyDecided => (ApiError::Conflict(msg), E_ALREADY_DECIDED),
            Error::InsufficientPoints => (ApiError::Conflict(msg), E_INSUFFICIENT_POINTS),
            Error::InvalidSpendAmount => (ApiError::BadRequest(msg), E_INVALID_SPEND_AMOUNT),
            Error::CodeGenerationExhausted => (ApiError::Unavailable(msg), E_CODE_EXHAUSTED),
            Error::NotFound(_) => (ApiError::NotFound(msg), E_NOT_FOUND),
            Error::Store(e) => (ApiError::Internal(e.into()), E_DB_FAILURE),
        };
        api.with_meta(meta).with_code(code)
    }
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Conflict(String),
    NotFound(String),
    Unavailable(String),
    Internal(anyhow::Error),
}

#[derive(Debug)]
pub struct ApiErrorWithMeta {
    error: ApiError,
    meta: RequestMeta,
    code: Option<String>,
}

impl ApiError {
    pub fn with_meta(self, meta: RequestMeta) -> ApiErrorWithMeta {
        ApiErrorWithMeta {
            error: self,
            meta,
            code: None,
        }
    }
}

impl ApiErrorWithMeta {
    pub fn with_code(mut self, code: &str) -> Self {
        self.code = Some(code.to_string());
        self
    }
}

impl IntoResponse for ApiErrorWithMeta {
    fn into_response(self) -> Response {
        let (status, error_message) = match self.error {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(e) => {
                error!("internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        let mut body = json!({
            "request_id": self.meta.request_id,
            "error": error_message,
        });
        if let Some(code) = self.code {
            body["code"] = json!(code);
        }

        (status, Json(body)).into_response()
    }
}
