use axum::{Extension, Json, extract::State, response::IntoResponse};
use chrono::Utc;

use trove_types::api::{
    ChangeEmailRequest, ChangePhoneRequest, Claims, UserResponse, VerifyEmailChangeRequest,
    VerifyPhoneChangeRequest,
};
use trove_types::models::{ChangeKind, valid_email, valid_phone};

use crate::error::ApiError;
use crate::notify::NotifyTarget;
use crate::{AppState, blocking, otp};

pub(crate) fn user_response(row: trove_db::models::UserRow) -> UserResponse {
    let role = row.role();
    UserResponse {
        id: row.id,
        username: row.username,
        email: row.email,
        phone: row.phone,
        role,
        phone_verified: row.phone_verified,
        verified: row.verified,
        created_at: row.created_at,
    }
}

pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let user_id = claims.sub;
    let row = blocking(move || db.db.get_user_by_id(user_id))
        .await?
        .ok_or_else(|| ApiError::NotFound("account no longer exists".into()))?;
    Ok(Json(user_response(row)))
}

/// Start an email change: prove control of the new address via OTP first,
/// then the change sits in the admin review queue.
pub async fn change_email(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
    Json(req): Json<ChangeEmailRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let new_email = req.new_email.to_lowercase();
    if !valid_email(&new_email) {
        return Err(ApiError::Validation("invalid email address".into()));
    }

    let db = state.clone();
    let check = new_email.clone();
    if blocking(move || db.db.get_user_by_email(&check))
        .await?
        .is_some()
    {
        return Err(ApiError::Conflict("email is already registered".into()));
    }

    otp::issue_and_send(&state, NotifyTarget::Email(&new_email)).await?;
    Ok(Json(serde_json::json!({ "sent": true })))
}

pub async fn verify_email_change(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<VerifyEmailChangeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let new_email = req.new_email.to_lowercase();

    let db = state.clone();
    let (identifier, code) = (new_email.clone(), req.code.clone());
    let ok = blocking(move || db.db.verify_otp(&identifier, &code, Utc::now())).await?;
    if !ok {
        return Err(ApiError::Unauthorized("invalid or expired code".into()));
    }

    let db = state.clone();
    let user_id = claims.sub;
    let change_id =
        blocking(move || db.db.stage_change(user_id, ChangeKind::Email, &new_email)).await?;

    Ok(Json(
        serde_json::json!({ "staged": true, "change_id": change_id }),
    ))
}

pub async fn change_phone(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
    Json(req): Json<ChangePhoneRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !valid_phone(&req.new_phone) {
        return Err(ApiError::Validation(
            "phone number must be exactly 10 digits".into(),
        ));
    }

    let db = state.clone();
    let check = req.new_phone.clone();
    if blocking(move || db.db.get_user_by_phone(&check))
        .await?
        .is_some()
    {
        return Err(ApiError::Conflict(
            "phone number is already registered".into(),
        ));
    }

    otp::issue_and_send(&state, NotifyTarget::Phone(&req.new_phone)).await?;
    Ok(Json(serde_json::json!({ "sent": true })))
}

pub async fn verify_phone_change(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<VerifyPhoneChangeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let (identifier, code) = (req.new_phone.clone(), req.code.clone());
    let ok = blocking(move || db.db.verify_otp(&identifier, &code, Utc::now())).await?;
    if !ok {
        return Err(ApiError::Unauthorized("invalid or expired code".into()));
    }

    let db = state.clone();
    let user_id = claims.sub;
    let new_phone = req.new_phone.clone();
    let change_id =
        blocking(move || db.db.stage_change(user_id, ChangeKind::Phone, &new_phone)).await?;

    Ok(Json(
        serde_json::json!({ "staged": true, "change_id": change_id }),
    ))
}
