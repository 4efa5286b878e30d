use serde::{Deserialize, Serialize};

use crate::models::{ChangeKind, ItemStatus, Role};

// -- JWT Claims --

/// JWT claims shared across trove-api (REST middleware) and trove-gateway
/// (websocket Identify handshake). Canonical definition lives here in
/// trove-types to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub username: String,
    pub role: Role,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub phone: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: i64,
    /// True only for the very first account, which is created as the
    /// fully verified main administrator.
    pub main_admin: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    /// Email, phone number, or username — classified by shape.
    pub identifier: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: i64,
    pub username: String,
    pub role: Role,
    pub token: String,
}

// -- Password recovery --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForgotPasswordRequest {
    pub phone: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResetPasswordRequest {
    pub phone: String,
    pub code: String,
    pub new_password: String,
}

// -- OTP --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OtpRequest {
    pub phone: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OtpVerifyRequest {
    pub phone: String,
    pub code: String,
}

// -- Items --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateItemRequest {
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub description: Option<String>,
    pub location: String,
    #[serde(default)]
    pub date: Option<String>,
    /// Reference to an already-uploaded image; the upload pipeline itself
    /// is out of scope.
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub contact_info: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ItemResponse {
    pub id: i64,
    pub owner_id: i64,
    pub owner_name: String,
    pub name: String,
    pub category: String,
    pub description: Option<String>,
    pub location: String,
    pub date: Option<String>,
    pub image_url: Option<String>,
    pub contact_info: Option<String>,
    pub status: ItemStatus,
    pub claimed_by: Option<i64>,
    pub claimed_at: Option<String>,
    pub recovered: bool,
    pub satisfaction_rating: Option<i64>,
    pub created_at: String,
    /// Present only on the detail view: whether the requesting user may
    /// claim this item right now.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub can_claim: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RatingRequest {
    pub rating: i64,
}

// -- Chat --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessageResponse {
    pub id: i64,
    pub item_id: i64,
    pub sender_id: i64,
    pub sender_name: String,
    pub body: String,
    pub created_at: String,
}

// -- Profile changes --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChangeEmailRequest {
    pub new_email: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerifyEmailChangeRequest {
    pub new_email: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChangePhoneRequest {
    pub new_phone: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerifyPhoneChangeRequest {
    pub new_phone: String,
    pub code: String,
}

// -- Admin --

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub phone: String,
    pub role: Role,
    pub phone_verified: bool,
    pub verified: bool,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct PendingChangeResponse {
    pub id: i64,
    pub user_id: i64,
    pub username: String,
    pub kind: ChangeKind,
    pub new_value: String,
    pub requested_at: String,
}

/// One row of the main-admin chat monitor: items with at least one message.
#[derive(Debug, Serialize)]
pub struct ChatSummaryResponse {
    pub item_id: i64,
    pub item_name: String,
    pub status: ItemStatus,
    pub owner_name: String,
    pub claimer_name: Option<String>,
    pub message_count: i64,
}
