use axum::{Json, extract::State, response::IntoResponse};
use chrono::Utc;
use rand::TryRngCore;
use rand::rngs::OsRng;

use trove_types::api::{OtpRequest, OtpVerifyRequest};
use trove_types::models::valid_phone;

use crate::error::ApiError;
use crate::notify::NotifyTarget;
use crate::{AppState, blocking};

/// Six decimal digits from the OS RNG, zero-padded.
pub fn generate_code() -> Result<String, ApiError> {
    let n = OsRng
        .try_next_u64()
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("os rng unavailable: {e}")))?;
    Ok(format!("{:06}", n % 1_000_000))
}

/// Issue a fresh code for the target, persist it, and hand it to the
/// notifier. Shared by registration, re-request, and profile changes.
pub async fn issue_and_send(
    state: &AppState,
    target: NotifyTarget<'_>,
) -> Result<(), ApiError> {
    let code = generate_code()?;
    let identifier = match target {
        NotifyTarget::Phone(p) => p.to_string(),
        NotifyTarget::Email(e) => e.to_string(),
    };
    let expires_at = Utc::now() + state.otp_ttl;

    let db = state.clone();
    let stored_code = code.clone();
    let stored_identifier = identifier.clone();
    blocking(move || db.db.issue_otp(&stored_identifier, &stored_code, expires_at)).await?;

    state.notifier.send_code(target, &code);
    Ok(())
}

/// Request (or re-request) a verification code for a registered phone.
pub async fn request_code(
    State(state): State<AppState>,
    Json(req): Json<OtpRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !valid_phone(&req.phone) {
        return Err(ApiError::Validation(
            "phone number must be exactly 10 digits".into(),
        ));
    }

    require_unverified_account(&state, &req.phone).await?;

    issue_and_send(&state, NotifyTarget::Phone(&req.phone)).await?;
    Ok(Json(serde_json::json!({ "sent": true })))
}

/// Verify a phone code. On success the account's phone is marked verified;
/// admin verification is the remaining gate before login works.
pub async fn verify_code(
    State(state): State<AppState>,
    Json(req): Json<OtpVerifyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !valid_phone(&req.phone) {
        return Err(ApiError::Validation(
            "phone number must be exactly 10 digits".into(),
        ));
    }
    // Refuse before touching the code: a stray call must not consume an
    // OTP issued for some other flow on the same identifier.
    require_unverified_account(&state, &req.phone).await?;

    let db = state.clone();
    let (phone, code) = (req.phone.clone(), req.code.clone());
    let ok = blocking(move || db.db.verify_otp(&phone, &code, Utc::now())).await?;
    if !ok {
        return Err(ApiError::Unauthorized("invalid or expired code".into()));
    }

    let db = state.clone();
    let phone = req.phone.clone();
    blocking(move || db.db.mark_phone_verified(&phone)).await?;

    Ok(Json(serde_json::json!({ "verified": true })))
}

/// The phone must belong to an account that has not yet passed phone
/// verification.
async fn require_unverified_account(state: &AppState, phone: &str) -> Result<(), ApiError> {
    let db = state.clone();
    let lookup = phone.to_string();
    let user = blocking(move || db.db.get_user_by_phone(&lookup))
        .await?
        .ok_or_else(|| ApiError::NotFound("no account with that phone number".into()))?;
    if user.phone_verified {
        return Err(ApiError::Conflict(
            "phone number is already verified".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::state_with_notifier;
    use trove_db::users::NewUser;

    #[test]
    fn codes_are_six_digits() {
        for _ in 0..32 {
            let code = generate_code().unwrap();
            assert_eq!(code.len(), 6);
            assert!(code.bytes().all(|b| b.is_ascii_digit()));
        }
    }

    fn seed(state: &AppState, name: &str, phone: &str) {
        state
            .db
            .register_user(&NewUser {
                username: name,
                email: &format!("{name}@campus.edu"),
                phone,
                password_hash: "$argon2id$stub",
            })
            .unwrap();
    }

    #[tokio::test]
    async fn verify_rejects_malformed_phone() {
        let (state, _) = state_with_notifier();
        let denied = verify_code(
            State(state),
            Json(OtpVerifyRequest {
                phone: "not-a-phone".into(),
                code: "123456".into(),
            }),
        )
        .await;
        assert!(matches!(denied, Err(ApiError::Validation(_))));
    }

    #[tokio::test]
    async fn verified_accounts_cannot_request_or_consume_phone_codes() {
        let (state, _) = state_with_notifier();
        // First account comes out fully verified.
        seed(&state, "root", "9000000001");

        let denied = request_code(
            State(state.clone()),
            Json(OtpRequest {
                phone: "9000000001".into(),
            }),
        )
        .await;
        assert!(matches!(denied, Err(ApiError::Conflict(_))));

        // A code issued for another flow on this identifier survives a
        // stray phone-verify call.
        let expires = Utc::now() + chrono::Duration::minutes(10);
        state.db.issue_otp("9000000001", "314159", expires).unwrap();

        let denied = verify_code(
            State(state.clone()),
            Json(OtpVerifyRequest {
                phone: "9000000001".into(),
                code: "314159".into(),
            }),
        )
        .await;
        assert!(matches!(denied, Err(ApiError::Conflict(_))));
        assert!(state.db.verify_otp("9000000001", "314159", Utc::now()).unwrap());
    }

    #[tokio::test]
    async fn unverified_account_completes_the_flow() {
        let (state, notifier) = state_with_notifier();
        seed(&state, "root", "9000000001");
        seed(&state, "student", "9000000002");

        let _ = request_code(
            State(state.clone()),
            Json(OtpRequest {
                phone: "9000000002".into(),
            }),
        )
        .await
        .unwrap();
        let code = notifier.take();

        let _ = verify_code(
            State(state.clone()),
            Json(OtpVerifyRequest {
                phone: "9000000002".into(),
                code,
            }),
        )
        .await
        .unwrap();

        let row = state
            .db
            .get_user_by_phone("9000000002")
            .unwrap()
            .unwrap();
        assert!(row.phone_verified);
        assert!(!row.verified);
    }
}
