use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::info;

use trove_db::users::NewUser;
use trove_types::api::{
    Claims, ForgotPasswordRequest, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse,
    ResetPasswordRequest,
};
use trove_types::models::{LoginIdentifier, Role, valid_email, valid_phone};

use crate::error::ApiError;
use crate::notify::NotifyTarget;
use crate::{AppState, blocking, otp};

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.username.len() < 3 || req.username.len() > 32 {
        return Err(ApiError::Validation(
            "username must be 3-32 characters".into(),
        ));
    }
    if !valid_email(&req.email) {
        return Err(ApiError::Validation("invalid email address".into()));
    }
    if !valid_phone(&req.phone) {
        return Err(ApiError::Validation(
            "phone number must be exactly 10 digits".into(),
        ));
    }
    if req.password.len() < 8 {
        return Err(ApiError::Validation(
            "password must be at least 8 characters".into(),
        ));
    }

    let password_hash = hash_password(&req.password)?;
    let email = req.email.to_lowercase();

    let db = state.clone();
    let (username, check_email, check_phone) =
        (req.username.clone(), email.clone(), req.phone.clone());
    let (name_taken, email_taken, phone_taken) = blocking(move || {
        Ok((
            db.db.get_user_by_username(&username)?.is_some(),
            db.db.get_user_by_email(&check_email)?.is_some(),
            db.db.get_user_by_phone(&check_phone)?.is_some(),
        ))
    })
    .await?;
    if name_taken {
        return Err(ApiError::Conflict("username is already taken".into()));
    }
    if email_taken {
        return Err(ApiError::Conflict("email is already registered".into()));
    }
    if phone_taken {
        return Err(ApiError::Conflict(
            "phone number is already registered".into(),
        ));
    }

    // Racing duplicates slip past the checks above; the UNIQUE constraints
    // catch them and surface as a 409 through the error mapping.
    let db = state.clone();
    let (username, insert_email, insert_phone) =
        (req.username.clone(), email.clone(), req.phone.clone());
    let created = blocking(move || {
        db.db.register_user(&NewUser {
            username: &username,
            email: &insert_email,
            phone: &insert_phone,
            password_hash: &password_hash,
        })
    })
    .await?;

    if created.main_admin {
        info!("first account registered as main admin (id {})", created.id);
    } else {
        // Phone ownership proof before anything else works.
        otp::issue_and_send(&state, NotifyTarget::Phone(&req.phone)).await?;
    }

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id: created.id,
            main_admin: created.main_admin,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let identifier = LoginIdentifier::classify(&req.identifier);
    let db = state.clone();
    let user = blocking(move || match identifier {
        LoginIdentifier::Email(email) => db.db.get_user_by_email(&email),
        LoginIdentifier::Phone(phone) => db.db.get_user_by_phone(&phone),
        LoginIdentifier::Username(name) => db.db.get_user_by_username(&name),
    })
    .await?
    .ok_or_else(|| ApiError::Unauthorized("invalid credentials".into()))?;

    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("corrupt password hash: {e}")))?;
    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthorized("invalid credentials".into()))?;

    if !user.phone_verified {
        return Err(ApiError::Forbidden(
            "phone number has not been verified yet".into(),
        ));
    }
    if !user.verified {
        return Err(ApiError::Forbidden(
            "account is awaiting admin verification".into(),
        ));
    }

    let role = user.role();
    let token = create_token(&state.jwt_secret, user.id, &user.username, role)?;

    Ok(Json(LoginResponse {
        user_id: user.id,
        username: user.username,
        role,
        token,
    }))
}

/// Step one of password recovery: a code goes to the account's phone.
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(req): Json<ForgotPasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !valid_phone(&req.phone) {
        return Err(ApiError::Validation(
            "phone number must be exactly 10 digits".into(),
        ));
    }

    let db = state.clone();
    let phone = req.phone.clone();
    if blocking(move || db.db.get_user_by_phone(&phone))
        .await?
        .is_none()
    {
        return Err(ApiError::NotFound(
            "no account with that phone number".into(),
        ));
    }

    otp::issue_and_send(&state, NotifyTarget::Phone(&req.phone)).await?;
    Ok(Json(serde_json::json!({ "sent": true })))
}

/// Step two: the code proves control of the phone, then the password is
/// re-hashed and replaced. The code is consumed either way it ends.
pub async fn reset_password(
    State(state): State<AppState>,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !valid_phone(&req.phone) {
        return Err(ApiError::Validation(
            "phone number must be exactly 10 digits".into(),
        ));
    }
    if req.new_password.len() < 8 {
        return Err(ApiError::Validation(
            "password must be at least 8 characters".into(),
        ));
    }

    let db = state.clone();
    let phone = req.phone.clone();
    let user = blocking(move || db.db.get_user_by_phone(&phone))
        .await?
        .ok_or_else(|| ApiError::NotFound("no account with that phone number".into()))?;

    let db = state.clone();
    let (identifier, code) = (req.phone.clone(), req.code.clone());
    let ok = blocking(move || db.db.verify_otp(&identifier, &code, chrono::Utc::now())).await?;
    if !ok {
        return Err(ApiError::Unauthorized("invalid or expired code".into()));
    }

    let password_hash = hash_password(&req.new_password)?;
    let db = state.clone();
    blocking(move || db.db.set_password(user.id, &password_hash)).await?;

    info!("password reset completed for user {}", user.id);
    Ok(Json(serde_json::json!({ "reset": true })))
}

fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("password hashing failed: {e}")))
}

fn create_token(
    secret: &str,
    user_id: i64,
    username: &str,
    role: Role,
) -> Result<String, ApiError> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        role,
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(anyhow::anyhow!("token encoding failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::state_with_notifier;

    const PHONE: &str = "9000000001";

    async fn register_root(state: &AppState) {
        let _ = register(
            State(state.clone()),
            Json(RegisterRequest {
                username: "root".into(),
                email: "root@campus.edu".into(),
                password: "original-pass".into(),
                phone: PHONE.into(),
            }),
        )
        .await
        .unwrap();
    }

    async fn try_login(state: &AppState, password: &str) -> Result<(), ApiError> {
        login(
            State(state.clone()),
            Json(LoginRequest {
                identifier: "root".into(),
                password: password.into(),
            }),
        )
        .await
        .map(|_| ())
    }

    #[tokio::test]
    async fn password_recovery_end_to_end() {
        let (state, notifier) = state_with_notifier();
        register_root(&state).await;

        let _ = forgot_password(
            State(state.clone()),
            Json(ForgotPasswordRequest {
                phone: PHONE.into(),
            }),
        )
        .await
        .unwrap();
        let code = notifier.take();

        let _ = reset_password(
            State(state.clone()),
            Json(ResetPasswordRequest {
                phone: PHONE.into(),
                code,
                new_password: "brand-new-pass".into(),
            }),
        )
        .await
        .unwrap();

        assert!(matches!(
            try_login(&state, "original-pass").await,
            Err(ApiError::Unauthorized(_))
        ));
        assert!(try_login(&state, "brand-new-pass").await.is_ok());
    }

    #[tokio::test]
    async fn reset_with_wrong_code_changes_nothing() {
        let (state, notifier) = state_with_notifier();
        register_root(&state).await;

        let _ = forgot_password(
            State(state.clone()),
            Json(ForgotPasswordRequest {
                phone: PHONE.into(),
            }),
        )
        .await
        .unwrap();
        let issued = notifier.take();
        let wrong = if issued == "000000" { "000001" } else { "000000" };

        let denied = reset_password(
            State(state.clone()),
            Json(ResetPasswordRequest {
                phone: PHONE.into(),
                code: wrong.into(),
                new_password: "brand-new-pass".into(),
            }),
        )
        .await;
        assert!(matches!(denied, Err(ApiError::Unauthorized(_))));

        assert!(try_login(&state, "original-pass").await.is_ok());
    }

    #[tokio::test]
    async fn recovery_for_unknown_phone_is_refused() {
        let (state, _notifier) = state_with_notifier();
        let denied = forgot_password(
            State(state.clone()),
            Json(ForgotPasswordRequest {
                phone: "9999999999".into(),
            }),
        )
        .await;
        assert!(matches!(denied, Err(ApiError::NotFound(_))));
    }
}
