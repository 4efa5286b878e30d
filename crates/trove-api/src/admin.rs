use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use tracing::info;

use trove_db::models::UserRow;
use trove_db::{Database, StoreError, StoreResult};
use trove_types::api::{ChatSummaryResponse, Claims, PendingChangeResponse};
use trove_types::models::{Capability, ChangeKind, ItemStatus, Role};

use crate::error::ApiError;
use crate::items::item_response;
use crate::profile::user_response;
use crate::{AppState, blocking};

/// Re-read the acting admin's row and check the capability against it.
/// The token's role claim is not trusted here: a demotion must bite
/// immediately, not at token expiry.
fn require_actor(db: &Database, actor_id: i64, cap: Capability) -> StoreResult<UserRow> {
    let actor = db.get_user_by_id(actor_id)?.ok_or(StoreError::NotFound)?;
    if !actor.role().can(cap) {
        return Err(StoreError::NotPermitted);
    }
    Ok(actor)
}

// -- Users --

pub async fn list_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let actor = claims.sub;
    let rows = blocking(move || {
        require_actor(&db.db, actor, Capability::ModerateUsers)?;
        db.db.list_users()
    })
    .await?;
    let users: Vec<_> = rows.into_iter().map(user_response).collect();
    Ok(Json(users))
}

/// Approve a pending account. Refused until the user has proved their
/// phone number.
pub async fn verify_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let actor = claims.sub;
    blocking(move || {
        require_actor(&db.db, actor, Capability::ModerateUsers)?;
        db.db.verify_user(user_id)
    })
    .await?;
    info!("user {} verified by admin {}", user_id, claims.sub);
    Ok(Json(serde_json::json!({ "verified": true })))
}

/// Reject a pending account: the row is deleted outright.
pub async fn reject_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    delete_account(state, claims, user_id, Capability::ModerateUsers).await?;
    Ok(Json(serde_json::json!({ "rejected": true })))
}

/// Remove an existing account. Main admin only.
pub async fn remove_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    delete_account(state, claims, user_id, Capability::ManageRoles).await?;
    Ok(Json(serde_json::json!({ "removed": true })))
}

async fn delete_account(
    state: AppState,
    claims: Claims,
    user_id: i64,
    cap: Capability,
) -> Result<(), ApiError> {
    let db = state.clone();
    let actor = claims.sub;
    blocking(move || {
        require_actor(&db.db, actor, cap)?;
        let target = db.db.get_user_by_id(user_id)?.ok_or(StoreError::NotFound)?;
        // The main admin account is not deletable, by anyone.
        if target.role() == Role::MainAdmin {
            return Err(StoreError::NotPermitted);
        }
        db.db.delete_user(user_id)
    })
    .await?;
    info!("user {} deleted by admin {}", user_id, claims.sub);
    Ok(())
}

pub async fn promote_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    set_user_role(state, claims, user_id, Role::Admin).await?;
    Ok(Json(serde_json::json!({ "role": Role::Admin })))
}

pub async fn demote_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    set_user_role(state, claims, user_id, Role::Student).await?;
    Ok(Json(serde_json::json!({ "role": Role::Student })))
}

async fn set_user_role(
    state: AppState,
    claims: Claims,
    user_id: i64,
    role: Role,
) -> Result<(), ApiError> {
    let db = state.clone();
    let actor = claims.sub;
    blocking(move || {
        require_actor(&db.db, actor, Capability::ManageRoles)?;
        let target = db.db.get_user_by_id(user_id)?.ok_or(StoreError::NotFound)?;
        if target.role() == Role::MainAdmin {
            return Err(StoreError::NotPermitted);
        }
        db.db.set_role(user_id, role)
    })
    .await?;
    info!(
        "user {} set to role {} by admin {}",
        user_id,
        role.as_str(),
        claims.sub
    );
    Ok(())
}

// -- Items --

pub async fn list_pending_items(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let actor = claims.sub;
    let rows = blocking(move || {
        require_actor(&db.db, actor, Capability::ModerateItems)?;
        db.db.list_pending_items()
    })
    .await?;
    let items: Vec<_> = rows.into_iter().map(|r| item_response(r, None)).collect();
    Ok(Json(items))
}

pub async fn approve_item(
    State(state): State<AppState>,
    Path(item_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let actor = claims.sub;
    let row = blocking(move || {
        require_actor(&db.db, actor, Capability::ModerateItems)?;
        db.db.approve_item(item_id)?;
        db.db.get_item(item_id)?.ok_or(StoreError::NotFound)
    })
    .await?;
    info!("item {} approved by admin {}", item_id, claims.sub);
    Ok(Json(item_response(row, None)))
}

/// Reject a pending post: it is removed rather than left in limbo.
pub async fn reject_item(
    State(state): State<AppState>,
    Path(item_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let actor = claims.sub;
    blocking(move || {
        require_actor(&db.db, actor, Capability::ModerateItems)?;
        let item = db.db.get_item(item_id)?.ok_or(StoreError::NotFound)?;
        if item.status() != ItemStatus::Pending {
            return Err(StoreError::NotPending);
        }
        db.db.remove_item(item_id)
    })
    .await?;
    info!("item {} rejected by admin {}", item_id, claims.sub);
    Ok(Json(serde_json::json!({ "rejected": true })))
}

/// Permanently remove any item and its chat history. Main admin only.
pub async fn remove_item(
    State(state): State<AppState>,
    Path(item_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let actor = claims.sub;
    blocking(move || {
        require_actor(&db.db, actor, Capability::RemoveItems)?;
        db.db.remove_item(item_id)
    })
    .await?;
    info!("item {} removed by admin {}", item_id, claims.sub);
    Ok(Json(serde_json::json!({ "removed": true })))
}

// -- Staged contact changes --

pub async fn list_changes(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let actor = claims.sub;
    let rows = blocking(move || {
        require_actor(&db.db, actor, Capability::ReviewChanges)?;
        db.db.list_pending_changes()
    })
    .await?;

    let changes: Vec<_> = rows
        .into_iter()
        .map(|r| PendingChangeResponse {
            id: r.id,
            user_id: r.user_id,
            username: r.username,
            kind: ChangeKind::parse(&r.kind).unwrap_or(ChangeKind::Email),
            new_value: r.new_value,
            requested_at: r.requested_at,
        })
        .collect();
    Ok(Json(changes))
}

pub async fn approve_change(
    State(state): State<AppState>,
    Path(change_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let actor = claims.sub;
    blocking(move || {
        require_actor(&db.db, actor, Capability::ReviewChanges)?;
        db.db.approve_change(change_id)
    })
    .await?;
    info!("change {} approved by admin {}", change_id, claims.sub);
    Ok(Json(serde_json::json!({ "approved": true })))
}

pub async fn reject_change(
    State(state): State<AppState>,
    Path(change_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let actor = claims.sub;
    blocking(move || {
        require_actor(&db.db, actor, Capability::ReviewChanges)?;
        db.db.reject_change(change_id)
    })
    .await?;
    info!("change {} rejected by admin {}", change_id, claims.sub);
    Ok(Json(serde_json::json!({ "rejected": true })))
}

// -- Chat monitor --

/// Main-admin overview of every chat with at least one message.
pub async fn chat_summaries(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let actor = claims.sub;
    let rows = blocking(move || {
        require_actor(&db.db, actor, Capability::MonitorChats)?;
        db.db.chat_summaries()
    })
    .await?;

    let summaries: Vec<_> = rows
        .into_iter()
        .map(|r| ChatSummaryResponse {
            item_id: r.item_id,
            item_name: r.item_name,
            status: ItemStatus::parse(&r.status).unwrap_or(ItemStatus::Pending),
            owner_name: r.owner_name,
            claimer_name: r.claimer_name,
            message_count: r.message_count,
        })
        .collect();
    Ok(Json(summaries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use trove_db::users::NewUser;

    fn seed(db: &Database, username: &str, tail: &str) -> i64 {
        db.register_user(&NewUser {
            username,
            email: &format!("{username}@campus.edu"),
            phone: &format!("90000{tail:0>5}"),
            password_hash: "x",
        })
        .unwrap()
        .id
    }

    #[test]
    fn capability_gate_reads_the_row_not_the_token() {
        let db = Database::open_in_memory().unwrap();
        let root = seed(&db, "root", "1");
        let member = seed(&db, "member", "2");

        assert!(require_actor(&db, root, Capability::ManageRoles).is_ok());
        assert!(matches!(
            require_actor(&db, member, Capability::ModerateUsers),
            Err(StoreError::NotPermitted)
        ));

        // Promotion applies to the very next call, no re-login needed.
        db.set_role(member, Role::Admin).unwrap();
        assert!(require_actor(&db, member, Capability::ModerateUsers).is_ok());
        assert!(matches!(
            require_actor(&db, member, Capability::ManageRoles),
            Err(StoreError::NotPermitted)
        ));
    }

    #[test]
    fn unknown_actor_is_refused() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            require_actor(&db, 42, Capability::ModerateUsers),
            Err(StoreError::NotFound)
        ));
    }
}
