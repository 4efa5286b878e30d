use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use trove_db::StoreResult;
use trove_db::models::ChatMessageRow;
use trove_gateway::dispatcher::Room;
use trove_types::api::{ChatMessageResponse, Claims, SendMessageRequest};
use trove_types::events::GatewayEvent;
use trove_types::models::Capability;

use crate::error::ApiError;
use crate::{AppState, blocking};

const MAX_MESSAGE_LEN: usize = 2000;

fn message_response(row: ChatMessageRow) -> ChatMessageResponse {
    ChatMessageResponse {
        id: row.id,
        item_id: row.item_id,
        sender_id: row.sender_id,
        sender_name: row.sender_name,
        body: row.body,
        created_at: row.created_at,
    }
}

/// Who may read an item's chat: its participants, or an account whose
/// current row grants monitoring. The role is read fresh, not taken from
/// the token, so a demoted monitor loses access immediately.
fn authorize_history(db: &trove_db::Database, item_id: i64, user_id: i64) -> StoreResult<()> {
    let actor = db
        .get_user_by_id(user_id)?
        .ok_or(trove_db::StoreError::NotFound)?;
    if actor.role().can(Capability::MonitorChats) {
        db.item_parties(item_id)?
            .ok_or(trove_db::StoreError::NotFound)?;
    } else {
        db.assert_chat_participant(item_id, user_id)?;
    }
    Ok(())
}

/// Chat history for an item. Participants only, except the main admin,
/// who may read any chat (monitoring).
pub async fn get_messages(
    State(state): State<AppState>,
    Path(item_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let user_id = claims.sub;
    let rows = blocking(move || {
        authorize_history(&db.db, item_id, user_id)?;
        db.db.messages_for_item(item_id)
    })
    .await?;

    let messages: Vec<_> = rows.into_iter().map(message_response).collect();
    Ok(Json(messages))
}

/// Post a message to an item's chat. Owner and claimant only; monitoring
/// is read-only.
pub async fn send_message(
    State(state): State<AppState>,
    Path(item_id): Path<i64>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let body = req.body.trim().to_string();
    if body.is_empty() {
        return Err(ApiError::Validation("message body is empty".into()));
    }
    if body.len() > MAX_MESSAGE_LEN {
        return Err(ApiError::Validation("message is too long".into()));
    }

    let db = state.clone();
    let sender = claims.sub;
    let (row, parties) = blocking(move || {
        let parties = db.db.assert_chat_participant(item_id, sender)?;
        let row = db.db.insert_message(item_id, sender, &body)?;
        Ok((row, parties))
    })
    .await?;

    let mut rooms = vec![Room::Item(item_id), Room::User(parties.owner_id)];
    if let Some(claimant) = parties.claimed_by {
        rooms.push(Room::User(claimant));
    }
    state
        .dispatcher
        .publish_many(
            &rooms,
            GatewayEvent::MessageCreate {
                id: row.id,
                item_id: row.item_id,
                sender_id: row.sender_id,
                sender_name: row.sender_name.clone(),
                body: row.body.clone(),
                timestamp: row.created_at.clone(),
            },
        )
        .await;

    Ok((StatusCode::CREATED, Json(message_response(row))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use trove_db::items::NewItem;
    use trove_db::users::NewUser;
    use trove_db::{Database, StoreError};
    use trove_types::models::{ItemStatus, Role};

    fn seed_user(db: &Database, name: &str, tail: &str) -> i64 {
        db.register_user(&NewUser {
            username: name,
            email: &format!("{name}@campus.edu"),
            phone: &format!("90000{tail:0>5}"),
            password_hash: "$argon2id$stub",
        })
        .unwrap()
        .id
    }

    fn seed_item(db: &Database, owner: i64) -> i64 {
        db.create_item(
            owner,
            &NewItem {
                name: "Calculator",
                category: "electronics",
                description: None,
                location: "Lab 2",
                date: None,
                image_url: None,
                contact_info: None,
            },
            ItemStatus::Approved,
        )
        .unwrap()
    }

    #[test]
    fn demoted_monitor_loses_chat_access_at_once() {
        let db = Database::open_in_memory().unwrap();
        let root = seed_user(&db, "root", "1");
        let owner = seed_user(&db, "owner", "2");
        let item = seed_item(&db, owner);

        // The first account monitors any chat.
        assert!(authorize_history(&db, item, root).is_ok());

        // After demotion the row decides, no matter what an old token says.
        db.set_role(root, Role::Student).unwrap();
        assert!(matches!(
            authorize_history(&db, item, root),
            Err(StoreError::NotPermitted)
        ));

        // Participants keep their access.
        assert!(authorize_history(&db, item, owner).is_ok());
    }

    #[test]
    fn outsider_is_refused_even_for_existing_items() {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, "root", "1");
        let owner = seed_user(&db, "owner", "2");
        let other = seed_user(&db, "other", "3");
        let item = seed_item(&db, owner);

        assert!(matches!(
            authorize_history(&db, item, other),
            Err(StoreError::NotPermitted)
        ));
        assert!(matches!(
            authorize_history(&db, 999, owner),
            Err(StoreError::NotFound)
        ));
    }
}
