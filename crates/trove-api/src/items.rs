use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use trove_db::items::NewItem;
use trove_db::models::ItemRow;
use trove_gateway::dispatcher::Room;
use trove_types::api::{Claims, CreateItemRequest, ItemResponse, RatingRequest};
use trove_types::events::GatewayEvent;
use trove_types::models::{Capability, ItemStatus};

use crate::error::ApiError;
use crate::{AppState, blocking};

pub(crate) fn item_response(row: ItemRow, can_claim: Option<bool>) -> ItemResponse {
    let status = row.status();
    ItemResponse {
        id: row.id,
        owner_id: row.user_id,
        owner_name: row.owner_name,
        name: row.name,
        category: row.category,
        description: row.description,
        location: row.location,
        date: row.date,
        image_url: row.image_url,
        contact_info: row.contact_info,
        status,
        claimed_by: row.claimed_by,
        claimed_at: row.claimed_at,
        recovered: row.recovered,
        satisfaction_rating: row.satisfaction_rating,
        created_at: row.created_at,
        can_claim,
    }
}

/// Rooms that should hear about a state change on an item: the item's chat
/// room plus the personal rooms of both parties.
fn interested_rooms(item: &ItemRow) -> Vec<Room> {
    let mut rooms = vec![Room::Item(item.id), Room::User(item.user_id)];
    if let Some(claimant) = item.claimed_by {
        rooms.push(Room::User(claimant));
    }
    rooms
}

pub async fn create_item(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateItemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::Validation("item name is required".into()));
    }
    if req.name.len() > 120 {
        return Err(ApiError::Validation("item name is too long".into()));
    }
    if req.category.trim().is_empty() {
        return Err(ApiError::Validation("category is required".into()));
    }
    if req.location.trim().is_empty() {
        return Err(ApiError::Validation("location is required".into()));
    }

    let db = state.clone();
    let user_id = claims.sub;
    let row = blocking(move || {
        // Role comes from the row, not the token, so a demotion applies to
        // the very next post.
        let user = db
            .db
            .get_user_by_id(user_id)?
            .ok_or(trove_db::StoreError::NotFound)?;
        let status = if user.role().can(Capability::ModerateItems) {
            ItemStatus::Approved
        } else {
            ItemStatus::Pending
        };

        let id = db.db.create_item(
            user_id,
            &NewItem {
                name: req.name.trim(),
                category: req.category.trim(),
                description: req.description.as_deref(),
                location: req.location.trim(),
                date: req.date.as_deref(),
                image_url: req.image_url.as_deref(),
                contact_info: req.contact_info.as_deref(),
            },
            status,
        )?;
        db.db.get_item(id)?.ok_or(trove_db::StoreError::NotFound)
    })
    .await?;

    Ok((StatusCode::CREATED, Json(item_response(row, None))))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// `?mine=true` returns the caller's own posts, pending ones included.
    #[serde(default)]
    pub mine: bool,
}

/// The public board: everything except items still awaiting approval.
pub async fn list_items(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let owner = claims.sub;
    let rows = blocking(move || {
        if query.mine {
            db.db.list_items_by_owner(owner)
        } else {
            db.db.list_board()
        }
    })
    .await?;
    let items: Vec<_> = rows.into_iter().map(|r| item_response(r, None)).collect();
    Ok(Json(items))
}

pub async fn get_item(
    State(state): State<AppState>,
    Path(item_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let row = blocking(move || db.db.get_item(item_id))
        .await?
        .ok_or_else(|| ApiError::NotFound("item not found".into()))?;

    // Pending items are invisible to everyone but their owner and moderators.
    if row.status() == ItemStatus::Pending
        && row.user_id != claims.sub
        && !claims.role.can(Capability::ModerateItems)
    {
        return Err(ApiError::NotFound("item not found".into()));
    }

    let can_claim = row.status() == ItemStatus::Approved && row.user_id != claims.sub;
    Ok(Json(item_response(row, Some(can_claim))))
}

pub async fn claim_item(
    State(state): State<AppState>,
    Path(item_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let claimant = claims.sub;
    let row = blocking(move || db.db.claim_item(item_id, claimant)).await?;

    state
        .dispatcher
        .publish_many(
            &interested_rooms(&row),
            GatewayEvent::ItemClaimed {
                item_id: row.id,
                claimed_by: claims.sub,
                claimer_name: claims.username.clone(),
            },
        )
        .await;

    Ok(Json(item_response(row, None)))
}

/// Mark a claimed item as physically recovered. Allowed for the owner and
/// for item moderators.
pub async fn recover_item(
    State(state): State<AppState>,
    Path(item_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let actor = claims.sub;
    let row = blocking(move || {
        let row = db
            .db
            .get_item(item_id)?
            .ok_or(trove_db::StoreError::NotFound)?;
        let actor_row = db
            .db
            .get_user_by_id(actor)?
            .ok_or(trove_db::StoreError::NotFound)?;
        if row.user_id != actor && !actor_row.role().can(Capability::ModerateItems) {
            return Err(trove_db::StoreError::NotPermitted);
        }
        db.db.recover_item(item_id)?;
        db.db.get_item(item_id)?.ok_or(trove_db::StoreError::NotFound)
    })
    .await?;

    state
        .dispatcher
        .publish_many(
            &interested_rooms(&row),
            GatewayEvent::ItemRecovered { item_id: row.id },
        )
        .await;

    Ok(Json(item_response(row, None)))
}

/// The claimant rates the recovery, once, 1-5.
pub async fn rate_item(
    State(state): State<AppState>,
    Path(item_id): Path<i64>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<RatingRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let rater = claims.sub;
    let rating = req.rating;
    let row = blocking(move || {
        db.db.rate_item(item_id, rater, rating)?;
        db.db.get_item(item_id)?.ok_or(trove_db::StoreError::NotFound)
    })
    .await?;

    state
        .dispatcher
        .publish_many(
            &interested_rooms(&row),
            GatewayEvent::SatisfactionRated {
                item_id: row.id,
                rating,
            },
        )
        .await;

    Ok(Json(item_response(row, None)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::state_with_notifier;
    use trove_db::users::NewUser;
    use trove_types::models::Role;

    fn claims_for(state: &AppState, name: &str, phone: &str) -> Claims {
        let id = state
            .db
            .register_user(&NewUser {
                username: name,
                email: &format!("{name}@campus.edu"),
                phone,
                password_hash: "$argon2id$stub",
            })
            .unwrap()
            .id;
        Claims {
            sub: id,
            username: name.to_string(),
            role: Role::Student,
            exp: usize::MAX,
        }
    }

    fn request(name: &str) -> CreateItemRequest {
        CreateItemRequest {
            name: name.to_string(),
            category: "electronics".into(),
            description: None,
            location: "Lab 2".into(),
            date: None,
            image_url: None,
            contact_info: None,
        }
    }

    #[tokio::test]
    async fn name_validation_distinguishes_missing_from_too_long() {
        let (state, _) = state_with_notifier();
        let claims = claims_for(&state, "poster", "9000000001");

        let missing = create_item(
            State(state.clone()),
            Extension(claims.clone()),
            Json(request("   ")),
        )
        .await;
        match missing {
            Err(ApiError::Validation(msg)) => assert_eq!(msg, "item name is required"),
            _ => panic!("blank name must be a validation error"),
        }

        let long = create_item(
            State(state.clone()),
            Extension(claims.clone()),
            Json(request(&"x".repeat(121))),
        )
        .await;
        match long {
            Err(ApiError::Validation(msg)) => assert_eq!(msg, "item name is too long"),
            _ => panic!("over-length name must be a validation error"),
        }

        // The boundary itself is accepted.
        let ok = create_item(
            State(state.clone()),
            Extension(claims),
            Json(request(&"x".repeat(120))),
        )
        .await;
        assert!(ok.is_ok());
    }
}
