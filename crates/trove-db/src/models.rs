/// Database row types — these map directly to SQLite rows.
/// Distinct from trove-types API models to keep the DB layer independent.
use trove_types::models::{ItemStatus, Role};

pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub phone: String,
    pub password: String,
    pub role: String,
    pub phone_verified: bool,
    pub verified: bool,
    pub created_at: String,
}

impl UserRow {
    /// Unknown role strings demote to the least-privileged role.
    pub fn role(&self) -> Role {
        Role::parse(&self.role).unwrap_or(Role::Student)
    }
}

pub struct ItemRow {
    pub id: i64,
    pub user_id: i64,
    pub owner_name: String,
    pub name: String,
    pub category: String,
    pub description: Option<String>,
    pub location: String,
    pub date: Option<String>,
    pub image_url: Option<String>,
    pub contact_info: Option<String>,
    pub status: String,
    pub claimed_by: Option<i64>,
    pub claimed_at: Option<String>,
    pub recovered: bool,
    pub satisfaction_rating: Option<i64>,
    pub created_at: String,
}

impl ItemRow {
    /// Unknown status strings fall back to pending (invisible).
    pub fn status(&self) -> ItemStatus {
        ItemStatus::parse(&self.status).unwrap_or(ItemStatus::Pending)
    }
}

/// The two parties of an item chat. `claimed_by` is None until claimed.
pub struct ItemParties {
    pub owner_id: i64,
    pub claimed_by: Option<i64>,
}

pub struct PendingChangeRow {
    pub id: i64,
    pub user_id: i64,
    pub username: String,
    pub kind: String,
    pub new_value: String,
    pub approved: bool,
    pub requested_at: String,
}

pub struct ChatMessageRow {
    pub id: i64,
    pub item_id: i64,
    pub sender_id: i64,
    pub sender_name: String,
    pub body: String,
    pub created_at: String,
}

pub struct ChatSummaryRow {
    pub item_id: i64,
    pub item_name: String,
    pub status: String,
    pub owner_name: String,
    pub claimer_name: Option<String>,
    pub message_count: i64,
}
