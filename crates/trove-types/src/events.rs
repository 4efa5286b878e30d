use serde::{Deserialize, Serialize};

/// Events sent over the websocket gateway. Delivery is best-effort: the
/// database row written before the broadcast is the durable copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication.
    Ready { user_id: i64, username: String },

    /// Server confirms an item-room subscription.
    Subscribed { item_id: i64 },

    /// A chat message was posted on an item the client follows.
    MessageCreate {
        id: i64,
        item_id: i64,
        sender_id: i64,
        sender_name: String,
        body: String,
        timestamp: String,
    },

    /// An item was claimed.
    ItemClaimed {
        item_id: i64,
        claimed_by: i64,
        claimer_name: String,
    },

    /// An item was marked recovered by its owner or an admin.
    ItemRecovered { item_id: i64 },

    /// The claimant rated their recovery experience.
    SatisfactionRated { item_id: i64, rating: i64 },

    /// A command was refused (bad subscription, not a participant, ...).
    Error { message: String },
}

/// Commands sent FROM client TO server over the websocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the connection. Must be the first command, within 10s.
    Identify { token: String },

    /// Follow an item's chat room. Allowed for the owner, the current
    /// claimant, and the main administrator (monitoring).
    Subscribe { item_id: i64 },

    /// Stop following an item's chat room.
    Unsubscribe { item_id: i64 },
}
