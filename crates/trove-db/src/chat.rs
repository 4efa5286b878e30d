use rusqlite::params;

use crate::models::{ChatMessageRow, ChatSummaryRow, ItemParties};
use crate::{Database, OptionalExt, StoreError, StoreResult};

impl Database {
    /// The two parties allowed in an item's chat: the owner, and the
    /// claimant once one exists.
    pub fn item_parties(&self, item_id: i64) -> StoreResult<Option<ItemParties>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT user_id, claimed_by FROM items WHERE id = ?1",
                params![item_id],
                |row| {
                    Ok(ItemParties {
                        owner_id: row.get(0)?,
                        claimed_by: row.get(1)?,
                    })
                },
            )
            .optional()
        })
    }

    /// Append a message and return it with the sender's username joined in.
    pub fn insert_message(
        &self,
        item_id: i64,
        sender_id: i64,
        body: &str,
    ) -> StoreResult<ChatMessageRow> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO chat_messages (item_id, sender_id, body) VALUES (?1, ?2, ?3)",
                params![item_id, sender_id, body],
            )?;
            let id = tx.last_insert_rowid();

            let row = tx.query_row(
                "SELECT m.id, m.item_id, m.sender_id, u.username, m.body, m.created_at
                 FROM chat_messages m
                 JOIN users u ON m.sender_id = u.id
                 WHERE m.id = ?1",
                params![id],
                map_message,
            )?;

            tx.commit()?;
            Ok(row)
        })
    }

    /// Full history for an item, oldest first.
    pub fn messages_for_item(&self, item_id: i64) -> StoreResult<Vec<ChatMessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.item_id, m.sender_id, u.username, m.body, m.created_at
                 FROM chat_messages m
                 JOIN users u ON m.sender_id = u.id
                 WHERE m.item_id = ?1
                 ORDER BY m.created_at ASC, m.id ASC",
            )?;
            let rows = stmt
                .query_map(params![item_id], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Monitor view for the main admin: every item with at least one
    /// message, busiest chats first.
    pub fn chat_summaries(&self) -> StoreResult<Vec<ChatSummaryRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT i.id, i.name, i.status, o.username, c.username, COUNT(m.id)
                 FROM items i
                 JOIN users o ON i.user_id = o.id
                 LEFT JOIN users c ON i.claimed_by = c.id
                 JOIN chat_messages m ON m.item_id = i.id
                 GROUP BY i.id, i.name, i.status, o.username, c.username
                 ORDER BY COUNT(m.id) DESC, i.id ASC",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(ChatSummaryRow {
                        item_id: row.get(0)?,
                        item_name: row.get(1)?,
                        status: row.get(2)?,
                        owner_name: row.get(3)?,
                        claimer_name: row.get(4)?,
                        message_count: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Reject a message send from a non-participant before touching the
    /// table. Used by the REST send path.
    pub fn assert_chat_participant(&self, item_id: i64, user_id: i64) -> StoreResult<ItemParties> {
        let parties = self
            .item_parties(item_id)?
            .ok_or(StoreError::NotFound)?;
        if parties.owner_id != user_id && parties.claimed_by != Some(user_id) {
            return Err(StoreError::NotPermitted);
        }
        Ok(parties)
    }
}

fn map_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessageRow> {
    Ok(ChatMessageRow {
        id: row.get(0)?,
        item_id: row.get(1)?,
        sender_id: row.get(2)?,
        sender_name: row.get(3)?,
        body: row.get(4)?,
        created_at: row.get(5)?,
    })
}
