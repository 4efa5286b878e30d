use chrono::Utc;
use rusqlite::{Connection, params};
use trove_types::models::ItemStatus;

use crate::models::ItemRow;
use crate::{Database, OptionalExt, StoreError, StoreResult};

pub struct NewItem<'a> {
    pub name: &'a str,
    pub category: &'a str,
    pub description: Option<&'a str>,
    pub location: &'a str,
    pub date: Option<&'a str>,
    pub image_url: Option<&'a str>,
    pub contact_info: Option<&'a str>,
}

impl Database {
    /// Create an item. The caller decides the initial status: admins post
    /// straight to `Approved`, everyone else starts at `Pending`.
    pub fn create_item(
        &self,
        owner_id: i64,
        new: &NewItem<'_>,
        status: ItemStatus,
    ) -> StoreResult<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO items (user_id, name, category, description, location, date, image_url, contact_info, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    owner_id,
                    new.name,
                    new.category,
                    new.description,
                    new.location,
                    new.date,
                    new.image_url,
                    new.contact_info,
                    status.as_str(),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_item(&self, id: i64) -> StoreResult<Option<ItemRow>> {
        self.with_conn(|conn| query_item(conn, id))
    }

    /// The public board: everything that has passed admin approval.
    pub fn list_board(&self) -> StoreResult<Vec<ItemRow>> {
        self.with_conn(|conn| {
            query_items(conn, "i.status <> 'pending'", params![])
        })
    }

    /// Items still awaiting admin approval.
    pub fn list_pending_items(&self) -> StoreResult<Vec<ItemRow>> {
        self.with_conn(|conn| query_items(conn, "i.status = 'pending'", params![]))
    }

    pub fn list_items_by_owner(&self, owner_id: i64) -> StoreResult<Vec<ItemRow>> {
        self.with_conn(|conn| query_items(conn, "i.user_id = ?1", params![owner_id]))
    }

    /// Claim an item. The status filter rides on the UPDATE itself, so of
    /// two racing claimers exactly one sees a changed row; the other gets
    /// the same answer as any late claimer.
    pub fn claim_item(&self, item_id: i64, claimant_id: i64) -> StoreResult<ItemRow> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let item = query_item(&tx, item_id)?.ok_or(StoreError::NotFound)?;
            if item.user_id == claimant_id {
                return Err(StoreError::OwnItem);
            }

            let changed = tx.execute(
                "UPDATE items
                 SET status = 'claimed', claimed_by = ?1, claimed_at = ?2
                 WHERE id = ?3 AND status = 'approved'",
                params![claimant_id, Utc::now().to_rfc3339(), item_id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotClaimable);
            }

            let item = query_item(&tx, item_id)?.ok_or(StoreError::NotFound)?;
            tx.commit()?;
            Ok(item)
        })
    }

    /// `Claimed -> Resolved`. Permission (owner or moderator) is checked by
    /// the caller; this enforces only the state transition.
    pub fn recover_item(&self, item_id: i64) -> StoreResult<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            query_item(&tx, item_id)?.ok_or(StoreError::NotFound)?;

            let changed = tx.execute(
                "UPDATE items SET status = 'resolved', recovered = 1
                 WHERE id = ?1 AND status = 'claimed'",
                params![item_id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotClaimed);
            }

            tx.commit()?;
            Ok(())
        })
    }

    /// Satisfaction rating: claimant only, recovered items only, once only.
    pub fn rate_item(&self, item_id: i64, rater_id: i64, rating: i64) -> StoreResult<()> {
        if !(1..=5).contains(&rating) {
            return Err(StoreError::RatingOutOfRange);
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let item = query_item(&tx, item_id)?.ok_or(StoreError::NotFound)?;
            if item.claimed_by != Some(rater_id) {
                return Err(StoreError::NotClaimant);
            }
            if !item.recovered {
                return Err(StoreError::NotRecovered);
            }
            if item.satisfaction_rating.is_some() {
                return Err(StoreError::AlreadyRated);
            }

            tx.execute(
                "UPDATE items SET satisfaction_rating = ?1 WHERE id = ?2",
                params![rating, item_id],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Admin approval: `Pending -> Approved`.
    pub fn approve_item(&self, item_id: i64) -> StoreResult<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            query_item(&tx, item_id)?.ok_or(StoreError::NotFound)?;

            let changed = tx.execute(
                "UPDATE items SET status = 'approved' WHERE id = ?1 AND status = 'pending'",
                params![item_id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotPending);
            }

            tx.commit()?;
            Ok(())
        })
    }

    /// Delete an item and its chat history. Messages go first, explicitly,
    /// inside one transaction; the FK cascade is a backstop, not the plan.
    pub fn remove_item(&self, item_id: i64) -> StoreResult<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "DELETE FROM chat_messages WHERE item_id = ?1",
                params![item_id],
            )?;
            let changed = tx.execute("DELETE FROM items WHERE id = ?1", params![item_id])?;
            if changed == 0 {
                return Err(StoreError::NotFound);
            }

            tx.commit()?;
            Ok(())
        })
    }
}

const ITEM_COLS: &str = "i.id, i.user_id, u.username, i.name, i.category, i.description, \
     i.location, i.date, i.image_url, i.contact_info, i.status, i.claimed_by, i.claimed_at, \
     i.recovered, i.satisfaction_rating, i.created_at";

fn map_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<ItemRow> {
    Ok(ItemRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        owner_name: row.get(2)?,
        name: row.get(3)?,
        category: row.get(4)?,
        description: row.get(5)?,
        location: row.get(6)?,
        date: row.get(7)?,
        image_url: row.get(8)?,
        contact_info: row.get(9)?,
        status: row.get(10)?,
        claimed_by: row.get(11)?,
        claimed_at: row.get(12)?,
        recovered: row.get(13)?,
        satisfaction_rating: row.get(14)?,
        created_at: row.get(15)?,
    })
}

fn query_item(conn: &Connection, id: i64) -> StoreResult<Option<ItemRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ITEM_COLS} FROM items i JOIN users u ON i.user_id = u.id WHERE i.id = ?1"
    ))?;
    stmt.query_row(params![id], map_item).optional()
}

fn query_items(
    conn: &Connection,
    filter: &str,
    params: impl rusqlite::Params,
) -> StoreResult<Vec<ItemRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ITEM_COLS} FROM items i JOIN users u ON i.user_id = u.id
         WHERE {filter} ORDER BY i.created_at DESC, i.id DESC"
    ))?;
    let rows = stmt
        .query_map(params, map_item)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::NewUser;

    fn user(db: &Database, name: &str, phone: &str) -> i64 {
        db.register_user(&NewUser {
            username: name,
            email: &format!("{name}@campus.edu"),
            phone,
            password_hash: "$argon2id$stub",
        })
        .unwrap()
        .id
    }

    fn item(db: &Database, owner: i64, status: ItemStatus) -> i64 {
        db.create_item(
            owner,
            &NewItem {
                name: "Blue backpack",
                category: "bags",
                description: Some("left in the library"),
                location: "Central Library",
                date: None,
                image_url: None,
                contact_info: None,
            },
            status,
        )
        .unwrap()
    }

    #[test]
    fn full_lifecycle_scenario() {
        let db = Database::open_in_memory().unwrap();
        let _admin = user(&db, "root", "9000000001");
        let owner = user(&db, "owner", "9000000002");
        let claimer = user(&db, "claimer", "9000000003");

        let id = item(&db, owner, ItemStatus::Pending);
        assert_eq!(db.get_item(id).unwrap().unwrap().status(), ItemStatus::Pending);

        db.approve_item(id).unwrap();
        assert_eq!(db.get_item(id).unwrap().unwrap().status(), ItemStatus::Approved);

        let claimed = db.claim_item(id, claimer).unwrap();
        assert_eq!(claimed.status(), ItemStatus::Claimed);
        assert_eq!(claimed.claimed_by, Some(claimer));
        assert!(claimed.claimed_at.is_some());

        db.recover_item(id).unwrap();
        let row = db.get_item(id).unwrap().unwrap();
        assert_eq!(row.status(), ItemStatus::Resolved);
        assert!(row.recovered);

        db.rate_item(id, claimer, 4).unwrap();
        assert_eq!(db.get_item(id).unwrap().unwrap().satisfaction_rating, Some(4));

        assert!(matches!(
            db.rate_item(id, claimer, 5),
            Err(StoreError::AlreadyRated)
        ));
    }

    #[test]
    fn owner_cannot_claim_own_item() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "owner", "9000000001");
        let id = item(&db, owner, ItemStatus::Approved);

        assert!(matches!(
            db.claim_item(id, owner),
            Err(StoreError::OwnItem)
        ));
    }

    #[test]
    fn claim_requires_approved_status() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "owner", "9000000001");
        let a = user(&db, "a", "9000000002");
        let b = user(&db, "b", "9000000003");

        let pending = item(&db, owner, ItemStatus::Pending);
        assert!(matches!(
            db.claim_item(pending, a),
            Err(StoreError::NotClaimable)
        ));

        let id = item(&db, owner, ItemStatus::Approved);
        db.claim_item(id, a).unwrap();

        // Second claim loses, whether late or racing: same guarded UPDATE.
        assert!(matches!(db.claim_item(id, b), Err(StoreError::NotClaimable)));

        db.recover_item(id).unwrap();
        assert!(matches!(db.claim_item(id, b), Err(StoreError::NotClaimable)));
    }

    #[test]
    fn recover_requires_claimed_status() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "owner", "9000000001");
        let id = item(&db, owner, ItemStatus::Approved);

        assert!(matches!(db.recover_item(id), Err(StoreError::NotClaimed)));
        assert!(matches!(db.recover_item(999), Err(StoreError::NotFound)));
    }

    #[test]
    fn rating_guards() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "owner", "9000000001");
        let claimer = user(&db, "claimer", "9000000002");
        let stranger = user(&db, "stranger", "9000000003");

        let id = item(&db, owner, ItemStatus::Approved);
        db.claim_item(id, claimer).unwrap();

        assert!(matches!(
            db.rate_item(id, claimer, 0),
            Err(StoreError::RatingOutOfRange)
        ));
        assert!(matches!(
            db.rate_item(id, claimer, 6),
            Err(StoreError::RatingOutOfRange)
        ));
        assert!(matches!(
            db.rate_item(id, claimer, 3),
            Err(StoreError::NotRecovered)
        ));
        assert!(matches!(
            db.rate_item(id, stranger, 3),
            Err(StoreError::NotClaimant)
        ));

        db.recover_item(id).unwrap();
        assert!(matches!(
            db.rate_item(id, owner, 3),
            Err(StoreError::NotClaimant)
        ));
        db.rate_item(id, claimer, 3).unwrap();
    }

    #[test]
    fn approve_only_moves_pending_items() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "owner", "9000000001");
        let id = item(&db, owner, ItemStatus::Approved);

        assert!(matches!(db.approve_item(id), Err(StoreError::NotPending)));
        assert!(matches!(db.approve_item(999), Err(StoreError::NotFound)));
    }

    #[test]
    fn board_hides_pending_items() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "owner", "9000000001");
        item(&db, owner, ItemStatus::Pending);
        let visible = item(&db, owner, ItemStatus::Approved);

        let board = db.list_board().unwrap();
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].id, visible);

        assert_eq!(db.list_pending_items().unwrap().len(), 1);
        assert_eq!(db.list_items_by_owner(owner).unwrap().len(), 2);
    }

    #[test]
    fn remove_item_takes_chat_history_with_it() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "owner", "9000000001");
        let claimer = user(&db, "claimer", "9000000002");

        let id = item(&db, owner, ItemStatus::Approved);
        db.claim_item(id, claimer).unwrap();
        db.insert_message(id, owner, "meet at the front desk?").unwrap();
        db.insert_message(id, claimer, "works for me").unwrap();

        db.remove_item(id).unwrap();
        assert!(db.get_item(id).unwrap().is_none());
        // FK integrity intact: nothing references the removed item.
        assert!(db.messages_for_item(id).unwrap().is_empty());
    }

    #[test]
    fn deleting_a_user_releases_their_claims() {
        let db = Database::open_in_memory().unwrap();
        let _admin = user(&db, "root", "9000000001");
        let owner = user(&db, "owner", "9000000002");
        let claimer = user(&db, "claimer", "9000000003");

        let id = item(&db, owner, ItemStatus::Approved);
        db.claim_item(id, claimer).unwrap();
        db.insert_message(id, claimer, "is this mine?").unwrap();

        db.delete_user(claimer).unwrap();

        let row = db.get_item(id).unwrap().unwrap();
        assert_eq!(row.claimed_by, None);
        // The claimer's messages are gone with the account.
        assert!(db.messages_for_item(id).unwrap().is_empty());
    }
}
