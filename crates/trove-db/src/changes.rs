use chrono::Utc;
use rusqlite::params;
use trove_types::models::ChangeKind;

use crate::models::PendingChangeRow;
use crate::{Database, OptionalExt, StoreError, StoreResult};

impl Database {
    /// Stage a contact-detail change. Called only after the user has proved
    /// control of the new value via OTP; the user row itself is untouched
    /// until an admin approves.
    pub fn stage_change(
        &self,
        user_id: i64,
        kind: ChangeKind,
        new_value: &str,
    ) -> StoreResult<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO pending_changes (user_id, kind, new_value) VALUES (?1, ?2, ?3)",
                params![user_id, kind.as_str(), new_value],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn list_pending_changes(&self) -> StoreResult<Vec<PendingChangeRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.user_id, u.username, c.kind, c.new_value, c.approved, c.requested_at
                 FROM pending_changes c
                 JOIN users u ON c.user_id = u.id
                 WHERE c.approved = 0
                 ORDER BY c.requested_at ASC, c.id ASC",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(PendingChangeRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        username: row.get(2)?,
                        kind: row.get(3)?,
                        new_value: row.get(4)?,
                        approved: row.get(5)?,
                        requested_at: row.get(6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Apply a staged change to the user row and mark it approved, in one
    /// transaction.
    pub fn approve_change(&self, change_id: i64) -> StoreResult<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let change = tx
                .query_row(
                    "SELECT user_id, kind, new_value FROM pending_changes
                     WHERE id = ?1 AND approved = 0",
                    params![change_id],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    },
                )
                .optional()?;
            let Some((user_id, kind, new_value)) = change else {
                return Err(StoreError::NotFound);
            };

            match ChangeKind::parse(&kind) {
                Some(ChangeKind::Email) => {
                    tx.execute(
                        "UPDATE users SET email = ?1 WHERE id = ?2",
                        params![new_value, user_id],
                    )?;
                }
                // The new phone number was OTP-verified at staging time, so
                // the verified flag survives the swap.
                Some(ChangeKind::Phone) => {
                    tx.execute(
                        "UPDATE users SET phone = ?1, phone_verified = 1 WHERE id = ?2",
                        params![new_value, user_id],
                    )?;
                }
                None => return Err(StoreError::NotFound),
            }

            tx.execute(
                "UPDATE pending_changes SET approved = 1, approved_at = ?1 WHERE id = ?2",
                params![Utc::now().to_rfc3339(), change_id],
            )?;

            tx.commit()?;
            Ok(())
        })
    }

    /// Discard a staged change without touching the user.
    pub fn reject_change(&self, change_id: i64) -> StoreResult<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM pending_changes WHERE id = ?1 AND approved = 0",
                params![change_id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::NewUser;

    fn seed_user(db: &Database) -> i64 {
        db.register_user(&NewUser {
            username: "devi",
            email: "devi@campus.edu",
            phone: "9000000001",
            password_hash: "$argon2id$stub",
        })
        .unwrap()
        .id
    }

    #[test]
    fn approve_applies_email_and_marks_approved() {
        let db = Database::open_in_memory().unwrap();
        let user = seed_user(&db);

        let change = db
            .stage_change(user, ChangeKind::Email, "devi.new@campus.edu")
            .unwrap();
        assert_eq!(db.list_pending_changes().unwrap().len(), 1);

        db.approve_change(change).unwrap();

        let row = db.get_user_by_id(user).unwrap().unwrap();
        assert_eq!(row.email, "devi.new@campus.edu");
        // Approved changes leave the pending queue.
        assert!(db.list_pending_changes().unwrap().is_empty());
        // And cannot be approved twice.
        assert!(matches!(
            db.approve_change(change),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn approve_applies_phone_and_keeps_it_verified() {
        let db = Database::open_in_memory().unwrap();
        let user = seed_user(&db);

        let change = db.stage_change(user, ChangeKind::Phone, "9111111111").unwrap();
        db.approve_change(change).unwrap();

        let row = db.get_user_by_id(user).unwrap().unwrap();
        assert_eq!(row.phone, "9111111111");
        assert!(row.phone_verified);
    }

    #[test]
    fn reject_discards_without_mutating_the_user() {
        let db = Database::open_in_memory().unwrap();
        let user = seed_user(&db);

        let change = db
            .stage_change(user, ChangeKind::Email, "other@campus.edu")
            .unwrap();
        db.reject_change(change).unwrap();

        let row = db.get_user_by_id(user).unwrap().unwrap();
        assert_eq!(row.email, "devi@campus.edu");
        assert!(db.list_pending_changes().unwrap().is_empty());
        assert!(matches!(
            db.reject_change(change),
            Err(StoreError::NotFound)
        ));
    }
}
