use rusqlite::{Connection, params};
use trove_types::models::Role;

use crate::models::UserRow;
use crate::{Database, OptionalExt, StoreError, StoreResult};

/// Input for account creation. Role and verification flags are decided by
/// the store: the first account ever becomes the fully verified main admin.
pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub phone: &'a str,
    pub password_hash: &'a str,
}

pub struct CreatedUser {
    pub id: i64,
    pub main_admin: bool,
}

impl Database {
    /// Create an account. Count-and-insert run in one transaction so two
    /// racing first registrations cannot both become main admin.
    pub fn register_user(&self, new: &NewUser<'_>) -> StoreResult<CreatedUser> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let count: i64 = tx.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
            let first = count == 0;
            let (role, flag) = if first {
                (Role::MainAdmin.as_str(), 1)
            } else {
                (Role::Student.as_str(), 0)
            };

            tx.execute(
                "INSERT INTO users (username, email, phone, password, role, phone_verified, verified)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![new.username, new.email, new.phone, new.password_hash, role, flag],
            )?;
            let id = tx.last_insert_rowid();

            tx.commit()?;
            Ok(CreatedUser {
                id,
                main_admin: first,
            })
        })
    }

    pub fn get_user_by_id(&self, id: i64) -> StoreResult<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id = ?1", params![id]))
    }

    pub fn get_user_by_email(&self, email: &str) -> StoreResult<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email = ?1", params![email]))
    }

    pub fn get_user_by_phone(&self, phone: &str) -> StoreResult<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "phone = ?1", params![phone]))
    }

    pub fn get_user_by_username(&self, username: &str) -> StoreResult<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username = ?1", params![username]))
    }

    /// Record a successful phone OTP verification.
    pub fn mark_phone_verified(&self, phone: &str) -> StoreResult<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET phone_verified = 1 WHERE phone = ?1",
                params![phone],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
    }

    /// Admin approval of an account. Refused until the account has proved
    /// control of its phone number.
    pub fn verify_user(&self, id: i64) -> StoreResult<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let user = query_user(&tx, "id = ?1", params![id])?.ok_or(StoreError::NotFound)?;
            if !user.phone_verified {
                return Err(StoreError::PhoneUnverified);
            }

            tx.execute("UPDATE users SET verified = 1 WHERE id = ?1", params![id])?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Replace an account's password hash. Used by the OTP-gated recovery
    /// flow; the caller verifies the code before touching this.
    pub fn set_password(&self, id: i64, password_hash: &str) -> StoreResult<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET password = ?1 WHERE id = ?2",
                params![password_hash, id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
    }

    pub fn set_role(&self, id: i64, role: Role) -> StoreResult<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET role = ?1 WHERE id = ?2",
                params![role.as_str(), id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
    }

    /// Remove an account. Owned items and sent messages go with it via the
    /// FK cascade; claims on other people's items become unclaimed (SET NULL).
    pub fn delete_user(&self, id: i64) -> StoreResult<()> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM users WHERE id = ?1", params![id])?;
            if changed == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
    }

    pub fn list_users(&self) -> StoreResult<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLS} FROM users ORDER BY created_at ASC, id ASC"
            ))?;
            let rows = stmt
                .query_map([], map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

const USER_COLS: &str =
    "id, username, email, phone, password, role, phone_verified, verified, created_at";

fn map_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        phone: row.get(3)?,
        password: row.get(4)?,
        role: row.get(5)?,
        phone_verified: row.get(6)?,
        verified: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn query_user(
    conn: &Connection,
    filter: &str,
    params: impl rusqlite::Params,
) -> StoreResult<Option<UserRow>> {
    let mut stmt = conn.prepare(&format!("SELECT {USER_COLS} FROM users WHERE {filter}"))?;
    stmt.query_row(params, map_user).optional()
}
