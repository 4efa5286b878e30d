use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            username        TEXT NOT NULL UNIQUE,
            email           TEXT NOT NULL UNIQUE,
            phone           TEXT NOT NULL UNIQUE,
            password        TEXT NOT NULL,
            role            TEXT NOT NULL DEFAULT 'student'
                            CHECK (role IN ('student', 'admin', 'main_admin')),
            phone_verified  INTEGER NOT NULL DEFAULT 0,
            verified        INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS items (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id             INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            name                TEXT NOT NULL,
            category            TEXT NOT NULL,
            description         TEXT,
            location            TEXT NOT NULL,
            date                TEXT,
            image_url           TEXT,
            contact_info        TEXT,
            status              TEXT NOT NULL DEFAULT 'pending'
                                CHECK (status IN ('pending', 'approved', 'claimed', 'resolved')),
            claimed_by          INTEGER REFERENCES users(id) ON DELETE SET NULL,
            claimed_at          TEXT,
            recovered           INTEGER NOT NULL DEFAULT 0,
            satisfaction_rating INTEGER CHECK (satisfaction_rating BETWEEN 1 AND 5),
            created_at          TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_items_status ON items(status);
        CREATE INDEX IF NOT EXISTS idx_items_owner ON items(user_id);

        -- At most one outstanding code per phone number / email address.
        CREATE TABLE IF NOT EXISTS otp_codes (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            identifier  TEXT NOT NULL UNIQUE,
            code        TEXT NOT NULL,
            expires_at  TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS pending_changes (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id      INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            kind         TEXT NOT NULL CHECK (kind IN ('email', 'phone')),
            new_value    TEXT NOT NULL,
            approved     INTEGER NOT NULL DEFAULT 0,
            approved_at  TEXT,
            requested_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS chat_messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            item_id     INTEGER NOT NULL REFERENCES items(id) ON DELETE CASCADE,
            sender_id   INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            body        TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_chat_item
            ON chat_messages(item_id, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
