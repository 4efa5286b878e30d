pub mod changes;
pub mod chat;
pub mod items;
pub mod migrations;
pub mod models;
pub mod otp;
pub mod users;

use std::path::Path;
use std::sync::Mutex;

use anyhow::Result;
use rusqlite::Connection;
use thiserror::Error;
use tracing::info;

/// Storage-layer errors. Domain rule violations get their own variants so
/// the API layer can map them to precise status codes instead of a
/// catch-all 500.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("you cannot claim your own item")]
    OwnItem,
    #[error("item is not open for claims")]
    NotClaimable,
    #[error("item has not been claimed")]
    NotClaimed,
    #[error("item is not awaiting approval")]
    NotPending,
    #[error("you do not have permission to do that")]
    NotPermitted,
    #[error("only the claimant may rate this item")]
    NotClaimant,
    #[error("item must be marked recovered before rating")]
    NotRecovered,
    #[error("satisfaction has already been rated for this item")]
    AlreadyRated,
    #[error("rating must be between 1 and 5")]
    RatingOutOfRange,
    #[error("account has not completed phone verification")]
    PhoneUnverified,
    #[error("database lock poisoned")]
    Poisoned,
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T>,
    {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&conn)
    }

    /// Mutable access, required for transactions.
    pub fn with_conn_mut<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T>,
    {
        let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&mut conn)
    }
}

/// Extension trait for optional query results.
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> StoreResult<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> StoreResult<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
