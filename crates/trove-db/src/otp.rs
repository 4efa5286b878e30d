use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::{Database, OptionalExt, StoreResult};

impl Database {
    /// Store a fresh code for an identifier (phone number or email).
    /// Any previously issued code for the same identifier is invalidated.
    pub fn issue_otp(
        &self,
        identifier: &str,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM otp_codes WHERE identifier = ?1",
                params![identifier],
            )?;
            tx.execute(
                "INSERT INTO otp_codes (identifier, code, expires_at) VALUES (?1, ?2, ?3)",
                params![identifier, code, expires_at.to_rfc3339()],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Check a code. On success the record is deleted (one-time use).
    /// A mismatch leaves the record untouched; an expired record is purged
    /// lazily and the attempt fails.
    pub fn verify_otp(&self, identifier: &str, code: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let record = tx
                .query_row(
                    "SELECT code, expires_at FROM otp_codes WHERE identifier = ?1",
                    params![identifier],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                )
                .optional()?;

            let Some((stored, expires_at)) = record else {
                return Ok(false);
            };

            // An unparseable expiry is treated as already expired.
            let expired = DateTime::parse_from_rfc3339(&expires_at)
                .map(|exp| now > exp.with_timezone(&Utc))
                .unwrap_or(true);

            if expired {
                tx.execute(
                    "DELETE FROM otp_codes WHERE identifier = ?1",
                    params![identifier],
                )?;
                tx.commit()?;
                return Ok(false);
            }

            if stored != code {
                return Ok(false);
            }

            tx.execute(
                "DELETE FROM otp_codes WHERE identifier = ?1",
                params![identifier],
            )?;
            tx.commit()?;
            Ok(true)
        })
    }

    #[cfg(test)]
    fn otp_count(&self, identifier: &str) -> StoreResult<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM otp_codes WHERE identifier = ?1",
                params![identifier],
                |row| row.get(0),
            )?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const PHONE: &str = "9876543210";

    #[test]
    fn code_is_single_use() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        db.issue_otp(PHONE, "123456", now + Duration::minutes(10)).unwrap();

        assert!(db.verify_otp(PHONE, "123456", now).unwrap());
        // Consumed on first success; the same code must not verify again.
        assert!(!db.verify_otp(PHONE, "123456", now).unwrap());
    }

    #[test]
    fn reissue_invalidates_previous_code() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        db.issue_otp(PHONE, "111111", now + Duration::minutes(10)).unwrap();
        db.issue_otp(PHONE, "222222", now + Duration::minutes(10)).unwrap();

        assert!(!db.verify_otp(PHONE, "111111", now).unwrap());
        assert!(db.verify_otp(PHONE, "222222", now).unwrap());
    }

    #[test]
    fn mismatch_does_not_consume_the_code() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        db.issue_otp(PHONE, "123456", now + Duration::minutes(10)).unwrap();

        assert!(!db.verify_otp(PHONE, "654321", now).unwrap());
        assert!(db.verify_otp(PHONE, "123456", now).unwrap());
    }

    #[test]
    fn expired_code_fails_and_is_purged() {
        let db = Database::open_in_memory().unwrap();
        let issued = Utc::now();
        db.issue_otp(PHONE, "123456", issued + Duration::minutes(10)).unwrap();

        let later = issued + Duration::minutes(11);
        assert!(!db.verify_otp(PHONE, "123456", later).unwrap());
        assert_eq!(db.otp_count(PHONE).unwrap(), 0);
    }

    #[test]
    fn identifiers_are_independent() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        db.issue_otp(PHONE, "111111", now + Duration::minutes(10)).unwrap();
        db.issue_otp("someone@campus.edu", "222222", now + Duration::minutes(10)).unwrap();

        assert!(db.verify_otp(PHONE, "111111", now).unwrap());
        assert!(db.verify_otp("someone@campus.edu", "222222", now).unwrap());
    }
}
