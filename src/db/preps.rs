//! Prep document cache.
//!
//! One row per (user, meeting); regeneration overwrites. The document is
//! stored as its serialized JSON, so both the enhanced and legacy shapes
//! round-trip through the same column.

use rusqlite::{params, OptionalExtension};

use super::{DbError, PrepDb};
use crate::types::PrepDocument;

impl PrepDb {
    /// Fetch the cached prep for (user, meeting), if one exists.
    pub fn get_prep(
        &self,
        user_id: &str,
        meeting_id: &str,
    ) -> Result<Option<PrepDocument>, DbError> {
        let raw = self
            .conn
            .query_row(
                "SELECT document FROM meeting_preps
                 WHERE user_id = ?1 AND meeting_id = ?2",
                params![user_id, meeting_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Store (or replace) the prep for (user, meeting).
    pub fn put_prep(
        &self,
        user_id: &str,
        meeting_id: &str,
        doc: &PrepDocument,
    ) -> Result<(), DbError> {
        let json = serde_json::to_string(doc)?;
        self.conn.execute(
            "INSERT INTO meeting_preps (user_id, meeting_id, document, generated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (user_id, meeting_id) DO UPDATE SET
                 document = excluded.document,
                 generated_at = excluded.generated_at",
            params![
                user_id,
                meeting_id,
                json,
                doc.generated_at().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Drop the cached prep for (user, meeting). No-op if absent.
    pub fn delete_prep(&self, user_id: &str, meeting_id: &str) -> Result<(), DbError> {
        self.conn.execute(
            "DELETE FROM meeting_preps WHERE user_id = ?1 AND meeting_id = ?2",
            params![user_id, meeting_id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn legacy_doc(summary: &str) -> PrepDocument {
        PrepDocument::Legacy {
            context_summary: summary.to_string(),
            key_points: vec!["point".to_string()],
            suggested_agenda: vec![],
            action_items: vec![],
            generated_at: Utc::now(),
        }
    }

    #[test]
    fn test_put_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let db = PrepDb::open_at(dir.path().join("preps.db")).unwrap();

        db.put_prep("u1", "evt-1", &legacy_doc("first")).unwrap();
        let loaded = db.get_prep("u1", "evt-1").unwrap().unwrap();
        assert_eq!(loaded.context_summary(), "first");
    }

    #[test]
    fn test_regenerate_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let db = PrepDb::open_at(dir.path().join("preps.db")).unwrap();

        db.put_prep("u1", "evt-1", &legacy_doc("first")).unwrap();
        db.put_prep("u1", "evt-1", &legacy_doc("second")).unwrap();

        let loaded = db.get_prep("u1", "evt-1").unwrap().unwrap();
        assert_eq!(loaded.context_summary(), "second");

        let count: i64 = db
            .conn_ref()
            .query_row("SELECT COUNT(*) FROM meeting_preps", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_same_meeting_different_users() {
        let dir = tempfile::tempdir().unwrap();
        let db = PrepDb::open_at(dir.path().join("preps.db")).unwrap();

        db.put_prep("u1", "evt-1", &legacy_doc("for u1")).unwrap();
        db.put_prep("u2", "evt-1", &legacy_doc("for u2")).unwrap();

        assert_eq!(
            db.get_prep("u1", "evt-1").unwrap().unwrap().context_summary(),
            "for u1"
        );
        assert_eq!(
            db.get_prep("u2", "evt-1").unwrap().unwrap().context_summary(),
            "for u2"
        );
    }

    #[test]
    fn test_delete() {
        let dir = tempfile::tempdir().unwrap();
        let db = PrepDb::open_at(dir.path().join("preps.db")).unwrap();

        db.put_prep("u1", "evt-1", &legacy_doc("doc")).unwrap();
        db.delete_prep("u1", "evt-1").unwrap();
        assert!(db.get_prep("u1", "evt-1").unwrap().is_none());
    }
}
