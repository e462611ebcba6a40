use assess_core::model::{SessionId, SessionRecord};
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::index_to_i64;
use crate::repository::{SessionStore, StorageError, decode_record, encode_record};

fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

#[async_trait::async_trait]
impl SessionStore for SqliteRepository {
    async fn put_session(&self, record: &SessionRecord) -> Result<(), StorageError> {
        let encoded = encode_record(record)?;

        sqlx::query(
            r"
                INSERT INTO session_slot (slot, session_id, record)
                VALUES (1, ?1, ?2)
                ON CONFLICT(slot) DO UPDATE SET
                    session_id = excluded.session_id,
                    record = excluded.record
            ",
        )
        .bind(record.session_id().as_str())
        .bind(encoded)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        Ok(())
    }

    async fn current_session(&self) -> Result<Option<SessionRecord>, StorageError> {
        let row = sqlx::query("SELECT record FROM session_slot WHERE slot = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let raw: String = row.try_get("record").map_err(ser)?;
        decode_record(&raw).map(Some)
    }

    async fn delete_session(&self, id: &SessionId) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM session_slot WHERE slot = 1 AND session_id = ?1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(conn)?;
        Ok(())
    }

    async fn clear_session_slot(&self) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM session_slot")
            .execute(&self.pool)
            .await
            .map_err(conn)?;
        Ok(())
    }

    async fn put_draft(
        &self,
        session_id: &SessionId,
        index: usize,
        code: &str,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r"
                INSERT INTO problem_drafts (session_id, problem_index, code)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(session_id, problem_index) DO UPDATE SET
                    code = excluded.code
            ",
        )
        .bind(session_id.as_str())
        .bind(index_to_i64(index)?)
        .bind(code)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        Ok(())
    }

    async fn get_draft(
        &self,
        session_id: &SessionId,
        index: usize,
    ) -> Result<Option<String>, StorageError> {
        let row = sqlx::query(
            r"
                SELECT code FROM problem_drafts
                WHERE session_id = ?1 AND problem_index = ?2
            ",
        )
        .bind(session_id.as_str())
        .bind(index_to_i64(index)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        row.map(|r| r.try_get::<String, _>("code").map_err(ser))
            .transpose()
    }

    async fn delete_draft(
        &self,
        session_id: &SessionId,
        index: usize,
    ) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM problem_drafts WHERE session_id = ?1 AND problem_index = ?2")
            .bind(session_id.as_str())
            .bind(index_to_i64(index)?)
            .execute(&self.pool)
            .await
            .map_err(conn)?;
        Ok(())
    }

    async fn delete_drafts(&self, session_id: &SessionId) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM problem_drafts WHERE session_id = ?1")
            .bind(session_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(conn)?;
        Ok(())
    }

    async fn delete_orphaned_drafts(&self) -> Result<(), StorageError> {
        sqlx::query(
            r"
                DELETE FROM problem_drafts
                WHERE session_id NOT IN (SELECT session_id FROM session_slot)
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(())
    }
}
