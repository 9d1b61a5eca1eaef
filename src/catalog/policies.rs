//! Retention policy records

use crate::chunk::error::{ChunkError, ChunkResult};
use crate::chunk::types::RetentionPolicy;
use rusqlite::{params, Connection, OptionalExtension};

/// Insert or replace the policy of a table
pub fn upsert_policy(conn: &Connection, policy: &RetentionPolicy) -> ChunkResult<()> {
    if policy.retain_us <= 0 {
        return Err(ChunkError::InvalidInterval {
            width: policy.retain_us,
        });
    }
    conn.execute(
        "INSERT INTO _chunk_catalog_retention_policy
             (partitioned_table_id, retain_us, updated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT (partitioned_table_id) DO UPDATE
         SET retain_us = excluded.retain_us, updated_at = excluded.updated_at",
        params![policy.table_id, policy.retain_us, policy.updated_at],
    )?;
    Ok(())
}

pub fn delete_policy(conn: &Connection, table_id: i64) -> ChunkResult<bool> {
    let deleted = conn.execute(
        "DELETE FROM _chunk_catalog_retention_policy WHERE partitioned_table_id = ?1",
        params![table_id],
    )?;
    Ok(deleted > 0)
}

pub fn get_policy(conn: &Connection, table_id: i64) -> ChunkResult<Option<RetentionPolicy>> {
    let mut stmt = conn.prepare_cached(
        "SELECT partitioned_table_id, retain_us, updated_at
         FROM _chunk_catalog_retention_policy
         WHERE partitioned_table_id = ?1",
    )?;
    Ok(stmt
        .query_row(params![table_id], |row| {
            Ok(RetentionPolicy {
                table_id: row.get(0)?,
                retain_us: row.get(1)?,
                updated_at: row.get(2)?,
            })
        })
        .optional()?)
}

pub fn list_policies(conn: &Connection) -> ChunkResult<Vec<RetentionPolicy>> {
    let mut stmt = conn.prepare_cached(
        "SELECT partitioned_table_id, retain_us, updated_at
         FROM _chunk_catalog_retention_policy
         ORDER BY partitioned_table_id",
    )?;
    let policies = stmt
        .query_map([], |row| {
            Ok(RetentionPolicy {
                table_id: row.get(0)?,
                retain_us: row.get(1)?,
                updated_at: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(policies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::schema::init_schema;
    use crate::catalog::tables::insert_table;
    use crate::chunk::types::QualifiedName;

    #[test]
    fn test_upsert_replaces() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON").unwrap();
        init_schema(&conn).unwrap();
        let table_id = insert_table(&conn, &QualifiedName::new("main", "metrics")).unwrap();

        let mut policy = RetentionPolicy {
            table_id,
            retain_us: 1_000,
            updated_at: 1,
        };
        upsert_policy(&conn, &policy).unwrap();
        policy.retain_us = 5_000;
        policy.updated_at = 2;
        upsert_policy(&conn, &policy).unwrap();

        assert_eq!(list_policies(&conn).unwrap(), vec![policy.clone()]);
        assert_eq!(get_policy(&conn, table_id).unwrap(), Some(policy));

        assert!(delete_policy(&conn, table_id).unwrap());
        assert!(!delete_policy(&conn, table_id).unwrap());
        assert!(get_policy(&conn, table_id).unwrap().is_none());
    }

    #[test]
    fn test_rejects_non_positive_retention() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let err = upsert_policy(
            &conn,
            &RetentionPolicy {
                table_id: 1,
                retain_us: 0,
                updated_at: 0,
            },
        )
        .unwrap_err();
        assert!(matches!(err, ChunkError::InvalidInterval { width: 0 }));
    }
}
