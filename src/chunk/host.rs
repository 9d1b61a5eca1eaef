//! Host engine primitives used by the chunk manager
//!
//! The manager never issues DDL itself. Everything physical goes through a
//! [`SegmentHost`], which runs against the unit of work's connection so that
//! segment creation and catalog rows commit or roll back together.
//!
//! [`SqliteSegmentHost`] materializes a chunk as a plain SQLite table that
//! copies the parent's column layout and adds a range check on the time
//! column:
//!
//! ```sql
//! CREATE TABLE "main"."_hyper_1_4_chunk" (
//!     "ts" INTEGER NOT NULL,
//!     "value" REAL,
//!     CONSTRAINT "_hyper_1_4_chunk_time_check"
//!         CHECK ("ts" >= 10800000000 AND "ts" < 14400000000)
//! )
//! ```

use crate::chunk::error::{ChunkError, ChunkResult};
use crate::chunk::types::{quote_ident, ColumnDef, QualifiedName, Row, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

/// Everything needed to materialize one chunk segment
#[derive(Debug, Clone)]
pub struct SegmentSpec<'a> {
    /// Table whose column layout is copied
    pub parent: &'a QualifiedName,
    pub segment: &'a QualifiedName,
    pub time_column: &'a str,
    pub start_time: i64,
    pub end_time: i64,
}

impl SegmentSpec<'_> {
    /// Range check on the time column, exactly as written into the DDL
    pub fn time_check(&self) -> String {
        let time_column = quote_ident(self.time_column);
        format!(
            "CHECK ({} >= {} AND {} < {})",
            time_column, self.start_time, time_column, self.end_time
        )
    }
}

/// Type affinity of a declared column type, per SQLite's rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affinity {
    Integer,
    Text,
    Blob,
    Real,
    Numeric,
}

impl Affinity {
    pub fn of(decl_type: &str) -> Self {
        let upper = decl_type.to_ascii_uppercase();
        if upper.contains("INT") {
            Affinity::Integer
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            Affinity::Text
        } else if upper.is_empty() || upper.contains("BLOB") {
            Affinity::Blob
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            Affinity::Real
        } else {
            Affinity::Numeric
        }
    }

    /// True if integer microseconds are stored unchanged
    pub fn keeps_integers(self) -> bool {
        matches!(self, Affinity::Integer | Affinity::Numeric | Affinity::Blob)
    }
}

/// Physical operations the host engine must provide
pub trait SegmentHost {
    /// Object type (`table`, `view`, ...) of a name, `None` if absent
    fn object_kind(&self, conn: &Connection, name: &QualifiedName) -> ChunkResult<Option<String>>;

    /// Column layout of a table in declaration order
    fn table_columns(&self, conn: &Connection, name: &QualifiedName) -> ChunkResult<Vec<ColumnDef>>;

    fn table_is_empty(&self, conn: &Connection, name: &QualifiedName) -> ChunkResult<bool>;

    fn segment_exists(&self, conn: &Connection, segment: &QualifiedName) -> ChunkResult<bool>;

    /// Create a segment with the parent's layout plus the range check
    fn create_segment(&self, conn: &Connection, spec: &SegmentSpec<'_>) -> ChunkResult<()>;

    /// Check that an existing segment has the parent's layout and the range check
    ///
    /// Fails with `SegmentMismatch` otherwise.
    fn verify_segment(&self, conn: &Connection, spec: &SegmentSpec<'_>) -> ChunkResult<()>;

    fn drop_segment(&self, conn: &Connection, segment: &QualifiedName) -> ChunkResult<()>;

    /// Remove every row, keeping the segment
    fn truncate_segment(&self, conn: &Connection, segment: &QualifiedName) -> ChunkResult<()>;

    fn insert_row(&self, conn: &Connection, target: &QualifiedName, row: &Row) -> ChunkResult<()>;

    /// All rows in storage order
    fn read_rows(&self, conn: &Connection, segment: &QualifiedName) -> ChunkResult<Vec<Row>>;

    /// Reject direct inserts into a partitioned parent
    fn install_insert_guard(&self, conn: &Connection, parent: &QualifiedName) -> ChunkResult<()>;

    fn remove_insert_guard(&self, conn: &Connection, parent: &QualifiedName) -> ChunkResult<()>;
}

/// [`SegmentHost`] backed by SQLite tables
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteSegmentHost;

impl SqliteSegmentHost {
    pub fn new() -> Self {
        Self
    }

    fn guard_name(parent: &QualifiedName) -> String {
        format!("{}_chunk_guard", parent.name)
    }

    /// Column clauses plus the primary key clause, if any
    fn layout_clauses(columns: &[ColumnDef]) -> Vec<String> {
        let mut parts: Vec<String> = columns.iter().map(ColumnDef::definition).collect();

        let mut pk: Vec<&ColumnDef> = columns.iter().filter(|c| c.pk > 0).collect();
        pk.sort_by_key(|c| c.pk);
        if !pk.is_empty() {
            let names: Vec<String> = pk.iter().map(|c| quote_ident(&c.name)).collect();
            parts.push(format!("PRIMARY KEY ({})", names.join(", ")));
        }
        parts
    }

    /// `CREATE TABLE IF NOT EXISTS` from parsed column definitions
    pub fn create_table(&self, conn: &Connection, name: &QualifiedName, columns: &[ColumnDef]) -> ChunkResult<()> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            name.quoted(),
            Self::layout_clauses(columns).join(",\n    ")
        );
        tracing::debug!("Creating table: {}", ddl);
        conn.execute_batch(&ddl)?;
        Ok(())
    }

    fn table_sql(&self, conn: &Connection, name: &QualifiedName) -> ChunkResult<Option<String>> {
        let sql = format!(
            "SELECT sql FROM {}.sqlite_master WHERE type = 'table' AND name = ?1",
            quote_ident(&name.schema)
        );
        Ok(conn
            .query_row(&sql, params![name.name], |row| row.get(0))
            .optional()?)
    }
}

impl SegmentHost for SqliteSegmentHost {
    fn object_kind(&self, conn: &Connection, name: &QualifiedName) -> ChunkResult<Option<String>> {
        let sql = format!(
            "SELECT type FROM {}.sqlite_master WHERE name = ?1",
            quote_ident(&name.schema)
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let mut rows = stmt.query(params![name.name])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    fn table_columns(&self, conn: &Connection, name: &QualifiedName) -> ChunkResult<Vec<ColumnDef>> {
        let mut stmt = conn.prepare_cached(
            "SELECT name, type, \"notnull\", dflt_value, pk
             FROM pragma_table_info(?1, ?2)
             ORDER BY cid",
        )?;
        let columns = stmt
            .query_map(params![name.name, name.schema], |row| {
                Ok(ColumnDef {
                    name: row.get(0)?,
                    decl_type: row.get(1)?,
                    not_null: row.get::<_, i64>(2)? != 0,
                    default: row.get(3)?,
                    pk: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(columns)
    }

    fn table_is_empty(&self, conn: &Connection, name: &QualifiedName) -> ChunkResult<bool> {
        let sql = format!("SELECT NOT EXISTS (SELECT 1 FROM {})", name.quoted());
        Ok(conn.query_row(&sql, [], |row| row.get(0))?)
    }

    fn segment_exists(&self, conn: &Connection, segment: &QualifiedName) -> ChunkResult<bool> {
        Ok(self.object_kind(conn, segment)?.as_deref() == Some("table"))
    }

    fn create_segment(&self, conn: &Connection, spec: &SegmentSpec<'_>) -> ChunkResult<()> {
        let columns = self.table_columns(conn, spec.parent)?;

        let mut parts = Self::layout_clauses(&columns);
        parts.push(format!(
            "CONSTRAINT {} {}",
            quote_ident(&format!("{}_time_check", spec.segment.name)),
            spec.time_check()
        ));

        let ddl = format!(
            "CREATE TABLE {} (\n    {}\n)",
            spec.segment.quoted(),
            parts.join(",\n    ")
        );
        tracing::debug!("Creating segment: {}", ddl);
        conn.execute_batch(&ddl)?;
        Ok(())
    }

    fn verify_segment(&self, conn: &Connection, spec: &SegmentSpec<'_>) -> ChunkResult<()> {
        let mismatch = |reason: String| ChunkError::SegmentMismatch {
            segment: spec.segment.to_string(),
            reason,
        };
        let layout = |columns: Vec<ColumnDef>| -> Vec<(String, String, bool)> {
            columns
                .into_iter()
                .map(|c| (c.name, c.decl_type.to_ascii_uppercase(), c.not_null))
                .collect()
        };

        let expected = layout(self.table_columns(conn, spec.parent)?);
        let actual = layout(self.table_columns(conn, spec.segment)?);
        if actual != expected {
            let names = |layout: &[(String, String, bool)]| {
                layout
                    .iter()
                    .map(|(name, decl_type, _)| format!("{} {}", name, decl_type).trim_end().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            return Err(mismatch(format!(
                "has columns ({}) but {} has ({})",
                names(&actual),
                spec.parent,
                names(&expected)
            )));
        }

        let check = spec.time_check();
        let sql = self.table_sql(conn, spec.segment)?.unwrap_or_default();
        if !sql.contains(&check) {
            return Err(mismatch(format!("lacks {}", check)));
        }
        Ok(())
    }

    fn drop_segment(&self, conn: &Connection, segment: &QualifiedName) -> ChunkResult<()> {
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", segment.quoted()))?;
        Ok(())
    }

    fn truncate_segment(&self, conn: &Connection, segment: &QualifiedName) -> ChunkResult<()> {
        conn.execute(&format!("DELETE FROM {}", segment.quoted()), [])?;
        Ok(())
    }

    fn insert_row(&self, conn: &Connection, target: &QualifiedName, row: &Row) -> ChunkResult<()> {
        let sql = if row.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", target.quoted())
        } else {
            let columns: Vec<String> = row.columns().map(quote_ident).collect();
            let placeholders: Vec<String> = (1..=row.len()).map(|i| format!("?{}", i)).collect();
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                target.quoted(),
                columns.join(", "),
                placeholders.join(", ")
            )
        };

        let mut stmt = conn.prepare_cached(&sql)?;
        stmt.execute(params_from_iter(row.values()))?;
        Ok(())
    }

    fn read_rows(&self, conn: &Connection, segment: &QualifiedName) -> ChunkResult<Vec<Row>> {
        let mut stmt = conn.prepare(&format!("SELECT * FROM {}", segment.quoted()))?;
        let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

        let mut rows = stmt.query([])?;
        let mut out: Vec<Row> = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(names.len());
            for (idx, name) in names.iter().enumerate() {
                let value = Value::try_from(row.get_ref(idx)?).map_err(|e| {
                    ChunkError::Serialization(format!("column {} of {} holds invalid text: {}", name, segment, e))
                })?;
                values.push((name.clone(), value));
            }
            out.push(values.into_iter().collect());
        }
        Ok(out)
    }

    fn install_insert_guard(&self, conn: &Connection, parent: &QualifiedName) -> ChunkResult<()> {
        let message = format!(
            "direct inserts into partitioned table {} are not allowed",
            parent
        )
        .replace('\'', "''");
        let ddl = format!(
            "CREATE TRIGGER IF NOT EXISTS {}.{} BEFORE INSERT ON {}
             BEGIN
                 SELECT RAISE(ABORT, '{}');
             END",
            quote_ident(&parent.schema),
            quote_ident(&Self::guard_name(parent)),
            quote_ident(&parent.name),
            message
        );
        conn.execute_batch(&ddl)?;
        Ok(())
    }

    fn remove_insert_guard(&self, conn: &Connection, parent: &QualifiedName) -> ChunkResult<()> {
        conn.execute_batch(&format!(
            "DROP TRIGGER IF EXISTS {}.{}",
            quote_ident(&parent.schema),
            quote_ident(&Self::guard_name(parent))
        ))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Connection, QualifiedName) {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE metrics (
                ts INTEGER NOT NULL,
                host TEXT DEFAULT 'local',
                value REAL
            )",
        )
        .unwrap();
        (conn, QualifiedName::new("main", "metrics"))
    }

    #[test]
    fn test_affinity_rules() {
        assert_eq!(Affinity::of("BIGINT"), Affinity::Integer);
        assert_eq!(Affinity::of("varchar(20)"), Affinity::Text);
        assert_eq!(Affinity::of(""), Affinity::Blob);
        assert_eq!(Affinity::of("DOUBLE PRECISION"), Affinity::Real);
        assert_eq!(Affinity::of("TIMESTAMP"), Affinity::Numeric);
        assert!(Affinity::of("TIMESTAMP").keeps_integers());
        assert!(!Affinity::of("TEXT").keeps_integers());
    }

    #[test]
    fn test_columns_and_kind() {
        let (conn, parent) = setup();
        let host = SqliteSegmentHost::new();

        assert_eq!(
            host.object_kind(&conn, &parent).unwrap().as_deref(),
            Some("table")
        );
        assert_eq!(
            host.object_kind(&conn, &QualifiedName::new("main", "nope")).unwrap(),
            None
        );

        let columns = host.table_columns(&conn, &parent).unwrap();
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["ts", "host", "value"]);
        assert!(columns[0].not_null);
        assert_eq!(columns[1].default.as_deref(), Some("'local'"));
    }

    #[test]
    fn test_segment_range_check() {
        let (conn, parent) = setup();
        let host = SqliteSegmentHost::new();
        let segment = QualifiedName::new("main", "_hyper_1_1_chunk");

        host.create_segment(
            &conn,
            &SegmentSpec {
                parent: &parent,
                segment: &segment,
                time_column: "ts",
                start_time: 0,
                end_time: 100,
            },
        )
        .unwrap();
        assert!(host.segment_exists(&conn, &segment).unwrap());

        host.insert_row(&conn, &segment, &Row::new().with("ts", 99_i64).with("value", 1.5))
            .unwrap();
        assert!(host
            .insert_row(&conn, &segment, &Row::new().with("ts", 100_i64))
            .is_err());
        assert!(host
            .insert_row(&conn, &segment, &Row::new().with("ts", -1_i64))
            .is_err());

        let rows = host.read_rows(&conn, &segment).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("host"), Some(&Value::Text("local".into())));
        assert_eq!(rows[0].get("value"), Some(&Value::Real(1.5)));

        host.truncate_segment(&conn, &segment).unwrap();
        assert!(host.table_is_empty(&conn, &segment).unwrap());

        host.drop_segment(&conn, &segment).unwrap();
        assert!(!host.segment_exists(&conn, &segment).unwrap());
    }

    fn spec<'a>(parent: &'a QualifiedName, segment: &'a QualifiedName, end_time: i64) -> SegmentSpec<'a> {
        SegmentSpec {
            parent,
            segment,
            time_column: "ts",
            start_time: 0,
            end_time,
        }
    }

    #[test]
    fn test_verify_segment() {
        let (conn, parent) = setup();
        let host = SqliteSegmentHost::new();
        let segment = QualifiedName::new("main", "_hyper_1_1_chunk");

        host.create_segment(&conn, &spec(&parent, &segment, 100)).unwrap();
        host.verify_segment(&conn, &spec(&parent, &segment, 100)).unwrap();

        let err = host
            .verify_segment(&conn, &spec(&parent, &segment, 200))
            .unwrap_err();
        assert!(matches!(err, ChunkError::SegmentMismatch { .. }));
        assert!(err.to_string().contains("< 200"));

        let stray = QualifiedName::new("main", "_hyper_1_2_chunk");
        conn.execute_batch("CREATE TABLE _hyper_1_2_chunk (ts INTEGER NOT NULL, value REAL)")
            .unwrap();
        let err = host
            .verify_segment(&conn, &spec(&parent, &stray, 100))
            .unwrap_err();
        assert!(err.to_string().contains("has columns (ts INTEGER, value REAL)"));
    }

    #[test]
    fn test_invalid_text_is_not_rewritten() {
        let (conn, parent) = setup();
        let host = SqliteSegmentHost::new();
        conn.execute_batch("INSERT INTO metrics (ts, host) VALUES (1, CAST(x'ff' AS TEXT))")
            .unwrap();

        let err = host.read_rows(&conn, &parent).unwrap_err();
        assert!(err.to_string().contains("column host of main.metrics"));
    }

    #[test]
    fn test_create_table_from_definitions() {
        let conn = Connection::open_in_memory().unwrap();
        let host = SqliteSegmentHost::new();
        let name = QualifiedName::new("main", "events");
        let columns = ColumnDef::parse_list("ts INTEGER NOT NULL PRIMARY KEY, kind TEXT").unwrap();

        host.create_table(&conn, &name, &columns).unwrap();
        // Second call is a no-op
        host.create_table(&conn, &name, &columns).unwrap();

        let created = host.table_columns(&conn, &name).unwrap();
        assert_eq!(created.len(), 2);
        assert!(created[0].not_null);
        assert_eq!(created[0].pk, 1);
        assert_eq!(created[1].decl_type, "TEXT");
    }

    #[test]
    fn test_insert_guard() {
        let (conn, parent) = setup();
        let host = SqliteSegmentHost::new();

        host.install_insert_guard(&conn, &parent).unwrap();
        let err = host
            .insert_row(&conn, &parent, &Row::new().with("ts", 1_i64))
            .unwrap_err();
        assert!(err.to_string().contains("not allowed"));

        host.remove_insert_guard(&conn, &parent).unwrap();
        host.insert_row(&conn, &parent, &Row::new().with("ts", 1_i64))
            .unwrap();
        assert!(!host.table_is_empty(&conn, &parent).unwrap());
    }
}
