pub mod nodes;

use std::time::Duration;

use rusqlite::types::Type;
use rusqlite::{Connection, Row, params};

use crate::error::{CatalogError, CatalogResult};
use crate::model::CategoryId;

pub const SCHEMA_VERSION: i64 = 1;
pub const BUSY_TIMEOUT_DEFAULT: Duration = Duration::from_secs(5);

pub fn open(path: &str, busy_timeout: Duration) -> CatalogResult<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> CatalogResult<Connection> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> CatalogResult<()> {
    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = FULL;
        ",
    )?;

    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    match version {
        0 => {
            create_schema_v1(conn)?;
            conn.execute_batch("PRAGMA user_version = 1;")?;
        }
        SCHEMA_VERSION => create_schema_v1(conn)?,
        other => return Err(CatalogError::UnsupportedSchema(other)),
    }
    Ok(())
}

fn create_schema_v1(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS categories (
            id TEXT PRIMARY KEY NOT NULL,
            name TEXT NOT NULL CHECK (length(trim(name)) > 0),
            description TEXT,
            parent_id TEXT REFERENCES categories(id) DEFERRABLE INITIALLY DEFERRED
        );

        CREATE INDEX IF NOT EXISTS idx_categories_parent_name ON categories(parent_id, name);

        CREATE TABLE IF NOT EXISTS category_closure (
            ancestor_id TEXT NOT NULL REFERENCES categories(id) DEFERRABLE INITIALLY DEFERRED,
            descendant_id TEXT NOT NULL REFERENCES categories(id) DEFERRABLE INITIALLY DEFERRED,
            PRIMARY KEY (ancestor_id, descendant_id)
        );

        CREATE INDEX IF NOT EXISTS idx_category_closure_descendant ON category_closure(descendant_id);
        ",
    )
}

pub fn table_exists(conn: &Connection, name: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub(crate) fn encode_id(id: &CategoryId) -> String {
    id.as_hyphenated().to_string()
}

pub(crate) fn read_id(row: &Row<'_>, idx: usize) -> rusqlite::Result<CategoryId> {
    let raw: String = row.get(idx)?;
    CategoryId::parse_str(&raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

pub(crate) fn read_optional_id(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<CategoryId>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|value| {
        CategoryId::parse_str(&value).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
        })
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_both_relations_and_stamps_version() {
        let conn = open_in_memory().expect("in-memory sqlite");
        assert!(table_exists(&conn, "categories").expect("categories lookup"));
        assert!(table_exists(&conn, "category_closure").expect("closure lookup"));
        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .expect("user_version");
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn reopening_a_file_keeps_existing_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("catalog.sqlite");
        let path = path.to_string_lossy().into_owned();

        let conn = open(&path, BUSY_TIMEOUT_DEFAULT).expect("first open");
        conn.execute(
            "INSERT INTO categories (id, name) VALUES (?1, 'Books')",
            params![encode_id(&CategoryId::nil())],
        )
        .expect("seed row");
        drop(conn);

        let conn = open(&path, BUSY_TIMEOUT_DEFAULT).expect("second open");
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM categories", [], |row| row.get(0))
            .expect("count");
        assert_eq!(count, 1);
    }

    #[test]
    fn refuses_newer_schema_versions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("future.sqlite");
        let raw = Connection::open(&path).expect("raw open");
        raw.execute_batch("PRAGMA user_version = 7;")
            .expect("stamp version");
        drop(raw);

        let err = open(&path.to_string_lossy(), BUSY_TIMEOUT_DEFAULT).expect_err("newer schema");
        assert!(matches!(err, CatalogError::UnsupportedSchema(7)));
    }

    #[test]
    fn blank_names_are_rejected_by_the_table() {
        let conn = open_in_memory().expect("in-memory sqlite");
        let result = conn.execute(
            "INSERT INTO categories (id, name) VALUES (?1, '   ')",
            params![encode_id(&CategoryId::nil())],
        );
        assert!(result.is_err());
    }

    #[test]
    fn undecodable_ids_surface_as_conversion_errors() {
        let conn = open_in_memory().expect("in-memory sqlite");
        let err = conn
            .query_row("SELECT 'not-a-uuid'", [], |row| read_id(row, 0))
            .expect_err("bad id");
        assert!(matches!(
            err,
            rusqlite::Error::FromSqlConversionFailure(0, Type::Text, _)
        ));
    }
}
