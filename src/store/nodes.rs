//! Node Store: the authoritative `categories` table.
//!
//! Every function takes a plain `&Connection` so callers can run it either
//! directly or inside a transaction (a `Transaction` derefs to `Connection`).

use rusqlite::{Connection, OptionalExtension, Row, ToSql, params, params_from_iter};
use uuid::Uuid;

use crate::error::{CatalogError, CatalogResult};
use crate::model::{Category, CategoryId, Page, PageRequest};
use crate::store::{encode_id, read_id, read_optional_id};

// Stays well below SQLITE_MAX_VARIABLE_NUMBER on every build.
const IN_CHUNK: usize = 500;

const SELECT_COLUMNS: &str = "SELECT id, name, description, parent_id FROM categories";

pub fn insert(
    conn: &Connection,
    name: &str,
    description: Option<&str>,
    parent_id: Option<CategoryId>,
) -> CatalogResult<Category> {
    if let Some(parent_id) = parent_id
        && !exists(conn, parent_id)?
    {
        return Err(CatalogError::ParentNotFound(parent_id));
    }

    let category = Category {
        id: Uuid::new_v4(),
        name: name.to_string(),
        description: description.map(ToOwned::to_owned),
        parent_id,
    };
    conn.execute(
        "INSERT INTO categories (id, name, description, parent_id) VALUES (?1, ?2, ?3, ?4)",
        params![
            encode_id(&category.id),
            category.name,
            category.description,
            category.parent_id.as_ref().map(encode_id),
        ],
    )?;
    Ok(category)
}

pub fn update(
    conn: &Connection,
    id: CategoryId,
    name: &str,
    description: Option<&str>,
) -> CatalogResult<Category> {
    let changed = conn.execute(
        "UPDATE categories SET name = ?2, description = ?3 WHERE id = ?1",
        params![encode_id(&id), name, description],
    )?;
    if changed == 0 {
        return Err(CatalogError::NotFound(id));
    }
    get(conn, id)
}

pub fn get(conn: &Connection, id: CategoryId) -> CatalogResult<Category> {
    find(conn, id)?.ok_or(CatalogError::NotFound(id))
}

pub fn find(conn: &Connection, id: CategoryId) -> CatalogResult<Option<Category>> {
    let mut stmt = conn.prepare_cached(&format!("{SELECT_COLUMNS} WHERE id = ?1"))?;
    let found = stmt
        .query_row(params![encode_id(&id)], read_category)
        .optional()?;
    Ok(found)
}

pub fn exists(conn: &Connection, id: CategoryId) -> CatalogResult<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM categories WHERE id = ?1",
            params![encode_id(&id)],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn has_children(conn: &Connection, id: CategoryId) -> CatalogResult<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM categories WHERE parent_id = ?1 LIMIT 1",
            params![encode_id(&id)],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn list_all(conn: &Connection) -> CatalogResult<Vec<Category>> {
    collect(conn, &format!("{SELECT_COLUMNS} ORDER BY name ASC, id ASC"), params![])
}

pub fn list_roots(conn: &Connection) -> CatalogResult<Vec<Category>> {
    collect(
        conn,
        &format!("{SELECT_COLUMNS} WHERE parent_id IS NULL ORDER BY name ASC, id ASC"),
        params![],
    )
}

/// Direct children of `parent_id`, one level only. An unknown parent yields an
/// empty page rather than an error.
pub fn list_children(
    conn: &Connection,
    parent_id: CategoryId,
    request: PageRequest,
) -> CatalogResult<Page<Category>> {
    let parent = encode_id(&parent_id);
    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM categories WHERE parent_id = ?1",
        params![parent],
        |row| row.get(0),
    )?;
    let offset = i64::try_from(request.offset()).unwrap_or(i64::MAX);
    let content = collect(
        conn,
        &format!(
            "{SELECT_COLUMNS} WHERE parent_id = ?1 ORDER BY name ASC, id ASC LIMIT ?2 OFFSET ?3"
        ),
        params![parent, i64::from(request.size()), offset],
    )?;
    Ok(Page::new(content, request, total.max(0) as u64))
}

/// Resolves ids to records. Ids with no row are skipped; output order is not
/// tied to input order.
pub fn get_many(conn: &Connection, ids: &[CategoryId]) -> CatalogResult<Vec<Category>> {
    let mut out = Vec::with_capacity(ids.len());
    for chunk in ids.chunks(IN_CHUNK) {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE id IN ({})",
            placeholders(chunk.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(chunk.iter().map(encode_id)), read_category)?;
        for row in rows {
            out.push(row?);
        }
    }
    Ok(out)
}

/// Removes the row if present. Returns whether a row was removed.
pub fn delete(conn: &Connection, id: CategoryId) -> CatalogResult<bool> {
    let removed = conn.execute(
        "DELETE FROM categories WHERE id = ?1",
        params![encode_id(&id)],
    )?;
    Ok(removed > 0)
}

/// Removes every listed row. Foreign keys are deferred, so a whole subtree can
/// be passed in any order as long as the caller holds a transaction.
pub fn delete_many(conn: &Connection, ids: &[CategoryId]) -> CatalogResult<usize> {
    let mut removed = 0;
    for chunk in ids.chunks(IN_CHUNK) {
        let sql = format!(
            "DELETE FROM categories WHERE id IN ({})",
            placeholders(chunk.len())
        );
        removed += conn.execute(&sql, params_from_iter(chunk.iter().map(encode_id)))?;
    }
    Ok(removed)
}

/// (id, parent_id) for every row, used to recompute the closure from scratch.
pub fn parent_links(conn: &Connection) -> CatalogResult<Vec<(CategoryId, Option<CategoryId>)>> {
    let mut stmt = conn.prepare("SELECT id, parent_id FROM categories")?;
    let rows = stmt.query_map([], |row| Ok((read_id(row, 0)?, read_optional_id(row, 1)?)))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn collect(conn: &Connection, sql: &str, params: &[&dyn ToSql]) -> CatalogResult<Vec<Category>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let mut rows = stmt.query(params)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(read_category(row)?);
    }
    Ok(out)
}

fn read_category(row: &Row<'_>) -> rusqlite::Result<Category> {
    Ok(Category {
        id: read_id(row, 0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        parent_id: read_optional_id(row, 3)?,
    })
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::open_in_memory;

    #[test]
    fn insert_then_get_returns_same_record() {
        let conn = open_in_memory().expect("in-memory sqlite");
        let created = insert(&conn, "Books", Some("paper"), None).expect("insert root");
        let fetched = get(&conn, created.id).expect("get");
        assert_eq!(created, fetched);
        assert!(fetched.is_root());
    }

    #[test]
    fn insert_with_missing_parent_fails_without_writing() {
        let conn = open_in_memory().expect("in-memory sqlite");
        let missing = Uuid::new_v4();
        let err = insert(&conn, "Orphan", None, Some(missing)).expect_err("missing parent");
        assert!(matches!(err, CatalogError::ParentNotFound(id) if id == missing));
        assert!(list_all(&conn).expect("list").is_empty());
    }

    #[test]
    fn update_changes_name_and_description_only() {
        let conn = open_in_memory().expect("in-memory sqlite");
        let root = insert(&conn, "Root", None, None).expect("root");
        let child = insert(&conn, "Chld", Some("typo"), Some(root.id)).expect("child");

        let updated = update(&conn, child.id, "Child", None).expect("update");
        assert_eq!(updated.name, "Child");
        assert_eq!(updated.description, None);
        assert_eq!(updated.parent_id, Some(root.id));
    }

    #[test]
    fn update_of_unknown_id_is_not_found() {
        let conn = open_in_memory().expect("in-memory sqlite");
        let missing = Uuid::new_v4();
        let err = update(&conn, missing, "x", None).expect_err("unknown id");
        assert!(matches!(err, CatalogError::NotFound(id) if id == missing));
    }

    #[test]
    fn children_are_paged_by_name() {
        let conn = open_in_memory().expect("in-memory sqlite");
        let root = insert(&conn, "Root", None, None).expect("root");
        for idx in (0..25).rev() {
            insert(&conn, &format!("child-{idx:02}"), None, Some(root.id)).expect("child");
        }

        let sizes: Vec<usize> = (0..3)
            .map(|page| {
                let request = PageRequest::new(page, 10).expect("request");
                list_children(&conn, root.id, request)
                    .expect("children page")
                    .content
                    .len()
            })
            .collect();
        assert_eq!(sizes, vec![10, 10, 5]);

        let first = list_children(&conn, root.id, PageRequest::new(0, 10).expect("request"))
            .expect("first page");
        assert_eq!(first.total_elements, 25);
        assert_eq!(first.total_pages, 3);
        assert_eq!(first.content[0].name, "child-00");
        assert_eq!(first.content[9].name, "child-09");
    }

    #[test]
    fn children_of_unknown_parent_is_empty_page() {
        let conn = open_in_memory().expect("in-memory sqlite");
        let page = list_children(&conn, Uuid::new_v4(), PageRequest::default()).expect("page");
        assert!(page.is_empty());
        assert_eq!(page.total_elements, 0);
    }

    #[test]
    fn roots_exclude_children() {
        let conn = open_in_memory().expect("in-memory sqlite");
        let a = insert(&conn, "A", None, None).expect("a");
        let b = insert(&conn, "B", None, None).expect("b");
        insert(&conn, "A1", None, Some(a.id)).expect("a1");

        let roots = list_roots(&conn).expect("roots");
        assert_eq!(
            roots.iter().map(|c| c.id).collect::<Vec<_>>(),
            vec![a.id, b.id]
        );
        assert_eq!(list_all(&conn).expect("all").len(), 3);
    }

    #[test]
    fn delete_is_a_noop_for_absent_rows() {
        let conn = open_in_memory().expect("in-memory sqlite");
        let node = insert(&conn, "Gone", None, None).expect("insert");
        assert!(delete(&conn, node.id).expect("first delete"));
        assert!(!delete(&conn, node.id).expect("second delete"));
    }

    #[test]
    fn get_many_skips_unknown_ids() {
        let conn = open_in_memory().expect("in-memory sqlite");
        let a = insert(&conn, "A", None, None).expect("a");
        let b = insert(&conn, "B", None, None).expect("b");

        let mut found = get_many(&conn, &[b.id, Uuid::new_v4(), a.id]).expect("get many");
        found.sort_by(|x, y| x.name.cmp(&y.name));
        assert_eq!(found, vec![a, b]);
    }

    #[test]
    fn has_children_tracks_direct_links() {
        let conn = open_in_memory().expect("in-memory sqlite");
        let root = insert(&conn, "Root", None, None).expect("root");
        assert!(!has_children(&conn, root.id).expect("no children yet"));
        insert(&conn, "Leaf", None, Some(root.id)).expect("leaf");
        assert!(has_children(&conn, root.id).expect("has child"));
    }
}
