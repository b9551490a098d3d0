use rusqlite::{Connection, params};

use crate::closure::ClosureIndex;
use crate::error::{CatalogError, CatalogResult};
use crate::model::{CategoryId, ClosureEdge};
use crate::store::{encode_id, read_id};

/// Closure index over the `category_closure` table. Borrows the connection so
/// it can run inside the caller's transaction.
pub struct SqlClosure<'c> {
    conn: &'c Connection,
}

impl<'c> SqlClosure<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    fn ids(&self, sql: &str, node: CategoryId) -> CatalogResult<Vec<CategoryId>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let mut rows = stmt.query(params![encode_id(&node)])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(read_id(row, 0)?);
        }
        Ok(out)
    }

    pub fn edge_count(&self) -> CatalogResult<u64> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM category_closure", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    /// Replaces the whole relation with `edges`.
    pub fn replace_all(&mut self, edges: &[ClosureEdge]) -> CatalogResult<()> {
        self.conn.execute("DELETE FROM category_closure", [])?;
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO category_closure (ancestor_id, descendant_id) VALUES (?1, ?2)",
        )?;
        for edge in edges {
            stmt.execute(params![
                encode_id(&edge.ancestor_id),
                encode_id(&edge.descendant_id)
            ])?;
        }
        Ok(())
    }
}

impl ClosureIndex for SqlClosure<'_> {
    fn record_root(&mut self, node: CategoryId) -> CatalogResult<()> {
        self.conn.execute(
            "INSERT INTO category_closure (ancestor_id, descendant_id) VALUES (?1, ?1)",
            params![encode_id(&node)],
        )?;
        Ok(())
    }

    fn record_child(&mut self, node: CategoryId, parent: CategoryId) -> CatalogResult<()> {
        let inserted = self.conn.execute(
            "INSERT INTO category_closure (ancestor_id, descendant_id)
             SELECT ancestor_id, ?1
             FROM category_closure
             WHERE descendant_id = ?2
             UNION ALL
             SELECT ?1, ?1",
            params![encode_id(&node), encode_id(&parent)],
        )?;
        // Only the self-edge went in: the parent is unknown to the index.
        if inserted < 2 {
            return Err(CatalogError::ParentNotFound(parent));
        }
        Ok(())
    }

    fn descendants_of(&self, node: CategoryId) -> CatalogResult<Vec<CategoryId>> {
        self.ids(
            "SELECT descendant_id FROM category_closure WHERE ancestor_id = ?1",
            node,
        )
    }

    fn ancestors_of(&self, node: CategoryId) -> CatalogResult<Vec<CategoryId>> {
        // An ancestor's depth is the number of edges pointing at it.
        self.ids(
            "SELECT c.ancestor_id
             FROM category_closure c
             WHERE c.descendant_id = ?1
             ORDER BY (
                 SELECT COUNT(*) FROM category_closure d WHERE d.descendant_id = c.ancestor_id
             ) ASC",
            node,
        )
    }

    fn remove_subtree(&mut self, node: CategoryId) -> CatalogResult<Vec<CategoryId>> {
        let subtree = self.descendants_of(node)?;
        if subtree.is_empty() {
            return Ok(subtree);
        }
        self.conn.execute(
            "DELETE FROM category_closure
             WHERE descendant_id IN (
                 SELECT descendant_id FROM category_closure WHERE ancestor_id = ?1
             )",
            params![encode_id(&node)],
        )?;
        Ok(subtree)
    }

    fn edges(&self) -> CatalogResult<Vec<ClosureEdge>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT ancestor_id, descendant_id FROM category_closure")?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(ClosureEdge::new(read_id(row, 0)?, read_id(row, 1)?));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{self, nodes};
    use uuid::Uuid;

    fn seeded() -> (Connection, Vec<CategoryId>) {
        let conn = store::open_in_memory().expect("in-memory sqlite");
        let root = nodes::insert(&conn, "Electronics", None, None).expect("root");
        let phones = nodes::insert(&conn, "Phones", None, Some(root.id)).expect("phones");
        let smart = nodes::insert(&conn, "Smartphones", None, Some(phones.id)).expect("smart");
        {
            let mut index = SqlClosure::new(&conn);
            index.record_root(root.id).expect("root edges");
            index.record_child(phones.id, root.id).expect("phones edges");
            index.record_child(smart.id, phones.id).expect("smart edges");
        }
        (conn, vec![root.id, phones.id, smart.id])
    }

    #[test]
    fn root_gets_exactly_one_self_edge() {
        let conn = store::open_in_memory().expect("in-memory sqlite");
        let root = nodes::insert(&conn, "Root", None, None).expect("root");
        let mut index = SqlClosure::new(&conn);
        index.record_root(root.id).expect("root edges");

        assert_eq!(
            index.edges().expect("edges"),
            vec![ClosureEdge::new(root.id, root.id)]
        );
    }

    #[test]
    fn child_inherits_parent_ancestors_plus_self() {
        let (conn, ids) = seeded();
        let index = SqlClosure::new(&conn);

        let ancestors = index.ancestors_of(ids[2]).expect("ancestors");
        assert_eq!(ancestors, ids);
        assert_eq!(index.edge_count().expect("count"), 6);
    }

    #[test]
    fn descendants_include_self() {
        let (conn, ids) = seeded();
        let index = SqlClosure::new(&conn);

        let mut subtree = index.descendants_of(ids[0]).expect("subtree");
        subtree.sort();
        let mut expected = ids.clone();
        expected.sort();
        assert_eq!(subtree, expected);
        assert_eq!(index.descendants_of(ids[2]).expect("leaf"), vec![ids[2]]);
    }

    #[test]
    fn record_child_under_unindexed_parent_is_refused() {
        let conn = store::open_in_memory().expect("in-memory sqlite");
        let parent = nodes::insert(&conn, "Parent", None, None).expect("parent");
        let child = nodes::insert(&conn, "Child", None, Some(parent.id)).expect("child");
        let mut index = SqlClosure::new(&conn);

        let err = index
            .record_child(child.id, parent.id)
            .expect_err("parent has no edges");
        assert!(matches!(err, CatalogError::ParentNotFound(id) if id == parent.id));
    }

    #[test]
    fn remove_subtree_drops_only_edges_into_the_subtree() {
        let (conn, ids) = seeded();
        let mut index = SqlClosure::new(&conn);

        let mut removed = index.remove_subtree(ids[1]).expect("remove phones");
        removed.sort();
        let mut expected = vec![ids[1], ids[2]];
        expected.sort();
        assert_eq!(removed, expected);
        assert_eq!(
            index.edges().expect("edges"),
            vec![ClosureEdge::new(ids[0], ids[0])]
        );
        assert!(index.remove_subtree(Uuid::new_v4()).expect("unknown").is_empty());
    }
}
