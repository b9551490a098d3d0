use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;

use crate::closure::ClosureIndex;
use crate::error::{CatalogError, CatalogResult};
use crate::model::{CategoryId, ClosureEdge};

/// Arena form of the closure: each category maps to its ancestor set
/// (itself included). Nodes only refer to each other by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryClosure {
    ancestors: BTreeMap<CategoryId, BTreeSet<CategoryId>>,
}

/// Parent pointers that cannot be turned into a closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LinkAnomaly {
    DanglingParent {
        node: CategoryId,
        parent: CategoryId,
    },
    Cycle {
        node: CategoryId,
    },
}

impl MemoryClosure {
    /// Recomputes the closure from `(id, parent_id)` pairs. Walks stop at a
    /// missing parent or at the first repeated id; both are reported.
    pub fn derive<I>(links: I) -> (Self, Vec<LinkAnomaly>)
    where
        I: IntoIterator<Item = (CategoryId, Option<CategoryId>)>,
    {
        let parents: HashMap<CategoryId, Option<CategoryId>> = links.into_iter().collect();
        let mut closure = Self::default();
        let mut anomalies = Vec::new();

        for &node in parents.keys() {
            let mut seen = BTreeSet::from([node]);
            let mut current = node;
            while let Some(parent) = parents.get(&current).copied().flatten() {
                if !parents.contains_key(&parent) {
                    anomalies.push(LinkAnomaly::DanglingParent {
                        node: current,
                        parent,
                    });
                    break;
                }
                if !seen.insert(parent) {
                    anomalies.push(LinkAnomaly::Cycle { node });
                    break;
                }
                current = parent;
            }
            closure.ancestors.insert(node, seen);
        }

        // Every descendant of a dangling node reports the same break.
        anomalies.sort();
        anomalies.dedup();
        (closure, anomalies)
    }

    pub fn len(&self) -> usize {
        self.ancestors.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.ancestors.is_empty()
    }

    pub fn contains(&self, edge: &ClosureEdge) -> bool {
        self.ancestors
            .get(&edge.descendant_id)
            .is_some_and(|set| set.contains(&edge.ancestor_id))
    }

    fn depth(&self, node: &CategoryId) -> usize {
        self.ancestors.get(node).map_or(0, BTreeSet::len)
    }
}

impl ClosureIndex for MemoryClosure {
    fn record_root(&mut self, node: CategoryId) -> CatalogResult<()> {
        self.ancestors.entry(node).or_default().insert(node);
        Ok(())
    }

    fn record_child(&mut self, node: CategoryId, parent: CategoryId) -> CatalogResult<()> {
        let mut inherited = self
            .ancestors
            .get(&parent)
            .cloned()
            .ok_or(CatalogError::ParentNotFound(parent))?;
        inherited.insert(node);
        self.ancestors.entry(node).or_default().extend(inherited);
        Ok(())
    }

    fn descendants_of(&self, node: CategoryId) -> CatalogResult<Vec<CategoryId>> {
        Ok(self
            .ancestors
            .iter()
            .filter(|(_, set)| set.contains(&node))
            .map(|(descendant, _)| *descendant)
            .collect())
    }

    fn ancestors_of(&self, node: CategoryId) -> CatalogResult<Vec<CategoryId>> {
        let mut out: Vec<CategoryId> = self
            .ancestors
            .get(&node)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        out.sort_by_key(|id| self.depth(id));
        Ok(out)
    }

    fn remove_subtree(&mut self, node: CategoryId) -> CatalogResult<Vec<CategoryId>> {
        let subtree = self.descendants_of(node)?;
        for id in &subtree {
            self.ancestors.remove(id);
        }
        Ok(subtree)
    }

    fn edges(&self) -> CatalogResult<Vec<ClosureEdge>> {
        Ok(self
            .ancestors
            .iter()
            .flat_map(|(descendant, set)| {
                set.iter()
                    .map(move |ancestor| ClosureEdge::new(*ancestor, *descendant))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn ids(count: usize) -> Vec<CategoryId> {
        (0..count).map(|_| Uuid::new_v4()).collect()
    }

    #[test]
    fn ancestors_of_child_are_parent_ancestors_plus_self() {
        let id = ids(3);
        let mut closure = MemoryClosure::default();
        closure.record_root(id[0]).expect("root");
        closure.record_child(id[1], id[0]).expect("child");
        closure.record_child(id[2], id[1]).expect("grandchild");

        assert_eq!(closure.ancestors_of(id[2]).expect("ancestors"), id);
        assert_eq!(closure.len(), 6);
    }

    #[test]
    fn unknown_parent_is_refused() {
        let id = ids(2);
        let mut closure = MemoryClosure::default();
        let err = closure.record_child(id[1], id[0]).expect_err("no parent");
        assert!(matches!(err, CatalogError::ParentNotFound(parent) if parent == id[0]));
        assert!(closure.is_empty());
    }

    #[test]
    fn derive_matches_incremental_build() {
        let id = ids(4);
        let mut incremental = MemoryClosure::default();
        incremental.record_root(id[0]).expect("root");
        incremental.record_child(id[1], id[0]).expect("a");
        incremental.record_child(id[2], id[1]).expect("b");
        incremental.record_root(id[3]).expect("other root");

        // Input order deliberately children-first.
        let (derived, anomalies) = MemoryClosure::derive([
            (id[2], Some(id[1])),
            (id[1], Some(id[0])),
            (id[3], None),
            (id[0], None),
        ]);
        assert!(anomalies.is_empty());
        assert_eq!(derived, incremental);
    }

    #[test]
    fn derive_reports_dangling_parents_and_cycles() {
        let id = ids(4);
        let (closure, anomalies) = MemoryClosure::derive([
            (id[0], Some(id[3])),
            (id[1], Some(id[2])),
            (id[2], Some(id[1])),
        ]);

        assert!(anomalies.contains(&LinkAnomaly::DanglingParent {
            node: id[0],
            parent: id[3],
        }));
        assert!(anomalies.contains(&LinkAnomaly::Cycle { node: id[1] }));
        assert!(anomalies.contains(&LinkAnomaly::Cycle { node: id[2] }));
        assert!(closure.contains(&ClosureEdge::new(id[0], id[0])));
    }

    #[test]
    fn remove_subtree_keeps_siblings() {
        let id = ids(4);
        let mut closure = MemoryClosure::default();
        closure.record_root(id[0]).expect("root");
        closure.record_child(id[1], id[0]).expect("a");
        closure.record_child(id[2], id[1]).expect("a child");
        closure.record_child(id[3], id[0]).expect("b");

        let mut removed = closure.remove_subtree(id[1]).expect("remove");
        removed.sort();
        let mut expected = vec![id[1], id[2]];
        expected.sort();
        assert_eq!(removed, expected);
        assert!(closure.contains(&ClosureEdge::new(id[0], id[3])));
        assert_eq!(closure.len(), 3);
    }
}
