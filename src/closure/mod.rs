//! Closure Index: the materialized ancestor/descendant relation.
//!
//! For every category N the index holds the self-edge (N, N) plus one edge
//! (A, N) per ancestor A. Subtree reads become a single lookup on the ancestor
//! column instead of a walk down the parent pointers. The maintenance rules live
//! behind [`ClosureIndex`] so the engine does not care whether edges sit in
//! SQLite ([`SqlClosure`]) or in an in-memory arena ([`MemoryClosure`]).

pub mod memory;
pub mod sql;

pub use memory::{LinkAnomaly, MemoryClosure};
pub use sql::SqlClosure;

use crate::error::CatalogResult;
use crate::model::{CategoryId, ClosureEdge};

pub trait ClosureIndex {
    /// Inserts the self-edge for a category without a parent.
    fn record_root(&mut self, node: CategoryId) -> CatalogResult<()>;

    /// Copies every ancestor edge of `parent` onto `node` and adds the
    /// self-edge. Fails with `ParentNotFound` when `parent` has no edges.
    fn record_child(&mut self, node: CategoryId, parent: CategoryId) -> CatalogResult<()>;

    /// Every id in the subtree of `node`, `node` itself included.
    fn descendants_of(&self, node: CategoryId) -> CatalogResult<Vec<CategoryId>>;

    /// Every ancestor of `node`, root first, `node` itself last.
    fn ancestors_of(&self, node: CategoryId) -> CatalogResult<Vec<CategoryId>>;

    /// Drops every edge pointing into the subtree of `node` and returns the
    /// subtree ids. Returns an empty list when `node` is unknown.
    fn remove_subtree(&mut self, node: CategoryId) -> CatalogResult<Vec<CategoryId>>;

    fn edges(&self) -> CatalogResult<Vec<ClosureEdge>>;
}
