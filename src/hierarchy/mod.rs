//! Hierarchy engine over the Node Store and the Closure Index.
//!
//! Every write runs inside one `BEGIN IMMEDIATE` transaction: the category row
//! and its closure edges commit together or not at all, and concurrent writers
//! on the same database file are serialized by SQLite before they read the
//! parent's ancestors.

pub mod integrity;

use std::collections::HashMap;
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::closure::{ClosureIndex, SqlClosure};
use crate::error::{CatalogError, CatalogResult};
use crate::model::{Category, CategoryId, Page, PageRequest};
use crate::store::{self, BUSY_TIMEOUT_DEFAULT, nodes};

pub use integrity::IntegrityReport;

/// What `delete_category` does with a category that still has descendants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    /// Refuse with `HasChildren`.
    #[default]
    Restrict,
    /// Remove the whole subtree and its edges.
    Cascade,
}

impl DeletePolicy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Restrict => "restrict",
            Self::Cascade => "cascade",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogOptions {
    pub busy_timeout: Duration,
    pub delete_policy: DeletePolicy,
}

impl Default for CatalogOptions {
    fn default() -> Self {
        Self {
            busy_timeout: BUSY_TIMEOUT_DEFAULT,
            delete_policy: DeletePolicy::Restrict,
        }
    }
}

pub struct Catalog {
    conn: Connection,
    delete_policy: DeletePolicy,
}

impl Catalog {
    pub fn open(path: &str, options: &CatalogOptions) -> CatalogResult<Self> {
        let conn = store::open(path, options.busy_timeout)?;
        Ok(Self {
            conn,
            delete_policy: options.delete_policy,
        })
    }

    pub fn open_in_memory() -> CatalogResult<Self> {
        Ok(Self {
            conn: store::open_in_memory()?,
            delete_policy: DeletePolicy::default(),
        })
    }

    pub fn with_delete_policy(mut self, policy: DeletePolicy) -> Self {
        self.delete_policy = policy;
        self
    }

    pub fn delete_policy(&self) -> DeletePolicy {
        self.delete_policy
    }

    fn write(&self) -> CatalogResult<Transaction<'_>> {
        Ok(Transaction::new_unchecked(
            &self.conn,
            TransactionBehavior::Immediate,
        )?)
    }

    fn read(&self) -> CatalogResult<Transaction<'_>> {
        Ok(Transaction::new_unchecked(
            &self.conn,
            TransactionBehavior::Deferred,
        )?)
    }

    pub fn create_category(
        &self,
        name: &str,
        description: Option<&str>,
        parent_id: Option<CategoryId>,
    ) -> CatalogResult<Category> {
        validate_name(name)?;
        let tx = self.write()?;
        if let Some(parent_id) = parent_id
            && !nodes::exists(&tx, parent_id)?
        {
            return Err(CatalogError::ParentNotFound(parent_id));
        }

        let category = nodes::insert(&tx, name, description, parent_id)?;
        let mut closure = SqlClosure::new(&tx);
        match parent_id {
            Some(parent_id) => closure.record_child(category.id, parent_id)?,
            None => closure.record_root(category.id)?,
        }
        tx.commit()?;

        debug!(id = %category.id, parent = ?category.parent_id, "created category");
        Ok(category)
    }

    pub fn update_category(
        &self,
        id: CategoryId,
        name: &str,
        description: Option<&str>,
    ) -> CatalogResult<Category> {
        validate_name(name)?;
        let tx = self.write()?;
        let category = nodes::update(&tx, id, name, description)?;
        tx.commit()?;

        debug!(id = %id, "updated category");
        Ok(category)
    }

    pub fn get_category(&self, id: CategoryId) -> CatalogResult<Category> {
        nodes::get(&self.conn, id)
    }

    pub fn get_categories(&self) -> CatalogResult<Vec<Category>> {
        nodes::list_all(&self.conn)
    }

    pub fn get_root_categories(&self) -> CatalogResult<Vec<Category>> {
        nodes::list_roots(&self.conn)
    }

    /// Direct children only. An unknown id gives an empty page.
    pub fn get_children(
        &self,
        id: CategoryId,
        request: PageRequest,
    ) -> CatalogResult<Page<Category>> {
        nodes::list_children(&self.conn, id, request)
    }

    /// The whole subtree below `id`, flattened and ordered by name. `id` itself
    /// is not part of the result.
    pub fn get_descendants(&self, id: CategoryId) -> CatalogResult<Vec<Category>> {
        let tx = self.read()?;
        nodes::get(&tx, id)?;
        let ids: Vec<CategoryId> = SqlClosure::new(&tx)
            .descendants_of(id)?
            .into_iter()
            .filter(|descendant| *descendant != id)
            .collect();
        let mut descendants = nodes::get_many(&tx, &ids)?;
        tx.commit()?;

        descendants.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(descendants)
    }

    /// Path from the root down to the parent of `id`.
    pub fn get_ancestors(&self, id: CategoryId) -> CatalogResult<Vec<Category>> {
        let tx = self.read()?;
        nodes::get(&tx, id)?;
        let ids: Vec<CategoryId> = SqlClosure::new(&tx)
            .ancestors_of(id)?
            .into_iter()
            .filter(|ancestor| *ancestor != id)
            .collect();
        let mut by_id: HashMap<CategoryId, Category> = nodes::get_many(&tx, &ids)?
            .into_iter()
            .map(|category| (category.id, category))
            .collect();
        tx.commit()?;

        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    /// Deletes `id` according to the configured [`DeletePolicy`] and returns
    /// the ids actually removed. Deleting an absent id removes nothing and
    /// succeeds.
    pub fn delete_category(&self, id: CategoryId) -> CatalogResult<Vec<CategoryId>> {
        let tx = self.write()?;
        if !nodes::exists(&tx, id)? {
            debug!(id = %id, "delete of absent category ignored");
            return Ok(Vec::new());
        }

        let mut closure = SqlClosure::new(&tx);
        let subtree = closure.descendants_of(id)?;
        if self.delete_policy == DeletePolicy::Restrict
            && (subtree.iter().any(|descendant| *descendant != id)
                || nodes::has_children(&tx, id)?)
        {
            return Err(CatalogError::HasChildren(id));
        }

        let mut removed = closure.remove_subtree(id)?;
        if !removed.contains(&id) {
            removed.push(id);
        }
        nodes::delete_many(&tx, &removed)?;
        tx.commit()?;

        info!(
            id = %id,
            removed = removed.len(),
            policy = self.delete_policy.as_str(),
            "deleted category"
        );
        Ok(removed)
    }
}

fn validate_name(name: &str) -> CatalogResult<()> {
    if name.trim().is_empty() {
        return Err(CatalogError::validation("category name must not be blank"));
    }
    Ok(())
}
