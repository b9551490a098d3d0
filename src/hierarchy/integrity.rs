use std::collections::BTreeSet;

use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};

use crate::closure::{ClosureIndex, LinkAnomaly, MemoryClosure, SqlClosure};
use crate::error::CatalogResult;
use crate::hierarchy::Catalog;
use crate::model::ClosureEdge;
use crate::store::nodes;

/// Difference between the stored closure and the one implied by the parent
/// pointers in the Node Store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub categories: usize,
    pub edges: usize,
    pub missing_edges: Vec<ClosureEdge>,
    pub stray_edges: Vec<ClosureEdge>,
    pub anomalies: Vec<LinkAnomaly>,
}

impl IntegrityReport {
    pub fn is_consistent(&self) -> bool {
        self.missing_edges.is_empty() && self.stray_edges.is_empty() && self.anomalies.is_empty()
    }
}

fn inspect(conn: &Connection) -> CatalogResult<(IntegrityReport, MemoryClosure)> {
    let links = nodes::parent_links(conn)?;
    let categories = links.len();
    let (expected, anomalies) = MemoryClosure::derive(links);

    let stored = SqlClosure::new(conn).edges()?;
    let stored_set: BTreeSet<ClosureEdge> = stored.iter().copied().collect();

    let mut missing_edges: Vec<ClosureEdge> = expected
        .edges()?
        .into_iter()
        .filter(|edge| !stored_set.contains(edge))
        .collect();
    missing_edges.sort();
    let mut stray_edges: Vec<ClosureEdge> = stored
        .iter()
        .filter(|edge| !expected.contains(edge))
        .copied()
        .collect();
    stray_edges.sort();

    let report = IntegrityReport {
        categories,
        edges: stored.len(),
        missing_edges,
        stray_edges,
        anomalies,
    };
    Ok((report, expected))
}

impl Catalog {
    /// Recomputes the closure from parent pointers and diffs it against the
    /// stored edges. Read-only.
    pub fn verify_integrity(&self) -> CatalogResult<IntegrityReport> {
        let tx = self.read()?;
        let (report, _) = inspect(&tx)?;
        tx.commit()?;

        if !report.is_consistent() {
            warn!(
                missing = report.missing_edges.len(),
                stray = report.stray_edges.len(),
                anomalies = report.anomalies.len(),
                "closure index drifted from parent pointers"
            );
        }
        Ok(report)
    }

    /// Replaces every stored edge with the closure implied by the parent
    /// pointers. Returns the report taken before the rewrite.
    pub fn rebuild_closure(&self) -> CatalogResult<IntegrityReport> {
        let tx = self.write()?;
        let (report, expected) = inspect(&tx)?;
        SqlClosure::new(&tx).replace_all(&expected.edges()?)?;
        tx.commit()?;

        info!(
            categories = report.categories,
            repaired_missing = report.missing_edges.len(),
            dropped_stray = report.stray_edges.len(),
            "rebuilt closure index"
        );
        Ok(report)
    }
}
