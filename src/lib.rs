pub mod closure;
pub mod config;
pub mod error;
pub mod hierarchy;
pub mod model;
pub mod store;

pub use error::{CatalogError, CatalogResult};
pub use hierarchy::{Catalog, DeletePolicy, IntegrityReport};
pub use model::{Category, CategoryId, ClosureEdge, Page, PageRequest};
