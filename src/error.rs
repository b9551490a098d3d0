use thiserror::Error;

use crate::model::CategoryId;

pub type CatalogResult<T> = Result<T, CatalogError>;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("category `{0}` not found")]
    NotFound(CategoryId),

    /// Raised by create when the declared parent is missing.
    #[error("parent category `{0}` not found")]
    ParentNotFound(CategoryId),

    #[error("{0}")]
    Validation(String),

    #[error("category `{0}` has children; delete them first or use the cascade policy")]
    HasChildren(CategoryId),

    #[error("unsupported schema version {0}")]
    UnsupportedSchema(i64),

    #[error(transparent)]
    Storage(#[from] rusqlite::Error),
}

impl CatalogError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::ParentNotFound(_) => "parent_not_found",
            Self::Validation(_) => "validation_error",
            Self::HasChildren(_) => "has_children",
            Self::UnsupportedSchema(_) => "unsupported_schema",
            Self::Storage(_) => "sqlite_error",
        }
    }

    /// True for the not-found family, including a missing parent.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::ParentNotFound(_))
    }
}
