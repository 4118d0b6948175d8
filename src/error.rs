use thiserror::Error;

/// Everything the library service can refuse or fail with. Validation
/// variants are raised before the store is touched; `Store` wraps a failed
/// statement together with its context chain.
#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("Category name cannot be empty.")]
    EmptyName,
    #[error("Book title cannot be empty.")]
    EmptyTitle,
    #[error("Cannot delete all categories.")]
    CannotDeleteAll,
    #[error("Select at least one target category.")]
    NoTargetCategory,
    #[error("Nothing is selected.")]
    NothingSelected,
    #[error("Category \"{0}\" does not exist.")]
    CategoryNotFound(String),
    #[error("Book {0} does not exist.")]
    BookNotFound(String),
    #[error("Rating must be between 1 and 5, got {0}.")]
    InvalidRating(u8),
    #[error("Cannot merge \"{0}\" into itself.")]
    MergeIntoSource(String),
    #[error("\"{category}\" already holds ISBN {isbn}.")]
    DuplicateBook { isbn: String, category: String },
    #[error("\"{0}\" already holds this book.")]
    WorkAlreadyHeld(String),
    #[error("{0} is already in progress.")]
    Busy(String),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for LibraryError {
    fn from(err: rusqlite::Error) -> Self {
        LibraryError::Store(err.into())
    }
}

pub type LibraryResult<T> = std::result::Result<T, LibraryError>;
