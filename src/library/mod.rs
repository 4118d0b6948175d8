//! The book and category rules layered over the persistence module.
//!
//! Every multi-row change runs inside one store transaction so a failure
//! leaves categories and books exactly as they were, and every mutating call
//! claims an in-flight token first so the same request cannot be applied
//! twice at once.

mod books;
mod categories;
mod guard;
mod recommendations;

use std::collections::BTreeSet;

use anyhow::Result;
use tracing::{debug, error};

pub use categories::{disambiguate_name, sort_categories, Deleted, Renamed};
pub use guard::{Action, InFlight, InFlightGuard};

use crate::db::{self, Store};
use crate::error::{LibraryError, LibraryResult};

/// Entry point for everything the screens can ask of the collection.
pub struct Library {
    store: Store,
    in_flight: InFlight,
}

impl Library {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            in_flight: InFlight::default(),
        }
    }

    /// Shortcut used by tests and tooling: a library over a private
    /// in-memory database.
    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Store::open_in_memory()?))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    /// Tear down the underlying store.
    pub fn close(self) -> Result<()> {
        self.store.close()
    }

    /// Claim `action`, run `f`, and log the outcome. Store failures are
    /// logged as errors; validation refusals only at debug level.
    fn run<T>(
        &self,
        action: Action,
        f: impl FnOnce(&Store) -> LibraryResult<T>,
    ) -> LibraryResult<T> {
        let _guard = self.in_flight.begin(action.clone())?;
        let result = f(&self.store);
        if let Err(err) = &result {
            match err {
                LibraryError::Store(source) => {
                    error!(action = %action, error = %format!("{source:#}"), "store operation failed")
                }
                other => debug!(action = %action, reason = %other, "request rejected"),
            }
        }
        result
    }

    /// Read-only helper with the same error logging as `run`.
    fn read<T>(&self, f: impl FnOnce(&rusqlite::Connection) -> LibraryResult<T>) -> LibraryResult<T> {
        let result = self.store.with_conn(f);
        if let Err(LibraryError::Store(source)) = &result {
            error!(error = %format!("{source:#}"), "store read failed");
        }
        result
    }
}

/// Fail with `CategoryNotFound` for the first name that has no row.
fn require_categories<'a>(
    conn: &rusqlite::Connection,
    names: impl IntoIterator<Item = &'a String>,
) -> LibraryResult<()> {
    for name in names {
        if db::fetch_category(conn, name)?.is_none() {
            return Err(LibraryError::CategoryNotFound(name.clone()));
        }
    }
    Ok(())
}

fn validate_rating(rating: Option<u8>) -> LibraryResult<()> {
    match rating {
        Some(value) if !(1..=5).contains(&value) => Err(LibraryError::InvalidRating(value)),
        _ => Ok(()),
    }
}

fn require_targets(targets: &BTreeSet<String>) -> LibraryResult<()> {
    if targets.is_empty() {
        Err(LibraryError::NoTargetCategory)
    } else {
        Ok(())
    }
}

fn new_book_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::BTreeSet;

    use super::Library;
    use crate::models::{Book, NewBook};

    pub(crate) fn library_with(categories: &[&str]) -> Library {
        let library = Library::in_memory().unwrap();
        for name in categories {
            library.create_category(name).unwrap();
        }
        library
    }

    pub(crate) fn names(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    pub(crate) fn add_book(library: &Library, category: &str, title: &str, isbn: Option<&str>) -> Book {
        library
            .add_custom_book(
                category,
                NewBook {
                    title: title.to_string(),
                    author: "Author".to_string(),
                    isbn: isbn.map(str::to_string),
                    ..NewBook::default()
                },
            )
            .unwrap()
    }
}
