use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};

use tracing::info;

use super::{require_categories, Action, Library};
use crate::db;
use crate::error::{LibraryError, LibraryResult};
use crate::models::{BookFilter, Category};

/// One category that changed name, with the number of books rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Renamed {
    pub from: String,
    pub to: String,
    pub books: usize,
}

/// Totals removed by a category delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deleted {
    pub categories: usize,
    pub books: usize,
}

/// Display order: pinned first, then case-insensitive by name with the exact
/// name as tie-break, so the result does not depend on input order.
pub fn sort_categories(mut categories: Vec<Category>) -> Vec<Category> {
    categories.sort_by(compare_categories);
    categories
}

fn compare_categories(a: &Category, b: &Category) -> Ordering {
    b.is_pinned
        .cmp(&a.is_pinned)
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        .then_with(|| a.name.cmp(&b.name))
}

/// Return `name` if it is free, otherwise the first free `name (n)`.
pub fn disambiguate_name(name: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(name) {
        return name.to_string();
    }
    let mut counter = 1usize;
    loop {
        let candidate = format!("{name} ({counter})");
        if !taken.contains(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

fn trimmed_name(name: &str) -> LibraryResult<&str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        Err(LibraryError::EmptyName)
    } else {
        Ok(trimmed)
    }
}

fn existing_names(conn: &rusqlite::Connection) -> LibraryResult<HashSet<String>> {
    Ok(db::fetch_categories(conn)?
        .into_iter()
        .map(|category| category.name)
        .collect())
}

impl Library {
    /// Every category in display order.
    pub fn categories(&self) -> LibraryResult<Vec<Category>> {
        self.read(|conn| Ok(sort_categories(db::fetch_categories(conn)?)))
    }

    pub fn book_count(&self, category: &str) -> LibraryResult<i64> {
        self.read(|conn| Ok(db::count_books_in_category(conn, category)?))
    }

    /// Seed a pinned category named `name` when the library has none. Returns
    /// the new category, or `None` when categories already existed.
    pub fn ensure_default_category(&self, name: &str) -> LibraryResult<Option<Category>> {
        let name = trimmed_name(name)?;
        self.run(Action::SeedDefaults, |store| {
            store.with_transaction(|tx| {
                if db::count_categories(tx)? > 0 {
                    return Ok(None);
                }
                let category = db::insert_category(tx, name, true)?;
                info!(name = %category.name, "seeded default category");
                Ok(Some(category))
            })
        })
    }

    /// Create an unpinned category. A name that is already taken gets a
    /// ` (n)` suffix instead of failing.
    pub fn create_category(&self, name: &str) -> LibraryResult<Category> {
        let name = trimmed_name(name)?;
        self.run(Action::CreateCategory, |store| {
            store.with_transaction(|tx| {
                let taken = existing_names(tx)?;
                let resolved = disambiguate_name(name, &taken);
                let category = db::insert_category(tx, &resolved, false)?;
                info!(name = %category.name, "created category");
                Ok(category)
            })
        })
    }

    /// Rename every target to `new_name`. Targets are processed in name order
    /// and each receives the first free variant of the new name, checked
    /// against untouched categories and names already handed out in this
    /// batch. Books follow their category in the same transaction.
    pub fn rename_categories(
        &self,
        targets: &BTreeSet<String>,
        new_name: &str,
    ) -> LibraryResult<Vec<Renamed>> {
        let new_name = trimmed_name(new_name)?;
        if targets.is_empty() {
            return Err(LibraryError::NothingSelected);
        }

        self.run(Action::RenameCategories, |store| {
            store.with_transaction(|tx| {
                require_categories(tx, targets)?;

                let mut taken: HashSet<String> = existing_names(tx)?
                    .into_iter()
                    .filter(|name| !targets.contains(name))
                    .collect();

                let mut plan = Vec::new();
                for old in targets {
                    let resolved = disambiguate_name(new_name, &taken);
                    taken.insert(resolved.clone());
                    if &resolved != old {
                        plan.push((old.clone(), resolved));
                    }
                }

                // Park every renamed row under a placeholder first so that
                // swapping names inside one batch never trips the primary key.
                let parked: Vec<String> = (0..plan.len())
                    .map(|idx| format!("\u{0}rename-{idx}"))
                    .collect();
                for ((old, _), placeholder) in plan.iter().zip(&parked) {
                    db::rename_category(tx, old, placeholder)?;
                    db::rename_books_category(tx, old, placeholder)?;
                }

                let mut renamed = Vec::with_capacity(plan.len());
                for ((old, new), placeholder) in plan.into_iter().zip(&parked) {
                    db::rename_category(tx, placeholder, &new)?;
                    let books = db::rename_books_category(tx, placeholder, &new)?;
                    info!(from = %old, to = %new, books, "renamed category");
                    renamed.push(Renamed {
                        from: old,
                        to: new,
                        books,
                    });
                }
                Ok(renamed)
            })
        })
    }

    /// Delete the targets and every book they own. Refuses to remove the
    /// whole set so at least one category always survives.
    pub fn delete_categories(&self, targets: &BTreeSet<String>) -> LibraryResult<Deleted> {
        if targets.is_empty() {
            return Err(LibraryError::NothingSelected);
        }

        self.run(Action::DeleteCategories, |store| {
            store.with_transaction(|tx| {
                require_categories(tx, targets)?;
                let existing = existing_names(tx)?;
                if existing.iter().all(|name| targets.contains(name)) {
                    return Err(LibraryError::CannotDeleteAll);
                }

                let mut books = 0;
                for name in targets {
                    books += db::delete_books_in_category(tx, name)?;
                    db::delete_category(tx, name)?;
                    info!(name = %name, "deleted category");
                }
                db::compact_positions(tx)?;

                Ok(Deleted {
                    categories: targets.len(),
                    books,
                })
            })
        })
    }

    /// Flip the pinned flag and return the updated category.
    pub fn toggle_pin(&self, name: &str) -> LibraryResult<Category> {
        self.run(Action::TogglePin(name.to_string()), |store| {
            store.with_transaction(|tx| {
                let mut category = db::fetch_category(tx, name)?
                    .ok_or_else(|| LibraryError::CategoryNotFound(name.to_string()))?;
                category.is_pinned = !category.is_pinned;
                db::set_category_pinned(tx, name, category.is_pinned)?;
                info!(name = %name, pinned = category.is_pinned, "toggled pin");
                Ok(category)
            })
        })
    }

    /// Fold the sources into `target`: their books move over (works the
    /// target already holds are dropped) and the sources are deleted.
    /// Returns the number of books that moved.
    pub fn merge_categories(
        &self,
        sources: &BTreeSet<String>,
        target: &str,
    ) -> LibraryResult<usize> {
        if sources.is_empty() {
            return Err(LibraryError::NothingSelected);
        }
        if sources.contains(target) {
            return Err(LibraryError::MergeIntoSource(target.to_string()));
        }

        self.run(Action::MergeCategories, |store| {
            store.with_transaction(|tx| {
                let target_name = target.to_string();
                require_categories(tx, sources.iter().chain(std::iter::once(&target_name)))?;

                let mut moved = 0;
                for source in sources {
                    let books = db::fetch_books(tx, Some(source), BookFilter::default())?;
                    let mut duplicates = Vec::new();
                    let mut movers = Vec::new();
                    for book in books {
                        if db::category_holds(tx, target, &book.key())? {
                            duplicates.push(book.id);
                        } else {
                            movers.push(book.id);
                        }
                    }
                    db::delete_books(tx, &duplicates)?;
                    moved += db::set_books_category(tx, &movers, target)?;
                    db::delete_category(tx, source)?;
                    info!(from = %source, into = %target, "merged category");
                }
                db::compact_positions(tx)?;
                Ok(moved)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::test_support::{add_book, library_with, names};

    fn category_names(library: &Library) -> Vec<String> {
        library
            .categories()
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect()
    }

    #[test]
    fn duplicate_names_get_counter_suffix() {
        let library = library_with(&["Fiction", "Non-Fiction"]);
        let created = library.create_category("  Fiction ").unwrap();
        assert_eq!(created.name, "Fiction (1)");
        let again = library.create_category("Fiction").unwrap();
        assert_eq!(again.name, "Fiction (2)");
        assert!(!again.is_pinned);
        assert_eq!(
            category_names(&library),
            vec!["Fiction", "Fiction (1)", "Fiction (2)", "Non-Fiction"]
        );
    }

    #[test]
    fn blank_names_are_rejected_before_writing() {
        let library = library_with(&[]);
        assert!(matches!(
            library.create_category("   "),
            Err(LibraryError::EmptyName)
        ));
        assert!(category_names(&library).is_empty());
    }

    #[test]
    fn default_category_is_seeded_once_and_pinned() {
        let library = library_with(&[]);
        let seeded = library.ensure_default_category("Books").unwrap().unwrap();
        assert!(seeded.is_pinned);
        assert!(library.ensure_default_category("Books").unwrap().is_none());
        assert_eq!(category_names(&library), vec!["Books"]);
    }

    #[test]
    fn sort_puts_pinned_first_and_is_idempotent() {
        let input = vec![
            Category { name: "zeta".into(), is_pinned: false, position: 0 },
            Category { name: "Alpha".into(), is_pinned: false, position: 1 },
            Category { name: "Pinned b".into(), is_pinned: true, position: 2 },
            Category { name: "beta".into(), is_pinned: false, position: 3 },
            Category { name: "Pinned A".into(), is_pinned: true, position: 4 },
        ];
        let sorted = sort_categories(input.clone());
        let order: Vec<&str> = sorted.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(order, vec!["Pinned A", "Pinned b", "Alpha", "beta", "zeta"]);
        assert_eq!(sort_categories(sorted.clone()), sorted);

        let mut reversed = input;
        reversed.reverse();
        assert_eq!(sort_categories(reversed), sorted);
    }

    #[test]
    fn rename_rewrites_owned_books() {
        let library = library_with(&["A", "Other"]);
        add_book(&library, "A", "One", None);
        add_book(&library, "A", "Two", None);
        add_book(&library, "Other", "Three", None);

        let renamed = library.rename_categories(&names(&["A"]), " B ").unwrap();
        assert_eq!(
            renamed,
            vec![Renamed { from: "A".into(), to: "B".into(), books: 2 }]
        );
        assert!(library.books_in_category("A", BookFilter::default()).unwrap().is_empty());
        let moved = library.books_in_category("B", BookFilter::default()).unwrap();
        assert_eq!(moved.len(), 2);
        assert!(moved.iter().all(|b| b.category.as_deref() == Some("B")));
        assert_eq!(library.book_count("Other").unwrap(), 1);
    }

    #[test]
    fn batch_rename_disambiguates_each_target() {
        let library = library_with(&["A", "B", "C", "Keep"]);
        let renamed = library
            .rename_categories(&names(&["A", "B", "C"]), "Keep")
            .unwrap();
        let targets: Vec<&str> = renamed.iter().map(|r| r.to.as_str()).collect();
        assert_eq!(targets, vec!["Keep (1)", "Keep (2)", "Keep (3)"]);
        assert_eq!(
            category_names(&library),
            vec!["Keep", "Keep (1)", "Keep (2)", "Keep (3)"]
        );
    }

    #[test]
    fn batch_rename_can_reuse_a_targets_own_name() {
        let library = library_with(&["A", "B"]);
        add_book(&library, "B", "Owned by B", None);
        let renamed = library.rename_categories(&names(&["A", "B"]), "B").unwrap();
        assert_eq!(
            renamed,
            vec![
                Renamed { from: "A".into(), to: "B".into(), books: 0 },
                Renamed { from: "B".into(), to: "B (1)".into(), books: 1 },
            ]
        );
        assert_eq!(library.book_count("B (1)").unwrap(), 1);
        assert_eq!(library.book_count("B").unwrap(), 0);
    }

    #[test]
    fn renaming_to_same_name_is_a_no_op() {
        let library = library_with(&["Fiction"]);
        assert!(library
            .rename_categories(&names(&["Fiction"]), "Fiction")
            .unwrap()
            .is_empty());
        assert_eq!(category_names(&library), vec!["Fiction"]);
    }

    #[test]
    fn rename_of_unknown_category_changes_nothing() {
        let library = library_with(&["A"]);
        add_book(&library, "A", "One", None);
        let err = library
            .rename_categories(&names(&["A", "Ghost"]), "B")
            .unwrap_err();
        assert!(matches!(err, LibraryError::CategoryNotFound(name) if name == "Ghost"));
        assert_eq!(category_names(&library), vec!["A"]);
        assert_eq!(library.book_count("A").unwrap(), 1);
    }

    #[test]
    fn rename_failure_rolls_back_both_collections() {
        let library = library_with(&["A", "Other"]);
        add_book(&library, "A", "One", None);
        library
            .store()
            .with_conn(|conn| {
                conn.execute_batch(
                    "CREATE TRIGGER fail_book_rename BEFORE UPDATE OF category ON userBooks
                     BEGIN SELECT RAISE(ABORT, 'book update refused'); END;",
                )
                .map_err(anyhow::Error::from)
            })
            .unwrap();

        let err = library.rename_categories(&names(&["A"]), "B").unwrap_err();
        assert!(matches!(err, LibraryError::Store(_)));
        assert_eq!(category_names(&library), vec!["A", "Other"]);
        assert_eq!(library.book_count("A").unwrap(), 1);
    }

    #[test]
    fn deleting_category_cascades_to_books() {
        let library = library_with(&["Fiction", "Non-Fiction"]);
        add_book(&library, "Fiction", "One", None);
        add_book(&library, "Fiction", "Two", None);
        add_book(&library, "Non-Fiction", "Three", None);

        let deleted = library.delete_categories(&names(&["Fiction"])).unwrap();
        assert_eq!(deleted, Deleted { categories: 1, books: 2 });
        assert_eq!(category_names(&library), vec!["Non-Fiction"]);
        assert_eq!(library.book_count("Fiction").unwrap(), 0);
        assert_eq!(library.book_count("Non-Fiction").unwrap(), 1);
        assert_eq!(library.categories().unwrap()[0].position, 0);
    }

    #[test]
    fn deleting_every_category_is_refused() {
        let library = library_with(&[]);
        library.ensure_default_category("Books").unwrap();
        add_book(&library, "Books", "Kept", None);

        assert!(matches!(
            library.delete_categories(&names(&["Books"])),
            Err(LibraryError::CannotDeleteAll)
        ));
        assert_eq!(category_names(&library), vec!["Books"]);
        assert_eq!(library.book_count("Books").unwrap(), 1);

        let library = library_with(&["A", "B"]);
        assert!(matches!(
            library.delete_categories(&names(&["A", "B"])),
            Err(LibraryError::CannotDeleteAll)
        ));
        assert_eq!(category_names(&library).len(), 2);
    }

    #[test]
    fn toggling_pin_reorders_listing() {
        let library = library_with(&["Alpha", "Zulu"]);
        let pinned = library.toggle_pin("Zulu").unwrap();
        assert!(pinned.is_pinned);
        assert_eq!(category_names(&library), vec!["Zulu", "Alpha"]);
        assert!(!library.toggle_pin("Zulu").unwrap().is_pinned);
        assert_eq!(category_names(&library), vec!["Alpha", "Zulu"]);
        assert!(matches!(
            library.toggle_pin("Ghost"),
            Err(LibraryError::CategoryNotFound(_))
        ));
    }

    #[test]
    fn merge_moves_books_and_drops_sources() {
        let library = library_with(&["Target", "S1", "S2"]);
        add_book(&library, "Target", "Dune", Some("111"));
        add_book(&library, "S1", "Dune again", Some("111"));
        add_book(&library, "S1", "Emma", Some("222"));
        add_book(&library, "S2", "Custom", None);

        let moved = library
            .merge_categories(&names(&["S1", "S2"]), "Target")
            .unwrap();
        assert_eq!(moved, 2);
        assert_eq!(category_names(&library), vec!["Target"]);
        assert_eq!(library.book_count("Target").unwrap(), 3);

        assert!(matches!(
            library.merge_categories(&names(&["Target"]), "Target"),
            Err(LibraryError::MergeIntoSource(_))
        ));
    }

    #[test]
    fn busy_rename_is_rejected() {
        let library = library_with(&["A", "B"]);
        let _held = library.in_flight().begin(Action::RenameCategories).unwrap();
        assert!(matches!(
            library.rename_categories(&names(&["A"]), "C"),
            Err(LibraryError::Busy(_))
        ));
        assert!(library.create_category("C").is_ok());
    }
}
