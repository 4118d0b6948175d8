use std::collections::BTreeSet;

use rusqlite::Connection;
use tracing::{debug, info};

use super::{new_book_id, require_categories, require_targets, validate_rating, Action, Library};
use crate::db;
use crate::error::{LibraryError, LibraryResult};
use crate::models::{normalize_isbn, Book, BookFilter, BookKey, NewBook};
use crate::scan::ScanCandidate;

fn load_book(conn: &Connection, id: &str) -> LibraryResult<Book> {
    db::fetch_book(conn, id)?.ok_or_else(|| LibraryError::BookNotFound(id.to_string()))
}

fn load_books(conn: &Connection, ids: &[String]) -> LibraryResult<Vec<Book>> {
    ids.iter().map(|id| load_book(conn, id)).collect()
}

fn require_title(title: &str) -> LibraryResult<()> {
    if title.trim().is_empty() {
        Err(LibraryError::EmptyTitle)
    } else {
        Ok(())
    }
}

/// Refuse to put a second copy of a work into `category`. `except` is the
/// row being edited, which may of course keep its own key.
fn reject_duplicate(
    conn: &Connection,
    category: &str,
    key: &BookKey,
    except: Option<&str>,
) -> LibraryResult<()> {
    let clash = db::fetch_books_by_key(conn, key)?
        .into_iter()
        .any(|book| book.category.as_deref() == Some(category) && Some(book.id.as_str()) != except);
    if !clash {
        return Ok(());
    }
    Err(match key {
        BookKey::Isbn(isbn) => LibraryError::DuplicateBook {
            isbn: isbn.clone(),
            category: category.to_string(),
        },
        BookKey::Generated(_) => LibraryError::WorkAlreadyHeld(category.to_string()),
    })
}

/// Insert a copy of `book` into `category` unless that category already
/// holds the same work. Returns whether a row was written.
fn copy_into(conn: &Connection, book: &NewBook, key: &BookKey, category: &str) -> LibraryResult<bool> {
    if db::category_holds(conn, category, key)? {
        debug!(key = %key, category, "category already holds book, skipping copy");
        return Ok(false);
    }
    db::insert_book(conn, &new_book_id(), book, Some(category))?;
    Ok(true)
}

impl Library {
    pub fn book(&self, id: &str) -> LibraryResult<Book> {
        self.read(|conn| load_book(conn, id))
    }

    /// Books owned by `category`, narrowed by `filter`, ordered by title.
    pub fn books_in_category(&self, category: &str, filter: BookFilter) -> LibraryResult<Vec<Book>> {
        self.read(|conn| Ok(db::fetch_books(conn, Some(category), filter)?))
    }

    /// Every favorite across all categories.
    pub fn favorite_books(&self) -> LibraryResult<Vec<Book>> {
        self.read(|conn| Ok(db::fetch_books(conn, None, BookFilter::favorites())?))
    }

    /// Names of the categories holding the work identified by `key`.
    pub fn categories_holding(&self, key: &BookKey) -> LibraryResult<Vec<String>> {
        self.read(|conn| Ok(db::category_names_for_key(conn, key)?))
    }

    /// Add a hand-entered book to `category`. It always starts a new work.
    pub fn add_custom_book(&self, category: &str, book: NewBook) -> LibraryResult<Book> {
        require_title(&book.title)?;
        validate_rating(book.rating)?;
        let book = NewBook {
            title: book.title.trim().to_string(),
            author: book.author.trim().to_string(),
            isbn: normalize_isbn(book.isbn.as_deref()),
            is_custom_book: true,
            work_id: None,
            ..book
        };

        self.run(Action::AddBook, |store| {
            store.with_transaction(|tx| {
                require_categories(tx, [&category.to_string()])?;
                let id = new_book_id();
                reject_duplicate(tx, category, &book.key_with_id(&id), None)?;
                let created = db::insert_book(tx, &id, &book, Some(category))?;
                info!(id = %created.id, category, "added custom book");
                Ok(created)
            })
        })
    }

    /// Add a book picked from the cover scan results. A recommendation for
    /// the same ISBN is dropped since the work is now owned.
    pub fn add_scanned_book(&self, category: &str, candidate: &ScanCandidate) -> LibraryResult<Book> {
        let book = candidate.to_new_book();
        require_title(&book.title)?;

        self.run(Action::AddBook, |store| {
            store.with_transaction(|tx| {
                require_categories(tx, [&category.to_string()])?;
                let id = new_book_id();
                reject_duplicate(tx, category, &book.key_with_id(&id), None)?;
                let created = db::insert_book(tx, &id, &book, Some(category))?;
                if let Some(isbn) = &created.isbn {
                    db::delete_recommendations_by_isbn(tx, std::slice::from_ref(isbn))?;
                }
                info!(id = %created.id, category, isbn = ?created.isbn, "added scanned book");
                Ok(created)
            })
        })
    }

    /// Save every editable field of `book`.
    pub fn update_book(&self, book: &Book) -> LibraryResult<Book> {
        require_title(&book.title)?;
        validate_rating(book.rating)?;

        self.run(Action::EditBook(book.id.clone()), |store| {
            store.with_transaction(|tx| {
                let stored = load_book(tx, &book.id)?;
                let mut cleaned = book.clone();
                cleaned.title = cleaned.title.trim().to_string();
                cleaned.author = cleaned.author.trim().to_string();
                cleaned.isbn = normalize_isbn(book.isbn.as_deref());
                cleaned.work_id = stored.work_id;
                if let Some(category) = &cleaned.category {
                    require_categories(tx, [category])?;
                    reject_duplicate(tx, category, &cleaned.key(), Some(&book.id))?;
                }
                db::update_book(tx, &cleaned)?;
                info!(id = %book.id, "updated book");
                load_book(tx, &book.id)
            })
        })
    }

    /// Copy the given books into every target category. Works a target
    /// already holds are skipped. Returns the number of copies written.
    pub fn add_books_to_categories(
        &self,
        book_ids: &[String],
        targets: &BTreeSet<String>,
    ) -> LibraryResult<usize> {
        require_targets(targets)?;
        if book_ids.is_empty() {
            return Err(LibraryError::NothingSelected);
        }

        self.run(Action::AddBooks, |store| {
            store.with_transaction(|tx| {
                require_categories(tx, targets)?;
                let books = load_books(tx, book_ids)?;

                let mut added = 0;
                for target in targets {
                    for book in &books {
                        if copy_into(tx, &book.to_new_book(), &book.key(), target)? {
                            added += 1;
                        }
                    }
                }
                info!(books = books.len(), targets = targets.len(), added, "added books to categories");
                Ok(added)
            })
        })
    }

    /// Relocate the given books. With one target each book is re-pointed in
    /// place (or dropped when the target already holds the work). With
    /// several targets the books are copied into all of them and the
    /// originals removed, unless an original already sits in one of the
    /// targets. Returns the number of books that changed place.
    pub fn move_books_to_categories(
        &self,
        book_ids: &[String],
        targets: &BTreeSet<String>,
    ) -> LibraryResult<usize> {
        require_targets(targets)?;
        if book_ids.is_empty() {
            return Err(LibraryError::NothingSelected);
        }

        self.run(Action::MoveBooks, |store| {
            store.with_transaction(|tx| {
                require_categories(tx, targets)?;
                let books = load_books(tx, book_ids)?;

                let moved = match targets.iter().next() {
                    Some(target) if targets.len() == 1 => move_in_place(tx, &books, target)?,
                    _ => duplicate_across(tx, &books, targets)?,
                };
                info!(books = books.len(), targets = targets.len(), moved, "moved books");
                Ok(moved)
            })
        })
    }

    /// Delete books by id. Ids with no row are ignored.
    pub fn delete_books(&self, book_ids: &[String]) -> LibraryResult<usize> {
        if book_ids.is_empty() {
            return Err(LibraryError::NothingSelected);
        }
        self.run(Action::DeleteBooks, |store| {
            store.with_transaction(|tx| {
                let deleted = db::delete_books(tx, book_ids)?;
                info!(requested = book_ids.len(), deleted, "deleted books");
                Ok(deleted)
            })
        })
    }

    /// Flip the favorite flag and return the stored result.
    pub fn toggle_favorite(&self, id: &str) -> LibraryResult<Book> {
        self.run(Action::ToggleFavorite(id.to_string()), |store| {
            store.with_transaction(|tx| {
                load_book(tx, id)?;
                db::toggle_favorite(tx, id)?;
                let book = load_book(tx, id)?;
                info!(id, favorite = book.is_favorite, "toggled favorite");
                Ok(book)
            })
        })
    }

    /// Set or clear the star rating.
    pub fn set_rating(&self, id: &str, rating: Option<u8>) -> LibraryResult<Book> {
        validate_rating(rating)?;
        self.run(Action::EditBook(id.to_string()), |store| {
            store.with_transaction(|tx| {
                load_book(tx, id)?;
                db::set_rating(tx, id, rating)?;
                info!(id, rating = ?rating, "rated book");
                load_book(tx, id)
            })
        })
    }

    pub fn set_notes(&self, id: &str, notes: &str) -> LibraryResult<Book> {
        self.run(Action::EditBook(id.to_string()), |store| {
            store.with_transaction(|tx| {
                load_book(tx, id)?;
                db::set_notes(tx, id, notes)?;
                info!(id, "updated notes");
                load_book(tx, id)
            })
        })
    }
}

fn move_in_place(conn: &Connection, books: &[Book], target: &str) -> LibraryResult<usize> {
    let mut relocate = Vec::new();
    let mut redundant = Vec::new();
    for book in books {
        if book.category.as_deref() == Some(target) {
            continue;
        }
        if db::category_holds(conn, target, &book.key())? {
            redundant.push(book.id.clone());
        } else {
            relocate.push(book.id.clone());
        }
    }
    db::delete_books(conn, &redundant)?;
    let moved = db::set_books_category(conn, &relocate, target)?;
    Ok(moved + redundant.len())
}

fn duplicate_across(conn: &Connection, books: &[Book], targets: &BTreeSet<String>) -> LibraryResult<usize> {
    for target in targets {
        for book in books {
            copy_into(conn, &book.to_new_book(), &book.key(), target)?;
        }
    }

    let originals: Vec<String> = books
        .iter()
        .filter(|book| {
            book.category
                .as_ref()
                .map_or(true, |category| !targets.contains(category))
        })
        .map(|book| book.id.clone())
        .collect();
    db::delete_books(conn, &originals)?;
    Ok(originals.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::test_support::{add_book, library_with, names};

    fn titles(books: &[Book]) -> Vec<&str> {
        books.iter().map(|b| b.title.as_str()).collect()
    }

    #[test]
    fn favorite_toggle_round_trip() {
        let library = library_with(&["Books"]);
        let book = add_book(&library, "Books", "Dune", None);
        assert!(!book.is_favorite);

        let toggled = library.toggle_favorite(&book.id).unwrap();
        assert!(toggled.is_favorite);
        assert_eq!(titles(&library.favorite_books().unwrap()), vec!["Dune"]);

        let restored = library.toggle_favorite(&book.id).unwrap();
        assert!(!restored.is_favorite);
        assert!(library.favorite_books().unwrap().is_empty());

        assert!(matches!(
            library.toggle_favorite("missing"),
            Err(LibraryError::BookNotFound(_))
        ));
    }

    #[test]
    fn concurrent_toggle_on_same_book_is_busy() {
        let library = library_with(&["Books"]);
        let book = add_book(&library, "Books", "Dune", None);
        let _held = library
            .in_flight()
            .begin(Action::ToggleFavorite(book.id.clone()))
            .unwrap();
        assert!(matches!(
            library.toggle_favorite(&book.id),
            Err(LibraryError::Busy(_))
        ));
        assert!(!library.book(&book.id).unwrap().is_favorite);
    }

    #[test]
    fn custom_book_requires_title_and_category() {
        let library = library_with(&["Books"]);
        let blank = NewBook {
            title: "  ".to_string(),
            ..NewBook::default()
        };
        assert!(matches!(
            library.add_custom_book("Books", blank),
            Err(LibraryError::EmptyTitle)
        ));

        let book = NewBook {
            title: "Notes".to_string(),
            ..NewBook::default()
        };
        assert!(matches!(
            library.add_custom_book("Ghost", book.clone()),
            Err(LibraryError::CategoryNotFound(_))
        ));

        let created = library.add_custom_book("Books", book).unwrap();
        assert!(created.is_custom_book);
        assert_eq!(created.category.as_deref(), Some("Books"));
    }

    #[test]
    fn same_isbn_twice_in_one_category_is_refused() {
        let library = library_with(&["Books", "Other"]);
        add_book(&library, "Books", "Dune", Some("111"));
        let candidate = ScanCandidate {
            isbn: "111".to_string(),
            title: "Dune".to_string(),
            authors: "Frank Herbert".to_string(),
            rating: 4.2,
            excerpt: String::new(),
            summary: String::new(),
            thumbnail: String::new(),
            page_count: None,
            genres: "Science Fiction".to_string(),
            publisher: String::new(),
            published_date: String::new(),
        };
        assert!(matches!(
            library.add_scanned_book("Books", &candidate),
            Err(LibraryError::DuplicateBook { .. })
        ));

        let scanned = library.add_scanned_book("Other", &candidate).unwrap();
        assert!(!scanned.is_custom_book);
        assert_eq!(scanned.rating, Some(4));
        assert_eq!(
            library.categories_holding(&scanned.key()).unwrap(),
            vec!["Books", "Other"]
        );
        assert_eq!(scanned.work_id, scanned.id);
    }

    #[test]
    fn padded_isbn_blocks_the_trimmed_one() {
        let library = library_with(&["A"]);
        let dune = add_book(&library, "A", "Dune", Some(" 111 "));
        assert_eq!(dune.isbn.as_deref(), Some("111"));

        let again = NewBook {
            title: "Dune".to_string(),
            isbn: Some("111".to_string()),
            ..NewBook::default()
        };
        assert!(matches!(
            library.add_custom_book("A", again),
            Err(LibraryError::DuplicateBook { ref isbn, .. }) if isbn == "111"
        ));
        assert_eq!(library.book_count("A").unwrap(), 1);
    }

    #[test]
    fn copies_without_isbn_follow_their_work() {
        let library = library_with(&["A", "B"]);
        let diary = add_book(&library, "A", "Diary", None);

        let first = library
            .add_books_to_categories(&[diary.id.clone()], &names(&["B"]))
            .unwrap();
        assert_eq!(first, 1);
        let second = library
            .add_books_to_categories(&[diary.id.clone()], &names(&["B"]))
            .unwrap();
        assert_eq!(second, 0);
        assert_eq!(library.book_count("B").unwrap(), 1);
        assert_eq!(
            library.categories_holding(&diary.key()).unwrap(),
            vec!["A", "B"]
        );

        let copy = library
            .books_in_category("B", BookFilter::default())
            .unwrap()
            .remove(0);
        assert_ne!(copy.id, diary.id);
        assert_eq!(copy.key(), diary.key());

        let mut edit = copy.clone();
        edit.category = Some("A".to_string());
        assert!(matches!(
            library.update_book(&edit),
            Err(LibraryError::WorkAlreadyHeld(ref category)) if category == "A"
        ));

        let other = add_book(&library, "A", "Diary", None);
        assert_ne!(other.key(), diary.key());
    }

    #[test]
    fn add_copies_into_targets_and_skips_held_works() {
        let library = library_with(&["A", "B", "C"]);
        let dune = add_book(&library, "A", "Dune", Some("111"));
        let emma = add_book(&library, "A", "Emma", Some("222"));
        add_book(&library, "B", "Dune (B)", Some("111"));

        let added = library
            .add_books_to_categories(&[dune.id.clone(), emma.id.clone()], &names(&["B", "C"]))
            .unwrap();
        assert_eq!(added, 3);
        assert_eq!(library.book_count("A").unwrap(), 2);
        assert_eq!(library.book_count("B").unwrap(), 2);
        assert_eq!(library.book_count("C").unwrap(), 2);

        let again = library
            .add_books_to_categories(&[dune.id.clone()], &names(&["C"]))
            .unwrap();
        assert_eq!(again, 0);
    }

    #[test]
    fn add_requires_targets_and_writes_nothing_on_unknown() {
        let library = library_with(&["A", "B"]);
        let dune = add_book(&library, "A", "Dune", Some("111"));
        assert!(matches!(
            library.add_books_to_categories(&[dune.id.clone()], &BTreeSet::new()),
            Err(LibraryError::NoTargetCategory)
        ));
        assert!(matches!(
            library.add_books_to_categories(&[dune.id.clone()], &names(&["B", "Ghost"])),
            Err(LibraryError::CategoryNotFound(_))
        ));
        assert_eq!(library.book_count("B").unwrap(), 0);
    }

    #[test]
    fn move_to_single_target_updates_in_place() {
        let library = library_with(&["A", "B"]);
        let dune = add_book(&library, "A", "Dune", Some("111"));
        let emma = add_book(&library, "A", "Emma", Some("222"));
        add_book(&library, "B", "Emma", Some("222"));

        let moved = library
            .move_books_to_categories(&[dune.id.clone(), emma.id.clone()], &names(&["B"]))
            .unwrap();
        assert_eq!(moved, 2);
        assert_eq!(library.book_count("A").unwrap(), 0);
        assert_eq!(library.book(&dune.id).unwrap().category.as_deref(), Some("B"));
        assert!(matches!(
            library.book(&emma.id),
            Err(LibraryError::BookNotFound(_))
        ));
        assert_eq!(
            titles(&library.books_in_category("B", BookFilter::default()).unwrap()),
            vec!["Dune", "Emma"]
        );
    }

    #[test]
    fn move_to_several_targets_duplicates_and_removes_originals() {
        let library = library_with(&["A", "B", "C"]);
        let dune = add_book(&library, "A", "Dune", Some("111"));
        let custom = add_book(&library, "B", "Diary", None);

        let removed = library
            .move_books_to_categories(&[dune.id.clone(), custom.id.clone()], &names(&["B", "C"]))
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(library.book_count("A").unwrap(), 0);
        assert_eq!(
            titles(&library.books_in_category("B", BookFilter::default()).unwrap()),
            vec!["Diary", "Dune"]
        );
        assert_eq!(
            titles(&library.books_in_category("C", BookFilter::default()).unwrap()),
            vec!["Diary", "Dune"]
        );
        assert!(library.book(&custom.id).is_ok());
        assert!(library.book(&dune.id).is_err());
    }

    #[test]
    fn delete_ignores_unknown_ids() {
        let library = library_with(&["A"]);
        let dune = add_book(&library, "A", "Dune", None);
        let deleted = library
            .delete_books(&[dune.id.clone(), "missing".to_string()])
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(matches!(
            library.delete_books(&[]),
            Err(LibraryError::NothingSelected)
        ));
    }

    #[test]
    fn rating_and_notes() {
        let library = library_with(&["A"]);
        let dune = add_book(&library, "A", "Dune", None);
        assert_eq!(library.set_rating(&dune.id, Some(5)).unwrap().rating, Some(5));
        assert_eq!(library.set_rating(&dune.id, None).unwrap().rating, None);
        assert!(matches!(
            library.set_rating(&dune.id, Some(6)),
            Err(LibraryError::InvalidRating(6))
        ));
        assert_eq!(
            library.set_notes(&dune.id, "Reread in May").unwrap().notes,
            "Reread in May"
        );
    }

    #[test]
    fn edits_keep_category_rules() {
        let library = library_with(&["A", "B"]);
        let dune = add_book(&library, "A", "Dune", Some("111"));
        add_book(&library, "B", "Dune", Some("111"));

        let mut edit = library.book(&dune.id).unwrap();
        edit.title = " Dune Messiah ".to_string();
        edit.genres = vec!["Science Fiction".to_string()];
        let saved = library.update_book(&edit).unwrap();
        assert_eq!(saved.title, "Dune Messiah");
        assert_eq!(saved.genres, vec!["Science Fiction"]);

        edit.category = Some("B".to_string());
        assert!(matches!(
            library.update_book(&edit),
            Err(LibraryError::DuplicateBook { .. })
        ));
        edit.category = Some("Ghost".to_string());
        assert!(matches!(
            library.update_book(&edit),
            Err(LibraryError::CategoryNotFound(_))
        ));
    }

    #[test]
    fn filters_narrow_category_listing() {
        let library = library_with(&["A"]);
        let dune = add_book(&library, "A", "Dune", None);
        add_book(&library, "A", "Emma", None);
        library.toggle_favorite(&dune.id).unwrap();

        let favorites = library
            .books_in_category("A", BookFilter::favorites())
            .unwrap();
        assert_eq!(titles(&favorites), vec!["Dune"]);
        let custom = library
            .books_in_category(
                "A",
                BookFilter {
                    favorite: None,
                    custom: Some(false),
                },
            )
            .unwrap();
        assert!(custom.is_empty());
    }
}
