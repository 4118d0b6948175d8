use std::collections::BTreeSet;

use tracing::info;

use super::{new_book_id, require_categories, require_targets, validate_rating, Action, Library};
use crate::db;
use crate::error::{LibraryError, LibraryResult};
use crate::models::{NewBook, RecommendedBook};

impl Library {
    /// Recommendations, optionally only those already (or not yet) imported.
    pub fn recommendations(&self, added_to_library: Option<bool>) -> LibraryResult<Vec<RecommendedBook>> {
        self.read(|conn| Ok(db::fetch_recommendations(conn, added_to_library)?))
    }

    pub fn recommendation(&self, id: &str) -> LibraryResult<RecommendedBook> {
        self.read(|conn| {
            db::fetch_recommended(conn, id)?
                .ok_or_else(|| LibraryError::BookNotFound(id.to_string()))
        })
    }

    pub fn add_recommendation(&self, book: NewBook) -> LibraryResult<RecommendedBook> {
        if book.title.trim().is_empty() {
            return Err(LibraryError::EmptyTitle);
        }
        validate_rating(book.rating)?;

        self.run(Action::AddRecommendation, |store| {
            store.with_transaction(|tx| {
                let created = db::insert_recommended(tx, &new_book_id(), &book)?;
                info!(id = %created.id, title = %created.title, "added recommendation");
                Ok(created)
            })
        })
    }

    /// Copy the recommendations into every target category and flag them as
    /// imported. Works a target already holds are skipped there. Returns the
    /// number of book rows written.
    pub fn import_recommendations(
        &self,
        ids: &[String],
        targets: &BTreeSet<String>,
    ) -> LibraryResult<usize> {
        require_targets(targets)?;
        if ids.is_empty() {
            return Err(LibraryError::NothingSelected);
        }

        self.run(Action::ImportRecommendations, |store| {
            store.with_transaction(|tx| {
                require_categories(tx, targets)?;
                let picks = ids
                    .iter()
                    .map(|id| {
                        db::fetch_recommended(tx, id)?
                            .ok_or_else(|| LibraryError::BookNotFound(id.clone()))
                    })
                    .collect::<LibraryResult<Vec<_>>>()?;

                let mut imported = 0;
                for target in targets {
                    for pick in &picks {
                        let book = pick.to_new_book();
                        let id = new_book_id();
                        if db::category_holds(tx, target, &book.key_with_id(&id))? {
                            continue;
                        }
                        db::insert_book(tx, &id, &book, Some(target))?;
                        imported += 1;
                    }
                }
                db::mark_added_to_library(tx, ids)?;
                info!(recommendations = picks.len(), imported, "imported recommendations");
                Ok(imported)
            })
        })
    }

    pub fn delete_recommendations(&self, ids: &[String]) -> LibraryResult<usize> {
        if ids.is_empty() {
            return Err(LibraryError::NothingSelected);
        }
        self.run(Action::DeleteRecommendations, |store| {
            store.with_transaction(|tx| {
                let deleted = db::delete_recommendations(tx, ids)?;
                info!(deleted, "deleted recommendations");
                Ok(deleted)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::test_support::{add_book, library_with, names};
    use crate::models::BookFilter;

    fn suggestion(title: &str, isbn: Option<&str>) -> NewBook {
        NewBook {
            title: title.to_string(),
            author: "Someone".to_string(),
            isbn: isbn.map(str::to_string),
            rating: Some(4),
            ..NewBook::default()
        }
    }

    #[test]
    fn import_copies_and_marks_added() {
        let library = library_with(&["A", "B"]);
        add_book(&library, "B", "Dune", Some("111"));
        let dune = library.add_recommendation(suggestion("Dune", Some("111"))).unwrap();
        let emma = library.add_recommendation(suggestion("Emma", None)).unwrap();
        assert_eq!(library.recommendations(Some(false)).unwrap().len(), 2);

        let imported = library
            .import_recommendations(&[dune.id.clone(), emma.id.clone()], &names(&["A", "B"]))
            .unwrap();
        assert_eq!(imported, 3);
        assert_eq!(library.book_count("A").unwrap(), 2);
        assert_eq!(library.book_count("B").unwrap(), 2);

        let imported_books = library.books_in_category("A", BookFilter::default()).unwrap();
        assert!(imported_books.iter().all(|b| !b.is_custom_book && !b.is_favorite));
        assert!(library.recommendations(Some(false)).unwrap().is_empty());
        assert!(library.recommendation(&dune.id).unwrap().add_to_library);
        assert_eq!(library.recommendations(None).unwrap().len(), 2);
    }

    #[test]
    fn importing_twice_adds_nothing_new() {
        let library = library_with(&["A"]);
        let emma = library.add_recommendation(suggestion("Emma", None)).unwrap();
        let ids = vec![emma.id.clone()];
        assert_eq!(library.import_recommendations(&ids, &names(&["A"])).unwrap(), 1);
        assert_eq!(library.import_recommendations(&ids, &names(&["A"])).unwrap(), 0);
        assert_eq!(library.book_count("A").unwrap(), 1);
    }

    #[test]
    fn import_is_all_or_nothing() {
        let library = library_with(&["A"]);
        let dune = library.add_recommendation(suggestion("Dune", Some("111"))).unwrap();
        let err = library
            .import_recommendations(&[dune.id.clone(), "missing".to_string()], &names(&["A"]))
            .unwrap_err();
        assert!(matches!(err, LibraryError::BookNotFound(_)));
        assert_eq!(library.book_count("A").unwrap(), 0);
        assert!(!library.recommendation(&dune.id).unwrap().add_to_library);

        assert!(matches!(
            library.import_recommendations(&[dune.id.clone()], &BTreeSet::new()),
            Err(LibraryError::NoTargetCategory)
        ));
    }

    #[test]
    fn scanning_an_owned_recommendation_drops_it() {
        let library = library_with(&["A"]);
        library.add_recommendation(suggestion("Dune", Some("111"))).unwrap();
        let candidate = crate::scan::parse_scan_response(
            r#"{"results": [{"isbn": "111", "title": "Dune", "authors": "Frank Herbert"}]}"#,
            4,
        )
        .unwrap()
        .remove(0);
        library.add_scanned_book("A", &candidate).unwrap();
        assert!(library.recommendations(None).unwrap().is_empty());
    }

    #[test]
    fn delete_and_validation() {
        let library = library_with(&[]);
        assert!(matches!(
            library.add_recommendation(suggestion(" ", None)),
            Err(LibraryError::EmptyTitle)
        ));
        let emma = library.add_recommendation(suggestion("Emma", None)).unwrap();
        assert_eq!(library.delete_recommendations(&[emma.id.clone()]).unwrap(), 1);
        assert!(library.recommendations(None).unwrap().is_empty());
    }
}
