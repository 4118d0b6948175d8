//! Persistence module split across logical submodules. Each function issues
//! one statement (or one prepared statement in a loop) against a borrowed
//! connection; callers that need several of them to succeed together run
//! them through `Store::with_transaction`.

mod books;
mod categories;
mod connection;
mod recommended;

pub use books::{
    category_holds, category_names_for_key, count_books_in_category, delete_books,
    delete_books_in_category, fetch_book, fetch_books, fetch_books_by_key, insert_book,
    rename_books_category, set_books_category, set_notes, set_rating, toggle_favorite,
    update_book,
};
pub use categories::{
    compact_positions, count_categories, delete_category, fetch_categories, fetch_category,
    insert_category, rename_category, set_category_pinned,
};
pub use connection::{ensure_schema, Store};
pub use recommended::{
    delete_recommendations, delete_recommendations_by_isbn, fetch_recommendations,
    fetch_recommended, insert_recommended, mark_added_to_library,
};
