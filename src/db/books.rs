use anyhow::{anyhow, Context, Result};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use rusqlite::types::Value;

use crate::models::{join_genres, normalize_isbn, split_genres, Book, BookFilter, BookKey, NewBook};

/// Column list shared by every user book query so `book_from_row` can rely on
/// positional indexes.
const BOOK_COLUMNS: &str = "id, title, author, excerpt, summary, image, rating, genres, category, \
     isFavorite, publisher, publishedDate, pageCount, notes, isCustomBook, isbn, workId";

fn book_from_row(row: &Row<'_>) -> rusqlite::Result<Book> {
    let genres: String = row.get(7)?;
    Ok(Book {
        id: row.get(0)?,
        title: row.get(1)?,
        author: row.get(2)?,
        excerpt: row.get(3)?,
        summary: row.get(4)?,
        image: row.get(5)?,
        rating: row.get(6)?,
        genres: split_genres(&genres),
        category: row.get(8)?,
        is_favorite: row.get(9)?,
        publisher: row.get(10)?,
        published_date: row.get(11)?,
        page_count: row.get(12)?,
        notes: row.get(13)?,
        is_custom_book: row.get(14)?,
        isbn: row.get(15)?,
        work_id: row.get(16)?,
    })
}

fn collect_books(conn: &Connection, sql: &str, args: Vec<Value>) -> Result<Vec<Book>> {
    let mut stmt = conn
        .prepare(sql)
        .context("failed to prepare book query")?;

    let books = stmt
        .query_map(params_from_iter(args), book_from_row)
        .context("failed to iterate books")?
        .collect::<Result<Vec<_>, _>>()
        .context("failed to collect books")?;

    Ok(books)
}

/// Insert a book under the given id and category, echoing the hydrated row so
/// callers can update their lists without re-querying. The ISBN is stored
/// normalized and the work id defaults to the row id.
pub fn insert_book(
    conn: &Connection,
    id: &str,
    book: &NewBook,
    category: Option<&str>,
) -> Result<Book> {
    conn.execute(
        "INSERT INTO userBooks (id, title, author, excerpt, summary, image, rating, genres, \
         category, isFavorite, publisher, publishedDate, pageCount, notes, isCustomBook, isbn, \
         workId)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        params![
            id,
            book.title,
            book.author,
            book.excerpt,
            book.summary,
            book.image,
            book.rating,
            join_genres(&book.genres),
            category,
            book.is_favorite,
            book.publisher,
            book.published_date,
            book.page_count,
            book.notes,
            book.is_custom_book,
            normalize_isbn(book.isbn.as_deref()),
            book.work_id_or(id),
        ],
    )
    .context("failed to insert book")?;

    fetch_book(conn, id)?.ok_or_else(|| anyhow!("Inserted book {id} could not be read back"))
}

pub fn fetch_book(conn: &Connection, id: &str) -> Result<Option<Book>> {
    conn.query_row(
        &format!("SELECT {BOOK_COLUMNS} FROM userBooks WHERE id = ?1"),
        params![id],
        book_from_row,
    )
    .optional()
    .context("failed to load book")
}

/// List books, optionally restricted to one category and narrowed by the
/// favorite/custom flags. Titles sort case-insensitively.
pub fn fetch_books(
    conn: &Connection,
    category: Option<&str>,
    filter: BookFilter,
) -> Result<Vec<Book>> {
    let mut clauses = Vec::new();
    let mut args = Vec::new();

    if let Some(category) = category {
        args.push(Value::Text(category.to_string()));
        clauses.push(format!("category = ?{}", args.len()));
    }
    if let Some(favorite) = filter.favorite {
        args.push(Value::Integer(favorite as i64));
        clauses.push(format!("isFavorite = ?{}", args.len()));
    }
    if let Some(custom) = filter.custom {
        args.push(Value::Integer(custom as i64));
        clauses.push(format!("isCustomBook = ?{}", args.len()));
    }

    let mut sql = format!("SELECT {BOOK_COLUMNS} FROM userBooks");
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY title COLLATE NOCASE, author COLLATE NOCASE, id");

    collect_books(conn, &sql, args)
}

/// SQL condition matching rows whose key equals the bound parameter `?{n}`.
/// Keys are trimmed on both sides so rows written before ISBNs were
/// normalized still compare equal.
fn key_condition(key: &BookKey, n: usize) -> (String, String) {
    match key {
        BookKey::Isbn(isbn) => (format!("TRIM(isbn) = ?{n}"), isbn.trim().to_string()),
        BookKey::Generated(work_id) => (
            format!("workId = ?{n} AND (isbn IS NULL OR TRIM(isbn) = '')"),
            work_id.clone(),
        ),
    }
}

/// Every row carrying `key`, one per category that holds the work.
pub fn fetch_books_by_key(conn: &Connection, key: &BookKey) -> Result<Vec<Book>> {
    let (condition, value) = key_condition(key, 1);
    collect_books(
        conn,
        &format!(
            "SELECT {BOOK_COLUMNS} FROM userBooks WHERE {condition} \
             ORDER BY category COLLATE NOCASE, id"
        ),
        vec![Value::Text(value)],
    )
}

/// Distinct category names holding at least one copy of the given work.
pub fn category_names_for_key(conn: &Connection, key: &BookKey) -> Result<Vec<String>> {
    let (condition, value) = key_condition(key, 1);
    let sql = format!(
        "SELECT DISTINCT category FROM userBooks
         WHERE {condition} AND category IS NOT NULL
         ORDER BY category COLLATE NOCASE"
    );

    let mut stmt = conn
        .prepare(&sql)
        .context("failed to prepare category-by-book query")?;
    let names = stmt
        .query_map(params![value], |row| row.get(0))
        .context("failed to iterate categories for book")?
        .collect::<Result<Vec<String>, _>>()
        .context("failed to collect categories for book")?;
    Ok(names)
}

/// True when the category already holds a book with the given key.
pub fn category_holds(conn: &Connection, category: &str, key: &BookKey) -> Result<bool> {
    let (condition, value) = key_condition(key, 2);
    let sql = format!("SELECT EXISTS(SELECT 1 FROM userBooks WHERE category = ?1 AND {condition})");
    conn.query_row(&sql, params![category, value], |row| row.get(0))
        .context("failed to check category contents")
}

pub fn count_books_in_category(conn: &Connection, category: &str) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM userBooks WHERE category = ?1",
        params![category],
        |row| row.get(0),
    )
    .context("failed to count books in category")
}

/// Overwrite every editable field of an existing book. The work id is
/// fixed at insert time.
pub fn update_book(conn: &Connection, book: &Book) -> Result<()> {
    let updated = conn
        .execute(
            "UPDATE userBooks SET title = ?1, author = ?2, excerpt = ?3, summary = ?4, image = ?5,
             rating = ?6, genres = ?7, category = ?8, isFavorite = ?9, publisher = ?10,
             publishedDate = ?11, pageCount = ?12, notes = ?13, isbn = ?14
             WHERE id = ?15",
            params![
                book.title,
                book.author,
                book.excerpt,
                book.summary,
                book.image,
                book.rating,
                join_genres(&book.genres),
                book.category,
                book.is_favorite,
                book.publisher,
                book.published_date,
                book.page_count,
                book.notes,
                normalize_isbn(book.isbn.as_deref()),
                book.id,
            ],
        )
        .context("failed to update book")?;

    if updated == 0 {
        Err(anyhow!("Book not found"))
    } else {
        Ok(())
    }
}

/// Point each listed book at `category`. Returns how many rows changed.
pub fn set_books_category(conn: &Connection, ids: &[String], category: &str) -> Result<usize> {
    let mut stmt = conn
        .prepare("UPDATE userBooks SET category = ?1 WHERE id = ?2")
        .context("failed to prepare book move")?;
    let mut changed = 0;
    for id in ids {
        changed += stmt
            .execute(params![category, id])
            .context("failed to move book")?;
    }
    Ok(changed)
}

/// Rewrite the category reference of every book owned by `old_name`.
pub fn rename_books_category(conn: &Connection, old_name: &str, new_name: &str) -> Result<usize> {
    conn.execute(
        "UPDATE userBooks SET category = ?1 WHERE category = ?2",
        params![new_name, old_name],
    )
    .context("failed to update books for renamed category")
}

pub fn delete_books(conn: &Connection, ids: &[String]) -> Result<usize> {
    let mut stmt = conn
        .prepare("DELETE FROM userBooks WHERE id = ?1")
        .context("failed to prepare book delete")?;
    let mut deleted = 0;
    for id in ids {
        deleted += stmt.execute(params![id]).context("failed to delete book")?;
    }
    Ok(deleted)
}

pub fn delete_books_in_category(conn: &Connection, category: &str) -> Result<usize> {
    conn.execute(
        "DELETE FROM userBooks WHERE category = ?1",
        params![category],
    )
    .context("failed to delete books in category")
}

/// Flip the favorite flag in a single statement so concurrent toggles never
/// act on a stale read.
pub fn toggle_favorite(conn: &Connection, id: &str) -> Result<()> {
    let updated = conn
        .execute(
            "UPDATE userBooks SET isFavorite = 1 - isFavorite WHERE id = ?1",
            params![id],
        )
        .context("failed to toggle favorite")?;

    if updated == 0 {
        Err(anyhow!("Book not found"))
    } else {
        Ok(())
    }
}

pub fn set_rating(conn: &Connection, id: &str, rating: Option<u8>) -> Result<()> {
    let updated = conn
        .execute(
            "UPDATE userBooks SET rating = ?1 WHERE id = ?2",
            params![rating, id],
        )
        .context("failed to update rating")?;

    if updated == 0 {
        Err(anyhow!("Book not found"))
    } else {
        Ok(())
    }
}

pub fn set_notes(conn: &Connection, id: &str, notes: &str) -> Result<()> {
    let updated = conn
        .execute(
            "UPDATE userBooks SET notes = ?1 WHERE id = ?2",
            params![notes, id],
        )
        .context("failed to update notes")?;

    if updated == 0 {
        Err(anyhow!("Book not found"))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ensure_schema;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        conn
    }

    fn book(title: &str, isbn: Option<&str>) -> NewBook {
        NewBook {
            title: title.to_string(),
            author: "Author".to_string(),
            genres: vec!["Fantasy".to_string(), "Classic".to_string()],
            isbn: isbn.map(str::to_string),
            ..NewBook::default()
        }
    }

    #[test]
    fn insert_round_trips_every_column() {
        let conn = conn();
        let mut new = book("The Hobbit", Some("9780261102217"));
        new.rating = Some(5);
        new.page_count = Some(310);
        new.publisher = Some("Allen & Unwin".to_string());
        new.notes = "Reread every winter".to_string();

        let stored = insert_book(&conn, "b1", &new, Some("Fiction")).unwrap();
        assert_eq!(stored.id, "b1");
        assert_eq!(stored.work_id, "b1");
        assert_eq!(stored.category.as_deref(), Some("Fiction"));
        assert_eq!(
            stored.to_new_book(),
            NewBook {
                work_id: Some("b1".to_string()),
                ..new
            }
        );
    }

    #[test]
    fn filters_narrow_listing() {
        let conn = conn();
        let mut fav = book("B", None);
        fav.is_favorite = true;
        let mut custom = book("A", None);
        custom.is_custom_book = true;
        insert_book(&conn, "1", &fav, Some("Fiction")).unwrap();
        insert_book(&conn, "2", &custom, Some("Fiction")).unwrap();
        insert_book(&conn, "3", &book("C", None), Some("Other")).unwrap();

        let all = fetch_books(&conn, Some("Fiction"), BookFilter::default()).unwrap();
        assert_eq!(
            all.iter().map(|b| b.title.as_str()).collect::<Vec<_>>(),
            vec!["A", "B"]
        );

        let favorites = fetch_books(&conn, None, BookFilter::favorites()).unwrap();
        assert_eq!(favorites.len(), 1);
        assert_eq!(favorites[0].id, "1");

        let custom_only = fetch_books(
            &conn,
            Some("Fiction"),
            BookFilter {
                favorite: Some(false),
                custom: Some(true),
            },
        )
        .unwrap();
        assert_eq!(custom_only.len(), 1);
        assert_eq!(custom_only[0].id, "2");
    }

    #[test]
    fn key_lookups_cover_both_identity_kinds() {
        let conn = conn();
        insert_book(&conn, "1", &book("Dune", Some("123")), Some("Fiction")).unwrap();
        insert_book(&conn, "2", &book("Dune", Some("123")), Some("Sci-Fi")).unwrap();
        let notes = insert_book(&conn, "3", &book("Notes", None), Some("Fiction")).unwrap();
        insert_book(&conn, "4", &notes.to_new_book(), Some("Journal")).unwrap();

        let isbn = BookKey::Isbn("123".to_string());
        assert_eq!(
            category_names_for_key(&conn, &isbn).unwrap(),
            vec!["Fiction", "Sci-Fi"]
        );
        assert!(category_holds(&conn, "Sci-Fi", &isbn).unwrap());
        assert!(!category_holds(&conn, "Other", &isbn).unwrap());

        let generated = BookKey::Generated("3".to_string());
        assert!(category_holds(&conn, "Fiction", &generated).unwrap());
        assert!(category_holds(&conn, "Journal", &generated).unwrap());
        assert!(!category_holds(&conn, "Sci-Fi", &generated).unwrap());
        assert_eq!(
            category_names_for_key(&conn, &generated).unwrap(),
            vec!["Fiction", "Journal"]
        );
        assert_eq!(fetch_books_by_key(&conn, &isbn).unwrap().len(), 2);
    }

    #[test]
    fn padded_isbns_are_stored_trimmed() {
        let conn = conn();
        let stored = insert_book(&conn, "1", &book("Dune", Some(" 111 ")), Some("Fiction")).unwrap();
        assert_eq!(stored.isbn.as_deref(), Some("111"));
        let blank = insert_book(&conn, "2", &book("Diary", Some("   ")), Some("Fiction")).unwrap();
        assert_eq!(blank.isbn, None);

        let mut edited = stored.clone();
        edited.isbn = Some("  222".to_string());
        update_book(&conn, &edited).unwrap();
        assert_eq!(fetch_book(&conn, "1").unwrap().unwrap().isbn.as_deref(), Some("222"));

        conn.execute("UPDATE userBooks SET isbn = ' 333 ' WHERE id = '2'", [])
            .unwrap();
        let legacy = BookKey::Isbn("333".to_string());
        assert!(category_holds(&conn, "Fiction", &legacy).unwrap());
        assert_eq!(fetch_books_by_key(&conn, &legacy).unwrap().len(), 1);
        assert_eq!(category_names_for_key(&conn, &legacy).unwrap(), vec!["Fiction"]);
    }

    #[test]
    fn toggle_favorite_is_an_involution() {
        let conn = conn();
        insert_book(&conn, "1", &book("Dune", None), Some("Fiction")).unwrap();
        toggle_favorite(&conn, "1").unwrap();
        assert!(fetch_book(&conn, "1").unwrap().unwrap().is_favorite);
        toggle_favorite(&conn, "1").unwrap();
        assert!(!fetch_book(&conn, "1").unwrap().unwrap().is_favorite);
        assert!(toggle_favorite(&conn, "missing").is_err());
    }

    #[test]
    fn bulk_helpers_report_counts() {
        let conn = conn();
        for id in ["1", "2", "3"] {
            insert_book(&conn, id, &book(id, None), Some("Fiction")).unwrap();
        }
        let ids = vec!["1".to_string(), "2".to_string(), "nope".to_string()];
        assert_eq!(set_books_category(&conn, &ids, "Other").unwrap(), 2);
        assert_eq!(rename_books_category(&conn, "Other", "Renamed").unwrap(), 2);
        assert_eq!(count_books_in_category(&conn, "Renamed").unwrap(), 2);
        assert_eq!(delete_books(&conn, &ids).unwrap(), 2);
        assert_eq!(delete_books_in_category(&conn, "Fiction").unwrap(), 1);
    }
}
