use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::models::{join_genres, normalize_isbn, split_genres, NewBook, RecommendedBook};

const RECOMMENDED_COLUMNS: &str = "id, title, author, excerpt, summary, image, rating, genres, \
     publisher, publishedDate, pageCount, notes, isbn, addToLibrary";

fn recommended_from_row(row: &Row<'_>) -> rusqlite::Result<RecommendedBook> {
    let genres: String = row.get(7)?;
    Ok(RecommendedBook {
        id: row.get(0)?,
        title: row.get(1)?,
        author: row.get(2)?,
        excerpt: row.get(3)?,
        summary: row.get(4)?,
        image: row.get(5)?,
        rating: row.get(6)?,
        genres: split_genres(&genres),
        publisher: row.get(8)?,
        published_date: row.get(9)?,
        page_count: row.get(10)?,
        notes: row.get(11)?,
        isbn: row.get(12)?,
        add_to_library: row.get(13)?,
    })
}

pub fn insert_recommended(conn: &Connection, id: &str, book: &NewBook) -> Result<RecommendedBook> {
    conn.execute(
        "INSERT INTO recommendedBooks (id, title, author, excerpt, summary, image, rating, genres, \
         addToLibrary, publisher, publishedDate, pageCount, notes, isbn)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?10, ?11, ?12, ?13)",
        params![
            id,
            book.title,
            book.author,
            book.excerpt,
            book.summary,
            book.image,
            book.rating,
            join_genres(&book.genres),
            book.publisher,
            book.published_date,
            book.page_count,
            book.notes,
            normalize_isbn(book.isbn.as_deref()),
        ],
    )
    .context("failed to insert recommended book")?;

    fetch_recommended(conn, id)?
        .ok_or_else(|| anyhow!("Inserted recommendation {id} could not be read back"))
}

pub fn fetch_recommended(conn: &Connection, id: &str) -> Result<Option<RecommendedBook>> {
    conn.query_row(
        &format!("SELECT {RECOMMENDED_COLUMNS} FROM recommendedBooks WHERE id = ?1"),
        params![id],
        recommended_from_row,
    )
    .optional()
    .context("failed to load recommended book")
}

/// List recommendations, optionally only those (not) yet imported.
pub fn fetch_recommendations(
    conn: &Connection,
    added_to_library: Option<bool>,
) -> Result<Vec<RecommendedBook>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {RECOMMENDED_COLUMNS} FROM recommendedBooks
             WHERE ?1 IS NULL OR addToLibrary = ?1
             ORDER BY title COLLATE NOCASE, id"
        ))
        .context("failed to prepare recommendation query")?;

    let books = stmt
        .query_map(params![added_to_library], recommended_from_row)
        .context("failed to iterate recommendations")?
        .collect::<Result<Vec<_>, _>>()
        .context("failed to collect recommendations")?;

    Ok(books)
}

/// Flag each listed recommendation as imported into the library.
pub fn mark_added_to_library(conn: &Connection, ids: &[String]) -> Result<usize> {
    let mut stmt = conn
        .prepare("UPDATE recommendedBooks SET addToLibrary = 1 WHERE id = ?1")
        .context("failed to prepare recommendation update")?;
    let mut changed = 0;
    for id in ids {
        changed += stmt
            .execute(params![id])
            .context("failed to mark recommendation as added")?;
    }
    Ok(changed)
}

pub fn delete_recommendations(conn: &Connection, ids: &[String]) -> Result<usize> {
    let mut stmt = conn
        .prepare("DELETE FROM recommendedBooks WHERE id = ?1")
        .context("failed to prepare recommendation delete")?;
    let mut deleted = 0;
    for id in ids {
        deleted += stmt
            .execute(params![id])
            .context("failed to delete recommendation")?;
    }
    Ok(deleted)
}

pub fn delete_recommendations_by_isbn(conn: &Connection, isbns: &[String]) -> Result<usize> {
    let mut stmt = conn
        .prepare("DELETE FROM recommendedBooks WHERE TRIM(isbn) = ?1")
        .context("failed to prepare recommendation delete")?;
    let mut deleted = 0;
    for isbn in isbns {
        deleted += stmt
            .execute(params![isbn.trim()])
            .context("failed to delete recommendation")?;
    }
    Ok(deleted)
}
