use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, Error as SqlError, ErrorCode, OptionalExtension, Row};

use crate::models::Category;

fn category_from_row(row: &Row<'_>) -> rusqlite::Result<Category> {
    Ok(Category {
        name: row.get(0)?,
        is_pinned: row.get(1)?,
        position: row.get(2)?,
    })
}

/// Retrieve every category in stored position order. Display order is
/// decided by `library::sort_categories`, not by this query.
pub fn fetch_categories(conn: &Connection) -> Result<Vec<Category>> {
    let mut stmt = conn
        .prepare("SELECT name, isPinned, position FROM categories ORDER BY position, name")
        .context("failed to prepare category query")?;

    let categories = stmt
        .query_map([], category_from_row)
        .context("failed to load categories")?
        .collect::<Result<Vec<_>, _>>()
        .context("failed to collect categories")?;

    Ok(categories)
}

/// Look up one category by its exact name.
pub fn fetch_category(conn: &Connection, name: &str) -> Result<Option<Category>> {
    conn.query_row(
        "SELECT name, isPinned, position FROM categories WHERE name = ?1",
        params![name],
        category_from_row,
    )
    .optional()
    .context("failed to load category")
}

pub fn count_categories(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM categories", [], |row| row.get(0))
        .context("failed to count categories")
}

/// Insert a category at the end of the position order and echo the hydrated
/// row. The caller is responsible for picking a free name.
pub fn insert_category(conn: &Connection, name: &str, is_pinned: bool) -> Result<Category> {
    let position: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM categories",
            [],
            |row| row.get(0),
        )
        .context("failed to compute next category position")?;

    conn.execute(
        "INSERT INTO categories (name, isPinned, position) VALUES (?1, ?2, ?3)",
        params![name, is_pinned, position],
    )
    .map_err(|err| map_unique_constraint(err, name))
    .context("failed to insert category")?;

    Ok(Category {
        name: name.to_string(),
        is_pinned,
        position,
    })
}

/// Change a category's primary key. Books are not touched here.
pub fn rename_category(conn: &Connection, old_name: &str, new_name: &str) -> Result<()> {
    let updated = conn
        .execute(
            "UPDATE categories SET name = ?1 WHERE name = ?2",
            params![new_name, old_name],
        )
        .map_err(|err| map_unique_constraint(err, new_name))
        .context("failed to rename category")?;

    if updated == 0 {
        Err(anyhow!("Category not found"))
    } else {
        Ok(())
    }
}

pub fn set_category_pinned(conn: &Connection, name: &str, is_pinned: bool) -> Result<()> {
    let updated = conn
        .execute(
            "UPDATE categories SET isPinned = ?1 WHERE name = ?2",
            params![is_pinned, name],
        )
        .context("failed to update category pin")?;

    if updated == 0 {
        Err(anyhow!("Category not found"))
    } else {
        Ok(())
    }
}

/// Remove a category row. Owned books must be handled by the caller in the
/// same transaction.
pub fn delete_category(conn: &Connection, name: &str) -> Result<()> {
    let deleted = conn
        .execute("DELETE FROM categories WHERE name = ?1", params![name])
        .context("failed to delete category")?;

    if deleted == 0 {
        Err(anyhow!("Category not found"))
    } else {
        Ok(())
    }
}

/// Renumber positions to 0..n following the current order, closing gaps left
/// behind by deletes.
pub fn compact_positions(conn: &Connection) -> Result<()> {
    let names: Vec<String> = fetch_categories(conn)?
        .into_iter()
        .map(|category| category.name)
        .collect();

    let mut stmt = conn
        .prepare("UPDATE categories SET position = ?1 WHERE name = ?2")
        .context("failed to prepare position update")?;
    for (position, name) in names.iter().enumerate() {
        stmt.execute(params![position as i64, name])
            .context("failed to update category position")?;
    }
    Ok(())
}

fn map_unique_constraint(err: SqlError, name: &str) -> anyhow::Error {
    if matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::ConstraintViolation)
    ) {
        anyhow!("Category \"{name}\" already exists.")
    } else {
        err.into()
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

    #[test]
    fn inserts_append_positions() {
        let conn = conn();
        insert_category(&conn, "Books", true).unwrap();
        let second = insert_category(&conn, "Fiction", false).unwrap();
        assert_eq!(second.position, 1);
        assert_eq!(count_categories(&conn).unwrap(), 2);
    }

    #[test]
    fn duplicate_insert_reports_friendly_message() {
        let conn = conn();
        insert_category(&conn, "Books", false).unwrap();
        let err = insert_category(&conn, "Books", false).unwrap_err();
        assert!(err
            .chain()
            .any(|cause| cause.to_string().contains("already exists")));
    }

    #[test]
    fn delete_then_compact_closes_gaps() {
        let conn = conn();
        for name in ["A", "B", "C"] {
            insert_category(&conn, name, false).unwrap();
        }
        delete_category(&conn, "B").unwrap();
        compact_positions(&conn).unwrap();
        let positions: Vec<(String, i64)> = fetch_categories(&conn)
            .unwrap()
            .into_iter()
            .map(|c| (c.name, c.position))
            .collect();
        assert_eq!(
            positions,
            vec![("A".to_string(), 0), ("C".to_string(), 1)]
        );
    }

    #[test]
    fn missing_rows_are_errors() {
        let conn = conn();
        assert!(rename_category(&conn, "Nope", "Yes").is_err());
        assert!(set_category_pinned(&conn, "Nope", true).is_err());
        assert!(delete_category(&conn, "Nope").is_err());
        assert!(fetch_category(&conn, "Nope").unwrap().is_none());
    }
}
