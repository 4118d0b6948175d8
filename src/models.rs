//! Domain models that mirror the SQLite schema and get passed throughout the
//! library and the TUI. These types stay light-weight data holders so other
//! layers can focus on the category rules, persistence, and presentation.

use std::fmt;

/// Name given to the category seeded on first launch.
pub const DEFAULT_CATEGORY: &str = "Books";

#[derive(Debug, Clone, PartialEq, Eq)]
/// A user-defined grouping of books. The name doubles as the primary key and
/// as the value stored in every owned book's `category` column.
pub struct Category {
    pub name: String,
    /// Pinned categories are listed before everything else.
    pub is_pinned: bool,
    /// Insertion order, kept contiguous by create and delete.
    pub position: i64,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Identifies the *work* a book row represents. Rows always carry a generated
/// id because the same work may sit in several categories; the key is what a
/// category must not hold twice. Books without an ISBN are keyed by their
/// work id, which every copy inherits from the row it was copied from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BookKey {
    Isbn(String),
    Generated(String),
}

impl BookKey {
    /// Derive the key from an optional ISBN and the work id.
    pub fn for_parts(isbn: Option<&str>, work_id: &str) -> Self {
        match normalize_isbn(isbn) {
            Some(isbn) => BookKey::Isbn(isbn),
            None => BookKey::Generated(work_id.to_string()),
        }
    }
}

impl fmt::Display for BookKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookKey::Isbn(isbn) => write!(f, "isbn:{isbn}"),
            BookKey::Generated(id) => write!(f, "work:{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A book in the user's own collection (the `userBooks` table).
pub struct Book {
    /// Generated UUID assigned at insert time.
    pub id: String,
    pub title: String,
    pub author: String,
    pub excerpt: String,
    pub summary: String,
    /// Cover image URL, empty when the book has none.
    pub image: String,
    /// Star rating between 1 and 5 when the user has rated the book.
    pub rating: Option<u8>,
    pub genres: Vec<String>,
    /// Name of the owning category.
    pub category: Option<String>,
    pub is_favorite: bool,
    pub publisher: Option<String>,
    pub published_date: Option<String>,
    pub page_count: Option<i64>,
    pub notes: String,
    /// True when the user typed the book in instead of scanning it.
    pub is_custom_book: bool,
    pub isbn: Option<String>,
    /// Shared by a book and every copy made from it.
    pub work_id: String,
}

impl Book {
    pub fn key(&self) -> BookKey {
        BookKey::for_parts(self.isbn.as_deref(), &self.work_id)
    }

    /// `Title - Author`, omitting the hyphen when the author is blank.
    pub fn display_title(&self) -> String {
        if self.author.trim().is_empty() {
            self.title.clone()
        } else {
            format!("{} - {}", self.title, self.author)
        }
    }

    /// The content of this book as a copy of the same work.
    pub fn to_new_book(&self) -> NewBook {
        NewBook {
            title: self.title.clone(),
            author: self.author.clone(),
            excerpt: self.excerpt.clone(),
            summary: self.summary.clone(),
            image: self.image.clone(),
            rating: self.rating,
            genres: self.genres.clone(),
            is_favorite: self.is_favorite,
            publisher: self.publisher.clone(),
            published_date: self.published_date.clone(),
            page_count: self.page_count,
            notes: self.notes.clone(),
            is_custom_book: self.is_custom_book,
            isbn: self.isbn.clone(),
            work_id: Some(self.work_id.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Field values for a book that does not have an id yet. Shared by user books
/// and recommendations.
pub struct NewBook {
    pub title: String,
    pub author: String,
    pub excerpt: String,
    pub summary: String,
    pub image: String,
    pub rating: Option<u8>,
    pub genres: Vec<String>,
    pub is_favorite: bool,
    pub publisher: Option<String>,
    pub published_date: Option<String>,
    pub page_count: Option<i64>,
    pub notes: String,
    pub is_custom_book: bool,
    pub isbn: Option<String>,
    /// Work this book copies; `None` starts a new work named after the row.
    pub work_id: Option<String>,
}

impl NewBook {
    /// Key this book would have once inserted under `id`.
    pub fn key_with_id(&self, id: &str) -> BookKey {
        BookKey::for_parts(self.isbn.as_deref(), self.work_id_or(id))
    }

    /// Work id stored for a row inserted under `id`.
    pub fn work_id_or<'a>(&'a self, id: &'a str) -> &'a str {
        self.work_id.as_deref().unwrap_or(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A suggestion shown on the recommendations screen. It becomes part of the
/// collection only once imported into a category.
pub struct RecommendedBook {
    pub id: String,
    pub title: String,
    pub author: String,
    pub excerpt: String,
    pub summary: String,
    pub image: String,
    pub rating: Option<u8>,
    pub genres: Vec<String>,
    pub publisher: Option<String>,
    pub published_date: Option<String>,
    pub page_count: Option<i64>,
    pub notes: String,
    pub isbn: Option<String>,
    /// Set once the user has imported the book into their library.
    pub add_to_library: bool,
}

impl RecommendedBook {
    pub fn display_title(&self) -> String {
        if self.author.trim().is_empty() {
            self.title.clone()
        } else {
            format!("{} - {}", self.title, self.author)
        }
    }

    /// Imported copies share the recommendation's id as their work id, so
    /// importing twice into one category is a no-op.
    pub fn to_new_book(&self) -> NewBook {
        NewBook {
            title: self.title.clone(),
            author: self.author.clone(),
            excerpt: self.excerpt.clone(),
            summary: self.summary.clone(),
            image: self.image.clone(),
            rating: self.rating,
            genres: self.genres.clone(),
            is_favorite: false,
            publisher: self.publisher.clone(),
            published_date: self.published_date.clone(),
            page_count: self.page_count,
            notes: self.notes.clone(),
            is_custom_book: false,
            isbn: self.isbn.clone(),
            work_id: Some(self.id.clone()),
        }
    }
}

/// Optional narrowing applied to book listings. `None` means "either".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BookFilter {
    pub favorite: Option<bool>,
    pub custom: Option<bool>,
}

impl BookFilter {
    pub fn favorites() -> Self {
        Self {
            favorite: Some(true),
            custom: None,
        }
    }
}

/// Trim an ISBN; blank means "no ISBN". Every stored ISBN goes through here.
pub fn normalize_isbn(isbn: Option<&str>) -> Option<String> {
    isbn.map(str::trim)
        .filter(|isbn| !isbn.is_empty())
        .map(str::to_string)
}

/// Join genres the way they are stored: comma separated without padding.
pub fn join_genres(genres: &[String]) -> String {
    genres
        .iter()
        .map(|genre| genre.trim())
        .filter(|genre| !genre.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}

/// Split the stored genre column back into a list, dropping blanks.
pub fn split_genres(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|genre| !genre.is_empty())
        .map(str::to_string)
        .collect()
}
