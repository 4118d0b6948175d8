use std::collections::BTreeSet;

use anyhow::{anyhow, Context, Result};
use ratatui::style::{Color, Style};
use ratatui::text::{Line, Span};

use crate::models::{split_genres, Book, NewBook};
use crate::scan::ScanCandidate;

/// Single-line text prompt used for category names, notes, search, and the
/// cover image path.
#[derive(Default, Clone)]
pub(crate) struct TextForm {
    pub(crate) value: String,
    pub(crate) error: Option<String>,
}

impl TextForm {
    pub(crate) fn with_value(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            error: None,
        }
    }

    pub(crate) fn push_char(&mut self, ch: char) -> bool {
        if ch.is_control() {
            return false;
        }
        self.value.push(ch);
        true
    }

    pub(crate) fn backspace(&mut self) {
        self.value.pop();
    }

    pub(crate) fn value_len(&self) -> usize {
        self.value.chars().count()
    }

    pub(crate) fn build_line(&self, label: &str, placeholder: &str) -> Line<'static> {
        let (display, style) = if self.value.is_empty() {
            (placeholder.to_string(), Style::default().fg(Color::DarkGray))
        } else {
            (self.value.clone(), Style::default().fg(Color::Yellow))
        };
        Line::from(vec![Span::raw(format!("{label}: ")), Span::styled(display, style)])
    }
}

/// Fields of the book form, in tab order.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub(crate) enum BookField {
    #[default]
    Title,
    Author,
    Isbn,
    Genres,
    Publisher,
    PublishedDate,
    PageCount,
    Image,
    Summary,
}

impl BookField {
    pub(crate) const ALL: [BookField; 9] = [
        BookField::Title,
        BookField::Author,
        BookField::Isbn,
        BookField::Genres,
        BookField::Publisher,
        BookField::PublishedDate,
        BookField::PageCount,
        BookField::Image,
        BookField::Summary,
    ];

    pub(crate) fn label(self) -> &'static str {
        match self {
            BookField::Title => "Title",
            BookField::Author => "Author",
            BookField::Isbn => "ISBN",
            BookField::Genres => "Genres",
            BookField::Publisher => "Publisher",
            BookField::PublishedDate => "Published",
            BookField::PageCount => "Pages",
            BookField::Image => "Cover URL",
            BookField::Summary => "Summary",
        }
    }

    fn index(self) -> usize {
        Self::ALL.iter().position(|f| *f == self).unwrap_or(0)
    }
}

/// Form state for entering a custom book, editing one, or adding a
/// recommendation.
#[derive(Default, Clone)]
pub(crate) struct BookForm {
    values: [String; 9],
    pub(crate) active: BookField,
    pub(crate) error: Option<String>,
}

impl BookForm {
    /// Populate the form from an existing book when editing.
    pub(crate) fn from_book(book: &Book) -> Self {
        Self {
            values: [
                book.title.clone(),
                book.author.clone(),
                book.isbn.clone().unwrap_or_default(),
                book.genres.join(", "),
                book.publisher.clone().unwrap_or_default(),
                book.published_date.clone().unwrap_or_default(),
                book.page_count.map(|n| n.to_string()).unwrap_or_default(),
                book.image.clone(),
                book.summary.clone(),
            ],
            ..Self::default()
        }
    }

    pub(crate) fn value(&self, field: BookField) -> &str {
        &self.values[field.index()]
    }

    pub(crate) fn next_field(&mut self) {
        let idx = (self.active.index() + 1) % BookField::ALL.len();
        self.active = BookField::ALL[idx];
    }

    pub(crate) fn previous_field(&mut self) {
        let len = BookField::ALL.len();
        let idx = (self.active.index() + len - 1) % len;
        self.active = BookField::ALL[idx];
    }

    /// Insert a character into the active field. Page counts accept digits
    /// only.
    pub(crate) fn push_char(&mut self, ch: char) -> bool {
        if ch.is_control() {
            return false;
        }
        if self.active == BookField::PageCount && !ch.is_ascii_digit() {
            return false;
        }
        self.values[self.active.index()].push(ch);
        true
    }

    pub(crate) fn backspace(&mut self) {
        self.values[self.active.index()].pop();
    }

    pub(crate) fn value_len(&self, field: BookField) -> usize {
        self.value(field).chars().count()
    }

    /// Validate and normalize the inputs into book fields.
    pub(crate) fn parse_inputs(&self) -> Result<NewBook> {
        let title = self.value(BookField::Title).trim();
        if title.is_empty() {
            return Err(anyhow!("Book title is required."));
        }
        let page_count = match self.value(BookField::PageCount).trim() {
            "" => None,
            raw => Some(
                raw.parse::<i64>()
                    .context("Page count must be a whole number.")?,
            ),
        };

        Ok(NewBook {
            title: title.to_string(),
            author: self.value(BookField::Author).trim().to_string(),
            isbn: optional(self.value(BookField::Isbn)),
            genres: split_genres(self.value(BookField::Genres)),
            publisher: optional(self.value(BookField::Publisher)),
            published_date: optional(self.value(BookField::PublishedDate)),
            page_count: page_count.filter(|n| *n > 0),
            image: self.value(BookField::Image).trim().to_string(),
            summary: self.value(BookField::Summary).trim().to_string(),
            ..NewBook::default()
        })
    }

    /// Apply the form to `book`, keeping the fields it does not show.
    pub(crate) fn apply_to(&self, book: &Book) -> Result<Book> {
        let parsed = self.parse_inputs()?;
        Ok(Book {
            title: parsed.title,
            author: parsed.author,
            isbn: parsed.isbn,
            genres: parsed.genres,
            publisher: parsed.publisher,
            published_date: parsed.published_date,
            page_count: parsed.page_count,
            image: parsed.image,
            summary: parsed.summary,
            ..book.clone()
        })
    }

    pub(crate) fn build_line(&self, field: BookField) -> Line<'static> {
        let value = self.value(field);
        let is_active = self.active == field;
        let placeholder = if field == BookField::Title {
            "<required>"
        } else {
            "<optional>"
        };
        let display = if value.is_empty() {
            placeholder.to_string()
        } else {
            value.to_string()
        };
        let style = if is_active {
            Style::default().fg(Color::Yellow)
        } else if value.is_empty() {
            Style::default().fg(Color::DarkGray)
        } else {
            Style::default()
        };

        Line::from(vec![
            Span::raw(format!("{}: ", field.label())),
            Span::styled(display, style),
        ])
    }
}

fn optional(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Multi-choice list of categories used by add, move, import, and merge.
#[derive(Clone)]
pub(crate) struct TargetPicker {
    pub(crate) options: Vec<String>,
    pub(crate) cursor: usize,
    pub(crate) chosen: BTreeSet<String>,
    /// Merge picks exactly one target.
    pub(crate) single: bool,
    pub(crate) error: Option<String>,
}

impl TargetPicker {
    pub(crate) fn new(options: Vec<String>, single: bool) -> Self {
        Self {
            options,
            cursor: 0,
            chosen: BTreeSet::new(),
            single,
            error: None,
        }
    }

    pub(crate) fn move_cursor(&mut self, offset: isize) {
        if self.options.is_empty() {
            return;
        }
        let len = self.options.len() as isize;
        self.cursor = (self.cursor as isize + offset).clamp(0, len - 1) as usize;
    }

    pub(crate) fn toggle_current(&mut self) {
        let Some(name) = self.options.get(self.cursor).cloned() else {
            return;
        };
        if self.chosen.remove(&name) {
            return;
        }
        if self.single {
            self.chosen.clear();
        }
        self.chosen.insert(name);
        self.error = None;
    }

    pub(crate) fn is_chosen(&self, name: &str) -> bool {
        self.chosen.contains(name)
    }
}

/// Candidates returned by a cover scan, waiting for the user to pick one.
pub(crate) struct ScanResults {
    pub(crate) candidates: Vec<ScanCandidate>,
    pub(crate) cursor: usize,
}

impl ScanResults {
    pub(crate) fn new(candidates: Vec<ScanCandidate>) -> Self {
        Self {
            candidates,
            cursor: 0,
        }
    }

    pub(crate) fn move_cursor(&mut self, offset: isize) {
        if self.candidates.is_empty() {
            return;
        }
        let len = self.candidates.len() as isize;
        self.cursor = (self.cursor as isize + offset).clamp(0, len - 1) as usize;
    }

    pub(crate) fn current(&self) -> Option<&ScanCandidate> {
        self.candidates.get(self.cursor)
    }
}

/// Summary shown before a destructive delete.
pub(crate) struct ConfirmDelete {
    pub(crate) headline: String,
    pub(crate) detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn book_form_parses_and_normalizes() {
        let mut form = BookForm::default();
        for ch in " Dune ".chars() {
            form.push_char(ch);
        }
        form.next_field();
        for ch in "Frank Herbert".chars() {
            form.push_char(ch);
        }
        form.active = BookField::Genres;
        for ch in "Science Fiction, Classic".chars() {
            form.push_char(ch);
        }
        form.active = BookField::PageCount;
        assert!(!form.push_char('x'));
        assert!(form.push_char('4'));

        let book = form.parse_inputs().unwrap();
        assert_eq!(book.title, "Dune");
        assert_eq!(book.author, "Frank Herbert");
        assert_eq!(book.genres, vec!["Science Fiction", "Classic"]);
        assert_eq!(book.page_count, Some(4));
        assert_eq!(book.isbn, None);
    }

    #[test]
    fn book_form_requires_title() {
        let form = BookForm::default();
        assert!(form.parse_inputs().is_err());
    }

    #[test]
    fn field_focus_wraps_both_ways() {
        let mut form = BookForm::default();
        form.previous_field();
        assert_eq!(form.active, BookField::Summary);
        form.next_field();
        assert_eq!(form.active, BookField::Title);
    }

    #[test]
    fn single_picker_keeps_one_choice() {
        let mut picker = TargetPicker::new(vec!["A".into(), "B".into()], true);
        picker.toggle_current();
        picker.move_cursor(1);
        picker.toggle_current();
        assert_eq!(picker.chosen.len(), 1);
        assert!(picker.is_chosen("B"));

        let mut multi = TargetPicker::new(vec!["A".into(), "B".into()], false);
        multi.toggle_current();
        multi.move_cursor(1);
        multi.toggle_current();
        assert_eq!(multi.chosen.len(), 2);
        multi.toggle_current();
        assert!(!multi.is_chosen("B"));
    }
}
