use std::collections::BTreeSet;
use std::mem;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Result};
use crossterm::event::KeyCode;
use open::that as open_link;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::prelude::*;
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap};
use ratatui::Frame;
use tracing::debug;

use crate::library::Library;
use crate::models::Book;
use crate::scan::CoverScanner;

use super::forms::{BookField, BookForm, ConfirmDelete, ScanResults, TargetPicker, TextForm};
use super::helpers::{centered_rect, key_hints, rating_stars, surface_error};
use super::screens::{
    BookList, BookScreen, CategoryListScreen, CategoryScreen, FavoritesScreen, Pending, Phase,
    RecommendationScreen,
};

/// Footer space reserved for status messages and instructions.
const FOOTER_HEIGHT: u16 = 3;
/// Rows skipped by PageUp/PageDown.
const PAGE: isize = 5;

/// High-level navigation states.
enum Screen {
    Categories(CategoryListScreen),
    Category(CategoryScreen),
    Book { screen: BookScreen, origin: Origin },
    Favorites(FavoritesScreen),
    Recommendations(RecommendationScreen),
}

/// Where Esc returns to from a book's detail view.
#[derive(Clone)]
enum Origin {
    Category(String),
    Favorites,
}

/// What a submitted book form creates or updates.
enum BookFormPurpose {
    Custom,
    Edit(Book),
    Recommendation,
}

/// Fine-grained modes scoped to the current screen.
enum Mode {
    Normal,
    Naming(TextForm),
    PickingTargets(TargetPicker),
    ConfirmDelete(ConfirmDelete),
    EditingBook {
        purpose: BookFormPurpose,
        form: BookForm,
    },
    EditingNotes(TextForm),
    ScanPath(TextForm),
    ScanResults(ScanResults),
    Searching(TextForm),
}

/// Holds the footer message text plus its severity.
struct StatusMessage {
    text: String,
    kind: StatusKind,
}

/// Severity levels shown in the footer.
enum StatusKind {
    Info,
    Error,
}

impl StatusKind {
    fn style(&self) -> Style {
        match self {
            StatusKind::Info => Style::default().fg(Color::Green),
            StatusKind::Error => Style::default().fg(Color::Red),
        }
    }
}

fn category_names(library: &Library) -> Result<Vec<String>> {
    Ok(library
        .categories()?
        .into_iter()
        .map(|category| category.name)
        .collect())
}

fn plural(count: usize, one: &str, many: &str) -> String {
    if count == 1 {
        format!("1 {one}")
    } else {
        format!("{count} {many}")
    }
}

/// Central application state shared across the TUI.
pub struct App {
    library: Library,
    scanner: CoverScanner,
    screen: Screen,
    mode: Mode,
    status: Option<StatusMessage>,
}

impl App {
    /// Build the app on the category overview, already loaded.
    pub fn new(library: Library, scanner: CoverScanner) -> Result<Self> {
        let mut categories = CategoryListScreen::new();
        categories.load(&library)?;
        Ok(Self {
            library,
            scanner,
            screen: Screen::Categories(categories),
            mode: Mode::Normal,
            status: None,
        })
    }

    /// Hand the library back so the caller can close the store.
    pub fn into_library(self) -> Library {
        self.library
    }

    pub fn handle_key(&mut self, code: KeyCode) -> Result<bool> {
        let mut exit = false;
        let mut mode = mem::replace(&mut self.mode, Mode::Normal);

        mode = match mode {
            Mode::Normal => self.handle_normal_key(code, &mut exit)?,
            Mode::Naming(form) => self.handle_naming(code, form)?,
            Mode::PickingTargets(picker) => self.handle_picker(code, picker)?,
            Mode::ConfirmDelete(confirm) => self.handle_confirm_delete(code, confirm)?,
            Mode::EditingBook { purpose, form } => self.handle_book_form(code, purpose, form)?,
            Mode::EditingNotes(form) => self.handle_notes(code, form)?,
            Mode::ScanPath(form) => self.handle_scan_path(code, form)?,
            Mode::ScanResults(results) => self.handle_scan_results(code, results)?,
            Mode::Searching(form) => self.handle_search(code, form)?,
        };

        self.mode = mode;
        Ok(exit)
    }

    fn handle_normal_key(&mut self, code: KeyCode, exit: &mut bool) -> Result<Mode> {
        if code == KeyCode::Char('q') {
            *exit = true;
            return Ok(Mode::Normal);
        }
        match self.screen {
            Screen::Categories(_) => self.handle_categories_key(code, exit),
            Screen::Category(_) => self.handle_category_key(code),
            Screen::Book { .. } => self.handle_book_key(code),
            Screen::Favorites(_) => self.handle_favorites_key(code),
            Screen::Recommendations(_) => self.handle_recommendations_key(code),
        }
    }

    fn handle_categories_key(&mut self, code: KeyCode, exit: &mut bool) -> Result<Mode> {
        let Screen::Categories(list) = &mut self.screen else {
            return Ok(Mode::Normal);
        };

        match code {
            KeyCode::Esc => {
                if list.selection().is_active() {
                    list.clear_selection();
                    self.set_status("Selection cleared.", StatusKind::Info);
                } else {
                    *exit = true;
                }
            }
            KeyCode::Up => list.move_cursor(-1),
            KeyCode::Down => list.move_cursor(1),
            KeyCode::PageUp => list.move_cursor(-PAGE),
            KeyCode::PageDown => list.move_cursor(PAGE),
            KeyCode::Char(' ') => {
                list.toggle_selected();
            }
            KeyCode::Enter => {
                if !list.can_open() {
                    self.set_status(
                        "Clear the selection (Esc) to open a category.",
                        StatusKind::Error,
                    );
                } else if let Some(name) = list.current().map(|c| c.name.clone()) {
                    self.clear_status();
                    self.open_category(&name, None)?;
                }
            }
            KeyCode::Char('+') => {
                let started = list.begin(Pending::CreateCategory);
                return Ok(self.start(started, Mode::Naming(TextForm::default())));
            }
            KeyCode::Char('e') | KeyCode::Char('E') => {
                let targets = list.targets();
                let prefill = match targets.len() {
                    1 => targets.iter().next().cloned().unwrap_or_default(),
                    _ => String::new(),
                };
                let started = list.begin(Pending::RenameCategories);
                return Ok(self.start(started, Mode::Naming(TextForm::with_value(prefill))));
            }
            KeyCode::Char('-') => {
                let targets = list.targets();
                let books: i64 = targets.iter().map(|name| list.book_count(name)).sum();
                let headline = match targets.len() {
                    1 => format!(
                        "Delete category \"{}\"?",
                        targets.iter().next().cloned().unwrap_or_default()
                    ),
                    n => format!("Delete {n} categories?"),
                };
                let confirm = ConfirmDelete {
                    headline,
                    detail: Some(format!(
                        "This also deletes {}.",
                        plural(books as usize, "book", "books")
                    )),
                };
                let started = list.begin(Pending::DeleteCategories);
                return Ok(self.start(started, Mode::ConfirmDelete(confirm)));
            }
            KeyCode::Char('m') | KeyCode::Char('M') => {
                let targets = list.targets();
                let options = list
                    .categories()
                    .iter()
                    .map(|c| c.name.clone())
                    .filter(|name| !targets.contains(name))
                    .collect();
                let started = list.begin(Pending::MergeCategories);
                return Ok(self.start(
                    started,
                    Mode::PickingTargets(TargetPicker::new(options, true)),
                ));
            }
            KeyCode::Char('p') | KeyCode::Char('P') => {
                let result = list.toggle_pin(&self.library).map(|category| {
                    if category.is_pinned {
                        format!("Pinned \"{}\".", category.name)
                    } else {
                        format!("Unpinned \"{}\".", category.name)
                    }
                });
                self.report(result);
            }
            KeyCode::Char('f') | KeyCode::Char('F') => {
                self.clear_status();
                self.open_favorites()?;
            }
            KeyCode::Char('r') | KeyCode::Char('R') => {
                self.clear_status();
                self.open_recommendations()?;
            }
            _ => {}
        }
        Ok(Mode::Normal)
    }

    fn handle_category_key(&mut self, code: KeyCode) -> Result<Mode> {
        let library = &self.library;
        let Screen::Category(screen) = &mut self.screen else {
            return Ok(Mode::Normal);
        };

        match code {
            KeyCode::Esc => {
                if screen.list().selection().is_active() {
                    screen.list_mut().clear_selection();
                    self.set_status("Selection cleared.", StatusKind::Info);
                } else {
                    let name = screen.name().to_string();
                    self.clear_status();
                    self.open_categories(Some(&name))?;
                }
            }
            KeyCode::Up => screen.list_mut().move_cursor(-1),
            KeyCode::Down => screen.list_mut().move_cursor(1),
            KeyCode::PageUp => screen.list_mut().move_cursor(-PAGE),
            KeyCode::PageDown => screen.list_mut().move_cursor(PAGE),
            KeyCode::Char(' ') => {
                screen.list_mut().toggle_selected();
            }
            KeyCode::Enter => {
                if !screen.can_open() {
                    self.set_status("Clear the selection (Esc) to open a book.", StatusKind::Error);
                } else if let Some(id) = screen.list().current().map(|b| b.id.clone()) {
                    let origin = Origin::Category(screen.name().to_string());
                    self.clear_status();
                    self.open_book(&id, origin)?;
                }
            }
            KeyCode::Char('f') => {
                let query = screen.list().query().unwrap_or_default().to_string();
                return Ok(Mode::Searching(TextForm::with_value(query)));
            }
            KeyCode::Char('v') | KeyCode::Char('V') => {
                let result = screen.toggle_favorites_only(library).map(|only| {
                    if only {
                        "Showing favorites only.".to_string()
                    } else {
                        "Showing all books.".to_string()
                    }
                });
                self.report(result);
            }
            KeyCode::Char('*') => {
                let result = screen.toggle_favorite(library).map(|book| {
                    if book.is_favorite {
                        format!("Added {} to favorites.", book.display_title())
                    } else {
                        format!("Removed {} from favorites.", book.display_title())
                    }
                });
                self.report(result);
            }
            KeyCode::Char('+') => {
                self.clear_status();
                return Ok(Mode::EditingBook {
                    purpose: BookFormPurpose::Custom,
                    form: BookForm::default(),
                });
            }
            KeyCode::Char('s') | KeyCode::Char('S') => {
                self.clear_status();
                return Ok(Mode::ScanPath(TextForm::default()));
            }
            KeyCode::Char('a') | KeyCode::Char('A') | KeyCode::Char('m') | KeyCode::Char('M') => {
                let action = if matches!(code, KeyCode::Char('a') | KeyCode::Char('A')) {
                    Pending::AddBooks
                } else {
                    Pending::MoveBooks
                };
                let options = category_names(library)?;
                let started = screen.begin(action);
                return Ok(self.start(
                    started,
                    Mode::PickingTargets(TargetPicker::new(options, false)),
                ));
            }
            KeyCode::Char('-') => {
                let confirm = delete_books_prompt(screen.list());
                let started = screen.begin(Pending::DeleteBooks);
                return Ok(self.start(started, Mode::ConfirmDelete(confirm)));
            }
            _ => {}
        }
        Ok(Mode::Normal)
    }

    fn handle_favorites_key(&mut self, code: KeyCode) -> Result<Mode> {
        let library = &self.library;
        let Screen::Favorites(screen) = &mut self.screen else {
            return Ok(Mode::Normal);
        };

        match code {
            KeyCode::Esc => {
                if screen.list().selection().is_active() {
                    screen.list_mut().clear_selection();
                    self.set_status("Selection cleared.", StatusKind::Info);
                } else {
                    self.clear_status();
                    self.open_categories(None)?;
                }
            }
            KeyCode::Up => screen.list_mut().move_cursor(-1),
            KeyCode::Down => screen.list_mut().move_cursor(1),
            KeyCode::PageUp => screen.list_mut().move_cursor(-PAGE),
            KeyCode::PageDown => screen.list_mut().move_cursor(PAGE),
            KeyCode::Char(' ') => {
                screen.list_mut().toggle_selected();
            }
            KeyCode::Enter => {
                if !screen.can_open() {
                    self.set_status("Clear the selection (Esc) to open a book.", StatusKind::Error);
                } else if let Some(id) = screen.list().current().map(|b| b.id.clone()) {
                    self.clear_status();
                    self.open_book(&id, Origin::Favorites)?;
                }
            }
            KeyCode::Char('f') => {
                let query = screen.list().query().unwrap_or_default().to_string();
                return Ok(Mode::Searching(TextForm::with_value(query)));
            }
            KeyCode::Char('*') => {
                let result = screen
                    .toggle_favorite(library)
                    .map(|book| format!("Removed {} from favorites.", book.display_title()));
                self.report(result);
            }
            KeyCode::Char('a') | KeyCode::Char('A') => {
                let options = category_names(library)?;
                let started = screen.begin(Pending::AddBooks);
                return Ok(self.start(
                    started,
                    Mode::PickingTargets(TargetPicker::new(options, false)),
                ));
            }
            KeyCode::Char('-') => {
                let confirm = delete_books_prompt(screen.list());
                let started = screen.begin(Pending::DeleteBooks);
                return Ok(self.start(started, Mode::ConfirmDelete(confirm)));
            }
            _ => {}
        }
        Ok(Mode::Normal)
    }

    fn handle_book_key(&mut self, code: KeyCode) -> Result<Mode> {
        let library = &self.library;
        let Screen::Book { screen, origin } = &mut self.screen else {
            return Ok(Mode::Normal);
        };

        match code {
            KeyCode::Esc => {
                let id = screen.id().to_string();
                let origin = origin.clone();
                self.clear_status();
                match origin {
                    Origin::Category(name) => self.open_category(&name, Some(&id))?,
                    Origin::Favorites => self.open_favorites()?,
                }
            }
            KeyCode::Char('*') => {
                let result = screen.toggle_favorite(library).map(|book| {
                    if book.is_favorite {
                        "Marked as favorite.".to_string()
                    } else {
                        "Removed from favorites.".to_string()
                    }
                });
                self.report(result);
            }
            KeyCode::Char(digit @ '0'..='5') => {
                let rating = digit.to_digit(10).and_then(|d| u8::try_from(d).ok()).filter(|d| *d > 0);
                let result = screen.set_rating(library, rating).map(|book| match book.rating {
                    Some(stars) => format!("Rated {stars} of 5."),
                    None => "Rating cleared.".to_string(),
                });
                self.report(result);
            }
            KeyCode::Char('n') | KeyCode::Char('N') => {
                let notes = screen.book().map(|b| b.notes.clone()).unwrap_or_default();
                self.clear_status();
                return Ok(Mode::EditingNotes(TextForm::with_value(notes)));
            }
            KeyCode::Char('e') | KeyCode::Char('E') => {
                if let Some(book) = screen.book().cloned() {
                    self.clear_status();
                    return Ok(Mode::EditingBook {
                        form: BookForm::from_book(&book),
                        purpose: BookFormPurpose::Edit(book),
                    });
                }
            }
            KeyCode::Char('o') | KeyCode::Char('O') => {
                let Some(url) = screen.cover_url().map(str::to_string) else {
                    self.set_status("This book does not have a cover image.", StatusKind::Error);
                    return Ok(Mode::Normal);
                };
                match open_link(&url) {
                    Ok(()) => self.set_status("Opened cover image.", StatusKind::Info),
                    Err(err) => {
                        self.set_status(format!("Failed to open cover: {err}"), StatusKind::Error)
                    }
                }
            }
            _ => {}
        }
        Ok(Mode::Normal)
    }

    fn handle_recommendations_key(&mut self, code: KeyCode) -> Result<Mode> {
        let library = &self.library;
        let Screen::Recommendations(screen) = &mut self.screen else {
            return Ok(Mode::Normal);
        };

        match code {
            KeyCode::Esc => {
                if screen.selection().is_active() {
                    screen.clear_selection();
                    self.set_status("Selection cleared.", StatusKind::Info);
                } else {
                    self.clear_status();
                    self.open_categories(None)?;
                }
            }
            KeyCode::Up => screen.move_cursor(-1),
            KeyCode::Down => screen.move_cursor(1),
            KeyCode::PageUp => screen.move_cursor(-PAGE),
            KeyCode::PageDown => screen.move_cursor(PAGE),
            KeyCode::Char(' ') => {
                screen.toggle_selected();
            }
            KeyCode::Char('t') | KeyCode::Char('T') => {
                let result = screen
                    .cycle_view(library)
                    .map(|view| format!("Showing: {}.", view.label()));
                self.report(result);
            }
            KeyCode::Char('+') => {
                self.clear_status();
                return Ok(Mode::EditingBook {
                    purpose: BookFormPurpose::Recommendation,
                    form: BookForm::default(),
                });
            }
            KeyCode::Char('i') | KeyCode::Char('I') => {
                let options = category_names(library)?;
                let started = screen.begin(Pending::ImportRecommendations);
                return Ok(self.start(
                    started,
                    Mode::PickingTargets(TargetPicker::new(options, false)),
                ));
            }
            KeyCode::Char('-') => {
                let count = screen.targets().len();
                let confirm = ConfirmDelete {
                    headline: format!(
                        "Delete {}?",
                        plural(count, "recommendation", "recommendations")
                    ),
                    detail: None,
                };
                let started = screen.begin(Pending::DeleteRecommendations);
                return Ok(self.start(started, Mode::ConfirmDelete(confirm)));
            }
            _ => {}
        }
        Ok(Mode::Normal)
    }

    fn handle_naming(&mut self, code: KeyCode, mut form: TextForm) -> Result<Mode> {
        match code {
            KeyCode::Esc => {
                self.cancel_pending();
                self.set_status("Cancelled.", StatusKind::Info);
                Ok(Mode::Normal)
            }
            KeyCode::Backspace => {
                form.backspace();
                Ok(Mode::Naming(form))
            }
            KeyCode::Enter => match self.apply_name(&form.value) {
                Ok(message) => {
                    self.set_status(message, StatusKind::Info);
                    Ok(Mode::Normal)
                }
                Err(err) => {
                    let message = surface_error(&err);
                    form.error = Some(message.clone());
                    self.set_status(message, StatusKind::Error);
                    Ok(Mode::Naming(form))
                }
            },
            KeyCode::Char(ch) => {
                if form.push_char(ch) {
                    form.error = None;
                }
                Ok(Mode::Naming(form))
            }
            _ => Ok(Mode::Naming(form)),
        }
    }

    fn handle_picker(&mut self, code: KeyCode, mut picker: TargetPicker) -> Result<Mode> {
        match code {
            KeyCode::Esc => {
                self.cancel_pending();
                self.set_status("Cancelled.", StatusKind::Info);
                return Ok(Mode::Normal);
            }
            KeyCode::Up => picker.move_cursor(-1),
            KeyCode::Down => picker.move_cursor(1),
            KeyCode::Char(' ') => picker.toggle_current(),
            KeyCode::Enter => match self.apply_targets(&picker.chosen) {
                Ok(message) => {
                    self.set_status(message, StatusKind::Info);
                    return Ok(Mode::Normal);
                }
                Err(err) => {
                    let message = surface_error(&err);
                    picker.error = Some(message.clone());
                    self.set_status(message, StatusKind::Error);
                }
            },
            _ => {}
        }
        Ok(Mode::PickingTargets(picker))
    }

    fn handle_confirm_delete(&mut self, code: KeyCode, confirm: ConfirmDelete) -> Result<Mode> {
        match code {
            KeyCode::Esc | KeyCode::Char('n') | KeyCode::Char('N') => {
                self.cancel_pending();
                self.set_status("Deletion cancelled.", StatusKind::Info);
                Ok(Mode::Normal)
            }
            KeyCode::Enter | KeyCode::Char('y') | KeyCode::Char('Y') => {
                match self.apply_delete() {
                    Ok(message) => {
                        self.set_status(message, StatusKind::Info);
                        Ok(Mode::Normal)
                    }
                    Err(err) => {
                        self.set_status(surface_error(&err), StatusKind::Error);
                        Ok(Mode::ConfirmDelete(confirm))
                    }
                }
            }
            _ => Ok(Mode::ConfirmDelete(confirm)),
        }
    }

    fn handle_book_form(
        &mut self,
        code: KeyCode,
        purpose: BookFormPurpose,
        mut form: BookForm,
    ) -> Result<Mode> {
        match code {
            KeyCode::Esc => {
                self.set_status("Cancelled.", StatusKind::Info);
                return Ok(Mode::Normal);
            }
            KeyCode::Tab | KeyCode::Down => form.next_field(),
            KeyCode::BackTab | KeyCode::Up => form.previous_field(),
            KeyCode::Backspace => form.backspace(),
            KeyCode::Enter => match self.save_book_form(&purpose, &form) {
                Ok(message) => {
                    self.set_status(message, StatusKind::Info);
                    return Ok(Mode::Normal);
                }
                Err(err) => {
                    let message = surface_error(&err);
                    form.error = Some(message.clone());
                    self.set_status(message, StatusKind::Error);
                }
            },
            KeyCode::Char(ch) => {
                if form.push_char(ch) {
                    form.error = None;
                }
            }
            _ => {}
        }
        Ok(Mode::EditingBook { purpose, form })
    }

    fn handle_notes(&mut self, code: KeyCode, mut form: TextForm) -> Result<Mode> {
        match code {
            KeyCode::Esc => {
                self.set_status("Cancelled.", StatusKind::Info);
                return Ok(Mode::Normal);
            }
            KeyCode::Backspace => form.backspace(),
            KeyCode::Enter => {
                let library = &self.library;
                let result = match &mut self.screen {
                    Screen::Book { screen, .. } => screen.set_notes(library, form.value.trim()),
                    _ => Err(anyhow!("No book is open.")),
                };
                match result {
                    Ok(_) => {
                        self.set_status("Notes saved.", StatusKind::Info);
                        return Ok(Mode::Normal);
                    }
                    Err(err) => {
                        let message = surface_error(&err);
                        form.error = Some(message.clone());
                        self.set_status(message, StatusKind::Error);
                    }
                }
            }
            KeyCode::Char(ch) => {
                form.push_char(ch);
            }
            _ => {}
        }
        Ok(Mode::EditingNotes(form))
    }

    fn handle_scan_path(&mut self, code: KeyCode, mut form: TextForm) -> Result<Mode> {
        match code {
            KeyCode::Esc => {
                self.set_status("Scan cancelled.", StatusKind::Info);
                Ok(Mode::Normal)
            }
            KeyCode::Backspace => {
                form.backspace();
                Ok(Mode::ScanPath(form))
            }
            KeyCode::Enter => {
                let path = PathBuf::from(form.value.trim());
                match self.scanner.scan_file(&path) {
                    Ok(candidates) if candidates.is_empty() => {
                        self.set_status("No matching books found.", StatusKind::Error);
                        Ok(Mode::Normal)
                    }
                    Ok(candidates) => {
                        self.set_status(
                            format!("Found {}.", plural(candidates.len(), "match", "matches")),
                            StatusKind::Info,
                        );
                        Ok(Mode::ScanResults(ScanResults::new(candidates)))
                    }
                    Err(err) => {
                        let message = surface_error(&err);
                        form.error = Some(message.clone());
                        self.set_status(message, StatusKind::Error);
                        Ok(Mode::ScanPath(form))
                    }
                }
            }
            KeyCode::Char(ch) => {
                if form.push_char(ch) {
                    form.error = None;
                }
                Ok(Mode::ScanPath(form))
            }
            _ => Ok(Mode::ScanPath(form)),
        }
    }

    fn handle_scan_results(&mut self, code: KeyCode, mut results: ScanResults) -> Result<Mode> {
        match code {
            KeyCode::Esc => {
                self.set_status("Scan discarded.", StatusKind::Info);
                return Ok(Mode::Normal);
            }
            KeyCode::Up => results.move_cursor(-1),
            KeyCode::Down => results.move_cursor(1),
            KeyCode::Enter => {
                let Some(candidate) = results.current().cloned() else {
                    return Ok(Mode::Normal);
                };
                let library = &self.library;
                let result = match &mut self.screen {
                    Screen::Category(screen) => screen.add_scanned(library, &candidate),
                    _ => Err(anyhow!("Open a category to add scanned books.")),
                };
                match result {
                    Ok(book) => {
                        self.set_status(format!("Added {}.", book.display_title()), StatusKind::Info);
                        return Ok(Mode::Normal);
                    }
                    Err(err) => self.set_status(surface_error(&err), StatusKind::Error),
                }
            }
            _ => {}
        }
        Ok(Mode::ScanResults(results))
    }

    fn handle_search(&mut self, code: KeyCode, mut form: TextForm) -> Result<Mode> {
        match code {
            KeyCode::Esc => {
                self.set_query(None);
                self.clear_status();
                return Ok(Mode::Normal);
            }
            KeyCode::Enter => {
                let shown = self.visible_book_count();
                self.set_status(
                    format!("{} shown.", plural(shown, "book", "books")),
                    StatusKind::Info,
                );
                return Ok(Mode::Normal);
            }
            KeyCode::Backspace => form.backspace(),
            KeyCode::Char(ch) => {
                form.push_char(ch);
            }
            _ => return Ok(Mode::Searching(form)),
        }
        self.set_query(Some(form.value.clone()));
        Ok(Mode::Searching(form))
    }

    fn apply_name(&mut self, name: &str) -> Result<String> {
        let library = &self.library;
        let Screen::Categories(list) = &mut self.screen else {
            bail!("Nothing to confirm.");
        };
        match list.pending() {
            Some(Pending::CreateCategory) => {
                let category = list.confirm_create(library, name)?;
                Ok(format!("Created \"{}\".", category.name))
            }
            Some(Pending::RenameCategories) => {
                let renamed = list.confirm_rename(library, name)?;
                match renamed.as_slice() {
                    [] => Ok("Nothing to rename.".to_string()),
                    [single] => Ok(format!("Renamed \"{}\" to \"{}\".", single.from, single.to)),
                    many => Ok(format!("Renamed {} categories.", many.len())),
                }
            }
            _ => bail!("Nothing to confirm."),
        }
    }

    fn apply_targets(&mut self, chosen: &BTreeSet<String>) -> Result<String> {
        let library = &self.library;
        match &mut self.screen {
            Screen::Categories(list) => {
                let target = chosen
                    .iter()
                    .next()
                    .ok_or_else(|| anyhow!("Choose the category to merge into."))?;
                let moved = list.confirm_merge(library, target)?;
                Ok(format!(
                    "Merged into \"{target}\" ({} moved).",
                    plural(moved, "book", "books")
                ))
            }
            Screen::Category(screen) => match screen.pending() {
                Some(Pending::AddBooks) => {
                    let added = screen.confirm_add(library, chosen)?;
                    Ok(format!("Added {}.", plural(added, "copy", "copies")))
                }
                Some(Pending::MoveBooks) => {
                    let moved = screen.confirm_move(library, chosen)?;
                    Ok(format!("Moved {}.", plural(moved, "book", "books")))
                }
                _ => bail!("Nothing to confirm."),
            },
            Screen::Favorites(screen) => {
                let added = screen.confirm_add(library, chosen)?;
                Ok(format!("Added {}.", plural(added, "copy", "copies")))
            }
            Screen::Recommendations(screen) => {
                let imported = screen.confirm_import(library, chosen)?;
                Ok(format!("Imported {}.", plural(imported, "book", "books")))
            }
            Screen::Book { .. } => bail!("Nothing to confirm."),
        }
    }

    fn apply_delete(&mut self) -> Result<String> {
        let library = &self.library;
        match &mut self.screen {
            Screen::Categories(list) => {
                let deleted = list.confirm_delete(library)?;
                Ok(format!(
                    "Deleted {} and {}.",
                    plural(deleted.categories, "category", "categories"),
                    plural(deleted.books, "book", "books")
                ))
            }
            Screen::Category(screen) => {
                let deleted = screen.confirm_delete(library)?;
                Ok(format!("Deleted {}.", plural(deleted, "book", "books")))
            }
            Screen::Favorites(screen) => {
                let deleted = screen.confirm_delete(library)?;
                Ok(format!("Deleted {}.", plural(deleted, "book", "books")))
            }
            Screen::Recommendations(screen) => {
                let deleted = screen.confirm_delete(library)?;
                Ok(format!(
                    "Deleted {}.",
                    plural(deleted, "recommendation", "recommendations")
                ))
            }
            Screen::Book { .. } => bail!("Nothing to confirm."),
        }
    }

    fn save_book_form(&mut self, purpose: &BookFormPurpose, form: &BookForm) -> Result<String> {
        let library = &self.library;
        match (purpose, &mut self.screen) {
            (BookFormPurpose::Custom, Screen::Category(screen)) => {
                let book = screen.add_custom(library, form.parse_inputs()?)?;
                Ok(format!("Added {}.", book.display_title()))
            }
            (BookFormPurpose::Edit(original), Screen::Book { screen, .. }) => {
                let book = screen.save(library, &form.apply_to(original)?)?;
                Ok(format!("Saved {}.", book.display_title()))
            }
            (BookFormPurpose::Recommendation, Screen::Recommendations(screen)) => {
                let recommendation = screen.add(library, form.parse_inputs()?)?;
                Ok(format!("Recommended {}.", recommendation.display_title()))
            }
            _ => bail!("This form no longer matches the open screen."),
        }
    }

    fn cancel_pending(&mut self) {
        let cancelled = match &mut self.screen {
            Screen::Categories(list) => list.cancel(),
            Screen::Category(screen) => screen.cancel(),
            Screen::Favorites(screen) => screen.cancel(),
            Screen::Recommendations(screen) => screen.cancel(),
            Screen::Book { .. } => None,
        };
        if let Some(action) = cancelled {
            debug!(action = %action, "pending action cancelled");
        }
    }

    fn set_query(&mut self, query: Option<String>) {
        match &mut self.screen {
            Screen::Category(screen) => screen.list_mut().set_query(query),
            Screen::Favorites(screen) => screen.list_mut().set_query(query),
            _ => {}
        }
    }

    fn visible_book_count(&self) -> usize {
        match &self.screen {
            Screen::Category(screen) => screen.list().len(),
            Screen::Favorites(screen) => screen.list().len(),
            _ => 0,
        }
    }

    /// Turn a pending-action start into the next mode, surfacing refusals.
    fn start(&mut self, started: Result<()>, mode: Mode) -> Mode {
        match started {
            Ok(()) => {
                self.clear_status();
                mode
            }
            Err(err) => {
                self.set_status(surface_error(&err), StatusKind::Error);
                Mode::Normal
            }
        }
    }

    fn report(&mut self, result: Result<String>) {
        match result {
            Ok(message) => self.set_status(message, StatusKind::Info),
            Err(err) => self.set_status(surface_error(&err), StatusKind::Error),
        }
    }

    fn set_status<S: Into<String>>(&mut self, text: S, kind: StatusKind) {
        self.status = Some(StatusMessage {
            text: text.into(),
            kind,
        });
    }

    fn clear_status(&mut self) {
        self.status = None;
    }

    fn open_categories(&mut self, focus: Option<&str>) -> Result<()> {
        let mut list = CategoryListScreen::new();
        list.load(&self.library)?;
        if let Some(name) = focus {
            list.focus(name);
        }
        self.screen = Screen::Categories(list);
        Ok(())
    }

    fn open_category(&mut self, name: &str, focus: Option<&str>) -> Result<()> {
        let mut screen = CategoryScreen::new(name);
        screen.load(&self.library)?;
        if let Some(id) = focus {
            screen.list_mut().focus(id);
        }
        self.screen = Screen::Category(screen);
        Ok(())
    }

    fn open_book(&mut self, id: &str, origin: Origin) -> Result<()> {
        let mut screen = BookScreen::new(id);
        screen.load(&self.library)?;
        self.screen = Screen::Book { screen, origin };
        Ok(())
    }

    fn open_favorites(&mut self) -> Result<()> {
        let mut screen = FavoritesScreen::new();
        screen.load(&self.library)?;
        self.screen = Screen::Favorites(screen);
        Ok(())
    }

    fn open_recommendations(&mut self) -> Result<()> {
        let mut screen = RecommendationScreen::new();
        screen.load(&self.library)?;
        self.screen = Screen::Recommendations(screen);
        Ok(())
    }

    pub(crate) fn draw(&self, frame: &mut Frame) {
        let area = frame.area();
        let footer_height = FOOTER_HEIGHT.min(area.height);

        let (content_area, footer_area) = if area.height > footer_height {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Min(0), Constraint::Length(footer_height)])
                .split(area);
            (chunks[0], chunks[1])
        } else {
            (area, area)
        };

        match &self.screen {
            Screen::Categories(list) => self.draw_categories(frame, content_area, list),
            Screen::Category(screen) => {
                let mut title = format!("{} ({})", screen.name(), screen.list().all().len());
                if screen.filter().favorite == Some(true) {
                    title.push_str(" - favorites");
                }
                self.draw_book_list(frame, content_area, &title, screen.phase(), screen.list())
            }
            Screen::Book { screen, .. } => self.draw_book(frame, content_area, screen),
            Screen::Favorites(screen) => {
                self.draw_book_list(frame, content_area, "Favorites", screen.phase(), screen.list())
            }
            Screen::Recommendations(screen) => {
                self.draw_recommendations(frame, content_area, screen)
            }
        }

        if area.height >= footer_height {
            self.draw_footer(frame, footer_area);
        }

        match &self.mode {
            Mode::Naming(form) => {
                let title = match &self.screen {
                    Screen::Categories(list) if list.pending() == Some(Pending::RenameCategories) => {
                        "Rename Category"
                    }
                    _ => "New Category",
                };
                self.draw_text_form(frame, area, title, "Name", form)
            }
            Mode::PickingTargets(picker) => self.draw_picker(frame, area, picker),
            Mode::ConfirmDelete(confirm) => self.draw_confirm_delete(frame, area, confirm),
            Mode::EditingBook { purpose, form } => {
                let title = match purpose {
                    BookFormPurpose::Custom => "Add Custom Book",
                    BookFormPurpose::Edit(_) => "Edit Book",
                    BookFormPurpose::Recommendation => "Add Recommendation",
                };
                self.draw_book_form(frame, area, title, form)
            }
            Mode::EditingNotes(form) => self.draw_text_form(frame, area, "Notes", "Notes", form),
            Mode::ScanPath(form) => {
                self.draw_text_form(frame, area, "Scan Cover", "Image file", form)
            }
            Mode::ScanResults(results) => self.draw_scan_results(frame, area, results),
            Mode::Searching(form) => self.draw_search_bar(frame, area, form),
            Mode::Normal => {}
        }
    }

    fn draw_loading(&self, frame: &mut Frame, area: Rect, title: &str) {
        let message = Paragraph::new("Loading...")
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL).title(title.to_string()));
        frame.render_widget(message, area);
    }

    fn draw_categories(&self, frame: &mut Frame, area: Rect, list: &CategoryListScreen) {
        if list.phase() == Phase::Loading {
            self.draw_loading(frame, area, "Categories");
            return;
        }

        let selecting = list.selection().is_active();
        let title = if selecting {
            format!("Categories - {} selected", list.selection().len())
        } else {
            "Categories".to_string()
        };

        let items: Vec<ListItem> = list
            .categories()
            .iter()
            .map(|category| {
                let mut spans = Vec::new();
                if selecting {
                    let mark = if list.selection().contains(&category.name) {
                        "[x] "
                    } else {
                        "[ ] "
                    };
                    spans.push(Span::raw(mark));
                }
                if category.is_pinned {
                    spans.push(Span::styled("^ ", Style::default().fg(Color::Magenta)));
                }
                spans.push(Span::raw(category.name.clone()));
                spans.push(Span::styled(
                    format!("  ({})", list.book_count(&category.name)),
                    Style::default().fg(Color::DarkGray),
                ));
                ListItem::new(Line::from(spans))
            })
            .collect();

        let widget = List::new(items)
            .block(Block::default().borders(Borders::ALL).title(title))
            .highlight_style(
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            )
            .highlight_symbol("> ");
        let mut state = ListState::default();
        if !list.categories().is_empty() {
            state.select(Some(list.cursor()));
        }
        frame.render_stateful_widget(widget, area, &mut state);
    }

    fn draw_book_list(&self, frame: &mut Frame, area: Rect, title: &str, phase: Phase, list: &BookList) {
        if phase == Phase::Loading {
            self.draw_loading(frame, area, title);
            return;
        }

        let mut title = title.to_string();
        if let Some(query) = list.query() {
            title.push_str(&format!(" - \"{query}\""));
        }
        if list.selection().is_active() {
            title.push_str(&format!(" - {} selected", list.selection().len()));
        }

        let books = list.visible();
        if books.is_empty() {
            let text = if list.all().is_empty() {
                "No books yet. Press '+' to add one or 's' to scan a cover."
            } else {
                "No books match the search."
            };
            let message = Paragraph::new(text)
                .alignment(Alignment::Center)
                .block(Block::default().borders(Borders::ALL).title(title));
            frame.render_widget(message, area);
            return;
        }

        let selecting = list.selection().is_active();
        let items: Vec<ListItem> = books
            .iter()
            .map(|book| {
                let mut spans = Vec::new();
                if selecting {
                    let mark = if list.selection().contains(&book.id) {
                        "[x] "
                    } else {
                        "[ ] "
                    };
                    spans.push(Span::raw(mark));
                }
                let heart = if book.is_favorite { "* " } else { "  " };
                spans.push(Span::styled(heart, Style::default().fg(Color::Red)));
                spans.push(Span::raw(book.display_title()));
                spans.push(Span::styled(
                    format!("  {}", rating_stars(book.rating)),
                    Style::default().fg(Color::Yellow),
                ));
                if let Some(category) = &book.category {
                    spans.push(Span::styled(
                        format!("  [{category}]"),
                        Style::default().fg(Color::DarkGray),
                    ));
                }
                ListItem::new(Line::from(spans))
            })
            .collect();

        let widget = List::new(items)
            .block(Block::default().borders(Borders::ALL).title(title))
            .highlight_style(Style::default().add_modifier(Modifier::BOLD | Modifier::REVERSED))
            .highlight_symbol("> ");
        let mut state = ListState::default();
        state.select(Some(list.cursor()));
        frame.render_stateful_widget(widget, area, &mut state);
    }

    fn draw_book(&self, frame: &mut Frame, area: Rect, screen: &BookScreen) {
        let Some(book) = screen.book() else {
            self.draw_loading(frame, area, "Book");
            return;
        };

        let label = Style::default().fg(Color::DarkGray);
        let field = |name: &str, value: String| {
            Line::from(vec![Span::styled(format!("{name:<11}"), label), Span::raw(value)])
        };
        let or_dash = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".to_string());

        let mut lines = vec![
            Line::from(Span::styled(
                book.title.clone(),
                Style::default().add_modifier(Modifier::BOLD),
            )),
            Line::from(book.author.clone()),
            Line::from(""),
            field("Rating", rating_stars(book.rating)),
            field(
                "Favorite",
                if book.is_favorite { "yes" } else { "no" }.to_string(),
            ),
            field("Held in", screen.held_in().join(", ")),
            field("ISBN", or_dash(&book.isbn)),
            field("Publisher", or_dash(&book.publisher)),
            field("Published", or_dash(&book.published_date)),
            field(
                "Pages",
                book.page_count
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
            field("Genres", book.genres.join(", ")),
            field(
                "Source",
                if book.is_custom_book { "entered by hand" } else { "scanned" }.to_string(),
            ),
        ];
        for (heading, text) in [
            ("Notes", &book.notes),
            ("Summary", &book.summary),
            ("Excerpt", &book.excerpt),
        ] {
            if !text.trim().is_empty() {
                lines.push(Line::from(""));
                lines.push(Line::from(Span::styled(heading, label)));
                lines.push(Line::from(text.clone()));
            }
        }

        let paragraph = Paragraph::new(lines)
            .block(Block::default().borders(Borders::ALL).title("Book"))
            .wrap(Wrap { trim: false });
        frame.render_widget(paragraph, area);
    }

    fn draw_recommendations(&self, frame: &mut Frame, area: Rect, screen: &RecommendationScreen) {
        let title = format!("Recommendations - {}", screen.view().label());
        if screen.phase() == Phase::Loading {
            self.draw_loading(frame, area, &title);
            return;
        }
        if screen.items().is_empty() {
            let message = Paragraph::new("No recommendations. Press '+' to add one.")
                .alignment(Alignment::Center)
                .block(Block::default().borders(Borders::ALL).title(title));
            frame.render_widget(message, area);
            return;
        }

        let selecting = screen.selection().is_active();
        let items: Vec<ListItem> = screen
            .items()
            .iter()
            .map(|item| {
                let mut spans = Vec::new();
                if selecting {
                    let mark = if screen.selection().contains(&item.id) {
                        "[x] "
                    } else {
                        "[ ] "
                    };
                    spans.push(Span::raw(mark));
                }
                spans.push(Span::raw(item.display_title()));
                spans.push(Span::styled(
                    format!("  {}", rating_stars(item.rating)),
                    Style::default().fg(Color::Yellow),
                ));
                if item.add_to_library {
                    spans.push(Span::styled("  in library", Style::default().fg(Color::Green)));
                }
                ListItem::new(Line::from(spans))
            })
            .collect();

        let widget = List::new(items)
            .block(Block::default().borders(Borders::ALL).title(title))
            .highlight_style(Style::default().add_modifier(Modifier::BOLD | Modifier::REVERSED))
            .highlight_symbol("> ");
        let mut state = ListState::default();
        state.select(Some(screen.cursor()));
        frame.render_stateful_widget(widget, area, &mut state);
    }

    fn draw_footer(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default().borders(Borders::TOP);
        frame.render_widget(block.clone(), area);
        let inner = block.inner(area);

        let status_line = if let Some(status) = &self.status {
            Line::from(vec![Span::styled(status.text.clone(), status.kind.style())])
        } else {
            Line::from("")
        };

        let instructions = self.footer_instructions();

        let paragraph = Paragraph::new(vec![status_line, instructions]).wrap(Wrap { trim: true });
        frame.render_widget(paragraph, inner);
    }

    fn footer_instructions(&self) -> Line<'static> {
        match (&self.screen, &self.mode) {
            (_, Mode::PickingTargets(_)) => key_hints(&[
                ("Up/Down", "Navigate"),
                ("Space", "Toggle"),
                ("Enter", "Apply"),
                ("Esc", "Cancel"),
            ]),
            (_, Mode::ScanResults(_)) => key_hints(&[
                ("Up/Down", "Navigate"),
                ("Enter", "Add to category"),
                ("Esc", "Discard"),
            ]),
            (_, Mode::Searching(_)) => key_hints(&[("Enter", "Keep filter"), ("Esc", "Clear")]),
            (Screen::Categories(list), _) if list.selection().is_active() => key_hints(&[
                ("Space", "Toggle"),
                ("e", "Rename"),
                ("-", "Delete"),
                ("m", "Merge"),
                ("Esc", "Clear selection"),
            ]),
            (Screen::Categories(_), _) => key_hints(&[
                ("Up/Down", "Select"),
                ("Enter", "Open"),
                ("Space", "Mark"),
                ("+", "New"),
                ("e", "Rename"),
                ("-", "Delete"),
                ("p", "Pin"),
                ("m", "Merge"),
                ("f", "Favorites"),
                ("r", "Recommendations"),
                ("q", "Quit"),
            ]),
            (Screen::Category(_), _) => key_hints(&[
                ("Enter", "Open"),
                ("Space", "Mark"),
                ("f", "Search"),
                ("v", "Favorites only"),
                ("*", "Favorite"),
                ("+", "Add"),
                ("s", "Scan"),
                ("a", "Add to"),
                ("m", "Move"),
                ("-", "Delete"),
                ("Esc", "Back"),
            ]),
            (Screen::Book { .. }, _) => key_hints(&[
                ("*", "Favorite"),
                ("1-5", "Rate"),
                ("0", "Clear rating"),
                ("n", "Notes"),
                ("e", "Edit"),
                ("o", "Open cover"),
                ("Esc", "Back"),
            ]),
            (Screen::Favorites(_), _) => key_hints(&[
                ("Enter", "Open"),
                ("Space", "Mark"),
                ("f", "Search"),
                ("*", "Unfavorite"),
                ("a", "Add to"),
                ("-", "Delete"),
                ("Esc", "Back"),
            ]),
            (Screen::Recommendations(_), _) => key_hints(&[
                ("Space", "Mark"),
                ("+", "Add"),
                ("i", "Import"),
                ("-", "Delete"),
                ("t", "Toggle view"),
                ("Esc", "Back"),
            ]),
        }
    }

    fn draw_text_form(&self, frame: &mut Frame, area: Rect, title: &str, label: &str, form: &TextForm) {
        let popup_area = centered_rect(60, 30, area);
        frame.render_widget(Clear, popup_area);

        let block = Block::default().title(title.to_string()).borders(Borders::ALL);
        frame.render_widget(block.clone(), popup_area);
        let inner = block.inner(popup_area);

        let mut lines = vec![form.build_line(label, "<required>"), Line::from("")];
        if let Some(error) = &form.error {
            lines.push(Line::from(Span::styled(
                error.clone(),
                Style::default().fg(Color::Red),
            )));
        } else {
            lines.push(Line::from(Span::styled(
                "Enter to save - Esc to cancel",
                Style::default().fg(Color::Gray),
            )));
        }

        let paragraph = Paragraph::new(lines).wrap(Wrap { trim: true });
        frame.render_widget(paragraph, inner);

        let prefix = format!("{label}: ").len() as u16;
        frame.set_cursor_position((inner.x + prefix + form.value_len() as u16, inner.y));
    }

    fn draw_book_form(&self, frame: &mut Frame, area: Rect, title: &str, form: &BookForm) {
        let popup_area = centered_rect(70, 60, area);
        frame.render_widget(Clear, popup_area);

        let block = Block::default().title(title.to_string()).borders(Borders::ALL);
        frame.render_widget(block.clone(), popup_area);
        let inner = block.inner(popup_area);

        let mut lines: Vec<Line> = BookField::ALL
            .iter()
            .map(|field| form.build_line(*field))
            .collect();
        lines.push(Line::from(""));
        if let Some(error) = &form.error {
            lines.push(Line::from(Span::styled(
                error.clone(),
                Style::default().fg(Color::Red),
            )));
        } else {
            lines.push(Line::from(Span::styled(
                "Enter to save - Tab to switch - Esc to cancel",
                Style::default().fg(Color::Gray),
            )));
        }

        let paragraph = Paragraph::new(lines);
        frame.render_widget(paragraph, inner);

        let row = BookField::ALL
            .iter()
            .position(|field| *field == form.active)
            .unwrap_or(0) as u16;
        let prefix = format!("{}: ", form.active.label()).len() as u16;
        frame.set_cursor_position((
            inner.x + prefix + form.value_len(form.active) as u16,
            inner.y + row,
        ));
    }

    fn draw_picker(&self, frame: &mut Frame, area: Rect, picker: &TargetPicker) {
        let popup_area = centered_rect(50, 60, area);
        frame.render_widget(Clear, popup_area);

        let title = if picker.single {
            "Merge Into"
        } else {
            "Choose Categories"
        };
        let block = Block::default().title(title).borders(Borders::ALL);
        let inner = block.inner(popup_area);
        frame.render_widget(block, popup_area);

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(1)])
            .split(inner);

        let items: Vec<ListItem> = picker
            .options
            .iter()
            .map(|name| {
                let mark = if picker.is_chosen(name) { "[x] " } else { "[ ] " };
                ListItem::new(format!("{mark}{name}"))
            })
            .collect();
        let widget = List::new(items)
            .highlight_style(Style::default().fg(Color::Yellow))
            .highlight_symbol("> ");
        let mut state = ListState::default();
        if !picker.options.is_empty() {
            state.select(Some(picker.cursor));
        }
        frame.render_stateful_widget(widget, chunks[0], &mut state);

        let hint = match &picker.error {
            Some(error) => Line::from(Span::styled(error.clone(), Style::default().fg(Color::Red))),
            None => Line::from(Span::styled(
                format!("{} chosen", picker.chosen.len()),
                Style::default().fg(Color::Gray),
            )),
        };
        frame.render_widget(Paragraph::new(hint), chunks[1]);
    }

    fn draw_confirm_delete(&self, frame: &mut Frame, area: Rect, confirm: &ConfirmDelete) {
        let popup_area = centered_rect(60, 30, area);
        frame.render_widget(Clear, popup_area);

        let block = Block::default().title("Confirm Delete").borders(Borders::ALL);
        frame.render_widget(block.clone(), popup_area);
        let inner = block.inner(popup_area);

        let mut lines = vec![Line::from(confirm.headline.clone())];
        if let Some(detail) = &confirm.detail {
            lines.push(Line::from(detail.clone()));
        }
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            "Press Y to confirm or N / Esc to cancel.",
            Style::default().fg(Color::Gray),
        )));

        let paragraph = Paragraph::new(lines)
            .alignment(Alignment::Left)
            .wrap(Wrap { trim: true });
        frame.render_widget(paragraph, inner);
    }

    fn draw_scan_results(&self, frame: &mut Frame, area: Rect, results: &ScanResults) {
        let popup_area = centered_rect(70, 50, area);
        frame.render_widget(Clear, popup_area);

        let items: Vec<ListItem> = results
            .candidates
            .iter()
            .map(|candidate| {
                let mut lines = vec![Line::from(Span::styled(
                    candidate.display_title(),
                    Style::default().add_modifier(Modifier::BOLD),
                ))];
                let mut detail = Vec::new();
                if !candidate.isbn.trim().is_empty() {
                    detail.push(format!("ISBN {}", candidate.isbn.trim()));
                }
                if !candidate.published_date.trim().is_empty() {
                    detail.push(candidate.published_date.trim().to_string());
                }
                if !candidate.genres.trim().is_empty() {
                    detail.push(candidate.genres.trim().to_string());
                }
                lines.push(Line::from(Span::styled(
                    detail.join(" - "),
                    Style::default().fg(Color::DarkGray),
                )));
                ListItem::new(lines)
            })
            .collect();

        let widget = List::new(items)
            .block(Block::default().title("Scan Results").borders(Borders::ALL))
            .highlight_style(Style::default().fg(Color::Yellow))
            .highlight_symbol("> ");
        let mut state = ListState::default();
        state.select(Some(results.cursor));
        frame.render_stateful_widget(widget, popup_area, &mut state);
    }

    fn draw_search_bar(&self, frame: &mut Frame, area: Rect, form: &TextForm) {
        let height = 3u16.min(area.height);
        let popup_area = Rect {
            x: area.x,
            y: area.y,
            width: area.width,
            height,
        };
        frame.render_widget(Clear, popup_area);

        let block = Block::default().borders(Borders::ALL).title("Search");
        let paragraph = Paragraph::new(Span::raw(format!("Search: {}", form.value)))
            .block(block.clone())
            .wrap(Wrap { trim: true });
        frame.render_widget(paragraph, popup_area);

        let inner = block.inner(popup_area);
        let cursor_x = inner.x + "Search: ".len() as u16 + form.value_len() as u16;
        frame.set_cursor_position((cursor_x, inner.y));
    }
}

fn delete_books_prompt(list: &BookList) -> ConfirmDelete {
    let targets = list.targets();
    let headline = match targets.as_slice() {
        [id] => {
            let title = list
                .all()
                .iter()
                .find(|book| &book.id == id)
                .map(|book| book.display_title())
                .unwrap_or_else(|| "this book".to_string());
            format!("Delete {title}?")
        }
        many => format!("Delete {} books?", many.len()),
    };
    ConfirmDelete {
        headline,
        detail: Some("Copies held in other categories are kept.".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanConfig;
    use crate::library::test_support::{add_book, library_with};

    fn app_with(categories: &[&str]) -> App {
        let library = library_with(categories);
        let scanner = CoverScanner::new(&ScanConfig::default()).unwrap();
        App::new(library, scanner).unwrap()
    }

    fn type_text(app: &mut App, text: &str) {
        for ch in text.chars() {
            app.handle_key(KeyCode::Char(ch)).unwrap();
        }
    }

    fn category_names_of(app: &App) -> Vec<String> {
        category_names(&app.library).unwrap()
    }

    #[test]
    fn create_category_through_keys() {
        let mut app = app_with(&["Fiction", "Non-Fiction"]);
        app.handle_key(KeyCode::Char('+')).unwrap();
        assert!(matches!(app.mode, Mode::Naming(_)));
        type_text(&mut app, "Fiction");
        app.handle_key(KeyCode::Enter).unwrap();

        assert!(matches!(app.mode, Mode::Normal));
        assert_eq!(
            category_names_of(&app),
            vec!["Fiction", "Fiction (1)", "Non-Fiction"]
        );
    }

    #[test]
    fn refused_delete_keeps_dialog_and_data() {
        let mut app = app_with(&["Books"]);
        app.handle_key(KeyCode::Char('-')).unwrap();
        assert!(matches!(app.mode, Mode::ConfirmDelete(_)));
        app.handle_key(KeyCode::Char('y')).unwrap();

        assert!(matches!(app.mode, Mode::ConfirmDelete(_)));
        assert_eq!(
            app.status.as_ref().map(|s| s.text.as_str()),
            Some("Cannot delete all categories.")
        );
        app.handle_key(KeyCode::Esc).unwrap();
        assert!(matches!(app.mode, Mode::Normal));
        assert_eq!(category_names_of(&app), vec!["Books"]);
    }

    #[test]
    fn open_category_toggle_favorite_and_return() {
        let mut app = app_with(&["Books"]);
        add_book(&app.library, "Books", "Dune", None);
        app.handle_key(KeyCode::Enter).unwrap();
        assert!(matches!(app.screen, Screen::Category(_)));

        app.handle_key(KeyCode::Char('*')).unwrap();
        assert_eq!(app.library.favorite_books().unwrap().len(), 1);

        app.handle_key(KeyCode::Enter).unwrap();
        assert!(matches!(app.screen, Screen::Book { .. }));
        app.handle_key(KeyCode::Char('4')).unwrap();
        let Screen::Book { screen, .. } = &app.screen else {
            panic!("expected book screen");
        };
        assert_eq!(screen.book().unwrap().rating, Some(4));

        app.handle_key(KeyCode::Esc).unwrap();
        assert!(matches!(app.screen, Screen::Category(_)));
        app.handle_key(KeyCode::Esc).unwrap();
        assert!(matches!(app.screen, Screen::Categories(_)));
        assert!(app.handle_key(KeyCode::Esc).unwrap());
    }

    #[test]
    fn selection_blocks_open() {
        let mut app = app_with(&["A", "B"]);
        app.handle_key(KeyCode::Char(' ')).unwrap();
        app.handle_key(KeyCode::Enter).unwrap();
        assert!(matches!(app.screen, Screen::Categories(_)));
        assert!(matches!(
            app.status.as_ref().map(|s| &s.kind),
            Some(StatusKind::Error)
        ));
    }

    #[test]
    fn search_filters_live_and_esc_clears() {
        let mut app = app_with(&["Books"]);
        add_book(&app.library, "Books", "Dune", None);
        add_book(&app.library, "Books", "Emma", None);
        app.handle_key(KeyCode::Enter).unwrap();
        app.handle_key(KeyCode::Char('f')).unwrap();
        type_text(&mut app, "em");
        assert_eq!(app.visible_book_count(), 1);
        app.handle_key(KeyCode::Esc).unwrap();
        assert_eq!(app.visible_book_count(), 2);
    }

    #[test]
    fn add_custom_book_via_form() {
        let mut app = app_with(&["Books"]);
        app.handle_key(KeyCode::Enter).unwrap();
        app.handle_key(KeyCode::Char('+')).unwrap();
        app.handle_key(KeyCode::Enter).unwrap();
        let Mode::EditingBook { form, .. } = &app.mode else {
            panic!("form should stay open");
        };
        assert_eq!(form.error.as_deref(), Some("Book title is required."));

        type_text(&mut app, "Notebook");
        app.handle_key(KeyCode::Enter).unwrap();
        assert!(matches!(app.mode, Mode::Normal));
        let books = app.library.books_in_category("Books", Default::default()).unwrap();
        assert_eq!(books.len(), 1);
        assert!(books[0].is_custom_book);
    }
}
