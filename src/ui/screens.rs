//! Per-screen state driven by the library. Nothing here touches the
//! terminal, so every rule about selection, pending confirmations, and
//! refresh-after-mutation is testable on its own.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use anyhow::{bail, Result};

use crate::library::{Deleted, Library, Renamed};
use crate::models::{Book, BookFilter, Category, NewBook, RecommendedBook};
use crate::scan::ScanCandidate;

/// Whether a screen has been populated from the library yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Loading,
    Ready,
}

/// Keys the user has marked. A non-empty selection puts the screen into
/// selection mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    keys: BTreeSet<String>,
}

impl Selection {
    /// Flip membership of `key`; returns whether it is now selected.
    pub fn toggle(&mut self, key: &str) -> bool {
        if self.keys.remove(key) {
            false
        } else {
            self.keys.insert(key.to_string());
            true
        }
    }

    pub fn is_active(&self) -> bool {
        !self.keys.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &BTreeSet<String> {
        &self.keys
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }

    /// Drop keys that no longer exist after a reload.
    fn retain_existing<'a>(&mut self, existing: impl IntoIterator<Item = &'a str>) {
        let existing: BTreeSet<&str> = existing.into_iter().collect();
        self.keys.retain(|key| existing.contains(key.as_str()));
    }
}

/// Bulk actions that wait for the user to confirm (or fill in) a dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pending {
    CreateCategory,
    RenameCategories,
    DeleteCategories,
    MergeCategories,
    AddBooks,
    MoveBooks,
    DeleteBooks,
    ImportRecommendations,
    DeleteRecommendations,
}

impl fmt::Display for Pending {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Pending::CreateCategory => "Create category",
            Pending::RenameCategories => "Rename",
            Pending::DeleteCategories => "Delete categories",
            Pending::MergeCategories => "Merge",
            Pending::AddBooks => "Add to categories",
            Pending::MoveBooks => "Move to categories",
            Pending::DeleteBooks => "Delete books",
            Pending::ImportRecommendations => "Import",
            Pending::DeleteRecommendations => "Delete recommendations",
        };
        f.write_str(label)
    }
}

/// Holds at most one pending action per screen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Confirmation {
    pending: Option<Pending>,
}

impl Confirmation {
    fn begin(&mut self, phase: Phase, action: Pending) -> Result<()> {
        if phase == Phase::Loading {
            bail!("Still loading.");
        }
        if let Some(current) = self.pending {
            bail!("{current} is waiting for confirmation.");
        }
        self.pending = Some(action);
        Ok(())
    }

    fn require(&self, action: Pending) -> Result<()> {
        match self.pending {
            Some(current) if current == action => Ok(()),
            _ => bail!("Nothing to confirm."),
        }
    }

    fn resolve(&mut self) {
        self.pending = None;
    }

    pub fn current(&self) -> Option<Pending> {
        self.pending
    }
}

fn clamp_cursor(cursor: usize, len: usize) -> usize {
    if len == 0 {
        0
    } else {
        cursor.min(len - 1)
    }
}

fn offset_cursor(cursor: usize, len: usize, offset: isize) -> usize {
    if len == 0 {
        return 0;
    }
    let target = cursor as isize + offset;
    target.clamp(0, len as isize - 1) as usize
}

/// Category overview with per-category book counts.
#[derive(Debug)]
pub struct CategoryListScreen {
    phase: Phase,
    categories: Vec<Category>,
    counts: HashMap<String, i64>,
    cursor: usize,
    selection: Selection,
    confirmation: Confirmation,
}

impl Default for CategoryListScreen {
    fn default() -> Self {
        Self::new()
    }
}

impl CategoryListScreen {
    pub fn new() -> Self {
        Self {
            phase: Phase::Loading,
            categories: Vec::new(),
            counts: HashMap::new(),
            cursor: 0,
            selection: Selection::default(),
            confirmation: Confirmation::default(),
        }
    }

    /// Refresh from the library. On failure the previous contents stay.
    pub fn load(&mut self, library: &Library) -> Result<()> {
        let categories = library.categories()?;
        let mut counts = HashMap::with_capacity(categories.len());
        for category in &categories {
            counts.insert(category.name.clone(), library.book_count(&category.name)?);
        }
        self.categories = categories;
        self.counts = counts;
        self.selection
            .retain_existing(self.categories.iter().map(|c| c.name.as_str()));
        self.cursor = clamp_cursor(self.cursor, self.categories.len());
        self.phase = Phase::Ready;
        Ok(())
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn book_count(&self, name: &str) -> i64 {
        self.counts.get(name).copied().unwrap_or(0)
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn move_cursor(&mut self, offset: isize) {
        self.cursor = offset_cursor(self.cursor, self.categories.len(), offset);
    }

    pub fn current(&self) -> Option<&Category> {
        self.categories.get(self.cursor)
    }

    /// Put the cursor on `name` when it is listed.
    pub fn focus(&mut self, name: &str) {
        if let Some(idx) = self.categories.iter().position(|c| c.name == name) {
            self.cursor = idx;
        }
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    /// Toggle the category under the cursor; returns whether it is selected.
    pub fn toggle_selected(&mut self) -> Option<bool> {
        let name = self.current()?.name.clone();
        Some(self.selection.toggle(&name))
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    /// Opening a category is only possible outside selection mode.
    pub fn can_open(&self) -> bool {
        self.phase == Phase::Ready && !self.selection.is_active()
    }

    /// What a bulk action applies to: the selection, or the category under
    /// the cursor when nothing is selected.
    pub fn targets(&self) -> BTreeSet<String> {
        if self.selection.is_active() {
            self.selection.keys().clone()
        } else {
            self.current()
                .map(|c| BTreeSet::from([c.name.clone()]))
                .unwrap_or_default()
        }
    }

    pub fn pending(&self) -> Option<Pending> {
        self.confirmation.current()
    }

    pub fn begin(&mut self, action: Pending) -> Result<()> {
        let needs_targets = !matches!(action, Pending::CreateCategory);
        if needs_targets && self.targets().is_empty() {
            bail!("No category selected.");
        }
        self.confirmation.begin(self.phase, action)
    }

    pub fn cancel(&mut self) -> Option<Pending> {
        self.confirmation.pending.take()
    }

    pub fn confirm_create(&mut self, library: &Library, name: &str) -> Result<Category> {
        self.confirmation.require(Pending::CreateCategory)?;
        let category = library.create_category(name)?;
        self.confirmation.resolve();
        self.load(library)?;
        self.focus(&category.name);
        Ok(category)
    }

    pub fn confirm_rename(&mut self, library: &Library, new_name: &str) -> Result<Vec<Renamed>> {
        self.confirmation.require(Pending::RenameCategories)?;
        let renamed = library.rename_categories(&self.targets(), new_name)?;
        self.confirmation.resolve();
        self.selection.clear();
        self.load(library)?;
        if let Some(first) = renamed.first() {
            self.focus(&first.to);
        }
        Ok(renamed)
    }

    pub fn confirm_delete(&mut self, library: &Library) -> Result<Deleted> {
        self.confirmation.require(Pending::DeleteCategories)?;
        let deleted = library.delete_categories(&self.targets())?;
        self.confirmation.resolve();
        self.selection.clear();
        self.load(library)?;
        Ok(deleted)
    }

    pub fn confirm_merge(&mut self, library: &Library, target: &str) -> Result<usize> {
        self.confirmation.require(Pending::MergeCategories)?;
        let moved = library.merge_categories(&self.targets(), target)?;
        self.confirmation.resolve();
        self.selection.clear();
        self.load(library)?;
        self.focus(target);
        Ok(moved)
    }

    /// Pin or unpin the category under the cursor and keep it focused.
    pub fn toggle_pin(&mut self, library: &Library) -> Result<Category> {
        let Some(name) = self.current().map(|c| c.name.clone()) else {
            bail!("No category selected.");
        };
        let category = library.toggle_pin(&name)?;
        self.load(library)?;
        self.focus(&name);
        Ok(category)
    }
}

/// Case-insensitive match on title or author. A blank query matches all.
pub fn matches_query(book: &Book, query: &str) -> bool {
    let query = query.trim().to_lowercase();
    query.is_empty()
        || book.title.to_lowercase().contains(&query)
        || book.author.to_lowercase().contains(&query)
}

/// Cursor, text filter, and selection over a list of books.
#[derive(Debug, Clone, Default)]
pub struct BookList {
    books: Vec<Book>,
    query: Option<String>,
    visible: Vec<usize>,
    cursor: usize,
    selection: Selection,
}

impl BookList {
    pub fn set_books(&mut self, books: Vec<Book>) {
        self.books = books;
        self.selection
            .retain_existing(self.books.iter().map(|b| b.id.as_str()));
        self.apply_query();
    }

    pub fn set_query(&mut self, query: Option<String>) {
        self.query = query.filter(|q| !q.trim().is_empty());
        self.apply_query();
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    fn apply_query(&mut self) {
        let query = self.query.clone().unwrap_or_default();
        self.visible = self
            .books
            .iter()
            .enumerate()
            .filter(|(_, book)| matches_query(book, &query))
            .map(|(idx, _)| idx)
            .collect();
        self.cursor = clamp_cursor(self.cursor, self.visible.len());
    }

    pub fn all(&self) -> &[Book] {
        &self.books
    }

    pub fn visible(&self) -> Vec<&Book> {
        self.visible.iter().map(|&idx| &self.books[idx]).collect()
    }

    pub fn len(&self) -> usize {
        self.visible.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visible.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn move_cursor(&mut self, offset: isize) {
        self.cursor = offset_cursor(self.cursor, self.visible.len(), offset);
    }

    pub fn current(&self) -> Option<&Book> {
        self.visible
            .get(self.cursor)
            .and_then(|&idx| self.books.get(idx))
    }

    pub fn focus(&mut self, id: &str) {
        if let Some(pos) = self.visible.iter().position(|&idx| self.books[idx].id == id) {
            self.cursor = pos;
        }
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn toggle_selected(&mut self) -> Option<bool> {
        let id = self.current()?.id.clone();
        Some(self.selection.toggle(&id))
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    /// Selected ids, or the book under the cursor when nothing is selected.
    pub fn targets(&self) -> Vec<String> {
        if self.selection.is_active() {
            self.selection.keys().iter().cloned().collect()
        } else {
            self.current().map(|b| vec![b.id.clone()]).unwrap_or_default()
        }
    }
}

/// Books owned by one category.
#[derive(Debug)]
pub struct CategoryScreen {
    name: String,
    phase: Phase,
    filter: BookFilter,
    list: BookList,
    confirmation: Confirmation,
}

impl CategoryScreen {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phase: Phase::Loading,
            filter: BookFilter::default(),
            list: BookList::default(),
            confirmation: Confirmation::default(),
        }
    }

    pub fn load(&mut self, library: &Library) -> Result<()> {
        let books = library.books_in_category(&self.name, self.filter)?;
        self.list.set_books(books);
        self.phase = Phase::Ready;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn list(&self) -> &BookList {
        &self.list
    }

    pub fn list_mut(&mut self) -> &mut BookList {
        &mut self.list
    }

    pub fn filter(&self) -> BookFilter {
        self.filter
    }

    /// Cycle the favorites-only narrowing and reload.
    pub fn toggle_favorites_only(&mut self, library: &Library) -> Result<bool> {
        self.filter.favorite = match self.filter.favorite {
            Some(true) => None,
            _ => Some(true),
        };
        self.load(library)?;
        Ok(self.filter.favorite == Some(true))
    }

    pub fn can_open(&self) -> bool {
        self.phase == Phase::Ready && !self.list.selection().is_active()
    }

    pub fn pending(&self) -> Option<Pending> {
        self.confirmation.current()
    }

    pub fn begin(&mut self, action: Pending) -> Result<()> {
        if self.list.targets().is_empty() {
            bail!("No book selected.");
        }
        self.confirmation.begin(self.phase, action)
    }

    pub fn cancel(&mut self) -> Option<Pending> {
        self.confirmation.pending.take()
    }

    pub fn confirm_add(&mut self, library: &Library, targets: &BTreeSet<String>) -> Result<usize> {
        self.confirmation.require(Pending::AddBooks)?;
        let added = library.add_books_to_categories(&self.list.targets(), targets)?;
        self.confirmation.resolve();
        self.list.clear_selection();
        self.load(library)?;
        Ok(added)
    }

    pub fn confirm_move(&mut self, library: &Library, targets: &BTreeSet<String>) -> Result<usize> {
        self.confirmation.require(Pending::MoveBooks)?;
        let moved = library.move_books_to_categories(&self.list.targets(), targets)?;
        self.confirmation.resolve();
        self.list.clear_selection();
        self.load(library)?;
        Ok(moved)
    }

    pub fn confirm_delete(&mut self, library: &Library) -> Result<usize> {
        self.confirmation.require(Pending::DeleteBooks)?;
        let deleted = library.delete_books(&self.list.targets())?;
        self.confirmation.resolve();
        self.list.clear_selection();
        self.load(library)?;
        Ok(deleted)
    }

    pub fn toggle_favorite(&mut self, library: &Library) -> Result<Book> {
        let Some(id) = self.list.current().map(|b| b.id.clone()) else {
            bail!("No book selected.");
        };
        let book = library.toggle_favorite(&id)?;
        self.load(library)?;
        self.list.focus(&id);
        Ok(book)
    }

    pub fn add_custom(&mut self, library: &Library, book: NewBook) -> Result<Book> {
        let created = library.add_custom_book(&self.name, book)?;
        self.load(library)?;
        self.list.focus(&created.id);
        Ok(created)
    }

    pub fn add_scanned(&mut self, library: &Library, candidate: &ScanCandidate) -> Result<Book> {
        let created = library.add_scanned_book(&self.name, candidate)?;
        self.load(library)?;
        self.list.focus(&created.id);
        Ok(created)
    }
}

/// Every favorite book across categories.
#[derive(Debug)]
pub struct FavoritesScreen {
    phase: Phase,
    list: BookList,
    confirmation: Confirmation,
}

impl Default for FavoritesScreen {
    fn default() -> Self {
        Self::new()
    }
}

impl FavoritesScreen {
    pub fn new() -> Self {
        Self {
            phase: Phase::Loading,
            list: BookList::default(),
            confirmation: Confirmation::default(),
        }
    }

    pub fn load(&mut self, library: &Library) -> Result<()> {
        self.list.set_books(library.favorite_books()?);
        self.phase = Phase::Ready;
        Ok(())
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn list(&self) -> &BookList {
        &self.list
    }

    pub fn list_mut(&mut self) -> &mut BookList {
        &mut self.list
    }

    pub fn can_open(&self) -> bool {
        self.phase == Phase::Ready && !self.list.selection().is_active()
    }

    pub fn pending(&self) -> Option<Pending> {
        self.confirmation.current()
    }

    pub fn begin(&mut self, action: Pending) -> Result<()> {
        if !matches!(action, Pending::AddBooks | Pending::DeleteBooks) {
            bail!("{action} is not available here.");
        }
        if self.list.targets().is_empty() {
            bail!("No book selected.");
        }
        self.confirmation.begin(self.phase, action)
    }

    pub fn cancel(&mut self) -> Option<Pending> {
        self.confirmation.pending.take()
    }

    pub fn confirm_add(&mut self, library: &Library, targets: &BTreeSet<String>) -> Result<usize> {
        self.confirmation.require(Pending::AddBooks)?;
        let added = library.add_books_to_categories(&self.list.targets(), targets)?;
        self.confirmation.resolve();
        self.list.clear_selection();
        self.load(library)?;
        Ok(added)
    }

    pub fn confirm_delete(&mut self, library: &Library) -> Result<usize> {
        self.confirmation.require(Pending::DeleteBooks)?;
        let deleted = library.delete_books(&self.list.targets())?;
        self.confirmation.resolve();
        self.list.clear_selection();
        self.load(library)?;
        Ok(deleted)
    }

    /// Unfavoriting drops the book from this list on reload.
    pub fn toggle_favorite(&mut self, library: &Library) -> Result<Book> {
        let Some(id) = self.list.current().map(|b| b.id.clone()) else {
            bail!("No book selected.");
        };
        let book = library.toggle_favorite(&id)?;
        self.load(library)?;
        Ok(book)
    }
}

/// Detail view for one book.
#[derive(Debug)]
pub struct BookScreen {
    id: String,
    phase: Phase,
    book: Option<Book>,
    held_in: Vec<String>,
}

impl BookScreen {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            phase: Phase::Loading,
            book: None,
            held_in: Vec::new(),
        }
    }

    pub fn load(&mut self, library: &Library) -> Result<()> {
        let book = library.book(&self.id)?;
        self.held_in = library.categories_holding(&book.key())?;
        self.book = Some(book);
        self.phase = Phase::Ready;
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn book(&self) -> Option<&Book> {
        self.book.as_ref()
    }

    /// Every category holding the same work, this one included.
    pub fn held_in(&self) -> &[String] {
        &self.held_in
    }

    pub fn toggle_favorite(&mut self, library: &Library) -> Result<Book> {
        let book = library.toggle_favorite(&self.id)?;
        self.load(library)?;
        Ok(book)
    }

    pub fn set_rating(&mut self, library: &Library, rating: Option<u8>) -> Result<Book> {
        let book = library.set_rating(&self.id, rating)?;
        self.load(library)?;
        Ok(book)
    }

    pub fn set_notes(&mut self, library: &Library, notes: &str) -> Result<Book> {
        let book = library.set_notes(&self.id, notes)?;
        self.load(library)?;
        Ok(book)
    }

    pub fn save(&mut self, library: &Library, book: &Book) -> Result<Book> {
        let saved = library.update_book(book)?;
        self.load(library)?;
        Ok(saved)
    }

    /// Cover image URL, when the book has one.
    pub fn cover_url(&self) -> Option<&str> {
        self.book
            .as_ref()
            .map(|b| b.image.trim())
            .filter(|url| !url.is_empty())
    }
}

/// Which recommendations are listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecommendationView {
    NotAdded,
    Added,
    All,
}

impl RecommendationView {
    fn as_filter(self) -> Option<bool> {
        match self {
            RecommendationView::NotAdded => Some(false),
            RecommendationView::Added => Some(true),
            RecommendationView::All => None,
        }
    }

    fn next(self) -> Self {
        match self {
            RecommendationView::NotAdded => RecommendationView::Added,
            RecommendationView::Added => RecommendationView::All,
            RecommendationView::All => RecommendationView::NotAdded,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RecommendationView::NotAdded => "Not in library",
            RecommendationView::Added => "In library",
            RecommendationView::All => "All",
        }
    }
}

/// Suggested books waiting to be imported.
#[derive(Debug)]
pub struct RecommendationScreen {
    phase: Phase,
    view: RecommendationView,
    items: Vec<RecommendedBook>,
    cursor: usize,
    selection: Selection,
    confirmation: Confirmation,
}

impl Default for RecommendationScreen {
    fn default() -> Self {
        Self::new()
    }
}

impl RecommendationScreen {
    pub fn new() -> Self {
        Self {
            phase: Phase::Loading,
            view: RecommendationView::NotAdded,
            items: Vec::new(),
            cursor: 0,
            selection: Selection::default(),
            confirmation: Confirmation::default(),
        }
    }

    pub fn load(&mut self, library: &Library) -> Result<()> {
        self.items = library.recommendations(self.view.as_filter())?;
        self.selection
            .retain_existing(self.items.iter().map(|r| r.id.as_str()));
        self.cursor = clamp_cursor(self.cursor, self.items.len());
        self.phase = Phase::Ready;
        Ok(())
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn view(&self) -> RecommendationView {
        self.view
    }

    pub fn cycle_view(&mut self, library: &Library) -> Result<RecommendationView> {
        self.view = self.view.next();
        self.selection.clear();
        self.load(library)?;
        Ok(self.view)
    }

    pub fn items(&self) -> &[RecommendedBook] {
        &self.items
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn move_cursor(&mut self, offset: isize) {
        self.cursor = offset_cursor(self.cursor, self.items.len(), offset);
    }

    pub fn current(&self) -> Option<&RecommendedBook> {
        self.items.get(self.cursor)
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn toggle_selected(&mut self) -> Option<bool> {
        let id = self.current()?.id.clone();
        Some(self.selection.toggle(&id))
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    pub fn targets(&self) -> Vec<String> {
        if self.selection.is_active() {
            self.selection.keys().iter().cloned().collect()
        } else {
            self.current().map(|r| vec![r.id.clone()]).unwrap_or_default()
        }
    }

    pub fn pending(&self) -> Option<Pending> {
        self.confirmation.current()
    }

    pub fn begin(&mut self, action: Pending) -> Result<()> {
        if !matches!(
            action,
            Pending::ImportRecommendations | Pending::DeleteRecommendations
        ) {
            bail!("{action} is not available here.");
        }
        if self.targets().is_empty() {
            bail!("No recommendation selected.");
        }
        self.confirmation.begin(self.phase, action)
    }

    pub fn cancel(&mut self) -> Option<Pending> {
        self.confirmation.pending.take()
    }

    pub fn confirm_import(&mut self, library: &Library, targets: &BTreeSet<String>) -> Result<usize> {
        self.confirmation.require(Pending::ImportRecommendations)?;
        let imported = library.import_recommendations(&self.targets(), targets)?;
        self.confirmation.resolve();
        self.selection.clear();
        self.load(library)?;
        Ok(imported)
    }

    pub fn confirm_delete(&mut self, library: &Library) -> Result<usize> {
        self.confirmation.require(Pending::DeleteRecommendations)?;
        let deleted = library.delete_recommendations(&self.targets())?;
        self.confirmation.resolve();
        self.selection.clear();
        self.load(library)?;
        Ok(deleted)
    }

    pub fn add(&mut self, library: &Library, book: NewBook) -> Result<RecommendedBook> {
        let created = library.add_recommendation(book)?;
        self.load(library)?;
        if let Some(idx) = self.items.iter().position(|r| r.id == created.id) {
            self.cursor = idx;
        }
        Ok(created)
    }
}
