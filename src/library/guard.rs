use std::collections::HashSet;
use std::fmt;
use std::sync::Mutex;

use anyhow::anyhow;

use crate::error::{LibraryError, LibraryResult};

/// Names a mutating request. Two requests with equal tokens may not run at
/// the same time; distinct tokens do not block each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Action {
    SeedDefaults,
    CreateCategory,
    RenameCategories,
    DeleteCategories,
    MergeCategories,
    TogglePin(String),
    AddBook,
    EditBook(String),
    AddBooks,
    MoveBooks,
    DeleteBooks,
    ToggleFavorite(String),
    AddRecommendation,
    ImportRecommendations,
    DeleteRecommendations,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::SeedDefaults => write!(f, "Seeding the default category"),
            Action::CreateCategory => write!(f, "Creating a category"),
            Action::RenameCategories => write!(f, "Renaming categories"),
            Action::DeleteCategories => write!(f, "Deleting categories"),
            Action::MergeCategories => write!(f, "Merging categories"),
            Action::TogglePin(name) => write!(f, "Pinning \"{name}\""),
            Action::AddBook => write!(f, "Adding a book"),
            Action::EditBook(id) => write!(f, "Editing book {id}"),
            Action::AddBooks => write!(f, "Adding books"),
            Action::MoveBooks => write!(f, "Moving books"),
            Action::DeleteBooks => write!(f, "Deleting books"),
            Action::ToggleFavorite(id) => write!(f, "Toggling favorite on {id}"),
            Action::AddRecommendation => write!(f, "Adding a recommendation"),
            Action::ImportRecommendations => write!(f, "Importing recommendations"),
            Action::DeleteRecommendations => write!(f, "Deleting recommendations"),
        }
    }
}

/// Registry of actions currently being applied.
#[derive(Debug, Default)]
pub struct InFlight {
    active: Mutex<HashSet<Action>>,
}

impl InFlight {
    /// Claim `action`, failing with `Busy` when an equal request is still
    /// running. The claim lasts as long as the returned guard.
    pub fn begin(&self, action: Action) -> LibraryResult<InFlightGuard<'_>> {
        let mut active = self
            .active
            .lock()
            .map_err(|_| anyhow!("in-flight registry lock poisoned"))?;
        if !active.insert(action.clone()) {
            return Err(LibraryError::Busy(action.to_string()));
        }
        Ok(InFlightGuard {
            owner: self,
            action,
        })
    }
}

/// Releases its action when dropped, including on early return or panic.
pub struct InFlightGuard<'a> {
    owner: &'a InFlight,
    action: Action,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut active) = self.owner.active.lock() {
            active.remove(&self.action);
        }
    }
}
