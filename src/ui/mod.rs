//! Ratatui front-end. `screens` holds the per-screen state and its library
//! calls, `app` maps keys and draws, and `terminal` owns the event loop.

mod app;
mod forms;
mod helpers;
mod screens;
mod terminal;

pub use app::App;
pub use screens::{
    BookScreen, CategoryListScreen, CategoryScreen, FavoritesScreen, Pending, Phase,
    RecommendationScreen, RecommendationView, Selection,
};
pub use terminal::run_app;
