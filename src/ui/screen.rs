use ratatui::Frame;

use crate::app::{App, AppState};
use crate::ui::dashboard::render_dashboard;

/// A UI Screen boundary: responsible for rendering one app state
pub trait Screen {
    fn render(&self, app: &App, f: &mut Frame);
}

/// Puzzle screen, including the leaderboard and configuration banner
pub struct PuzzleScreen;

impl Screen for PuzzleScreen {
    fn render(&self, app: &App, f: &mut Frame) {
        f.render_widget(app, f.area());
    }
}

/// Live experiment dashboard
pub struct DashboardScreen;

impl Screen for DashboardScreen {
    fn render(&self, app: &App, f: &mut Frame) {
        let area = f.area();
        render_dashboard(&app.dashboard, area, f.buffer_mut());
    }
}

/// Helper to construct the appropriate screen for the current state
pub fn current_screen(state: AppState) -> Box<dyn Screen> {
    match state {
        AppState::Puzzle => Box::new(PuzzleScreen),
        AppState::Dashboard => Box::new(DashboardScreen),
    }
}
