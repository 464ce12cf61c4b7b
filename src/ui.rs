pub mod charting;
pub mod dashboard;
pub mod screen;

use ratatui::{
    buffer::Buffer,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Widget, Wrap},
};
use std::time::Instant;
use unicode_width::UnicodeWidthStr;

use crate::app::{App, AppState, LeaderboardPanel};
use crate::puzzle::{Phase, Puzzle, CHALLENGE_DURATION};
use crate::util::{format_countdown, format_time};

const HORIZONTAL_MARGIN: u16 = 5;
const VERTICAL_MARGIN: u16 = 1;

impl Widget for &App {
    fn render(self, area: Rect, buf: &mut Buffer) {
        match self.state {
            AppState::Dashboard => dashboard::render_dashboard(&self.dashboard, area, buf),
            AppState::Puzzle => match (&self.session, &self.config_error) {
                (Some(session), _) => {
                    let identity = &session.context().identity;
                    render_puzzle(self, &session.puzzle, &identity.username, area, buf)
                }
                (None, error) => render_config_error(error.as_deref(), area, buf),
            },
        }
    }
}

fn render_config_error(error: Option<&str>, area: Rect, buf: &mut Buffer) {
    let red_bold = Style::default().fg(Color::Red).add_modifier(Modifier::BOLD);
    let text = vec![
        Line::from(Span::styled("Configuration error", red_bold)),
        Line::from(""),
        Line::from(error.unwrap_or("experiment is not configured").to_string()),
        Line::from(""),
        Line::from(Span::styled(
            "The puzzle is unavailable. (tab) dashboard / (esc) quit",
            Style::default().add_modifier(Modifier::ITALIC),
        )),
    ];
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .horizontal_margin(HORIZONTAL_MARGIN)
        .vertical_margin(VERTICAL_MARGIN)
        .constraints([Constraint::Length(7), Constraint::Min(0)])
        .split(area);
    Paragraph::new(text)
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true })
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Red)),
        )
        .render(chunks[0], buf);
}

fn render_puzzle(app: &App, puzzle: &Puzzle, username: &str, area: Rect, buf: &mut Buffer) {
    let bold = Style::default().add_modifier(Modifier::BOLD);
    let dim = Style::default().add_modifier(Modifier::DIM);
    let italic = Style::default().add_modifier(Modifier::ITALIC);
    let green_bold = bold.fg(Color::Green);
    let red_bold = bold.fg(Color::Red);
    let now = Instant::now();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .horizontal_margin(HORIZONTAL_MARGIN)
        .vertical_margin(VERTICAL_MARGIN)
        .constraints([
            Constraint::Length(2), // header
            Constraint::Length(3), // letters
            Constraint::Length(2), // timer
            Constraint::Length(2), // input
            Constraint::Length(2), // found words
            Constraint::Length(3), // outcome
            Constraint::Min(4),    // leaderboard
            Constraint::Length(1), // legend
        ])
        .split(area);

    let config = puzzle.config();
    Paragraph::new(vec![
        Line::from(Span::styled("Word Search Challenge", bold)),
        Line::from(Span::styled(
            format!(
                "playing as {username} · variant {} · difficulty {}/10 · find {} words",
                puzzle.variant(),
                config.difficulty,
                config.target_count
            ),
            dim,
        )),
    ])
    .alignment(Alignment::Center)
    .render(chunks[0], buf);

    let letters = config
        .letters
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    Paragraph::new(Span::styled(letters, bold.fg(Color::Yellow)))
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true })
        .block(Block::default().borders(Borders::ALL).title("Letters"))
        .render(chunks[1], buf);

    let timer = match puzzle.phase() {
        Phase::Idle => format_countdown(CHALLENGE_DURATION),
        Phase::Running => format_countdown(puzzle.remaining()),
        Phase::Completed | Phase::Failed => format_time(puzzle.elapsed_at(now)),
    };
    Paragraph::new(Span::styled(timer, bold))
        .alignment(Alignment::Center)
        .render(chunks[2], buf);

    if puzzle.is_running() {
        let style = if puzzle.is_rejecting_at(now) {
            red_bold
        } else {
            bold
        };
        Paragraph::new(Line::from(vec![
            Span::styled("> ", dim),
            Span::styled(app.input.to_uppercase(), style),
            Span::styled("_", dim.add_modifier(Modifier::SLOW_BLINK)),
        ]))
        .alignment(Alignment::Center)
        .render(chunks[3], buf);
    }

    let found = &puzzle.session_state.found_words;
    let found_text = if found.is_empty() {
        "(none yet)".to_string()
    } else {
        found.join(", ")
    };
    Paragraph::new(Line::from(vec![
        Span::raw(format!(
            "Found {}/{}: ",
            puzzle.found_count(),
            puzzle.target_count()
        )),
        Span::styled(found_text, green_bold),
    ]))
    .alignment(Alignment::Center)
    .render(chunks[4], buf);

    let outcome = match puzzle.phase() {
        Phase::Completed => {
            let time = puzzle.completion_time().unwrap_or_default();
            let follow_up = match &app.leaderboard {
                LeaderboardPanel::Ready(standing) if standing.personal_best == Some(true) => {
                    Span::styled("Personal Best!", bold.fg(Color::Yellow))
                }
                _ => Span::styled("Great job! Check the dashboard (tab) for detailed stats.", italic),
            };
            vec![
                Line::from(Span::styled(
                    format!(
                        "Completed in {} with {} guesses",
                        format_time(time),
                        puzzle.guess_count()
                    ),
                    green_bold,
                )),
                Line::from(follow_up),
            ]
        }
        Phase::Failed => vec![Line::from(Span::styled(
            format!(
                "Time's up! You found {} of {} words.",
                puzzle.found_count(),
                puzzle.target_count()
            ),
            red_bold,
        ))],
        Phase::Idle | Phase::Running => vec![],
    };
    Paragraph::new(outcome)
        .alignment(Alignment::Center)
        .render(chunks[5], buf);

    render_leaderboard(&app.leaderboard, chunks[6], buf);

    let legend = match puzzle.phase() {
        Phase::Idle => "(enter) start / (tab) dashboard / (esc) quit",
        Phase::Running => "(enter) submit / (esc) reset / (tab) dashboard",
        Phase::Completed | Phase::Failed => "(t)ry again / (tab) dashboard / (esc) quit",
    };
    Paragraph::new(Span::styled(legend, italic)).render(chunks[7], buf);
}

fn render_leaderboard(panel: &LeaderboardPanel, area: Rect, buf: &mut Buffer) {
    let italic = Style::default().add_modifier(Modifier::ITALIC);
    let lines = match panel {
        LeaderboardPanel::Loading => vec![Line::from(Span::styled("Loading leaderboard...", italic))],
        LeaderboardPanel::Unavailable(_) => {
            vec![Line::from(Span::styled("Leaderboard unavailable", italic))]
        }
        LeaderboardPanel::Ready(standing) if standing.is_empty() => vec![Line::from(Span::styled(
            "Complete a challenge to appear here",
            italic,
        ))],
        LeaderboardPanel::Ready(standing) => {
            let label = |name: &str, current: bool| {
                if current {
                    format!("{name} *")
                } else {
                    name.to_string()
                }
            };
            // times line up in one column, even for wide names
            let name_width = standing
                .rows
                .iter()
                .map(|row| label(&row.username, row.is_current_user).width())
                .max()
                .unwrap_or(0);
            let mut lines: Vec<Line> = standing
                .rows
                .iter()
                .map(|row| {
                    let style = if row.is_current_user {
                        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
                    } else {
                        Style::default()
                    };
                    let name = label(&row.username, row.is_current_user);
                    let pad = " ".repeat(name_width - name.width());
                    Line::from(Span::styled(
                        format!("{}. {name}{pad}  {:.2}s", row.rank, row.best_time),
                        style,
                    ))
                })
                .collect();
            if let Some(cmp) = standing.comparison {
                lines.push(Line::from(Span::styled("- - - - - - - -", Style::default().fg(Color::Gray))));
                lines.push(Line::from(format!(
                    "This attempt: {:.2}s   Your best: {:.2}s",
                    cmp.this_attempt, cmp.best
                )));
            }
            lines
        }
    };

    Paragraph::new(lines)
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL).title("Leaderboard"))
        .render(area, buf);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{Services, Session};
    use crate::dashboard::HttpStatsApi;
    use crate::identity::{ExperimentContext, Identity, FEATURE_FLAG_KEY};
    use crate::leaderboard::{AttemptComparison, LocalLeaderboard, RankedRow, Reconciler, Standing};
    use crate::puzzle_config::{PuzzleCatalog, Variant};
    use crate::runtime::AppEvent;
    use crate::storage::MemoryStore;
    use crate::tracker::{LogSink, Tracker};
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn services() -> Services {
        Services {
            reconciler: Arc::new(Mutex::new(
                Box::new(LocalLeaderboard::new(MemoryStore::new())) as Box<dyn Reconciler>
            )),
            stats_api: Arc::new(HttpStatsApi::new("http://127.0.0.1:9").unwrap()),
            dashboard_refresh: Duration::from_secs(60),
            attempt_log: None,
        }
    }

    fn create_test_app(variant: Variant) -> App {
        let (tx, _rx) = mpsc::channel::<AppEvent>();
        let context = ExperimentContext {
            identity: Identity {
                user_id: "user_abc".into(),
                username: "Bright Owl".into(),
                variant,
            },
            flag_key: FEATURE_FLAG_KEY.into(),
            flag_response: Some("control".into()),
        };
        let session = Session {
            puzzle: Puzzle::new(variant, PuzzleCatalog::builtin().get(variant).clone()),
            tracker: Tracker::spawn(LogSink, context),
        };
        App::new(session, services(), tx)
    }

    fn rendered(app: &App) -> String {
        let area = Rect::new(0, 0, 100, 30);
        let mut buffer = Buffer::empty(area);
        app.render(area, &mut buffer);
        buffer.content().iter().map(|c| c.symbol()).collect()
    }

    fn puzzle_mut(app: &mut App) -> &mut Puzzle {
        &mut app.session.as_mut().unwrap().puzzle
    }

    #[test]
    fn idle_screen_shows_letters_and_full_countdown() {
        let app = create_test_app(Variant::A);
        let text = rendered(&app);
        assert!(text.contains("M A T H E M A T I C S L O W"));
        assert!(text.contains("difficulty 3/10"));
        assert!(text.contains("00:60:00"));
        assert!(text.contains("(none yet)"));
        assert!(text.contains("(enter) start"));
    }

    #[test]
    fn running_screen_shows_input_and_found_words() {
        let mut app = create_test_app(Variant::B);
        let t0 = Instant::now();
        puzzle_mut(&mut app).start_at(t0);
        puzzle_mut(&mut app).submit_word_at("data", t0);
        app.input = "comp".into();
        let text = rendered(&app);
        assert!(text.contains("> COMP_"));
        assert!(text.contains("Found 1/4: DATA"));
    }

    #[test]
    fn completed_screen_shows_time_and_personal_best() {
        let mut app = create_test_app(Variant::A);
        let t0 = Instant::now();
        let puzzle = puzzle_mut(&mut app);
        puzzle.start_at(t0);
        for word in ["MATH", "THEM"] {
            puzzle.submit_word_at(word, t0 + Duration::from_secs(1));
        }
        puzzle.submit_word_at("MACE", t0 + Duration::from_millis(12_340));
        app.leaderboard = LeaderboardPanel::Ready(Standing {
            rows: vec![RankedRow {
                rank: 1,
                username: "Bright Owl".into(),
                best_time: 12.34,
                is_current_user: true,
            }],
            personal_best: Some(true),
            comparison: None,
        });

        let text = rendered(&app);
        assert!(text.contains("Completed in 00:12:34 with 3 guesses"));
        assert!(text.contains("Personal Best!"));
        assert!(text.contains("1. Bright Owl *  12.34s"));
    }

    #[test]
    fn slower_attempt_shows_comparison_row() {
        let mut app = create_test_app(Variant::A);
        app.leaderboard = LeaderboardPanel::Ready(Standing {
            rows: vec![RankedRow {
                rank: 1,
                username: "Calm Otter".into(),
                best_time: 9.5,
                is_current_user: false,
            }],
            personal_best: Some(false),
            comparison: Some(AttemptComparison {
                this_attempt: 15.0,
                best: 12.0,
            }),
        });
        let text = rendered(&app);
        assert!(text.contains("This attempt: 15.00s   Your best: 12.00s"));
    }

    #[test]
    fn failed_screen_and_unavailable_leaderboard() {
        let mut app = create_test_app(Variant::A);
        let t0 = Instant::now();
        let puzzle = puzzle_mut(&mut app);
        puzzle.start_at(t0);
        puzzle.submit_word_at("MATH", t0);
        puzzle.on_tick_at(t0 + Duration::from_secs(61));
        app.leaderboard = LeaderboardPanel::Unavailable("timeout".into());

        let text = rendered(&app);
        assert!(text.contains("Time's up! You found 1 of 3 words."));
        assert!(text.contains("01:00:00"));
        assert!(text.contains("Leaderboard unavailable"));
        assert!(text.contains("(t)ry again"));
    }

    #[test]
    fn config_error_banner_replaces_puzzle() {
        let (tx, _rx) = mpsc::channel();
        let app = App::misconfigured("flag source unavailable".into(), services(), tx);
        let text = rendered(&app);
        assert!(text.contains("Configuration error"));
        assert!(text.contains("flag source unavailable"));
        assert!(!text.contains("Letters"));
    }

    #[test]
    fn renders_at_extreme_sizes() {
        let app = create_test_app(Variant::B);
        for (w, h) in [(20, 5), (200, 60), (80, 10)] {
            let area = Rect::new(0, 0, w, h);
            let mut buffer = Buffer::empty(area);
            (&app).render(area, &mut buffer);
            assert_eq!(*buffer.area(), area);
        }
    }
}
