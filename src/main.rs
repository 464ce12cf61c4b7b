use abpuzzle::{
    app::{App, Services, Session},
    app_dirs::AppDirs,
    attempt_log::AttemptLog,
    build_log,
    config::{Config, ConfigStore, FileConfigStore},
    dashboard::HttpStatsApi,
    identity::{ExperimentContext, FlagSource, HttpFlagSource, IdentityAssigner, StaticFlagSource, VariantPolicy},
    leaderboard::{LeaderboardMode, LocalLeaderboard, Reconciler, RemoteLeaderboard, SharedReconciler},
    puzzle::{Puzzle, TICK_RATE_MS},
    puzzle_config::PuzzleCatalog,
    runtime::{AppEventSource, CrosstermEventSource, FixedTicker, Runner, Ticker},
    storage::{AnyStore, MemoryStore, SqliteStore},
    tracker::{HttpEventSink, LogSink, Tracker},
    ui::screen::current_screen,
};
use clap::{error::ErrorKind, CommandFactory, Parser, Subcommand};
use crossterm::{
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    tty::IsTty,
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    Frame, Terminal,
};
use std::{
    error::Error,
    fs::{self, OpenOptions},
    io::{self, stdin},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "ABPUZZLE_LOG";

/// timed A/B word-search puzzle with leaderboards and a live experiment dashboard
#[derive(Parser, Debug, Clone)]
#[clap(
    version,
    about,
    long_about = "Find the hidden words before the minute runs out. Each visitor is bucketed into an experiment variant, completions feed a leaderboard, and the dashboard charts how the variants compare."
)]
pub struct Cli {
    #[clap(subcommand)]
    command: Option<Command>,

    /// leaderboard authority: local best times or the remote API
    #[clap(short = 'm', long, value_enum)]
    mode: Option<LeaderboardMode>,

    /// base url of the leaderboard and statistics API
    #[clap(long)]
    api_url: Option<String>,

    /// analytics capture host; events are only logged when unset
    #[clap(long)]
    events_url: Option<String>,

    /// feature flag value to use instead of querying a flag service ("control" or "4-words")
    #[clap(long)]
    flag: Option<String>,

    /// feature flag service base url
    #[clap(long)]
    flags_url: Option<String>,

    /// what to do when the flag does not resolve to a known bucket
    #[clap(long, value_enum)]
    variant_policy: Option<VariantPolicy>,

    /// json file with custom puzzles for both variants
    #[clap(long)]
    puzzle_file: Option<PathBuf>,

    /// seconds between dashboard refreshes
    #[clap(long)]
    refresh_secs: Option<u64>,

    /// keep identity and local leaderboard in memory only
    #[clap(long)]
    ephemeral: bool,

    /// pick a new generated username before playing
    #[clap(long)]
    new_username: bool,

    /// persist the effective settings as the new defaults
    #[clap(long)]
    save_config: bool,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// check a contributor build-log json payload and print a summary
    ValidateBuildLog {
        /// path to the json file
        file: PathBuf,
    },
}

impl Cli {
    /// Command line values win over the stored config
    fn apply(&self, config: &mut Config) {
        if let Some(mode) = self.mode {
            config.leaderboard_mode = mode;
        }
        if let Some(url) = &self.api_url {
            config.api_url = url.clone();
        }
        if let Some(url) = &self.events_url {
            config.events_url = Some(url.clone());
        }
        if let Some(flag) = &self.flag {
            config.flag_value = Some(flag.clone());
        }
        if let Some(url) = &self.flags_url {
            config.flags_url = Some(url.clone());
        }
        if let Some(policy) = self.variant_policy {
            config.variant_policy = policy;
        }
        if let Some(path) = &self.puzzle_file {
            config.puzzle_file = Some(path.clone());
        }
        if let Some(secs) = self.refresh_secs {
            config.dashboard_refresh_secs = secs;
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    if let Some(Command::ValidateBuildLog { file }) = &cli.command {
        init_logging(None);
        return validate_build_log(file);
    }

    if !stdin().is_tty() {
        let mut cmd = Cli::command();
        cmd.error(ErrorKind::Io, "stdin must be a tty").exit();
    }

    init_logging(AppDirs::log_path());

    let config_store = FileConfigStore::new();
    let mut config = config_store.load();
    cli.apply(&mut config);
    if cli.save_config {
        config_store.save(&config)?;
        info!(path = %config_store.path().display(), "config saved");
    }

    let catalog = match &config.puzzle_file {
        Some(path) => PuzzleCatalog::from_file(path)?,
        None => PuzzleCatalog::builtin(),
    };

    let services = Services {
        reconciler: reconciler(&config, cli.ephemeral)?,
        stats_api: Arc::new(HttpStatsApi::new(&config.api_url)?),
        dashboard_refresh: config.dashboard_refresh(),
        attempt_log: if cli.ephemeral {
            None
        } else {
            AttemptLog::open_default()
        },
    };

    let runner = Runner::new(
        CrosstermEventSource::new(),
        FixedTicker::new(Duration::from_millis(TICK_RATE_MS)),
    );

    let mut identity_store = open_store(cli.ephemeral)?;
    let mut app = match resolve_identity(&config, &mut identity_store, cli.new_username) {
        Ok(context) => {
            let variant = context.identity.variant;
            let tracker = spawn_tracker(&config, context);
            tracker.identify();
            let session = Session {
                puzzle: Puzzle::new(variant, catalog.get(variant).clone()),
                tracker,
            };
            App::new(session, services, runner.sender())
        }
        Err(e) => {
            error!(error = %e, "puzzle unavailable");
            App::misconfigured(e.to_string(), services, runner.sender())
        }
    };

    enable_raw_mode()?;

    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = start_tui(&mut terminal, &mut app, &runner);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    app.shutdown();
    result
}

/// Log to a file while the terminal belongs to the tui, to stderr otherwise
fn init_logging(path: Option<PathBuf>) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let file = path.and_then(|path| {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).ok()?;
        }
        OpenOptions::new().create(true).append(true).open(path).ok()
    });

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let _ = match file {
        Some(file) => builder.with_ansi(false).with_writer(Mutex::new(file)).try_init(),
        None => builder.with_writer(io::stderr).try_init(),
    };
}

fn validate_build_log(path: &Path) -> Result<(), Box<dyn Error>> {
    let raw = fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    match build_log::validate(&value) {
        Some(data) => {
            println!(
                "valid build log: {} cycles, {} tasks, {} hats, {} leaderboard entries",
                data.cycles.len(),
                data.tasks.len(),
                data.hats.len(),
                data.leaderboard.len()
            );
            Ok(())
        }
        None => Err(format!("invalid build log: {}", path.display()).into()),
    }
}

fn open_store(ephemeral: bool) -> abpuzzle::Result<AnyStore> {
    if ephemeral {
        Ok(AnyStore::Memory(MemoryStore::new()))
    } else {
        Ok(AnyStore::Sqlite(SqliteStore::open_default()?))
    }
}

fn reconciler(config: &Config, ephemeral: bool) -> abpuzzle::Result<SharedReconciler> {
    let reconciler: Box<dyn Reconciler> = match config.leaderboard_mode {
        LeaderboardMode::Local => Box::new(LocalLeaderboard::with_limit(
            open_store(ephemeral)?,
            config.leaderboard_limit,
        )),
        LeaderboardMode::Remote => Box::new(
            RemoteLeaderboard::new(&config.api_url)?.with_limit(config.leaderboard_limit),
        ),
    };
    info!(mode = %config.leaderboard_mode, "leaderboard ready");
    Ok(Arc::new(Mutex::new(reconciler)))
}

fn resolve_identity(
    config: &Config,
    store: &mut AnyStore,
    new_username: bool,
) -> abpuzzle::Result<ExperimentContext> {
    match &config.flags_url {
        Some(url) => assign(
            &HttpFlagSource::new(url.clone())?,
            store,
            config.variant_policy,
            new_username,
        ),
        None => assign(
            &StaticFlagSource::new(config.flag_value.clone()),
            store,
            config.variant_policy,
            new_username,
        ),
    }
}

fn assign<F: FlagSource>(
    flags: &F,
    store: &mut AnyStore,
    policy: VariantPolicy,
    new_username: bool,
) -> abpuzzle::Result<ExperimentContext> {
    let mut assigner = IdentityAssigner::new(flags, store, policy);
    if new_username {
        assigner.regenerate_username()?;
    }
    assigner.resolve()
}

fn spawn_tracker(config: &Config, context: ExperimentContext) -> Tracker {
    let Some(host) = &config.events_url else {
        return Tracker::spawn(LogSink, context);
    };
    match HttpEventSink::new(host, config.events_api_key.clone()) {
        Ok(sink) => Tracker::spawn(sink, context),
        Err(e) => {
            warn!(error = %e, "analytics sink unavailable, logging events instead");
            Tracker::spawn(LogSink, context)
        }
    }
}

fn start_tui<B: Backend, E: AppEventSource, T: Ticker>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    runner: &Runner<E, T>,
) -> Result<(), Box<dyn Error>> {
    terminal.draw(|f| ui(app, f))?;

    loop {
        let event = runner.step();
        app.handle_event(event);
        if app.should_quit {
            break;
        }
        terminal.draw(|f| ui(app, f))?;
    }

    Ok(())
}

fn ui(app: &App, f: &mut Frame) {
    current_screen(app.state).render(app, f);
}
