pub mod action;
pub mod state;
pub mod view;

use crate::config::{Backend, Config};
use crate::counter::PersistentCounter;
use crate::paths::AppPaths;
use crate::store::{open_store, prefs_path};

use action::{Action, action_for_key};
use state::AppState;
use view::draw;

use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use std::{env, io, time::Duration};
use tokio::runtime::Handle;

// How long quitting waits for the last writes to land.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

/// `--backend shared` / `--backend=datastore`
fn parse_backend_arg(args: &[String]) -> Result<Option<Backend>> {
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        if let Some(value) = arg.strip_prefix("--backend=") {
            return value.parse().map(Some);
        }
        if arg == "--backend" {
            let value = iter
                .next()
                .ok_or_else(|| anyhow::anyhow!("--backend needs a value"))?;
            return value.parse().map(Some);
        }
    }
    Ok(None)
}

fn print_help() {
    println!("pcount - a counter that remembers where it stopped");
    println!("----------------------------------------");
    println!("Usage: pcount [--backend shared|datastore]");
    println!();

    if let Ok(path) = Config::get_path_string() {
        println!("Configuration File: {}", path);
    }

    println!();
    println!("Config Options:");
    println!("  backend = \"data_store\" | \"shared_preferences\"");
    println!("  tick_interval_ms = 1000");
    println!("  prefs_name = \"CounterPrefs\"");
    println!();
    println!("Keys: Space start/pause | r reset | q quit");
}

/// Logs go to a file so they do not tear the terminal UI.
fn init_logger() {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if let Ok(path) = AppPaths::get_log_path()
        && let Ok(file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
    {
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    let _ = builder.try_init();
}

pub async fn run() -> Result<()> {
    // --- 1. PREAMBLE & CONFIG ---
    let args: Vec<String> = env::args().collect();
    if args.len() > 1 && (args[1] == "--help" || args[1] == "-h") {
        print_help();
        return Ok(());
    }
    let backend_override = parse_backend_arg(&args)?;

    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        use std::io::Write;
        if let Ok(mut file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open("pcount_panic.log")
        {
            let _ = writeln!(file, "PANIC: {:?}", info);
        }
        default_hook(info);
    }));

    init_logger();

    let mut config = Config::load_or_create().unwrap_or_else(|e| {
        log::warn!("Using default config: {:#}", e);
        Config::default()
    });
    if let Some(backend) = backend_override {
        config.backend = backend;
    }

    // --- 2. COUNTER ---
    let store = open_store(&config, &Handle::current()).context("Could not open preferences")?;
    let counter = PersistentCounter::open(store, config.tick_interval())?;
    let path_str = prefs_path(&config)
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default();
    let mut app_state = AppState::new(counter.state(), config.backend, path_str);

    // --- 3. TERMINAL SETUP ---
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = ui_loop(&mut terminal, &counter, &mut app_state);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    // --- 4. FLUSH ---
    if tokio::time::timeout(SETTLE_TIMEOUT, counter.settle())
        .await
        .is_err()
    {
        log::warn!("Quit before the last value was written");
    }

    result
}

fn ui_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    counter: &PersistentCounter,
    app_state: &mut AppState,
) -> Result<()> {
    let mut updates = counter.subscribe();
    loop {
        if updates.has_changed().unwrap_or(false) {
            app_state.apply(*updates.borrow_and_update());
        }

        terminal.draw(|f| draw(f, app_state))?;

        if event::poll(Duration::from_millis(50))?
            && let Event::Key(key) = event::read()?
            && key.kind == KeyEventKind::Press
        {
            match action_for_key(key.code) {
                Some(Action::ToggleRunning) => {
                    counter.toggle_running();
                    app_state.message = if counter.is_running() {
                        "Running.".to_string()
                    } else {
                        "Paused.".to_string()
                    };
                }
                Some(Action::Reset) => {
                    counter.reset();
                    app_state.message = "Reset.".to_string();
                }
                Some(Action::Quit) => break,
                None => {}
            }
        }
    }
    Ok(())
}
