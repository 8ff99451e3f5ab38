// File: ./src/mobile.rs
use crate::config::{Backend, Config};
use crate::counter::{CounterState, PersistentCounter};
use crate::paths::AppPaths;
use crate::runtime::BackgroundRuntime;
use crate::store::open_store;
use std::sync::{Mutex, PoisonError};
use tokio::task::JoinHandle;

#[cfg(target_os = "android")]
use android_logger::Config as LogConfig;
#[cfg(target_os = "android")]
use log::LevelFilter;

#[derive(Debug, uniffi::Error)]
#[uniffi(flat_error)]
pub enum MobileError {
    Generic(String),
}
impl From<anyhow::Error> for MobileError {
    fn from(e: anyhow::Error) -> Self {
        Self::Generic(format!("{:#}", e))
    }
}
impl std::fmt::Display for MobileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                MobileError::Generic(s) => s,
            }
        )
    }
}
impl std::error::Error for MobileError {}

// --- DTOs ---

#[derive(uniffi::Record)]
pub struct MobileCounterState {
    pub value: u64,
    pub running: bool,
}

impl From<CounterState> for MobileCounterState {
    fn from(s: CounterState) -> Self {
        Self {
            value: s.value,
            running: s.running,
        }
    }
}

/// Implemented on the Kotlin side to redraw when the counter changes.
#[uniffi::export(callback_interface)]
pub trait CounterObserver: Send + Sync {
    fn on_state_changed(&self, value: u64, running: bool);
}

// --- MAIN OBJECT ---

#[derive(uniffi::Object)]
pub struct CounterMobile {
    counter: PersistentCounter,
    observer: Mutex<Option<JoinHandle<()>>>,
    // Calls arrive on the UI thread, outside any runtime. The last reference
    // may go away on a uniffi worker after `flush`. Dropped last.
    runtime: BackgroundRuntime,
}

#[uniffi::export(async_runtime = "tokio")]
impl CounterMobile {
    #[uniffi::constructor]
    pub fn new(android_files_dir: String, use_data_store: bool) -> Result<Self, MobileError> {
        #[cfg(target_os = "android")]
        android_logger::init_once(
            LogConfig::default()
                .with_max_level(LevelFilter::Debug)
                .with_tag("PcountRust"),
        );
        AppPaths::init_android_path(android_files_dir);

        let mut config = Config::load_or_create().unwrap_or_else(|e| {
            log::warn!("Using default config: {:#}", e);
            Config::default()
        });
        config.backend = if use_data_store {
            Backend::DataStore
        } else {
            Backend::SharedPreferences
        };

        let runtime = BackgroundRuntime::new()?;
        let store = open_store(&config, runtime.handle())?;
        let counter =
            PersistentCounter::open_with_handle(runtime.handle().clone(), store, config.tick_interval());

        Ok(Self {
            counter,
            observer: Mutex::new(None),
            runtime,
        })
    }

    pub fn get_state(&self) -> MobileCounterState {
        self.counter.state().into()
    }

    pub fn toggle_running(&self) {
        self.counter.toggle_running();
    }

    pub fn reset(&self) {
        self.counter.reset();
    }

    /// Replaces any previous observer. It is called once right away with
    /// the current state, then after every change.
    pub fn set_observer(&self, observer: Box<dyn CounterObserver>) {
        let mut updates = self.counter.subscribe();
        let task = self.runtime.handle().spawn(async move {
            loop {
                let state = *updates.borrow_and_update();
                observer.on_state_changed(state.value, state.running);
                if updates.changed().await.is_err() {
                    break;
                }
            }
        });
        let previous = self
            .observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    pub fn clear_observer(&self) {
        if let Some(task) = self
            .observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }

    /// Wait for pending writes, e.g. from `onStop`.
    pub async fn flush(&self) {
        self.counter.settle().await;
    }
}
