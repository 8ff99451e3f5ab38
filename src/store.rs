use crate::config::{Backend, Config};
use crate::paths::AppPaths;
use crate::storage::{Prefs, PrefsFile};
use anyhow::{Context, Result, anyhow};
use futures::future::{self, BoxFuture, FutureExt};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};

/// The narrow durable store the counter depends on.
///
/// Returned futures own everything they need so callers can detach them.
/// Adapters that can answer without waiting return ready futures, and
/// `set` is expected to register the value in call order even if the
/// disk work happens later.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> BoxFuture<'static, Result<Option<i64>>>;
    fn set(&self, key: &str, value: i64) -> BoxFuture<'static, Result<()>>;
}

/// Resolve the preference file for the configured backend.
pub fn prefs_path(config: &Config) -> Result<PathBuf> {
    match config.backend {
        Backend::SharedPreferences => AppPaths::get_shared_prefs_path(&config.prefs_name),
        Backend::DataStore => AppPaths::get_data_store_path(&config.prefs_name),
    }
}

pub fn open_store(config: &Config, handle: &Handle) -> Result<Arc<dyn KeyValueStore>> {
    let file = PrefsFile::new(prefs_path(config)?);
    log::info!("Opening {} at {:?}", config.backend, file.path());
    let store: Arc<dyn KeyValueStore> = match config.backend {
        Backend::SharedPreferences => Arc::new(SharedPrefs::open(file)),
        Backend::DataStore => Arc::new(DataStore::open(file, handle)),
    };
    Ok(store)
}

// --- SHARED PREFERENCES ---

struct MemoryState {
    prefs: Prefs,
    generation: u64,
}

struct SharedPrefsInner {
    file: PrefsFile,
    memory: Mutex<MemoryState>,
    // Generation that last reached disk. Held for the whole write.
    written: Mutex<u64>,
}

impl SharedPrefsInner {
    fn write_back(&self, generation: u64) -> Result<()> {
        let mut written = self.written.lock().unwrap_or_else(PoisonError::into_inner);
        if *written >= generation {
            // A newer snapshot already covers this edit.
            return Ok(());
        }
        let (prefs, latest) = {
            let memory = self.memory.lock().unwrap_or_else(PoisonError::into_inner);
            (memory.prefs.clone(), memory.generation)
        };
        self.file.save(&prefs)?;
        *written = latest;
        Ok(())
    }
}

/// Preferences read from memory, written to memory immediately and
/// flushed to disk on the blocking pool.
#[derive(Clone)]
pub struct SharedPrefs {
    inner: Arc<SharedPrefsInner>,
}

impl SharedPrefs {
    pub fn open(file: PrefsFile) -> Self {
        let prefs = file.load_or_default();
        Self {
            inner: Arc::new(SharedPrefsInner {
                file,
                memory: Mutex::new(MemoryState {
                    prefs,
                    generation: 0,
                }),
                written: Mutex::new(0),
            }),
        }
    }
}

impl KeyValueStore for SharedPrefs {
    fn get(&self, key: &str) -> BoxFuture<'static, Result<Option<i64>>> {
        let memory = self
            .inner
            .memory
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        future::ready(Ok(memory.prefs.get(key).copied())).boxed()
    }

    fn set(&self, key: &str, value: i64) -> BoxFuture<'static, Result<()>> {
        let generation = {
            let mut memory = self
                .inner
                .memory
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            memory.prefs.insert(key.to_string(), value);
            memory.generation += 1;
            memory.generation
        };
        let inner = Arc::clone(&self.inner);
        async move {
            tokio::task::spawn_blocking(move || inner.write_back(generation))
                .await
                .context("Preference flush task failed")?
        }
        .boxed()
    }
}

// --- DATA STORE ---

enum Request {
    Get {
        key: String,
        reply: oneshot::Sender<Result<Option<i64>>>,
    },
    Set {
        key: String,
        value: i64,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Asynchronous preferences: a single actor owns the data and handles
/// requests strictly in the order they were issued.
#[derive(Clone)]
pub struct DataStore {
    requests: mpsc::UnboundedSender<Request>,
    data: watch::Receiver<Prefs>,
}

impl DataStore {
    pub fn open(file: PrefsFile, handle: &Handle) -> Self {
        let (requests, rx) = mpsc::unbounded_channel();
        let (data_tx, data) = watch::channel(Prefs::new());
        handle.spawn(run_data_store(file, rx, data_tx));
        Self { requests, data }
    }

    /// Committed contents, updated after every successful edit.
    /// Empty until the actor has read the file.
    pub fn subscribe(&self) -> watch::Receiver<Prefs> {
        self.data.clone()
    }
}

impl KeyValueStore for DataStore {
    fn get(&self, key: &str) -> BoxFuture<'static, Result<Option<i64>>> {
        let (reply, rx) = oneshot::channel();
        let sent = self
            .requests
            .send(Request::Get {
                key: key.to_string(),
                reply,
            })
            .is_ok();
        async move {
            if !sent {
                return Err(anyhow!("Data store is closed"));
            }
            rx.await
                .map_err(|_| anyhow!("Data store dropped the request"))?
        }
        .boxed()
    }

    fn set(&self, key: &str, value: i64) -> BoxFuture<'static, Result<()>> {
        let (reply, rx) = oneshot::channel();
        let sent = self
            .requests
            .send(Request::Set {
                key: key.to_string(),
                value,
                reply,
            })
            .is_ok();
        async move {
            if !sent {
                return Err(anyhow!("Data store is closed"));
            }
            rx.await
                .map_err(|_| anyhow!("Data store dropped the request"))?
        }
        .boxed()
    }
}

async fn load_prefs(file: &PrefsFile) -> Prefs {
    let file = file.clone();
    match tokio::task::spawn_blocking(move || file.load_or_default()).await {
        Ok(prefs) => prefs,
        Err(e) => {
            log::warn!("Preference load task failed: {}", e);
            Prefs::new()
        }
    }
}

async fn save_prefs(file: &PrefsFile, prefs: Prefs) -> Result<()> {
    let file = file.clone();
    tokio::task::spawn_blocking(move || file.save(&prefs))
        .await
        .context("Preference save task failed")?
}

async fn run_data_store(
    file: PrefsFile,
    mut requests: mpsc::UnboundedReceiver<Request>,
    data: watch::Sender<Prefs>,
) {
    let mut prefs = load_prefs(&file).await;
    data.send_replace(prefs.clone());

    while let Some(request) = requests.recv().await {
        match request {
            Request::Get { key, reply } => {
                let _ = reply.send(Ok(prefs.get(&key).copied()));
            }
            Request::Set { key, value, reply } => {
                let mut edited = prefs.clone();
                edited.insert(key, value);
                match save_prefs(&file, edited.clone()).await {
                    Ok(()) => {
                        prefs = edited;
                        data.send_replace(prefs.clone());
                        let _ = reply.send(Ok(()));
                    }
                    // The edit is dropped; memory keeps matching disk.
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }
        }
    }
    log::debug!("Data store for {:?} closed", file.path());
}
