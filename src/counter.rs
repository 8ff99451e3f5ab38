//! The persistent counter: a paused/running flag, a value that ticks up
//! while running, and a best-effort write of every new value.

use crate::store::KeyValueStore;
use anyhow::{Context, Result};
use futures::FutureExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{Notify, watch};

/// Key the value is stored under.
pub const COUNTER_KEY: &str = "counter";

/// Tick period unless the config says otherwise.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterState {
    pub value: u64,
    pub running: bool,
}

struct Core {
    state: CounterState,
    // Bumped on every start; a timer loop only ticks for its own session.
    session: u64,
    // Set by the first tick or reset. A late initial load must not clobber it.
    touched: bool,
}

/// Counts detached writes so shutdown code can wait for them.
#[derive(Default)]
struct WriteTracker {
    pending: AtomicUsize,
    idle: Notify,
}

impl WriteTracker {
    fn begin(self: &Arc<Self>) -> PendingWrite {
        self.pending.fetch_add(1, Ordering::AcqRel);
        PendingWrite(Arc::clone(self))
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

// Released on drop, so a write task that never runs still counts as done.
struct PendingWrite(Arc<WriteTracker>);

impl Drop for PendingWrite {
    fn drop(&mut self) {
        if self.0.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

struct Inner {
    core: Mutex<Core>,
    updates: watch::Sender<CounterState>,
    store: Arc<dyn KeyValueStore>,
    handle: Handle,
    interval: Duration,
    writes: Arc<WriteTracker>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, core: &Core) {
        self.updates.send_replace(core.state);
    }

    /// Issue the write now (so the store sees writes in order) and detach
    /// its completion.
    fn persist(&self, value: u64) {
        let stored = i64::try_from(value).unwrap_or(i64::MAX);
        let write = self.store.set(COUNTER_KEY, stored);
        let pending = self.writes.begin();
        self.handle.spawn(async move {
            match write.await {
                Ok(()) => log::trace!("Persisted counter = {}", value),
                Err(e) => log::warn!("Failed to persist counter = {}: {:#}", value, e),
            }
            drop(pending);
        });
    }

    fn advance(&self, session: Option<u64>) -> bool {
        let mut core = self.lock();
        if !core.state.running {
            return false;
        }
        if let Some(session) = session
            && session != core.session
        {
            return false;
        }
        core.state.value = core.state.value.saturating_add(1);
        core.touched = true;
        self.persist(core.state.value);
        self.publish(&core);
        true
    }

    fn apply_loaded(&self, value: u64) {
        let mut core = self.lock();
        if core.touched {
            log::debug!("Discarding late load of {}, counter already changed", value);
            return;
        }
        core.state.value = value;
        self.publish(&core);
    }
}

fn decode_stored(result: Result<Option<i64>>) -> u64 {
    match result {
        Ok(Some(v)) => u64::try_from(v).unwrap_or_else(|_| {
            log::warn!("Ignoring negative stored counter {}", v);
            0
        }),
        Ok(None) => 0,
        Err(e) => {
            log::warn!("Could not read stored counter: {:#}", e);
            0
        }
    }
}

async fn run_timer(counter: Weak<Inner>, session: u64, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        let Some(inner) = counter.upgrade() else {
            break;
        };
        if !inner.advance(Some(session)) {
            log::debug!("Timer session {} ended", session);
            break;
        }
    }
}

/// Cheap to clone; all clones drive the same counter.
#[derive(Clone)]
pub struct PersistentCounter {
    inner: Arc<Inner>,
}

impl PersistentCounter {
    /// Open on the current tokio runtime.
    pub fn open(store: Arc<dyn KeyValueStore>, interval: Duration) -> Result<Self> {
        let handle = Handle::try_current().context("The counter needs a tokio runtime")?;
        Ok(Self::open_with_handle(handle, store, interval))
    }

    /// Restores the stored value. If the store answers immediately the
    /// counter starts with it; otherwise it starts at 0 and picks the value
    /// up (and notifies subscribers) once the read completes.
    pub fn open_with_handle(
        handle: Handle,
        store: Arc<dyn KeyValueStore>,
        interval: Duration,
    ) -> Self {
        let mut load = store.get(COUNTER_KEY);
        let ready = (&mut load).now_or_never();
        let deferred = ready.is_none();
        let initial = ready.map(decode_stored).unwrap_or(0);

        let state = CounterState {
            value: initial,
            running: false,
        };
        let (updates, _) = watch::channel(state);
        let inner = Arc::new(Inner {
            core: Mutex::new(Core {
                state,
                session: 0,
                touched: false,
            }),
            updates,
            store,
            handle,
            interval,
            writes: Arc::new(WriteTracker::default()),
        });

        if deferred {
            let counter = Arc::downgrade(&inner);
            inner.handle.spawn(async move {
                let value = decode_stored(load.await);
                if let Some(inner) = counter.upgrade() {
                    inner.apply_loaded(value);
                }
            });
        }

        Self { inner }
    }

    pub fn state(&self) -> CounterState {
        self.inner.lock().state
    }

    pub fn value(&self) -> u64 {
        self.state().value
    }

    pub fn is_running(&self) -> bool {
        self.state().running
    }

    /// Receives the state after every change.
    pub fn subscribe(&self) -> watch::Receiver<CounterState> {
        self.inner.updates.subscribe()
    }

    pub fn toggle_running(&self) {
        let inner = &self.inner;
        let mut core = inner.lock();
        core.state.running = !core.state.running;
        if core.state.running {
            core.session += 1;
            let session = core.session;
            inner
                .handle
                .spawn(run_timer(Arc::downgrade(inner), session, inner.interval));
            log::debug!("Counter running from {} (session {})", core.state.value, session);
        } else {
            log::debug!("Counter paused at {}", core.state.value);
        }
        inner.publish(&core);
    }

    /// Stops the counter and stores 0.
    pub fn reset(&self) {
        let inner = &self.inner;
        let mut core = inner.lock();
        core.state = CounterState::default();
        core.touched = true;
        inner.persist(0);
        inner.publish(&core);
        log::debug!("Counter reset");
    }

    /// One increment, only while running. Returns whether it happened.
    pub fn tick(&self) -> bool {
        self.inner.advance(None)
    }

    /// Wait for every write issued so far to finish.
    pub async fn settle(&self) {
        self.inner.writes.wait_idle().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::PrefsFile;
    use crate::store::{DataStore, SharedPrefs};
    use futures::future::{self, BoxFuture};
    use std::collections::HashMap;
    use tokio::sync::oneshot;
    use tokio::time::sleep;

    #[derive(Default)]
    struct MemoryStore {
        values: Mutex<HashMap<String, i64>>,
        writes: Mutex<Vec<i64>>,
    }

    impl MemoryStore {
        fn with_value(value: i64) -> Self {
            let store = Self::default();
            store
                .values
                .lock()
                .unwrap()
                .insert(COUNTER_KEY.to_string(), value);
            store
        }

        fn stored(&self) -> Option<i64> {
            self.values.lock().unwrap().get(COUNTER_KEY).copied()
        }

        fn writes(&self) -> Vec<i64> {
            self.writes.lock().unwrap().clone()
        }
    }

    impl KeyValueStore for MemoryStore {
        fn get(&self, key: &str) -> BoxFuture<'static, Result<Option<i64>>> {
            let value = self.values.lock().unwrap().get(key).copied();
            future::ready(Ok(value)).boxed()
        }

        fn set(&self, key: &str, value: i64) -> BoxFuture<'static, Result<()>> {
            self.values.lock().unwrap().insert(key.to_string(), value);
            self.writes.lock().unwrap().push(value);
            future::ready(Ok(())).boxed()
        }
    }

    struct FailingStore;

    impl KeyValueStore for FailingStore {
        fn get(&self, _key: &str) -> BoxFuture<'static, Result<Option<i64>>> {
            future::ready(Err(anyhow::anyhow!("permission denied"))).boxed()
        }

        fn set(&self, _key: &str, _value: i64) -> BoxFuture<'static, Result<()>> {
            future::ready(Err(anyhow::anyhow!("storage full"))).boxed()
        }
    }

    /// Reads only complete when the test says so.
    struct GatedStore {
        gate: Mutex<Option<oneshot::Receiver<i64>>>,
    }

    impl KeyValueStore for GatedStore {
        fn get(&self, _key: &str) -> BoxFuture<'static, Result<Option<i64>>> {
            let rx = self.gate.lock().unwrap().take();
            async move {
                match rx {
                    Some(rx) => Ok(rx.await.ok()),
                    None => Ok(None),
                }
            }
            .boxed()
        }

        fn set(&self, _key: &str, _value: i64) -> BoxFuture<'static, Result<()>> {
            future::ready(Ok(())).boxed()
        }
    }

    #[tokio::test]
    async fn test_starts_paused_with_stored_value() {
        let store = Arc::new(MemoryStore::with_value(5));
        let counter = PersistentCounter::open(store, DEFAULT_TICK_INTERVAL).unwrap();
        assert_eq!(
            counter.state(),
            CounterState {
                value: 5,
                running: false
            }
        );
    }

    #[tokio::test]
    async fn test_n_ticks_add_n() {
        let store = Arc::new(MemoryStore::with_value(5));
        let counter = PersistentCounter::open(store.clone(), DEFAULT_TICK_INTERVAL).unwrap();
        counter.toggle_running();
        for _ in 0..4 {
            assert!(counter.tick());
        }
        assert_eq!(counter.value(), 9);
        // One write per tick, each carrying the full value.
        assert_eq!(store.writes(), vec![6, 7, 8, 9]);
    }

    #[tokio::test]
    async fn test_tick_while_paused_does_nothing() {
        let store = Arc::new(MemoryStore::default());
        let counter = PersistentCounter::open(store.clone(), DEFAULT_TICK_INTERVAL).unwrap();
        assert!(!counter.tick());
        assert_eq!(counter.value(), 0);
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn test_toggle_is_its_own_inverse() {
        let store = Arc::new(MemoryStore::with_value(2));
        let counter = PersistentCounter::open(store.clone(), DEFAULT_TICK_INTERVAL).unwrap();
        let before = counter.state();
        counter.toggle_running();
        assert!(counter.is_running());
        counter.toggle_running();
        assert_eq!(counter.state(), before);
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn test_reset_from_any_state() {
        let store = Arc::new(MemoryStore::with_value(12));
        let counter = PersistentCounter::open(store.clone(), DEFAULT_TICK_INTERVAL).unwrap();

        counter.toggle_running();
        counter.tick();
        counter.reset();
        assert_eq!(counter.state(), CounterState::default());
        // Visible in the store as soon as reset returns.
        assert_eq!(store.stored(), Some(0));

        counter.reset();
        assert_eq!(counter.state(), CounterState::default());
        assert_eq!(store.writes(), vec![13, 0, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_scenario() {
        let store = Arc::new(MemoryStore::default());
        let counter = PersistentCounter::open(store.clone(), DEFAULT_TICK_INTERVAL).unwrap();

        counter.toggle_running();
        sleep(Duration::from_millis(3500)).await;
        assert_eq!(counter.value(), 3);

        counter.toggle_running();
        sleep(Duration::from_millis(5000)).await;
        assert_eq!(counter.value(), 3);
        assert!(!counter.is_running());

        counter.reset();
        assert_eq!(counter.state(), CounterState::default());
        sleep(Duration::from_millis(2000)).await;
        assert_eq!(counter.value(), 0);
        assert_eq!(store.stored(), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_quick_pause_resume_keeps_one_timer() {
        let store = Arc::new(MemoryStore::default());
        let counter = PersistentCounter::open(store, DEFAULT_TICK_INTERVAL).unwrap();

        counter.toggle_running(); // first tick due at 1000
        sleep(Duration::from_millis(500)).await;
        counter.toggle_running();
        counter.toggle_running(); // new session, first tick due at 1500

        sleep(Duration::from_millis(700)).await; // t = 1200
        assert_eq!(counter.value(), 0);

        sleep(Duration::from_millis(1500)).await; // t = 2700
        assert_eq!(counter.value(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_stops_timer() {
        let store = Arc::new(MemoryStore::default());
        let counter = PersistentCounter::open(store, DEFAULT_TICK_INTERVAL).unwrap();
        counter.toggle_running();
        sleep(Duration::from_millis(1500)).await;
        assert_eq!(counter.value(), 1);

        counter.reset();
        sleep(Duration::from_millis(3000)).await;
        assert_eq!(counter.state(), CounterState::default());
    }

    #[tokio::test]
    async fn test_failed_writes_do_not_stop_counting() {
        let counter =
            PersistentCounter::open(Arc::new(FailingStore), DEFAULT_TICK_INTERVAL).unwrap();
        // Unreadable store reads as 0.
        assert_eq!(counter.value(), 0);
        counter.toggle_running();
        counter.tick();
        counter.tick();
        counter.settle().await;
        assert_eq!(counter.value(), 2);
        counter.reset();
        counter.settle().await;
        assert_eq!(counter.value(), 0);
    }

    #[tokio::test]
    async fn test_negative_stored_value_reads_as_zero() {
        let store = Arc::new(MemoryStore::with_value(-4));
        let counter = PersistentCounter::open(store, DEFAULT_TICK_INTERVAL).unwrap();
        assert_eq!(counter.value(), 0);
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let store = Arc::new(MemoryStore::default());
        let counter = PersistentCounter::open(store, DEFAULT_TICK_INTERVAL).unwrap();
        let mut rx = counter.subscribe();

        counter.toggle_running();
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().running);

        counter.tick();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().value, 1);
    }

    #[tokio::test]
    async fn test_late_load_applies_when_untouched() {
        let (tx, rx) = oneshot::channel();
        let store = Arc::new(GatedStore {
            gate: Mutex::new(Some(rx)),
        });
        let counter = PersistentCounter::open(store, DEFAULT_TICK_INTERVAL).unwrap();
        assert_eq!(counter.value(), 0);

        let mut updates = counter.subscribe();
        tx.send(21).unwrap();
        updates.wait_for(|s| s.value == 21).await.unwrap();
        assert!(!counter.is_running());
    }

    #[tokio::test]
    async fn test_late_load_does_not_override_ticks() {
        let (tx, rx) = oneshot::channel();
        let store = Arc::new(GatedStore {
            gate: Mutex::new(Some(rx)),
        });
        let counter = PersistentCounter::open(store, DEFAULT_TICK_INTERVAL).unwrap();
        counter.toggle_running();
        counter.tick();

        tx.send(50).unwrap();
        // Let the loader run.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(counter.value(), 1);
    }

    #[tokio::test]
    async fn test_shared_prefs_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("CounterPrefs.json");

        {
            let store = Arc::new(SharedPrefs::open(PrefsFile::new(&path)));
            let counter = PersistentCounter::open(store, DEFAULT_TICK_INTERVAL).unwrap();
            counter.toggle_running();
            for _ in 0..4 {
                counter.tick();
            }
            counter.settle().await;
        }

        let store = Arc::new(SharedPrefs::open(PrefsFile::new(&path)));
        let counter = PersistentCounter::open(store, DEFAULT_TICK_INTERVAL).unwrap();
        assert_eq!(
            counter.state(),
            CounterState {
                value: 4,
                running: false
            }
        );
    }

    #[tokio::test]
    async fn test_data_store_round_trip_loads_asynchronously() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("CounterPrefs.preferences.json");

        {
            let store = Arc::new(DataStore::open(PrefsFile::new(&path), &Handle::current()));
            let counter = PersistentCounter::open(store, DEFAULT_TICK_INTERVAL).unwrap();
            counter.toggle_running();
            counter.tick();
            counter.tick();
            counter.tick();
            counter.settle().await;
        }

        let store = Arc::new(DataStore::open(PrefsFile::new(&path), &Handle::current()));
        let counter = PersistentCounter::open(store, DEFAULT_TICK_INTERVAL).unwrap();
        // Asynchronous store: starts at 0, then catches up.
        assert_eq!(counter.value(), 0);
        let mut updates = counter.subscribe();
        updates.wait_for(|s| s.value == 3).await.unwrap();
        assert!(!counter.is_running());
    }

    #[tokio::test]
    async fn test_reset_after_ticks_persists_zero_with_data_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("CounterPrefs.preferences.json");
        let store = Arc::new(DataStore::open(PrefsFile::new(&path), &Handle::current()));
        let counter = PersistentCounter::open(store.clone(), DEFAULT_TICK_INTERVAL).unwrap();

        counter.toggle_running();
        counter.tick();
        counter.tick();
        counter.reset();
        counter.settle().await;
        assert_eq!(store.get(COUNTER_KEY).await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_reset_survives_reopen_on_both_backends() {
        let dir = tempfile::tempdir().unwrap();
        let shared_path = dir.path().join("CounterPrefs.json");
        let data_path = dir.path().join("CounterPrefs.preferences.json");

        {
            let shared = Arc::new(SharedPrefs::open(PrefsFile::new(&shared_path)));
            let data = Arc::new(DataStore::open(PrefsFile::new(&data_path), &Handle::current()));
            let stores: [Arc<dyn KeyValueStore>; 2] = [shared, data];
            for store in stores {
                let counter = PersistentCounter::open(store, DEFAULT_TICK_INTERVAL).unwrap();
                counter.toggle_running();
                for _ in 0..3 {
                    counter.tick();
                }
                counter.reset();
                counter.settle().await;
            }
        }

        // Stored as an explicit 0, not merely absent.
        let shared = SharedPrefs::open(PrefsFile::new(&shared_path));
        assert!(matches!(
            shared.get(COUNTER_KEY).now_or_never(),
            Some(Ok(Some(0)))
        ));
        let data = DataStore::open(PrefsFile::new(&data_path), &Handle::current());
        assert_eq!(data.get(COUNTER_KEY).await.unwrap(), Some(0));

        let counter = PersistentCounter::open(Arc::new(shared), DEFAULT_TICK_INTERVAL).unwrap();
        assert_eq!(counter.state(), CounterState::default());
    }

    #[test]
    fn test_open_outside_runtime_is_an_error() {
        let store = Arc::new(MemoryStore::default());
        assert!(PersistentCounter::open(store, DEFAULT_TICK_INTERVAL).is_err());
    }
}
