// File: src/runtime.rs
use anyhow::{Context, Result};
use tokio::runtime::{Builder, Handle, Runtime};

/// A runtime for callers that live outside tokio, such as the Android UI
/// thread. Safe to drop from anywhere, including a tokio worker: shutdown
/// happens in the background instead of blocking the dropping thread.
pub struct BackgroundRuntime {
    runtime: Option<Runtime>,
    handle: Handle,
}

impl BackgroundRuntime {
    pub fn new() -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("pcount")
            .enable_all()
            .build()
            .context("Failed to start the async runtime")?;
        let handle = runtime.handle().clone();
        Ok(Self {
            runtime: Some(runtime),
            handle,
        })
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl Drop for BackgroundRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::{DEFAULT_TICK_INTERVAL, PersistentCounter};
    use crate::storage::PrefsFile;
    use crate::store::{DataStore, KeyValueStore};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_drop_on_a_tokio_worker() {
        let runtime = BackgroundRuntime::new().unwrap();
        let answer = runtime.handle().spawn(async { 42 }).await.unwrap();
        assert_eq!(answer, 42);
        // A plain `Runtime` panics when dropped here.
        drop(runtime);
    }

    #[test]
    fn test_counter_outside_any_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("CounterPrefs.preferences.json");
        let runtime = BackgroundRuntime::new().unwrap();

        let store: Arc<dyn KeyValueStore> =
            Arc::new(DataStore::open(PrefsFile::new(&path), runtime.handle()));
        let counter =
            PersistentCounter::open_with_handle(runtime.handle().clone(), store, DEFAULT_TICK_INTERVAL);
        counter.toggle_running();
        assert!(counter.tick());
        assert!(counter.tick());
        counter.toggle_running();
        runtime.handle().block_on(counter.settle());
        assert_eq!(counter.value(), 2);

        drop(counter);
        drop(runtime);

        let prefs = PrefsFile::new(&path).load().unwrap();
        assert_eq!(prefs.get("counter"), Some(&2));
    }
}
