use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[cfg(not(target_os = "android"))]
use fs2::FileExt;

/// On-disk preference contents: key -> integer.
pub type Prefs = BTreeMap<String, i64>;

/// A JSON preference file shared by both store adapters.
#[derive(Debug, Clone)]
pub struct PrefsFile {
    path: PathBuf,
}

impl PrefsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Helper to get a sidecar lock file path (e.g., "CounterPrefs.json.lock")
    #[cfg(not(target_os = "android"))]
    fn get_lock_path(file_path: &Path) -> PathBuf {
        let mut lock_path = file_path.to_path_buf();
        if let Some(ext) = lock_path.extension() {
            let mut new_ext = ext.to_os_string();
            new_ext.push(".lock");
            lock_path.set_extension(new_ext);
        } else {
            lock_path.set_extension("lock");
        }
        lock_path
    }

    /// Execute a closure while holding an exclusive lock on the sidecar file.
    pub fn with_lock<F, T>(file_path: &Path, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        #[cfg(target_os = "android")]
        {
            let _ = file_path;
            f()
        }

        #[cfg(not(target_os = "android"))]
        {
            let lock_path = Self::get_lock_path(file_path);
            let file = fs::OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&lock_path)
                .with_context(|| format!("Failed to open lock file: {:?}", lock_path))?;

            file.lock_exclusive()?;
            let result = f();
            file.unlock()?;
            result
        }
    }

    /// Atomic write: Write to .tmp file then rename
    pub fn atomic_write<P: AsRef<Path>, C: AsRef<[u8]>>(path: P, contents: C) -> Result<()> {
        let path = path.as_ref();
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, contents)
            .with_context(|| format!("Failed to write {:?}", tmp_path))?;
        fs::rename(&tmp_path, path)
            .with_context(|| format!("Failed to replace {:?}", path))?;
        Ok(())
    }

    pub fn save(&self, prefs: &Prefs) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.exists()
        {
            fs::create_dir_all(parent)?;
        }
        Self::with_lock(&self.path, || {
            let json = serde_json::to_string_pretty(prefs)?;
            Self::atomic_write(&self.path, json)?;
            Ok(())
        })
    }

    /// A missing file is an empty map.
    pub fn load(&self) -> Result<Prefs> {
        if !self.path.exists() {
            return Ok(Prefs::new());
        }
        Self::with_lock(&self.path, || {
            let json = fs::read_to_string(&self.path)?;
            let prefs = serde_json::from_str::<Prefs>(&json)
                .with_context(|| format!("Corrupt preference file: {:?}", self.path))?;
            Ok(prefs)
        })
    }

    /// Like `load`, but an unreadable file degrades to an empty map.
    pub fn load_or_default(&self) -> Prefs {
        match self.load() {
            Ok(prefs) => prefs,
            Err(e) => {
                log::warn!("Ignoring unreadable preferences: {:#}", e);
                Prefs::new()
            }
        }
    }
}
