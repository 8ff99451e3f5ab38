// File: src/paths.rs
use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// Set from the Android side, which only knows its private files directory.
static ANDROID_FILES_DIR: OnceLock<PathBuf> = OnceLock::new();

pub const TEST_DIR_VAR: &str = "PCOUNT_TEST_DIR";

#[derive(Clone, Copy)]
enum Location {
    Data,
    Config,
}

impl Location {
    fn name(self) -> &'static str {
        match self {
            Location::Data => "data",
            Location::Config => "config",
        }
    }

    fn under(self, root: &Path) -> PathBuf {
        root.join(self.name())
    }

    fn dir(self) -> Result<PathBuf> {
        let dir = if let Some(root) = ANDROID_FILES_DIR.get() {
            self.under(root)
        } else if let Ok(root) = env::var(TEST_DIR_VAR) {
            self.under(Path::new(&root))
        } else {
            let proj = ProjectDirs::from("com", "pcount", "pcount").ok_or_else(|| {
                anyhow::anyhow!("No home directory for the {} folder", self.name())
            })?;
            match self {
                Location::Data => proj.data_dir().to_path_buf(),
                Location::Config => proj.config_dir().to_path_buf(),
            }
        };
        create_dir(dir)
    }
}

fn create_dir(dir: PathBuf) -> Result<PathBuf> {
    fs::create_dir_all(&dir).with_context(|| format!("Failed to create directory: {:?}", dir))?;
    Ok(dir)
}

pub struct AppPaths;

impl AppPaths {
    /// Later calls are ignored; the first directory handed over wins.
    pub fn init_android_path(path: String) {
        let _ = ANDROID_FILES_DIR.set(PathBuf::from(path));
    }

    pub fn get_config_file_path() -> Result<PathBuf> {
        Ok(Location::Config.dir()?.join("config.toml"))
    }

    pub fn get_log_path() -> Result<PathBuf> {
        Ok(Location::Data.dir()?.join("pcount.log"))
    }

    /// Synchronous preference files, laid out like Android's `shared_prefs/`.
    pub fn get_shared_prefs_path(name: &str) -> Result<PathBuf> {
        let dir = create_dir(Location::Data.dir()?.join("shared_prefs"))?;
        Ok(dir.join(format!("{}.json", name)))
    }

    pub fn get_data_store_path(name: &str) -> Result<PathBuf> {
        let dir = create_dir(Location::Data.dir()?.join("datastore"))?;
        Ok(dir.join(format!("{}.preferences.json", name)))
    }
}
