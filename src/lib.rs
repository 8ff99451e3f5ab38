// File: src/lib.rs
pub mod config;
pub mod counter;
pub mod paths;
pub mod runtime;
pub mod storage;
pub mod store;

#[cfg(feature = "tui")]
pub mod tui;

// --- ANDROID SUPPORT ---
#[cfg(target_os = "android")]
pub mod mobile;

#[cfg(target_os = "android")]
uniffi::setup_scaffolding!();
