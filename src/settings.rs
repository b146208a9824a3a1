use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

pub const REMOTE_URL_ENV: &str = "THOUGHTSYNC_REMOTE_URL";
pub const AUTH_TOKEN_ENV: &str = "THOUGHTSYNC_AUTH_TOKEN";
pub const DEBUG_ENV: &str = "THOUGHTSYNC_DEBUG";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncSettings {
    pub remote_url: String,
    pub thoughts_path: String,
    pub auth_token: Option<String>,
    /// Automatic passes stop retrying a capture once it has failed this often.
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub sync_interval_secs: u64,
    pub capture_debounce_ms: u64,
    pub request_timeout_secs: u64,
    pub max_text_len: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            remote_url: "http://localhost:3000".into(),
            thoughts_path: "/api/thoughts".into(),
            auth_token: None,
            max_retries: 5,
            backoff_base_ms: 30_000,
            sync_interval_secs: 300,
            capture_debounce_ms: 2_000,
            request_timeout_secs: 15,
            max_text_len: 10_000,
        }
    }
}

impl SyncSettings {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }

    pub fn capture_debounce(&self) -> Duration {
        Duration::from_millis(self.capture_debounce_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Apply `THOUGHTSYNC_*` environment overrides on top of the file.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(REMOTE_URL_ENV) {
            if !url.trim().is_empty() {
                self.remote_url = url.trim().to_string();
            }
        }
        if let Ok(token) = std::env::var(AUTH_TOKEN_ENV) {
            if !token.trim().is_empty() {
                self.auth_token = Some(token.trim().to_string());
            }
        }
        if debug_enabled() {
            self.sync_interval_secs = 5;
        }
        self
    }
}

pub fn debug_enabled() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct UserSettings {
    #[serde(default)]
    sync: SyncSettings,
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("Ignoring unreadable settings at {}: {err}", path.display());
                UserSettings::default()
            })
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn sync(&self) -> SyncSettings {
        self.read().sync.clone()
    }

    pub fn update_sync(&self, settings: SyncSettings) -> Result<()> {
        let mut guard = self.write();
        guard.sync = settings;
        self.persist(&guard)
    }

    fn read(&self) -> RwLockReadGuard<'_, UserSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, UserSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
