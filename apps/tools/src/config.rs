use std::{fs, path::Path};

use serde::Deserialize;
use storage::DEFAULT_HISTORY_CAPACITY;
use tracing::warn;

pub const SETTINGS_FILE: &str = "chat.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server_url: String,
    pub database_url: String,
    pub history_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8080".into(),
            database_url: "sqlite://./data/chat_history.db".into(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    server_url: Option<String>,
    database_url: Option<String>,
    history_capacity: Option<usize>,
}

pub fn load_settings() -> Settings {
    load_settings_from(Path::new(SETTINGS_FILE), |key| std::env::var(key).ok())
}

/// Defaults, then `path` if it exists, then the environment. Later sources
/// win; the `APP__` spelling wins over the `CHAT_` one.
pub fn load_settings_from(path: &Path, env: impl Fn(&str) -> Option<String>) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        match toml::from_str::<FileSettings>(&raw) {
            Ok(file_cfg) => {
                if let Some(v) = file_cfg.server_url {
                    settings.server_url = v;
                }
                if let Some(v) = file_cfg.database_url {
                    settings.database_url = v;
                }
                if let Some(v) = file_cfg.history_capacity {
                    settings.history_capacity = v;
                }
            }
            Err(err) => warn!(path = %path.display(), "config: ignoring unreadable settings file: {err}"),
        }
    }

    if let Some(v) = env("CHAT_SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = env("APP__SERVER_URL") {
        settings.server_url = v;
    }

    if let Some(v) = env("CHAT_DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = env("APP__DATABASE_URL") {
        settings.database_url = v;
    }

    if let Some(v) = env("APP__HISTORY_CAPACITY") {
        match v.parse::<usize>() {
            Ok(parsed) if parsed > 0 => settings.history_capacity = parsed,
            _ => warn!(value = %v, "config: ignoring invalid APP__HISTORY_CAPACITY"),
        }
    }

    settings
}
