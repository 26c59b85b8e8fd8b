use std::{collections::HashMap, fs, path::Path};

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub identity_url: String,
    pub identity_api_key: String,
    pub reset_redirect_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            identity_url: "http://127.0.0.1:54321".into(),
            identity_api_key: "dev-anon-key".into(),
            reset_redirect_url: "http://localhost:5173/reset-password".into(),
        }
    }
}

/// Defaults, then the optional config file, then environment overrides.
pub fn load_settings(path: impl AsRef<Path>) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            if let Some(v) = file_cfg.get("identity_url") {
                settings.identity_url = v.clone();
            }
            if let Some(v) = file_cfg.get("identity_api_key") {
                settings.identity_api_key = v.clone();
            }
            if let Some(v) = file_cfg.get("reset_redirect_url") {
                settings.reset_redirect_url = v.clone();
            }
        }
    }

    if let Ok(v) = std::env::var("IDENTITY_URL") {
        settings.identity_url = v;
    }
    if let Ok(v) = std::env::var("IDENTITY_API_KEY") {
        settings.identity_api_key = v;
    }
    if let Ok(v) = std::env::var("RESET_REDIRECT_URL") {
        settings.reset_redirect_url = v;
    }

    settings
}
