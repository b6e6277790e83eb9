use std::{collections::HashMap, fs};

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server_url: String,
    pub auth_token: String,
    pub user_id: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8443".into(),
            auth_token: "dev-token".into(),
            user_id: 1,
        }
    }
}

/// Defaults, overridden by `client.toml`, overridden by `APP__*` env vars.
pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("client.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            apply_file_overrides(&mut settings, &file_cfg);
        }
    }

    if let Ok(v) = std::env::var("APP__SERVER_URL") {
        settings.server_url = v;
    }
    if let Ok(v) = std::env::var("APP__AUTH_TOKEN") {
        settings.auth_token = v;
    }
    if let Ok(v) = std::env::var("APP__USER_ID") {
        if let Ok(parsed) = v.parse::<i64>() {
            settings.user_id = parsed;
        }
    }

    settings
}

fn apply_file_overrides(settings: &mut Settings, file_cfg: &HashMap<String, String>) {
    if let Some(v) = file_cfg.get("server_url") {
        settings.server_url = v.clone();
    }
    if let Some(v) = file_cfg.get("auth_token") {
        settings.auth_token = v.clone();
    }
    if let Some(v) = file_cfg.get("user_id") {
        if let Ok(parsed) = v.parse::<i64>() {
            settings.user_id = parsed;
        }
    }
}
