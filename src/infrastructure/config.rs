use crate::domain::search::{DEFAULT_REGION, DEFAULT_SEARCH_PHRASE, SearchPhrasing};
use crate::infrastructure::error::InfraError;
use serde_json::Value;
use std::fs;
use std::path::Path;

const APP_JSON: &str = "app.json";
const DEFAULT_APP_NAME: &str = "Productivity Hub";

const BACKEND_URL_KEYS: &[&str] = &["PRODUCTIVITY_HUB_SUPABASE_URL", "SUPABASE_URL"];
const BACKEND_ANON_KEY_KEYS: &[&str] = &["PRODUCTIVITY_HUB_SUPABASE_ANON_KEY", "SUPABASE_ANON_KEY"];
const MAPS_API_KEY_KEYS: &[&str] = &["PRODUCTIVITY_HUB_MAPS_API_KEY", "GOOGLE_MAPS_API_KEY"];
const MAPS_KEY_ENDPOINT_KEYS: &[&str] = &["PRODUCTIVITY_HUB_MAPS_KEY_ENDPOINT"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub url: String,
    pub anon_key: String,
    pub email_redirect_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapsConfig {
    pub key_endpoint: Option<String>,
    pub api_key: Option<String>,
    pub phrasing: SearchPhrasing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub app_name: String,
    /// `None` keeps the app local-only.
    pub backend: Option<BackendConfig>,
    pub maps: MapsConfig,
}

fn default_app_json() -> Value {
    serde_json::json!({
        "schema": 1,
        "appName": DEFAULT_APP_NAME,
        "backend": {
            "url": null,
            "anonKey": null,
            "emailRedirectTo": null
        },
        "maps": {
            "keyEndpoint": null,
            "apiKey": null,
            "region": DEFAULT_REGION,
            "defaultQuery": DEFAULT_SEARCH_PHRASE
        }
    })
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    let path = config_dir.join(APP_JSON);
    if !path.exists() {
        let formatted = serde_json::to_string_pretty(&default_app_json())?;
        fs::write(path, format!("{formatted}\n"))?;
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_app_config(config_dir: &Path) -> Result<AppConfig, InfraError> {
    load_app_config_with_lookup(config_dir, |key| std::env::var(key).ok())
}

/// Environment values win over `app.json`.
pub fn load_app_config_with_lookup<F>(config_dir: &Path, lookup: F) -> Result<AppConfig, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let app = read_config(&config_dir.join(APP_JSON))?;

    let app_name = string_at(&app, &["appName"]).unwrap_or_else(|| DEFAULT_APP_NAME.to_string());

    let url = optional_lookup_value(&lookup, BACKEND_URL_KEYS).or_else(|| string_at(&app, &["backend", "url"]));
    let anon_key = optional_lookup_value(&lookup, BACKEND_ANON_KEY_KEYS)
        .or_else(|| string_at(&app, &["backend", "anonKey"]));
    let backend = match (url, anon_key) {
        (Some(url), Some(anon_key)) => Some(BackendConfig {
            url,
            anon_key,
            email_redirect_to: string_at(&app, &["backend", "emailRedirectTo"]),
        }),
        (Some(_), None) => {
            return Err(InfraError::InvalidConfig(format!(
                "backend url is set but the anon key is missing (set backend.anonKey or one of: {})",
                BACKEND_ANON_KEY_KEYS.join(", ")
            )));
        }
        (None, _) => None,
    };

    let maps = MapsConfig {
        key_endpoint: optional_lookup_value(&lookup, MAPS_KEY_ENDPOINT_KEYS)
            .or_else(|| string_at(&app, &["maps", "keyEndpoint"])),
        api_key: optional_lookup_value(&lookup, MAPS_API_KEY_KEYS).or_else(|| string_at(&app, &["maps", "apiKey"])),
        phrasing: SearchPhrasing {
            default_phrase: string_at(&app, &["maps", "defaultQuery"])
                .unwrap_or_else(|| DEFAULT_SEARCH_PHRASE.to_string()),
            region: string_at(&app, &["maps", "region"]).unwrap_or_else(|| DEFAULT_REGION.to_string()),
        },
    };

    Ok(AppConfig {
        app_name,
        backend,
        maps,
    })
}

fn string_at(value: &Value, path: &[&str]) -> Option<String> {
    path.iter()
        .try_fold(value, |current, key| current.get(*key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

fn optional_lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    for key in keys {
        if let Some(value) = lookup(key) {
            let normalized = value.trim();
            if !normalized.is_empty() {
                return Some(normalized.to_string());
            }
        }
    }
    None
}
