use std::path::PathBuf;
use std::{fmt, fs};

use chrono::Utc;
use colored::Colorize;
use error_stack::ResultExt;
use lazy_regex::regex;
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::settings::Settings;

#[derive(Debug)]
pub struct ClientIdError;

impl fmt::Display for ClientIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Client id error")
    }
}

impl std::error::Error for ClientIdError {}

pub type ClientIdResult<T> = error_stack::Result<T, ClientIdError>;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";
const SOURCE_PAGES: [&str; 2] = ["https://soundcloud.com", "https://soundcloud.com/discover"];

#[derive(Debug, Serialize, Deserialize)]
struct CachedClientId {
    client_id: String,
    fetched_at: i64,
}

/// Obtains a SoundCloud client id when none is configured: cached value
/// first, otherwise scraped from the public web client and cached for a day.
/// Everything here degrades to "no client id" — scdl can self-negotiate.
pub struct ClientIdManager {
    cache_path: PathBuf,
}

impl ClientIdManager {
    pub fn new() -> ClientIdResult<Self> {
        let config_dir = Settings::config_dir().change_context(ClientIdError)?;
        Ok(Self {
            cache_path: config_dir.join(AppConfig::CLIENT_ID_CACHE_FILE_NAME),
        })
    }

    pub fn with_cache_path(cache_path: PathBuf) -> Self {
        Self { cache_path }
    }

    /// Client ids are opaque tokens; reject anything that could smuggle
    /// shell or URL metacharacters into the command line.
    pub fn is_valid_format(client_id: &str) -> bool {
        !client_id.is_empty() && regex!(r"^[a-zA-Z0-9_-]+$").is_match(client_id)
    }

    pub async fn obtain(&self) -> Option<String> {
        if let Some(cached) = self.cached() {
            return Some(cached);
        }
        for page in SOURCE_PAGES {
            if let Some(client_id) = Self::extract_from_page(page).await {
                self.cache(&client_id);
                return Some(client_id);
            }
        }
        println!(
            "{}",
            "Could not auto-generate a client id; scdl will negotiate its own".yellow()
        );
        None
    }

    pub fn clear_cache(&self) {
        let _ = fs::remove_file(&self.cache_path);
    }

    fn cached(&self) -> Option<String> {
        let content = fs::read_to_string(&self.cache_path).ok()?;
        let cached: CachedClientId = serde_json::from_str(&content).ok()?;
        let age = Utc::now().timestamp() - cached.fetched_at;
        if age > AppConfig::CLIENT_ID_CACHE_TTL_SECS {
            return None;
        }
        if !Self::is_valid_format(&cached.client_id) {
            return None;
        }
        Some(cached.client_id)
    }

    fn cache(&self, client_id: &str) {
        let cached = CachedClientId {
            client_id: client_id.to_string(),
            fetched_at: Utc::now().timestamp(),
        };
        if let Ok(serialized) = serde_json::to_string_pretty(&cached) {
            let _ = fs::write(&self.cache_path, serialized);
        }
    }

    async fn extract_from_page(page_url: &str) -> Option<String> {
        let client = reqwest::Client::new();
        let response = client
            .get(page_url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let body = response.text().await.ok()?;
        Self::extract_from_body(&body)
    }

    fn extract_from_body(body: &str) -> Option<String> {
        let assignment = regex!(r#"client_id["']?\s*[:=]\s*["']([a-zA-Z0-9]{32})["']"#);
        let query_param = regex!(r"client_id=([a-zA-Z0-9]{32})");
        let api_call = regex!(r"api(?:-v2)?\.soundcloud\.com[^\x22']*client_id=([a-zA-Z0-9]{32})");

        for pattern in [api_call, assignment, query_param] {
            if let Some(captures) = pattern.captures(body) {
                if let Some(matched) = captures.get(1) {
                    return Some(matched.as_str().to_string());
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_id_format_validation() {
        assert!(ClientIdManager::is_valid_format("aK3zY9_19-aaaaaaaaaaaaaaaaaaaaaa"));
        assert!(!ClientIdManager::is_valid_format(""));
        assert!(!ClientIdManager::is_valid_format("has spaces"));
        assert!(!ClientIdManager::is_valid_format("semi;colon"));
    }

    #[test]
    fn extracts_client_id_from_page_markup() {
        let body = r#"window.__sc_hydration = {"client_id":"AbCdEfGh1234567890AbCdEfGh123456"}"#;
        assert_eq!(
            ClientIdManager::extract_from_body(body),
            Some("AbCdEfGh1234567890AbCdEfGh123456".to_string())
        );

        let body = "src=\"https://api-v2.soundcloud.com/me?client_id=AbCdEfGh1234567890AbCdEfGh123456\"";
        assert_eq!(
            ClientIdManager::extract_from_body(body),
            Some("AbCdEfGh1234567890AbCdEfGh123456".to_string())
        );

        assert_eq!(ClientIdManager::extract_from_body("nothing here"), None);
    }

    #[test]
    fn cache_round_trip_and_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ClientIdManager::with_cache_path(dir.path().join("cache.json"));

        assert_eq!(manager.cached(), None);
        manager.cache("AbCdEfGh1234567890AbCdEfGh123456");
        assert_eq!(
            manager.cached(),
            Some("AbCdEfGh1234567890AbCdEfGh123456".to_string())
        );

        // An expired entry is ignored.
        let stale = CachedClientId {
            client_id: "AbCdEfGh1234567890AbCdEfGh123456".to_string(),
            fetched_at: Utc::now().timestamp() - AppConfig::CLIENT_ID_CACHE_TTL_SECS - 1,
        };
        fs::write(
            dir.path().join("cache.json"),
            serde_json::to_string(&stale).unwrap(),
        )
        .unwrap();
        assert_eq!(manager.cached(), None);

        manager.clear_cache();
        assert!(!dir.path().join("cache.json").exists());
    }

    #[tokio::test]
    async fn obtain_prefers_the_cached_id() {
        // With a fresh cache entry, obtain resolves without touching the
        // network, which is what backs the test-client-id command.
        let dir = tempfile::tempdir().unwrap();
        let manager = ClientIdManager::with_cache_path(dir.path().join("cache.json"));
        manager.cache("AbCdEfGh1234567890AbCdEfGh123456");

        assert_eq!(
            manager.obtain().await,
            Some("AbCdEfGh1234567890AbCdEfGh123456".to_string())
        );
    }
}
