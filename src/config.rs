use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Base URL of the realtime database's HTTP gateway.
    pub backend_host: Option<String>,
    /// Database/module name on the gateway.
    pub backend_module: Option<String>,
    /// Admin token presented to the gateway as a bearer credential.
    pub backend_token: Option<String>,
    /// Root directory of the object-storage bucket.
    pub storage_dir: Option<PathBuf>,
    /// Public base URL for stored images; when unset, responses carry `url: null`.
    pub cdn_base_url: Option<String>,
    pub max_image_bytes: usize,
    pub max_body_bytes: usize,
    pub fetch_max_bytes: usize,
    pub fetch_timeout_seconds: u64,
}

impl Config {
    pub fn from_env() -> Self {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = parse_u16("PORT", 8080);
        let backend_host = non_empty_var("BACKEND_HOST");
        let backend_module = non_empty_var("BACKEND_MODULE");
        let backend_token = non_empty_var("BACKEND_ADMIN_TOKEN");
        let storage_dir = non_empty_var("STORAGE_DIR").map(PathBuf::from);
        let cdn_base_url = non_empty_var("CDN_BASE_URL");
        let max_image_bytes = parse_usize("MAX_IMAGE_BYTES", 512 * 1024);
        let max_body_bytes = parse_usize("MAX_BODY_BYTES", 2 * 1024 * 1024);
        let fetch_max_bytes = parse_usize("FETCH_MAX_BYTES", 8 * 1024 * 1024);
        let fetch_timeout_seconds = parse_u64("FETCH_TIMEOUT_SECONDS", 15);
        Self {
            host,
            port,
            backend_host,
            backend_module,
            backend_token,
            storage_dir,
            cdn_base_url,
            max_image_bytes,
            max_body_bytes,
            fetch_max_bytes,
            fetch_timeout_seconds,
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

fn parse_u16(name: &str, default: u16) -> u16 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn parse_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn parse_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::Config;
    use std::path::PathBuf;

    /// Minimal config for router tests; collaborators are injected separately.
    pub(crate) fn test_config(
        storage_dir: Option<PathBuf>,
        cdn_base_url: Option<String>,
    ) -> Config {
        Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            backend_host: Some("http://127.0.0.1:3000".to_string()),
            backend_module: Some("game".to_string()),
            backend_token: Some("test-token".to_string()),
            storage_dir,
            cdn_base_url,
            max_image_bytes: 512 * 1024,
            max_body_bytes: 2 * 1024 * 1024,
            fetch_max_bytes: 8 * 1024 * 1024,
            fetch_timeout_seconds: 1,
        }
    }
}
