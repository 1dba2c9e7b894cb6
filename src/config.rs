//! Configuration module for StoreWatch.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::time::Duration;

/// How business-hour windows that cross midnight (`end < start`) are matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MidnightWindows {
    /// The inclusive `[start, end]` test never matches, so the window
    /// contributes nothing.
    #[default]
    Ignore,
    /// The window wraps past midnight and spans `end - start + 24h`.
    Wrap,
}

impl MidnightWindows {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ignore" => Some(Self::Ignore),
            "wrap" => Some(Self::Wrap),
            _ => None,
        }
    }
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the web server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "storewatch.db")
    pub db_path: String,
    /// Directory receiving exported report files (default: "reports")
    pub export_dir: String,
    /// Locations taken from the roster when a trigger names none (default: 10)
    pub roster_limit: usize,
    /// Upper bound on a single location's computation (default: 30s)
    pub location_timeout: Duration,
    pub midnight_windows: MidnightWindows,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "storewatch.db".to_string(),
            export_dir: "reports".to_string(),
            roster_limit: 10,
            location_timeout: Duration::from_secs(30),
            midnight_windows: MidnightWindows::Ignore,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `STOREWATCH_HTTP_PORT`: HTTP port (default: 8080)
    /// - `STOREWATCH_DB_PATH`: Database file path (default: "storewatch.db")
    /// - `STOREWATCH_EXPORT_DIR`: Export directory (default: "reports")
    /// - `STOREWATCH_ROSTER_LIMIT`: Default roster size (default: 10)
    /// - `STOREWATCH_LOCATION_TIMEOUT_SECS`: Per-location timeout (default: 30)
    /// - `STOREWATCH_MIDNIGHT_WINDOWS`: `ignore` or `wrap` (default: ignore)
    ///
    /// Values that fail to parse keep their default.
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Ok(port_str) = env::var("STOREWATCH_HTTP_PORT") {
            if let Ok(port) = port_str.parse() {
                cfg.http_port = port;
            }
        }

        if let Ok(db_path) = env::var("STOREWATCH_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Ok(export_dir) = env::var("STOREWATCH_EXPORT_DIR") {
            cfg.export_dir = export_dir;
        }

        if let Ok(limit_str) = env::var("STOREWATCH_ROSTER_LIMIT") {
            if let Ok(limit) = limit_str.parse() {
                cfg.roster_limit = limit;
            }
        }

        if let Ok(secs_str) = env::var("STOREWATCH_LOCATION_TIMEOUT_SECS") {
            match secs_str.parse::<u64>() {
                Ok(secs) if secs > 0 => cfg.location_timeout = Duration::from_secs(secs),
                _ => tracing::warn!("Ignoring invalid STOREWATCH_LOCATION_TIMEOUT_SECS={}", secs_str),
            }
        }

        if let Ok(mode) = env::var("STOREWATCH_MIDNIGHT_WINDOWS") {
            match MidnightWindows::parse(&mode) {
                Some(m) => cfg.midnight_windows = m,
                None => tracing::warn!("Ignoring invalid STOREWATCH_MIDNIGHT_WINDOWS={}", mode),
            }
        }

        cfg
    }
}
