use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::constants::{DEFAULT_USER_AGENT, DIGEST_TOKEN_LEN, THUMBNAIL_PREFIX, THUMBNAIL_SUFFIX};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to parse {name} as boolean: {value}")]
    ParseBool { name: String, value: String },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Origin
    pub host_name: String,
    pub api_base_url: String,
    pub media_base_url: String,
    pub boards: Vec<String>,
    pub user_agent: String,

    // Storage
    pub media_dir: PathBuf,
    pub database_path: PathBuf,
    pub max_filename_bytes: usize,

    // Scheduling
    pub poll_interval: Duration,
    pub board_concurrency: usize,
    pub thread_concurrency: usize,

    // Network
    pub request_timeout: Duration,
    pub download_timeout: Duration,
    pub download_attempts: u32,

    // Media selection
    pub target_extension: String,
    pub candidates: CandidateSettings,

    // Thumbnails
    pub ffmpeg_path: String,
    pub thumbnail_timeout: Duration,
}

/// Switches for the catalog candidate heuristic.
///
/// The root post's own extension always counts; the other signals are
/// individually tunable because they only trade recall for extra fetches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSettings {
    /// Lowercase substrings looked for in post bodies.
    pub keywords: Vec<String>,
    pub match_root_keywords: bool,
    pub match_reply_extension: bool,
    pub match_reply_keywords: bool,
}

impl Default for CandidateSettings {
    fn default() -> Self {
        Self {
            keywords: vec!["webm".to_string(), "gif".to_string()],
            match_root_keywords: true,
            match_reply_extension: true,
            match_reply_keywords: false,
        }
    }
}

const DEFAULT_BOARDS: &str = "a,b,fit,g,gif,e,h,o,n,r,s,sci,soc,v,wsg";

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if an environment variable is present but invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Origin
            host_name: env_or_default("HOST_NAME", "4chan"),
            api_base_url: trim_base_url(&env_or_default("API_BASE_URL", "https://a.4cdn.org")),
            media_base_url: trim_base_url(&env_or_default(
                "MEDIA_BASE_URL",
                "https://i.4cdn.org",
            )),
            boards: parse_list(&env_or_default("BOARDS", DEFAULT_BOARDS)),
            user_agent: env_or_default("USER_AGENT", DEFAULT_USER_AGENT),

            // Storage
            media_dir: PathBuf::from(env_or_default("MEDIA_DIR", "./webms")),
            database_path: PathBuf::from(env_or_default("DATABASE_PATH", "./data/webms.sqlite")),
            max_filename_bytes: parse_env_usize("MAX_FILENAME_BYTES", 255)?,

            // Scheduling
            poll_interval: Duration::from_secs(parse_env_u64("POLL_INTERVAL_SECS", 600)?),
            board_concurrency: parse_env_usize("BOARD_CONCURRENCY", 2)?,
            thread_concurrency: parse_env_usize("THREAD_CONCURRENCY", 4)?,

            // Network
            request_timeout: Duration::from_secs(parse_env_u64("REQUEST_TIMEOUT_SECS", 30)?),
            download_timeout: Duration::from_secs(parse_env_u64("DOWNLOAD_TIMEOUT_SECS", 300)?),
            download_attempts: parse_env_u32("DOWNLOAD_ATTEMPTS", 3)?,

            // Media selection
            target_extension: env_or_default("TARGET_EXTENSION", ".webm").to_lowercase(),
            candidates: CandidateSettings {
                keywords: parse_list(&env_or_default("CANDIDATE_KEYWORDS", "webm,gif"))
                    .into_iter()
                    .map(|k| k.to_lowercase())
                    .collect(),
                match_root_keywords: parse_env_bool("MATCH_ROOT_KEYWORDS", true)?,
                match_reply_extension: parse_env_bool("MATCH_REPLY_EXTENSION", true)?,
                match_reply_keywords: parse_env_bool("MATCH_REPLY_KEYWORDS", false)?,
            },

            // Thumbnails
            ffmpeg_path: env_or_default("FFMPEG_PATH", "ffmpeg"),
            thumbnail_timeout: Duration::from_secs(parse_env_u64("THUMBNAIL_TIMEOUT_SECS", 60)?),
        })
    }

    /// Configuration suitable for tests: everything local, one board, no sleeping.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            host_name: "test-host".to_string(),
            api_base_url: "http://127.0.0.1:9".to_string(),
            media_base_url: "http://127.0.0.1:9".to_string(),
            boards: vec!["g".to_string()],
            user_agent: "chan-webm-archiver-tests".to_string(),
            media_dir: PathBuf::from("./test-webms"),
            database_path: PathBuf::from(":memory:"),
            max_filename_bytes: 255,
            poll_interval: Duration::ZERO,
            board_concurrency: 1,
            thread_concurrency: 2,
            request_timeout: Duration::from_secs(5),
            download_timeout: Duration::from_secs(5),
            download_attempts: 1,
            target_extension: ".webm".to_string(),
            candidates: CandidateSettings::default(),
            ffmpeg_path: "ffmpeg".to_string(),
            thumbnail_timeout: Duration::from_secs(5),
        }
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.boards.is_empty() {
            return Err(invalid("BOARDS", "must name at least one board"));
        }
        if let Some(bad) = self
            .boards
            .iter()
            .find(|b| !b.chars().all(|c| c.is_ascii_alphanumeric()))
        {
            return Err(invalid(
                "BOARDS",
                &format!("board names must be alphanumeric, got '{bad}'"),
            ));
        }
        if self.board_concurrency == 0 {
            return Err(invalid("BOARD_CONCURRENCY", "must be at least 1"));
        }
        if self.thread_concurrency == 0 {
            return Err(invalid("THREAD_CONCURRENCY", "must be at least 1"));
        }
        if self.download_attempts == 0 {
            return Err(invalid("DOWNLOAD_ATTEMPTS", "must be at least 1"));
        }
        if !self.target_extension.starts_with('.') || self.target_extension.len() < 2 {
            return Err(invalid(
                "TARGET_EXTENSION",
                "must start with '.' and name an extension",
            ));
        }
        let minimum = self.min_filename_bytes();
        if self.max_filename_bytes < minimum {
            return Err(invalid(
                "MAX_FILENAME_BYTES",
                &format!("must be at least {minimum}"),
            ));
        }
        validate_base_url("API_BASE_URL", &self.api_base_url)?;
        validate_base_url("MEDIA_BASE_URL", &self.media_base_url)?;
        Ok(())
    }

    /// Shortest path-component limit that still fits the longest possible
    /// thumbnail name with one byte of the uploader's filename.
    fn min_filename_bytes(&self) -> usize {
        let longest_board = self.boards.iter().map(String::len).max().unwrap_or(0);
        // board + "_" + up to 20 size digits + "_" + one filename byte
        let prefix_and_name = longest_board + 22 + 1;
        let token = 1 + DIGEST_TOKEN_LEN;
        THUMBNAIL_PREFIX.len()
            + prefix_and_name
            + token
            + self.target_extension.len()
            + THUMBNAIL_SUFFIX.len()
    }
}

fn invalid(name: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        message: message.to_string(),
    }
}

fn validate_base_url(name: &str, value: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(value).map_err(|e| invalid(name, &e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid(name, "must be an http(s) URL"));
    }
    Ok(())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn trim_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::ParseBool {
                name: name.to_string(),
                value: val,
            }),
        },
        _ => Ok(default),
    }
}
