use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Offline chapter cache and reading progress sync for web novels.
#[derive(Parser, Debug, Clone)]
#[command(name = "novel-sync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file.
    #[arg(short, long, env = "NOVEL_SYNC_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the progress sync server (default if no command given).
    Serve {
        /// Address to bind the server to.
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },

    /// Sync token management.
    Token {
        /// Token subcommand action.
        #[command(subcommand)]
        action: TokenCommand,
    },

    /// Offline chapter cache.
    Cache {
        /// Cache subcommand action.
        #[command(subcommand)]
        action: CacheCommand,
    },

    /// Reading progress.
    Progress {
        /// Progress subcommand action.
        #[command(subcommand)]
        action: ProgressCommand,
    },

    /// Initialize database and create default config.
    Init {
        /// Force overwrite existing config.
        #[arg(short, long)]
        force: bool,
    },
}

/// Token management subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum TokenCommand {
    /// Issue a token for a user ID.
    Issue {
        /// User ID.
        user_id: String,
    },

    /// Revoke a token.
    Revoke {
        /// Token to revoke.
        token: String,
    },

    /// List live tokens.
    List,
}

/// Chapter cache subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum CacheCommand {
    /// Download chapters and cache them (fails on the first error).
    Fetch {
        /// Work ID.
        work_id: String,
        /// Chapter numbers.
        #[arg(required = true)]
        chapters: Vec<i64>,
    },

    /// Best-effort download of a chapter range; failures are skipped.
    Prefetch {
        /// Work ID.
        work_id: String,
        /// First chapter.
        #[arg(long, default_value = "1")]
        from: i64,
        /// Last chapter (inclusive).
        #[arg(long)]
        to: i64,
    },

    /// Print a cached chapter.
    Show {
        /// Work ID.
        work_id: String,
        /// Chapter number.
        chapter: i64,
    },

    /// List cached chapter numbers of a work.
    List {
        /// Work ID.
        work_id: String,
    },

    /// Show cache usage (one work, or all works).
    Info {
        /// Work ID.
        work_id: Option<String>,
    },

    /// Remove every cached chapter of a work.
    Clear {
        /// Work ID.
        work_id: String,
    },

    /// Remove one cached chapter.
    Remove {
        /// Work ID.
        work_id: String,
        /// Chapter number.
        chapter: i64,
    },

    /// Delete oldest chapters until the cache fits the limit.
    Trim {
        /// Byte limit (defaults to cache.max_bytes).
        #[arg(long)]
        max_bytes: Option<i64>,
    },
}

/// Reading progress subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum ProgressCommand {
    /// Record the current reading position.
    Record {
        /// Work ID.
        work_id: String,
        /// Chapter number.
        chapter: i64,
        /// Scroll offset within the chapter.
        #[arg(default_value = "0")]
        position: i64,
    },

    /// Show progress for a work.
    Get {
        /// Work ID.
        work_id: String,
    },

    /// Mark a work as completed.
    Complete {
        /// Work ID.
        work_id: String,
        /// Clear the flag instead.
        #[arg(long)]
        undo: bool,
    },

    /// List progress, most recently read first.
    List,
}

/// Main configuration from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Progress database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Authentication configuration.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Chapter cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Content API configuration.
    #[serde(default)]
    pub content: ContentConfig,

    /// Remote progress store configuration.
    #[serde(default)]
    pub remote: RemoteConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::new(
        std::net::IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0)),
        8080,
    )
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite progress database.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/progress.db")
}

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Token lifetime in days.
    #[serde(default = "default_session_days")]
    pub session_days: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_days: default_session_days(),
        }
    }
}

fn default_session_days() -> u32 {
    30
}

/// Chapter cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Path to the SQLite chapter cache.
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,

    /// Size limit in bytes, enforced oldest-first after each fetch (0 = unlimited).
    #[serde(default)]
    pub max_bytes: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
            max_bytes: 0,
        }
    }
}

fn default_cache_path() -> PathBuf {
    dirs::data_dir()
        .map(|p| p.join("novel-sync").join("chapters.db"))
        .unwrap_or_else(|| PathBuf::from("data/chapters.db"))
}

/// Content API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentConfig {
    /// Base URL of the content API.
    #[serde(default)]
    pub base_url: String,

    /// Bearer token for the content API, if it needs one.
    #[serde(default)]
    pub token: Option<String>,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: None,
            timeout_seconds: default_timeout(),
        }
    }
}

impl ContentConfig {
    /// Request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Remote progress store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of a novel-sync server (empty = use the local database).
    #[serde(default)]
    pub base_url: String,

    /// Sync token issued by the server.
    #[serde(default)]
    pub token: String,

    /// User the token belongs to.
    #[serde(default = "default_user_id")]
    pub user_id: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: String::new(),
            user_id: default_user_id(),
            timeout_seconds: default_timeout(),
        }
    }
}

impl RemoteConfig {
    /// Whether a remote server is configured.
    pub fn is_enabled(&self) -> bool {
        !self.base_url.is_empty()
    }

    /// Request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

fn default_user_id() -> String {
    "local".to_string()
}

fn default_timeout() -> u64 {
    30
}

impl Config {
    /// Load configuration from file.
    pub fn load(path: &PathBuf) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to read config file: {}", e))
        })?;

        toml::from_str(&content).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to parse config file: {}", e))
        })
    }

    /// Find config file in default locations.
    pub fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            PathBuf::from("config.toml"),
            PathBuf::from("novel-sync.toml"),
            dirs::config_dir()
                .map(|p| p.join("novel-sync").join("config.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/novel-sync/config.toml"),
        ];

        candidates.into_iter().find(|p| p.exists())
    }

    /// Generate default config file content.
    pub fn generate_default() -> String {
        r#"# novel-sync configuration

[server]
bind = "0.0.0.0:8080"

[database]
# Progress store of record (used by `serve`, and by `progress` without [remote])
# path = "/var/lib/novel-sync/progress.db"

[auth]
# Sync token lifetime in days
session_days = 30

[cache]
# path = "~/.local/share/novel-sync/chapters.db"
# Size limit in bytes, oldest chapters go first (0 = unlimited)
max_bytes = 0

[content]
# base_url = "https://novels.example.org"
timeout_seconds = 30

[remote]
# Progress server; leave empty to use the local database
# base_url = "https://sync.example.org"
# token = "..."
user_id = "local"
"#
        .to_string()
    }
}
