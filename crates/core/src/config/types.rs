use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration, populated from the process environment.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub anna: AnnaConfig,
}

/// Postgres connection settings (`POSTGRES_*` environment keys).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_host")]
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    #[serde(default = "default_db_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_db_name")]
    pub database: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_db_host(),
            port: default_db_port(),
            user: default_db_user(),
            password: String::new(),
            database: default_db_name(),
        }
    }
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    5432
}

fn default_db_user() -> String {
    "postgres".to_string()
}

fn default_db_name() -> String {
    "anna".to_string()
}

/// Mirror settings (`ANNA_*` environment keys).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnnaConfig {
    /// Upstream catalog host, e.g. `annas-archive.example`. Required.
    #[serde(default)]
    pub domain: String,

    /// Restrict the shard pattern to a single numeric index (debug aid).
    #[serde(default)]
    pub archive_id: Option<String>,

    /// Scratch space for the swarm engine.
    #[serde(default = "default_torrent_data_dir")]
    pub torrent_data_dir: PathBuf,

    /// Persistent cache for on-demand epub downloads.
    #[serde(default = "default_epub_storage_dir")]
    pub epub_storage_dir: PathBuf,

    /// Skip purging the torrent data directory after a successful sync.
    #[serde(default)]
    pub keep_files: bool,

    /// Block the orchestrator forever instead of syncing (observability aid).
    #[serde(default)]
    pub disable_sync: bool,

    /// Seconds between sync attempts, measured from the last recorded sync.
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
}

impl Default for AnnaConfig {
    fn default() -> Self {
        Self {
            domain: String::new(),
            archive_id: None,
            torrent_data_dir: default_torrent_data_dir(),
            epub_storage_dir: default_epub_storage_dir(),
            keep_files: false,
            disable_sync: false,
            sync_interval_secs: default_sync_interval_secs(),
        }
    }
}

fn default_torrent_data_dir() -> PathBuf {
    PathBuf::from("/tmp/anna-torrents")
}

fn default_epub_storage_dir() -> PathBuf {
    PathBuf::from("/tmp/anna-epubs")
}

fn default_sync_interval_secs() -> u64 {
    86_400
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.database.host, "localhost");
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.database.user, "postgres");
        assert_eq!(config.database.database, "anna");
        assert!(config.anna.domain.is_empty());
        assert_eq!(
            config.anna.torrent_data_dir,
            PathBuf::from("/tmp/anna-torrents")
        );
        assert_eq!(
            config.anna.epub_storage_dir,
            PathBuf::from("/tmp/anna-epubs")
        );
        assert!(!config.anna.keep_files);
        assert!(!config.anna.disable_sync);
        assert_eq!(config.anna.sync_interval_secs, 86_400);
    }
}
