use figment::{
    providers::{Env, Serialized},
    Figment,
};

use super::{types::Config, ConfigError};

/// Load configuration from the process environment.
///
/// `POSTGRES_*` keys map onto the `database` section and `ANNA_*` keys onto
/// the `anna` section, so e.g. `ANNA_TORRENT_DATA_DIR` sets
/// `anna.torrent_data_dir`.
pub fn load_config() -> Result<Config, ConfigError> {
    Figment::from(Serialized::defaults(Config::default()))
        .merge(
            Env::prefixed("POSTGRES_")
                .map(|key| format!("database.{}", key.as_str().to_ascii_lowercase()).into())
                .split("."),
        )
        .merge(
            Env::prefixed("ANNA_")
                .map(|key| format!("anna.{}", key.as_str().to_ascii_lowercase()).into())
                .split("."),
        )
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_defaults_without_env() {
        figment::Jail::expect_with(|_jail| {
            let config = load_config().unwrap();
            assert_eq!(config.database.host, "localhost");
            assert!(config.anna.domain.is_empty());
            Ok(())
        });
    }

    #[test]
    fn test_load_database_from_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("POSTGRES_HOST", "db.internal");
            jail.set_env("POSTGRES_PORT", "5433");
            jail.set_env("POSTGRES_USER", "annex");
            jail.set_env("POSTGRES_PASSWORD", "secret");
            jail.set_env("POSTGRES_DATABASE", "mirror");

            let config = load_config().unwrap();
            assert_eq!(config.database.host, "db.internal");
            assert_eq!(config.database.port, 5433);
            assert_eq!(config.database.user, "annex");
            assert_eq!(config.database.password, "secret");
            assert_eq!(config.database.database, "mirror");
            Ok(())
        });
    }

    #[test]
    fn test_load_anna_from_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("ANNA_DOMAIN", "annas-archive.example");
            jail.set_env("ANNA_ARCHIVE_ID", "7");
            jail.set_env("ANNA_TORRENT_DATA_DIR", "/data/torrents");
            jail.set_env("ANNA_EPUB_STORAGE_DIR", "/data/epubs");
            jail.set_env("ANNA_KEEP_FILES", "true");
            jail.set_env("ANNA_DISABLE_SYNC", "true");
            jail.set_env("ANNA_SYNC_INTERVAL_SECS", "60");

            let config = load_config().unwrap();
            assert_eq!(config.anna.domain, "annas-archive.example");
            assert_eq!(config.anna.archive_id.as_deref(), Some("7"));
            assert_eq!(
                config.anna.torrent_data_dir,
                std::path::PathBuf::from("/data/torrents")
            );
            assert_eq!(
                config.anna.epub_storage_dir,
                std::path::PathBuf::from("/data/epubs")
            );
            assert!(config.anna.keep_files);
            assert!(config.anna.disable_sync);
            assert_eq!(config.anna.sync_interval_secs, 60);
            Ok(())
        });
    }
}
