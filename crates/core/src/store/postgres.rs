//! Postgres-backed metadata store.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use sqlx::{Postgres, QueryBuilder};
use tracing::info;

use crate::catalog::TorrentEntry;
use crate::config::DatabaseConfig;

use super::{
    BookRecord, DownloadInfo, MetadataStore, NewRecord, StoreError, Synchronization, TorrentRow,
    TypeCount, TypedValue,
};

/// Embedded migrations, applied on connect.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const MAX_CONNECTIONS: u32 = 25;

/// Postgres-backed metadata store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to the configured database and run migrations.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database)
            .ssl_mode(PgSslMode::Disable);

        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        info!("database connection established");
        Ok(store)
    }

    /// Wrap an existing pool. Migrations are not run.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    /// Check the database connection.
    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Load identifier and classification children for the given records.
    async fn attach_children(&self, records: &mut [BookRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();

        #[derive(sqlx::FromRow)]
        struct ChildRow {
            record: String,
            #[sqlx(rename = "type")]
            kind: String,
            value: String,
        }

        let mut identifiers: HashMap<String, Vec<TypedValue>> = HashMap::new();
        let rows: Vec<ChildRow> = sqlx::query_as(
            "SELECT record, type, value FROM anna_record_identifiers \
             WHERE record = ANY($1) ORDER BY type, value",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;
        for row in rows {
            identifiers.entry(row.record).or_default().push(TypedValue {
                kind: row.kind,
                value: row.value,
            });
        }

        let mut classifications: HashMap<String, Vec<TypedValue>> = HashMap::new();
        let rows: Vec<ChildRow> = sqlx::query_as(
            "SELECT record, type, value FROM anna_record_classifications \
             WHERE record = ANY($1) ORDER BY type, value",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;
        for row in rows {
            classifications
                .entry(row.record)
                .or_default()
                .push(TypedValue {
                    kind: row.kind,
                    value: row.value,
                });
        }

        for record in records.iter_mut() {
            record.identifiers = identifiers.remove(&record.id).unwrap_or_default();
            record.classifications = classifications.remove(&record.id).unwrap_or_default();
        }
        Ok(())
    }
}

const RECORD_COLUMNS: &str = "id, title, publisher, author, cover_url, year, languages, \
                              description, created_at, updated_at";

/// Append the text-search WHERE clauses shared by the count and page queries.
fn push_text_filters(
    builder: &mut QueryBuilder<'_, Postgres>,
    title: &str,
    author: &str,
    publisher: &str,
    languages: &[String],
) {
    let mut prefix = " WHERE ";
    for (column, value) in [("title", title), ("author", author), ("publisher", publisher)] {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        builder.push(prefix);
        builder.push(column);
        builder.push(" ILIKE ");
        builder.push_bind(format!("%{}%", value));
        prefix = " AND ";
    }
    if !languages.is_empty() {
        builder.push(prefix);
        builder.push("languages && ");
        builder.push_bind(languages.to_vec());
    }
}

#[async_trait]
impl MetadataStore for PgStore {
    async fn upsert_torrents(&self, entries: &[TorrentEntry]) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for entry in entries {
            sqlx::query(
                "INSERT INTO anna_torrents \
                     (btih, display_name, url, magnet_link, top_level_group_name, \
                      group_name, obsolete, added_to_torrents_list_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
                 ON CONFLICT (btih) DO UPDATE SET \
                     display_name = EXCLUDED.display_name, \
                     url = EXCLUDED.url, \
                     magnet_link = EXCLUDED.magnet_link, \
                     top_level_group_name = EXCLUDED.top_level_group_name, \
                     group_name = EXCLUDED.group_name, \
                     obsolete = EXCLUDED.obsolete, \
                     added_to_torrents_list_at = EXCLUDED.added_to_torrents_list_at, \
                     updated_at = now()",
            )
            .bind(&entry.btih)
            .bind(&entry.display_name)
            .bind(&entry.url)
            .bind(&entry.magnet_link)
            .bind(&entry.top_level_group_name)
            .bind(&entry.group_name)
            .bind(entry.obsolete)
            .bind(&entry.added_to_torrents_list_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_record(&self, record: &NewRecord) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO anna_records \
                 (id, title, publisher, author, cover_url, year, languages, description) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (id) DO UPDATE SET \
                 title = EXCLUDED.title, \
                 publisher = EXCLUDED.publisher, \
                 author = EXCLUDED.author, \
                 cover_url = EXCLUDED.cover_url, \
                 year = EXCLUDED.year, \
                 languages = EXCLUDED.languages, \
                 description = EXCLUDED.description, \
                 updated_at = now()",
        )
        .bind(&record.id)
        .bind(&record.title)
        .bind(&record.publisher)
        .bind(&record.author)
        .bind(&record.cover_url)
        .bind(record.year)
        .bind(&record.languages)
        .bind(&record.description)
        .execute(&mut *tx)
        .await?;

        for (table, pairs) in [
            ("anna_record_identifiers", &record.identifiers),
            ("anna_record_classifications", &record.classifications),
        ] {
            if pairs.is_empty() {
                continue;
            }
            let kinds: Vec<String> = pairs.iter().map(|p| p.kind.clone()).collect();
            let values: Vec<String> = pairs.iter().map(|p| p.value.clone()).collect();
            sqlx::query(&format!(
                "INSERT INTO {} (record, type, value) \
                 SELECT $1, t, v FROM UNNEST($2::text[], $3::text[]) AS u(t, v) \
                 ON CONFLICT (record, type, value) DO UPDATE SET updated_at = now()",
                table
            ))
            .bind(&record.id)
            .bind(&kinds)
            .bind(&values)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn last_sync(&self) -> Result<Option<Synchronization>, StoreError> {
        let row = sqlx::query_as::<_, Synchronization>(
            "SELECT date, base, complete FROM anna_synchronizations \
             ORDER BY date DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn last_complete_sync(&self) -> Result<Option<Synchronization>, StoreError> {
        let row = sqlx::query_as::<_, Synchronization>(
            "SELECT date, base, complete FROM anna_synchronizations \
             WHERE complete ORDER BY date DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn create_sync(&self, entry: &Synchronization) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO anna_synchronizations (date, base, complete) VALUES ($1, $2, $3)")
            .bind(entry.date)
            .bind(&entry.base)
            .bind(entry.complete)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_count(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM anna_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn identifier_counts(&self) -> Result<Vec<TypeCount>, StoreError> {
        let counts = sqlx::query_as::<_, TypeCount>(
            "SELECT type, COUNT(*) AS count FROM anna_record_identifiers \
             GROUP BY type ORDER BY type",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(counts)
    }

    async fn classification_counts(&self) -> Result<Vec<TypeCount>, StoreError> {
        let counts = sqlx::query_as::<_, TypeCount>(
            "SELECT type, COUNT(*) AS count FROM anna_record_classifications \
             GROUP BY type ORDER BY type",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(counts)
    }

    async fn search_by_isbn(
        &self,
        isbn: &str,
        languages: &[String],
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<BookRecord>, i64), StoreError> {
        let values = super::expand_isbn(isbn)?;

        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT record FROM anna_record_identifiers \
             WHERE type IN ('isbn10', 'isbn13') AND value = ANY($1)",
        )
        .bind(&values)
        .fetch_all(&self.pool)
        .await?;

        if ids.is_empty() {
            return Ok((Vec::new(), 0));
        }

        let mut count_query =
            QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM anna_records WHERE id = ANY(");
        count_query.push_bind(ids.clone());
        count_query.push(")");
        if !languages.is_empty() {
            count_query.push(" AND languages && ");
            count_query.push_bind(languages.to_vec());
        }
        let total: i64 = count_query.build_query_scalar().fetch_one(&self.pool).await?;

        let mut page_query = QueryBuilder::<Postgres>::new(format!(
            "SELECT {} FROM anna_records WHERE id = ANY(",
            RECORD_COLUMNS
        ));
        page_query.push_bind(ids);
        page_query.push(")");
        if !languages.is_empty() {
            page_query.push(" AND languages && ");
            page_query.push_bind(languages.to_vec());
        }
        page_query.push(" ORDER BY id LIMIT ");
        page_query.push_bind(limit);
        page_query.push(" OFFSET ");
        page_query.push_bind(offset);

        let mut records: Vec<BookRecord> =
            page_query.build_query_as().fetch_all(&self.pool).await?;
        self.attach_children(&mut records).await?;

        Ok((records, total))
    }

    async fn search_by_text(
        &self,
        title: &str,
        author: &str,
        publisher: &str,
        languages: &[String],
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<BookRecord>, i64), StoreError> {
        let mut count_query = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM anna_records");
        push_text_filters(&mut count_query, title, author, publisher, languages);
        let total: i64 = count_query.build_query_scalar().fetch_one(&self.pool).await?;

        let mut page_query =
            QueryBuilder::<Postgres>::new(format!("SELECT {} FROM anna_records", RECORD_COLUMNS));
        push_text_filters(&mut page_query, title, author, publisher, languages);
        page_query.push(" ORDER BY id LIMIT ");
        page_query.push_bind(limit);
        page_query.push(" OFFSET ");
        page_query.push_bind(offset);

        let mut records: Vec<BookRecord> =
            page_query.build_query_as().fetch_all(&self.pool).await?;
        self.attach_children(&mut records).await?;

        Ok((records, total))
    }

    async fn record_download_info(&self, id: &str) -> Result<Option<DownloadInfo>, StoreError> {
        #[derive(sqlx::FromRow)]
        struct InfoRow {
            server_path: String,
            torrent: String,
        }

        let row = sqlx::query_as::<_, InfoRow>(
            "SELECT i.value AS server_path, c.value AS torrent \
             FROM anna_record_identifiers i \
             JOIN anna_record_classifications c \
               ON c.record = i.record AND c.type = 'torrent' \
             WHERE i.record = $1 AND i.type = 'server_path' \
             LIMIT 1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| DownloadInfo {
            server_path: r.server_path,
            torrent: r.torrent,
        }))
    }

    async fn torrent_by_display_name(
        &self,
        name: &str,
    ) -> Result<Option<TorrentRow>, StoreError> {
        let row = sqlx::query_as::<_, TorrentRow>(
            "SELECT btih, display_name, url, magnet_link, top_level_group_name, \
                    group_name, obsolete, added_to_torrents_list_at \
             FROM anna_torrents WHERE display_name = $1 LIMIT 1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}
