//! Direct Postgres connection pool
//!
//! Batch upserts go through `UNNEST` so a whole reconciliation plan is one
//! statement per direction, keyed on the `title` unique constraint.

use super::{RemoteError, RemoteStore};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use comics_common::config::PostgresConfig;
use comics_common::{Catalog, CatalogRecord, Comic, StoredRecord, UpcomingBook};
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::FromRow;
use std::collections::BTreeSet;
use tracing::info;

const CREATE_COMICS: &str = "
CREATE TABLE IF NOT EXISTS comics (
    id BIGSERIAL PRIMARY KEY,
    title TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL DEFAULT '',
    genre TEXT NOT NULL DEFAULT '',
    year INTEGER,
    media_urls JSONB NOT NULL DEFAULT '[]'::jsonb,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)";

const CREATE_UPCOMING: &str = "
CREATE TABLE IF NOT EXISTS upcoming_books (
    id BIGSERIAL PRIMARY KEY,
    title TEXT NOT NULL UNIQUE,
    author TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    genre TEXT NOT NULL DEFAULT '',
    release_date DATE,
    status TEXT NOT NULL DEFAULT 'upcoming',
    pre_order BOOLEAN NOT NULL DEFAULT FALSE,
    media_urls JSONB NOT NULL DEFAULT '[]'::jsonb,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)";

const COMIC_COLUMNS: &str = "id, title, description, genre, year, media_urls, created_at";
const UPCOMING_COLUMNS: &str =
    "id, title, author, description, genre, release_date, status, pre_order, media_urls, created_at";

#[derive(FromRow)]
struct ComicRow {
    id: i64,
    title: String,
    description: String,
    genre: String,
    year: Option<i32>,
    media_urls: Json<Vec<String>>,
    created_at: DateTime<Utc>,
}

impl From<ComicRow> for StoredRecord {
    fn from(row: ComicRow) -> Self {
        StoredRecord {
            id: row.id,
            record: CatalogRecord::Comic(Comic {
                title: row.title,
                description: row.description,
                genre: row.genre,
                year: row.year,
                media_urls: row.media_urls.0,
            }),
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct UpcomingRow {
    id: i64,
    title: String,
    author: String,
    description: String,
    genre: String,
    release_date: Option<NaiveDate>,
    status: String,
    pre_order: bool,
    media_urls: Json<Vec<String>>,
    created_at: DateTime<Utc>,
}

impl From<UpcomingRow> for StoredRecord {
    fn from(row: UpcomingRow) -> Self {
        StoredRecord {
            id: row.id,
            record: CatalogRecord::Upcoming(UpcomingBook {
                title: row.title,
                author: row.author,
                description: row.description,
                genre: row.genre,
                release_date: row.release_date,
                status: row.status,
                pre_order: row.pre_order,
                media_urls: row.media_urls.0,
            }),
            created_at: row.created_at,
        }
    }
}

pub struct PgStore {
    pool: PgPool,
}

/// Connection options from `url` if set, otherwise from the individual fields.
/// Fields are passed through as-is, so passwords need no URL escaping.
pub fn connect_options(config: &PostgresConfig) -> Result<PgConnectOptions, RemoteError> {
    if let Some(url) = &config.url {
        return url
            .parse::<PgConnectOptions>()
            .map_err(|e| RemoteError::Unreachable(format!("invalid Postgres URL: {}", e)));
    }

    let (Some(host), Some(database)) = (&config.host, &config.database) else {
        return Err(RemoteError::Unreachable(
            "no Postgres connection settings".to_string(),
        ));
    };
    let mut options = PgConnectOptions::new()
        .host(host)
        .port(config.port.unwrap_or(5432))
        .database(database);
    if let Some(user) = &config.user {
        options = options.username(user);
    }
    if let Some(password) = &config.password {
        options = options.password(password);
    }
    Ok(options)
}

impl PgStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, RemoteError> {
        let options = url
            .parse::<PgConnectOptions>()
            .map_err(|e| RemoteError::Unreachable(format!("invalid Postgres URL: {}", e)))?;
        Self::connect_with(options, max_connections).await
    }

    pub async fn connect_with(
        options: PgConnectOptions,
        max_connections: u32,
    ) -> Result<Self, RemoteError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(map_sqlx)?;
        info!("Connected to Postgres");
        Ok(Self { pool })
    }

    /// Create both tables if they do not exist yet (idempotent)
    pub async fn ensure_schema(&self) -> Result<(), RemoteError> {
        for ddl in [CREATE_COMICS, CREATE_UPCOMING] {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx)?;
        }
        Ok(())
    }

    async fn fetch_where(
        &self,
        catalog: Catalog,
        clause: &str,
        id: Option<i64>,
    ) -> Result<Vec<StoredRecord>, RemoteError> {
        match catalog {
            Catalog::Comics => {
                let sql = format!("SELECT {} FROM comics {}", COMIC_COLUMNS, clause);
                let mut query = sqlx::query_as::<_, ComicRow>(&sql);
                if let Some(id) = id {
                    query = query.bind(id);
                }
                let rows = query.fetch_all(&self.pool).await.map_err(map_sqlx)?;
                Ok(rows.into_iter().map(StoredRecord::from).collect())
            }
            Catalog::Upcoming => {
                let sql = format!("SELECT {} FROM upcoming_books {}", UPCOMING_COLUMNS, clause);
                let mut query = sqlx::query_as::<_, UpcomingRow>(&sql);
                if let Some(id) = id {
                    query = query.bind(id);
                }
                let rows = query.fetch_all(&self.pool).await.map_err(map_sqlx)?;
                Ok(rows.into_iter().map(StoredRecord::from).collect())
            }
        }
    }

    async fn write_one(
        &self,
        record: &CatalogRecord,
        id: Option<i64>,
    ) -> Result<Option<StoredRecord>, RemoteError> {
        match record {
            CatalogRecord::Comic(c) => {
                let sql = match id {
                    None => format!(
                        "INSERT INTO comics (title, description, genre, year, media_urls, created_at)
                         VALUES ($1, $2, $3, $4, $5, NOW()) RETURNING {}",
                        COMIC_COLUMNS
                    ),
                    Some(_) => format!(
                        "UPDATE comics SET title = $1, description = $2, genre = $3, year = $4, media_urls = $5
                         WHERE id = $6 RETURNING {}",
                        COMIC_COLUMNS
                    ),
                };
                let mut query = sqlx::query_as::<_, ComicRow>(&sql)
                    .bind(&c.title)
                    .bind(&c.description)
                    .bind(&c.genre)
                    .bind(c.year)
                    .bind(Json(&c.media_urls));
                if let Some(id) = id {
                    query = query.bind(id);
                }
                let row = query.fetch_optional(&self.pool).await.map_err(map_sqlx)?;
                Ok(row.map(StoredRecord::from))
            }
            CatalogRecord::Upcoming(b) => {
                let sql = match id {
                    None => format!(
                        "INSERT INTO upcoming_books
                            (title, author, description, genre, release_date, status, pre_order, media_urls, created_at)
                         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW()) RETURNING {}",
                        UPCOMING_COLUMNS
                    ),
                    Some(_) => format!(
                        "UPDATE upcoming_books SET title = $1, author = $2, description = $3, genre = $4,
                            release_date = $5, status = $6, pre_order = $7, media_urls = $8
                         WHERE id = $9 RETURNING {}",
                        UPCOMING_COLUMNS
                    ),
                };
                let mut query = sqlx::query_as::<_, UpcomingRow>(&sql)
                    .bind(&b.title)
                    .bind(&b.author)
                    .bind(&b.description)
                    .bind(&b.genre)
                    .bind(b.release_date)
                    .bind(&b.status)
                    .bind(b.pre_order)
                    .bind(Json(&b.media_urls));
                if let Some(id) = id {
                    query = query.bind(id);
                }
                let row = query.fetch_optional(&self.pool).await.map_err(map_sqlx)?;
                Ok(row.map(StoredRecord::from))
            }
        }
    }
}

/// Map driver errors onto the remote error taxonomy
fn map_sqlx(e: sqlx::Error) -> RemoteError {
    match &e {
        sqlx::Error::RowNotFound => RemoteError::NotFound(e.to_string()),
        sqlx::Error::Database(db)
            if db.is_unique_violation() || db.is_check_violation() || db.is_foreign_key_violation() =>
        {
            RemoteError::ConstraintViolation(db.message().to_string())
        }
        _ => RemoteError::Unreachable(e.to_string()),
    }
}

/// Comics of an upsert batch; any other record rejects the whole batch
fn comic_batch(records: &[CatalogRecord]) -> Result<Vec<&Comic>, RemoteError> {
    records
        .iter()
        .map(|record| match record {
            CatalogRecord::Comic(comic) => Ok(comic),
            other => Err(RemoteError::wrong_catalog(Catalog::Comics, other)),
        })
        .collect()
}

fn upcoming_batch(records: &[CatalogRecord]) -> Result<Vec<&UpcomingBook>, RemoteError> {
    records
        .iter()
        .map(|record| match record {
            CatalogRecord::Upcoming(book) => Ok(book),
            other => Err(RemoteError::wrong_catalog(Catalog::Upcoming, other)),
        })
        .collect()
}

fn media_json(urls: &[String]) -> Value {
    Value::from(urls.to_vec())
}

#[async_trait]
impl RemoteStore for PgStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn list(&self, catalog: Catalog) -> Result<Vec<StoredRecord>, RemoteError> {
        self.fetch_where(catalog, "ORDER BY created_at DESC, id DESC", None)
            .await
    }

    async fn titles(&self, catalog: Catalog) -> Result<BTreeSet<String>, RemoteError> {
        let sql = format!("SELECT title FROM {}", catalog.table());
        let titles: Vec<String> = sqlx::query_scalar(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(titles.into_iter().collect())
    }

    async fn get(&self, catalog: Catalog, id: i64) -> Result<StoredRecord, RemoteError> {
        self.fetch_where(catalog, "WHERE id = $1", Some(id))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::missing(catalog, id))
    }

    async fn insert(&self, record: &CatalogRecord) -> Result<StoredRecord, RemoteError> {
        self.write_one(record, None).await?.ok_or_else(|| {
            RemoteError::Unreachable("insert returned no row".to_string())
        })
    }

    async fn update(&self, id: i64, record: &CatalogRecord) -> Result<StoredRecord, RemoteError> {
        self.write_one(record, Some(id))
            .await?
            .ok_or_else(|| RemoteError::missing(record.catalog(), id))
    }

    async fn delete(&self, catalog: Catalog, id: i64) -> Result<StoredRecord, RemoteError> {
        let returning = match catalog {
            Catalog::Comics => COMIC_COLUMNS,
            Catalog::Upcoming => UPCOMING_COLUMNS,
        };
        let sql = format!(
            "DELETE FROM {} WHERE id = $1 RETURNING {}",
            catalog.table(),
            returning
        );
        let row = match catalog {
            Catalog::Comics => sqlx::query_as::<_, ComicRow>(&sql)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx)?
                .map(StoredRecord::from),
            Catalog::Upcoming => sqlx::query_as::<_, UpcomingRow>(&sql)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx)?
                .map(StoredRecord::from),
        };
        row.ok_or_else(|| RemoteError::missing(catalog, id))
    }

    async fn delete_titles(
        &self,
        catalog: Catalog,
        titles: &[String],
    ) -> Result<u64, RemoteError> {
        let sql = format!("DELETE FROM {} WHERE title = ANY($1)", catalog.table());
        let result = sqlx::query(&sql)
            .bind(titles)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(result.rows_affected())
    }

    async fn upsert(
        &self,
        catalog: Catalog,
        records: &[CatalogRecord],
    ) -> Result<u64, RemoteError> {
        let result = match catalog {
            Catalog::Comics => {
                let comics = comic_batch(records)?;
                sqlx::query(
                    "INSERT INTO comics (title, description, genre, year, media_urls, created_at)
                     SELECT t.title, t.description, t.genre, t.year, t.media_urls, NOW()
                     FROM UNNEST($1::text[], $2::text[], $3::text[], $4::int4[], $5::jsonb[])
                         AS t(title, description, genre, year, media_urls)
                     ON CONFLICT (title) DO UPDATE SET
                         description = EXCLUDED.description,
                         genre = EXCLUDED.genre,
                         year = EXCLUDED.year,
                         media_urls = EXCLUDED.media_urls,
                         created_at = NOW()",
                )
                .bind(comics.iter().map(|c| c.title.clone()).collect::<Vec<_>>())
                .bind(comics.iter().map(|c| c.description.clone()).collect::<Vec<_>>())
                .bind(comics.iter().map(|c| c.genre.clone()).collect::<Vec<_>>())
                .bind(comics.iter().map(|c| c.year).collect::<Vec<_>>())
                .bind(comics.iter().map(|c| media_json(&c.media_urls)).collect::<Vec<_>>())
                .execute(&self.pool)
                .await
            }
            Catalog::Upcoming => {
                let books = upcoming_batch(records)?;
                sqlx::query(
                    "INSERT INTO upcoming_books
                         (title, author, description, genre, release_date, status, pre_order, media_urls, created_at)
                     SELECT t.title, t.author, t.description, t.genre, t.release_date, t.status, t.pre_order,
                            t.media_urls, NOW()
                     FROM UNNEST($1::text[], $2::text[], $3::text[], $4::text[], $5::date[], $6::text[],
                                 $7::bool[], $8::jsonb[])
                         AS t(title, author, description, genre, release_date, status, pre_order, media_urls)
                     ON CONFLICT (title) DO UPDATE SET
                         author = EXCLUDED.author,
                         description = EXCLUDED.description,
                         genre = EXCLUDED.genre,
                         release_date = EXCLUDED.release_date,
                         status = EXCLUDED.status,
                         pre_order = EXCLUDED.pre_order,
                         media_urls = EXCLUDED.media_urls,
                         created_at = NOW()",
                )
                .bind(books.iter().map(|b| b.title.clone()).collect::<Vec<_>>())
                .bind(books.iter().map(|b| b.author.clone()).collect::<Vec<_>>())
                .bind(books.iter().map(|b| b.description.clone()).collect::<Vec<_>>())
                .bind(books.iter().map(|b| b.genre.clone()).collect::<Vec<_>>())
                .bind(books.iter().map(|b| b.release_date).collect::<Vec<_>>())
                .bind(books.iter().map(|b| b.status.clone()).collect::<Vec<_>>())
                .bind(books.iter().map(|b| b.pre_order).collect::<Vec<_>>())
                .bind(books.iter().map(|b| media_json(&b.media_urls)).collect::<Vec<_>>())
                .execute(&self.pool)
                .await
            }
        };

        Ok(result.map_err(map_sqlx)?.rows_affected())
    }
}
