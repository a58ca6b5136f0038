//! Hosted table REST API (PostgREST dialect, as served by backend-as-a-service
//! providers)
//!
//! Row filters use the `column=op.value` query syntax; upserts use
//! `on_conflict=title` with `Prefer: resolution=merge-duplicates`.

use super::{check_catalog, RemoteError, RemoteStore};
use async_trait::async_trait;
use chrono::Utc;
use comics_common::{Catalog, CatalogRecord, StoredRecord};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::debug;

/// Postgres error code for unique_violation
const UNIQUE_VIOLATION: &str = "23505";

pub struct RestStore {
    client: reqwest::Client,
    base_url: String,
    service_key: String,
}

impl RestStore {
    pub fn new(base_url: &str, service_key: &str) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RemoteError::Unreachable(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.to_string(),
        })
    }

    fn request(&self, method: Method, catalog: Catalog) -> RequestBuilder {
        let url = format!("{}/rest/v1/{}", self.base_url, catalog.table());
        self.client
            .request(method, url)
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    /// Send and decode the returned row array
    async fn rows(&self, request: RequestBuilder) -> Result<Vec<Value>, RemoteError> {
        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::Unreachable(e.to_string()))?;
        let response = check_status(response).await?;
        response
            .json::<Vec<Value>>()
            .await
            .map_err(|e| RemoteError::Unreachable(format!("unexpected response body: {}", e)))
    }

    async fn records(
        &self,
        catalog: Catalog,
        request: RequestBuilder,
    ) -> Result<Vec<StoredRecord>, RemoteError> {
        self.rows(request)
            .await?
            .iter()
            .map(|row| {
                StoredRecord::from_row(catalog, row)
                    .map_err(|e| RemoteError::Unreachable(format!("malformed row: {}", e)))
            })
            .collect()
    }

    async fn single(
        &self,
        catalog: Catalog,
        id: i64,
        request: RequestBuilder,
    ) -> Result<StoredRecord, RemoteError> {
        self.records(catalog, request)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::missing(catalog, id))
    }
}

async fn check_status(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let code = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("code").and_then(Value::as_str).map(str::to_string));

    debug!("REST store returned {}: {}", status, body);
    Err(match status {
        StatusCode::CONFLICT => RemoteError::ConstraintViolation(body),
        _ if code.as_deref() == Some(UNIQUE_VIOLATION) => RemoteError::ConstraintViolation(body),
        StatusCode::NOT_FOUND => RemoteError::NotFound(body),
        _ => RemoteError::Unreachable(format!("{}: {}", status, body)),
    })
}

/// Column form of a record: the media list lives in `media_urls`
fn to_row(record: &CatalogRecord) -> Result<Value, RemoteError> {
    let mut row = serde_json::to_value(record)
        .map_err(|e| RemoteError::Unreachable(format!("failed to encode row: {}", e)))?;
    if let Some(obj) = row.as_object_mut() {
        if let Some(media) = obj.remove("images") {
            obj.insert("media_urls".to_string(), media);
        }
    }
    Ok(row)
}

/// `in.(...)` filter with every title double-quoted
fn in_filter(titles: &[String]) -> String {
    let quoted: Vec<String> = titles
        .iter()
        .map(|t| format!("\"{}\"", t.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    format!("in.({})", quoted.join(","))
}

#[async_trait]
impl RemoteStore for RestStore {
    fn backend(&self) -> &'static str {
        "rest"
    }

    async fn list(&self, catalog: Catalog) -> Result<Vec<StoredRecord>, RemoteError> {
        let request = self
            .request(Method::GET, catalog)
            .query(&[("select", "*"), ("order", "created_at.desc")]);
        self.records(catalog, request).await
    }

    async fn titles(&self, catalog: Catalog) -> Result<BTreeSet<String>, RemoteError> {
        let request = self.request(Method::GET, catalog).query(&[("select", "title")]);
        Ok(self
            .rows(request)
            .await?
            .iter()
            .filter_map(|row| row.get("title").and_then(Value::as_str).map(str::to_string))
            .collect())
    }

    async fn get(&self, catalog: Catalog, id: i64) -> Result<StoredRecord, RemoteError> {
        let request = self
            .request(Method::GET, catalog)
            .query(&[("select", "*".to_string()), ("id", format!("eq.{}", id))]);
        self.single(catalog, id, request).await
    }

    async fn insert(&self, record: &CatalogRecord) -> Result<StoredRecord, RemoteError> {
        let catalog = record.catalog();
        let request = self
            .request(Method::POST, catalog)
            .header("Prefer", "return=representation")
            .json(&[to_row(record)?]);
        self.records(catalog, request)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::Unreachable("insert returned no row".to_string()))
    }

    async fn update(&self, id: i64, record: &CatalogRecord) -> Result<StoredRecord, RemoteError> {
        let catalog = record.catalog();
        let request = self
            .request(Method::PATCH, catalog)
            .query(&[("id", format!("eq.{}", id))])
            .header("Prefer", "return=representation")
            .json(&to_row(record)?);
        self.single(catalog, id, request).await
    }

    async fn delete(&self, catalog: Catalog, id: i64) -> Result<StoredRecord, RemoteError> {
        let request = self
            .request(Method::DELETE, catalog)
            .query(&[("id", format!("eq.{}", id))])
            .header("Prefer", "return=representation");
        self.single(catalog, id, request).await
    }

    async fn delete_titles(
        &self,
        catalog: Catalog,
        titles: &[String],
    ) -> Result<u64, RemoteError> {
        if titles.is_empty() {
            return Ok(0);
        }
        let request = self
            .request(Method::DELETE, catalog)
            .query(&[("title", in_filter(titles))])
            .header("Prefer", "return=representation");
        Ok(self.rows(request).await?.len() as u64)
    }

    async fn upsert(
        &self,
        catalog: Catalog,
        records: &[CatalogRecord],
    ) -> Result<u64, RemoteError> {
        for record in records {
            check_catalog(catalog, record)?;
        }
        if records.is_empty() {
            return Ok(0);
        }
        let now = Utc::now().to_rfc3339();
        let rows = records
            .iter()
            .map(|record| {
                let mut row = to_row(record)?;
                if let Some(obj) = row.as_object_mut() {
                    obj.insert("created_at".to_string(), Value::String(now.clone()));
                }
                Ok(row)
            })
            .collect::<Result<Vec<Value>, RemoteError>>()?;

        let request = self
            .request(Method::POST, catalog)
            .query(&[("on_conflict", "title")])
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(&rows);
        Ok(self.rows(request).await?.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use comics_common::{Comic, UpcomingBook};

    #[test]
    fn test_row_uses_media_urls_column() {
        let mut comic = Comic::new("A");
        comic.media_urls = vec!["u".to_string()];
        let row = to_row(&comic.into()).unwrap();

        assert_eq!(row["media_urls"], serde_json::json!(["u"]));
        assert!(row.get("images").is_none());
    }

    #[test]
    fn test_row_round_trips_through_from_row() {
        let mut book = UpcomingBook::new("Soon");
        book.pre_order = true;
        let record = CatalogRecord::from(book);

        let mut row = to_row(&record).unwrap();
        row["id"] = Value::from(3);
        let stored = StoredRecord::from_row(Catalog::Upcoming, &row).unwrap();

        assert_eq!(stored.id, 3);
        assert_eq!(stored.record, record);
    }

    #[test]
    fn test_in_filter_quotes_titles() {
        let filter = in_filter(&["A, B".to_string(), "Say \"hi\"".to_string()]);
        assert_eq!(filter, r#"in.("A, B","Say \"hi\"")"#);
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let store = RestStore::new("https://example.supabase.co/", "key").unwrap();
        assert_eq!(store.base_url, "https://example.supabase.co");
    }
}
