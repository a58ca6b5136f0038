//! Catalog record types
//!
//! Both catalogs share the same lenient normalization: text fields fall back
//! to `""`, the year / release date falls back to `null`, and the media list is
//! always a sequence of URLs. The same rules apply to snapshot files, HTTP
//! request bodies and rows read back from the remote store.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Default status for upcoming books that do not carry one
pub const DEFAULT_UPCOMING_STATUS: &str = "upcoming";

/// Keys accepted for the media URL list, in lookup order
const MEDIA_KEYS: [&str; 3] = ["images", "media_urls", "cloudinary_url"];

/// The two catalogs served by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Catalog {
    Comics,
    Upcoming,
}

impl Catalog {
    pub const ALL: [Catalog; 2] = [Catalog::Comics, Catalog::Upcoming];

    /// Remote table backing this catalog
    pub fn table(self) -> &'static str {
        match self {
            Catalog::Comics => "comics",
            Catalog::Upcoming => "upcoming_books",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Catalog::Comics => "comics",
            Catalog::Upcoming => "upcoming",
        }
    }

    /// Human label used in API response messages
    pub fn label(self) -> &'static str {
        match self {
            Catalog::Comics => "Comic",
            Catalog::Upcoming => "Upcoming comic",
        }
    }
}

impl fmt::Display for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A published comic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comic {
    pub title: String,
    pub description: String,
    pub genre: String,
    pub year: Option<i32>,
    #[serde(rename = "images")]
    pub media_urls: Vec<String>,
}

impl Comic {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            genre: String::new(),
            year: None,
            media_urls: Vec::new(),
        }
    }
}

/// A book announced but not yet released
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpcomingBook {
    pub title: String,
    pub author: String,
    pub description: String,
    pub genre: String,
    pub release_date: Option<NaiveDate>,
    pub status: String,
    pub pre_order: bool,
    #[serde(rename = "images")]
    pub media_urls: Vec<String>,
}

impl UpcomingBook {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            author: String::new(),
            description: String::new(),
            genre: String::new(),
            release_date: None,
            status: DEFAULT_UPCOMING_STATUS.to_string(),
            pre_order: false,
            media_urls: Vec::new(),
        }
    }
}

/// Canonical record of either catalog, keyed by `title`
///
/// Serializes to the flat snapshot shape (no variant tag); the catalog is
/// always known from context when reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CatalogRecord {
    Comic(Comic),
    Upcoming(UpcomingBook),
}

/// Reasons a record-like object was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("expected a JSON object, found {0}")]
    NotAnObject(&'static str),

    #[error("missing or empty title")]
    MissingTitle,

    #[error("field '{0}' must be a scalar")]
    NotScalar(String),
}

impl CatalogRecord {
    pub fn catalog(&self) -> Catalog {
        match self {
            CatalogRecord::Comic(_) => Catalog::Comics,
            CatalogRecord::Upcoming(_) => Catalog::Upcoming,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            CatalogRecord::Comic(c) => &c.title,
            CatalogRecord::Upcoming(b) => &b.title,
        }
    }

    pub fn media_urls(&self) -> &[String] {
        match self {
            CatalogRecord::Comic(c) => &c.media_urls,
            CatalogRecord::Upcoming(b) => &b.media_urls,
        }
    }

    /// Normalize a loosely shaped JSON object into a record of `catalog`
    pub fn from_value(catalog: Catalog, value: &Value) -> Result<Self, RecordError> {
        let obj = value
            .as_object()
            .ok_or_else(|| RecordError::NotAnObject(json_kind(value)))?;

        let title = text(obj, "title")?.trim().to_string();
        if title.is_empty() {
            return Err(RecordError::MissingTitle);
        }

        let record = match catalog {
            Catalog::Comics => CatalogRecord::Comic(Comic {
                title,
                description: text(obj, "description")?,
                genre: text(obj, "genre")?,
                year: year(obj.get("year")),
                media_urls: media_urls(obj),
            }),
            Catalog::Upcoming => {
                let status = text(obj, "status")?;
                CatalogRecord::Upcoming(UpcomingBook {
                    title,
                    author: text(obj, "author")?,
                    description: text(obj, "description")?,
                    genre: text(obj, "genre")?,
                    release_date: release_date(obj.get("release_date")),
                    status: if status.is_empty() {
                        DEFAULT_UPCOMING_STATUS.to_string()
                    } else {
                        status
                    },
                    pre_order: obj.get("pre_order").and_then(Value::as_bool).unwrap_or(false),
                    media_urls: media_urls(obj),
                })
            }
        };

        Ok(record)
    }
}

impl From<Comic> for CatalogRecord {
    fn from(comic: Comic) -> Self {
        CatalogRecord::Comic(comic)
    }
}

impl From<UpcomingBook> for CatalogRecord {
    fn from(book: UpcomingBook) -> Self {
        CatalogRecord::Upcoming(book)
    }
}

/// A record as it lives in the remote table: server-assigned id and timestamp
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredRecord {
    pub id: i64,
    #[serde(flatten)]
    pub record: CatalogRecord,
    pub created_at: DateTime<Utc>,
}

impl StoredRecord {
    pub fn title(&self) -> &str {
        self.record.title()
    }

    pub fn catalog(&self) -> Catalog {
        self.record.catalog()
    }

    /// Parse a row returned by a remote table API
    pub fn from_row(catalog: Catalog, row: &Value) -> Result<Self, RecordError> {
        let record = CatalogRecord::from_value(catalog, row)?;
        let id = row.get("id").and_then(Value::as_i64).unwrap_or_default();
        let created_at = row
            .get("created_at")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        Ok(Self {
            id,
            record,
            created_at,
        })
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn text(obj: &Map<String, Value>, key: &str) -> Result<String, RecordError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::Bool(b)) => Ok(b.to_string()),
        Some(_) => Err(RecordError::NotScalar(key.to_string())),
    }
}

/// Integer years only; anything unparseable or zero becomes `None`
fn year(value: Option<&Value>) -> Option<i32> {
    let year = match value? {
        Value::Number(n) => n.as_i64().and_then(|y| i32::try_from(y).ok()),
        Value::String(s) => s.trim().parse::<i32>().ok(),
        _ => None,
    }?;
    (year != 0).then_some(year)
}

/// Accepts `YYYY-MM-DD` or a full RFC 3339 timestamp
fn release_date(value: Option<&Value>) -> Option<NaiveDate> {
    let raw = value?.as_str()?.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.date_naive())
        })
}

/// Anything that is not already an array yields an empty list
fn media_urls(obj: &Map<String, Value>) -> Vec<String> {
    MEDIA_KEYS
        .iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_array))
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
