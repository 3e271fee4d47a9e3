//! Core domain model, catalog wire types and provenance records for altsrc.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use tracing::warn;

pub const CRATE_NAME: &str = "altsrc-core";

/// Placeholder written when a catalog entry offers no download link.
pub const MISSING_DOWNLOAD_URL: &str = "https://there.was.no.download.url";

pub const DEFAULT_COMPATIBILITY: &str = "iOS 14.0 or later";

pub const DESCRIPTION_MAX_CHARS: usize = 200;

/// Publisher document as served by a catalog location.
///
/// Built through [`RawCatalog::from_json_slice`] so a single malformed entry in
/// `apps` does not reject the whole document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawCatalog {
    pub name: String,
    pub identifier: String,
    pub subtitle: Option<String>,
    pub description: Option<String>,
    pub icon_url: Option<String>,
    pub website: Option<String>,
    pub tint_color: Option<String>,
    pub apps: Vec<RawItem>,
    pub skipped_items: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCatalog {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    identifier: Option<String>,
    #[serde(default)]
    subtitle: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, rename = "iconURL")]
    icon_url: Option<String>,
    #[serde(default)]
    website: Option<String>,
    #[serde(default)]
    tint_color: Option<String>,
    #[serde(default)]
    apps: Option<Vec<JsonValue>>,
}

impl RawCatalog {
    pub fn from_json_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        let wire: WireCatalog = serde_json::from_slice(bytes)?;
        Ok(Self::from_wire(wire))
    }

    pub fn from_json_str(text: &str) -> serde_json::Result<Self> {
        Self::from_json_slice(text.as_bytes())
    }

    fn from_wire(wire: WireCatalog) -> Self {
        let mut apps = Vec::new();
        let mut skipped_items = 0usize;
        for (index, value) in wire.apps.unwrap_or_default().into_iter().enumerate() {
            match serde_json::from_value::<RawItem>(value) {
                Ok(item) => apps.push(item),
                Err(err) => {
                    skipped_items += 1;
                    warn!(index, error = %err, "skipping malformed catalog entry");
                }
            }
        }
        Self {
            name: wire.name.unwrap_or_default(),
            identifier: wire.identifier.unwrap_or_default(),
            subtitle: non_empty(wire.subtitle),
            description: non_empty(wire.description),
            icon_url: non_empty(wire.icon_url),
            website: non_empty(wire.website),
            tint_color: non_empty(wire.tint_color),
            apps,
            skipped_items,
        }
    }
}

/// One downloadable entry of a catalog.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawItem {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub bundle_identifier: String,
    #[serde(default)]
    pub developer_name: String,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub localized_description: Option<String>,
    #[serde(default, rename = "iconURL")]
    pub icon_url: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub version_date: Option<String>,
    #[serde(default, rename = "downloadURL")]
    pub download_url: Option<String>,
    #[serde(default)]
    pub size: Option<f64>,
    #[serde(default, rename = "screenshotURLs")]
    pub screenshot_urls: Vec<ScreenshotRef>,
    #[serde(default)]
    pub beta: Option<bool>,
    #[serde(default)]
    pub versions: Vec<RawVersion>,
}

/// Release entry of catalogs that list versions instead of flat fields.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawVersion {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default, rename = "downloadURL")]
    pub download_url: Option<String>,
    #[serde(default)]
    pub size: Option<f64>,
    #[serde(default, rename = "minOSVersion")]
    pub min_os_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ScreenshotRef {
    Url(String),
    Detailed {
        #[serde(rename = "imageURL")]
        image_url: String,
    },
}

impl ScreenshotRef {
    pub fn url(&self) -> &str {
        match self {
            Self::Url(url) => url,
            Self::Detailed { image_url } => image_url,
        }
    }
}

impl RawItem {
    /// Flat fields win; the first entry of `versions` is the latest release.
    pub fn latest_version(&self) -> Option<&RawVersion> {
        self.versions.first()
    }

    pub fn effective_version(&self) -> Option<&str> {
        non_empty_str(self.version.as_deref())
            .or_else(|| non_empty_str(self.latest_version()?.version.as_deref()))
    }

    pub fn effective_version_date(&self) -> Option<&str> {
        non_empty_str(self.version_date.as_deref())
            .or_else(|| non_empty_str(self.latest_version()?.date.as_deref()))
    }

    pub fn effective_download_url(&self) -> Option<&str> {
        non_empty_str(self.download_url.as_deref())
            .or_else(|| non_empty_str(self.latest_version()?.download_url.as_deref()))
    }

    pub fn effective_size(&self) -> Option<f64> {
        self.size.or_else(|| self.latest_version()?.size)
    }

    pub fn min_os_version(&self) -> Option<&str> {
        non_empty_str(self.latest_version()?.min_os_version.as_deref())
    }

    pub fn description_text(&self) -> &str {
        self.localized_description.as_deref().unwrap_or_default()
    }

    pub fn is_beta(&self) -> bool {
        self.beta.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SourceCategory {
    Official,
    #[default]
    Community,
    Developer,
    Specialized,
}

impl SourceCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Official => "Official",
            Self::Community => "Community",
            Self::Developer => "Developer",
            Self::Specialized => "Specialized",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemCategory {
    Games,
    Productivity,
    #[default]
    Utilities,
    Entertainment,
    Social,
    Education,
    Developer,
}

impl ItemCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Games => "games",
            Self::Productivity => "productivity",
            Self::Utilities => "utilities",
            Self::Entertainment => "entertainment",
            Self::Social => "social",
            Self::Education => "education",
            Self::Developer => "developer",
        }
    }
}

/// Classified view of a catalog, before reconciliation with the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedSource {
    pub slug: String,
    pub name: String,
    pub identifier: String,
    pub maintainer: String,
    pub description: String,
    pub url: String,
    pub icon: Option<String>,
    pub website: Option<String>,
    pub category: SourceCategory,
    pub verified: bool,
    pub tags: Vec<String>,
    pub app_count: usize,
    pub last_updated: NaiveDate,
    pub tint_color: Option<String>,
}

/// Classified view of one catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedItem {
    pub slug: String,
    pub name: String,
    pub developer: String,
    pub description: String,
    pub icon: String,
    pub version: Option<String>,
    pub size: String,
    pub category: ItemCategory,
    pub compatibility: String,
    pub bundle_id: String,
    pub tags: Vec<String>,
    pub featured: bool,
    /// Trust hint from the owning catalog; never written to the record directly.
    pub verified_hint: bool,
    pub download_url: Option<String>,
    pub last_updated: NaiveDate,
    pub screenshots: Vec<String>,
    /// Catalog location this entry was read from.
    pub source_url: String,
}

/// One source's offer for an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceEntry {
    pub source_id: String,
    pub download_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default = "epoch_date", deserialize_with = "deserialize_lenient_date")]
    pub last_updated: NaiveDate,
    #[serde(default)]
    pub is_official: bool,
}

/// Maintainer-authored front-matter sub-block, kept as the exact text found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideBlock {
    raw: String,
}

impl OverrideBlock {
    /// `raw` must start with the `overrides:` key line; the storage codec checks it parses.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Persisted source record. Field order is the front-matter order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRecord {
    pub name: String,
    pub maintainer: String,
    pub description: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    pub category: SourceCategory,
    pub verified: bool,
    pub last_updated: NaiveDate,
    pub tags: Vec<String>,
    pub apps: Vec<String>,
    pub app_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tint_color: Option<String>,
    #[serde(skip)]
    pub overrides: Option<OverrideBlock>,
    #[serde(skip)]
    pub body: String,
}

/// Persisted item record. Field order is the front-matter order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRecord {
    pub name: String,
    pub developer: String,
    pub description: String,
    pub icon: String,
    pub version: String,
    pub size: String,
    pub category: ItemCategory,
    pub compatibility: String,
    pub bundle_id: String,
    pub download_url: String,
    pub sources: Vec<ProvenanceEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub screenshots: Vec<String>,
    pub tags: Vec<String>,
    pub last_updated: NaiveDate,
    pub verified: bool,
    pub featured: bool,
    #[serde(skip)]
    pub overrides: Option<OverrideBlock>,
    #[serde(skip)]
    pub body: String,
}

/// 1970-01-01, the stand-in for missing or unparseable dates.
pub fn epoch_date() -> NaiveDate {
    DateTime::<Utc>::UNIX_EPOCH.date_naive()
}

/// Accepts RFC 3339 timestamps, bare `YYYY-MM-DD` dates and naive date-times.
pub fn parse_catalog_date(input: &str) -> Option<NaiveDate> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(input) {
        return Some(ts.with_timezone(&Utc).date_naive());
    }
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        return Some(date);
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(input, fmt).ok())
        .map(|dt| dt.date())
}

fn deserialize_lenient_date<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw
        .as_deref()
        .and_then(parse_catalog_date)
        .unwrap_or_else(epoch_date))
}

/// Lowercases and collapses every run of non-alphanumerics into a single `-`.
pub fn slugify(input: &str) -> String {
    input
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Items are keyed by bundle identifier so a renamed app keeps its record.
pub fn item_slug(bundle_id: &str, name: &str) -> String {
    let from_bundle = slugify(bundle_id);
    if from_bundle.is_empty() {
        slugify(name)
    } else {
        from_bundle
    }
}

pub fn format_size_mb(bytes: Option<f64>) -> String {
    let bytes = bytes.filter(|b| b.is_finite() && *b >= 0.0).unwrap_or(0.0);
    format!("{:.1} MB", bytes / (1024.0 * 1024.0))
}

pub fn truncate_chars(input: &str, max_chars: usize) -> String {
    match input.char_indices().nth(max_chars) {
        Some((idx, _)) => input[..idx].to_string(),
        None => input.to_string(),
    }
}

pub fn capitalize_first(input: &str) -> String {
    let mut chars = input.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn non_empty_str(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
