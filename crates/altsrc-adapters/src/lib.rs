//! Catalog fetcher contract + rule-table classification of catalogs and entries.

use std::path::Path;

use altsrc_core::{
    capitalize_first, epoch_date, format_size_mb, item_slug, parse_catalog_date, slugify,
    truncate_chars, ItemCategory, NormalizedItem, NormalizedSource, RawCatalog, RawItem,
    ScreenshotRef, SourceCategory, DEFAULT_COMPATIBILITY, DESCRIPTION_MAX_CHARS,
};
use altsrc_storage::{FetchError, HttpFetcher};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

pub const CRATE_NAME: &str = "altsrc-adapters";

pub const BETA_TAG: &str = "beta";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("catalog at {location} is not valid JSON: {source}")]
    Decode {
        location: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Retrieves and decodes one catalog document.
#[async_trait]
pub trait CatalogFetcher: Send + Sync {
    async fn fetch_catalog(&self, location: &str) -> Result<RawCatalog, AdapterError>;
}

#[derive(Debug, Clone)]
pub struct HttpCatalogFetcher {
    http: HttpFetcher,
}

impl HttpCatalogFetcher {
    pub fn new(http: HttpFetcher) -> Self {
        Self { http }
    }
}

#[async_trait]
impl CatalogFetcher for HttpCatalogFetcher {
    async fn fetch_catalog(&self, location: &str) -> Result<RawCatalog, AdapterError> {
        let response = self.http.fetch_bytes(location).await?;
        RawCatalog::from_json_slice(&response.body).map_err(|source| AdapterError::Decode {
            location: location.to_string(),
            source,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagRule {
    pub tag: String,
    pub contains_any: Vec<String>,
}

impl TagRule {
    fn new(tag: &str, contains_any: &[&str]) -> Self {
        Self {
            tag: tag.to_string(),
            contains_any: contains_any.iter().map(ToString::to_string).collect(),
        }
    }

    pub fn matches(&self, lowercase_text: &str) -> bool {
        contains_any(lowercase_text, &self.contains_any)
    }
}

/// Item category rule; the first matching rule in table order wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub category: ItemCategory,
    pub contains_any: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl CategoryRule {
    fn new(category: ItemCategory, contains_any: &[&str], tags: &[&str]) -> Self {
        Self {
            category,
            contains_any: contains_any.iter().map(ToString::to_string).collect(),
            tags: tags.iter().map(ToString::to_string).collect(),
        }
    }

    pub fn matches(&self, lowercase_text: &str) -> bool {
        contains_any(lowercase_text, &self.contains_any)
    }
}

/// A catalog is specialized when it carries `tag` and every entry mentions `every_item_contains`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecializedRule {
    pub tag: String,
    pub every_item_contains: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationRules {
    pub version: u32,
    /// Marks the first-party namespace in a catalog identifier or name.
    pub official_token: String,
    pub developer_max_apps: usize,
    pub specialized: SpecializedRule,
    pub source_tags: Vec<TagRule>,
    pub item_categories: Vec<CategoryRule>,
    pub fallback_category: ItemCategory,
    pub item_tags: Vec<TagRule>,
    pub default_compatibility: String,
}

impl Default for ClassificationRules {
    fn default() -> Self {
        Self {
            version: 1,
            official_token: "altstore".to_string(),
            developer_max_apps: 3,
            specialized: SpecializedRule {
                tag: "emulation".to_string(),
                every_item_contains: "emulator".to_string(),
            },
            source_tags: vec![
                TagRule::new("emulation", &["emulator"]),
                TagRule::new("games", &["game"]),
                TagRule::new("utilities", &["utility"]),
            ],
            item_categories: vec![
                CategoryRule::new(ItemCategory::Games, &["game", "play"], &[]),
                CategoryRule::new(ItemCategory::Entertainment, &["emulator"], &["emulator"]),
                CategoryRule::new(ItemCategory::Social, &["social", "chat"], &[]),
                CategoryRule::new(ItemCategory::Productivity, &["productivity", "work"], &[]),
                CategoryRule::new(ItemCategory::Education, &["education", "learn"], &[]),
                CategoryRule::new(ItemCategory::Developer, &["developer", "code"], &[]),
            ],
            fallback_category: ItemCategory::Utilities,
            item_tags: vec![
                TagRule::new("open-source", &["open source", "open-source"]),
                TagRule::new("nintendo", &["nintendo"]),
                TagRule::new("sega", &["sega"]),
                TagRule::new("playstation", &["sony", "playstation"]),
            ],
            default_compatibility: DEFAULT_COMPATIBILITY.to_string(),
        }
    }
}

impl ClassificationRules {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let rules: Self = serde_yaml::from_str(text).context("parsing classification rules")?;
        if rules.official_token.trim().is_empty() {
            anyhow::bail!("classification rules need a non-empty official_token");
        }
        Ok(rules)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("loading {}", path.display()))
    }

    pub fn is_official_text(&self, text: &str) -> bool {
        text.to_lowercase()
            .contains(&self.official_token.to_lowercase())
    }

    pub fn is_official_catalog(&self, identifier: &str, name: &str) -> bool {
        self.is_official_text(identifier) || self.is_official_text(name)
    }

    /// First matching category rule, with the tags it contributes.
    pub fn categorize_item(&self, lowercase_description: &str) -> (ItemCategory, &[String]) {
        self.item_categories
            .iter()
            .find(|rule| rule.matches(lowercase_description))
            .map(|rule| (rule.category, rule.tags.as_slice()))
            .unwrap_or((self.fallback_category, &[]))
    }
}

fn contains_any(lowercase_text: &str, needles: &[String]) -> bool {
    needles
        .iter()
        .any(|needle| lowercase_text.contains(&needle.to_lowercase()))
}

fn push_unique(tags: &mut Vec<String>, tag: &str) {
    if !tags.iter().any(|t| t == tag) {
        tags.push(tag.to_string());
    }
}

fn derive_maintainer(identifier: &str, name: &str) -> String {
    let from_identifier = identifier
        .rsplit('.')
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let from_name = name.split_whitespace().next();
    capitalize_first(from_identifier.or(from_name).unwrap_or("Unknown"))
}

fn entry_date(item: &RawItem) -> NaiveDate {
    match item.effective_version_date() {
        Some(raw) => parse_catalog_date(raw).unwrap_or_else(|| {
            warn!(
                bundle_id = %item.bundle_identifier,
                date = raw,
                "unparseable version date; using epoch"
            );
            epoch_date()
        }),
        None => epoch_date(),
    }
}

pub fn classify_source(
    catalog: &RawCatalog,
    location: &str,
    rules: &ClassificationRules,
) -> NormalizedSource {
    let descriptions: Vec<String> = catalog
        .apps
        .iter()
        .map(|app| app.description_text().to_lowercase())
        .collect();

    let mut tags = Vec::new();
    for rule in &rules.source_tags {
        if descriptions.iter().any(|d| rule.matches(d)) {
            push_unique(&mut tags, &rule.tag);
        }
    }

    let specialized_keyword = rules.specialized.every_item_contains.to_lowercase();
    let category = if rules.is_official_catalog(&catalog.identifier, &catalog.name) {
        SourceCategory::Official
    } else if catalog.apps.len() <= rules.developer_max_apps {
        SourceCategory::Developer
    } else if tags.contains(&rules.specialized.tag)
        && descriptions.iter().all(|d| d.contains(&specialized_keyword))
    {
        SourceCategory::Specialized
    } else {
        SourceCategory::Community
    };

    let last_updated = catalog
        .apps
        .iter()
        .map(entry_date)
        .max()
        .unwrap_or_else(epoch_date)
        .max(epoch_date());

    let description = catalog
        .description
        .clone()
        .or_else(|| catalog.subtitle.clone())
        .unwrap_or_else(|| format!("Collection of {} apps", catalog.apps.len()));

    let slug = match slugify(&catalog.name) {
        s if s.is_empty() => slugify(&catalog.identifier),
        s => s,
    };

    NormalizedSource {
        slug,
        name: catalog.name.clone(),
        identifier: catalog.identifier.clone(),
        maintainer: derive_maintainer(&catalog.identifier, &catalog.name),
        description,
        url: location.to_string(),
        icon: catalog.icon_url.clone(),
        website: catalog.website.clone(),
        category,
        verified: category == SourceCategory::Official,
        tags,
        app_count: catalog.apps.len(),
        last_updated,
        tint_color: catalog.tint_color.clone(),
    }
}

pub fn classify_item(
    item: &RawItem,
    catalog_location: &str,
    catalog_name: &str,
    rules: &ClassificationRules,
) -> NormalizedItem {
    let description_lower = item.description_text().to_lowercase();

    let (category, category_tags) = rules.categorize_item(&description_lower);
    let mut tags = Vec::new();
    for tag in category_tags {
        push_unique(&mut tags, tag);
    }
    for rule in &rules.item_tags {
        if rule.matches(&description_lower) {
            push_unique(&mut tags, &rule.tag);
        }
    }
    if item.is_beta() {
        push_unique(&mut tags, BETA_TAG);
    }

    let description = item
        .subtitle
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(item.description_text());

    let compatibility = match item.min_os_version() {
        Some(min) => format!("iOS {min} or later"),
        None => rules.default_compatibility.clone(),
    };

    NormalizedItem {
        slug: item_slug(&item.bundle_identifier, &item.name),
        name: item.name.clone(),
        developer: item.developer_name.clone(),
        description: truncate_chars(description, DESCRIPTION_MAX_CHARS),
        icon: item.icon_url.clone().unwrap_or_default(),
        version: item.effective_version().map(ToString::to_string),
        size: format_size_mb(item.effective_size()),
        category,
        compatibility,
        bundle_id: item.bundle_identifier.clone(),
        tags,
        featured: false,
        verified_hint: rules.is_official_text(catalog_name),
        download_url: item.effective_download_url().map(ToString::to_string),
        last_updated: entry_date(item),
        screenshots: item
            .screenshot_urls
            .iter()
            .map(ScreenshotRef::url)
            .map(ToString::to_string)
            .collect(),
        source_url: catalog_location.to_string(),
    }
}

/// A catalog after source and item classification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedCatalog {
    pub source: NormalizedSource,
    pub items: Vec<NormalizedItem>,
    pub skipped_items: usize,
}

pub fn classify_catalog(
    catalog: &RawCatalog,
    location: &str,
    rules: &ClassificationRules,
) -> ClassifiedCatalog {
    ClassifiedCatalog {
        source: classify_source(catalog, location, rules),
        items: catalog
            .apps
            .iter()
            .map(|app| classify_item(app, location, &catalog.name, rules))
            .collect(),
        skipped_items: catalog.skipped_items,
    }
}

pub async fn fetch_and_classify(
    fetcher: &dyn CatalogFetcher,
    location: &str,
    rules: &ClassificationRules,
) -> Result<ClassifiedCatalog, AdapterError> {
    let catalog = fetcher.fetch_catalog(location).await?;
    Ok(classify_catalog(&catalog, location, rules))
}
