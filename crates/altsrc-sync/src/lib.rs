//! Catalog sync pipeline: fetch, classify, merge with the persisted store, write back.
//!
//! One location is processed at a time and one record at a time within it. The
//! read-merge-write cycle on each record file takes no lock, so callers must not
//! run two syncs against the same content directory concurrently.

use std::path::{Path, PathBuf};
use std::time::Duration;

use altsrc_adapters::{
    classify_catalog, CatalogFetcher, ClassificationRules, ClassifiedCatalog, HttpCatalogFetcher,
};
use altsrc_core::{
    ItemRecord, NormalizedItem, NormalizedSource, ProvenanceEntry, SourceCategory, SourceRecord,
    MISSING_DOWNLOAD_URL,
};
use altsrc_storage::{ContentStore, HttpClientConfig, HttpFetcher, WriteOutcome};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "altsrc-sync";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub content_dir: PathBuf,
    pub registry_path: PathBuf,
    pub rules_path: Option<PathBuf>,
    pub reports_dir: Option<PathBuf>,
    pub user_agent: String,
    pub http_timeout_secs: u64,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self {
            content_dir: std::env::var("ALTSRC_CONTENT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./src/content")),
            registry_path: std::env::var("ALTSRC_REGISTRY")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./sources.yaml")),
            rules_path: std::env::var("ALTSRC_RULES").ok().map(PathBuf::from),
            reports_dir: std::env::var("ALTSRC_REPORTS_DIR").ok().map(PathBuf::from),
            user_agent: std::env::var("ALTSRC_USER_AGENT")
                .unwrap_or_else(|_| "altsrc-bot/0.1".to_string()),
            http_timeout_secs: std::env::var("ALTSRC_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
        }
    }

    pub fn load_rules(&self) -> Result<ClassificationRules> {
        match &self.rules_path {
            Some(path) => ClassificationRules::from_yaml_file(path),
            None => Ok(ClassificationRules::default()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogRegistry {
    pub catalogs: Vec<CatalogEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    pub url: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl CatalogRegistry {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing catalog registry")
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("loading {}", path.display()))
    }

    pub fn enabled_locations(&self) -> Vec<String> {
        self.catalogs
            .iter()
            .filter(|c| c.enabled)
            .map(|c| c.url.trim().to_string())
            .filter(|url| !url.is_empty())
            .collect()
    }
}

/// Curation rules the merger applies to maintainer-owned fields.
#[derive(Debug, Clone, PartialEq)]
pub struct MergePolicy {
    /// Auto-derived maintainer names too generic to keep (compared lowercase).
    pub placeholder_maintainers: Vec<String>,
    pub official_maintainer: String,
    pub official_token: String,
    pub official_hosts: Vec<String>,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self::from_rules(&ClassificationRules::default())
    }
}

impl MergePolicy {
    pub fn from_rules(rules: &ClassificationRules) -> Self {
        Self {
            placeholder_maintainers: ["source", "repo", "team", "apps", "collection"]
                .into_iter()
                .map(String::from)
                .collect(),
            official_maintainer: rules.official_token.clone(),
            official_token: rules.official_token.clone(),
            official_hosts: vec![format!("{}.io", rules.official_token)],
        }
    }

    /// Official by name and served from an official host.
    pub fn is_genuinely_official(&self, fresh: &NormalizedSource) -> bool {
        let token = self.official_token.to_lowercase();
        let url = fresh.url.to_lowercase();
        fresh.name.to_lowercase().contains(&token)
            && self
                .official_hosts
                .iter()
                .any(|host| url.contains(&host.to_lowercase()))
    }

    pub fn keeps_maintainer(&self, existing: &str, fresh: &NormalizedSource) -> bool {
        let existing = existing.trim().to_lowercase();
        if existing.is_empty() {
            return false;
        }
        if existing == self.official_maintainer.to_lowercase()
            && self.is_genuinely_official(fresh)
        {
            return true;
        }
        !self
            .placeholder_maintainers
            .iter()
            .any(|p| p.eq_ignore_ascii_case(&existing))
    }
}

/// Reconcile a classified catalog with its stored record.
///
/// Catalog data replaces everything except `verified`, `overrides`, the body,
/// and a curated maintainer; `apps` is always the catalog's current roster.
pub fn merge_source(
    existing: Option<SourceRecord>,
    fresh: &NormalizedSource,
    app_slugs: &[String],
    policy: &MergePolicy,
) -> SourceRecord {
    let mut apps: Vec<String> = Vec::with_capacity(app_slugs.len());
    for slug in app_slugs {
        if !slug.is_empty() && !apps.contains(slug) {
            apps.push(slug.clone());
        }
    }

    let mut record = SourceRecord {
        name: fresh.name.clone(),
        maintainer: fresh.maintainer.clone(),
        description: fresh.description.clone(),
        url: fresh.url.clone(),
        icon: fresh.icon.clone(),
        website: fresh.website.clone(),
        category: fresh.category,
        verified: false,
        last_updated: fresh.last_updated,
        tags: fresh.tags.clone(),
        apps,
        app_count: fresh.app_count,
        tint_color: fresh.tint_color.clone(),
        overrides: None,
        body: String::new(),
    };

    if let Some(existing) = existing {
        if policy.keeps_maintainer(&existing.maintainer, fresh) {
            record.maintainer = existing.maintainer;
        } else {
            debug!(
                old = %existing.maintainer,
                new = %record.maintainer,
                "replacing placeholder maintainer"
            );
        }
        record.verified = existing.verified;
        record.overrides = existing.overrides;
        record.body = existing.body;
    }

    record
}

/// The catalog an item offer came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvenanceOrigin {
    pub source_id: String,
    pub is_official: bool,
}

impl ProvenanceOrigin {
    pub fn for_source(source: &NormalizedSource) -> Self {
        Self {
            source_id: source.slug.clone(),
            is_official: source.category == SourceCategory::Official,
        }
    }
}

pub fn provenance_entry(fresh: &NormalizedItem, origin: &ProvenanceOrigin) -> ProvenanceEntry {
    ProvenanceEntry {
        source_id: origin.source_id.clone(),
        download_url: fresh
            .download_url
            .clone()
            .unwrap_or_else(|| MISSING_DOWNLOAD_URL.to_string()),
        version: fresh.version.clone(),
        size: Some(fresh.size.clone()),
        last_updated: fresh.last_updated,
        is_official: origin.is_official,
    }
}

/// Replace the entry for `entry.source_id` in place, or append it. Entries
/// from other sources are kept, and duplicate ids keep their first position.
pub fn upsert_provenance(
    entries: Vec<ProvenanceEntry>,
    entry: ProvenanceEntry,
) -> Vec<ProvenanceEntry> {
    let mut merged: Vec<ProvenanceEntry> = Vec::with_capacity(entries.len() + 1);
    for current in entries {
        if merged.iter().any(|m| m.source_id == current.source_id) {
            continue;
        }
        merged.push(current);
    }
    match merged.iter_mut().find(|m| m.source_id == entry.source_id) {
        Some(slot) => *slot = entry,
        None => merged.push(entry),
    }
    merged
}

/// Reconcile a classified entry with its stored record. Display fields follow
/// the most recently processed catalog; provenance accumulates per source.
pub fn merge_item(
    existing: Option<ItemRecord>,
    fresh: &NormalizedItem,
    origin: &ProvenanceOrigin,
) -> ItemRecord {
    let entry = provenance_entry(fresh, origin);
    let download_url = entry.download_url.clone();
    let (prior_sources, verified, overrides, body) = match existing {
        Some(existing) => (existing.sources, existing.verified, existing.overrides, existing.body),
        None => (Vec::new(), false, None, String::new()),
    };

    ItemRecord {
        name: fresh.name.clone(),
        developer: fresh.developer.clone(),
        description: fresh.description.clone(),
        icon: fresh.icon.clone(),
        version: fresh.version.clone().unwrap_or_else(|| "?".to_string()),
        size: fresh.size.clone(),
        category: fresh.category,
        compatibility: fresh.compatibility.clone(),
        bundle_id: fresh.bundle_id.clone(),
        download_url,
        sources: upsert_provenance(prior_sources, entry),
        screenshots: fresh.screenshots.clone(),
        tags: fresh.tags.clone(),
        last_updated: fresh.last_updated,
        verified,
        featured: fresh.featured,
        overrides,
        body,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationStatus {
    Synced,
    FetchFailed,
    InvalidCatalog,
    SourceWriteFailed,
}

#[derive(Debug, Clone, Serialize)]
pub struct LocationReport {
    pub location: String,
    pub status: LocationStatus,
    pub source_slug: Option<String>,
    pub items_written: usize,
    pub items_unchanged: usize,
    pub failed_items: Vec<String>,
    pub skipped_entries: usize,
    pub error: Option<String>,
}

impl LocationReport {
    fn new(location: &str) -> Self {
        Self {
            location: location.to_string(),
            status: LocationStatus::Synced,
            source_slug: None,
            items_written: 0,
            items_unchanged: 0,
            failed_items: Vec::new(),
            skipped_entries: 0,
            error: None,
        }
    }

    fn failed(mut self, status: LocationStatus, error: impl ToString) -> Self {
        self.status = status;
        self.error = Some(error.to_string());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub locations: usize,
    pub sources_processed: usize,
    pub sources_failed: usize,
    pub items_processed: usize,
    pub items_failed: usize,
    pub records_created: usize,
    pub records_updated: usize,
    pub records_unchanged: usize,
    pub reports: Vec<LocationReport>,
}

impl SyncRunSummary {
    pub fn failed_locations(&self) -> impl Iterator<Item = &LocationReport> {
        self.reports
            .iter()
            .filter(|r| r.status != LocationStatus::Synced)
    }
}

#[derive(Debug, Default)]
struct WriteTally {
    created: usize,
    updated: usize,
    unchanged: usize,
}

impl WriteTally {
    fn record(&mut self, outcome: WriteOutcome) {
        match outcome {
            WriteOutcome::Created => self.created += 1,
            WriteOutcome::Updated => self.updated += 1,
            WriteOutcome::Unchanged => self.unchanged += 1,
        }
    }
}

pub struct SyncPipeline {
    store: ContentStore,
    fetcher: Box<dyn CatalogFetcher>,
    rules: ClassificationRules,
    policy: MergePolicy,
    reports_dir: Option<PathBuf>,
}

impl SyncPipeline {
    pub fn new(
        store: ContentStore,
        fetcher: Box<dyn CatalogFetcher>,
        rules: ClassificationRules,
    ) -> Self {
        let policy = MergePolicy::from_rules(&rules);
        Self {
            store,
            fetcher,
            rules,
            policy,
            reports_dir: None,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
        })?;
        let rules = config.load_rules()?;
        let pipeline = Self::new(
            ContentStore::new(config.content_dir.clone()),
            Box::new(HttpCatalogFetcher::new(http)),
            rules,
        );
        Ok(match &config.reports_dir {
            Some(dir) => pipeline.with_reports_dir(dir.clone()),
            None => pipeline,
        })
    }

    pub fn with_policy(mut self, policy: MergePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_reports_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.reports_dir = Some(dir.into());
        self
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    /// Process every location in order. Failures are confined to the location
    /// or record they happen in and show up in the summary.
    pub async fn run(&self, locations: &[String]) -> SyncRunSummary {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let mut tally = WriteTally::default();
        let mut reports = Vec::with_capacity(locations.len());

        for location in locations {
            let span = info_span!("sync_catalog", %run_id, location = %location);
            let report = self
                .sync_location(location, &mut tally)
                .instrument(span)
                .await;
            reports.push(report);
        }

        let summary = SyncRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            locations: locations.len(),
            sources_processed: reports
                .iter()
                .filter(|r| r.status == LocationStatus::Synced)
                .count(),
            sources_failed: reports
                .iter()
                .filter(|r| r.status != LocationStatus::Synced)
                .count(),
            items_processed: reports
                .iter()
                .map(|r| r.items_written + r.items_unchanged)
                .sum(),
            items_failed: reports.iter().map(|r| r.failed_items.len()).sum(),
            records_created: tally.created,
            records_updated: tally.updated,
            records_unchanged: tally.unchanged,
            reports,
        };

        info!(
            %run_id,
            locations = summary.locations,
            sources_processed = summary.sources_processed,
            sources_failed = summary.sources_failed,
            items_processed = summary.items_processed,
            items_failed = summary.items_failed,
            "sync run complete"
        );

        if let Some(dir) = &self.reports_dir {
            if let Err(err) = write_run_report(dir, &summary).await {
                warn!(error = %err, "could not write run report");
            }
        }

        summary
    }

    async fn sync_location(&self, location: &str, tally: &mut WriteTally) -> LocationReport {
        let mut report = LocationReport::new(location);
        info!("fetching catalog");

        let catalog = match self.fetcher.fetch_catalog(location).await {
            Ok(catalog) => catalog,
            Err(err) => {
                warn!(error = %err, "catalog fetch failed");
                return report.failed(LocationStatus::FetchFailed, err);
            }
        };

        let ClassifiedCatalog {
            source,
            items,
            skipped_items,
        } = classify_catalog(&catalog, location, &self.rules);
        report.skipped_entries = skipped_items;

        if source.slug.is_empty() {
            warn!("catalog has neither a name nor an identifier to key it by");
            return report.failed(LocationStatus::InvalidCatalog, "catalog has no usable name");
        }
        report.source_slug = Some(source.slug.clone());

        let app_slugs: Vec<String> = items.iter().map(|item| item.slug.clone()).collect();
        if let Err(err) = self.sync_source(&source, &app_slugs, tally).await {
            warn!(source = %source.slug, error = %format!("{err:#}"), "source record not updated");
            report.status = LocationStatus::SourceWriteFailed;
            report.error = Some(format!("{err:#}"));
        }

        let origin = ProvenanceOrigin::for_source(&source);
        for item in &items {
            match self.sync_item(item, &origin).await {
                Ok(WriteOutcome::Unchanged) => {
                    tally.record(WriteOutcome::Unchanged);
                    report.items_unchanged += 1;
                }
                Ok(outcome) => {
                    tally.record(outcome);
                    report.items_written += 1;
                }
                Err(err) => {
                    warn!(
                        item = %item.slug,
                        name = %item.name,
                        error = %format!("{err:#}"),
                        "item record not updated"
                    );
                    report.failed_items.push(if item.slug.is_empty() {
                        item.name.clone()
                    } else {
                        item.slug.clone()
                    });
                }
            }
        }

        info!(
            source = %source.slug,
            items = items.len(),
            failed = report.failed_items.len(),
            skipped = skipped_items,
            "catalog processed"
        );
        report
    }

    async fn sync_source(
        &self,
        source: &NormalizedSource,
        app_slugs: &[String],
        tally: &mut WriteTally,
    ) -> Result<()> {
        let existing = self.store.load_source(&source.slug).await?;
        let merged = merge_source(existing, source, app_slugs, &self.policy);
        let outcome = self.store.save_source(&source.slug, &merged).await?;
        debug!(source = %source.slug, ?outcome, "source record committed");
        tally.record(outcome);
        Ok(())
    }

    async fn sync_item(
        &self,
        item: &NormalizedItem,
        origin: &ProvenanceOrigin,
    ) -> Result<WriteOutcome> {
        if item.slug.is_empty() {
            anyhow::bail!("entry has neither a bundle identifier nor a name");
        }
        let existing = self.store.load_item(&item.slug).await?;
        let merged = merge_item(existing, item, origin);
        let outcome = self.store.save_item(&item.slug, &merged).await?;
        debug!(item = %item.slug, ?outcome, "item record committed");
        Ok(outcome)
    }
}

async fn write_run_report(dir: &Path, summary: &SyncRunSummary) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join(format!("{}.json", summary.run_id));
    let bytes = serde_json::to_vec_pretty(summary).context("serializing run summary")?;
    fs::write(&path, bytes)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

/// Locations from the registry unless explicit ones are given.
pub async fn resolve_locations(config: &SyncConfig, explicit: Vec<String>) -> Result<Vec<String>> {
    if !explicit.is_empty() {
        return Ok(explicit);
    }
    Ok(CatalogRegistry::load(&config.registry_path)
        .await?
        .enabled_locations())
}

pub async fn run_sync_once(
    config: &SyncConfig,
    explicit_locations: Vec<String>,
) -> Result<SyncRunSummary> {
    let locations = resolve_locations(config, explicit_locations).await?;
    let pipeline = SyncPipeline::from_config(config)?;
    Ok(pipeline.run(&locations).await)
}

pub async fn run_sync_once_from_env() -> Result<SyncRunSummary> {
    run_sync_once(&SyncConfig::from_env(), Vec::new()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use altsrc_core::{epoch_date, ItemCategory, OverrideBlock};
    use chrono::NaiveDate;

    fn fresh_source(name: &str, url: &str, maintainer: &str) -> NormalizedSource {
        NormalizedSource {
            slug: altsrc_core::slugify(name),
            name: name.to_string(),
            identifier: String::new(),
            maintainer: maintainer.to_string(),
            description: "Collection of 4 apps".to_string(),
            url: url.to_string(),
            icon: None,
            website: None,
            category: SourceCategory::Community,
            verified: false,
            tags: vec!["games".to_string()],
            app_count: 4,
            last_updated: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            tint_color: None,
        }
    }

    fn fresh_item(version: &str, download_url: Option<&str>) -> NormalizedItem {
        NormalizedItem {
            slug: "com-rileytestut-delta".to_string(),
            name: "Delta".to_string(),
            developer: "Riley Testut".to_string(),
            description: "Classic games".to_string(),
            icon: "https://img/delta.png".to_string(),
            version: Some(version.to_string()),
            size: "42.0 MB".to_string(),
            category: ItemCategory::Games,
            compatibility: "iOS 14.0 or later".to_string(),
            bundle_id: "com.rileytestut.Delta".to_string(),
            tags: vec![],
            featured: false,
            verified_hint: false,
            download_url: download_url.map(ToString::to_string),
            last_updated: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            screenshots: vec![],
            source_url: "https://example.com/apps.json".to_string(),
        }
    }

    fn origin(id: &str) -> ProvenanceOrigin {
        ProvenanceOrigin {
            source_id: id.to_string(),
            is_official: false,
        }
    }

    #[test]
    fn new_source_record_starts_unverified_and_bare() {
        let mut fresh = fresh_source("AltStore", "https://cdn.altstore.io/apps.json", "AltStore");
        fresh.category = SourceCategory::Official;
        fresh.verified = true;
        let slugs = ["a".to_string(), "a".to_string(), "b".to_string()];
        let merged = merge_source(None, &fresh, &slugs, &MergePolicy::default());
        assert!(!merged.verified);
        assert!(merged.overrides.is_none());
        assert!(merged.body.is_empty());
        assert_eq!(merged.apps, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(merged.category, SourceCategory::Official);
    }

    #[test]
    fn source_merge_keeps_curated_fields_only() {
        let policy = MergePolicy::default();
        let fresh = fresh_source("Quark Repo", "https://quark.example/apps.json", "Quark");
        let existing = SourceRecord {
            maintainer: "Quark Collective".to_string(),
            verified: true,
            overrides: Some(OverrideBlock::from_raw("overrides:\n  name: \"Quark\"\n")),
            body: "Hand-written intro.\n".to_string(),
            description: "old".to_string(),
            apps: vec!["retired-app".to_string()],
            last_updated: epoch_date(),
            ..merge_source(None, &fresh, &[], &policy)
        };

        let merged = merge_source(Some(existing.clone()), &fresh, &["new-app".into()], &policy);
        assert_eq!(merged.maintainer, "Quark Collective");
        assert!(merged.verified);
        assert_eq!(merged.overrides, existing.overrides);
        assert_eq!(merged.body, existing.body);
        assert_eq!(merged.description, "Collection of 4 apps");
        assert_eq!(merged.apps, vec!["new-app".to_string()]);
        assert_eq!(merged.last_updated, fresh.last_updated);
    }

    #[test]
    fn placeholder_maintainers_are_replaced_except_official() {
        let policy = MergePolicy::default();
        let fresh = fresh_source("Some Repo", "https://example.com/repo.json", "Example");
        for placeholder in ["team", "Repo", "APPS", "source", "collection", ""] {
            let existing = SourceRecord {
                maintainer: placeholder.to_string(),
                ..merge_source(None, &fresh, &[], &policy)
            };
            let merged = merge_source(Some(existing), &fresh, &[], &policy);
            assert_eq!(merged.maintainer, "Example", "{placeholder:?}");
        }

        let official = fresh_source(
            "AltStore",
            "https://cdn.altstore.io/file/altstore/apps.json",
            "Rileytestut",
        );
        let mut strict = policy.clone();
        strict.placeholder_maintainers.push("altstore".to_string());
        let existing = SourceRecord {
            maintainer: "AltStore".to_string(),
            ..merge_source(None, &official, &[], &strict)
        };
        let kept = merge_source(Some(existing.clone()), &official, &[], &strict);
        assert_eq!(kept.maintainer, "AltStore");

        let impostor =
            fresh_source("AltStore Mirror", "https://mirror.example/apps.json", "Mirror");
        let replaced = merge_source(Some(existing), &impostor, &[], &strict);
        assert_eq!(replaced.maintainer, "Mirror");
    }

    #[test]
    fn provenance_is_upserted_by_source_id() {
        let first = merge_item(None, &fresh_item("1.0", Some("https://a/1.0.ipa")), &origin("a"));
        assert_eq!(first.sources.len(), 1);

        let from_b = fresh_item("1.0", Some("https://b/1.0.ipa"));
        let second = merge_item(Some(first), &from_b, &origin("b"));
        let from_a = fresh_item("1.1", Some("https://a/1.1.ipa"));
        let third = merge_item(Some(second), &from_a, &origin("a"));

        let ids: Vec<&str> = third.sources.iter().map(|s| s.source_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(third.sources[0].version.as_deref(), Some("1.1"));
        assert_eq!(third.sources[1].download_url, "https://b/1.0.ipa");
        assert_eq!(third.download_url, "https://a/1.1.ipa");
        assert_eq!(third.version, "1.1");
    }

    #[test]
    fn duplicate_stored_provenance_collapses_to_first() {
        let entry = |id: &str, url: &str| ProvenanceEntry {
            source_id: id.to_string(),
            download_url: url.to_string(),
            version: None,
            size: None,
            last_updated: epoch_date(),
            is_official: false,
        };
        let merged = upsert_provenance(
            vec![entry("a", "1"), entry("b", "2"), entry("a", "3")],
            entry("c", "4"),
        );
        let urls: Vec<&str> = merged.iter().map(|e| e.download_url.as_str()).collect();
        assert_eq!(urls, vec!["1", "2", "4"]);
    }

    #[test]
    fn missing_download_url_uses_sentinel() {
        let merged = merge_item(None, &fresh_item("1.0", None), &origin("a"));
        assert_eq!(merged.sources[0].download_url, MISSING_DOWNLOAD_URL);
        assert_eq!(merged.download_url, MISSING_DOWNLOAD_URL);
    }

    #[test]
    fn item_merge_is_idempotent_and_never_verifies() {
        let mut fresh = fresh_item("2.0", Some("https://a/2.0.ipa"));
        fresh.verified_hint = true;
        let once = merge_item(None, &fresh, &origin("a"));
        let twice = merge_item(Some(once.clone()), &fresh, &origin("a"));
        assert_eq!(once, twice);
        assert!(!twice.verified);

        let mut curated = twice;
        curated.verified = true;
        curated.overrides = Some(OverrideBlock::from_raw("overrides:\n  featured: true\n"));
        let after = merge_item(Some(curated.clone()), &fresh, &origin("b"));
        assert!(after.verified);
        assert_eq!(after.overrides, curated.overrides);
    }

    #[test]
    fn registry_skips_disabled_and_blank_entries() {
        let registry = CatalogRegistry::from_yaml_str(
            concat!(
                "catalogs:\n",
                "  - url: https://a.example/apps.json\n",
                "  - url: https://b.example/apps.json\n",
                "    enabled: false\n",
                "  - url: '  '\n",
                "  - url: https://c.example/apps.json\n",
                "    notes: emulator\n",
            ),
        )
        .unwrap();
        assert_eq!(
            registry.enabled_locations(),
            vec![
                "https://a.example/apps.json".to_string(),
                "https://c.example/apps.json".to_string(),
            ]
        );
    }
}
