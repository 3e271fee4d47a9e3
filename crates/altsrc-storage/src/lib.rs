//! Front-matter record store + HTTP fetch utilities for altsrc.

use std::path::{Path, PathBuf};
use std::time::Duration;

use altsrc_core::{epoch_date, ItemRecord, OverrideBlock, ProvenanceEntry, SourceRecord};
use anyhow::Context;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use serde_yaml::{Mapping, Value as YamlValue};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "altsrc-storage";

const FRONT_MATTER_FENCE: &str = "---";
const OVERRIDES_KEY: &str = "overrides";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Source,
    Item,
}

impl RecordKind {
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Source => "sources",
            Self::Item => "apps",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    Updated,
    Unchanged,
}

/// A persisted record split into its three parts: flat fields, the verbatim
/// `overrides` sub-block, and the free-form body after the closing fence.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordDocument {
    pub fields: Mapping,
    pub overrides: Option<OverrideBlock>,
    pub body: String,
}

impl RecordDocument {
    /// Never fails: a damaged entry degrades to a missing field so the rest of
    /// the record can still be merged. The overrides block may sit anywhere in
    /// the front-matter; it ends at the next column-0 key.
    pub fn parse(text: &str) -> Self {
        let Some((front_matter, body)) = split_front_matter(text) else {
            warn!("record has no front-matter fence; keeping content as body");
            return Self {
                fields: Mapping::new(),
                overrides: None,
                body: text.to_string(),
            };
        };

        let mut flat = String::with_capacity(front_matter.len());
        let mut overrides_raw = None;
        for entry in top_level_entries(front_matter) {
            if overrides_raw.is_none() && is_overrides_entry(entry) {
                overrides_raw = Some(entry);
            } else {
                flat.push_str(entry);
            }
        }
        let fields = parse_flat_fields(&flat);

        let overrides = overrides_raw.and_then(|raw| match validate_overrides(raw) {
            Ok(()) => Some(OverrideBlock::from_raw(raw)),
            Err(reason) => {
                warn!(%reason, "dropping malformed overrides block");
                None
            }
        });

        Self {
            fields,
            overrides,
            body: body.to_string(),
        }
    }

    pub fn field<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.fields.get(key)?;
        match serde_yaml::from_value(value.clone()) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                warn!(field = key, error = %err, "ignoring unparseable stored field");
                None
            }
        }
    }
}

fn split_front_matter(text: &str) -> Option<(&str, &str)> {
    let rest = text
        .strip_prefix("---\n")
        .or_else(|| text.strip_prefix("---\r\n"))?;
    let mut offset = 0usize;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\r', '\n']) == FRONT_MATTER_FENCE {
            return Some((&rest[..offset], &rest[offset + line.len()..]));
        }
        offset += line.len();
    }
    None
}

/// Splits front-matter into top-level entries: a line starting at column 0
/// plus the indented or blank lines under it.
fn top_level_entries(front_matter: &str) -> Vec<&str> {
    let mut entries = Vec::new();
    let mut start: Option<usize> = None;
    let mut offset = 0usize;
    for line in front_matter.split_inclusive('\n') {
        if line.starts_with(|c: char| !c.is_whitespace()) {
            if let Some(begin) = start {
                entries.push(&front_matter[begin..offset]);
            }
            start = Some(offset);
        }
        offset += line.len();
    }
    if let Some(begin) = start {
        entries.push(&front_matter[begin..]);
    }
    entries
}

fn is_overrides_entry(entry: &str) -> bool {
    entry
        .strip_prefix(OVERRIDES_KEY)
        .is_some_and(|rest| rest.starts_with(':'))
}

fn entry_key(entry: &str) -> &str {
    entry.split(':').next().unwrap_or_default().trim()
}

/// Reads the flat fields in one pass, or entry by entry when the block as a
/// whole does not parse, so one bad line only costs its own field.
fn parse_flat_fields(flat: &str) -> Mapping {
    match serde_yaml::from_str::<YamlValue>(flat) {
        Ok(YamlValue::Mapping(map)) => return map,
        Ok(YamlValue::Null) => return Mapping::new(),
        Ok(_) => warn!("front-matter is not a key/value mapping; reading entries one by one"),
        Err(err) => warn!(error = %err, "unparseable front-matter; reading entries one by one"),
    }

    let mut fields = Mapping::new();
    for entry in top_level_entries(flat) {
        match serde_yaml::from_str::<YamlValue>(entry) {
            Ok(YamlValue::Mapping(map)) => {
                for (key, value) in map {
                    fields.insert(key, value);
                }
            }
            Ok(YamlValue::Null) => {}
            Ok(_) => {
                warn!(field = entry_key(entry), "dropping front-matter entry that is not a key");
            }
            Err(err) => {
                warn!(
                    field = entry_key(entry),
                    error = %err,
                    "dropping unparseable front-matter entry"
                );
            }
        }
    }
    fields
}

fn validate_overrides(raw: &str) -> Result<(), String> {
    let parsed: Mapping = serde_yaml::from_str(raw).map_err(|e| e.to_string())?;
    if parsed.len() != 1 {
        return Err("unexpected keys in the overrides block".to_string());
    }
    match parsed.get(OVERRIDES_KEY) {
        Some(YamlValue::Mapping(_)) | Some(YamlValue::Null) => Ok(()),
        Some(_) => Err("overrides is not a mapping".to_string()),
        None => Err("missing overrides key".to_string()),
    }
}

/// Renders flat fields one per line as `key: <json>` in declaration order,
/// then the overrides block, then the body.
pub fn render_document<T: Serialize>(
    record: &T,
    overrides: Option<&OverrideBlock>,
    body: &str,
) -> anyhow::Result<String> {
    let value = serde_json::to_value(record).context("serializing record fields")?;
    let JsonValue::Object(fields) = value else {
        anyhow::bail!("record did not serialize to a key/value object");
    };

    let mut out = String::from("---\n");
    for (key, value) in &fields {
        let encoded = serde_json::to_string(value)
            .with_context(|| format!("encoding field {key}"))?;
        out.push_str(key);
        out.push_str(": ");
        out.push_str(&encoded);
        out.push('\n');
    }
    if let Some(block) = overrides {
        out.push_str(block.as_str());
        if !block.as_str().ends_with('\n') {
            out.push('\n');
        }
    }
    out.push_str("---\n");
    out.push_str(body);
    Ok(out)
}

pub fn decode_source(doc: RecordDocument) -> SourceRecord {
    let apps: Vec<String> = doc.field("apps").unwrap_or_default();
    SourceRecord {
        name: doc.field("name").unwrap_or_default(),
        maintainer: doc.field("maintainer").unwrap_or_default(),
        description: doc.field("description").unwrap_or_default(),
        url: doc.field("url").unwrap_or_default(),
        icon: doc.field("icon"),
        website: doc.field("website"),
        category: doc.field("category").unwrap_or_default(),
        verified: doc.field("verified").unwrap_or(false),
        last_updated: doc.field("lastUpdated").unwrap_or_else(epoch_date),
        tags: doc.field("tags").unwrap_or_default(),
        app_count: doc.field("appCount").unwrap_or(apps.len()),
        apps,
        tint_color: doc.field("tintColor"),
        overrides: doc.overrides,
        body: doc.body,
    }
}

pub fn decode_item(doc: RecordDocument) -> ItemRecord {
    let sources: Vec<ProvenanceEntry> = doc.field("sources").unwrap_or_default();
    ItemRecord {
        name: doc.field("name").unwrap_or_default(),
        developer: doc.field("developer").unwrap_or_default(),
        description: doc.field("description").unwrap_or_default(),
        icon: doc.field("icon").unwrap_or_default(),
        version: doc.field("version").unwrap_or_default(),
        size: doc.field("size").unwrap_or_default(),
        category: doc.field("category").unwrap_or_default(),
        compatibility: doc.field("compatibility").unwrap_or_default(),
        bundle_id: doc.field("bundleId").unwrap_or_default(),
        download_url: doc.field("downloadUrl").unwrap_or_default(),
        sources,
        screenshots: doc.field("screenshots").unwrap_or_default(),
        tags: doc.field("tags").unwrap_or_default(),
        last_updated: doc.field("lastUpdated").unwrap_or_else(epoch_date),
        verified: doc.field("verified").unwrap_or(false),
        featured: doc.field("featured").unwrap_or(false),
        overrides: doc.overrides,
        body: doc.body,
    }
}

pub fn encode_source(record: &SourceRecord) -> anyhow::Result<String> {
    render_document(record, record.overrides.as_ref(), &record.body)
}

pub fn encode_item(record: &ItemRecord) -> anyhow::Result<String> {
    render_document(record, record.overrides.as_ref(), &record.body)
}

/// Directory of persisted records: `<root>/sources/<slug>.md` and `<root>/apps/<slug>.md`.
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub fn record_path(&self, kind: RecordKind, slug: &str) -> PathBuf {
        self.root.join(kind.dir_name()).join(format!("{slug}.md"))
    }

    pub async fn load_document(
        &self,
        kind: RecordKind,
        slug: &str,
    ) -> anyhow::Result<Option<RecordDocument>> {
        let path = self.record_path(kind, slug);
        match fs::read_to_string(&path).await {
            Ok(text) => Ok(Some(RecordDocument::parse(&text))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("reading record {}", path.display())),
        }
    }

    pub async fn load_source(&self, slug: &str) -> anyhow::Result<Option<SourceRecord>> {
        Ok(self
            .load_document(RecordKind::Source, slug)
            .await?
            .map(decode_source))
    }

    pub async fn load_item(&self, slug: &str) -> anyhow::Result<Option<ItemRecord>> {
        Ok(self
            .load_document(RecordKind::Item, slug)
            .await?
            .map(decode_item))
    }

    pub async fn save_source(
        &self,
        slug: &str,
        record: &SourceRecord,
    ) -> anyhow::Result<WriteOutcome> {
        let text = encode_source(record)?;
        self.write_text(RecordKind::Source, slug, &text).await
    }

    pub async fn save_item(
        &self,
        slug: &str,
        record: &ItemRecord,
    ) -> anyhow::Result<WriteOutcome> {
        let text = encode_item(record)?;
        self.write_text(RecordKind::Item, slug, &text).await
    }

    /// Replace the record atomically via temp-file rename; identical content is left untouched.
    pub async fn write_text(
        &self,
        kind: RecordKind,
        slug: &str,
        text: &str,
    ) -> anyhow::Result<WriteOutcome> {
        if slug.is_empty() {
            anyhow::bail!("refusing to write {} record with empty slug", kind.dir_name());
        }
        let absolute_path = self.record_path(kind, slug);
        let parent = absolute_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating record directory {}", parent.display()))?;

        let existed = match fs::read(&absolute_path).await {
            Ok(current) => {
                if Self::sha256_hex(&current) == Self::sha256_hex(text.as_bytes()) {
                    debug!(path = %absolute_path.display(), "record unchanged");
                    return Ok(WriteOutcome::Unchanged);
                }
                true
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => false,
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("reading record {}", absolute_path.display()))
            }
        };

        let temp_path = parent.join(format!(".{}.{}.tmp", slug, Uuid::new_v4()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp record file {}", temp_path.display()))?;
        let written = write_all_synced(&mut file, text.as_bytes()).await;
        drop(file);
        if let Err(err) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err)
                .with_context(|| format!("writing temp record file {}", temp_path.display()));
        }

        if let Err(err) = fs::rename(&temp_path, &absolute_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "atomically renaming temp record {} -> {}",
                    temp_path.display(),
                    absolute_path.display()
                )
            });
        }

        Ok(if existed {
            WriteOutcome::Updated
        } else {
            WriteOutcome::Created
        })
    }
}

async fn write_all_synced(file: &mut fs::File, bytes: &[u8]) -> std::io::Result<()> {
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
        }
    }
}

/// Single-attempt HTTP GET; callers decide what a failure means for their run.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    pub async fn fetch_bytes(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", url);
        self.fetch_once(url).instrument(span).await
    }

    async fn fetch_once(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        let final_url = resp.url().to_string();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }
        let body = resp.bytes().await?.to_vec();
        Ok(FetchedResponse {
            status,
            final_url,
            body,
        })
    }
}
