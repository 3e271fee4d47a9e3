use std::path::PathBuf;

use altsrc_adapters::{classify_catalog, ClassificationRules, ClassifiedCatalog, BETA_TAG};
use altsrc_core::{ItemCategory, NormalizedItem, RawCatalog, SourceCategory};
use chrono::NaiveDate;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .join("fixtures/catalogs")
        .join(name)
}

fn classify_fixture(name: &str) -> ClassifiedCatalog {
    let bytes = std::fs::read(fixture(name)).unwrap();
    let catalog = RawCatalog::from_json_slice(&bytes).unwrap();
    let location = format!("https://fixtures.example/{name}");
    classify_catalog(&catalog, &location, &ClassificationRules::default())
}

fn item<'a>(classified: &'a ClassifiedCatalog, slug: &str) -> &'a NormalizedItem {
    classified
        .items
        .iter()
        .find(|item| item.slug == slug)
        .unwrap_or_else(|| panic!("no item {slug}"))
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[test]
fn official_catalog_with_version_history() {
    let classified = classify_fixture("official.json");
    let source = &classified.source;
    assert_eq!(source.slug, "altstore");
    assert_eq!(source.category, SourceCategory::Official);
    assert_eq!(source.maintainer, "AltStore");
    assert_eq!(source.description, "The official AltStore source.");
    assert_eq!(source.tags, vec!["emulation", "games"]);
    assert_eq!(source.last_updated, date(2024, 6, 12));
    assert_eq!(source.tint_color.as_deref(), Some("#018084"));
    assert_eq!(source.app_count, 2);

    let delta = item(&classified, "com-rileytestut-delta");
    assert_eq!(delta.description, "Classic games in your pocket.");
    assert_eq!(delta.category, ItemCategory::Games);
    assert_eq!(delta.tags, vec!["nintendo"]);
    assert_eq!(delta.version.as_deref(), Some("1.6.1"));
    assert_eq!(delta.size, "45.0 MB");
    assert_eq!(delta.compatibility, "iOS 15.0 or later");
    assert_eq!(
        delta.download_url.as_deref(),
        Some("https://cdn.altstore.io/file/altstore/apps/delta/1_6_1.ipa")
    );
    assert_eq!(delta.screenshots.len(), 2);
    assert!(delta.screenshots[1].ends_with("/2.png"));
    assert!(delta.verified_hint);

    let clip = item(&classified, "com-rileytestut-clip");
    assert_eq!(clip.category, ItemCategory::Utilities);
    assert_eq!(clip.tags, vec![BETA_TAG]);
    assert_eq!(clip.compatibility, "iOS 14.0 or later");
    assert_eq!(clip.size, "1.5 MB");
    assert_eq!(clip.last_updated, date(2023, 11, 2));
}

#[test]
fn emulator_only_catalog_is_specialized() {
    let classified = classify_fixture("emulators.json");
    let source = &classified.source;
    assert_eq!(source.category, SourceCategory::Specialized);
    assert_eq!(source.tags, vec!["emulation"]);
    assert_eq!(source.maintainer, "Retrohub");
    assert_eq!(source.last_updated, date(2024, 3, 5));

    let flycast = item(&classified, "io-example-flycast");
    assert_eq!(flycast.category, ItemCategory::Entertainment);
    assert_eq!(flycast.tags, vec!["emulator", "sega"]);

    let ppsspp = item(&classified, "org-ppsspp-ppsspp");
    assert_eq!(ppsspp.tags, vec!["emulator", "open-source", "playstation"]);
    assert_eq!(ppsspp.size, "30.0 MB");

    let melonx = item(&classified, "com-example-melonx");
    assert_eq!(melonx.download_url, None);
    assert_eq!(melonx.size, "0.0 MB");
    assert_eq!(melonx.last_updated, altsrc_core::epoch_date());
}

#[test]
fn community_catalog_skips_malformed_entries() {
    let classified = classify_fixture("community.json");
    assert_eq!(classified.skipped_items, 1);
    assert_eq!(classified.items.len(), 4);

    let source = &classified.source;
    assert_eq!(source.slug, "quark-sources");
    assert_eq!(source.category, SourceCategory::Community);
    assert!(source.tags.is_empty());
    assert_eq!(source.description, "Collection of 4 apps");
    assert_eq!(source.last_updated, date(2024, 7, 15));

    let categories: Vec<ItemCategory> = classified.items.iter().map(|i| i.category).collect();
    assert_eq!(
        categories,
        vec![
            ItemCategory::Social,
            ItemCategory::Productivity,
            ItemCategory::Education,
            ItemCategory::Developer,
        ]
    );
}

#[test]
fn bundled_rules_file_matches_builtin_defaults() {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../rules/classification.yaml");
    let rules = ClassificationRules::from_yaml_file(path).unwrap();
    assert_eq!(rules, ClassificationRules::default());
}
