use super::source::AssetSource;
use crate::config::{join_path, BadgerConfig};
use percent_encoding::percent_decode_str;
use scraper::{Html, Selector};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogStage {
    Manifest,
    Directory,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    pub stage: CatalogStage,
    pub files: Vec<String>,
}

/// Resolves the available clip file names: manifest, then directory
/// listing, then the configured fallback list. Stops at the first stage that
/// yields anything; failures only move on to the next stage.
pub struct ClipCatalog<'a> {
    source: &'a dyn AssetSource,
    config: &'a BadgerConfig,
}

impl<'a> ClipCatalog<'a> {
    pub fn new(source: &'a dyn AssetSource, config: &'a BadgerConfig) -> Self {
        Self { source, config }
    }

    pub fn resolve(&self) -> Catalog {
        let manifest = self.from_manifest();
        if !manifest.is_empty() {
            return Catalog {
                stage: CatalogStage::Manifest,
                files: manifest,
            };
        }
        if self.config.scrape_directory {
            let listed = self.from_directory();
            if !listed.is_empty() {
                return Catalog {
                    stage: CatalogStage::Directory,
                    files: listed,
                };
            }
        }
        log::debug!("catalog: using {} fallback clips", self.config.fallback_clips.len());
        Catalog {
            stage: CatalogStage::Fallback,
            files: self.config.fallback_clips.clone(),
        }
    }

    fn from_manifest(&self) -> Vec<String> {
        let Some(name) = self.config.manifest_name.as_deref() else {
            return Vec::new();
        };
        let path = join_path(&self.config.anim_dir, name);
        let text = match self.source.fetch_text(&path) {
            Ok(text) => text,
            Err(err) => {
                log::debug!("catalog: manifest {} unavailable: {}", path, err);
                return Vec::new();
            }
        };
        let entries: Vec<serde_json::Value> = match serde_json::from_str(&text) {
            Ok(entries) => entries,
            Err(err) => {
                log::warn!("catalog: manifest {} is not a JSON array: {}", path, err);
                return Vec::new();
            }
        };
        entries
            .iter()
            .filter_map(|entry| entry.as_str())
            .filter(|file| self.config.is_allowed(file))
            .map(str::to_string)
            .collect()
    }

    fn from_directory(&self) -> Vec<String> {
        let path = join_path(&self.config.anim_dir, "");
        match self.source.fetch_text(&path) {
            Ok(html) => listed_files(&html, self.config),
            Err(err) => {
                log::debug!("catalog: directory listing {} unavailable: {}", path, err);
                Vec::new()
            }
        }
    }
}

/// Decoded last path segments of every `<a href>` in `html`, filtered and deduplicated.
fn listed_files(html: &str, config: &BadgerConfig) -> Vec<String> {
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let Ok(base) = Url::parse("http://listing.invalid/") else {
        return Vec::new();
    };
    let document = Html::parse_document(html);
    let mut files: Vec<String> = Vec::new();
    for href in document.select(&selector).filter_map(|a| a.value().attr("href")) {
        let Ok(url) = base.join(href) else {
            continue;
        };
        let Some(segment) = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|segment| !segment.is_empty())
        else {
            continue;
        };
        let name = percent_decode_str(segment).decode_utf8_lossy().into_owned();
        if config.is_allowed(&name) && !files.contains(&name) {
            files.push(name);
        }
    }
    files
}
