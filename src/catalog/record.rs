//! Scraped product records arrive either flat or wrapped in an outer object
//! (`{"product": {...}}` / `{"data": {...}}`). Both shapes are folded into a
//! [`CatalogItem`] here.

use serde::Deserialize;
use std::path::Path;

use super::{is_valid_image_url, CatalogItem, ItemKind};
use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Deserialize)]
pub struct ProductFields {
    #[serde(alias = "set_num", alias = "fig_num", alias = "product_id")]
    pub id: String,
    #[serde(default, alias = "type", alias = "item_type")]
    pub kind: Option<String>,
    #[serde(default, alias = "title")]
    pub name: String,
    #[serde(default, alias = "theme_name")]
    pub theme: Option<String>,
    #[serde(default, alias = "image_urls")]
    pub images: Vec<String>,
    #[serde(default, alias = "image_url")]
    pub img_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawProductRecord {
    Product { product: ProductFields },
    Data { data: ProductFields },
    Flat(ProductFields),
}

impl RawProductRecord {
    fn into_fields(self) -> ProductFields {
        match self {
            RawProductRecord::Product { product } => product,
            RawProductRecord::Data { data } => data,
            RawProductRecord::Flat(fields) => fields,
        }
    }
}

impl From<RawProductRecord> for CatalogItem {
    fn from(raw: RawProductRecord) -> Self {
        let fields = raw.into_fields();
        let id = fields.id.trim().to_string();
        let kind = fields
            .kind
            .as_deref()
            .and_then(ItemKind::from_label)
            .unwrap_or(if id.starts_with("fig-") {
                ItemKind::Minifig
            } else {
                ItemKind::Set
            });

        let mut urls: Vec<String> = Vec::new();
        for url in fields.img_url.into_iter().chain(fields.images) {
            let url = url.trim().to_string();
            if is_valid_image_url(&url) && !urls.contains(&url) {
                urls.push(url);
            }
        }

        CatalogItem {
            id,
            kind,
            display_name: fields.name.trim().to_string(),
            theme: fields
                .theme
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
            source_image_urls: urls,
        }
    }
}

/// Parse a JSON array of product records.
pub fn parse_records(json: &str) -> Result<Vec<CatalogItem>> {
    let raw: Vec<RawProductRecord> = serde_json::from_str(json)?;
    Ok(raw.into_iter().map(CatalogItem::from).collect())
}

pub fn load_records(path: &Path) -> Result<Vec<CatalogItem>> {
    let text = std::fs::read_to_string(path)?;
    parse_records(&text).map_err(|e| match e {
        SyncError::Json(err) => SyncError::Config(format!(
            "product records at {} are not valid: {err}",
            path.display()
        )),
        other => other,
    })
}
