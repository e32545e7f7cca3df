//! Catalog items as the sync pipeline sees them.
//!
//! Every source shape (rebrickable-style CSV exports, scraped JSON product
//! records) is normalized into [`CatalogItem`] here; nothing past this module
//! branches on where an item came from.

pub mod record;
pub mod table;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::path::Path;
use tracing::{debug, warn};

use crate::error::Result;
pub use table::CatalogTable;

const IMAGE_EXTENSIONS: [&str; 6] = [".jpg", ".jpeg", ".png", ".gif", ".webp", ".bmp"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Set,
    Minifig,
}

impl ItemKind {
    pub const ALL: [ItemKind; 2] = [ItemKind::Set, ItemKind::Minifig];

    /// Path segment used in storage keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Set => "set",
            ItemKind::Minifig => "minifig",
        }
    }

    /// Item class label used by the checkpoint file.
    pub fn class_label(&self) -> &'static str {
        match self {
            ItemKind::Set => "sets",
            ItemKind::Minifig => "minifigs",
        }
    }

    pub fn from_label(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "set" | "sets" => Some(ItemKind::Set),
            "minifig" | "minifigs" | "minifigure" | "minifigures" => Some(ItemKind::Minifig),
            _ => None,
        }
    }

    /// Catalog export that holds items of this kind.
    pub fn csv_file_name(&self) -> &'static str {
        match self {
            ItemKind::Set => "sets.csv",
            ItemKind::Minifig => "minifigs.csv",
        }
    }

    pub fn json_file_name(&self) -> &'static str {
        match self {
            ItemKind::Set => "sets.json",
            ItemKind::Minifig => "minifigs.json",
        }
    }
}

impl Display for ItemKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: String,
    pub kind: ItemKind,
    pub display_name: String,
    pub theme: Option<String>,
    pub source_image_urls: Vec<String>,
}

/// True when the URL path ends in a known raster image extension.
pub fn is_valid_image_url(raw: &str) -> bool {
    let raw = raw.trim();
    if raw.is_empty() {
        return false;
    }
    let path = match url::Url::parse(raw) {
        Ok(u) => u.path().to_ascii_lowercase(),
        Err(_) => return false,
    };
    IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// `themes.csv` (`id,name,parent_id`) as an id -> name lookup. A missing file
/// yields an empty map; sets then simply carry no theme.
pub fn load_themes(path: &Path) -> Result<HashMap<String, String>> {
    if !path.exists() {
        debug!(path = %path.display(), "themes file not found; sets will have no theme");
        return Ok(HashMap::new());
    }
    let table = CatalogTable::read(path)?;
    let id_col = table.column("id");
    let name_col = table.column("name");
    let (Some(id_col), Some(name_col)) = (id_col, name_col) else {
        warn!(path = %path.display(), "themes file lacks id/name columns");
        return Ok(HashMap::new());
    };
    Ok(table
        .rows
        .iter()
        .filter_map(|row| {
            let id = row.get(id_col)?.trim();
            let name = row.get(name_col)?.trim();
            (!id.is_empty()).then(|| (id.to_string(), name.to_string()))
        })
        .collect())
}

/// Convert the rows of a catalog export into items, one item per row, in file
/// order. Rows keep their position even when they carry no usable image URL so
/// that scan offsets stay comparable across runs.
pub fn items_from_table(
    kind: ItemKind,
    table: &CatalogTable,
    themes: &HashMap<String, String>,
) -> Vec<CatalogItem> {
    let id_col = match kind {
        ItemKind::Set => table.column("set_num"),
        ItemKind::Minifig => table.column("fig_num"),
    };
    let name_col = table.column("name");
    let theme_col = table.column("theme_id");
    let img_col = table.column("img_url");

    table
        .rows
        .iter()
        .map(|row| {
            let cell = |col: Option<usize>| {
                col.and_then(|c| row.get(c))
                    .map(|v| v.trim().to_string())
                    .unwrap_or_default()
            };
            let img = cell(img_col);
            let theme = match kind {
                ItemKind::Set => {
                    let theme_id = cell(theme_col);
                    themes.get(&theme_id).filter(|t| !t.is_empty()).cloned()
                }
                ItemKind::Minifig => None,
            };
            CatalogItem {
                id: cell(id_col),
                kind,
                display_name: cell(name_col),
                theme,
                source_image_urls: if is_valid_image_url(&img) {
                    vec![img]
                } else {
                    Vec::new()
                },
            }
        })
        .collect()
}

/// Load every item of `kind` from the extracted catalog directory. The CSV
/// export wins; scraped product records (`sets.json` / `minifigs.json`) are
/// the fallback.
pub fn load_items(catalog_dir: &Path, kind: ItemKind) -> Result<Vec<CatalogItem>> {
    let path = catalog_dir.join(kind.csv_file_name());
    if !path.exists() {
        let json_path = catalog_dir.join(kind.json_file_name());
        if json_path.exists() {
            let items: Vec<CatalogItem> = record::load_records(&json_path)?
                .into_iter()
                .filter(|item| item.kind == kind)
                .collect();
            debug!(kind = %kind, rows = items.len(), "product records loaded");
            return Ok(items);
        }
        warn!(path = %path.display(), kind = %kind, "catalog file not found");
        return Ok(Vec::new());
    }
    let themes = match kind {
        ItemKind::Set => load_themes(&catalog_dir.join("themes.csv"))?,
        ItemKind::Minifig => HashMap::new(),
    };
    let table = CatalogTable::read(&path)?;
    let items = items_from_table(kind, &table, &themes);
    debug!(kind = %kind, rows = items.len(), "catalog loaded");
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_url_filter_checks_path_extension() {
        assert!(is_valid_image_url("https://cdn.rebrickable.com/media/sets/10353-1.jpg"));
        assert!(is_valid_image_url("https://cdn.example.com/a/b.PNG?width=200"));
        assert!(!is_valid_image_url("https://cdn.example.com/a/b.html"));
        assert!(!is_valid_image_url(""));
        assert!(!is_valid_image_url("not a url.jpg"));
    }

    #[test]
    fn set_rows_resolve_theme_and_keep_row_positions() {
        let csv = "set_num,name,year,theme_id,num_parts,img_url\n\
                   10353-1,Bird,2024,721,800,https://cdn.example.com/sets/10353-1.jpg\n\
                   0011-2,Town Mini-Figures,1979,67,12,\n";
        let table = CatalogTable::parse(csv.as_bytes()).unwrap();
        let themes = HashMap::from([("721".to_string(), "Icons".to_string())]);
        let items = items_from_table(ItemKind::Set, &table, &themes);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "10353-1");
        assert_eq!(items[0].theme.as_deref(), Some("Icons"));
        assert_eq!(items[0].source_image_urls.len(), 1);
        assert!(items[1].source_image_urls.is_empty());
        assert_eq!(items[1].theme, None);
    }

    #[test]
    fn json_records_are_the_fallback_source() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("minifigs.json"),
            r#"[{"product": {"fig_num": "fig-000001", "name": "Pilot",
                             "img_url": "https://cdn.example.com/fig-000001.png"}},
                {"set_num": "60400-1", "name": "Race Car"}]"#,
        )
        .unwrap();
        let figs = load_items(dir.path(), ItemKind::Minifig).unwrap();
        assert_eq!(figs.len(), 1);
        assert_eq!(figs[0].id, "fig-000001");
        assert!(load_items(dir.path(), ItemKind::Set).unwrap().is_empty());
    }

    #[test]
    fn kind_labels_round_trip() {
        for kind in ItemKind::ALL {
            assert_eq!(ItemKind::from_label(kind.class_label()), Some(kind));
            assert_eq!(ItemKind::from_label(kind.as_str()), Some(kind));
        }
        assert_eq!(ItemKind::from_label("parts"), None);
    }
}
