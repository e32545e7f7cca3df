//! Deterministic storage keys for catalog images.
//!
//! Keys only depend on the arguments of [`derive`], never on process state, so a
//! rerun after a crash writes to exactly the same object locations.
//!
//! Layout:
//! - sets: `catalog/set/lego-{theme}-{name}-{id}{view}.jpg`
//! - minifigs: `catalog/minifig/lego-minifig-{name}-{id}{view}.jpg`

use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::catalog::ItemKind;

pub const KEY_PREFIX: &str = "catalog";
const KEY_EXTENSION: &str = ".jpg";
const SET_STEM: &str = "lego";
const SET_FILENAME_MAX: usize = 70;
const SET_FILENAME_CUT_FLOOR: usize = 40;
const MINIFIG_NAME_MAX: usize = 40;
const MINIFIG_NAME_CUT_FLOOR: usize = 30;
const URL_HASH_LEN: usize = 12;

/// Positional suffix for the n-th image (0-based) of one item.
pub fn view_suffix(occurrence_index: usize) -> String {
    match occurrence_index {
        0 => String::new(),
        1 => "-alt".to_string(),
        2 => "-back".to_string(),
        3 => "-side".to_string(),
        n => format!("-view{n}"),
    }
}

/// Lowercase ASCII slug: every non-alphanumeric run becomes a single hyphen,
/// leading/trailing hyphens are trimmed.
pub fn slugify(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_dash = false;
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}

/// Item ids keep their case (`fig-000123`, `75192-1`) but lose anything that is
/// not URL-safe.
fn clean_id(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_dash = false;
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch);
        } else {
            pending_dash = true;
        }
    }
    out
}

/// Cut an ASCII slug to at most `max` bytes, preferring to stop at a hyphen
/// when that still keeps more than `floor` bytes.
fn truncate_slug(slug: &str, max: usize, floor: usize) -> String {
    if slug.len() <= max {
        return slug.to_string();
    }
    let mut cut = &slug[..max];
    if let Some(last_dash) = cut.rfind('-') {
        if last_dash > floor {
            cut = &cut[..last_dash];
        }
    }
    cut.trim_end_matches('-').to_string()
}

/// Stable stand-in for a name that slugifies to nothing: a short hash of the
/// source URL's path.
fn url_path_hash(source_url: &str) -> String {
    let path = url::Url::parse(source_url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| source_url.to_string());
    let digest = Sha256::digest(path.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(URL_HASH_LEN);
    format!("img-{hex}")
}

/// Map one source image to its storage key.
pub fn derive(
    source_url: &str,
    item_kind: ItemKind,
    item_id: &str,
    display_name: &str,
    theme: Option<&str>,
    occurrence_index: usize,
) -> String {
    let mut name = slugify(display_name);
    if name.is_empty() {
        name = url_path_hash(source_url);
    }
    let id = clean_id(item_id);
    let tail = format!("-{id}{}", view_suffix(occurrence_index));

    let filename = match item_kind {
        ItemKind::Set => {
            let theme = theme.map(slugify).unwrap_or_default();
            let stem = [SET_STEM, theme.as_str(), name.as_str()]
                .iter()
                .filter(|part| !part.is_empty())
                .copied()
                .collect::<Vec<_>>()
                .join("-");
            let full = format!("{stem}{tail}");
            if full.len() > SET_FILENAME_MAX {
                // an oversized id may push past the cap, but the `lego` stem stays
                let budget = SET_FILENAME_MAX
                    .saturating_sub(tail.len())
                    .max(SET_STEM.len());
                let base = truncate_slug(&stem, budget, SET_FILENAME_CUT_FLOOR);
                format!("{base}{tail}")
            } else {
                full
            }
        }
        ItemKind::Minifig => {
            let name = truncate_slug(&name, MINIFIG_NAME_MAX, MINIFIG_NAME_CUT_FLOOR);
            format!("lego-minifig-{name}{tail}")
        }
    };

    format!(
        "{KEY_PREFIX}/{}/{filename}{KEY_EXTENSION}",
        item_kind.as_str()
    )
}

/// Hands out occurrence indices per item in discovery order. Feed it every image
/// of the scan in source order, including ones that end up skipped, so the index
/// of a given image never depends on what was already synced.
#[derive(Debug, Default)]
pub struct OccurrenceTracker {
    seen: HashMap<(ItemKind, String), usize>,
}

impl OccurrenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self, kind: ItemKind, item_id: &str) -> usize {
        let slot = self.seen.entry((kind, item_id.to_string())).or_insert(0);
        let current = *slot;
        *slot += 1;
        current
    }
}
