//! Operator repair tool: rebuild mapping entries from the keys that already
//! exist in the object store.
//!
//! This is heuristic and never runs on the normal sync path. Rules are tried
//! in a fixed order and the first rule that yields any candidate decides:
//!
//! 1. exact forward derivation over the current catalog
//! 2. set filename pattern (`...-{set_num}{view}.jpg`)
//! 3. minifig filename pattern (`...-fig-NNNNNN{view}.jpg`)
//! 4. last hyphen token of the filename as the item id
//!
//! A key with more than one candidate source URL is reported as ambiguous and
//! left out of the mapping for an operator to decide.

use regex::{Captures, Regex};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::catalog::{CatalogItem, ItemKind};
use crate::error::{Result, SyncError};
use crate::keys::{self, OccurrenceTracker};
use crate::mapping::{MappingCache, MappingEntry, PutOutcome};

const VIEW_SUFFIX: &str = r"(?P<suffix>-alt|-back|-side|-view\d+)?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRule {
    ExactKey,
    SetPattern,
    MinifigPattern,
    TrailingId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Matched { source_url: String, rule: MatchRule },
    Ambiguous { candidates: Vec<String>, rule: MatchRule },
    Unmatched,
}

/// Occurrence index encoded by a view suffix.
fn occurrence_from_suffix(suffix: Option<&str>) -> Option<usize> {
    match suffix.unwrap_or("") {
        "" => Some(0),
        "-alt" => Some(1),
        "-back" => Some(2),
        "-side" => Some(3),
        other => other.strip_prefix("-view")?.parse().ok(),
    }
}

pub struct KeyResolver {
    forward: HashMap<String, Vec<String>>,
    by_identity: HashMap<(ItemKind, String, usize), Vec<String>>,
    set_re: Regex,
    minifig_re: Regex,
    trailing_re: Regex,
}

impl KeyResolver {
    /// Index every image of the catalog by the key it would derive to and by
    /// its (kind, id, occurrence) identity.
    pub fn new(items: &[CatalogItem]) -> Result<Self> {
        let build = |pattern: String| {
            Regex::new(&pattern).map_err(|e| SyncError::Config(format!("bad repair pattern: {e}")))
        };
        let set_re = build(format!(
            r"^catalog/set/lego-(?:.+-)?(?P<id>\d+[a-z]?-\d+){VIEW_SUFFIX}\.jpg$"
        ))?;
        let minifig_re = build(format!(
            r"^catalog/minifig/lego-minifig-(?:.+-)?(?P<id>fig-\d+){VIEW_SUFFIX}\.jpg$"
        ))?;
        let trailing_re = build(format!(
            r"^catalog/(?P<kind>set|minifig)/.*?-(?P<id>[A-Za-z0-9]+){VIEW_SUFFIX}\.jpg$"
        ))?;

        let mut forward: HashMap<String, Vec<String>> = HashMap::new();
        let mut by_identity: HashMap<(ItemKind, String, usize), Vec<String>> = HashMap::new();
        let mut tracker = OccurrenceTracker::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for item in items {
            for url in &item.source_image_urls {
                let occurrence = tracker.next(item.kind, &item.id);
                if !seen.insert(url.as_str()) {
                    continue;
                }
                let key = keys::derive(
                    url,
                    item.kind,
                    &item.id,
                    &item.display_name,
                    item.theme.as_deref(),
                    occurrence,
                );
                forward.entry(key).or_default().push(url.clone());
                by_identity
                    .entry((item.kind, item.id.clone(), occurrence))
                    .or_default()
                    .push(url.clone());
            }
        }
        Ok(Self {
            forward,
            by_identity,
            set_re,
            minifig_re,
            trailing_re,
        })
    }

    fn decide(candidates: &[String], rule: MatchRule) -> Option<Resolution> {
        match candidates {
            [] => None,
            [one] => Some(Resolution::Matched {
                source_url: one.clone(),
                rule,
            }),
            many => Some(Resolution::Ambiguous {
                candidates: many.to_vec(),
                rule,
            }),
        }
    }

    fn identity_lookup(&self, kind: ItemKind, caps: &Captures<'_>) -> Option<&Vec<String>> {
        let id = caps.name("id")?.as_str();
        let occurrence = occurrence_from_suffix(caps.name("suffix").map(|m| m.as_str()))?;
        self.by_identity.get(&(kind, id.to_string(), occurrence))
    }

    pub fn resolve(&self, key: &str) -> Resolution {
        if let Some(found) = self
            .forward
            .get(key)
            .and_then(|c| Self::decide(c, MatchRule::ExactKey))
        {
            return found;
        }

        let pattern_rules = [
            (&self.set_re, ItemKind::Set, MatchRule::SetPattern),
            (&self.minifig_re, ItemKind::Minifig, MatchRule::MinifigPattern),
        ];
        for (re, kind, rule) in pattern_rules {
            let found = re
                .captures(key)
                .and_then(|caps| self.identity_lookup(kind, &caps).cloned())
                .and_then(|c| Self::decide(&c, rule));
            if let Some(found) = found {
                return found;
            }
        }

        let trailing = self.trailing_re.captures(key).and_then(|caps| {
            let kind = ItemKind::from_label(caps.name("kind")?.as_str())?;
            self.identity_lookup(kind, &caps).cloned()
        });
        trailing
            .and_then(|c| Self::decide(&c, MatchRule::TrailingId))
            .unwrap_or(Resolution::Unmatched)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoveredEntry {
    pub key: String,
    pub source_url: String,
    pub rule: MatchRule,
}

#[derive(Debug, Clone, Serialize)]
pub struct AmbiguousKey {
    pub key: String,
    pub candidates: Vec<String>,
    pub rule: MatchRule,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RebuildReport {
    pub scanned: usize,
    pub already_mapped: usize,
    pub recovered: Vec<RecoveredEntry>,
    pub ambiguous: Vec<AmbiguousKey>,
    pub unmatched: Vec<String>,
}

impl MappingCache {
    /// Insert best-effort entries for stored keys that the ledger does not
    /// reference yet. Existing entries are never replaced.
    pub fn rebuild_from_store<F>(
        &self,
        stored_keys: &[String],
        resolver: &KeyResolver,
        asset_url: F,
    ) -> RebuildReport
    where
        F: Fn(&str) -> String,
    {
        let known_keys: HashSet<String> = self.derived_keys().into_iter().collect();
        let mut report = RebuildReport {
            scanned: stored_keys.len(),
            ..RebuildReport::default()
        };

        for key in stored_keys {
            if known_keys.contains(key) {
                report.already_mapped += 1;
                continue;
            }
            match resolver.resolve(key) {
                Resolution::Matched { source_url, rule } => {
                    let entry = MappingEntry {
                        source_url: source_url.clone(),
                        asset_url: asset_url(key),
                        derived_key: key.clone(),
                    };
                    match self.put(entry) {
                        PutOutcome::Inserted => {
                            debug!(key = %key, url = %source_url, ?rule, "mapping recovered");
                            report.recovered.push(RecoveredEntry {
                                key: key.clone(),
                                source_url,
                                rule,
                            });
                        }
                        PutOutcome::AlreadyMapped { .. } => report.already_mapped += 1,
                    }
                }
                Resolution::Ambiguous { candidates, rule } => {
                    warn!(key = %key, candidates = candidates.len(), "ambiguous stored key; needs review");
                    report.ambiguous.push(AmbiguousKey {
                        key: key.clone(),
                        candidates,
                        rule,
                    });
                }
                Resolution::Unmatched => report.unmatched.push(key.clone()),
            }
        }

        info!(
            scanned = report.scanned,
            recovered = report.recovered.len(),
            ambiguous = report.ambiguous.len(),
            unmatched = report.unmatched.len(),
            "mapping rebuild finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{minifig, set};

    fn catalog() -> Vec<CatalogItem> {
        let mut bird = set(
            "10353-1",
            "Bird",
            &["https://cdn.test/sets/10353-1.jpg", "https://cdn.test/sets/10353-1b.jpg"],
        );
        bird.theme = Some("Icons".into());
        vec![
            bird,
            minifig("fig-000123", "Darth Vader", &["https://cdn.test/figs/fig-000123.jpg"]),
            set("60400-1", "Race Car", &["https://cdn.test/sets/60400-1.jpg"]),
            set("60400-1", "Race Car (reissue)", &["https://cdn.test/sets/60400-1-r.jpg"]),
        ]
    }

    #[test]
    fn exact_keys_resolve_first() {
        let r = KeyResolver::new(&catalog()).unwrap();
        assert_eq!(
            r.resolve("catalog/set/lego-icons-bird-10353-1-alt.jpg"),
            Resolution::Matched {
                source_url: "https://cdn.test/sets/10353-1b.jpg".into(),
                rule: MatchRule::ExactKey
            }
        );
    }

    #[test]
    fn renamed_items_fall_back_to_patterns() {
        let r = KeyResolver::new(&catalog()).unwrap();
        // stored under an older name/theme spelling
        assert_eq!(
            r.resolve("catalog/set/lego-creator-bird-set-10353-1.jpg"),
            Resolution::Matched {
                source_url: "https://cdn.test/sets/10353-1.jpg".into(),
                rule: MatchRule::SetPattern
            }
        );
        assert_eq!(
            r.resolve("catalog/minifig/lego-minifig-vader-fig-000123.jpg"),
            Resolution::Matched {
                source_url: "https://cdn.test/figs/fig-000123.jpg".into(),
                rule: MatchRule::MinifigPattern
            }
        );
        assert_eq!(r.resolve("catalog/set/lego-misc-99999-1.jpg"), Resolution::Unmatched);
        assert_eq!(r.resolve("unrelated/file.txt"), Resolution::Unmatched);
    }

    #[test]
    fn trailing_id_rule_handles_bare_ids() {
        let r = KeyResolver::new(&[set(
            "10353",
            "Bird",
            &["https://cdn.test/a.jpg", "https://cdn.test/b.jpg"],
        )])
        .unwrap();
        assert_eq!(
            r.resolve("catalog/set/lego-old-name-10353.jpg"),
            Resolution::Matched {
                source_url: "https://cdn.test/a.jpg".into(),
                rule: MatchRule::TrailingId
            }
        );
        assert_eq!(
            r.resolve("catalog/set/lego-old-name-10353-alt.jpg"),
            Resolution::Matched {
                source_url: "https://cdn.test/b.jpg".into(),
                rule: MatchRule::TrailingId
            }
        );
    }

    #[test]
    fn rebuild_inserts_recovered_and_flags_ambiguous() {
        let cache = MappingCache::in_memory();
        cache.put(MappingEntry {
            source_url: "https://cdn.test/figs/fig-000123.jpg".into(),
            asset_url: "https://img.test/catalog/minifig/lego-minifig-darth-vader-fig-000123.jpg".into(),
            derived_key: "catalog/minifig/lego-minifig-darth-vader-fig-000123.jpg".into(),
        });
        let resolver = KeyResolver::new(&catalog()).unwrap();
        let stored: Vec<String> = [
            "catalog/minifig/lego-minifig-darth-vader-fig-000123.jpg",
            "catalog/set/lego-icons-bird-10353-1.jpg",
            // second row of the same set number
            "catalog/set/lego-old-60400-1-alt.jpg",
            "catalog/set/lego-unknown-1-1.jpg",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let report = cache.rebuild_from_store(&stored, &resolver, |k| format!("https://img.test/{k}"));
        assert_eq!(report.already_mapped, 1);
        assert_eq!(report.recovered.len(), 2);
        assert_eq!(report.unmatched, ["catalog/set/lego-unknown-1-1.jpg"]);
        assert_eq!(
            cache.lookup("https://cdn.test/sets/60400-1-r.jpg").as_deref(),
            Some("https://img.test/catalog/set/lego-old-60400-1-alt.jpg")
        );
    }

    #[test]
    fn conflicting_candidates_are_not_inserted() {
        let items = vec![
            set("75192-1", "Falcon", &["https://cdn.test/a.jpg"]),
            set("75192-1", "Falcon", &["https://cdn.test/b.jpg"]),
            set("75192-1", "Falcon", &["https://cdn.test/c.jpg"]),
        ];
        let mut resolver = KeyResolver::new(&items).unwrap();
        // simulate two catalog rows competing for the same identity slot
        resolver
            .by_identity
            .entry((ItemKind::Set, "75192-1".into(), 0))
            .or_default()
            .push("https://cdn.test/z.jpg".into());

        let cache = MappingCache::in_memory();
        let report = cache.rebuild_from_store(
            &["catalog/set/lego-old-falcon-75192-1.jpg".to_string()],
            &resolver,
            |k| k.to_string(),
        );
        assert_eq!(report.ambiguous.len(), 1);
        assert_eq!(report.ambiguous[0].candidates.len(), 2);
        assert!(cache.is_empty());
    }
}
